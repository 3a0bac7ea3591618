//! Platform billing: contract fees and billing dates.

use chrono::{Datelike, Duration, NaiveDate};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;

use crate::database::models::Contract;

pub mod stripe;

/// Days a bank-transfer billing invoice stays payable.
pub const PAYMENT_TERMS_DAYS: i64 = 30;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeeBreakdown {
    pub base_fee: Decimal,
    pub user_fee: Decimal,
    pub discount: Decimal,
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
}

/// Base plan fee plus per-user fee, less discount, plus consumption tax
/// (rounded down to the yen). Never negative.
pub fn monthly_fee(contract: &Contract, tax_rate_percent: u32) -> FeeBreakdown {
    let base_fee = contract.monthly_base_fee;
    let user_fee = contract.per_user_fee * Decimal::from(contract.user_count.max(0));
    let subtotal = (base_fee + user_fee - contract.discount).max(Decimal::ZERO);
    let tax = (subtotal * Decimal::from(tax_rate_percent) / Decimal::from(100))
        .round_dp_with_strategy(0, RoundingStrategy::ToZero);
    FeeBreakdown {
        base_fee,
        user_fee,
        discount: contract.discount,
        subtotal,
        tax,
        total: subtotal + tax,
    }
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|d| d.pred_opt())
        .map(|d| d.day())
        .unwrap_or(28)
}

/// The billing day as it falls in a given month: day 31 bills on the 30th
/// in April and on the 28th/29th in February.
fn billing_date_in(year: i32, month: u32, billing_day: u32) -> NaiveDate {
    let day = billing_day.clamp(1, days_in_month(year, month));
    NaiveDate::from_ymd_opt(year, month, day).unwrap_or(NaiveDate::MIN)
}

/// First billing date on or after `from`.
pub fn next_billing_date(billing_day: u32, from: NaiveDate) -> NaiveDate {
    let this_month = billing_date_in(from.year(), from.month(), billing_day);
    if this_month >= from {
        return this_month;
    }
    let (year, month) = if from.month() == 12 { (from.year() + 1, 1) } else { (from.year(), from.month() + 1) };
    billing_date_in(year, month, billing_day)
}

pub fn is_billing_day(billing_day: u32, today: NaiveDate) -> bool {
    next_billing_date(billing_day, today) == today
}

/// Period covered by an invoice issued on `today`: up to the day before the
/// next billing date.
pub fn billing_period(billing_day: u32, today: NaiveDate) -> (NaiveDate, NaiveDate) {
    let next = next_billing_date(billing_day, today + Duration::days(1));
    (today, next - Duration::days(1))
}

pub fn due_date(issued: NaiveDate) -> NaiveDate {
    issued + Duration::days(PAYMENT_TERMS_DAYS)
}

/// `BILL-YYYYMM-XXXXXXXX`, unique per contract and month.
pub fn invoice_number(contract: &Contract, issued: NaiveDate) -> String {
    let id = contract.id.simple().to_string().to_uppercase();
    format!("BILL-{}-{}", issued.format("%Y%m"), &id[..8])
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn contract(base: i64, per_user: i64, users: i32, discount: i64) -> Contract {
        Contract {
            id: Uuid::new_v4(),
            organization_id: Uuid::new_v4(),
            plan: "standard".into(),
            status: "active".into(),
            start_date: date(2026, 1, 1),
            end_date: None,
            billing_day: 31,
            monthly_base_fee: Decimal::from(base),
            per_user_fee: Decimal::from(per_user),
            user_count: users,
            discount: Decimal::from(discount),
            payment_method: "invoice".into(),
            stripe_customer_id: None,
            pending_plan: None,
            pending_base_fee: None,
            plan_change_date: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn fee_includes_users_discount_and_tax() {
        let fee = monthly_fee(&contract(10_000, 500, 12, 1_000), 10);
        assert_eq!(fee.user_fee, Decimal::from(6_000));
        assert_eq!(fee.subtotal, Decimal::from(15_000));
        assert_eq!(fee.tax, Decimal::from(1_500));
        assert_eq!(fee.total, Decimal::from(16_500));
    }

    #[test]
    fn tax_rounds_down_and_fee_never_negative() {
        let fee = monthly_fee(&contract(999, 0, 0, 0), 10);
        assert_eq!(fee.tax, Decimal::from(99));
        let free = monthly_fee(&contract(1_000, 0, 0, 5_000), 10);
        assert_eq!(free.total, Decimal::ZERO);
    }

    #[test]
    fn billing_day_clamps_to_month_end() {
        assert_eq!(next_billing_date(31, date(2026, 2, 10)), date(2026, 2, 28));
        assert_eq!(next_billing_date(31, date(2028, 2, 10)), date(2028, 2, 29));
        assert_eq!(next_billing_date(31, date(2026, 4, 30)), date(2026, 4, 30));
        assert_eq!(next_billing_date(15, date(2026, 12, 16)), date(2027, 1, 15));
        assert!(is_billing_day(31, date(2026, 6, 30)));
        assert!(!is_billing_day(30, date(2026, 5, 31)));
    }

    #[test]
    fn period_runs_to_day_before_next_billing() {
        assert_eq!(billing_period(31, date(2026, 1, 31)), (date(2026, 1, 31), date(2026, 2, 27)));
        assert_eq!(billing_period(10, date(2026, 3, 10)), (date(2026, 3, 10), date(2026, 4, 9)));
    }

    #[test]
    fn invoice_number_embeds_month() {
        let c = contract(1, 0, 0, 0);
        let number = invoice_number(&c, date(2026, 7, 1));
        assert!(number.starts_with("BILL-202607-"));
        assert_eq!(number.len(), "BILL-202607-".len() + 8);
    }
}
