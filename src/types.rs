/// Shared types used across the codebase

use chrono::{DateTime, FixedOffset, NaiveDate, Offset, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Tenant user role. Ordering follows privilege: `Staff < Leader < Manager < Admin`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Staff,
    Leader,
    Manager,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Staff => "staff",
            Role::Leader => "leader",
            Role::Manager => "manager",
            Role::Admin => "admin",
        }
    }

    pub fn at_least(&self, other: Role) -> bool {
        *self >= other
    }

    /// Roles at or above `min`, as stored in the database.
    pub fn at_or_above(min: Role) -> Vec<&'static str> {
        [Role::Staff, Role::Leader, Role::Manager, Role::Admin]
            .into_iter()
            .filter(|r| *r >= min)
            .map(|r| r.as_str())
            .collect()
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "staff" | "user" => Ok(Role::Staff),
            "leader" => Ok(Role::Leader),
            "manager" => Ok(Role::Manager),
            "admin" => Ok(Role::Admin),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}

/// Fixed offset of the business timezone (JST unless configured otherwise).
pub fn business_offset() -> FixedOffset {
    let hours = crate::config::config().attendance.utc_offset_hours;
    FixedOffset::east_opt(hours * 3600).unwrap_or_else(|| Utc.fix())
}

pub fn business_now() -> DateTime<FixedOffset> {
    Utc::now().with_timezone(&business_offset())
}

pub fn business_today() -> NaiveDate {
    business_now().date_naive()
}

/// Pagination query shared by list endpoints.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Page {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl Page {
    /// Returns `(limit, offset)` clamped to the configured bounds.
    pub fn resolve(&self) -> (i64, i64) {
        let api = &crate::config::config().api;
        let limit = self.limit.unwrap_or(api.default_page_size).clamp(1, api.max_page_size);
        let offset = self.offset.unwrap_or(0).max(0);
        (limit, offset)
    }
}

/// List response body: rows plus the total count before paging.
#[derive(Debug, Serialize)]
pub struct Listing<T: Serialize> {
    pub items: Vec<T>,
    pub count: i64,
    pub limit: i64,
    pub offset: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_ordering_matches_privilege() {
        assert!(Role::Admin.at_least(Role::Manager));
        assert!(Role::Manager.at_least(Role::Leader));
        assert!(!Role::Staff.at_least(Role::Leader));
        assert_eq!(Role::at_or_above(Role::Manager), vec!["manager", "admin"]);
    }

    #[test]
    fn role_parses_legacy_user_as_staff() {
        assert_eq!("user".parse::<Role>().unwrap(), Role::Staff);
        assert!("owner".parse::<Role>().is_err());
    }

    #[test]
    fn page_is_clamped() {
        let (limit, offset) = Page { limit: Some(100_000), offset: Some(-3) }.resolve();
        assert_eq!(limit, crate::config::config().api.max_page_size);
        assert_eq!(offset, 0);
    }
}
