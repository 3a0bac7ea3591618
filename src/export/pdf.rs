use chrono::NaiveDate;
use printpdf::{BuiltinFont, IndirectFontRef, Mm, PdfDocument, PdfDocumentReference, PdfLayerReference};
use rust_decimal::Decimal;

use super::ExportError;
use crate::database::models::LineItem;
use crate::workflow::DocumentKind;

const PAGE_WIDTH: f32 = 210.0;
const PAGE_HEIGHT: f32 = 297.0;
const MARGIN: f32 = 18.0;
const LINE: f32 = 6.0;

/// Everything printed on an estimate, invoice or purchase order.
pub struct PrintableDocument<'a> {
    pub kind: DocumentKind,
    pub number: &'a str,
    pub title: &'a str,
    pub issue_date: NaiveDate,
    pub due_date: Option<NaiveDate>,
    pub organization_name: &'a str,
    pub counterparty: Option<&'a str>,
    pub items: &'a [LineItem],
    pub subtotal: Decimal,
    pub tax_amount: Decimal,
    pub total_amount: Decimal,
    pub notes: Option<&'a str>,
}

/// Thousands-separated yen amount.
pub fn format_yen(amount: Decimal) -> String {
    let rounded = amount.round();
    let negative = rounded.is_sign_negative() && !rounded.is_zero();
    let digits = rounded.abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    format!("{}JPY {}", if negative { "-" } else { "" }, grouped)
}

struct Cursor<'d> {
    doc: &'d PdfDocumentReference,
    layer: PdfLayerReference,
    y: f32,
    page: usize,
}

impl<'d> Cursor<'d> {
    fn text(&self, text: &str, size: f32, x: f32, font: &IndirectFontRef) {
        self.layer.use_text(text, size, Mm(x), Mm(self.y), font);
    }

    fn advance(&mut self, by: f32) {
        self.y -= by;
        if self.y < MARGIN {
            self.page += 1;
            let (page, layer) = self.doc.add_page(Mm(PAGE_WIDTH), Mm(PAGE_HEIGHT), format!("Page {}", self.page));
            self.layer = self.doc.get_page(page).get_layer(layer);
            self.y = PAGE_HEIGHT - MARGIN;
        }
    }
}

fn due_label(kind: DocumentKind) -> &'static str {
    match kind {
        DocumentKind::Estimate => "Valid until",
        DocumentKind::Invoice => "Payment due",
        DocumentKind::PurchaseOrder => "Delivery date",
    }
}

fn counterparty_label(kind: DocumentKind) -> &'static str {
    match kind {
        DocumentKind::PurchaseOrder => "Supplier",
        _ => "Bill to",
    }
}

pub fn render_document(printable: &PrintableDocument<'_>) -> Result<Vec<u8>, ExportError> {
    let heading = format!("{} {}", printable.kind.label(), printable.number);
    let (doc, page, layer) = PdfDocument::new(&heading, Mm(PAGE_WIDTH), Mm(PAGE_HEIGHT), "Page 1");
    let regular = doc
        .add_builtin_font(BuiltinFont::Helvetica)
        .map_err(|e| ExportError::Pdf(e.to_string()))?;
    let bold = doc
        .add_builtin_font(BuiltinFont::HelveticaBold)
        .map_err(|e| ExportError::Pdf(e.to_string()))?;

    let mut cursor = Cursor {
        doc: &doc,
        layer: doc.get_page(page).get_layer(layer),
        y: PAGE_HEIGHT - MARGIN,
        page: 1,
    };

    cursor.text(&printable.kind.label().to_uppercase(), 20.0, MARGIN, &bold);
    cursor.text(printable.organization_name, 11.0, 130.0, &bold);
    cursor.advance(LINE * 2.0);

    cursor.text(&format!("No. {}", printable.number), 10.0, MARGIN, &regular);
    cursor.text(&format!("Date: {}", printable.issue_date), 10.0, 130.0, &regular);
    cursor.advance(LINE);
    if let Some(due) = printable.due_date {
        cursor.text(&format!("{}: {}", due_label(printable.kind), due), 10.0, 130.0, &regular);
    }
    if let Some(counterparty) = printable.counterparty {
        cursor.text(
            &format!("{}: {}", counterparty_label(printable.kind), counterparty),
            10.0,
            MARGIN,
            &regular,
        );
    }
    cursor.advance(LINE);
    cursor.text(&format!("Subject: {}", printable.title), 10.0, MARGIN, &regular);
    cursor.advance(LINE * 2.0);

    cursor.text(&format!("Total {}", format_yen(printable.total_amount)), 14.0, MARGIN, &bold);
    cursor.advance(LINE * 2.0);

    cursor.text("Description", 9.0, MARGIN, &bold);
    cursor.text("Qty", 9.0, 110.0, &bold);
    cursor.text("Unit price", 9.0, 130.0, &bold);
    cursor.text("Amount", 9.0, 165.0, &bold);
    cursor.advance(LINE);

    for item in printable.items {
        let description: String = item.description.chars().take(60).collect();
        let quantity = match &item.unit {
            Some(unit) => format!("{} {}", item.quantity.normalize(), unit),
            None => item.quantity.normalize().to_string(),
        };
        cursor.text(&description, 9.0, MARGIN, &regular);
        cursor.text(&quantity, 9.0, 110.0, &regular);
        cursor.text(&format_yen(item.unit_price), 9.0, 130.0, &regular);
        cursor.text(&format_yen(item.amount), 9.0, 165.0, &regular);
        cursor.advance(LINE);
    }

    cursor.advance(LINE);
    cursor.text("Subtotal", 10.0, 130.0, &regular);
    cursor.text(&format_yen(printable.subtotal), 10.0, 165.0, &regular);
    cursor.advance(LINE);
    cursor.text("Tax", 10.0, 130.0, &regular);
    cursor.text(&format_yen(printable.tax_amount), 10.0, 165.0, &regular);
    cursor.advance(LINE);
    cursor.text("Total", 10.0, 130.0, &bold);
    cursor.text(&format_yen(printable.total_amount), 10.0, 165.0, &bold);

    if let Some(notes) = printable.notes.filter(|n| !n.trim().is_empty()) {
        cursor.advance(LINE * 2.0);
        cursor.text("Notes", 10.0, MARGIN, &bold);
        for line in notes.lines() {
            cursor.advance(LINE);
            cursor.text(line, 9.0, MARGIN, &regular);
        }
    }

    drop(cursor);
    doc.save_to_bytes().map_err(|e| ExportError::Pdf(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn formats_yen_with_separators() {
        assert_eq!(format_yen(Decimal::from(1_234_567)), "JPY 1,234,567");
        assert_eq!(format_yen(Decimal::from(999)), "JPY 999");
        assert_eq!(format_yen(Decimal::from(-1000)), "-JPY 1,000");
        assert_eq!(format_yen(Decimal::ZERO), "JPY 0");
    }

    #[test]
    fn renders_a_pdf_with_many_items() {
        let items: Vec<LineItem> = (0..60)
            .map(|i| LineItem {
                id: Uuid::new_v4(),
                sort_order: i,
                item_type: "material".into(),
                custom_type: None,
                description: format!("Scaffold clamp {}", i),
                quantity: Decimal::from(2),
                unit: Some("pcs".into()),
                unit_price: Decimal::from(1500),
                tax_rate: Decimal::from(10),
                amount: Decimal::from(3000),
            })
            .collect();
        let printable = PrintableDocument {
            kind: DocumentKind::Invoice,
            number: "INV-202601-0001",
            title: "Site works",
            issue_date: NaiveDate::from_ymd_opt(2026, 1, 15).unwrap(),
            due_date: NaiveDate::from_ymd_opt(2026, 2, 28),
            organization_name: "Genba Construction",
            counterparty: Some("Acme Builders"),
            items: &items,
            subtotal: Decimal::from(180_000),
            tax_amount: Decimal::from(18_000),
            total_amount: Decimal::from(198_000),
            notes: Some("Bank transfer only"),
        };
        let bytes = render_document(&printable).unwrap();
        assert!(bytes.starts_with(b"%PDF"));
    }
}
