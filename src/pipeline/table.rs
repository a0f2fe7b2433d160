//! Tabular formatting of sanitized transactions for preview and export.

use rust_decimal::Decimal;
use serde::Serialize;

use super::structuring::TransactionRecord;

pub const TABLE_HEADER: [&str; 5] = ["Date", "Description", "Debit", "Credit", "Balance"];

/// Rows of string cells. The first row is the header; every row has the
/// same width.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableMatrix {
    rows: Vec<Vec<String>>,
}

impl TableMatrix {
    /// Build from possibly ragged rows, padding short rows with `""`.
    pub fn from_rows(mut rows: Vec<Vec<String>>) -> Self {
        let width = rows.iter().map(Vec::len).max().unwrap_or(0);
        for row in &mut rows {
            row.resize(width, String::new());
        }
        Self { rows }
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn header(&self) -> Option<&[String]> {
        self.rows.first().map(Vec::as_slice)
    }

    /// Data rows, excluding the header.
    pub fn body(&self) -> &[Vec<String>] {
        self.rows.get(1..).unwrap_or(&[])
    }

    pub fn width(&self) -> usize {
        self.rows.first().map_or(0, Vec::len)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn into_rows(self) -> Vec<Vec<String>> {
        self.rows
    }
}

/// Header plus one row per record, in record order.
pub fn format_table(records: &[TransactionRecord]) -> TableMatrix {
    let mut rows = Vec::with_capacity(records.len() + 1);
    rows.push(TABLE_HEADER.iter().map(|h| h.to_string()).collect());
    rows.extend(records.iter().map(|r| {
        vec![
            r.date.clone(),
            r.description.clone(),
            format_money(r.debit),
            format_money(r.credit),
            format_money(r.balance),
        ]
    }));
    TableMatrix::from_rows(rows)
}

/// Plain decimal string with at least two fraction digits; absent is `""`.
fn format_money(value: Option<Decimal>) -> String {
    let Some(mut value) = value else {
        return String::new();
    };
    if value.scale() < 2 {
        value.rescale(2);
    }
    value.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn record(description: &str, debit: Option<&str>, credit: Option<&str>, balance: Option<&str>) -> TransactionRecord {
        TransactionRecord {
            date: "2024-02-03".into(),
            description: description.into(),
            debit: debit.map(dec),
            credit: credit.map(dec),
            balance: balance.map(dec),
        }
    }

    #[test]
    fn header_then_one_row_per_record() {
        let records = vec![
            record("Card payment", Some("24.50"), None, Some("39975.50")),
            record("Salary", None, Some("2100"), Some("42075.5")),
        ];
        let table = format_table(&records);
        assert_eq!(table.len(), records.len() + 1);
        assert_eq!(table.header().unwrap(), TABLE_HEADER);
        assert_eq!(table.body()[0], ["2024-02-03", "Card payment", "24.50", "", "39975.50"]);
        assert_eq!(table.body()[1], ["2024-02-03", "Salary", "", "2100.00", "42075.50"]);
    }

    #[test]
    fn null_balance_renders_empty() {
        let table = format_table(&[record("Refund", None, Some("5"), None)]);
        assert_eq!(table.body()[0][4], "");
    }

    #[test]
    fn extra_precision_is_kept() {
        assert_eq!(format_money(Some(dec("0.125"))), "0.125");
        assert_eq!(format_money(Some(dec("-50"))), "-50.00");
    }

    #[test]
    fn empty_batch_is_header_only() {
        let table = format_table(&[]);
        assert_eq!(table.len(), 1);
        assert!(table.body().is_empty());
        assert_eq!(table.width(), 5);
    }

    #[test]
    fn ragged_rows_are_padded() {
        let table = TableMatrix::from_rows(vec![
            vec!["a".into(), "b".into(), "c".into()],
            vec!["d".into()],
        ]);
        assert!(table.rows().iter().all(|r| r.len() == 3));
        assert_eq!(table.rows()[1], ["d", "", ""]);
    }

    #[test]
    fn formatting_is_deterministic() {
        let records = vec![record("Card payment", Some("24.50"), None, Some("39975.50"))];
        assert_eq!(format_table(&records), format_table(&records));
    }

    #[test]
    fn serializes_as_rows() {
        let json = serde_json::to_value(format_table(&[])).unwrap();
        assert_eq!(json["rows"][0][0], "Date");
    }
}
