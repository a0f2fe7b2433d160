//! Deterministic transaction extractor for line-oriented statements.
//!
//! Implements the same rule contract as the LLM engine using regular
//! expressions: one dated line with trailing amounts is one transaction,
//! carry-forward lines are consumed but never emitted, and the running
//! balance decides whether a movement is a debit or a credit.

use std::str::FromStr;
use std::sync::LazyLock;

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, Utc};
use regex::Regex;
use rust_decimal::Decimal;

use super::types::{ExtractionRequest, TransactionExtractor, TransactionRecord};
use super::StructuringError;

static DATE_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?ix)^\s*
        (?:
            (?P<iy>\d{4})-(?P<im>\d{1,2})-(?P<id>\d{1,2})
          | (?P<nd>\d{1,2})/(?P<nm>\d{1,2})/(?P<ny>\d{4}|\d{2})
          | (?P<td>\d{1,2})(?:st|nd|rd|th)?[\s-]+
            (?P<tm>jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec)[a-z]*\.?
            (?:[\s-]+(?P<ty>(?:19|20)\d{2}))?
        )
        (?:\s+|$)",
    )
    .expect("static regex")
});

static MONEY_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<sign>[-+])?[£$€]?(?P<inner>-)?(?P<int>\d{1,3}(?:,\d{3})+|\d+)\.(?P<frac>\d{2})(?P<marker>CR|DR|cr|dr)?$",
    )
    .expect("static regex")
});

static STATEMENT_YEAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)(?:^|[\s/-])((?:19|20)\d{2})(?:[\s,/-]|$)").expect("static regex")
});

static TOKEN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\S+").expect("static regex"));

const CARRY_FORWARD_MARKERS: &[&str] = &[
    "brought forward",
    "carried forward",
    "opening balance",
    "closing balance",
    "balance b/f",
    "balance c/f",
    "b/fwd",
    "c/fwd",
];

const CREDIT_KEYWORDS: &[&str] = &[
    "salary",
    "wages",
    "deposit",
    "refund",
    "interest",
    "dividend",
    "cashback",
    "paid in",
    "transfer in",
    "reversal",
    "credit",
];

/// Outgoing payments whose wording contains a credit keyword.
const DEBIT_OVERRIDES: &[&str] = &["direct debit", "credit card", "card payment", "standing order"];

/// At most debit, credit and balance columns.
const MAX_AMOUNT_COLUMNS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Marker {
    Credit,
    Debit,
}

#[derive(Debug, Clone, Copy)]
struct Amount {
    value: Decimal,
    marker: Option<Marker>,
}

/// Rule-based engine behind the extractor port.
pub struct RuleBasedExtractor {
    fallback_year: i32,
}

impl RuleBasedExtractor {
    /// Uses the current year when the statement does not print one.
    pub fn new() -> Self {
        Self::with_fallback_year(Utc::now().year())
    }

    pub fn with_fallback_year(fallback_year: i32) -> Self {
        Self { fallback_year }
    }

    /// Parse statement text into records in reading order.
    pub fn extract_records(&self, text: &str) -> Vec<TransactionRecord> {
        let mut calendar = Calendar::new(detect_statement_year(text).unwrap_or(self.fallback_year));
        let mut running: Option<Decimal> = None;
        let mut records = Vec::new();

        for line in text.lines() {
            let (date, rest) = match split_date(line, &mut calendar) {
                Some((date, rest)) => (Some(date), rest),
                None => (None, line),
            };
            let (description, amounts) = peel_amounts(rest);

            if is_carry_forward(description) {
                if let Some(last) = amounts.last() {
                    running = Some(signed_balance(last));
                }
                continue;
            }

            let Some(date) = date else { continue };
            if amounts.is_empty() || description.is_empty() {
                continue;
            }

            let record = build_record(date, description, &amounts, running);
            running = next_running_balance(running, &record);
            records.push(record);
        }

        records
    }
}

impl Default for RuleBasedExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TransactionExtractor for RuleBasedExtractor {
    async fn extract(
        &self,
        request: &ExtractionRequest,
    ) -> Result<Option<serde_json::Value>, StructuringError> {
        let records = self.extract_records(&request.raw_text);
        tracing::debug!(records = records.len(), "Rule-based extraction complete");
        let transactions =
            serde_json::to_value(&records).map_err(|e| StructuringError::JsonParsing(e.to_string()))?;
        Ok(Some(serde_json::json!({ "transactions": transactions })))
    }

    fn name(&self) -> &str {
        "rules"
    }
}

/// First plausible year printed anywhere in the document.
fn detect_statement_year(text: &str) -> Option<i32> {
    STATEMENT_YEAR
        .captures_iter(text)
        .filter_map(|c| c.get(1)?.as_str().parse().ok())
        .next()
}

/// Year assumed for dates printed without one.
///
/// Statements run forward in time, so a month that falls six or more below
/// the previous dated row (December, then January) starts the next year.
struct Calendar {
    year: i32,
    last_month: Option<u32>,
}

impl Calendar {
    fn new(year: i32) -> Self {
        Self {
            year,
            last_month: None,
        }
    }

    fn year_for(&mut self, month: u32) -> i32 {
        if self.last_month.is_some_and(|last| last >= month + 6) {
            self.year += 1;
        }
        self.last_month = Some(month);
        self.year
    }

    /// A fully dated row resets the calendar.
    fn observe(&mut self, year: i32, month: u32) {
        self.year = year;
        self.last_month = Some(month);
    }
}

/// Leading date normalized to `YYYY-MM-DD`, plus the remainder of the line.
fn split_date<'a>(line: &'a str, calendar: &mut Calendar) -> Option<(String, &'a str)> {
    let caps = DATE_PREFIX.captures(line)?;
    let num = |name: &str| caps.name(name).and_then(|m| m.as_str().parse::<u32>().ok());

    let date = if let (Some(y), Some(m), Some(d)) = (num("iy"), num("im"), num("id")) {
        calendar.observe(y as i32, m);
        NaiveDate::from_ymd_opt(y as i32, m, d)
    } else if let (Some(d), Some(m), Some(y)) = (num("nd"), num("nm"), num("ny")) {
        let y = if y < 100 { 2000 + y } else { y };
        calendar.observe(y as i32, m);
        NaiveDate::from_ymd_opt(y as i32, m, d)
    } else {
        let d = num("td")?;
        let m = month_number(caps.name("tm")?.as_str())?;
        let y = match num("ty") {
            Some(y) => {
                calendar.observe(y as i32, m);
                y as i32
            }
            None => calendar.year_for(m),
        };
        NaiveDate::from_ymd_opt(y, m, d)
    };
    let date = date?;

    let end = caps.get(0)?.end();
    Some((date.format("%Y-%m-%d").to_string(), &line[end..]))
}

fn month_number(name: &str) -> Option<u32> {
    let month = match name.get(..3)?.to_ascii_lowercase().as_str() {
        "jan" => 1,
        "feb" => 2,
        "mar" => 3,
        "apr" => 4,
        "may" => 5,
        "jun" => 6,
        "jul" => 7,
        "aug" => 8,
        "sep" => 9,
        "oct" => 10,
        "nov" => 11,
        "dec" => 12,
        _ => return None,
    };
    Some(month)
}

/// Split trailing money tokens off the line. Returns the trimmed
/// description and the amounts in left-to-right order.
fn peel_amounts(rest: &str) -> (&str, Vec<Amount>) {
    let tokens: Vec<_> = TOKEN.find_iter(rest).collect();
    let mut amounts = Vec::new();
    let mut cut = rest.len();

    for token in tokens.iter().rev() {
        if amounts.len() == MAX_AMOUNT_COLUMNS {
            break;
        }
        let Some(amount) = parse_amount(token.as_str()) else {
            break;
        };
        amounts.push(amount);
        cut = token.start();
    }

    amounts.reverse();
    (rest[..cut].trim(), amounts)
}

fn parse_amount(token: &str) -> Option<Amount> {
    let caps = MONEY_TOKEN.captures(token)?;
    let digits = format!("{}.{}", caps["int"].replace(',', ""), &caps["frac"]);
    let mut value = Decimal::from_str(&digits).ok()?;

    let negative = caps.name("sign").is_some_and(|s| s.as_str() == "-") || caps.name("inner").is_some();
    if negative {
        value = -value;
    }

    let marker = caps.name("marker").map(|m| {
        if m.as_str().eq_ignore_ascii_case("cr") {
            Marker::Credit
        } else {
            Marker::Debit
        }
    });

    Some(Amount { value, marker })
}

fn is_carry_forward(description: &str) -> bool {
    let lower = description.to_lowercase();
    CARRY_FORWARD_MARKERS.iter().any(|m| lower.contains(m))
}

/// A `DR` suffix on a balance means overdrawn.
fn signed_balance(amount: &Amount) -> Decimal {
    match amount.marker {
        Some(Marker::Debit) => -amount.value.abs(),
        _ => amount.value,
    }
}

fn build_record(
    date: String,
    description: &str,
    amounts: &[Amount],
    running: Option<Decimal>,
) -> TransactionRecord {
    let mut record = TransactionRecord {
        date,
        description: description.to_string(),
        debit: None,
        credit: None,
        balance: None,
    };

    match amounts {
        [movement] => {
            assign_movement(&mut record, movement, None, running);
        }
        [movement, balance] => {
            let balance = signed_balance(balance);
            record.balance = Some(balance);
            assign_movement(&mut record, movement, Some(balance), running);
        }
        [debit, credit, balance, ..] => {
            record.debit = Some(debit.value.abs()).filter(|v| !v.is_zero());
            record.credit = Some(credit.value.abs()).filter(|v| !v.is_zero());
            record.balance = Some(signed_balance(balance));
        }
        [] => {}
    }

    record
}

fn assign_movement(
    record: &mut TransactionRecord,
    movement: &Amount,
    balance: Option<Decimal>,
    running: Option<Decimal>,
) {
    let value = movement.value.abs();
    let is_credit = match (movement.marker, balance.zip(running)) {
        (Some(marker), _) => marker == Marker::Credit,
        (None, Some((balance, previous))) if balance != previous => balance > previous,
        _ if movement.value.is_sign_negative() => false,
        _ => has_credit_keyword(&record.description),
    };

    if is_credit {
        record.credit = Some(value);
    } else {
        record.debit = Some(value);
    }
}

fn has_credit_keyword(description: &str) -> bool {
    let lower = description.to_lowercase();
    !DEBIT_OVERRIDES.iter().any(|k| lower.contains(k))
        && CREDIT_KEYWORDS.iter().any(|k| lower.contains(k))
}

fn next_running_balance(running: Option<Decimal>, record: &TransactionRecord) -> Option<Decimal> {
    if record.balance.is_some() {
        return record.balance;
    }
    running.map(|r| r + record.credit.unwrap_or_default() - record.debit.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::extraction::ExtractionMode;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn extractor() -> RuleBasedExtractor {
        RuleBasedExtractor::with_fallback_year(2024)
    }

    const STATEMENT: &str = "\
Example Bank plc
Statement period 1 February 2024 to 29 February 2024
Date Description Paid out Paid in Balance
1 Feb Balance brought forward 40,000.00
3 Feb Card payment - High St Petrol 24.50 39,975.50
5 Feb Salary ACME LTD 2,100.00 42,075.50
9 Feb Direct debit - Energy Co 85.00 41,990.50
29 Feb Balance carried forward 41,990.50
";

    #[test]
    fn carry_forward_line_is_not_a_transaction() {
        let records = extractor().extract_records(STATEMENT);
        assert!(records
            .iter()
            .all(|r| !r.description.to_lowercase().contains("forward")));
        assert_eq!(records.len(), 3);
    }

    #[test]
    fn card_payment_row_is_a_debit_with_balance() {
        let records = extractor().extract_records(STATEMENT);
        let row = &records[0];
        assert_eq!(row.date, "2024-02-03");
        assert_eq!(row.description, "Card payment - High St Petrol");
        assert_eq!(row.debit, Some(dec("24.50")));
        assert_eq!(row.credit, None);
        assert_eq!(row.balance, Some(dec("39975.50")));
    }

    #[test]
    fn balance_increase_is_a_credit() {
        let records = extractor().extract_records(STATEMENT);
        assert_eq!(records[1].description, "Salary ACME LTD");
        assert_eq!(records[1].credit, Some(dec("2100.00")));
        assert_eq!(records[1].debit, None);
        assert_eq!(records[2].debit, Some(dec("85.00")));
    }

    #[test]
    fn single_row_without_context_uses_keywords() {
        let records =
            extractor().extract_records("3 Feb Card payment - High St Petrol 24.50 39,975.50");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].debit, Some(dec("24.50")));
        assert_eq!(records[0].credit, None);

        let records = extractor().extract_records("6 Mar Interest paid 1.25");
        assert_eq!(records[0].credit, Some(dec("1.25")));
        assert_eq!(records[0].balance, None);
    }

    #[test]
    fn negative_amount_is_a_debit() {
        let records = extractor().extract_records("2024-03-06 Refund reversal -12.00");
        assert_eq!(records[0].debit, Some(dec("12.00")));
        assert_eq!(records[0].credit, None);
    }

    #[test]
    fn cr_dr_markers_decide_direction() {
        let records = extractor().extract_records("06/03/2024 Transfer 50.00CR 150.00\n07/03/2024 Fee 200.00DR 50.00DR");
        assert_eq!(records[0].date, "2024-03-06");
        assert_eq!(records[0].credit, Some(dec("50.00")));
        assert_eq!(records[1].debit, Some(dec("200.00")));
        assert_eq!(records[1].balance, Some(dec("-50.00")));
    }

    #[test]
    fn three_amount_columns() {
        let records = extractor().extract_records("10 Apr 2023 Transfer 10.00 0.00 90.00");
        let row = &records[0];
        assert_eq!(row.date, "2023-04-10");
        assert_eq!(row.debit, Some(dec("10.00")));
        assert_eq!(row.credit, None);
        assert_eq!(row.balance, Some(dec("90.00")));
    }

    #[test]
    fn numbers_inside_description_are_kept() {
        let records = extractor().extract_records("3 Feb Cheque 100234 250.00 1,000.00");
        assert_eq!(records[0].description, "Cheque 100234");
    }

    #[test]
    fn lines_without_date_or_amount_are_ignored() {
        let text = "Account number 12345678\nDate Description Balance\n3 Feb Note with no amount";
        assert!(extractor().extract_records(text).is_empty());
    }

    #[test]
    fn impossible_dates_are_skipped() {
        assert!(extractor().extract_records("31 Feb Coffee 3.20").is_empty());
    }

    #[test]
    fn year_comes_from_statement_then_fallback() {
        assert_eq!(detect_statement_year(STATEMENT), Some(2024));
        assert_eq!(detect_statement_year("Balance 2024.50"), None);

        let records = RuleBasedExtractor::with_fallback_year(2019).extract_records("3 Feb Coffee 3.20");
        assert_eq!(records[0].date, "2019-02-03");
    }

    #[test]
    fn direct_credit_without_balance_is_a_credit() {
        let records = extractor().extract_records("3 Feb Direct credit ACME 100.00");
        assert_eq!(records[0].credit, Some(dec("100.00")));
        assert_eq!(records[0].debit, None);

        let records = extractor().extract_records("4 Feb Credit card payment 60.00\n5 Feb Direct debit - Energy Co 85.00");
        assert!(records.iter().all(|r| r.credit.is_none() && r.debit.is_some()));
    }

    #[test]
    fn yearless_dates_roll_over_at_new_year() {
        let text = "Statement period 15 Dec 2023 to 14 Jan 2024\n20 Dec Coffee 3.20\n31 Dec Cinema 12.00\n5 Jan Tea 2.10\n9 Jan Lunch 8.40";
        let dates: Vec<String> = extractor().extract_records(text).into_iter().map(|r| r.date).collect();
        assert_eq!(dates, ["2023-12-20", "2023-12-31", "2024-01-05", "2024-01-09"]);
    }

    #[test]
    fn months_within_a_year_do_not_roll_over() {
        let mut calendar = Calendar::new(2024);
        assert_eq!(calendar.year_for(2), 2024);
        assert_eq!(calendar.year_for(3), 2024);
        assert_eq!(calendar.year_for(2), 2024);
        assert_eq!(calendar.year_for(12), 2024);
        assert_eq!(calendar.year_for(1), 2025);
    }

    #[test]
    fn running_balance_follows_rows_without_balance() {
        let text = "1 Feb Opening balance 100.00\n2 Feb Coffee 3.00\n3 Feb Shop 7.00 90.00";
        let records = extractor().extract_records(text);
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].debit, Some(dec("7.00")));
    }

    #[tokio::test]
    async fn payload_matches_contract_shape() {
        let request = ExtractionRequest {
            raw_text: "3 Feb Card payment - High St Petrol 24.50 39,975.50".into(),
            source: ExtractionMode::TextNative,
        };
        let payload = extractor().extract(&request).await.unwrap().unwrap();
        let row = &payload["transactions"][0];
        assert_eq!(row["date"], "2024-02-03");
        assert_eq!(row["debit"].as_f64(), Some(24.5));
        assert_eq!(row["balance"].as_f64(), Some(39975.5));
        assert!(row.get("credit").is_none());
    }

    #[tokio::test]
    async fn empty_text_is_empty_array() {
        let request = ExtractionRequest {
            raw_text: String::new(),
            source: ExtractionMode::ImageBased,
        };
        let payload = extractor().extract(&request).await.unwrap().unwrap();
        assert_eq!(payload, serde_json::json!({"transactions": []}));
    }
}
