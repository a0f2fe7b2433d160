use serde::Deserialize;
use serde_json::Value;

use super::types::TransactionRecord;
use super::StructuringError;

/// Outcome of interpreting an extractor payload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedBatch {
    pub records: Vec<TransactionRecord>,
    /// Set when the payload was present but had no usable `transactions` array.
    pub malformed: Option<String>,
    /// Array items skipped because they did not match the record shape.
    pub contract_violations: usize,
}

/// Parse raw model output into a JSON payload.
///
/// Blank output and a literal `null` are "no result" (`Ok(None)`).
/// Anything else that is not JSON is a hard error.
pub fn parse_response_payload(response: &str) -> Result<Option<Value>, StructuringError> {
    let body = strip_code_fence(response.trim());
    if body.is_empty() {
        return Ok(None);
    }

    let value: Value =
        serde_json::from_str(body).map_err(|e| StructuringError::JsonParsing(e.to_string()))?;

    Ok(match value {
        Value::Null => None,
        other => Some(other),
    })
}

/// Models sometimes wrap JSON in ```json fences despite the format constraint.
fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// Turn an extractor payload into records.
///
/// `None` is fatal (`NoResult`). A payload without a `transactions` array is
/// tolerated and reported through `ParsedBatch::malformed`.
pub fn interpret_payload(payload: Option<Value>) -> Result<ParsedBatch, StructuringError> {
    let payload = match payload {
        None | Some(Value::Null) => return Err(StructuringError::NoResult),
        Some(value) => value,
    };

    let items = match payload.get("transactions") {
        Some(Value::Array(items)) => items,
        Some(_) => {
            return Ok(ParsedBatch {
                malformed: Some("`transactions` is not an array".into()),
                ..ParsedBatch::default()
            })
        }
        None => {
            return Ok(ParsedBatch {
                malformed: Some("payload has no `transactions` field".into()),
                ..ParsedBatch::default()
            })
        }
    };

    let (records, contract_violations) = parse_array_lenient(items);
    Ok(ParsedBatch {
        records,
        malformed: None,
        contract_violations,
    })
}

/// Parse an array leniently: skip items that fail to deserialize, counting them.
fn parse_array_lenient(items: &[Value]) -> (Vec<TransactionRecord>, usize) {
    let mut records = Vec::with_capacity(items.len());
    let mut skipped = 0;
    for (index, item) in items.iter().enumerate() {
        match TransactionRecord::deserialize(item) {
            Ok(record) => records.push(record),
            Err(e) => {
                tracing::debug!(index, error = %e, "Skipping transaction item");
                skipped += 1;
            }
        }
    }
    (records, skipped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn blank_response_is_no_result() {
        assert_eq!(parse_response_payload("").unwrap(), None);
        assert_eq!(parse_response_payload("  \n ").unwrap(), None);
    }

    #[test]
    fn literal_null_is_no_result() {
        assert_eq!(parse_response_payload("null").unwrap(), None);
    }

    #[test]
    fn invalid_json_is_error() {
        let err = parse_response_payload("Here are your transactions:").unwrap_err();
        assert!(matches!(err, StructuringError::JsonParsing(_)));
    }

    #[test]
    fn fenced_json_is_accepted() {
        let payload = parse_response_payload("```json\n{\"transactions\": []}\n```")
            .unwrap()
            .unwrap();
        assert_eq!(payload, json!({"transactions": []}));
    }

    #[test]
    fn none_payload_is_fatal() {
        assert!(matches!(interpret_payload(None), Err(StructuringError::NoResult)));
        assert!(matches!(
            interpret_payload(Some(Value::Null)),
            Err(StructuringError::NoResult)
        ));
    }

    #[test]
    fn missing_transactions_is_malformed_not_fatal() {
        let batch = interpret_payload(Some(json!({"items": []}))).unwrap();
        assert!(batch.records.is_empty());
        assert!(batch.malformed.is_some());
    }

    #[test]
    fn non_array_transactions_is_malformed() {
        let batch = interpret_payload(Some(json!({"transactions": "none"}))).unwrap();
        assert!(batch.records.is_empty());
        assert!(batch.malformed.unwrap().contains("not an array"));
    }

    #[test]
    fn empty_array_is_valid_no_transactions() {
        let batch = interpret_payload(Some(json!({"transactions": []}))).unwrap();
        assert_eq!(batch, ParsedBatch::default());
    }

    #[test]
    fn items_missing_balance_are_counted_as_violations() {
        let batch = interpret_payload(Some(json!({"transactions": [
            {"date": "2024-02-03", "description": "Card payment", "debit": 24.5, "balance": 39975.5},
            {"date": "2024-02-04", "description": "No balance key", "debit": 1.0},
            "not an object"
        ]})))
        .unwrap();
        assert_eq!(batch.records.len(), 1);
        assert_eq!(batch.contract_violations, 2);
        assert_eq!(batch.records[0].description, "Card payment");
    }

    #[test]
    fn string_amounts_are_accepted() {
        let batch = interpret_payload(Some(json!({"transactions": [
            {"date": "2024-02-05", "description": "Salary", "credit": "2100.00", "balance": "42075.50"}
        ]})))
        .unwrap();
        assert_eq!(batch.contract_violations, 0);
        assert_eq!(batch.records[0].credit.unwrap().to_string(), "2100.00");
    }
}
