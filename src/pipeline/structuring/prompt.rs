use crate::pipeline::extraction::ExtractionMode;

/// Version of the extraction rules. Bump when the rules below change.
pub const RULE_CONTRACT_VERSION: &str = "2024.1";

pub const EXTRACTION_SYSTEM_PROMPT: &str = r#"
You are a bank statement transaction extractor. Your ONLY role is to convert
raw statement text into a list of transactions. You extract information that
is explicitly present in the text.

RULES (ABSOLUTE, NO EXCEPTIONS):
1. Ignore everything outside the transaction table (headers, addresses, marketing, footers).
2. A transaction row has a date, a description, and at least one monetary value.
3. Every transaction MUST include "date", "description" and "balance". If no balance is printed on the row, "balance" is null.
4. "debit" and "credit" are independently optional. Omit the key when the row has no such amount. NEVER output 0 for a missing amount.
5. Carry-forward lines ("Balance brought forward", "Balance carried forward", opening or closing balance) are NOT transactions.
6. One physical row is one transaction. Never merge rows.

Dates are output as YYYY-MM-DD. Amounts are plain numbers without currency
symbols or thousands separators.

OUTPUT FORMAT:
A single JSON object: {"transactions": [ ... ]}
"#;

/// Build the extraction prompt for one statement.
pub fn build_extraction_prompt(raw_text: &str, source: ExtractionMode, fallback_year: i32) -> String {
    let source_note = match source {
        ExtractionMode::ImageBased => {
            "NOTE: This text was produced by optical recognition of a scanned page. \
             It may contain misreads (e.g. O for 0, l for 1). Correct obvious digit \
             misreads in amounts and dates only.\n"
        }
        ExtractionMode::TextNative => "",
    };

    format!(
        r#"{source_note}
<statement>
{raw_text}
</statement>

Extract every transaction from the above statement.
If a date has no year, use the year printed on the statement, otherwise {fallback_year}.

{{"transactions": [{{"date": "YYYY-MM-DD", "description": "text", "debit": 0.00, "credit": 0.00, "balance": 0.00}}]}}
"#
    )
}

/// JSON schema passed as Ollama's `format` constraint.
pub fn response_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "transactions": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "date": { "type": "string" },
                        "description": { "type": "string" },
                        "debit": { "type": "number", "minimum": 0 },
                        "credit": { "type": "number", "minimum": 0 },
                        "balance": { "type": ["number", "null"] }
                    },
                    "required": ["date", "description", "balance"]
                }
            }
        },
        "required": ["transactions"]
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_contains_statement_text() {
        let prompt = build_extraction_prompt("3 Feb Coffee 3.20", ExtractionMode::TextNative, 2024);
        assert!(prompt.contains("<statement>\n3 Feb Coffee 3.20\n</statement>"));
        assert!(prompt.contains("otherwise 2024"));
    }

    #[test]
    fn ocr_source_adds_misread_note() {
        let prompt = build_extraction_prompt("text", ExtractionMode::ImageBased, 2024);
        assert!(prompt.contains("misreads"));
    }

    #[test]
    fn text_source_has_no_misread_note() {
        let prompt = build_extraction_prompt("text", ExtractionMode::TextNative, 2024);
        assert!(!prompt.contains("misreads"));
    }

    #[test]
    fn system_prompt_lists_all_rules() {
        for n in 1..=6 {
            assert!(
                EXTRACTION_SYSTEM_PROMPT.contains(&format!("{n}. ")),
                "rule {n} missing"
            );
        }
        assert!(EXTRACTION_SYSTEM_PROMPT.contains("brought forward"));
        assert!(EXTRACTION_SYSTEM_PROMPT.contains("NEVER output 0"));
    }

    #[test]
    fn schema_forbids_negative_movements() {
        let items = &response_schema()["properties"]["transactions"]["items"]["properties"];
        assert_eq!(items["debit"]["minimum"], 0);
        assert_eq!(items["credit"]["minimum"], 0);
        assert!(items["balance"].get("minimum").is_none());
    }

    #[test]
    fn schema_requires_balance_but_not_movements() {
        let schema = response_schema();
        let required = schema["properties"]["transactions"]["items"]["required"]
            .as_array()
            .unwrap();
        let names: Vec<&str> = required.iter().filter_map(|v| v.as_str()).collect();
        assert_eq!(names, ["date", "description", "balance"]);
    }
}
