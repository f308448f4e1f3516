//! Response parsing and validation.
//!
//! Turns the provider's raw answer into [`ExtractionRecord`]s. The payload
//! must be the pinned contract object (see [`crate::tracker::extraction::prompt`]); anything that does
//! not decode as such is rejected as a whole. Individual entries are
//! validated independently: a bad entry is skipped and counted, never fatal.

use super::domain::ExtractionRecord;
use super::extraction::prompt::{CATEGORY_FIELD, DATA_KEY, NAME_FIELD, PRICE_FIELD};
use serde_json::{Map, Value};

/// Errors for payloads that cannot be used at all.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    /// Not JSON.
    #[error("response is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    /// JSON, but not `{"data": [...]}`.
    #[error("response is not an object with a `data` array")]
    MissingData,
}

/// Records accepted from one payload, plus what was skipped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParseOutcome {
    pub records: Vec<ExtractionRecord>,
    /// Entries without a usable name (or not objects at all).
    pub skipped_missing_name: usize,
    /// Entries with a name but no usable price.
    pub skipped_bad_price: usize,
}

impl ParseOutcome {
    pub fn skipped(&self) -> usize {
        self.skipped_missing_name + self.skipped_bad_price
    }
}

/// Parse a raw provider response.
pub fn parse(raw: &str) -> Result<ParseOutcome, ParseError> {
    let value: Value = serde_json::from_str(raw)?;
    let entries = value
        .get(DATA_KEY)
        .and_then(Value::as_array)
        .ok_or(ParseError::MissingData)?;

    let mut outcome = ParseOutcome::default();
    for entry in entries {
        let Some(name) = entry
            .get(NAME_FIELD)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|n| !n.is_empty())
        else {
            outcome.skipped_missing_name += 1;
            continue;
        };

        let Some(price) = entry.get(PRICE_FIELD).and_then(normalize_price) else {
            tracing::debug!(name, price = ?entry.get(PRICE_FIELD), "Skipping entry with unusable price");
            outcome.skipped_bad_price += 1;
            continue;
        };

        let category = entry
            .get(CATEGORY_FIELD)
            .and_then(Value::as_str)
            .map(str::trim)
            .unwrap_or_default();

        outcome
            .records
            .push(ExtractionRecord::new(name, category, price));
    }

    Ok(outcome)
}

/// Render records in the pinned contract.
pub fn serialize_records(records: &[ExtractionRecord]) -> String {
    let data: Vec<Value> = records
        .iter()
        .map(|r| {
            let mut entry = Map::new();
            entry.insert(NAME_FIELD.to_string(), Value::from(r.name.as_str()));
            entry.insert(CATEGORY_FIELD.to_string(), Value::from(r.category.as_str()));
            entry.insert(PRICE_FIELD.to_string(), Value::from(r.price));
            Value::Object(entry)
        })
        .collect();

    let mut root = Map::new();
    root.insert(DATA_KEY.to_string(), Value::Array(data));
    Value::Object(root).to_string()
}

/// Coerce a JSON price to a non-negative integer.
pub fn normalize_price(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => {
            if let Some(u) = n.as_u64() {
                return i64::try_from(u).ok();
            }
            if n.is_i64() {
                // negative
                return None;
            }
            let f = n.as_f64()?;
            #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
            let integral = (f.is_finite() && f >= 0.0 && f.fract() == 0.0 && f <= i64::MAX as f64)
                .then_some(f as i64);
            integral
        }
        Value::String(s) => normalize_price_text(s),
        _ => None,
    }
}

/// Strip currency symbols, markers and grouping separators from a price.
///
/// Leading and trailing non-digit runs are dropped. Between the first and
/// last digit only grouping separators may appear. A minus sign directly in
/// front of the first digit makes the price unusable.
pub fn normalize_price_text(raw: &str) -> Option<i64> {
    let start = raw.find(|c: char| c.is_ascii_digit())?;
    let end = raw.rfind(|c: char| c.is_ascii_digit())? + 1;
    if raw[..start].ends_with('-') {
        return None;
    }

    let mut value: i64 = 0;
    for c in raw[start..end].chars() {
        match c {
            '0'..='9' => {
                let digit = i64::from(c.to_digit(10)?);
                value = value.checked_mul(10)?.checked_add(digit)?;
            }
            ',' | '.' | ' ' | '\'' | '\u{a0}' | '\u{202f}' => {}
            _ => return None,
        }
    }
    Some(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashSet;

    #[test]
    fn test_price_normalization() {
        assert_eq!(normalize_price_text("700361"), Some(700_361));
        assert_eq!(normalize_price_text("700361€"), Some(700_361));
        assert_eq!(normalize_price_text("700,361 *"), Some(700_361));
        assert_eq!(normalize_price_text("  270 € "), Some(270));
        assert_eq!(normalize_price_text("1\u{202f}234 K"), Some(1234));
    }

    #[test]
    fn test_unusable_prices() {
        assert_eq!(normalize_price_text("abc"), None);
        assert_eq!(normalize_price_text(""), None);
        assert_eq!(normalize_price_text("-12"), None);
        assert_eq!(normalize_price_text("12x34"), None);
        assert_eq!(normalize_price_text("99999999999999999999"), None);
    }

    #[test]
    fn test_numeric_prices() {
        assert_eq!(normalize_price(&json!(270)), Some(270));
        assert_eq!(normalize_price(&json!(270.0)), Some(270));
        assert_eq!(normalize_price(&json!(-5)), None);
        assert_eq!(normalize_price(&json!(2.5)), None);
        assert_eq!(normalize_price(&json!(null)), None);
        assert_eq!(normalize_price(&json!(true)), None);
    }

    #[test]
    fn test_parses_contract() {
        let raw = r#"{"data": [
            {"Nom": "Aluminite", "Catégorie": "Alliage", "Prix": "270€"},
            {"Nom": " Pyrite ", "Catégorie": "Alliage", "Prix": 14862}
        ]}"#;
        let outcome = parse(raw).unwrap();
        assert_eq!(
            outcome.records,
            vec![
                ExtractionRecord::new("Aluminite", "Alliage", 270),
                ExtractionRecord::new("Pyrite", "Alliage", 14862),
            ]
        );
        assert_eq!(outcome.skipped(), 0);
    }

    #[test]
    fn test_bad_entries_are_skipped_not_fatal() {
        let raw = r#"{"data": [
            {"Nom": "Kobalite", "Catégorie": "Alliage", "Prix": "abc"},
            {"Nom": "", "Catégorie": "Alliage", "Prix": 10},
            {"Catégorie": "Alliage", "Prix": 10},
            "not an object",
            {"Nom": "Rutile", "Prix": "10493"}
        ]}"#;
        let outcome = parse(raw).unwrap();
        assert_eq!(outcome.records, vec![ExtractionRecord::new("Rutile", "", 10493)]);
        assert_eq!(outcome.skipped_bad_price, 1);
        assert_eq!(outcome.skipped_missing_name, 3);
    }

    #[test]
    fn test_non_string_category_is_empty() {
        let outcome = parse(r#"{"data": [{"Nom": "Ébonite", "Catégorie": 3, "Prix": 2459}]}"#).unwrap();
        assert_eq!(outcome.records[0].category, "");
    }

    #[test]
    fn test_invalid_json_is_malformed() {
        assert!(matches!(parse("Voici les prix :"), Err(ParseError::InvalidJson(_))));
        assert!(matches!(parse(r#"{"data": [{"Nom": "x""#), Err(ParseError::InvalidJson(_))));
    }

    #[test]
    fn test_bare_array_is_malformed() {
        let raw = r#"[{"Nom": "Aluminite", "Catégorie": "Alliage", "Prix": 270}]"#;
        assert!(matches!(parse(raw), Err(ParseError::MissingData)));
    }

    #[test]
    fn test_data_must_be_an_array() {
        assert!(matches!(parse(r#"{"data": {}}"#), Err(ParseError::MissingData)));
    }

    #[test]
    fn test_serialized_records_parse_back() {
        let records = vec![
            ExtractionRecord::new("Alliage Ivre", "Alliage", 700_361),
            ExtractionRecord::new("Plaque d'acier", "Alliage", 14524),
            ExtractionRecord::new("Bakélélite", "", 0),
        ];
        let outcome = parse(&serialize_records(&records)).unwrap();

        let expected: HashSet<_> = records.into_iter().collect();
        let actual: HashSet<_> = outcome.records.into_iter().collect();
        assert_eq!(actual, expected);
    }
}
