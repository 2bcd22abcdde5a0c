use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One decoded cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Date(NaiveDate),
    Text(String),
}

/// A decoded row keyed by normalized field name.
pub type Record = BTreeMap<String, FieldValue>;

impl FieldValue {
    /// Empty strings count as missing, the way spreadsheet and CSV blanks do.
    #[must_use]
    pub fn text(value: &str) -> Self {
        if value.is_empty() {
            Self::Null
        } else {
            Self::Text(value.to_string())
        }
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        match self {
            Self::Null => true,
            Self::Text(s) => s.trim().is_empty(),
            Self::Float(f) => f.is_nan(),
            _ => false,
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<String> {
        match self {
            Self::Null => None,
            Self::Text(s) => {
                let trimmed = s.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            }
            Self::Int(i) => Some(i.to_string()),
            Self::Float(f) if f.is_nan() => None,
            Self::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => Some(format!("{f:.0}")),
            Self::Float(f) => Some(f.to_string()),
            Self::Bool(b) => Some(b.to_string()),
            Self::Date(d) => Some(d.to_string()),
        }
    }

    /// Integral values only; `48.0` is accepted, `48.5` is not.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            Self::Float(f) if f.is_finite() && f.fract() == 0.0 => Some(*f as i64),
            Self::Bool(b) => Some(i64::from(*b)),
            Self::Text(s) => {
                let trimmed = s.trim();
                trimmed.parse::<i64>().ok().or_else(|| {
                    trimmed
                        .parse::<f64>()
                        .ok()
                        .filter(|f| f.is_finite() && f.fract() == 0.0)
                        .map(|f| f as i64)
                })
            }
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            Self::Int(0) => Some(false),
            Self::Int(1) => Some(true),
            Self::Float(f) if *f == 0.0 => Some(false),
            Self::Float(f) if *f == 1.0 => Some(true),
            Self::Text(s) => match s.trim().to_lowercase().as_str() {
                "1" | "1.0" | "true" | "t" | "yes" | "y" => Some(true),
                "0" | "0.0" | "false" | "f" | "no" | "n" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    #[must_use]
    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Self::Date(d) => Some(*d),
            Self::Text(s) => super::normalizer::parse_date_lenient(s),
            _ => None,
        }
    }
}

impl std::fmt::Display for FieldValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.as_text() {
            Some(text) => f.write_str(&text),
            None => f.write_str("null"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_text_is_null() {
        assert_eq!(FieldValue::text(""), FieldValue::Null);
        assert!(FieldValue::Text("   ".into()).is_null());
        assert!(!FieldValue::Int(0).is_null());
    }

    #[test]
    fn test_int_coercion() {
        assert_eq!(FieldValue::Text("48".into()).as_int(), Some(48));
        assert_eq!(FieldValue::Text("48.0".into()).as_int(), Some(48));
        assert_eq!(FieldValue::Float(48.0).as_int(), Some(48));
        assert_eq!(FieldValue::Float(48.5).as_int(), None);
        assert_eq!(FieldValue::Text("many".into()).as_int(), None);
    }

    #[test]
    fn test_bool_coercion() {
        assert_eq!(FieldValue::Int(1).as_bool(), Some(true));
        assert_eq!(FieldValue::Text("No".into()).as_bool(), Some(false));
        assert_eq!(FieldValue::Float(1.0).as_bool(), Some(true));
        assert_eq!(FieldValue::Int(2).as_bool(), None);
    }

    #[test]
    fn test_numeric_identity_as_text() {
        assert_eq!(FieldValue::Float(1001.0).as_text().as_deref(), Some("1001"));
        assert_eq!(FieldValue::Int(7).as_text().as_deref(), Some("7"));
        assert_eq!(FieldValue::Text("  ORD1 ".into()).as_text().as_deref(), Some("ORD1"));
    }

    #[test]
    fn test_serializes_untagged() {
        let json = serde_json::to_string(&vec![
            FieldValue::Null,
            FieldValue::Int(3),
            FieldValue::Text("a".into()),
        ])
        .unwrap();
        assert_eq!(json, r#"[null,3,"a"]"#);
    }
}
