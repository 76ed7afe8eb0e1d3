use serde::{Serialize, Deserialize};

/// Internal document identifier, monotonically assigned, unique per collection.
pub type SeqId = u32;

/// Reserved sentinel: never a valid seq_id. Marks reference helpers that an
/// async reference has not resolved yet.
pub const UNRESOLVED_SEQ_ID: SeqId = u32::MAX;

/// Scale factor applied to float values before they are keyed into the
/// numeric index.
const FLOAT_KEY_SCALE: f64 = 10_000_000.0;

/// Converts a float field value into its i64 numeric-index key.
pub fn float_to_key(value: f64) -> i64 {
    (value * FLOAT_KEY_SCALE).round() as i64
}

/// Typed per-field value produced by document validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    Str(String),
    Int32(i32),
    Int64(i64),
    Float(f64),
    Bool(bool),
    /// [lat, lng]
    Geopoint(f64, f64),
}

impl FieldValue {
    /// Numeric-index key for this value, if it has one.
    pub fn numeric_key(&self) -> Option<i64> {
        match self {
            FieldValue::Int32(v) => Some(*v as i64),
            FieldValue::Int64(v) => Some(*v),
            FieldValue::Float(v) => Some(float_to_key(*v)),
            FieldValue::Bool(v) => Some(*v as i64),
            FieldValue::Str(_) | FieldValue::Geopoint(..) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_float_key_rounds_to_nearest() {
        assert_eq!(float_to_key(1.0), 10_000_000);
        assert_eq!(float_to_key(0.15), 1_500_000);
        assert_eq!(float_to_key(-2.5), -25_000_000);
    }

    #[test]
    fn test_numeric_keys() {
        assert_eq!(FieldValue::Int32(7).numeric_key(), Some(7));
        assert_eq!(FieldValue::Bool(true).numeric_key(), Some(1));
        assert_eq!(FieldValue::Str("x".to_string()).numeric_key(), None);
    }
}
