use crate::errors::{Error, Result};
use crate::metrics::UNKNOWN_DATA_TYPE_TOTAL;
use crate::model::{RawValue, TypedValue, ValueSlots};
use tracing::warn;

/// Coerces a reported value into the slot declared by `data_type`.
///
/// INT truncates toward zero (7.9 becomes 7, -7.9 becomes -7). BOOL follows
/// truthy coercion: nonzero numbers and non-empty strings are true, so the
/// string "false" is true. An unknown data type is downgraded to a warning
/// and the value is kept verbatim in the string slot.
pub fn encode(raw: &RawValue, data_type: &str) -> Result<TypedValue> {
    match data_type {
        "INT" => {
            let n = as_f64(raw)?.trunc();
            // i64::MAX as f64 rounds up to 2^63, so the upper bound is exclusive.
            if n < i64::MIN as f64 || n >= i64::MAX as f64 {
                return Err(Error::Validation(format!(
                    "Value {} out of integer range",
                    n
                )));
            }
            Ok(TypedValue::Long(n as i64))
        }
        "DOUBLE" => Ok(TypedValue::Double(as_f64(raw)?)),
        "BOOL" => Ok(TypedValue::Bool(truthy(raw))),
        "STRING" => Ok(TypedValue::Text(stringify(raw))),
        other => {
            warn!("Unknown data type '{}', storing value as string", other);
            UNKNOWN_DATA_TYPE_TOTAL.inc();
            Ok(TypedValue::Text(stringify(raw)))
        }
    }
}

/// Picks the populated slot, checking boolean, double, long, string in that
/// order. Returns None when every slot is null, which indicates a corrupt row.
pub fn decode(slots: &ValueSlots) -> Option<TypedValue> {
    if let Some(b) = slots.bool_value {
        return Some(TypedValue::Bool(b));
    }
    if let Some(d) = slots.double_value {
        return Some(TypedValue::Double(d));
    }
    if let Some(n) = slots.long_value {
        return Some(TypedValue::Long(n));
    }
    if let Some(s) = &slots.string_value {
        return Some(TypedValue::Text(s.clone()));
    }
    None
}

fn as_f64(raw: &RawValue) -> Result<f64> {
    let n = match raw {
        RawValue::Int(n) => *n as f64,
        RawValue::Float(f) => *f,
        RawValue::Bool(b) => {
            if *b {
                1.0
            } else {
                0.0
            }
        }
        RawValue::Text(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| Error::Validation(format!("Value '{}' is not numeric", s)))?,
    };

    if !n.is_finite() {
        return Err(Error::Validation(format!("Value {} is not finite", n)));
    }

    Ok(n)
}

fn truthy(raw: &RawValue) -> bool {
    match raw {
        RawValue::Bool(b) => *b,
        RawValue::Int(n) => *n != 0,
        RawValue::Float(f) => *f != 0.0,
        RawValue::Text(s) => !s.is_empty(),
    }
}

fn stringify(raw: &RawValue) -> String {
    match raw {
        RawValue::Text(s) => s.clone(),
        RawValue::Bool(b) => b.to_string(),
        RawValue::Int(n) => n.to_string(),
        RawValue::Float(f) => f.to_string(),
    }
}
