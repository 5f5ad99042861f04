//! Cell values as produced by the spreadsheet decoder, and their coercion
//! into column values.
//!
//! Coercion is a persistence concern: the value resolver passes scalars
//! through untouched (apart from trimming text) and stores call [`coerce`]
//! when they write a record.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::schema::ScalarType;

/// Format used when a date-time cell has to be rendered as text.
pub const DATETIME_TEXT_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// One raw spreadsheet cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    Empty,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    DateTime(NaiveDateTime),
}

impl CellValue {
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }

    /// `Empty`, or text that is only whitespace.
    pub fn is_blank(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    /// Trim surrounding whitespace from text; other values are unchanged.
    pub fn trimmed(self) -> Self {
        match self {
            Self::Text(s) => {
                let t = s.trim();
                if t.len() == s.len() {
                    Self::Text(s)
                } else {
                    Self::Text(t.to_string())
                }
            }
            other => other,
        }
    }

    /// Render the cell as a natural-key string. Returns `None` for blank cells.
    ///
    /// Integral floats render without a fractional part (`5.0` -> `"5"`),
    /// matching how a spreadsheet displays them.
    pub fn key_text(&self) -> Option<String> {
        match self {
            Self::Empty => None,
            Self::Text(s) => {
                let t = s.trim();
                (!t.is_empty()).then(|| t.to_string())
            }
            Self::Integer(i) => Some(i.to_string()),
            Self::Float(f) => Some(render_float(*f)),
            Self::Bool(b) => Some(b.to_string()),
            Self::DateTime(dt) => Some(dt.format(DATETIME_TEXT_FORMAT).to_string()),
        }
    }
}

impl std::fmt::Display for CellValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => Ok(()),
            Self::Text(s) => f.write_str(s),
            other => f.write_str(&other.key_text().unwrap_or_default()),
        }
    }
}

fn render_float(f: f64) -> String {
    if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e15 {
        format!("{}", f as i64)
    } else {
        format!("{f}")
    }
}

/// A value ready to be written to a column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum TypedValue {
    Null,
    Text(String),
    Integer(i64),
    /// Canonical decimal text with exactly `scale` fractional digits.
    Decimal(String),
    Boolean(bool),
}

impl TypedValue {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

/// Convert a cell into a column value of the given type.
///
/// Blank cells become `Null` for every type except text, where a
/// whitespace-only string stays an empty string.
pub fn coerce(ty: &ScalarType, value: &CellValue) -> Result<TypedValue, String> {
    if matches!(value, CellValue::Empty) {
        return Ok(TypedValue::Null);
    }
    match ty {
        ScalarType::Text { max_length } => {
            let text = match value {
                CellValue::Text(s) => s.clone(),
                other => other.key_text().unwrap_or_default(),
            };
            if let Some(max) = max_length {
                let len = text.chars().count();
                if len > *max {
                    return Err(format!(
                        "ensure this value has at most {max} characters (it has {len})"
                    ));
                }
            }
            Ok(TypedValue::Text(text))
        }
        _ if value.is_blank() => Ok(TypedValue::Null),
        ScalarType::Integer => coerce_integer(value).map(TypedValue::Integer),
        ScalarType::Decimal { precision, scale } => {
            let text = match value {
                CellValue::Text(s) => s.trim().to_string(),
                CellValue::Integer(i) => i.to_string(),
                CellValue::Float(f) if f.is_finite() => format!("{f:.prec$}", prec = *scale as usize),
                other => return Err(format!("'{other}' is not a valid decimal")),
            };
            parse_decimal(&text, *precision, *scale).map(TypedValue::Decimal)
        }
        ScalarType::Boolean => coerce_boolean(value).map(TypedValue::Boolean),
    }
}

fn coerce_integer(value: &CellValue) -> Result<i64, String> {
    match value {
        CellValue::Integer(i) => Ok(*i),
        CellValue::Float(f) if f.is_finite() && f.fract() == 0.0 && f.abs() < 9.0e15 => {
            Ok(*f as i64)
        }
        CellValue::Text(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| format!("'{}' is not a valid integer", s.trim())),
        other => Err(format!("'{other}' is not a valid integer")),
    }
}

fn coerce_boolean(value: &CellValue) -> Result<bool, String> {
    match value {
        CellValue::Bool(b) => Ok(*b),
        CellValue::Integer(0) => Ok(false),
        CellValue::Integer(1) => Ok(true),
        CellValue::Text(s) => match s.trim().to_lowercase().as_str() {
            "true" | "yes" | "y" | "1" => Ok(true),
            "false" | "no" | "n" | "0" => Ok(false),
            _ => Err(format!("'{}' is not a valid boolean", s.trim())),
        },
        other => Err(format!("'{other}' is not a valid boolean")),
    }
}

/// Validate decimal text against `NUMERIC(precision, scale)` and return it
/// in canonical form (no leading zeros, exactly `scale` fractional digits).
pub fn parse_decimal(raw: &str, precision: u32, scale: u32) -> Result<String, String> {
    let invalid = || format!("'{raw}' is not a valid decimal");
    let s = raw.trim();
    let (negative, unsigned) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s.strip_prefix('+').unwrap_or(s)),
    };
    let (int_part, frac_part) = unsigned.split_once('.').unwrap_or((unsigned, ""));
    if int_part.is_empty() && frac_part.is_empty() {
        return Err(invalid());
    }
    if !int_part.bytes().all(|b| b.is_ascii_digit()) || !frac_part.bytes().all(|b| b.is_ascii_digit())
    {
        return Err(invalid());
    }

    let scale = scale as usize;
    if frac_part.len() > scale {
        return Err(format!(
            "ensure that there are no more than {scale} decimal places"
        ));
    }
    let int_digits = int_part.trim_start_matches('0');
    let max_int_digits = (precision as usize).saturating_sub(scale);
    if int_digits.len() > max_int_digits {
        return Err(format!(
            "ensure that there are no more than {max_int_digits} digits before the decimal point"
        ));
    }

    let is_zero = int_digits.is_empty() && frac_part.bytes().all(|b| b == b'0');
    let mut out = String::with_capacity(int_digits.len() + scale + 2);
    if negative && !is_zero {
        out.push('-');
    }
    out.push_str(if int_digits.is_empty() { "0" } else { int_digits });
    if scale > 0 {
        out.push('.');
        out.push_str(frac_part);
        out.extend(std::iter::repeat('0').take(scale - frac_part.len()));
    }
    Ok(out)
}
