//! Value codec.
//!
//! Converts a variable or parameter value from the catalog's textual form into
//! the literal written into a target statement, validated against its declared
//! type. Every literal also knows the SQL host type it is declared with in the
//! target batch (`DECLARE @var <sql_type> = <literal>`).

use std::fmt;

use chrono::{NaiveDate, NaiveDateTime};
use ferry_catalog::DeclaredType;
use zeroize::Zeroizing;

use crate::error::CodecError;

/// Text substituted for a sensitive literal when output is masked.
pub const REDACTED: &str = "N'********'";

const DATETIME_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
];

/// Integer and fraction digits held by `decimal(38,18)`.
const DECIMAL_INTEGER_DIGITS: usize = 20;
const DECIMAL_FRACTION_DIGITS: usize = 18;

/// Quote a value as a wide-string literal, doubling embedded quotes.
///
/// Used for every name, description and folder as well as string values.
pub fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 3);
    out.push_str("N'");
    for c in value.chars() {
        if c == '\'' {
            out.push('\'');
        }
        out.push(c);
    }
    out.push('\'');
    out
}

/// Reverse of [`quote`]. `None` if `literal` is not a well-formed wide-string literal.
pub fn unquote(literal: &str) -> Option<String> {
    let inner = literal.strip_prefix("N'")?.strip_suffix('\'')?;
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\'' && chars.next() != Some('\'') {
            return None;
        }
        out.push(c);
    }
    Some(out)
}

/// SQL host type a declared type is bound with in the target batch.
pub fn sql_type(data_type: DeclaredType) -> &'static str {
    match data_type {
        DeclaredType::String => "sql_variant",
        DeclaredType::Boolean => "bit",
        DeclaredType::Byte => "tinyint",
        DeclaredType::SByte => "smallint",
        DeclaredType::Int16 => "smallint",
        DeclaredType::Int32 => "int",
        DeclaredType::Int64 => "bigint",
        DeclaredType::UInt32 => "bigint",
        DeclaredType::UInt64 => "decimal(20,0)",
        DeclaredType::Single => "real",
        DeclaredType::Double => "float",
        DeclaredType::Decimal => "decimal(38,18)",
        DeclaredType::DateTime => "datetime2",
    }
}

/// A validated target literal.
///
/// The text is wiped on drop since it may hold a decrypted sensitive value.
#[derive(Clone, PartialEq, Eq)]
pub struct Literal {
    data_type: DeclaredType,
    text: Zeroizing<String>,
}

impl Literal {
    pub fn data_type(&self) -> DeclaredType {
        self.data_type
    }

    pub fn sql_type(&self) -> &'static str {
        sql_type(self.data_type)
    }

    /// Literal text as written into the statement.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Literal text, or [`REDACTED`] when `mask` is set.
    pub fn display(&self, mask: bool) -> &str {
        if mask { REDACTED } else { &self.text }
    }
}

impl fmt::Debug for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Literal")
            .field("data_type", &self.data_type)
            .field("text", &"..")
            .finish()
    }
}

fn integer<T>(value: &str, data_type: DeclaredType) -> Result<String, CodecError>
where
    T: std::str::FromStr + ToString,
{
    value
        .parse::<T>()
        .map(|n| n.to_string())
        .map_err(|_| invalid_number(value, data_type))
}

fn float(value: &str, data_type: DeclaredType, limit: f64) -> Result<String, CodecError> {
    match value.parse::<f64>() {
        Ok(n) if n.is_finite() && n.abs() <= limit => Ok(value.to_string()),
        _ => Err(invalid_number(value, data_type)),
    }
}

/// Plain decimal text that fits `decimal(38,18)` without rounding. Leading
/// integer zeros and trailing fraction zeros do not count against the scale.
fn decimal(value: &str, data_type: DeclaredType) -> Result<String, CodecError> {
    let unsigned = value.strip_prefix(['+', '-']).unwrap_or(value);
    let (integer, fraction) = unsigned.split_once('.').unwrap_or((unsigned, ""));
    let digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    let fits = digits(integer)
        && digits(fraction)
        && !(integer.is_empty() && fraction.is_empty())
        && integer.trim_start_matches('0').len() <= DECIMAL_INTEGER_DIGITS
        && fraction.trim_end_matches('0').len() <= DECIMAL_FRACTION_DIGITS;
    if fits {
        Ok(value.to_string())
    } else {
        Err(invalid_number(value, data_type))
    }
}

fn invalid_number(value: &str, data_type: DeclaredType) -> CodecError {
    CodecError::InvalidNumber {
        value: value.to_string(),
        data_type: data_type.to_string(),
    }
}

fn datetime(value: &str) -> Result<String, CodecError> {
    let valid = DATETIME_FORMATS
        .iter()
        .any(|fmt| NaiveDateTime::parse_from_str(value, fmt).is_ok())
        || NaiveDate::parse_from_str(value, "%Y-%m-%d").is_ok();
    if valid {
        Ok(quote(value))
    } else {
        Err(CodecError::InvalidDateTime {
            value: value.to_string(),
        })
    }
}

/// Encode a catalog textual value as a literal of `data_type`.
///
/// Strings are quoted verbatim. Other values are trimmed and validated;
/// nothing is coerced.
pub fn encode(value: &str, data_type: DeclaredType) -> Result<Literal, CodecError> {
    let trimmed = value.trim();
    let text = match data_type {
        DeclaredType::String => quote(value),
        DeclaredType::Boolean => {
            if trimmed.eq_ignore_ascii_case("true") || trimmed == "1" {
                "1".to_string()
            } else if trimmed.eq_ignore_ascii_case("false") || trimmed == "0" {
                "0".to_string()
            } else {
                return Err(CodecError::InvalidBoolean {
                    value: value.to_string(),
                });
            }
        }
        DeclaredType::Byte => integer::<u8>(trimmed, data_type)?,
        DeclaredType::SByte => integer::<i8>(trimmed, data_type)?,
        DeclaredType::Int16 => integer::<i16>(trimmed, data_type)?,
        DeclaredType::Int32 => integer::<i32>(trimmed, data_type)?,
        DeclaredType::Int64 => integer::<i64>(trimmed, data_type)?,
        DeclaredType::UInt32 => integer::<u32>(trimmed, data_type)?,
        DeclaredType::UInt64 => integer::<u64>(trimmed, data_type)?,
        DeclaredType::Single => float(trimmed, data_type, f64::from(f32::MAX))?,
        DeclaredType::Double => float(trimmed, data_type, f64::INFINITY)?,
        DeclaredType::Decimal => decimal(trimmed, data_type)?,
        DeclaredType::DateTime => datetime(trimmed)?,
    };
    Ok(Literal {
        data_type,
        text: Zeroizing::new(text),
    })
}

/// Logical textual value of a literal. `encode(decode(l), l.data_type()) == l`.
pub fn decode(literal: &Literal) -> Result<String, CodecError> {
    let text = literal.text();
    match literal.data_type {
        DeclaredType::String | DeclaredType::DateTime => {
            unquote(text).ok_or_else(|| CodecError::MalformedLiteral(text.to_string()))
        }
        DeclaredType::Boolean => match text {
            "1" => Ok("True".to_string()),
            "0" => Ok("False".to_string()),
            other => Err(CodecError::MalformedLiteral(other.to_string())),
        },
        _ => Ok(text.to_string()),
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Any string survives quote and decode unchanged.
        #[test]
        fn string_round_trips(s in "\\PC*") {
            let lit = encode(&s, DeclaredType::String).unwrap();
            prop_assert_eq!(decode(&lit).unwrap(), s);
        }

        #[test]
        fn int64_round_trips(n in any::<i64>()) {
            let lit = encode(&n.to_string(), DeclaredType::Int64).unwrap();
            prop_assert_eq!(decode(&lit).unwrap(), n.to_string());
        }

        #[test]
        fn byte_round_trips(n in any::<u8>()) {
            let lit = encode(&n.to_string(), DeclaredType::Byte).unwrap();
            let again = encode(&decode(&lit).unwrap(), DeclaredType::Byte).unwrap();
            prop_assert_eq!(again, lit);
        }

        #[test]
        fn boolean_round_trips(b in any::<bool>()) {
            let text = if b { "True" } else { "False" };
            let lit = encode(text, DeclaredType::Boolean).unwrap();
            prop_assert_eq!(decode(&lit).unwrap(), text);
        }

        #[test]
        fn double_round_trips(x in proptest::num::f64::NORMAL) {
            let lit = encode(&x.to_string(), DeclaredType::Double).unwrap();
            prop_assert_eq!(decode(&lit).unwrap().parse::<f64>().unwrap(), x);
        }
    }
}
