//! Sort key extraction.
//!
//! A [`KeyExtractor`] turns a raw line into a comparable key. The key is computed once, when the line enters a
//! buffer, and travels with the line until it is written out. Any `Fn(&str) -> Result<K, KeyError>` closure is an
//! extractor as well, so custom keys don't need a dedicated type.

use std::error::Error;
use std::fmt::{self, Display};
use std::num::ParseIntError;

/// Key extraction error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    /// The line is not a valid integer.
    InvalidInteger { line: String, reason: ParseIntError },
    /// The line has fewer tab-separated fields than required.
    MissingField { line: String, field: usize },
    /// Extractor specific failure.
    Custom(String),
}

impl Error for KeyError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self {
            KeyError::InvalidInteger { reason, .. } => Some(reason),
            _ => None,
        }
    }
}

impl Display for KeyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            KeyError::InvalidInteger { line, reason } => write!(f, "line {:?} is not an integer: {}", line, reason),
            KeyError::MissingField { line, field } => write!(f, "line {:?} has no field #{}", line, field),
            KeyError::Custom(reason) => write!(f, "{}", reason),
        }
    }
}

/// Key extractor interface.
pub trait KeyExtractor: Send + Sync {
    /// Extracted key type. Records are ordered by it, ties are allowed.
    type Key: Ord + Send;

    /// Derives a key from a raw line.
    fn extract(&self, line: &str) -> Result<Self::Key, KeyError>;
}

impl<K, F> KeyExtractor for F
where
    K: Ord + Send,
    F: Fn(&str) -> Result<K, KeyError> + Send + Sync,
{
    type Key = K;

    fn extract(&self, line: &str) -> Result<K, KeyError> {
        self(line)
    }
}

/// Uses the whole line as a signed integer.
#[derive(Debug, Clone, Copy, Default)]
pub struct IntKey;

impl KeyExtractor for IntKey {
    type Key = i64;

    fn extract(&self, line: &str) -> Result<i64, KeyError> {
        line.parse::<i64>().map_err(|reason| KeyError::InvalidInteger {
            line: line.to_owned(),
            reason,
        })
    }
}

/// Uses the n-th (zero based) tab-separated field of a line, compared as a string.
#[derive(Debug, Clone, Copy, Default)]
pub struct TsvKey {
    field: usize,
}

impl TsvKey {
    pub fn new(field: usize) -> Self {
        TsvKey { field }
    }

    pub fn field(&self) -> usize {
        self.field
    }
}

impl KeyExtractor for TsvKey {
    type Key = String;

    fn extract(&self, line: &str) -> Result<String, KeyError> {
        match line.split('\t').nth(self.field) {
            Some(value) => Ok(value.to_owned()),
            None => Err(KeyError::MissingField {
                line: line.to_owned(),
                field: self.field,
            }),
        }
    }
}

#[cfg(test)]
mod test {
    use rstest::*;

    use super::{IntKey, KeyError, KeyExtractor, TsvKey};

    #[rstest]
    #[case("42", 42)]
    #[case("-7", -7)]
    #[case("+3", 3)]
    fn test_int_key(#[case] line: &str, #[case] expected: i64) {
        assert_eq!(IntKey.extract(line).unwrap(), expected);
    }

    #[rstest]
    #[case("")]
    #[case("4 2")]
    #[case("abc")]
    fn test_int_key_error(#[case] line: &str) {
        match IntKey.extract(line) {
            Err(KeyError::InvalidInteger { line: actual, .. }) => assert_eq!(actual, line),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[rstest]
    #[case(0, "3\tD\tequipment", "3")]
    #[case(1, "3\tD\tequipment", "D")]
    #[case(2, "3\tD\tequipment", "equipment")]
    #[case(1, "3\t\tequipment", "")]
    fn test_tsv_key(#[case] field: usize, #[case] line: &str, #[case] expected: &str) {
        assert_eq!(TsvKey::new(field).extract(line).unwrap(), expected);
    }

    #[test]
    fn test_tsv_key_missing_field() {
        let err = TsvKey::new(3).extract("a\tb").unwrap_err();
        assert_eq!(
            err,
            KeyError::MissingField {
                line: "a\tb".to_owned(),
                field: 3
            }
        );
        assert_eq!(err.to_string(), "line \"a\\tb\" has no field #3");
    }

    #[test]
    fn test_closure_extractor() {
        let by_length = |line: &str| -> Result<usize, KeyError> { Ok(line.len()) };
        assert_eq!(by_length.extract("four").unwrap(), 4);
    }
}
