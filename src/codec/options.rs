//! Command-line style codec option strings.

use std::fmt;

use crate::{ErrorCode, MediaError};

/// Ordered `key → value` option set parsed from a string such as
/// `"-f flv -c:v libx264 -preset veryfast"`.
///
/// Setting an existing key replaces its value in place, so later duplicates
/// in a parsed string override earlier ones without changing the order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CodecOptions {
    entries: Vec<(String, String)>,
}

impl CodecOptions {
    /// Creates an empty option set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses whitespace-separated `key value` pairs.
    ///
    /// # Errors
    ///
    /// [`ErrorCode::InvalidArgument`] if a key has no value.
    pub fn parse(input: &str) -> Result<Self, MediaError> {
        let mut options = Self::new();
        let mut tokens = input.split_whitespace();
        while let Some(key) = tokens.next() {
            let Some(value) = tokens.next() else {
                return Err(MediaError::new(
                    ErrorCode::InvalidArgument,
                    format!("option {key} has no value"),
                ));
            };
            options.set(key, value);
        }
        Ok(options)
    }

    /// Inserts or replaces a value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    /// Looks up a value.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Whether `key` is set.
    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Parses a value as an integer.
    ///
    /// # Errors
    ///
    /// [`ErrorCode::InvalidArgument`] if the value is not a number.
    pub fn get_i64(&self, key: &str) -> Result<Option<i64>, MediaError> {
        self.get(key)
            .map(|raw| {
                raw.parse::<i64>().map_err(|_| {
                    MediaError::new(
                        ErrorCode::InvalidArgument,
                        format!("option {key} expects a number, got {raw:?}"),
                    )
                })
            })
            .transpose()
    }

    /// Pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of pairs.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no option is set.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns every entry whose key is not in `consumed`, with a leading
    /// `-` stripped from the key.
    pub fn forwarded(&self, consumed: &[&str]) -> Self {
        let mut out = Self::new();
        for (key, value) in self.iter() {
            if consumed.contains(&key) {
                continue;
            }
            out.set(key.strip_prefix('-').unwrap_or(key), value);
        }
        out
    }
}

impl fmt::Display for CodecOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (key, value)) in self.entries.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{key} {value}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pairs() {
        let options = CodecOptions::parse("  -f flv\t-c:v   libx264 -g 50 ").unwrap();
        assert_eq!(options.len(), 3);
        assert_eq!(options.get("-f"), Some("flv"));
        assert_eq!(options.get("-c:v"), Some("libx264"));
        assert_eq!(options.get_i64("-g").unwrap(), Some(50));
        assert_eq!(options.get("-b:v"), None);
    }

    #[test]
    fn test_parse_empty() {
        assert!(CodecOptions::parse("").unwrap().is_empty());
        assert!(CodecOptions::parse("   ").unwrap().is_empty());
    }

    #[test]
    fn test_dangling_key_rejected() {
        let err = CodecOptions::parse("-f flv -g").unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidArgument);
    }

    #[test]
    fn test_later_duplicate_overrides() {
        let options = CodecOptions::parse("-preset slow -tune film -preset fast").unwrap();
        assert_eq!(options.get("-preset"), Some("fast"));
        assert_eq!(options.to_string(), "-preset fast -tune film");
    }

    #[test]
    fn test_non_numeric_value() {
        let options = CodecOptions::parse("-g many").unwrap();
        assert_eq!(
            options.get_i64("-g").unwrap_err().code,
            ErrorCode::InvalidArgument
        );
    }

    #[test]
    fn test_forwarded_strips_dash_and_skips_consumed() {
        let options = CodecOptions::parse("-f flv -preset veryfast -crf 23 level 42").unwrap();
        let forwarded = options.forwarded(&["-f"]);
        let pairs: Vec<_> = forwarded.iter().collect();
        assert_eq!(
            pairs,
            vec![("preset", "veryfast"), ("crf", "23"), ("level", "42")]
        );
    }
}
