//! Utilities. OBVIOUSLY.

use chrono::{DateTime, Utc};
use serde_derive::{Deserialize, Serialize};
use std::ops::Deref;
use std::str::FromStr;

pub mod ser;
#[cfg(test)]
pub(crate) mod test;

/// A library-local representation of a time.
///
/// Wrapping the underlying datetime means serialization decisions live in one
/// place, and anywhere that takes a `Timestamp` also accepts any value with a
/// `From/Into` conversion, which we implement for
/// [DateTime<Utc>](chrono::DateTime). The underlying value is a deref away.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Create a new Timestamp from the current date/time.
    pub fn now() -> Self {
        Self(Utc::now())
    }
}

impl Deref for Timestamp {
    type Target = DateTime<Utc>;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(date: DateTime<Utc>) -> Self {
        Self(date)
    }
}

impl FromStr for Timestamp {
    type Err = chrono::format::ParseError;
    fn from_str(s: &str) -> std::result::Result<Timestamp, Self::Err> {
        let datetime: DateTime<Utc> = s.parse()?;
        Ok(Timestamp(datetime))
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_parse_order() {
        let t1 = Timestamp::from_str("2024-01-01T00:00:00Z").unwrap();
        let t2 = Timestamp::from_str("2024-06-01T00:00:00Z").unwrap();
        assert!(t1 < t2);
        assert_eq!(t1, t1.clone());
    }
}
