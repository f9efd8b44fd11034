//! Severity routing keys and topic pattern matching.

use std::fmt;
use std::str::FromStr;

use super::BusError;

/// Name of the shared topic exchange.
pub const EXCHANGE_NAME: &str = "logs_topic";

/// Severity of a log event, rendered as a `log.<SEVERITY>` routing key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Severity {
    pub const ALL: [Severity; 3] = [Severity::Info, Severity::Warning, Severity::Error];

    pub fn routing_key(&self) -> &'static str {
        match self {
            Severity::Info => "log.INFO",
            Severity::Warning => "log.WARNING",
            Severity::Error => "log.ERROR",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.routing_key())
    }
}

impl FromStr for Severity {
    type Err = BusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "log.INFO" => Ok(Severity::Info),
            "log.WARNING" => Ok(Severity::Warning),
            "log.ERROR" => Ok(Severity::Error),
            other => Err(BusError::Rejected(format!("unknown routing key {}", other))),
        }
    }
}

/// Match a dot-separated routing key against a topic binding pattern.
///
/// `*` matches exactly one word, `#` matches zero or more words.
pub fn topic_matches(pattern: &str, routing_key: &str) -> bool {
    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = routing_key.split('.').collect();
    matches_words(&pattern, &key)
}

fn matches_words(pattern: &[&str], key: &[&str]) -> bool {
    match pattern.split_first() {
        None => key.is_empty(),
        Some((&"#", rest)) => (0..=key.len()).any(|skip| matches_words(rest, &key[skip..])),
        Some((&word, rest)) => match key.split_first() {
            Some((&k, key_rest)) if word == "*" || word == k => matches_words(rest, key_rest),
            _ => false,
        },
    }
}
