//! Structured log line parser
//!
//! Lines look like `INFO  2026-01-31T10:05:40 +1ms service=llm modelID=x title="a b"`.
//! The third token (elapsed marker) is ignored.

use chrono::{DateTime, Utc};
use std::borrow::Cow;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Error,
    Warn,
    Debug,
}

impl Level {
    /// Exact, case-sensitive match against the known labels
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "INFO" => Some(Self::Info),
            "ERROR" => Some(Self::Error),
            "WARN" => Some(Self::Warn),
            "DEBUG" => Some(Self::Debug),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Error => "ERROR",
            Self::Warn => "WARN",
            Self::Debug => "DEBUG",
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("empty line")]
    Empty,

    #[error("insufficient fields")]
    InsufficientFields,

    #[error("invalid log level: {0}")]
    InvalidLevel(String),

    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("missing required field: service")]
    MissingService,
}

/// One parsed log line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEvent {
    pub level: Level,
    pub timestamp: DateTime<Utc>,
    pub service: String,
    pub provider_id: String,
    pub model_id: String,
    pub session_id: String,
    pub agent: String,
    pub mode: String,
    /// Every `key=value` pair on the line, last occurrence wins
    pub fields: BTreeMap<String, String>,
}

impl LogEvent {
    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }
}

pub fn parse_line(raw: &str) -> Result<LogEvent, ParseError> {
    if raw.is_empty() {
        return Err(ParseError::Empty);
    }

    let mut rest = raw.trim_start();
    let mut head: [&str; 3] = [""; 3];
    for slot in head.iter_mut() {
        let Some((token, tail)) = next_token(rest) else {
            return Err(ParseError::InsufficientFields);
        };
        *slot = token;
        rest = tail;
    }
    let [level, stamp, _elapsed] = head;

    let level =
        Level::from_label(level).ok_or_else(|| ParseError::InvalidLevel(level.to_string()))?;
    let timestamp = parse_timestamp(stamp)?;

    let mut fields = BTreeMap::new();
    for (key, value) in parse_fields(rest) {
        fields.insert(key.to_string(), value.to_string());
    }

    let take = |key: &str| fields.get(key).cloned().unwrap_or_default();
    let service = take("service");
    if service.is_empty() {
        return Err(ParseError::MissingService);
    }
    let mut session_id = take("sessionID");
    if session_id.is_empty() {
        session_id = take("id");
    }

    Ok(LogEvent {
        level,
        timestamp,
        provider_id: take("providerID"),
        model_id: take("modelID"),
        agent: take("agent"),
        mode: take("mode"),
        service,
        session_id,
        fields,
    })
}

/// Split off the next whitespace-delimited token
fn next_token(s: &str) -> Option<(&str, &str)> {
    let s = s.trim_start();
    if s.is_empty() {
        return None;
    }
    let end = s.find(char::is_whitespace).unwrap_or(s.len());
    Some((&s[..end], &s[end..]))
}

/// Bare stamps are taken as UTC; stamps that already carry `Z` or an
/// explicit offset are parsed as written.
fn parse_timestamp(stamp: &str) -> Result<DateTime<Utc>, ParseError> {
    let stamped = if has_offset(stamp) {
        Cow::Borrowed(stamp)
    } else {
        Cow::Owned(format!("{stamp}Z"))
    };
    DateTime::parse_from_rfc3339(&stamped)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| ParseError::InvalidTimestamp(stamp.to_string()))
}

fn has_offset(stamp: &str) -> bool {
    if stamp.ends_with(['Z', 'z']) {
        return true;
    }
    stamp
        .split_once(['T', 't'])
        .is_some_and(|(_, time)| time.contains(['+', '-']))
}

/// Parse `key=value` and `key="quoted value"` pairs; other tokens are skipped.
pub fn parse_fields(line: &str) -> Vec<(&str, &str)> {
    let mut out = Vec::new();
    let mut rest = line;

    loop {
        let current = rest.trim_start();
        let Some((token, tail)) = next_token(current) else {
            break;
        };
        rest = tail;
        let Some((key, value)) = token.split_once('=') else {
            continue;
        };
        if key.is_empty() {
            continue;
        }

        if let Some(quoted) = value.strip_prefix('"') {
            // Closing quote may sit several tokens further along the line
            let after_open = &current[key.len() + 2..];
            if let Some(close) = after_open.find('"') {
                out.push((key, &after_open[..close]));
                rest = &after_open[close + 1..];
            } else {
                out.push((key, quoted));
            }
            continue;
        }

        out.push((key, value));
    }

    out
}
