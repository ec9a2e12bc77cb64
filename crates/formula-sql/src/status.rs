//! Tagged status strings shown to the host in place of a handle.
//!
//! Both forms start with `#`, which no handle ever does, so dependency checks
//! can be done by prefix inspection alone.

use crate::descriptor::Arg;
use crate::error::SqlGraphError;
use std::fmt;

const ERROR_PREFIX: &str = "#ERROR!";
const BLOCKED_PREFIX: &str = "#BLOCKED!";

pub const CATEGORY_CONFIG: &str = "config";
pub const CATEGORY_PAUSED: &str = "paused";
pub const CATEGORY_PENDING: &str = "pending";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    Error,
    Blocked,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub kind: StatusKind,
    pub category: String,
    pub message: String,
}

impl Status {
    pub fn error(category: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: StatusKind::Error,
            category: category.into(),
            message: message.into(),
        }
    }

    pub fn blocked(category: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: StatusKind::Blocked,
            category: category.into(),
            message: message.into(),
        }
    }

    pub fn pending() -> Self {
        Self::blocked(CATEGORY_PENDING, "query running")
    }

    pub fn paused() -> Self {
        Self::blocked(CATEGORY_PAUSED, "execution paused")
    }

    pub fn awaiting_config() -> Self {
        Self::blocked(CATEGORY_CONFIG, "waiting for configuration")
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let (kind, rest) = if let Some(rest) = raw.strip_prefix(ERROR_PREFIX) {
            (StatusKind::Error, rest)
        } else if let Some(rest) = raw.strip_prefix(BLOCKED_PREFIX) {
            (StatusKind::Blocked, rest)
        } else {
            return None;
        };
        let (category, message) = match rest.split_once(':') {
            Some((category, message)) => (category, message.trim_start()),
            None => (rest, ""),
        };
        Some(Self {
            kind,
            category: category.to_string(),
            message: message.to_string(),
        })
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = match self.kind {
            StatusKind::Error => ERROR_PREFIX,
            StatusKind::Blocked => BLOCKED_PREFIX,
        };
        // Keep the value on one line so it still reads as a single cell.
        let message = self.message.replace(['\r', '\n'], " ");
        write!(f, "{prefix}{}: {message}", self.category)
    }
}

impl From<&SqlGraphError> for Status {
    fn from(err: &SqlGraphError) -> Self {
        Status::error(err.category(), err.to_string())
    }
}

pub fn is_error_or_blocked(value: &str) -> bool {
    value.starts_with(ERROR_PREFIX) || value.starts_with(BLOCKED_PREFIX)
}

pub fn is_blocked_on_config(value: &str) -> bool {
    Status::parse(value)
        .is_some_and(|status| status.kind == StatusKind::Blocked && status.category == CATEGORY_CONFIG)
}

/// Whether any argument still carries an unresolved upstream status.
pub fn depends_on_blocked(args: &[Arg]) -> bool {
    args.iter()
        .any(|arg| arg.as_ref_text().is_some_and(is_error_or_blocked))
}
