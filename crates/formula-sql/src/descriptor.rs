use crate::status::{self, is_blocked_on_config, is_error_or_blocked};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A positional argument as it arrives from the host.
///
/// The type tag is part of the serialized form (`{"type": "number", "value": 5}`)
/// so a literal `"5"` typed as text never turns into a number, and a literal
/// string never gets mistaken for a handle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Arg {
    Number(f64),
    Text(String),
    Bool(bool),
    Null,
    /// Bare text: a handle, a status string, or something unrecognized.
    Ref(String),
}

impl Arg {
    pub fn as_ref_text(&self) -> Option<&str> {
        match self {
            Arg::Ref(raw) => Some(raw),
            _ => None,
        }
    }
}

impl From<f64> for Arg {
    fn from(value: f64) -> Self {
        Arg::Number(value)
    }
}

impl From<i64> for Arg {
    fn from(value: i64) -> Self {
        Arg::Number(value as f64)
    }
}

impl From<bool> for Arg {
    fn from(value: bool) -> Self {
        Arg::Bool(value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Request {
    /// Execute `sql` and materialize the result as a table handle.
    Query {
        sql: String,
        #[serde(default)]
        args: Vec<Arg>,
    },
    /// Validate `sql` without running it and keep it as an inlinable fragment.
    Fragment {
        sql: String,
        #[serde(default)]
        args: Vec<Arg>,
    },
    /// Chart configuration over a table or fragment handle.
    Plot {
        data: String,
        template: String,
        #[serde(default)]
        overrides: BTreeMap<String, serde_json::Value>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestDescriptor {
    #[serde(flatten)]
    pub request: Request,
    /// Hold the request until the host signals that configuration is done.
    #[serde(default)]
    pub wait_for_config: bool,
}

impl RequestDescriptor {
    pub fn query(sql: impl Into<String>, args: Vec<Arg>) -> Self {
        Self {
            request: Request::Query {
                sql: sql.into(),
                args,
            },
            wait_for_config: false,
        }
    }

    pub fn fragment(sql: impl Into<String>, args: Vec<Arg>) -> Self {
        Self {
            request: Request::Fragment {
                sql: sql.into(),
                args,
            },
            wait_for_config: false,
        }
    }

    pub fn plot(
        data: impl Into<String>,
        template: impl Into<String>,
        overrides: BTreeMap<String, serde_json::Value>,
    ) -> Self {
        Self {
            request: Request::Plot {
                data: data.into(),
                template: template.into(),
                overrides,
            },
            wait_for_config: false,
        }
    }

    pub fn with_wait_for_config(mut self, wait: bool) -> Self {
        self.wait_for_config = wait;
        self
    }

    fn reference_texts(&self) -> Vec<&str> {
        match &self.request {
            Request::Query { args, .. } | Request::Fragment { args, .. } => {
                args.iter().filter_map(Arg::as_ref_text).collect()
            }
            Request::Plot { data, .. } => vec![data.as_str()],
        }
    }

    /// Explicit flag, or any argument carrying the blocked-on-config sentinel.
    pub fn needs_config(&self) -> bool {
        self.wait_for_config
            || self
                .reference_texts()
                .into_iter()
                .any(is_blocked_on_config)
    }

    /// Stale-dependency check used before re-running a deferred request.
    pub fn depends_on_blocked(&self) -> bool {
        match &self.request {
            Request::Query { args, .. } | Request::Fragment { args, .. } => {
                status::depends_on_blocked(args)
            }
            Request::Plot { data, .. } => is_error_or_blocked(data),
        }
    }
}
