#![forbid(unsafe_code)]

//! SQL computation graph for spreadsheet formulas.
//!
//! Each formula produces an opaque handle (a materialized table, a deferred
//! SQL fragment, or a plot configuration) and downstream formulas pass those
//! handles back in as query arguments. The host subscribes to each formula's
//! output and unsubscribes when the formula goes away; handle lifetimes are
//! tracked purely from those events.
//!
//! The pieces:
//! - [`store`]: reference-counted registries for the three artifact kinds.
//! - [`resolve`]: placeholder substitution and recursive fragment inlining
//!   with cycle detection.
//! - [`coordinator`]: serialized access to the single SQL engine, with
//!   per-caller-class lock policies.
//! - [`control`]: epoch-based interrupt and global pause/resume.
//! - [`topic`]: the per-subscription state machine.
//! - [`SqlGraph`]: the service object tying them together.
//!
//! The engine itself sits behind [`SqlEngine`]; [`SqliteEngine`] is the
//! bundled implementation.

pub mod config;
pub mod control;
pub mod coordinator;
pub mod descriptor;
pub mod engine;
pub mod epoch;
pub mod error;
pub mod gate;
mod graph;
pub mod handle;
pub mod release;
pub mod resolve;
pub mod sqlite;
pub mod status;
pub mod store;
pub mod topic;

pub use config::SqlGraphConfig;
pub use descriptor::{Arg, Request, RequestDescriptor};
pub use engine::{Interrupter, QueryRows, RelationInfo, SqlEngine};
pub use error::{EngineError, EngineErrorKind, Result, SqlGraphError};
pub use graph::{Host, SqlGraph};
pub use handle::{Handle, HandleKind};
pub use sqlite::SqliteEngine;
pub use status::{depends_on_blocked, is_error_or_blocked, Status, StatusKind};
pub use store::{HandleStore, StoredFragment, StoredPlot, StoredResult, Stores};
pub use topic::{Completion, SubscriptionId, TopicState};
