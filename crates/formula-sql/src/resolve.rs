//! Rewrites placeholder-bearing SQL into executable SQL.
//!
//! Table handles become their temp relation names, fragment handles are
//! inlined as parenthesized subqueries (recursively), literals are rendered
//! according to their type tag, and status strings pass through verbatim so
//! they stay recognizable if they leak into an error message.
//!
//! Every table referenced by a statement is pinned for as long as the
//! returned [`TableHolds`] lives. Pins are cumulative, so two statements
//! referencing the same table at once each hold their own count.

use crate::descriptor::Arg;
use crate::error::{Result, SqlGraphError};
use crate::handle::{Handle, HandleKind};
use crate::release::ReleaseQueue;
use crate::status::is_error_or_blocked;
use crate::store::{Evicted, Stores};
use std::collections::HashSet;
use std::sync::Arc;

/// Largest integer magnitude that survives an `f64` round trip.
const MAX_EXACT_INT: f64 = 9_007_199_254_740_992.0;

/// Refcount pins taken during resolution; released on drop.
#[must_use = "dropping the holds releases the pinned tables immediately"]
pub struct TableHolds {
    stores: Arc<Stores>,
    releases: Option<ReleaseQueue>,
    handles: Vec<Handle>,
}

impl TableHolds {
    fn new(stores: Arc<Stores>, releases: Option<ReleaseQueue>) -> Self {
        Self {
            stores,
            releases,
            handles: Vec::new(),
        }
    }

    pub fn handles(&self) -> &[Handle] {
        &self.handles
    }
}

impl Drop for TableHolds {
    fn drop(&mut self) {
        for handle in self.handles.drain(..) {
            let Some(evicted) = self.stores.decrement(&handle) else {
                continue;
            };
            match &self.releases {
                Some(queue) => queue.release(evicted),
                None => {
                    if let Evicted::Table(result) = evicted {
                        log::warn!(
                            "{handle} evicted with no release queue; relation {} leaked",
                            result.relation
                        );
                    }
                }
            }
        }
    }
}

pub struct Resolved {
    pub sql: String,
    pub holds: TableHolds,
}

pub struct Resolver {
    stores: Arc<Stores>,
    releases: Option<ReleaseQueue>,
}

impl Resolver {
    pub fn new(stores: Arc<Stores>, releases: Option<ReleaseQueue>) -> Self {
        Self { stores, releases }
    }

    pub fn resolve(&self, sql: &str, args: &[Arg]) -> Result<Resolved> {
        let mut holds = TableHolds::new(Arc::clone(&self.stores), self.releases.clone());
        let mut visiting = HashSet::new();
        // On error `holds` drops here, undoing any pins already taken.
        let sql = self.resolve_inner(sql, args, &mut visiting, &mut holds)?;
        Ok(Resolved { sql, holds })
    }

    fn resolve_inner(
        &self,
        sql: &str,
        args: &[Arg],
        visiting: &mut HashSet<Handle>,
        holds: &mut TableHolds,
    ) -> Result<String> {
        if args.is_empty() {
            return Ok(sql.to_string());
        }

        let tokens = scan_placeholders(sql);
        let named = tokens.iter().all(|t| matches!(t.slot, Slot::Named(_)))
            && !tokens.is_empty();

        if named {
            if args.len() % 2 != 0 {
                return Err(SqlGraphError::ArgumentMismatch(format!(
                    "named parameters need name/value pairs, got {} arguments",
                    args.len()
                )));
            }
            let mut pairs = Vec::with_capacity(args.len() / 2);
            for pair in args.chunks(2) {
                let Arg::Text(name) = &pair[0] else {
                    return Err(SqlGraphError::ArgumentMismatch(format!(
                        "parameter name must be text, got {:?}",
                        pair[0]
                    )));
                };
                pairs.push((name.trim_start_matches(':'), &pair[1]));
            }

            let mut rendered = Vec::with_capacity(tokens.len());
            for token in &tokens {
                let Slot::Named(name) = token.slot else {
                    rendered.push(None);
                    continue;
                };
                let value = pairs.iter().find(|(n, _)| *n == name).map(|(_, v)| *v);
                rendered.push(match value {
                    Some(arg) => Some(self.render_arg(arg, visiting, holds)?),
                    None => None,
                });
            }
            Ok(splice(sql, &tokens, rendered))
        } else {
            // `?` takes the next argument, `?N` the N-th; `:name` tokens in
            // a positional statement are left for the engine.
            let mut next = 0;
            let mut rendered = Vec::with_capacity(tokens.len());
            for token in &tokens {
                let idx = match token.slot {
                    Slot::Next => {
                        next += 1;
                        Some(next - 1)
                    }
                    Slot::Numbered(n) => n.checked_sub(1),
                    Slot::Named(_) => None,
                };
                rendered.push(match idx.and_then(|idx| args.get(idx)) {
                    Some(arg) => Some(self.render_arg(arg, visiting, holds)?),
                    // Left as-is; the engine reports the missing argument.
                    None => None,
                });
            }
            Ok(splice(sql, &tokens, rendered))
        }
    }

    fn render_arg(
        &self,
        arg: &Arg,
        visiting: &mut HashSet<Handle>,
        holds: &mut TableHolds,
    ) -> Result<String> {
        match arg {
            Arg::Number(n) => render_number(*n),
            Arg::Text(s) => Ok(quote_literal(s)),
            Arg::Bool(true) => Ok("TRUE".to_string()),
            Arg::Bool(false) => Ok("FALSE".to_string()),
            Arg::Null => Ok("NULL".to_string()),
            Arg::Ref(raw) => self.render_ref(raw, visiting, holds),
        }
    }

    fn render_ref(
        &self,
        raw: &str,
        visiting: &mut HashSet<Handle>,
        holds: &mut TableHolds,
    ) -> Result<String> {
        if is_error_or_blocked(raw) {
            return Ok(raw.to_string());
        }
        let Some(handle) = Handle::parse(raw) else {
            if Handle::looks_like_handle(raw) {
                return Err(SqlGraphError::NotFound(raw.trim().to_string()));
            }
            return Err(SqlGraphError::ArgumentMismatch(format!(
                "unrecognized reference {raw:?}"
            )));
        };

        match handle.kind {
            HandleKind::Table => {
                let Some(result) = self.stores.tables.get(&handle) else {
                    return Err(SqlGraphError::NotFound(handle.to_string()));
                };
                // The entry can be evicted between `get` and `increment`;
                // a failed increment means it is gone.
                if !self.stores.tables.increment(&handle) {
                    return Err(SqlGraphError::NotFound(handle.to_string()));
                }
                holds.handles.push(handle);
                Ok(format!("temp.{}", crate::engine::quote_ident(&result.relation)))
            }
            HandleKind::Fragment => {
                let Some(fragment) = self.stores.fragments.get(&handle) else {
                    return Err(SqlGraphError::NotFound(handle.to_string()));
                };
                if !visiting.insert(handle) {
                    return Err(SqlGraphError::CycleDetected(handle.to_string()));
                }
                let inner = self.resolve_inner(&fragment.sql, &fragment.args, visiting, holds);
                visiting.remove(&handle);
                // Newlines keep a trailing `--` comment off the closing paren.
                Ok(format!("(\n{}\n)", inner?.trim().trim_end_matches(';')))
            }
            HandleKind::Plot => Err(SqlGraphError::ArgumentMismatch(format!(
                "{handle} is a plot and cannot be queried"
            ))),
        }
    }
}

fn render_number(n: f64) -> Result<String> {
    if !n.is_finite() {
        return Err(SqlGraphError::ArgumentMismatch(format!(
            "cannot use non-finite number {n} as a SQL literal"
        )));
    }
    let literal = if n.fract() == 0.0 && n.abs() <= MAX_EXACT_INT {
        format!("{}", n as i64)
    } else {
        format!("{n:?}")
    };
    // `10-?` must not become `10--5`, which the engine reads as a comment.
    if literal.starts_with('-') {
        Ok(format!("({literal})"))
    } else {
        Ok(literal)
    }
}

fn quote_literal(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot<'a> {
    /// `?`
    Next,
    /// `?N`, 1-based.
    Numbered(usize),
    /// `:name`
    Named(&'a str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Placeholder<'a> {
    start: usize,
    end: usize,
    slot: Slot<'a>,
}

/// Find `?`, `?N` and `:name` placeholders outside quotes and comments.
fn scan_placeholders(sql: &str) -> Vec<Placeholder<'_>> {
    let bytes = sql.as_bytes();
    let mut out = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            quote @ (b'\'' | b'"' | b'`') => {
                i += 1;
                while i < bytes.len() {
                    if bytes[i] == quote {
                        // Doubled quote is an escape.
                        if bytes.get(i + 1) == Some(&quote) {
                            i += 2;
                            continue;
                        }
                        break;
                    }
                    i += 1;
                }
                i += 1;
            }
            b'[' => {
                while i < bytes.len() && bytes[i] != b']' {
                    i += 1;
                }
                i += 1;
            }
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i += 2;
                while i < bytes.len() && !(bytes[i] == b'*' && bytes.get(i + 1) == Some(&b'/')) {
                    i += 1;
                }
                i += 2;
            }
            b'?' => {
                let start = i;
                let mut end = i + 1;
                while bytes.get(end).is_some_and(u8::is_ascii_digit) {
                    end += 1;
                }
                let slot = if end == start + 1 {
                    Slot::Next
                } else {
                    // Out-of-range numbers map to 0, which matches no argument.
                    Slot::Numbered(sql[start + 1..end].parse().unwrap_or(0))
                };
                out.push(Placeholder { start, end, slot });
                i = end;
            }
            b':' if i == 0 || bytes[i - 1] != b':' => {
                let start = i;
                let mut end = i + 1;
                if bytes
                    .get(end)
                    .is_some_and(|b| b.is_ascii_alphabetic() || *b == b'_')
                {
                    while bytes
                        .get(end)
                        .is_some_and(|b| b.is_ascii_alphanumeric() || *b == b'_')
                    {
                        end += 1;
                    }
                    out.push(Placeholder {
                        start,
                        end,
                        slot: Slot::Named(&sql[start + 1..end]),
                    });
                }
                i = end;
            }
            _ => i += 1,
        }
    }
    out
}

fn splice(sql: &str, tokens: &[Placeholder<'_>], rendered: Vec<Option<String>>) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut cursor = 0;
    for (token, replacement) in tokens.iter().zip(rendered) {
        if let Some(replacement) = replacement {
            out.push_str(&sql[cursor..token.start]);
            out.push_str(&replacement);
            cursor = token.end;
        }
    }
    out.push_str(&sql[cursor..]);
    out
}
