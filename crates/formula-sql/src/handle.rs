use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleKind {
    Table,
    Fragment,
    Plot,
}

impl HandleKind {
    fn prefix(self) -> &'static str {
        match self {
            HandleKind::Table => "tbl:",
            HandleKind::Fragment => "frag:",
            HandleKind::Plot => "plot:",
        }
    }
}

/// Store key for an artifact: kind plus a per-kind sequential id.
///
/// The string form (`tbl:7`, `frag:3`, `plot:2`) is what crosses the host
/// boundary. Table handles shown to the host may carry a trailing dimension
/// hint (`tbl:7 [3x2]`); [`Handle::parse`] ignores it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle {
    pub kind: HandleKind,
    pub id: u64,
}

impl Handle {
    pub fn new(kind: HandleKind, id: u64) -> Self {
        Self { kind, id }
    }

    /// Parse a handle token, stripping any display suffix after the first
    /// whitespace. Returns `None` for anything that is not handle-shaped.
    pub fn parse(raw: &str) -> Option<Self> {
        let base = raw.trim_start().split_whitespace().next()?;
        [HandleKind::Table, HandleKind::Fragment, HandleKind::Plot]
            .into_iter()
            .find_map(|kind| {
                let digits = base.strip_prefix(kind.prefix())?;
                if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                    return None;
                }
                digits.parse().ok().map(|id| Handle { kind, id })
            })
    }

    /// Whether `raw` claims to be a handle by prefix, even if the id is malformed.
    pub fn looks_like_handle(raw: &str) -> bool {
        let raw = raw.trim_start();
        [HandleKind::Table, HandleKind::Fragment, HandleKind::Plot]
            .into_iter()
            .any(|kind| raw.starts_with(kind.prefix()))
    }

    /// Host-facing token. Table handles get a `[rows x cols]` hint; it is not
    /// authoritative and callers must read dimensions from the store.
    pub fn display_with_dims(&self, rows: u64, cols: usize) -> String {
        match self.kind {
            HandleKind::Table => format!("{self} [{rows}x{cols}]"),
            _ => self.to_string(),
        }
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.kind.prefix(), self.id)
    }
}
