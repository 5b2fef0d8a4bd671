//! Alias grammar, normalization, and query-time time-travel parsing.
//!
//! Registration aliases match `[A-Za-z0-9_-]+(:[A-Za-z0-9_-]+)?`; the
//! branch defaults to `main`. `@` is reserved for query-time time travel
//! (`alias@t:<snapshot-id>`, `alias@iso:<RFC-3339>`) and must never
//! appear in a registration alias.

use crate::error::{VgError, VgResult};
use crate::source::TimeTravel;
use chrono::{DateTime, Utc};
use regex::Regex;
use std::sync::OnceLock;

pub const DEFAULT_BRANCH: &str = "main";

fn alias_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9_-]+(:[A-Za-z0-9_-]+)?$").expect("alias grammar regex")
    })
}

/// Normalize an alias to `name:branch`, defaulting the branch to `main`
pub fn normalize_alias(name: &str) -> VgResult<String> {
    if name.is_empty() || name.contains('@') || !alias_re().is_match(name) {
        return Err(VgError::InvalidAlias(name.to_string()));
    }
    if name.contains(':') {
        Ok(name.to_string())
    } else {
        Ok(format!("{name}:{DEFAULT_BRANCH}"))
    }
}

/// A query-time alias from a FROM clause, split into its parts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedAlias {
    pub ledger: String,
    pub branch: String,
    pub t: Option<TimeTravel>,
}

impl ParsedAlias {
    pub fn normalized(&self) -> String {
        format!("{}:{}", self.ledger, self.branch)
    }
}

/// Parse `alias`, `alias@t:<id>`, or `alias@iso:<instant>`
pub fn parse_query_alias(input: &str) -> VgResult<ParsedAlias> {
    let (alias_part, t) = match input.split_once('@') {
        None => (input, None),
        Some((alias, suffix)) => {
            let t = if let Some(id) = suffix.strip_prefix("t:") {
                let id: i64 = id.parse().map_err(|_| VgError::InvalidAlias(input.to_string()))?;
                TimeTravel::SnapshotId(id)
            } else if let Some(instant) = suffix.strip_prefix("iso:") {
                let dt: DateTime<Utc> = DateTime::parse_from_rfc3339(instant)
                    .map_err(|_| VgError::InvalidAlias(input.to_string()))?
                    .with_timezone(&Utc);
                TimeTravel::AsOfTime(dt)
            } else {
                return Err(VgError::InvalidAlias(input.to_string()));
            };
            (alias, Some(t))
        }
    };

    let normalized = normalize_alias(alias_part)?;
    let (ledger, branch) = normalized
        .split_once(':')
        .expect("normalized alias always carries a branch");
    Ok(ParsedAlias {
        ledger: ledger.to_string(),
        branch: branch.to_string(),
        t,
    })
}
