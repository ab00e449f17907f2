// Copyright 2026 Martin Pool.

//! Filters restricting which names a directory listing returns.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};

/// Restrict listings to entries of one kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Dir,
}

/// A listing filter, evaluated on the server.
///
/// An entry passes if it matches any of the glob patterns (or there are no
/// patterns) and is of the requested kind (if any).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListFilter {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub patterns: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<EntryKind>,
}

impl ListFilter {
    pub fn matching<I, S>(patterns: I) -> ListFilter
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ListFilter {
            patterns: patterns.into_iter().map(Into::into).collect(),
            kind: None,
        }
    }

    #[must_use]
    pub fn only(self, kind: EntryKind) -> ListFilter {
        ListFilter {
            kind: Some(kind),
            ..self
        }
    }

    /// Encode as base64 JSON, the form sent on the wire.
    pub fn encode(&self) -> Result<String> {
        let json = serde_json::to_vec(self)
            .map_err(|err| Error::InvalidArgument(format!("can't serialize filter: {err}")))?;
        Ok(STANDARD.encode(json))
    }

    pub fn decode(encoded: &str) -> Result<ListFilter> {
        let json = STANDARD
            .decode(encoded.trim())
            .map_err(|err| Error::InvalidArgument(format!("bad filter encoding: {err}")))?;
        serde_json::from_slice(&json)
            .map_err(|err| Error::InvalidArgument(format!("bad filter: {err}")))
    }

    /// Compile the patterns for matching.
    pub fn matcher(&self) -> Result<FilterMatcher> {
        let globs = if self.patterns.is_empty() {
            None
        } else {
            let mut builder = GlobSetBuilder::new();
            for pattern in &self.patterns {
                builder.add(Glob::new(pattern).map_err(|err| {
                    Error::InvalidArgument(format!("bad pattern {pattern:?}: {err}"))
                })?);
            }
            Some(
                builder
                    .build()
                    .map_err(|err| Error::InvalidArgument(err.to_string()))?,
            )
        };
        Ok(FilterMatcher {
            globs,
            kind: self.kind,
        })
    }
}

#[derive(Debug)]
pub struct FilterMatcher {
    globs: Option<GlobSet>,
    kind: Option<EntryKind>,
}

impl FilterMatcher {
    pub fn matches(&self, name: &str, is_dir: bool) -> bool {
        let kind_ok = match self.kind {
            None => true,
            Some(EntryKind::Dir) => is_dir,
            Some(EntryKind::File) => !is_dir,
        };
        kind_ok && self.globs.as_ref().map_or(true, |g| g.is_match(name))
    }
}
