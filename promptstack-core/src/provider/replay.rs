//! Recorded responses served in order, for offline runs and tests.
//!
//! A replay file holds one raw response. A file whose first line is
//! `!error <kind> <message>` (kind: `auth`, `rate_limit`, `network`,
//! `timeout`) replays a provider failure instead.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use crate::error::{ProviderError, ProviderErrorKind, Result};

type Entry = std::result::Result<String, ProviderError>;

#[derive(Debug, Default)]
pub struct ReplayProvider {
    entries: Mutex<VecDeque<Entry>>,
    calls: AtomicUsize,
}

impl ReplayProvider {
    pub fn scripted(entries: Vec<Entry>) -> Self {
        Self {
            entries: Mutex::new(entries.into()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Loads one entry per file, in the given order.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if a file cannot be read.
    pub fn from_files(paths: &[PathBuf]) -> Result<Self> {
        let mut entries = Vec::with_capacity(paths.len());
        for path in paths {
            let raw = std::fs::read_to_string(path)?;
            entries.push(parse_entry(&raw));
        }
        tracing::debug!(responses = entries.len(), "replay provider loaded");
        Ok(Self::scripted(entries))
    }

    /// Requests served so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(super) async fn complete(&self, _system: &str, _user: &str) -> Entry {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        next.unwrap_or_else(|| {
            Err(ProviderError::new(
                ProviderErrorKind::Network,
                "no recorded responses left",
            ))
        })
    }
}

fn parse_entry(raw: &str) -> Entry {
    let Some(rest) = raw.strip_prefix("!error ") else {
        return Ok(raw.to_owned());
    };
    let line = rest.lines().next().unwrap_or("");
    let (kind, message) = line.split_once(' ').unwrap_or((line, ""));
    let kind = match kind {
        "auth" => ProviderErrorKind::Auth,
        "rate_limit" => ProviderErrorKind::RateLimit,
        "timeout" => ProviderErrorKind::Timeout,
        _ => ProviderErrorKind::Network,
    };
    Err(ProviderError::new(kind, message.trim()))
}
