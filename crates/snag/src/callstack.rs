//! Insertion-ordered log of intercepted calls.

use crate::matcher::MatchCriteria;
use crate::request::RequestSnapshot;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use tokio::time::Instant;
use tracing::debug;

/// Response as delivered to the caller.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseRecord {
    pub status_code: u16,
    pub status_text: String,
    pub headers: HashMap<String, String>,
    pub body: String,
    pub is_mock: bool,
    pub ended_at: DateTime<Utc>,
    /// Real status code before a mock overwrote it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code_origin: Option<u16>,
    /// Real body before a mock overwrote it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body_origin: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallEntry {
    /// Position in request-start order
    pub sequence: u64,
    pub request: RequestSnapshot,
    pub response: Option<ResponseRecord>,
    pub pending: bool,
    pub delay_ms: Option<u64>,
    pub duration_ms: Option<u64>,
    pub cancelled: bool,
    pub error: Option<String>,
    #[serde(skip)]
    started: Instant,
}

impl CallEntry {
    pub fn is_mock(&self) -> bool {
        self.response.as_ref().is_some_and(|r| r.is_mock)
    }

    pub fn status_code(&self) -> Option<u16> {
        self.response.as_ref().map(|r| r.status_code)
    }
}

/// Refers to an entry pushed into a [`CallStack`]. Handles from before a
/// reset no longer resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallHandle {
    generation: u64,
    index: usize,
}

impl CallHandle {
    pub fn sequence(&self) -> u64 {
        self.index as u64
    }
}

/// Query filter: the matcher vocabulary plus entry-state shortcuts.
#[derive(Debug, Clone, Default)]
pub struct CallFilter {
    pub criteria: MatchCriteria,
    pub pending: Option<bool>,
    pub mocked: Option<bool>,
    pub status_code: Option<u16>,
    pub cancelled: Option<bool>,
}

impl CallFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn criteria(mut self, criteria: MatchCriteria) -> Self {
        self.criteria = criteria;
        self
    }

    pub fn pending(mut self, pending: bool) -> Self {
        self.pending = Some(pending);
        self
    }

    pub fn mocked(mut self, mocked: bool) -> Self {
        self.mocked = Some(mocked);
        self
    }

    pub fn status_code(mut self, status_code: u16) -> Self {
        self.status_code = Some(status_code);
        self
    }

    pub fn cancelled(mut self, cancelled: bool) -> Self {
        self.cancelled = Some(cancelled);
        self
    }

    pub fn accepts(&self, entry: &CallEntry) -> bool {
        if self.pending.is_some_and(|p| p != entry.pending) {
            return false;
        }
        if self.mocked.is_some_and(|m| m != entry.is_mock()) {
            return false;
        }
        if self.cancelled.is_some_and(|c| c != entry.cancelled) {
            return false;
        }
        if let Some(code) = self.status_code {
            if entry.status_code() != Some(code) {
                return false;
            }
        }
        self.criteria.matches(&entry.request)
    }
}

impl From<MatchCriteria> for CallFilter {
    fn from(criteria: MatchCriteria) -> Self {
        Self::new().criteria(criteria)
    }
}

#[derive(Default)]
struct Log {
    generation: u64,
    entries: Vec<CallEntry>,
}

/// Append-only store. Entries leave only through [`CallStack::reset`].
#[derive(Default)]
pub struct CallStack {
    log: RwLock<Log>,
}

impl CallStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a pending entry for a call that just started.
    pub fn push(&self, request: RequestSnapshot) -> CallHandle {
        let mut log = self.log.write();
        let index = log.entries.len();
        debug!(sequence = index, method = %request.method, url = %request.url, "call recorded");
        log.entries.push(CallEntry {
            sequence: index as u64,
            request,
            response: None,
            pending: true,
            delay_ms: None,
            duration_ms: None,
            cancelled: false,
            error: None,
            started: Instant::now(),
        });
        CallHandle {
            generation: log.generation,
            index,
        }
    }

    pub fn record_delay(&self, handle: CallHandle, delay_ms: u64) {
        self.update(handle, |entry| entry.delay_ms = Some(delay_ms));
    }

    /// Finalize with a response. Ignored when the entry is no longer pending.
    pub fn complete(&self, handle: CallHandle, response: ResponseRecord) {
        self.finalize(handle, |entry| entry.response = Some(response));
    }

    /// Finalize without a response because the call failed.
    pub fn fail(&self, handle: CallHandle, reason: impl Into<String>) {
        let reason = reason.into();
        self.finalize(handle, |entry| entry.error = Some(reason));
    }

    /// Finalize without a response because the call was aborted.
    pub fn cancel(&self, handle: CallHandle) {
        self.finalize(handle, |entry| entry.cancelled = true);
    }

    fn finalize(&self, handle: CallHandle, f: impl FnOnce(&mut CallEntry)) {
        self.update(handle, |entry| {
            if !entry.pending {
                return;
            }
            f(entry);
            entry.pending = false;
            entry.duration_ms = Some(entry.started.elapsed().as_millis() as u64);
        });
    }

    fn update(&self, handle: CallHandle, f: impl FnOnce(&mut CallEntry)) {
        let mut log = self.log.write();
        if log.generation != handle.generation {
            debug!(index = handle.index, "stale call handle after reset");
            return;
        }
        if let Some(entry) = log.entries.get_mut(handle.index) {
            f(entry);
        }
    }

    pub fn get(&self, handle: CallHandle) -> Option<CallEntry> {
        let log = self.log.read();
        if log.generation != handle.generation {
            return None;
        }
        log.entries.get(handle.index).cloned()
    }

    /// Entries accepted by `filter`, in start order.
    pub fn query(&self, filter: &CallFilter) -> Vec<CallEntry> {
        self.log
            .read()
            .entries
            .iter()
            .filter(|e| filter.accepts(e))
            .cloned()
            .collect()
    }

    /// Most recently started entry accepted by `filter`.
    pub fn last(&self, filter: &CallFilter) -> Option<CallEntry> {
        self.log
            .read()
            .entries
            .iter()
            .rev()
            .find(|e| filter.accepts(e))
            .cloned()
    }

    pub fn entries(&self) -> Vec<CallEntry> {
        self.log.read().entries.clone()
    }

    pub fn len(&self) -> usize {
        self.log.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.log.read().entries.is_empty()
    }

    pub fn reset(&self) {
        let mut log = self.log.write();
        log.generation += 1;
        log.entries.clear();
    }
}
