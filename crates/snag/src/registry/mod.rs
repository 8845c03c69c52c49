//! Ordered rule registries.
//!
//! - `mock` - mock response definitions
//! - `throttle` - throttle payloads (delay plus optional embedded mock)
//!
//! A registry is generic over its payload. Rules are scanned in insertion
//! order and the first match wins. Selecting a rule and consuming one of its
//! uses happen under the same lock, so two concurrent requests never consume
//! the same use.

mod mock;
mod throttle;

pub use mock::{BodyGenerator, MockResponse};
pub use throttle::Throttle;

use crate::matcher::MatchCriteria;
use crate::request::RequestSnapshot;
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Stable rule identifier, never reused within a registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct RuleId(u64);

impl RuleId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

struct Rule<P> {
    id: RuleId,
    criteria: MatchCriteria,
    payload: P,
    /// Remaining uses; `None` is unlimited.
    remaining: Option<u32>,
}

/// A rule chosen for a request.
#[derive(Debug, Clone)]
pub struct Matched<P> {
    pub id: RuleId,
    pub payload: P,
}

pub struct RuleRegistry<P> {
    rules: Mutex<Vec<Rule<P>>>,
    next_id: AtomicU64,
}

impl<P: Clone> RuleRegistry<P> {
    pub fn new() -> Self {
        Self {
            rules: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a rule applying to the next `times` matching requests.
    /// `times == 0` means unlimited.
    pub fn add(&self, criteria: MatchCriteria, payload: P, times: u32) -> RuleId {
        let id = RuleId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let remaining = (times > 0).then_some(times);
        self.rules.lock().push(Rule {
            id,
            criteria,
            payload,
            remaining,
        });
        debug!(rule = %id, times, "rule registered");
        id
    }

    /// Remove a rule. Returns true only if it was still registered.
    pub fn remove(&self, id: RuleId) -> bool {
        let mut rules = self.rules.lock();
        let before = rules.len();
        rules.retain(|r| r.id != id);
        let removed = rules.len() != before;
        if removed {
            debug!(rule = %id, "rule removed");
        }
        removed
    }

    /// Find the first rule matching `snapshot` and consume one of its uses.
    ///
    /// Criteria are evaluated under the registry lock; a user predicate that
    /// calls back into this registry deadlocks.
    pub fn consume_match(&self, snapshot: &RequestSnapshot) -> Option<Matched<P>> {
        let mut rules = self.rules.lock();
        let index = rules.iter().position(|r| r.criteria.matches(snapshot))?;

        let rule = &mut rules[index];
        let matched = Matched {
            id: rule.id,
            payload: rule.payload.clone(),
        };
        if let Some(remaining) = rule.remaining.as_mut() {
            *remaining -= 1;
            if *remaining == 0 {
                rules.remove(index);
                debug!(rule = %matched.id, "rule exhausted");
            }
        }
        Some(matched)
    }

    pub fn len(&self) -> usize {
        self.rules.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.lock().is_empty()
    }

    pub fn ids(&self) -> Vec<RuleId> {
        self.rules.lock().iter().map(|r| r.id).collect()
    }

    /// Drop every rule. Ids keep increasing afterwards.
    pub fn clear(&self) {
        self.rules.lock().clear();
    }
}

impl<P: Clone> Default for RuleRegistry<P> {
    fn default() -> Self {
        Self::new()
    }
}
