//! Per-test interception context.

use crate::adapters::{Fetch, XhrFactory};
use crate::callstack::{CallEntry, CallFilter, CallStack};
use crate::config::{RulesFile, SessionConfig};
use crate::error::ConfigError;
use crate::matcher::MatchCriteria;
use crate::pipeline::{Pipeline, RegistryResolver, ResolutionHook};
use crate::registry::{MockResponse, RuleId, RuleRegistry, Throttle};
use crate::request::PageUrl;
use crate::transport::Transport;
use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, info};

/// State shared by the session and every pipeline it hands out.
pub(crate) struct SessionState {
    pub(crate) config: SessionConfig,
    pub(crate) page: PageUrl,
    pub(crate) call_stack: CallStack,
    pub(crate) mocks: Arc<RuleRegistry<MockResponse>>,
    pub(crate) throttles: RuleRegistry<Throttle>,
    /// Declarative registry, consulted before the external hook
    pub(crate) resolver: Arc<dyn ResolutionHook>,
    pub(crate) hook: RwLock<Option<Arc<dyn ResolutionHook>>>,
}

/// Ids of rules registered from a [`RulesFile`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadedRules {
    pub mocks: Vec<RuleId>,
    pub throttles: Vec<RuleId>,
}

/// Interception context for one test: configuration, rule registries, the
/// call stack, the optional resolution hook and the installed adapters.
///
/// Cloning is cheap and every clone shares the same state.
#[derive(Clone)]
pub struct Session {
    state: Arc<SessionState>,
    fetch: Arc<OnceCell<Fetch>>,
    xhr: Arc<OnceCell<XhrFactory>>,
}

impl Session {
    pub fn new(config: SessionConfig) -> Result<Self, ConfigError> {
        let page = PageUrl::parse(&config.page_url)?;
        let mocks = Arc::new(RuleRegistry::new());
        let state = SessionState {
            config,
            page,
            call_stack: CallStack::new(),
            resolver: Arc::new(RegistryResolver::new(Arc::clone(&mocks))),
            mocks,
            throttles: RuleRegistry::new(),
            hook: RwLock::new(None),
        };
        info!(page = %state.page.as_str(), "session created");
        Ok(Self {
            state: Arc::new(state),
            fetch: Arc::new(OnceCell::new()),
            xhr: Arc::new(OnceCell::new()),
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.state.config
    }

    pub fn page(&self) -> &PageUrl {
        &self.state.page
    }

    pub fn add_mock(&self, criteria: MatchCriteria, response: MockResponse, times: u32) -> RuleId {
        self.state.mocks.add(criteria, response, times)
    }

    pub fn remove_mock(&self, id: RuleId) -> bool {
        self.state.mocks.remove(id)
    }

    pub fn add_throttle(&self, criteria: MatchCriteria, delay_ms: u64, times: u32) -> RuleId {
        self.state.throttles.add(criteria, Throttle::new(delay_ms), times)
    }

    /// Throttle whose mock applies after the delay when no other mock matched.
    pub fn add_throttle_with_mock(
        &self,
        criteria: MatchCriteria,
        delay_ms: u64,
        mock: MockResponse,
        times: u32,
    ) -> RuleId {
        let throttle = Throttle::new(delay_ms).with_mock(mock);
        self.state.throttles.add(criteria, throttle, times)
    }

    pub fn remove_throttle(&self, id: RuleId) -> bool {
        self.state.throttles.remove(id)
    }

    /// Install the external resolution hook, replacing any previous one.
    pub fn set_resolution_hook(&self, hook: Arc<dyn ResolutionHook>) {
        if self.state.hook.write().replace(hook).is_some() {
            debug!("resolution hook replaced");
        }
    }

    pub fn clear_resolution_hook(&self) {
        self.state.hook.write().take();
    }

    /// Register every rule in `rules`, or none if any rule is invalid.
    pub fn load_rules(&self, rules: &RulesFile) -> Result<LoadedRules, ConfigError> {
        let compiled = rules.compile()?;
        let mut loaded = LoadedRules::default();
        for (criteria, mock, times) in compiled.mocks {
            loaded.mocks.push(self.state.mocks.add(criteria, mock, times));
        }
        for (criteria, throttle, times) in compiled.throttles {
            loaded.throttles.push(self.state.throttles.add(criteria, throttle, times));
        }
        info!(
            mocks = loaded.mocks.len(),
            throttles = loaded.throttles.len(),
            "rules loaded"
        );
        Ok(loaded)
    }

    pub fn query(&self, filter: &CallFilter) -> Vec<CallEntry> {
        self.state.call_stack.query(filter)
    }

    pub fn last(&self, filter: &CallFilter) -> Option<CallEntry> {
        self.state.call_stack.last(filter)
    }

    pub fn entries(&self) -> Vec<CallEntry> {
        self.state.call_stack.entries()
    }

    /// Clear the call stack and both registries.
    pub fn reset(&self) {
        self.state.call_stack.reset();
        self.state.mocks.clear();
        self.state.throttles.clear();
        debug!("session reset");
    }

    /// Pipeline driving `transport` through this session.
    pub fn pipeline(&self, transport: Arc<dyn Transport>) -> Pipeline {
        Pipeline::new(Arc::clone(&self.state), transport)
    }

    /// Install the fetch adapter. Later calls return the first adapter and
    /// ignore their transport.
    pub fn install_fetch(&self, transport: Arc<dyn Transport>) -> Fetch {
        if let Some(existing) = self.fetch.get() {
            debug!("fetch adapter already installed");
            return existing.clone();
        }
        self.fetch
            .get_or_init(|| Fetch::new(Arc::new(self.pipeline(transport))))
            .clone()
    }

    /// Install the XHR adapter. Later calls return the first factory.
    pub fn install_xhr(&self, transport: Arc<dyn Transport>) -> XhrFactory {
        if let Some(existing) = self.xhr.get() {
            debug!("xhr adapter already installed");
            return existing.clone();
        }
        self.xhr
            .get_or_init(|| XhrFactory::new(Arc::new(self.pipeline(transport))))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MatchConfig, MockResponseConfig, MockRuleConfig};
    use crate::transport::testing::ScriptedTransport;

    fn session() -> Session {
        Session::new(SessionConfig::new("http://localhost:3000/")).unwrap()
    }

    #[test]
    fn test_new_rejects_bad_page_url() {
        assert!(Session::new(SessionConfig::new("not a url")).is_err());
    }

    #[test]
    fn test_remove_rules() {
        let session = session();
        let mock = session.add_mock(MatchCriteria::new(), MockResponse::new().body("x"), 0);
        let throttle = session.add_throttle(MatchCriteria::new(), 100, 0);
        assert!(session.remove_mock(mock));
        assert!(!session.remove_mock(mock));
        assert!(session.remove_throttle(throttle));
        assert!(!session.remove_throttle(throttle));
    }

    #[test]
    fn test_load_rules_is_all_or_nothing() {
        let session = session();
        let good = MockRuleConfig {
            match_config: MatchConfig {
                url: Some("/a".to_string()),
                ..Default::default()
            },
            response: MockResponseConfig::default(),
            times: 0,
        };
        let bad = MockRuleConfig {
            match_config: MatchConfig {
                url_regex: Some("(".to_string()),
                ..Default::default()
            },
            ..good.clone()
        };
        let rules = RulesFile {
            mocks: vec![good.clone(), bad],
            throttles: vec![],
        };
        assert!(session.load_rules(&rules).is_err());
        assert!(session.state.mocks.is_empty());

        let rules = RulesFile {
            mocks: vec![good],
            throttles: vec![],
        };
        let loaded = session.load_rules(&rules).unwrap();
        assert_eq!(loaded.mocks.len(), 1);
        assert_eq!(session.state.mocks.ids(), loaded.mocks);
    }

    #[tokio::test]
    async fn test_reset_clears_calls_and_rules() {
        let session = session();
        let fetch = session.install_fetch(Arc::new(ScriptedTransport::ok("{}")));
        session.add_mock(MatchCriteria::new().url("/a"), MockResponse::new().body("a"), 0);
        session.add_throttle(MatchCriteria::new(), 1, 0);
        fetch.get("/a").await.unwrap();
        assert_eq!(session.entries().len(), 1);

        session.reset();
        assert!(session.entries().is_empty());
        assert!(session.state.mocks.is_empty());
        assert!(session.state.throttles.is_empty());
    }

    #[tokio::test]
    async fn test_install_is_idempotent() {
        let session = session();
        let first = Arc::new(ScriptedTransport::ok("first"));
        let second = Arc::new(ScriptedTransport::ok("second"));
        let fetch_a = session.install_fetch(first.clone());
        let fetch_b = session.install_fetch(second.clone());

        let body = fetch_b.get("/x").await.unwrap().text().await.unwrap();
        assert_eq!(body, "first");
        assert_eq!(second.sends(), 0);
        drop(fetch_a);

        let xhr_a = session.install_xhr(first.clone());
        let xhr_b = session.install_xhr(second);
        assert!(xhr_a.same_pipeline(&xhr_b));
    }
}
