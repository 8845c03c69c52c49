//! YAML configuration.
//!
//! - `session` - `SessionConfig`: page URL, tracked resource types, transport pool
//! - `rules` - `RulesFile`: declarative mock and throttle rules

mod rules;
mod session;

pub use rules::{
    CompiledRules, MapMatch, MatchConfig, MockResponseConfig, MockRuleConfig, RulesFile,
    ThrottleRuleConfig,
};
pub use session::{SessionConfig, TransportConfig};
