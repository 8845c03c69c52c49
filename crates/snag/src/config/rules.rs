//! Declarative rule files.
//!
//! ```yaml
//! mocks:
//!   - match:
//!       method: GET
//!       url: /api/users/*
//!     response:
//!       status_code: 200
//!       body: { id: 1, name: "Ana" }
//!     times: 1
//! throttles:
//!   - match:
//!       url_regex: "^https://cdn\\."
//!     delay_ms: 1500
//! ```

use crate::error::ConfigError;
use crate::matcher::{FieldPredicate, MatchCriteria, ResourceTypeMatch, UrlMatcher};
use crate::registry::{MockResponse, Throttle};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RulesFile {
    #[serde(default)]
    pub mocks: Vec<MockRuleConfig>,
    #[serde(default)]
    pub throttles: Vec<ThrottleRuleConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MockRuleConfig {
    #[serde(rename = "match", default)]
    pub match_config: MatchConfig,
    #[serde(default)]
    pub response: MockResponseConfig,
    /// Uses before the rule expires, 0 for unlimited
    #[serde(default)]
    pub times: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ThrottleRuleConfig {
    #[serde(rename = "match", default)]
    pub match_config: MatchConfig,
    pub delay_ms: u64,
    #[serde(default)]
    pub times: u32,
    /// Mock applied after the delay when no other mock matched
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mock: Option<MockResponseConfig>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MatchConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<ResourceTypeMatch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// Literal suffix or glob
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_regex: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<MapMatch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<MapMatch>,
    /// Raw body must contain this text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_contains: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cross_domain: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub https: Option<bool>,
}

/// Expected key/values; `strict` also requires the same key set.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MapMatch {
    #[serde(default)]
    pub strict: bool,
    pub values: HashMap<String, String>,
}

impl MapMatch {
    fn predicate(&self) -> FieldPredicate {
        let values = self.values.clone();
        if self.strict {
            FieldPredicate::Strict(values)
        } else {
            FieldPredicate::Shallow(values)
        }
    }
}

impl MatchConfig {
    pub fn compile(&self) -> Result<MatchCriteria, ConfigError> {
        let mut criteria = MatchCriteria::new();
        criteria.resource_type = self.resource_type.clone();
        criteria.method = self.method.clone();
        criteria.cross_domain = self.cross_domain;
        criteria.https = self.https;

        criteria.url = match (&self.url, &self.url_regex) {
            (Some(_), Some(_)) => {
                return Err(ConfigError::Invalid(
                    "'url' and 'url_regex' are mutually exclusive".to_string(),
                ))
            }
            (Some(pattern), None) => Some(UrlMatcher::parse(pattern)),
            (None, Some(pattern)) => Some(UrlMatcher::regex(pattern)?),
            (None, None) => None,
        };

        if let Some(query) = &self.query {
            criteria = criteria.query(query.predicate());
        }
        if let Some(headers) = &self.headers {
            criteria = criteria.headers(headers.predicate());
        }
        if let Some(needle) = self.body_contains.clone() {
            criteria = criteria.body(move |body| Ok(body.contains(&needle)));
        }
        Ok(criteria)
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MockResponseConfig {
    /// A string is used verbatim, anything else is serialized as JSON.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_text: Option<String>,
    #[serde(default)]
    pub allow_network: bool,
}

impl MockResponseConfig {
    pub fn to_mock(&self) -> Result<MockResponse, ConfigError> {
        if let Some(code) = self.status_code {
            if !(100..=599).contains(&code) {
                return Err(ConfigError::Invalid(format!(
                    "status_code {code} is outside 100-599"
                )));
            }
        }

        let mut mock = MockResponse::new().allow_network(self.allow_network);
        for (name, value) in &self.headers {
            mock = mock.header(name, value);
        }
        mock.status_code = self.status_code;
        mock.status_text = self.status_text.clone();

        match &self.body {
            None | Some(serde_json::Value::Null) => {}
            Some(serde_json::Value::String(text)) => mock = mock.body(text),
            Some(value) => mock = mock.json(value),
        }
        Ok(mock)
    }
}

/// Rules compiled into runtime criteria and payloads, ready to register.
#[derive(Debug, Default)]
pub struct CompiledRules {
    pub mocks: Vec<(MatchCriteria, MockResponse, u32)>,
    pub throttles: Vec<(MatchCriteria, Throttle, u32)>,
}

impl RulesFile {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, anyhow::Error> {
        let contents = std::fs::read_to_string(path)?;
        let rules: RulesFile = serde_yaml::from_str(&contents)?;
        rules.validate()?;
        Ok(rules)
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        self.compile()?;
        Ok(())
    }

    /// Compile every rule, failing on the first invalid one.
    pub fn compile(&self) -> Result<CompiledRules, ConfigError> {
        let mut compiled = CompiledRules::default();

        for (index, rule) in self.mocks.iter().enumerate() {
            let invalid = |e: ConfigError| ConfigError::InvalidRule {
                section: "mocks",
                index,
                reason: e.to_string(),
            };
            let criteria = rule.match_config.compile().map_err(invalid)?;
            let mock = rule.response.to_mock().map_err(invalid)?;
            compiled.mocks.push((criteria, mock, rule.times));
        }

        for (index, rule) in self.throttles.iter().enumerate() {
            let invalid = |e: ConfigError| ConfigError::InvalidRule {
                section: "throttles",
                index,
                reason: e.to_string(),
            };
            let criteria = rule.match_config.compile().map_err(invalid)?;
            let mut throttle = Throttle::new(rule.delay_ms);
            if let Some(mock) = &rule.mock {
                throttle = throttle.with_mock(mock.to_mock().map_err(invalid)?);
            }
            compiled.throttles.push((criteria, throttle, rule.times));
        }

        Ok(compiled)
    }
}
