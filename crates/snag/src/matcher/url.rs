//! URL matching: literal suffix, glob or regex.

use crate::error::ConfigError;
use regex::Regex;

/// URL criterion evaluated against the absolute request URL.
///
/// Literal and glob patterns match a suffix of the URL, either with or
/// without its query string. Regex patterns search the full URL.
#[derive(Debug, Clone)]
pub enum UrlMatcher {
    Suffix(String),
    Glob(GlobPattern),
    Regex(Regex),
}

impl UrlMatcher {
    pub fn suffix(pattern: impl Into<String>) -> Self {
        UrlMatcher::Suffix(pattern.into())
    }

    pub fn glob(pattern: &str) -> Self {
        UrlMatcher::Glob(GlobPattern::new(pattern))
    }

    pub fn regex(pattern: &str) -> Result<Self, ConfigError> {
        Regex::new(pattern)
            .map(UrlMatcher::Regex)
            .map_err(|source| ConfigError::InvalidPattern {
                pattern: pattern.to_string(),
                source,
            })
    }

    /// Literal suffix unless the pattern carries glob wildcards.
    pub fn parse(pattern: &str) -> Self {
        if pattern.contains(['*', '?']) {
            Self::glob(pattern)
        } else {
            Self::suffix(pattern)
        }
    }

    pub fn matches(&self, url: &str) -> bool {
        let without_query = strip_query(url);
        match self {
            UrlMatcher::Suffix(suffix) => url.ends_with(suffix) || without_query.ends_with(suffix),
            UrlMatcher::Glob(glob) => glob.matches_suffix(url) || glob.matches_suffix(without_query),
            UrlMatcher::Regex(regex) => regex.is_match(url),
        }
    }
}

fn strip_query(url: &str) -> &str {
    let end = url.find(['?', '#']).unwrap_or(url.len());
    &url[..end]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GlobToken {
    Literal(char),
    /// `?`: one character other than `/`
    Any,
    /// `*`: any run without `/`
    Star,
    /// `**`: any run
    Globstar,
}

/// Pre-tokenized glob pattern.
#[derive(Debug, Clone)]
pub struct GlobPattern {
    source: String,
    tokens: Vec<GlobToken>,
}

impl GlobPattern {
    pub fn new(pattern: &str) -> Self {
        let mut tokens = Vec::with_capacity(pattern.len());
        let mut chars = pattern.chars().peekable();
        while let Some(c) = chars.next() {
            let token = match c {
                '*' if chars.peek() == Some(&'*') => {
                    chars.next();
                    GlobToken::Globstar
                }
                '*' => GlobToken::Star,
                '?' => GlobToken::Any,
                other => GlobToken::Literal(other),
            };
            tokens.push(token);
        }
        Self {
            source: pattern.to_string(),
            tokens,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Whether the pattern matches some suffix of `text`.
    pub fn matches_suffix(&self, text: &str) -> bool {
        let text: Vec<char> = text.chars().collect();
        // reachable[j]: the pattern consumed so far can end at text[j]
        // A leading globstar lets the match start anywhere.
        let mut reachable = vec![true; text.len() + 1];

        for token in &self.tokens {
            let mut next = vec![false; text.len() + 1];
            match token {
                GlobToken::Literal(expected) => {
                    for j in 0..text.len() {
                        if reachable[j] && text[j] == *expected {
                            next[j + 1] = true;
                        }
                    }
                }
                GlobToken::Any => {
                    for j in 0..text.len() {
                        if reachable[j] && text[j] != '/' {
                            next[j + 1] = true;
                        }
                    }
                }
                GlobToken::Star => {
                    for j in 0..=text.len() {
                        next[j] = reachable[j] || (j > 0 && next[j - 1] && text[j - 1] != '/');
                    }
                }
                GlobToken::Globstar => {
                    for j in 0..=text.len() {
                        next[j] = reachable[j] || (j > 0 && next[j - 1]);
                    }
                }
            }
            reachable = next;
        }

        reachable[text.len()]
    }
}
