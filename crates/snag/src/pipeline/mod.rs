//! Interception pipeline.
//!
//! Drives one outgoing call from snapshot to completion:
//!
//! ```text
//! CREATED -> (THROTTLE_WAIT) -> RESOLVING -> REAL | MOCKED | PARTIALLY_MOCKED | BYPASSED
//!         -> COMPLETED | FAILED
//! ```
//!
//! - `hook` - `ResolutionHook` / `Resolution` traits and the registry-backed resolver
//! - `body` - `SharedBody`, the real body read once and handed to every reader

mod body;
mod hook;

pub use body::SharedBody;
pub use hook::{RegistryResolver, Resolution, ResolutionHook};

use crate::abort::AbortSignal;
use crate::callstack::{CallHandle, ResponseRecord};
use crate::error::{panic_message, InterceptError};
use crate::registry::MockResponse;
use crate::request::{RequestSnapshot, ResourceType};
use crate::session::SessionState;
use crate::transport::{OutgoingRequest, RealResponse, Transport};
use bytes::Bytes;
use chrono::Utc;
use futures::FutureExt;
use hyper::StatusCode;
use std::collections::HashMap;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, warn};

/// How the delivered response was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Real response, untouched
    Real,
    /// Body supplied by a mock, no real call
    Mocked,
    /// Status and headers laid over the real response
    PartiallyMocked,
    /// Real call made, mock body delivered
    Bypassed,
    /// Excluded by configuration, not recorded
    Untracked,
}

/// Response handed back to an adapter.
#[derive(Debug, Clone)]
pub struct Delivered {
    /// Call stack position, `None` for untracked calls
    pub sequence: Option<u64>,
    pub url: String,
    pub status_code: u16,
    pub status_text: String,
    pub headers: HashMap<String, String>,
    pub body: SharedBody,
    pub outcome: Outcome,
}

enum Plan {
    Replace { mock: MockResponse, body: String },
    Network(NetworkPlan),
}

/// Plans that need the real response.
enum NetworkPlan {
    Real,
    Overlay(MockResponse),
    Bypass { mock: MockResponse, body: String },
}

impl NetworkPlan {
    fn outcome(&self) -> Outcome {
        match self {
            NetworkPlan::Real => Outcome::Real,
            NetworkPlan::Overlay(_) => Outcome::PartiallyMocked,
            NetworkPlan::Bypass { .. } => Outcome::Bypassed,
        }
    }
}

/// Pipeline bound to one session and one transport.
pub struct Pipeline {
    state: Arc<SessionState>,
    transport: Arc<dyn Transport>,
}

impl Pipeline {
    pub(crate) fn new(state: Arc<SessionState>, transport: Arc<dyn Transport>) -> Self {
        Self { state, transport }
    }

    /// Run `request` through the pipeline.
    pub async fn execute(
        &self,
        mut request: OutgoingRequest,
        resource_type: ResourceType,
        signal: &AbortSignal,
    ) -> Result<Delivered, InterceptError> {
        let uri = self.state.page.resolve(&request.url)?;
        let snapshot = RequestSnapshot::capture(&self.state.page, &uri, &request, resource_type);
        request.url = snapshot.url.clone();

        if !self.tracks(&snapshot) {
            debug!(url = %snapshot.url, %resource_type, "untracked call, forwarding");
            return self.forward_untracked(request, signal).await;
        }

        let handle = self.state.call_stack.push(snapshot.clone());
        let result = self.run(handle, &snapshot, request, signal).await;
        if let Err(InterceptError::Cancelled) = &result {
            debug!(url = %snapshot.url, "call aborted");
            self.state.call_stack.cancel(handle);
        }
        result
    }

    fn tracks(&self, snapshot: &RequestSnapshot) -> bool {
        let config = &self.state.config;
        config.resource_types.accepts(snapshot.resource_type)
            && !(config.ignore_cross_domain && snapshot.cross_domain)
    }

    async fn forward_untracked(
        &self,
        request: OutgoingRequest,
        signal: &AbortSignal,
    ) -> Result<Delivered, InterceptError> {
        let url = request.url.clone();
        let real = cancellable(signal, self.transport.send(request))
            .await?
            .map_err(|e| InterceptError::Network(e.to_string()))?;
        Ok(Delivered {
            sequence: None,
            url,
            status_code: real.status,
            status_text: real.status_text,
            headers: real.headers,
            body: SharedBody::from_stream(real.body),
            outcome: Outcome::Untracked,
        })
    }

    async fn run(
        &self,
        handle: CallHandle,
        snapshot: &RequestSnapshot,
        request: OutgoingRequest,
        signal: &AbortSignal,
    ) -> Result<Delivered, InterceptError> {
        let state = &self.state;
        let sequence = Some(handle.sequence());

        let mut throttle_mock = None;
        if let Some(throttle) = state.throttles.consume_match(snapshot) {
            let delay_ms = throttle.payload.delay_ms;
            debug!(rule = %throttle.id, url = %snapshot.url, delay_ms, "throttling call");
            state.call_stack.record_delay(handle, delay_ms);
            cancellable(signal, tokio::time::sleep(throttle.payload.delay())).await?;
            throttle_mock = throttle.payload.mock;
        }

        let resolutions = self.resolve(snapshot, signal).await?;
        let mock = resolutions
            .iter()
            .find_map(|r| contained_mock(r.as_ref()))
            .or(throttle_mock);

        let plan = match mock {
            None => Plan::Network(NetworkPlan::Real),
            Some(mock) => match mock_body(&mock, snapshot) {
                Ok(None) => Plan::Network(NetworkPlan::Overlay(mock)),
                Ok(Some(body)) if mock.allow_network => Plan::Network(NetworkPlan::Bypass { mock, body }),
                Ok(Some(body)) => Plan::Replace { mock, body },
                Err(reason) if mock.allow_network => {
                    warn!(url = %snapshot.url, "mock body generator failed, using real response: {reason}");
                    Plan::Network(NetworkPlan::Real)
                }
                Err(reason) => {
                    let err = InterceptError::MockGeneration(reason);
                    warn!(url = %snapshot.url, "{err}");
                    notify_error(&resolutions, &err);
                    state.call_stack.fail(handle, err.to_string());
                    return Err(err);
                }
            },
        };

        let plan = match plan {
            Plan::Replace { mock, body } => {
                debug!(url = %snapshot.url, outcome = ?Outcome::Mocked, "call resolved");
                let record = mocked_record(&mock, body);
                if signal.aborted() {
                    return Err(InterceptError::Cancelled);
                }
                self.notify_done(&resolutions, None, signal).await?;
                state.call_stack.complete(handle, record.clone());
                return Ok(delivered(sequence, snapshot, record, Outcome::Mocked));
            }
            Plan::Network(plan) => plan,
        };
        let outcome = plan.outcome();
        debug!(url = %snapshot.url, ?outcome, "call resolved");

        let real = match cancellable(signal, self.transport.send(request)).await? {
            Ok(real) => real,
            Err(e) => {
                let err = InterceptError::Network(e.to_string());
                warn!(url = %snapshot.url, "{err}");
                notify_error(&resolutions, &err);
                state.call_stack.fail(handle, err.to_string());
                return Err(err);
            }
        };
        let RealResponse {
            status,
            status_text,
            headers,
            body,
        } = real;
        let real_body = SharedBody::from_stream(body);
        let real_bytes = cancellable(signal, real_body.bytes()).await?;

        let mut real_record = ResponseRecord {
            status_code: status,
            status_text,
            headers,
            body: String::new(),
            is_mock: false,
            ended_at: Utc::now(),
            status_code_origin: None,
            body_origin: None,
        };

        // `real_read` is false when the real body never arrived intact
        let (record, body, real_read) = match (plan, real_bytes) {
            (NetworkPlan::Bypass { mock, body }, Err(err)) => {
                warn!(url = %snapshot.url, "real body failed under network bypass: {err}");
                notify_error(&resolutions, &err);
                let record = bypassed_record(&real_record, &mock, body, None);
                let body = SharedBody::ready(record.body.clone());
                (record, body, false)
            }
            (plan, Err(err)) => {
                warn!(url = %snapshot.url, "{err}");
                notify_error(&resolutions, &err);
                state.call_stack.fail(handle, err.to_string());
                let head = match &plan {
                    NetworkPlan::Overlay(mock) => overlaid_record(&real_record, mock),
                    _ => real_record,
                };
                return Ok(Delivered {
                    sequence,
                    url: snapshot.url.clone(),
                    status_code: head.status_code,
                    status_text: head.status_text,
                    headers: head.headers,
                    body: real_body,
                    outcome,
                });
            }
            (plan, Ok(bytes)) => {
                real_record.body = String::from_utf8_lossy(&bytes).into_owned();
                match plan {
                    NetworkPlan::Real => (real_record.clone(), real_body, true),
                    NetworkPlan::Overlay(mock) => (overlaid_record(&real_record, &mock), real_body, true),
                    NetworkPlan::Bypass { mock, body } => {
                        let origin = Some(real_record.body.clone());
                        let record = bypassed_record(&real_record, &mock, body, origin);
                        let body = SharedBody::ready(record.body.clone());
                        (record, body, true)
                    }
                }
            }
        };

        if signal.aborted() {
            return Err(InterceptError::Cancelled);
        }
        if real_read {
            self.notify_done(&resolutions, Some(&real_record), signal).await?;
        }
        state.call_stack.complete(handle, record.clone());

        Ok(Delivered {
            sequence,
            url: snapshot.url.clone(),
            status_code: record.status_code,
            status_text: record.status_text,
            headers: record.headers,
            body,
            outcome,
        })
    }

    /// Consult the registry first, then the external hook.
    async fn resolve(
        &self,
        snapshot: &RequestSnapshot,
        signal: &AbortSignal,
    ) -> Result<Vec<Box<dyn Resolution>>, InterceptError> {
        let external = self.state.hook.read().clone();
        let mut hooks = vec![Arc::clone(&self.state.resolver)];
        hooks.extend(external);

        let mut resolutions = Vec::with_capacity(hooks.len());
        for hook in hooks {
            let resolved = cancellable(signal, AssertUnwindSafe(hook.resolve(snapshot)).catch_unwind()).await?;
            match resolved {
                Ok(Ok(Some(resolution))) => resolutions.push(resolution),
                Ok(Ok(None)) => {}
                Ok(Err(e)) => {
                    let err = InterceptError::Hook(format!("{e:#}"));
                    warn!(url = %snapshot.url, "{err}, continuing without it");
                }
                Err(payload) => {
                    let err = InterceptError::Hook(panic_message(payload));
                    warn!(url = %snapshot.url, "{err}, continuing without it");
                }
            }
        }
        Ok(resolutions)
    }

    async fn notify_done(
        &self,
        resolutions: &[Box<dyn Resolution>],
        real: Option<&ResponseRecord>,
        signal: &AbortSignal,
    ) -> Result<(), InterceptError> {
        for resolution in resolutions {
            match cancellable(signal, AssertUnwindSafe(resolution.done(real)).catch_unwind()).await? {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("resolution done callback failed: {e:#}"),
                Err(payload) => warn!("resolution done callback panicked: {}", panic_message(payload)),
            }
        }
        Ok(())
    }
}

/// Await `fut` unless `signal` fires first.
async fn cancellable<F: Future>(signal: &AbortSignal, fut: F) -> Result<F::Output, InterceptError> {
    tokio::select! {
        biased;
        _ = signal.fired() => Err(InterceptError::Cancelled),
        out = fut => Ok(out),
    }
}

fn contained_mock(resolution: &dyn Resolution) -> Option<MockResponse> {
    match catch_unwind(AssertUnwindSafe(|| resolution.mock())) {
        Ok(mock) => mock,
        Err(payload) => {
            warn!("resolution mock accessor panicked: {}", panic_message(payload));
            None
        }
    }
}

fn notify_error(resolutions: &[Box<dyn Resolution>], err: &InterceptError) {
    for resolution in resolutions {
        match catch_unwind(AssertUnwindSafe(|| resolution.error(err))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!("resolution error callback failed: {e:#}"),
            Err(payload) => debug!("resolution error callback panicked: {}", panic_message(payload)),
        }
    }
}

/// Literal body, else generated body, else `None` for a partial mock.
fn mock_body(mock: &MockResponse, snapshot: &RequestSnapshot) -> Result<Option<String>, String> {
    if let Some(body) = &mock.body {
        return Ok(Some(body.clone()));
    }
    let Some(generator) = &mock.generator else {
        return Ok(None);
    };
    let lazy = snapshot.lazy_body();
    match catch_unwind(AssertUnwindSafe(|| generator(snapshot, &lazy))) {
        Ok(Ok(body)) => Ok(Some(body)),
        Ok(Err(e)) => Err(format!("{e:#}")),
        Err(payload) => Err(panic_message(payload)),
    }
}

fn reason_phrase(status_code: u16) -> String {
    StatusCode::from_u16(status_code)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("")
        .to_string()
}

fn default_content_type(body: &str) -> &'static str {
    if serde_json::from_str::<serde_json::Value>(body).is_ok() {
        "application/json"
    } else {
        "text/plain; charset=utf-8"
    }
}

fn merge_headers(base: &mut HashMap<String, String>, overlay: &HashMap<String, String>) {
    for (name, value) in overlay {
        base.insert(name.to_ascii_lowercase(), value.clone());
    }
}

fn mocked_record(mock: &MockResponse, body: String) -> ResponseRecord {
    let status_code = mock.status_code.unwrap_or(200);
    let mut headers = HashMap::new();
    merge_headers(&mut headers, &mock.headers);
    headers
        .entry("content-type".to_string())
        .or_insert_with(|| default_content_type(&body).to_string());
    ResponseRecord {
        status_code,
        status_text: mock
            .status_text
            .clone()
            .unwrap_or_else(|| reason_phrase(status_code)),
        headers,
        body,
        is_mock: true,
        ended_at: Utc::now(),
        status_code_origin: None,
        body_origin: None,
    }
}

fn overlaid_record(real: &ResponseRecord, mock: &MockResponse) -> ResponseRecord {
    let status_code = mock.status_code.unwrap_or(real.status_code);
    let status_text = match (&mock.status_text, mock.status_code) {
        (Some(text), _) => text.clone(),
        (None, Some(code)) if code != real.status_code => reason_phrase(code),
        _ => real.status_text.clone(),
    };
    let mut headers = real.headers.clone();
    merge_headers(&mut headers, &mock.headers);
    ResponseRecord {
        status_code,
        status_text,
        headers,
        body: real.body.clone(),
        is_mock: true,
        ended_at: Utc::now(),
        status_code_origin: Some(real.status_code),
        body_origin: Some(real.body.clone()),
    }
}

fn bypassed_record(
    real: &ResponseRecord,
    mock: &MockResponse,
    body: String,
    body_origin: Option<String>,
) -> ResponseRecord {
    let mut record = overlaid_record(real, mock);
    if !mock.headers.keys().any(|k| k.eq_ignore_ascii_case("content-type")) {
        record
            .headers
            .insert("content-type".to_string(), default_content_type(&body).to_string());
    }
    record.body = body;
    record.body_origin = body_origin;
    record
}

fn delivered(
    sequence: Option<u64>,
    snapshot: &RequestSnapshot,
    record: ResponseRecord,
    outcome: Outcome,
) -> Delivered {
    Delivered {
        sequence,
        url: snapshot.url.clone(),
        status_code: record.status_code,
        status_text: record.status_text,
        headers: record.headers,
        body: SharedBody::ready(Bytes::from(record.body)),
        outcome,
    }
}
