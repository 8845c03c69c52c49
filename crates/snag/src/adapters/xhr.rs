use super::events::{EventEmitter, Listener, ListenerId, XhrEvent, XhrEventKind};
use crate::abort::AbortController;
use crate::error::InterceptError;
use crate::pipeline::Pipeline;
use crate::request::ResourceType;
use crate::transport::OutgoingRequest;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ReadyState {
    Unsent = 0,
    Opened = 1,
    HeadersReceived = 2,
    Loading = 3,
    Done = 4,
}

#[derive(Debug, Error)]
pub enum XhrError {
    #[error("InvalidStateError: {0}")]
    InvalidState(&'static str),
    #[error("NetworkError: {0}")]
    Network(#[source] InterceptError),
    #[error("response body could not be read: {0}")]
    Stream(#[source] InterceptError),
    #[error("send() requires a running tokio runtime")]
    NoRuntime,
}

/// Creates request objects bound to the session's pipeline.
#[derive(Clone)]
pub struct XhrFactory {
    pipeline: Arc<Pipeline>,
}

impl XhrFactory {
    pub(crate) fn new(pipeline: Arc<Pipeline>) -> Self {
        Self { pipeline }
    }

    pub fn create(&self) -> XmlHttpRequest {
        XmlHttpRequest::new(Arc::clone(&self.pipeline))
    }

    pub fn same_pipeline(&self, other: &XhrFactory) -> bool {
        Arc::ptr_eq(&self.pipeline, &other.pipeline)
    }
}

enum Body {
    Text(String),
    Failed(InterceptError),
}

struct XhrState {
    ready_state: ReadyState,
    method: String,
    url: String,
    headers: Vec<(String, String)>,
    sent: bool,
    /// Set once load, error or abort has been chosen for this send.
    terminal: bool,
    status: u16,
    status_text: String,
    response_headers: HashMap<String, String>,
    body: Option<Body>,
    controller: AbortController,
}

impl XhrState {
    fn new() -> Self {
        Self {
            ready_state: ReadyState::Unsent,
            method: String::new(),
            url: String::new(),
            headers: Vec::new(),
            sent: false,
            terminal: false,
            status: 0,
            status_text: String::new(),
            response_headers: HashMap::new(),
            body: None,
            controller: AbortController::new(),
        }
    }

    fn in_flight(&self) -> bool {
        self.sent && !self.terminal
    }
}

struct XhrInner {
    pipeline: Arc<Pipeline>,
    state: Mutex<XhrState>,
    events: EventEmitter,
    settled: watch::Sender<bool>,
}

/// Legacy request object. Clones share the same request.
#[derive(Clone)]
pub struct XmlHttpRequest {
    inner: Arc<XhrInner>,
}

impl XmlHttpRequest {
    fn new(pipeline: Arc<Pipeline>) -> Self {
        let (settled, _) = watch::channel(false);
        Self {
            inner: Arc::new(XhrInner {
                pipeline,
                state: Mutex::new(XhrState::new()),
                events: EventEmitter::new(),
                settled,
            }),
        }
    }

    pub fn open(&self, method: &str, url: &str) -> Result<(), XhrError> {
        {
            let mut state = self.inner.state.lock();
            if state.in_flight() {
                return Err(XhrError::InvalidState("open() while a request is in flight"));
            }
            *state = XhrState::new();
            state.method = method.to_ascii_uppercase();
            state.url = url.to_string();
            state.ready_state = ReadyState::Opened;
        }
        self.inner.settled.send_replace(false);
        self.emit(XhrEventKind::ReadyStateChange);
        Ok(())
    }

    pub fn set_request_header(&self, name: &str, value: &str) -> Result<(), XhrError> {
        let mut state = self.inner.state.lock();
        if state.ready_state != ReadyState::Opened || state.sent {
            return Err(XhrError::InvalidState("set_request_header() requires OPENED before send()"));
        }
        state.headers.push((name.to_string(), value.to_string()));
        Ok(())
    }

    /// Start the request on the current tokio runtime.
    pub fn send(&self, body: Option<Bytes>) -> Result<(), XhrError> {
        let runtime = Handle::try_current().map_err(|_| XhrError::NoRuntime)?;
        let (request, signal) = {
            let mut state = self.inner.state.lock();
            if state.ready_state != ReadyState::Opened || state.sent {
                return Err(XhrError::InvalidState("send() requires OPENED and not yet sent"));
            }
            state.sent = true;
            let request = OutgoingRequest {
                method: state.method.clone(),
                url: state.url.clone(),
                headers: state.headers.clone(),
                body,
            };
            (request, state.controller.signal())
        };
        self.emit(XhrEventKind::LoadStart);

        let xhr = self.clone();
        runtime.spawn(async move {
            let url = request.url.clone();
            let result = xhr
                .inner
                .pipeline
                .execute(request, ResourceType::Xhr, &signal)
                .await;
            match result {
                Ok(delivered) => {
                    let body = match delivered.body.text().await {
                        Ok(text) => Body::Text(text),
                        Err(e) => Body::Failed(e),
                    };
                    xhr.finish(delivered.status_code, delivered.status_text, delivered.headers, body);
                }
                Err(InterceptError::Cancelled) => {
                    debug!(%url, "xhr pipeline observed abort");
                }
                Err(e) => xhr.finish(0, String::new(), HashMap::new(), Body::Failed(e)),
            }
        });
        Ok(())
    }

    fn finish(&self, status: u16, status_text: String, headers: HashMap<String, String>, body: Body) {
        let terminal = {
            let mut state = self.inner.state.lock();
            if state.terminal {
                return;
            }
            state.terminal = true;
            state.ready_state = ReadyState::Done;
            state.status = status;
            state.status_text = status_text;
            state.response_headers = headers;
            let terminal = match &body {
                Body::Text(_) => XhrEventKind::Load,
                Body::Failed(_) => XhrEventKind::Error,
            };
            state.body = Some(body);
            terminal
        };
        self.emit(XhrEventKind::ReadyStateChange);
        self.emit(terminal);
        self.emit(XhrEventKind::LoadEnd);
        self.inner.settled.send_replace(true);
    }

    /// Cancel an in-flight request. Emits `abort`, never `error`.
    pub fn abort(&self) {
        {
            let mut state = self.inner.state.lock();
            if !state.in_flight() {
                return;
            }
            state.terminal = true;
            state.ready_state = ReadyState::Done;
            state.status = 0;
            state.controller.abort();
        }
        self.emit(XhrEventKind::ReadyStateChange);
        self.emit(XhrEventKind::Abort);
        self.emit(XhrEventKind::LoadEnd);
        self.inner.settled.send_replace(true);
    }

    /// Resolves once the current request reaches DONE.
    pub async fn settled(&self) {
        let mut rx = self.inner.settled.subscribe();
        let _ = rx.wait_for(|done| *done).await;
    }

    pub fn ready_state(&self) -> ReadyState {
        self.inner.state.lock().ready_state
    }

    pub fn status(&self) -> u16 {
        self.inner.state.lock().status
    }

    pub fn status_text(&self) -> String {
        self.inner.state.lock().status_text.clone()
    }

    /// Response body text. Fails before DONE and when the body could not
    /// be read.
    pub fn response_text(&self) -> Result<String, XhrError> {
        let state = self.inner.state.lock();
        if state.ready_state != ReadyState::Done {
            return Err(XhrError::InvalidState("response is not available before DONE"));
        }
        match &state.body {
            Some(Body::Text(text)) => Ok(text.clone()),
            Some(Body::Failed(e @ InterceptError::Stream(_))) => Err(XhrError::Stream(e.clone())),
            Some(Body::Failed(e)) => Err(XhrError::Network(e.clone())),
            None => Ok(String::new()),
        }
    }

    pub fn response_header(&self, name: &str) -> Option<String> {
        self.inner
            .state
            .lock()
            .response_headers
            .get(&name.to_ascii_lowercase())
            .cloned()
    }

    /// `name: value` lines, sorted by name, CRLF-terminated.
    pub fn all_response_headers(&self) -> String {
        let state = self.inner.state.lock();
        let mut names: Vec<_> = state.response_headers.keys().collect();
        names.sort();
        names
            .into_iter()
            .map(|name| format!("{name}: {}\r\n", state.response_headers[name]))
            .collect()
    }

    /// Assign or clear the `on<kind>` handler property.
    pub fn set_handler<F>(&self, kind: XhrEventKind, handler: Option<F>)
    where
        F: Fn(&XhrEvent) + Send + Sync + 'static,
    {
        let handler = handler.map(|h| Arc::new(h) as Listener);
        self.inner.events.set_handler(kind, handler);
    }

    pub fn set_onload<F: Fn(&XhrEvent) + Send + Sync + 'static>(&self, handler: F) {
        self.set_handler(XhrEventKind::Load, Some(handler));
    }

    pub fn set_onerror<F: Fn(&XhrEvent) + Send + Sync + 'static>(&self, handler: F) {
        self.set_handler(XhrEventKind::Error, Some(handler));
    }

    pub fn set_onabort<F: Fn(&XhrEvent) + Send + Sync + 'static>(&self, handler: F) {
        self.set_handler(XhrEventKind::Abort, Some(handler));
    }

    pub fn set_onloadend<F: Fn(&XhrEvent) + Send + Sync + 'static>(&self, handler: F) {
        self.set_handler(XhrEventKind::LoadEnd, Some(handler));
    }

    pub fn set_onreadystatechange<F: Fn(&XhrEvent) + Send + Sync + 'static>(&self, handler: F) {
        self.set_handler(XhrEventKind::ReadyStateChange, Some(handler));
    }

    pub fn add_event_listener<F>(&self, kind: XhrEventKind, listener: F) -> ListenerId
    where
        F: Fn(&XhrEvent) + Send + Sync + 'static,
    {
        self.inner.events.add_listener(kind, Arc::new(listener))
    }

    pub fn remove_event_listener(&self, id: ListenerId) -> bool {
        self.inner.events.remove_listener(id)
    }

    fn emit(&self, kind: XhrEventKind) {
        let event = {
            let state = self.inner.state.lock();
            XhrEvent {
                kind,
                ready_state: state.ready_state,
                status: state.status,
            }
        };
        self.inner.events.emit(&event);
    }
}
