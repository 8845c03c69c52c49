use super::{BoxError, OutgoingRequest, RealResponse, Transport, TransportError};
use crate::config::TransportConfig;
use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use http_body_util::{BodyExt, Full};
use hyper::header::{HeaderName, HeaderValue};
use hyper::{Method, Request};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

type HttpsClient = Client<hyper_rustls::HttpsConnector<HttpConnector>, Full<Bytes>>;

/// HTTP/1.1 transport over a pooled hyper client, HTTPS through rustls with
/// the platform's native roots.
#[derive(Clone)]
pub struct HttpTransport {
    client: HttpsClient,
}

impl HttpTransport {
    pub fn new(config: &TransportConfig) -> Result<Self, TransportError> {
        let mut http_connector = HttpConnector::new();
        http_connector.set_keepalive(Some(Duration::from_secs(config.keepalive_timeout_secs)));
        http_connector.set_connect_timeout(Some(Duration::from_secs(config.connect_timeout_secs)));
        http_connector.enforce_http(false);

        let https_connector = hyper_rustls::HttpsConnectorBuilder::new()
            .with_provider_and_native_roots(rustls::crypto::ring::default_provider())
            .map_err(|e| TransportError::Setup(format!("native root certificates: {e}")))?
            .https_or_http()
            .enable_http1()
            .wrap_connector(http_connector);

        let client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(Duration::from_secs(config.idle_timeout_secs))
            .pool_max_idle_per_host(config.max_idle_per_host)
            .build(https_connector);

        info!(
            "HTTP transport ready: max_idle={}, idle_timeout={}s, connect_timeout={}s",
            config.max_idle_per_host, config.idle_timeout_secs, config.connect_timeout_secs
        );
        Ok(Self { client })
    }

    fn build_request(request: OutgoingRequest) -> Result<Request<Full<Bytes>>, TransportError> {
        let invalid = |e: &dyn std::fmt::Display| TransportError::InvalidRequest(e.to_string());
        let method = Method::from_bytes(request.method.to_ascii_uppercase().as_bytes())
            .map_err(|e| invalid(&e))?;
        let mut builder = Request::builder().method(method).uri(request.url.as_str());
        for (name, value) in &request.headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| invalid(&e))?;
            let value = HeaderValue::from_str(value).map_err(|e| invalid(&e))?;
            builder = builder.header(name, value);
        }
        builder
            .body(Full::new(request.body.unwrap_or_default()))
            .map_err(|e| invalid(&e))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: OutgoingRequest) -> Result<RealResponse, TransportError> {
        debug!(method = %request.method, url = %request.url, "sending request");
        let request = Self::build_request(request)?;
        let response = self
            .client
            .request(request)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        let (parts, body) = response.into_parts();
        let mut headers: HashMap<String, String> = HashMap::new();
        for (name, value) in parts.headers.iter() {
            let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
            headers
                .entry(name.as_str().to_string())
                .and_modify(|existing| {
                    existing.push_str(", ");
                    existing.push_str(&value);
                })
                .or_insert(value);
        }

        Ok(RealResponse {
            status: parts.status.as_u16(),
            status_text: parts.status.canonical_reason().unwrap_or("").to_string(),
            headers,
            body: Box::pin(TryStreamExt::map_err(
                body.into_data_stream(),
                |e| -> BoxError { Box::new(e) },
            )),
        })
    }
}
