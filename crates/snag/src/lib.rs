// Library exports for the CLI, benchmarks and integration tests

// ===== Request model and matching =====
pub mod matcher;
pub mod request;

// ===== Rule registries and call tracking =====
pub mod callstack;
pub mod registry;

// ===== Interception =====
pub mod abort;
pub mod adapters;
pub mod pipeline;
pub mod session;
pub mod transport;

// ===== Configuration and errors =====
pub mod config;
pub mod error;

pub use abort::{AbortController, AbortSignal};
pub use adapters::{Fetch, FetchError, FetchRequest, FetchResponse, XhrFactory, XmlHttpRequest};
pub use callstack::{CallEntry, CallFilter, ResponseRecord};
pub use error::{ConfigError, InterceptError};
pub use matcher::{FieldPredicate, MatchCriteria, UrlMatcher};
pub use pipeline::{Outcome, Resolution, ResolutionHook};
pub use registry::{MockResponse, RuleId};
pub use request::{RequestSnapshot, ResourceType};
pub use session::Session;
pub use transport::{HttpTransport, Transport};
