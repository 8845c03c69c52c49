//! Request APIs driven through the interception pipeline.
//!
//! - `fetch` - promise-style API: one call, one result
//! - `xhr` - legacy request object with ready states and events
//! - `events` - event emitter behind both XHR event surfaces

mod events;
mod fetch;
mod xhr;

pub use events::{EventEmitter, Listener, ListenerId, XhrEvent, XhrEventKind};
pub use fetch::{Fetch, FetchError, FetchRequest, FetchResponse};
pub use xhr::{ReadyState, XhrError, XhrFactory, XmlHttpRequest};
