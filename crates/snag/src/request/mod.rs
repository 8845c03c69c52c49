//! Request model shared by the matcher, registries and pipeline.
//!
//! - `snapshot` - `RequestSnapshot`, `ResourceType` and the lazy body parser
//! - `url` - page-relative URL resolution, origins and query parsing

mod snapshot;
mod url;

pub use snapshot::{LazyBody, RequestSnapshot, ResourceType};
pub use url::{parse_query_string, Origin, PageUrl};
