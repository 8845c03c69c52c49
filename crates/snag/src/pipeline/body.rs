//! Response body read once and shared between the pipeline and the caller.

use crate::error::InterceptError;
use crate::transport::{BodyStream, BoxError};
use bytes::{Bytes, BytesMut};
use futures::future::{BoxFuture, Shared};
use futures::{FutureExt, TryStreamExt};
use std::fmt;

/// Buffered body handle. Every clone observes the same bytes, or the same
/// read failure.
#[derive(Clone)]
pub struct SharedBody {
    inner: Shared<BoxFuture<'static, Result<Bytes, InterceptError>>>,
}

impl SharedBody {
    pub fn from_stream(stream: BodyStream) -> Self {
        let read = async move {
            stream
                .try_fold(BytesMut::new(), |mut buf, chunk| async move {
                    buf.extend_from_slice(&chunk);
                    Ok::<_, BoxError>(buf)
                })
                .await
                .map(BytesMut::freeze)
                .map_err(|e| InterceptError::Stream(e.to_string()))
        };
        Self {
            inner: read.boxed().shared(),
        }
    }

    pub fn ready(bytes: impl Into<Bytes>) -> Self {
        let bytes = bytes.into();
        Self {
            inner: futures::future::ready(Ok(bytes)).boxed().shared(),
        }
    }

    /// Wait for the full body.
    pub async fn bytes(&self) -> Result<Bytes, InterceptError> {
        self.inner.clone().await
    }

    pub async fn text(&self) -> Result<String, InterceptError> {
        let bytes = self.bytes().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

impl fmt::Debug for SharedBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedBody")
            .field("ready", &self.inner.peek().is_some())
            .finish()
    }
}
