//! Async mirror of the byte-reader collaborator boundary.

use super::ReadResponse;

#[cfg_attr(target_arch = "wasm32", async_trait::async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait::async_trait)]
pub trait AsyncByteReader: Send + Sync {
    async fn read(&self, key: &str) -> crate::Result<Option<ReadResponse>>;
}

/// Adapter exposing a blocking reader through the async trait.
pub struct BlockingReader<R>(pub R);

#[cfg_attr(target_arch = "wasm32", async_trait::async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait::async_trait)]
impl<R: super::ByteReader> AsyncByteReader for BlockingReader<R> {
    async fn read(&self, key: &str) -> crate::Result<Option<ReadResponse>> {
        self.0.read(key)
    }
}
