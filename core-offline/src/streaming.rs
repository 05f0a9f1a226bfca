//! Read-through streaming cache
//!
//! Serves playback reads from the cache when possible and otherwise fetches
//! over HTTP, keeping a copy in the ephemeral partition. Streamed bytes are
//! never promoted to retained storage.

use bridge_traits::http::{HttpClient, HttpRequest};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::cache::CacheStore;
use crate::error::{OfflineError, Result};
use crate::network::ConnectivityMonitor;
use crate::types::ContentId;

const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(60);

pub struct StreamingCache {
    http: Arc<dyn HttpClient>,
    cache: Arc<CacheStore>,
    connectivity: Arc<ConnectivityMonitor>,
    timeout: Duration,
}

impl StreamingCache {
    pub fn new(
        http: Arc<dyn HttpClient>,
        cache: Arc<CacheStore>,
        connectivity: Arc<ConnectivityMonitor>,
    ) -> Self {
        Self {
            http,
            cache,
            connectivity,
            timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Bytes for `content_id`, from cache or from `source_uri`.
    ///
    /// A payload too large for the ephemeral partition is still returned,
    /// just not cached.
    #[instrument(skip(self))]
    pub async fn fetch(&self, content_id: &ContentId, source_uri: &str) -> Result<Bytes> {
        match self.cache.read(content_id).await {
            Ok(data) => {
                debug!("Streaming cache hit");
                return Ok(data);
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        if !self.connectivity.current().is_online() {
            return Err(OfflineError::NetworkUnavailable);
        }

        let response = self
            .http
            .execute(HttpRequest::get(source_uri).timeout(self.timeout))
            .await?;
        if !response.is_success() {
            return Err(OfflineError::TransferFailed(format!(
                "HTTP {} for {}",
                response.status, source_uri
            )));
        }

        match self.cache.write(content_id, response.body.clone()).await {
            Ok(_) => debug!(size = response.body.len(), "Cached streamed payload"),
            Err(OfflineError::CacheFull { required, capacity }) => {
                warn!(required, capacity, "Streamed payload too large to cache");
            }
            Err(e) => return Err(e),
        }

        Ok(response.body)
    }

    /// Drop the cached copy, if any.
    pub async fn invalidate(&self, content_id: &ContentId) -> Result<bool> {
        self.cache.remove(content_id).await
    }
}
