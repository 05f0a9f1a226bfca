//! Transfer worker
//!
//! One worker streams one source URI into its staging file and reports what
//! happened as [`TransferEvent`]s on a channel owned by the orchestrator. The
//! worker never touches task state itself.
//!
//! Resumption uses a ranged request starting at the staged length. A server
//! that answers with a full body instead of `206 Partial Content` causes an
//! explicit restart from zero, reported as [`TransferEvent::Restarted`].
//! A staging file that already holds the whole resource completes without
//! another request, and so does a `416` whose reported length matches it.

use bridge_traits::http::{HttpClient, HttpRequest};
use bridge_traits::storage::FileSystemAccess;
use bytes::Bytes;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{OfflineError, Result};
use crate::storage_guard::StorageGuard;
use crate::types::ContentId;

const CHUNK_SIZE: usize = 64 * 1024;
const MAX_PROGRESS_STEP: u64 = 512 * 1024;

#[derive(Debug)]
pub(crate) enum TransferEvent {
    Progress {
        bytes_transferred: u64,
        total_bytes: Option<u64>,
    },
    Restarted {
        discarded_bytes: u64,
    },
    Completed {
        bytes_transferred: u64,
    },
    Failed(OfflineError),
    /// Stopped through the cancellation token (pause or cancel).
    Interrupted,
}

#[derive(Debug)]
pub(crate) struct TransferMessage {
    pub content_id: ContentId,
    /// Identifies the worker; messages from superseded workers are ignored.
    pub generation: u64,
    pub event: TransferEvent,
}

pub(crate) struct Transfer {
    pub http: Arc<dyn HttpClient>,
    pub fs: Arc<dyn FileSystemAccess>,
    pub guard: Arc<StorageGuard>,
    pub stall_timeout: Duration,
    pub content_id: ContentId,
    pub source_uri: String,
    pub staging: PathBuf,
    /// Resource length learned by an earlier worker for this task.
    pub known_total: Option<u64>,
    pub generation: u64,
    pub token: CancellationToken,
    /// Worker that previously wrote this staging file, if any.
    pub previous: Option<JoinHandle<()>>,
    pub events: mpsc::UnboundedSender<TransferMessage>,
}

impl Transfer {
    pub(crate) async fn run(mut self) {
        if let Some(previous) = self.previous.take() {
            let _ = previous.await;
        }

        let event = match self.stream_to_staging().await {
            Ok(bytes_transferred) => TransferEvent::Completed { bytes_transferred },
            Err(OfflineError::Cancelled) => {
                debug!(content_id = %self.content_id, "Transfer interrupted");
                TransferEvent::Interrupted
            }
            Err(e) => {
                warn!(content_id = %self.content_id, error = %e, "Transfer failed");
                TransferEvent::Failed(e)
            }
        };
        self.send(event);
    }

    fn send(&self, event: TransferEvent) {
        let _ = self.events.send(TransferMessage {
            content_id: self.content_id.clone(),
            generation: self.generation,
            event,
        });
    }

    async fn staged_bytes(&self) -> Result<u64> {
        if self.fs.exists(&self.staging).await? {
            Ok(self.fs.metadata(&self.staging).await?.size)
        } else {
            Ok(0)
        }
    }

    /// Report a staging file that needs no further bytes.
    fn already_staged(&self, staged: u64) -> Result<u64> {
        debug!(
            content_id = %self.content_id,
            bytes = staged,
            "Staging file already holds the whole payload"
        );
        self.send(TransferEvent::Progress {
            bytes_transferred: staged,
            total_bytes: Some(staged),
        });
        Ok(staged)
    }

    async fn stream_to_staging(&self) -> Result<u64> {
        let staged = self.staged_bytes().await?;
        if staged > 0 && self.known_total == Some(staged) {
            return self.already_staged(staged);
        }
        let request = HttpRequest::get(self.source_uri.clone()).range_from(staged);

        let stream = tokio::select! {
            biased;
            _ = self.token.cancelled() => return Err(OfflineError::Cancelled),
            response = tokio::time::timeout(self.stall_timeout, self.http.download_stream(request)) => {
                response.map_err(|_| {
                    OfflineError::TransferFailed(format!(
                        "no response within {:?}",
                        self.stall_timeout
                    ))
                })??
            }
        };

        if stream.is_range_not_satisfiable() {
            if staged > 0 && stream.unsatisfied_length() == Some(staged) {
                return self.already_staged(staged);
            }
            // Staged bytes do not line up with the resource; start over.
            self.fs.write_file(&self.staging, Bytes::new()).await?;
            return Err(OfflineError::TransferFailed(format!(
                "range from byte {} not satisfiable for {}",
                staged, self.source_uri
            )));
        }

        if !(200..300).contains(&stream.status) {
            return Err(OfflineError::TransferFailed(format!(
                "HTTP {} for {}",
                stream.status, self.source_uri
            )));
        }

        if stream.is_partial() {
            if let Some(range) = stream.content_range() {
                if range.start != staged {
                    self.fs.write_file(&self.staging, Bytes::new()).await?;
                    return Err(OfflineError::TransferFailed(format!(
                        "server resumed at byte {} instead of {}",
                        range.start, staged
                    )));
                }
            }
        }

        let offset = if stream.is_partial() {
            staged
        } else {
            if staged > 0 {
                warn!(
                    content_id = %self.content_id,
                    discarded_bytes = staged,
                    status = stream.status,
                    "Server ignored range request, restarting from zero"
                );
                self.send(TransferEvent::Restarted {
                    discarded_bytes: staged,
                });
            }
            self.fs.write_file(&self.staging, Bytes::new()).await?;
            0
        };

        let total = stream.total_size();
        info!(
            content_id = %self.content_id,
            offset,
            total_bytes = ?total,
            "Transfer started"
        );
        self.send(TransferEvent::Progress {
            bytes_transferred: offset,
            total_bytes: total,
        });

        if let Some(total) = total {
            self.guard.check(Some(total.saturating_sub(offset))).await?;
        }

        let mut body = stream.body;
        let mut writer = self.fs.open_append_stream(&self.staging).await?;
        let mut buffer = vec![0u8; CHUNK_SIZE];
        let step = total
            .map(|t| (t / 100).clamp(1, MAX_PROGRESS_STEP))
            .unwrap_or(MAX_PROGRESS_STEP);
        let mut written = offset;
        let mut reported = offset;

        loop {
            let read = tokio::select! {
                biased;
                _ = self.token.cancelled() => {
                    writer.shutdown().await?;
                    return Err(OfflineError::Cancelled);
                }
                read = tokio::time::timeout(self.stall_timeout, body.read(&mut buffer)) => read,
            };

            let n = match read {
                Ok(Ok(n)) => n,
                Ok(Err(e)) => {
                    writer.shutdown().await?;
                    return Err(OfflineError::TransferFailed(format!("read failed: {}", e)));
                }
                Err(_) => {
                    writer.shutdown().await?;
                    return Err(OfflineError::TransferFailed(format!(
                        "stalled for {:?} at byte {}",
                        self.stall_timeout, written
                    )));
                }
            };
            if n == 0 {
                break;
            }

            writer.write_all(&buffer[..n]).await?;
            writer.flush().await?;
            written += n as u64;

            if written - reported >= step {
                self.send(TransferEvent::Progress {
                    bytes_transferred: written,
                    total_bytes: total,
                });
                reported = written;
            }
        }
        writer.shutdown().await?;

        if let Some(total) = total {
            if written != total {
                return Err(OfflineError::TransferFailed(format!(
                    "body ended at byte {} of {}",
                    written, total
                )));
            }
        }
        if reported != written {
            self.send(TransferEvent::Progress {
                bytes_transferred: written,
                total_bytes: total,
            });
        }

        debug!(content_id = %self.content_id, bytes = written, "Transfer body complete");
        Ok(written)
    }
}
