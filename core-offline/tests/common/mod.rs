//! Shared fixtures for the offline engine integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use bridge_desktop::{SqliteSettingsStore, TokioFileSystem};
use bridge_traits::error::{BridgeError, Result as BridgeResult};
use bridge_traits::http::{DownloadStream, HttpClient, HttpRequest, HttpResponse};
use bridge_traits::storage::{StorageInfo, StorageSpace};
use bridge_traits::time::SystemClock;
use core_offline::{
    CacheConfig, CacheStore, ConnectivityMonitor, ConnectivityState, ContentId,
    DownloadOrchestrator, DownloadPreferences, DownloadRegistry, DownloadState, OfflineConfig,
    OrchestratorParts, WatchHistory,
};
use core_runtime::events::{CoreEvent, DownloadEvent, EventBus, Receiver};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::DuplexStream;

// ============================================================================
// Fake HTTP origin
// ============================================================================

enum Route {
    Static(Vec<u8>),
    /// Body is fed by the test through the other half of a duplex pipe.
    Gated {
        len: u64,
        reader: Option<DuplexStream>,
    },
    /// Every request gets a body that never ends.
    Stalled {
        len: u64,
        writers: Vec<DuplexStream>,
    },
}

impl Route {
    fn len(&self) -> u64 {
        match self {
            Route::Static(data) => data.len() as u64,
            Route::Gated { len, .. } | Route::Stalled { len, .. } => *len,
        }
    }
}

#[derive(Default)]
pub struct FakeHttp {
    routes: Mutex<HashMap<String, Route>>,
    failures: Mutex<HashMap<String, u32>>,
    requests: Mutex<Vec<(String, Option<u64>)>>,
}

impl FakeHttp {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Serve `data` at `uri`, honouring range requests.
    pub fn serve(&self, uri: &str, data: Vec<u8>) {
        self.routes.lock().insert(uri.to_string(), Route::Static(data));
    }

    /// Serve a body of `len` bytes that the caller writes by hand.
    pub fn serve_gated(&self, uri: &str, len: u64) -> DuplexStream {
        let (writer, reader) = tokio::io::duplex(64 * 1024);
        self.routes.lock().insert(
            uri.to_string(),
            Route::Gated {
                len,
                reader: Some(reader),
            },
        );
        writer
    }

    /// Serve `len` bytes that never arrive, however often it is requested.
    pub fn serve_stalled(&self, uri: &str, len: u64) {
        self.routes.lock().insert(
            uri.to_string(),
            Route::Stalled {
                len,
                writers: Vec::new(),
            },
        );
    }

    /// Make the next `times` stream requests for `uri` fail transiently.
    pub fn fail_times(&self, uri: &str, times: u32) {
        self.failures.lock().insert(uri.to_string(), times);
    }

    /// `(uri, range start)` of every stream request so far.
    pub fn requests(&self) -> Vec<(String, Option<u64>)> {
        self.requests.lock().clone()
    }

    pub fn request_count(&self, uri: &str) -> usize {
        self.requests.lock().iter().filter(|(u, _)| u == uri).count()
    }
}

#[async_trait]
impl HttpClient for FakeHttp {
    async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse> {
        match self.routes.lock().get(&request.url) {
            Some(Route::Static(data)) => Ok(HttpResponse {
                status: 200,
                headers: HashMap::new(),
                body: data.clone().into(),
            }),
            _ => Err(BridgeError::NotAvailable(format!("no route for {}", request.url))),
        }
    }

    async fn download_stream(&self, request: HttpRequest) -> BridgeResult<DownloadStream> {
        let start = request.range_start();
        self.requests.lock().push((request.url.clone(), start));

        if let Some(remaining) = self.failures.lock().get_mut(&request.url) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(BridgeError::OperationFailed(format!(
                    "HTTP 503 for {}",
                    request.url
                )));
            }
        }

        let mut routes = self.routes.lock();
        let mut headers = HashMap::new();

        // Like real origins, a range starting at or past the end is refused.
        if let (Some(route), Some(start)) = (routes.get(&request.url), start) {
            if start >= route.len() {
                headers.insert("Content-Range".to_string(), format!("bytes */{}", route.len()));
                return Ok(DownloadStream {
                    status: 416,
                    headers,
                    body: Box::new(tokio::io::empty()),
                });
            }
        }

        match routes.get_mut(&request.url) {
            Some(Route::Static(data)) => {
                let len = data.len() as u64;
                match start {
                    Some(start) => {
                        headers.insert(
                            "Content-Range".to_string(),
                            format!("bytes {}-{}/{}", start, len - 1, len),
                        );
                        headers.insert("Content-Length".to_string(), (len - start).to_string());
                        Ok(DownloadStream {
                            status: 206,
                            headers,
                            body: Box::new(std::io::Cursor::new(data[start as usize..].to_vec())),
                        })
                    }
                    None => {
                        headers.insert("Content-Length".to_string(), len.to_string());
                        Ok(DownloadStream {
                            status: 200,
                            headers,
                            body: Box::new(std::io::Cursor::new(data.clone())),
                        })
                    }
                }
            }
            Some(Route::Gated { len, reader }) => {
                let reader = reader.take().ok_or_else(|| {
                    BridgeError::NotAvailable(format!("gate for {} already opened", request.url))
                })?;
                headers.insert("Content-Length".to_string(), len.to_string());
                Ok(DownloadStream {
                    status: 200,
                    headers,
                    body: Box::new(reader),
                })
            }
            Some(Route::Stalled { len, writers }) => {
                let (writer, reader) = tokio::io::duplex(1024);
                writers.push(writer);
                headers.insert("Content-Length".to_string(), len.to_string());
                Ok(DownloadStream {
                    status: 200,
                    headers,
                    body: Box::new(reader),
                })
            }
            None => Err(BridgeError::NotAvailable(format!(
                "HTTP 404 for {}",
                request.url
            ))),
        }
    }
}

// ============================================================================
// Fake volume
// ============================================================================

pub struct FakeStorage {
    available: AtomicU64,
}

impl FakeStorage {
    pub fn new(available: u64) -> Arc<Self> {
        Arc::new(Self {
            available: AtomicU64::new(available),
        })
    }

    pub fn set_available(&self, bytes: u64) {
        self.available.store(bytes, Ordering::SeqCst);
    }
}

#[async_trait]
impl StorageInfo for FakeStorage {
    async fn storage_space(&self, _path: &Path) -> BridgeResult<StorageSpace> {
        Ok(StorageSpace {
            total_bytes: 1 << 40,
            available_bytes: self.available.load(Ordering::SeqCst),
        })
    }
}

// ============================================================================
// Fixture
// ============================================================================

/// State that survives an orchestrator restart.
pub struct Fixture {
    pub dir: TempDir,
    pub http: Arc<FakeHttp>,
    pub storage: Arc<FakeStorage>,
    pub settings: Arc<SqliteSettingsStore>,
}

/// One running orchestrator plus the collaborators tests poke at.
pub struct Running {
    pub orchestrator: DownloadOrchestrator,
    pub connectivity: Arc<ConnectivityMonitor>,
    pub registry: Arc<DownloadRegistry>,
    pub cache: Arc<CacheStore>,
    pub events: EventBus,
    /// Subscribed before start, so startup events are included.
    pub trace: Receiver<CoreEvent>,
    pub log: Vec<CoreEvent>,
}

impl Fixture {
    pub async fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
            http: FakeHttp::new(),
            storage: FakeStorage::new(1 << 30),
            settings: Arc::new(SqliteSettingsStore::in_memory().await.unwrap()),
        }
    }

    pub fn media_dir(&self) -> std::path::PathBuf {
        self.dir.path().join("media")
    }

    pub fn config(&self) -> OfflineConfig {
        OfflineConfig::new()
            .with_retry_backoff(vec![Duration::from_millis(10)])
            .with_download_timeout(Duration::from_secs(5))
            .with_unknown_size_estimate(1024)
            .with_space_recheck_interval(Duration::from_millis(20))
            .with_cache(
                CacheConfig::new()
                    .with_cache_directory(self.media_dir())
                    .with_max_size(1 << 20)
                    .with_max_ephemeral_size(1 << 18),
            )
    }

    pub async fn start(&self, state: ConnectivityState) -> Running {
        self.start_with(state, self.config()).await
    }

    pub async fn start_with(&self, state: ConnectivityState, config: OfflineConfig) -> Running {
        let events = EventBus::new(4096);
        let trace = events.subscribe();
        let clock = Arc::new(SystemClock);
        let fs = Arc::new(TokioFileSystem::at(self.dir.path().to_path_buf()));

        let connectivity = Arc::new(ConnectivityMonitor::new(state).with_event_bus(events.clone()));
        let registry = Arc::new(
            DownloadRegistry::open(&self.dir.path().join("registry.db"), clock.clone())
                .await
                .unwrap(),
        );
        let cache = Arc::new(
            CacheStore::open(config.cache.clone(), fs.clone(), clock.clone())
                .await
                .unwrap()
                .with_event_bus(events.clone()),
        );
        let preferences = Arc::new(DownloadPreferences::load(self.settings.clone()).await.unwrap());
        let history = Arc::new(WatchHistory::load(self.settings.clone()).await.unwrap());

        let orchestrator = DownloadOrchestrator::start(
            config,
            OrchestratorParts {
                http: self.http.clone(),
                fs,
                storage: self.storage.clone(),
                connectivity: connectivity.clone(),
                registry: registry.clone(),
                cache: cache.clone(),
                preferences,
                history,
                events: events.clone(),
                clock,
            },
        )
        .await
        .unwrap();

        Running {
            orchestrator,
            connectivity,
            registry,
            cache,
            events,
            trace,
            log: Vec::new(),
        }
    }
}

impl Running {
    pub async fn stop(self) {
        self.orchestrator.shutdown().await;
        self.registry.close().await;
    }

    /// Every event received so far.
    pub fn events(&mut self) -> &[CoreEvent] {
        while let Ok(event) = self.trace.try_recv() {
            self.log.push(event);
        }
        &self.log
    }

    /// `(from, to)` of every state change of `content_id` so far.
    pub fn transitions(&mut self, content_id: &str) -> Vec<(String, String)> {
        self.events()
            .iter()
            .filter_map(|event| match event {
                CoreEvent::Download(DownloadEvent::StateChanged {
                    content_id: id,
                    from,
                    to,
                }) if id == content_id => Some((from.clone(), to.clone())),
                _ => None,
            })
            .collect()
    }

    pub async fn wait_for_event<F: Fn(&CoreEvent) -> bool>(&mut self, predicate: F) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !self.events().iter().any(&predicate) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("event not observed in time");
    }

    pub async fn wait_for_state(&self, content_id: &ContentId, state: DownloadState) {
        let orchestrator = &self.orchestrator;
        wait_for(|| orchestrator.get_state(content_id) == state).await;
    }
}

/// Assert every transition is an edge of the state machine and that each
/// one starts where the previous one ended.
pub fn assert_valid_trace(transitions: &[(String, String)]) {
    let mut last: Option<&str> = None;
    for (from, to) in transitions {
        let from_state: DownloadState = from.parse().unwrap();
        let to_state: DownloadState = to.parse().unwrap();
        assert!(
            from_state.can_transition_to(&to_state),
            "illegal transition {} -> {}",
            from,
            to
        );
        // A cancelled task is forgotten, so a new request starts afresh.
        if let Some(last) = last {
            if !(last == "cancelled" && from == "not_downloaded") {
                assert_eq!(last, from, "trace discontinuity");
            }
        }
        last = Some(to);
    }
}

pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Poll `condition` until it holds, failing the test after five seconds.
pub async fn wait_for<F: FnMut() -> bool>(mut condition: F) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
