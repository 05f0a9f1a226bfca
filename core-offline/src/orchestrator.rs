//! # Download Orchestrator
//!
//! Owns every download task and is the only writer of task state.
//!
//! ## Overview
//!
//! - **Admission**: `request_download` rejects duplicates, completed titles
//!   and requests the device has no room for. Connectivity never rejects;
//!   it parks the task in `Paused` instead.
//! - **Scheduling**: at most `max_concurrent_downloads` tasks are in
//!   `Downloading`. Waiting tasks start in admission order.
//! - **Workers**: each running task has one [`Transfer`] that reports back
//!   over a channel. The event loop applies those reports, connectivity
//!   transitions and retry timers to the task table.
//!
//! Every state change happens under one operation lock and is published as
//! a `DownloadEvent::StateChanged` on the event bus, so the event stream is
//! a faithful trace of the state machine.
//!
//! ## Completion
//!
//! The staged payload is committed to retained storage, then the registry
//! entry is written, then the task leaves the table. Only after that does
//! the auto-delete check run: a title marked watched while it was still
//! downloading is deleted right after it completes.

use bridge_traits::http::HttpClient;
use bridge_traits::storage::{FileSystemAccess, StorageInfo};
use bridge_traits::time::Clock;
use core_runtime::events::{CacheEvent, CoreEvent, DownloadEvent, EventBus, Receiver};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::cache::{CacheStats, CacheStore};
use crate::config::OfflineConfig;
use crate::error::{OfflineError, Result};
use crate::history::WatchHistory;
use crate::network::{ConnectivityMonitor, ConnectivityState, ConnectivityStream};
use crate::preferences::DownloadPreferences;
use crate::progress::{ProgressSnapshot, ProgressTracker};
use crate::registry::DownloadRegistry;
use crate::storage_guard::StorageGuard;
use crate::transfer::{Transfer, TransferEvent, TransferMessage};
use crate::types::{
    CancelOutcome, ContentId, DownloadState, DownloadTask, PauseReason, RejectReason,
    RequestOutcome,
};

/// Collaborators the orchestrator is wired to. Each is constructed once by
/// the host and shared.
pub struct OrchestratorParts {
    pub http: Arc<dyn HttpClient>,
    pub fs: Arc<dyn FileSystemAccess>,
    pub storage: Arc<dyn StorageInfo>,
    pub connectivity: Arc<ConnectivityMonitor>,
    pub registry: Arc<DownloadRegistry>,
    pub cache: Arc<CacheStore>,
    pub preferences: Arc<DownloadPreferences>,
    pub history: Arc<WatchHistory>,
    pub events: EventBus,
    pub clock: Arc<dyn Clock>,
}

struct Worker {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

struct TaskSlot {
    task: DownloadTask,
    /// Admission order.
    seq: u64,
    /// Generation of the most recently started worker.
    generation: u64,
    retries_used: u32,
    worker: Option<Worker>,
}

#[derive(Default)]
struct TaskTable {
    slots: HashMap<ContentId, TaskSlot>,
    next_seq: u64,
    next_generation: u64,
}

#[derive(Debug)]
struct RetryDue {
    content_id: ContentId,
    generation: u64,
}

enum FailureOutcome {
    Paused,
    Retry { retries_used: u32, generation: u64 },
    Terminal { retries_used: u32 },
}

struct Inner {
    config: OfflineConfig,
    http: Arc<dyn HttpClient>,
    fs: Arc<dyn FileSystemAccess>,
    guard: Arc<StorageGuard>,
    connectivity: Arc<ConnectivityMonitor>,
    registry: Arc<DownloadRegistry>,
    cache: Arc<CacheStore>,
    preferences: Arc<DownloadPreferences>,
    history: Arc<WatchHistory>,
    progress: Arc<ProgressTracker>,
    events: EventBus,
    clock: Arc<dyn Clock>,
    tasks: Mutex<TaskTable>,
    /// Serializes admission, cancellation and every transition.
    op_lock: tokio::sync::Mutex<()>,
    transfer_tx: mpsc::UnboundedSender<TransferMessage>,
    retry_tx: mpsc::UnboundedSender<RetryDue>,
    space_tx: mpsc::UnboundedSender<()>,
    /// A space re-check timer is armed.
    space_recheck_armed: AtomicBool,
    shutdown: CancellationToken,
}

pub struct DownloadOrchestrator {
    inner: Arc<Inner>,
    event_loop: Mutex<Option<JoinHandle<()>>>,
}

impl DownloadOrchestrator {
    /// Reconcile the registry with the cache, then start the event loop.
    pub async fn start(config: OfflineConfig, parts: OrchestratorParts) -> Result<Self> {
        config.validate().map_err(OfflineError::Config)?;

        let guard = StorageGuard::new(parts.storage, config.cache.cache_directory.clone())
            .with_margin(config.space_margin)
            .with_unknown_size_estimate(config.unknown_size_estimate);
        let (transfer_tx, transfer_rx) = mpsc::unbounded_channel();
        let (retry_tx, retry_rx) = mpsc::unbounded_channel();
        let (space_tx, space_rx) = mpsc::unbounded_channel();

        let inner = Arc::new(Inner {
            config,
            http: parts.http,
            fs: parts.fs,
            guard: Arc::new(guard),
            connectivity: parts.connectivity,
            registry: parts.registry,
            cache: parts.cache,
            preferences: parts.preferences,
            history: parts.history,
            progress: Arc::new(ProgressTracker::new()),
            events: parts.events,
            clock: parts.clock,
            tasks: Mutex::new(TaskTable::default()),
            op_lock: tokio::sync::Mutex::new(()),
            transfer_tx,
            retry_tx,
            space_tx,
            space_recheck_armed: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
        });

        let repaired = inner.reconcile().await?;

        let handle = tokio::spawn(run_event_loop(
            Arc::downgrade(&inner),
            transfer_rx,
            retry_rx,
            space_rx,
            inner.connectivity.subscribe(),
            inner.shutdown.clone(),
        ));

        info!(
            completed = inner.registry.len(),
            repaired,
            connectivity = %inner.connectivity.current(),
            max_concurrent = inner.config.max_concurrent_downloads,
            "Download orchestrator started"
        );

        Ok(Self {
            inner,
            event_loop: Mutex::new(Some(handle)),
        })
    }

    // ========================================================================
    // Public Operations
    // ========================================================================

    /// Admit a download.
    ///
    /// Rejections are returned as [`RequestOutcome::Rejected`]; `Err` is
    /// reserved for failures of the engine itself.
    #[instrument(skip(self))]
    pub async fn request_download(
        &self,
        content_id: &ContentId,
        source_uri: &str,
    ) -> Result<RequestOutcome> {
        let inner = &self.inner;
        let _op = inner.op_lock.lock().await;

        let busy = inner
            .tasks
            .lock()
            .slots
            .get(content_id)
            .map(|slot| slot.task.state.is_active())
            .unwrap_or(false);
        if busy {
            debug!("Rejected: already downloading");
            return Ok(RequestOutcome::Rejected(RejectReason::AlreadyDownloading));
        }

        if inner.registry.is_completed(content_id) {
            debug!("Rejected: already downloaded");
            return Ok(RequestOutcome::Rejected(RejectReason::AlreadyDownloaded));
        }

        if !inner.guard.has_space_for(None).await {
            warn!("Rejected: insufficient storage");
            return Ok(RequestOutcome::Rejected(RejectReason::InsufficientStorage));
        }

        {
            let mut table = inner.tasks.lock();
            let seq = table.next_seq;
            table.next_seq += 1;

            let mut slot = TaskSlot {
                task: DownloadTask::new(content_id.clone(), source_uri, inner.clock.now()),
                seq,
                generation: 0,
                retries_used: 0,
                worker: None,
            };
            // A terminal failure record is replaced by the fresh request.
            if let Some(previous) = table.slots.remove(content_id) {
                slot.task.state = previous.task.state;
            }
            inner.transition(&mut slot, DownloadState::Queued);
            table.slots.insert(content_id.clone(), slot);
        }

        inner.pump().await;

        let state = inner.state_of(content_id);
        info!(state = %state, "Download accepted");
        Ok(RequestOutcome::Accepted(state))
    }

    /// Stop and forget a download, or delete a completed one.
    ///
    /// Partial bytes, the progress entry, the registry entry and retained
    /// bytes are all removed. Unknown ids and terminal failures yield
    /// [`CancelOutcome::NotFound`], so repeating a cancel is harmless.
    #[instrument(skip(self))]
    pub async fn cancel(&self, content_id: &ContentId) -> Result<CancelOutcome> {
        let inner = &self.inner;
        let _op = inner.op_lock.lock().await;

        let removed = {
            let mut table = inner.tasks.lock();
            let active = table
                .slots
                .get(content_id)
                .map(|slot| slot.task.state.is_active())
                .unwrap_or(false);
            if active {
                table.slots.remove(content_id)
            } else {
                None
            }
        };

        if let Some(mut slot) = removed {
            inner.transition(&mut slot, DownloadState::Cancelled);
            if let Some(worker) = slot.worker.take() {
                worker.token.cancel();
                let _ = worker.handle.await;
            }
            inner.cache.discard_staged(content_id).await?;
            inner.progress.remove(content_id);
            inner.emit(DownloadEvent::Cancelled {
                content_id: content_id.to_string(),
            });
            info!("Download cancelled");

            inner.pump().await;
            return Ok(CancelOutcome::Ok);
        }

        if inner.registry.is_completed(content_id) {
            inner.remove_completed(content_id, "cancelled").await?;
            return Ok(CancelOutcome::Ok);
        }

        Ok(CancelOutcome::NotFound)
    }

    /// Current state. Never blocks on in-flight operations.
    pub fn get_state(&self, content_id: &ContentId) -> DownloadState {
        self.inner.state_of(content_id)
    }

    pub fn task(&self, content_id: &ContentId) -> Option<DownloadTask> {
        self.inner
            .tasks
            .lock()
            .slots
            .get(content_id)
            .map(|slot| slot.task.clone())
    }

    /// Snapshot of every known task, in admission order.
    pub fn tasks(&self) -> Vec<DownloadTask> {
        let table = self.inner.tasks.lock();
        let mut slots: Vec<&TaskSlot> = table.slots.values().collect();
        slots.sort_by_key(|slot| slot.seq);
        slots.into_iter().map(|slot| slot.task.clone()).collect()
    }

    pub fn list_completed(&self) -> BTreeSet<ContentId> {
        self.inner.registry.list_completed()
    }

    pub fn total_downloaded_size(&self) -> u64 {
        self.inner.registry.total_size()
    }

    /// Record a title as watched. With auto-delete enabled a completed
    /// download of it is removed; returns whether that happened.
    #[instrument(skip(self))]
    pub async fn mark_watched(&self, content_id: &ContentId) -> Result<bool> {
        let inner = &self.inner;
        let _op = inner.op_lock.lock().await;

        inner.history.mark_watched(content_id).await?;
        if inner.preferences.auto_delete_watched() && inner.registry.is_completed(content_id) {
            inner.remove_completed(content_id, "watched").await?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Cancel every task and delete every completed download.
    /// Returns how many downloads were affected.
    #[instrument(skip(self))]
    pub async fn clear_all_downloads(&self) -> Result<usize> {
        let inner = &self.inner;
        let _op = inner.op_lock.lock().await;

        let slots: Vec<TaskSlot> = inner
            .tasks
            .lock()
            .slots
            .drain()
            .map(|(_, slot)| slot)
            .collect();

        let mut cleared = 0;
        let mut handles = Vec::new();
        let mut ids = Vec::new();
        for mut slot in slots {
            let content_id = slot.task.content_id.clone();
            if slot.task.state.is_active() {
                inner.transition(&mut slot, DownloadState::Cancelled);
                inner.emit(DownloadEvent::Cancelled {
                    content_id: content_id.to_string(),
                });
                cleared += 1;
            }
            if let Some(worker) = slot.worker.take() {
                worker.token.cancel();
                handles.push(worker.handle);
            }
            ids.push(content_id);
        }
        futures::future::join_all(handles).await;

        for content_id in &ids {
            inner.cache.discard_staged(content_id).await?;
            inner.progress.remove(content_id);
        }

        for entry in inner.registry.entries() {
            inner.remove_completed(&entry.content_id, "cleared").await?;
            cleared += 1;
        }

        info!(cleared, "Cleared all downloads");
        Ok(cleared)
    }

    /// Change the Wi-Fi only preference and re-evaluate every task.
    pub async fn set_wifi_only(&self, enabled: bool) -> Result<()> {
        let inner = &self.inner;
        let _op = inner.op_lock.lock().await;

        inner.preferences.set_wifi_only(enabled).await?;
        inner.pump().await;
        Ok(())
    }

    pub async fn set_auto_delete_watched(&self, enabled: bool) -> Result<()> {
        self.inner.preferences.set_auto_delete_watched(enabled).await
    }

    // ========================================================================
    // Observation
    // ========================================================================

    pub fn progress_snapshot(&self) -> ProgressSnapshot {
        self.inner.progress.snapshot()
    }

    pub fn subscribe_progress(&self) -> watch::Receiver<ProgressSnapshot> {
        self.inner.progress.subscribe()
    }

    pub fn connectivity(&self) -> ConnectivityState {
        self.inner.connectivity.current()
    }

    pub fn subscribe_connectivity(&self) -> ConnectivityStream {
        self.inner.connectivity.subscribe()
    }

    pub fn subscribe_events(&self) -> Receiver<CoreEvent> {
        self.inner.events.subscribe()
    }

    pub fn preferences(&self) -> &DownloadPreferences {
        &self.inner.preferences
    }

    pub fn history(&self) -> &WatchHistory {
        &self.inner.history
    }

    pub async fn cache_stats(&self) -> CacheStats {
        self.inner.cache.stats().await
    }

    /// Stop the event loop and every worker. Staged bytes stay on disk until
    /// the cache is next opened.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();

        let event_loop = self.event_loop.lock().take();
        if let Some(handle) = event_loop {
            let _ = handle.await;
        }

        let handles: Vec<JoinHandle<()>> = self
            .inner
            .tasks
            .lock()
            .slots
            .values_mut()
            .filter_map(|slot| slot.worker.take())
            .map(|worker| worker.handle)
            .collect();
        futures::future::join_all(handles).await;
        info!("Download orchestrator stopped");
    }
}

impl Drop for DownloadOrchestrator {
    fn drop(&mut self) {
        self.inner.shutdown.cancel();
    }
}

// ============================================================================
// Event Loop
// ============================================================================

async fn run_event_loop(
    weak: Weak<Inner>,
    mut transfers: mpsc::UnboundedReceiver<TransferMessage>,
    mut retries: mpsc::UnboundedReceiver<RetryDue>,
    mut space_checks: mpsc::UnboundedReceiver<()>,
    mut connectivity: ConnectivityStream,
    shutdown: CancellationToken,
) {
    let mut connectivity_open = true;

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            Some(message) = transfers.recv() => {
                let Some(inner) = weak.upgrade() else { break };
                inner.on_transfer_event(message).await;
            }
            Some(due) = retries.recv() => {
                let Some(inner) = weak.upgrade() else { break };
                inner.on_retry_due(due).await;
            }
            Some(()) = space_checks.recv() => {
                let Some(inner) = weak.upgrade() else { break };
                inner.on_space_recheck().await;
            }
            state = connectivity.next(), if connectivity_open => {
                match state {
                    Some(state) => {
                        let Some(inner) = weak.upgrade() else { break };
                        inner.on_connectivity_changed(state).await;
                    }
                    None => connectivity_open = false,
                }
            }
            else => break,
        }
    }

    debug!("Orchestrator event loop stopped");
}

impl Inner {
    fn emit(&self, event: DownloadEvent) {
        let _ = self.events.emit(CoreEvent::Download(event));
    }

    fn state_of(&self, content_id: &ContentId) -> DownloadState {
        if let Some(slot) = self.tasks.lock().slots.get(content_id) {
            return slot.task.state.clone();
        }
        if self.registry.is_completed(content_id) {
            DownloadState::Completed
        } else {
            DownloadState::NotDownloaded
        }
    }

    /// Apply one edge of the state machine and publish it.
    fn transition(&self, slot: &mut TaskSlot, next: DownloadState) -> bool {
        let from = slot.task.state.clone();
        if !from.can_transition_to(&next) {
            error!(
                content_id = %slot.task.content_id,
                from = %from,
                to = %next,
                "Refusing illegal state transition"
            );
            return false;
        }

        debug!(content_id = %slot.task.content_id, from = %from, to = %next, "State changed");
        slot.task.state = next.clone();
        self.emit(DownloadEvent::StateChanged {
            content_id: slot.task.content_id.to_string(),
            from: from.as_str(),
            to: next.as_str(),
        });
        true
    }

    /// Bring every task in line with connectivity and free slots.
    async fn pump(&self) {
        let permit = self
            .connectivity
            .current()
            .permits(self.preferences.wifi_only());

        if let Err(reason) = permit {
            self.pause_all(reason);
            return;
        }

        let (mut running, candidates) = {
            let table = self.tasks.lock();
            let running = table
                .slots
                .values()
                .filter(|slot| slot.task.state == DownloadState::Downloading)
                .count();
            let mut candidates: Vec<(u64, ContentId, Option<u64>)> = table
                .slots
                .values()
                .filter(|slot| {
                    matches!(
                        slot.task.state,
                        DownloadState::Queued | DownloadState::Paused(_)
                    )
                })
                .map(|slot| {
                    (
                        slot.seq,
                        slot.task.content_id.clone(),
                        slot.task.remaining_bytes(),
                    )
                })
                .collect();
            candidates.sort_by_key(|(seq, _, _)| *seq);
            (running, candidates)
        };

        let mut space_blocked = false;
        for (_, content_id, remaining) in candidates {
            let startable = if running >= self.config.max_concurrent_downloads {
                false
            } else if self.guard.has_space_for(remaining).await {
                true
            } else {
                space_blocked = true;
                false
            };
            if startable {
                let mut table = self.tasks.lock();
                if self.start_worker(&mut table, &content_id) {
                    running += 1;
                }
            } else {
                let mut table = self.tasks.lock();
                if let Some(slot) = table.slots.get_mut(&content_id) {
                    if matches!(slot.task.state, DownloadState::Paused(_)) {
                        self.transition(slot, DownloadState::Queued);
                    }
                }
            }
        }

        if space_blocked {
            self.schedule_space_recheck();
        }
    }

    /// Nothing else may wake a task waiting only for free space, so poll
    /// the volume again after `space_recheck_interval`.
    fn schedule_space_recheck(&self) {
        if self.space_recheck_armed.swap(true, Ordering::SeqCst) {
            return;
        }
        let delay = self.config.space_recheck_interval;
        debug!(delay_ms = delay.as_millis() as u64, "Waiting for free space");

        let checks = self.space_tx.clone();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    let _ = checks.send(());
                }
            }
        });
    }

    fn pause_all(&self, reason: PauseReason) {
        let mut table = self.tasks.lock();
        for slot in table.slots.values_mut() {
            let state = slot.task.state.clone();
            match state {
                DownloadState::Downloading => {
                    if let Some(worker) = &slot.worker {
                        worker.token.cancel();
                    }
                    self.transition(slot, DownloadState::Paused(reason));
                }
                DownloadState::Queued => {
                    self.transition(slot, DownloadState::Paused(reason));
                }
                DownloadState::Paused(current) if current != reason => {
                    self.transition(slot, DownloadState::Paused(reason));
                }
                _ => {}
            }
        }
    }

    fn start_worker(&self, table: &mut TaskTable, content_id: &ContentId) -> bool {
        table.next_generation += 1;
        let generation = table.next_generation;

        let Some(slot) = table.slots.get_mut(content_id) else {
            return false;
        };
        if !self.transition(slot, DownloadState::Downloading) {
            return false;
        }

        let token = self.shutdown.child_token();
        let transfer = Transfer {
            http: Arc::clone(&self.http),
            fs: Arc::clone(&self.fs),
            guard: Arc::clone(&self.guard),
            stall_timeout: self.config.download_timeout,
            content_id: content_id.clone(),
            source_uri: slot.task.source_uri.clone(),
            staging: self.cache.staging_path(content_id),
            known_total: slot.task.total_bytes,
            generation,
            token: token.clone(),
            previous: slot.worker.take().map(|worker| worker.handle),
            events: self.transfer_tx.clone(),
        };

        slot.generation = generation;
        slot.worker = Some(Worker {
            token,
            handle: tokio::spawn(transfer.run()),
        });
        true
    }

    // ========================================================================
    // Event Handlers
    // ========================================================================

    async fn on_transfer_event(&self, message: TransferMessage) {
        let _op = self.op_lock.lock().await;
        let content_id = message.content_id;

        let state = {
            let table = self.tasks.lock();
            match table.slots.get(&content_id) {
                Some(slot) if slot.generation == message.generation => slot.task.state.clone(),
                _ => {
                    debug!(content_id = %content_id, "Ignoring message from superseded worker");
                    return;
                }
            }
        };

        match message.event {
            TransferEvent::Progress {
                bytes_transferred,
                total_bytes,
            } => {
                if let Some(slot) = self.tasks.lock().slots.get_mut(&content_id) {
                    slot.task.bytes_transferred = bytes_transferred;
                    if total_bytes.is_some() {
                        slot.task.total_bytes = total_bytes;
                    }
                }
                if self.progress.update(&content_id, bytes_transferred, total_bytes) {
                    self.emit(DownloadEvent::Progress {
                        content_id: content_id.to_string(),
                        bytes_transferred,
                        total_bytes,
                    });
                }
            }
            TransferEvent::Restarted { discarded_bytes } => {
                if let Some(slot) = self.tasks.lock().slots.get_mut(&content_id) {
                    slot.task.bytes_transferred = 0;
                }
                self.emit(DownloadEvent::Restarted {
                    content_id: content_id.to_string(),
                    discarded_bytes,
                });
            }
            TransferEvent::Completed { bytes_transferred } => {
                if let DownloadState::Paused(_) = state {
                    // The body finished before the pause reached the worker.
                    let mut table = self.tasks.lock();
                    if let Some(slot) = table.slots.get_mut(&content_id) {
                        self.transition(slot, DownloadState::Downloading);
                    }
                }
                debug!(content_id = %content_id, bytes_transferred, "Transfer finished");
                self.complete(&content_id).await;
                self.pump().await;
            }
            TransferEvent::Failed(error) => {
                if state == DownloadState::Downloading {
                    self.fail(&content_id, error).await;
                    self.pump().await;
                } else {
                    debug!(content_id = %content_id, error = %error, "Ignoring failure of stopped worker");
                }
            }
            TransferEvent::Interrupted => {}
        }
    }

    async fn on_retry_due(&self, due: RetryDue) {
        let _op = self.op_lock.lock().await;

        {
            let mut table = self.tasks.lock();
            if let Some(slot) = table.slots.get_mut(&due.content_id) {
                let waiting = matches!(
                    slot.task.state,
                    DownloadState::Failed {
                        terminal: false,
                        ..
                    }
                );
                if waiting && slot.generation == due.generation {
                    slot.retries_used += 1;
                    self.transition(slot, DownloadState::Queued);
                }
            }
        }

        self.pump().await;
    }

    async fn on_space_recheck(&self) {
        self.space_recheck_armed.store(false, Ordering::SeqCst);
        let _op = self.op_lock.lock().await;
        self.pump().await;
    }

    async fn on_connectivity_changed(&self, state: ConnectivityState) {
        let _op = self.op_lock.lock().await;
        debug!(state = %state, "Re-evaluating downloads for connectivity");
        self.pump().await;
    }

    // ========================================================================
    // Outcomes
    // ========================================================================

    async fn complete(&self, content_id: &ContentId) {
        let entry = match self.cache.commit_staged(content_id).await {
            Ok(entry) => entry,
            Err(e) => {
                self.fail(content_id, e).await;
                return;
            }
        };

        if let Err(e) = self
            .registry
            .mark_completed(content_id, entry.size_bytes, entry.checksum.clone())
            .await
        {
            error!(content_id = %content_id, error = %e, "Failed to register completed download");
            if let Err(e) = self.cache.remove(content_id).await {
                warn!(content_id = %content_id, error = %e, "Failed to remove unregistered bytes");
            }
            self.fail(content_id, e).await;
            return;
        }

        {
            let mut table = self.tasks.lock();
            if let Some(mut slot) = table.slots.remove(content_id) {
                slot.task.bytes_transferred = entry.size_bytes;
                self.transition(&mut slot, DownloadState::Completed);
            }
        }
        self.progress.remove(content_id);
        self.emit(DownloadEvent::Completed {
            content_id: content_id.to_string(),
            size_bytes: entry.size_bytes,
        });
        info!(content_id = %content_id, size_bytes = entry.size_bytes, "Download completed");

        if self.preferences.auto_delete_watched() && self.history.is_watched(content_id) {
            info!(content_id = %content_id, "Completed title was already watched, deleting");
            if let Err(e) = self.remove_completed(content_id, "watched").await {
                warn!(content_id = %content_id, error = %e, "Auto-delete failed");
            }
        }
    }

    async fn fail(&self, content_id: &ContentId, error: OfflineError) {
        let permit = self
            .connectivity
            .current()
            .permits(self.preferences.wifi_only());
        let message = error.to_string();

        let outcome = {
            let mut table = self.tasks.lock();
            let Some(slot) = table.slots.get_mut(content_id) else {
                return;
            };
            slot.worker = None;
            slot.task.last_error = Some(message.clone());
            let retries_used = slot.retries_used;

            match permit {
                // Lost the link mid-transfer: wait for it instead of burning a retry.
                Err(reason) if error.is_transient() => {
                    self.transition(slot, DownloadState::Paused(reason));
                    FailureOutcome::Paused
                }
                _ if error.is_transient() && retries_used < self.config.max_retry_attempts => {
                    self.transition(
                        slot,
                        DownloadState::Failed {
                            retry_count: retries_used,
                            terminal: false,
                        },
                    );
                    FailureOutcome::Retry {
                        retries_used,
                        generation: slot.generation,
                    }
                }
                _ => {
                    self.transition(
                        slot,
                        DownloadState::Failed {
                            retry_count: retries_used,
                            terminal: true,
                        },
                    );
                    FailureOutcome::Terminal { retries_used }
                }
            }
        };

        match outcome {
            FailureOutcome::Paused => {
                info!(content_id = %content_id, error = %message, "Transfer paused by connectivity loss");
            }
            FailureOutcome::Retry {
                retries_used,
                generation,
            } => {
                let delay = self.config.backoff_for(retries_used);
                warn!(
                    content_id = %content_id,
                    error = %message,
                    retry = retries_used + 1,
                    delay_ms = delay.as_millis() as u64,
                    "Download failed, retrying"
                );
                self.emit(DownloadEvent::Failed {
                    content_id: content_id.to_string(),
                    message,
                    retry_count: retries_used,
                    terminal: false,
                });
                self.schedule_retry(content_id.clone(), generation, delay);
            }
            FailureOutcome::Terminal { retries_used } => {
                error!(content_id = %content_id, error = %message, retries_used, "Download failed");
                if let Err(e) = self.cache.discard_staged(content_id).await {
                    warn!(content_id = %content_id, error = %e, "Failed to discard staged bytes");
                }
                self.progress.remove(content_id);
                self.emit(DownloadEvent::Failed {
                    content_id: content_id.to_string(),
                    message,
                    retry_count: retries_used,
                    terminal: true,
                });
            }
        }
    }

    fn schedule_retry(&self, content_id: ContentId, generation: u64, delay: Duration) {
        let retries = self.retry_tx.clone();
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    let _ = retries.send(RetryDue { content_id, generation });
                }
            }
        });
    }

    /// Delete a completed download. Registry first: a crash in between
    /// leaves orphaned bytes, which startup reconciliation removes.
    async fn remove_completed(&self, content_id: &ContentId, reason: &str) -> Result<()> {
        self.registry.remove(content_id).await?;
        self.cache.remove(content_id).await?;

        self.emit(DownloadEvent::StateChanged {
            content_id: content_id.to_string(),
            from: DownloadState::Completed.as_str(),
            to: DownloadState::NotDownloaded.as_str(),
        });
        self.emit(DownloadEvent::Removed {
            content_id: content_id.to_string(),
            reason: reason.to_string(),
        });
        info!(content_id = %content_id, reason, "Removed completed download");
        Ok(())
    }

    /// Drop registry entries whose retained bytes are missing or of the
    /// wrong size, and retained bytes nobody registered.
    async fn reconcile(&self) -> Result<usize> {
        let mut repaired = 0;

        for entry in self.registry.entries() {
            let reason = match self.cache.retained_entry(&entry.content_id).await {
                Some(cached) if cached.size_bytes == entry.size_bytes => continue,
                Some(cached) => format!(
                    "retained size {} does not match registered size {}",
                    cached.size_bytes, entry.size_bytes
                ),
                None => "retained bytes missing".to_string(),
            };

            warn!(content_id = %entry.content_id, reason = %reason, "Repairing registry entry");
            self.registry.remove(&entry.content_id).await?;
            self.cache.remove(&entry.content_id).await?;
            let _ = self
                .events
                .emit(CoreEvent::Cache(CacheEvent::CorruptionRepaired {
                    content_id: entry.content_id.to_string(),
                    reason,
                }));
            repaired += 1;
        }

        for cached in self.cache.retained_entries().await {
            if !self.registry.is_completed(&cached.content_id) {
                warn!(content_id = %cached.content_id, "Removing unregistered retained bytes");
                self.cache.remove(&cached.content_id).await?;
                repaired += 1;
            }
        }

        Ok(repaired)
    }
}
