// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Transfer records and bookkeeping shared by the download and upload state
//! machines.

pub mod common;
pub mod download;
pub mod upload;

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use bitflags::bitflags;
use dashmap::DashMap;
use once_cell::sync::OnceCell;
use tokio::time::Instant;

use crate::{
    error::{Result, SlskError},
    net::connection::Connection,
    proto::TransferDirection,
    waits::WaitKey,
};

bitflags! {
    /// Lifecycle flags of a transfer. `COMPLETED` composes with exactly one
    /// of the terminal reasons and is set once.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TransferStates: u32 {
        const REQUESTED     = 1 << 0;
        const QUEUED        = 1 << 1;
        const INITIALIZING  = 1 << 2;
        const IN_PROGRESS   = 1 << 3;
        const COMPLETED     = 1 << 4;
        const SUCCEEDED     = 1 << 5;
        const ERRORED       = 1 << 6;
        const TIMED_OUT     = 1 << 7;
        const CANCELLED     = 1 << 8;
        const REJECTED      = 1 << 9;
    }
}

impl TransferStates {
    pub fn is_terminal(&self) -> bool {
        self.contains(TransferStates::COMPLETED)
    }

    /// Maps a failure into its terminal flags; the error kind decides the
    /// reason and is never reinterpreted.
    pub fn terminal_from_error(error: &SlskError) -> Self {
        let reason = match error {
            SlskError::Timeout(_) => TransferStates::TIMED_OUT,
            SlskError::Cancelled(_) => TransferStates::CANCELLED,
            SlskError::TransferRejected(_) => TransferStates::REJECTED,
            _ => TransferStates::ERRORED,
        };
        TransferStates::COMPLETED | reason
    }
}

/// Snapshot handed to progress observers.
#[derive(Debug, Clone)]
pub struct TransferProgress {
    pub direction: TransferDirection,
    pub username: String,
    pub filename: String,
    pub token: i32,
    pub state: TransferStates,
    pub size: u64,
    pub start_offset: u64,
    pub bytes_transferred: u64,
    pub percent_complete: f64,
    /// Bytes per second moved on this connection; 0 before the data phase.
    pub average_speed: f64,
    /// Undefined (None) unless the average speed is positive.
    pub remaining_time: Option<Duration>,
}

pub type ProgressFn = Arc<dyn Fn(TransferProgress) + Send + Sync>;

/// Internal record of one transfer, inserted into the tracker for the
/// operation's lifetime and removed in the finalization guard.
pub struct Transfer {
    pub direction: TransferDirection,
    pub username: String,
    pub filename: String,
    pub token: i32,
    start_offset: AtomicU64,
    size: AtomicU64,
    bytes_transferred: AtomicU64,
    remote_token: OnceCell<i32>,
    state: Mutex<TransferStates>,
    start_time: OnceCell<Instant>,
    end_time: OnceCell<Instant>,
    connection: Mutex<Option<Arc<Connection>>>,
    on_progress: Option<ProgressFn>,
}

impl Transfer {
    pub fn new(
        direction: TransferDirection,
        username: impl Into<String>,
        filename: impl Into<String>,
        token: i32,
        start_offset: u64,
        on_progress: Option<ProgressFn>,
    ) -> Arc<Self> {
        Arc::new(Self {
            direction,
            username: username.into(),
            filename: filename.into(),
            token,
            start_offset: AtomicU64::new(start_offset),
            size: AtomicU64::new(0),
            bytes_transferred: AtomicU64::new(start_offset),
            remote_token: OnceCell::new(),
            state: Mutex::new(TransferStates::empty()),
            start_time: OnceCell::new(),
            end_time: OnceCell::new(),
            connection: Mutex::new(None),
            on_progress,
        })
    }

    pub fn state(&self) -> TransferStates {
        *self.state.lock().expect("transfer state lock poisoned")
    }

    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }

    /// Applies a transition. Terminal states are set-once: once `COMPLETED`
    /// is in, further transitions are ignored and `false` is returned.
    pub fn set_state(&self, next: TransferStates) -> bool {
        {
            let mut state = self.state.lock().expect("transfer state lock poisoned");
            if state.is_terminal() {
                return false;
            }
            *state = next;
        }
        if next.contains(TransferStates::IN_PROGRESS) {
            let _ = self.start_time.set(Instant::now());
        }
        if next.is_terminal() {
            let _ = self.end_time.set(Instant::now());
        }
        self.emit_progress();
        true
    }

    pub fn start_offset(&self) -> u64 {
        self.start_offset.load(Ordering::Acquire)
    }

    /// Uploads learn the offset from the peer after the handshake; observed
    /// progress restarts from it.
    pub fn set_start_offset(&self, offset: u64) {
        self.start_offset.store(offset, Ordering::Release);
        self.bytes_transferred.store(offset, Ordering::Release);
    }

    pub fn size(&self) -> u64 {
        self.size.load(Ordering::Acquire)
    }

    pub fn set_size(&self, size: u64) {
        self.size.store(size, Ordering::Release);
    }

    pub fn bytes_transferred(&self) -> u64 {
        self.bytes_transferred.load(Ordering::Acquire)
    }

    pub fn add_bytes(&self, n: u64) {
        self.bytes_transferred.fetch_add(n, Ordering::AcqRel);
        self.emit_progress();
    }

    pub fn remote_token(&self) -> Option<i32> {
        self.remote_token.get().copied()
    }

    pub fn set_remote_token(&self, token: i32) {
        let _ = self.remote_token.set(token);
    }

    pub fn attach_connection(&self, conn: Arc<Connection>) {
        *self
            .connection
            .lock()
            .expect("transfer connection lock poisoned") = Some(conn);
    }

    pub fn take_connection(&self) -> Option<Arc<Connection>> {
        self.connection
            .lock()
            .expect("transfer connection lock poisoned")
            .take()
    }

    /// The key of the completion wait held for the transfer's duration.
    pub fn finished_key(&self) -> WaitKey {
        WaitKey::TransferFinished {
            direction: self.direction,
            username: self.username.clone(),
            filename: self.filename.clone(),
            token: self.token,
        }
    }

    pub fn progress(&self) -> TransferProgress {
        let size = self.size();
        let bytes = self.bytes_transferred();
        let percent_complete = if size == 0 {
            0.0
        } else {
            (bytes as f64 / size as f64) * 100.0
        };
        let moved_here = bytes.saturating_sub(self.start_offset());
        let average_speed = match self.start_time.get() {
            Some(started) => {
                let elapsed = started.elapsed().as_secs_f64();
                if elapsed > 0.0 {
                    moved_here as f64 / elapsed
                } else {
                    0.0
                }
            },
            None => 0.0,
        };
        let remaining_time = if average_speed > 0.0 {
            Some(Duration::from_secs_f64(
                size.saturating_sub(bytes) as f64 / average_speed,
            ))
        } else {
            None
        };
        TransferProgress {
            direction: self.direction,
            username: self.username.clone(),
            filename: self.filename.clone(),
            token: self.token,
            state: self.state(),
            size,
            start_offset: self.start_offset(),
            bytes_transferred: bytes,
            percent_complete,
            average_speed,
            remaining_time,
        }
    }

    fn emit_progress(&self) {
        if let Some(on_progress) = &self.on_progress {
            on_progress(self.progress());
        }
    }
}

impl std::fmt::Debug for Transfer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transfer")
            .field("direction", &self.direction)
            .field("username", &self.username)
            .field("filename", &self.filename)
            .field("token", &self.token)
            .field("state", &self.state())
            .finish()
    }
}

/// Shared maps of live transfers, keyed by token.
#[derive(Debug, Default)]
pub struct TransferTracker {
    downloads: DashMap<i32, Arc<Transfer>>,
    uploads: DashMap<i32, Arc<Transfer>>,
}

impl TransferTracker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn map_for(&self, direction: TransferDirection) -> &DashMap<i32, Arc<Transfer>> {
        match direction {
            TransferDirection::Download => &self.downloads,
            TransferDirection::Upload => &self.uploads,
        }
    }

    pub fn token_in_use(&self, token: i32) -> bool {
        self.downloads.contains_key(&token) || self.uploads.contains_key(&token)
    }

    /// Admits a new transfer, enforcing token and username+filename
    /// uniqueness across live transfers.
    pub fn try_insert(&self, transfer: Arc<Transfer>) -> Result<()> {
        if self.token_in_use(transfer.token) {
            return Err(SlskError::DuplicateToken(transfer.token));
        }
        let duplicate = self
            .map_for(transfer.direction)
            .iter()
            .any(|t| {
                !t.is_terminal()
                    && t.username == transfer.username
                    && t.filename == transfer.filename
            });
        if duplicate {
            return Err(SlskError::DuplicateTransfer {
                username: transfer.username.clone(),
                filename: transfer.filename.clone(),
            });
        }
        self.map_for(transfer.direction)
            .insert(transfer.token, transfer);
        Ok(())
    }

    pub fn remove(&self, transfer: &Transfer) {
        self.map_for(transfer.direction).remove(&transfer.token);
    }

    pub fn get(&self, direction: TransferDirection, token: i32) -> Option<Arc<Transfer>> {
        self.map_for(direction).get(&token).map(|t| t.clone())
    }

    /// Whether a non-terminal download from `username` exists; the server
    /// dispatcher uses this to verify a pushed `"F"` rendezvous.
    pub fn has_pending_download_from(&self, username: &str) -> bool {
        self.downloads
            .iter()
            .any(|t| !t.is_terminal() && t.username == username)
    }

    pub fn download_for_remote_token(
        &self,
        username: &str,
        remote_token: i32,
    ) -> Option<Arc<Transfer>> {
        self.downloads
            .iter()
            .find(|t| t.username == username && t.remote_token() == Some(remote_token))
            .map(|t| t.clone())
    }

    pub fn find_download(&self, username: &str, filename: &str) -> Option<Arc<Transfer>> {
        self.downloads
            .iter()
            .find(|t| t.username == username && t.filename == filename)
            .map(|t| t.clone())
    }

    pub fn download_count(&self) -> usize {
        self.downloads.len()
    }

    pub fn upload_count(&self) -> usize {
        self.uploads.len()
    }
}

/// Watches the transfer connection and resolves the completion wait when it
/// closes, by examining the state the transfer reached: success completes
/// the wait, timeout and cancellation fail it with their own kinds, and
/// anything else fails it with the connection's close reason.
pub(crate) fn spawn_completion_monitor(
    waiter: Arc<crate::waits::Waiter>,
    transfer: Arc<Transfer>,
    conn: Arc<Connection>,
) {
    tokio::spawn(async move {
        conn.closed().cancelled().await;
        let key = transfer.finished_key();
        let state = transfer.state();
        if state.contains(TransferStates::SUCCEEDED) {
            waiter.complete(&key, ());
        } else if state.contains(TransferStates::TIMED_OUT) {
            waiter.fail(
                &key,
                SlskError::timeout(format!("transfer of {}", transfer.filename)),
            );
        } else if state.contains(TransferStates::CANCELLED) {
            waiter.fail(
                &key,
                SlskError::cancelled(format!("transfer of {}", transfer.filename)),
            );
        } else {
            let reason = conn
                .close_reason()
                .unwrap_or("transfer connection closed")
                .to_string();
            waiter.fail(&key, SlskError::Io(std::io::Error::other(reason)));
        }
    });
}

/// The completion monitor races the settling task when the connection tears
/// itself down mid-transfer; by the time the completion wait is awaited the
/// terminal state is authoritative, so the error is re-aligned with it and
/// timeout/cancellation kinds survive the race.
pub(crate) fn align_error_with_state(
    state: TransferStates,
    error: SlskError,
    filename: &str,
) -> SlskError {
    if state.contains(TransferStates::TIMED_OUT) && !error.is_terminal_timeout() {
        return SlskError::timeout(format!("transfer of {filename}"));
    }
    if state.contains(TransferStates::CANCELLED) && !error.is_terminal_cancel() {
        return SlskError::cancelled(format!("transfer of {filename}"));
    }
    error
}

/// Scope guard for a transfer's finalization: stamps a terminal state if
/// none was reached, disposes the transfer connection, and removes the
/// record from the tracker. Runs on success, error, cancellation and panic
/// alike.
pub(crate) struct TransferCleanup {
    pub tracker: Arc<TransferTracker>,
    pub transfer: Arc<Transfer>,
}

impl Drop for TransferCleanup {
    fn drop(&mut self) {
        if !self.transfer.is_terminal() {
            self.transfer
                .set_state(TransferStates::COMPLETED | TransferStates::ERRORED);
        }
        if let Some(conn) = self.transfer.take_connection() {
            conn.disconnect("transfer finalized");
        }
        self.tracker.remove(&self.transfer);
    }
}
