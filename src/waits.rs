// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Keyed rendezvous between operation tasks and dispatcher tasks.
//!
//! A caller that expects a future inbound message registers a wait under a
//! [`WaitKey`] and suspends; the dispatcher that later parses the matching
//! message resolves it. Delivery is FIFO per key and at-most-once per wait:
//! completion, failure, timeout and cancellation are mutually exclusive and
//! terminal. A drop-guard removes the registration on every exit path, so an
//! abandoned wait can never be resolved into the void twice or leak.

use std::{
    any::type_name,
    collections::VecDeque,
    marker::PhantomData,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use dashmap::DashMap;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
    error::{Result, SlskError},
    net::connection::Connection,
    proto::{
        PeerCode, ServerCode, TransferDirection,
        peer::{
            PlaceInQueueResponse, SharesReply, TransferRequest, TransferResponse,
            UserInfoReply,
        },
        server::{
            ChangePasswordCommand, CheckPrivilegesResponse, GetPeerAddressResponse,
            GetUserStatusResponse, JoinRoomResponse, LeaveRoomResponse, LoginResponse,
            PrivilegedUsersResponse, RoomListResponse, WatchUserResponse,
            WishlistIntervalNotification,
        },
    },
};

/// Identity of a pending rendezvous: message class plus discriminators.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum WaitKey {
    /// Singleton server replies, keyed by code alone.
    ServerReply(ServerCode),
    /// Server replies keyed by `(code, username)` (or room name).
    ServerReplyForUser(ServerCode, String),
    /// A firewall pierce we solicited via the server.
    SolicitedConnection { username: String, token: i32 },
    /// Peer session replies keyed by `(code, username)`.
    PeerReply(PeerCode, String),
    /// The peer's answer to a transfer request we sent.
    TransferResponse { username: String, token: i32 },
    /// The peer's own transfer request for a download of ours it had queued.
    TransferRequested { username: String, filename: String },
    /// An inbound transfer connection accepted by our listener.
    DirectTransfer { username: String, token: i32 },
    /// A transfer connection we dialed after a server-pushed rendezvous.
    IndirectTransfer {
        username: String,
        filename: String,
        token: i32,
    },
    /// Held for the whole transfer; resolved by the disconnect handler.
    TransferFinished {
        direction: TransferDirection,
        username: String,
        filename: String,
        token: i32,
    },
    /// A peer's answer to a queue-position query.
    PlaceInQueue { username: String, filename: String },
}

/// Closed set of completion value types.
///
/// The variant is the "tag" that makes a cross-typed completion detectable:
/// a dispatcher can only complete with one of these, and the waiting side
/// converts back via `TryFrom`, surfacing a mismatch as a protocol error
/// instead of silently yielding a wrong-typed value.
#[derive(Debug)]
pub enum WaitPayload {
    Login(LoginResponse),
    PeerAddress(GetPeerAddressResponse),
    WatchUser(WatchUserResponse),
    UserStatus(GetUserStatusResponse),
    RoomList(RoomListResponse),
    PrivilegedUsers(PrivilegedUsersResponse),
    Privileges(CheckPrivilegesResponse),
    WishlistInterval(WishlistIntervalNotification),
    JoinRoom(JoinRoomResponse),
    LeaveRoom(LeaveRoomResponse),
    PasswordChanged(ChangePasswordCommand),
    TransferResponse(TransferResponse),
    TransferRequest(TransferRequest),
    PlaceInQueue(PlaceInQueueResponse),
    Shares(SharesReply),
    UserInfo(UserInfoReply),
    Connection(Arc<Connection>),
    Finished(()),
}

macro_rules! wait_payload_conversions {
    ($(($variant:ident, $ty:ty)),+ $(,)?) => {
        $(
            impl From<$ty> for WaitPayload {
                fn from(value: $ty) -> Self {
                    WaitPayload::$variant(value)
                }
            }

            impl TryFrom<WaitPayload> for $ty {
                type Error = WaitPayload;

                fn try_from(
                    payload: WaitPayload,
                ) -> std::result::Result<Self, WaitPayload> {
                    match payload {
                        WaitPayload::$variant(value) => Ok(value),
                        other => Err(other),
                    }
                }
            }
        )+
    };
}

wait_payload_conversions!(
    (Login, LoginResponse),
    (PeerAddress, GetPeerAddressResponse),
    (WatchUser, WatchUserResponse),
    (UserStatus, GetUserStatusResponse),
    (RoomList, RoomListResponse),
    (PrivilegedUsers, PrivilegedUsersResponse),
    (Privileges, CheckPrivilegesResponse),
    (WishlistInterval, WishlistIntervalNotification),
    (JoinRoom, JoinRoomResponse),
    (LeaveRoom, LeaveRoomResponse),
    (PasswordChanged, ChangePasswordCommand),
    (TransferResponse, TransferResponse),
    (TransferRequest, TransferRequest),
    (PlaceInQueue, PlaceInQueueResponse),
    (Shares, SharesReply),
    (UserInfo, UserInfoReply),
    (Connection, Arc<Connection>),
    (Finished, ()),
);

struct WaitEntry {
    id: u64,
    tx: oneshot::Sender<Result<WaitPayload>>,
}

/// The process-wide wait registry.
pub struct Waiter {
    waits: DashMap<WaitKey, VecDeque<WaitEntry>>,
    next_id: AtomicU64,
    default_timeout: Duration,
}

impl Waiter {
    pub fn new(default_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            waits: DashMap::new(),
            next_id: AtomicU64::new(0),
            default_timeout,
        })
    }

    /// Registers a wait without suspending. The returned handle resolves it
    /// later; dropping the handle unregisters it. This is the primitive the
    /// queued-download path needs: it must be registered *before* the
    /// triggering request goes out.
    pub fn register<T>(self: &Arc<Self>, key: WaitKey) -> PendingWait<T>
    where
        T: TryFrom<WaitPayload, Error = WaitPayload>,
    {
        let (tx, rx) = oneshot::channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.waits
            .entry(key.clone())
            .or_default()
            .push_back(WaitEntry { id, tx });
        PendingWait {
            rx,
            guard: WaitGuard {
                waiter: Arc::clone(self),
                key: key.clone(),
                id,
            },
            key,
            _t: PhantomData,
        }
    }

    /// Registers a wait and suspends until it is resolved, times out
    /// (`timeout`, defaulting to the registry-wide message timeout), or the
    /// supplied token is cancelled.
    pub async fn wait<T>(
        self: &Arc<Self>,
        key: WaitKey,
        timeout: Option<Duration>,
        cancel: Option<&CancellationToken>,
    ) -> Result<T>
    where
        T: TryFrom<WaitPayload, Error = WaitPayload>,
    {
        let deadline = timeout.unwrap_or(self.default_timeout);
        self.register::<T>(key).resolve(deadline, cancel).await
    }

    /// As [`wait`](Self::wait) but with no timeout: only completion, failure
    /// or cancellation resolve it.
    pub async fn wait_indefinite<T>(
        self: &Arc<Self>,
        key: WaitKey,
        cancel: Option<&CancellationToken>,
    ) -> Result<T>
    where
        T: TryFrom<WaitPayload, Error = WaitPayload>,
    {
        self.register::<T>(key).resolve_indefinite(cancel).await
    }

    /// Supplies a value to the oldest pending wait on `key`. Discarded when
    /// nothing is waiting.
    pub fn complete(&self, key: &WaitKey, payload: impl Into<WaitPayload>) {
        let mut payload = payload.into();
        loop {
            let Some(entry) = self.pop_front(key) else {
                debug!(?key, "completion with no pending wait, discarding");
                return;
            };
            match entry.tx.send(Ok(payload)) {
                Ok(()) => return,
                // The receiver gave up (timeout/cancel raced us); the value
                // belongs to the next wait in line.
                Err(Ok(returned)) => payload = returned,
                Err(Err(_)) => return,
            }
        }
    }

    /// Fails the oldest pending wait on `key`.
    pub fn fail(&self, key: &WaitKey, error: SlskError) {
        let mut error = error;
        loop {
            let Some(entry) = self.pop_front(key) else {
                debug!(?key, %error, "failure with no pending wait, discarding");
                return;
            };
            match entry.tx.send(Err(error)) {
                Ok(()) => return,
                Err(Err(returned)) => error = returned,
                Err(Ok(_)) => return,
            }
        }
    }

    /// Cancels every pending wait on `key`.
    pub fn cancel(&self, key: &WaitKey) {
        if let Some((_, entries)) = self.waits.remove(key) {
            for entry in entries {
                let _ = entry
                    .tx
                    .send(Err(SlskError::cancelled(format!("wait on {key:?}"))));
            }
        }
    }

    /// Cancels every pending wait in the registry (used on disconnect so no
    /// caller is left hanging).
    pub fn cancel_all(&self) {
        let keys: Vec<WaitKey> = self.waits.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            self.cancel(&key);
        }
    }

    /// Number of pending waits on `key`, for tests and diagnostics.
    pub fn pending(&self, key: &WaitKey) -> usize {
        self.waits.get(key).map(|e| e.len()).unwrap_or(0)
    }

    fn pop_front(&self, key: &WaitKey) -> Option<WaitEntry> {
        let entry = {
            let mut entries = self.waits.get_mut(key)?;
            entries.pop_front()
        };
        self.waits.remove_if(key, |_, v| v.is_empty());
        entry
    }

    fn remove(&self, key: &WaitKey, id: u64) {
        if let Some(mut entries) = self.waits.get_mut(key) {
            entries.retain(|e| e.id != id);
        }
        self.waits.remove_if(key, |_, v| v.is_empty());
    }
}

/// A registered, not-yet-resolved wait. Dropping it unregisters the wait, so
/// any exit path that abandons the rendezvous cleans up after itself.
pub struct PendingWait<T> {
    rx: oneshot::Receiver<Result<WaitPayload>>,
    guard: WaitGuard,
    key: WaitKey,
    _t: PhantomData<fn() -> T>,
}

impl<T> PendingWait<T>
where
    T: TryFrom<WaitPayload, Error = WaitPayload>,
{
    pub fn key(&self) -> &WaitKey {
        &self.key
    }

    /// Suspends until resolution, the deadline, or cancellation.
    pub async fn resolve(
        self,
        deadline: Duration,
        cancel: Option<&CancellationToken>,
    ) -> Result<T> {
        let Self { rx, guard, key, .. } = self;

        let never = CancellationToken::new();
        let cancel = cancel.unwrap_or(&never);

        let outcome = tokio::select! {
            _ = cancel.cancelled() => {
                Err(SlskError::cancelled(format!("wait on {key:?}")))
            },
            res = tokio::time::timeout(deadline, rx) => match res {
                Err(_) => Err(SlskError::timeout(format!("wait on {key:?}"))),
                Ok(Err(_)) => Err(SlskError::cancelled(format!("wait on {key:?}"))),
                Ok(Ok(resolved)) => resolved,
            },
        };
        drop(guard);
        convert::<T>(outcome?)
    }

    /// Suspends until resolution or cancellation, with no deadline.
    pub async fn resolve_indefinite(
        self,
        cancel: Option<&CancellationToken>,
    ) -> Result<T> {
        let Self { rx, guard, key, .. } = self;

        let never = CancellationToken::new();
        let cancel = cancel.unwrap_or(&never);

        let outcome = tokio::select! {
            _ = cancel.cancelled() => {
                Err(SlskError::cancelled(format!("wait on {key:?}")))
            },
            res = rx => match res {
                Err(_) => Err(SlskError::cancelled(format!("wait on {key:?}"))),
                Ok(resolved) => resolved,
            },
        };
        drop(guard);
        convert::<T>(outcome?)
    }
}

fn convert<T>(payload: WaitPayload) -> Result<T>
where
    T: TryFrom<WaitPayload, Error = WaitPayload>,
{
    T::try_from(payload).map_err(|other| {
        SlskError::protocol(format!(
            "wait resolved with the wrong payload type: expected {}, got {other:?}",
            type_name::<T>()
        ))
    })
}

/// Removes the registration when the owning wait unwinds for any reason.
struct WaitGuard {
    waiter: Arc<Waiter>,
    key: WaitKey,
    id: u64,
}

impl Drop for WaitGuard {
    fn drop(&mut self) {
        self.waiter.remove(&self.key, self.id);
    }
}
