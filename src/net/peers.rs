// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Peer connection management: single-flight per-user message connections,
//! the direct/indirect establishment fallback, transfer-connection
//! rendezvous, and dispatch of inbound peer session messages.

use std::{
    net::{Ipv4Addr, SocketAddr},
    sync::{Arc, Mutex as StdMutex, Weak},
};

use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    cfg::config::Config,
    error::{Result, SlskError},
    net::{connection::Connection, server::ServerConnection},
    proto::{
        ConnectionType, PeerCode, TransferDirection,
        peer::{
            PeerInit, PierceFirewall, PlaceInQueueResponse, QueueFailedNotification,
            QueueUploadCommand, SharesReply, TransferRequest, TransferResponse,
            UploadFailedNotification, UserInfoReply, split_peer_message,
        },
        server::{
            ConnectToPeerRequest, ConnectToPeerResponse, GetPeerAddressRequest,
            ParentCandidate,
        },
    },
    search::SearchRegistry,
    utils::TokenFactory,
    waits::{WaitKey, Waiter},
};

/// Both halves of an armed transfer-connection rendezvous; the first to
/// yield a live connection wins and the loser's registration is dropped.
pub struct TransferRendezvous {
    direct: crate::waits::PendingWait<Arc<Connection>>,
    indirect: crate::waits::PendingWait<Arc<Connection>>,
}

impl TransferRendezvous {
    pub async fn resolve(
        self,
        cancel: Option<&CancellationToken>,
    ) -> Result<Arc<Connection>> {
        let Self { direct, indirect } = self;
        tokio::select! {
            conn = direct.resolve_indefinite(cancel) => conn,
            conn = indirect.resolve_indefinite(cancel) => conn,
        }
    }
}

/// Map key for transfer connection records.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransferKey {
    pub username: String,
    pub token: i32,
}

/// Per-user record. The slot mutex serializes establishment: whoever holds it
/// is the only task allowed to create, attach or replace the connection, and
/// holding it across awaits is what makes single-flight work.
#[derive(Debug)]
pub struct PeerRecord {
    username: String,
    slot: Mutex<Option<Arc<Connection>>>,
}

pub struct PeerManager {
    cfg: Config,
    waiter: Arc<Waiter>,
    tokens: Arc<TokenFactory>,
    searches: Arc<SearchRegistry>,
    username: StdMutex<Option<String>>,
    server: StdMutex<Option<Weak<ServerConnection>>>,
    records: DashMap<String, Arc<PeerRecord>>,
    transfer_conns: DashMap<TransferKey, Arc<Connection>>,
    solicitations: DashMap<i32, String>,
    permits: Arc<Semaphore>,
    endpoints: DashMap<String, SocketAddr>,
    parent_pool: StdMutex<Vec<ParentCandidate>>,
}

impl PeerManager {
    pub fn new(
        cfg: Config,
        waiter: Arc<Waiter>,
        tokens: Arc<TokenFactory>,
        searches: Arc<SearchRegistry>,
    ) -> Arc<Self> {
        let limit = cfg.limits.concurrent_message_connections;
        Arc::new(Self {
            cfg,
            waiter,
            tokens,
            searches,
            username: StdMutex::new(None),
            server: StdMutex::new(None),
            records: DashMap::new(),
            transfer_conns: DashMap::new(),
            solicitations: DashMap::new(),
            permits: Arc::new(Semaphore::new(limit)),
            endpoints: DashMap::new(),
            parent_pool: StdMutex::new(Vec::new()),
        })
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    /// Must be called after the server connection is (re)established.
    pub fn bind_server(&self, server: Weak<ServerConnection>) {
        *self.server.lock().expect("server slot lock poisoned") = Some(server);
    }

    /// Our login name, written into outbound `PeerInit`s.
    pub fn set_username(&self, username: &str) {
        *self.username.lock().expect("username lock poisoned") =
            Some(username.to_string());
    }

    fn our_username(&self) -> Result<String> {
        self.username
            .lock()
            .expect("username lock poisoned")
            .clone()
            .ok_or_else(|| SlskError::InvalidState("not logged in".into()))
    }

    fn server(&self) -> Result<Arc<ServerConnection>> {
        self.server
            .lock()
            .expect("server slot lock poisoned")
            .as_ref()
            .and_then(Weak::upgrade)
            .ok_or_else(|| SlskError::InvalidState("not connected to the server".into()))
    }

    /// Resolves (and caches) a peer's endpoint through the server.
    pub async fn lookup_endpoint(
        self: &Arc<Self>,
        username: &str,
        cancel: Option<&CancellationToken>,
    ) -> Result<SocketAddr> {
        if let Some(cached) = self.endpoints.get(username) {
            return Ok(*cached);
        }

        let server = self.server()?;
        let request = GetPeerAddressRequest {
            username: username.to_string(),
        };
        let wait = self.waiter.register(WaitKey::ServerReplyForUser(
            crate::proto::ServerCode::GetPeerAddress,
            username.to_string(),
        ));
        server.send(request.to_frame()).await?;
        let response: crate::proto::server::GetPeerAddressResponse = wait
            .resolve(self.cfg.timeouts.message, cancel)
            .await
            .map_err(|e| match e {
                e @ (SlskError::Timeout(_) | SlskError::Cancelled(_)) => e,
                other => SlskError::UserEndpointLookupFailed {
                    username: username.to_string(),
                    reason: other.to_string(),
                },
            })?;

        if response.ip == Ipv4Addr::UNSPECIFIED {
            return Err(SlskError::UserOffline(username.to_string()));
        }
        let endpoint = SocketAddr::from((response.ip, response.port as u16));
        self.endpoints.insert(username.to_string(), endpoint);
        Ok(endpoint)
    }

    /// Returns a live message connection to `username`, establishing one if
    /// needed. At most one task per user is ever establishing.
    pub async fn get_or_add_message_connection(
        self: &Arc<Self>,
        username: &str,
        cancel: Option<&CancellationToken>,
    ) -> Result<Arc<Connection>> {
        loop {
            let record = self.record_for(username);
            let mut slot = record.slot.lock().await;
            if !self.record_is_current(username, &record) {
                continue;
            }

            if let Some(conn) = slot.as_ref() {
                if conn.is_connected() {
                    return Ok(conn.clone());
                }
                *slot = None;
            }

            let permit = self.acquire_permit(cancel).await?;
            let conn = self.establish_message_connection(username, cancel).await?;
            self.adopt(&record, &mut slot, conn.clone(), permit);
            return Ok(conn);
        }
    }

    /// As above, but driven by a server-sent rendezvous we solicited: the
    /// remote side is waiting for us to dial and pierce.
    pub async fn get_or_add_message_connection_from(
        self: &Arc<Self>,
        response: &ConnectToPeerResponse,
    ) -> Result<Arc<Connection>> {
        let username = response.username.as_str();
        loop {
            let record = self.record_for(username);
            let mut slot = record.slot.lock().await;
            if !self.record_is_current(username, &record) {
                continue;
            }

            if let Some(conn) = slot.as_ref() {
                if conn.is_connected() {
                    // A connection raced in ahead of the rendezvous; keep it.
                    return Ok(conn.clone());
                }
                *slot = None;
            }

            let permit = self.acquire_permit(None).await?;
            let endpoint = SocketAddr::from((response.ip, response.port as u16));
            let conn = Connection::connect(
                endpoint,
                self.cfg.timeouts.connect,
                Some(self.cfg.timeouts.peer_inactivity),
            )
            .await?;
            conn.write_message(&PierceFirewall {
                token: response.token,
            }
            .to_frame())
            .await?;
            self.adopt(&record, &mut slot, conn.clone(), permit);
            return Ok(conn);
        }
    }

    /// Adopts an inbound message connection announced by `PeerInit{"P"}`.
    pub async fn attach_inbound_message(
        self: &Arc<Self>,
        username: &str,
        conn: Arc<Connection>,
    ) -> Result<()> {
        loop {
            let record = self.record_for(username);
            let mut slot = record.slot.lock().await;
            if !self.record_is_current(username, &record) {
                continue;
            }

            let permit = self.acquire_permit(None).await?;
            if let Some(existing) = slot.take() {
                // The remote replaced its connection; drop the stale one.
                existing.disconnect("superseded by a new inbound connection");
            }
            self.adopt(&record, &mut slot, conn, permit);
            return Ok(());
        }
    }

    /// Adopts an inbound transfer connection announced by `PeerInit{"F"}`:
    /// reads the 4-byte remote token and wakes the waiting download.
    pub async fn attach_inbound_transfer(
        self: &Arc<Self>,
        username: &str,
        conn: Arc<Connection>,
    ) -> Result<()> {
        let remote_token = conn.read_i32_le().await?;
        self.track_transfer_conn(username, remote_token, conn.clone());

        let key = WaitKey::DirectTransfer {
            username: username.to_string(),
            token: remote_token,
        };
        if self.waiter.pending(&key) == 0 {
            warn!(
                username,
                remote_token, "inbound transfer connection with no waiting download"
            );
            conn.disconnect("no download waiting for this transfer");
            return Ok(());
        }
        self.waiter.complete(&key, conn);
        Ok(())
    }

    /// Completes a solicited-connection wait from an inbound firewall pierce.
    /// The pending-solicitation entry itself is removed by the soliciting
    /// task's cleanup; the socket stays open either way.
    pub fn complete_solicitation(&self, token: i32, conn: Arc<Connection>) {
        let Some(username) = self.solicitations.get(&token).map(|u| u.value().clone())
        else {
            warn!(token, "firewall pierce with no pending solicitation");
            conn.disconnect("unsolicited firewall pierce");
            return;
        };
        self.waiter.complete(
            &WaitKey::SolicitedConnection {
                username,
                token,
            },
            conn,
        );
    }

    /// Opens an outbound transfer connection for a download whose peer said
    /// "ready now": dials (or pierces via the server), announces with
    /// `PeerInit{"F"}`, and reads back the peer's 4-byte remote token.
    pub async fn get_transfer_connection(
        self: &Arc<Self>,
        username: &str,
        endpoint: SocketAddr,
        token: i32,
        cancel: Option<&CancellationToken>,
    ) -> Result<(Arc<Connection>, i32)> {
        let conn = self
            .establish_transfer_connection(username, endpoint, token, cancel)
            .await?;
        let remote_token = conn.read_i32_le().await?;
        self.track_transfer_conn(username, token, conn.clone());
        Ok((conn, remote_token))
    }

    /// Opens an outbound transfer connection for an upload: after the
    /// `PeerInit{"F"}` announcement the uploader writes its token as 4 raw
    /// bytes so the downloader can correlate.
    pub async fn get_upload_connection(
        self: &Arc<Self>,
        username: &str,
        endpoint: SocketAddr,
        token: i32,
        cancel: Option<&CancellationToken>,
    ) -> Result<Arc<Connection>> {
        let conn = self
            .establish_transfer_connection(username, endpoint, token, cancel)
            .await?;
        conn.write_all(&token.to_le_bytes()).await?;
        self.track_transfer_conn(username, token, conn.clone());
        Ok(conn)
    }

    /// Registers both rendezvous waits for an expected transfer connection:
    /// direct (our listener) and indirect (a server-pushed rendezvous we
    /// dial back). Registration is split from resolution so a caller can
    /// arm the waits *before* telling the peer to proceed.
    pub fn register_transfer_rendezvous(
        self: &Arc<Self>,
        username: &str,
        filename: &str,
        remote_token: i32,
    ) -> TransferRendezvous {
        let direct = self.waiter.register::<Arc<Connection>>(WaitKey::DirectTransfer {
            username: username.to_string(),
            token: remote_token,
        });
        let indirect =
            self.waiter
                .register::<Arc<Connection>>(WaitKey::IndirectTransfer {
                    username: username.to_string(),
                    filename: filename.to_string(),
                    token: remote_token,
                });
        TransferRendezvous { direct, indirect }
    }

    /// Parks until a transfer connection bearing `remote_token` arrives,
    /// whichever path delivers it first.
    pub async fn await_transfer_connection(
        self: &Arc<Self>,
        username: &str,
        filename: &str,
        remote_token: i32,
        cancel: Option<&CancellationToken>,
    ) -> Result<Arc<Connection>> {
        self.register_transfer_rendezvous(username, filename, remote_token)
            .resolve(cancel)
            .await
    }

    /// Hands a new candidate-parent list to the distributed-overlay
    /// collaborator.
    pub fn update_parent_pool(&self, parents: Vec<ParentCandidate>) {
        debug!(count = parents.len(), "parent pool updated");
        *self.parent_pool.lock().expect("parent pool lock poisoned") = parents;
    }

    pub fn parent_pool(&self) -> Vec<ParentCandidate> {
        self.parent_pool
            .lock()
            .expect("parent pool lock poisoned")
            .clone()
    }

    /// Closes every managed connection and clears all bookkeeping. Permits
    /// are released as the per-connection tasks observe the disconnects.
    pub fn remove_and_dispose_all(&self) {
        for record in self.records.iter() {
            if let Ok(slot) = record.slot.try_lock()
                && let Some(conn) = slot.as_ref()
            {
                conn.disconnect("peer manager disposed");
            }
        }
        for entry in self.transfer_conns.iter() {
            entry.value().disconnect("peer manager disposed");
        }
        self.records.clear();
        self.transfer_conns.clear();
        self.solicitations.clear();
        self.endpoints.clear();
    }

    pub fn live_message_connections(&self) -> usize {
        self.cfg.limits.concurrent_message_connections - self.permits.available_permits()
    }

    // --- internals ---

    fn record_for(&self, username: &str) -> Arc<PeerRecord> {
        self.records
            .entry(username.to_string())
            .or_insert_with(|| {
                Arc::new(PeerRecord {
                    username: username.to_string(),
                    slot: Mutex::new(None),
                })
            })
            .clone()
    }

    /// A record removed from the map while we awaited its mutex must not be
    /// used for establishment; the caller loops and picks up the fresh one.
    fn record_is_current(&self, username: &str, record: &Arc<PeerRecord>) -> bool {
        self.records
            .get(username)
            .map(|current| Arc::ptr_eq(&current, record))
            .unwrap_or(false)
    }

    async fn acquire_permit(
        &self,
        cancel: Option<&CancellationToken>,
    ) -> Result<OwnedSemaphorePermit> {
        let acquire = self.permits.clone().acquire_owned();
        match cancel {
            Some(cancel) => tokio::select! {
                _ = cancel.cancelled() => {
                    Err(SlskError::cancelled("peer connection admission"))
                },
                permit = acquire => permit
                    .map_err(|_| SlskError::InvalidState("manager disposed".into())),
            },
            None => acquire
                .await
                .map_err(|_| SlskError::InvalidState("manager disposed".into())),
        }
    }

    /// Direct dial first; on failure, a server-mediated rendezvous. Both
    /// exhausted surfaces `ConnectionFailed`.
    async fn establish_message_connection(
        self: &Arc<Self>,
        username: &str,
        cancel: Option<&CancellationToken>,
    ) -> Result<Arc<Connection>> {
        let endpoint = self.lookup_endpoint(username, cancel).await?;

        let direct_err = match self.dial_direct(username, endpoint, cancel).await {
            Ok(conn) => return Ok(conn),
            Err(e @ SlskError::Cancelled(_)) => return Err(e),
            Err(e) => e,
        };
        debug!(username, %direct_err, "direct connection failed, going indirect");

        match self
            .solicit_indirect(username, ConnectionType::Message, cancel)
            .await
        {
            Ok(conn) => Ok(conn),
            Err(e @ SlskError::Cancelled(_)) => Err(e),
            Err(indirect_err) => Err(SlskError::ConnectionFailed {
                username: username.to_string(),
                reason: format!("direct: {direct_err}; indirect: {indirect_err}"),
            }),
        }
    }

    async fn dial_direct(
        self: &Arc<Self>,
        username: &str,
        endpoint: SocketAddr,
        _cancel: Option<&CancellationToken>,
    ) -> Result<Arc<Connection>> {
        let conn = Connection::connect(
            endpoint,
            self.cfg.timeouts.connect,
            Some(self.cfg.timeouts.peer_inactivity),
        )
        .await?;
        let init = PeerInit {
            username: self.our_username()?,
            connection_type: ConnectionType::Message,
            token: self.tokens.next(),
        };
        conn.write_message(&init.to_frame()).await?;
        debug!(username, remote = %conn.remote(), "direct peer connection established");
        Ok(conn)
    }

    /// Registers a solicitation, asks the server to rendezvous, and waits for
    /// the remote side to pierce back through our listener. The solicitation
    /// entry is removed on every exit path.
    async fn solicit_indirect(
        self: &Arc<Self>,
        username: &str,
        connection_type: ConnectionType,
        cancel: Option<&CancellationToken>,
    ) -> Result<Arc<Connection>> {
        let token = self.tokens.next();
        self.solicitations.insert(token, username.to_string());

        let result = async {
            let server = self.server()?;
            let wait = self.waiter.register::<Arc<Connection>>(
                WaitKey::SolicitedConnection {
                    username: username.to_string(),
                    token,
                },
            );
            server
                .send(
                    ConnectToPeerRequest {
                        token,
                        username: username.to_string(),
                        connection_type,
                    }
                    .to_frame(),
                )
                .await?;
            wait.resolve(self.cfg.timeouts.message, cancel).await
        }
        .await;

        self.solicitations.remove(&token);
        result
    }

    async fn establish_transfer_connection(
        self: &Arc<Self>,
        username: &str,
        endpoint: SocketAddr,
        token: i32,
        cancel: Option<&CancellationToken>,
    ) -> Result<Arc<Connection>> {
        let direct = async {
            let conn = Connection::connect(
                endpoint,
                self.cfg.timeouts.connect,
                Some(self.cfg.timeouts.transfer_inactivity),
            )
            .await?;
            let init = PeerInit {
                username: self.our_username()?,
                connection_type: ConnectionType::Transfer,
                token,
            };
            conn.write_message(&init.to_frame()).await?;
            Ok::<_, SlskError>(conn)
        };

        let direct_err = match direct.await {
            Ok(conn) => return Ok(conn),
            Err(e @ SlskError::Cancelled(_)) => return Err(e),
            Err(e) => e,
        };
        debug!(username, %direct_err, "direct transfer connection failed, going indirect");

        match self
            .solicit_indirect(username, ConnectionType::Transfer, cancel)
            .await
        {
            Ok(conn) => Ok(conn),
            Err(e @ SlskError::Cancelled(_)) => Err(e),
            Err(indirect_err) => Err(SlskError::ConnectionFailed {
                username: username.to_string(),
                reason: format!("direct: {direct_err}; indirect: {indirect_err}"),
            }),
        }
    }

    /// Stores the connection in the record and spawns its read loop; the
    /// permit rides with the loop task and is released when it ends.
    fn adopt(
        self: &Arc<Self>,
        record: &Arc<PeerRecord>,
        slot: &mut Option<Arc<Connection>>,
        conn: Arc<Connection>,
        permit: OwnedSemaphorePermit,
    ) {
        *slot = Some(conn.clone());

        let manager = Arc::clone(self);
        let username = record.username.clone();
        let record = Arc::clone(record);
        tokio::spawn(async move {
            manager.peer_read_loop(&username, &conn).await;
            conn.disconnect("peer read loop ended");
            manager.cleanup_record(&record, &conn).await;
            drop(permit);
        });
    }

    async fn cleanup_record(&self, record: &Arc<PeerRecord>, conn: &Arc<Connection>) {
        let mut slot = record.slot.lock().await;
        if let Some(current) = slot.as_ref()
            && Arc::ptr_eq(current, conn)
        {
            *slot = None;
            drop(slot);
            self.records
                .remove_if(&record.username, |_, r| Arc::ptr_eq(r, record));
        }
    }

    pub(crate) fn track_transfer_conn(
        self: &Arc<Self>,
        username: &str,
        token: i32,
        conn: Arc<Connection>,
    ) {
        let key = TransferKey {
            username: username.to_string(),
            token,
        };
        self.transfer_conns.insert(key.clone(), conn.clone());

        let manager = Arc::clone(self);
        tokio::spawn(async move {
            conn.closed().cancelled().await;
            manager.transfer_conns.remove(&key);
        });
    }

    async fn peer_read_loop(self: &Arc<Self>, username: &str, conn: &Arc<Connection>) {
        loop {
            let payload = match conn.read_message().await {
                Ok(payload) => payload,
                Err(e) => {
                    debug!(username, %e, "peer message connection closed");
                    return;
                },
            };
            if let Err(e) = self.dispatch_peer_message(username, conn, payload).await {
                warn!(username, %e, "failed to handle peer message");
            }
        }
    }

    /// Routes one inbound peer session message into the wait registry, the
    /// search registry, or a courtesy reply.
    async fn dispatch_peer_message(
        self: &Arc<Self>,
        username: &str,
        conn: &Arc<Connection>,
        payload: Bytes,
    ) -> Result<()> {
        let (code, mut r) = split_peer_message(payload)?;
        match code {
            PeerCode::SharesReply => {
                let reply = SharesReply::from_reader(&mut r)?;
                self.waiter.complete(
                    &WaitKey::PeerReply(PeerCode::SharesReply, username.to_string()),
                    reply,
                );
            },
            PeerCode::UserInfoReply => {
                let reply = UserInfoReply::from_reader(&mut r)?;
                self.waiter.complete(
                    &WaitKey::PeerReply(PeerCode::UserInfoReply, username.to_string()),
                    reply,
                );
            },
            PeerCode::SearchResponse => {
                let response =
                    crate::proto::peer::SearchResponse::from_reader(&mut r)?;
                self.searches.dispatch(response);
            },
            PeerCode::TransferResponse => {
                let response = TransferResponse::from_reader(&mut r)?;
                self.waiter.complete(
                    &WaitKey::TransferResponse {
                        username: username.to_string(),
                        token: response.token,
                    },
                    response,
                );
            },
            PeerCode::TransferRequest => {
                let request = TransferRequest::from_reader(&mut r)?;
                self.handle_inbound_transfer_request(username, conn, request)
                    .await?;
            },
            PeerCode::PlaceInQueueResponse => {
                let response = PlaceInQueueResponse::from_reader(&mut r)?;
                self.waiter.complete(
                    &WaitKey::PlaceInQueue {
                        username: username.to_string(),
                        filename: response.filename.clone(),
                    },
                    response,
                );
            },
            PeerCode::QueueFailed => {
                let failed = QueueFailedNotification::from_reader(&mut r)?;
                self.waiter.fail(
                    &WaitKey::TransferRequested {
                        username: username.to_string(),
                        filename: failed.filename.clone(),
                    },
                    SlskError::TransferRejected(failed.reason),
                );
            },
            PeerCode::UploadFailed => {
                let failed = UploadFailedNotification::from_reader(&mut r)?;
                self.waiter.fail(
                    &WaitKey::TransferRequested {
                        username: username.to_string(),
                        filename: failed.filename.clone(),
                    },
                    SlskError::TransferRejected(format!(
                        "the peer reported a failed upload of {}",
                        failed.filename
                    )),
                );
            },
            PeerCode::SharesRequest => {
                // We do not serve shares; answer with an empty listing.
                conn.write_message(&SharesReply::default().to_frame()).await?;
            },
            PeerCode::UserInfoRequest => {
                let reply = UserInfoReply {
                    description: String::new(),
                    picture: None,
                    upload_slots: 0,
                    queue_length: 0,
                    has_free_slot: false,
                };
                conn.write_message(&reply.to_frame()).await?;
            },
            PeerCode::QueueUpload => {
                let queued = QueueUploadCommand::from_reader(&mut r)?;
                let failed = QueueFailedNotification {
                    filename: queued.filename,
                    reason: "File not shared.".into(),
                };
                conn.write_message(&failed.to_frame()).await?;
            },
            PeerCode::PlaceInQueueRequest => {
                debug!(username, "place-in-queue query for a file we do not serve");
            },
        }
        Ok(())
    }

    /// An inbound `TransferRequest`. The upload direction is a peer getting
    /// ready to send us a file we queued; the download direction is a peer
    /// asking for one of ours, which this client does not serve.
    async fn handle_inbound_transfer_request(
        self: &Arc<Self>,
        username: &str,
        conn: &Arc<Connection>,
        request: TransferRequest,
    ) -> Result<()> {
        match request.direction {
            TransferDirection::Upload => {
                let key = WaitKey::TransferRequested {
                    username: username.to_string(),
                    filename: request.filename.clone(),
                };
                if self.waiter.pending(&key) == 0 {
                    debug!(
                        username,
                        filename = %request.filename,
                        "unsolicited upload offer, declining"
                    );
                    let decline = TransferResponse::disallowed(request.token, "Cancelled.");
                    conn.write_message(&decline.to_frame()).await?;
                    return Ok(());
                }
                self.waiter.complete(&key, request);
            },
            TransferDirection::Download => {
                let decline = TransferResponse::disallowed(
                    request.token,
                    TransferResponse::NOT_SHARED,
                );
                conn.write_message(&decline.to_frame()).await?;
            },
        }
        Ok(())
    }
}
