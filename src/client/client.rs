// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The client façade: wires the wait registry, token source, peer manager,
//! listener, server link and transfer engine together and exposes the
//! one-shot awaitable operations. Every operation except `connect` and
//! `login` validates `CONNECTED ∧ LOGGED_IN` first.

use std::{
    io::Cursor,
    net::Ipv4Addr,
    sync::{Arc, Mutex as StdMutex},
};

use bytes::Bytes;
use dashmap::DashMap;
use tokio::{
    io::AsyncWrite,
    sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    cfg::config::Config,
    client::{
        BrowseOptions, ClientStates, DownloadOptions, UploadOptions,
        events::ClientEvent,
    },
    error::{Result, SlskError},
    net::{
        connection::Connection,
        listener::Listener,
        peers::PeerManager,
        server::ServerConnection,
    },
    proto::{
        PeerCode, ServerCode, TransferDirection,
        peer::{
            PlaceInQueueRequest, PlaceInQueueResponse, SharesReply, SharesRequest,
            UploadFailedNotification, UserInfoReply, UserInfoRequest,
        },
        server::{
            AcknowledgeNotifyPrivilegesCommand, AcknowledgePrivateMessageCommand,
            ChangePasswordCommand, CheckPrivilegesRequest, CheckPrivilegesResponse,
            FileSearchRequest, GetPeerAddressRequest, GetPeerAddressResponse,
            GetUserStatusRequest, GetUserStatusResponse, GivePrivilegesCommand,
            HaveNoParentsCommand, JoinRoomRequest, JoinRoomResponse, LeaveRoomRequest,
            LeaveRoomResponse, LoginRequest, LoginResponse, PrivateMessageCommand,
            Room, RoomListRequest, RoomListResponse, RoomSearchRequest,
            SayChatroomCommand, ServerPingCommand, SetWaitPortCommand,
            UserSearchRequest, WatchUserRequest, WatchUserResponse,
        },
    },
    search::{SearchOptions, SearchRegistry, SearchResults, SearchScope, collect_responses},
    transfer::{
        Transfer, TransferCleanup, TransferProgress, TransferStates, TransferTracker,
        common::StateMachineCtx,
        download::DownloadCtx,
        upload::{UploadCtx, UploadSource},
    },
    utils::{TokenFactory, password_digest},
    waits::{WaitKey, WaitPayload, Waiter},
};

pub struct SoulseekClient {
    cfg: Config,
    waiter: Arc<Waiter>,
    tokens: Arc<TokenFactory>,
    transfers: Arc<TransferTracker>,
    searches: Arc<SearchRegistry>,
    peers: Arc<PeerManager>,

    server: StdMutex<Option<Arc<ServerConnection>>>,
    state: StdMutex<ClientStates>,
    username: StdMutex<Option<String>>,
    upload_locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
    listener_cancel: StdMutex<Option<CancellationToken>>,
    listener_port: StdMutex<Option<u16>>,

    events_tx: UnboundedSender<ClientEvent>,
    events_rx: StdMutex<Option<UnboundedReceiver<ClientEvent>>>,
}

impl SoulseekClient {
    pub fn new(cfg: Config) -> Result<Arc<Self>> {
        cfg.validate()
            .map_err(|e| SlskError::InvalidArgument(e.to_string()))?;

        let waiter = Waiter::new(cfg.timeouts.message);
        let tokens = Arc::new(TokenFactory::new());
        let transfers = TransferTracker::new();
        let searches = SearchRegistry::new();
        let peers = PeerManager::new(
            cfg.clone(),
            Arc::clone(&waiter),
            Arc::clone(&tokens),
            Arc::clone(&searches),
        );
        let (events_tx, events_rx) = unbounded_channel();

        Ok(Arc::new(Self {
            cfg,
            waiter,
            tokens,
            transfers,
            searches,
            peers,
            server: StdMutex::new(None),
            state: StdMutex::new(ClientStates::DISCONNECTED),
            username: StdMutex::new(None),
            upload_locks: DashMap::new(),
            listener_cancel: StdMutex::new(None),
            listener_port: StdMutex::new(None),
            events_tx,
            events_rx: StdMutex::new(Some(events_rx)),
        }))
    }

    /// The event stream; can be taken exactly once.
    pub fn events(&self) -> Option<UnboundedReceiver<ClientEvent>> {
        self.events_rx.lock().expect("events lock poisoned").take()
    }

    pub fn state(&self) -> ClientStates {
        *self.state.lock().expect("state lock poisoned")
    }

    pub fn username(&self) -> Option<String> {
        self.username.lock().expect("username lock poisoned").clone()
    }

    /// The peer connection layer, exposed for advanced callers that manage
    /// connections directly.
    pub fn peer_manager(&self) -> &Arc<PeerManager> {
        &self.peers
    }

    /// The bound listen port, once connected with a configured listener.
    pub fn listener_port(&self) -> Option<u16> {
        *self
            .listener_port
            .lock()
            .expect("listener port lock poisoned")
    }

    /// Dials the server and starts the listener (when a port is configured).
    pub async fn connect(self: &Arc<Self>) -> Result<()> {
        if self.state().contains(ClientStates::CONNECTED) {
            return Err(SlskError::InvalidState("already connected".into()));
        }

        let server = ServerConnection::connect(
            self.cfg.clone(),
            Arc::clone(&self.waiter),
            Arc::clone(&self.peers),
            Arc::clone(&self.transfers),
            self.events_tx.clone(),
        )
        .await?;
        self.peers.bind_server(Arc::downgrade(&server));

        if let Some(port) = self.cfg.listener.port {
            let listener = match Listener::bind(port).await {
                Ok(listener) => listener,
                Err(e) => {
                    server.disconnect("listener bind failed");
                    return Err(e);
                },
            };
            *self
                .listener_port
                .lock()
                .expect("listener port lock poisoned") = Some(listener.local_port());
            let cancel = CancellationToken::new();
            listener.spawn(Arc::clone(&self.peers), cancel.clone());
            *self
                .listener_cancel
                .lock()
                .expect("listener cancel lock poisoned") = Some(cancel);
        }

        let closed = server.closed();
        *self.server.lock().expect("server lock poisoned") = Some(server);

        let client = Arc::clone(self);
        tokio::spawn(async move {
            closed.cancelled().await;
            client.handle_disconnect("server connection closed");
        });

        self.set_state(ClientStates::CONNECTED, None);
        Ok(())
    }

    /// Presents credentials; on success announces the listen port and, when
    /// distributed networking is enabled, that we have no parents yet.
    pub async fn login(
        &self,
        username: &str,
        password: &str,
        cancel: Option<&CancellationToken>,
    ) -> Result<()> {
        let state = self.state();
        if !state.contains(ClientStates::CONNECTED) {
            return Err(SlskError::InvalidState("not connected".into()));
        }
        if state.contains(ClientStates::LOGGED_IN) {
            return Err(SlskError::InvalidState("already logged in".into()));
        }
        require_non_blank("username", username)?;
        require_non_blank("password", password)?;

        let server = self.server()?;
        let request = LoginRequest {
            username: username.to_string(),
            password: password.to_string(),
            version: self.cfg.server.client_version,
            digest: password_digest(username, password),
            minor_version: self.cfg.server.minor_version,
        };

        let wait = self
            .waiter
            .register::<LoginResponse>(WaitKey::ServerReply(ServerCode::Login));
        server.send(request.to_frame()).await?;
        let response = wait.resolve(self.cfg.timeouts.message, cancel).await?;

        if !response.succeeded {
            // The server closes the connection right after a rejection.
            return Err(SlskError::LoginRejected(response.message));
        }

        *self.username.lock().expect("username lock poisoned") =
            Some(username.to_string());
        self.peers.set_username(username);
        self.set_state(
            ClientStates::CONNECTED | ClientStates::LOGGED_IN,
            Some(response.message),
        );

        // Post-login announcements are best-effort; the session stands
        // either way.
        if let Some(port) = self.listener_port() {
            if let Err(e) = server
                .send(SetWaitPortCommand { port: port as u32 }.to_frame())
                .await
            {
                warn!(%e, "failed to announce the listen port");
            }
        }
        if self.cfg.runtime.enable_distributed_network {
            let announce = HaveNoParentsCommand {
                have_no_parents: true,
            };
            if let Err(e) = server.send(announce.to_frame()).await {
                warn!(%e, "failed to announce distributed state");
            }
        }
        Ok(())
    }

    /// Idempotent; always leaves the client `DISCONNECTED` and emits at most
    /// one `Disconnected` event per session.
    pub fn disconnect(&self, message: &str) {
        self.handle_disconnect(message);
    }

    pub async fn ping_server(&self, cancel: Option<&CancellationToken>) -> Result<()> {
        self.ensure_ready()?;
        self.server_request::<()>(
            ServerPingCommand.to_frame(),
            WaitKey::ServerReply(ServerCode::ServerPing),
            cancel,
        )
        .await
    }

    pub async fn get_user_address(
        &self,
        username: &str,
        cancel: Option<&CancellationToken>,
    ) -> Result<(Ipv4Addr, u32)> {
        self.ensure_ready()?;
        require_non_blank("username", username)?;

        let response: GetPeerAddressResponse = self
            .server_request(
                GetPeerAddressRequest {
                    username: username.to_string(),
                }
                .to_frame(),
                WaitKey::ServerReplyForUser(
                    ServerCode::GetPeerAddress,
                    username.to_string(),
                ),
                cancel,
            )
            .await?;
        if response.ip == Ipv4Addr::UNSPECIFIED {
            return Err(SlskError::UserOffline(username.to_string()));
        }
        Ok((response.ip, response.port))
    }

    pub async fn get_user_status(
        &self,
        username: &str,
        cancel: Option<&CancellationToken>,
    ) -> Result<GetUserStatusResponse> {
        self.ensure_ready()?;
        require_non_blank("username", username)?;
        self.server_request(
            GetUserStatusRequest {
                username: username.to_string(),
            }
            .to_frame(),
            WaitKey::ServerReplyForUser(ServerCode::GetUserStatus, username.to_string()),
            cancel,
        )
        .await
    }

    /// Days of privilege remaining on our own account.
    pub async fn get_user_privileges(
        &self,
        cancel: Option<&CancellationToken>,
    ) -> Result<u32> {
        self.ensure_ready()?;
        let response: CheckPrivilegesResponse = self
            .server_request(
                CheckPrivilegesRequest.to_frame(),
                WaitKey::ServerReply(ServerCode::CheckPrivileges),
                cancel,
            )
            .await?;
        Ok(response.days_remaining)
    }

    pub async fn add_user(
        &self,
        username: &str,
        cancel: Option<&CancellationToken>,
    ) -> Result<WatchUserResponse> {
        self.ensure_ready()?;
        require_non_blank("username", username)?;
        let response: WatchUserResponse = self
            .server_request(
                WatchUserRequest {
                    username: username.to_string(),
                }
                .to_frame(),
                WaitKey::ServerReplyForUser(ServerCode::WatchUser, username.to_string()),
                cancel,
            )
            .await?;
        if !response.exists {
            return Err(SlskError::UserNotFound(username.to_string()));
        }
        Ok(response)
    }

    pub async fn get_room_list(
        &self,
        cancel: Option<&CancellationToken>,
    ) -> Result<Vec<Room>> {
        self.ensure_ready()?;
        let response: RoomListResponse = self
            .server_request(
                RoomListRequest.to_frame(),
                WaitKey::ServerReply(ServerCode::RoomList),
                cancel,
            )
            .await?;
        Ok(response.rooms)
    }

    pub async fn join_room(
        &self,
        room: &str,
        cancel: Option<&CancellationToken>,
    ) -> Result<JoinRoomResponse> {
        self.ensure_ready()?;
        require_non_blank("room", room)?;
        self.server_request(
            JoinRoomRequest {
                room: room.to_string(),
            }
            .to_frame(),
            WaitKey::ServerReplyForUser(ServerCode::JoinRoom, room.to_string()),
            cancel,
        )
        .await
    }

    pub async fn leave_room(
        &self,
        room: &str,
        cancel: Option<&CancellationToken>,
    ) -> Result<()> {
        self.ensure_ready()?;
        require_non_blank("room", room)?;
        let _response: LeaveRoomResponse = self
            .server_request(
                LeaveRoomRequest {
                    room: room.to_string(),
                }
                .to_frame(),
                WaitKey::ServerReplyForUser(ServerCode::LeaveRoom, room.to_string()),
                cancel,
            )
            .await?;
        Ok(())
    }

    pub async fn send_room_message(&self, room: &str, message: &str) -> Result<()> {
        self.ensure_ready()?;
        require_non_blank("room", room)?;
        require_non_blank("message", message)?;
        self.server()?
            .send(
                SayChatroomCommand {
                    room: room.to_string(),
                    message: message.to_string(),
                }
                .to_frame(),
            )
            .await
    }

    pub async fn send_private_message(
        &self,
        username: &str,
        message: &str,
    ) -> Result<()> {
        self.ensure_ready()?;
        require_non_blank("username", username)?;
        require_non_blank("message", message)?;
        self.server()?
            .send(
                PrivateMessageCommand {
                    username: username.to_string(),
                    message: message.to_string(),
                }
                .to_frame(),
            )
            .await
    }

    pub async fn acknowledge_private_message(&self, id: u32) -> Result<()> {
        self.ensure_ready()?;
        self.server()?
            .send(AcknowledgePrivateMessageCommand { id }.to_frame())
            .await
    }

    pub async fn acknowledge_privilege_notification(&self, token: i32) -> Result<()> {
        self.ensure_ready()?;
        self.server()?
            .send(AcknowledgeNotifyPrivilegesCommand { token }.to_frame())
            .await
    }

    pub async fn change_password(
        &self,
        password: &str,
        cancel: Option<&CancellationToken>,
    ) -> Result<()> {
        self.ensure_ready()?;
        require_non_blank("password", password)?;
        let echoed: ChangePasswordCommand = self
            .server_request(
                ChangePasswordCommand {
                    password: password.to_string(),
                }
                .to_frame(),
                WaitKey::ServerReply(ServerCode::ChangePassword),
                cancel,
            )
            .await?;
        if echoed.password != password {
            return Err(SlskError::protocol(
                "server echoed a different password than requested",
            ));
        }
        Ok(())
    }

    pub async fn grant_privileges(&self, username: &str, days: u32) -> Result<()> {
        self.ensure_ready()?;
        require_non_blank("username", username)?;
        self.server()?
            .send(
                GivePrivilegesCommand {
                    username: username.to_string(),
                    days,
                }
                .to_frame(),
            )
            .await
    }

    /// Peer-to-peer: a user's profile (description, slots, queue length).
    pub async fn get_user_info(
        &self,
        username: &str,
        cancel: Option<&CancellationToken>,
    ) -> Result<UserInfoReply> {
        self.ensure_ready()?;
        require_non_blank("username", username)?;

        let conn = self
            .peers
            .get_or_add_message_connection(username, cancel)
            .await?;
        let wait = self.waiter.register::<UserInfoReply>(WaitKey::PeerReply(
            PeerCode::UserInfoReply,
            username.to_string(),
        ));
        conn.write_message(&UserInfoRequest.to_frame()).await?;
        wait.resolve(self.cfg.timeouts.message, cancel).await
    }

    /// Peer-to-peer: a user's full share listing.
    pub async fn browse(
        &self,
        username: &str,
        options: BrowseOptions,
        cancel: Option<&CancellationToken>,
    ) -> Result<SharesReply> {
        self.ensure_ready()?;
        require_non_blank("username", username)?;

        let conn = self
            .peers
            .get_or_add_message_connection(username, cancel)
            .await?;
        let wait = self.waiter.register::<SharesReply>(WaitKey::PeerReply(
            PeerCode::SharesReply,
            username.to_string(),
        ));
        conn.write_message(&SharesRequest.to_frame()).await?;

        let deadline = options
            .response_timeout
            .unwrap_or(self.cfg.timeouts.message);
        let reply = wait.resolve(deadline, cancel).await?;

        if let Some(on_progress) = &options.on_progress {
            // The one and only progress update: the listing's wire size.
            let bytes = (reply.to_frame().len() - 4) as u64;
            on_progress(bytes);
        }
        Ok(reply)
    }

    /// Scope-aware search; completes on inactivity, limits, or cancellation.
    pub async fn search(
        &self,
        text: &str,
        scope: SearchScope,
        options: SearchOptions,
        token: Option<i32>,
        cancel: Option<&CancellationToken>,
    ) -> Result<SearchResults> {
        self.ensure_ready()?;
        require_non_blank("search text", text)?;
        match &scope {
            SearchScope::Users(users) if users.is_empty() => {
                return Err(SlskError::InvalidArgument(
                    "user-scoped search needs at least one user".into(),
                ));
            },
            SearchScope::Users(users) => {
                for user in users {
                    require_non_blank("username", user)?;
                }
            },
            SearchScope::Room(room) => require_non_blank("room", room)?,
            SearchScope::Default => {},
        }

        let token = self.claim_token(token)?;
        let rx = self.searches.register(token);

        let submitted: Result<()> = async {
            let server = self.server()?;
            match &scope {
                SearchScope::Default => {
                    server
                        .send(
                            FileSearchRequest {
                                token,
                                text: text.to_string(),
                            }
                            .to_frame(),
                        )
                        .await
                },
                SearchScope::Users(users) => {
                    for user in users {
                        server
                            .send(
                                UserSearchRequest {
                                    username: user.clone(),
                                    token,
                                    text: text.to_string(),
                                }
                                .to_frame(),
                            )
                            .await?;
                    }
                    Ok(())
                },
                SearchScope::Room(room) => {
                    server
                        .send(
                            RoomSearchRequest {
                                room: room.clone(),
                                token,
                                text: text.to_string(),
                            }
                            .to_frame(),
                        )
                        .await
                },
            }
        }
        .await;
        if let Err(e) = submitted {
            self.searches.remove(token);
            return Err(e);
        }

        Ok(collect_responses(
            &self.searches,
            token,
            text.to_string(),
            rx,
            &options,
            self.cfg.timeouts.search_inactivity,
            cancel,
        )
        .await)
    }

    /// Downloads into a caller-supplied sink; resolves with the final
    /// progress snapshot once the transfer reaches its terminal state.
    pub async fn download(
        &self,
        username: &str,
        filename: &str,
        sink: &mut (dyn AsyncWrite + Unpin + Send),
        options: DownloadOptions,
        cancel: Option<&CancellationToken>,
    ) -> Result<TransferProgress> {
        self.ensure_ready()?;
        require_non_blank("username", username)?;
        require_non_blank("filename", filename)?;

        let token = self.claim_token(options.token)?;
        let transfer = Transfer::new(
            TransferDirection::Download,
            username,
            filename,
            token,
            options.start_offset,
            options.on_progress.clone(),
        );
        self.transfers.try_insert(Arc::clone(&transfer))?;
        let _cleanup = TransferCleanup {
            tracker: Arc::clone(&self.transfers),
            transfer: Arc::clone(&transfer),
        };

        let result = self
            .run_download(&transfer, sink, &options, cancel)
            .await;
        match result {
            Ok(()) => Ok(transfer.progress()),
            Err(e) => {
                transfer.set_state(TransferStates::terminal_from_error(&e));
                Err(e)
            },
        }
    }

    /// Convenience wrapper that collects the file into memory.
    pub async fn download_to_vec(
        &self,
        username: &str,
        filename: &str,
        options: DownloadOptions,
        cancel: Option<&CancellationToken>,
    ) -> Result<(Vec<u8>, TransferProgress)> {
        let mut sink = Cursor::new(Vec::new());
        let progress = self
            .download(username, filename, &mut sink, options, cancel)
            .await?;
        Ok((sink.into_inner(), progress))
    }

    /// Uploads from a seekable source. The peer picks the start offset.
    pub async fn upload(
        &self,
        username: &str,
        filename: &str,
        size: u64,
        source: &mut dyn UploadSource,
        options: UploadOptions,
        cancel: Option<&CancellationToken>,
    ) -> Result<TransferProgress> {
        self.ensure_ready()?;
        require_non_blank("username", username)?;
        require_non_blank("filename", filename)?;

        let token = self.claim_token(options.token)?;
        let transfer = Transfer::new(
            TransferDirection::Upload,
            username,
            filename,
            token,
            0,
            options.on_progress.clone(),
        );
        transfer.set_size(size);
        self.transfers.try_insert(Arc::clone(&transfer))?;
        let _cleanup = TransferCleanup {
            tracker: Arc::clone(&self.transfers),
            transfer: Arc::clone(&transfer),
        };

        let result = self
            .run_upload(&transfer, source, &options, cancel)
            .await;
        match result {
            Ok(()) => Ok(transfer.progress()),
            Err(e) => {
                transfer.set_state(TransferStates::terminal_from_error(&e));
                Err(e)
            },
        }
    }

    /// Convenience wrapper for in-memory payloads.
    pub async fn upload_bytes(
        &self,
        username: &str,
        filename: &str,
        data: &[u8],
        options: UploadOptions,
        cancel: Option<&CancellationToken>,
    ) -> Result<TransferProgress> {
        let mut source = Cursor::new(data);
        self.upload(
            username,
            filename,
            data.len() as u64,
            &mut source,
            options,
            cancel,
        )
        .await
    }

    /// Asks the peer where a queued download of ours currently sits.
    pub async fn get_download_place_in_queue(
        &self,
        username: &str,
        filename: &str,
        cancel: Option<&CancellationToken>,
    ) -> Result<u32> {
        self.ensure_ready()?;
        require_non_blank("username", username)?;
        require_non_blank("filename", filename)?;

        if self.transfers.find_download(username, filename).is_none() {
            return Err(SlskError::TransferNotFound(format!(
                "{username}:{filename}"
            )));
        }

        let conn = self
            .peers
            .get_or_add_message_connection(username, cancel)
            .await?;
        let wait = self
            .waiter
            .register::<PlaceInQueueResponse>(WaitKey::PlaceInQueue {
                username: username.to_string(),
                filename: filename.to_string(),
            });
        conn.write_message(
            &PlaceInQueueRequest {
                filename: filename.to_string(),
            }
            .to_frame(),
        )
        .await?;
        let response = wait.resolve(self.cfg.timeouts.message, cancel).await?;
        Ok(response.place)
    }

    // --- internals ---

    async fn run_download(
        &self,
        transfer: &Arc<Transfer>,
        sink: &mut (dyn AsyncWrite + Unpin + Send),
        options: &DownloadOptions,
        cancel: Option<&CancellationToken>,
    ) -> Result<()> {
        let peer_conn = self
            .peers
            .get_or_add_message_connection(&transfer.username, cancel)
            .await?;

        let mut ctx = DownloadCtx::new(
            Arc::clone(&self.waiter),
            Arc::clone(&self.peers),
            self.cfg.clone(),
            Arc::clone(transfer),
            peer_conn,
            sink,
            options.governor.clone(),
        );
        let cancel = cancel.cloned().unwrap_or_default();
        ctx.execute(&cancel).await
    }

    async fn run_upload(
        &self,
        transfer: &Arc<Transfer>,
        source: &mut dyn UploadSource,
        options: &UploadOptions,
        cancel: Option<&CancellationToken>,
    ) -> Result<()> {
        let cancel = cancel.cloned().unwrap_or_default();

        // One upload per peer at a time; the official network cannot
        // multiplex them.
        let lock = self
            .upload_locks
            .entry(transfer.username.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        let _upload_guard = tokio::select! {
            _ = cancel.cancelled() => {
                return Err(SlskError::cancelled("upload slot acquisition"));
            },
            guard = lock.lock_owned() => guard,
        };

        let peer_conn = self
            .peers
            .get_or_add_message_connection(&transfer.username, Some(&cancel))
            .await?;

        let mut ctx = UploadCtx::new(
            Arc::clone(&self.waiter),
            Arc::clone(&self.peers),
            self.cfg.clone(),
            Arc::clone(transfer),
            Arc::clone(&peer_conn),
            source,
            options.governor.clone(),
        );
        let result = ctx.execute(&cancel).await;
        drop(ctx);

        if result.is_err() {
            self.send_upload_failed(&peer_conn, &transfer.filename).await;
        }
        result
    }

    /// Best-effort only; failures are logged and swallowed.
    async fn send_upload_failed(&self, conn: &Arc<Connection>, filename: &str) {
        let failed = UploadFailedNotification {
            filename: filename.to_string(),
        };
        if let Err(e) = conn.write_message(&failed.to_frame()).await {
            debug!(%e, filename, "best-effort upload-failed notice not delivered");
        }
    }

    async fn server_request<T>(
        &self,
        frame: Bytes,
        key: WaitKey,
        cancel: Option<&CancellationToken>,
    ) -> Result<T>
    where
        T: TryFrom<WaitPayload, Error = WaitPayload>,
    {
        let server = self.server()?;
        let wait = self.waiter.register::<T>(key);
        server.send(frame).await?;
        wait.resolve(self.cfg.timeouts.message, cancel).await
    }

    fn server(&self) -> Result<Arc<ServerConnection>> {
        self.server
            .lock()
            .expect("server lock poisoned")
            .clone()
            .ok_or_else(|| SlskError::InvalidState("not connected".into()))
    }

    fn ensure_ready(&self) -> Result<()> {
        let state = self.state();
        if !state.contains(ClientStates::CONNECTED | ClientStates::LOGGED_IN) {
            return Err(SlskError::InvalidState(
                "the client must be connected and logged in".into(),
            ));
        }
        Ok(())
    }

    /// Allocates (or validates) a token, rejecting any still alive across
    /// downloads, uploads and searches.
    fn claim_token(&self, requested: Option<i32>) -> Result<i32> {
        let token = requested.unwrap_or_else(|| self.tokens.next());
        if self.transfers.token_in_use(token) || self.searches.contains(token) {
            return Err(SlskError::DuplicateToken(token));
        }
        Ok(token)
    }

    fn set_state(&self, to: ClientStates, message: Option<String>) {
        let from = {
            let mut state = self.state.lock().expect("state lock poisoned");
            let from = *state;
            *state = to;
            from
        };
        if from != to {
            let _ = self.events_tx.send(ClientEvent::StateChanged { from, to, message });
        }
    }

    fn handle_disconnect(&self, message: &str) {
        // The state transition and the idempotence check are one atomic
        // step, so concurrent disconnect paths cannot both run the teardown.
        let from = {
            let mut state = self.state.lock().expect("state lock poisoned");
            if *state == ClientStates::DISCONNECTED {
                return;
            }
            let from = *state;
            *state = ClientStates::DISCONNECTED;
            from
        };

        warn!(message, "disconnecting from the server");
        self.waiter.cancel_all();
        self.peers.remove_and_dispose_all();

        if let Some(cancel) = self
            .listener_cancel
            .lock()
            .expect("listener cancel lock poisoned")
            .take()
        {
            cancel.cancel();
        }
        if let Some(server) = self.server.lock().expect("server lock poisoned").take() {
            server.disconnect(message);
        }
        *self.username.lock().expect("username lock poisoned") = None;

        let _ = self.events_tx.send(ClientEvent::StateChanged {
            from,
            to: ClientStates::DISCONNECTED,
            message: Some(message.to_string()),
        });
        let _ = self.events_tx.send(ClientEvent::Disconnected {
            message: message.to_string(),
        });
    }
}

fn require_non_blank(what: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(SlskError::InvalidArgument(format!(
            "{what} must not be empty or whitespace"
        )));
    }
    Ok(())
}
