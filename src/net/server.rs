// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The long-lived server link and its message dispatcher.
//!
//! Inbound frames fall into three buckets: reply-correlation messages that
//! complete waits, server-pushed rendezvous (`ConnectToPeer`) that go to the
//! peer manager or the transfer rendezvous, and broadcasts that surface as
//! client events. A malformed message of a known code is logged and skipped;
//! it never tears the connection down.

use std::{net::SocketAddr, sync::Arc};

use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    cfg::config::Config,
    client::events::ClientEvent,
    error::{Result, SlskError},
    net::{connection::Connection, peers::PeerManager},
    proto::{
        ConnectionType, ServerCode,
        frame::MessageReader,
        peer::PierceFirewall,
        server::{
            AcknowledgePrivateMessageCommand, ChangePasswordCommand,
            CheckPrivilegesResponse, ConnectToPeerResponse, GetPeerAddressResponse,
            GetUserStatusResponse, GlobalMessageNotification, JoinRoomResponse,
            KickedNotification, LeaveRoomResponse, LoginResponse,
            NetInfoNotification, NotifyPrivilegesNotification,
            PrivateMessageNotification, PrivilegedUsersResponse, RoomListResponse,
            SayChatroomNotification, WatchUserResponse, WishlistIntervalNotification,
        },
    },
    transfer::TransferTracker,
    waits::{WaitKey, Waiter},
};

pub struct ServerConnection {
    conn: Arc<Connection>,
    cfg: Config,
    waiter: Arc<Waiter>,
    peers: Arc<PeerManager>,
    transfers: Arc<TransferTracker>,
    events: tokio::sync::mpsc::UnboundedSender<ClientEvent>,
}

impl ServerConnection {
    /// Dials the configured server and starts the read loop. The inactivity
    /// watchdog is disabled on this connection.
    pub async fn connect(
        cfg: Config,
        waiter: Arc<Waiter>,
        peers: Arc<PeerManager>,
        transfers: Arc<TransferTracker>,
        events: tokio::sync::mpsc::UnboundedSender<ClientEvent>,
    ) -> Result<Arc<Self>> {
        let conn =
            Connection::connect(cfg.server.address.as_str(), cfg.timeouts.connect, None)
                .await?;
        debug!(remote = %conn.remote(), "server connection established");

        let this = Arc::new(Self {
            conn,
            cfg,
            waiter,
            peers,
            transfers,
            events,
        });

        let reader = Arc::clone(&this);
        tokio::spawn(async move {
            if let Err(e) = reader.read_loop().await {
                debug!(%e, "server read loop exited");
            }
        });

        Ok(this)
    }

    pub fn closed(&self) -> CancellationToken {
        self.conn.closed()
    }

    pub fn close_reason(&self) -> Option<String> {
        self.conn.close_reason().map(str::to_string)
    }

    pub fn disconnect(&self, reason: &str) {
        self.conn.disconnect(reason);
    }

    pub async fn send(&self, frame: Bytes) -> Result<()> {
        self.conn.write_message(&frame).await
    }

    async fn read_loop(self: Arc<Self>) -> Result<()> {
        loop {
            let payload = self.conn.read_message().await?;
            if let Err(e) = self.dispatch(payload).await {
                warn!(%e, "failed to handle server message");
            }
        }
    }

    async fn dispatch(&self, payload: Bytes) -> Result<()> {
        let mut r = MessageReader::new(payload);
        let raw = r.read_u32()?;
        let code = match ServerCode::try_from(raw) {
            Ok(code) => code,
            Err(_) => {
                debug!(code = raw, "unknown server message code, skipping");
                return Ok(());
            },
        };

        match code {
            ServerCode::Login => {
                let response = LoginResponse::from_reader(&mut r)?;
                self.waiter
                    .complete(&WaitKey::ServerReply(ServerCode::Login), response);
            },
            ServerCode::GetPeerAddress => {
                let response = GetPeerAddressResponse::from_reader(&mut r)?;
                let key = WaitKey::ServerReplyForUser(
                    ServerCode::GetPeerAddress,
                    response.username.clone(),
                );
                self.waiter.complete(&key, response);
            },
            ServerCode::WatchUser => {
                let response = WatchUserResponse::from_reader(&mut r)?;
                let key = WaitKey::ServerReplyForUser(
                    ServerCode::WatchUser,
                    response.username.clone(),
                );
                self.waiter.complete(&key, response);
            },
            ServerCode::GetUserStatus => {
                let response = GetUserStatusResponse::from_reader(&mut r)?;
                let key = WaitKey::ServerReplyForUser(
                    ServerCode::GetUserStatus,
                    response.username.clone(),
                );
                self.emit(ClientEvent::UserStatusChanged(response.clone()));
                self.waiter.complete(&key, response);
            },
            ServerCode::JoinRoom => {
                let response = JoinRoomResponse::from_reader(&mut r)?;
                let key = WaitKey::ServerReplyForUser(
                    ServerCode::JoinRoom,
                    response.room.clone(),
                );
                self.waiter.complete(&key, response);
            },
            ServerCode::LeaveRoom => {
                let response = LeaveRoomResponse::from_reader(&mut r)?;
                let key = WaitKey::ServerReplyForUser(
                    ServerCode::LeaveRoom,
                    response.room.clone(),
                );
                self.waiter.complete(&key, response);
            },
            ServerCode::RoomList => {
                let response = RoomListResponse::from_reader(&mut r)?;
                self.waiter
                    .complete(&WaitKey::ServerReply(ServerCode::RoomList), response);
            },
            ServerCode::CheckPrivileges => {
                let response = CheckPrivilegesResponse::from_reader(&mut r)?;
                self.waiter.complete(
                    &WaitKey::ServerReply(ServerCode::CheckPrivileges),
                    response,
                );
            },
            ServerCode::ChangePassword => {
                let response = ChangePasswordCommand::from_reader(&mut r)?;
                self.waiter.complete(
                    &WaitKey::ServerReply(ServerCode::ChangePassword),
                    response,
                );
            },
            ServerCode::ServerPing => {
                self.waiter
                    .complete(&WaitKey::ServerReply(ServerCode::ServerPing), ());
            },
            ServerCode::WishlistInterval => {
                let response = WishlistIntervalNotification::from_reader(&mut r)?;
                self.emit(ClientEvent::WishlistIntervalChanged {
                    seconds: response.seconds,
                });
                self.waiter.complete(
                    &WaitKey::ServerReply(ServerCode::WishlistInterval),
                    response,
                );
            },
            ServerCode::PrivilegedUsers => {
                let response = PrivilegedUsersResponse::from_reader(&mut r)?;
                self.emit(ClientEvent::PrivilegedUserListReceived(
                    response.users.clone(),
                ));
                self.waiter.complete(
                    &WaitKey::ServerReply(ServerCode::PrivilegedUsers),
                    response,
                );
            },
            ServerCode::ConnectToPeer => {
                let response = ConnectToPeerResponse::from_reader(&mut r)?;
                self.handle_connect_to_peer(response);
            },
            ServerCode::PrivateMessage => {
                let message = PrivateMessageNotification::from_reader(&mut r)?;
                if self.cfg.runtime.auto_acknowledge_private_messages {
                    let ack = AcknowledgePrivateMessageCommand { id: message.id };
                    if let Err(e) = self.send(ack.to_frame()).await {
                        warn!(%e, "failed to acknowledge private message");
                    }
                }
                self.emit(ClientEvent::PrivateMessageReceived(message));
            },
            ServerCode::SayChatroom => {
                let message = SayChatroomNotification::from_reader(&mut r)?;
                self.emit(ClientEvent::RoomMessageReceived(message));
            },
            ServerCode::GlobalMessage => {
                let message = GlobalMessageNotification::from_reader(&mut r)?;
                self.emit(ClientEvent::GlobalMessageReceived(message.message));
            },
            ServerCode::KickedFromServer => {
                let kicked = KickedNotification::from_reader(&mut r)?;
                warn!(message = %kicked.message, "kicked from the server");
                self.emit(ClientEvent::KickedFromServer {
                    message: kicked.message,
                });
            },
            ServerCode::NotifyPrivileges => {
                let notification = NotifyPrivilegesNotification::from_reader(&mut r)?;
                self.emit(ClientEvent::PrivilegeNotificationReceived {
                    username: notification.username,
                    token: notification.token,
                });
            },
            ServerCode::NetInfo => {
                let info = NetInfoNotification::from_reader(&mut r)?;
                self.peers.update_parent_pool(info.parents);
            },
            other => {
                debug!(?other, "server message with no inbound handling, skipping");
            },
        }
        Ok(())
    }

    /// A server-pushed rendezvous. `"P"` goes to the peer manager; `"F"` is
    /// honored only when a download from that user is actually outstanding,
    /// and otherwise dropped with a warning.
    fn handle_connect_to_peer(&self, response: ConnectToPeerResponse) {
        match response.connection_type {
            ConnectionType::Message => {
                let peers = Arc::clone(&self.peers);
                tokio::spawn(async move {
                    let username = response.username.clone();
                    if let Err(e) =
                        peers.get_or_add_message_connection_from(&response).await
                    {
                        warn!(username, %e, "server-pushed peer rendezvous failed");
                    }
                });
            },
            ConnectionType::Transfer => {
                if !self.transfers.has_pending_download_from(&response.username) {
                    warn!(
                        username = %response.username,
                        "transfer rendezvous with no outstanding download, dropping"
                    );
                    return;
                }
                let peers = Arc::clone(&self.peers);
                let waiter = Arc::clone(&self.waiter);
                let transfers = Arc::clone(&self.transfers);
                let cfg = self.cfg.clone();
                tokio::spawn(async move {
                    if let Err(e) = pierce_transfer_rendezvous(
                        peers, waiter, transfers, cfg, response,
                    )
                    .await
                    {
                        warn!(%e, "transfer rendezvous failed");
                    }
                });
            },
        }
    }

    fn emit(&self, event: ClientEvent) {
        let _ = self.events.send(event);
    }
}

/// Dials back a `"F"` rendezvous: pierce, read the peer's 4-byte remote
/// token, and hand the connection to the download parked on the indirect
/// wait.
async fn pierce_transfer_rendezvous(
    peers: Arc<PeerManager>,
    waiter: Arc<Waiter>,
    transfers: Arc<TransferTracker>,
    cfg: Config,
    response: ConnectToPeerResponse,
) -> Result<()> {
    let endpoint = SocketAddr::from((response.ip, response.port as u16));
    let conn = Connection::connect(
        endpoint,
        cfg.timeouts.connect,
        Some(cfg.timeouts.transfer_inactivity),
    )
    .await?;
    conn.write_message(
        &PierceFirewall {
            token: response.token,
        }
        .to_frame(),
    )
    .await?;

    let remote_token = conn.read_i32_le().await?;
    let Some(download) =
        transfers.download_for_remote_token(&response.username, remote_token)
    else {
        conn.disconnect("no download matches the pierced transfer");
        return Err(SlskError::protocol(format!(
            "pierced transfer from {} carries unknown remote token {remote_token}",
            response.username
        )));
    };

    peers.track_transfer_conn(&response.username, remote_token, conn.clone());
    waiter.complete(
        &WaitKey::IndirectTransfer {
            username: response.username.clone(),
            filename: download.filename.clone(),
            token: remote_token,
        },
        conn,
    );
    Ok(())
}
