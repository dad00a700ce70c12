// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Inbound connection acceptance and first-message classification.

use std::sync::Arc;

use tokio::{net::TcpListener, task::JoinHandle, time::timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    error::{Result, SlskError},
    net::{connection::Connection, peers::PeerManager},
    proto::{ConnectionType, peer::PeerInitMessage},
};

pub struct Listener {
    inner: TcpListener,
    port: u16,
}

impl Listener {
    pub async fn bind(port: u16) -> Result<Self> {
        let inner = TcpListener::bind(("0.0.0.0", port)).await?;
        let port = inner.local_addr()?.port();
        Ok(Self { inner, port })
    }

    /// The actually bound port (differs from the requested one for port 0 in
    /// tests).
    pub fn local_port(&self) -> u16 {
        self.port
    }

    /// Starts the accept loop. Each accepted socket gets its own task that
    /// reads the init frame under the handshake deadline and routes the
    /// connection; anything malformed is closed on the spot.
    pub fn spawn(self, peers: Arc<PeerManager>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let accepted = tokio::select! {
                    _ = cancel.cancelled() => return,
                    accepted = self.inner.accept() => accepted,
                };
                let (stream, remote) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!(%e, "accept failed");
                        continue;
                    },
                };
                debug!(%remote, "inbound connection accepted");

                let peers = Arc::clone(&peers);
                tokio::spawn(async move {
                    if let Err(e) = handle_inbound(peers, stream).await {
                        debug!(%remote, %e, "inbound connection rejected");
                    }
                });
            }
        })
    }
}

async fn handle_inbound(
    peers: Arc<PeerManager>,
    stream: tokio::net::TcpStream,
) -> Result<()> {
    let cfg = peers.config();
    let conn = Connection::accepted(stream, Some(cfg.timeouts.peer_inactivity))?;

    let payload = match timeout(cfg.timeouts.handshake, conn.read_message()).await {
        Ok(Ok(payload)) => payload,
        Ok(Err(e)) => {
            conn.disconnect("failed to read the init message");
            return Err(e);
        },
        Err(_) => {
            conn.disconnect("init handshake timed out");
            return Err(SlskError::timeout("peer init handshake"));
        },
    };

    let init = match PeerInitMessage::from_payload(payload) {
        Ok(init) => init,
        Err(e) => {
            conn.disconnect("malformed init message");
            return Err(e);
        },
    };

    match init {
        PeerInitMessage::PeerInit(init) => match init.connection_type {
            ConnectionType::Message => {
                peers.attach_inbound_message(&init.username, conn).await
            },
            ConnectionType::Transfer => {
                peers.attach_inbound_transfer(&init.username, conn).await
            },
        },
        PeerInitMessage::PierceFirewall(pierce) => {
            peers.complete_solicitation(pierce.token, conn);
            Ok(())
        },
    }
}
