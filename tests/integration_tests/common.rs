// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! In-process fakes: a scripted Soulseek server and a scripted peer, both
//! bound to ephemeral localhost ports and speaking through the production
//! codecs.

use std::{
    collections::HashMap,
    net::{Ipv4Addr, SocketAddr},
    sync::{Arc, Mutex},
    time::Duration,
};

use anyhow::{Context, Result};
use bytes::Bytes;
use soulseek_client_rs::{
    cfg::config::Config,
    client::{client::SoulseekClient, events::ClientEvent},
    proto::{
        frame::MessageReader,
        server::{
            ConnectToPeerRequest, GetPeerAddressRequest, GetPeerAddressResponse,
            LoginRequest, LoginResponse,
        },
    },
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream, ToSocketAddrs},
    sync::mpsc::{UnboundedReceiver, unbounded_channel},
};

/// Raw framed-socket helper used by every fake endpoint.
pub struct FakeWire {
    stream: TcpStream,
}

impl FakeWire {
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self> {
        Ok(Self {
            stream: TcpStream::connect(addr).await?,
        })
    }

    pub fn from_stream(stream: TcpStream) -> Self {
        Self { stream }
    }

    pub async fn read_frame(&mut self) -> Result<Bytes> {
        let mut prefix = [0u8; 4];
        self.stream.read_exact(&mut prefix).await?;
        let len = u32::from_le_bytes(prefix) as usize;
        let mut buf = vec![0u8; len];
        self.stream.read_exact(&mut buf).await?;
        Ok(Bytes::from(buf))
    }

    /// Reads one frame and splits off the u32 code.
    pub async fn read_message(&mut self) -> Result<(u32, MessageReader)> {
        let payload = self.read_frame().await?;
        let mut r = MessageReader::new(payload);
        let code = r.read_u32()?;
        Ok((code, r))
    }

    pub async fn write_frame(&mut self, frame: &[u8]) -> Result<()> {
        self.stream.write_all(frame).await?;
        Ok(())
    }

    pub async fn read_raw(&mut self, n: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; n];
        self.stream.read_exact(&mut buf).await?;
        Ok(buf)
    }

    pub async fn write_raw(&mut self, buf: &[u8]) -> Result<()> {
        self.stream.write_all(buf).await?;
        Ok(())
    }
}

/// A scripted server: answers logins and address lookups by itself, forwards
/// rendezvous solicitations and everything else to the test.
pub struct FakeServer {
    pub addr: SocketAddr,
    peer_addrs: Arc<Mutex<HashMap<String, SocketAddr>>>,
}

pub struct ServerEvents {
    pub logins: UnboundedReceiver<LoginRequest>,
    pub connect_to_peer: UnboundedReceiver<ConnectToPeerRequest>,
    /// `(code, full payload)` of everything not handled in the script.
    pub other: UnboundedReceiver<(u32, Bytes)>,
}

pub async fn start_fake_server() -> Result<(FakeServer, ServerEvents)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let peer_addrs: Arc<Mutex<HashMap<String, SocketAddr>>> =
        Arc::new(Mutex::new(HashMap::new()));

    let (login_tx, logins) = unbounded_channel();
    let (ctp_tx, connect_to_peer) = unbounded_channel();
    let (other_tx, other) = unbounded_channel();

    let map = Arc::clone(&peer_addrs);
    tokio::spawn(async move {
        let Ok((stream, _)) = listener.accept().await else {
            return;
        };
        let mut wire = FakeWire::from_stream(stream);
        loop {
            let Ok(payload) = wire.read_frame().await else {
                return;
            };
            let mut r = MessageReader::new(payload.clone());
            let Ok(code) = r.read_u32() else {
                return;
            };
            match code {
                1 => {
                    if let Ok(request) = LoginRequest::from_reader(&mut r) {
                        let _ = login_tx.send(request);
                    }
                    let response = LoginResponse {
                        succeeded: true,
                        message: "Welcome to soulseek!".into(),
                        ip: Some(Ipv4Addr::new(127, 0, 0, 1)),
                    };
                    if wire.write_frame(&response.to_frame()).await.is_err() {
                        return;
                    }
                },
                3 => {
                    let Ok(request) = GetPeerAddressRequest::from_reader(&mut r) else {
                        continue;
                    };
                    let found = map
                        .lock()
                        .expect("peer map lock")
                        .get(&request.username)
                        .copied();
                    let response = match found {
                        Some(endpoint) => GetPeerAddressResponse {
                            username: request.username,
                            ip: match endpoint {
                                SocketAddr::V4(v4) => *v4.ip(),
                                SocketAddr::V6(_) => Ipv4Addr::LOCALHOST,
                            },
                            port: endpoint.port() as u32,
                        },
                        None => GetPeerAddressResponse {
                            username: request.username,
                            ip: Ipv4Addr::UNSPECIFIED,
                            port: 0,
                        },
                    };
                    if wire.write_frame(&response.to_frame()).await.is_err() {
                        return;
                    }
                },
                18 => {
                    if let Ok(request) = ConnectToPeerRequest::from_reader(&mut r) {
                        let _ = ctp_tx.send(request);
                    }
                },
                _ => {
                    let _ = other_tx.send((code, payload));
                },
            }
        }
    });

    Ok((
        FakeServer { addr, peer_addrs },
        ServerEvents {
            logins,
            connect_to_peer,
            other,
        },
    ))
}

impl FakeServer {
    /// Where address lookups for `username` should point.
    pub fn register_peer(&self, username: &str, addr: SocketAddr) {
        self.peer_addrs
            .lock()
            .expect("peer map lock")
            .insert(username.to_string(), addr);
    }
}

/// A scripted peer endpoint the client can dial directly.
pub struct FakePeer {
    listener: TcpListener,
    pub addr: SocketAddr,
}

pub async fn start_fake_peer() -> Result<FakePeer> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    Ok(FakePeer { listener, addr })
}

impl FakePeer {
    pub async fn accept(&self) -> Result<FakeWire> {
        let (stream, _) = self.listener.accept().await?;
        Ok(FakeWire::from_stream(stream))
    }
}

/// Short deadlines so failures surface quickly instead of hanging the suite.
pub fn test_config(server_addr: SocketAddr, with_listener: bool) -> Config {
    let mut cfg = Config::default();
    cfg.server.address = server_addr.to_string();
    cfg.listener.port = with_listener.then_some(0);
    cfg.timeouts.connect = Duration::from_secs(2);
    cfg.timeouts.message = Duration::from_secs(5);
    cfg.timeouts.handshake = Duration::from_secs(2);
    cfg.timeouts.peer_inactivity = Duration::from_secs(15);
    cfg.timeouts.transfer_inactivity = Duration::from_secs(15);
    cfg.timeouts.search_inactivity = Duration::from_secs(1);
    cfg.runtime.enable_distributed_network = false;
    cfg.runtime.auto_acknowledge_private_messages = false;
    cfg
}

pub const TEST_USER: &str = "tester";
pub const TEST_PASSWORD: &str = "secret";

pub async fn connect_and_login(
    cfg: Config,
) -> Result<(Arc<SoulseekClient>, UnboundedReceiver<ClientEvent>)> {
    let client = SoulseekClient::new(cfg)?;
    let events = client.events().context("events receiver already taken")?;
    client.connect().await?;
    client.login(TEST_USER, TEST_PASSWORD, None).await?;
    Ok((client, events))
}
