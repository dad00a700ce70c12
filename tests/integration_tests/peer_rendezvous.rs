// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The firewall-piercing race: a direct dial that is refused, followed by a
//! server-mediated rendezvous resolved through the listener.

use anyhow::{Context, Result};
use soulseek_client_rs::proto::{ConnectionType, peer::PierceFirewall};
use tokio::net::TcpListener;

use serial_test::serial;

use crate::integration_tests::common::{
    FakeWire, connect_and_login, start_fake_server, test_config,
};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[serial]
async fn indirect_peer_connection_after_direct_refusal() -> Result<()> {
    let (server, mut events) = start_fake_server().await?;
    let cfg = test_config(server.addr, true);
    let (client, _client_events) = connect_and_login(cfg).await?;
    let listen_port = client.listener_port().context("listener port")?;

    // Point alice at a port that was just released, so the direct dial is
    // refused.
    let dead = TcpListener::bind("127.0.0.1:0").await?;
    let dead_addr = dead.local_addr()?;
    drop(dead);
    server.register_peer("alice", dead_addr);

    // When the solicitation reaches the "server", the remote side pierces
    // back through our listener with the solicited token.
    let pierce = tokio::spawn(async move {
        let request = events
            .connect_to_peer
            .recv()
            .await
            .expect("rendezvous solicitation");
        assert_eq!(request.username, "alice");
        assert_eq!(request.connection_type, ConnectionType::Message);

        let mut wire = FakeWire::connect(("127.0.0.1", listen_port))
            .await
            .expect("dial the client listener");
        wire.write_frame(
            &PierceFirewall {
                token: request.token,
            }
            .to_frame(),
        )
        .await
        .expect("send the pierce");
        wire
    });

    let conn = client
        .peer_manager()
        .get_or_add_message_connection("alice", None)
        .await?;
    assert!(conn.is_connected());
    assert!(conn.is_inbound());

    // Single-flight: asking again returns the same live connection.
    let again = client
        .peer_manager()
        .get_or_add_message_connection("alice", None)
        .await?;
    assert!(std::sync::Arc::ptr_eq(&conn, &again));
    assert_eq!(client.peer_manager().live_message_connections(), 1);

    let _wire = pierce.await?;
    client.disconnect("test finished");
    Ok(())
}
