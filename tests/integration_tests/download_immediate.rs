// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The immediate download path: the peer says "ready now", we open the
//! transfer connection ourselves and resume from a mid-file offset.

use std::io::Cursor;

use anyhow::Result;
use soulseek_client_rs::{
    client::DownloadOptions,
    proto::{
        ConnectionType, PeerCode,
        peer::{PeerInitMessage, TransferRequest, TransferResponse},
    },
    transfer::TransferStates,
};

use serial_test::serial;

use crate::integration_tests::common::{
    FakePeer, FakeWire, connect_and_login, start_fake_peer, start_fake_server,
    test_config,
};

/// Serves the message-connection handshake up to an allowed response.
async fn serve_handshake(peer: &FakePeer, token: i32, size: u64) -> Result<FakeWire> {
    let mut wire = peer.accept().await?;

    let init = wire.read_frame().await?;
    match PeerInitMessage::from_payload(init)? {
        PeerInitMessage::PeerInit(init) => {
            assert_eq!(init.connection_type, ConnectionType::Message);
        },
        other => panic!("unexpected init {other:?}"),
    }

    let (code, mut r) = wire.read_message().await?;
    assert_eq!(code, PeerCode::TransferRequest as u32);
    let request = TransferRequest::from_reader(&mut r)?;
    assert_eq!(request.token, token);

    wire.write_frame(&TransferResponse::allowed(token, size).to_frame())
        .await?;
    Ok(wire)
}

/// Serves the transfer connection the client opens back to us.
async fn serve_transfer(
    peer: &FakePeer,
    expect_token: i32,
    expect_offset: u64,
    data: &[u8],
) -> Result<FakeWire> {
    let mut xfer = peer.accept().await?;

    let init = xfer.read_frame().await?;
    match PeerInitMessage::from_payload(init)? {
        PeerInitMessage::PeerInit(init) => {
            assert_eq!(init.connection_type, ConnectionType::Transfer);
            assert_eq!(init.token, expect_token);
        },
        other => panic!("unexpected init {other:?}"),
    }

    // Our matching remote token, then the client's chosen offset.
    xfer.write_raw(&7i32.to_le_bytes()).await?;
    let offset = xfer.read_raw(8).await?;
    assert_eq!(
        u64::from_le_bytes(offset.try_into().expect("8 bytes")),
        expect_offset
    );

    if !data.is_empty() {
        xfer.write_raw(data).await?;
    }
    Ok(xfer)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn immediate_download_with_resume() -> Result<()> {
    let (server, _events) = start_fake_server().await?;
    let cfg = test_config(server.addr, false);
    let (client, _client_events) = connect_and_login(cfg).await?;

    let peer = start_fake_peer().await?;
    server.register_peer("bob", peer.addr);

    let script = tokio::spawn(async move {
        let wire = serve_handshake(&peer, 42, 1000).await.expect("handshake");
        let xfer = serve_transfer(&peer, 42, 500, &[9u8; 500])
            .await
            .expect("transfer");
        (wire, xfer)
    });

    let options = DownloadOptions {
        token: Some(42),
        start_offset: 500,
        ..DownloadOptions::default()
    };
    let mut sink = Cursor::new(Vec::new());
    let progress = client
        .download("bob", "song.mp3", &mut sink, options, None)
        .await?;

    assert_eq!(
        progress.state,
        TransferStates::COMPLETED | TransferStates::SUCCEEDED
    );
    assert_eq!(progress.size, 1000);
    // Observed progress is the offset plus what moved on this connection.
    assert_eq!(progress.bytes_transferred, 1000);
    assert_eq!(progress.start_offset, 500);
    assert_eq!(sink.into_inner(), vec![9u8; 500]);

    let _wires = script.await?;
    client.disconnect("test finished");
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn zero_byte_download_succeeds() -> Result<()> {
    let (server, _events) = start_fake_server().await?;
    let cfg = test_config(server.addr, false);
    let (client, _client_events) = connect_and_login(cfg).await?;

    let peer = start_fake_peer().await?;
    server.register_peer("bob", peer.addr);

    let script = tokio::spawn(async move {
        let wire = serve_handshake(&peer, 5, 0).await.expect("handshake");
        let xfer = serve_transfer(&peer, 5, 0, &[]).await.expect("transfer");
        (wire, xfer)
    });

    let options = DownloadOptions {
        token: Some(5),
        ..DownloadOptions::default()
    };
    let mut sink = Cursor::new(Vec::new());
    let progress = client
        .download("bob", "empty.bin", &mut sink, options, None)
        .await?;

    assert_eq!(
        progress.state,
        TransferStates::COMPLETED | TransferStates::SUCCEEDED
    );
    assert_eq!(progress.bytes_transferred, 0);
    assert_eq!(progress.percent_complete, 0.0);
    assert!(sink.into_inner().is_empty());

    let _wires = script.await?;
    client.disconnect("test finished");
    Ok(())
}
