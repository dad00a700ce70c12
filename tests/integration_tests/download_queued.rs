// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The queued download path end to end: parked with "Queued.", woken by the
//! peer's own transfer request, served over an inbound transfer connection.

use std::{
    io::Cursor,
    sync::{Arc, Mutex},
    time::Duration,
};

use anyhow::{Context, Result};
use soulseek_client_rs::{
    client::DownloadOptions,
    proto::{
        ConnectionType, PeerCode, TransferDirection,
        peer::{
            PeerInit, PeerInitMessage, TransferRequest, TransferResponse,
        },
    },
    transfer::{TransferProgress, TransferStates},
};

use serial_test::serial;

use crate::integration_tests::common::{
    FakeWire, TEST_USER, connect_and_login, start_fake_peer, start_fake_server,
    test_config,
};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn queued_download_completes() -> Result<()> {
    let (server, _events) = start_fake_server().await?;
    let cfg = test_config(server.addr, true);
    let (client, _client_events) = connect_and_login(cfg).await?;
    let listen_port = client.listener_port().context("listener port")?;

    let peer = start_fake_peer().await?;
    server.register_peer("bob", peer.addr);

    let script = tokio::spawn(async move {
        let mut wire = peer.accept().await.expect("client dials us");

        // The client's message-connection handshake.
        let init = wire.read_frame().await.expect("peer init frame");
        match PeerInitMessage::from_payload(init).expect("parse init") {
            PeerInitMessage::PeerInit(init) => {
                assert_eq!(init.username, TEST_USER);
                assert_eq!(init.connection_type, ConnectionType::Message);
            },
            other => panic!("unexpected init {other:?}"),
        }

        // Its transfer request, which we park.
        let (code, mut r) = wire.read_message().await.expect("transfer request");
        assert_eq!(code, PeerCode::TransferRequest as u32);
        let request = TransferRequest::from_reader(&mut r).expect("parse request");
        assert_eq!(request.direction, TransferDirection::Download);
        assert_eq!(request.token, 42);
        assert_eq!(request.filename, "song.mp3");

        wire.write_frame(
            &TransferResponse::disallowed(42, TransferResponse::QUEUED).to_frame(),
        )
        .await
        .expect("queue the download");

        // Some time later it is our turn to send.
        tokio::time::sleep(Duration::from_millis(200)).await;
        wire.write_frame(
            &TransferRequest {
                direction: TransferDirection::Upload,
                token: 99,
                filename: "song.mp3".into(),
                size: Some(1000),
            }
            .to_frame(),
        )
        .await
        .expect("announce the upload");

        // The client acknowledges with our token and the size.
        let (code, mut r) = wire.read_message().await.expect("acknowledgment");
        assert_eq!(code, PeerCode::TransferResponse as u32);
        let ack = TransferResponse::from_reader(&mut r).expect("parse ack");
        assert!(ack.allowed);
        assert_eq!(ack.token, 99);
        assert_eq!(ack.size, Some(1000));

        // Open the transfer connection into the client's listener.
        let mut xfer = FakeWire::connect(("127.0.0.1", listen_port))
            .await
            .expect("dial the listener");
        xfer.write_frame(
            &PeerInit {
                username: "bob".into(),
                connection_type: ConnectionType::Transfer,
                token: 99,
            }
            .to_frame(),
        )
        .await
        .expect("transfer init");
        xfer.write_raw(&99i32.to_le_bytes()).await.expect("token bytes");

        let offset = xfer.read_raw(8).await.expect("start offset");
        assert_eq!(u64::from_le_bytes(offset.try_into().expect("8 bytes")), 0);

        xfer.write_raw(&[7u8; 1000]).await.expect("file data");
        (wire, xfer)
    });

    let updates: Arc<Mutex<Vec<TransferProgress>>> = Arc::new(Mutex::new(Vec::new()));
    let updates_sink = Arc::clone(&updates);
    let options = DownloadOptions {
        token: Some(42),
        on_progress: Some(Arc::new(move |p| {
            updates_sink.lock().expect("updates lock").push(p);
        })),
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
    assert_eq!(progress.bytes_transferred, 1000);
    assert_eq!(progress.percent_complete, 100.0);
    assert_eq!(sink.into_inner(), vec![7u8; 1000]);

    let states: Vec<TransferStates> = updates
        .lock()
        .expect("updates lock")
        .iter()
        .map(|p| p.state)
        .collect();
    assert!(states.contains(&TransferStates::QUEUED), "was parked first");
    assert_eq!(
        states.last().copied(),
        Some(TransferStates::COMPLETED | TransferStates::SUCCEEDED)
    );

    let _wires = script.await?;
    client.disconnect("test finished");
    Ok(())
}
