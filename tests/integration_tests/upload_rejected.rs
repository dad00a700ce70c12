// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! An upload the peer refuses outright: `Requested → Completed|Rejected`,
//! with a best-effort `UploadFailed` notice on the way out.

use std::sync::{Arc, Mutex};

use anyhow::Result;
use soulseek_client_rs::{
    client::UploadOptions,
    error::ErrorKind,
    proto::{
        ConnectionType, PeerCode, TransferDirection,
        peer::{
            PeerInitMessage, TransferRequest, TransferResponse,
            UploadFailedNotification,
        },
    },
    transfer::{TransferProgress, TransferStates},
};

use serial_test::serial;

use crate::integration_tests::common::{
    connect_and_login, start_fake_peer, start_fake_server, test_config,
};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn rejected_upload_sends_upload_failed() -> Result<()> {
    let (server, _events) = start_fake_server().await?;
    let cfg = test_config(server.addr, false);
    let (client, _client_events) = connect_and_login(cfg).await?;

    let peer = start_fake_peer().await?;
    server.register_peer("bob", peer.addr);

    let script = tokio::spawn(async move {
        let mut wire = peer.accept().await.expect("client dials us");

        let init = wire.read_frame().await.expect("peer init frame");
        match PeerInitMessage::from_payload(init).expect("parse init") {
            PeerInitMessage::PeerInit(init) => {
                assert_eq!(init.connection_type, ConnectionType::Message);
            },
            other => panic!("unexpected init {other:?}"),
        }

        let (code, mut r) = wire.read_message().await.expect("transfer request");
        assert_eq!(code, PeerCode::TransferRequest as u32);
        let request = TransferRequest::from_reader(&mut r).expect("parse request");
        assert_eq!(request.direction, TransferDirection::Upload);
        assert_eq!(request.filename, "f.mp3");
        assert_eq!(request.size, Some(10));

        wire.write_frame(
            &TransferResponse::disallowed(request.token, "Cancelled.").to_frame(),
        )
        .await
        .expect("reject the upload");

        // The engine's best-effort failure notice.
        let (code, mut r) = wire.read_message().await.expect("upload failed notice");
        assert_eq!(code, PeerCode::UploadFailed as u32);
        let failed = UploadFailedNotification::from_reader(&mut r).expect("parse");
        assert_eq!(failed.filename, "f.mp3");
        wire
    });

    let updates: Arc<Mutex<Vec<TransferProgress>>> = Arc::new(Mutex::new(Vec::new()));
    let updates_sink = Arc::clone(&updates);
    let options = UploadOptions {
        on_progress: Some(Arc::new(move |p| {
            updates_sink.lock().expect("updates lock").push(p);
        })),
        ..UploadOptions::default()
    };

    let err = client
        .upload_bytes("bob", "f.mp3", &[1u8; 10], options, None)
        .await
        .expect_err("the peer rejected it");
    assert_eq!(err.kind(), ErrorKind::TransferRejected);

    let states: Vec<TransferStates> = updates
        .lock()
        .expect("updates lock")
        .iter()
        .map(|p| p.state)
        .collect();
    assert_eq!(states.first().copied(), Some(TransferStates::REQUESTED));
    assert_eq!(
        states.last().copied(),
        Some(TransferStates::COMPLETED | TransferStates::REJECTED)
    );

    let _wire = script.await?;
    client.disconnect("test finished");
    Ok(())
}
