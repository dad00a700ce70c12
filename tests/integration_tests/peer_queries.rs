// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Browse and user-info queries over a peer message connection, plus the
//! offline-address lookup classification.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use anyhow::Result;
use serial_test::serial;
use soulseek_client_rs::{
    client::BrowseOptions,
    error::ErrorKind,
    proto::{
        ConnectionType, PeerCode,
        peer::{
            FileEntry, PeerInitMessage, SharedDirectory, SharesReply, UserInfoReply,
        },
    },
};

use crate::integration_tests::common::{
    connect_and_login, start_fake_peer, start_fake_server, test_config,
};

fn listing() -> SharesReply {
    SharesReply {
        directories: vec![SharedDirectory {
            name: "music".into(),
            files: vec![FileEntry {
                filename: "music\\a.mp3".into(),
                size: 123,
                extension: "mp3".into(),
                attributes: vec![(0, 192)],
            }],
        }],
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn browse_and_user_info_share_one_connection() -> Result<()> {
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

        let (code, _r) = wire.read_message().await.expect("shares request");
        assert_eq!(code, PeerCode::SharesRequest as u32);
        wire.write_frame(&listing().to_frame()).await.expect("listing");

        let (code, _r) = wire.read_message().await.expect("user info request");
        assert_eq!(code, PeerCode::UserInfoRequest as u32);
        let reply = UserInfoReply {
            description: "sharing since 2003".into(),
            picture: None,
            upload_slots: 2,
            queue_length: 5,
            has_free_slot: true,
        };
        wire.write_frame(&reply.to_frame()).await.expect("user info");
        wire
    });

    // Browse reports exactly one progress update carrying the wire size.
    let reported = Arc::new(AtomicU64::new(0));
    let reported_sink = Arc::clone(&reported);
    let options = BrowseOptions {
        on_progress: Some(Arc::new(move |bytes| {
            reported_sink.store(bytes, Ordering::SeqCst);
        })),
        ..BrowseOptions::default()
    };
    let shares = client.browse("bob", options, None).await?;
    assert_eq!(shares, listing());
    let expected_bytes = (listing().to_frame().len() - 4) as u64;
    assert_eq!(reported.load(Ordering::SeqCst), expected_bytes);

    // The second query reuses the same message connection.
    let info = client.get_user_info("bob", None).await?;
    assert_eq!(info.description, "sharing since 2003");
    assert_eq!(info.queue_length, 5);
    assert!(info.has_free_slot);

    let _wire = script.await?;
    client.disconnect("test finished");
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[serial]
async fn unknown_user_address_is_user_offline() -> Result<()> {
    let (server, _events) = start_fake_server().await?;
    let cfg = test_config(server.addr, false);
    let (client, _client_events) = connect_and_login(cfg).await?;

    let err = client
        .get_user_address("ghost", None)
        .await
        .expect_err("nobody home");
    assert_eq!(err.kind(), ErrorKind::UserOffline);

    client.disconnect("test finished");
    Ok(())
}
