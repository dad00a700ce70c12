// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! A network search that completes by hitting its file limit.

use anyhow::{Context, Result};
use soulseek_client_rs::{
    proto::{
        ConnectionType,
        frame::MessageReader,
        peer::{FileEntry, PeerInit, SearchResponse},
        server::FileSearchRequest,
    },
    search::{SearchOptions, SearchScope, SearchStates},
};

use serial_test::serial;

use crate::integration_tests::common::{
    FakeWire, connect_and_login, start_fake_server, test_config,
};

fn response(token: i32, username: &str, file_count: usize) -> SearchResponse {
    let files = (0..file_count)
        .map(|i| FileEntry {
            filename: format!("music\\hit{i}.mp3"),
            size: 3_000_000,
            extension: "mp3".into(),
            attributes: vec![(0, 320), (1, 200)],
        })
        .collect();
    SearchResponse {
        username: username.into(),
        token,
        files,
        slot_free: true,
        average_speed: 100_000,
        queue_length: 2,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn search_completes_by_file_limit() -> Result<()> {
    let (server, mut events) = start_fake_server().await?;
    let cfg = test_config(server.addr, true);
    let (client, _client_events) = connect_and_login(cfg).await?;
    let listen_port = client.listener_port().context("listener port")?;

    let responder = tokio::spawn(async move {
        // Wait for the search submission to reach the server, skipping the
        // login-time announcements (e.g. the listen port).
        let payload = loop {
            let (code, payload) = events.other.recv().await.expect("server traffic");
            if code == 26 {
                break payload;
            }
        };
        let mut r = MessageReader::new(payload);
        let _ = r.read_u32().expect("code");
        let request = FileSearchRequest::from_reader(&mut r).expect("parse");
        assert_eq!(request.token, 500);
        assert_eq!(request.text, "test tunes");

        // A peer delivers results over an inbound message connection.
        let mut wire = FakeWire::connect(("127.0.0.1", listen_port))
            .await
            .expect("dial the listener");
        wire.write_frame(
            &PeerInit {
                username: "peer1".into(),
                connection_type: ConnectionType::Message,
                token: 1,
            }
            .to_frame(),
        )
        .await
        .expect("peer init");

        wire.write_frame(&response(500, "peer1", 6).to_frame())
            .await
            .expect("first batch");
        wire.write_frame(&response(500, "peer1", 6).to_frame())
            .await
            .expect("second batch");
        wire
    });

    let options = SearchOptions {
        file_limit: 10,
        ..SearchOptions::default()
    };
    let results = client
        .search("test tunes", SearchScope::Default, options, Some(500), None)
        .await?;

    assert!(results.state.contains(SearchStates::COMPLETED));
    assert!(results.state.contains(SearchStates::FILE_LIMIT_REACHED));
    assert_eq!(results.responses.len(), 2);
    assert_eq!(results.file_count, 12);

    let _wire = responder.await?;
    client.disconnect("test finished");
    Ok(())
}
