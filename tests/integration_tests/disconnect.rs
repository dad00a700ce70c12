// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::Result;
use soulseek_client_rs::{
    client::{ClientStates, events::ClientEvent},
    error::ErrorKind,
};

use serial_test::serial;

use crate::integration_tests::common::{connect_and_login, start_fake_server, test_config};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[serial]
async fn disconnect_is_idempotent() -> Result<()> {
    let (server, _events) = start_fake_server().await?;
    let cfg = test_config(server.addr, false);
    let (client, mut events) = connect_and_login(cfg).await?;

    client.disconnect("bye");
    client.disconnect("bye again");
    assert_eq!(client.state(), ClientStates::DISCONNECTED);

    // Give the background disconnect observers a moment to settle, then
    // count: exactly one Disconnected event no matter how often we called.
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    let mut disconnected = 0;
    while let Ok(event) = events.try_recv() {
        if matches!(event, ClientEvent::Disconnected { .. }) {
            disconnected += 1;
        }
    }
    assert_eq!(disconnected, 1);

    // Operations after disconnect report the state violation.
    let err = client.ping_server(None).await.expect_err("disconnected");
    assert_eq!(err.kind(), ErrorKind::InvalidState);

    // And logging in again without a connection is equally invalid.
    let err = client
        .login("tester", "secret", None)
        .await
        .expect_err("disconnected");
    assert_eq!(err.kind(), ErrorKind::InvalidState);
    Ok(())
}
