// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::{Context, Result, bail};
use soulseek_client_rs::{
    client::{ClientStates, client::SoulseekClient, events::ClientEvent},
    utils::password_digest,
};

use serial_test::serial;

use crate::integration_tests::common::{
    TEST_PASSWORD, TEST_USER, start_fake_server, test_config,
};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[serial]
async fn login_happy_path() -> Result<()> {
    let (server, mut events) = start_fake_server().await?;
    let cfg = test_config(server.addr, false);

    let client = SoulseekClient::new(cfg)?;
    let mut client_events = client.events().context("events receiver")?;

    client.connect().await?;
    client.login(TEST_USER, TEST_PASSWORD, None).await?;
    assert_eq!(
        client.state(),
        ClientStates::CONNECTED | ClientStates::LOGGED_IN
    );
    assert_eq!(client.username().as_deref(), Some(TEST_USER));

    // The server saw the right credentials and digest.
    let request = events.logins.recv().await.context("login request")?;
    assert_eq!(request.username, TEST_USER);
    assert_eq!(request.password, TEST_PASSWORD);
    assert_eq!(request.digest, password_digest(TEST_USER, TEST_PASSWORD));

    // Two state changes: Disconnected → Connected → Connected|LoggedIn.
    match client_events.recv().await.context("first state change")? {
        ClientEvent::StateChanged { from, to, .. } => {
            assert_eq!(from, ClientStates::DISCONNECTED);
            assert_eq!(to, ClientStates::CONNECTED);
        },
        other => bail!("unexpected event {other:?}"),
    }
    match client_events.recv().await.context("second state change")? {
        ClientEvent::StateChanged { from, to, .. } => {
            assert_eq!(from, ClientStates::CONNECTED);
            assert_eq!(to, ClientStates::CONNECTED | ClientStates::LOGGED_IN);
        },
        other => bail!("unexpected event {other:?}"),
    }

    client.disconnect("test finished");
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[serial]
async fn operations_require_login() -> Result<()> {
    let (server, _events) = start_fake_server().await?;
    let cfg = test_config(server.addr, false);

    let client = SoulseekClient::new(cfg)?;
    client.connect().await?;

    let err = client
        .ping_server(None)
        .await
        .expect_err("not logged in yet");
    assert_eq!(err.kind(), soulseek_client_rs::error::ErrorKind::InvalidState);

    client.disconnect("test finished");
    Ok(())
}
