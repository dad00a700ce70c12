// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::time::Duration;

use anyhow::Result;
use soulseek_client_rs::{
    error::ErrorKind,
    proto::{
        ServerCode,
        peer::TransferResponse,
        server::LoginResponse,
    },
    waits::{WaitKey, Waiter},
};
use tokio_util::sync::CancellationToken;

fn key() -> WaitKey {
    WaitKey::ServerReply(ServerCode::Login)
}

fn login(message: &str) -> LoginResponse {
    LoginResponse {
        succeeded: true,
        message: message.into(),
        ip: None,
    }
}

#[tokio::test]
async fn delivery_is_fifo_per_key() -> Result<()> {
    let waiter = Waiter::new(Duration::from_secs(5));

    let first = waiter.register::<LoginResponse>(key());
    let second = waiter.register::<LoginResponse>(key());
    assert_eq!(waiter.pending(&key()), 2);

    waiter.complete(&key(), login("one"));
    waiter.complete(&key(), login("two"));

    assert_eq!(first.resolve(Duration::from_secs(1), None).await?.message, "one");
    assert_eq!(second.resolve(Duration::from_secs(1), None).await?.message, "two");
    assert_eq!(waiter.pending(&key()), 0);
    Ok(())
}

#[tokio::test]
async fn each_completion_resolves_exactly_one_wait() -> Result<()> {
    let waiter = Waiter::new(Duration::from_secs(5));

    let only = waiter.register::<LoginResponse>(key());
    waiter.complete(&key(), login("hit"));
    // With nothing pending any further completion is discarded silently.
    waiter.complete(&key(), login("discarded"));

    assert_eq!(only.resolve(Duration::from_secs(1), None).await?.message, "hit");
    assert_eq!(waiter.pending(&key()), 0);
    Ok(())
}

#[tokio::test]
async fn unresolved_wait_times_out() {
    let waiter = Waiter::new(Duration::from_secs(5));
    let err = waiter
        .wait::<LoginResponse>(key(), Some(Duration::from_millis(50)), None)
        .await
        .expect_err("nothing completes this");
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert_eq!(waiter.pending(&key()), 0);
}

#[tokio::test]
async fn cancellation_token_fails_the_wait() {
    let waiter = Waiter::new(Duration::from_secs(5));
    let cancel = CancellationToken::new();

    let waiter_clone = waiter.clone();
    let cancel_clone = cancel.clone();
    let task = tokio::spawn(async move {
        waiter_clone
            .wait_indefinite::<LoginResponse>(key(), Some(&cancel_clone))
            .await
    });

    tokio::time::sleep(Duration::from_millis(20)).await;
    cancel.cancel();

    let err = task.await.expect("join").expect_err("cancelled");
    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert_eq!(waiter.pending(&key()), 0);
}

#[tokio::test]
async fn cancel_by_key_fails_every_pending_wait() {
    let waiter = Waiter::new(Duration::from_secs(5));
    let first = waiter.register::<LoginResponse>(key());
    let second = waiter.register::<LoginResponse>(key());

    waiter.cancel(&key());

    for wait in [first, second] {
        let err = wait
            .resolve(Duration::from_secs(1), None)
            .await
            .expect_err("cancelled");
        assert_eq!(err.kind(), ErrorKind::Cancelled);
    }
}

#[tokio::test]
async fn wrong_payload_type_is_a_protocol_error() {
    let waiter = Waiter::new(Duration::from_secs(5));
    let wait = waiter.register::<LoginResponse>(key());

    waiter.complete(&key(), TransferResponse::allowed(1, 10));

    let err = wait
        .resolve(Duration::from_secs(1), None)
        .await
        .expect_err("type mismatch");
    assert_eq!(err.kind(), ErrorKind::ProtocolError);
}

#[tokio::test]
async fn dropping_a_pending_wait_unregisters_it() {
    let waiter = Waiter::new(Duration::from_secs(5));
    {
        let _wait = waiter.register::<LoginResponse>(key());
        assert_eq!(waiter.pending(&key()), 1);
    }
    assert_eq!(waiter.pending(&key()), 0);
    // And a late completion for it is just discarded.
    waiter.complete(&key(), login("late"));
}
