// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::net::Ipv4Addr;

use anyhow::{Context, Result, ensure};
use soulseek_client_rs::proto::{
    ServerCode,
    frame::{MessageReader, payload_len},
    server::{GetPeerAddressResponse, LoginResponse},
};

use crate::unit_tests::load_fixture;

fn split_frame(bytes: &[u8], expect_code: ServerCode) -> Result<MessageReader> {
    let prefix: [u8; 4] = bytes[..4].try_into().context("frame prefix")?;
    let len = payload_len(prefix)?;
    ensure!(len == bytes.len() - 4, "length prefix does not match fixture");

    let mut r = MessageReader::new(bytes::Bytes::copy_from_slice(&bytes[4..]));
    ensure!(r.read_u32()? == expect_code as u32, "unexpected message code");
    Ok(r)
}

#[test]
fn login_response_fixture() -> Result<()> {
    let bytes =
        load_fixture("tests/unit_tests/fixtures/server/login_response_success.hex")?;
    let mut r = split_frame(&bytes, ServerCode::Login)?;
    let parsed = LoginResponse::from_reader(&mut r)?;

    assert!(parsed.succeeded);
    assert_eq!(parsed.message, "Welcome!");
    assert_eq!(parsed.ip, Some(Ipv4Addr::new(192, 168, 1, 2)));
    assert_eq!(r.remaining(), 0);

    // Re-encoding reproduces the fixture bit for bit.
    assert_eq!(parsed.to_frame().as_ref(), bytes.as_slice());
    Ok(())
}

#[test]
fn get_peer_address_response_fixture() -> Result<()> {
    let bytes =
        load_fixture("tests/unit_tests/fixtures/server/get_peer_address_response.hex")?;
    let mut r = split_frame(&bytes, ServerCode::GetPeerAddress)?;
    let parsed = GetPeerAddressResponse::from_reader(&mut r)?;

    assert_eq!(parsed.username, "bob");
    assert_eq!(parsed.ip, Ipv4Addr::new(10, 0, 0, 7));
    assert_eq!(parsed.port, 2234);
    assert_eq!(r.remaining(), 0);

    assert_eq!(parsed.to_frame().as_ref(), bytes.as_slice());
    Ok(())
}

#[test]
fn offline_user_is_the_zero_address() -> Result<()> {
    let offline = GetPeerAddressResponse {
        username: "ghost".into(),
        ip: Ipv4Addr::UNSPECIFIED,
        port: 0,
    };
    let frame = offline.to_frame();
    let mut r = split_frame(&frame, ServerCode::GetPeerAddress)?;
    let parsed = GetPeerAddressResponse::from_reader(&mut r)?;
    assert_eq!(parsed.ip, Ipv4Addr::UNSPECIFIED);
    Ok(())
}
