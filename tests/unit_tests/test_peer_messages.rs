// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::{Context, Result, ensure};
use bytes::Bytes;
use soulseek_client_rs::proto::{
    ConnectionType, PeerCode, TransferDirection,
    frame::payload_len,
    peer::{PeerInitMessage, TransferRequest, split_peer_message},
};

use crate::unit_tests::load_fixture;

fn payload(bytes: &[u8]) -> Result<Bytes> {
    let prefix: [u8; 4] = bytes[..4].try_into().context("frame prefix")?;
    let len = payload_len(prefix)?;
    ensure!(len == bytes.len() - 4, "length prefix does not match fixture");
    Ok(Bytes::copy_from_slice(&bytes[4..]))
}

#[test]
fn peer_init_fixture() -> Result<()> {
    let bytes = load_fixture("tests/unit_tests/fixtures/peer/peer_init.hex")?;
    let parsed = PeerInitMessage::from_payload(payload(&bytes)?)?;

    let PeerInitMessage::PeerInit(init) = parsed else {
        anyhow::bail!("expected a PeerInit");
    };
    assert_eq!(init.username, "alice");
    assert_eq!(init.connection_type, ConnectionType::Message);
    assert_eq!(init.token, 301);

    assert_eq!(init.to_frame().as_ref(), bytes.as_slice());
    Ok(())
}

#[test]
fn pierce_firewall_fixture() -> Result<()> {
    let bytes = load_fixture("tests/unit_tests/fixtures/peer/pierce_firewall.hex")?;
    let parsed = PeerInitMessage::from_payload(payload(&bytes)?)?;

    let PeerInitMessage::PierceFirewall(pierce) = parsed else {
        anyhow::bail!("expected a PierceFirewall");
    };
    assert_eq!(pierce.token, 7);

    assert_eq!(pierce.to_frame().as_ref(), bytes.as_slice());
    Ok(())
}

#[test]
fn transfer_request_upload_fixture() -> Result<()> {
    let bytes =
        load_fixture("tests/unit_tests/fixtures/peer/transfer_request_upload.hex")?;
    let (code, mut r) = split_peer_message(payload(&bytes)?)?;
    assert_eq!(code, PeerCode::TransferRequest);

    let parsed = TransferRequest::from_reader(&mut r)?;
    assert_eq!(parsed.direction, TransferDirection::Upload);
    assert_eq!(parsed.token, 99);
    assert_eq!(parsed.filename, "song.mp3");
    assert_eq!(parsed.size, Some(1000));

    assert_eq!(parsed.to_frame().as_ref(), bytes.as_slice());
    Ok(())
}

#[test]
fn malformed_init_is_rejected() {
    // A first byte that is neither 0x01 nor 0x05.
    let payload = Bytes::from_static(&[0x7f, 0, 0, 0, 0]);
    assert!(PeerInitMessage::from_payload(payload).is_err());
}
