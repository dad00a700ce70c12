// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Peer message types: the two one-byte-code initialization messages and the
//! session messages exchanged on established `"P"` connections.

use bytes::Bytes;

use crate::{
    error::{Result, SlskError},
    proto::{
        ConnectionType, InitCode, PeerCode, TransferDirection,
        frame::{MessageReader, MessageWriter},
    },
};

/// First message on an unsolicited peer connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInit {
    pub username: String,
    pub connection_type: ConnectionType,
    pub token: i32,
}

impl PeerInit {
    pub fn to_frame(&self) -> Bytes {
        let mut w = MessageWriter::with_init_code(InitCode::PeerInit as u8);
        w.write_string(&self.username)
            .write_string(self.connection_type.as_str())
            .write_i32(self.token);
        w.into_frame()
    }

    pub fn from_reader(r: &mut MessageReader) -> Result<Self> {
        Ok(Self {
            username: r.read_string()?,
            connection_type: ConnectionType::try_from(r.read_string()?.as_str())?,
            token: r.read_i32()?,
        })
    }
}

/// First message on a connection the remote side opened because we asked the
/// server to rendezvous; the token is the one we solicited with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PierceFirewall {
    pub token: i32,
}

impl PierceFirewall {
    pub fn to_frame(&self) -> Bytes {
        let mut w = MessageWriter::with_init_code(InitCode::PierceFirewall as u8);
        w.write_i32(self.token);
        w.into_frame()
    }

    pub fn from_reader(r: &mut MessageReader) -> Result<Self> {
        Ok(Self {
            token: r.read_i32()?,
        })
    }
}

/// Either of the two init messages, classified by the first payload byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerInitMessage {
    PeerInit(PeerInit),
    PierceFirewall(PierceFirewall),
}

impl PeerInitMessage {
    pub fn from_payload(payload: Bytes) -> Result<Self> {
        let mut r = MessageReader::new(payload);
        match InitCode::try_from(r.read_u8()?)? {
            InitCode::PeerInit => Ok(Self::PeerInit(PeerInit::from_reader(&mut r)?)),
            InitCode::PierceFirewall => {
                Ok(Self::PierceFirewall(PierceFirewall::from_reader(&mut r)?))
            },
        }
    }
}

/// A single shared file as listed in browse and search replies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub filename: String,
    pub size: u64,
    pub extension: String,
    /// `(attribute code, value)` pairs, e.g. bitrate or duration.
    pub attributes: Vec<(u32, u32)>,
}

impl FileEntry {
    fn write(&self, w: &mut MessageWriter) {
        w.write_u8(1)
            .write_string(&self.filename)
            .write_u64(self.size)
            .write_string(&self.extension)
            .write_u32(self.attributes.len() as u32);
        for (code, value) in &self.attributes {
            w.write_u32(*code).write_u32(*value);
        }
    }

    fn read(r: &mut MessageReader) -> Result<Self> {
        let _code = r.read_u8()?;
        let filename = r.read_string()?;
        let size = r.read_u64()?;
        let extension = r.read_string()?;
        let attr_count = r.read_u32()? as usize;
        let mut attributes = Vec::with_capacity(attr_count.min(64));
        for _ in 0..attr_count {
            attributes.push((r.read_u32()?, r.read_u32()?));
        }
        Ok(Self {
            filename,
            size,
            extension,
            attributes,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SharesRequest;

impl SharesRequest {
    pub fn to_frame(&self) -> Bytes {
        MessageWriter::with_code(PeerCode::SharesRequest as u32).into_frame()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedDirectory {
    pub name: String,
    pub files: Vec<FileEntry>,
}

/// A peer's full share listing, the reply to [`SharesRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SharesReply {
    pub directories: Vec<SharedDirectory>,
}

impl SharesReply {
    pub fn to_frame(&self) -> Bytes {
        let mut w = MessageWriter::with_code(PeerCode::SharesReply as u32);
        w.write_u32(self.directories.len() as u32);
        for dir in &self.directories {
            w.write_string(&dir.name).write_u32(dir.files.len() as u32);
            for file in &dir.files {
                file.write(&mut w);
            }
        }
        w.into_frame()
    }

    pub fn from_reader(r: &mut MessageReader) -> Result<Self> {
        let dir_count = r.read_u32()? as usize;
        let mut directories = Vec::with_capacity(dir_count.min(4096));
        for _ in 0..dir_count {
            let name = r.read_string()?;
            let file_count = r.read_u32()? as usize;
            let mut files = Vec::with_capacity(file_count.min(4096));
            for _ in 0..file_count {
                files.push(FileEntry::read(r)?);
            }
            directories.push(SharedDirectory { name, files });
        }
        Ok(Self { directories })
    }

    pub fn file_count(&self) -> usize {
        self.directories.iter().map(|d| d.files.len()).sum()
    }
}

/// A peer's answer to a search we issued, delivered over a `"P"` connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchResponse {
    pub username: String,
    pub token: i32,
    pub files: Vec<FileEntry>,
    pub slot_free: bool,
    pub average_speed: u32,
    pub queue_length: u64,
}

impl SearchResponse {
    pub fn to_frame(&self) -> Bytes {
        let mut w = MessageWriter::with_code(PeerCode::SearchResponse as u32);
        w.write_string(&self.username)
            .write_i32(self.token)
            .write_u32(self.files.len() as u32);
        for file in &self.files {
            file.write(&mut w);
        }
        w.write_bool(self.slot_free)
            .write_u32(self.average_speed)
            .write_u64(self.queue_length);
        w.into_frame()
    }

    pub fn from_reader(r: &mut MessageReader) -> Result<Self> {
        let username = r.read_string()?;
        let token = r.read_i32()?;
        let file_count = r.read_u32()? as usize;
        let mut files = Vec::with_capacity(file_count.min(4096));
        for _ in 0..file_count {
            files.push(FileEntry::read(r)?);
        }
        Ok(Self {
            username,
            token,
            files,
            slot_free: r.read_bool()?,
            average_speed: r.read_u32()?,
            queue_length: r.read_u64()?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UserInfoRequest;

impl UserInfoRequest {
    pub fn to_frame(&self) -> Bytes {
        MessageWriter::with_code(PeerCode::UserInfoRequest as u32).into_frame()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserInfoReply {
    pub description: String,
    pub picture: Option<Vec<u8>>,
    pub upload_slots: u32,
    pub queue_length: u32,
    pub has_free_slot: bool,
}

impl UserInfoReply {
    pub fn to_frame(&self) -> Bytes {
        let mut w = MessageWriter::with_code(PeerCode::UserInfoReply as u32);
        w.write_string(&self.description);
        match &self.picture {
            Some(picture) => {
                w.write_bool(true).write_u32(picture.len() as u32);
                for byte in picture {
                    w.write_u8(*byte);
                }
            },
            None => {
                w.write_bool(false);
            },
        }
        w.write_u32(self.upload_slots)
            .write_u32(self.queue_length)
            .write_bool(self.has_free_slot);
        w.into_frame()
    }

    pub fn from_reader(r: &mut MessageReader) -> Result<Self> {
        let description = r.read_string()?;
        let picture = if r.read_bool()? {
            let len = r.read_u32()? as usize;
            let mut bytes = Vec::with_capacity(len.min(1 << 20));
            for _ in 0..len {
                bytes.push(r.read_u8()?);
            }
            Some(bytes)
        } else {
            None
        };
        Ok(Self {
            description,
            picture,
            upload_slots: r.read_u32()?,
            queue_length: r.read_u32()?,
            has_free_slot: r.read_bool()?,
        })
    }
}

/// Start-of-transfer negotiation. `size` travels only on the upload
/// direction; a downloader learns the size from the peer's own request or
/// from the allowed response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub direction: TransferDirection,
    pub token: i32,
    pub filename: String,
    pub size: Option<u64>,
}

impl TransferRequest {
    pub fn to_frame(&self) -> Bytes {
        let mut w = MessageWriter::with_code(PeerCode::TransferRequest as u32);
        w.write_u32(self.direction as u32)
            .write_i32(self.token)
            .write_string(&self.filename);
        if let Some(size) = self.size {
            w.write_u64(size);
        }
        w.into_frame()
    }

    pub fn from_reader(r: &mut MessageReader) -> Result<Self> {
        let direction = TransferDirection::try_from(r.read_u32()?)?;
        let token = r.read_i32()?;
        let filename = r.read_string()?;
        let size = match direction {
            TransferDirection::Upload if r.remaining() >= 8 => Some(r.read_u64()?),
            _ => None,
        };
        Ok(Self {
            direction,
            token,
            filename,
            size,
        })
    }
}

/// Reply to a [`TransferRequest`]. `allowed=false` carries a reason;
/// `allowed=true` may carry the file size when answering a download request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferResponse {
    pub token: i32,
    pub allowed: bool,
    pub message: Option<String>,
    pub size: Option<u64>,
}

impl TransferResponse {
    /// The queue-rejection text that means "parked, not refused".
    pub const QUEUED: &'static str = "Queued.";
    /// The rejection text that is terminal rather than a queue signal.
    pub const NOT_SHARED: &'static str = "File not shared.";

    pub fn allowed(token: i32, size: u64) -> Self {
        Self {
            token,
            allowed: true,
            message: None,
            size: Some(size),
        }
    }

    pub fn disallowed(token: i32, message: impl Into<String>) -> Self {
        Self {
            token,
            allowed: false,
            message: Some(message.into()),
            size: None,
        }
    }

    pub fn to_frame(&self) -> Bytes {
        let mut w = MessageWriter::with_code(PeerCode::TransferResponse as u32);
        w.write_i32(self.token).write_bool(self.allowed);
        if self.allowed {
            if let Some(size) = self.size {
                w.write_u64(size);
            }
        } else if let Some(message) = &self.message {
            w.write_string(message);
        }
        w.into_frame()
    }

    pub fn from_reader(r: &mut MessageReader) -> Result<Self> {
        let token = r.read_i32()?;
        let allowed = r.read_bool()?;
        let mut message = None;
        let mut size = None;
        if allowed {
            if r.remaining() >= 8 {
                size = Some(r.read_u64()?);
            }
        } else {
            message = Some(r.read_string()?);
        }
        Ok(Self {
            token,
            allowed,
            message,
            size,
        })
    }

    pub fn is_queued_rejection(&self) -> bool {
        !self.allowed
            && self
                .message
                .as_deref()
                .is_some_and(|m| !m.eq_ignore_ascii_case(Self::NOT_SHARED))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueUploadCommand {
    pub filename: String,
}

impl QueueUploadCommand {
    pub fn to_frame(&self) -> Bytes {
        let mut w = MessageWriter::with_code(PeerCode::QueueUpload as u32);
        w.write_string(&self.filename);
        w.into_frame()
    }

    pub fn from_reader(r: &mut MessageReader) -> Result<Self> {
        Ok(Self {
            filename: r.read_string()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaceInQueueRequest {
    pub filename: String,
}

impl PlaceInQueueRequest {
    pub fn to_frame(&self) -> Bytes {
        let mut w = MessageWriter::with_code(PeerCode::PlaceInQueueRequest as u32);
        w.write_string(&self.filename);
        w.into_frame()
    }

    pub fn from_reader(r: &mut MessageReader) -> Result<Self> {
        Ok(Self {
            filename: r.read_string()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaceInQueueResponse {
    pub filename: String,
    pub place: u32,
}

impl PlaceInQueueResponse {
    pub fn to_frame(&self) -> Bytes {
        let mut w = MessageWriter::with_code(PeerCode::PlaceInQueueResponse as u32);
        w.write_string(&self.filename).write_u32(self.place);
        w.into_frame()
    }

    pub fn from_reader(r: &mut MessageReader) -> Result<Self> {
        Ok(Self {
            filename: r.read_string()?,
            place: r.read_u32()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadFailedNotification {
    pub filename: String,
}

impl UploadFailedNotification {
    pub fn to_frame(&self) -> Bytes {
        let mut w = MessageWriter::with_code(PeerCode::UploadFailed as u32);
        w.write_string(&self.filename);
        w.into_frame()
    }

    pub fn from_reader(r: &mut MessageReader) -> Result<Self> {
        Ok(Self {
            filename: r.read_string()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueFailedNotification {
    pub filename: String,
    pub reason: String,
}

impl QueueFailedNotification {
    pub fn to_frame(&self) -> Bytes {
        let mut w = MessageWriter::with_code(PeerCode::QueueFailed as u32);
        w.write_string(&self.filename).write_string(&self.reason);
        w.into_frame()
    }

    pub fn from_reader(r: &mut MessageReader) -> Result<Self> {
        Ok(Self {
            filename: r.read_string()?,
            reason: r.read_string()?,
        })
    }
}

/// Splits a framed payload into `(code, reader-past-code)`.
pub fn split_peer_message(payload: Bytes) -> Result<(PeerCode, MessageReader)> {
    let mut r = MessageReader::new(payload);
    let raw = r.read_u32()?;
    let code = PeerCode::try_from(raw)
        .map_err(|_| SlskError::protocol(format!("unknown peer message code {raw}")))?;
    Ok((code, r))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::frame::payload_len;

    fn payload(frame: &Bytes) -> Bytes {
        let len = payload_len(frame[..4].try_into().expect("prefix")).expect("len");
        assert_eq!(len, frame.len() - 4);
        frame.slice(4..)
    }

    #[test]
    fn peer_init_round_trip() -> Result<()> {
        let msg = PeerInit {
            username: "carol".into(),
            connection_type: ConnectionType::Message,
            token: 301,
        };
        let parsed = PeerInitMessage::from_payload(payload(&msg.to_frame()))?;
        assert_eq!(parsed, PeerInitMessage::PeerInit(msg));
        Ok(())
    }

    #[test]
    fn pierce_firewall_round_trip() -> Result<()> {
        let msg = PierceFirewall { token: 7 };
        let parsed = PeerInitMessage::from_payload(payload(&msg.to_frame()))?;
        assert_eq!(parsed, PeerInitMessage::PierceFirewall(msg));
        Ok(())
    }

    #[test]
    fn init_code_values_are_pinned() {
        let pierce = PierceFirewall { token: 1 }.to_frame();
        assert_eq!(pierce[4], 0x01);
        let init = PeerInit {
            username: "x".into(),
            connection_type: ConnectionType::Transfer,
            token: 1,
        }
        .to_frame();
        assert_eq!(init[4], 0x05);
    }

    #[test]
    fn transfer_response_variants_round_trip() -> Result<()> {
        for msg in [
            TransferResponse::allowed(42, 1000),
            TransferResponse::disallowed(42, TransferResponse::QUEUED),
            TransferResponse::disallowed(42, TransferResponse::NOT_SHARED),
        ] {
            let (code, mut r) = split_peer_message(payload(&msg.to_frame()))?;
            assert_eq!(code, PeerCode::TransferResponse);
            assert_eq!(TransferResponse::from_reader(&mut r)?, msg);
        }
        Ok(())
    }

    #[test]
    fn queued_rejection_classification() {
        assert!(TransferResponse::disallowed(1, "Queued.").is_queued_rejection());
        assert!(TransferResponse::disallowed(1, "Too many files").is_queued_rejection());
        assert!(
            !TransferResponse::disallowed(1, "File not shared.").is_queued_rejection()
        );
        assert!(!TransferResponse::allowed(1, 10).is_queued_rejection());
    }

    #[test]
    fn search_response_round_trip() -> Result<()> {
        let msg = SearchResponse {
            username: "dave".into(),
            token: 9,
            files: vec![FileEntry {
                filename: "music\\song.mp3".into(),
                size: 4_194_304,
                extension: "mp3".into(),
                attributes: vec![(0, 320), (1, 251)],
            }],
            slot_free: true,
            average_speed: 125_000,
            queue_length: 0,
        };
        let (code, mut r) = split_peer_message(payload(&msg.to_frame()))?;
        assert_eq!(code, PeerCode::SearchResponse);
        assert_eq!(SearchResponse::from_reader(&mut r)?, msg);
        Ok(())
    }
}
