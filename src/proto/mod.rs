// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Wire-level model of the Soulseek protocol.
//!
//! Three message families share one framing scheme (see [`frame`]):
//!
//! ```text
//! +------------------+---------------------------------------+
//! | length (u32, LE) |           payload (length bytes)      |
//! +------------------+---------------------------------------+
//! ```
//!
//! * **Server messages**: payload starts with a little-endian `u32` code.
//! * **Peer session messages**: same shape, distinct code space, exchanged
//!   on established peer message connections.
//! * **Peer init messages**: payload starts with a single code byte; these
//!   are only ever the *first* message on a freshly opened peer socket.

pub mod frame;
pub mod peer;
pub mod server;

use crate::error::SlskError;

/// Codes of the server messages this crate speaks.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerCode {
    Login = 1,
    SetWaitPort = 2,
    GetPeerAddress = 3,
    WatchUser = 5,
    GetUserStatus = 7,
    SayChatroom = 13,
    JoinRoom = 14,
    LeaveRoom = 15,
    ConnectToPeer = 18,
    PrivateMessage = 22,
    AcknowledgePrivateMessage = 23,
    FileSearch = 26,
    ServerPing = 32,
    KickedFromServer = 41,
    UserSearch = 42,
    RoomList = 64,
    GlobalMessage = 66,
    PrivilegedUsers = 69,
    HaveNoParents = 71,
    CheckPrivileges = 92,
    NetInfo = 102,
    WishlistInterval = 104,
    RoomSearch = 120,
    GivePrivileges = 123,
    NotifyPrivileges = 124,
    AcknowledgeNotifyPrivileges = 125,
    ChangePassword = 142,
}

impl TryFrom<u32> for ServerCode {
    type Error = SlskError;

    fn try_from(raw: u32) -> Result<Self, Self::Error> {
        Ok(match raw {
            1 => ServerCode::Login,
            2 => ServerCode::SetWaitPort,
            3 => ServerCode::GetPeerAddress,
            5 => ServerCode::WatchUser,
            7 => ServerCode::GetUserStatus,
            13 => ServerCode::SayChatroom,
            14 => ServerCode::JoinRoom,
            15 => ServerCode::LeaveRoom,
            18 => ServerCode::ConnectToPeer,
            22 => ServerCode::PrivateMessage,
            23 => ServerCode::AcknowledgePrivateMessage,
            26 => ServerCode::FileSearch,
            32 => ServerCode::ServerPing,
            41 => ServerCode::KickedFromServer,
            42 => ServerCode::UserSearch,
            64 => ServerCode::RoomList,
            66 => ServerCode::GlobalMessage,
            69 => ServerCode::PrivilegedUsers,
            71 => ServerCode::HaveNoParents,
            92 => ServerCode::CheckPrivileges,
            102 => ServerCode::NetInfo,
            104 => ServerCode::WishlistInterval,
            120 => ServerCode::RoomSearch,
            123 => ServerCode::GivePrivileges,
            124 => ServerCode::NotifyPrivileges,
            125 => ServerCode::AcknowledgeNotifyPrivileges,
            142 => ServerCode::ChangePassword,
            other => {
                return Err(SlskError::protocol(format!(
                    "unknown server message code {other}"
                )));
            },
        })
    }
}

/// Codes of the peer session messages this crate speaks.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeerCode {
    SharesRequest = 4,
    SharesReply = 5,
    SearchResponse = 9,
    UserInfoRequest = 15,
    UserInfoReply = 16,
    TransferRequest = 40,
    TransferResponse = 41,
    QueueUpload = 43,
    PlaceInQueueResponse = 44,
    UploadFailed = 46,
    QueueFailed = 50,
    PlaceInQueueRequest = 51,
}

impl TryFrom<u32> for PeerCode {
    type Error = SlskError;

    fn try_from(raw: u32) -> Result<Self, Self::Error> {
        Ok(match raw {
            4 => PeerCode::SharesRequest,
            5 => PeerCode::SharesReply,
            9 => PeerCode::SearchResponse,
            15 => PeerCode::UserInfoRequest,
            16 => PeerCode::UserInfoReply,
            40 => PeerCode::TransferRequest,
            41 => PeerCode::TransferResponse,
            43 => PeerCode::QueueUpload,
            44 => PeerCode::PlaceInQueueResponse,
            46 => PeerCode::UploadFailed,
            50 => PeerCode::QueueFailed,
            51 => PeerCode::PlaceInQueueRequest,
            other => {
                return Err(SlskError::protocol(format!(
                    "unknown peer message code {other}"
                )));
            },
        })
    }
}

/// One-byte codes of the two peer initialization messages.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitCode {
    PierceFirewall = 0x01,
    PeerInit = 0x05,
}

impl TryFrom<u8> for InitCode {
    type Error = SlskError;

    fn try_from(raw: u8) -> Result<Self, Self::Error> {
        match raw {
            0x01 => Ok(InitCode::PierceFirewall),
            0x05 => Ok(InitCode::PeerInit),
            other => Err(SlskError::protocol(format!(
                "unknown peer init code 0x{other:02x}"
            ))),
        }
    }
}

/// The kind of peer connection announced in a `PeerInit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionType {
    /// `"P"`, a peer message connection.
    Message,
    /// `"F"`, a file transfer connection.
    Transfer,
}

impl ConnectionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionType::Message => "P",
            ConnectionType::Transfer => "F",
        }
    }
}

impl TryFrom<&str> for ConnectionType {
    type Error = SlskError;

    fn try_from(raw: &str) -> Result<Self, Self::Error> {
        match raw {
            "P" => Ok(ConnectionType::Message),
            "F" => Ok(ConnectionType::Transfer),
            other => Err(SlskError::protocol(format!(
                "unknown peer connection type {other:?}"
            ))),
        }
    }
}

/// Direction of a file transfer as carried in `TransferRequest`.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferDirection {
    Download = 0,
    Upload = 1,
}

impl TryFrom<u32> for TransferDirection {
    type Error = SlskError;

    fn try_from(raw: u32) -> Result<Self, Self::Error> {
        match raw {
            0 => Ok(TransferDirection::Download),
            1 => Ok(TransferDirection::Upload),
            other => Err(SlskError::protocol(format!(
                "unknown transfer direction {other}"
            ))),
        }
    }
}

/// Online status reported by the server for a watched user.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserStatus {
    Offline = 0,
    Away = 1,
    Online = 2,
}

impl TryFrom<u32> for UserStatus {
    type Error = SlskError;

    fn try_from(raw: u32) -> Result<Self, Self::Error> {
        match raw {
            0 => Ok(UserStatus::Offline),
            1 => Ok(UserStatus::Away),
            2 => Ok(UserStatus::Online),
            other => Err(SlskError::protocol(format!("unknown user status {other}"))),
        }
    }
}
