// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Server message types.
//!
//! Requests encode with [`to_frame`]; inbound messages decode from a
//! [`MessageReader`] positioned just past the code field (the dispatcher
//! consumes the code). Every type round-trips through its own encode/decode
//! pair so the integration fakes reuse the production codecs.

use std::net::Ipv4Addr;

use bytes::Bytes;

use crate::{
    error::Result,
    proto::{
        ConnectionType, ServerCode, UserStatus,
        frame::{MessageReader, MessageWriter},
    },
};

/// Credentials handshake. The digest field carries the lowercase hex MD5 of
/// `username + password`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
    pub version: u32,
    pub digest: String,
    pub minor_version: u32,
}

impl LoginRequest {
    pub fn to_frame(&self) -> Bytes {
        let mut w = MessageWriter::with_code(ServerCode::Login as u32);
        w.write_string(&self.username)
            .write_string(&self.password)
            .write_u32(self.version)
            .write_string(&self.digest)
            .write_u32(self.minor_version);
        w.into_frame()
    }

    pub fn from_reader(r: &mut MessageReader) -> Result<Self> {
        Ok(Self {
            username: r.read_string()?,
            password: r.read_string()?,
            version: r.read_u32()?,
            digest: r.read_string()?,
            minor_version: r.read_u32()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginResponse {
    pub succeeded: bool,
    pub message: String,
    /// Our externally visible address, present on success only.
    pub ip: Option<Ipv4Addr>,
}

impl LoginResponse {
    pub fn to_frame(&self) -> Bytes {
        let mut w = MessageWriter::with_code(ServerCode::Login as u32);
        w.write_bool(self.succeeded).write_string(&self.message);
        if let Some(ip) = self.ip {
            w.write_ipv4(ip);
        }
        w.into_frame()
    }

    pub fn from_reader(r: &mut MessageReader) -> Result<Self> {
        let succeeded = r.read_bool()?;
        let message = r.read_string()?;
        let ip = if succeeded && r.remaining() >= 4 {
            Some(r.read_ipv4()?)
        } else {
            None
        };
        Ok(Self {
            succeeded,
            message,
            ip,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetWaitPortCommand {
    pub port: u32,
}

impl SetWaitPortCommand {
    pub fn to_frame(&self) -> Bytes {
        let mut w = MessageWriter::with_code(ServerCode::SetWaitPort as u32);
        w.write_u32(self.port);
        w.into_frame()
    }

    pub fn from_reader(r: &mut MessageReader) -> Result<Self> {
        Ok(Self {
            port: r.read_u32()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetPeerAddressRequest {
    pub username: String,
}

impl GetPeerAddressRequest {
    pub fn to_frame(&self) -> Bytes {
        let mut w = MessageWriter::with_code(ServerCode::GetPeerAddress as u32);
        w.write_string(&self.username);
        w.into_frame()
    }

    pub fn from_reader(r: &mut MessageReader) -> Result<Self> {
        Ok(Self {
            username: r.read_string()?,
        })
    }
}

/// `0.0.0.0` means the user is offline; callers map that to `UserOffline`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetPeerAddressResponse {
    pub username: String,
    pub ip: Ipv4Addr,
    pub port: u32,
}

impl GetPeerAddressResponse {
    pub fn to_frame(&self) -> Bytes {
        let mut w = MessageWriter::with_code(ServerCode::GetPeerAddress as u32);
        w.write_string(&self.username)
            .write_ipv4(self.ip)
            .write_u32(self.port);
        w.into_frame()
    }

    pub fn from_reader(r: &mut MessageReader) -> Result<Self> {
        Ok(Self {
            username: r.read_string()?,
            ip: r.read_ipv4()?,
            port: r.read_u32()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchUserRequest {
    pub username: String,
}

impl WatchUserRequest {
    pub fn to_frame(&self) -> Bytes {
        let mut w = MessageWriter::with_code(ServerCode::WatchUser as u32);
        w.write_string(&self.username);
        w.into_frame()
    }

    pub fn from_reader(r: &mut MessageReader) -> Result<Self> {
        Ok(Self {
            username: r.read_string()?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserStats {
    pub average_speed: u32,
    pub upload_count: u64,
    pub file_count: u32,
    pub directory_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchUserResponse {
    pub username: String,
    pub exists: bool,
    pub status: Option<UserStatus>,
    pub stats: Option<UserStats>,
}

impl WatchUserResponse {
    pub fn to_frame(&self) -> Bytes {
        let mut w = MessageWriter::with_code(ServerCode::WatchUser as u32);
        w.write_string(&self.username).write_bool(self.exists);
        if let Some(status) = self.status {
            w.write_u32(status as u32);
        }
        if let Some(stats) = self.stats {
            w.write_u32(stats.average_speed)
                .write_u64(stats.upload_count)
                .write_u32(stats.file_count)
                .write_u32(stats.directory_count);
        }
        w.into_frame()
    }

    pub fn from_reader(r: &mut MessageReader) -> Result<Self> {
        let username = r.read_string()?;
        let exists = r.read_bool()?;
        let mut status = None;
        let mut stats = None;
        if exists {
            status = Some(UserStatus::try_from(r.read_u32()?)?);
            if r.remaining() > 0 {
                stats = Some(UserStats {
                    average_speed: r.read_u32()?,
                    upload_count: r.read_u64()?,
                    file_count: r.read_u32()?,
                    directory_count: r.read_u32()?,
                });
            }
        }
        Ok(Self {
            username,
            exists,
            status,
            stats,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetUserStatusRequest {
    pub username: String,
}

impl GetUserStatusRequest {
    pub fn to_frame(&self) -> Bytes {
        let mut w = MessageWriter::with_code(ServerCode::GetUserStatus as u32);
        w.write_string(&self.username);
        w.into_frame()
    }

    pub fn from_reader(r: &mut MessageReader) -> Result<Self> {
        Ok(Self {
            username: r.read_string()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetUserStatusResponse {
    pub username: String,
    pub status: UserStatus,
    pub privileged: bool,
}

impl GetUserStatusResponse {
    pub fn to_frame(&self) -> Bytes {
        let mut w = MessageWriter::with_code(ServerCode::GetUserStatus as u32);
        w.write_string(&self.username)
            .write_u32(self.status as u32)
            .write_bool(self.privileged);
        w.into_frame()
    }

    pub fn from_reader(r: &mut MessageReader) -> Result<Self> {
        Ok(Self {
            username: r.read_string()?,
            status: UserStatus::try_from(r.read_u32()?)?,
            privileged: r.read_bool()?,
        })
    }
}

/// Outbound room chat line; the inbound broadcast is [`SayChatroomNotification`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SayChatroomCommand {
    pub room: String,
    pub message: String,
}

impl SayChatroomCommand {
    pub fn to_frame(&self) -> Bytes {
        let mut w = MessageWriter::with_code(ServerCode::SayChatroom as u32);
        w.write_string(&self.room).write_string(&self.message);
        w.into_frame()
    }

    pub fn from_reader(r: &mut MessageReader) -> Result<Self> {
        Ok(Self {
            room: r.read_string()?,
            message: r.read_string()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SayChatroomNotification {
    pub room: String,
    pub username: String,
    pub message: String,
}

impl SayChatroomNotification {
    pub fn to_frame(&self) -> Bytes {
        let mut w = MessageWriter::with_code(ServerCode::SayChatroom as u32);
        w.write_string(&self.room)
            .write_string(&self.username)
            .write_string(&self.message);
        w.into_frame()
    }

    pub fn from_reader(r: &mut MessageReader) -> Result<Self> {
        Ok(Self {
            room: r.read_string()?,
            username: r.read_string()?,
            message: r.read_string()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinRoomRequest {
    pub room: String,
}

impl JoinRoomRequest {
    pub fn to_frame(&self) -> Bytes {
        let mut w = MessageWriter::with_code(ServerCode::JoinRoom as u32);
        w.write_string(&self.room);
        w.into_frame()
    }

    pub fn from_reader(r: &mut MessageReader) -> Result<Self> {
        Ok(Self {
            room: r.read_string()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinRoomResponse {
    pub room: String,
    pub users: Vec<String>,
}

impl JoinRoomResponse {
    pub fn to_frame(&self) -> Bytes {
        let mut w = MessageWriter::with_code(ServerCode::JoinRoom as u32);
        w.write_string(&self.room).write_u32(self.users.len() as u32);
        for user in &self.users {
            w.write_string(user);
        }
        w.into_frame()
    }

    pub fn from_reader(r: &mut MessageReader) -> Result<Self> {
        let room = r.read_string()?;
        let count = r.read_u32()? as usize;
        let mut users = Vec::with_capacity(count.min(4096));
        for _ in 0..count {
            users.push(r.read_string()?);
        }
        Ok(Self { room, users })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaveRoomRequest {
    pub room: String,
}

impl LeaveRoomRequest {
    pub fn to_frame(&self) -> Bytes {
        let mut w = MessageWriter::with_code(ServerCode::LeaveRoom as u32);
        w.write_string(&self.room);
        w.into_frame()
    }

    pub fn from_reader(r: &mut MessageReader) -> Result<Self> {
        Ok(Self {
            room: r.read_string()?,
        })
    }
}

/// The server confirms a room part by echoing the room name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaveRoomResponse {
    pub room: String,
}

impl LeaveRoomResponse {
    pub fn to_frame(&self) -> Bytes {
        let mut w = MessageWriter::with_code(ServerCode::LeaveRoom as u32);
        w.write_string(&self.room);
        w.into_frame()
    }

    pub fn from_reader(r: &mut MessageReader) -> Result<Self> {
        Ok(Self {
            room: r.read_string()?,
        })
    }
}

/// Ask the server to have `username` connect back to us; the rendezvous half
/// of indirect peer establishment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectToPeerRequest {
    pub token: i32,
    pub username: String,
    pub connection_type: ConnectionType,
}

impl ConnectToPeerRequest {
    pub fn to_frame(&self) -> Bytes {
        let mut w = MessageWriter::with_code(ServerCode::ConnectToPeer as u32);
        w.write_i32(self.token)
            .write_string(&self.username)
            .write_string(self.connection_type.as_str());
        w.into_frame()
    }

    pub fn from_reader(r: &mut MessageReader) -> Result<Self> {
        Ok(Self {
            token: r.read_i32()?,
            username: r.read_string()?,
            connection_type: ConnectionType::try_from(r.read_string()?.as_str())?,
        })
    }
}

/// Server-pushed rendezvous: `username` wants us to dial `ip:port` and
/// pierce with `token`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectToPeerResponse {
    pub username: String,
    pub connection_type: ConnectionType,
    pub ip: Ipv4Addr,
    pub port: u32,
    pub token: i32,
    pub privileged: bool,
}

impl ConnectToPeerResponse {
    pub fn to_frame(&self) -> Bytes {
        let mut w = MessageWriter::with_code(ServerCode::ConnectToPeer as u32);
        w.write_string(&self.username)
            .write_string(self.connection_type.as_str())
            .write_ipv4(self.ip)
            .write_u32(self.port)
            .write_i32(self.token)
            .write_bool(self.privileged);
        w.into_frame()
    }

    pub fn from_reader(r: &mut MessageReader) -> Result<Self> {
        Ok(Self {
            username: r.read_string()?,
            connection_type: ConnectionType::try_from(r.read_string()?.as_str())?,
            ip: r.read_ipv4()?,
            port: r.read_u32()?,
            token: r.read_i32()?,
            privileged: r.read_bool()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrivateMessageCommand {
    pub username: String,
    pub message: String,
}

impl PrivateMessageCommand {
    pub fn to_frame(&self) -> Bytes {
        let mut w = MessageWriter::with_code(ServerCode::PrivateMessage as u32);
        w.write_string(&self.username).write_string(&self.message);
        w.into_frame()
    }

    pub fn from_reader(r: &mut MessageReader) -> Result<Self> {
        Ok(Self {
            username: r.read_string()?,
            message: r.read_string()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrivateMessageNotification {
    pub id: u32,
    pub timestamp: u32,
    pub username: String,
    pub message: String,
    pub is_replayed: bool,
}

impl PrivateMessageNotification {
    pub fn to_frame(&self) -> Bytes {
        let mut w = MessageWriter::with_code(ServerCode::PrivateMessage as u32);
        w.write_u32(self.id)
            .write_u32(self.timestamp)
            .write_string(&self.username)
            .write_string(&self.message)
            .write_bool(self.is_replayed);
        w.into_frame()
    }

    pub fn from_reader(r: &mut MessageReader) -> Result<Self> {
        Ok(Self {
            id: r.read_u32()?,
            timestamp: r.read_u32()?,
            username: r.read_string()?,
            message: r.read_string()?,
            is_replayed: r.read_bool()?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcknowledgePrivateMessageCommand {
    pub id: u32,
}

impl AcknowledgePrivateMessageCommand {
    pub fn to_frame(&self) -> Bytes {
        let mut w =
            MessageWriter::with_code(ServerCode::AcknowledgePrivateMessage as u32);
        w.write_u32(self.id);
        w.into_frame()
    }

    pub fn from_reader(r: &mut MessageReader) -> Result<Self> {
        Ok(Self { id: r.read_u32()? })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSearchRequest {
    pub token: i32,
    pub text: String,
}

impl FileSearchRequest {
    pub fn to_frame(&self) -> Bytes {
        let mut w = MessageWriter::with_code(ServerCode::FileSearch as u32);
        w.write_i32(self.token).write_string(&self.text);
        w.into_frame()
    }

    pub fn from_reader(r: &mut MessageReader) -> Result<Self> {
        Ok(Self {
            token: r.read_i32()?,
            text: r.read_string()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserSearchRequest {
    pub username: String,
    pub token: i32,
    pub text: String,
}

impl UserSearchRequest {
    pub fn to_frame(&self) -> Bytes {
        let mut w = MessageWriter::with_code(ServerCode::UserSearch as u32);
        w.write_string(&self.username)
            .write_i32(self.token)
            .write_string(&self.text);
        w.into_frame()
    }

    pub fn from_reader(r: &mut MessageReader) -> Result<Self> {
        Ok(Self {
            username: r.read_string()?,
            token: r.read_i32()?,
            text: r.read_string()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomSearchRequest {
    pub room: String,
    pub token: i32,
    pub text: String,
}

impl RoomSearchRequest {
    pub fn to_frame(&self) -> Bytes {
        let mut w = MessageWriter::with_code(ServerCode::RoomSearch as u32);
        w.write_string(&self.room)
            .write_i32(self.token)
            .write_string(&self.text);
        w.into_frame()
    }

    pub fn from_reader(r: &mut MessageReader) -> Result<Self> {
        Ok(Self {
            room: r.read_string()?,
            token: r.read_i32()?,
            text: r.read_string()?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ServerPingCommand;

impl ServerPingCommand {
    pub fn to_frame(&self) -> Bytes {
        MessageWriter::with_code(ServerCode::ServerPing as u32).into_frame()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KickedNotification {
    pub message: String,
}

impl KickedNotification {
    pub fn to_frame(&self) -> Bytes {
        let mut w = MessageWriter::with_code(ServerCode::KickedFromServer as u32);
        w.write_string(&self.message);
        w.into_frame()
    }

    pub fn from_reader(r: &mut MessageReader) -> Result<Self> {
        // Older servers send the kick with no body at all.
        let message = if r.remaining() > 0 {
            r.read_string()?
        } else {
            String::new()
        };
        Ok(Self { message })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RoomListRequest;

impl RoomListRequest {
    pub fn to_frame(&self) -> Bytes {
        MessageWriter::with_code(ServerCode::RoomList as u32).into_frame()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Room {
    pub name: String,
    pub user_count: u32,
}

/// Room names and occupancy arrive as two parallel lists.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RoomListResponse {
    pub rooms: Vec<Room>,
}

impl RoomListResponse {
    pub fn to_frame(&self) -> Bytes {
        let mut w = MessageWriter::with_code(ServerCode::RoomList as u32);
        w.write_u32(self.rooms.len() as u32);
        for room in &self.rooms {
            w.write_string(&room.name);
        }
        w.write_u32(self.rooms.len() as u32);
        for room in &self.rooms {
            w.write_u32(room.user_count);
        }
        w.into_frame()
    }

    pub fn from_reader(r: &mut MessageReader) -> Result<Self> {
        let count = r.read_u32()? as usize;
        let mut names = Vec::with_capacity(count.min(4096));
        for _ in 0..count {
            names.push(r.read_string()?);
        }
        let stat_count = r.read_u32()? as usize;
        let mut rooms = Vec::with_capacity(names.len());
        for (i, name) in names.into_iter().enumerate() {
            let user_count = if i < stat_count { r.read_u32()? } else { 0 };
            rooms.push(Room { name, user_count });
        }
        Ok(Self { rooms })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalMessageNotification {
    pub message: String,
}

impl GlobalMessageNotification {
    pub fn to_frame(&self) -> Bytes {
        let mut w = MessageWriter::with_code(ServerCode::GlobalMessage as u32);
        w.write_string(&self.message);
        w.into_frame()
    }

    pub fn from_reader(r: &mut MessageReader) -> Result<Self> {
        Ok(Self {
            message: r.read_string()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PrivilegedUsersResponse {
    pub users: Vec<String>,
}

impl PrivilegedUsersResponse {
    pub fn to_frame(&self) -> Bytes {
        let mut w = MessageWriter::with_code(ServerCode::PrivilegedUsers as u32);
        w.write_u32(self.users.len() as u32);
        for user in &self.users {
            w.write_string(user);
        }
        w.into_frame()
    }

    pub fn from_reader(r: &mut MessageReader) -> Result<Self> {
        let count = r.read_u32()? as usize;
        let mut users = Vec::with_capacity(count.min(4096));
        for _ in 0..count {
            users.push(r.read_string()?);
        }
        Ok(Self { users })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HaveNoParentsCommand {
    pub have_no_parents: bool,
}

impl HaveNoParentsCommand {
    pub fn to_frame(&self) -> Bytes {
        let mut w = MessageWriter::with_code(ServerCode::HaveNoParents as u32);
        w.write_bool(self.have_no_parents);
        w.into_frame()
    }

    pub fn from_reader(r: &mut MessageReader) -> Result<Self> {
        Ok(Self {
            have_no_parents: r.read_bool()?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CheckPrivilegesRequest;

impl CheckPrivilegesRequest {
    pub fn to_frame(&self) -> Bytes {
        MessageWriter::with_code(ServerCode::CheckPrivileges as u32).into_frame()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckPrivilegesResponse {
    pub days_remaining: u32,
}

impl CheckPrivilegesResponse {
    pub fn to_frame(&self) -> Bytes {
        let mut w = MessageWriter::with_code(ServerCode::CheckPrivileges as u32);
        w.write_u32(self.days_remaining);
        w.into_frame()
    }

    pub fn from_reader(r: &mut MessageReader) -> Result<Self> {
        Ok(Self {
            days_remaining: r.read_u32()?,
        })
    }
}

/// Candidate parents for the distributed search overlay.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NetInfoNotification {
    pub parents: Vec<ParentCandidate>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentCandidate {
    pub username: String,
    pub ip: Ipv4Addr,
    pub port: u32,
}

impl NetInfoNotification {
    pub fn to_frame(&self) -> Bytes {
        let mut w = MessageWriter::with_code(ServerCode::NetInfo as u32);
        w.write_u32(self.parents.len() as u32);
        for parent in &self.parents {
            w.write_string(&parent.username)
                .write_ipv4(parent.ip)
                .write_u32(parent.port);
        }
        w.into_frame()
    }

    pub fn from_reader(r: &mut MessageReader) -> Result<Self> {
        let count = r.read_u32()? as usize;
        let mut parents = Vec::with_capacity(count.min(4096));
        for _ in 0..count {
            parents.push(ParentCandidate {
                username: r.read_string()?,
                ip: r.read_ipv4()?,
                port: r.read_u32()?,
            });
        }
        Ok(Self { parents })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WishlistIntervalNotification {
    pub seconds: u32,
}

impl WishlistIntervalNotification {
    pub fn to_frame(&self) -> Bytes {
        let mut w = MessageWriter::with_code(ServerCode::WishlistInterval as u32);
        w.write_u32(self.seconds);
        w.into_frame()
    }

    pub fn from_reader(r: &mut MessageReader) -> Result<Self> {
        Ok(Self {
            seconds: r.read_u32()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GivePrivilegesCommand {
    pub username: String,
    pub days: u32,
}

impl GivePrivilegesCommand {
    pub fn to_frame(&self) -> Bytes {
        let mut w = MessageWriter::with_code(ServerCode::GivePrivileges as u32);
        w.write_string(&self.username).write_u32(self.days);
        w.into_frame()
    }

    pub fn from_reader(r: &mut MessageReader) -> Result<Self> {
        Ok(Self {
            username: r.read_string()?,
            days: r.read_u32()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifyPrivilegesNotification {
    pub token: i32,
    pub username: String,
}

impl NotifyPrivilegesNotification {
    pub fn to_frame(&self) -> Bytes {
        let mut w = MessageWriter::with_code(ServerCode::NotifyPrivileges as u32);
        w.write_i32(self.token).write_string(&self.username);
        w.into_frame()
    }

    pub fn from_reader(r: &mut MessageReader) -> Result<Self> {
        Ok(Self {
            token: r.read_i32()?,
            username: r.read_string()?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcknowledgeNotifyPrivilegesCommand {
    pub token: i32,
}

impl AcknowledgeNotifyPrivilegesCommand {
    pub fn to_frame(&self) -> Bytes {
        let mut w =
            MessageWriter::with_code(ServerCode::AcknowledgeNotifyPrivileges as u32);
        w.write_i32(self.token);
        w.into_frame()
    }

    pub fn from_reader(r: &mut MessageReader) -> Result<Self> {
        Ok(Self {
            token: r.read_i32()?,
        })
    }
}

/// The server echoes the new password back as confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangePasswordCommand {
    pub password: String,
}

impl ChangePasswordCommand {
    pub fn to_frame(&self) -> Bytes {
        let mut w = MessageWriter::with_code(ServerCode::ChangePassword as u32);
        w.write_string(&self.password);
        w.into_frame()
    }

    pub fn from_reader(r: &mut MessageReader) -> Result<Self> {
        Ok(Self {
            password: r.read_string()?,
        })
    }
}
