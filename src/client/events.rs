// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use crate::{
    client::ClientStates,
    proto::server::{
        GetUserStatusResponse, PrivateMessageNotification, SayChatroomNotification,
    },
};

/// Everything the client reports outside the request/response flow. A single
/// consumer takes the event receiver; fan-out to multiple subscribers is the
/// embedder's concern.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    StateChanged {
        from: ClientStates,
        to: ClientStates,
        message: Option<String>,
    },
    PrivateMessageReceived(PrivateMessageNotification),
    RoomMessageReceived(SayChatroomNotification),
    UserStatusChanged(GetUserStatusResponse),
    PrivilegeNotificationReceived { username: String, token: i32 },
    PrivilegedUserListReceived(Vec<String>),
    GlobalMessageReceived(String),
    KickedFromServer { message: String },
    WishlistIntervalChanged { seconds: u32 },
    Disconnected { message: String },
}
