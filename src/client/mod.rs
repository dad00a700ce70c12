// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

pub mod client;
pub mod events;

use std::{sync::Arc, time::Duration};

use bitflags::bitflags;

use crate::{net::common::Governor, transfer::ProgressFn};

bitflags! {
    /// Top-level client state. `CONNECTED` and `LOGGED_IN` compose; a
    /// disconnect resets everything to `DISCONNECTED`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ClientStates: u32 {
        const DISCONNECTED = 1 << 0;
        const CONNECTED    = 1 << 1;
        const LOGGED_IN    = 1 << 2;
    }
}

#[derive(Clone, Default)]
pub struct DownloadOptions {
    /// Explicit token; allocated when unset.
    pub token: Option<i32>,
    /// Resume point, written once at the start of the data phase.
    pub start_offset: u64,
    /// Pacing hook awaited between chunks.
    pub governor: Option<Governor>,
    /// Progress observer; also receives the single terminal update.
    pub on_progress: Option<ProgressFn>,
}

#[derive(Clone, Default)]
pub struct UploadOptions {
    pub token: Option<i32>,
    pub governor: Option<Governor>,
    pub on_progress: Option<ProgressFn>,
}

#[derive(Clone, Default)]
pub struct BrowseOptions {
    /// Deadline for the peer's share listing; the global message timeout
    /// when unset.
    pub response_timeout: Option<Duration>,
    /// Invoked exactly once with the listing's payload size in bytes.
    pub on_progress: Option<Arc<dyn Fn(u64) + Send + Sync>>,
}
