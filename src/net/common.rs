// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{future::Future, pin::Pin, sync::Arc, time::Duration};

use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, SlskError};

/// Transfer streaming chunk size.
pub const CHUNK_LEN: usize = 0x4000;

/// A caller-supplied pacing hook, awaited between I/O chunks with the number
/// of bytes about to move. Sleeping inside it shapes throughput.
pub type Governor =
    Arc<dyn Fn(usize) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Bounds an I/O future by an optional inactivity deadline and a cancel
/// token. `None` disables the deadline (the server connection runs with its
/// watchdog off).
pub(crate) async fn io_with_timeout<F, T>(
    label: &'static str,
    fut: F,
    io_timeout: Option<Duration>,
    cancel: &CancellationToken,
) -> Result<T>
where
    F: Future<Output = std::io::Result<T>>,
{
    match io_timeout {
        Some(deadline) => {
            tokio::select! {
                _ = cancel.cancelled() => Err(SlskError::cancelled(label)),
                res = timeout(deadline, fut) => match res {
                    Ok(Ok(v)) => Ok(v),
                    Ok(Err(e)) => Err(e.into()),
                    Err(_) => Err(SlskError::timeout(label)),
                },
            }
        },
        None => {
            tokio::select! {
                _ = cancel.cancelled() => Err(SlskError::cancelled(label)),
                res = fut => res.map_err(Into::into),
            }
        },
    }
}
