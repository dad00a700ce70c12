// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The TCP connection primitive shared by the server link, peer message
//! connections, and transfer connections.
//!
//! Every read and write runs under the connection's inactivity deadline, so a
//! stalled remote trips the watchdog and tears the connection down instead of
//! wedging the owning operation. Disconnection is idempotent: the first call
//! records the reason and fires the `closed` token exactly once; observers
//! hang off that token.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use bytes::{Bytes, BytesMut};
use once_cell::sync::OnceCell;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::{
        TcpStream, ToSocketAddrs,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    sync::Mutex,
    time::timeout,
};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
    error::{Result, SlskError},
    net::common::{CHUNK_LEN, Governor, io_with_timeout},
    proto::frame,
};

#[derive(Debug)]
pub struct Connection {
    reader: Mutex<OwnedReadHalf>,
    writer: Mutex<OwnedWriteHalf>,
    remote: SocketAddr,
    inbound: bool,
    inactivity: Option<Duration>,
    closed: CancellationToken,
    close_reason: OnceCell<String>,
}

impl Connection {
    /// Dials `addr` within `connect_timeout`. `inactivity` arms the watchdog
    /// for all subsequent I/O; `None` disables it.
    pub async fn connect(
        addr: impl ToSocketAddrs,
        connect_timeout: Duration,
        inactivity: Option<Duration>,
    ) -> Result<Arc<Self>> {
        let stream = timeout(connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| SlskError::timeout("connect"))??;
        Self::from_stream(stream, inactivity, false)
    }

    /// Wraps an accepted socket.
    pub fn accepted(stream: TcpStream, inactivity: Option<Duration>) -> Result<Arc<Self>> {
        Self::from_stream(stream, inactivity, true)
    }

    fn from_stream(
        stream: TcpStream,
        inactivity: Option<Duration>,
        inbound: bool,
    ) -> Result<Arc<Self>> {
        stream.set_nodelay(true)?;
        let remote = stream.peer_addr()?;
        let (r, w) = stream.into_split();
        Ok(Arc::new(Self {
            reader: Mutex::new(r),
            writer: Mutex::new(w),
            remote,
            inbound,
            inactivity,
            closed: CancellationToken::new(),
            close_reason: OnceCell::new(),
        }))
    }

    pub fn remote(&self) -> SocketAddr {
        self.remote
    }

    pub fn is_inbound(&self) -> bool {
        self.inbound
    }

    pub fn is_connected(&self) -> bool {
        !self.closed.is_cancelled()
    }

    /// Fires once, on the first disconnect.
    pub fn closed(&self) -> CancellationToken {
        self.closed.clone()
    }

    pub fn close_reason(&self) -> Option<&str> {
        self.close_reason.get().map(String::as_str)
    }

    /// Idempotent teardown. The first caller's reason wins.
    pub fn disconnect(&self, reason: &str) {
        if self.close_reason.set(reason.to_string()).is_ok() {
            debug!(remote = %self.remote, reason, "disconnecting");
            self.closed.cancel();
        }
    }

    /// Reads one length-prefixed frame and returns its payload.
    pub async fn read_message(&self) -> Result<Bytes> {
        let mut r = self.reader.lock().await;

        let mut prefix = [0u8; 4];
        self.io("read frame prefix", r.read_exact(&mut prefix))
            .await?;
        let len = frame::payload_len(prefix)?;

        let mut payload = BytesMut::with_capacity(len);
        payload.resize(len, 0);
        if len > 0 {
            self.io("read frame payload", r.read_exact(&mut payload[..]))
                .await?;
        }
        Ok(payload.freeze())
    }

    /// Writes one pre-framed message (length prefix included).
    pub async fn write_message(&self, framed: &[u8]) -> Result<()> {
        let mut w = self.writer.lock().await;
        self.io("write frame", w.write_all(framed)).await?;
        Ok(())
    }

    /// Reads exactly `n` raw bytes (transfer handshakes).
    pub async fn read_exact(&self, n: usize) -> Result<Bytes> {
        let mut r = self.reader.lock().await;
        let mut buf = BytesMut::with_capacity(n);
        buf.resize(n, 0);
        self.io("read raw bytes", r.read_exact(&mut buf[..])).await?;
        Ok(buf.freeze())
    }

    pub async fn read_i32_le(&self) -> Result<i32> {
        let bytes = self.read_exact(4).await?;
        Ok(i32::from_le_bytes(
            bytes[..4].try_into().map_err(|_| {
                SlskError::protocol("short read for a 4-byte token field")
            })?,
        ))
    }

    /// Writes raw bytes outside the framing scheme (transfer handshakes and
    /// data phases).
    pub async fn write_all(&self, buf: &[u8]) -> Result<()> {
        let mut w = self.writer.lock().await;
        self.io("write raw bytes", w.write_all(buf)).await?;
        Ok(())
    }

    /// Streams exactly `len` bytes from the socket into `sink` in chunks,
    /// awaiting the governor before each chunk and reporting each chunk's
    /// size through `on_chunk`. Inactivity applies per chunk.
    pub async fn read_into_sink<W>(
        &self,
        len: u64,
        sink: &mut W,
        governor: Option<&Governor>,
        on_chunk: &mut (dyn FnMut(u64) + Send),
        cancel: &CancellationToken,
    ) -> Result<u64>
    where
        W: AsyncWrite + Unpin + Send + ?Sized,
    {
        let mut remaining = len;
        let mut moved = 0u64;
        let mut buf = vec![0u8; CHUNK_LEN];

        while remaining > 0 {
            if cancel.is_cancelled() {
                return Err(SlskError::cancelled("transfer read"));
            }
            let chunk = remaining.min(CHUNK_LEN as u64) as usize;
            if let Some(governor) = governor {
                governor(chunk).await;
            }

            {
                let mut r = self.reader.lock().await;
                tokio::select! {
                    _ = cancel.cancelled() => {
                        return Err(SlskError::cancelled("transfer read"));
                    },
                    res = self.io("read transfer chunk", r.read_exact(&mut buf[..chunk])) => {
                        res?;
                    },
                }
            }
            sink.write_all(&buf[..chunk]).await?;

            remaining -= chunk as u64;
            moved += chunk as u64;
            on_chunk(chunk as u64);
        }
        sink.flush().await?;
        Ok(moved)
    }

    /// Streams exactly `len` bytes from `source` to the socket, mirroring
    /// [`read_into_sink`](Self::read_into_sink).
    pub async fn write_from_source<R>(
        &self,
        len: u64,
        source: &mut R,
        governor: Option<&Governor>,
        on_chunk: &mut (dyn FnMut(u64) + Send),
        cancel: &CancellationToken,
    ) -> Result<u64>
    where
        R: AsyncRead + Unpin + Send + ?Sized,
    {
        let mut remaining = len;
        let mut moved = 0u64;
        let mut buf = vec![0u8; CHUNK_LEN];

        while remaining > 0 {
            if cancel.is_cancelled() {
                return Err(SlskError::cancelled("transfer write"));
            }
            let chunk = remaining.min(CHUNK_LEN as u64) as usize;
            if let Some(governor) = governor {
                governor(chunk).await;
            }

            source.read_exact(&mut buf[..chunk]).await?;
            {
                let mut w = self.writer.lock().await;
                tokio::select! {
                    _ = cancel.cancelled() => {
                        return Err(SlskError::cancelled("transfer write"));
                    },
                    res = self.io("write transfer chunk", w.write_all(&buf[..chunk])) => {
                        res?;
                    },
                }
            }

            remaining -= chunk as u64;
            moved += chunk as u64;
            on_chunk(chunk as u64);
        }
        Ok(moved)
    }

    /// Runs one I/O future under the watchdog, classifying the failure and
    /// tearing the connection down when it trips.
    async fn io<F, T>(&self, label: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = std::io::Result<T>>,
    {
        match io_with_timeout(label, fut, self.inactivity, &self.closed).await {
            Ok(v) => Ok(v),
            Err(e) => {
                match &e {
                    SlskError::Timeout(_) => self.disconnect("inactivity timeout"),
                    SlskError::Cancelled(_) => {},
                    other => self.disconnect(&other.to_string()),
                }
                Err(e)
            },
        }
    }
}
