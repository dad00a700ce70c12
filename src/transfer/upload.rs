// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The upload state machine: mirror image of the download.
//!
//! The uploader announces with `TransferRequest{Upload,…,size}`, opens the
//! transfer connection on `allowed=true`, reads the peer's 8-byte start
//! offset, seeks the source and streams `size - offset` bytes, then reads one
//! trailing byte to force the remote close. The caller holds the per-user
//! upload mutex for the whole handshake; the official network cannot
//! multiplex uploads to one peer.

use std::{io::SeekFrom, pin::Pin, sync::Arc};

use tokio::io::{AsyncRead, AsyncSeek, AsyncSeekExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
    cfg::config::Config,
    error::{Result, SlskError},
    net::{common::Governor, connection::Connection, peers::PeerManager},
    proto::{
        TransferDirection,
        peer::{TransferRequest, TransferResponse},
    },
    transfer::{
        Transfer, TransferStates,
        common::{StateMachine, StateMachineCtx, Transition},
        spawn_completion_monitor,
    },
    waits::{PendingWait, WaitKey, Waiter},
};

/// What an upload reads from: any seekable async byte source.
pub trait UploadSource: AsyncRead + AsyncSeek + Unpin + Send {}
impl<T: AsyncRead + AsyncSeek + Unpin + Send + ?Sized> UploadSource for T {}

pub struct UploadCtx<'a> {
    pub waiter: Arc<Waiter>,
    pub peers: Arc<PeerManager>,
    pub cfg: Config,
    pub transfer: Arc<Transfer>,
    pub peer_conn: Arc<Connection>,

    source: &'a mut dyn UploadSource,
    governor: Option<Governor>,
    cancel: CancellationToken,

    finished_wait: Option<PendingWait<()>>,
    transfer_conn: Option<Arc<Connection>>,
    state: Option<UploadStates>,
}

impl<'a> UploadCtx<'a> {
    pub fn new(
        waiter: Arc<Waiter>,
        peers: Arc<PeerManager>,
        cfg: Config,
        transfer: Arc<Transfer>,
        peer_conn: Arc<Connection>,
        source: &'a mut dyn UploadSource,
        governor: Option<Governor>,
    ) -> Self {
        Self {
            waiter,
            peers,
            cfg,
            transfer,
            peer_conn,
            source,
            governor,
            cancel: CancellationToken::new(),
            finished_wait: None,
            transfer_conn: None,
            state: Some(UploadStates::Start(Start)),
        }
    }

    async fn send_request(&mut self) -> Result<()> {
        self.transfer.set_state(TransferStates::REQUESTED);
        let request = TransferRequest {
            direction: TransferDirection::Upload,
            token: self.transfer.token,
            filename: self.transfer.filename.clone(),
            size: Some(self.transfer.size()),
        };
        self.peer_conn.write_message(&request.to_frame()).await
    }

    async fn await_response(&mut self) -> Result<TransferResponse> {
        self.waiter
            .wait(
                WaitKey::TransferResponse {
                    username: self.transfer.username.clone(),
                    token: self.transfer.token,
                },
                Some(self.cfg.timeouts.message),
                Some(&self.cancel),
            )
            .await
    }

    async fn open_transfer_connection(&mut self) -> Result<()> {
        self.transfer.set_state(TransferStates::INITIALIZING);

        let endpoint = self
            .peers
            .lookup_endpoint(&self.transfer.username, Some(&self.cancel))
            .await?;
        let conn = self
            .peers
            .get_upload_connection(
                &self.transfer.username,
                endpoint,
                self.transfer.token,
                Some(&self.cancel),
            )
            .await?;

        self.transfer.attach_connection(conn.clone());
        self.transfer_conn = Some(conn);
        Ok(())
    }

    /// The data phase: the peer picks the offset, we seek and push.
    async fn stream(&mut self) -> Result<()> {
        let conn = self
            .transfer_conn
            .clone()
            .ok_or_else(|| SlskError::InvalidState("no transfer connection".into()))?;

        self.finished_wait = Some(self.waiter.register(self.transfer.finished_key()));
        spawn_completion_monitor(
            Arc::clone(&self.waiter),
            Arc::clone(&self.transfer),
            conn.clone(),
        );

        let offset_bytes = conn.read_exact(8).await?;
        let offset = u64::from_le_bytes(offset_bytes[..8].try_into().map_err(|_| {
            SlskError::protocol("short read for the 8-byte start offset")
        })?);
        let size = self.transfer.size();
        if offset > size {
            return Err(SlskError::protocol(format!(
                "peer requested offset {offset} beyond the {size}-byte file"
            )));
        }
        self.transfer.set_start_offset(offset);

        self.source.seek(SeekFrom::Start(offset)).await?;
        self.transfer.set_state(TransferStates::IN_PROGRESS);

        let remaining = size - offset;
        if remaining > 0 {
            let transfer = Arc::clone(&self.transfer);
            let mut on_chunk = move |n: u64| transfer.add_bytes(n);
            let governor = self.governor.clone();
            let cancel = self.cancel.clone();
            conn.write_from_source(
                remaining,
                &mut *self.source,
                governor.as_ref(),
                &mut on_chunk,
                &cancel,
            )
            .await?;
        }

        // The remote closes once it has every byte; the read exists only to
        // observe that close, so its failure is the success signal.
        let _ = conn.read_exact(1).await;
        Ok(())
    }

    fn settle(&self, outcome: &Result<()>) {
        let (terminal, reason) = match outcome {
            Ok(()) => (
                TransferStates::COMPLETED | TransferStates::SUCCEEDED,
                "transfer complete".to_string(),
            ),
            Err(e) => (TransferStates::terminal_from_error(e), e.to_string()),
        };
        self.transfer.set_state(terminal);
        if let Some(conn) = &self.transfer_conn {
            conn.disconnect(&reason);
        }
    }

    async fn await_finished(&mut self) -> Result<()> {
        let wait = self
            .finished_wait
            .take()
            .ok_or_else(|| SlskError::InvalidState("completion wait already taken".into()))?;
        wait.resolve_indefinite(None).await.map_err(|e| {
            crate::transfer::align_error_with_state(
                self.transfer.state(),
                e,
                &self.transfer.filename,
            )
        })
    }
}

#[derive(Debug)]
pub struct Start;

#[derive(Debug)]
pub struct AwaitResponse;

#[derive(Debug)]
pub struct OpenConnection;

#[derive(Debug)]
pub struct Stream;

#[derive(Debug)]
pub struct Finish;

#[derive(Debug)]
pub enum UploadStates {
    Start(Start),
    AwaitResponse(AwaitResponse),
    OpenConnection(OpenConnection),
    Stream(Stream),
    Finish(Finish),
}

type UploadStepOut = Transition<UploadStates, Result<()>>;

impl<'ctx> StateMachine<UploadCtx<'ctx>, UploadStepOut> for Start {
    type StepResult<'a>
        = Pin<Box<dyn Future<Output = UploadStepOut> + Send + 'a>>
    where
        Self: 'a,
        UploadCtx<'ctx>: 'a;

    fn step<'a>(&'a self, ctx: &'a mut UploadCtx<'ctx>) -> Self::StepResult<'a> {
        Box::pin(async move {
            if let Err(e) = ctx.send_request().await {
                return Transition::Done(Err(e));
            }
            Transition::Next(UploadStates::AwaitResponse(AwaitResponse), Ok(()))
        })
    }
}

impl<'ctx> StateMachine<UploadCtx<'ctx>, UploadStepOut> for AwaitResponse {
    type StepResult<'a>
        = Pin<Box<dyn Future<Output = UploadStepOut> + Send + 'a>>
    where
        Self: 'a,
        UploadCtx<'ctx>: 'a;

    fn step<'a>(&'a self, ctx: &'a mut UploadCtx<'ctx>) -> Self::StepResult<'a> {
        Box::pin(async move {
            let response = match ctx.await_response().await {
                Ok(response) => response,
                Err(e) => return Transition::Done(Err(e)),
            };
            if !response.allowed {
                let message = response
                    .message
                    .unwrap_or_else(|| "Cancelled.".to_string());
                return Transition::Done(Err(SlskError::TransferRejected(message)));
            }
            Transition::Next(UploadStates::OpenConnection(OpenConnection), Ok(()))
        })
    }
}

impl<'ctx> StateMachine<UploadCtx<'ctx>, UploadStepOut> for OpenConnection {
    type StepResult<'a>
        = Pin<Box<dyn Future<Output = UploadStepOut> + Send + 'a>>
    where
        Self: 'a,
        UploadCtx<'ctx>: 'a;

    fn step<'a>(&'a self, ctx: &'a mut UploadCtx<'ctx>) -> Self::StepResult<'a> {
        Box::pin(async move {
            if let Err(e) = ctx.open_transfer_connection().await {
                return Transition::Done(Err(e));
            }
            Transition::Next(UploadStates::Stream(Stream), Ok(()))
        })
    }
}

impl<'ctx> StateMachine<UploadCtx<'ctx>, UploadStepOut> for Stream {
    type StepResult<'a>
        = Pin<Box<dyn Future<Output = UploadStepOut> + Send + 'a>>
    where
        Self: 'a,
        UploadCtx<'ctx>: 'a;

    fn step<'a>(&'a self, ctx: &'a mut UploadCtx<'ctx>) -> Self::StepResult<'a> {
        Box::pin(async move {
            let outcome = ctx.stream().await;
            ctx.settle(&outcome);
            Transition::Next(UploadStates::Finish(Finish), Ok(()))
        })
    }
}

impl<'ctx> StateMachine<UploadCtx<'ctx>, UploadStepOut> for Finish {
    type StepResult<'a>
        = Pin<Box<dyn Future<Output = UploadStepOut> + Send + 'a>>
    where
        Self: 'a,
        UploadCtx<'ctx>: 'a;

    fn step<'a>(&'a self, ctx: &'a mut UploadCtx<'ctx>) -> Self::StepResult<'a> {
        Box::pin(async move { Transition::Done(ctx.await_finished().await) })
    }
}

impl<'ctx> StateMachineCtx<()> for UploadCtx<'ctx> {
    async fn execute(&mut self, cancel: &CancellationToken) -> Result<()> {
        self.cancel = cancel.clone();
        debug!(
            username = %self.transfer.username,
            filename = %self.transfer.filename,
            token = self.transfer.token,
            "Loop Upload"
        );

        loop {
            let state = self.state.take().ok_or_else(|| {
                SlskError::InvalidState("upload state machine exhausted".into())
            })?;
            let tr = match state {
                UploadStates::Start(s) => s.step(self).await,
                UploadStates::AwaitResponse(s) => s.step(self).await,
                UploadStates::OpenConnection(s) => s.step(self).await,
                UploadStates::Stream(s) => s.step(self).await,
                UploadStates::Finish(s) => s.step(self).await,
            };

            match tr {
                Transition::Next(next, r) => {
                    r?;
                    self.state = Some(next);
                },
                Transition::Stay(Ok(_)) => {},
                Transition::Stay(Err(e)) => return Err(e),
                Transition::Done(r) => return r,
            }
        }
    }
}
