// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The download state machine.
//!
//! Two paths share it. On the immediate path the peer answers our transfer
//! request with `allowed=true` and we open the transfer connection ourselves.
//! On the queued path the peer parks us with `allowed=false`; much later it
//! sends its own `TransferRequest`, we acknowledge it, and the transfer
//! connection reaches us either directly (our listener) or indirectly (a
//! server-pushed rendezvous), whichever lands first.
//!
//! The wait on the peer's own request is registered in `Start`, before our
//! request goes out, so the reply cannot slip past us; it is cancelled by
//! its drop-guard on every other exit.

use std::{pin::Pin, sync::Arc};

use tokio::io::AsyncWrite;
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

/// Everything one download needs, threaded through its states.
pub struct DownloadCtx<'a> {
    pub waiter: Arc<Waiter>,
    pub peers: Arc<PeerManager>,
    pub cfg: Config,
    pub transfer: Arc<Transfer>,
    /// The peer message connection used for the handshake; shared, never
    /// disconnected by the download.
    pub peer_conn: Arc<Connection>,

    sink: &'a mut (dyn AsyncWrite + Unpin + Send),
    governor: Option<Governor>,
    cancel: CancellationToken,

    queued_wait: Option<PendingWait<TransferRequest>>,
    finished_wait: Option<PendingWait<()>>,
    transfer_conn: Option<Arc<Connection>>,
    state: Option<DownloadStates>,
}

impl<'a> DownloadCtx<'a> {
    pub fn new(
        waiter: Arc<Waiter>,
        peers: Arc<PeerManager>,
        cfg: Config,
        transfer: Arc<Transfer>,
        peer_conn: Arc<Connection>,
        sink: &'a mut (dyn AsyncWrite + Unpin + Send),
        governor: Option<Governor>,
    ) -> Self {
        Self {
            waiter,
            peers,
            cfg,
            transfer,
            peer_conn,
            sink,
            governor,
            cancel: CancellationToken::new(),
            queued_wait: None,
            finished_wait: None,
            transfer_conn: None,
            state: Some(DownloadStates::Start(Start)),
        }
    }

    async fn send_request(&mut self) -> Result<()> {
        self.transfer.set_state(TransferStates::REQUESTED);

        // Registered before our own request so the peer's counter-request
        // cannot race past the registry.
        self.queued_wait =
            Some(self.waiter.register(WaitKey::TransferRequested {
                username: self.transfer.username.clone(),
                filename: self.transfer.filename.clone(),
            }));

        let request = TransferRequest {
            direction: TransferDirection::Download,
            token: self.transfer.token,
            filename: self.transfer.filename.clone(),
            size: None,
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

    /// Immediate path: we dial, announce `"F"`, and learn the remote token.
    async fn open_transfer_connection(&mut self) -> Result<()> {
        self.transfer.set_state(TransferStates::INITIALIZING);

        let endpoint = self
            .peers
            .lookup_endpoint(&self.transfer.username, Some(&self.cancel))
            .await?;
        let (conn, remote_token) = self
            .peers
            .get_transfer_connection(
                &self.transfer.username,
                endpoint,
                self.transfer.token,
                Some(&self.cancel),
            )
            .await?;

        self.transfer.set_remote_token(remote_token);
        self.transfer.attach_connection(conn.clone());
        self.transfer_conn = Some(conn);
        Ok(())
    }

    /// Queued path: park on the peer's own request, acknowledge it, then
    /// park on both rendezvous keys for the transfer connection.
    async fn await_queued_turn(&mut self) -> Result<()> {
        let wait = self
            .queued_wait
            .take()
            .ok_or_else(|| SlskError::InvalidState("queued wait already taken".into()))?;
        let request = wait.resolve_indefinite(Some(&self.cancel)).await?;

        let remote_token = request.token;
        let size = request.size.unwrap_or_else(|| self.transfer.size());
        self.transfer.set_remote_token(remote_token);
        self.transfer.set_size(size);

        // Armed before the acknowledgment: the peer may open the transfer
        // connection the instant it reads our reply.
        let rendezvous = self.peers.register_transfer_rendezvous(
            &self.transfer.username,
            &self.transfer.filename,
            remote_token,
        );

        let ack = TransferResponse::allowed(remote_token, size);
        self.peer_conn.write_message(&ack.to_frame()).await?;
        self.transfer.set_state(TransferStates::INITIALIZING);

        let conn = rendezvous.resolve(Some(&self.cancel)).await?;
        self.transfer.attach_connection(conn.clone());
        self.transfer_conn = Some(conn);
        Ok(())
    }

    /// The data phase: write the 8-byte offset once, then drain the wire.
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

        let offset = self.transfer.start_offset();
        conn.write_all(&offset.to_le_bytes()).await?;
        self.transfer.set_state(TransferStates::IN_PROGRESS);

        let remaining = self.transfer.size().saturating_sub(offset);
        if remaining > 0 {
            let transfer = Arc::clone(&self.transfer);
            let mut on_chunk = move |n: u64| transfer.add_bytes(n);
            let governor = self.governor.clone();
            let cancel = self.cancel.clone();
            conn.read_into_sink(
                remaining,
                &mut *self.sink,
                governor.as_ref(),
                &mut on_chunk,
                &cancel,
            )
            .await?;
        }
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

    /// The outer task resolves the completion wait exactly once.
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
pub struct AwaitQueued;

#[derive(Debug)]
pub struct OpenConnection;

#[derive(Debug)]
pub struct Stream;

#[derive(Debug)]
pub struct Finish;

#[derive(Debug)]
pub enum DownloadStates {
    Start(Start),
    AwaitResponse(AwaitResponse),
    AwaitQueued(AwaitQueued),
    OpenConnection(OpenConnection),
    Stream(Stream),
    Finish(Finish),
}

type DownloadStepOut = Transition<DownloadStates, Result<()>>;

impl<'ctx> StateMachine<DownloadCtx<'ctx>, DownloadStepOut> for Start {
    type StepResult<'a>
        = Pin<Box<dyn Future<Output = DownloadStepOut> + Send + 'a>>
    where
        Self: 'a,
        DownloadCtx<'ctx>: 'a;

    fn step<'a>(&'a self, ctx: &'a mut DownloadCtx<'ctx>) -> Self::StepResult<'a> {
        Box::pin(async move {
            if let Err(e) = ctx.send_request().await {
                return Transition::Done(Err(e));
            }
            Transition::Next(DownloadStates::AwaitResponse(AwaitResponse), Ok(()))
        })
    }
}

impl<'ctx> StateMachine<DownloadCtx<'ctx>, DownloadStepOut> for AwaitResponse {
    type StepResult<'a>
        = Pin<Box<dyn Future<Output = DownloadStepOut> + Send + 'a>>
    where
        Self: 'a,
        DownloadCtx<'ctx>: 'a;

    fn step<'a>(&'a self, ctx: &'a mut DownloadCtx<'ctx>) -> Self::StepResult<'a> {
        Box::pin(async move {
            let response = match ctx.await_response().await {
                Ok(response) => response,
                Err(e) => return Transition::Done(Err(e)),
            };

            if response.allowed {
                if let Some(size) = response.size {
                    ctx.transfer.set_size(size);
                }
                return Transition::Next(
                    DownloadStates::OpenConnection(OpenConnection),
                    Ok(()),
                );
            }

            if response.is_queued_rejection() {
                debug!(
                    filename = %ctx.transfer.filename,
                    "download queued by the peer"
                );
                ctx.transfer.set_state(TransferStates::QUEUED);
                return Transition::Next(DownloadStates::AwaitQueued(AwaitQueued), Ok(()));
            }

            let message = response
                .message
                .unwrap_or_else(|| TransferResponse::NOT_SHARED.to_string());
            Transition::Done(Err(SlskError::TransferRejected(message)))
        })
    }
}

impl<'ctx> StateMachine<DownloadCtx<'ctx>, DownloadStepOut> for AwaitQueued {
    type StepResult<'a>
        = Pin<Box<dyn Future<Output = DownloadStepOut> + Send + 'a>>
    where
        Self: 'a,
        DownloadCtx<'ctx>: 'a;

    fn step<'a>(&'a self, ctx: &'a mut DownloadCtx<'ctx>) -> Self::StepResult<'a> {
        Box::pin(async move {
            if let Err(e) = ctx.await_queued_turn().await {
                return Transition::Done(Err(e));
            }
            Transition::Next(DownloadStates::Stream(Stream), Ok(()))
        })
    }
}

impl<'ctx> StateMachine<DownloadCtx<'ctx>, DownloadStepOut> for OpenConnection {
    type StepResult<'a>
        = Pin<Box<dyn Future<Output = DownloadStepOut> + Send + 'a>>
    where
        Self: 'a,
        DownloadCtx<'ctx>: 'a;

    fn step<'a>(&'a self, ctx: &'a mut DownloadCtx<'ctx>) -> Self::StepResult<'a> {
        Box::pin(async move {
            if let Err(e) = ctx.open_transfer_connection().await {
                return Transition::Done(Err(e));
            }
            Transition::Next(DownloadStates::Stream(Stream), Ok(()))
        })
    }
}

impl<'ctx> StateMachine<DownloadCtx<'ctx>, DownloadStepOut> for Stream {
    type StepResult<'a>
        = Pin<Box<dyn Future<Output = DownloadStepOut> + Send + 'a>>
    where
        Self: 'a,
        DownloadCtx<'ctx>: 'a;

    fn step<'a>(&'a self, ctx: &'a mut DownloadCtx<'ctx>) -> Self::StepResult<'a> {
        Box::pin(async move {
            let outcome = ctx.stream().await;
            ctx.settle(&outcome);
            Transition::Next(DownloadStates::Finish(Finish), Ok(()))
        })
    }
}

impl<'ctx> StateMachine<DownloadCtx<'ctx>, DownloadStepOut> for Finish {
    type StepResult<'a>
        = Pin<Box<dyn Future<Output = DownloadStepOut> + Send + 'a>>
    where
        Self: 'a,
        DownloadCtx<'ctx>: 'a;

    fn step<'a>(&'a self, ctx: &'a mut DownloadCtx<'ctx>) -> Self::StepResult<'a> {
        Box::pin(async move { Transition::Done(ctx.await_finished().await) })
    }
}

impl<'ctx> StateMachineCtx<()> for DownloadCtx<'ctx> {
    async fn execute(&mut self, cancel: &CancellationToken) -> Result<()> {
        self.cancel = cancel.clone();
        debug!(
            username = %self.transfer.username,
            filename = %self.transfer.filename,
            token = self.transfer.token,
            "Loop Download"
        );

        loop {
            let state = self.state.take().ok_or_else(|| {
                SlskError::InvalidState("download state machine exhausted".into())
            })?;
            let tr = match state {
                DownloadStates::Start(s) => s.step(self).await,
                DownloadStates::AwaitResponse(s) => s.step(self).await,
                DownloadStates::AwaitQueued(s) => s.step(self).await,
                DownloadStates::OpenConnection(s) => s.step(self).await,
                DownloadStates::Stream(s) => s.step(self).await,
                DownloadStates::Finish(s) => s.step(self).await,
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
