// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// Outcome of one state step: advance, loop in place, or finish.
pub enum Transition<S, R> {
    Next(S, R),
    Stay(R),
    Done(R),
}

/// One state of an operation machine. Steps borrow the shared context
/// mutably, so a machine can only ever run one step at a time.
pub trait StateMachine<Ctx, Out>: Sized {
    type StepResult<'a>: Future<Output = Out> + Send + 'a
    where
        Self: 'a,
        Out: 'a,
        Ctx: 'a;

    fn step<'a>(&'a self, ctx: &'a mut Ctx) -> Self::StepResult<'a>;
}

/// A context that can drive its machine to completion.
pub trait StateMachineCtx<Out>: Sized {
    fn execute(
        &mut self,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<Out>> + Send;
}
