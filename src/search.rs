// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Search bookkeeping: per-token response routing and the collection loop
//! with its inactivity timer and limits.

use std::{sync::Arc, time::Duration};

use bitflags::bitflags;
use dashmap::DashMap;
use tokio::{
    sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel},
    time::sleep,
};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::proto::peer::SearchResponse;

bitflags! {
    /// Lifecycle flags of a search; `COMPLETED` composes with the reason.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SearchStates: u32 {
        const REQUESTED               = 1 << 0;
        const IN_PROGRESS             = 1 << 1;
        const COMPLETED               = 1 << 2;
        const TIMED_OUT               = 1 << 3;
        const RESPONSE_LIMIT_REACHED  = 1 << 4;
        const FILE_LIMIT_REACHED      = 1 << 5;
        const CANCELLED               = 1 << 6;
        const ERRORED                 = 1 << 7;
    }
}

/// Who a search is addressed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchScope {
    /// The whole network.
    Default,
    /// One request per named user.
    Users(Vec<String>),
    /// Everyone in a room.
    Room(String),
}

pub type ResponseFilter = Arc<dyn Fn(&SearchResponse) -> bool + Send + Sync>;
pub type ResponseCallback = Arc<dyn Fn(&SearchResponse) + Send + Sync>;

#[derive(Clone, Default)]
pub struct SearchOptions {
    /// Completes the search once this many responses were accepted. Zero
    /// means unlimited.
    pub response_limit: usize,
    /// Completes the search once this many files were seen. Zero means
    /// unlimited.
    pub file_limit: usize,
    /// Overrides the configured search inactivity timeout.
    pub inactivity: Option<Duration>,
    /// Responses failing the filter are not counted and not returned.
    pub filter: Option<ResponseFilter>,
    /// Invoked for each accepted response as it arrives.
    pub on_response: Option<ResponseCallback>,
}

impl std::fmt::Debug for SearchOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchOptions")
            .field("response_limit", &self.response_limit)
            .field("file_limit", &self.file_limit)
            .field("inactivity", &self.inactivity)
            .field("has_filter", &self.filter.is_some())
            .field("has_on_response", &self.on_response.is_some())
            .finish()
    }
}

/// Outcome of a completed search.
#[derive(Debug)]
pub struct SearchResults {
    pub token: i32,
    pub text: String,
    pub state: SearchStates,
    pub responses: Vec<SearchResponse>,
    pub file_count: usize,
}

/// Routes inbound peer search responses to their collection loops by token.
#[derive(Debug, Default)]
pub struct SearchRegistry {
    channels: DashMap<i32, UnboundedSender<SearchResponse>>,
}

impl SearchRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn contains(&self, token: i32) -> bool {
        self.channels.contains_key(&token)
    }

    pub fn register(&self, token: i32) -> UnboundedReceiver<SearchResponse> {
        let (tx, rx) = unbounded_channel();
        self.channels.insert(token, tx);
        rx
    }

    pub fn remove(&self, token: i32) {
        self.channels.remove(&token);
    }

    /// Delivers a response to its search; responses for finished or unknown
    /// tokens are dropped.
    pub fn dispatch(&self, response: SearchResponse) {
        match self.channels.get(&response.token) {
            Some(tx) => {
                let _ = tx.send(response);
            },
            None => {
                debug!(token = response.token, "search response for inactive search");
            },
        }
    }
}

/// Collects responses until inactivity, a limit, or cancellation ends the
/// search. Each accepted response resets the inactivity timer.
pub async fn collect_responses(
    registry: &SearchRegistry,
    token: i32,
    text: String,
    mut rx: UnboundedReceiver<SearchResponse>,
    options: &SearchOptions,
    default_inactivity: Duration,
    cancel: Option<&CancellationToken>,
) -> SearchResults {
    let inactivity = options.inactivity.unwrap_or(default_inactivity);
    let never = CancellationToken::new();
    let cancel = cancel.unwrap_or(&never);

    let mut responses = Vec::new();
    let mut file_count = 0usize;

    let reason = loop {
        tokio::select! {
            _ = cancel.cancelled() => break SearchStates::CANCELLED,
            _ = sleep(inactivity) => break SearchStates::TIMED_OUT,
            received = rx.recv() => {
                let Some(response) = received else {
                    break SearchStates::ERRORED;
                };
                if let Some(filter) = &options.filter
                    && !filter(&response)
                {
                    continue;
                }
                file_count += response.files.len();
                if let Some(on_response) = &options.on_response {
                    on_response(&response);
                }
                responses.push(response);

                if options.response_limit > 0
                    && responses.len() >= options.response_limit
                {
                    break SearchStates::RESPONSE_LIMIT_REACHED;
                }
                if options.file_limit > 0 && file_count >= options.file_limit {
                    break SearchStates::FILE_LIMIT_REACHED;
                }
            },
        }
    };

    registry.remove(token);
    SearchResults {
        token,
        text,
        state: SearchStates::COMPLETED | reason,
        responses,
        file_count,
    }
}
