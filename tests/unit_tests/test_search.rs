// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{sync::Arc, time::Duration};

use anyhow::Result;
use soulseek_client_rs::{
    proto::peer::{FileEntry, SearchResponse},
    search::{SearchOptions, SearchRegistry, SearchStates, collect_responses},
};

fn response(token: i32, username: &str, file_count: usize) -> SearchResponse {
    let files = (0..file_count)
        .map(|i| FileEntry {
            filename: format!("music\\track{i}.mp3"),
            size: 1024,
            extension: "mp3".into(),
            attributes: vec![(0, 320)],
        })
        .collect();
    SearchResponse {
        username: username.into(),
        token,
        files,
        slot_free: true,
        average_speed: 50_000,
        queue_length: 0,
    }
}

#[tokio::test]
async fn response_limit_of_one_completes_on_first_response() -> Result<()> {
    let registry = SearchRegistry::new();
    let rx = registry.register(7);
    registry.dispatch(response(7, "a", 3));

    let options = SearchOptions {
        response_limit: 1,
        ..SearchOptions::default()
    };
    let results = collect_responses(
        &registry,
        7,
        "query".into(),
        rx,
        &options,
        Duration::from_secs(5),
        None,
    )
    .await;

    assert!(results.state.contains(SearchStates::COMPLETED));
    assert!(results.state.contains(SearchStates::RESPONSE_LIMIT_REACHED));
    assert_eq!(results.responses.len(), 1);
    assert!(!registry.contains(7));
    Ok(())
}

#[tokio::test]
async fn file_limit_stops_processing_further_responses() -> Result<()> {
    let registry = SearchRegistry::new();
    let rx = registry.register(9);
    registry.dispatch(response(9, "a", 6));
    registry.dispatch(response(9, "b", 6));
    registry.dispatch(response(9, "c", 6));

    let options = SearchOptions {
        file_limit: 10,
        ..SearchOptions::default()
    };
    let results = collect_responses(
        &registry,
        9,
        "query".into(),
        rx,
        &options,
        Duration::from_secs(5),
        None,
    )
    .await;

    assert!(results.state.contains(SearchStates::FILE_LIMIT_REACHED));
    assert_eq!(results.responses.len(), 2);
    assert_eq!(results.file_count, 12);
    // The third response was never consumed; later ones are dropped outright.
    registry.dispatch(response(9, "d", 1));
    Ok(())
}

#[tokio::test]
async fn inactivity_ends_the_search() -> Result<()> {
    let registry = SearchRegistry::new();
    let rx = registry.register(11);

    let results = collect_responses(
        &registry,
        11,
        "query".into(),
        rx,
        &SearchOptions::default(),
        Duration::from_millis(50),
        None,
    )
    .await;

    assert!(results.state.contains(SearchStates::TIMED_OUT));
    assert!(results.responses.is_empty());
    Ok(())
}

#[tokio::test]
async fn filtered_responses_are_not_counted() -> Result<()> {
    let registry = SearchRegistry::new();
    let rx = registry.register(13);
    registry.dispatch(response(13, "slow", 4));
    registry.dispatch(response(13, "fast", 4));

    let options = SearchOptions {
        response_limit: 1,
        filter: Some(Arc::new(|r: &SearchResponse| r.username == "fast")),
        ..SearchOptions::default()
    };
    let results = collect_responses(
        &registry,
        13,
        "query".into(),
        rx,
        &options,
        Duration::from_secs(5),
        None,
    )
    .await;

    assert!(results.state.contains(SearchStates::RESPONSE_LIMIT_REACHED));
    assert_eq!(results.responses.len(), 1);
    assert_eq!(results.responses[0].username, "fast");
    assert_eq!(results.file_count, 4);
    Ok(())
}
