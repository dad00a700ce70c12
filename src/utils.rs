// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    fmt::Write,
    sync::atomic::{AtomicI32, Ordering},
};

use md5::{Digest, Md5};
use rand::RngExt;

/// Process-wide source of correlation tokens.
///
/// Tokens are unique within a counter cycle; the counter wraps back to zero
/// after `i32::MAX`. Callers that keep tokens alive across a wrap check their
/// own maps for collisions.
#[derive(Debug)]
pub struct TokenFactory {
    next: AtomicI32,
}

impl TokenFactory {
    /// Starts from a random non-negative seed so concurrent client instances
    /// on one network don't hand out overlapping token ranges.
    pub fn new() -> Self {
        Self::with_seed(rand::rng().random_range(0..i32::MAX))
    }

    pub fn with_seed(seed: i32) -> Self {
        Self {
            next: AtomicI32::new(seed.max(0)),
        }
    }

    pub fn next(&self) -> i32 {
        self.next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                Some(if current == i32::MAX { 0 } else { current + 1 })
            })
            .unwrap_or_default()
    }
}

impl Default for TokenFactory {
    fn default() -> Self {
        Self::new()
    }
}

/// The login digest: lowercase hex MD5 of `username + password`.
pub fn password_digest(username: &str, password: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(username.as_bytes());
    hasher.update(password.as_bytes());
    let digest = hasher.finalize();

    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest {
        write!(&mut hex, "{byte:02x}").expect("Writing to String cannot fail");
    }
    hex
}
