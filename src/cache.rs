// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Time-bounded memoization for slow lookups.

use std::fmt::Display;
use std::future::Future;
use std::time::{Duration, Instant};

/// Holds the last result of a lookup for up to `ttl`.
///
/// Not shared between tasks: each cache has a single owner, so a refresh is never
/// running twice at once.
#[derive(Debug)]
pub struct TtlCache<T> {
    ttl: Duration,
    entry: Option<(T, Instant)>,
}

impl<T: Clone> TtlCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, entry: None }
    }

    /// Return the stored value, refreshing it first if it is missing or older than the TTL.
    ///
    /// A failed refresh falls back to the stale value when there is one; the
    /// timestamp is left alone so the next call tries again. Without a stored
    /// value the error is returned.
    pub async fn get_or_refresh<F, Fut, E>(&mut self, refresh: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        self.get_or_refresh_at(Instant::now(), refresh).await
    }

    /// [`TtlCache::get_or_refresh`] with an explicit clock reading.
    pub async fn get_or_refresh_at<F, Fut, E>(&mut self, now: Instant, refresh: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        if let Some((value, refreshed)) = &self.entry {
            if now.saturating_duration_since(*refreshed) <= self.ttl {
                return Ok(value.clone());
            }
        }

        match refresh().await {
            Ok(value) => {
                self.entry = Some((value.clone(), now));
                Ok(value)
            }
            Err(e) => match &self.entry {
                Some((stale, _)) => {
                    log::warn!("Refresh failed, serving stale value: {e}");
                    Ok(stale.clone())
                }
                None => Err(e),
            },
        }
    }
}
