//! Multi-window admission gate
//!
//! Every configured window is evaluated before any counter moves: a request
//! is admitted only if all windows have room, and only then are all of them
//! incremented. A denial leaves every counter untouched.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

use crate::error::{Error, Result};

/// One fixed-duration counting window
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WindowConfig {
    /// Window name reported on denial (e.g. "minute")
    pub name: String,
    /// Window length in seconds
    pub duration_secs: u64,
    /// Requests allowed per window
    pub max_requests: u32,
}

impl WindowConfig {
    pub fn new(name: impl Into<String>, duration_secs: u64, max_requests: u32) -> Self {
        Self {
            name: name.into(),
            duration_secs,
            max_requests,
        }
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_secs)
    }
}

/// Counter for one (identifier, window) pair
#[derive(Debug, Clone)]
pub struct RateLimitEntry {
    pub window: String,
    pub count: u32,
    pub window_start: Instant,
    pub duration: Duration,
}

impl RateLimitEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.window_start) > self.duration
    }

    fn retry_after(&self, now: Instant) -> u64 {
        let remaining = self
            .duration
            .saturating_sub(now.duration_since(self.window_start));
        (remaining.as_secs_f64().ceil() as u64).max(1)
    }
}

/// Outcome of an admission check
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct AdmissionDecision {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window: Option<String>,
}

impl AdmissionDecision {
    fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
            retry_after_secs: None,
            window: None,
        }
    }

    fn deny(window: String, retry_after_secs: u64) -> Self {
        Self {
            allowed: false,
            reason: Some(format!("rate limit exceeded for window '{}'", window)),
            retry_after_secs: Some(retry_after_secs),
            window: Some(window),
        }
    }

    /// Convert a denial into `Error::RateLimitExceeded`
    pub fn into_result(self) -> Result<()> {
        if self.allowed {
            return Ok(());
        }
        Err(Error::RateLimitExceeded {
            window: self.window.unwrap_or_default(),
            retry_after_secs: self.retry_after_secs.unwrap_or(1),
        })
    }
}

/// In-process rate limiter keyed by caller identifier
///
/// Counters live in a sharded map, so callers with different identifiers do
/// not contend on a single lock; callers sharing an identifier are serialized
/// by the entry lock for the duration of check-and-commit.
#[derive(Debug, Default)]
pub struct AdmissionGate {
    identifiers: DashMap<String, Vec<RateLimitEntry>>,
}

impl AdmissionGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check and, if admitted, count a request for `identifier`
    pub fn check(&self, identifier: &str, windows: &[WindowConfig]) -> AdmissionDecision {
        self.check_at(identifier, windows, Instant::now())
    }

    /// Same as [`check`](Self::check) with an explicit clock reading
    pub fn check_at(
        &self,
        identifier: &str,
        windows: &[WindowConfig],
        now: Instant,
    ) -> AdmissionDecision {
        let mut entries = self.identifiers.entry(identifier.to_string()).or_default();

        // Evaluate every window first; the longest wait wins when several deny
        let mut denial: Option<(String, u64)> = None;
        for window in windows {
            let current = entries
                .iter()
                .find(|e| e.window == window.name)
                .filter(|e| !e.is_expired(now));

            let count = current.map(|e| e.count).unwrap_or(0);
            if count.saturating_add(1) > window.max_requests {
                let retry_after = current
                    .map(|e| e.retry_after(now))
                    .unwrap_or_else(|| window.duration_secs.max(1));
                match &denial {
                    Some((_, longest)) if *longest >= retry_after => {}
                    _ => denial = Some((window.name.clone(), retry_after)),
                }
            }
        }

        if let Some((window, retry_after)) = denial {
            tracing::warn!(
                "Admission denied for '{}': window '{}' full, retry after {}s",
                identifier,
                window,
                retry_after
            );
            return AdmissionDecision::deny(window, retry_after);
        }

        for window in windows {
            match entries.iter_mut().find(|e| e.window == window.name) {
                Some(entry) => {
                    if entry.is_expired(now) {
                        entry.count = 0;
                        entry.window_start = now;
                    }
                    entry.duration = window.duration();
                    entry.count += 1;
                }
                None => entries.push(RateLimitEntry {
                    window: window.name.clone(),
                    count: 1,
                    window_start: now,
                    duration: window.duration(),
                }),
            }
        }

        AdmissionDecision::allow()
    }

    /// Evict identifiers whose every window has fully elapsed
    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    pub fn sweep_at(&self, now: Instant) -> usize {
        let before = self.identifiers.len();
        self.identifiers
            .retain(|_, entries| entries.iter().any(|e| !e.is_expired(now)));
        before.saturating_sub(self.identifiers.len())
    }

    /// Number of identifiers currently tracked
    pub fn tracked_identifiers(&self) -> usize {
        self.identifiers.len()
    }

    /// Current count for one (identifier, window) pair, if any
    pub fn count_for(&self, identifier: &str, window: &str) -> Option<u32> {
        self.identifiers
            .get(identifier)
            .and_then(|entries| entries.iter().find(|e| e.window == window).map(|e| e.count))
    }

    /// Run `sweep` periodically until the gate is dropped
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let gate = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(gate) = gate.upgrade() else {
                    break;
                };
                let evicted = gate.sweep();
                if evicted > 0 {
                    tracing::debug!(
                        "Admission sweep evicted {} idle identifiers ({} tracked)",
                        evicted,
                        gate.tracked_identifiers()
                    );
                }
            }
        })
    }
}
