// Copyright 2025 Fusilli Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

//! Oplog tailer.
//!
//! A [`Tailer`] follows the oplog of one source and forwards every matching
//! entry, in log order, to a bounded output queue.
//!
//! # Lifecycle
//!
//! ```text
//!            monitor()                stop() / output closed
//!   Ready ───────────────► Running ─────────────────────────► Stopped
//!     ▲                       │                                  │
//!     │                       │ connection / cursor failure      │
//!     │                       ▼                                  │
//!     │                    Errored                               │
//!     │        reset()        │                                  │
//!     └───────────────────────┴──────────────────────────────────┘
//! ```
//!
//! - `stop()` while Ready moves straight to Stopped; while Running it is
//!   observed at the next poll boundary; in a terminal phase it does nothing.
//! - Entering a terminal phase releases the session and closes the output
//!   queue, so the consumer sees end-of-stream.
//! - `reset()` starts a fresh run that reads from the current end of the log;
//!   nothing delivered before is replayed.
//!
//! # Cursor recovery
//!
//! When the cursor is exhausted or fails with a retryable error it is reopened
//! after the last observed position (the first cursor's start position until
//! an entry is read), with exponential backoff and jitter, up to
//! [`TailerConfig::max_reopen_attempts`] consecutive attempts. A healthy poll
//! on the reopened cursor resets the count. Non-retryable failures go
//! straight to Errored.
//!
//! # Example
//!
//! ```rust
//! use fusilli_core::filter::OplogFilter;
//! use fusilli_core::source::memory::MemoryOplog;
//! use fusilli_core::tailer::Tailer;
//! use std::sync::Arc;
//! use tokio::sync::mpsc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let oplog = Arc::new(MemoryOplog::new());
//! let tailer = Tailer::builder()
//!     .source(oplog)
//!     .address("localhost:27017")
//!     .filter(OplogFilter::builder().namespace("test.articles").build())
//!     .build()?;
//!
//! let (tx, mut rx) = mpsc::channel(10);
//! let runner = Arc::clone(&tailer);
//! let handle = tokio::spawn(async move { runner.monitor(tx).await });
//!
//! oplog_writer_finished().await;
//! tailer.stop();
//! let outcome = handle.await??;
//! assert!(!outcome.is_failure());
//! assert!(rx.recv().await.is_none());
//! # Ok(())
//! # }
//! # async fn oplog_writer_finished() {
//! #     tokio::time::sleep(std::time::Duration::from_millis(50)).await;
//! # }
//! ```

use crate::entry::{LogPosition, OplogEntry};
use crate::filter::OplogFilter;
use crate::logging::LoggingMode;
use crate::metrics::{self, TailerStatus};
use crate::registry::TailerRegistry;
use crate::source::{CursorEvent, OplogCursor, OplogSession, OplogSource, SourceError};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Process-unique tailer identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TailerId(pub(crate) u64);

impl TailerId {
    /// Numeric value of the identity.
    #[must_use]
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TailerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle phase of a tailer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TailerPhase {
    /// Configured, not running
    Ready,
    /// Reading the oplog
    Running,
    /// Halted on request or because the consumer went away
    Stopped,
    /// Halted by a failure
    Errored,
}

impl TailerPhase {
    /// Returns true for Stopped and Errored.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped | Self::Errored)
    }
}

impl fmt::Display for TailerPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Errored => "errored",
        };
        f.write_str(name)
    }
}

/// Errors that end or reject a tailer run.
#[derive(Debug, Error)]
pub enum TailerError {
    /// Could not connect to the source
    #[error("Connection error: {0}")]
    Connection(#[source] SourceError),

    /// The cursor failed and could not be recovered
    #[error("Cursor error: {0}")]
    Cursor(#[source] SourceError),

    /// Halted by `stop()`; not a failure
    #[error("Tailer is stopped")]
    StopRequested,

    /// The consumer dropped the output queue
    #[error("Output queue closed by consumer")]
    OutputClosed,

    /// Operation not allowed in the current phase
    #[error("Cannot {operation} while {phase}")]
    InvalidTransition {
        operation: &'static str,
        phase: TailerPhase,
    },

    /// The tailer is not attached to a live registry
    #[error("Tailer registry is unavailable")]
    RegistryUnavailable,

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl TailerError {
    /// Returns true unless the run ended on request.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        !matches!(self, Self::StopRequested | Self::OutputClosed)
    }
}

/// How a run ended.
#[derive(Debug, Clone)]
pub enum TailerOutcome {
    /// Halted on request or because the consumer went away
    Stopped(Arc<TailerError>),
    /// Halted by a failure
    Errored(Arc<TailerError>),
}

impl TailerOutcome {
    /// Returns true if the run ended in Errored.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Errored(_))
    }

    /// The reason the run ended.
    #[must_use]
    pub fn reason(&self) -> &TailerError {
        match self {
            Self::Stopped(reason) | Self::Errored(reason) => reason.as_ref(),
        }
    }
}

/// Reconnection policy of a tailer.
///
/// # Example
///
/// ```rust
/// use fusilli_core::tailer::TailerConfig;
///
/// let config = TailerConfig::builder()
///     .initial_backoff_ms(50)
///     .max_reopen_attempts(10)
///     .build()
///     .unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct TailerConfig {
    /// Initial backoff in milliseconds
    pub initial_backoff_ms: u64,

    /// Maximum backoff in milliseconds
    pub max_backoff_ms: u64,

    /// Backoff jitter factor (0.0 to 1.0)
    /// Default: 0.1 (10% jitter)
    pub backoff_jitter: f64,

    /// Consecutive cursor reopen attempts before giving up (0 = infinite)
    pub max_reopen_attempts: u32,

    /// Verbosity of per-entry logging
    pub logging_mode: LoggingMode,
}

impl Default for TailerConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 100,
            max_backoff_ms: 30_000,
            backoff_jitter: 0.1,
            max_reopen_attempts: 5,
            logging_mode: LoggingMode::Production,
        }
    }
}

impl TailerConfig {
    /// Creates a new builder.
    #[must_use]
    pub fn builder() -> TailerConfigBuilder {
        TailerConfigBuilder::default()
    }

    /// Validates the configuration.
    ///
    /// Returns an error if:
    /// - `initial_backoff_ms` is 0
    /// - `initial_backoff_ms` > `max_backoff_ms`
    /// - `backoff_jitter` is not in range [0.0, 1.0]
    pub fn validate(&self) -> Result<(), TailerError> {
        if self.initial_backoff_ms == 0 {
            return Err(TailerError::Configuration(
                "initial_backoff_ms must be greater than 0".to_string(),
            ));
        }

        if self.initial_backoff_ms > self.max_backoff_ms {
            return Err(TailerError::Configuration(format!(
                "initial_backoff_ms ({}) must be <= max_backoff_ms ({})",
                self.initial_backoff_ms, self.max_backoff_ms
            )));
        }

        if !(0.0..=1.0).contains(&self.backoff_jitter) {
            return Err(TailerError::Configuration(format!(
                "backoff_jitter ({}) must be between 0.0 and 1.0",
                self.backoff_jitter
            )));
        }

        Ok(())
    }

    /// Calculates backoff duration with jitter for the given attempt.
    ///
    /// Uses exponential backoff: `initial_ms * 2^(attempt-1)`, capped at `max_backoff_ms`.
    /// Adds random jitter: ±(base * jitter_factor / 2).
    pub fn calculate_backoff(&self, attempt: u32) -> Duration {
        let factor = 1_u64
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u64::MAX);
        let base_ms = self
            .initial_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);

        if self.backoff_jitter > 0.0 {
            let jitter_range = (base_ms as f64) * self.backoff_jitter;
            let jitter = (rand::random::<f64>() * jitter_range) - (jitter_range / 2.0);
            let final_ms = ((base_ms as f64) + jitter).max(0.0) as u64;
            Duration::from_millis(final_ms)
        } else {
            Duration::from_millis(base_ms)
        }
    }
}

/// Builder for [`TailerConfig`].
#[derive(Debug, Default)]
pub struct TailerConfigBuilder {
    initial_backoff_ms: Option<u64>,
    max_backoff_ms: Option<u64>,
    backoff_jitter: Option<f64>,
    max_reopen_attempts: Option<u32>,
    logging_mode: Option<LoggingMode>,
}

impl TailerConfigBuilder {
    /// Sets the initial reopen backoff.
    #[must_use]
    pub fn initial_backoff_ms(mut self, ms: u64) -> Self {
        self.initial_backoff_ms = Some(ms);
        self
    }

    /// Sets the maximum reopen backoff.
    #[must_use]
    pub fn max_backoff_ms(mut self, ms: u64) -> Self {
        self.max_backoff_ms = Some(ms);
        self
    }

    /// Sets the jitter factor (0.0 to 1.0).
    #[must_use]
    pub fn backoff_jitter(mut self, jitter: f64) -> Self {
        self.backoff_jitter = Some(jitter);
        self
    }

    /// Sets the reopen attempt limit (0 = infinite).
    #[must_use]
    pub fn max_reopen_attempts(mut self, attempts: u32) -> Self {
        self.max_reopen_attempts = Some(attempts);
        self
    }

    /// Sets the logging mode.
    #[must_use]
    pub fn logging_mode(mut self, mode: LoggingMode) -> Self {
        self.logging_mode = Some(mode);
        self
    }

    /// Builds and validates the configuration.
    pub fn build(self) -> Result<TailerConfig, TailerError> {
        let defaults = TailerConfig::default();
        let config = TailerConfig {
            initial_backoff_ms: self
                .initial_backoff_ms
                .unwrap_or(defaults.initial_backoff_ms),
            max_backoff_ms: self.max_backoff_ms.unwrap_or(defaults.max_backoff_ms),
            backoff_jitter: self.backoff_jitter.unwrap_or(defaults.backoff_jitter),
            max_reopen_attempts: self
                .max_reopen_attempts
                .unwrap_or(defaults.max_reopen_attempts),
            logging_mode: self.logging_mode.unwrap_or(defaults.logging_mode),
        };

        config.validate()?;
        Ok(config)
    }
}

#[derive(Debug)]
struct TailerState {
    identity: Option<TailerId>,
    address: String,
    filter: OplogFilter,
    logging_mode: LoggingMode,
    phase: TailerPhase,
    last_error: Option<Arc<TailerError>>,
    halt_reason: Option<Arc<TailerError>>,
}

/// Follows one oplog and forwards matching entries to a queue.
///
/// Shared as `Arc<Tailer>`: one task runs [`monitor`](Self::monitor) while
/// others call [`stop`](Self::stop) or query the phase.
pub struct Tailer {
    source: Arc<dyn OplogSource>,
    config: TailerConfig,
    registry: Weak<TailerRegistry>,
    state: Mutex<TailerState>,
    stop_requested: AtomicBool,
}

impl fmt::Debug for Tailer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Tailer")
            .field("source", &self.source.name())
            .field("identity", &state.identity)
            .field("address", &state.address)
            .field("phase", &state.phase)
            .finish_non_exhaustive()
    }
}

impl Tailer {
    /// Creates a new builder.
    #[must_use]
    pub fn builder() -> TailerBuilder {
        TailerBuilder::default()
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> TailerPhase {
        self.state.lock().phase
    }

    /// Identity, once assigned.
    #[must_use]
    pub fn id(&self) -> Option<TailerId> {
        self.state.lock().identity
    }

    /// Configured source address.
    #[must_use]
    pub fn address(&self) -> String {
        self.state.lock().address.clone()
    }

    /// Configured filter.
    #[must_use]
    pub fn filter(&self) -> OplogFilter {
        self.state.lock().filter.clone()
    }

    /// Current logging mode.
    #[must_use]
    pub fn logging_mode(&self) -> LoggingMode {
        self.state.lock().logging_mode
    }

    /// Returns true only in Errored.
    #[must_use]
    pub fn has_error(&self) -> bool {
        self.state.lock().phase == TailerPhase::Errored
    }

    /// The failure that moved the tailer to Errored.
    ///
    /// `None` in every other phase; a requested stop is not an error.
    #[must_use]
    pub fn error(&self) -> Option<Arc<TailerError>> {
        self.state.lock().last_error.clone()
    }

    /// Why the tailer is in a terminal phase, failure or not.
    #[must_use]
    pub fn halt_reason(&self) -> Option<Arc<TailerError>> {
        self.state.lock().halt_reason.clone()
    }

    /// Sets the source address, halting any active run.
    ///
    /// The new address applies to the next run.
    pub fn configure_source(&self, address: impl Into<String>) {
        let address = address.into();
        let mut state = self.state.lock();
        if state.phase == TailerPhase::Running {
            self.stop_requested.store(true, Ordering::SeqCst);
        }
        info!(tailer = %label(state.identity), address = %address, "Source address configured");
        state.address = address;
    }

    /// Sets the entry filter, halting any active run.
    ///
    /// The new filter applies to the next run.
    pub fn configure_filter(&self, filter: OplogFilter) {
        let mut state = self.state.lock();
        if state.phase == TailerPhase::Running {
            self.stop_requested.store(true, Ordering::SeqCst);
        }
        debug!(tailer = %label(state.identity), filter = ?filter, "Filter configured");
        state.filter = filter;
    }

    /// Switches per-entry diagnostics on or off. Takes effect immediately.
    pub fn set_logging_mode(&self, mode: LoggingMode) {
        self.state.lock().logging_mode = mode;
    }

    /// Requests the tailer to halt.
    ///
    /// - Ready: moves to Stopped immediately.
    /// - Running: observed at the next poll boundary; at most one more entry
    ///   may be delivered.
    /// - Stopped / Errored: no effect.
    pub fn stop(&self) {
        let mut state = self.state.lock();
        match state.phase {
            TailerPhase::Running => {
                self.stop_requested.store(true, Ordering::SeqCst);
                info!(tailer = %label(state.identity), "Stop requested");
            }
            TailerPhase::Ready => {
                self.stop_requested.store(true, Ordering::SeqCst);
                state.phase = TailerPhase::Stopped;
                state.halt_reason = Some(Arc::new(TailerError::StopRequested));
                metrics::set_tailer_status(TailerStatus::Stopped);
                info!(tailer = %label(state.identity), "Tailer stopped before start");
            }
            TailerPhase::Stopped | TailerPhase::Errored => {}
        }
    }

    /// Returns a terminal tailer to Ready, clearing its error.
    ///
    /// The next run starts at the current end of the log.
    ///
    /// # Errors
    ///
    /// Returns [`TailerError::InvalidTransition`] unless Stopped or Errored.
    pub fn reset(&self) -> Result<(), TailerError> {
        let mut state = self.state.lock();
        if !state.phase.is_terminal() {
            return Err(TailerError::InvalidTransition {
                operation: "reset",
                phase: state.phase,
            });
        }

        state.phase = TailerPhase::Ready;
        state.last_error = None;
        state.halt_reason = None;
        self.stop_requested.store(false, Ordering::SeqCst);
        metrics::set_tailer_status(TailerStatus::Ready);
        info!(tailer = %label(state.identity), "Tailer reset");
        Ok(())
    }

    /// Assigns a process-unique identity and registers the tailer.
    ///
    /// Idempotent: a tailer that already has an identity keeps it.
    ///
    /// # Errors
    ///
    /// Returns [`TailerError::RegistryUnavailable`] if the tailer was built
    /// without a registry or the registry was dropped.
    pub fn assign_identity(self: &Arc<Self>) -> Result<TailerId, TailerError> {
        let registry = self
            .registry
            .upgrade()
            .ok_or(TailerError::RegistryUnavailable)?;
        Ok(registry.register(self))
    }

    /// Stops the tailer and removes it from its registry.
    ///
    /// The identity is kept.
    pub fn remove(&self) {
        self.stop();
        if let (Some(registry), Some(id)) = (self.registry.upgrade(), self.id()) {
            registry.deregister(id);
        }
    }

    /// Called by the registry, under its lock.
    pub(crate) fn identity_or_assign(&self, next: impl FnOnce() -> TailerId) -> (TailerId, bool) {
        let mut state = self.state.lock();
        match state.identity {
            Some(id) => (id, false),
            None => {
                let id = next();
                state.identity = Some(id);
                (id, true)
            }
        }
    }

    /// Runs the tailer until it stops or fails.
    ///
    /// Requires Ready. Connects to the configured address, opens a cursor at
    /// the current end of the log and forwards every entry matching the
    /// filter to `output`, in log order. `output` is dropped when the run
    /// ends, after the terminal phase is recorded, so the consumer observes
    /// end-of-stream only once the outcome is queryable.
    ///
    /// # Errors
    ///
    /// Returns [`TailerError::InvalidTransition`] without running if the
    /// tailer is not Ready. Failures during the run are reported through the
    /// returned [`TailerOutcome`].
    pub async fn monitor(
        &self,
        output: mpsc::Sender<OplogEntry>,
    ) -> Result<TailerOutcome, TailerError> {
        let (address, filter, id) = self.begin_run()?;
        let tag = label(id);

        info!(tailer = %tag, source = self.source.name(), address = %address, "Tailer started");

        let reason = match self.source.connect(&address).await {
            Ok(mut session) => {
                let reason = self.run(session.as_mut(), &filter, &output, &tag).await;
                session.close().await;
                reason
            }
            Err(e) => {
                error!(tailer = %tag, address = %address, error = %e, "Failed to connect to oplog source");
                TailerError::Connection(e)
            }
        };

        let outcome = self.finish(reason, &tag);
        drop(output);
        Ok(outcome)
    }

    fn begin_run(&self) -> Result<(String, OplogFilter, Option<TailerId>), TailerError> {
        let mut state = self.state.lock();
        if state.phase != TailerPhase::Ready {
            return Err(TailerError::InvalidTransition {
                operation: "monitor",
                phase: state.phase,
            });
        }

        state.phase = TailerPhase::Running;
        metrics::set_tailer_status(TailerStatus::Running);
        Ok((state.address.clone(), state.filter.clone(), state.identity))
    }

    fn finish(&self, reason: TailerError, tag: &str) -> TailerOutcome {
        let reason = Arc::new(reason);
        let mut state = self.state.lock();
        state.halt_reason = Some(Arc::clone(&reason));

        if reason.is_failure() {
            state.phase = TailerPhase::Errored;
            state.last_error = Some(Arc::clone(&reason));
            metrics::set_tailer_status(TailerStatus::Errored);
            error!(tailer = %tag, error = %reason, "Tailer errored");
            TailerOutcome::Errored(reason)
        } else {
            state.phase = TailerPhase::Stopped;
            metrics::set_tailer_status(TailerStatus::Stopped);
            info!(tailer = %tag, reason = %reason, "Tailer stopped");
            TailerOutcome::Stopped(reason)
        }
    }

    fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    async fn run(
        &self,
        session: &mut dyn OplogSession,
        filter: &OplogFilter,
        output: &mpsc::Sender<OplogEntry>,
        tag: &str,
    ) -> TailerError {
        let mut cursor = match session.tail(filter, None).await {
            Ok(cursor) => cursor,
            Err(e) => {
                error!(tailer = %tag, error = %e, "Failed to open oplog cursor");
                return TailerError::Cursor(e);
            }
        };

        // Reopens resume from here until the first entry is observed, so
        // entries appended during a backoff are not lost.
        let mut last_position: Option<LogPosition> = cursor.start_position();
        let mut reopen_attempts: u32 = 0;

        loop {
            let polled = cursor.next_event().await;

            // Poll boundary: a pending stop wins over a freshly read entry.
            if self.stop_requested() {
                return TailerError::StopRequested;
            }

            let failure = match polled {
                Ok(CursorEvent::Entry(entry)) => {
                    reopen_attempts = 0;
                    let position = entry.position();
                    if last_position.is_some_and(|last| position <= last) {
                        debug!(tailer = %tag, position = %position, "Skipping already observed entry");
                        continue;
                    }
                    last_position = Some(position);

                    if !filter.matches(&entry) {
                        metrics::increment_entries_filtered(&entry.namespace.full_name());
                        continue;
                    }

                    if self.logging_mode().is_debug() {
                        debug!(
                            tailer = %tag,
                            position = %position,
                            op = %entry.operation,
                            ns = %entry.namespace,
                            "Delivering oplog entry"
                        );
                    }

                    let namespace = entry.namespace.full_name();
                    let operation = entry.operation.as_str().to_string();
                    if output.send(entry).await.is_err() {
                        warn!(tailer = %tag, "Output queue closed by consumer");
                        return TailerError::OutputClosed;
                    }
                    metrics::increment_entries_delivered(&namespace, &operation);
                    continue;
                }
                Ok(CursorEvent::Idle) => {
                    reopen_attempts = 0;
                    if output.is_closed() {
                        warn!(tailer = %tag, "Output queue closed by consumer");
                        return TailerError::OutputClosed;
                    }
                    continue;
                }
                Err(SourceError::Decode(e)) => {
                    warn!(tailer = %tag, error = %e, "Skipping malformed oplog entry");
                    metrics::increment_entries_malformed();
                    continue;
                }
                Ok(CursorEvent::Exhausted) => {
                    warn!(tailer = %tag, "Oplog cursor exhausted");
                    None
                }
                Err(e) if e.is_retryable() => {
                    warn!(tailer = %tag, error = %e, "Retryable cursor error");
                    Some(e)
                }
                Err(e) => {
                    error!(tailer = %tag, error = %e, "Non-retryable cursor error");
                    return TailerError::Cursor(e);
                }
            };

            let reason = failure.as_ref().map_or("exhausted", SourceError::category);
            match self
                .reopen(session, filter, last_position, &mut reopen_attempts, reason, tag)
                .await
            {
                Ok(reopened) => cursor = reopened,
                Err(e) => return e,
            }
        }
    }

    async fn reopen(
        &self,
        session: &mut dyn OplogSession,
        filter: &OplogFilter,
        after: Option<LogPosition>,
        attempts: &mut u32,
        reason: &str,
        tag: &str,
    ) -> Result<Box<dyn OplogCursor>, TailerError> {
        let max_attempts = self.config.max_reopen_attempts;

        loop {
            *attempts += 1;
            if max_attempts > 0 && *attempts > max_attempts {
                error!(tailer = %tag, max_attempts, "Max cursor reopen attempts exceeded");
                return Err(TailerError::Cursor(SourceError::Exhausted {
                    attempts: max_attempts,
                }));
            }

            let backoff = self.config.calculate_backoff(*attempts);
            warn!(
                tailer = %tag,
                attempt = *attempts,
                backoff_ms = backoff.as_millis() as u64,
                reason,
                "Reopening oplog cursor"
            );
            metrics::increment_cursor_reopens(reason);
            tokio::time::sleep(backoff).await;

            if self.stop_requested() {
                return Err(TailerError::StopRequested);
            }

            match session.tail(filter, after).await {
                Ok(cursor) => {
                    info!(tailer = %tag, attempt = *attempts, "Oplog cursor reopened");
                    return Ok(cursor);
                }
                Err(e) if e.is_retryable() => {
                    warn!(tailer = %tag, attempt = *attempts, error = %e, "Cursor reopen failed");
                }
                Err(e) => {
                    error!(tailer = %tag, error = %e, "Cursor reopen failed with non-retryable error");
                    return Err(TailerError::Cursor(e));
                }
            }
        }
    }
}

fn label(id: Option<TailerId>) -> String {
    id.map_or_else(|| "unregistered".to_string(), |id| id.to_string())
}

/// Builder for [`Tailer`].
#[derive(Default)]
pub struct TailerBuilder {
    source: Option<Arc<dyn OplogSource>>,
    address: Option<String>,
    filter: OplogFilter,
    config: Option<TailerConfig>,
    registry: Option<Weak<TailerRegistry>>,
}

impl TailerBuilder {
    /// Sets the oplog source. Required.
    #[must_use]
    pub fn source(mut self, source: Arc<dyn OplogSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Sets the source address. Required.
    #[must_use]
    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    /// Sets the entry filter. Defaults to matching everything.
    #[must_use]
    pub fn filter(mut self, filter: OplogFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Sets the reconnection policy.
    #[must_use]
    pub fn config(mut self, config: TailerConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Attaches the tailer to a registry for identity assignment.
    #[must_use]
    pub fn registry(mut self, registry: &Arc<TailerRegistry>) -> Self {
        self.registry = Some(Arc::downgrade(registry));
        self
    }

    /// Builds the tailer in the Ready phase.
    ///
    /// # Errors
    ///
    /// Returns [`TailerError::Configuration`] if the source or address is
    /// missing or the config is invalid.
    pub fn build(self) -> Result<Arc<Tailer>, TailerError> {
        let source = self
            .source
            .ok_or_else(|| TailerError::Configuration("source is required".to_string()))?;
        let address = self
            .address
            .filter(|a| !a.trim().is_empty())
            .ok_or_else(|| TailerError::Configuration("address is required".to_string()))?;
        let config = self.config.unwrap_or_default();
        config.validate()?;

        Ok(Arc::new(Tailer {
            source,
            registry: self.registry.unwrap_or_default(),
            state: Mutex::new(TailerState {
                identity: None,
                address,
                filter: self.filter,
                logging_mode: config.logging_mode,
                phase: TailerPhase::Ready,
                last_error: None,
                halt_reason: None,
            }),
            config,
            stop_requested: AtomicBool::new(false),
        }))
    }
}
