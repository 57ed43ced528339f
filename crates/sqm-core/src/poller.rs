//! Periodic acquisition loop
//!
//! The [`Poller`] is the only user of the [`SerialLink`] and the only writer
//! to the [`Store`]. It runs as a blocking loop on a dedicated thread:
//!
//! ```text
//! Idle -> Acquiring -> Idle -> ...          every `interval`
//!           | LinkFailure
//!           v
//!      Reconnecting --(open ok)--> Idle
//!           | max consecutive link failures
//!           v
//!   ReconnectExhausted (loop halts)
//! ```
//!
//! Failed reads and failed opens both count as link failures; the count is
//! only reset by a successful reading. Every reopen after a failure waits for
//! the backoff delay first.
//!
//! Timeouts and malformed frames are logged and skipped; they never trigger a
//! reconnect and never produce a record.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Condvar, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::protocol::{ProtocolError, SerialLink};
use crate::store::{Record, Store};

/// Poller state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PollerState {
    /// Waiting for the next tick
    Idle,
    /// Reading from the device
    Acquiring,
    /// Re-opening the link after a failure
    Reconnecting,
    /// Gave up reconnecting; the loop has halted
    ReconnectExhausted,
    /// Shut down on request
    Stopped,
}

/// Fatal poller errors
#[derive(Error, Debug)]
pub enum PollerError {
    /// The link failed too many times in a row
    #[error("gave up on SQM link after {attempts} consecutive failures: {last_error}")]
    ReconnectExhausted {
        /// Consecutive link failures, counting failed reads and failed opens
        attempts: u32,
        /// Error from the final attempt
        last_error: ProtocolError,
    },
}

/// Poller timing configuration
#[derive(Debug, Clone, PartialEq)]
pub struct PollerConfig {
    /// Time between the starts of consecutive ticks
    pub interval: Duration,
    /// Consecutive link failures (failed reads or opens) before giving up
    pub max_reconnect_attempts: u32,
    /// Delay after the first failed attempt; doubles after each further one
    pub reconnect_base_delay: Duration,
    /// Upper bound on the reconnect delay
    pub reconnect_max_delay: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            max_reconnect_attempts: 10,
            reconnect_base_delay: Duration::from_secs(1),
            reconnect_max_delay: Duration::from_secs(900),
        }
    }
}

impl PollerConfig {
    /// Wait before the next attempt after `failures` consecutive failures
    pub fn backoff_delay(&self, failures: u32) -> Duration {
        let exp = failures.saturating_sub(1).min(31);
        self.reconnect_base_delay
            .checked_mul(1u32 << exp)
            .unwrap_or(self.reconnect_max_delay)
            .min(self.reconnect_max_delay)
    }
}

/// Poller state and counters, shared with readers such as the web gateway
#[derive(Debug, Clone, Serialize)]
pub struct PollerStatus {
    /// Current state
    pub state: PollerState,
    /// Readings appended to the store
    pub readings: u64,
    /// Reads that got no reply in time
    pub timeouts: u64,
    /// Replies rejected by the frame codec
    pub malformed_frames: u64,
    /// Lost connections
    pub link_failures: u64,
    /// Most recent failure, if any
    pub last_error: Option<String>,
    /// Receipt time of the most recent reading
    pub last_reading_at: Option<DateTime<Utc>>,
}

impl Default for PollerStatus {
    fn default() -> Self {
        Self {
            state: PollerState::Idle,
            readings: 0,
            timeouts: 0,
            malformed_frames: 0,
            link_failures: 0,
            last_error: None,
            last_reading_at: None,
        }
    }
}

/// Shared, read-mostly view of the poller status
pub type StatusHandle = Arc<RwLock<PollerStatus>>;

/// Result of a single acquisition step
#[derive(Debug)]
pub enum TickOutcome {
    /// A reading was appended to the store
    Recorded(Record),
    /// Transient failure; nothing was recorded
    Skipped(ProtocolError),
    /// The link was lost and must be reopened
    LinkLost(ProtocolError),
}

/// Cloneable stop request shared between the poller and its owner
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl StopHandle {
    /// Create a handle that has not been stopped
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the poller to stop after the current step
    pub fn stop(&self) {
        let (lock, cvar) = &*self.inner;
        *lock.lock().unwrap_or_else(PoisonError::into_inner) = true;
        cvar.notify_all();
    }

    /// Whether stop was requested
    pub fn is_stopped(&self) -> bool {
        *self.inner.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sleep up to `timeout`, waking early on stop. Returns whether stop was requested.
    pub fn wait(&self, timeout: Duration) -> bool {
        let (lock, cvar) = &*self.inner;
        let guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        let (guard, _) = cvar
            .wait_timeout_while(guard, timeout, |stopped| !*stopped)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }
}

/// Single-writer acquisition loop
pub struct Poller {
    link: SerialLink,
    store: Arc<Store>,
    config: PollerConfig,
    status: StatusHandle,
    stop: StopHandle,
    /// Link failures since the last successful reading
    failures: u32,
}

impl Poller {
    /// Create a poller; the link is opened when `run()` starts
    pub fn new(link: SerialLink, store: Arc<Store>, config: PollerConfig) -> Self {
        Self {
            link,
            store,
            config,
            status: Arc::new(RwLock::new(PollerStatus::default())),
            stop: StopHandle::new(),
            failures: 0,
        }
    }

    /// Handle for reading the status from other threads
    pub fn status_handle(&self) -> StatusHandle {
        Arc::clone(&self.status)
    }

    /// Handle for requesting shutdown from other threads
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Current state
    pub fn state(&self) -> PollerState {
        self.status
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .state
    }

    /// The link driven by this poller
    pub fn link(&self) -> &SerialLink {
        &self.link
    }

    /// Run until stopped or until reconnecting is exhausted
    ///
    /// The link is closed on every exit path.
    pub fn run(&mut self) -> Result<(), PollerError> {
        info!(
            port = %self.link.config().port_name,
            interval_ms = self.config.interval.as_millis() as u64,
            "starting SQM poller"
        );

        let result = self.run_loop();
        self.link.close();

        if result.is_ok() {
            self.set_state(PollerState::Stopped);
            info!("SQM poller stopped");
        }
        result
    }

    fn run_loop(&mut self) -> Result<(), PollerError> {
        while !self.stop.is_stopped() {
            if !self.link.is_open() {
                self.reconnect()?;
                continue;
            }

            let started = Instant::now();
            if let TickOutcome::LinkLost(e) = self.tick() {
                if self.failures >= self.max_failures() {
                    return Err(self.exhausted(e));
                }
                continue;
            }

            let wait = self.config.interval.saturating_sub(started.elapsed());
            self.stop.wait(wait);
        }
        Ok(())
    }

    /// Perform one acquisition and publish the result
    pub fn tick(&mut self) -> TickOutcome {
        self.set_state(PollerState::Acquiring);

        match self.link.read_one() {
            Ok(reading) => {
                self.failures = 0;
                let record = self.store.append(reading);
                debug!(
                    sequence = record.sequence,
                    magnitude = record.reading.magnitude(),
                    temperature = record.reading.temperature(),
                    "recorded reading"
                );
                self.update(|s| {
                    s.state = PollerState::Idle;
                    s.readings += 1;
                    s.last_reading_at = Some(record.reading.timestamp());
                });
                TickOutcome::Recorded(record)
            }
            Err(e) if e.is_link_failure() => {
                self.failures = self.failures.saturating_add(1);
                warn!(error = %e, failures = self.failures, "SQM link lost");
                self.update(|s| {
                    s.state = PollerState::Reconnecting;
                    s.link_failures += 1;
                    s.last_error = Some(e.to_string());
                });
                TickOutcome::LinkLost(e)
            }
            Err(e) => {
                warn!(error = %e, "skipping SQM reading");
                self.update(|s| {
                    s.state = PollerState::Idle;
                    if matches!(e, ProtocolError::Timeout(_)) {
                        s.timeouts += 1;
                    } else {
                        s.malformed_frames += 1;
                    }
                    s.last_error = Some(e.to_string());
                });
                TickOutcome::Skipped(e)
            }
        }
    }

    /// Reopen the link with exponential backoff
    ///
    /// Waits for the backoff delay before each attempt that follows a link
    /// failure. Returns early without a link if stop is requested while
    /// waiting.
    pub fn reconnect(&mut self) -> Result<(), PollerError> {
        self.set_state(PollerState::Reconnecting);
        let max = self.max_failures();

        loop {
            if self.failures > 0 {
                let delay = self.config.backoff_delay(self.failures);
                debug!(retry_in_ms = delay.as_millis() as u64, "waiting before reopening SQM link");
                if self.stop.wait(delay) {
                    return Ok(());
                }
            }

            match self.link.open() {
                Ok(()) => {
                    self.set_state(PollerState::Idle);
                    return Ok(());
                }
                Err(e) => {
                    self.failures = self.failures.saturating_add(1);
                    if self.failures >= max {
                        return Err(self.exhausted(e));
                    }
                    warn!(
                        attempt = self.failures,
                        max,
                        error = %e,
                        "failed to open SQM link"
                    );
                    self.update(|s| s.last_error = Some(e.to_string()));
                }
            }
        }
    }

    fn max_failures(&self) -> u32 {
        self.config.max_reconnect_attempts.max(1)
    }

    /// Log the final failure once and publish the halted state
    fn exhausted(&self, e: ProtocolError) -> PollerError {
        error!(
            attempts = self.failures,
            error = %e,
            "giving up on SQM link, polling halted"
        );
        self.update(|s| {
            s.state = PollerState::ReconnectExhausted;
            s.last_error = Some(e.to_string());
        });
        PollerError::ReconnectExhausted {
            attempts: self.failures,
            last_error: e,
        }
    }

    fn set_state(&self, state: PollerState) {
        self.update(|s| s.state = state);
    }

    fn update(&self, f: impl FnOnce(&mut PollerStatus)) {
        let mut status = self.status.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut status);
    }
}
