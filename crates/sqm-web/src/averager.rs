//! Periodic window averages

use chrono::{DateTime, Utc};
use std::sync::PoisonError;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::api::AppState;

/// Average the window ending at `now` and push it onto the history
///
/// Returns `false` when no readings fell in the window.
pub fn update_averages(state: &AppState, window: Duration, now: DateTime<Utc>) -> bool {
    let Ok(span) = chrono::Duration::from_std(window) else {
        return false;
    };

    match state.store.average(now - span, now) {
        Some(avg) => {
            info!(count = avg.count, magnitude = avg.magnitude, "window average");
            state
                .averages
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .push(avg);
            true
        }
        None => {
            debug!("no readings in averaging window");
            false
        }
    }
}

/// Recompute the average every `window` until the runtime shuts down
pub fn spawn_averager(state: AppState, window: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(window);
        // The first tick fires immediately; skip it so the first window is full
        ticker.tick().await;
        loop {
            ticker.tick().await;
            update_averages(&state, window, Utc::now());
        }
    })
}
