//! HTTP routes
//!
//! Every handler is a read-only query on the store, the poller status or the
//! average history.

use axum::{
    extract::{Query, State},
    response::Json,
    routing::get,
    Router,
};
use serde::Deserialize;
use sqm_core::poller::{PollerStatus, StatusHandle};
use sqm_core::store::{Average, AverageHistory, Record, Store};
use std::fmt::Write as _;
use std::sync::{Arc, PoisonError, RwLock};

/// Shared state of all handlers
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub status: StatusHandle,
    pub averages: Arc<RwLock<AverageHistory>>,
}

impl AppState {
    pub fn new(store: Arc<Store>, status: StatusHandle, averages: AverageHistory) -> Self {
        Self {
            store,
            status,
            averages: Arc::new(RwLock::new(averages)),
        }
    }

    fn status(&self) -> PollerStatus {
        self.status
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn averages(&self) -> Vec<Average> {
        self.averages
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }
}

#[derive(Debug, Deserialize)]
pub struct RecordsQuery {
    #[serde(default)]
    since: u64,
}

/// Create all routes with state
pub fn create_routes(state: AppState) -> Router {
    Router::new()
        .route("/", get(summary))
        .route("/current.json", get(current))
        .route("/average.json", get(average))
        .route("/records.json", get(records))
        .route("/status.json", get(status))
        .with_state(state)
}

/// Plain-text overview of the latest reading and recent averages
async fn summary(State(state): State<AppState>) -> String {
    let mut out = String::from("Sky Quality Meter\n\n");

    match state.store.latest() {
        Some(record) => {
            let r = &record.reading;
            let _ = writeln!(
                out,
                "Current ({}): {:.2} mag/arcsec², {:.2} Hz, {:.3} s, {:.1} °C",
                r.timestamp().format("%Y-%m-%d %H:%M:%S UTC"),
                r.magnitude(),
                r.frequency(),
                r.period(),
                r.temperature(),
            );
        }
        None => out.push_str("Current: no reading yet\n"),
    }

    let status = state.status();
    let _ = writeln!(out, "Poller: {:?}, {} readings", status.state, status.readings);
    if let Some(error) = &status.last_error {
        let _ = writeln!(out, "Last error: {error}");
    }

    let averages = state.averages();
    if !averages.is_empty() {
        out.push_str("\nAverages:\n");
        for avg in averages {
            let _ = writeln!(
                out,
                "  {}  {:.2} mag/arcsec²  ({} readings)",
                avg.time.format("%Y-%m-%d %H:%M:%S"),
                avg.magnitude,
                avg.count,
            );
        }
    }
    out
}

/// Latest record, `null` before the first reading
async fn current(State(state): State<AppState>) -> Json<Option<Record>> {
    Json(state.store.latest())
}

/// Most recent window average, `null` before the first window closes
async fn average(State(state): State<AppState>) -> Json<Option<Average>> {
    Json(state.averages().into_iter().next())
}

async fn records(
    State(state): State<AppState>,
    Query(query): Query<RecordsQuery>,
) -> Json<Vec<Record>> {
    Json(state.store.since(query.since).collect())
}

async fn status(State(state): State<AppState>) -> Json<PollerStatus> {
    Json(state.status())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;
    use sqm_core::reading::Reading;
    use tower::util::ServiceExt;

    fn test_state() -> AppState {
        AppState::new(
            Arc::new(Store::new(None)),
            StatusHandle::default(),
            AverageHistory::default(),
        )
    }

    fn reading(magnitude: f64) -> Reading {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 22, 0, 0).unwrap();
        Reading::new(ts, magnitude, 19.8, 0.238, 25.5).unwrap()
    }

    async fn get(state: &AppState, uri: &str) -> (StatusCode, String) {
        let app = create_routes(state.clone());
        let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status();
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_current_before_first_reading() {
        let state = test_state();
        let (code, body) = get(&state, "/current.json").await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body, "null");
    }

    #[tokio::test]
    async fn test_current_returns_latest() {
        let state = test_state();
        state.store.append(reading(19.8));
        state.store.append(reading(20.1));

        let (code, body) = get(&state, "/current.json").await;
        assert_eq!(code, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["sequence"], 2);
        assert_eq!(json["magnitude"], 20.1);
        assert_eq!(json["timestamp"], "2024-03-01T22:00:00Z");
    }

    #[tokio::test]
    async fn test_records_since() {
        let state = test_state();
        for i in 0..4 {
            state.store.append(reading(18.0 + i as f64));
        }

        let (_, body) = get(&state, "/records.json?since=2").await;
        let json: Vec<serde_json::Value> = serde_json::from_str(&body).unwrap();
        let seqs: Vec<u64> = json.iter().map(|r| r["sequence"].as_u64().unwrap()).collect();
        assert_eq!(seqs, vec![3, 4]);

        let (_, body) = get(&state, "/records.json").await;
        let json: Vec<serde_json::Value> = serde_json::from_str(&body).unwrap();
        assert_eq!(json.len(), 4);

        let (code, _) = get(&state, "/records.json?since=abc").await;
        assert_eq!(code, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_average_uses_newest_entry() {
        let state = test_state();
        let (_, body) = get(&state, "/average.json").await;
        assert_eq!(body, "null");

        let store = Store::new(None);
        store.append(reading(20.0));
        store.append(reading(21.0));
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 21, 55, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 3, 1, 22, 5, 0).unwrap();
        let avg = store.average(start, end).unwrap();
        state.averages.write().unwrap().push(avg);

        let (_, body) = get(&state, "/average.json").await;
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["count"], 2);
        assert_eq!(json["magnitude"], 20.5);
    }

    #[tokio::test]
    async fn test_status_and_summary() {
        let state = test_state();
        state.status.write().unwrap().last_error = Some("device unplugged".into());

        let (code, body) = get(&state, "/status.json").await;
        assert_eq!(code, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["state"], "idle");
        assert_eq!(json["last_error"], "device unplugged");

        state.store.append(reading(19.8));
        let (code, body) = get(&state, "/").await;
        assert_eq!(code, StatusCode::OK);
        assert!(body.contains("19.80 mag/arcsec²"));
        assert!(body.contains("device unplugged"));
    }

    #[tokio::test]
    async fn test_unknown_resource() {
        let state = test_state();
        let (code, _) = get(&state, "/history.json").await;
        assert_eq!(code, StatusCode::NOT_FOUND);
    }
}
