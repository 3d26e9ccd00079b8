use crate::error_reason::{ErrorReason, UpstreamFailure};
use crate::state::AppState;
use axum::{extract::State, http::StatusCode, Json};
use healthgate::CallError;
use reqwest::Client;
use serde_json::{json, Value};
use std::{
    sync::{atomic::Ordering, Arc},
    time::{Duration, SystemTime, UNIX_EPOCH},
};
use tracing::{debug, warn};

#[derive(Clone)]
pub struct HttpState {
    pub app: Arc<AppState>,
    pub client: Client,
}

// ----------------------
// Handlers
// ----------------------
pub async fn health() -> (StatusCode, Json<Value>) {
    (StatusCode::OK, Json(json!({"status":"ok"})))
}

pub async fn status(State(state): State<HttpState>) -> (StatusCode, Json<Value>) {
    let breaker = state.app.breaker().await;
    let opts = breaker.options();
    let health = match breaker.health().await {
        Ok(hs) => json!({
            "failures": hs.failures,
            "successes": hs.successes,
            "total": hs.total,
            "error_percentage": hs.error_percentage,
            "last_failure_ms": hs.last_failure.map(epoch_millis),
            "last_success_ms": hs.last_success.map(epoch_millis),
        }),
        Err(e) => json!({ "error": e.to_string() }),
    };
    let last = *state.app.last_transition.lock();
    let last_transition = last.map(|(s, at)| {
        json!({ "state": s, "seconds_ago": at.elapsed().as_secs() })
    });
    let body = json!({
        "state": breaker.current_state(),
        "options": opts,
        "health": health,
        "total_calls": state.app.total_calls.load(Ordering::Relaxed),
        "rejected_calls": state.app.rejected_calls.load(Ordering::Relaxed),
        "upstream_errors": state.app.upstream_errors.load(Ordering::Relaxed),
        "transitions": state.app.transitions.load(Ordering::Relaxed),
        "last_transition": last_transition,
        // persistently show the last error reason (not cleared on success)
        "last_error": state.app.last_error().as_str(),
    });
    (StatusCode::OK, Json(body))
}

pub async fn relay(State(state): State<HttpState>, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    // increment incoming call counter
    state.app.total_calls.fetch_add(1, Ordering::Relaxed);

    let id_value = body.get("id").cloned().unwrap_or(Value::Null);
    let (url, timeout) = {
        let cfg = state.app.cfg.read().await;
        (cfg.upstream.url.clone(), Duration::from_millis(cfg.upstream.timeout_ms))
    };
    let breaker = state.app.breaker().await;
    let client = state.client.clone();

    let res = breaker.call(|| forward(client, url, body, timeout)).await;
    match res {
        Ok(v) => (StatusCode::OK, Json(v)),
        Err(CallError::OpenCircuit) => {
            state.app.rejected_calls.fetch_add(1, Ordering::Relaxed);
            debug!("rejected while circuit open");
            let resp = json!({"jsonrpc":"2.0","id": id_value,"error":{"code":-32001,"message":"Circuit open; upstream unhealthy"}});
            (StatusCode::SERVICE_UNAVAILABLE, Json(resp))
        }
        Err(CallError::Breaker(e)) => {
            // breaker swapped out by a config reload mid-request
            warn!("breaker unavailable: {}", e);
            let resp = json!({"jsonrpc":"2.0","id": id_value,"error":{"code":-32002,"message":"Breaker unavailable; retry"}});
            (StatusCode::SERVICE_UNAVAILABLE, Json(resp))
        }
        Err(CallError::Operation(f)) => {
            state.app.upstream_errors.fetch_add(1, Ordering::Relaxed);
            state.app.set_last_error(f.reason);
            let resp = json!({"jsonrpc":"2.0","id": id_value,"error":{"code":-32603,"message": format!("Upstream error: {}", f)}});
            (StatusCode::BAD_GATEWAY, Json(resp))
        }
    }
}

// -------- helpers --------

async fn forward(client: Client, url: String, payload: Value, timeout: Duration) -> Result<Value, UpstreamFailure> {
    let resp = match tokio::time::timeout(timeout, client.post(&url).json(&payload).send()).await {
        Ok(Ok(resp)) => resp,
        Ok(Err(e)) => return Err(UpstreamFailure::new(ErrorReason::HttpError, e.to_string())),
        Err(_) => return Err(UpstreamFailure::new(ErrorReason::Timeout, format!("no answer within {:?}", timeout))),
    };
    let status = resp.status();
    if !status.is_success() {
        return Err(UpstreamFailure::new(ErrorReason::BadStatus, status.to_string()));
    }
    let v = resp
        .json::<Value>()
        .await
        .map_err(|e| UpstreamFailure::new(ErrorReason::BadJson, e.to_string()))?;
    classify(v)
}

/// A JSON-RPC `error` member counts against the upstream.
fn classify(v: Value) -> Result<Value, UpstreamFailure> {
    match v.get("error") {
        Some(err) if !err.is_null() => Err(UpstreamFailure::new(ErrorReason::RpcError, err.to_string())),
        _ => Ok(v),
    }
}

fn epoch_millis(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rpc_error_member_is_a_failure() {
        let err = classify(json!({"jsonrpc":"2.0","id":1,"error":{"code":-32000,"message":"boom"}})).unwrap_err();
        assert_eq!(err.reason, ErrorReason::RpcError);
        assert!(err.detail.contains("boom"));
    }

    #[test]
    fn result_passes() {
        let v = json!({"jsonrpc":"2.0","id":1,"result":"0x10"});
        assert_eq!(classify(v.clone()).unwrap(), v);
        let null_err = json!({"jsonrpc":"2.0","id":1,"result":"0x10","error":null});
        assert!(classify(null_err).is_ok());
    }

    #[test]
    fn epoch_millis_of_epoch_is_zero() {
        assert_eq!(epoch_millis(UNIX_EPOCH), 0);
        assert_eq!(epoch_millis(UNIX_EPOCH + Duration::from_millis(1500)), 1500);
    }
}
