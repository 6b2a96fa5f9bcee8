use std::collections::HashMap;

use axum::{
    extract::{Query, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use powermate_common::{
    time, DeviceInfo, RelayId, RelaySchedule, StatusPayload, DEVICE_NAME, ENDPOINT_CLEAR_OVERRIDE,
    ENDPOINT_INFO, ENDPOINT_SET_RELAY, ENDPOINT_SET_TIMER, ENDPOINT_STATUS, NO_TIME, PARAM_OFF,
    PARAM_ON, PARAM_OVERRIDE, PARAM_RELAY, PARAM_STATE, RELAY_COUNT,
};
use serde::Serialize;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::{SimulatorState, VERSION};

type Params = Query<HashMap<String, String>>;

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

pub fn router(state: SimulatorState) -> Router {
    Router::new()
        .route(ENDPOINT_STATUS, get(handle_status))
        .route(ENDPOINT_SET_RELAY, get(handle_set_relay))
        .route(ENDPOINT_SET_TIMER, get(handle_set_timer))
        .route(ENDPOINT_CLEAR_OVERRIDE, get(handle_clear_override))
        .route(ENDPOINT_INFO, get(handle_info))
        .layer(middleware::from_fn_with_state(state.clone(), require_online))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn require_online(
    State(state): State<SimulatorState>,
    request: Request,
    next: Next,
) -> Response {
    if !state.is_online() {
        return error_response(StatusCode::SERVICE_UNAVAILABLE, "device offline");
    }
    next.run(request).await
}

async fn handle_status(State(state): State<SimulatorState>) -> Response {
    let now = state.now_hhmm().await;
    let status = state.device.lock().await.status(now);
    Json(StatusPayload::from(&status)).into_response()
}

async fn handle_info() -> Response {
    Json(DeviceInfo {
        device: DEVICE_NAME.to_string(),
        relays: Some(RELAY_COUNT as u8),
        version: Some(VERSION.to_string()),
    })
    .into_response()
}

async fn handle_set_relay(State(state): State<SimulatorState>, Query(params): Params) -> Response {
    let relay = match parse_relay(&params) {
        Ok(relay) => relay,
        Err(message) => return error_response(StatusCode::BAD_REQUEST, &message),
    };
    let on = match params.get(PARAM_STATE).map(String::as_str) {
        Some("1" | "on" | "true") => true,
        Some("0" | "off" | "false") => false,
        _ => return error_response(StatusCode::BAD_REQUEST, "state must be 0 or 1"),
    };
    let override_schedule = match params.get(PARAM_OVERRIDE).map(String::as_str) {
        None | Some("false" | "0") => false,
        Some("true" | "1") => true,
        Some(_) => {
            return error_response(StatusCode::BAD_REQUEST, "override must be true or false")
        }
    };

    state
        .device
        .lock()
        .await
        .set_relay(relay, on, override_schedule);
    info!(
        "relay {relay} set {}{}",
        if on { "on" } else { "off" },
        if override_schedule { " with override" } else { "" }
    );
    ok_response()
}

async fn handle_set_timer(State(state): State<SimulatorState>, Query(params): Params) -> Response {
    let relay = match parse_relay(&params) {
        Ok(relay) => relay,
        Err(message) => return error_response(StatusCode::BAD_REQUEST, &message),
    };
    let schedule = match (parse_hhmm(&params, PARAM_ON), parse_hhmm(&params, PARAM_OFF)) {
        (Ok(on), Ok(off)) => RelaySchedule::new(on, off),
        (Err(message), _) | (_, Err(message)) => {
            return error_response(StatusCode::BAD_REQUEST, &message)
        }
    };

    state.device.lock().await.set_timer(relay, schedule);
    info!("relay {relay} schedule {}", schedule.describe());
    ok_response()
}

async fn handle_clear_override(
    State(state): State<SimulatorState>,
    Query(params): Params,
) -> Response {
    let relay = match parse_relay(&params) {
        Ok(relay) => relay,
        Err(message) => return error_response(StatusCode::BAD_REQUEST, &message),
    };

    let now = state.now_hhmm().await;
    let switched = state.device.lock().await.clear_override(relay, now);
    info!("relay {relay} override cleared");
    if let Some(on) = switched {
        info!("schedule switched relay {relay} {}", if on { "on" } else { "off" });
    }
    ok_response()
}

fn parse_relay(params: &HashMap<String, String>) -> Result<RelayId, String> {
    let raw = params
        .get(PARAM_RELAY)
        .ok_or_else(|| "missing relay".to_string())?;
    raw.parse::<RelayId>()
}

fn parse_hhmm(params: &HashMap<String, String>, key: &str) -> Result<i32, String> {
    let raw = params.get(key).ok_or_else(|| format!("missing {key}"))?;
    let value = raw
        .trim()
        .parse::<i32>()
        .map_err(|_| format!("{key} must be an HHMM integer"))?;

    if value != NO_TIME && !time::is_valid(value) {
        return Err(format!("{key} is not a valid HHMM time"));
    }
    Ok(value)
}

fn ok_response() -> Response {
    (StatusCode::OK, "OK").into_response()
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}
