use std::sync::Arc;

use axum::extract::State;
use axum::response::Json;
use serde_json::{json, Value};

use crate::state::AppState;

/// Health check handler.
/// Returns JSON with status and a config summary; never exposes secrets.
pub fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let gate = &state.gate;
    Json(json!({
        "status": "thinkstream is running",
        "config": {
            "alias_count": state.aliases.len(),
            "default_alias": state.aliases.default_entry().alias,
            "gate": {
                "secret_configured": gate.secret_configured(),
                "limited_alias": gate.limited_alias(),
                "limit_per_window": state.config.gate.limit_per_window,
                "window_secs": state.config.gate.window_secs,
            },
            "log_level": state.config.features.log_level,
        }
    }))
}
