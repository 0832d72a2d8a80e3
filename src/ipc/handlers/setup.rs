use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{opt_i64, require_login, respond};
use crate::ipc::types::{AppState, Request};
use crate::security::{self, EventKind};
use chrono::Utc;
use serde_json::{json, Value};
use tracing::info;

fn handle_security_get(state: &mut AppState, _req: &Request) -> Result<Value, HandlerErr> {
    require_login(state)?;
    Ok(json!({ "security": state.config }))
}

fn handle_security_update(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let (conn, actor) = require_login(state)?;
    let Some(patch) = req.params.get("patch").filter(|v| v.is_object()) else {
        return Err(HandlerErr::bad_params("patch must be an object"));
    };

    let mut next = state.config.clone();
    if let Some(n) = opt_i64(patch, "maxFailedAttempts")? {
        next.max_failed_attempts = u32::try_from(n)
            .map_err(|_| HandlerErr::bad_params("maxFailedAttempts must be in 1..=10"))?;
    }
    if let Some(n) = opt_i64(patch, "minPasswordLength")? {
        next.min_password_length = usize::try_from(n)
            .map_err(|_| HandlerErr::bad_params("minPasswordLength must be in 4..=128"))?;
    }
    if let Some(n) = opt_i64(patch, "eventRetentionDays")? {
        next.event_retention_days = n;
    }
    next.validate().map_err(HandlerErr::bad_params)?;
    next.save(conn)?;
    let prev = &state.config;
    security::record_event(
        conn,
        EventKind::SettingsChanged,
        &format!(
            "maxFailedAttempts {} -> {}, minPasswordLength {} -> {}, eventRetentionDays {} -> {}",
            prev.max_failed_attempts,
            next.max_failed_attempts,
            prev.min_password_length,
            next.min_password_length,
            prev.event_retention_days,
            next.event_retention_days,
        ),
        Some(actor),
        Utc::now(),
    );
    info!(actor, ?next, "security settings updated");

    state.config = next;
    Ok(json!({ "security": state.config }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let res = match req.method.as_str() {
        "setup.security.get" => handle_security_get(state, req),
        "setup.security.update" => handle_security_update(state, req),
        _ => return None,
    };
    Some(respond(req, res))
}
