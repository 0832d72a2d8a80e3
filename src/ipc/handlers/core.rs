use crate::db;
use crate::ipc::error::{ErrorKind, HandlerErr};
use crate::ipc::helpers::{get_str, respond};
use crate::ipc::types::{AppState, Request};
use crate::security::{self, SecurityConfig, Session};
use chrono::Utc;
use serde_json::json;
use std::path::PathBuf;
use tracing::{info, warn};

fn handle_health(state: &mut AppState, _req: &Request) -> Result<serde_json::Value, HandlerErr> {
    Ok(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string()),
        "authState": state.session.state(),
    }))
}

fn handle_workspace_select(
    state: &mut AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let path = PathBuf::from(get_str(&req.params, "path")?);
    let conn = db::open_db(&path).map_err(|e| {
        HandlerErr::new(ErrorKind::Persistence, "db_open_failed", format!("{e:#}"))
    })?;
    let now = Utc::now();

    // A corrupt settings row must not keep the workspace closed.
    let config = match SecurityConfig::load(&conn) {
        Ok(c) => c,
        Err(e) => {
            warn!(error = %e, "falling back to default security settings");
            SecurityConfig::default()
        }
    };

    let recovery_code = security::ensure_default_admin(&conn, now)?;

    // Best-effort retention cleanup.
    if let Err(e) = security::purge_expired_events(&conn, &config, now) {
        warn!(error = %e, "security event retention cleanup failed");
    }

    // Close the previous session against the workspace it was opened in.
    if let Some(old) = state.db.as_ref() {
        security::logout(old, &mut state.session, now);
    }

    info!(workspace = %path.to_string_lossy(), "workspace opened");
    state.workspace = Some(path.clone());
    state.db = Some(conn);
    state.config = config;
    state.session = Session::new();

    let mut result = json!({ "workspacePath": path.to_string_lossy() });
    if let Some(code) = recovery_code {
        result["defaultUsername"] = json!(security::DEFAULT_ADMIN_USERNAME);
        result["initialRecoveryCode"] = json!(code);
    }
    Ok(result)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let res = match req.method.as_str() {
        "health" => handle_health(state, req),
        "workspace.select" => handle_workspace_select(state, req),
        _ => return None,
    };
    Some(respond(req, res))
}
