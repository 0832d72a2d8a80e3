use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{opt_i64, opt_str, require_login, respond};
use crate::ipc::types::{AppState, Request};
use crate::security::{self, EventKind, SecurityConfig};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};

fn opt_instant(params: &Value, key: &str) -> Result<Option<DateTime<Utc>>, HandlerErr> {
    let Some(raw) = opt_str(params, key)? else {
        return Ok(None);
    };
    DateTime::parse_from_rfc3339(&raw)
        .map(|d| Some(d.with_timezone(&Utc)))
        .map_err(|_| {
            HandlerErr::bad_params(format!("{} must be an RFC 3339 timestamp", key))
                .with_details(json!({ key: raw }))
        })
}

fn handle_events_query(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let (conn, _) = require_login(state)?;
    let kind = match opt_str(&req.params, "kind")? {
        None => None,
        Some(k) => Some(EventKind::parse(&k).ok_or_else(|| {
            HandlerErr::bad_params("unknown event kind").with_details(json!({ "kind": k }))
        })?),
    };
    let from = opt_instant(&req.params, "from")?;
    let to = opt_instant(&req.params, "to")?;
    if let (Some(f), Some(t)) = (from, to) {
        if f > t {
            return Err(HandlerErr::bad_params("from must not be after to"));
        }
    }
    let events = security::query_events(conn, kind, from, to)?;
    Ok(json!({ "events": events }))
}

fn handle_events_purge(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let (conn, _) = require_login(state)?;
    let cfg = match opt_i64(&req.params, "olderThanDays")? {
        None => state.config.clone(),
        Some(days) if (0..=3650).contains(&days) => SecurityConfig {
            event_retention_days: days,
            ..state.config.clone()
        },
        Some(_) => return Err(HandlerErr::bad_params("olderThanDays must be in 0..=3650")),
    };
    let removed = security::purge_expired_events(conn, &cfg, Utc::now())?;
    Ok(json!({ "removed": removed, "retentionDays": cfg.event_retention_days }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let res = match req.method.as_str() {
        "audit.events.query" => handle_events_query(state, req),
        "audit.events.purge" => handle_events_purge(state, req),
        _ => return None,
    };
    Some(respond(req, res))
}
