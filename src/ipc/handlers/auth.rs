use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{get_secret, get_str, open_conn, require_login, respond};
use crate::ipc::types::{AppState, Request};
use crate::security::{self, AuthState, CreateOutcome, LoginOutcome, ResetOutcome};
use chrono::Utc;
use serde_json::{json, Value};

const LOCKED_MESSAGE: &str = "account is locked; contact the administrator";

fn rejected() -> HandlerErr {
    HandlerErr::security("auth_failed", "invalid username or password")
}

fn locked() -> HandlerErr {
    HandlerErr::security("account_locked", LOCKED_MESSAGE)
}

fn handle_login(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let username = get_str(&req.params, "username")?;
    let password = get_secret(&req.params, "password")?;
    if state.session.state() == AuthState::LoggedIn {
        return Err(HandlerErr::bad_params("already logged in; log out first"));
    }
    let conn = open_conn(&state.db)?;
    let now = Utc::now();

    match security::login(conn, &state.config, &mut state.session, &username, &password, now)? {
        LoginOutcome::Success => Ok(json!({
            "username": username,
            "loggedInAt": security::timestamp(now),
        })),
        LoginOutcome::Rejected => Err(rejected()),
        LoginOutcome::Locked | LoginOutcome::StillLocked => Err(locked()),
    }
}

fn handle_logout(state: &mut AppState, _req: &Request) -> Result<Value, HandlerErr> {
    let conn = open_conn(&state.db)?;
    let username = security::logout(conn, &mut state.session, Utc::now());
    Ok(json!({ "loggedOut": username.is_some(), "username": username }))
}

fn handle_session(state: &mut AppState, _req: &Request) -> Result<Value, HandlerErr> {
    let s = &state.session;
    Ok(json!({
        "state": s.state(),
        "username": s.current_user(),
        "loggedInAt": s.logged_in_at().map(security::timestamp),
        "failedAttempts": s.failed_attempts(),
    }))
}

fn handle_unlock(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let target = get_str(&req.params, "username")?;
    let (conn, actor) = require_login(state)?;
    if !security::unlock_account(conn, actor, &target, Utc::now())? {
        return Err(HandlerErr::not_found("account not found")
            .with_details(json!({ "username": target })));
    }
    Ok(json!({ "username": target, "unlocked": true }))
}

fn handle_reset_password(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let username = get_str(&req.params, "username")?;
    let recovery_code = get_secret(&req.params, "recoveryCode")?;
    let new_password = get_secret(&req.params, "newPassword")?;
    let conn = open_conn(&state.db)?;

    let outcome = security::reset_password(
        conn,
        &state.config,
        &mut state.session,
        &username,
        &recovery_code,
        &new_password,
        Utc::now(),
    )?;
    match outcome {
        ResetOutcome::Reset => Ok(json!({ "username": username, "reset": true })),
        ResetOutcome::Rejected => Err(HandlerErr::security(
            "reset_failed",
            "recovery check failed",
        )),
        ResetOutcome::Locked => Err(locked()),
        ResetOutcome::PasswordTooShort { min } => Err(HandlerErr::bad_params(format!(
            "new password must be at least {} characters",
            min
        ))
        .with_details(json!({ "minPasswordLength": min }))),
    }
}

fn handle_rotate_recovery_code(state: &mut AppState, _req: &Request) -> Result<Value, HandlerErr> {
    let (conn, actor) = require_login(state)?;
    let code = security::rotate_recovery_code(conn, actor, Utc::now())?
        .ok_or_else(|| HandlerErr::not_found("account not found"))?;
    Ok(json!({ "username": actor, "recoveryCode": code }))
}

fn handle_users_create(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let (conn, _) = require_login(state)?;
    let username = get_str(&req.params, "username")?;
    let password = get_secret(&req.params, "password")?;
    let min = state.config.min_password_length;
    if password.chars().count() < min {
        return Err(HandlerErr::bad_params(format!(
            "password must be at least {} characters",
            min
        )));
    }
    match security::create_admin(conn, &username, &password, Utc::now())? {
        CreateOutcome::Created { recovery_code } => Ok(json!({
            "username": username,
            "recoveryCode": recovery_code,
        })),
        CreateOutcome::AlreadyExists => Err(HandlerErr::conflict("username already exists")
            .with_details(json!({ "username": username }))),
    }
}

fn handle_users_list(state: &mut AppState, _req: &Request) -> Result<Value, HandlerErr> {
    let (conn, _) = require_login(state)?;
    let users = security::list_accounts(conn)?;
    Ok(json!({ "users": users }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let res = match req.method.as_str() {
        "auth.login" => handle_login(state, req),
        "auth.logout" => handle_logout(state, req),
        "auth.session" => handle_session(state, req),
        "auth.unlock" => handle_unlock(state, req),
        "auth.resetPassword" => handle_reset_password(state, req),
        "auth.rotateRecoveryCode" => handle_rotate_recovery_code(state, req),
        "auth.users.create" => handle_users_create(state, req),
        "auth.users.list" => handle_users_list(state, req),
        _ => return None,
    };
    Some(respond(req, res))
}
