use crate::db;
use anyhow::Context;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use rand::Rng;
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

pub const DEFAULT_ADMIN_USERNAME: &str = "admin";
pub const DEFAULT_ADMIN_PASSWORD: &str = "admin123";
pub const SECURITY_SETTINGS_KEY: &str = "setup.security";

const SALT_BYTES: usize = 16;
const RECOVERY_CHARSET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const RECOVERY_GROUPS: usize = 4;
const RECOVERY_GROUP_LEN: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SecurityConfig {
    pub max_failed_attempts: u32,
    pub min_password_length: usize,
    pub event_retention_days: i64,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            max_failed_attempts: 3,
            min_password_length: 4,
            event_retention_days: 90,
        }
    }
}

impl SecurityConfig {
    pub fn load(conn: &Connection) -> anyhow::Result<Self> {
        match db::settings_get_json(conn, SECURITY_SETTINGS_KEY)? {
            Some(v) => serde_json::from_value(v).context("invalid security settings"),
            None => Ok(Self::default()),
        }
    }

    pub fn save(&self, conn: &Connection) -> anyhow::Result<()> {
        db::settings_set_json(conn, SECURITY_SETTINGS_KEY, &serde_json::to_value(self)?)
    }

    pub fn validate(&self) -> Result<(), String> {
        if !(1..=10).contains(&self.max_failed_attempts) {
            return Err("maxFailedAttempts must be in 1..=10".to_string());
        }
        if !(4..=128).contains(&self.min_password_length) {
            return Err("minPasswordLength must be in 4..=128".to_string());
        }
        if !(1..=3650).contains(&self.event_retention_days) {
            return Err("eventRetentionDays must be in 1..=3650".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    LoginSuccess,
    LoginFailed,
    LoginBlocked,
    AccountLocked,
    AccountUnlocked,
    Logout,
    PasswordReset,
    ResetFailed,
    RecoveryCodeRotated,
    AdminCreated,
    EventsPurged,
    SettingsChanged,
}

impl EventKind {
    pub const ALL: [EventKind; 12] = [
        EventKind::LoginSuccess,
        EventKind::LoginFailed,
        EventKind::LoginBlocked,
        EventKind::AccountLocked,
        EventKind::AccountUnlocked,
        EventKind::Logout,
        EventKind::PasswordReset,
        EventKind::ResetFailed,
        EventKind::RecoveryCodeRotated,
        EventKind::AdminCreated,
        EventKind::EventsPurged,
        EventKind::SettingsChanged,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::LoginSuccess => "LOGIN_SUCCESS",
            EventKind::LoginFailed => "LOGIN_FAILED",
            EventKind::LoginBlocked => "LOGIN_BLOCKED",
            EventKind::AccountLocked => "ACCOUNT_LOCKED",
            EventKind::AccountUnlocked => "ACCOUNT_UNLOCKED",
            EventKind::Logout => "LOGOUT",
            EventKind::PasswordReset => "PASSWORD_RESET",
            EventKind::ResetFailed => "RESET_FAILED",
            EventKind::RecoveryCodeRotated => "RECOVERY_CODE_ROTATED",
            EventKind::AdminCreated => "ADMIN_CREATED",
            EventKind::EventsPurged => "EVENTS_PURGED",
            EventKind::SettingsChanged => "SETTINGS_CHANGED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AuthState {
    LoggedOut,
    LoggedIn,
    Locked,
}

/// Authentication state for the single interactive user. Owned by the caller and passed
/// into every security operation.
#[derive(Debug, Clone)]
pub struct Session {
    state: AuthState,
    username: Option<String>,
    logged_in_at: Option<DateTime<Utc>>,
    failed_attempts: u32,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            state: AuthState::LoggedOut,
            username: None,
            logged_in_at: None,
            failed_attempts: 0,
        }
    }

    pub fn state(&self) -> AuthState {
        self.state
    }

    pub fn current_user(&self) -> Option<&str> {
        match self.state {
            AuthState::LoggedIn => self.username.as_deref(),
            _ => None,
        }
    }

    pub fn logged_in_at(&self) -> Option<DateTime<Utc>> {
        self.logged_in_at
    }

    pub fn failed_attempts(&self) -> u32 {
        self.failed_attempts
    }

    fn sign_in(&mut self, username: &str, now: DateTime<Utc>) {
        self.state = AuthState::LoggedIn;
        self.username = Some(username.to_string());
        self.logged_in_at = Some(now);
        self.failed_attempts = 0;
    }

    fn sign_out(&mut self, state: AuthState) {
        self.state = state;
        self.username = None;
        self.logged_in_at = None;
    }
}

/// Stored credential material plus the public lockout view of the account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminAccount {
    pub summary: AccountSummary,
    pub password_hash: String,
    pub salt: String,
    pub recovery_hash: Option<String>,
    pub recovery_salt: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountSummary {
    pub username: String,
    pub failed_attempts: u32,
    pub is_locked: bool,
    pub locked_at: Option<String>,
    pub last_login: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityEvent {
    pub id: i64,
    pub kind: String,
    pub description: String,
    pub username: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum LoginOutcome {
    Success,
    Rejected,
    /// This attempt reached the failure limit.
    Locked,
    /// The account was already locked; no password check was made.
    StillLocked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ResetOutcome {
    Reset,
    Rejected,
    Locked,
    PasswordTooShort { min: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    Created { recovery_code: String },
    AlreadyExists,
}

pub fn timestamp(now: DateTime<Utc>) -> String {
    now.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn new_salt() -> String {
    let mut bytes = [0u8; SALT_BYTES];
    rand::rng().fill(&mut bytes);
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

pub fn hash_password(password: &str, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    format!("{:x}", hasher.finalize())
}

pub fn verify_password(password: &str, salt: &str, expected_hash: &str) -> bool {
    hash_password(password, salt) == expected_hash
}

fn generate_recovery_code() -> String {
    let mut rng = rand::rng();
    (0..RECOVERY_GROUPS)
        .map(|_| {
            (0..RECOVERY_GROUP_LEN)
                .map(|_| RECOVERY_CHARSET[rng.random_range(0..RECOVERY_CHARSET.len())] as char)
                .collect::<String>()
        })
        .collect::<Vec<_>>()
        .join("-")
}

/// Appends one event. Failures are logged and swallowed so they never abort the
/// operation that triggered them.
pub fn record_event(
    conn: &Connection,
    kind: EventKind,
    description: &str,
    username: Option<&str>,
    now: DateTime<Utc>,
) {
    let res = conn.execute(
        "INSERT INTO security_events(event_kind, description, username, created_at)
         VALUES(?, ?, ?, ?)",
        (kind.as_str(), description, username, timestamp(now)),
    );
    match res {
        Ok(_) => debug!(kind = kind.as_str(), ?username, "security event recorded"),
        Err(e) => warn!(kind = kind.as_str(), error = %e, "failed to record security event"),
    }
}

const SUMMARY_COLUMNS: &str =
    "username, failed_attempts, is_locked, locked_at, last_login, created_at";

fn summary_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<AccountSummary> {
    Ok(AccountSummary {
        username: r.get(0)?,
        failed_attempts: r.get(1)?,
        is_locked: r.get::<_, i64>(2)? != 0,
        locked_at: r.get(3)?,
        last_login: r.get(4)?,
        created_at: r.get(5)?,
    })
}

pub fn get_account(conn: &Connection, username: &str) -> anyhow::Result<Option<AdminAccount>> {
    let account = conn
        .query_row(
            &format!(
                "SELECT {SUMMARY_COLUMNS}, password_hash, salt, recovery_hash, recovery_salt
                 FROM admin_users WHERE username = ?"
            ),
            [username],
            |r| {
                Ok(AdminAccount {
                    summary: summary_from_row(r)?,
                    password_hash: r.get(6)?,
                    salt: r.get(7)?,
                    recovery_hash: r.get(8)?,
                    recovery_salt: r.get(9)?,
                })
            },
        )
        .optional()?;
    Ok(account)
}

pub fn list_accounts(conn: &Connection) -> anyhow::Result<Vec<AccountSummary>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {SUMMARY_COLUMNS} FROM admin_users ORDER BY username"
    ))?;
    let rows = stmt
        .query_map([], summary_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn create_admin(
    conn: &Connection,
    username: &str,
    password: &str,
    now: DateTime<Utc>,
) -> anyhow::Result<CreateOutcome> {
    if get_account(conn, username)?.is_some() {
        return Ok(CreateOutcome::AlreadyExists);
    }
    let salt = new_salt();
    let recovery_code = generate_recovery_code();
    let recovery_salt = new_salt();
    conn.execute(
        "INSERT INTO admin_users(username, password_hash, salt, recovery_hash, recovery_salt,
                                 failed_attempts, is_locked, created_at)
         VALUES(?, ?, ?, ?, ?, 0, 0, ?)",
        (
            username,
            hash_password(password, &salt),
            &salt,
            hash_password(&recovery_code, &recovery_salt),
            &recovery_salt,
            timestamp(now),
        ),
    )
    .with_context(|| format!("failed to create admin {}", username))?;
    record_event(
        conn,
        EventKind::AdminCreated,
        "admin account created",
        Some(username),
        now,
    );
    info!(username, "admin account created");
    Ok(CreateOutcome::Created { recovery_code })
}

/// Creates the default account when no admin exists. Returns the one-time recovery code
/// of a freshly created account.
pub fn ensure_default_admin(conn: &Connection, now: DateTime<Utc>) -> anyhow::Result<Option<String>> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM admin_users", [], |r| r.get(0))?;
    if count > 0 {
        return Ok(None);
    }
    match create_admin(conn, DEFAULT_ADMIN_USERNAME, DEFAULT_ADMIN_PASSWORD, now)? {
        CreateOutcome::Created { recovery_code } => Ok(Some(recovery_code)),
        CreateOutcome::AlreadyExists => Ok(None),
    }
}

fn increment_failed_attempts(conn: &Connection, username: &str) -> anyhow::Result<u32> {
    let n = conn.query_row(
        "UPDATE admin_users SET failed_attempts = failed_attempts + 1
         WHERE username = ?
         RETURNING failed_attempts",
        [username],
        |r| r.get(0),
    )?;
    Ok(n)
}

/// Marks the account locked unless it already is. Returns true when this call locked it.
fn lock_account(conn: &Connection, username: &str, now: DateTime<Utc>) -> anyhow::Result<bool> {
    let changed = conn.execute(
        "UPDATE admin_users SET is_locked = 1, locked_at = ?
         WHERE username = ? AND is_locked = 0",
        (timestamp(now), username),
    )?;
    Ok(changed > 0)
}

/// Counts one failed credential check against an existing account and locks it at the
/// configured limit. Returns true when the account became locked.
fn register_failure(
    conn: &Connection,
    cfg: &SecurityConfig,
    session: &mut Session,
    username: &str,
    now: DateTime<Utc>,
) -> anyhow::Result<bool> {
    let tx = conn.unchecked_transaction()?;
    let attempts = increment_failed_attempts(&tx, username)?;
    let locked = if attempts >= cfg.max_failed_attempts {
        lock_account(&tx, username, now)?
    } else {
        false
    };
    tx.commit()?;
    session.failed_attempts = attempts;
    if locked {
        record_event(
            conn,
            EventKind::AccountLocked,
            &format!("locked after {} failed attempts", attempts),
            Some(username),
            now,
        );
        warn!(username, attempts, "account locked");
    }
    Ok(locked)
}

pub fn login(
    conn: &Connection,
    cfg: &SecurityConfig,
    session: &mut Session,
    username: &str,
    password: &str,
    now: DateTime<Utc>,
) -> anyhow::Result<LoginOutcome> {
    let Some(account) = get_account(conn, username)? else {
        session.failed_attempts += 1;
        session.sign_out(AuthState::LoggedOut);
        record_event(
            conn,
            EventKind::LoginFailed,
            "unknown username",
            Some(username),
            now,
        );
        return Ok(LoginOutcome::Rejected);
    };

    if account.summary.is_locked {
        session.sign_out(AuthState::Locked);
        record_event(
            conn,
            EventKind::LoginBlocked,
            "login attempted on locked account",
            Some(username),
            now,
        );
        return Ok(LoginOutcome::StillLocked);
    }

    if !verify_password(password, &account.salt, &account.password_hash) {
        record_event(
            conn,
            EventKind::LoginFailed,
            "invalid credentials",
            Some(username),
            now,
        );
        if register_failure(conn, cfg, session, username, now)? {
            session.sign_out(AuthState::Locked);
            return Ok(LoginOutcome::Locked);
        }
        session.sign_out(AuthState::LoggedOut);
        return Ok(LoginOutcome::Rejected);
    }

    conn.execute(
        "UPDATE admin_users SET failed_attempts = 0, last_login = ? WHERE username = ?",
        (timestamp(now), username),
    )?;
    session.sign_in(username, now);
    record_event(conn, EventKind::LoginSuccess, "login", Some(username), now);
    info!(username, "login succeeded");
    Ok(LoginOutcome::Success)
}

/// Returns the username that was signed out, if any.
pub fn logout(conn: &Connection, session: &mut Session, now: DateTime<Utc>) -> Option<String> {
    let username = session.current_user()?.to_string();
    session.sign_out(AuthState::LoggedOut);
    record_event(conn, EventKind::Logout, "logout", Some(&username), now);
    Some(username)
}

fn clear_lock(tx: &Connection, username: &str) -> anyhow::Result<usize> {
    Ok(tx.execute(
        "UPDATE admin_users SET is_locked = 0, failed_attempts = 0, locked_at = NULL
         WHERE username = ?",
        [username],
    )?)
}

/// Administrative unlock. Returns false when the account does not exist.
pub fn unlock_account(
    conn: &Connection,
    actor: &str,
    username: &str,
    now: DateTime<Utc>,
) -> anyhow::Result<bool> {
    if clear_lock(conn, username)? == 0 {
        return Ok(false);
    }
    record_event(
        conn,
        EventKind::AccountUnlocked,
        &format!("unlocked by {}", actor),
        Some(username),
        now,
    );
    Ok(true)
}

/// Verify the recovery code, set the new credential, clear the lock.
pub fn reset_password(
    conn: &Connection,
    cfg: &SecurityConfig,
    session: &mut Session,
    username: &str,
    recovery_code: &str,
    new_password: &str,
    now: DateTime<Utc>,
) -> anyhow::Result<ResetOutcome> {
    let account = get_account(conn, username)?;
    let verified = match &account {
        Some(a) => match (&a.recovery_hash, &a.recovery_salt) {
            (Some(h), Some(s)) => verify_password(recovery_code.trim(), s, h),
            _ => false,
        },
        None => false,
    };

    if !verified {
        record_event(
            conn,
            EventKind::ResetFailed,
            "recovery check failed",
            Some(username),
            now,
        );
        if account.is_none() {
            session.failed_attempts += 1;
            return Ok(ResetOutcome::Rejected);
        }
        if register_failure(conn, cfg, session, username, now)? {
            session.sign_out(AuthState::Locked);
            return Ok(ResetOutcome::Locked);
        }
        return Ok(ResetOutcome::Rejected);
    }

    if new_password.chars().count() < cfg.min_password_length {
        return Ok(ResetOutcome::PasswordTooShort {
            min: cfg.min_password_length,
        });
    }

    let salt = new_salt();
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "UPDATE admin_users SET password_hash = ?, salt = ? WHERE username = ?",
        (hash_password(new_password, &salt), &salt, username),
    )?;
    clear_lock(&tx, username)?;
    tx.commit()?;

    session.failed_attempts = 0;
    if session.state() == AuthState::Locked {
        session.sign_out(AuthState::LoggedOut);
    }
    record_event(
        conn,
        EventKind::PasswordReset,
        "password reset via recovery code",
        Some(username),
        now,
    );
    info!(username, "password reset");
    Ok(ResetOutcome::Reset)
}

/// Issues a new recovery code for an existing account. The plaintext is returned once.
pub fn rotate_recovery_code(
    conn: &Connection,
    username: &str,
    now: DateTime<Utc>,
) -> anyhow::Result<Option<String>> {
    let code = generate_recovery_code();
    let salt = new_salt();
    let changed = conn.execute(
        "UPDATE admin_users SET recovery_hash = ?, recovery_salt = ? WHERE username = ?",
        (hash_password(&code, &salt), &salt, username),
    )?;
    if changed == 0 {
        return Ok(None);
    }
    record_event(
        conn,
        EventKind::RecoveryCodeRotated,
        "recovery code rotated",
        Some(username),
        now,
    );
    Ok(Some(code))
}

pub fn query_events(
    conn: &Connection,
    kind: Option<EventKind>,
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
) -> anyhow::Result<Vec<SecurityEvent>> {
    let mut stmt = conn.prepare(
        "SELECT id, event_kind, description, username, created_at
         FROM security_events
         WHERE (?1 IS NULL OR event_kind = ?1)
           AND (?2 IS NULL OR created_at >= ?2)
           AND (?3 IS NULL OR created_at <= ?3)
         ORDER BY created_at, id",
    )?;
    let rows = stmt
        .query_map(
            (
                kind.map(EventKind::as_str),
                from.map(timestamp),
                to.map(timestamp),
            ),
            |r| {
                Ok(SecurityEvent {
                    id: r.get(0)?,
                    kind: r.get(1)?,
                    description: r.get(2)?,
                    username: r.get(3)?,
                    created_at: r.get(4)?,
                })
            },
        )?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn purge_events_before(conn: &Connection, cutoff: DateTime<Utc>) -> anyhow::Result<usize> {
    Ok(conn.execute(
        "DELETE FROM security_events WHERE created_at < ?",
        [timestamp(cutoff)],
    )?)
}

/// Ages out events past the retention window.
pub fn purge_expired_events(
    conn: &Connection,
    cfg: &SecurityConfig,
    now: DateTime<Utc>,
) -> anyhow::Result<usize> {
    let cutoff = now - Duration::days(cfg.event_retention_days);
    let removed = purge_events_before(conn, cutoff)?;
    if removed > 0 {
        record_event(
            conn,
            EventKind::EventsPurged,
            &format!("{} events older than {} removed", removed, timestamp(cutoff)),
            None,
            now,
        );
        info!(removed, "security events purged");
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 10, 9, 0, 0).unwrap()
    }

    fn setup() -> (Connection, String) {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        db::migrate(&conn).expect("migrate");
        let code = ensure_default_admin(&conn, t0())
            .expect("ensure admin")
            .expect("fresh admin");
        (conn, code)
    }

    fn kinds(conn: &Connection) -> Vec<String> {
        query_events(conn, None, None, None)
            .expect("query events")
            .into_iter()
            .map(|e| e.kind)
            .collect()
    }

    #[test]
    fn salt_is_sixteen_bytes_of_hex() {
        let s = new_salt();
        assert_eq!(s.len(), 32);
        assert!(s.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(s, new_salt());
    }

    #[test]
    fn hash_is_salt_then_password() {
        let mut h = Sha256::new();
        h.update(b"abcdadmin123");
        assert_eq!(hash_password("admin123", "abcd"), format!("{:x}", h.finalize()));
        assert_ne!(hash_password("admin123", "abcd"), hash_password("admin123", "abce"));
    }

    #[test]
    fn default_admin_created_once_without_plaintext() {
        let (conn, _) = setup();
        assert_eq!(ensure_default_admin(&conn, t0()).unwrap(), None);
        let a = get_account(&conn, DEFAULT_ADMIN_USERNAME).unwrap().unwrap();
        assert_ne!(a.password_hash, DEFAULT_ADMIN_PASSWORD);
        assert!(verify_password(DEFAULT_ADMIN_PASSWORD, &a.salt, &a.password_hash));
    }

    #[test]
    fn successful_login_resets_counter() {
        let (conn, _) = setup();
        let cfg = SecurityConfig::default();
        let mut session = Session::new();

        let out = login(&conn, &cfg, &mut session, "admin", "nope", t0()).unwrap();
        assert_eq!(out, LoginOutcome::Rejected);
        assert_eq!(get_account(&conn, "admin").unwrap().unwrap().summary.failed_attempts, 1);

        let out = login(&conn, &cfg, &mut session, "admin", "admin123", t0()).unwrap();
        assert_eq!(out, LoginOutcome::Success);
        assert_eq!(session.state(), AuthState::LoggedIn);
        assert_eq!(session.current_user(), Some("admin"));
        let a = get_account(&conn, "admin").unwrap().unwrap();
        assert_eq!(a.summary.failed_attempts, 0);
        assert_eq!(a.summary.last_login.as_deref(), Some("2025-01-10T09:00:00.000Z"));
    }

    #[test]
    fn three_failures_lock_and_correct_password_is_then_refused() {
        let (conn, _) = setup();
        let cfg = SecurityConfig::default();
        let mut session = Session::new();

        for _ in 0..2 {
            let out = login(&conn, &cfg, &mut session, "admin", "wrong", t0()).unwrap();
            assert_eq!(out, LoginOutcome::Rejected);
        }
        let out = login(&conn, &cfg, &mut session, "admin", "wrong", t0()).unwrap();
        assert_eq!(out, LoginOutcome::Locked);
        assert_eq!(session.state(), AuthState::Locked);

        let a = get_account(&conn, "admin").unwrap().unwrap();
        assert!(a.summary.is_locked);
        assert_eq!(a.summary.failed_attempts, 3);
        assert!(a.summary.locked_at.is_some());

        let out = login(&conn, &cfg, &mut session, "admin", "admin123", t0()).unwrap();
        assert_eq!(out, LoginOutcome::StillLocked);
        assert_eq!(session.current_user(), None);

        let k = kinds(&conn);
        assert_eq!(k.iter().filter(|k| *k == "LOGIN_FAILED").count(), 3);
        assert_eq!(k.iter().filter(|k| *k == "ACCOUNT_LOCKED").count(), 1);
        assert_eq!(k.last().map(String::as_str), Some("LOGIN_BLOCKED"));
    }

    #[test]
    fn unknown_user_is_rejected_without_creating_rows() {
        let (conn, _) = setup();
        let cfg = SecurityConfig::default();
        let mut session = Session::new();
        for _ in 0..4 {
            let out = login(&conn, &cfg, &mut session, "ghost", "x", t0()).unwrap();
            assert_eq!(out, LoginOutcome::Rejected);
        }
        assert_eq!(session.failed_attempts(), 4);
        assert!(get_account(&conn, "ghost").unwrap().is_none());
    }

    #[test]
    fn reset_with_recovery_code_clears_lock() {
        let (conn, code) = setup();
        let cfg = SecurityConfig::default();
        let mut session = Session::new();
        for _ in 0..3 {
            login(&conn, &cfg, &mut session, "admin", "wrong", t0()).unwrap();
        }
        assert_eq!(session.state(), AuthState::Locked);

        let out =
            reset_password(&conn, &cfg, &mut session, "admin", &code, "s3cret", t0()).unwrap();
        assert_eq!(out, ResetOutcome::Reset);
        assert_eq!(session.state(), AuthState::LoggedOut);

        let a = get_account(&conn, "admin").unwrap().unwrap();
        assert!(!a.summary.is_locked);
        assert_eq!(a.summary.failed_attempts, 0);
        assert!(a.summary.locked_at.is_none());

        let out = login(&conn, &cfg, &mut session, "admin", "s3cret", t0()).unwrap();
        assert_eq!(out, LoginOutcome::Success);
    }

    #[test]
    fn reset_rejects_short_password_without_mutation() {
        let (conn, code) = setup();
        let cfg = SecurityConfig::default();
        let mut session = Session::new();
        let before = get_account(&conn, "admin").unwrap().unwrap();
        let out = reset_password(&conn, &cfg, &mut session, "admin", &code, "abc", t0()).unwrap();
        assert_eq!(out, ResetOutcome::PasswordTooShort { min: 4 });
        assert_eq!(get_account(&conn, "admin").unwrap().unwrap(), before);
    }

    #[test]
    fn wrong_recovery_code_advances_lockout() {
        let (conn, _) = setup();
        let cfg = SecurityConfig::default();
        let mut session = Session::new();
        let r1 = reset_password(&conn, &cfg, &mut session, "admin", "BAD", "newpass", t0()).unwrap();
        let r2 = reset_password(&conn, &cfg, &mut session, "admin", "BAD", "newpass", t0()).unwrap();
        let r3 = reset_password(&conn, &cfg, &mut session, "admin", "BAD", "newpass", t0()).unwrap();
        assert_eq!((r1, r2, r3), (ResetOutcome::Rejected, ResetOutcome::Rejected, ResetOutcome::Locked));
        assert!(get_account(&conn, "admin").unwrap().unwrap().summary.is_locked);
    }

    #[test]
    fn rotated_code_replaces_previous() {
        let (conn, old) = setup();
        let cfg = SecurityConfig::default();
        let mut session = Session::new();
        let new = rotate_recovery_code(&conn, "admin", t0()).unwrap().unwrap();
        assert_ne!(old, new);
        let out = reset_password(&conn, &cfg, &mut session, "admin", &old, "pass1", t0()).unwrap();
        assert_eq!(out, ResetOutcome::Rejected);
        let out = reset_password(&conn, &cfg, &mut session, "admin", &new, "pass1", t0()).unwrap();
        assert_eq!(out, ResetOutcome::Reset);
    }

    #[test]
    fn admin_unlock_clears_state() {
        let (conn, _) = setup();
        let cfg = SecurityConfig {
            max_failed_attempts: 1,
            ..SecurityConfig::default()
        };
        let mut session = Session::new();
        assert_eq!(
            login(&conn, &cfg, &mut session, "admin", "wrong", t0()).unwrap(),
            LoginOutcome::Locked
        );
        assert!(unlock_account(&conn, "registrar", "admin", t0()).unwrap());
        assert!(!unlock_account(&conn, "registrar", "nobody", t0()).unwrap());
        let a = get_account(&conn, "admin").unwrap().unwrap();
        assert!(!a.summary.is_locked);
        assert_eq!(a.summary.failed_attempts, 0);
    }

    #[test]
    fn logout_only_from_logged_in() {
        let (conn, _) = setup();
        let cfg = SecurityConfig::default();
        let mut session = Session::new();
        assert_eq!(logout(&conn, &mut session, t0()), None);
        login(&conn, &cfg, &mut session, "admin", "admin123", t0()).unwrap();
        assert_eq!(logout(&conn, &mut session, t0()).as_deref(), Some("admin"));
        assert_eq!(session.state(), AuthState::LoggedOut);
        assert_eq!(kinds(&conn).last().map(String::as_str), Some("LOGOUT"));
    }

    #[test]
    fn event_log_failure_does_not_abort_login() {
        let (conn, _) = setup();
        conn.execute("DROP TABLE security_events", []).unwrap();
        let cfg = SecurityConfig::default();
        let mut session = Session::new();
        let out = login(&conn, &cfg, &mut session, "admin", "admin123", t0()).unwrap();
        assert_eq!(out, LoginOutcome::Success);
    }

    #[test]
    fn events_filter_by_kind_and_range_then_age_out() {
        let (conn, _) = setup();
        let day = Duration::days(1);
        record_event(&conn, EventKind::LoginFailed, "a", Some("admin"), t0() + day);
        record_event(&conn, EventKind::LoginFailed, "b", Some("admin"), t0() + day * 5);
        record_event(&conn, EventKind::Logout, "c", Some("admin"), t0() + day * 5);

        let failed = query_events(&conn, Some(EventKind::LoginFailed), None, None).unwrap();
        assert_eq!(failed.len(), 2);
        let ranged = query_events(
            &conn,
            Some(EventKind::LoginFailed),
            Some(t0() + day * 2),
            Some(t0() + day * 6),
        )
        .unwrap();
        assert_eq!(ranged.len(), 1);
        assert_eq!(ranged[0].description, "b");

        let cfg = SecurityConfig {
            event_retention_days: 30,
            ..SecurityConfig::default()
        };
        // Admin creation at t0 and the first failure fall outside the window.
        let removed = purge_expired_events(&conn, &cfg, t0() + day * 33).unwrap();
        assert_eq!(removed, 2);
        let remaining = kinds(&conn);
        assert_eq!(remaining, vec!["LOGIN_FAILED", "LOGOUT", "EVENTS_PURGED"]);
    }

    #[test]
    fn config_roundtrips_through_settings() {
        let (conn, _) = setup();
        assert_eq!(SecurityConfig::load(&conn).unwrap(), SecurityConfig::default());
        let cfg = SecurityConfig {
            max_failed_attempts: 5,
            min_password_length: 8,
            event_retention_days: 30,
        };
        cfg.validate().unwrap();
        cfg.save(&conn).unwrap();
        assert_eq!(SecurityConfig::load(&conn).unwrap(), cfg);
        assert!(SecurityConfig {
            max_failed_attempts: 0,
            ..cfg
        }
        .validate()
        .is_err());
    }

    #[test]
    fn listed_accounts_match_the_stored_summary() {
        let (conn, _) = setup();
        let mut session = Session::new();
        let cfg = SecurityConfig::default();
        login(&conn, &cfg, &mut session, "admin", "wrong", t0()).unwrap();

        let listed = list_accounts(&conn).unwrap();
        let stored = get_account(&conn, "admin").unwrap().unwrap();
        assert_eq!(listed, vec![stored.summary]);
        assert_eq!(listed[0].failed_attempts, 1);
    }

    #[test]
    fn event_kinds_parse_back() {
        for k in EventKind::ALL {
            assert_eq!(EventKind::parse(k.as_str()), Some(k));
        }
        assert_eq!(EventKind::parse("SETTINGS_CHANGED"), Some(EventKind::SettingsChanged));
        assert_eq!(EventKind::parse("nope"), None);
    }
}
