use crate::ipc::error::{ok, ErrorKind, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, ErrorCode, OptionalExtension};
use serde_json::{Map, Value};
use std::ops::RangeInclusive;

pub fn respond(req: &Request, res: Result<Value, HandlerErr>) -> Value {
    match res {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    }
}

pub fn require_db(state: &AppState) -> Result<&Connection, HandlerErr> {
    open_conn(&state.db)
}

/// Field-level variant of `require_db` so callers can borrow the session mutably.
pub fn open_conn(db: &Option<Connection>) -> Result<&Connection, HandlerErr> {
    db.as_ref()
        .ok_or_else(|| HandlerErr::new(ErrorKind::Input, "no_workspace", "select a workspace first"))
}

/// Open workspace plus a signed-in user. Returns the connection and the username.
pub fn require_login(state: &AppState) -> Result<(&Connection, &str), HandlerErr> {
    let conn = require_db(state)?;
    let user = state
        .session
        .current_user()
        .ok_or_else(|| HandlerErr::security("not_authenticated", "log in first"))?;
    Ok((conn, user))
}

pub fn opt_str(params: &Value, key: &str) -> Result<Option<String>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => {
            let t = s.trim();
            if t.is_empty() {
                Ok(None)
            } else {
                Ok(Some(t.to_string()))
            }
        }
        Some(_) => Err(HandlerErr::bad_params(format!("{} must be a string", key))),
    }
}

pub fn get_str(params: &Value, key: &str) -> Result<String, HandlerErr> {
    opt_str(params, key)?.ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

/// Raw string without trimming, for secrets.
pub fn get_secret(params: &Value, key: &str) -> Result<String, HandlerErr> {
    match params.get(key).and_then(|v| v.as_str()) {
        Some(s) if !s.is_empty() => Ok(s.to_string()),
        _ => Err(HandlerErr::bad_params(format!("missing {}", key))),
    }
}

/// Integers may arrive as JSON numbers or as numeric strings from combo boxes.
pub fn opt_i64(params: &Value, key: &str) -> Result<Option<i64>, HandlerErr> {
    params.get(key).map_or(Ok(None), |v| int_value(v, key))
}

fn int_value(v: &Value, key: &str) -> Result<Option<i64>, HandlerErr> {
    match v {
        Value::Null => Ok(None),
        Value::Number(n) => n
            .as_i64()
            .map(Some)
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be an integer", key))),
        Value::String(s) if s.trim().is_empty() => Ok(None),
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map(Some)
            .map_err(|_| HandlerErr::bad_params(format!("{} must be an integer", key))),
        _ => Err(HandlerErr::bad_params(format!("{} must be an integer", key))),
    }
}

pub fn get_i64(params: &Value, key: &str) -> Result<i64, HandlerErr> {
    opt_i64(params, key)?.ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn get_positive_i64(params: &Value, key: &str) -> Result<i64, HandlerErr> {
    let n = get_i64(params, key)?;
    if n <= 0 {
        return Err(HandlerErr::bad_params(format!("{} must be > 0", key)));
    }
    Ok(n)
}

pub fn get_i64_in(
    params: &Value,
    key: &str,
    range: RangeInclusive<i64>,
) -> Result<i64, HandlerErr> {
    let n = get_i64(params, key)?;
    check_range(key, n, &range)?;
    Ok(n)
}

fn check_range(key: &str, n: i64, range: &RangeInclusive<i64>) -> Result<(), HandlerErr> {
    if !range.contains(&n) {
        return Err(HandlerErr::bad_params(format!(
            "{} must be in {}..={}",
            key,
            range.start(),
            range.end()
        ))
        .with_details(serde_json::json!({ key: n })));
    }
    Ok(())
}

pub fn opt_bool(params: &Value, key: &str) -> Result<Option<bool>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_bool()
            .map(Some)
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be boolean", key))),
    }
}

pub fn is_unique_violation(e: &rusqlite::Error) -> bool {
    match e {
        rusqlite::Error::SqliteFailure(f, _) => {
            f.code == ErrorCode::ConstraintViolation
                && (f.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                    || f.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE)
        }
        _ => false,
    }
}

pub fn exists(conn: &Connection, sql: &str, key: &str) -> Result<bool, HandlerErr> {
    let found: Option<i64> = conn.query_row(sql, [key], |r| r.get(0)).optional()?;
    Ok(found.is_some())
}

pub fn require_department(conn: &Connection, dept_id: &str) -> Result<(), HandlerErr> {
    if !exists(conn, "SELECT 1 FROM departments WHERE dept_id = ?", dept_id)? {
        return Err(HandlerErr::not_found("department not found")
            .with_details(serde_json::json!({ "department": dept_id })));
    }
    Ok(())
}

/// Collects `SET col = ?` fragments from a `patch` object. Absent keys are left alone.
pub struct Patch<'a> {
    obj: &'a Map<String, Value>,
    set_parts: Vec<String>,
    bind_values: Vec<SqlValue>,
}

impl<'a> Patch<'a> {
    pub fn from_params(params: &'a Value) -> Result<Self, HandlerErr> {
        let Some(obj) = params.get("patch").and_then(|v| v.as_object()) else {
            return Err(HandlerErr::bad_params("missing/invalid patch"));
        };
        Ok(Self {
            obj,
            set_parts: Vec::new(),
            bind_values: Vec::new(),
        })
    }

    pub fn get(&self, key: &str) -> Option<&'a Value> {
        self.obj.get(key)
    }

    pub fn set(&mut self, column: &str, value: SqlValue) {
        self.set_parts.push(format!("{} = ?", column));
        self.bind_values.push(value);
    }

    /// Non-empty text; null or blank is rejected.
    pub fn text(&mut self, key: &str, column: &str) -> Result<(), HandlerErr> {
        let Some(v) = self.get(key) else {
            return Ok(());
        };
        match v.as_str().map(str::trim) {
            Some(s) if !s.is_empty() => {
                self.set(column, SqlValue::Text(s.to_string()));
                Ok(())
            }
            Some(_) => Err(HandlerErr::bad_params(format!("{} must not be empty", key))),
            None => Err(HandlerErr::bad_params(format!("patch.{} must be a string", key))),
        }
    }

    /// Text or null; blank clears the column.
    pub fn nullable_text(&mut self, key: &str, column: &str) -> Result<(), HandlerErr> {
        let Some(v) = self.get(key) else {
            return Ok(());
        };
        let value = match v {
            Value::Null => SqlValue::Null,
            Value::String(s) if s.trim().is_empty() => SqlValue::Null,
            Value::String(s) => SqlValue::Text(s.trim().to_string()),
            _ => {
                return Err(HandlerErr::bad_params(format!(
                    "patch.{} must be a string or null",
                    key
                )))
            }
        };
        self.set(column, value);
        Ok(())
    }

    pub fn positive_int(&mut self, key: &str, column: &str) -> Result<Option<i64>, HandlerErr> {
        let Some(v) = self.get(key) else {
            return Ok(None);
        };
        let n = int_value(v, key)?
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must not be empty", key)))?;
        if n <= 0 {
            return Err(HandlerErr::bad_params(format!("{} must be > 0", key)));
        }
        self.set(column, SqlValue::Integer(n));
        Ok(Some(n))
    }

    pub fn int_in(
        &mut self,
        key: &str,
        column: &str,
        range: RangeInclusive<i64>,
    ) -> Result<(), HandlerErr> {
        let Some(v) = self.get(key) else {
            return Ok(());
        };
        let n = int_value(v, key)?
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must not be empty", key)))?;
        check_range(key, n, &range)?;
        self.set(column, SqlValue::Integer(n));
        Ok(())
    }

    pub fn nullable_int(&mut self, key: &str, column: &str) -> Result<(), HandlerErr> {
        let Some(v) = self.get(key) else {
            return Ok(());
        };
        let n = int_value(v, key)?;
        self.set(column, n.map(SqlValue::Integer).unwrap_or(SqlValue::Null));
        Ok(())
    }

    /// Runs the UPDATE and returns the number of rows touched.
    pub fn apply(
        self,
        conn: &Connection,
        table: &str,
        key_column: &str,
        key: SqlValue,
    ) -> Result<usize, rusqlite::Error> {
        if self.set_parts.is_empty() {
            return Ok(0);
        }
        let sql = format!(
            "UPDATE {} SET {} WHERE {} = ?",
            table,
            self.set_parts.join(", "),
            key_column
        );
        let mut binds = self.bind_values;
        binds.push(key);
        conn.execute(&sql, rusqlite::params_from_iter(binds))
    }
}

/// Maps a write failure onto `conflict` when a unique key was hit.
pub fn write_err(e: rusqlite::Error, what: &str) -> HandlerErr {
    if is_unique_violation(&e) {
        HandlerErr::conflict(format!("{} already exists", what))
    } else {
        HandlerErr::from(e)
    }
}
