use crate::ipc::error::err;
use crate::ipc::types::AppState;
use crate::session::{Role, SessionContext};
use crate::store::StoreError;
use rusqlite::Connection;
use serde_json::{json, Map, Value};
use std::path::Path;

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn response(self, id: &str) -> Value {
        err(id, self.code, self.message, self.details)
    }
}

impl From<StoreError> for HandlerErr {
    fn from(e: StoreError) -> Self {
        let code = match &e {
            StoreError::NotFound { .. } => "not_found",
            StoreError::InvalidPath(_) => "bad_params",
            StoreError::Sqlite(_) | StoreError::Json(_) => "db_query_failed",
        };
        tracing::warn!(code, "store error: {}", e);
        HandlerErr::new(code, e.to_string())
    }
}

pub fn get_required_str(params: &Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HandlerErr::new("bad_params", format!("missing {}", key)))
}

pub fn get_optional_str(params: &Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub fn get_required_object<'a>(
    params: &'a Value,
    key: &str,
) -> Result<&'a Map<String, Value>, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_object())
        .ok_or_else(|| HandlerErr::new("bad_params", format!("{} must be an object", key)))
}

pub fn require_db(state: &AppState) -> Result<&Connection, HandlerErr> {
    state
        .db
        .as_ref()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

pub fn require_session(state: &AppState) -> Result<&SessionContext, HandlerErr> {
    state
        .session
        .as_ref()
        .ok_or_else(|| HandlerErr::new("not_signed_in", "sign in first"))
}

/// Signed-in user whose role is one of `allowed`.
pub fn require_role<'a>(
    state: &'a AppState,
    allowed: &[Role],
) -> Result<&'a SessionContext, HandlerErr> {
    let session = require_session(state)?;
    if allowed.contains(&session.role) {
        Ok(session)
    } else {
        tracing::warn!(
            user_id = %session.user_id,
            role = session.role.as_str(),
            "access denied"
        );
        Err(HandlerErr::new(
            "access_denied",
            format!("role {} may not do this", session.role.as_str()),
        ))
    }
}

pub fn write_text_file(path: &Path, contents: &str) -> Result<(), HandlerErr> {
    let fail = |e: std::io::Error| {
        HandlerErr::new("export_failed", e.to_string())
            .with_details(json!({ "path": path.to_string_lossy() }))
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(fail)?;
    }
    std::fs::write(path, contents).map_err(fail)?;
    Ok(())
}
