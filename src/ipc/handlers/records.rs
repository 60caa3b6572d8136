use crate::ipc::error::ok;
use crate::ipc::handlers::setup::portal_settings;
use crate::ipc::helpers::{
    get_required_object, require_db, require_role, require_session, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::session::{now_rfc3339, Role};
use crate::store::{RecordStore, SqliteStore};
use serde_json::{json, Map, Value};

#[derive(Clone, Copy)]
enum RecordKind {
    Teacher,
    Course,
    Announcement,
}

impl RecordKind {
    fn collection(self) -> &'static str {
        match self {
            Self::Teacher => "teachers",
            Self::Course => "courses",
            Self::Announcement => "announcements",
        }
    }

    /// Params key carrying the new record on `*.create`.
    fn param_key(self) -> &'static str {
        match self {
            Self::Teacher => "teacher",
            Self::Course => "course",
            Self::Announcement => "announcement",
        }
    }

    fn required_fields(self) -> &'static [&'static str] {
        match self {
            Self::Teacher => &["firstName", "lastName", "email"],
            Self::Course => &["title"],
            Self::Announcement => &["title", "body"],
        }
    }

    fn creators(self) -> &'static [Role] {
        match self {
            Self::Teacher | Self::Course => &[Role::Admin],
            Self::Announcement => &[Role::Admin, Role::Teacher],
        }
    }
}

fn list(state: &AppState, kind: RecordKind) -> Result<Value, HandlerErr> {
    require_session(state)?;
    let conn = require_db(state)?;
    let ns = portal_settings(conn)?.namespace;
    let docs = SqliteStore::new(conn).list(&ns.public(kind.collection()))?;
    let mut out = Map::new();
    out.insert(
        kind.collection().to_string(),
        Value::Array(docs.iter().map(|d| d.to_json()).collect()),
    );
    Ok(Value::Object(out))
}

fn create(state: &AppState, req: &Request, kind: RecordKind) -> Result<Value, HandlerErr> {
    let session = require_role(state, kind.creators())?;
    let input = get_required_object(&req.params, kind.param_key())?;

    let mut data = Map::new();
    for (k, v) in input {
        if k == "id" || k == "createdAt" || k == "createdBy" {
            continue;
        }
        let v = match v {
            Value::String(s) => Value::String(s.trim().to_string()),
            other => other.clone(),
        };
        data.insert(k.clone(), v);
    }
    let missing: Vec<&str> = kind
        .required_fields()
        .iter()
        .copied()
        .filter(|f| {
            data.get(*f)
                .and_then(|v| v.as_str())
                .map_or(true, str::is_empty)
        })
        .collect();
    if !missing.is_empty() {
        return Err(HandlerErr::new(
            "validation_failed",
            format!(
                "missing required {} fields: {}",
                kind.param_key(),
                missing.join(", ")
            ),
        )
        .with_details(json!({ "missing": missing })));
    }
    data.insert("createdAt".into(), Value::String(now_rfc3339()));
    data.insert("createdBy".into(), Value::String(session.user_id.clone()));

    let conn = require_db(state)?;
    let ns = portal_settings(conn)?.namespace;
    let id = SqliteStore::new(conn).add(&ns.public(kind.collection()), &data)?;
    tracing::info!(collection = kind.collection(), %id, "record created");
    Ok(json!({ "id": id }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "teachers.list" => list(state, RecordKind::Teacher),
        "teachers.create" => create(state, req, RecordKind::Teacher),
        "courses.list" => list(state, RecordKind::Course),
        "courses.create" => create(state, req, RecordKind::Course),
        "announcements.list" => list(state, RecordKind::Announcement),
        "announcements.create" => create(state, req, RecordKind::Announcement),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
