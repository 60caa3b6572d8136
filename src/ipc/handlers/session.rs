use crate::ipc::error::ok;
use crate::ipc::handlers::setup::portal_settings;
use crate::ipc::helpers::{
    get_optional_str, get_required_str, require_db, require_role, require_session, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::session::{self, normalize_email, Identity, Role};
use crate::store::{RecordStore, SqliteStore, PROFILE_DOC_ID};
use serde_json::{json, Value};

fn parse_role(params: &Value, key: &str) -> Result<Role, HandlerErr> {
    let raw = get_required_str(params, key)?;
    Role::parse(&raw).ok_or_else(|| {
        HandlerErr::new(
            "bad_params",
            format!("{} must be one of: admin, teacher, parent, student", key),
        )
    })
}

fn sign_in(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let identity = Identity {
        user_id: get_required_str(&req.params, "userId")?,
        email: get_optional_str(&req.params, "email"),
        display_name: get_optional_str(&req.params, "displayName"),
    };
    let conn = require_db(state)?;
    let settings = portal_settings(conn)?;
    let store = SqliteStore::new(conn);
    let ctx = session::sign_in(
        &store,
        &settings.namespace,
        &identity,
        &settings.bootstrap_admin_emails,
    )?;
    let result = json!({ "session": ctx });
    state.session = Some(ctx);
    Ok(result)
}

fn sign_out(state: &mut AppState) -> Value {
    if let Some(s) = state.session.take() {
        tracing::info!(user_id = %s.user_id, "signed out");
    }
    json!({ "ok": true })
}

fn open_portal(state: &AppState, req: &Request) -> Result<Value, HandlerErr> {
    let portal = parse_role(&req.params, "portal")?;
    let session = require_session(state)?;
    if !session.role.can_open(portal) {
        tracing::warn!(
            user_id = %session.user_id,
            role = session.role.as_str(),
            portal = portal.as_str(),
            "portal access denied"
        );
        return Err(HandlerErr::new(
            "access_denied",
            "You do not have permission to access this portal.",
        ));
    }
    Ok(json!({ "portal": portal, "allowed": true }))
}

fn set_role(state: &AppState, req: &Request) -> Result<Value, HandlerErr> {
    require_role(state, &[Role::Admin])?;
    let user_id = get_required_str(&req.params, "userId")?;
    let role = parse_role(&req.params, "role")?;
    let conn = require_db(state)?;
    let settings = portal_settings(conn)?;
    let store = SqliteStore::new(conn);
    session::set_role(&store, &settings.namespace, &user_id, role)?;
    tracing::info!(%user_id, role = role.as_str(), "role updated");
    Ok(json!({ "userId": user_id, "role": role }))
}

fn get_parent(state: &AppState, req: &Request) -> Result<Value, HandlerErr> {
    require_role(state, &[Role::Admin])?;
    let email = get_required_str(&req.params, "email")?;
    let conn = require_db(state)?;
    let settings = portal_settings(conn)?;
    let store = SqliteStore::new(conn);
    let collection = settings.namespace.user_profile(&normalize_email(&email))?;
    let parent = store.get(&collection, PROFILE_DOC_ID)?;
    Ok(json!({ "parent": parent.map(|d| d.data) }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "session.signIn" => sign_in(state, req),
        "session.signOut" => Ok(sign_out(state)),
        "session.current" => Ok(json!({ "session": state.session })),
        "portal.open" => open_portal(state, req),
        "users.setRole" => set_role(state, req),
        "parents.get" => get_parent(state, req),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
