use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::HandlerErr;
use crate::ipc::types::{AppState, Request};
use crate::roster::ImportOptions;
use crate::store::Namespace;
use serde_json::{json, Map, Value};

#[derive(Clone, Copy)]
enum SetupSection {
    Portal,
    Roster,
}

impl SetupSection {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "portal" => Some(Self::Portal),
            "roster" => Some(Self::Roster),
            _ => None,
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Portal => "setup.portal",
            Self::Roster => "setup.roster",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Portal => json!({
            "appId": "school-portal",
            "institutionName": "School",
            "bootstrapAdminEmails": []
        }),
        SetupSection::Roster => json!({
            "linkParents": true
        }),
    }
}

fn as_object_mut(value: &mut Value) -> Result<&mut Map<String, Value>, String> {
    value
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())
}

fn parse_bool(v: &Value, key: &str) -> Result<bool, String> {
    v.as_bool().ok_or_else(|| format!("{} must be boolean", key))
}

fn parse_string_max(v: &Value, key: &str, max_len: usize) -> Result<String, String> {
    let s = v.as_str().ok_or_else(|| format!("{} must be string", key))?;
    let s = s.trim();
    if s.len() > max_len {
        return Err(format!("{} length must be <= {}", key, max_len));
    }
    Ok(s.to_string())
}

fn parse_email_list(v: &Value, key: &str) -> Result<Vec<Value>, String> {
    let items = v
        .as_array()
        .ok_or_else(|| format!("{} must be an array of strings", key))?;
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        let s = parse_string_max(item, key, 254)?;
        if !s.contains('@') {
            return Err(format!("{} entries must be email addresses", key));
        }
        out.push(Value::String(s.to_ascii_lowercase()));
    }
    Ok(out)
}

fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = as_object_mut(current)?;
    for (k, v) in patch {
        match section {
            SetupSection::Portal => match k.as_str() {
                "appId" => {
                    let s = parse_string_max(v, k, 64)?;
                    Namespace::new(&s).map_err(|_| {
                        "appId must be non-empty and must not contain '/'".to_string()
                    })?;
                    obj.insert(k.clone(), Value::String(s));
                }
                "institutionName" => {
                    obj.insert(k.clone(), Value::String(parse_string_max(v, k, 120)?));
                }
                "bootstrapAdminEmails" => {
                    obj.insert(k.clone(), Value::Array(parse_email_list(v, k)?));
                }
                _ => return Err(format!("unknown portal field: {}", k)),
            },
            SetupSection::Roster => match k.as_str() {
                "linkParents" => {
                    obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
                }
                _ => return Err(format!("unknown roster field: {}", k)),
            },
        }
    }
    Ok(())
}

fn load_section(conn: &rusqlite::Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Malformed stored values fall back to defaults field by field.
            let _ = merge_section_patch(section, &mut current, saved_obj);
        }
    }
    Ok(current)
}

pub struct PortalSettings {
    pub namespace: Namespace,
    pub institution_name: String,
    pub bootstrap_admin_emails: Vec<String>,
}

pub fn portal_settings(conn: &rusqlite::Connection) -> Result<PortalSettings, HandlerErr> {
    let section = load_section(conn, SetupSection::Portal)
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    let app_id = section
        .get("appId")
        .and_then(|v| v.as_str())
        .unwrap_or("school-portal");
    let namespace = Namespace::new(app_id)?;
    Ok(PortalSettings {
        namespace,
        institution_name: section
            .get("institutionName")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string(),
        bootstrap_admin_emails: section
            .get("bootstrapAdminEmails")
            .and_then(|v| v.as_array())
            .map(|a| {
                a.iter()
                    .filter_map(|e| e.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default(),
    })
}

pub fn import_options(conn: &rusqlite::Connection) -> Result<ImportOptions, HandlerErr> {
    let section = load_section(conn, SetupSection::Roster)
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    Ok(ImportOptions {
        link_parents: section
            .get("linkParents")
            .and_then(|v| v.as_bool())
            .unwrap_or(true),
    })
}

fn handle_setup_get(state: &mut AppState, req: &Request) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let portal = match load_section(conn, SetupSection::Portal) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let roster = match load_section(conn, SetupSection::Roster) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    ok(&req.id, json!({ "portal": portal, "roster": roster }))
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(section_raw) = req.params.get("section").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing section", None);
    };
    let Some(section) = SetupSection::parse(section_raw) else {
        return err(&req.id, "bad_params", "unknown section", None);
    };
    let Some(patch_obj) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let mut current = match load_section(conn, section) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Err(msg) = merge_section_patch(section, &mut current, patch_obj) {
        return err(&req.id, "bad_params", msg, None);
    }
    if let Err(e) = db::settings_set_json(conn, section.key(), &current) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    tracing::info!(section = section.key(), "setup updated");
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}
