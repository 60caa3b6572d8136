use crate::ipc::error::ok;
use crate::ipc::handlers::setup::{import_options, portal_settings};
use crate::ipc::helpers::{
    get_optional_str, get_required_object, get_required_str, require_db, require_role,
    require_session, write_text_file, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::roster::{self, ExportError, ImportRejected};
use crate::session::Role;
use crate::store::{RecordStore, SqliteStore};
use crate::students::{missing_required_fields, sanitize_fields};
use serde_json::{json, Map, Value};
use std::path::PathBuf;

fn validation_failed(missing: &[&str]) -> HandlerErr {
    HandlerErr::new(
        "validation_failed",
        format!("missing required student fields: {}", missing.join(", ")),
    )
    .with_details(json!({ "missing": missing }))
}

fn not_found(student_id: &str) -> HandlerErr {
    HandlerErr::new("not_found", format!("student not found: {}", student_id))
}

fn list(state: &AppState) -> Result<Value, HandlerErr> {
    require_session(state)?;
    let conn = require_db(state)?;
    let ns = portal_settings(conn)?.namespace;
    let docs = SqliteStore::new(conn).list(&ns.students())?;
    Ok(json!({
        "students": docs.iter().map(|d| d.to_json()).collect::<Vec<_>>()
    }))
}

fn get(state: &AppState, req: &Request) -> Result<Value, HandlerErr> {
    require_session(state)?;
    let student_id = get_required_str(&req.params, "studentId")?;
    let conn = require_db(state)?;
    let ns = portal_settings(conn)?.namespace;
    let doc = SqliteStore::new(conn)
        .get(&ns.students(), &student_id)?
        .ok_or_else(|| not_found(&student_id))?;
    Ok(json!({ "student": doc.to_json() }))
}

fn create(state: &AppState, req: &Request) -> Result<Value, HandlerErr> {
    require_role(state, &[Role::Admin])?;
    let fields = sanitize_fields(get_required_object(&req.params, "student")?);
    let missing = missing_required_fields(&fields);
    if !missing.is_empty() {
        return Err(validation_failed(&missing));
    }
    let conn = require_db(state)?;
    let ns = portal_settings(conn)?.namespace;
    let student_id = SqliteStore::new(conn).add(&ns.students(), &fields)?;
    tracing::info!(%student_id, "student added");
    Ok(json!({ "studentId": student_id }))
}

fn update(state: &AppState, req: &Request) -> Result<Value, HandlerErr> {
    require_role(state, &[Role::Admin])?;
    let student_id = get_required_str(&req.params, "studentId")?;
    let patch = sanitize_fields(get_required_object(&req.params, "patch")?);
    let conn = require_db(state)?;
    let ns = portal_settings(conn)?.namespace;
    let store = SqliteStore::new(conn);
    let collection = ns.students();

    let existing = store
        .get(&collection, &student_id)?
        .ok_or_else(|| not_found(&student_id))?;
    let mut merged: Map<String, Value> = existing.data;
    for (k, v) in &patch {
        merged.insert(k.clone(), v.clone());
    }
    let missing = missing_required_fields(&merged);
    if !missing.is_empty() {
        return Err(validation_failed(&missing));
    }
    store.merge(&collection, &student_id, &patch)?;
    tracing::info!(%student_id, "student updated");
    Ok(json!({ "ok": true }))
}

fn delete(state: &AppState, req: &Request) -> Result<Value, HandlerErr> {
    require_role(state, &[Role::Admin])?;
    let student_id = get_required_str(&req.params, "studentId")?;
    let conn = require_db(state)?;
    let ns = portal_settings(conn)?.namespace;
    if !SqliteStore::new(conn).delete(&ns.students(), &student_id)? {
        return Err(not_found(&student_id));
    }
    tracing::info!(%student_id, "student deleted");
    Ok(json!({ "ok": true }))
}

fn import_csv(state: &AppState, req: &Request) -> Result<Value, HandlerErr> {
    require_role(state, &[Role::Admin])?;
    let text = match (
        req.params.get("csvText").and_then(|v| v.as_str()),
        get_optional_str(&req.params, "inPath"),
    ) {
        (Some(text), _) => text.to_string(),
        (None, Some(path)) => std::fs::read_to_string(&path).map_err(|e| {
            HandlerErr::new("parse_failed", e.to_string()).with_details(json!({ "path": path }))
        })?,
        (None, None) => {
            return Err(HandlerErr::new(
                "bad_params",
                "Please select a CSV file to upload (csvText or inPath).",
            ))
        }
    };
    let conn = require_db(state)?;
    let ns = portal_settings(conn)?.namespace;
    let opts = import_options(conn)?;
    let store = SqliteStore::new(conn);

    let report = match roster::import_students_csv(&store, &ns, &text, opts) {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!("student import rejected: {}", e);
            let he = HandlerErr::new("import_rejected", e.to_string());
            return Err(match &e {
                ImportRejected::MissingHeaders(missing) => {
                    he.with_details(json!({ "missingHeaders": missing }))
                }
                ImportRejected::DuplicateHeaders(duplicates) => {
                    he.with_details(json!({ "duplicateHeaders": duplicates }))
                }
                _ => he,
            });
        }
    };

    let mut result = serde_json::to_value(&report)
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    result["summary"] = Value::String(report.summary());
    result["refreshStudents"] = Value::Bool(true);
    Ok(result)
}

fn export_csv(state: &AppState, req: &Request) -> Result<Value, HandlerErr> {
    require_role(state, &[Role::Admin])?;
    let conn = require_db(state)?;
    let settings = portal_settings(conn)?;
    let store = SqliteStore::new(conn);
    let export = roster::export_students_csv(&store, &settings.namespace).map_err(|e| match e {
        ExportError::Store(se) => HandlerErr::from(se),
        ExportError::Csv(ce) => HandlerErr::new("export_failed", ce.to_string()),
    })?;
    let file_name = roster::export_file_name(&settings.institution_name);

    let out_path = get_optional_str(&req.params, "outPath")
        .map(PathBuf::from)
        .or_else(|| get_optional_str(&req.params, "outDir").map(|d| PathBuf::from(d).join(&file_name)));
    match out_path {
        Some(path) => {
            write_text_file(&path, &export.csv)?;
            Ok(json!({
                "rowsExported": export.rows,
                "fileName": file_name,
                "path": path.to_string_lossy()
            }))
        }
        None => Ok(json!({
            "rowsExported": export.rows,
            "fileName": file_name,
            "csv": export.csv
        })),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "students.list" => list(state),
        "students.get" => get(state, req),
        "students.create" => create(state, req),
        "students.update" => update(state, req),
        "students.delete" => delete(state, req),
        "students.importCsv" => import_csv(state, req),
        "students.exportCsv" => export_csv(state, req),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
