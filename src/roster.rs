use crate::csv_io::{self, CsvRecord};
use crate::session::{normalize_email, now_rfc3339, Role};
use crate::store::{Namespace, RecordStore, StoreError, StoreResult, PROFILE_DOC_ID};
use crate::students::{
    self, FIELD_EMAIL, FIELD_STUDENT_ID, REQUIRED_HEADERS, REQUIRED_VALUE_HEADERS,
};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::fmt;
use thiserror::Error;

const HEADER_STUDENT_ID: &str = "StudentID";
const HEADER_EMAIL: &str = "Email";
const HEADER_PARENT_EMAIL: &str = "Parent1_Email";
const HEADER_PARENT_NAME: &str = "Parent1_Name";

#[derive(Debug, Error)]
pub enum ImportRejected {
    #[error("CSV file is empty.")]
    EmptyFile,
    #[error("Missing required CSV headers: {}.", .0.join(", "))]
    MissingHeaders(Vec<String>),
    #[error("Duplicate CSV headers: {}.", .0.join(", "))]
    DuplicateHeaders(Vec<String>),
    #[error("CSV file could not be read: {0}")]
    Unreadable(#[from] csv::Error),
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("csv write failed: {0}")]
    Csv(#[from] csv::Error),
}

#[derive(Debug, Clone, Copy)]
pub struct ImportOptions {
    pub link_parents: bool,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self { link_parents: true }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowError {
    pub row: u64,
    pub message: String,
}

impl fmt::Display for RowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Row {}: {}", self.row, self.message)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    pub rows_total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub created: usize,
    pub updated: usize,
    pub parents_created: usize,
    pub parents_linked: usize,
    pub errors: Vec<RowError>,
}

impl ImportReport {
    pub fn summary(&self) -> String {
        format!(
            "CSV upload complete. Success: {}, Failed: {}.",
            self.succeeded, self.failed
        )
    }

    fn fail(&mut self, row: u64, message: impl Into<String>) {
        let e = RowError {
            row,
            message: message.into(),
        };
        tracing::warn!(row = e.row, "student import row failed: {}", e.message);
        self.failed += 1;
        self.errors.push(e);
    }
}

#[derive(Debug, Clone)]
pub struct ImportRow {
    pub line: u64,
    pub values: Vec<(String, String)>,
}

impl ImportRow {
    pub fn value(&self, header: &str) -> &str {
        self.values
            .iter()
            .find(|(h, _)| h == header)
            .map(|(_, v)| v.as_str())
            .unwrap_or("")
    }

    pub fn to_fields(&self) -> Map<String, Value> {
        self.values
            .iter()
            .filter(|(h, _)| !h.is_empty())
            .map(|(h, v)| {
                (
                    students::field_for_header(h).to_string(),
                    Value::String(v.clone()),
                )
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParentLink {
    Created,
    Linked,
    AlreadyLinked,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upserted {
    pub student_id: String,
    pub created: bool,
}

pub fn check_headers(headers: &[String]) -> Result<(), ImportRejected> {
    let missing = REQUIRED_HEADERS
        .iter()
        .filter(|h| !headers.iter().any(|x| x == *h))
        .map(|h| h.to_string())
        .collect::<Vec<_>>();
    if !missing.is_empty() {
        return Err(ImportRejected::MissingHeaders(missing));
    }
    let mut duplicates: Vec<String> = Vec::new();
    for (i, h) in headers.iter().enumerate() {
        if !h.is_empty() && headers[..i].contains(h) && !duplicates.contains(h) {
            duplicates.push(h.clone());
        }
    }
    if !duplicates.is_empty() {
        return Err(ImportRejected::DuplicateHeaders(duplicates));
    }
    Ok(())
}

pub fn build_row(headers: &[String], record: &CsvRecord) -> Result<ImportRow, String> {
    if record.fields.len() != headers.len() {
        return Err(format!(
            "Mismatched column count (expected {}, found {}).",
            headers.len(),
            record.fields.len()
        ));
    }
    let row = ImportRow {
        line: record.line,
        values: headers
            .iter()
            .cloned()
            .zip(record.fields.iter().cloned())
            .collect(),
    };
    let missing = REQUIRED_VALUE_HEADERS
        .iter()
        .copied()
        .filter(|h| row.value(h).is_empty())
        .collect::<Vec<_>>();
    if !missing.is_empty() {
        return Err(format!(
            "Missing essential student data ({}).",
            missing.join(", ")
        ));
    }
    Ok(row)
}

/// Looks up an existing student by StudentID when given, else by email.
pub fn find_existing<S: RecordStore + ?Sized>(
    store: &S,
    ns: &Namespace,
    row: &ImportRow,
) -> StoreResult<Option<String>> {
    let (field, key) = match row.value(HEADER_STUDENT_ID) {
        "" => (FIELD_EMAIL, row.value(HEADER_EMAIL)),
        student_id => (FIELD_STUDENT_ID, student_id),
    };
    let hits = store.query_eq(&ns.students(), field, key)?;
    if hits.len() > 1 {
        tracing::warn!(
            field,
            key,
            matches = hits.len(),
            "several students share a natural key; updating the oldest"
        );
    }
    Ok(hits.into_iter().next().map(|d| d.id))
}

pub fn upsert_student<S: RecordStore + ?Sized>(
    store: &S,
    ns: &Namespace,
    row: &ImportRow,
) -> StoreResult<Upserted> {
    let fields = row.to_fields();
    let collection = ns.students();
    if let Some(student_id) = find_existing(store, ns, row)? {
        store.merge(&collection, &student_id, &fields)?;
        tracing::debug!(%student_id, "updated student from csv");
        return Ok(Upserted {
            student_id,
            created: false,
        });
    }
    let student_id = store.add(&collection, &fields)?;
    tracing::debug!(%student_id, "created student from csv");
    Ok(Upserted {
        student_id,
        created: true,
    })
}

/// Creates the parent profile for `parent_email` or adds `student_id` to its
/// children. Linking the same child twice is a no-op.
pub fn link_parent<S: RecordStore + ?Sized>(
    store: &S,
    ns: &Namespace,
    parent_email: &str,
    parent_name: Option<&str>,
    student_id: &str,
) -> StoreResult<ParentLink> {
    let key = normalize_email(parent_email);
    let collection = ns.user_profile(&key)?;

    let Some(existing) = store.get(&collection, PROFILE_DOC_ID)? else {
        let display_name = parent_name
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(parent_email.trim());
        let profile = json!({
            "email": parent_email.trim(),
            "displayName": display_name,
            "role": Role::Parent.as_str(),
            "createdAt": now_rfc3339(),
            "children": [student_id],
        });
        if let Value::Object(map) = &profile {
            store.set(&collection, PROFILE_DOC_ID, map)?;
        }
        tracing::info!(parent = %key, %student_id, "created parent profile");
        return Ok(ParentLink::Created);
    };

    let mut children = existing
        .data
        .get("children")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();
    if children.iter().any(|c| c.as_str() == Some(student_id)) {
        return Ok(ParentLink::AlreadyLinked);
    }
    children.push(Value::String(student_id.to_string()));
    let mut patch = Map::new();
    patch.insert("children".to_string(), Value::Array(children));
    store.merge(&collection, PROFILE_DOC_ID, &patch)?;
    tracing::info!(parent = %key, %student_id, "linked student to parent");
    Ok(ParentLink::Linked)
}

pub fn import_students_csv<S: RecordStore + ?Sized>(
    store: &S,
    ns: &Namespace,
    text: &str,
    opts: ImportOptions,
) -> Result<ImportReport, ImportRejected> {
    let records = csv_io::read_records(text)?;
    let Some((header, data)) = records.split_first() else {
        return Err(ImportRejected::EmptyFile);
    };
    let headers = header.fields.clone();
    check_headers(&headers)?;

    tracing::info!(rows = data.len(), app_id = ns.app_id(), "student import started");
    let mut report = ImportReport {
        rows_total: data.len(),
        ..ImportReport::default()
    };

    for record in data {
        let row = match build_row(&headers, record) {
            Ok(r) => r,
            Err(message) => {
                report.fail(record.line, message);
                continue;
            }
        };

        let upserted = match upsert_student(store, ns, &row) {
            Ok(u) => u,
            Err(e) => {
                report.fail(
                    row.line,
                    format!("Error processing {}: {}", row.value(HEADER_EMAIL), e),
                );
                continue;
            }
        };
        if !upserted.created {
            report.updated += 1;
            report.succeeded += 1;
            continue;
        }

        let parent_email = row.value(HEADER_PARENT_EMAIL);
        if opts.link_parents && !parent_email.is_empty() {
            let parent_name = Some(row.value(HEADER_PARENT_NAME));
            match link_parent(store, ns, parent_email, parent_name, &upserted.student_id) {
                Ok(ParentLink::Created) => report.parents_created += 1,
                Ok(ParentLink::Linked) => report.parents_linked += 1,
                Ok(ParentLink::AlreadyLinked) => {}
                Err(e) => {
                    report.fail(
                        row.line,
                        format!(
                            "Student created with ID {} but parent link for {} failed: {}",
                            upserted.student_id, parent_email, e
                        ),
                    );
                    continue;
                }
            }
        }
        report.created += 1;
        report.succeeded += 1;
    }

    tracing::info!(
        succeeded = report.succeeded,
        failed = report.failed,
        created = report.created,
        updated = report.updated,
        "student import finished"
    );
    Ok(report)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudentExport {
    pub csv: String,
    pub rows: usize,
}

pub fn export_students_csv<S: RecordStore + ?Sized>(
    store: &S,
    ns: &Namespace,
) -> Result<StudentExport, ExportError> {
    let docs = store.list(&ns.students())?;
    let rows = docs
        .iter()
        .map(|d| {
            students::STUDENT_COLUMNS
                .iter()
                .map(|(_, field)| students::cell_text(d.data.get(*field)))
                .collect::<Vec<_>>()
        })
        .collect::<Vec<_>>();
    let count = rows.len();
    let csv = csv_io::write_table(&students::export_headers(), rows)?;
    tracing::info!(rows = count, "students exported");
    Ok(StudentExport { csv, rows: count })
}

pub fn export_file_name(institution: &str) -> String {
    let mut slug = String::new();
    for ch in institution.trim().chars() {
        if ch.is_alphanumeric() {
            slug.extend(ch.to_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('_') {
            slug.push('_');
        }
    }
    let slug = slug.trim_end_matches('_');
    if slug.is_empty() {
        "students.csv".to_string()
    } else {
        format!("{}_students.csv", slug)
    }
}
