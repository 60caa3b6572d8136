use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

pub const PROFILE_DOC_ID: &str = "userProfile";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("document not found: {collection}/{id}")]
    NotFound { collection: String, id: String },
    #[error("invalid store path: {0}")]
    InvalidPath(String),
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("document json: {0}")]
    Json(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub data: Map<String, Value>,
}

impl Document {
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(|v| v.as_str())
    }

    pub fn to_json(&self) -> Value {
        let mut obj = self.data.clone();
        obj.insert("id".to_string(), Value::String(self.id.clone()));
        Value::Object(obj)
    }
}

pub trait RecordStore {
    fn add(&self, collection: &str, data: &Map<String, Value>) -> StoreResult<String>;
    fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Document>>;
    fn set(&self, collection: &str, id: &str, data: &Map<String, Value>) -> StoreResult<()>;
    fn merge(&self, collection: &str, id: &str, patch: &Map<String, Value>) -> StoreResult<()>;
    fn delete(&self, collection: &str, id: &str) -> StoreResult<bool>;
    /// Documents whose `field`, compared as text, equals `value`. Oldest first.
    fn query_eq(&self, collection: &str, field: &str, value: &str) -> StoreResult<Vec<Document>>;
    fn list(&self, collection: &str) -> StoreResult<Vec<Document>>;
}

fn check_segment(segment: &str, whole: &str) -> StoreResult<()> {
    if segment.trim().is_empty() || segment.contains('/') {
        return Err(StoreError::InvalidPath(whole.to_string()));
    }
    Ok(())
}

fn check_collection(collection: &str) -> StoreResult<()> {
    if collection.is_empty() {
        return Err(StoreError::InvalidPath(collection.to_string()));
    }
    for segment in collection.split('/') {
        check_segment(segment, collection)?;
    }
    Ok(())
}

fn check_field(field: &str) -> StoreResult<()> {
    let valid = !field.is_empty()
        && field
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidPath(format!("field {}", field)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespace {
    app_id: String,
}

impl Namespace {
    pub fn new(app_id: &str) -> StoreResult<Self> {
        let app_id = app_id.trim();
        check_segment(app_id, app_id)?;
        Ok(Self {
            app_id: app_id.to_string(),
        })
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    pub fn public(&self, collection: &str) -> String {
        format!("artifacts/{}/public/data/{}", self.app_id, collection)
    }

    pub fn students(&self) -> String {
        self.public("students")
    }

    pub fn user_profile(&self, user_key: &str) -> StoreResult<String> {
        let path = format!("artifacts/{}/users/{}/profile/data", self.app_id, user_key);
        check_segment(user_key, &path)?;
        Ok(path)
    }
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

pub struct SqliteStore<'c> {
    conn: &'c Connection,
}

impl<'c> SqliteStore<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    fn read_data(raw: &str) -> StoreResult<Map<String, Value>> {
        match serde_json::from_str::<Value>(raw)? {
            Value::Object(map) => Ok(map),
            _ => Ok(Map::new()),
        }
    }

    fn collect_rows(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> StoreResult<Vec<Document>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt
            .query_map(params, |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter()
            .map(|(id, raw)| {
                Ok(Document {
                    id,
                    data: Self::read_data(&raw)?,
                })
            })
            .collect()
    }

    fn insert(&self, collection: &str, id: &str, data: &Map<String, Value>) -> StoreResult<()> {
        let now = now_rfc3339();
        self.conn.execute(
            "INSERT INTO documents(collection, id, data, seq, created_at, updated_at)
             VALUES(?1, ?2, ?3,
                    (SELECT COALESCE(MAX(seq), 0) + 1 FROM documents WHERE collection = ?1),
                    ?4, ?4)",
            (collection, id, serde_json::to_string(data)?, &now),
        )?;
        Ok(())
    }

    fn replace(&self, collection: &str, id: &str, data: &Map<String, Value>) -> StoreResult<usize> {
        let changed = self.conn.execute(
            "UPDATE documents SET data = ?, updated_at = ? WHERE collection = ? AND id = ?",
            (serde_json::to_string(data)?, now_rfc3339(), collection, id),
        )?;
        Ok(changed)
    }
}

impl RecordStore for SqliteStore<'_> {
    fn add(&self, collection: &str, data: &Map<String, Value>) -> StoreResult<String> {
        check_collection(collection)?;
        let id = Uuid::new_v4().to_string();
        self.insert(collection, &id, data)?;
        Ok(id)
    }

    fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Document>> {
        check_collection(collection)?;
        check_segment(id, id)?;
        let raw: Option<String> = self
            .conn
            .query_row(
                "SELECT data FROM documents WHERE collection = ? AND id = ?",
                (collection, id),
                |r| r.get(0),
            )
            .optional()?;
        match raw {
            Some(raw) => Ok(Some(Document {
                id: id.to_string(),
                data: Self::read_data(&raw)?,
            })),
            None => Ok(None),
        }
    }

    fn set(&self, collection: &str, id: &str, data: &Map<String, Value>) -> StoreResult<()> {
        check_collection(collection)?;
        check_segment(id, id)?;
        if self.replace(collection, id, data)? == 0 {
            self.insert(collection, id, data)?;
        }
        Ok(())
    }

    fn merge(&self, collection: &str, id: &str, patch: &Map<String, Value>) -> StoreResult<()> {
        let Some(mut doc) = self.get(collection, id)? else {
            return Err(StoreError::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            });
        };
        for (k, v) in patch {
            doc.data.insert(k.clone(), v.clone());
        }
        self.replace(collection, id, &doc.data)?;
        Ok(())
    }

    fn delete(&self, collection: &str, id: &str) -> StoreResult<bool> {
        check_collection(collection)?;
        check_segment(id, id)?;
        let n = self.conn.execute(
            "DELETE FROM documents WHERE collection = ? AND id = ?",
            (collection, id),
        )?;
        Ok(n > 0)
    }

    fn query_eq(&self, collection: &str, field: &str, value: &str) -> StoreResult<Vec<Document>> {
        check_collection(collection)?;
        check_field(field)?;
        self.collect_rows(
            "SELECT id, data FROM documents
             WHERE collection = ? AND CAST(json_extract(data, ?) AS TEXT) = ?
             ORDER BY seq",
            (collection, format!("$.{}", field), value),
        )
    }

    fn list(&self, collection: &str) -> StoreResult<Vec<Document>> {
        check_collection(collection)?;
        self.collect_rows(
            "SELECT id, data FROM documents WHERE collection = ? ORDER BY seq",
            [collection],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use serde_json::json;

    fn obj(v: Value) -> Map<String, Value> {
        v.as_object().cloned().expect("object")
    }

    #[test]
    fn namespace_paths_follow_artifacts_layout() {
        let ns = Namespace::new("academy").expect("namespace");
        assert_eq!(ns.students(), "artifacts/academy/public/data/students");
        assert_eq!(
            ns.user_profile("uid-1").expect("path"),
            "artifacts/academy/users/uid-1/profile/data"
        );
        assert!(ns.user_profile("a/b").is_err());
        assert!(Namespace::new(" ").is_err());
    }

    #[test]
    fn add_query_merge_delete() {
        let conn = db::open_in_memory().expect("db");
        let store = SqliteStore::new(&conn);
        let col = "artifacts/t/public/data/students";

        let a = store
            .add(col, &obj(json!({ "email": "a@example.com", "firstName": "A" })))
            .expect("add a");
        let b = store
            .add(col, &obj(json!({ "email": "b@example.com", "firstName": "B" })))
            .expect("add b");
        assert_ne!(a, b);

        let hits = store.query_eq(col, "email", "b@example.com").expect("query");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, b);

        store
            .merge(col, &a, &obj(json!({ "firstName": "Alex", "city": "Leeds" })))
            .expect("merge");
        let doc = store.get(col, &a).expect("get").expect("present");
        assert_eq!(doc.str_field("firstName"), Some("Alex"));
        assert_eq!(doc.str_field("email"), Some("a@example.com"));
        assert_eq!(doc.str_field("city"), Some("Leeds"));

        let listed = store.list(col).expect("list");
        assert_eq!(
            listed.iter().map(|d| d.id.clone()).collect::<Vec<_>>(),
            vec![a.clone(), b.clone()]
        );

        assert!(store.delete(col, &a).expect("delete"));
        assert!(!store.delete(col, &a).expect("delete again"));
        assert!(store.get(col, &a).expect("get").is_none());
    }

    #[test]
    fn merge_into_missing_document_is_not_found() {
        let conn = db::open_in_memory().expect("db");
        let store = SqliteStore::new(&conn);
        let err = store
            .merge("artifacts/t/public/data/students", "nope", &Map::new())
            .expect_err("missing");
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[test]
    fn set_keeps_creation_order_on_replace() {
        let conn = db::open_in_memory().expect("db");
        let store = SqliteStore::new(&conn);
        let col = "artifacts/t/users/u/profile/data";
        store.set(col, "first", &obj(json!({ "n": 1 }))).expect("set");
        store.set(col, "second", &obj(json!({ "n": 2 }))).expect("set");
        store.set(col, "first", &obj(json!({ "n": 3 }))).expect("replace");

        let listed = store.list(col).expect("list");
        assert_eq!(listed[0].id, "first");
        assert_eq!(listed[0].data["n"], 3);
        assert_eq!(listed[1].id, "second");
    }

    #[test]
    fn query_rejects_unsafe_field_names() {
        let conn = db::open_in_memory().expect("db");
        let store = SqliteStore::new(&conn);
        assert!(store
            .query_eq("artifacts/t/public/data/students", "email') OR 1=1 --", "x")
            .is_err());
    }
}
