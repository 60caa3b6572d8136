use crate::store::{Namespace, RecordStore, StoreResult, PROFILE_DOC_ID};
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Teacher,
    Parent,
    Student,
}

impl Role {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Some(Self::Admin),
            "teacher" => Some(Self::Teacher),
            "parent" => Some(Self::Parent),
            "student" => Some(Self::Student),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Teacher => "teacher",
            Self::Parent => "parent",
            Self::Student => "student",
        }
    }

    /// Admins open every portal; everyone else only their own.
    pub fn can_open(self, portal: Role) -> bool {
        self == Role::Admin || self == portal
    }
}

/// Identity handed over by the external session provider.
#[derive(Debug, Clone)]
pub struct Identity {
    pub user_id: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
}

/// The signed-in user. Lives from `session.signIn` until `session.signOut`
/// or a workspace switch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionContext {
    pub user_id: String,
    pub email: Option<String>,
    pub display_name: String,
    pub role: Role,
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}

pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

fn profile_role(profile: &Map<String, Value>) -> Role {
    profile
        .get("role")
        .and_then(|v| v.as_str())
        .and_then(Role::parse)
        .unwrap_or(Role::Student)
}

/// Resolves the profile for `identity`, creating it on first sign-in.
pub fn sign_in<S: RecordStore + ?Sized>(
    store: &S,
    ns: &Namespace,
    identity: &Identity,
    bootstrap_admins: &[String],
) -> StoreResult<SessionContext> {
    let collection = ns.user_profile(&identity.user_id)?;
    let fallback_name = identity
        .display_name
        .clone()
        .or_else(|| identity.email.clone())
        .unwrap_or_else(|| "Authenticated User".to_string());

    if let Some(doc) = store.get(&collection, PROFILE_DOC_ID)? {
        let role = profile_role(&doc.data);
        tracing::info!(user_id = %identity.user_id, role = role.as_str(), "existing profile");
        let display_name = doc
            .str_field("displayName")
            .map(str::to_string)
            .unwrap_or(fallback_name);
        return Ok(SessionContext {
            user_id: identity.user_id.clone(),
            email: identity
                .email
                .clone()
                .or_else(|| doc.str_field("email").map(str::to_string)),
            display_name,
            role,
        });
    }

    let is_bootstrap_admin = identity
        .email
        .as_deref()
        .map(normalize_email)
        .map(|e| bootstrap_admins.iter().any(|a| normalize_email(a) == e))
        .unwrap_or(false);
    let role = if is_bootstrap_admin {
        Role::Admin
    } else {
        Role::Student
    };
    let profile = json!({
        "email": identity.email,
        "displayName": fallback_name,
        "role": role.as_str(),
        "createdAt": now_rfc3339(),
    });
    if let Value::Object(map) = &profile {
        store.set(&collection, PROFILE_DOC_ID, map)?;
    }
    tracing::info!(user_id = %identity.user_id, role = role.as_str(), "created profile");

    Ok(SessionContext {
        user_id: identity.user_id.clone(),
        email: identity.email.clone(),
        display_name: fallback_name,
        role,
    })
}

pub fn set_role<S: RecordStore + ?Sized>(
    store: &S,
    ns: &Namespace,
    user_id: &str,
    role: Role,
) -> StoreResult<()> {
    let collection = ns.user_profile(user_id)?;
    let mut patch = Map::new();
    patch.insert("role".to_string(), Value::String(role.as_str().to_string()));
    store.merge(&collection, PROFILE_DOC_ID, &patch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::store::{SqliteStore, StoreError};

    fn identity(uid: &str, email: &str) -> Identity {
        Identity {
            user_id: uid.to_string(),
            email: Some(email.to_string()),
            display_name: None,
        }
    }

    #[test]
    fn first_sign_in_creates_student_profile() {
        let conn = db::open_in_memory().expect("db");
        let store = SqliteStore::new(&conn);
        let ns = Namespace::new("t").expect("ns");

        let s = sign_in(&store, &ns, &identity("u1", "kid@example.com"), &[]).expect("sign in");
        assert_eq!(s.role, Role::Student);
        assert_eq!(s.display_name, "kid@example.com");

        let doc = store
            .get(&ns.user_profile("u1").expect("path"), PROFILE_DOC_ID)
            .expect("get")
            .expect("profile");
        assert_eq!(doc.str_field("role"), Some("student"));
        assert!(doc.str_field("createdAt").is_some());
    }

    #[test]
    fn bootstrap_email_becomes_admin_and_role_sticks() {
        let conn = db::open_in_memory().expect("db");
        let store = SqliteStore::new(&conn);
        let ns = Namespace::new("t").expect("ns");
        let admins = vec!["Head@Example.com".to_string()];

        let s = sign_in(&store, &ns, &identity("u1", "head@example.com"), &admins).expect("sign in");
        assert_eq!(s.role, Role::Admin);

        set_role(&store, &ns, "u1", Role::Teacher).expect("set role");
        let again = sign_in(&store, &ns, &identity("u1", "head@example.com"), &admins).expect("again");
        assert_eq!(again.role, Role::Teacher);
    }

    #[test]
    fn set_role_for_unknown_user_is_not_found() {
        let conn = db::open_in_memory().expect("db");
        let store = SqliteStore::new(&conn);
        let ns = Namespace::new("t").expect("ns");
        assert!(matches!(
            set_role(&store, &ns, "ghost", Role::Admin),
            Err(StoreError::NotFound { .. })
        ));
    }

    #[test]
    fn portal_access_rules() {
        assert!(Role::Admin.can_open(Role::Parent));
        assert!(Role::Teacher.can_open(Role::Teacher));
        assert!(!Role::Student.can_open(Role::Teacher));
        assert_eq!(Role::parse(" Parent "), Some(Role::Parent));
        assert_eq!(Role::parse("janitor"), None);
    }
}
