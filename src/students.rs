use serde_json::{Map, Value};

/// CSV header and stored field name for every known student column, in
/// export order.
pub const STUDENT_COLUMNS: [(&str, &str); 24] = [
    ("StudentID", "studentId"),
    ("FirstName", "firstName"),
    ("LastName", "lastName"),
    ("Email", "email"),
    ("ProgramType", "programType"),
    ("DateOfBirth", "dateOfBirth"),
    ("Gender", "gender"),
    ("Address", "address"),
    ("City", "city"),
    ("State", "state"),
    ("Zip", "zip"),
    ("PhoneNumber", "phoneNumber"),
    ("EnrollmentDate", "enrollmentDate"),
    ("GradeLevel", "gradeLevel"),
    ("Parent1_Name", "parent1Name"),
    ("Parent1_Email", "parent1Email"),
    ("Parent1_Phone", "parent1Phone"),
    ("Parent2_Name", "parent2Name"),
    ("Parent2_Email", "parent2Email"),
    ("Parent2_Phone", "parent2Phone"),
    ("EmergencyContact_Name", "emergencyContactName"),
    ("EmergencyContact_Phone", "emergencyContactPhone"),
    ("Allergies", "allergies"),
    ("MedicalConditions", "medicalConditions"),
];

pub const REQUIRED_HEADERS: [&str; 6] = [
    "StudentID",
    "FirstName",
    "LastName",
    "Email",
    "ProgramType",
    "Parent1_Email",
];

/// Headers whose value must be non-empty on every imported row.
pub const REQUIRED_VALUE_HEADERS: [&str; 4] = ["Email", "FirstName", "LastName", "ProgramType"];

pub const REQUIRED_FIELDS: [&str; 4] = ["firstName", "lastName", "email", "programType"];

pub const FIELD_STUDENT_ID: &str = "studentId";
pub const FIELD_EMAIL: &str = "email";

/// Maps a CSV header to the stored field name. Unknown headers are carried
/// through unchanged.
pub fn field_for_header(header: &str) -> &str {
    STUDENT_COLUMNS
        .iter()
        .find(|(h, _)| *h == header)
        .map(|(_, f)| *f)
        .unwrap_or(header)
}

pub fn export_headers() -> Vec<&'static str> {
    STUDENT_COLUMNS.iter().map(|(h, _)| *h).collect()
}

/// Renders a stored value as a CSV cell.
pub fn cell_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Bool(b)) => b.to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(other) => other.to_string(),
    }
}

fn is_blank(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(_) => false,
    }
}

/// Required student fields that are missing or blank.
pub fn missing_required_fields(data: &Map<String, Value>) -> Vec<&'static str> {
    REQUIRED_FIELDS
        .iter()
        .copied()
        .filter(|f| is_blank(data.get(*f)))
        .collect()
}

/// Normalizes a record coming from the admin form: trims strings and drops
/// the `id` key, which belongs to the store.
pub fn sanitize_fields(input: &Map<String, Value>) -> Map<String, Value> {
    input
        .iter()
        .filter(|(k, _)| k.as_str() != "id" && !k.trim().is_empty())
        .map(|(k, v)| {
            let v = match v {
                Value::String(s) => Value::String(s.trim().to_string()),
                other => other.clone(),
            };
            (k.trim().to_string(), v)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn headers_map_to_camel_case_fields() {
        assert_eq!(field_for_header("Parent1_Email"), "parent1Email");
        assert_eq!(field_for_header("EmergencyContact_Phone"), "emergencyContactPhone");
        assert_eq!(field_for_header("Nickname"), "Nickname");
        assert_eq!(export_headers().len(), 24);
        assert_eq!(export_headers()[0], "StudentID");
        assert_eq!(export_headers()[23], "MedicalConditions");
    }

    #[test]
    fn required_fields_reject_blank_values() {
        let data = json!({ "firstName": "Amina", "lastName": "  ", "email": "a@example.com" });
        let missing = missing_required_fields(data.as_object().expect("object"));
        assert_eq!(missing, vec!["lastName", "programType"]);
    }

    #[test]
    fn sanitize_trims_and_drops_id() {
        let data = json!({ "id": "x", " firstName ": " Amina ", "gradeLevel": 5 });
        let clean = sanitize_fields(data.as_object().expect("object"));
        assert!(!clean.contains_key("id"));
        assert_eq!(clean["firstName"], "Amina");
        assert_eq!(clean["gradeLevel"], 5);
    }

    #[test]
    fn cells_render_scalars() {
        assert_eq!(cell_text(None), "");
        assert_eq!(cell_text(Some(&json!(null))), "");
        assert_eq!(cell_text(Some(&json!(7))), "7");
        assert_eq!(cell_text(Some(&json!(true))), "true");
        assert_eq!(cell_text(Some(&json!("x"))), "x");
    }
}
