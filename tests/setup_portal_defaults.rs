mod test_support;

use serde_json::json;
use test_support::{request_err_code, request_ok, spawn_sidecar, temp_dir};

#[test]
fn setup_defaults_and_validation() {
    let workspace = temp_dir("portald-setup");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let setup = request_ok(&mut stdin, &mut reader, "2", "setup.get", json!({}));
    assert_eq!(setup["portal"]["appId"].as_str(), Some("school-portal"));
    assert_eq!(setup["portal"]["institutionName"].as_str(), Some("School"));
    assert_eq!(setup["portal"]["bootstrapAdminEmails"], json!([]));
    assert_eq!(setup["roster"]["linkParents"].as_bool(), Some(true));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "setup.update",
        json!({ "section": "portal", "patch": {
            "appId": "greenfield",
            "bootstrapAdminEmails": [" Head@School.Example "]
        }}),
    );
    let setup = request_ok(&mut stdin, &mut reader, "4", "setup.get", json!({}));
    assert_eq!(setup["portal"]["appId"].as_str(), Some("greenfield"));
    assert_eq!(setup["portal"]["bootstrapAdminEmails"], json!(["head@school.example"]));

    for (id, patch) in [
        ("5", json!({ "section": "portal", "patch": { "appId": "a/b" } })),
        ("6", json!({ "section": "portal", "patch": { "bootstrapAdminEmails": ["nobody"] } })),
        ("7", json!({ "section": "roster", "patch": { "linkParents": "yes" } })),
        ("8", json!({ "section": "roster", "patch": { "colour": "blue" } })),
        ("9", json!({ "section": "grading", "patch": {} })),
    ] {
        assert_eq!(
            request_err_code(&mut stdin, &mut reader, id, "setup.update", patch),
            "bad_params"
        );
    }
}

#[test]
fn settings_survive_restart() {
    let workspace = temp_dir("portald-setup-restart");
    {
        let (mut child, mut stdin, mut reader) = spawn_sidecar();
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            "1",
            "workspace.select",
            json!({ "path": workspace.to_string_lossy() }),
        );
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            "2",
            "setup.update",
            json!({ "section": "portal", "patch": { "institutionName": "Greenfield Academy" } }),
        );
        drop(stdin);
        let _ = child.wait();
    }

    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let setup = request_ok(&mut stdin, &mut reader, "2", "setup.get", json!({}));
    assert_eq!(setup["portal"]["institutionName"].as_str(), Some("Greenfield Academy"));
}
