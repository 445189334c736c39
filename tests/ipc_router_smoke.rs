mod test_support;

use serde_json::json;
use std::io::{BufRead, Write};
use test_support::{error_code, request, request_ok, spawn_sidecar, temp_dir, write_fixture};

#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let workspace = temp_dir("rosterd-router-smoke");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let health = request_ok(&mut stdin, &mut reader, "1", "health", json!({}));
    assert!(health.get("version").and_then(|v| v.as_str()).is_some());
    assert!(health.get("workspacePath").map(|v| v.is_null()).unwrap_or(false));

    let no_ws = request(
        &mut stdin,
        &mut reader,
        "2",
        "imports.stage",
        json!({ "sessionId": "s", "kind": "roster", "inPath": "x.csv", "targetSemesterId": 1 }),
    );
    assert_eq!(error_code(&no_ws), Some("no_workspace"));

    let unknown = request(&mut stdin, &mut reader, "3", "classes.list", json!({}));
    assert_eq!(error_code(&unknown), Some("not_implemented"));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(&mut stdin, &mut reader, "5", "setup.get", json!({}));

    let missing = request(
        &mut stdin,
        &mut reader,
        "6",
        "imports.status",
        json!({ "sessionId": "nobody" }),
    );
    assert_eq!(error_code(&missing), Some("no_staged_import"));

    let bad_kind = request(
        &mut stdin,
        &mut reader,
        "7",
        "imports.stage",
        json!({ "sessionId": "s", "kind": "timetable", "inPath": "x.csv", "targetSemesterId": 1 }),
    );
    assert_eq!(error_code(&bad_kind), Some("bad_params"));

    // Raw garbage line: answered without an id.
    writeln!(stdin, "{{not json").expect("write");
    stdin.flush().expect("flush");
    let mut line = String::new();
    reader.read_line(&mut line).expect("read");
    let v: serde_json::Value = serde_json::from_str(line.trim()).expect("json");
    assert_eq!(error_code(&v), Some("bad_json"));

    let _ = write_fixture(&workspace, "notes.txt", "GR,Name,Enrollment\n1,A B,E23001\n");
    let unsupported = request(
        &mut stdin,
        &mut reader,
        "8",
        "imports.stage",
        json!({
            "sessionId": "s",
            "kind": "roster",
            "inPath": workspace.join("notes.txt").to_string_lossy(),
            "targetSemesterId": 1
        }),
    );
    assert_eq!(error_code(&unsupported), Some("parse_failed"));
}

#[test]
fn structural_errors_reject_the_import_before_staging() {
    let workspace = temp_dir("rosterd-structural");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let roster = write_fixture(
        &workspace,
        "roster.csv",
        "GR No,Name,Enrollment No\n1001,Riya Shah,E23001\n",
    );
    let bad_semester = request(
        &mut stdin,
        &mut reader,
        "2",
        "imports.stage",
        json!({
            "sessionId": "s",
            "kind": "roster",
            "inPath": roster.to_string_lossy(),
            "targetSemesterId": 99
        }),
    );
    assert_eq!(error_code(&bad_semester), Some("parse_failed"));

    let empty = write_fixture(&workspace, "empty.csv", "");
    let empty_resp = request(
        &mut stdin,
        &mut reader,
        "3",
        "imports.stage",
        json!({
            "sessionId": "s",
            "kind": "roster",
            "inPath": empty.to_string_lossy(),
            "targetSemesterId": 1
        }),
    );
    assert_eq!(error_code(&empty_resp), Some("parse_failed"));

    let missing = request(
        &mut stdin,
        &mut reader,
        "4",
        "imports.stage",
        json!({
            "sessionId": "s",
            "kind": "roster",
            "inPath": workspace.join("nope.xlsx").to_string_lossy(),
            "targetSemesterId": 1
        }),
    );
    assert_eq!(error_code(&missing), Some("parse_failed"));

    // None of the rejected attempts left anything staged.
    let status = request(&mut stdin, &mut reader, "5", "imports.status", json!({ "sessionId": "s" }));
    assert_eq!(error_code(&status), Some("no_staged_import"));
}
