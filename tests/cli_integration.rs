use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::tempdir;

fn write_json(path: &Path, value: &Value) {
    std::fs::write(path, serde_json::to_vec_pretty(value).expect("serialize")).expect("write");
}

fn write_workbook(dir: &Path) -> PathBuf {
    let path = dir.join("book.json");
    write_json(
        &path,
        &json!({
            "title": "Inventory",
            "sections": [{
                "section_id": 1,
                "title": "Stock",
                "row_count": 20,
                "column_count": 4,
                "values": [["Item", "Count"], ["bolts", 40], ["nuts", 12]]
            }]
        }),
    );
    path
}

fn write_intents(dir: &Path, name: &str, intents: Value) -> PathBuf {
    let path = dir.join(name);
    write_json(&path, &intents);
    path
}

fn two_writes() -> Value {
    json!([
        {"kind": "set_values", "range": {"by": "a1", "section_id": 1, "notation": "C1"}, "values": [["Bin"]]},
        {"kind": "set_values", "range": {"by": "a1", "section_id": 1, "notation": "C2"}, "values": [["A4"]]}
    ])
}

fn run_cli(args: &[&str]) -> std::process::Output {
    Command::new(assert_cmd::cargo::cargo_bin!("sheetops"))
        .args(args)
        .output()
        .expect("run sheetops")
}

fn parse_stdout_json(output: &std::process::Output) -> Value {
    let stdout = String::from_utf8(output.stdout.clone()).expect("stdout utf8");
    serde_json::from_str(&stdout).expect("valid json")
}

fn parse_stderr_envelope(output: &std::process::Output) -> Value {
    let stderr = String::from_utf8(output.stderr.clone()).expect("stderr utf8");
    let line = stderr
        .lines()
        .rev()
        .find(|line| line.starts_with('{'))
        .expect("json envelope on stderr");
    serde_json::from_str(line).expect("valid json")
}

fn path_str(path: &Path) -> &str {
    path.to_str().expect("path utf8")
}

#[test]
fn cli_schema_describes_intents() {
    let output = run_cli(&["schema"]);
    assert!(output.status.success(), "stderr: {:?}", output.stderr);
    let schema = serde_json::to_string(&parse_stdout_json(&output)).unwrap();
    assert!(schema.contains("set_values"));
    assert!(schema.contains("delete_rows"));
}

#[test]
fn cli_compile_merges_adjacent_writes() {
    let tmp = tempdir().expect("tempdir");
    let intents = write_intents(tmp.path(), "intents.json", two_writes());

    let output = run_cli(&["compile", path_str(&intents)]);
    assert!(output.status.success(), "stderr: {:?}", output.stderr);

    let payload = parse_stdout_json(&output);
    let requests = payload["requests"].as_array().expect("requests array");
    assert_eq!(requests.len(), 1);
    assert!(requests[0].get("updateValues").is_some());
    assert_eq!(payload["ops"].as_array().map(Vec::len), Some(2));
    assert!(payload["fingerprint"].as_str().is_some_and(|f| !f.is_empty()));
}

#[test]
fn cli_check_reports_policy_violations() {
    let tmp = tempdir().expect("tempdir");
    let workbook = write_workbook(tmp.path());
    let intents = write_intents(
        tmp.path(),
        "paint.json",
        json!([{
            "kind": "set_background_color",
            "range": {"by": "a1", "section_id": 1, "notation": "A1:D20"},
            "color": {"red": 1.0, "green": 1.0, "blue": 0.0}
        }]),
    );

    let output = run_cli(&[
        "check",
        path_str(&intents),
        "--workbook",
        path_str(&workbook),
        "--max-cells",
        "10",
    ]);
    assert!(output.status.success(), "stderr: {:?}", output.stderr);

    let payload = parse_stdout_json(&output);
    assert_eq!(payload["allowed"], json!(false));
    assert_eq!(payload["estimate"]["cells"], json!(80));
    assert_eq!(payload["violations"][0]["rule"], json!("max_cells"));
}

#[test]
fn cli_simulate_applies_the_batch() {
    let tmp = tempdir().expect("tempdir");
    let workbook = write_workbook(tmp.path());
    let intents = write_intents(tmp.path(), "intents.json", two_writes());

    let output = run_cli(&[
        "simulate",
        path_str(&intents),
        "--workbook",
        path_str(&workbook),
        "--compact",
    ]);
    assert!(output.status.success(), "stderr: {:?}", output.stderr);

    let payload = parse_stdout_json(&output);
    assert_eq!(payload["provider_calls"], json!(1));
    assert_eq!(payload["dispatch"]["requests_dispatched"], json!(1));
    assert_eq!(payload["dispatch"]["diff"]["tier"], json!("FULL"));
}

#[test]
fn cli_simulate_transaction_rolls_back_partial_failure() {
    let tmp = tempdir().expect("tempdir");
    let workbook = write_workbook(tmp.path());
    let intents = write_intents(
        tmp.path(),
        "intents.json",
        json!([
            {"kind": "set_values", "range": {"by": "a1", "section_id": 1, "notation": "B2"}, "values": [[0]]},
            {"kind": "clear_values", "range": {"by": "a1", "section_id": 1, "notation": "A3:B3"}}
        ]),
    );

    let output = run_cli(&[
        "simulate",
        path_str(&intents),
        "--workbook",
        path_str(&workbook),
        "--transaction",
        "1",
        "--fail-after",
        "1",
    ]);
    assert!(output.status.success(), "stderr: {:?}", output.stderr);

    let payload = parse_stdout_json(&output);
    assert_eq!(payload["transaction"]["state"], json!("rolled_back"));
    assert!(payload["commit"]["error"]["code"].is_string());
}

#[test]
fn cli_missing_intents_file_emits_error_envelope() {
    let tmp = tempdir().expect("tempdir");
    let missing = tmp.path().join("absent.json");

    let output = run_cli(&["compile", path_str(&missing)]);
    assert!(!output.status.success());
    assert_eq!(output.status.code(), Some(1));

    let envelope = parse_stderr_envelope(&output);
    assert_eq!(envelope["code"], json!("FILE_NOT_FOUND"));
    assert_eq!(envelope["retryable"], json!(false));
}

#[test]
fn cli_unresolvable_range_keeps_its_code() {
    let tmp = tempdir().expect("tempdir");
    let workbook = write_workbook(tmp.path());
    let intents = write_intents(
        tmp.path(),
        "intents.json",
        json!([{"kind": "clear_values", "range": {"by": "named", "name": "nowhere"}}]),
    );

    let output = run_cli(&["preview", path_str(&intents), "--workbook", path_str(&workbook)]);
    assert_eq!(output.status.code(), Some(1));
    let envelope = parse_stderr_envelope(&output);
    assert_eq!(envelope["code"], json!("RANGE_NOT_FOUND"));
}
