use std::fs;
use taskflow::app::command_handlers::run_cli;
use tempfile::tempdir;

const CATALOG: &str = r#"
chains:
  - chain_id: intake_summary
    type: chain
    chain_json:
      steps:
        - id: summary
          type: format_text
          params:
            template: "Intake for {client}: {priority}"
  - chain_id: not_valid
    type: json_graph
    chain_json:
      entry: missing
      nodes:
        a: {type: echo}
  - chain_id: half_written
    type: chain
    chain_json: '{"steps": [oops'
  - chain_id: mystery
    type: lambda
    chain_json: {steps: []}
manifests:
  - task_id: draft_sow
    processor_chain_id: doc_draft_chain
    required_fields: [client, duration]
    phrase_examples: [I need a SOW]
    metadata:
      template_id: tpl_sow_v1
  - task: intake
    chain_id: intake_summary
    required_fields:
      - client
      - name: priority
        label: Priority
        widget: select
        options: [low, high]
    phrase_examples: [open an intake ticket]
"#;

fn args(raw: &[&str]) -> Vec<String> {
    raw.iter().map(|arg| arg.to_string()).collect()
}

fn write_workspace(root: &std::path::Path) -> std::path::PathBuf {
    fs::create_dir_all(root.join("templates")).expect("templates dir");
    fs::write(
        root.join("templates/tpl_sow_v1.txt"),
        "Statement of work for {{client}} lasting {{duration}} months.",
    )
    .expect("template");
    fs::write(root.join("catalog.yaml"), CATALOG).expect("catalog");
    let settings = root.join("settings.yaml");
    fs::write(
        &settings,
        r#"
catalog_path: catalog.yaml
templates_dir: templates
state_root: state
routing:
  min_similarity: 0.5
"#,
    )
    .expect("settings");
    settings
}

#[test]
fn run_renders_a_document_once_every_field_is_answered() {
    let dir = tempdir().expect("tempdir");
    let settings = write_workspace(dir.path());
    let settings = settings.to_str().expect("utf8 path");

    let form = run_cli(args(&["run", "I need a SOW for Acme", "--settings", settings]))
        .expect("run form");
    let form: serde_json::Value = serde_json::from_str(&form).expect("json");
    assert_eq!(form["type"], "form");
    assert_eq!(form["fields"].as_array().map(Vec::len), Some(2));

    let link = run_cli(args(&[
        "run",
        "I need a SOW for Acme",
        "--answer",
        "client=Acme Corp",
        "--answer",
        "duration=5",
        "--settings",
        settings,
    ]))
    .expect("run link");
    let link: serde_json::Value = serde_json::from_str(&link).expect("json");
    assert_eq!(link["type"], "download_link");
    let url = link["url"].as_str().expect("url");
    assert!(url.starts_with("file://"), "{url}");

    let documents = dir.path().join("state/documents/tpl_sow_v1");
    let entries = fs::read_dir(&documents)
        .expect("documents dir")
        .collect::<Result<Vec<_>, _>>()
        .expect("entries");
    assert_eq!(entries.len(), 1);
    let body = fs::read_to_string(entries[0].path()).expect("document");
    assert_eq!(body, "Statement of work for Acme Corp lasting 5 months.");
}

#[test]
fn run_routes_to_catalog_chain_and_reports_select_options() {
    let dir = tempdir().expect("tempdir");
    let settings = write_workspace(dir.path());
    let settings = settings.to_str().expect("utf8 path");

    let form = run_cli(args(&["run", "open an intake ticket", "--settings", settings]))
        .expect("run");
    let form: serde_json::Value = serde_json::from_str(&form).expect("json");
    assert_eq!(form["fields"][1]["widget"], "select");
    assert_eq!(form["fields"][1]["options"], serde_json::json!(["low", "high"]));

    let text = run_cli(args(&[
        "run",
        "open an intake ticket",
        "-a",
        "client=Globex",
        "-a",
        "priority=high",
        "--settings",
        settings,
    ]))
    .expect("run");
    let text: serde_json::Value = serde_json::from_str(&text).expect("json");
    assert_eq!(text["content"], "Intake for Globex: high");
}

#[test]
fn check_lists_registered_and_skipped_chains() {
    let dir = tempdir().expect("tempdir");
    let settings = write_workspace(dir.path());
    let output = run_cli(args(&["check", "--settings", settings.to_str().expect("utf8")]))
        .expect("check");
    assert!(output.contains("intake_summary (definition)"), "{output}");
    assert!(output.contains("doc_draft_chain (built-in)"), "{output}");
    assert!(output.contains("not_valid: entry `missing` is not a declared node"), "{output}");
    assert!(output.contains("skipped definitions (3):"), "{output}");
    assert!(output.contains("half_written: "), "{output}");
    assert!(output.contains("mystery: "), "{output}");
    assert!(output.contains("unknown variant `lambda`"), "{output}");
}

#[test]
fn unknown_verbs_are_errors_and_help_is_default() {
    assert!(run_cli(Vec::new()).expect("help").contains("Commands:"));
    assert_eq!(
        run_cli(args(&["deploy"])).expect_err("unknown"),
        "unknown command `deploy`"
    );
}
