use std::fs;
use taskflow::config::{load_settings, CatalogFileStore, ChainKind, ConfigError, ConfigStore};
use taskflow::orchestration::manifest::Widget;
use tempfile::tempdir;

#[test]
fn settings_resolve_relative_paths_against_their_directory() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("settings.yaml");
    fs::write(
        &path,
        r#"
catalog_path: conf/catalog.yaml
state_root: /var/lib/taskflow
routing:
  min_similarity: 0.7
fallback:
  task_id: general_help
  chain_id: echo_chain
run_timeout_seconds: 30
"#,
    )
    .expect("settings");

    let settings = load_settings(Some(&path)).expect("load");
    assert_eq!(
        settings.resolved_catalog_path(),
        Some(dir.path().join("conf/catalog.yaml"))
    );
    assert_eq!(
        settings.resolved_state_root(),
        Some(std::path::PathBuf::from("/var/lib/taskflow"))
    );
    assert_eq!(settings.routing.min_similarity, 0.7);
    assert_eq!(settings.fallback.chain_id, "echo_chain");
    assert_eq!(settings.run_timeout_seconds, Some(30));
}

#[test]
fn invalid_settings_are_rejected() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("settings.yaml");
    fs::write(&path, "routing:\n  min_similarity: 1.5\n").expect("settings");
    match load_settings(Some(&path)) {
        Err(ConfigError::Settings(message)) => assert!(message.contains("min_similarity")),
        other => panic!("unexpected settings result: {other:?}"),
    }

    fs::write(&path, "fallback:\n  chain_id: 'bad id'\n").expect("settings");
    assert!(load_settings(Some(&path)).is_err());
}

#[test]
fn catalog_file_rejects_bad_chain_rows_and_drops_bad_manifests() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("catalog.yaml");
    fs::write(
        &path,
        r#"
chains:
  - chain_id: good
    type: json_graph
    version: 3
    risk_level: low
    chain_json: {entry: a, nodes: {a: {type: echo}}}
  - chain_id: undecodable
    chain_json: '{not json'
  - type: chain
manifests:
  - task: policy_qna
    output_type: policy_qna_chain
    phrase_examples: single phrase
    required_fields:
      - name: leave_type
        widget: selectbox
        options: [military, parental]
  - task_id: no_chain_here
"#,
    )
    .expect("catalog");

    let store = CatalogFileStore::new(&path);
    let chains = store.chain_rows().expect("chains");
    let ids = chains.iter().map(|row| row.chain_id.as_str()).collect::<Vec<_>>();
    assert_eq!(ids, vec!["good", "undecodable", "chains[2]"]);
    assert_eq!(chains[0].kind, ChainKind::JsonGraph);
    assert_eq!(chains[0].version.as_deref(), Some("3"));
    assert!(chains[0].rejection.is_none());
    let reason = chains[1].rejection.as_deref().expect("undecodable rejection");
    assert!(reason.contains("undecodable `chain_json`"), "{reason}");
    assert!(chains[2].rejection.is_some());

    let manifests = store.manifest_rows().expect("manifests");
    assert_eq!(manifests.len(), 1);
    let row = &manifests[0];
    assert_eq!(row.chain_id.as_str(), "policy_qna_chain");
    assert_eq!(row.phrase_examples, vec!["single phrase"]);
    assert_eq!(row.tenant_id, "default");
    assert_eq!(row.required_fields[0].widget, Widget::Select);
    assert_eq!(row.required_fields[0].label, "Leave Type");
}

#[test]
fn missing_catalog_file_is_a_read_error() {
    let dir = tempdir().expect("tempdir");
    let store = CatalogFileStore::new(dir.path().join("absent.yaml"));
    match store.chain_rows() {
        Err(ConfigError::Read { path, .. }) => assert!(path.ends_with("absent.yaml")),
        other => panic!("unexpected catalog result: {other:?}"),
    }
}
