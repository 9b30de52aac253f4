use crate::app::cli::{help_text, parse_cli_verb, parse_run_args, parse_settings_only, CliVerb};
use crate::collaborators::{FileDocumentRenderer, StepServices};
use crate::config::{default_settings_path, load_settings, Settings};
use crate::orchestration::pipeline::{run_workflow_with_timeout, Pipeline};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub fn run_cli(args: Vec<String>) -> Result<String, String> {
    if args.is_empty() {
        return Ok(help_text());
    }

    match parse_cli_verb(args[0].as_str()) {
        CliVerb::Run => cmd_run(&args[1..]),
        CliVerb::Check => cmd_check(&args[1..]),
        CliVerb::Help => Ok(help_text()),
        CliVerb::Unknown => Err(format!("unknown command `{}`", args[0])),
    }
}

/// An explicit path must exist; the default path falls back to built-in
/// defaults when no settings file has been written yet.
fn load_cli_settings(path: Option<&Path>) -> Result<Settings, String> {
    if let Some(path) = path {
        return load_settings(Some(path)).map_err(|err| err.to_string());
    }
    let default = default_settings_path().map_err(|err| err.to_string())?;
    if default.exists() {
        load_settings(Some(&default)).map_err(|err| err.to_string())
    } else {
        Ok(Settings::default())
    }
}

fn services_for(settings: &Settings) -> StepServices {
    match (settings.resolved_templates_dir(), settings.resolved_state_root()) {
        (Some(templates), Some(state_root)) => StepServices::default()
            .with_renderer(Arc::new(FileDocumentRenderer::new(templates, state_root))),
        _ => StepServices::default(),
    }
}

fn build_pipeline(settings: &Settings) -> Result<Pipeline, String> {
    Pipeline::from_settings(settings, services_for(settings)).map_err(|err| err.to_string())
}

pub fn cmd_run(args: &[String]) -> Result<String, String> {
    let run = parse_run_args(args)?;
    let settings = load_cli_settings(run.settings.as_deref())?;
    let pipeline = build_pipeline(&settings)?;
    let envelope = match settings.run_timeout_seconds {
        Some(seconds) => run_workflow_with_timeout(
            Arc::new(pipeline),
            run.prompt,
            run.answers,
            Duration::from_secs(seconds),
        ),
        None => pipeline.run_workflow(&run.prompt, run.answers),
    };
    serde_json::to_string_pretty(&envelope).map_err(|err| err.to_string())
}

pub fn cmd_check(args: &[String]) -> Result<String, String> {
    let settings_path = parse_settings_only(args)?;
    let settings = load_cli_settings(settings_path.as_deref())?;
    let pipeline = build_pipeline(&settings)?;
    let snapshot = pipeline.registry().snapshot();

    let mut lines = vec![format!("registered chains ({}):", snapshot.len())];
    for chain_id in snapshot.chain_ids() {
        let kind = match snapshot.get(chain_id) {
            Some(executable) if executable.is_native() => "built-in",
            _ => "definition",
        };
        lines.push(format!("  {chain_id} ({kind})"));
    }
    if !snapshot.skipped().is_empty() {
        lines.push(format!("skipped definitions ({}):", snapshot.skipped().len()));
        for skipped in snapshot.skipped() {
            lines.push(format!("  {}: {}", skipped.chain_id, skipped.reason));
        }
    }
    Ok(lines.join("\n"))
}
