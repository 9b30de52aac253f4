use serde_json::{Map, Value};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CliVerb {
    Run,
    Check,
    Help,
    Unknown,
}

pub fn parse_cli_verb(input: &str) -> CliVerb {
    match input {
        "run" => CliVerb::Run,
        "check" => CliVerb::Check,
        "help" | "--help" | "-h" => CliVerb::Help,
        _ => CliVerb::Unknown,
    }
}

pub fn cli_help_lines() -> Vec<String> {
    vec![
        "Commands:".to_string(),
        "  run <prompt> [--answer key=value]... [--settings path]".to_string(),
        "                                       Route a request and print the result envelope"
            .to_string(),
        "  check [--settings path]              Build the processor registry and list chains"
            .to_string(),
        "  help                                 Show this help".to_string(),
        String::new(),
        "Environment:".to_string(),
        "  TASKFLOW_CONFIG                      Settings file (default ~/.taskflow/settings.yaml)"
            .to_string(),
        "  TASKFLOW_LOG                         Log filter, e.g. `info` or `taskflow=debug`"
            .to_string(),
    ]
}

pub fn help_text() -> String {
    cli_help_lines().join("\n")
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunArgs {
    pub prompt: String,
    pub answers: Option<Map<String, Value>>,
    pub settings: Option<PathBuf>,
}

/// `key=value`; values that parse as JSON scalars keep their type, anything
/// else is a string.
pub fn parse_answer(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("answer `{raw}` must look like key=value"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("answer `{raw}` has an empty key"));
    }
    let value = match serde_json::from_str::<Value>(value) {
        Ok(parsed @ (Value::Number(_) | Value::Bool(_))) => parsed,
        _ => Value::String(value.to_string()),
    };
    Ok((key.to_string(), value))
}

fn flag_value<'a>(args: &'a [String], index: usize, flag: &str) -> Result<&'a str, String> {
    args.get(index + 1)
        .map(String::as_str)
        .ok_or_else(|| format!("`{flag}` requires a value"))
}

pub fn parse_run_args(args: &[String]) -> Result<RunArgs, String> {
    let mut prompt = Vec::new();
    let mut answers = Map::new();
    let mut settings = None;
    let mut index = 0;
    while index < args.len() {
        match args[index].as_str() {
            "--answer" | "-a" => {
                let (key, value) = parse_answer(flag_value(args, index, "--answer")?)?;
                answers.insert(key, value);
                index += 2;
            }
            "--settings" => {
                settings = Some(PathBuf::from(flag_value(args, index, "--settings")?));
                index += 2;
            }
            other => {
                prompt.push(other.to_string());
                index += 1;
            }
        }
    }
    let prompt = prompt.join(" ");
    if prompt.trim().is_empty() {
        return Err(
            "usage: taskflow run <prompt> [--answer key=value]... [--settings path]".to_string(),
        );
    }
    Ok(RunArgs {
        prompt,
        answers: (!answers.is_empty()).then_some(answers),
        settings,
    })
}

pub fn parse_settings_only(args: &[String]) -> Result<Option<PathBuf>, String> {
    match args {
        [] => Ok(None),
        [flag, path] if flag == "--settings" => Ok(Some(PathBuf::from(path))),
        _ => Err("usage: taskflow check [--settings path]".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|arg| arg.to_string()).collect()
    }

    #[test]
    fn run_args_collect_prompt_words_and_typed_answers() {
        let parsed = parse_run_args(&args(&[
            "I",
            "need",
            "a",
            "SOW",
            "--answer",
            "client=Acme Corp",
            "-a",
            "cost=100000",
            "--settings",
            "/tmp/settings.yaml",
        ]))
        .expect("parse");
        assert_eq!(parsed.prompt, "I need a SOW");
        let answers = parsed.answers.expect("answers");
        assert_eq!(answers.get("client"), Some(&json!("Acme Corp")));
        assert_eq!(answers.get("cost"), Some(&json!(100000)));
        assert_eq!(parsed.settings, Some(PathBuf::from("/tmp/settings.yaml")));
    }

    #[test]
    fn run_requires_a_prompt() {
        assert!(parse_run_args(&args(&["--answer", "a=1"])).is_err());
        assert!(parse_answer("no-equals").is_err());
    }

    #[test]
    fn verbs_parse() {
        assert_eq!(parse_cli_verb("run"), CliVerb::Run);
        assert_eq!(parse_cli_verb("--help"), CliVerb::Help);
        assert_eq!(parse_cli_verb("deploy"), CliVerb::Unknown);
    }
}
