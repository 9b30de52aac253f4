use crate::config::FallbackConfig;
use crate::shared::ids::{ChainId, TaskId};
use crate::shared::serde_ext::title_case;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Widget {
    #[default]
    TextInput,
    NumberInput,
    #[serde(alias = "selectbox")]
    Select,
    DateInput,
}

impl Widget {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TextInput => "text_input",
            Self::NumberInput => "number_input",
            Self::Select => "select",
            Self::DateInput => "date_input",
        }
    }
}

impl std::fmt::Display for Widget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldSpec {
    pub name: String,
    pub label: String,
    pub widget: Widget,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
}

impl FieldSpec {
    /// A plain text field labelled from its name (`cost_center` -> `Cost Center`).
    pub fn text(name: &str) -> Self {
        Self {
            name: name.to_string(),
            label: title_case(name),
            widget: Widget::TextInput,
            options: None,
        }
    }
}

#[derive(Deserialize)]
struct FieldSpecObject {
    name: String,
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    widget: Widget,
    #[serde(default)]
    options: Option<Vec<String>>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum FieldSpecRaw {
    Name(String),
    Object(FieldSpecObject),
}

impl<'de> Deserialize<'de> for FieldSpec {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = FieldSpecRaw::deserialize(deserializer)?;
        let spec = match raw {
            FieldSpecRaw::Name(name) => FieldSpec::text(name.trim()),
            FieldSpecRaw::Object(object) => {
                let name = object.name.trim().to_string();
                let label = object
                    .label
                    .filter(|label| !label.trim().is_empty())
                    .unwrap_or_else(|| title_case(&name));
                FieldSpec {
                    name,
                    label,
                    widget: object.widget,
                    options: object.options,
                }
            }
        };
        if spec.name.is_empty() {
            return Err(D::Error::custom("field name must be non-empty"));
        }
        if spec.widget == Widget::Select
            && spec.options.as_ref().map_or(true, |options| options.is_empty())
        {
            return Err(D::Error::custom(format!(
                "select field `{}` requires non-empty `options`",
                spec.name
            )));
        }
        Ok(spec)
    }
}

/// Static routing record. Built fresh per request and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Manifest {
    pub task_id: TaskId,
    pub chain_id: ChainId,
    pub required_fields: Vec<FieldSpec>,
    pub metadata: Map<String, Value>,
}

impl Manifest {
    pub fn new(
        task_id: TaskId,
        chain_id: ChainId,
        required_fields: Vec<FieldSpec>,
        metadata: Map<String, Value>,
    ) -> Result<Self, String> {
        let mut seen = HashSet::new();
        for field in &required_fields {
            if !seen.insert(field.name.as_str()) {
                return Err(format!(
                    "task `{task_id}` declares required field `{}` more than once",
                    field.name
                ));
            }
        }
        Ok(Self {
            task_id,
            chain_id,
            required_fields,
            metadata,
        })
    }

    pub fn fallback(config: &FallbackConfig) -> Result<Self, String> {
        Ok(Self {
            task_id: TaskId::parse(&config.task_id)?,
            chain_id: ChainId::parse(&config.chain_id)?,
            required_fields: Vec::new(),
            metadata: Map::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_field_names_expand_to_text_inputs() {
        let fields: Vec<FieldSpec> =
            serde_yaml::from_str("[client, application_name]").expect("fields");
        assert_eq!(fields[1].label, "Application Name");
        assert_eq!(fields[1].widget, Widget::TextInput);
    }

    #[test]
    fn legacy_selectbox_widget_maps_to_select() {
        let field: FieldSpec = serde_yaml::from_str(
            r#"
name: application_type
widget: selectbox
options: [web, mobile]
"#,
        )
        .expect("field");
        assert_eq!(field.widget, Widget::Select);
        assert_eq!(field.label, "Application Type");
    }

    #[test]
    fn select_without_options_is_rejected() {
        let err = serde_yaml::from_str::<FieldSpec>("{name: kind, widget: select}")
            .expect_err("missing options");
        assert!(err.to_string().contains("options"), "{err}");
    }

    #[test]
    fn duplicate_required_fields_are_rejected() {
        let err = Manifest::new(
            TaskId::parse("draft_sow").expect("task"),
            ChainId::parse("doc_draft_chain").expect("chain"),
            vec![FieldSpec::text("client"), FieldSpec::text("client")],
            Map::new(),
        )
        .expect_err("duplicate");
        assert!(err.contains("client"), "{err}");
    }

    #[test]
    fn field_spec_serializes_without_absent_options() {
        let value = serde_json::to_value(FieldSpec::text("cost")).expect("json");
        assert_eq!(
            value,
            serde_json::json!({"name": "cost", "label": "Cost", "widget": "text_input"})
        );
    }
}
