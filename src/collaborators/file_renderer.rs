use super::{CollaboratorError, DocumentRenderer};
use crate::shared::fs_atomic::{atomic_write_file, random_hex_id};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};

/// Renders plain-text templates (`<templates_dir>/<template_id>.txt`) by
/// replacing `{{field}}` placeholders, writing the result under
/// `<output_root>/documents/<template_id>/` and returning a `file://` URL.
#[derive(Debug, Clone)]
pub struct FileDocumentRenderer {
    templates_dir: PathBuf,
    output_root: PathBuf,
}

impl FileDocumentRenderer {
    pub fn new(templates_dir: impl Into<PathBuf>, output_root: impl Into<PathBuf>) -> Self {
        Self {
            templates_dir: templates_dir.into(),
            output_root: output_root.into(),
        }
    }

    fn template_path(&self, template_id: &str) -> Result<PathBuf, CollaboratorError> {
        if template_id.is_empty()
            || !template_id
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_')
        {
            return Err(CollaboratorError::new(format!(
                "invalid template id `{template_id}`"
            )));
        }
        Ok(self.templates_dir.join(format!("{template_id}.txt")))
    }
}

/// Single pass over `template`; substituted values are never re-scanned.
/// Placeholders naming an unknown field are left as written.
pub fn merge_placeholders(template: &str, fields: &Map<String, Value>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            out.push_str(&rest[start..]);
            return out;
        };
        match fields.get(after[..end].trim()) {
            Some(Value::String(text)) => out.push_str(text),
            Some(other) => out.push_str(&other.to_string()),
            None => out.push_str(&rest[start..start + 2 + end + 2]),
        }
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    out
}

fn file_url(path: &Path) -> String {
    let encoded = path
        .to_string_lossy()
        .split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/");
    format!("file://{encoded}")
}

impl DocumentRenderer for FileDocumentRenderer {
    fn render(
        &self,
        template_id: &str,
        fields: &Map<String, Value>,
    ) -> Result<String, CollaboratorError> {
        let template_path = self.template_path(template_id)?;
        let template = fs::read_to_string(&template_path).map_err(|err| {
            CollaboratorError::new(format!(
                "template {} not readable: {err}",
                template_path.display()
            ))
        })?;
        let rendered = merge_placeholders(&template, fields);

        let artifact_id = random_hex_id(8).map_err(|err| CollaboratorError::new(err.to_string()))?;
        let out_path = self
            .output_root
            .join("documents")
            .join(template_id)
            .join(format!("{artifact_id}.txt"));
        atomic_write_file(&out_path, rendered.as_bytes()).map_err(|err| {
            CollaboratorError::new(format!("failed to write {}: {err}", out_path.display()))
        })?;
        Ok(file_url(&out_path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn renders_placeholders_into_a_new_document() {
        let dir = tempdir().expect("tempdir");
        let templates = dir.path().join("templates");
        fs::create_dir_all(&templates).expect("templates dir");
        fs::write(
            templates.join("tpl_sow_v1.txt"),
            "SOW for {{client}}: {{ duration }} months at {{cost}}",
        )
        .expect("template");

        let renderer = FileDocumentRenderer::new(&templates, dir.path().join("state"));
        let fields = json!({"client": "Acme Corp", "duration": 5, "cost": 100000});
        let url = renderer
            .render("tpl_sow_v1", fields.as_object().expect("object"))
            .expect("render");

        assert!(url.starts_with("file://"), "{url}");
        let path = urlencoding::decode(url.trim_start_matches("file://"))
            .expect("decode")
            .into_owned();
        assert_eq!(
            fs::read_to_string(path).expect("read output"),
            "SOW for Acme Corp: 5 months at 100000"
        );
    }

    #[test]
    fn answers_that_look_like_placeholders_are_not_expanded() {
        let fields = json!({"client": "{{cost}}", "cost": 100});
        let rendered = merge_placeholders(
            "{{client}} pays {{ cost }}; {{unknown}} stays",
            fields.as_object().expect("object"),
        );
        assert_eq!(rendered, "{{cost}} pays 100; {{unknown}} stays");
    }

    #[test]
    fn rejects_template_ids_that_escape_the_templates_dir() {
        let dir = tempdir().expect("tempdir");
        let renderer = FileDocumentRenderer::new(dir.path(), dir.path());
        let err = renderer
            .render("../secrets", &Map::new())
            .expect_err("path escape");
        assert!(err.reason.contains("invalid template id"), "{err}");
    }
}
