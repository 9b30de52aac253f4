use crate::orchestration::manifest::FieldSpec;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The single result shape returned to any caller of the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResultEnvelope {
    Text { content: String },
    Form { fields: Vec<FieldSpec> },
    DownloadLink { url: String },
    Error { message: String },
}

impl ResultEnvelope {
    pub fn text(content: impl Into<String>) -> Self {
        Self::Text {
            content: content.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            Self::Text { .. } => "text",
            Self::Form { .. } => "form",
            Self::DownloadLink { .. } => "download_link",
            Self::Error { .. } => "error",
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    /// Strict conversion of a chain's JSON output. Anything that is not a
    /// complete canonical envelope is rejected.
    pub fn from_chain_output(output: Value) -> Result<Self, String> {
        let envelope: Self = serde_json::from_value(output).map_err(|err| err.to_string())?;
        match &envelope {
            Self::Text { content } if content.trim().is_empty() => {
                Err("text result has empty `content`".to_string())
            }
            Self::DownloadLink { url } if url.trim().is_empty() => {
                Err("download_link result has empty `url`".to_string())
            }
            Self::Form { fields } if fields.is_empty() => {
                Err("form result has no `fields`".to_string())
            }
            _ => Ok(envelope),
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|err| {
            serde_json::json!({"type": "error", "message": err.to_string()})
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelopes_are_tagged_by_type() {
        let value = serde_json::to_value(ResultEnvelope::DownloadLink {
            url: "https://files/sow.docx".to_string(),
        })
        .expect("json");
        assert_eq!(
            value,
            json!({"type": "download_link", "url": "https://files/sow.docx"})
        );
    }

    #[test]
    fn chain_output_must_be_canonical() {
        let err = ResultEnvelope::from_chain_output(json!({"ui_event": "text", "content": "hi"}))
            .expect_err("legacy shape");
        assert!(!err.is_empty());

        let err = ResultEnvelope::from_chain_output(json!({"url": "https://x"}))
            .expect_err("untagged");
        assert!(!err.is_empty());

        assert_eq!(
            ResultEnvelope::from_chain_output(json!({"type": "text", "content": "hi"}))
                .expect("text"),
            ResultEnvelope::text("hi")
        );
    }

    #[test]
    fn empty_payloads_are_not_partial_results() {
        for output in [
            json!({"type": "text", "content": " "}),
            json!({"type": "download_link", "url": ""}),
            json!({"type": "form", "fields": []}),
        ] {
            assert!(ResultEnvelope::from_chain_output(output.clone()).is_err(), "{output}");
        }
    }
}
