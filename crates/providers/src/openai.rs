//! OpenAI-compatible chat-completions classifier.

use crate::{
    Category, ClassificationInput, ClassificationResult, Classifier, ClassifyContext,
    ProviderError, RelatedNote,
};
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

#[derive(Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
}

#[derive(Clone)]
pub struct OpenAiClassifier {
    client: Client,
    cfg: Arc<OpenAiConfig>,
}

impl OpenAiClassifier {
    pub fn new(cfg: OpenAiConfig) -> Self {
        Self {
            client: Client::new(),
            cfg: Arc::new(cfg),
        }
    }

    fn build_prompt(batch: &[ClassificationInput], ctx: &ClassifyContext) -> String {
        let mut prompt = String::from(
            "Classify each file into exactly one category: project, area, resource, archive.\n\
             Reply with a JSON array, one object per file, in the same order, with fields:\n\
             category, tags (max 5), summary, destination_folder, project (or null),\n\
             confidence (0..1), related_notes (max 5 objects with name and context).\n",
        );
        if !ctx.existing_projects.is_empty() {
            prompt.push_str("Existing projects: ");
            prompt.push_str(&ctx.existing_projects.join(", "));
            prompt.push('\n');
        }
        if !ctx.existing_tags.is_empty() {
            prompt.push_str("Known tags: ");
            prompt.push_str(&ctx.existing_tags.join(", "));
            prompt.push('\n');
        }
        for (i, input) in batch.iter().enumerate() {
            prompt.push_str(&format!(
                "\n--- File {} ---\nName: {}\nPreview:\n{}\n",
                i + 1,
                input.file_name,
                input.preview_text
            ));
        }
        prompt
    }
}

#[derive(Deserialize)]
struct WireResult {
    category: String,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    destination_folder: String,
    #[serde(default)]
    project: Option<String>,
    confidence: f32,
    #[serde(default)]
    related_notes: Vec<RelatedNote>,
}

fn parse_reply(content: &str, expected: usize) -> Result<Vec<ClassificationResult>, ProviderError> {
    // Models sometimes wrap the array in a code fence; take the outermost [..].
    let start = content.find('[');
    let end = content.rfind(']');
    let json = match (start, end) {
        (Some(s), Some(e)) if e > s => &content[s..=e],
        _ => {
            return Err(ProviderError::Parse(
                "no JSON array in classifier reply".into(),
            ))
        }
    };

    let wire: Vec<WireResult> =
        serde_json::from_str(json).map_err(|e| ProviderError::Parse(e.to_string()))?;
    if wire.len() != expected {
        return Err(ProviderError::Parse(format!(
            "expected {expected} results, got {}",
            wire.len()
        )));
    }

    wire.into_iter()
        .map(|w| {
            let category = Category::parse(&w.category)
                .ok_or_else(|| ProviderError::Parse(format!("unknown category {:?}", w.category)))?;
            Ok(ClassificationResult {
                category,
                tags: w.tags,
                summary: w.summary,
                destination_folder: w.destination_folder,
                project: w.project.filter(|p| !p.trim().is_empty()),
                confidence: w.confidence,
                related_notes: w.related_notes,
            }
            .normalized())
        })
        .collect()
}

#[async_trait::async_trait]
impl Classifier for OpenAiClassifier {
    async fn classify(
        &self,
        batch: &[ClassificationInput],
        ctx: &ClassifyContext,
    ) -> Result<Vec<ClassificationResult>, ProviderError> {
        #[derive(serde::Serialize)]
        struct ChatMessage<'a> {
            role: &'static str,
            content: &'a str,
        }
        #[derive(serde::Serialize)]
        struct ChatRequest<'a> {
            model: &'a str,
            messages: Vec<ChatMessage<'a>>,
            temperature: f32,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: ChatMessageResp,
        }
        #[derive(Deserialize)]
        struct ChatMessageResp {
            content: String,
        }
        #[derive(Deserialize)]
        struct ChatApiResponse {
            choices: Vec<Choice>,
        }

        let prompt = Self::build_prompt(batch, ctx);
        let body = ChatRequest {
            model: &self.cfg.model,
            messages: vec![ChatMessage {
                role: "user",
                content: &prompt,
            }],
            temperature: 0.0,
        };

        let resp = self
            .client
            .post(format!("{}/v1/chat/completions", self.cfg.base_url))
            .bearer_auth(&self.cfg.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() || e.is_timeout() {
                    ProviderError::Network(e.to_string())
                } else {
                    ProviderError::Unknown(e.to_string())
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status.as_u16(), text));
        }

        let parsed: ChatApiResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        let content = parsed
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .unwrap_or_default();
        debug!(batch = batch.len(), reply_len = content.len(), "classifier reply");

        parse_reply(content, batch.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_reply_accepts_fenced_json() {
        let content = r#"Here you go:
```json
[{"category": "resource", "tags": ["rust"], "summary": "notes",
  "destination_folder": "Resources/Dev", "project": null, "confidence": 0.9}]
```"#;
        let results = parse_reply(content, 1).unwrap();
        assert_eq!(results[0].category, Category::Resource);
        assert_eq!(results[0].tags, vec!["rust".to_string()]);
    }

    #[test]
    fn parse_reply_rejects_length_mismatch() {
        let content = r#"[{"category": "area", "confidence": 0.5}]"#;
        let err = parse_reply(content, 2).unwrap_err();
        assert!(matches!(err, ProviderError::Parse(_)));
    }

    #[test]
    fn parse_reply_clamps_out_of_range_output() {
        let content = r#"[{"category": "project", "project": "X",
            "tags": ["a","b","c","d","e","f","g"], "confidence": 1.7}]"#;
        let results = parse_reply(content, 1).unwrap();
        assert_eq!(results[0].tags.len(), 5);
        assert_eq!(results[0].confidence, 1.0);
    }

    #[test]
    fn status_codes_map_to_error_kinds() {
        assert!(matches!(
            ProviderError::from_status(401, String::new()),
            ProviderError::Auth(_)
        ));
        assert!(ProviderError::from_status(429, String::new()).is_rate_limited());
        assert!(matches!(
            ProviderError::from_status(503, String::new()),
            ProviderError::TransientServer(_)
        ));
    }
}
