//! Answer composers.
//!
//! `extractive` quotes the top evidence without a model. `openai` sends a
//! grounded prompt to an OpenAI-compatible `/v1/chat/completions` endpoint
//! and parses `[n]` markers in the reply back into citations.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use groundwork_core::composer::{
    fit_context, parse_citations, render_evidence, AnswerComposer, ComposedAnswer,
    EvidencePassage, ExtractiveComposer, NO_EVIDENCE_ANSWER,
};
use groundwork_core::{Error, Result};

use crate::config::ComposerConfig;

const REFUSAL: &str = "I don't have enough information in the provided context to answer this question.";

const SYSTEM_PROMPT: &str = "You answer questions using only the numbered context passages provided. \
Do not use outside knowledge. Cite every claim with the passage number in square brackets, \
for example [1] or [2][3]. If the passages conflict, say so and cite both. If the passages \
do not contain the answer, reply exactly: \"I don't have enough information in the provided \
context to answer this question.\"";

pub struct OpenAiComposer {
    client: reqwest::Client,
    api_key: String,
    url: String,
    model: String,
    max_tokens: u32,
    max_sources: usize,
    max_context_tokens: usize,
    require_citations: bool,
}

impl OpenAiComposer {
    pub fn new(config: &ComposerConfig, timeout: Duration) -> anyhow::Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| Error::FatalConfig("OPENAI_API_KEY environment variable not set".into()))?;
        Ok(Self {
            client: reqwest::Client::builder().timeout(timeout).build()?,
            api_key,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com".to_string()),
            model: config
                .model
                .clone()
                .unwrap_or_else(|| "gpt-4o-mini".to_string()),
            max_tokens: config.max_tokens,
            max_sources: config.max_sources,
            max_context_tokens: config.max_context_tokens,
            require_citations: config.require_citations,
        })
    }
}

fn user_prompt(question: &str, evidence: &[EvidencePassage]) -> String {
    format!(
        "Context:\n\n{}\n\nQuestion: {}",
        render_evidence(evidence),
        question.trim()
    )
}

/// Attach citations to a model answer. An answer that cites nothing is an
/// error unless it is the refusal, so the caller can fall back.
fn finish_answer(
    answer_text: String,
    context: &[EvidencePassage],
    require_citations: bool,
) -> Result<ComposedAnswer> {
    let used_citations = parse_citations(&answer_text, context);
    if require_citations && used_citations.is_empty() && !answer_text.starts_with(REFUSAL) {
        return Err(Error::backend("composer", "answer cited none of the evidence"));
    }
    Ok(ComposedAnswer {
        answer_text,
        used_citations,
    })
}

fn parse_chat_response(json: &serde_json::Value) -> Result<String> {
    json.get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(|s| s.trim().to_string())
        .ok_or_else(|| Error::backend("composer", "response missing choices[0].message.content"))
}

#[async_trait]
impl AnswerComposer for OpenAiComposer {
    fn model_version(&self) -> &str {
        &self.model
    }

    async fn compose(&self, question: &str, evidence: &[EvidencePassage]) -> Result<ComposedAnswer> {
        if evidence.is_empty() {
            return Ok(ComposedAnswer {
                answer_text: NO_EVIDENCE_ANSWER.to_string(),
                used_citations: Vec::new(),
            });
        }

        let context = fit_context(evidence, self.max_sources, self.max_context_tokens);
        let body = serde_json::json!({
            "model": self.model,
            "temperature": 0.0,
            "max_tokens": self.max_tokens,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": user_prompt(question, &context)},
            ],
        });

        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::backend("composer", e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::backend(
                "composer",
                format!("OpenAI API error {}: {}", status, text),
            ));
        }

        let json: serde_json::Value = response.json().await.map_err(|e| Error::backend("composer", e))?;
        let answer_text = parse_chat_response(&json)?;
        finish_answer(answer_text, &context, self.require_citations)
    }
}

/// Build the configured composer.
pub fn create_composer(config: &ComposerConfig, timeout: Duration) -> anyhow::Result<Arc<dyn AnswerComposer>> {
    match config.provider.as_str() {
        "extractive" => Ok(Arc::new(ExtractiveComposer {
            max_passages: config.max_passages,
            ..ExtractiveComposer::default()
        })),
        "openai" => Ok(Arc::new(OpenAiComposer::new(config, timeout)?)),
        other => Err(Error::FatalConfig(format!("unknown composer provider: {}", other)).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_prompt_numbers_evidence() {
        let ev = vec![EvidencePassage {
            chunk_id: "c1".into(),
            source_id: "doc1".into(),
            text: "ML is AI subset".into(),
            final_score: 0.9,
        }];
        let prompt = user_prompt("  What is ML? ", &ev);
        assert!(prompt.contains("[1] (source: doc1)\nML is AI subset"));
        assert!(prompt.ends_with("Question: What is ML?"));
    }

    fn evidence() -> Vec<EvidencePassage> {
        vec![
            EvidencePassage {
                chunk_id: "c1".into(),
                source_id: "doc1".into(),
                text: "Deploys run through the release pipeline.".into(),
                final_score: 0.9,
            },
            EvidencePassage {
                chunk_id: "c2".into(),
                source_id: "doc2".into(),
                text: "Rollbacks restore the previous release.".into(),
                final_score: 0.7,
            },
        ]
    }

    #[test]
    fn test_cited_answer_keeps_citations() {
        let out = finish_answer("Use the release pipeline [1].".into(), &evidence(), true).unwrap();
        assert_eq!(out.used_citations.len(), 1);
        assert_eq!(out.used_citations[0].source_id, "doc1");
    }

    #[test]
    fn test_uncited_answer_is_rejected() {
        let err = finish_answer("Just push to main.".into(), &evidence(), true).unwrap_err();
        assert!(err.to_string().contains("cited none"));

        let out = finish_answer("Just push to main.".into(), &evidence(), false).unwrap();
        assert!(out.used_citations.is_empty());
    }

    #[test]
    fn test_refusal_needs_no_citation() {
        let out = finish_answer(REFUSAL.to_string(), &evidence(), true).unwrap();
        assert!(out.used_citations.is_empty());
    }

    #[test]
    fn test_citation_beyond_fitted_context_is_ignored() {
        let context = fit_context(&evidence(), 1, 8000);
        let err = finish_answer("Roll back [2].".into(), &context, true).unwrap_err();
        assert!(err.to_string().contains("cited none"));
    }

    #[test]
    fn test_parse_chat_response() {
        let json = serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": " ML is a subset of AI [1]. "}}]
        });
        assert_eq!(parse_chat_response(&json).unwrap(), "ML is a subset of AI [1].");
        assert!(parse_chat_response(&serde_json::json!({"choices": []})).is_err());
    }

    #[tokio::test]
    async fn test_create_extractive() {
        let composer = create_composer(&ComposerConfig::default(), Duration::from_secs(1)).unwrap();
        assert_eq!(composer.model_version(), "extractive-v1");
    }
}
