//! Answer composition contract.
//!
//! The pipeline hands a composer the question and the final evidence list;
//! it gets back answer text plus the citations the answer actually relies
//! on. Evidence is referenced with 1-based `[n]` markers in prompts and
//! answers.

use std::collections::HashSet;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::Citation;

/// One evidence passage offered to the composer, best first.
#[derive(Debug, Clone, PartialEq)]
pub struct EvidencePassage {
    pub chunk_id: String,
    pub source_id: String,
    pub text: String,
    pub final_score: f64,
}

impl EvidencePassage {
    pub fn citation(&self) -> Citation {
        Citation {
            chunk_id: self.chunk_id.clone(),
            source_id: self.source_id.clone(),
        }
    }
}

/// Answer text and the evidence it used.
#[derive(Debug, Clone, PartialEq)]
pub struct ComposedAnswer {
    pub answer_text: String,
    pub used_citations: Vec<Citation>,
}

/// Turns a question and evidence into a grounded answer.
#[async_trait]
pub trait AnswerComposer: Send + Sync {
    /// Identifier folded into answer cache keys.
    fn model_version(&self) -> &str;

    async fn compose(&self, question: &str, evidence: &[EvidencePassage]) -> Result<ComposedAnswer>;
}

/// Answer text used when retrieval found nothing.
pub const NO_EVIDENCE_ANSWER: &str = "No relevant documents were found for this question.";

/// Characters per token used to estimate prompt size.
pub const CHARS_PER_TOKEN: usize = 4;

/// Trim evidence to at most `max_sources` passages and roughly
/// `max_context_tokens` of text, best first.
///
/// The passage that crosses the budget is cut short and marked with `...`;
/// everything after it is dropped.
pub fn fit_context(
    evidence: &[EvidencePassage],
    max_sources: usize,
    max_context_tokens: usize,
) -> Vec<EvidencePassage> {
    let mut budget = max_context_tokens.saturating_mul(CHARS_PER_TOKEN);
    let mut out = Vec::new();
    for e in evidence.iter().take(max_sources) {
        let len = e.text.chars().count();
        if len <= budget {
            budget -= len;
            out.push(e.clone());
            continue;
        }
        if budget > 0 {
            let cut: String = e.text.chars().take(budget).collect();
            out.push(EvidencePassage {
                text: format!("{}...", cut.trim_end()),
                ..e.clone()
            });
        }
        break;
    }
    out
}

/// Render the numbered evidence block used in model prompts.
pub fn render_evidence(evidence: &[EvidencePassage]) -> String {
    evidence
        .iter()
        .enumerate()
        .map(|(i, e)| format!("[{}] (source: {})\n{}", i + 1, e.source_id, e.text.trim()))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Citations for every `[n]` marker in `answer`, in order of first use.
///
/// Markers outside `1..=evidence.len()` are ignored.
pub fn parse_citations(answer: &str, evidence: &[EvidencePassage]) -> Vec<Citation> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    let mut rest = answer;
    while let Some(open) = rest.find('[') {
        rest = &rest[open + 1..];
        let Some(close) = rest.find(']') else { break };
        if let Ok(n) = rest[..close].trim().parse::<usize>() {
            if n >= 1 && n <= evidence.len() && seen.insert(n) {
                out.push(evidence[n - 1].citation());
            }
        }
        rest = &rest[close + 1..];
    }
    out
}

/// Composer that needs no language model: it quotes the leading sentence of
/// the best passages and cites each one it quotes.
#[derive(Debug, Clone)]
pub struct ExtractiveComposer {
    pub max_passages: usize,
    pub max_chars: usize,
}

impl Default for ExtractiveComposer {
    fn default() -> Self {
        Self {
            max_passages: 3,
            max_chars: 400,
        }
    }
}

fn lead(text: &str, max_chars: usize) -> String {
    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let end = text
        .char_indices()
        .find(|(i, c)| matches!(c, '.' | '!' | '?') && *i > 0)
        .map(|(i, c)| i + c.len_utf8())
        .unwrap_or(text.len());
    let sentence = &text[..end];
    if sentence.chars().count() <= max_chars {
        sentence.to_string()
    } else {
        let cut: String = sentence.chars().take(max_chars).collect();
        format!("{}...", cut.trim_end())
    }
}

#[async_trait]
impl AnswerComposer for ExtractiveComposer {
    fn model_version(&self) -> &str {
        "extractive-v1"
    }

    async fn compose(&self, _question: &str, evidence: &[EvidencePassage]) -> Result<ComposedAnswer> {
        if evidence.is_empty() {
            return Ok(ComposedAnswer {
                answer_text: NO_EVIDENCE_ANSWER.to_string(),
                used_citations: Vec::new(),
            });
        }

        let used: Vec<&EvidencePassage> = evidence.iter().take(self.max_passages.max(1)).collect();
        let answer_text = used
            .iter()
            .enumerate()
            .map(|(i, e)| format!("{} [{}]", lead(&e.text, self.max_chars), i + 1))
            .collect::<Vec<_>>()
            .join("\n");

        Ok(ComposedAnswer {
            answer_text,
            used_citations: used.iter().map(|e| e.citation()).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fit_context_limits_sources() {
        let ev = vec![passage("a", "d1", "one"), passage("b", "d2", "two"), passage("c", "d3", "three")];
        let fitted = fit_context(&ev, 2, 1000);
        let ids: Vec<&str> = fitted.iter().map(|e| e.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_fit_context_truncates_at_budget() {
        // Two tokens of budget: eight characters.
        let ev = vec![
            passage("a", "d1", "abcde"),
            passage("b", "d2", "fghijklmn"),
            passage("c", "d3", "zz"),
        ];
        let fitted = fit_context(&ev, 10, 2);
        assert_eq!(fitted.len(), 2);
        assert_eq!(fitted[0].text, "abcde");
        assert_eq!(fitted[1].text, "fgh...");
        assert_eq!(fitted[1].chunk_id, "b");
    }

    fn passage(id: &str, source: &str, text: &str) -> EvidencePassage {
        EvidencePassage {
            chunk_id: id.to_string(),
            source_id: source.to_string(),
            text: text.to_string(),
            final_score: 1.0,
        }
    }

    #[test]
    fn test_parse_citations_in_first_use_order() {
        let ev = vec![passage("a", "s1", "x"), passage("b", "s2", "y")];
        let cites = parse_citations("B says so [2], A agrees [1] and [2] again [7] [x]", &ev);
        assert_eq!(cites.len(), 2);
        assert_eq!(cites[0].chunk_id, "b");
        assert_eq!(cites[1].chunk_id, "a");
    }

    #[test]
    fn test_render_evidence_numbers_passages() {
        let ev = vec![passage("a", "doc1", " first "), passage("b", "doc2", "second")];
        let rendered = render_evidence(&ev);
        assert!(rendered.starts_with("[1] (source: doc1)\nfirst"));
        assert!(rendered.contains("[2] (source: doc2)\nsecond"));
    }

    #[tokio::test]
    async fn test_extractive_quotes_and_cites() {
        let composer = ExtractiveComposer {
            max_passages: 1,
            max_chars: 400,
        };
        let ev = vec![
            passage("a", "doc1", "ML is an AI subset. It learns from data."),
            passage("b", "doc2", "Unrelated."),
        ];
        let out = composer.compose("what is ml", &ev).await.unwrap();
        assert_eq!(out.answer_text, "ML is an AI subset. [1]");
        assert_eq!(out.used_citations, vec![ev[0].citation()]);
    }

    #[tokio::test]
    async fn test_extractive_without_evidence() {
        let out = ExtractiveComposer::default().compose("q", &[]).await.unwrap();
        assert_eq!(out.answer_text, NO_EVIDENCE_ANSWER);
        assert!(out.used_citations.is_empty());
    }
}
