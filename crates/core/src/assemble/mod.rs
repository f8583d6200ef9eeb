//! C8: grounded-answer assembly. Builds the citation-constrained prompt,
//! drives the chat client, strips the chatty preamble/bibliography text
//! models tend to add, validates the citation contract, and deterministically
//! repairs it when validation fails. Ported from `qa.py`'s
//! `answer_question` orchestration.

pub mod citation;

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::assemble::citation::{
    inject_missing_paragraph_citations, rewrite_invalid_citations, CitationValidator, ValidationReport,
};
use crate::config::CitationConfig;
use crate::error::Result;
use crate::modelclient::chat::{ChatClient, ChatTurn};
use crate::types::{ChatRole, RetrievedChunk};

const REFUSAL: &str = "I don't have enough information in the indexed documents to answer this question.";

#[derive(Debug, Clone, Serialize)]
pub struct SourceRef {
    pub chunk_id: i64,
    pub filename: String,
    pub chunk_index: u32,
    pub fused_score: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct AssembleDebug {
    pub lexical_hits: usize,
    pub vector_hits: usize,
    pub fused_count: usize,
    pub citation_ok: bool,
    pub citation_report: Option<ValidationReport>,
    pub dimension_mismatch: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct AssembledAnswer {
    pub answer: String,
    pub sources: Vec<SourceRef>,
    pub debug: AssembleDebug,
}

fn format_context(chunks: &[RetrievedChunk]) -> String {
    chunks
        .iter()
        .map(|c| format!("[cid:{}] from {}:\n{}", c.chunk_id, c.filename, c.text))
        .collect::<Vec<_>>()
        .join("\n\n---\n\n")
}

fn build_system_prompt(allowed_ids: &[i64]) -> String {
    let ids_str = allowed_ids
        .iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "You answer questions using only the source documents provided below. \
         Write 2-3 paragraphs. End every paragraph with a citation in the form \
         [Source: filename | cid:NUMBER], using only these chunk ids: {ids_str}. \
         Do not invent citations, do not copy author names or affiliations from the \
         sources, do not produce a bibliography or reference list, and do not start \
         with a preamble such as \"Here is\" or \"Based on\" — answer directly. \
         Synthesize the answer in your own words rather than copying sentences \
         verbatim. If the source documents do not contain enough information to \
         answer the question, respond with exactly: \"{REFUSAL}\""
    )
}

static PREAMBLE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)^\s*(okay|ok|sure|certainly)[,.!]?\s*",
        r"(?i)^\s*here (is|'s)\s+.*?:\s*",
        r"(?i)^\s*below is\s+.*?:\s*",
        r"(?i)^\s*based on\s+.*?,\s*",
        r"(?i)^\s*according to\s+.*?,\s*",
        r"(?i)^\s*the (corrected|revised|formatted)\s+(text|answer|response)\s*:?\s*",
        r"(?i)^\s*i (understand|see)[,.]?\s*",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

static BIBLIOGRAPHY_HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?im)^\s*(references|bibliography|sources|works cited)\s*:?\s*$").unwrap());

static EMAIL_LINE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)^.*\b[\w.+-]+@[\w-]+\.[\w.-]+\b.*$").unwrap());
static DEPARTMENT_LINE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)^\s*department of .*$").unwrap());
static BARE_NAME_LINE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\s*[A-Z][a-z]+ [A-Z][a-z]+\s*$").unwrap());
static COLLAPSE_NEWLINES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").unwrap());

/// Strip the chatty preamble, trailing bibliography, and author/affiliation
/// lines models tend to carry over from source documents. Ported from
/// `qa.py`'s `_clean_answer`.
fn clean_answer(answer: &str, _allowed_ids: &HashSet<i64>) -> String {
    let mut text = answer.trim().to_string();

    for pattern in PREAMBLE_PATTERNS.iter() {
        text = pattern.replace(&text, "").into_owned();
    }

    if let Some(m) = BIBLIOGRAPHY_HEADING.find(&text) {
        text.truncate(m.start());
    }

    let cleaned_lines: Vec<&str> = text
        .lines()
        .filter(|line| {
            !EMAIL_LINE.is_match(line) && !DEPARTMENT_LINE.is_match(line) && !BARE_NAME_LINE.is_match(line)
        })
        .collect();
    text = cleaned_lines.join("\n");

    COLLAPSE_NEWLINES.replace_all(text.trim(), "\n\n").into_owned()
}

pub struct Assembler {
    validator: CitationValidator,
    rewrite_on_fail: bool,
}

impl Assembler {
    pub fn new(config: &CitationConfig) -> Self {
        Self {
            validator: CitationValidator::new(config.min_unique_citations, config.require_citation_per_paragraph),
            rewrite_on_fail: config.rewrite_on_fail,
        }
    }

    pub async fn assemble(
        &self,
        question: &str,
        chunks: &[RetrievedChunk],
        history: &[ChatTurn],
        chat_client: &dyn ChatClient,
        temperature: f32,
        num_predict: u32,
        lexical_hits: usize,
        vector_hits: usize,
        dimension_mismatch: bool,
    ) -> Result<AssembledAnswer> {
        if chunks.is_empty() {
            return Ok(AssembledAnswer {
                answer: REFUSAL.to_string(),
                sources: Vec::new(),
                debug: AssembleDebug {
                    lexical_hits,
                    vector_hits,
                    fused_count: 0,
                    citation_ok: true,
                    citation_report: None,
                    dimension_mismatch,
                },
            });
        }

        let allowed_ids: Vec<i64> = chunks.iter().map(|c| c.chunk_id).collect();
        let allowed_set: HashSet<i64> = allowed_ids.iter().copied().collect();
        let cite_tokens: Vec<String> = chunks
            .iter()
            .map(|c| format!("[Source: {} | cid:{}]", c.filename, c.chunk_id))
            .collect();

        let context = format_context(chunks);
        let system_prompt = build_system_prompt(&allowed_ids);

        let mut messages = vec![ChatTurn::new(ChatRole::System, system_prompt)];
        messages.extend(history.iter().cloned());
        messages.push(ChatTurn::new(
            ChatRole::User,
            format!("Question: {question}\n\nSource Documents:\n{context}"),
        ));

        let raw_answer = chat_client.chat(&messages, temperature, num_predict).await?;
        let mut answer = clean_answer(&raw_answer, &allowed_set);
        let mut report = self.validator.validate(&answer, &allowed_set);

        if !report.ok && self.rewrite_on_fail {
            if !report.missing_paragraphs.is_empty() {
                answer = inject_missing_paragraph_citations(&answer, &cite_tokens, &report.missing_paragraphs);
                report = self.validator.validate(&answer, &allowed_set);
            }
            if !report.invalid_ids.is_empty() {
                let replacement = cite_tokens.first().cloned().unwrap_or_default();
                answer = rewrite_invalid_citations(&answer, &report.invalid_ids, &replacement);
                report = self.validator.validate(&answer, &allowed_set);
            }
        }

        let sources = chunks
            .iter()
            .map(|c| SourceRef {
                chunk_id: c.chunk_id,
                filename: c.filename.clone(),
                chunk_index: c.chunk_index,
                fused_score: c.fused_score,
            })
            .collect();

        Ok(AssembledAnswer {
            answer,
            sources,
            debug: AssembleDebug {
                lexical_hits,
                vector_hits,
                fused_count: chunks.len(),
                citation_ok: report.ok,
                citation_report: Some(report),
                dimension_mismatch,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_answer_strips_common_preambles() {
        let cleaned = clean_answer("Sure, here is the answer: the sky is blue.", &HashSet::new());
        assert!(!cleaned.to_lowercase().starts_with("sure"));
    }

    #[test]
    fn clean_answer_strips_trailing_bibliography() {
        let answer = "The answer is here [cid:1].\n\nReferences:\nSmith, J. (2020).";
        let cleaned = clean_answer(answer, &HashSet::new());
        assert!(!cleaned.contains("References"));
        assert!(cleaned.contains("[cid:1]"));
    }

    #[test]
    fn clean_answer_drops_email_and_department_lines() {
        let answer = "Real content here.\ncontact@example.com\nDepartment of Testing";
        let cleaned = clean_answer(answer, &HashSet::new());
        assert!(!cleaned.contains("@example.com"));
        assert!(!cleaned.contains("Department of"));
    }

    #[test]
    fn empty_chunks_produce_the_canned_refusal() {
        let assembler = Assembler::new(&CitationConfig {
            min_unique_citations: 1,
            require_citation_per_paragraph: true,
            rewrite_on_fail: true,
        });

        struct NoopChat;
        #[async_trait::async_trait]
        impl ChatClient for NoopChat {
            async fn chat(&self, _messages: &[ChatTurn], _t: f32, _n: u32) -> Result<String> {
                unreachable!("must not call the chat model when there are no chunks")
            }
            fn model_name(&self) -> &str {
                "noop"
            }
        }

        let result = tokio_test_block_on(assembler.assemble(
            "anything",
            &[],
            &[],
            &NoopChat,
            0.0,
            256,
            0,
            0,
            false,
        ));
        let result = result.unwrap();
        assert_eq!(result.answer, super::REFUSAL);
        assert!(result.debug.citation_ok);
    }

    fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
            .block_on(f)
    }
}
