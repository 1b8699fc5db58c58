//! Retrieval-grounded test-case generation.
//!
//! Flow for one request:
//!
//! 1. Retrieve the top `k` chunks of the knowledge base for the query.
//! 2. Join their text, best match first, with blank lines into a context.
//! 3. Render the QA Lead prompt and call the test-case model once.
//! 4. Strip markdown fences from the reply and parse it with
//!    [`parse_test_cases`].
//!
//! Models sometimes wrap the list in an object (`{"test_cases": [...]}`).
//! The parser accepts a bare array, or the first array-valued entry of an
//! object in document order; anything else is a parse failure that is
//! returned to the caller without a retry. Individual records are not
//! checked for the five expected keys.

use std::sync::Arc;

use serde_json::Value;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::llm::LanguageModel;
use crate::models::{ScoredChunk, TestCase};
use crate::retrieve::Retriever;

/// Outcome of interpreting the model's reply.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedTestCases {
    /// The reply was a JSON array.
    List(Vec<TestCase>),
    /// The reply was an object; `key` is the first entry holding an array.
    WrappedList { key: String, cases: Vec<TestCase> },
    /// Not JSON, or JSON with no array to take.
    Unparseable { reason: String },
}

impl ParsedTestCases {
    pub fn into_result(self) -> Result<Vec<TestCase>> {
        match self {
            ParsedTestCases::List(cases) => Ok(cases),
            ParsedTestCases::WrappedList { cases, .. } => Ok(cases),
            ParsedTestCases::Unparseable { reason } => Err(Error::GenerationParse(reason)),
        }
    }
}

/// Render the generation prompt.
pub fn build_prompt(context: &str, query: &str) -> String {
    format!(
        "Role: QA Lead.\n\
         Context: {context}\n\
         Task: Generate structured test cases for: {query}.\n\
         Format: JSON list with keys: Test_ID, Feature, Test_Scenario, Expected_Result, Grounded_In.\n"
    )
}

/// Retrieved chunk texts in rank order, separated by blank lines.
pub fn join_context(chunks: &[ScoredChunk]) -> String {
    chunks
        .iter()
        .map(|c| c.chunk.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Remove every "```json" and "```" marker, then trim.
pub fn strip_code_fences(raw: &str) -> String {
    raw.replace("```json", "").replace("```", "").trim().to_string()
}

/// Interpret a model reply as a list of test cases.
pub fn parse_test_cases(raw: &str) -> ParsedTestCases {
    let cleaned = strip_code_fences(raw);
    let value: Value = match serde_json::from_str(&cleaned) {
        Ok(v) => v,
        Err(e) => {
            return ParsedTestCases::Unparseable {
                reason: format!("reply is not valid JSON: {}", e),
            }
        }
    };

    match value {
        Value::Array(items) => ParsedTestCases::List(records(items)),
        Value::Object(map) => {
            for (key, entry) in map {
                if let Value::Array(items) = entry {
                    return ParsedTestCases::WrappedList {
                        key,
                        cases: records(items),
                    };
                }
            }
            ParsedTestCases::Unparseable {
                reason: "reply is a JSON object with no list-valued entry".to_string(),
            }
        }
        other => ParsedTestCases::Unparseable {
            reason: format!("reply is a JSON {} rather than a list", json_kind(&other)),
        },
    }
}

fn records(items: Vec<Value>) -> Vec<TestCase> {
    let total = items.len();
    let cases: Vec<TestCase> = items
        .into_iter()
        .filter_map(|item| match item {
            Value::Object(map) => Some(TestCase(map)),
            _ => None,
        })
        .collect();
    if cases.len() < total {
        warn!(
            "Skipped {} non-object entries in test-case list",
            total - cases.len()
        );
    }
    cases
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Drafts test cases for a knowledge base.
pub struct TestCaseGenerator {
    retriever: Retriever,
    model: Arc<dyn LanguageModel>,
    top_k: usize,
}

impl TestCaseGenerator {
    pub fn new(retriever: Retriever, model: Arc<dyn LanguageModel>, top_k: usize) -> Self {
        Self {
            retriever,
            model,
            top_k,
        }
    }

    pub async fn generate(&self, kb_id: &str, query: &str) -> Result<Vec<TestCase>> {
        let hits = self.retriever.retrieve(kb_id, query, self.top_k).await?;
        let prompt = build_prompt(&join_context(&hits), query);

        let reply = self
            .model
            .complete(&prompt)
            .await
            .map_err(|e| Error::Model(format!("{}: {:#}", self.model.model_name(), e)))?;

        let parsed = parse_test_cases(&reply);
        match &parsed {
            ParsedTestCases::WrappedList { key, cases } => {
                info!("{}: {} test cases (unwrapped from \"{}\")", kb_id, cases.len(), key)
            }
            ParsedTestCases::List(cases) => info!("{}: {} test cases", kb_id, cases.len()),
            ParsedTestCases::Unparseable { reason } => {
                warn!("{}: unusable test-case reply: {}", kb_id, reason)
            }
        }
        parsed.into_result()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Chunk;

    fn scored(text: &str) -> ScoredChunk {
        ScoredChunk {
            chunk: Chunk {
                id: "c".to_string(),
                content: text.to_string(),
                metadata: Default::default(),
                hash: String::new(),
            },
            score: 1.0,
        }
    }

    #[test]
    fn prompt_carries_context_and_query() {
        let prompt = build_prompt("Login needs email.", "test login");
        assert!(prompt.starts_with("Role: QA Lead.\n"));
        assert!(prompt.contains("Context: Login needs email.\n"));
        assert!(prompt.contains("Task: Generate structured test cases for: test login.\n"));
        assert!(prompt.contains("Test_ID, Feature, Test_Scenario, Expected_Result, Grounded_In"));
    }

    #[test]
    fn context_keeps_rank_order() {
        let ctx = join_context(&[scored("first"), scored("second")]);
        assert_eq!(ctx, "first\n\nsecond");
        assert_eq!(join_context(&[]), "");
    }

    #[test]
    fn bare_list_in_fences() {
        let raw = "```json\n[{\"Test_ID\": \"TC1\", \"Feature\": \"Login\"}]\n```";
        match parse_test_cases(raw) {
            ParsedTestCases::List(cases) => {
                assert_eq!(cases.len(), 1);
                assert_eq!(cases[0].test_id(), Some("TC1"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn wrapped_list_takes_first_array_in_document_order() {
        let raw = r#"{"note": "ok", "z_cases": [{"Test_ID": "TC1"}], "a_cases": [{"Test_ID": "TC2"}]}"#;
        match parse_test_cases(raw) {
            ParsedTestCases::WrappedList { key, cases } => {
                assert_eq!(key, "z_cases");
                assert_eq!(cases[0].test_id(), Some("TC1"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn object_without_list_is_unparseable() {
        let parsed = parse_test_cases(r#"{"Test_ID": "TC1"}"#);
        assert!(matches!(parsed, ParsedTestCases::Unparseable { .. }));
        assert!(matches!(
            parsed.into_result(),
            Err(Error::GenerationParse(_))
        ));
    }

    #[test]
    fn prose_reply_is_unparseable() {
        let parsed = parse_test_cases("Sure! Here are your test cases: ...");
        match parsed {
            ParsedTestCases::Unparseable { reason } => assert!(reason.contains("not valid JSON")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn scalar_reply_is_unparseable() {
        match parse_test_cases("42") {
            ParsedTestCases::Unparseable { reason } => assert!(reason.contains("number")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn non_object_entries_are_skipped() {
        match parse_test_cases(r#"[{"Test_ID": "TC1"}, "stray", 7]"#) {
            ParsedTestCases::List(cases) => assert_eq!(cases.len(), 1),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn missing_keys_are_tolerated() {
        let cases = parse_test_cases(r#"[{"Feature": "Cart"}]"#).into_result().unwrap();
        assert_eq!(cases[0].test_id(), None);
        assert_eq!(cases[0].missing_keys().len(), 4);
    }

    #[test]
    fn empty_list_is_valid() {
        assert_eq!(parse_test_cases("[]").into_result().unwrap().len(), 0);
    }
}
