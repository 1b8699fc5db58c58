//! Selenium script generation.
//!
//! The reply of the code model goes through two pure clean-up steps:
//! [`extract_code_block`] keeps only the first fenced block when there is
//! one, and [`strip_prose_lines`] drops lines that open with a prefix from
//! [`PROSE_PREFIXES`]. The result is returned as-is; it is never parsed,
//! validated or executed.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::error::{Error, Result};
use crate::llm::LanguageModel;
use crate::models::TestCase;

/// Lines whose trimmed text starts with one of these are treated as prose.
pub const PROSE_PREFIXES: [&str; 2] = ["Explanation", "Here"];

/// First fenced block. A language tag ending the opening line is not part of
/// the body; on a one-line fence only a Python tag is recognised.
static CODE_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)```(?:[\w+-]*[ \t]*\r?\n|(?:python3?|py)[ \t]+)?(.*?)```")
        .expect("valid code block regex")
});

pub fn build_prompt(test_case_json: &str, html: &str) -> String {
    format!(
        "Write a Python Selenium script for this test case:\n\
         {test_case_json}\n\
         \n\
         HTML Context:\n\
         {html}\n\
         \n\
         Return ONLY code.\n"
    )
}

/// Interior of the first fenced block, trimmed, or the whole reply.
pub fn extract_code_block(reply: &str) -> String {
    match CODE_BLOCK.captures(reply).and_then(|c| c.get(1)) {
        Some(body) => body.as_str().trim().to_string(),
        None => reply.to_string(),
    }
}

/// Drop prose lines and rejoin with `\n`.
pub fn strip_prose_lines(text: &str) -> String {
    text.lines()
        .filter(|line| {
            let trimmed = line.trim();
            !PROSE_PREFIXES.iter().any(|p| trimmed.starts_with(p))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn clean_script(reply: &str) -> String {
    strip_prose_lines(&extract_code_block(reply))
}

/// Turns a test case and page markup into a browser-automation script.
pub struct ScriptGenerator {
    model: Arc<dyn LanguageModel>,
}

impl ScriptGenerator {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }

    /// Only a failed model call is an error; any reply text is accepted.
    pub async fn generate(&self, test_case: &TestCase, html: &str) -> Result<String> {
        let serialized = serde_json::to_string(test_case)
            .map_err(|e| Error::Model(format!("could not serialize test case: {}", e)))?;
        let reply = self
            .model
            .complete(&build_prompt(&serialized, html))
            .await
            .map_err(|e| Error::Model(format!("{}: {:#}", self.model.model_name(), e)))?;
        let script = clean_script(&reply);
        debug!(
            "Generated script for {} ({} lines)",
            test_case.test_id().unwrap_or("unnamed test case"),
            script.lines().count()
        );
        Ok(script)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_embeds_case_and_html() {
        let prompt = build_prompt(r#"{"Test_ID":"TC1"}"#, "<input id='x'>");
        assert!(prompt.starts_with("Write a Python Selenium script for this test case:\n{\"Test_ID\":\"TC1\"}\n"));
        assert!(prompt.contains("HTML Context:\n<input id='x'>\n"));
        assert!(prompt.ends_with("Return ONLY code.\n"));
    }

    #[test]
    fn python_fence_is_extracted() {
        let reply = "Here is the script:\n```python\nfrom selenium import webdriver\ndriver = webdriver.Chrome()\n```\nExplanation: it opens Chrome.";
        assert_eq!(
            extract_code_block(reply),
            "from selenium import webdriver\ndriver = webdriver.Chrome()"
        );
    }

    #[test]
    fn only_first_block_is_kept() {
        let reply = "```\nfirst()\n```\ntext\n```python\nsecond()\n```";
        assert_eq!(extract_code_block(reply), "first()");
    }

    #[test]
    fn other_language_tags_are_dropped() {
        assert_eq!(extract_code_block("```py3\nrun()\n```"), "run()");
        assert_eq!(extract_code_block("```\nrun()\n```"), "run()");
    }

    #[test]
    fn one_line_python_fence_drops_tag() {
        assert_eq!(extract_code_block("```python print('x')```"), "print('x')");
        assert_eq!(extract_code_block("```print('x')```"), "print('x')");
        assert_eq!(extract_code_block("```x = 1```"), "x = 1");
    }

    #[test]
    fn crlf_fence_drops_tag() {
        let reply = "Here:\r\n```python\r\nprint('x')\r\n```\r\n";
        assert_eq!(extract_code_block(reply), "print('x')");
        assert_eq!(clean_script(reply), "print('x')");
    }

    #[test]
    fn unfenced_reply_is_kept_whole() {
        assert_eq!(extract_code_block("driver.quit()"), "driver.quit()");
        assert_eq!(extract_code_block("```unterminated"), "```unterminated");
    }

    #[test]
    fn prose_lines_are_dropped_after_trimming() {
        let text = "import time\n  Here we wait\ntime.sleep(1)\nExplanation: done\n# Here stays";
        assert_eq!(strip_prose_lines(text), "import time\ntime.sleep(1)\n# Here stays");
    }

    #[test]
    fn clean_script_never_leaves_prose_lines() {
        let reply = "Here you go\nExplanation first\ndriver.get('x')\nHeretic_line = 1";
        let cleaned = clean_script(reply);
        assert_eq!(cleaned, "driver.get('x')");
        for line in cleaned.lines() {
            assert!(!line.trim().starts_with("Explanation"));
            assert!(!line.trim().starts_with("Here"));
        }
    }

    #[test]
    fn empty_reply_stays_empty() {
        assert_eq!(clean_script(""), "");
    }
}
