use anyhow::Result;
use async_trait::async_trait;

/// Text-completion backend used by the LLM-driven router and policy.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// Pulls the first balanced `{...}` object out of a completion that may wrap
/// it in prose or a fenced code block.
pub fn extract_json_object(completion: &str) -> Option<&str> {
    let start = completion.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in completion[start..].char_indices() {
        if in_string {
            match ch {
                '\\' if !escaped => escaped = true,
                '"' if !escaped => in_string = false,
                _ => escaped = false,
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&completion[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}
