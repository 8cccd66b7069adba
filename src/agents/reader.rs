use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::Agents;
use crate::config::AgentRole;
use crate::error::{LlmError, LlmResult};
use crate::llm::parse_structured;
use crate::prompts::{OPTION_GENERATOR_PROMPT, STORY_SUMMARIZER_PROMPT};

/// Options presented when generation fails.
pub const FALLBACK_OPTIONS: [&str; 3] = [
    "Keep exploring",
    "Observe the surroundings",
    "Wait for the right moment",
];

/// Characters kept from the end of a chunk when summarizing fails.
pub const SUMMARY_FALLBACK_CHARS: usize = 2000;

/// Characters of recent story shown to the option generator.
const OPTION_CONTEXT_CHARS: usize = 3000;

fn tail_chars(text: &str, n: usize) -> &str {
    let count = text.chars().count();
    if count <= n {
        return text;
    }
    let start = text
        .char_indices()
        .nth(count - n)
        .map(|(i, _)| i)
        .unwrap_or(0);
    &text[start..]
}

fn fallback_options() -> Vec<String> {
    FALLBACK_OPTIONS.iter().map(|s| s.to_string()).collect()
}

impl Agents {
    /// Propose reader options for what the protagonist does next.
    ///
    /// Failures other than cancellation yield [`FALLBACK_OPTIONS`].
    pub async fn generate_options(
        &self,
        story: &str,
        cancel: &CancellationToken,
    ) -> LlmResult<Vec<String>> {
        let user = format!(
            "[Current story]\n{}",
            tail_chars(story, OPTION_CONTEXT_CHARS)
        );
        let completion = match self
            .complete_text(
                AgentRole::OptionGenerator,
                OPTION_GENERATOR_PROMPT.to_string(),
                user,
                cancel,
            )
            .await
        {
            Ok(completion) => completion,
            Err(LlmError::Cancelled) => return Err(LlmError::Cancelled),
            Err(e) => {
                warn!(error = %e, "Option generation failed, using fallback options");
                return Ok(fallback_options());
            }
        };

        match parse_structured::<Vec<String>>(&completion, "option list") {
            Ok(options) => {
                let options: Vec<String> = options
                    .into_iter()
                    .map(|o| o.trim().to_string())
                    .filter(|o| !o.is_empty())
                    .collect();
                if options.is_empty() {
                    Ok(fallback_options())
                } else {
                    Ok(options)
                }
            }
            Err(e) => {
                warn!(error = %e, "Unparseable options, using fallback options");
                Ok(fallback_options())
            }
        }
    }

    /// Summarize a chunk of old story text for context compaction.
    ///
    /// Failures other than cancellation yield the chunk's last
    /// [`SUMMARY_FALLBACK_CHARS`] characters.
    pub async fn summarize_story(
        &self,
        chunk: &str,
        cancel: &CancellationToken,
    ) -> LlmResult<String> {
        match self
            .complete_text(
                AgentRole::StorySummarizer,
                STORY_SUMMARIZER_PROMPT.to_string(),
                chunk.to_string(),
                cancel,
            )
            .await
        {
            Ok(summary) if !summary.trim().is_empty() => Ok(summary.trim().to_string()),
            Ok(_) => Ok(tail_chars(chunk, SUMMARY_FALLBACK_CHARS).to_string()),
            Err(LlmError::Cancelled) => Err(LlmError::Cancelled),
            Err(e) => {
                warn!(error = %e, "Story summary failed, keeping the chunk's tail");
                Ok(tail_chars(chunk, SUMMARY_FALLBACK_CHARS).to_string())
            }
        }
    }
}
