//! Rolling summarization of the compiled story.
//!
//! Lengths here are character counts, used as a conservative proxy for
//! tokens (about 1.5 characters per token).

use std::future::Future;

use tracing::{info, warn};

use crate::error::LlmResult;

/// Unsummarized text longer than this triggers a compaction step.
pub const ARCHIVE_THRESHOLD: usize = 20_000;
/// Characters folded into one summary per compaction step.
pub const CHUNK_SIZE: usize = 10_000;
/// Characters per token assumed by [`estimate_tokens`].
pub const CHARS_PER_TOKEN: f64 = 1.5;
/// Token budget of the context handed to the writer.
pub const MAX_CONTEXT_TOKENS: usize = 60_000;

/// Estimate tokens from characters, rounding up.
pub fn estimate_tokens(text: &str) -> usize {
    (text.chars().count() as f64 / CHARS_PER_TOKEN).ceil() as usize
}

/// Whether `text` fits the writer's token budget
pub fn fits_budget(text: &str) -> bool {
    estimate_tokens(text) <= MAX_CONTEXT_TOKENS
}

/// Byte index of the `chars`-th character, clamped to the end.
fn byte_offset(text: &str, chars: usize) -> usize {
    text.char_indices()
        .nth(chars)
        .map(|(i, _)| i)
        .unwrap_or(text.len())
}

/// Text of `story` not yet folded into summaries
pub fn unsummarized(story: &str, summarized_length: usize) -> &str {
    &story[byte_offset(story, summarized_length)..]
}

/// Join summaries and the live tail into the writer's context.
pub fn assemble_context(summaries: &[String], tail: &str) -> String {
    if summaries.is_empty() {
        return tail.to_string();
    }

    let mut context = summaries
        .iter()
        .enumerate()
        .map(|(i, s)| format!("[Previously, part {}]: {}", i + 1, s))
        .collect::<Vec<_>>()
        .join("\n\n");
    context.push_str("\n\n[Recent story]:\n");
    context.push_str(tail);
    context
}

/// A pending compaction step.
#[derive(Debug, Clone, PartialEq)]
pub struct CompactionPlan {
    /// Text to summarize.
    pub chunk: String,
    /// `summarized_length` after the step.
    pub next_summarized_length: usize,
}

/// Result of one compaction step.
#[derive(Debug, Clone, PartialEq)]
pub struct Compaction {
    /// Summary to append to the session's summaries.
    pub summary: String,
    /// New `summarized_length`.
    pub summarized_length: usize,
}

/// Context ready for a drafting call.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedContext {
    /// Compaction performed while preparing, if any.
    pub compaction: Option<Compaction>,
    /// Summaries followed by the unsummarized tail.
    pub context: String,
}

/// Decides when to fold old story text into summaries.
#[derive(Debug, Clone)]
pub struct ContextCompactor {
    archive_threshold: usize,
    chunk_size: usize,
}

impl Default for ContextCompactor {
    fn default() -> Self {
        Self::new(ARCHIVE_THRESHOLD, CHUNK_SIZE)
    }
}

impl ContextCompactor {
    /// Create a compactor with custom thresholds
    pub fn new(archive_threshold: usize, chunk_size: usize) -> Self {
        Self {
            archive_threshold,
            chunk_size: chunk_size.clamp(1, archive_threshold.max(1)),
        }
    }

    /// Whether the unsummarized tail is long enough to compact
    pub fn should_compact(&self, story: &str, summarized_length: usize) -> bool {
        unsummarized(story, summarized_length).chars().count() > self.archive_threshold
    }

    /// The next compaction step, if one is due
    pub fn plan(&self, story: &str, summarized_length: usize) -> Option<CompactionPlan> {
        if !self.should_compact(story, summarized_length) {
            return None;
        }
        let tail = unsummarized(story, summarized_length);
        let chunk = &tail[..byte_offset(tail, self.chunk_size)];
        Some(CompactionPlan {
            chunk: chunk.to_string(),
            next_summarized_length: summarized_length + self.chunk_size,
        })
    }

    /// Run at most one compaction step and build the drafting context.
    ///
    /// `summarize` is only called when a step is due. Its error (typically
    /// cancellation) aborts preparation without changing anything.
    pub async fn prepare<F, Fut>(
        &self,
        story: &str,
        summaries: &[String],
        summarized_length: usize,
        summarize: F,
    ) -> LlmResult<PreparedContext>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = LlmResult<String>>,
    {
        let Some(plan) = self.plan(story, summarized_length) else {
            let tail = unsummarized(story, summarized_length);
            return Ok(PreparedContext {
                compaction: None,
                context: assemble_context(summaries, tail),
            });
        };

        let summary = summarize(plan.chunk).await?;
        info!(
            summarized_length = plan.next_summarized_length,
            summary_chars = summary.chars().count(),
            "Compacted story context"
        );

        let mut all: Vec<String> = summaries.to_vec();
        all.push(summary.clone());
        let context = assemble_context(&all, unsummarized(story, plan.next_summarized_length));
        if !fits_budget(&context) {
            warn!(
                estimated_tokens = estimate_tokens(&context),
                "Drafting context exceeds token budget"
            );
        }

        Ok(PreparedContext {
            compaction: Some(Compaction {
                summary,
                summarized_length: plan.next_summarized_length,
            }),
            context,
        })
    }
}
