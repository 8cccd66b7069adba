use tokio_util::sync::CancellationToken;

use super::{Agents, Observer};
use crate::config::AgentRole;
use crate::error::LlmResult;
use crate::llm::Completion;
use crate::prompts::{render, REWRITER_PROMPT, WRITER_PROMPT};

/// Everything the writer and critics need to know about the current round.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WritingBrief {
    /// Round being written.
    pub round: u32,
    /// Original user requirements.
    pub requirements: String,
    /// Worldview text.
    pub worldview: String,
    /// Outline covering the round, if any.
    pub outline: Option<String>,
    /// e.g. "Stage 2 of 5 of the current outline."
    pub outline_stage: Option<String>,
    /// Reader choice made at the end of the previous round.
    pub choice: Option<String>,
    /// Protagonist condition and inventory constraints.
    pub protagonist: Option<String>,
    /// Compacted story context.
    pub context: String,
}

impl WritingBrief {
    pub(crate) fn choice_text(&self) -> &str {
        self.choice.as_deref().unwrap_or("None (opening or automatic continuation)")
    }

    pub(crate) fn outline_text(&self) -> &str {
        self.outline.as_deref().unwrap_or("No outline yet.")
    }
}

impl Agents {
    /// Draft the round's narrative continuation.
    pub async fn write_draft(
        &self,
        brief: &WritingBrief,
        cancel: &CancellationToken,
        observer: Observer<'_>,
    ) -> LlmResult<Completion> {
        let round = brief.round.to_string();
        let system = render(
            WRITER_PROMPT,
            &[
                ("round", round.as_str()),
                ("worldview", brief.worldview.as_str()),
                ("outline", brief.outline_text()),
                ("outline_stage", brief.outline_stage.as_deref().unwrap_or("")),
                ("choice", brief.choice_text()),
                ("protagonist", brief.protagonist.as_deref().unwrap_or("")),
            ],
        );

        let story = if brief.context.trim().is_empty() {
            "This is the opening of the story.".to_string()
        } else {
            brief.context.clone()
        };
        let user = format!(
            "[Requirements]\n{}\n\n[Story so far]\n{}\n\nWrite part {} now.",
            brief.requirements, story, brief.round
        );

        self.generate_with_memory(AgentRole::Writer, system, user, cancel, observer)
            .await
    }

    /// Rewrite `draft` following the moderator's revision brief.
    pub async fn rewrite(
        &self,
        brief: &WritingBrief,
        draft: &str,
        revision_brief: &str,
        cancel: &CancellationToken,
        observer: Observer<'_>,
    ) -> LlmResult<Completion> {
        let system = render(REWRITER_PROMPT, &[("requirements", brief.requirements.as_str())]);
        let user = format!(
            "[Reader's choice]: {}\n\n[Draft]\n{}\n\n[Revision brief]\n{}",
            brief.choice_text(),
            draft,
            revision_brief
        );

        self.generate_with_memory(AgentRole::Rewriter, system, user, cancel, observer)
            .await
    }
}
