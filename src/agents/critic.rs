use tokio_util::sync::CancellationToken;

use super::{Agents, Observer, WritingBrief};
use crate::config::AgentRole;
use crate::error::LlmResult;
use crate::llm::Completion;
use crate::prompts::{render, CRITIC_PROMPT, MODERATOR_PROMPT, OUTLINE_VOTE_MARKER, OUTLINE_VOTE_MARKER_ZH};
use crate::workflow::Expert;

/// Whether a critique votes for an outline refresh.
pub fn requests_outline_update(critique: &str) -> bool {
    critique.contains(OUTLINE_VOTE_MARKER) || critique.contains(OUTLINE_VOTE_MARKER_ZH)
}

/// Strict majority: more than half of the experts must vote.
pub fn outline_vote_passes(votes: usize, experts: usize) -> bool {
    experts > 0 && votes * 2 > experts
}

/// One expert's critique, as handed to the moderator.
#[derive(Debug, Clone, PartialEq)]
pub struct CritiqueInput {
    /// Expert display name.
    pub expert: String,
    /// Critique text.
    pub content: String,
}

impl Agents {
    /// One expert's critique of the current draft.
    pub async fn critique(
        &self,
        expert: &Expert,
        brief: &WritingBrief,
        draft: &str,
        cancel: &CancellationToken,
        observer: Observer<'_>,
    ) -> LlmResult<Completion> {
        let system = render(
            CRITIC_PROMPT,
            &[
                ("name", expert.name.as_str()),
                ("field", expert.field.as_str()),
                ("personality", expert.personality.as_str()),
                ("worldview", brief.worldview.as_str()),
                ("outline", brief.outline_text()),
                ("outline_stage", brief.outline_stage.as_deref().unwrap_or("")),
                ("choice", brief.choice_text()),
            ],
        );
        let user = format!("[Draft, round {}]\n{}", brief.round, draft);

        self.generate_with_memory(AgentRole::Critic, system, user, cancel, observer)
            .await
    }

    /// Condense all critiques of a draft into one revision brief.
    pub async fn summarize_critiques(
        &self,
        draft: &str,
        critiques: &[CritiqueInput],
        cancel: &CancellationToken,
        observer: Observer<'_>,
    ) -> LlmResult<Completion> {
        let critiques = critiques
            .iter()
            .map(|c| format!("[{}]\n{}", c.expert, c.content))
            .collect::<Vec<_>>()
            .join("\n\n");
        let user = format!("[Draft]\n{}\n\n[Critiques]\n{}", draft, critiques);

        self.generate(
            AgentRole::Moderator,
            MODERATOR_PROMPT.to_string(),
            user,
            cancel,
            observer,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vote_marker_detection() {
        assert!(requests_outline_update("Pacing is off.\n[VOTE: UPDATE OUTLINE]"));
        assert!(requests_outline_update("节奏偏离。\n【投票：更新大纲】"));
        assert!(!requests_outline_update("The outline still holds."));
    }

    #[test]
    fn test_vote_needs_strict_majority() {
        assert!(!outline_vote_passes(2, 4));
        assert!(outline_vote_passes(3, 4));
        assert!(outline_vote_passes(2, 3));
        assert!(!outline_vote_passes(1, 3));
        assert!(!outline_vote_passes(0, 0));
    }
}
