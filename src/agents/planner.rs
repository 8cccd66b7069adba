use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{Agents, Observer};
use crate::config::AgentRole;
use crate::error::{LlmError, LlmResult};
use crate::llm::{parse_structured, Completion};
use crate::prompts::{
    render, EXPERT_SUGGESTION_PROMPT, OUTLINE_CONTRIBUTOR_PROMPT, OUTLINE_SUMMARIZER_PROMPT,
    WORLDVIEW_PROMPT,
};
use crate::workflow::Expert;

/// Returned by [`Agents::generate_worldview`] when the call fails.
pub const WORLDVIEW_FALLBACK: &str = "The worldview could not be generated. Please fill it in manually.";

/// Context for one outline-discussion contribution.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutlineBrief {
    /// Label of the rounds the outline will cover.
    pub range: String,
    pub worldview: String,
    /// Previous outlines, oldest first.
    pub history: String,
    /// Summaries and recent text of the story.
    pub story: String,
    /// Transcript of the previous discussion round.
    pub opinions: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SuggestedExpert {
    name: String,
    field: String,
    #[serde(default)]
    personality: String,
    #[serde(default)]
    initial_stance: String,
    #[serde(default)]
    color: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SuggestedExperts {
    Bare(Vec<SuggestedExpert>),
    Wrapped { experts: Vec<SuggestedExpert> },
}

impl Agents {
    /// One expert's contribution to the outline discussion.
    pub async fn outline_contribution(
        &self,
        expert: &Expert,
        brief: &OutlineBrief,
        cancel: &CancellationToken,
        observer: Observer<'_>,
    ) -> LlmResult<Completion> {
        let none = "None yet.";
        let or_none = |s: &str| if s.trim().is_empty() { none.to_string() } else { s.to_string() };
        let history = or_none(&brief.history);
        let story = or_none(&brief.story);
        let opinions = or_none(&brief.opinions);
        let system = render(
            OUTLINE_CONTRIBUTOR_PROMPT,
            &[
                ("name", expert.name.as_str()),
                ("field", expert.field.as_str()),
                ("personality", expert.personality.as_str()),
                ("range", brief.range.as_str()),
                ("worldview", brief.worldview.as_str()),
                ("history", history.as_str()),
                ("story", story.as_str()),
                ("opinions", opinions.as_str()),
            ],
        );
        let user = format!("Give your proposal for {}.", brief.range);

        self.generate(AgentRole::OutlineContributor, system, user, cancel, observer)
            .await
    }

    /// Condense the discussion transcript into the outline text.
    pub async fn summarize_outline(
        &self,
        range: &str,
        transcript: &str,
        cancel: &CancellationToken,
        observer: Observer<'_>,
    ) -> LlmResult<Completion> {
        let system = render(OUTLINE_SUMMARIZER_PROMPT, &[("range", range)]);
        let user = format!("[Discussion]\n{}", transcript);

        self.generate(AgentRole::OutlineSummarizer, system, user, cancel, observer)
            .await
    }

    /// Build a worldview from the requirements.
    ///
    /// Failures other than cancellation yield [`WORLDVIEW_FALLBACK`].
    pub async fn generate_worldview(
        &self,
        requirements: &str,
        cancel: &CancellationToken,
    ) -> LlmResult<String> {
        match self
            .complete_text(
                AgentRole::WorldviewArchitect,
                WORLDVIEW_PROMPT.to_string(),
                requirements.to_string(),
                cancel,
            )
            .await
        {
            Ok(worldview) if !worldview.trim().is_empty() => Ok(worldview.trim().to_string()),
            Ok(_) => Ok(WORLDVIEW_FALLBACK.to_string()),
            Err(LlmError::Cancelled) => Err(LlmError::Cancelled),
            Err(e) => {
                warn!(error = %e, "Worldview generation failed");
                Ok(WORLDVIEW_FALLBACK.to_string())
            }
        }
    }

    /// Propose `count` experts for the requirements.
    ///
    /// Accepts a bare JSON array or an object with an `experts` array.
    pub async fn suggest_experts(
        &self,
        requirements: &str,
        count: usize,
        cancel: &CancellationToken,
    ) -> LlmResult<Vec<Expert>> {
        let count_text = count.to_string();
        let system = render(EXPERT_SUGGESTION_PROMPT, &[("count", count_text.as_str())]);
        let completion = self
            .complete_text(
                AgentRole::ExpertSuggester,
                system,
                requirements.to_string(),
                cancel,
            )
            .await?;

        let suggested = match parse_structured::<SuggestedExperts>(&completion, "expert list")? {
            SuggestedExperts::Bare(list) | SuggestedExperts::Wrapped { experts: list } => list,
        };

        let experts: Vec<Expert> = suggested
            .into_iter()
            .filter(|e| !e.name.trim().is_empty())
            .take(count)
            .map(|e| {
                let mut expert = Expert::new(e.name.trim(), e.field.trim())
                    .with_personality(e.personality)
                    .with_initial_stance(e.initial_stance);
                if let Some(color) = e.color.filter(|c| !c.trim().is_empty()) {
                    expert.color = color;
                }
                expert
            })
            .collect();

        info!(requested = count, suggested = experts.len(), "Experts suggested");
        Ok(experts)
    }
}
