use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::WorkflowConfig;
use crate::recorder::{CharacterProfile, StoryTask};

/// Avatar color used when an expert has none.
pub const DEFAULT_EXPERT_COLOR: &str = "#64748b";

/// Generate a session id: a timestamp that is also a safe path segment.
pub fn new_session_id() -> String {
    Utc::now().format("%Y-%m-%d_%H-%M-%S").to_string()
}

/// A reviewing expert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Expert {
    /// Stable id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Area of expertise.
    pub field: String,
    /// Personality used to voice the critique.
    #[serde(default)]
    pub personality: String,
    /// Position the expert starts from.
    #[serde(default)]
    pub initial_stance: String,
    /// Avatar color, hex.
    #[serde(default = "default_color")]
    pub color: String,
}

fn default_color() -> String {
    DEFAULT_EXPERT_COLOR.to_string()
}

impl Expert {
    /// Create an expert with a fresh id.
    pub fn new(name: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            field: field.into(),
            personality: String::new(),
            initial_stance: String::new(),
            color: default_color(),
        }
    }

    /// Set the personality.
    pub fn with_personality(mut self, personality: impl Into<String>) -> Self {
        self.personality = personality.into();
        self
    }

    /// Set the initial stance.
    pub fn with_initial_stance(mut self, stance: impl Into<String>) -> Self {
        self.initial_stance = stance.into();
        self
    }

    /// The moderator added to panels of more than two experts.
    pub fn moderator() -> Self {
        Self {
            id: "moderator-1".to_string(),
            name: "Moderator".to_string(),
            field: "Synthesis and coordination".to_string(),
            personality: "Objective, rational, good at summarizing".to_string(),
            initial_stance: "Neutral".to_string(),
            color: "#8b5cf6".to_string(),
        }
    }
}

/// Mid-range guidance covering a contiguous span of rounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Outline {
    /// Label, e.g. "Rounds 1-5".
    pub range: String,
    pub start_round: u32,
    pub end_round: u32,
    pub content: String,
}

impl Outline {
    /// Outline covering `span` rounds starting at `start_round`.
    pub fn new(start_round: u32, span: u32, content: impl Into<String>) -> Self {
        let end_round = start_round + span.max(1) - 1;
        Self {
            range: range_label(start_round, end_round),
            start_round,
            end_round,
            content: content.into(),
        }
    }

    /// Whether the outline covers `round`.
    pub fn covers(&self, round: u32) -> bool {
        (self.start_round..=self.end_round).contains(&round)
    }

    /// 1-based position of `round` within the outline.
    pub fn stage(&self, round: u32) -> u32 {
        round.saturating_sub(self.start_round) + 1
    }

    /// Number of rounds covered.
    pub fn span(&self) -> u32 {
        self.end_round - self.start_round + 1
    }
}

/// "Rounds N-M"
pub fn range_label(start_round: u32, end_round: u32) -> String {
    format!("Rounds {}-{}", start_round, end_round)
}

/// One expert contribution to the outline discussion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscussionMessage {
    pub id: String,
    pub expert_id: String,
    /// Story round the outline is being discussed for.
    pub round: u32,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// One version of a round's text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Draft {
    pub round: u32,
    /// 1 for the first pass, n for revision n-1.
    pub version: u32,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl Draft {
    /// Version critiqued in revision pass `revision` (0-based).
    ///
    /// The first draft is version 1; the rewrite at the end of pass n is
    /// critiqued in pass n+1.
    pub fn version_for_pass(revision: u32) -> u32 {
        revision + 1
    }
}

/// One expert's critique of a draft.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Critique {
    pub id: String,
    pub expert_id: String,
    pub round: u32,
    /// Revision pass the critique belongs to, 0-based.
    pub revision: u32,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
    /// Set once the critique finished streaming.
    pub complete: bool,
    pub timestamp: DateTime<Utc>,
}

/// The moderator's revision brief for a pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundSummary {
    pub round: u32,
    pub revision: u32,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// Orchestrator phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Created, not started.
    #[default]
    Setup,
    /// Experts negotiate the next outline.
    OutlineDiscussion,
    /// The writer drafts the round.
    Drafting,
    /// Experts critique the draft in parallel.
    Critiquing,
    /// The moderator condenses critiques.
    Summarizing,
    /// The draft is rewritten.
    Revising,
    /// Waiting for the reader's choice.
    SelectingOption,
    /// Stopped.
    Completed,
}

impl Phase {
    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Setup => "setup",
            Phase::OutlineDiscussion => "outline_discussion",
            Phase::Drafting => "drafting",
            Phase::Critiquing => "critiquing",
            Phase::Summarizing => "summarizing",
            Phase::Revising => "revising",
            Phase::SelectingOption => "selecting_option",
            Phase::Completed => "completed",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The root aggregate of one creative run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub requirements: String,
    pub worldview: String,
    pub outlines: Vec<Outline>,
    pub outline_discussions: Vec<DiscussionMessage>,
    /// Canonical finalized text, append-only.
    pub compiled_story: String,
    pub context_summaries: Vec<String>,
    /// Characters of `compiled_story` folded into `context_summaries`.
    pub summarized_length: usize,
    pub experts: Vec<Expert>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub moderator: Option<Expert>,
    pub drafts: Vec<Draft>,
    pub critiques: Vec<Critique>,
    pub summaries: Vec<RoundSummary>,
    pub current_round: u32,
    pub current_revision: u32,
    pub max_revisions: u32,
    pub max_rounds: u32,
    pub outline_span: u32,
    pub status: Phase,
    pub characters: Vec<CharacterProfile>,
    pub tasks: Vec<StoryTask>,
    pub current_options: Vec<String>,
    /// Reader choices keyed by the round they closed.
    pub choices: BTreeMap<u32, String>,
    pub should_update_outline: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub enable_thinking: bool,
    pub reader_choice: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new(String::new(), String::new(), Vec::new(), &WorkflowConfig::default())
    }
}

impl Session {
    /// Create a session in [`Phase::Setup`].
    ///
    /// A moderator is added when there are more than two experts.
    pub fn new(
        requirements: impl Into<String>,
        worldview: impl Into<String>,
        experts: Vec<Expert>,
        config: &WorkflowConfig,
    ) -> Self {
        let now = Utc::now();
        let moderator = (experts.len() > 2).then(Expert::moderator);
        Self {
            id: new_session_id(),
            requirements: requirements.into(),
            worldview: worldview.into(),
            outlines: Vec::new(),
            outline_discussions: Vec::new(),
            compiled_story: String::new(),
            context_summaries: Vec::new(),
            summarized_length: 0,
            experts,
            moderator,
            drafts: Vec::new(),
            critiques: Vec::new(),
            summaries: Vec::new(),
            current_round: 1,
            current_revision: 0,
            max_revisions: config.max_revisions.max(1),
            max_rounds: config.max_rounds,
            outline_span: config.outline_span.max(1),
            status: Phase::Setup,
            characters: Vec::new(),
            tasks: Vec::new(),
            current_options: Vec::new(),
            choices: BTreeMap::new(),
            should_update_outline: false,
            error: None,
            enable_thinking: config.enable_thinking,
            reader_choice: config.reader_choice,
            created_at: now,
            updated_at: now,
        }
    }

    /// Use a specific id instead of the timestamp.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// The most recent outline covering `round`.
    pub fn outline_for(&self, round: u32) -> Option<&Outline> {
        self.outlines.iter().rev().find(|o| o.covers(round))
    }

    /// Whether the current round needs an outline discussion first.
    pub fn needs_outline(&self) -> bool {
        self.should_update_outline || self.outline_for(self.current_round).is_none()
    }

    /// Draft critiqued in revision pass `revision` of `round`.
    pub fn pass_draft(&self, round: u32, revision: u32) -> Option<&Draft> {
        let version = Draft::version_for_pass(revision);
        self.drafts
            .iter()
            .find(|d| d.round == round && d.version == version)
    }

    /// Revision brief for a pass, if written.
    pub fn summary_for(&self, round: u32, revision: u32) -> Option<&RoundSummary> {
        self.summaries
            .iter()
            .rev()
            .find(|s| s.round == round && s.revision == revision)
    }

    /// Critiques of one pass, in start order.
    pub fn critiques_for(&self, round: u32, revision: u32) -> impl Iterator<Item = &Critique> {
        self.critiques
            .iter()
            .filter(move |c| c.round == round && c.revision == revision)
    }

    /// Choice that closed the previous round.
    pub fn previous_choice(&self) -> Option<&str> {
        self.choices
            .get(&self.current_round.saturating_sub(1))
            .map(String::as_str)
    }

    /// Look an expert (or the moderator) up by id.
    pub fn expert(&self, id: &str) -> Option<&Expert> {
        self.experts
            .iter()
            .chain(self.moderator.iter())
            .find(|e| e.id == id)
    }
}
