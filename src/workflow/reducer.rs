//! Pure state transitions of a [`Session`].
//!
//! Every mutation the orchestrator makes goes through [`reduce`], so
//! interleaved completions of concurrent expert calls merge by id without
//! clobbering each other.

use chrono::Utc;

use super::session::{Critique, DiscussionMessage, Draft, Outline, Phase, RoundSummary, Session};
use crate::recorder::{CharacterProfile, StoryTask};

/// Text appended to the story when a reader choice resolves.
pub fn choice_marker(choice: &str) -> String {
    format!("\n\n**[Choice] {}**", choice)
}

/// A streamed record addressed by its identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamTarget {
    /// Outline discussion message, by id.
    Discussion(String),
    /// Draft, by round and version.
    Draft {
        /// Round
        round: u32,
        /// Version
        version: u32,
    },
    /// Critique, by id.
    Critique(String),
    /// Revision brief, by round and pass.
    Summary {
        /// Round
        round: u32,
        /// Revision pass
        revision: u32,
    },
}

/// Everything that can happen to a session.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowEvent {
    /// Move to another phase.
    PhaseChanged(Phase),
    /// An expert starts speaking in the outline discussion.
    DiscussionStarted {
        /// Message id
        id: String,
        /// Speaking expert
        expert_id: String,
    },
    /// The writer or rewriter starts a new draft version.
    DraftStarted {
        /// Round
        round: u32,
        /// Version
        version: u32,
    },
    /// An expert starts a critique of the current pass.
    CritiqueStarted {
        /// Critique id
        id: String,
        /// Critiquing expert
        expert_id: String,
    },
    /// The moderator starts the revision brief of the current pass.
    SummaryStarted,
    /// Streamed content.
    Delta {
        /// Record receiving the text
        target: StreamTarget,
        /// Text to append
        text: String,
    },
    /// Streamed reasoning.
    ThinkingDelta {
        /// Record receiving the text
        target: StreamTarget,
        /// Text to append
        text: String,
    },
    /// Final text of a streamed record.
    Finished {
        /// Finished record
        target: StreamTarget,
        /// Full content
        content: String,
        /// Full reasoning, if any
        thinking: Option<String>,
    },
    /// A new outline was written. Clears the update flag and moves to drafting.
    OutlineAdded(Outline),
    /// One compaction step was applied.
    ContextCompacted {
        /// Summary of the folded chunk
        summary: String,
        /// New summarized offset
        summarized_length: usize,
    },
    /// Result of the outline-update vote of a critique pass.
    OutlineVoteTallied {
        /// Whether a strict majority voted
        passed: bool,
    },
    /// Another critique pass over the rewritten draft.
    RevisionAdvanced,
    /// The round's final text is accepted. In reader mode the session waits
    /// for options; otherwise it moves to the next round or completes.
    CycleFinalized {
        /// Finalized text
        text: String,
    },
    /// Reader options are ready.
    OptionsPresented(Vec<String>),
    /// The reader chose.
    ChoiceResolved {
        /// Chosen text
        choice: String,
    },
    /// Registries after entity analysis.
    RegistriesUpdated {
        /// Character registry
        characters: Vec<CharacterProfile>,
        /// Task registry
        tasks: Vec<StoryTask>,
    },
    /// A phase failed.
    Failed(String),
    /// The error was acknowledged.
    ErrorCleared,
    /// Explicit stop.
    Stopped,
}

/// Apply `event` to `session`, returning the new session.
pub fn reduce(mut session: Session, event: WorkflowEvent) -> Session {
    apply_event(&mut session, event);
    session
}

/// In-place form of [`reduce`].
pub fn apply_event(session: &mut Session, event: WorkflowEvent) {
    let now = Utc::now();
    match event {
        WorkflowEvent::PhaseChanged(phase) => session.status = phase,

        WorkflowEvent::DiscussionStarted { id, expert_id } => {
            session.outline_discussions.push(DiscussionMessage {
                id,
                expert_id,
                round: session.current_round,
                content: String::new(),
                thinking: None,
                timestamp: now,
            });
        }

        WorkflowEvent::DraftStarted { round, version } => {
            // A restarted pass overwrites its unfinished version.
            session
                .drafts
                .retain(|d| !(d.round == round && d.version >= version));
            session.drafts.push(Draft {
                round,
                version,
                content: String::new(),
                created_at: now,
            });
        }

        WorkflowEvent::CritiqueStarted { id, expert_id } => {
            let (round, revision) = (session.current_round, session.current_revision);
            session.critiques.retain(|c| {
                !(c.round == round && c.revision == revision && c.expert_id == expert_id)
            });
            session.critiques.push(Critique {
                id,
                expert_id,
                round: session.current_round,
                revision: session.current_revision,
                content: String::new(),
                thinking: None,
                complete: false,
                timestamp: now,
            });
        }

        WorkflowEvent::SummaryStarted => {
            let (round, revision) = (session.current_round, session.current_revision);
            session
                .summaries
                .retain(|s| !(s.round == round && s.revision == revision));
            session.summaries.push(RoundSummary {
                round: session.current_round,
                revision: session.current_revision,
                content: String::new(),
                timestamp: now,
            });
        }

        WorkflowEvent::Delta { target, text } => {
            if let Some(content) = content_mut(session, &target) {
                content.push_str(&text);
            }
        }

        WorkflowEvent::ThinkingDelta { target, text } => {
            if let Some(thinking) = thinking_mut(session, &target) {
                thinking.get_or_insert_with(String::new).push_str(&text);
            }
        }

        WorkflowEvent::Finished {
            target,
            content,
            thinking,
        } => {
            if let Some(slot) = content_mut(session, &target) {
                *slot = content;
            }
            if thinking.is_some() {
                if let Some(slot) = thinking_mut(session, &target) {
                    *slot = thinking;
                }
            }
            if let StreamTarget::Critique(id) = &target {
                if let Some(critique) = session.critiques.iter_mut().find(|c| &c.id == id) {
                    critique.complete = true;
                }
            }
        }

        WorkflowEvent::OutlineAdded(outline) => {
            session.outlines.push(outline);
            session.should_update_outline = false;
            session.status = Phase::Drafting;
        }

        WorkflowEvent::ContextCompacted {
            summary,
            summarized_length,
        } => {
            session.context_summaries.push(summary);
            let story_len = session.compiled_story.chars().count();
            session.summarized_length = summarized_length
                .max(session.summarized_length)
                .min(story_len);
        }

        WorkflowEvent::OutlineVoteTallied { passed } => {
            session.should_update_outline |= passed;
        }

        WorkflowEvent::RevisionAdvanced => {
            session.current_revision += 1;
            session.status = Phase::Critiquing;
        }

        WorkflowEvent::CycleFinalized { text } => {
            if session.compiled_story.is_empty() {
                session.compiled_story = text;
            } else {
                session.compiled_story.push_str("\n\n");
                session.compiled_story.push_str(&text);
            }
            if session.reader_choice {
                session.current_options.clear();
                session.status = Phase::SelectingOption;
            } else if session.current_round >= session.max_rounds {
                session.status = Phase::Completed;
            } else {
                session.current_round += 1;
                session.current_revision = 0;
                session.status = Phase::Drafting;
            }
        }

        WorkflowEvent::OptionsPresented(options) => {
            session.current_options = options;
            session.status = Phase::SelectingOption;
        }

        WorkflowEvent::ChoiceResolved { choice } => {
            session.compiled_story.push_str(&choice_marker(&choice));
            session.choices.insert(session.current_round, choice);
            session.current_round += 1;
            session.current_revision = 0;
            session.current_options.clear();
            session.status = Phase::Drafting;
        }

        WorkflowEvent::RegistriesUpdated { characters, tasks } => {
            session.characters = characters;
            session.tasks = tasks;
        }

        WorkflowEvent::Failed(message) => session.error = Some(message),

        WorkflowEvent::ErrorCleared => session.error = None,

        WorkflowEvent::Stopped => session.status = Phase::Completed,
    }
    session.updated_at = now;
}

fn content_mut<'a>(session: &'a mut Session, target: &StreamTarget) -> Option<&'a mut String> {
    match target {
        StreamTarget::Discussion(id) => session
            .outline_discussions
            .iter_mut()
            .find(|m| &m.id == id)
            .map(|m| &mut m.content),
        StreamTarget::Draft { round, version } => session
            .drafts
            .iter_mut()
            .rev()
            .find(|d| d.round == *round && d.version == *version)
            .map(|d| &mut d.content),
        StreamTarget::Critique(id) => session
            .critiques
            .iter_mut()
            .find(|c| &c.id == id)
            .map(|c| &mut c.content),
        StreamTarget::Summary { round, revision } => session
            .summaries
            .iter_mut()
            .rev()
            .find(|s| s.round == *round && s.revision == *revision)
            .map(|s| &mut s.content),
    }
}

fn thinking_mut<'a>(
    session: &'a mut Session,
    target: &StreamTarget,
) -> Option<&'a mut Option<String>> {
    match target {
        StreamTarget::Discussion(id) => session
            .outline_discussions
            .iter_mut()
            .find(|m| &m.id == id)
            .map(|m| &mut m.thinking),
        StreamTarget::Critique(id) => session
            .critiques
            .iter_mut()
            .find(|c| &c.id == id)
            .map(|c| &mut c.thinking),
        StreamTarget::Draft { .. } | StreamTarget::Summary { .. } => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkflowConfig;
    use crate::workflow::session::Expert;
    use pretty_assertions::assert_eq;

    fn session() -> Session {
        let experts = vec![
            Expert::new("A", "plot"),
            Expert::new("B", "style"),
            Expert::new("C", "logic"),
        ];
        Session::new("req", "world", experts, &WorkflowConfig::default()).with_id("s1")
    }

    fn apply(session: Session, events: Vec<WorkflowEvent>) -> Session {
        events.into_iter().fold(session, reduce)
    }

    #[test]
    fn test_interleaved_critique_deltas_merge_by_id() {
        let s = apply(
            session(),
            vec![
                WorkflowEvent::CritiqueStarted {
                    id: "c1".into(),
                    expert_id: "a".into(),
                },
                WorkflowEvent::CritiqueStarted {
                    id: "c2".into(),
                    expert_id: "b".into(),
                },
                WorkflowEvent::Delta {
                    target: StreamTarget::Critique("c2".into()),
                    text: "Too ".into(),
                },
                WorkflowEvent::Delta {
                    target: StreamTarget::Critique("c1".into()),
                    text: "Good".into(),
                },
                WorkflowEvent::Delta {
                    target: StreamTarget::Critique("c2".into()),
                    text: "slow".into(),
                },
                WorkflowEvent::ThinkingDelta {
                    target: StreamTarget::Critique("c1".into()),
                    text: "hmm".into(),
                },
            ],
        );
        assert_eq!(s.critiques[0].content, "Good");
        assert_eq!(s.critiques[0].thinking.as_deref(), Some("hmm"));
        assert_eq!(s.critiques[1].content, "Too slow");
        assert!(!s.critiques[1].complete);
    }

    #[test]
    fn test_finished_marks_critique_complete() {
        let s = apply(
            session(),
            vec![
                WorkflowEvent::CritiqueStarted {
                    id: "c1".into(),
                    expert_id: "a".into(),
                },
                WorkflowEvent::Finished {
                    target: StreamTarget::Critique("c1".into()),
                    content: "Final".into(),
                    thinking: None,
                },
            ],
        );
        assert!(s.critiques[0].complete);
        assert_eq!(s.critiques[0].content, "Final");
    }

    #[test]
    fn test_new_draft_version_leaves_previous_untouched() {
        let s = apply(
            session(),
            vec![
                WorkflowEvent::DraftStarted { round: 1, version: 1 },
                WorkflowEvent::Finished {
                    target: StreamTarget::Draft { round: 1, version: 1 },
                    content: "first".into(),
                    thinking: None,
                },
                WorkflowEvent::DraftStarted { round: 1, version: 2 },
                WorkflowEvent::Delta {
                    target: StreamTarget::Draft { round: 1, version: 2 },
                    text: "second".into(),
                },
            ],
        );
        assert_eq!(s.drafts.len(), 2);
        assert_eq!(s.drafts[0].content, "first");
        assert_eq!(s.pass_draft(1, 0).map(|d| d.content.as_str()), Some("first"));
        assert_eq!(s.pass_draft(1, 1).map(|d| d.content.as_str()), Some("second"));
    }

    #[test]
    fn test_restarted_draft_replaces_unfinished_version() {
        let s = apply(
            session(),
            vec![
                WorkflowEvent::DraftStarted { round: 1, version: 1 },
                WorkflowEvent::Delta {
                    target: StreamTarget::Draft { round: 1, version: 1 },
                    text: "cut off".into(),
                },
                WorkflowEvent::DraftStarted { round: 1, version: 1 },
                WorkflowEvent::Finished {
                    target: StreamTarget::Draft { round: 1, version: 1 },
                    content: "whole".into(),
                    thinking: None,
                },
            ],
        );
        assert_eq!(s.drafts.len(), 1);
        assert_eq!(s.drafts[0].version, 1);
        assert_eq!(s.drafts[0].content, "whole");
    }

    #[test]
    fn test_restarted_critique_replaces_same_expert_in_pass() {
        let s = apply(
            session(),
            vec![
                WorkflowEvent::CritiqueStarted {
                    id: "c1".into(),
                    expert_id: "a".into(),
                },
                WorkflowEvent::Finished {
                    target: StreamTarget::Critique("c1".into()),
                    content: "first try".into(),
                    thinking: None,
                },
                WorkflowEvent::CritiqueStarted {
                    id: "c2".into(),
                    expert_id: "b".into(),
                },
                WorkflowEvent::CritiqueStarted {
                    id: "c3".into(),
                    expert_id: "a".into(),
                },
            ],
        );
        let ids: Vec<&str> = s.critiques_for(1, 0).map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["c2", "c3"]);
    }

    #[test]
    fn test_choice_resolution() {
        let mut s = session();
        s.compiled_story = "Story.".into();
        let s = apply(
            s,
            vec![
                WorkflowEvent::OptionsPresented(vec!["A".into(), "B".into(), "C".into()]),
                WorkflowEvent::ChoiceResolved { choice: "B".into() },
            ],
        );
        assert!(s.compiled_story.ends_with(&choice_marker("B")));
        assert_eq!(s.current_round, 2);
        assert_eq!(s.current_revision, 0);
        assert!(s.current_options.is_empty());
        assert_eq!(s.choices.get(&1).map(String::as_str), Some("B"));
        assert_eq!(s.status, Phase::Drafting);
    }

    #[test]
    fn test_finalize_in_reader_mode_waits_for_options() {
        let s = reduce(
            session(),
            WorkflowEvent::CycleFinalized {
                text: "Chapter one.".into(),
            },
        );
        assert_eq!(s.compiled_story, "Chapter one.");
        assert_eq!(s.current_round, 1);
        assert_eq!(s.status, Phase::SelectingOption);
        assert!(s.current_options.is_empty());

        let s = reduce(
            s,
            WorkflowEvent::CycleFinalized {
                text: "Chapter two.".into(),
            },
        );
        assert_eq!(s.compiled_story, "Chapter one.\n\nChapter two.");
    }

    #[test]
    fn test_finalize_without_reader_advances_until_max_rounds() {
        let mut s = session();
        s.reader_choice = false;
        s.max_rounds = 2;
        s.current_revision = 1;

        let s = reduce(s, WorkflowEvent::CycleFinalized { text: "one".into() });
        assert_eq!(s.current_round, 2);
        assert_eq!(s.current_revision, 0);
        assert_eq!(s.status, Phase::Drafting);

        let s = reduce(s, WorkflowEvent::CycleFinalized { text: "two".into() });
        assert_eq!(s.current_round, 2);
        assert_eq!(s.status, Phase::Completed);
    }

    #[test]
    fn test_vote_flag_is_sticky_until_outline_added() {
        let s = apply(
            session(),
            vec![
                WorkflowEvent::OutlineVoteTallied { passed: true },
                WorkflowEvent::OutlineVoteTallied { passed: false },
            ],
        );
        assert!(s.should_update_outline);

        let s = reduce(s, WorkflowEvent::OutlineAdded(Outline::new(1, 5, "o")));
        assert!(!s.should_update_outline);
        assert_eq!(s.status, Phase::Drafting);
    }

    #[test]
    fn test_compaction_never_passes_story_length() {
        let mut s = session();
        s.compiled_story = "x".repeat(100);
        let s = reduce(
            s,
            WorkflowEvent::ContextCompacted {
                summary: "sum".into(),
                summarized_length: 500,
            },
        );
        assert_eq!(s.summarized_length, 100);
        assert_eq!(s.context_summaries, vec!["sum".to_string()]);
    }

    #[test]
    fn test_failure_and_clear() {
        let s = reduce(session(), WorkflowEvent::Failed("boom".into()));
        assert_eq!(s.error.as_deref(), Some("boom"));
        let s = reduce(s, WorkflowEvent::ErrorCleared);
        assert!(s.error.is_none());
    }
}
