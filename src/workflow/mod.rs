//! The generation workflow: session state, its reducer, and the orchestrator
//! that sequences outline discussion, drafting, critique, revision and the
//! reader-choice gate.

mod archive;
mod orchestrator;
mod reducer;
mod session;
mod store;

pub use archive::{
    is_safe_session_id, round_header, sink_from_config, ArchiveSink, FileArchiveSink,
    HttpArchiveSink, ARCHIVE_FILE_NAME,
};
pub use orchestrator::{
    Orchestrator, ReaderInput, StepOutcome, DISCUSSION_ROUNDS, TIMEOUT_FALLBACK_CHOICE,
};
pub use reducer::{apply_event, choice_marker, reduce, StreamTarget, WorkflowEvent};
pub use session::{
    new_session_id, range_label, Critique, DiscussionMessage, Draft, Expert, Outline, Phase,
    RoundSummary, Session, DEFAULT_EXPERT_COLOR,
};
pub use store::SessionStore;
