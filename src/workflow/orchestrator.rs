use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use rand::seq::SliceRandom;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::archive::ArchiveSink;
use super::reducer::{StreamTarget, WorkflowEvent};
use super::session::{range_label, Draft, Expert, Outline, Phase, Session};
use super::store::SessionStore;
use crate::agents::{
    ignore_events, outline_vote_passes, requests_outline_update, AgentSettings, Agents,
    CritiqueInput, OutlineBrief, WritingBrief,
};
use crate::config::WorkflowConfig;
use crate::context::{assemble_context, unsummarized, ContextCompactor};
use crate::error::{LlmError, LlmResult, WorkflowError, WorkflowResult};
use crate::llm::{ChatEvent, Completion, CompletionService};
use crate::memory::{MemoryStore, SegmentKind, SegmentMetadata};
use crate::recorder::{find_protagonist, protagonist_constraints, EntityRecorder};

/// Sequential expert rounds per outline discussion.
pub const DISCUSSION_ROUNDS: usize = 2;

/// Choice submitted when the gate times out with no options.
pub const TIMEOUT_FALLBACK_CHOICE: &str = "Keep observing";

/// Characters of recent story shown to outline contributors.
const OUTLINE_STORY_CHARS: usize = 3000;

/// What the reader submitted at the choice gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReaderInput {
    /// Index into the presented options.
    Option(usize),
    /// Free-text action.
    FreeText(String),
}

/// Result of one [`Orchestrator::step`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// A phase ran; the session is now in this phase.
    Advanced(Phase),
    /// Waiting at the choice gate with these options.
    AwaitingChoice(Vec<String>),
    /// The session is completed.
    Completed,
}

struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Drives a session through its phases.
///
/// One phase runs at a time. Outbound calls of a phase share the caller's
/// cancellation token; cancelling leaves the session in the phase it was in,
/// and the next [`step`](Self::step) re-enters that phase.
pub struct Orchestrator {
    store: Arc<SessionStore>,
    agents: Agents,
    memory: Arc<MemoryStore>,
    recorder: EntityRecorder,
    compactor: ContextCompactor,
    archive: Option<Arc<dyn ArchiveSink>>,
    config: WorkflowConfig,
    busy: AtomicBool,
}

impl Orchestrator {
    /// Create an orchestrator for `session`.
    pub fn new(
        session: Session,
        llm: Arc<dyn CompletionService>,
        memory: Arc<MemoryStore>,
        settings: AgentSettings,
        config: WorkflowConfig,
    ) -> Self {
        let recorder = EntityRecorder::new(llm.clone(), memory.clone(), settings.model.clone());
        let agents = Agents::new(llm, memory.clone(), settings);
        Self {
            store: Arc::new(SessionStore::new(session)),
            agents,
            memory,
            recorder,
            compactor: ContextCompactor::default(),
            archive: None,
            config,
            busy: AtomicBool::new(false),
        }
    }

    /// Archive finalized rounds to `sink`.
    pub fn with_archive(mut self, sink: Arc<dyn ArchiveSink>) -> Self {
        self.archive = Some(sink);
        self
    }

    /// Use a custom compactor.
    pub fn with_compactor(mut self, compactor: ContextCompactor) -> Self {
        self.compactor = compactor;
        self
    }

    /// Current session state.
    pub fn session(&self) -> Session {
        self.store.snapshot()
    }

    /// Receiver of every session change.
    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.store.subscribe()
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.store.read(|s| s.status)
    }

    /// Enter the workflow from [`Phase::Setup`].
    ///
    /// Seeds the worldview into memory and moves to the outline discussion
    /// when no outline covers the current round, to drafting otherwise. In
    /// any other phase this only clears a pending error.
    pub async fn begin(&self) -> WorkflowResult<Phase> {
        let session = self.store.snapshot();
        if session.error.is_some() {
            self.store.dispatch(WorkflowEvent::ErrorCleared);
        }
        if session.status != Phase::Setup {
            return Ok(session.status);
        }
        if session.experts.is_empty() {
            return Err(WorkflowError::NoExperts);
        }

        if !session.worldview.trim().is_empty() {
            let metadata = SegmentMetadata::new(SegmentKind::Worldview, 0);
            if let Err(e) = self.memory.add(&session.worldview, metadata).await {
                warn!(error = %e, "Failed to store worldview in memory");
            }
        }

        let phase = if session.needs_outline() {
            Phase::OutlineDiscussion
        } else {
            Phase::Drafting
        };
        self.store.dispatch(WorkflowEvent::PhaseChanged(phase));
        info!(session_id = %session.id, phase = %phase, "Workflow started");
        Ok(phase)
    }

    /// [`begin`](Self::begin), then [`run`](Self::run).
    pub async fn start(&self, cancel: &CancellationToken) -> WorkflowResult<StepOutcome> {
        self.begin().await?;
        self.run(cancel).await
    }

    /// Step until the session waits for a choice or completes.
    pub async fn run(&self, cancel: &CancellationToken) -> WorkflowResult<StepOutcome> {
        loop {
            match self.step(cancel).await? {
                StepOutcome::Advanced(_) => continue,
                outcome => return Ok(outcome),
            }
        }
    }

    /// Run the current phase once.
    pub async fn step(&self, cancel: &CancellationToken) -> WorkflowResult<StepOutcome> {
        let _guard = self.acquire()?;
        if cancel.is_cancelled() {
            return Err(WorkflowError::Cancelled);
        }

        let phase = self.phase();
        let start = Instant::now();
        let result = match phase {
            Phase::Setup => return self.begin().await.map(StepOutcome::Advanced),
            Phase::Completed => return Ok(StepOutcome::Completed),
            Phase::SelectingOption => self.present_options(cancel).await,
            Phase::Drafting if self.store.read(Session::needs_outline) => {
                self.store
                    .dispatch(WorkflowEvent::PhaseChanged(Phase::OutlineDiscussion));
                Ok(StepOutcome::Advanced(Phase::OutlineDiscussion))
            }
            Phase::OutlineDiscussion => self.run_outline_discussion(cancel).await.map(StepOutcome::Advanced),
            Phase::Drafting => self.run_drafting(cancel).await.map(StepOutcome::Advanced),
            Phase::Critiquing => self.run_critiques(cancel).await.map(StepOutcome::Advanced),
            Phase::Summarizing => self.run_summary(cancel).await.map(StepOutcome::Advanced),
            Phase::Revising => self.run_revision(cancel).await.map(StepOutcome::Advanced),
        };

        match result {
            Ok(outcome) => {
                info!(
                    phase = %phase,
                    outcome = ?outcome,
                    latency_ms = start.elapsed().as_millis() as u64,
                    "Phase finished"
                );
                Ok(outcome)
            }
            Err(e) if e.is_cancelled() => {
                info!(phase = %phase, "Phase cancelled");
                Err(WorkflowError::Cancelled)
            }
            Err(e) => {
                error!(phase = %phase, error = %e, "Phase failed");
                self.store.dispatch(WorkflowEvent::Failed(e.to_string()));
                Err(e)
            }
        }
    }

    /// Resolve the choice gate. Returns the chosen text.
    pub fn submit_choice(&self, input: ReaderInput) -> WorkflowResult<String> {
        let session = self.store.snapshot();
        if session.status != Phase::SelectingOption {
            return Err(WorkflowError::InvalidPhase {
                phase: session.status.to_string(),
                operation: "submit_choice".to_string(),
            });
        }

        let choice = match input {
            ReaderInput::Option(index) => session
                .current_options
                .get(index)
                .cloned()
                .ok_or_else(|| WorkflowError::InvalidChoice {
                    message: format!(
                        "option {} out of {}",
                        index,
                        session.current_options.len()
                    ),
                })?,
            ReaderInput::FreeText(text) => {
                let text = text.trim();
                if text.is_empty() {
                    return Err(WorkflowError::InvalidChoice {
                        message: "empty choice".to_string(),
                    });
                }
                text.to_string()
            }
        };

        info!(round = session.current_round, choice = %choice, "Reader choice resolved");
        self.store.dispatch(WorkflowEvent::ChoiceResolved {
            choice: choice.clone(),
        });
        Ok(choice)
    }

    /// A uniformly random presented option, or the fixed fallback.
    pub fn timeout_choice(&self) -> String {
        self.store.read(|s| {
            s.current_options
                .choose(&mut rand::thread_rng())
                .cloned()
                .unwrap_or_else(|| TIMEOUT_FALLBACK_CHOICE.to_string())
        })
    }

    /// Wait for reader input until the configured timeout, then submit
    /// [`timeout_choice`](Self::timeout_choice). Invalid inputs are skipped.
    pub async fn await_choice(
        &self,
        inputs: &mut mpsc::Receiver<ReaderInput>,
        cancel: &CancellationToken,
    ) -> WorkflowResult<String> {
        let deadline = tokio::time::sleep(Duration::from_millis(self.config.choice_timeout_ms));
        tokio::pin!(deadline);
        let mut open = true;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(WorkflowError::Cancelled),
                input = inputs.recv(), if open => match input {
                    Some(input) => match self.submit_choice(input) {
                        Ok(choice) => return Ok(choice),
                        Err(WorkflowError::InvalidChoice { message }) => {
                            warn!(message = %message, "Ignoring invalid reader input");
                        }
                        Err(e) => return Err(e),
                    },
                    None => open = false,
                },
                _ = &mut deadline => {
                    let choice = self.timeout_choice();
                    info!(choice = %choice, "Choice window expired");
                    return self.submit_choice(ReaderInput::FreeText(choice));
                }
            }
        }
    }

    /// Mark the session completed.
    pub fn stop(&self) {
        self.store.dispatch(WorkflowEvent::Stopped);
    }

    /// Clear the session error.
    pub fn clear_error(&self) {
        self.store.dispatch(WorkflowEvent::ErrorCleared);
    }

    fn acquire(&self) -> WorkflowResult<BusyGuard<'_>> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| WorkflowError::Busy)?;
        Ok(BusyGuard(&self.busy))
    }

    /// Observer publishing streamed events into `target`.
    fn stream_observer(&self, target: StreamTarget) -> impl FnMut(&ChatEvent) + Send + '_ {
        let store = self.store.as_ref();
        move |event: &ChatEvent| match event {
            ChatEvent::ContentDelta(text) => store.dispatch(WorkflowEvent::Delta {
                target: target.clone(),
                text: text.clone(),
            }),
            ChatEvent::ThinkingDelta(text) => store.dispatch(WorkflowEvent::ThinkingDelta {
                target: target.clone(),
                text: text.clone(),
            }),
            ChatEvent::ToolCallRequested(call) => {
                debug!(tool = %call.function.name, "Tool call during stream");
            }
        }
    }

    fn finish(&self, target: StreamTarget, completion: &Completion) {
        let thinking = (!completion.thinking.is_empty()).then(|| completion.thinking.clone());
        self.store.dispatch(WorkflowEvent::Finished {
            target,
            content: completion.content.trim().to_string(),
            thinking,
        });
    }

    fn writing_brief(&self, session: &Session, context: String) -> WritingBrief {
        let round = session.current_round;
        let outline = session.outline_for(round);
        WritingBrief {
            round,
            requirements: session.requirements.clone(),
            worldview: session.worldview.clone(),
            outline: outline.map(|o| o.content.clone()),
            outline_stage: outline.map(|o| {
                format!(
                    "Stage {} of {} of the outline for {}.",
                    o.stage(round),
                    o.span(),
                    o.range
                )
            }),
            choice: session.previous_choice().map(str::to_string),
            protagonist: find_protagonist(&session.characters).map(protagonist_constraints),
            context,
        }
    }

    async fn run_outline_discussion(&self, cancel: &CancellationToken) -> WorkflowResult<Phase> {
        let session = self.store.snapshot();
        if session.experts.is_empty() {
            return Err(WorkflowError::NoExperts);
        }

        let start_round = session.current_round;
        let span = session.outline_span.max(1);
        let range = range_label(start_round, start_round + span - 1);
        let history = session
            .outlines
            .iter()
            .map(|o| format!("[{}]\n{}", o.range, o.content))
            .collect::<Vec<_>>()
            .join("\n\n");
        let recent = unsummarized(&session.compiled_story, session.summarized_length);
        let recent_start = recent.chars().count().saturating_sub(OUTLINE_STORY_CHARS);
        let recent: String = recent.chars().skip(recent_start).collect();
        let story = assemble_context(&session.context_summaries, &recent);

        let mut transcript: Vec<String> = Vec::new();
        let mut opinions = String::new();
        for discussion_round in 0..DISCUSSION_ROUNDS {
            if discussion_round > 0 && self.config.speaker_delay_ms > 0 {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(WorkflowError::Cancelled),
                    _ = tokio::time::sleep(Duration::from_millis(self.config.speaker_delay_ms)) => {}
                }
            }

            let brief = OutlineBrief {
                range: range.clone(),
                worldview: session.worldview.clone(),
                history: history.clone(),
                story: story.clone(),
                opinions: opinions.clone(),
            };
            let results = join_all(
                session
                    .experts
                    .iter()
                    .map(|expert| self.contribute(expert, &brief, cancel)),
            )
            .await;
            let contributions = settle(results)?;

            opinions = session
                .experts
                .iter()
                .zip(&contributions)
                .map(|(expert, content)| format!("{} ({}): {}", expert.name, expert.field, content))
                .collect::<Vec<_>>()
                .join("\n\n");
            debug!(discussion_round, chars = opinions.len(), "Outline discussion round done");
            transcript.push(opinions.clone());
        }

        let completion = self
            .agents
            .summarize_outline(&range, &transcript.join("\n\n"), cancel, &mut ignore_events)
            .await?;
        let outline = Outline::new(start_round, span, completion.content.trim());
        let content = outline.content.clone();
        self.store.dispatch(WorkflowEvent::OutlineAdded(outline));

        let metadata = SegmentMetadata::new(SegmentKind::Outline, start_round);
        if let Err(e) = self.memory.add(&content, metadata).await {
            warn!(error = %e, "Failed to store outline in memory");
        }

        info!(range = %range, "Outline added");
        Ok(Phase::Drafting)
    }

    async fn contribute(
        &self,
        expert: &Expert,
        brief: &OutlineBrief,
        cancel: &CancellationToken,
    ) -> LlmResult<String> {
        let id = Uuid::new_v4().to_string();
        self.store.dispatch(WorkflowEvent::DiscussionStarted {
            id: id.clone(),
            expert_id: expert.id.clone(),
        });

        let target = StreamTarget::Discussion(id);
        let mut observer = self.stream_observer(target.clone());
        let completion = self
            .agents
            .outline_contribution(expert, brief, cancel, &mut observer)
            .await?;
        self.finish(target, &completion);
        Ok(completion.content.trim().to_string())
    }

    async fn run_drafting(&self, cancel: &CancellationToken) -> WorkflowResult<Phase> {
        let session = self.store.snapshot();
        let round = session.current_round;

        let agents = &self.agents;
        let prepared = self
            .compactor
            .prepare(
                &session.compiled_story,
                &session.context_summaries,
                session.summarized_length,
                move |chunk: String| async move { agents.summarize_story(&chunk, cancel).await },
            )
            .await?;

        if let Some(compaction) = prepared.compaction {
            self.store.dispatch(WorkflowEvent::ContextCompacted {
                summary: compaction.summary.clone(),
                summarized_length: compaction.summarized_length,
            });
            let metadata = SegmentMetadata::new(SegmentKind::Summary, round);
            if let Err(e) = self.memory.add(&compaction.summary, metadata).await {
                warn!(error = %e, "Failed to store story summary in memory");
            }
        }

        let brief = self.writing_brief(&session, prepared.context);
        let version = Draft::version_for_pass(session.current_revision);
        self.store
            .dispatch(WorkflowEvent::DraftStarted { round, version });

        let target = StreamTarget::Draft { round, version };
        let mut observer = self.stream_observer(target.clone());
        let completion = self
            .agents
            .write_draft(&brief, cancel, &mut observer)
            .await?;
        self.finish(target, &completion);

        self.store
            .dispatch(WorkflowEvent::PhaseChanged(Phase::Critiquing));
        Ok(Phase::Critiquing)
    }

    async fn run_critiques(&self, cancel: &CancellationToken) -> WorkflowResult<Phase> {
        let session = self.store.snapshot();
        if session.experts.is_empty() {
            return Err(WorkflowError::NoExperts);
        }
        let round = session.current_round;
        let draft = session
            .pass_draft(round, session.current_revision)
            .ok_or(WorkflowError::MissingDraft { round })?
            .content
            .clone();
        let brief = self.writing_brief(&session, String::new());

        let results = join_all(
            session
                .experts
                .iter()
                .map(|expert| self.critique(expert, &brief, &draft, cancel)),
        )
        .await;
        let critiques = settle(results)?;

        let votes = critiques
            .iter()
            .filter(|c| requests_outline_update(c))
            .count();
        let passed = outline_vote_passes(votes, session.experts.len());
        self.store
            .dispatch(WorkflowEvent::OutlineVoteTallied { passed });
        info!(
            round,
            revision = session.current_revision,
            votes,
            experts = session.experts.len(),
            passed,
            "Critiques collected"
        );

        self.store
            .dispatch(WorkflowEvent::PhaseChanged(Phase::Summarizing));
        Ok(Phase::Summarizing)
    }

    async fn critique(
        &self,
        expert: &Expert,
        brief: &WritingBrief,
        draft: &str,
        cancel: &CancellationToken,
    ) -> LlmResult<String> {
        let id = Uuid::new_v4().to_string();
        self.store.dispatch(WorkflowEvent::CritiqueStarted {
            id: id.clone(),
            expert_id: expert.id.clone(),
        });

        let target = StreamTarget::Critique(id);
        let mut observer = self.stream_observer(target.clone());
        let completion = self
            .agents
            .critique(expert, brief, draft, cancel, &mut observer)
            .await?;
        self.finish(target, &completion);
        Ok(completion.content)
    }

    async fn run_summary(&self, cancel: &CancellationToken) -> WorkflowResult<Phase> {
        let session = self.store.snapshot();
        let round = session.current_round;
        let revision = session.current_revision;
        let draft = session
            .pass_draft(round, revision)
            .ok_or(WorkflowError::MissingDraft { round })?
            .content
            .clone();

        let inputs: Vec<CritiqueInput> = session
            .critiques_for(round, revision)
            .filter(|c| c.complete)
            .map(|c| CritiqueInput {
                expert: session
                    .expert(&c.expert_id)
                    .map(|e| e.name.clone())
                    .unwrap_or_else(|| c.expert_id.clone()),
                content: c.content.clone(),
            })
            .collect();

        self.store.dispatch(WorkflowEvent::SummaryStarted);
        let target = StreamTarget::Summary { round, revision };
        let mut observer = self.stream_observer(target.clone());
        let completion = self
            .agents
            .summarize_critiques(&draft, &inputs, cancel, &mut observer)
            .await?;
        self.finish(target, &completion);

        self.store
            .dispatch(WorkflowEvent::PhaseChanged(Phase::Revising));
        Ok(Phase::Revising)
    }

    async fn run_revision(&self, cancel: &CancellationToken) -> WorkflowResult<Phase> {
        let session = self.store.snapshot();
        let round = session.current_round;
        let revision = session.current_revision;
        let draft = session
            .pass_draft(round, revision)
            .ok_or(WorkflowError::MissingDraft { round })?
            .content
            .clone();
        let revision_brief = session
            .summary_for(round, revision)
            .ok_or(WorkflowError::MissingSummary { round })?
            .content
            .clone();
        let brief = self.writing_brief(&session, String::new());

        let version = Draft::version_for_pass(revision + 1);
        self.store
            .dispatch(WorkflowEvent::DraftStarted { round, version });
        let target = StreamTarget::Draft { round, version };
        let mut observer = self.stream_observer(target.clone());
        let completion = self
            .agents
            .rewrite(&brief, &draft, &revision_brief, cancel, &mut observer)
            .await?;
        self.finish(target, &completion);

        if revision + 1 < session.max_revisions {
            self.store.dispatch(WorkflowEvent::RevisionAdvanced);
            return Ok(Phase::Critiquing);
        }

        self.finalize(&session, completion.content.trim().to_string(), cancel)
            .await
    }

    async fn finalize(
        &self,
        session: &Session,
        text: String,
        cancel: &CancellationToken,
    ) -> WorkflowResult<Phase> {
        let round = session.current_round;
        self.store
            .dispatch(WorkflowEvent::CycleFinalized { text: text.clone() });

        let metadata = SegmentMetadata::new(SegmentKind::Narrative, round);
        if let Err(e) = self.memory.add(&text, metadata).await {
            warn!(round, error = %e, "Failed to store narrative in memory");
        }

        if let Some(sink) = self.archive.clone() {
            let session_id = session.id.clone();
            let content = text.clone();
            tokio::spawn(async move {
                if let Err(e) = sink.append(&session_id, round, &content).await {
                    warn!(session_id = %session_id, round, error = %e, "Archiving failed");
                }
            });
        }

        let (characters, tasks) = tokio::join!(
            self.recorder
                .analyze_characters(&text, &session.characters, round, cancel),
            self.recorder
                .analyze_tasks(&text, &session.tasks, round, cancel),
        );
        info!(
            round,
            characters = characters.len(),
            tasks = tasks.len(),
            "Cycle finalized"
        );
        self.store
            .dispatch(WorkflowEvent::RegistriesUpdated { characters, tasks });

        if !session.reader_choice {
            return Ok(self.phase());
        }
        self.present_options(cancel).await.map(|_| Phase::SelectingOption)
    }

    /// Generate options if none are pending.
    async fn present_options(&self, cancel: &CancellationToken) -> WorkflowResult<StepOutcome> {
        let (pending, story) = self
            .store
            .read(|s| (s.current_options.clone(), s.compiled_story.clone()));
        if !pending.is_empty() {
            return Ok(StepOutcome::AwaitingChoice(pending));
        }

        let options = self.agents.generate_options(&story, cancel).await?;
        self.store
            .dispatch(WorkflowEvent::OptionsPresented(options.clone()));
        Ok(StepOutcome::AwaitingChoice(options))
    }
}

/// All results, or the first error. Cancellation wins over other errors.
fn settle<T>(results: Vec<LlmResult<T>>) -> LlmResult<Vec<T>> {
    if results
        .iter()
        .any(|r| matches!(r, Err(LlmError::Cancelled)))
    {
        return Err(LlmError::Cancelled);
    }
    results.into_iter().collect()
}
