use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ParseError;
use crate::llm::parse_structured;
use crate::memory::SegmentKind;
use crate::prompts::{CHARACTER_RECORDER_PROMPT, TASK_RECORDER_PROMPT};

/// Condition of one body part.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BodyPartStatus {
    /// Free-text condition, e.g. "fractured".
    pub status: String,
    /// Free-text severity, e.g. "severe".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<String>,
}

/// A tracked character.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CharacterProfile {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub relationships: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub last_updated_round: u32,
    #[serde(default)]
    pub is_protagonist: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_status: Option<BTreeMap<String, BodyPartStatus>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inventory: Option<Vec<String>>,
}

/// Main or side quest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    Main,
    Side,
}

/// Lifecycle of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Active,
    Completed,
    Failed,
}

impl TaskType {
    /// Get the type name as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Main => "main",
            TaskType::Side => "side",
        }
    }
}

impl std::str::FromStr for TaskType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "main" => Ok(TaskType::Main),
            "side" => Ok(TaskType::Side),
            _ => Err(format!("Unknown task type: {}", s)),
        }
    }
}

impl TaskStatus {
    /// Get the status name as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Active => "active",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "active" => Ok(TaskStatus::Active),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            _ => Err(format!("Unknown task status: {}", s)),
        }
    }
}

/// A tracked main or side task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoryTask {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type")]
    pub kind: TaskType,
    pub status: TaskStatus,
    #[serde(default)]
    pub rewards: String,
    #[serde(default)]
    pub progress: String,
    pub last_updated_round: u32,
}

/// Partial character update from the recorder. Absent fields keep their value.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CharacterUpdate {
    pub id: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub status: Option<String>,
    pub location: Option<String>,
    pub relationships: Option<String>,
    pub tags: Option<Vec<String>>,
    pub is_protagonist: Option<bool>,
    pub body_status: Option<BTreeMap<String, BodyPartStatus>>,
    pub inventory: Option<Vec<String>>,
}

/// Partial task update from the recorder. Absent fields keep their value.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TaskUpdate {
    pub id: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    /// Unrecognized values are ignored
    #[serde(rename = "type")]
    pub kind: Option<String>,
    /// Unrecognized values are ignored
    pub status: Option<String>,
    pub rewards: Option<String>,
    pub progress: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CharacterEnvelope {
    #[serde(rename = "updatedCharacters")]
    updated_characters: Vec<CharacterUpdate>,
}

#[derive(Debug, Deserialize)]
struct TaskEnvelope {
    #[serde(rename = "updatedTasks")]
    updated_tasks: Vec<TaskUpdate>,
}

fn non_empty(value: Option<&String>) -> Option<&str> {
    value.map(|s| s.trim()).filter(|s| !s.is_empty())
}

fn overlay(target: &mut String, value: &Option<String>) {
    if let Some(value) = value {
        *target = value.clone();
    }
}

/// Identity and labeling shared by updates of tracked entities.
pub trait EntityUpdate {
    /// Stable id, if the model supplied a non-empty one
    fn id(&self) -> Option<&str>;
    /// Name or title, if non-empty
    fn label(&self) -> Option<&str>;
}

impl EntityUpdate for CharacterUpdate {
    fn id(&self) -> Option<&str> {
        non_empty(self.id.as_ref())
    }

    fn label(&self) -> Option<&str> {
        non_empty(self.name.as_ref())
    }
}

impl EntityUpdate for TaskUpdate {
    fn id(&self) -> Option<&str> {
        non_empty(self.id.as_ref())
    }

    fn label(&self) -> Option<&str> {
        non_empty(self.title.as_ref())
    }
}

/// An entity the recorder keeps in sync with the story.
pub trait TrackedEntity: Clone + Send + Sync {
    /// Partial update produced by the model
    type Update: EntityUpdate + Send;

    /// Memory kind of the entity's canonical document
    const KIND: SegmentKind;
    /// Agent system prompt
    const PROMPT: &'static str;
    /// Plural noun used in prompt headings and logs
    const NOUN: &'static str;

    /// Stable id
    fn id(&self) -> &str;
    /// Name or title
    fn label(&self) -> &str;
    /// Round of the latest change
    fn last_updated_round(&self) -> u32;
    /// Canonical text mirrored into memory
    fn render(&self) -> String;
    /// Build a new entity from an update carrying a label
    fn create(update: &Self::Update, id: String, round: u32) -> Option<Self>;
    /// Overlay the fields present in `update`
    fn apply(&mut self, update: &Self::Update, round: u32);
    /// Strictly parse the model's update list
    fn parse_updates(completion: &str) -> Result<Vec<Self::Update>, ParseError>;

    /// One line for the roster of known entities
    fn roster_line(&self) -> String {
        format!("- {} (ID: {})", self.label(), self.id())
    }
}

impl TrackedEntity for CharacterProfile {
    type Update = CharacterUpdate;

    const KIND: SegmentKind = SegmentKind::CharacterProfile;
    const PROMPT: &'static str = CHARACTER_RECORDER_PROMPT;
    const NOUN: &'static str = "characters";

    fn id(&self) -> &str {
        &self.id
    }

    fn label(&self) -> &str {
        &self.name
    }

    fn last_updated_round(&self) -> u32 {
        self.last_updated_round
    }

    fn render(&self) -> String {
        let mut lines = vec![format!("Character: {} (ID: {})", self.name, self.id)];
        if self.is_protagonist {
            lines.push("Role: protagonist".to_string());
        }
        for (heading, value) in [
            ("Description", &self.description),
            ("Status", &self.status),
            ("Location", &self.location),
            ("Relationships", &self.relationships),
        ] {
            if !value.is_empty() {
                lines.push(format!("{}: {}", heading, value));
            }
        }
        if !self.tags.is_empty() {
            lines.push(format!("Tags: {}", self.tags.join(", ")));
        }
        if let Some(body) = self.body_status.as_ref().filter(|b| !b.is_empty()) {
            lines.push(format!("Body status: {}", render_body_status(body)));
        }
        if let Some(items) = self.inventory.as_ref().filter(|i| !i.is_empty()) {
            lines.push(format!("Inventory: {}", items.join(", ")));
        }
        lines.push(format!("Last updated: round {}", self.last_updated_round));
        lines.join("\n")
    }

    fn create(update: &CharacterUpdate, id: String, round: u32) -> Option<Self> {
        let name = update.label()?.to_string();
        let mut profile = CharacterProfile {
            id,
            name,
            description: String::new(),
            status: String::new(),
            location: String::new(),
            relationships: String::new(),
            tags: Vec::new(),
            last_updated_round: round,
            is_protagonist: false,
            body_status: None,
            inventory: None,
        };
        profile.apply(update, round);
        Some(profile)
    }

    fn apply(&mut self, update: &CharacterUpdate, round: u32) {
        if let Some(name) = update.label() {
            self.name = name.to_string();
        }
        overlay(&mut self.description, &update.description);
        overlay(&mut self.status, &update.status);
        overlay(&mut self.location, &update.location);
        overlay(&mut self.relationships, &update.relationships);
        if let Some(tags) = &update.tags {
            self.tags = tags.clone();
        }
        if let Some(flag) = update.is_protagonist {
            self.is_protagonist = flag;
        }
        if let Some(body) = &update.body_status {
            self.body_status = Some(body.clone());
        }
        if let Some(items) = &update.inventory {
            self.inventory = Some(items.clone());
        }
        self.last_updated_round = round;
    }

    fn parse_updates(completion: &str) -> Result<Vec<CharacterUpdate>, ParseError> {
        parse_structured::<CharacterEnvelope>(completion, "updatedCharacters object")
            .map(|e| e.updated_characters)
    }
}

impl TrackedEntity for StoryTask {
    type Update = TaskUpdate;

    const KIND: SegmentKind = SegmentKind::StoryTask;
    const PROMPT: &'static str = TASK_RECORDER_PROMPT;
    const NOUN: &'static str = "tasks";

    fn id(&self) -> &str {
        &self.id
    }

    fn label(&self) -> &str {
        &self.title
    }

    fn last_updated_round(&self) -> u32 {
        self.last_updated_round
    }

    fn render(&self) -> String {
        let mut lines = vec![
            format!("Task: {} (ID: {})", self.title, self.id),
            format!("Type: {} | Status: {}", self.kind.as_str(), self.status.as_str()),
        ];
        for (heading, value) in [
            ("Description", &self.description),
            ("Progress", &self.progress),
            ("Rewards", &self.rewards),
        ] {
            if !value.is_empty() {
                lines.push(format!("{}: {}", heading, value));
            }
        }
        lines.push(format!("Last updated: round {}", self.last_updated_round));
        lines.join("\n")
    }

    fn roster_line(&self) -> String {
        format!(
            "- {} (ID: {}) [{}][{}]",
            self.title,
            self.id,
            self.kind.as_str(),
            self.status.as_str()
        )
    }

    fn create(update: &TaskUpdate, id: String, round: u32) -> Option<Self> {
        let title = update.label()?.to_string();
        let mut task = StoryTask {
            id,
            title,
            description: String::new(),
            kind: TaskType::Side,
            status: TaskStatus::Active,
            rewards: String::new(),
            progress: String::new(),
            last_updated_round: round,
        };
        task.apply(update, round);
        Some(task)
    }

    fn apply(&mut self, update: &TaskUpdate, round: u32) {
        if let Some(title) = update.label() {
            self.title = title.to_string();
        }
        overlay(&mut self.description, &update.description);
        overlay(&mut self.rewards, &update.rewards);
        overlay(&mut self.progress, &update.progress);
        if let Some(kind) = update.kind.as_deref().and_then(|k| k.parse::<TaskType>().ok()) {
            self.kind = kind;
        }
        if let Some(status) = update.status.as_deref().and_then(|s| s.parse::<TaskStatus>().ok()) {
            self.status = status;
        }
        self.last_updated_round = round;
    }

    fn parse_updates(completion: &str) -> Result<Vec<TaskUpdate>, ParseError> {
        parse_structured::<TaskEnvelope>(completion, "updatedTasks object").map(|e| e.updated_tasks)
    }
}

fn render_body_status(body: &BTreeMap<String, BodyPartStatus>) -> String {
    body.iter()
        .map(|(part, state)| match &state.severity {
            Some(severity) => format!("{}: {} ({})", part, state.status, severity),
            None => format!("{}: {}", part, state.status),
        })
        .collect::<Vec<_>>()
        .join("; ")
}

/// The protagonist: first profile flagged as such, else one tagged "protagonist".
pub fn find_protagonist(characters: &[CharacterProfile]) -> Option<&CharacterProfile> {
    characters.iter().find(|c| c.is_protagonist).or_else(|| {
        characters.iter().find(|c| {
            c.tags
                .iter()
                .any(|t| t.eq_ignore_ascii_case("protagonist") || t == "主角")
        })
    })
}

/// Writer constraints derived from the protagonist's condition and belongings.
pub fn protagonist_constraints(protagonist: &CharacterProfile) -> String {
    let mut lines = vec![format!("[Protagonist]: {}", protagonist.name)];
    if !protagonist.status.is_empty() {
        lines.push(format!("Condition: {}", protagonist.status));
    }
    if let Some(body) = protagonist.body_status.as_ref().filter(|b| !b.is_empty()) {
        lines.push(format!(
            "Body status (actions must respect injuries): {}",
            render_body_status(body)
        ));
    }
    match protagonist.inventory.as_ref().filter(|i| !i.is_empty()) {
        Some(items) => lines.push(format!(
            "Inventory (only these items may be used): {}",
            items.join(", ")
        )),
        None => lines.push("Inventory: empty".to_string()),
    }
    lines.join("\n")
}
