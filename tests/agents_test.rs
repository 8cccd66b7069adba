//! Agent role tests against a scripted generation service.

mod common;

use std::sync::Arc;

use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;

use common::{default_reply, memory, text, Reply, Role, ScriptedLlm};
use novel_workshop::agents::{
    ignore_events, AgentSettings, Agents, CritiqueInput, WritingBrief, FALLBACK_OPTIONS,
    SUMMARY_FALLBACK_CHARS, WORLDVIEW_FALLBACK,
};
use novel_workshop::error::LlmError;
use novel_workshop::llm::{ChatEvent, ChatMessage};
use novel_workshop::memory::{MemoryStore, SegmentKind, SegmentMetadata};
use novel_workshop::workflow::Expert;

fn agents(llm: Arc<ScriptedLlm>, memory: Arc<MemoryStore>) -> Agents {
    Agents::new(llm, memory, AgentSettings::default())
}

fn brief() -> WritingBrief {
    WritingBrief {
        round: 2,
        requirements: "A flooded archive mystery".to_string(),
        worldview: "A drowned continent".to_string(),
        choice: Some("Open the vault".to_string()),
        ..WritingBrief::default()
    }
}

fn has_tool_result(messages: &[ChatMessage]) -> bool {
    messages
        .iter()
        .any(|m| matches!(m, ChatMessage::Tool { .. }))
}

#[tokio::test]
async fn test_tool_call_answered_from_memory() {
    let memory = memory();
    memory
        .add(
            "Mira broke her left arm in the fall.",
            SegmentMetadata::new(SegmentKind::Narrative, 1),
        )
        .await
        .unwrap();

    let llm = ScriptedLlm::new(|role, request| match role {
        Role::Writer if !has_tool_result(&request.messages) => {
            Reply::Tool(vec!["Mira arm".to_string()])
        }
        role => default_reply(role),
    });
    let agents = agents(llm.clone(), memory);

    let completion = agents
        .write_draft(&brief(), &CancellationToken::new(), &mut ignore_events)
        .await
        .unwrap();

    assert!(completion.content.contains("flooded archive"));
    assert_eq!(llm.calls(Role::Writer), 2);

    let requests = llm.requests();
    let follow_up = &requests[1].1;
    let tool_result = follow_up
        .messages
        .iter()
        .find_map(|m| match m {
            ChatMessage::Tool { content, .. } => Some(content.clone()),
            _ => None,
        })
        .unwrap();
    assert!(tool_result.starts_with("Query: Mira arm"));
    assert!(tool_result.contains("Mira broke her left arm"));
    assert!(tool_result.contains("[round 1, narrative]"));
    assert!(matches!(
        &follow_up.messages[2],
        ChatMessage::Assistant { tool_calls: Some(calls), .. } if calls.len() == 1
    ));
}

#[tokio::test]
async fn test_tool_loop_bound_is_fatal() {
    let llm = ScriptedLlm::new(|role, _| match role {
        Role::Writer => Reply::Tool(vec!["anything".to_string()]),
        role => default_reply(role),
    });
    let agents = agents(llm.clone(), memory());

    let result = agents
        .write_draft(&brief(), &CancellationToken::new(), &mut ignore_events)
        .await;

    assert!(matches!(result, Err(LlmError::ToolLoopExceeded { limit: 3 })));
    assert_eq!(llm.calls(Role::Writer), 4);
}

#[tokio::test]
async fn test_draft_request_carries_choice_and_tool() {
    let llm = ScriptedLlm::with_defaults();
    let agents = agents(llm.clone(), memory());

    agents
        .write_draft(&brief(), &CancellationToken::new(), &mut ignore_events)
        .await
        .unwrap();

    let (_, request) = &llm.requests()[0];
    assert!(request.tools.is_some());
    assert!(common::system_prompt(request).contains("[Reader's choice]: Open the vault"));
    assert!(common::user_prompt(request).contains("This is the opening of the story."));
}

#[tokio::test]
async fn test_observer_sees_thinking_and_content() {
    let llm = ScriptedLlm::new(|role, _| match role {
        Role::Critic => Reply::Thinking {
            thinking: "Check the tide tables.".to_string(),
            content: "The tide is wrong.".to_string(),
        },
        role => default_reply(role),
    });
    let agents = agents(llm, memory());
    let expert = Expert::new("Lin", "logic");

    let mut events = Vec::new();
    let mut observer = |event: &ChatEvent| events.push(event.clone());
    let completion = agents
        .critique(&expert, &brief(), "Draft text", &CancellationToken::new(), &mut observer)
        .await
        .unwrap();

    assert_eq!(completion.thinking, "Check the tide tables.");
    assert_eq!(completion.content, "The tide is wrong.");
    assert_eq!(events.len(), 2);
}

#[tokio::test]
async fn test_moderator_sees_every_critique() {
    let llm = ScriptedLlm::with_defaults();
    let agents = agents(llm.clone(), memory());
    let critiques = vec![
        CritiqueInput {
            expert: "Lin".to_string(),
            content: "Too slow.".to_string(),
        },
        CritiqueInput {
            expert: "Osei".to_string(),
            content: "Motive unclear.".to_string(),
        },
    ];

    agents
        .summarize_critiques("Draft", &critiques, &CancellationToken::new(), &mut ignore_events)
        .await
        .unwrap();

    let (role, request) = &llm.requests()[0];
    assert_eq!(*role, Role::Moderator);
    let user = common::user_prompt(request);
    assert!(user.contains("[Lin]\nToo slow."));
    assert!(user.contains("[Osei]\nMotive unclear."));
    assert!(request.tools.is_none());
}

#[tokio::test]
async fn test_options_parsed_from_fenced_json() {
    let llm = ScriptedLlm::new(|role, _| match role {
        Role::Options => text("```json\n[\"Run\", \"Hide\", \" \"]\n```"),
        role => default_reply(role),
    });
    let agents = agents(llm, memory());

    let options = agents
        .generate_options("story", &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(options, vec!["Run".to_string(), "Hide".to_string()]);
}

#[tokio::test]
async fn test_options_fallback_on_failure() {
    let llm = ScriptedLlm::new(|role, _| match role {
        Role::Options => Reply::Fail("down".to_string()),
        role => default_reply(role),
    });
    let agents = agents(llm, memory());

    let options = agents
        .generate_options("story", &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(options, FALLBACK_OPTIONS.map(String::from).to_vec());
}

#[tokio::test]
async fn test_options_fallback_on_malformed_json() {
    let llm = ScriptedLlm::new(|role, _| match role {
        Role::Options => text("1. Run 2. Hide"),
        role => default_reply(role),
    });
    let agents = agents(llm, memory());

    let options = agents
        .generate_options("story", &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(options.len(), FALLBACK_OPTIONS.len());
}

#[tokio::test]
async fn test_options_cancellation_is_not_recovered() {
    let llm = ScriptedLlm::new(|_, _| Reply::Pending);
    let agents = agents(llm, memory());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = agents.generate_options("story", &cancel).await;
    assert!(matches!(result, Err(LlmError::Cancelled)));
}

#[tokio::test]
async fn test_story_summary_falls_back_to_tail() {
    let llm = ScriptedLlm::new(|_, _| Reply::Fail("down".to_string()));
    let agents = agents(llm, memory());
    let chunk = format!("{}{}", "a".repeat(3000), "b".repeat(SUMMARY_FALLBACK_CHARS));

    let summary = agents
        .summarize_story(&chunk, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(summary, "b".repeat(SUMMARY_FALLBACK_CHARS));
}

#[tokio::test]
async fn test_worldview_fallback() {
    let llm = ScriptedLlm::new(|_, _| Reply::Fail("down".to_string()));
    let agents = agents(llm, memory());

    let worldview = agents
        .generate_worldview("requirements", &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(worldview, WORLDVIEW_FALLBACK);
}

#[tokio::test]
async fn test_suggest_experts_from_array() {
    let llm = ScriptedLlm::with_defaults();
    let agents = agents(llm, memory());

    let experts = agents
        .suggest_experts("requirements", 2, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(experts.len(), 2);
    assert_eq!(experts[0].name, "Lin");
    assert_eq!(experts[0].personality, "blunt");
    assert_eq!(experts[1].initial_stance, "motives first");
    assert_eq!(experts[1].color, "#22c55e");
    assert_ne!(experts[0].id, experts[1].id);
}

#[tokio::test]
async fn test_suggest_experts_from_wrapped_object() {
    let llm = ScriptedLlm::new(|role, _| match role {
        Role::Experts => text(r#"```json
{"experts": [{"name": "Ada", "field": "engineering"}]}
```"#),
        role => default_reply(role),
    });
    let agents = agents(llm, memory());

    let experts = agents
        .suggest_experts("requirements", 3, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(experts.len(), 1);
    assert_eq!(experts[0].field, "engineering");
}

#[tokio::test]
async fn test_suggest_experts_rejects_malformed_output() {
    let llm = ScriptedLlm::new(|role, _| match role {
        Role::Experts => text("Lin, Osei and Vera would be great."),
        role => default_reply(role),
    });
    let agents = agents(llm, memory());

    let result = agents
        .suggest_experts("requirements", 3, &CancellationToken::new())
        .await;
    assert!(matches!(result, Err(LlmError::Parse(_))));
}
