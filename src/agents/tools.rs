use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{AgentSettings, Observer};
use crate::error::{LlmError, LlmResult};
use crate::llm::{
    ChatEvent, ChatMessage, ChatRequest, Completion, CompletionService, SearchArgs, ToolCall,
    SEARCH_TOOL_NAME,
};
use crate::memory::{MemoryStore, SearchHit};

/// Render search hits as the tool result handed back to the model.
pub fn format_search_results(results: &[(String, Option<Vec<SearchHit>>)]) -> String {
    let mut sections = Vec::with_capacity(results.len());
    for (query, hits) in results {
        let body = match hits {
            None => "Memory search is unavailable for this query.".to_string(),
            Some(hits) if hits.is_empty() => "No related memories found.".to_string(),
            Some(hits) => hits
                .iter()
                .map(|h| {
                    format!(
                        "- [round {}, {}] {}",
                        h.metadata.round, h.metadata.kind, h.text
                    )
                })
                .collect::<Vec<_>>()
                .join("\n"),
        };
        sections.push(format!("Query: {}\n{}", query, body));
    }
    sections.join("\n\n")
}

async fn execute_search(
    memory: &MemoryStore,
    call: &ToolCall,
    settings: &AgentSettings,
    cancel: &CancellationToken,
) -> LlmResult<String> {
    if call.function.name != SEARCH_TOOL_NAME {
        warn!(tool = %call.function.name, "Model requested an unknown tool");
        return Ok(format!("Unknown tool: {}", call.function.name));
    }

    let args: SearchArgs = match serde_json::from_str(&call.function.arguments) {
        Ok(args) => args,
        Err(e) => {
            warn!(error = %e, arguments = %call.function.arguments, "Invalid tool arguments");
            return Ok(format!("Invalid arguments: {}", e));
        }
    };

    let mut results = Vec::with_capacity(args.queries.len());
    for query in args.queries {
        let search = memory.search(&query, settings.search_limit, settings.rerank);
        let hits = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(LlmError::Cancelled),
            hits = search => hits,
        };
        match hits {
            Ok(hits) => {
                debug!(query = %query, hits = hits.len(), "Memory search");
                results.push((query, Some(hits)));
            }
            Err(e) => {
                warn!(query = %query, error = %e, "Memory search failed");
                results.push((query, None));
            }
        }
    }

    Ok(format_search_results(&results))
}

/// Stream a generation, answering memory-search tool calls in between.
///
/// Each tool call appends the assistant's call and the tool result to the
/// transcript and re-issues the request. More than `max_tool_rounds`
/// follow-ups fails with [`LlmError::ToolLoopExceeded`].
pub async fn run_tool_loop(
    llm: &dyn CompletionService,
    memory: &MemoryStore,
    mut request: ChatRequest,
    settings: &AgentSettings,
    cancel: &CancellationToken,
    observer: Observer<'_>,
) -> LlmResult<Completion> {
    let mut completion = Completion::default();
    let mut tool_rounds = 0_u32;

    loop {
        let mut stream = llm.stream(&request, cancel).await?;
        let mut tool_call = None;

        while let Some(event) = stream.next().await {
            let event = event?;
            observer(&event);
            match event {
                ChatEvent::ContentDelta(text) => completion.content.push_str(&text),
                ChatEvent::ThinkingDelta(text) => completion.thinking.push_str(&text),
                ChatEvent::ToolCallRequested(call) => tool_call = Some(call),
            }
        }

        let Some(call) = tool_call else {
            return Ok(completion);
        };

        if tool_rounds >= settings.max_tool_rounds {
            return Err(LlmError::ToolLoopExceeded {
                limit: settings.max_tool_rounds,
            });
        }
        tool_rounds += 1;

        info!(
            tool = %call.function.name,
            round = tool_rounds,
            "Answering tool call"
        );
        let result = execute_search(memory, &call, settings, cancel).await?;
        request.messages.push(ChatMessage::tool_request(call.clone()));
        request.messages.push(ChatMessage::tool_result(call.id, result));
    }
}
