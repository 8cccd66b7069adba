use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use novel_workshop::{
    agents::{AgentSettings, Agents},
    config::{Config, LogFormat},
    embedding::{EmbeddingClient, RerankClient},
    llm::LlmClient,
    memory::MemoryStore,
    workflow::{sink_from_config, Orchestrator, ReaderInput, Session, StepOutcome},
};

/// Write an interactive novel with a panel of AI experts.
#[derive(Parser, Debug)]
#[command(name = "novel-workshop", version, about)]
struct Cli {
    /// Novel requirements, or @path to read them from a file
    #[arg(short, long)]
    requirements: String,

    /// Worldview text or @path; generated from the requirements when omitted
    #[arg(short, long)]
    worldview: Option<String>,

    /// Number of experts on the panel
    #[arg(long, default_value = "3")]
    experts: usize,

    /// Rounds to write before stopping
    #[arg(long)]
    rounds: Option<u32>,

    /// Continue automatically instead of asking the reader after each round
    #[arg(long)]
    no_reader_choice: bool,
}

async fn read_arg(value: &str) -> std::io::Result<String> {
    match value.strip_prefix('@') {
        Some(path) => tokio::fs::read_to_string(path).await,
        None => Ok(value.to_string()),
    }
}

fn parse_input(line: &str) -> ReaderInput {
    match line.trim().parse::<usize>() {
        Ok(n) if n > 0 => ReaderInput::Option(n - 1),
        _ => ReaderInput::FreeText(line.trim().to_string()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };
    if let Some(rounds) = cli.rounds {
        config.workflow.max_rounds = rounds;
    }
    if cli.no_reader_choice {
        config.workflow.reader_choice = false;
    }

    init_logging(&config);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        model = %config.llm.model,
        "Novel workshop starting..."
    );

    let llm = Arc::new(LlmClient::new(&config.llm, config.request.clone())?);
    let embedder = Arc::new(EmbeddingClient::new(&config.embedding, &config.request)?);
    let mut memory = MemoryStore::new(embedder, config.workflow.chunk_max_chars);
    if config.rerank.enabled {
        memory = memory.with_reranker(Arc::new(RerankClient::new(&config.rerank, &config.request)?));
    }
    let memory = Arc::new(memory);
    let settings = AgentSettings::from_config(&config);

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, cancelling in-flight requests");
                cancel.cancel();
            }
        });
    }

    let requirements = read_arg(&cli.requirements).await?;
    let agents = Agents::new(llm.clone(), memory.clone(), settings.clone());
    let worldview = match &cli.worldview {
        Some(value) => read_arg(value).await?,
        None => agents.generate_worldview(&requirements, &cancel).await?,
    };
    let experts = agents
        .suggest_experts(&requirements, cli.experts, &cancel)
        .await?;
    if experts.is_empty() {
        anyhow::bail!("No experts were suggested for these requirements");
    }
    for expert in &experts {
        info!(name = %expert.name, field = %expert.field, "Expert joined");
    }

    let session = Session::new(requirements, worldview, experts, &config.workflow);
    let session_id = session.id.clone();
    let mut orchestrator = Orchestrator::new(
        session,
        llm,
        memory,
        settings,
        config.workflow.clone(),
    );
    if let Some(sink) = sink_from_config(&config.archive, &config.request)? {
        orchestrator = orchestrator.with_archive(sink);
    }
    info!(session_id = %session_id, "Session created");

    let (tx, mut inputs) = mpsc::channel(8);
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if line.trim().is_empty() {
                continue;
            }
            if tx.send(parse_input(&line)).await.is_err() {
                break;
            }
        }
    });

    let mut printed = 0;
    let mut outcome = orchestrator.start(&cancel).await;
    loop {
        let story = orchestrator.session().compiled_story;
        if story.len() > printed {
            println!("{}", &story[printed..]);
            printed = story.len();
        }

        match outcome {
            Ok(StepOutcome::Completed) => break,
            Ok(StepOutcome::AwaitingChoice(options)) => {
                if orchestrator.session().current_round >= config.workflow.max_rounds {
                    orchestrator.stop();
                    break;
                }
                println!();
                for (i, option) in options.iter().enumerate() {
                    println!("  {}. {}", i + 1, option);
                }
                println!("Choose a number or type an action:");
                if let Err(e) = orchestrator.await_choice(&mut inputs, &cancel).await {
                    outcome = Err(e);
                    continue;
                }
                outcome = orchestrator.run(&cancel).await;
            }
            Ok(StepOutcome::Advanced(_)) => outcome = orchestrator.run(&cancel).await,
            Err(e) if e.is_cancelled() => {
                info!(session_id = %session_id, "Session cancelled");
                break;
            }
            Err(e) => {
                error!(error = %e, "Workflow stopped");
                return Err(e.into());
            }
        }
    }

    info!(
        session_id = %session_id,
        rounds = orchestrator.session().current_round,
        "Session finished"
    );
    Ok(())
}

/// Initialize tracing/logging
fn init_logging(config: &Config) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}
