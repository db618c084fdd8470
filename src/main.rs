//! newsfin - News/Financial multi-agent routing services.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use newsfin_a2a::llm::{ChatModel, OpenAiCompatClient};
use newsfin_a2a::retrieval::{ingest_file, OpenSearchRetriever};
use newsfin_a2a::server::{host_app, serve, specialist_app};
use newsfin_a2a::specialist::{advertised_url, DEFAULT_HOST};
use newsfin_a2a::{
    initialize_routing_agent, NewsFinancePolicyManager, Settings, SpecialistAgent,
    SpecialistExecutor, SpecialistProfile, ToolRegistry,
};

const DEFAULT_HOST_AGENT_PORT: u16 = 8083;

/// News/Financial multi-agent routing over A2A.
#[derive(Parser, Debug)]
#[command(name = "newsfin")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Output logs as JSON.
    #[arg(long, default_value = "false", global = true)]
    json_logs: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the host routing agent (OpenAI-compatible chat API).
    Host {
        #[arg(long, default_value = DEFAULT_HOST)]
        host: String,
        #[arg(long, default_value_t = DEFAULT_HOST_AGENT_PORT)]
        port: u16,
    },
    /// Run the News specialist.
    News {
        #[arg(long, default_value = DEFAULT_HOST)]
        host: String,
        #[arg(long, default_value_t = SpecialistProfile::News.default_port())]
        port: u16,
    },
    /// Run the Financial specialist.
    Financial {
        #[arg(long, default_value = DEFAULT_HOST)]
        host: String,
        #[arg(long, default_value_t = SpecialistProfile::Financial.default_port())]
        port: u16,
    },
    /// Embed a JSONL file of articles and index it in OpenSearch.
    Ingest {
        /// One JSON document per line: id, title, text, source, published_at.
        path: PathBuf,
    },
    /// Print the routing decision for a message as JSON.
    Classify { message: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    // Logs go to stderr so `classify` output stays clean JSON
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    if args.json_logs {
        fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }

    let settings = Settings::from_env()?;

    match args.command {
        Command::Host { host, port } => {
            info!("Host agent starting");
            let agent = initialize_routing_agent(&settings.host).await?;
            serve(host_app(Arc::new(agent)), &host, port).await?;
        }
        Command::News { host, port } => {
            run_specialist(SpecialistProfile::News, &settings, &host, port).await?;
        }
        Command::Financial { host, port } => {
            run_specialist(SpecialistProfile::Financial, &settings, &host, port).await?;
        }
        Command::Ingest { path } => {
            let model = OpenAiCompatClient::new(settings.llm.clone())?;
            let retriever = OpenSearchRetriever::new(settings.opensearch.clone())?;
            let count = ingest_file(&path, &model, &retriever, settings.opensearch.embedding_dim).await?;
            info!("Indexed {} documents into {}", count, retriever.index());
        }
        Command::Classify { message } => {
            let classification = NewsFinancePolicyManager::new().classify_request(&message);
            println!("{}", serde_json::to_string_pretty(&classification)?);
        }
    }

    Ok(())
}

async fn run_specialist(
    profile: SpecialistProfile,
    settings: &Settings,
    host: &str,
    port: u16,
) -> anyhow::Result<()> {
    info!("{} specialist starting", profile);
    settings.llm.check_model_path();

    let model: Arc<dyn ChatModel> = Arc::new(OpenAiCompatClient::new(settings.llm.clone())?);
    let tools = ToolRegistry::discover(&settings.mcp).await;
    info!("{} MCP tools available", tools.len());

    let mut executor = SpecialistExecutor::new(profile, model, tools)
        .with_max_tool_call_depth(settings.mcp.max_tool_call_depth);
    if profile == SpecialistProfile::News {
        let retriever = OpenSearchRetriever::new(settings.opensearch.clone())?;
        executor = executor.with_retriever(Arc::new(retriever), settings.opensearch.top_k);
    }

    let url = advertised_url(settings.app_url.as_deref(), host, port);
    let agent = SpecialistAgent::new(profile.agent_card(url), Arc::new(executor));
    serve(specialist_app(Arc::new(agent)), host, port).await?;
    Ok(())
}
