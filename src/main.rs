use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use curio_core::provider::ChatProvider;
use curio_engine::{PlanCache, ResearchRunner, SearchPlanner, StreamingGenerator};
use curio_llm::{FallbackProvider, OpenAiProvider, ReliableProvider};
use curio_scrape::{GuardPolicy, Scraper};
use curio_search::{ModelSearchProvider, SearchExecutor, SearchProvider, SearxProvider, SerperProvider};
use curio_server::ServerConfig;
use curio_store::conversations::ConversationRepo;
use curio_store::generations::GenerationRepo;
use curio_store::Database;
use curio_telemetry::{init_telemetry, MetricsRecorder, TelemetryConfig};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "curio", about = "Conversational research assistant server")]
struct Cli {
    /// Port to listen on. Overrides CURIO_PORT.
    #[arg(long)]
    port: Option<u16>,
    /// SQLite database path. Overrides CURIO_DB_PATH.
    #[arg(long)]
    db_path: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let telemetry = init_telemetry(TelemetryConfig::default());
    let metrics = telemetry
        .metrics()
        .unwrap_or_else(|| Arc::new(MetricsRecorder::new()));

    info!("starting curio");

    let db_path = database_path(&cli);
    let db = Database::open(&db_path).expect("failed to open database");

    let chat = chat_provider();
    let plan_cache = Arc::new(PlanCache::new());
    let planner = SearchPlanner::new(chat.clone(), plan_cache.clone());
    let executor = SearchExecutor::new(search_providers(chat.clone()));
    let scraper = Scraper::new(GuardPolicy::from_env());
    let generator = StreamingGenerator::new(chat, metrics.clone());
    let runner = Arc::new(ResearchRunner::new(
        planner,
        executor,
        scraper,
        generator,
        ConversationRepo::new(db.clone()),
        GenerationRepo::new(db.clone()),
        metrics.clone(),
    ));

    let mut config = ServerConfig::from_env();
    if let Some(port) = cli.port {
        config.port = port;
    }
    let handle = curio_server::start(config, db, runner, plan_cache, metrics)
        .await
        .expect("failed to start server");
    info!(port = handle.port, "curio ready");

    tokio::signal::ctrl_c()
        .await
        .expect("failed to listen for ctrl+c");
    let aborted = handle.orchestrator.abort_all();
    info!(aborted, "shutting down");
}

fn database_path(cli: &Cli) -> PathBuf {
    if let Some(path) = &cli.db_path {
        return path.clone();
    }
    if let Ok(path) = std::env::var("CURIO_DB_PATH") {
        if !path.is_empty() {
            return PathBuf::from(path);
        }
    }
    home_dir().join(".curio").join("curio.db")
}

fn home_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

/// OpenAI with retries, falling back to Groq when both keys are present.
fn chat_provider() -> Arc<dyn ChatProvider> {
    let openai = OpenAiProvider::openai_from_env()
        .ok()
        .map(|provider| Arc::new(ReliableProvider::with_defaults(provider)) as Arc<dyn ChatProvider>);
    let groq = OpenAiProvider::groq_from_env()
        .ok()
        .map(|provider| Arc::new(ReliableProvider::with_defaults(provider)) as Arc<dyn ChatProvider>);

    match (openai, groq) {
        (Some(primary), secondary) => Arc::new(FallbackProvider::new(primary, secondary)),
        (None, Some(primary)) => Arc::new(FallbackProvider::new(primary, None)),
        // There is nothing useful to serve without a language model.
        (None, None) => panic!("no chat provider configured; set OPENAI_API_KEY or GROQ_API_KEY"),
    }
}

/// Search chain in cost order: Serper when keyed, then the model itself,
/// then any configured SearXNG instances.
fn search_providers(chat: Arc<dyn ChatProvider>) -> Vec<Arc<dyn SearchProvider>> {
    let mut providers: Vec<Arc<dyn SearchProvider>> = Vec::new();
    match SerperProvider::from_env() {
        Ok(serper) => providers.push(Arc::new(serper)),
        Err(err) => warn!(error = %err, "serper disabled"),
    }
    providers.push(Arc::new(ModelSearchProvider::new(chat)));
    match SearxProvider::from_env() {
        Ok(searx) => providers.push(Arc::new(searx)),
        Err(err) => warn!(error = %err, "searx disabled"),
    }
    providers
}
