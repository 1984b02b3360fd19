use grounded::cli::{Cli, Commands, ConfigAction};
use grounded::config::{parse_duration, Config};
use grounded::corpus::{load_jsonl, ChunkCatalog, Ingestor};
use grounded::error::{GroundedError, Result};
use grounded::generation::{
    AttemptOutcome, FailoverRouter, GenerationProvider, HealthMonitor, OpenAiCompatibleProvider,
};
use grounded::index::{
    DenseIndex, IndexAdapter, LexicalEncoder, ModelQueryEncoder, QueryEncoder, SparseIndex,
    TokenIndex,
};
use grounded::orchestrator::{Answer, AnswerRequest, Components, QueryOrchestrator};
use grounded::retrieval::{CrossEncoderReranker, RerankService};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse_args();

    // Initialize logging
    init_logging(cli.verbose, cli.log_json);

    // Handle commands
    match cli.command {
        Commands::Answer {
            query,
            corpus,
            top_k,
            deadline,
            json,
        } => {
            let config = load_config(cli.config, cli.profile)?;
            cmd_answer(&config, &query, &corpus, top_k, deadline, json).await?;
        }
        Commands::Providers { json } => {
            let config = load_config(cli.config, cli.profile)?;
            cmd_providers(&config, json).await?;
        }
        Commands::Config { action } => {
            cmd_config(cli.config, cli.profile, action)?;
        }
    }

    Ok(())
}

fn init_logging(verbose: bool, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose { "grounded=debug" } else { "grounded=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let builder = fmt().with_env_filter(filter).with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.with_target(false).init();
    }
}

async fn cmd_answer(
    config: &Config,
    query: &str,
    corpus: &std::path::Path,
    top_k: Option<usize>,
    deadline: Option<String>,
    json: bool,
) -> Result<()> {
    let records = load_jsonl(corpus)?;

    // Indexes
    let catalog = Arc::new(ChunkCatalog::new());
    let adapters: Vec<Arc<dyn IndexAdapter>> = vec![
        Arc::new(DenseIndex::new(
            config.retrieval.dense_dim,
            config.retrieval.exhaustive_search_threshold,
            config.retrieval.hnsw_params(),
        )),
        Arc::new(SparseIndex::new()),
        Arc::new(TokenIndex::new()),
    ];
    let ingestor = Ingestor::new(Arc::clone(&catalog), adapters.clone());
    let reports = ingestor.ingest_all(records).await?;
    tracing::info!(
        "Indexed {} chunks from {} documents",
        catalog.chunk_count(),
        reports.len()
    );

    let encoder = build_encoder(config).await;
    let rerank_service = build_reranker(config).await;
    let providers = build_providers(config)?;

    let orchestrator = QueryOrchestrator::from_config(
        config,
        Components {
            encoder,
            adapters,
            catalog,
            rerank_service,
            providers: providers.clone(),
        },
    )?;

    let monitor = HealthMonitor::spawn(
        &providers,
        Arc::clone(orchestrator.router().registry()),
        config.circuit.probe_interval(),
        config.circuit.probe_timeout(),
    );

    let mut request = AnswerRequest::new(query);
    if let Some(top_k) = top_k {
        request = request.with_top_k(top_k);
    }
    if let Some(deadline) = deadline {
        let duration = parse_duration(&deadline).ok_or_else(|| GroundedError::InvalidConfigValue {
            path: "--deadline".to_string(),
            message: format!("Invalid duration format: {}", deadline),
        })?;
        request = request.with_deadline(duration);
    }

    let result = orchestrator.answer_request(request).await;
    monitor.shutdown().await;
    let answer = result?;

    if json {
        let output = serde_json::to_string_pretty(&answer).map_err(|e| GroundedError::Json {
            source: e,
            context: "Failed to serialize answer".to_string(),
        })?;
        println!("{}", output);
    } else {
        print_answer(&answer);
    }

    Ok(())
}

fn print_answer(answer: &Answer) {
    println!("{}\n", answer.text.trim());

    let supported: Vec<_> = answer
        .citations
        .iter()
        .filter_map(|segment| segment.citation.as_ref().map(|c| (segment, c)))
        .collect();

    if !supported.is_empty() {
        println!("Citations:");
        for (segment, citation) in supported {
            println!(
                "  [{}] {} ({:.2})",
                citation.passage,
                citation.source_uri.as_deref().unwrap_or(citation.document_id.as_str()),
                citation.confidence
            );
            println!("      answer: {}", segment.segment.trim());
            println!("      source: {}", citation.quote.trim());
        }
        println!();
    }

    let meta = &answer.metadata;
    let signals: Vec<String> = meta
        .contributing_signals
        .iter()
        .map(|s| s.to_string())
        .collect();
    println!(
        "Provider: {} | signals: {} | reranked: {} | {}ms",
        meta.provider,
        signals.join(", "),
        if meta.rerank_skipped { "no" } else { "yes" },
        meta.latency_ms
    );
    if let Some(reason) = &meta.rerank_skip_reason {
        println!("Rerank skipped: {}", reason);
    }
}

async fn cmd_providers(config: &Config, json: bool) -> Result<()> {
    let providers = build_providers(config)?;
    let router = FailoverRouter::new(providers, config.circuit.policy());

    let timeout = config
        .providers
        .iter()
        .map(|p| p.timeout())
        .max()
        .unwrap_or(Duration::from_secs(20));
    let checks = router.check_providers(timeout).await;
    let snapshot = router.registry().snapshot();

    if json {
        let output = serde_json::json!({ "checks": checks, "health": snapshot });
        let text = serde_json::to_string_pretty(&output).map_err(|e| GroundedError::Json {
            source: e,
            context: "Failed to serialize provider health".to_string(),
        })?;
        println!("{}", text);
        return Ok(());
    }

    for (check, health) in checks.iter().zip(&snapshot) {
        let status = match &check.outcome {
            AttemptOutcome::Succeeded => "✓ reachable".to_string(),
            AttemptOutcome::Failed { reason } => format!("✗ {}", reason),
            AttemptOutcome::Skipped { reason } => format!("- {}", reason),
        };
        println!("{} [{}] {} ({}ms)", check.provider_id, health.state, status, check.elapsed_ms);
    }

    Ok(())
}

fn cmd_config(
    config_path: Option<PathBuf>,
    profile: Option<String>,
    action: ConfigAction,
) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = load_config(config_path, profile)?;
            let output = toml::to_string_pretty(&config)?;
            println!("{}", output);
        }
        ConfigAction::Validate { file } => {
            let path = match file.or(config_path) {
                Some(path) => path,
                None => Config::default_path()?,
            };
            let config = Config::load(&path)?;
            println!("✓ Configuration is valid");
            println!("  Schema version: {}", config.meta.schema_version);
            println!("  Providers: {}", config.providers.len());
        }
        ConfigAction::Init { force } => {
            let path = match config_path {
                Some(path) => path,
                None => Config::default_path()?,
            };

            if path.exists() && !force {
                println!("Configuration file already exists at: {}", path.display());
                println!("Use --force to overwrite");
                return Ok(());
            }

            Config::default().save(&path)?;
            println!("✓ Configuration initialized at: {}", path.display());
        }
    }

    Ok(())
}

fn load_config(config_path: Option<PathBuf>, profile: Option<String>) -> Result<Config> {
    let path = match config_path {
        Some(path) => path,
        None => Config::default_path()?,
    };

    match profile {
        Some(profile) => Config::load_with_profile(&path, &profile),
        None => Config::load_or_default(&path),
    }
}

/// Model-backed encoder, or the lexical encoder when no model is wanted or
/// the model cannot be loaded
async fn build_encoder(config: &Config) -> Arc<dyn QueryEncoder> {
    let model = config.embedding.model.clone();
    if model == "lexical" {
        return Arc::new(LexicalEncoder);
    }

    let token_vectors = config.embedding.token_vectors;
    let loaded =
        tokio::task::spawn_blocking(move || ModelQueryEncoder::new(&model, token_vectors)).await;

    match loaded {
        Ok(Ok(encoder)) => {
            if encoder.dimension() != config.retrieval.dense_dim {
                tracing::warn!(
                    "Encoder dimension {} does not match retrieval.dense_dim {}",
                    encoder.dimension(),
                    config.retrieval.dense_dim
                );
            }
            Arc::new(encoder)
        }
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "Query encoder unavailable, using lexical encoder");
            Arc::new(LexicalEncoder)
        }
        Err(e) => {
            tracing::warn!(error = %e, "Query encoder initialization panicked, using lexical encoder");
            Arc::new(LexicalEncoder)
        }
    }
}

async fn build_reranker(config: &Config) -> Option<Arc<dyn RerankService>> {
    if !config.rerank.enabled {
        return None;
    }

    let model = config.rerank.model.clone();
    match tokio::task::spawn_blocking(move || CrossEncoderReranker::new(&model)).await {
        Ok(Ok(reranker)) => Some(Arc::new(reranker)),
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "Reranker unavailable, answers will use fused order");
            None
        }
        Err(e) => {
            tracing::warn!(error = %e, "Reranker initialization panicked, answers will use fused order");
            None
        }
    }
}

fn build_providers(config: &Config) -> Result<Vec<Arc<dyn GenerationProvider>>> {
    config
        .providers
        .iter()
        .map(|provider| {
            OpenAiCompatibleProvider::from_config(provider)
                .map(|p| Arc::new(p) as Arc<dyn GenerationProvider>)
                .map_err(|e| GroundedError::InvalidConfigValue {
                    path: format!("providers.{}", provider.id),
                    message: e.to_string(),
                })
        })
        .collect()
}
