//! automate - command-line entry point.
//!
//! Runs one task through the engine and prints the result as JSON.
//!
//! ```text
//! automate [--recommend] [--deadline SECS] [--domain DOMAIN] <task description...>
//! ```

use std::sync::Arc;
use std::time::Duration;

use adaptive_automation::agents::leaf::{ComplexityAnalyzer, KeywordRules};
use adaptive_automation::learning::{OutcomeLearner, StatsStore};
use adaptive_automation::llm::OpenRouterBackend;
use adaptive_automation::config::MAX_DEADLINE;
use adaptive_automation::{AutomationOrchestrator, Config, Domain, Task};
use anyhow::{bail, Context};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How often a file-backed store is flushed while a task runs.
const PERSIST_INTERVAL: Duration = Duration::from_secs(30);

struct Args {
    recommend: bool,
    deadline: Option<Duration>,
    domain: Option<Domain>,
    description: String,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut args = Args {
        recommend: false,
        deadline: None,
        domain: None,
        description: String::new(),
    };
    let mut words = Vec::new();
    let mut iter = std::env::args().skip(1);

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--recommend" => args.recommend = true,
            "--deadline" => {
                let secs: f64 = iter
                    .next()
                    .context("--deadline needs a value")?
                    .parse()
                    .context("--deadline must be a number of seconds")?;
                let deadline = Duration::try_from_secs_f64(secs)
                    .map_err(|_| anyhow::anyhow!("--deadline must be a non-negative number of seconds"))?;
                if deadline > MAX_DEADLINE {
                    bail!("--deadline may not exceed {} seconds", MAX_DEADLINE.as_secs());
                }
                args.deadline = Some(deadline);
            }
            "--domain" => {
                let value = iter.next().context("--domain needs a value")?;
                args.domain = Some(value.parse().map_err(anyhow::Error::msg)?);
            }
            _ => words.push(arg),
        }
    }

    args.description = words.join(" ");
    if args.description.trim().is_empty() {
        bail!("usage: automate [--recommend] [--deadline SECS] [--domain DOMAIN] <task description...>");
    }
    Ok(args)
}

fn main() -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async_main())
}

async fn async_main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout carries the JSON result
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "adaptive_automation=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = parse_args()?;

    let config = Config::from_env()?;
    config.engine.validate()?;
    info!(
        "Loaded configuration: model={}, stats={}",
        config.default_model,
        config
            .stats_path
            .as_deref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(in-memory)".to_string())
    );

    let analyzer = match &config.classifier_rules_path {
        Some(path) => match KeywordRules::load(path).await {
            Ok(rules) => ComplexityAnalyzer::new(rules),
            Err(e) => {
                warn!("{}. Using built-in keyword rules.", e);
                ComplexityAnalyzer::default()
            }
        },
        None => ComplexityAnalyzer::default(),
    };

    let window = config.engine.rolling_window;
    let enabled = config.engine.learning_enabled;
    let learner = match &config.stats_path {
        Some(path) => OutcomeLearner::load(path.clone(), window, enabled).await,
        None => OutcomeLearner::new(StatsStore::new(window), enabled),
    };

    let mut backend = OpenRouterBackend::new(config.api_key.clone(), config.default_model.clone());
    if let Some(endpoint) = &config.api_endpoint {
        backend = backend.with_endpoint(endpoint.clone());
    }
    let backend = Arc::new(backend);
    info!("Using model {}", backend.model());
    let orchestrator =
        AutomationOrchestrator::new(backend, config.engine.clone(), learner).with_analyzer(analyzer);

    if args.recommend {
        let recommendation = orchestrator.recommend_strategy(&args.description).await;
        println!("{}", serde_json::to_string_pretty(&recommendation)?);
        return Ok(());
    }

    let mut task = Task::new(args.description);
    if let Some(deadline) = args.deadline {
        task = task.with_deadline(deadline);
    }
    if let Some(domain) = args.domain {
        task = task.with_domain_hint(domain);
    }

    let flusher = orchestrator
        .learner()
        .spawn_periodic_persist(PERSIST_INTERVAL);
    let result = orchestrator.automate(task).await;
    flusher.abort();

    if let Err(e) = orchestrator.learner().persist().await {
        warn!("Failed to persist statistics: {}", e);
    }

    println!("{}", serde_json::to_string_pretty(&result)?);
    if !result.success {
        std::process::exit(1);
    }
    Ok(())
}
