use anyhow::{Context, Result};
use modelprobe::cli::{Args, ConfigDiscovery, ExecutionMode, HistoryConfig, VerifyConfig};
use modelprobe::orchestrator::ResultFilter;
use modelprobe::{EngineConfig, VerificationEngine, VerificationResult, env};
use std::path::Path;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(env::DEFAULT_LOG_FILTER)),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let mode = match args.mode() {
        Ok(mode) => mode,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(2);
        }
    };

    match mode {
        ExecutionMode::Verify(config) => run_verify(config).await,
        ExecutionMode::Discover {
            provider,
            config_override,
        } => run_discover(&provider, config_override.as_deref()).await,
        ExecutionMode::Providers { config_override } => {
            run_providers(config_override.as_deref())
        }
        ExecutionMode::History(config) => run_history(config).await,
        ExecutionMode::ShowConfig => {
            ConfigDiscovery::show_discovery_info();
            Ok(())
        }
        ExecutionMode::InitConfig => {
            let path = ConfigDiscovery::create_default_user_config()?;
            println!("Configuration file: {}", path.display());
            Ok(())
        }
    }
}

fn load_config(config_override: Option<&Path>) -> Result<EngineConfig> {
    ConfigDiscovery::load_with_user_store(config_override).context("Failed to load configuration")
}

async fn run_verify(config: VerifyConfig) -> Result<()> {
    let engine = VerificationEngine::new(load_config(config.config_override.as_deref())?).await?;
    info!(
        "Verifying {} model(s) of {}",
        config.models.len(),
        config.provider
    );

    let results = engine
        .verify_models(&config.provider, &config.models, config.force)
        .await;
    engine.shutdown().await;
    let results = results?;

    if config.json {
        println!("{}", serde_json::to_string_pretty(&results)?);
    } else {
        for result in &results {
            print_result(result);
        }
    }
    Ok(())
}

fn print_result(result: &VerificationResult) {
    println!(
        "{}/{}: {} ({})",
        result.provider, result.model, result.score, result.category
    );
    for probe in &result.probes {
        let mark = if probe.passed { "✓" } else { "✗" };
        let detail = match &probe.error {
            Some(error) => format!(" - {}", error),
            None if !probe.passed => format!(" - {}", probe.evidence),
            None => String::new(),
        };
        println!(
            "  {} {:<28} {:>6}ms{}",
            mark,
            probe.kind.to_string(),
            probe.latency.total.as_millis(),
            detail
        );
    }
    let b = &result.breakdown;
    println!(
        "  existence {:.2} | responsiveness {:.2} | features {:.2} | latency {:.2} | transport {:.2}",
        b.existence, b.responsiveness, b.features, b.latency, b.transport
    );
}

async fn run_discover(provider: &str, config_override: Option<&Path>) -> Result<()> {
    let engine = VerificationEngine::new(load_config(config_override)?).await?;
    let models = engine.discover(provider).await;
    engine.shutdown().await;

    let models = models.with_context(|| format!("Model discovery for {provider} failed"))?;
    for model in &models {
        println!("{}", model.id);
    }
    info!("{} models found", models.len());
    Ok(())
}

fn run_providers(config_override: Option<&Path>) -> Result<()> {
    let config = load_config(config_override)?;
    for entry in &config.providers {
        let key = match (&entry.api_key, &entry.api_key_env) {
            (Some(_), _) => "inline key".to_string(),
            (None, Some(variable)) if std::env::var(variable).is_ok() => format!("${variable}"),
            (None, Some(variable)) => format!("${variable} (unset)"),
            (None, None) => "no key".to_string(),
        };
        println!(
            "{:<16} {:<18} {:<40} {}",
            entry.name, entry.family, entry.base_url, key
        );
        for model in &entry.models {
            println!("  - {}", model.id);
        }
    }
    Ok(())
}

async fn run_history(config: HistoryConfig) -> Result<()> {
    let engine = VerificationEngine::new(load_config(config.config_override.as_deref())?).await?;
    let filter = ResultFilter {
        provider: config.provider,
        model: config.model,
        ..ResultFilter::default()
    };
    let results = engine.history(&filter, config.limit, 0).await;
    engine.shutdown().await;
    let results = results?;

    if config.json {
        println!("{}", serde_json::to_string_pretty(&results)?);
    } else if results.is_empty() {
        println!("No stored verifications");
    } else {
        for result in &results {
            println!(
                "{}  {}/{}  {:>3}  {}",
                result.verified_at.format("%Y-%m-%d %H:%M:%S"),
                result.provider,
                result.model,
                result.score,
                result.category
            );
        }
    }
    Ok(())
}
