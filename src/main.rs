//! Command-line entry point
//!
//! ```text
//! scrapeflow <template.json> <url>...   run one job and print status + results
//! scrapeflow analyze <url>              print auto-detected field suggestions
//! ```

use anyhow::{Context, Result, bail};
use std::sync::Arc;
use std::time::Duration;

use scrapeflow_lib::domain::{JobTargets, Template};
use scrapeflow_lib::infrastructure::{
    AppConfig, AutoDetector, ConfigManager, FetchConfig, Fetcher, HttpFetcher, init_logging_with_config,
};
use scrapeflow_lib::{JobScheduler, JobSpec};

const USAGE: &str = "usage: scrapeflow <template.json> <url>... | scrapeflow analyze <url>";

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.is_empty() || args.iter().any(|a| a == "-h" || a == "--help") {
        println!("{USAGE}");
        return Ok(());
    }

    let config = match load_config().await {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Using default configuration: {e:#}");
            AppConfig::default()
        }
    };
    init_logging_with_config(&config.logging)?;
    let fetcher = Arc::new(HttpFetcher::new(config.fetcher.clone())?);

    match args.as_slice() {
        [command, url] if command == "analyze" => {
            let fetch_config = FetchConfig {
                mode: config.fetcher.default_mode,
                ..FetchConfig::new(config.job_defaults.timeout())
            };
            let document = fetcher.fetch(url, &fetch_config).await?;
            let report = AutoDetector::new()?.analyze(&document.html, &document.final_url);
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        [template_path, urls @ ..] if !urls.is_empty() => {
            let json = tokio::fs::read_to_string(template_path)
                .await
                .with_context(|| format!("Failed to read template {template_path}"))?;
            let template = Template::from_json(&json)
                .with_context(|| format!("Failed to parse template {template_path}"))?;

            let scheduler = JobScheduler::new(&config, fetcher);
            let targets = if urls.len() > 1 {
                JobTargets::batch(urls.iter().cloned())
            } else {
                JobTargets::sequential(urls.iter().cloned())
            };
            let handle = scheduler.submit(JobSpec::new(template, targets)).await;

            let status = tokio::select! {
                status = handle.wait() => status,
                _ = tokio::signal::ctrl_c() => {
                    if let Err(e) = handle.stop().await {
                        eprintln!("Stop ignored: {e}");
                    }
                    // give in-flight units a moment to observe the stop
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    handle.status().await
                }
            };

            let output = serde_json::json!({
                "status": status,
                "results": handle.results().await,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        _ => bail!(USAGE),
    }

    Ok(())
}

async fn load_config() -> Result<AppConfig> {
    ConfigManager::new()?.load_config().await
}
