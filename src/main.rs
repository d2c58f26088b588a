use clap::{Arg, Command};
use log::LevelFilter;
use navguard::commands;
use navguard::{DecisionEngine, EngineConfig};
use std::process;
use tokio::io::BufReader;

#[tokio::main]
async fn main() {
    let matches = Command::new("navguard")
        .version(env!("CARGO_PKG_VERSION"))
        .about("URL risk assessment engine with adaptive trust learning")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("/etc/navguard.yaml"),
        )
        .arg(
            Arg::new("generate-config")
                .long("generate-config")
                .value_name("FILE")
                .help("Generate a default configuration file")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable debug logging")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("analyze")
                .long("analyze")
                .value_name("URL")
                .help("Analyze a single URL and print the result as JSON")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("override")
                .long("override")
                .value_name("URL")
                .help("Record that the user proceeded to a warned URL")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("block")
                .long("block")
                .value_name("URL")
                .help("Record that the user blocked a URL")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("stats")
                .long("stats")
                .help("Show analysis statistics")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("history")
                .long("history")
                .help("Show recent analyses, newest first")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("serve")
                .long("serve")
                .help("Read JSON commands from stdin, one per line, and answer on stdout")
                .action(clap::ArgAction::SetTrue),
        )
        .get_matches();

    let log_level = if matches.get_flag("verbose") {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .init();

    if let Some(generate_path) = matches.get_one::<String>("generate-config") {
        generate_default_config(generate_path);
        return;
    }

    let config_path = matches
        .get_one::<String>("config")
        .map(String::as_str)
        .unwrap_or("/etc/navguard.yaml");

    let config = match load_config(config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {e:#}");
            process::exit(1);
        }
    };

    let engine = DecisionEngine::from_config(config);

    if let Some(url) = matches.get_one::<String>("override") {
        engine.user_override(url).await;
        println!("Override recorded for {url}");
    }

    if let Some(url) = matches.get_one::<String>("block") {
        engine.user_block(url).await;
        println!("Block recorded for {url}");
    }

    if let Some(url) = matches.get_one::<String>("analyze") {
        let result = engine.analyze_url(url).await;
        match serde_json::to_string_pretty(&result) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                eprintln!("Failed to encode result: {e}");
                process::exit(1);
            }
        }
    }

    if matches.get_flag("stats") {
        let stats = engine.stats();
        println!("NavGuard Statistics");
        println!("===================");
        println!("  Total analyzed:    {}", stats.total_analyzed);
        println!("  Blocked:           {}", stats.total_blocked);
        println!("  Warnings:          {}", stats.total_warnings);
        println!("  Session overrides: {}", stats.session_overrides);
    }

    if matches.get_flag("history") {
        let history = engine.history();
        if history.is_empty() {
            println!("No analyses recorded");
        }
        for result in history {
            println!(
                "{}  {:<6} {:<5} {}",
                result.timestamp.format("%Y-%m-%d %H:%M:%S"),
                format!("{:?}", result.severity).to_lowercase(),
                format!("{:?}", result.verdict).to_lowercase(),
                truncate_string(&result.url, 80)
            );
        }
    }

    if matches.get_flag("serve") {
        serve(engine).await;
    }
}

/// JSON-lines command loop; returns on EOF after persisting state
async fn serve(engine: DecisionEngine) {
    let sweeper = engine.start_maintenance();

    let shutdown_engine = engine.clone();
    let handle = tokio::runtime::Handle::current();
    if let Err(e) = ctrlc::set_handler(move || {
        log::info!("Received shutdown signal, persisting state...");
        let engine = shutdown_engine.clone();
        // The signal handler runs on its own thread, outside the runtime
        handle.block_on(engine.persist_all());
        process::exit(0);
    }) {
        log::warn!("Failed to install signal handler: {e}");
    }

    log::info!("Serving JSON commands on stdin");

    let stdin = BufReader::new(tokio::io::stdin());
    if let Err(e) = commands::serve_lines(&engine, stdin, tokio::io::stdout()).await {
        log::error!("Serve loop stopped: {e}");
    }

    sweeper.abort();
    engine.persist_all().await;
    log::info!("Input closed, shutting down");
}

fn load_config(path: &str) -> anyhow::Result<EngineConfig> {
    if std::path::Path::new(path).exists() {
        EngineConfig::from_file(path)
    } else {
        log::warn!("Configuration file '{path}' not found, using default configuration");
        Ok(EngineConfig::default().with_env_overrides())
    }
}

fn generate_default_config(path: &str) {
    let config = EngineConfig::default();
    match config.to_file(path) {
        Ok(()) => {
            println!("Default configuration written to: {path}");
            println!("Set NAVGUARD_API_KEY or edit reputation.api_key to enable reputation lookups.");
        }
        Err(e) => {
            eprintln!("Error writing configuration file: {e}");
            process::exit(1);
        }
    }
}

fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}
