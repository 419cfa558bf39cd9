use clap::Parser;
use console::Term;
use geobatch_lib::{
    load_env_config, load_stores, parse_timeout_string, read_corpus, read_persisted_store,
    BatchDispatcher, CheckpointWriter, ConfigManager, FailureKind, FileConfig, GeocodeClient,
    PayloadFormat, RunConfig, RunReport, MAX_CONCURRENCY,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

mod ui;

/// CLI arguments for geobatch
#[derive(Parser, Debug, Clone)]
#[command(name = "geobatch")]
#[command(version)]
#[command(about = "Resolve a place-name listing to coordinates with checkpointed progress", long_about = None)]
pub struct Args {
    /// Corpus listing to extract place names from (tab-separated)
    #[arg(short = 'f', long = "corpus", value_name = "FILE", help_heading = "Files")]
    pub corpus: Option<PathBuf>,

    /// Previously resolved store to load
    #[arg(long = "store-in", value_name = "FILE", help_heading = "Files")]
    pub store_in: Option<PathBuf>,

    /// First run: start from an empty store instead of reading --store-in
    #[arg(long = "fresh", help_heading = "Files")]
    pub fresh: bool,

    /// Where checkpoints are written
    #[arg(long = "store-out", value_name = "FILE", help_heading = "Files")]
    pub store_out: Option<PathBuf>,

    /// Geocoding endpoint (without query string)
    #[arg(long = "url", value_name = "URL", help_heading = "Provider")]
    pub url: Option<String>,

    /// Query parameter carrying the place name
    #[arg(long = "param", value_name = "NAME", help_heading = "Provider")]
    pub param: Option<String>,

    /// API key appended as key=...
    #[arg(long = "api-key", value_name = "KEY", help_heading = "Provider")]
    pub api_key: Option<String>,

    /// Response format: google or arcgis
    #[arg(long = "format", value_name = "FORMAT", help_heading = "Provider")]
    pub format: Option<String>,

    /// Requests in flight per window (1-100, default: 10)
    #[arg(short = 'c', long = "concurrency", help_heading = "Performance")]
    pub concurrency: Option<usize>,

    /// Checkpoint after this many windows (default: 50)
    #[arg(long = "checkpoint-every", value_name = "WINDOWS", help_heading = "Performance")]
    pub checkpoint_every: Option<usize>,

    /// Per-request timeout, e.g. 10s, 1m, 500ms (default: 10s)
    #[arg(long = "timeout", value_name = "DURATION", help_heading = "Performance")]
    pub timeout: Option<String>,

    /// Output the run summary as JSON
    #[arg(short = 'j', long = "json", help_heading = "Output Format")]
    pub json: bool,

    /// Show what would be resolved without sending requests
    #[arg(long = "dry-run", help_heading = "Output Format")]
    pub dry_run: bool,

    /// Use specific config file instead of automatic discovery
    #[arg(long = "config", value_name = "FILE", help_heading = "Configuration")]
    pub config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short = 'v', long = "verbose", help_heading = "Configuration")]
    pub verbose: bool,

    /// Log every request
    #[arg(short = 'd', long = "debug", help_heading = "Configuration")]
    pub debug: bool,
}

/// Machine-readable run summary for `--json`.
#[derive(Debug, Serialize)]
struct JsonSummary<'a> {
    store_out: &'a PathBuf,
    windows: usize,
    processed: usize,
    newly_resolved: usize,
    total_resolved: usize,
    checkpoints_written: usize,
    checkpoint_failures: usize,
    final_checkpoint_error: Option<String>,
    duration_ms: u128,
    error_counts: BTreeMap<String, usize>,
    errors: Vec<JsonFailure<'a>>,
}

#[derive(Debug, Serialize)]
struct JsonFailure<'a> {
    key: &'a str,
    kind: FailureKind,
    message: String,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if let Err(e) = validate_args(&args) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }

    init_tracing(&args);

    match run(args).await {
        Ok(true) => {}
        Ok(false) => process::exit(1),
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    }
}

/// Logs go to stderr; `RUST_LOG` overrides the flag-derived level.
fn init_tracing(args: &Args) {
    let default_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Validate command line arguments
fn validate_args(args: &Args) -> Result<(), String> {
    if let Some(concurrency) = args.concurrency {
        if concurrency == 0 || concurrency > MAX_CONCURRENCY {
            return Err(format!(
                "Concurrency must be between 1 and {}",
                MAX_CONCURRENCY
            ));
        }
    }

    if args.checkpoint_every == Some(0) {
        return Err("--checkpoint-every must be at least 1".to_string());
    }

    if let Some(timeout) = &args.timeout {
        if parse_timeout_string(timeout).is_none() {
            return Err(format!(
                "Invalid timeout '{}'. Use format like '5s', '30s', '2m'",
                timeout
            ));
        }
    }

    if let Some(format) = &args.format {
        if PayloadFormat::parse(format).is_none() {
            return Err(format!("Unknown format '{}'. Use google or arcgis", format));
        }
    }

    if let Some(url) = &args.url {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(format!("URL '{}' must start with http:// or https://", url));
        }
    }

    Ok(())
}

/// Load, dispatch, report. Returns `Ok(false)` when the final checkpoint failed.
async fn run(args: Args) -> Result<bool, Box<dyn std::error::Error>> {
    let config = build_config(&args)?;
    debug!(
        corpus = %config.corpus.display(),
        store_in = %config.store_in.display(),
        store_out = %config.store_out.display(),
        base_url = %config.base_url,
        format = %config.format,
        concurrency = config.concurrency,
        checkpoint_every = config.checkpoint_every,
        timeout_ms = config.timeout.as_millis() as u64,
        "effective configuration"
    );

    // Setup failures abort before any request is sent.
    let corpus = read_corpus(&config.corpus).await?;
    let persisted = if args.fresh {
        if config.store_out.exists() {
            warn!(path = %config.store_out.display(), "--fresh run will replace existing store");
        }
        Vec::new()
    } else {
        if !config.store_in.exists() {
            return Err(format!(
                "Persisted store not found: {} (pass --fresh to start without one)",
                config.store_in.display()
            )
            .into());
        }
        read_persisted_store(&config.store_in).await?
    };
    let (resolved, pending) = load_stores(corpus, persisted);

    if args.dry_run {
        if args.json {
            let keys: Vec<&str> = pending.iter().map(|k| k.as_str()).collect();
            println!("{}", serde_json::to_string_pretty(&keys)?);
        } else {
            for key in pending.iter() {
                println!("{}", key);
            }
        }
        eprintln!(
            "{} already resolved, {} would be resolved in {} windows",
            resolved.len(),
            pending.len(),
            pending.window_count(config.concurrency)
        );
        return Ok(true);
    }

    if !args.json {
        ui::print_header(&config, resolved.len(), pending.len());
    }

    let dispatcher = BatchDispatcher::with_config(
        GeocodeClient::with_config(&config)?,
        CheckpointWriter::new(&config.store_out),
        &config,
    );

    let term = Term::stderr();
    let start_time = Instant::now();
    let report = dispatcher
        .run_with_progress(resolved, pending, |progress| {
            if !args.json {
                ui::print_progress(&term, progress);
            }
        })
        .await;
    let duration = start_time.elapsed();

    if args.json {
        print_json_summary(&report, &config, duration)?;
    } else {
        ui::print_summary(&report, duration);
        ui::print_error_summary(&report.errors, args.verbose);
    }

    if let Err(e) = &report.final_checkpoint {
        eprintln!("Error: {}", e);
        return Ok(false);
    }
    Ok(true)
}

fn print_json_summary(
    report: &RunReport,
    config: &RunConfig,
    duration: Duration,
) -> Result<(), Box<dyn std::error::Error>> {
    let summary = JsonSummary {
        store_out: &config.store_out,
        windows: report.windows,
        processed: report.processed,
        newly_resolved: report.newly_resolved,
        total_resolved: report.resolved.len(),
        checkpoints_written: report.checkpoints_written,
        checkpoint_failures: report.checkpoint_failures,
        final_checkpoint_error: report.final_checkpoint.as_ref().err().map(|e| e.to_string()),
        duration_ms: duration.as_millis(),
        error_counts: report
            .error_counts()
            .into_iter()
            .map(|(kind, count)| (kind.to_string(), count))
            .collect(),
        errors: report
            .errors
            .iter()
            .map(|record| JsonFailure {
                key: record.key.as_str(),
                kind: record.kind(),
                message: record.failure.to_string(),
            })
            .collect(),
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

/// Build RunConfig with config file integration.
///
/// Precedence order (highest to lowest):
/// 1. CLI arguments (explicit user input)
/// 2. Environment variables (GB_*)
/// 3. Local config file (./geobatch.toml)
/// 4. Global config file (~/.geobatch.toml)
/// 5. XDG config file (~/.config/geobatch/config.toml)
/// 6. Built-in defaults
fn build_config(args: &Args) -> Result<RunConfig, Box<dyn std::error::Error>> {
    let config_manager = ConfigManager::new();
    let env_config = load_env_config();

    // Step 1: Config files
    let explicit_path = args.config.clone().or_else(|| env_config.config.clone());
    let file_config = match explicit_path {
        Some(path) => {
            info!(path = %path.display(), "using explicit config file");
            config_manager
                .load_file(&path)
                .map_err(|e| format!("Failed to load config file '{}': {}", path.display(), e))?
        }
        None => config_manager.discover_and_load().unwrap_or_else(|e| {
            warn!(error = %e, "config discovery failed, using defaults");
            FileConfig::default()
        }),
    };
    let mut config = merge_file_config_into_run_config(RunConfig::default(), file_config);

    // Step 2: Environment variables
    if let Some(path) = env_config.store_in {
        config.store_in = path;
    }
    if let Some(path) = env_config.store_out {
        config.store_out = path;
    }
    if let Some(path) = env_config.corpus {
        config.corpus = path;
    }
    if let Some(url) = env_config.base_url {
        config = config.with_base_url(url);
    }
    if let Some(param) = env_config.query_param {
        config = config.with_query_param(param);
    }
    if let Some(api_key) = env_config.api_key {
        config = config.with_api_key(api_key);
    }
    if let Some(format) = env_config.format {
        config = config.with_format(format);
    }
    if let Some(concurrency) = env_config.concurrency {
        config = config.with_concurrency(concurrency);
    }
    if let Some(every) = env_config.checkpoint_every {
        config = config.with_checkpoint_every(every);
    }
    if let Some(timeout) = env_config.timeout.as_deref().and_then(parse_timeout_string) {
        config = config.with_timeout(Duration::from_millis(timeout));
    }

    // Step 3: CLI arguments (highest precedence)
    Ok(apply_cli_args_to_config(config, args))
}

/// Merge FileConfig into RunConfig
fn merge_file_config_into_run_config(mut config: RunConfig, file_config: FileConfig) -> RunConfig {
    if let Some(run) = file_config.run {
        if let Some(path) = run.store_in {
            config.store_in = path;
        }
        if let Some(path) = run.store_out {
            config.store_out = path;
        }
        if let Some(path) = run.corpus {
            config.corpus = path;
        }
        if let Some(concurrency) = run.concurrency {
            config = config.with_concurrency(concurrency);
        }
        if let Some(every) = run.checkpoint_every {
            config = config.with_checkpoint_every(every);
        }
        if let Some(timeout) = run.timeout.as_deref().and_then(parse_timeout_string) {
            config = config.with_timeout(Duration::from_millis(timeout));
        }
    }

    if let Some(provider) = file_config.provider {
        if let Some(url) = provider.base_url {
            config = config.with_base_url(url);
        }
        if let Some(param) = provider.query_param {
            config = config.with_query_param(param);
        }
        if let Some(api_key) = provider.api_key {
            config = config.with_api_key(api_key);
        }
        if let Some(format) = provider.format.as_deref().and_then(PayloadFormat::parse) {
            config = config.with_format(format);
        }
    }

    config
}

/// Apply CLI arguments to config (highest precedence).
fn apply_cli_args_to_config(mut config: RunConfig, args: &Args) -> RunConfig {
    if let Some(path) = &args.corpus {
        config.corpus = path.clone();
    }
    if let Some(path) = &args.store_in {
        config.store_in = path.clone();
    }
    if let Some(path) = &args.store_out {
        config.store_out = path.clone();
    }
    if let Some(url) = &args.url {
        config = config.with_base_url(url.clone());
    }
    if let Some(param) = &args.param {
        config = config.with_query_param(param.clone());
    }
    if let Some(api_key) = &args.api_key {
        config = config.with_api_key(api_key.clone());
    }
    if let Some(format) = args.format.as_deref().and_then(PayloadFormat::parse) {
        config = config.with_format(format);
    }
    if let Some(concurrency) = args.concurrency {
        config = config.with_concurrency(concurrency);
    }
    if let Some(every) = args.checkpoint_every {
        config = config.with_checkpoint_every(every);
    }
    if let Some(timeout) = args.timeout.as_deref().and_then(parse_timeout_string) {
        config = config.with_timeout(Duration::from_millis(timeout));
    }
    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use geobatch_lib::{ProviderSection, RunSection};

    fn create_test_args() -> Args {
        Args {
            corpus: None,
            store_in: None,
            store_out: None,
            fresh: false,
            url: None,
            param: None,
            api_key: None,
            format: None,
            concurrency: None,
            checkpoint_every: None,
            timeout: None,
            json: false,
            dry_run: false,
            config: None,
            verbose: false,
            debug: false,
        }
    }

    #[test]
    fn test_validate_args_defaults_ok() {
        assert!(validate_args(&create_test_args()).is_ok());
    }

    #[test]
    fn test_validate_args_rejects_bad_values() {
        let mut args = create_test_args();
        args.concurrency = Some(0);
        assert!(validate_args(&args).is_err());

        let mut args = create_test_args();
        args.concurrency = Some(101);
        assert!(validate_args(&args).is_err());

        let mut args = create_test_args();
        args.checkpoint_every = Some(0);
        assert!(validate_args(&args).is_err());

        let mut args = create_test_args();
        args.timeout = Some("whenever".to_string());
        assert!(validate_args(&args).is_err());

        let mut args = create_test_args();
        args.format = Some("bing".to_string());
        assert!(validate_args(&args).is_err());

        let mut args = create_test_args();
        args.url = Some("maps.example.com".to_string());
        assert!(validate_args(&args).is_err());
    }

    #[test]
    fn test_file_config_merge() {
        let file_config = FileConfig {
            run: Some(RunSection {
                corpus: Some(PathBuf::from("films/locations.list")),
                concurrency: Some(25),
                timeout: Some("3s".to_string()),
                ..Default::default()
            }),
            provider: Some(ProviderSection {
                format: Some("arcgis".to_string()),
                query_param: Some("singleLine".to_string()),
                ..Default::default()
            }),
        };

        let config = merge_file_config_into_run_config(RunConfig::default(), file_config);
        assert_eq!(config.corpus, PathBuf::from("films/locations.list"));
        assert_eq!(config.concurrency, 25);
        assert_eq!(config.timeout, Duration::from_secs(3));
        assert_eq!(config.format, PayloadFormat::ArcGis);
        assert_eq!(config.query_param, "singleLine");
        assert_eq!(config.store_out, PathBuf::from("geocodes2.list"));
    }

    #[test]
    fn test_cli_args_override_config() {
        let base = RunConfig::default()
            .with_concurrency(25)
            .with_checkpoint_every(5);

        let mut args = create_test_args();
        args.concurrency = Some(4);
        args.store_out = Some(PathBuf::from("out.list"));
        args.timeout = Some("500ms".to_string());

        let config = apply_cli_args_to_config(base, &args);
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.checkpoint_every, 5); // untouched
        assert_eq!(config.store_out, PathBuf::from("out.list"));
        assert_eq!(config.timeout, Duration::from_millis(500));
    }

    #[test]
    fn test_cli_args_absent_keep_config() {
        let base = RunConfig::default().with_api_key("secret");
        let config = apply_cli_args_to_config(base, &create_test_args());
        assert_eq!(config.api_key, Some("secret".to_string()));
        assert_eq!(config.concurrency, 10);
    }
}
