use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use view_counter::{CliArgs, Config, IntervalClass};

#[derive(Parser)]
#[command(name = "view-counter")]
#[command(about = "Count topic views read from stdin, one topic ID per line")]
struct Cli {
    #[arg(short, long, help = "Increase verbosity")]
    verbose: bool,

    #[arg(short, long, env = "VIEW_COUNTER_CONFIG", help = "Config file (TOML or JSON)")]
    config: Option<PathBuf>,

    #[arg(long, help = "File holding the week bookmark")]
    meta_path: Option<PathBuf>,

    #[arg(long, help = "Flush interval: half_second, second, fifteen_minutes, hour")]
    flush_interval: Option<String>,

    #[arg(long, help = "Do not push flushed views into the entity cache")]
    no_cache: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let flush_interval = cli
        .flush_interval
        .as_deref()
        .map(|s| s.parse::<IntervalClass>())
        .transpose()
        .context("Invalid --flush-interval")?;

    let args = CliArgs {
        config_file: cli.config,
        meta_path: cli.meta_path,
        flush_interval,
        no_cache: cli.no_cache,
        log_level: cli.verbose.then(|| "debug".to_string()),
    };

    let config = Config::load_with_cli(&args).context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    let level: tracing::Level = config
        .logging
        .level
        .parse()
        .unwrap_or(tracing::Level::INFO);
    let subscriber = tracing_subscriber::fmt().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    view_counter::run(config, stdin).await
}
