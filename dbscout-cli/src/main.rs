use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use dbscout::{
    ConfigOverrides, EngineConfig, Match, SearchEngine, SearchOptions, SearchOutput,
};
use std::{num::NonZeroUsize, path::PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Options shared by every command
#[derive(Args)]
struct CommonArgs {
    /// Directory holding the data files (default: "base" or the configured root)
    #[arg(short = 'd', long)]
    root: Option<PathBuf>,

    /// File extensions to include (e.g. csv,txt,sql)
    #[arg(short = 'e', long)]
    extensions: Option<String>,

    /// Patterns to ignore (glob format)
    #[arg(short, long)]
    ignore: Vec<String>,

    /// Configuration file (YAML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,
}

#[derive(Args)]
struct SearchArgs {
    /// Text to search for, matched case-insensitively
    term: String,

    #[command(flatten)]
    common: CommonArgs,

    /// Maximum number of matches to return
    #[arg(short = 'n', long)]
    max_results: Option<NonZeroUsize>,

    /// Number of threads to use
    #[arg(short = 'j', long)]
    threads: Option<NonZeroUsize>,

    /// Field delimiter for csv files
    #[arg(long)]
    delimiter: Option<char>,

    /// Treat the first row of csv files as data
    #[arg(long)]
    no_header: bool,

    /// Show only statistics, not matches
    #[arg(short, long)]
    stats: bool,

    /// Print matches and summary as JSON
    #[arg(long, conflicts_with = "stats")]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Search data files for a term
    Search(Box<SearchArgs>),

    /// Show how many files a search would scan
    Stats(CommonArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Search(args) => {
            let overrides = ConfigOverrides {
                max_results: args.max_results,
                thread_count: args.threads,
                delimiter: args.delimiter,
                no_header: args.no_header,
                ..common_overrides(&args.common)
            };
            let config = load_config(&args.common, overrides)?;
            init_logging(&config.log_level);

            let engine = SearchEngine::new(config)?;
            let output = engine.search_default(&args.term)?;

            if args.json {
                let json = serde_json::json!({
                    "matches": &*output.matches,
                    "summary": &output.summary,
                });
                println!("{}", serde_json::to_string_pretty(&json)?);
            } else {
                print_search_results(&output, args.stats);
            }
            Ok(())
        }
        Commands::Stats(common) => {
            let config = load_config(&common, common_overrides(&common))?;
            init_logging(&config.log_level);

            let engine = SearchEngine::new(config)?;
            let options = SearchOptions::from(engine.config());
            let (files, bytes) = engine.file_stats(&options)?;
            println!(
                "{} files ({} bytes) under {}",
                files,
                bytes,
                options.root_path.display().to_string().blue()
            );
            Ok(())
        }
    }
}

fn common_overrides(common: &CommonArgs) -> ConfigOverrides {
    ConfigOverrides {
        root_path: common.root.clone(),
        file_extensions: common.extensions.as_ref().map(|e| {
            e.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        }),
        ignore_patterns: common.ignore.clone(),
        log_level: common.log_level.clone(),
        ..Default::default()
    }
}

fn load_config(common: &CommonArgs, overrides: ConfigOverrides) -> Result<EngineConfig> {
    let config = EngineConfig::load_from(common.config.as_deref())
        .context("failed to load configuration")?;
    Ok(config.merge_with_cli(overrides))
}

fn init_logging(level: &str) {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn print_search_results(output: &SearchOutput, stats_only: bool) {
    let summary = &output.summary;

    if summary.empty_index {
        println!("No searchable files found");
        return;
    }
    for skipped in &summary.skipped {
        eprintln!(
            "{} {}: {}",
            "skipped".yellow(),
            skipped.path.display(),
            skipped.reason
        );
    }
    if let Some(batch) = &summary.batch_error {
        eprintln!("{} {}", "error:".red().bold(), batch);
    }

    if !stats_only {
        let mut current: Option<&std::path::Path> = None;
        for m in output.iter() {
            if current != Some(m.path.as_path()) {
                println!("\n{}", m.path.display().to_string().blue());
                current = Some(m.path.as_path());
            }
            println!("{}: {}", m.line_number.to_string().green(), highlight(m));
        }
    }

    println!(
        "\nFound {} matches in {} files ({})",
        output.len(),
        output.files_with_matches(),
        summary
    );
}

fn highlight(m: &Match) -> String {
    let text = &m.matched_text;
    let line = format!(
        "{}{}{}",
        &text[..m.start],
        text[m.start..m.end].red().bold(),
        &text[m.end..]
    );
    match &m.matched_field {
        Some(field) => format!("{} {}", format!("[{}]", field).yellow(), line),
        None => line,
    }
}
