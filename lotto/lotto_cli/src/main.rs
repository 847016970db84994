use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{bail, Context, Result};
use chrono::SecondsFormat;
use clap::{Parser, Subcommand};
use lotto_engine::{
    random_pick, EngineConfig, EngineTelemetry, HistoryEntry, HistoryLog, LottoPredictor,
    PredictionResult,
};
use serde::Serialize;
use shared_event_bus::FileEventPublisher;
use shared_logging::{read_records, LogLevel, LogRecord};
use tokio::runtime::Runtime;

const DEFAULT_CONFIG: &str = "lotto.toml";

#[derive(Parser, Debug)]
#[command(name = "lotto", version, about = "Ensemble lotto number predictor")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Predicts the next draw from the feature matrix and both models.
    Predict(PredictArgs),
    /// Manages saved picks.
    History {
        /// Engine config; `lotto.toml` is used when present.
        #[arg(long)]
        config: Option<PathBuf>,
        #[command(subcommand)]
        action: HistoryAction,
    },
    /// Prints a uniform random pick without loading any model.
    Random {
        #[arg(long, default_value_t = lotto_engine::PICK_COUNT)]
        count: usize,
        #[arg(long, default_value_t = 45)]
        universe: u32,
    },
    /// Shows recent records from a JSON-lines engine log.
    Logs {
        path: PathBuf,
        /// Minimum level to show.
        #[arg(long, default_value = "info")]
        level: String,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[derive(Parser, Debug)]
struct PredictArgs {
    /// Engine config; `lotto.toml` is used when present.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Appends the pick to the history log.
    #[arg(long)]
    save: bool,
    /// Prints the full result as JSON.
    #[arg(long)]
    json: bool,
    /// Structured log output.
    #[arg(long)]
    log: Option<PathBuf>,
    /// Event log output.
    #[arg(long)]
    events: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum HistoryAction {
    /// Lists saved picks, newest first.
    List {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Deletes one saved pick.
    Delete { id: String },
    /// Deletes every saved pick.
    Clear,
}

#[derive(Serialize)]
struct PredictOutput<'a> {
    #[serde(flatten)]
    result: &'a PredictionResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    saved: Option<&'a HistoryEntry>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Predict(args) => handle_predict(args),
        Commands::History { config, action } => {
            let config = load_config(config.as_deref())?;
            handle_history(&HistoryLog::new(config.history_path), action)
        }
        Commands::Random { count, universe } => {
            anyhow::ensure!(universe > 0, "universe must be positive");
            println!("{}", format_numbers(&random_pick(count, universe)));
            Ok(())
        }
        Commands::Logs { path, level, limit } => {
            let min_level =
                LogLevel::parse(&level).with_context(|| format!("unknown log level '{level}'"))?;
            for record in recent_records(&path, min_level, limit)? {
                println!("{}", format_record(&record));
            }
            Ok(())
        }
    }
}

fn handle_predict(args: PredictArgs) -> Result<()> {
    let config = load_config(args.config.as_deref())?;
    let mut telemetry = EngineTelemetry::builder("lotto");
    if let Some(path) = &args.log {
        telemetry = telemetry.log_path(path);
    }
    if let Some(path) = &args.events {
        telemetry = telemetry.event_publisher(Arc::new(FileEventPublisher::new(path)?));
    }
    let history_path = config.history_path.clone();
    let runtime = Runtime::new().context("starting tokio runtime")?;
    let predictor = LottoPredictor::builder(config)
        .telemetry(telemetry.build()?)
        .build()?;
    let result = runtime.block_on(predictor.predict());

    let saved = if args.save {
        Some(HistoryLog::new(history_path).append(&result.numbers)?)
    } else {
        None
    };
    if args.json {
        let output = PredictOutput {
            result: &result,
            saved: saved.as_ref(),
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }
    println!("{}", format_numbers(&result.numbers));
    if result.is_fallback() {
        eprintln!("models unavailable; numbers were drawn at random");
    }
    if let Some(entry) = saved {
        eprintln!("saved as {}", entry.id);
    }
    Ok(())
}

fn handle_history(log: &HistoryLog, action: HistoryAction) -> Result<()> {
    match action {
        HistoryAction::List { limit } => {
            for entry in log.list()?.into_iter().take(limit) {
                println!("{}", format_entry(&entry));
            }
        }
        HistoryAction::Delete { id } => {
            if !log.delete(&id)? {
                bail!("history entry {id} not found");
            }
            println!("deleted {id}");
        }
        HistoryAction::Clear => {
            log.clear()?;
            println!("history cleared");
        }
    }
    Ok(())
}

/// Explicit paths must exist; otherwise `lotto.toml` is optional.
fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    match path {
        Some(path) => {
            EngineConfig::load(path).with_context(|| format!("loading {}", path.display()))
        }
        None if Path::new(DEFAULT_CONFIG).exists() => {
            EngineConfig::load(DEFAULT_CONFIG).context("loading lotto.toml")
        }
        None => Ok(EngineConfig::default()),
    }
}

fn recent_records(path: &Path, min_level: LogLevel, limit: usize) -> Result<Vec<LogRecord>> {
    let records: Vec<LogRecord> = read_records(path)?
        .into_iter()
        .filter(|record| record.level >= min_level)
        .collect();
    let skip = records.len().saturating_sub(limit);
    Ok(records.into_iter().skip(skip).collect())
}

fn format_numbers(numbers: &[u32]) -> String {
    numbers
        .iter()
        .map(|n| format!("{n:>2}"))
        .collect::<Vec<_>>()
        .join(" ")
}

fn format_entry(entry: &HistoryEntry) -> String {
    format!(
        "{} | {} | {}",
        entry.id,
        entry.date.to_rfc3339_opts(SecondsFormat::Secs, true),
        format_numbers(&entry.numbers)
    )
}

fn format_record(record: &LogRecord) -> String {
    let mut line = format!(
        "{} {:<5} {} {}",
        record.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
        format!("{:?}", record.level).to_uppercase(),
        record.module,
        record.message
    );
    if !record.metadata.is_empty() {
        line.push(' ');
        line.push_str(&serde_json::Value::Object(record.metadata.clone()).to_string());
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_logging::JsonLogger;
    use tempfile::tempdir;

    #[test]
    fn numbers_are_right_aligned() {
        assert_eq!(format_numbers(&[1, 7, 13, 22, 38, 45]), " 1  7 13 22 38 45");
    }

    #[test]
    fn recent_records_filters_and_keeps_the_tail() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("engine.log");
        let logger = JsonLogger::new(&path).unwrap();
        for idx in 0..5 {
            logger
                .log(&LogRecord::new("lotto", LogLevel::Info, format!("info {idx}")))
                .unwrap();
        }
        logger
            .log(&LogRecord::new("lotto", LogLevel::Warn, "lotto.prediction.fallback"))
            .unwrap();

        let warnings = recent_records(&path, LogLevel::Warn, 10).unwrap();
        assert_eq!(warnings.len(), 1);
        let tail = recent_records(&path, LogLevel::Debug, 2).unwrap();
        assert_eq!(tail[0].message, "info 4");
        assert!(format_record(&tail[1]).contains("WARN"));
    }

    #[test]
    fn explicit_missing_config_is_an_error() {
        let dir = tempdir().unwrap();
        assert!(load_config(Some(&dir.path().join("absent.toml"))).is_err());
    }

    #[test]
    fn cli_parses_history_delete() {
        let cli = Cli::try_parse_from(["lotto", "history", "delete", "1733540000000"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::History {
                action: HistoryAction::Delete { .. },
                ..
            }
        ));
    }
}
