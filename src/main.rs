//! datapipe - Record Pipeline Command Line
//!
//! Runs a configured pipeline, re-encodes record streams between the wire
//! formats and shows the scheduler settings. Records travel on stdout, so
//! logs and run summaries go to stderr.

use anyhow::Context;
use clap::{Parser, Subcommand};
use datapipe_rs::{
    codec::WireFormat,
    components::{StreamInput, StreamOutput},
    config::{AppConfig, LogFormat, LoggingConfig},
    pipeline::{FeedbackSnapshot, Pipeline, PipelineBuilder},
};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "datapipe", version, about = "Priority-preemptive record pipeline")]
struct Cli {
    /// Pipeline config file (TOML). Defaults to the app data directory.
    #[arg(long, short, global = true, env = "DATAPIPE_CONFIG")]
    config: Option<PathBuf>,

    /// Log filter, e.g. `debug` or `datapipe_rs=trace`. `RUST_LOG` wins.
    #[arg(long, global = true, env = "DATAPIPE_LOG")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the configured pipeline until its inputs are exhausted
    Run {
        /// Print the run feedback as JSON
        #[arg(long)]
        json: bool,
    },
    /// Re-encode a record stream
    Transcode {
        #[arg(long, default_value_t = WireFormat::Ascii)]
        from: WireFormat,
        #[arg(long, default_value_t = WireFormat::Binary)]
        to: WireFormat,
        /// Input file, stdin when omitted
        input: Option<PathBuf>,
        /// Output file, stdout when omitted
        output: Option<PathBuf>,
    },
    /// Show the scheduler settings with their bounds
    Settings,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => AppConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => AppConfig::load_or_default(),
    };

    let _log_guard = init_logging(&config.logging, cli.log_level.as_deref())?;
    tracing::debug!(?cli, "Starting datapipe");

    match cli.command {
        Command::Run { json } => run(config, json),
        Command::Transcode {
            from,
            to,
            input,
            output,
        } => transcode(&config, from, to, input.as_deref(), output.as_deref()),
        Command::Settings => {
            print_settings(&config);
            Ok(())
        }
    }
}

/// Install the global subscriber. The returned guard flushes the log file
/// on drop and must live until exit.
fn init_logging(
    logging: &LoggingConfig,
    level_override: Option<&str>,
) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => {
            let level = level_override.unwrap_or(&logging.level);
            EnvFilter::try_new(level).with_context(|| format!("Invalid log level '{}'", level))?
        }
    };

    // exactly one is `Some`
    let (full, compact, pretty) = match logging.format {
        LogFormat::Full => (Some(fmt::layer().with_writer(std::io::stderr)), None, None),
        LogFormat::Compact => (
            None,
            Some(fmt::layer().with_writer(std::io::stderr).compact()),
            None,
        ),
        LogFormat::Pretty => (
            None,
            None,
            Some(fmt::layer().with_writer(std::io::stderr).pretty()),
        ),
    };

    let (file_layer, guard) = match &logging.file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let file_name = path
                .file_name()
                .with_context(|| format!("Log file {} has no file name", path.display()))?;
            let appender = tracing_appender::rolling::never(dir, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(full)
        .with(compact)
        .with(pretty)
        .with(file_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(guard)
}

fn run(mut config: AppConfig, json: bool) -> anyhow::Result<()> {
    if config.inputs.is_empty() && config.outputs.is_empty() {
        tracing::info!("No endpoints configured, piping stdin to stdout");
        config = AppConfig {
            pipeline: config.pipeline,
            converters: config.converters,
            ..AppConfig::passthrough()
        };
    }

    let mut pipeline = PipelineBuilder::new(config)
        .build()
        .context("Failed to build pipeline")?;
    tracing::info!(components = pipeline.components().len(), "Pipeline built");

    let outcome = pipeline.execute();
    report(&pipeline.feedback().snapshot(), json)?;
    outcome.context("Pipeline run failed")?;
    Ok(())
}

fn transcode(
    config: &AppConfig,
    from: WireFormat,
    to: WireFormat,
    input: Option<&Path>,
    output: Option<&Path>,
) -> anyhow::Result<()> {
    let mut pipeline = Pipeline::new(config.pipeline);
    let input = match input {
        Some(path) => StreamInput::file(path, from),
        None => StreamInput::stdin(from),
    };
    let output = match output {
        Some(path) => StreamOutput::file(path, to, false),
        None => StreamOutput::stdout(to),
    };
    pipeline.add_input(Box::new(input))?;
    pipeline.add_output(Box::new(output))?;

    let feedback = pipeline.execute().context("Transcode failed")?;
    tracing::info!(
        read = feedback.read,
        written = feedback.written,
        "Transcoded {} -> {}",
        from,
        to
    );
    if feedback.permanent_error_count > 0 {
        anyhow::bail!(
            "Transcode stopped early: {}",
            feedback.permanent_errors.join("; ")
        );
    }
    if feedback.temporary_error_count > 0 {
        eprintln!(
            "{} record(s) skipped: {}",
            feedback.temporary_error_count,
            feedback.temporary_errors.join("; ")
        );
    }
    Ok(())
}

fn report(feedback: &FeedbackSnapshot, json: bool) -> anyhow::Result<()> {
    if json {
        eprintln!("{}", feedback.to_json().context("Failed to serialize feedback")?);
    } else {
        eprint!("{}", feedback.summary());
    }
    Ok(())
}

fn print_settings(config: &AppConfig) {
    let entries = config.pipeline.entries();
    let width = entries.iter().map(|(d, _)| d.name.len()).max().unwrap_or(0);
    println!(
        "{:<width$}  {:>7}  {:>7}  {:>13}  description",
        "name",
        "value",
        "default",
        "range",
        width = width
    );
    for (descriptor, value) in entries {
        println!(
            "{:<width$}  {:>7}  {:>7}  {:>13}  {}",
            descriptor.name,
            value,
            descriptor.default,
            format!("{}..={}", descriptor.min, descriptor.max),
            descriptor.description,
            width = width
        );
    }
}
