use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use bunker_transcode::config::{TranscodeConfig, expand_inputs};
use bunker_transcode::engine::MediaEngine;
use bunker_transcode::engine::native::NativeEngine;
use bunker_transcode::io::InputAdapter;
use bunker_transcode::observability::{MetricsCollector, log_snapshot};
use bunker_transcode::presets::{PRESET_NAMES, generate_preset};
use bunker_transcode::report::{JobReport, compute_sha256};
use bunker_transcode::transcoder::{Transcoder, probe};
use bunker_transcode::validation::validate_config;
use clap::{Parser, Subcommand};
use serde_json::to_writer_pretty;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, prelude::*};

const STDIO: &str = "-";

fn main() -> Result<()> {
    let cli = Cli::parse();
    configure_tracing()?;

    match cli.command {
        Commands::Run {
            config,
            inputs,
            output_dir,
            report,
            print_metrics,
            metrics_json,
            metrics_prometheus,
        } => run_config(
            config,
            inputs,
            output_dir,
            report,
            MetricsOutputs {
                print: print_metrics,
                json: metrics_json,
                prometheus: metrics_prometheus,
            },
        ),
        Commands::Probe { input } => probe_cmd(&input),
        Commands::Validate { config } => validate_config_cmd(config),
        Commands::Preset { action } => preset_command(action),
        Commands::ListCodecs => {
            list_codecs();
            Ok(())
        }
        Commands::Digest { path } => {
            let digest = compute_sha256(&path)?;
            println!("{}  {}", digest, path.display());
            info!(file = %path.display(), "SHA256 computed");
            Ok(())
        }
    }
}

/// Logs go to stderr so stdout stays free for media and JSON.
fn configure_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .try_init()
        .map_err(|err| anyhow!(err.to_string()))?;
    Ok(())
}

fn engine() -> Arc<dyn MediaEngine> {
    Arc::new(NativeEngine::initialize())
}

struct MetricsOutputs {
    print: bool,
    json: Option<PathBuf>,
    prometheus: Option<PathBuf>,
}

fn run_config(
    config_path: PathBuf,
    inputs: Vec<String>,
    output_dir: PathBuf,
    report_path: Option<PathBuf>,
    metrics_outputs: MetricsOutputs,
) -> Result<()> {
    let config = TranscodeConfig::load(&config_path)?;
    let engine = engine();
    let report = validate_config(&config, engine.as_ref());
    for warning in &report.warnings {
        warn!(file = %config_path.display(), "{warning}");
    }
    if !report.is_ok() {
        for error_msg in &report.errors {
            error!(file = %config_path.display(), "{error_msg}");
        }
        return Err(anyhow!(
            "Config validation failed with {} error(s)",
            report.errors.len()
        ));
    }

    let metrics = MetricsCollector::new();
    let transcoder = Transcoder::new(engine.clone(), config.clone()).with_metrics(metrics.clone());
    let mut job_report = JobReport::new(&config);

    if inputs.iter().any(|input| input == STDIO) {
        if inputs.len() > 1 {
            return Err(anyhow!("'-' streams stdin to stdout and cannot be mixed with files"));
        }
        let summary = transcoder
            .transcode(io::stdin(), io::stdout())
            .context("Failed to transcode stdin")?;
        job_report.record(Path::new(STDIO), Path::new(STDIO), &summary)?;
    } else {
        let extension = engine
            .guess_output_format(&config.container_format)?
            .extension;
        let files = expand_inputs(&inputs)?;
        std::fs::create_dir_all(&output_dir).with_context(|| {
            format!("Failed to create output directory: {}", output_dir.display())
        })?;
        for input in files {
            let output = output_path(&input, &output_dir, &extension)?;
            let reader = File::open(&input)
                .with_context(|| format!("Failed to open input: {}", input.display()))?;
            let writer = File::create(&output)
                .with_context(|| format!("Failed to create output: {}", output.display()))?;
            let summary = transcoder
                .transcode(reader, writer)
                .with_context(|| format!("Failed to transcode {}", input.display()))?;
            info!(
                input = %input.display(),
                output = %output.display(),
                "Transcode completed"
            );
            job_report.record(&input, &output, &summary)?;
        }
    }

    if let Some(path) = report_path {
        job_report.write(&path)?;
        info!(report = %path.display(), "Job report written");
    }
    write_metrics(&metrics, metrics_outputs)
}

fn output_path(input: &Path, output_dir: &Path, extension: &str) -> Result<PathBuf> {
    let stem = input
        .file_stem()
        .ok_or_else(|| anyhow!("Input has no file name: {}", input.display()))?;
    let output = output_dir.join(format!("{}.{extension}", stem.to_string_lossy()));
    if output == input {
        return Err(anyhow!(
            "Output would overwrite its input: {}",
            input.display()
        ));
    }
    Ok(output)
}

fn write_metrics(metrics: &MetricsCollector, outputs: MetricsOutputs) -> Result<()> {
    if !outputs.print && outputs.json.is_none() && outputs.prometheus.is_none() {
        return Ok(());
    }
    let snapshot = metrics.snapshot();
    if outputs.print {
        log_snapshot(&snapshot);
    }
    if let Some(path) = outputs.json {
        create_parent(&path)?;
        let file = File::create(&path)
            .with_context(|| format!("Failed to create metrics file: {}", path.display()))?;
        to_writer_pretty(file, &snapshot)
            .with_context(|| format!("Failed to write metrics JSON: {}", path.display()))?;
        info!(metrics = %path.display(), "Metrics JSON written");
    }
    if let Some(path) = outputs.prometheus {
        create_parent(&path)?;
        std::fs::write(&path, snapshot.to_prometheus())
            .with_context(|| format!("Failed to write Prometheus metrics: {}", path.display()))?;
        info!(metrics = %path.display(), "Prometheus metrics written");
    }
    Ok(())
}

fn create_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create metrics directory: {}", parent.display()))?;
    }
    Ok(())
}

fn probe_cmd(input: &str) -> Result<()> {
    let engine = engine();
    let adapter = if input == STDIO {
        InputAdapter::from_reader(io::stdin())
    } else {
        let file = File::open(input).with_context(|| format!("Failed to open input: {input}"))?;
        InputAdapter::from_reader(file)
    };
    let streams =
        probe(engine.as_ref(), adapter).with_context(|| format!("Failed to probe {input}"))?;
    let stdout = io::stdout();
    to_writer_pretty(stdout.lock(), &streams).context("Failed to write stream table")?;
    println!();
    Ok(())
}

fn validate_config_cmd(config_path: PathBuf) -> Result<()> {
    let config = TranscodeConfig::load(&config_path)?;
    let engine = engine();
    let report = validate_config(&config, engine.as_ref());

    for warning in &report.warnings {
        warn!(file = %config_path.display(), "{warning}");
    }

    if report.is_ok() {
        info!(file = %config_path.display(), "Config validation passed");
        Ok(())
    } else {
        for error_msg in &report.errors {
            error!(file = %config_path.display(), "{error_msg}");
        }
        Err(anyhow!(
            "Config validation failed with {} error(s)",
            report.errors.len()
        ))
    }
}

fn preset_command(command: PresetCommands) -> Result<()> {
    match command {
        PresetCommands::New { preset, output } => {
            let destination =
                output.unwrap_or_else(|| PathBuf::from(format!("profiles/{preset}.yaml")));
            let generated = generate_preset(&preset, &destination)?;
            info!(
                preset = %preset,
                path = %generated.display(),
                "Preset config generated"
            );
            Ok(())
        }
        PresetCommands::List => {
            for name in PRESET_NAMES {
                println!("{name}");
            }
            Ok(())
        }
    }
}

fn list_codecs() {
    let engine = engine();
    println!("Available encoders ({}):", engine.name());
    for codec in engine.codecs() {
        println!("- {} [{:?}] {}", codec.name, codec.kind, codec.description);
    }
    println!("Output formats:");
    for format in engine.output_formats() {
        println!("- {} ({}, .{})", format.name, format.mime_type, format.extension);
    }
}

#[derive(Parser)]
#[command(
    name = "bunker-transcode",
    version,
    about = "Streaming audio/video transcoder"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Transcode inputs with a YAML profile.
    Run {
        config: PathBuf,
        /// Files or glob patterns; `-` streams stdin to stdout.
        #[arg(required = true)]
        inputs: Vec<String>,
        #[arg(long = "output-dir", default_value = "out")]
        output_dir: PathBuf,
        #[arg(long)]
        report: Option<PathBuf>,
        #[arg(long)]
        print_metrics: bool,
        #[arg(long = "metrics-json")]
        metrics_json: Option<PathBuf>,
        #[arg(long = "metrics-prometheus")]
        metrics_prometheus: Option<PathBuf>,
    },
    /// Print the stream table of an input as JSON.
    Probe { input: String },
    Validate { config: PathBuf },
    Preset {
        #[command(subcommand)]
        action: PresetCommands,
    },
    ListCodecs,
    Digest {
        #[arg(long)]
        path: PathBuf,
    },
}

#[derive(Subcommand)]
enum PresetCommands {
    New {
        #[arg(long)]
        preset: String,
        #[arg(long)]
        output: Option<PathBuf>,
    },
    List,
}
