use std::{
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use studydoc_core::{
    BatchReport, Config, OpenAiCompatibleBackend, PandocRenderer, Pipeline, Services, StageIo,
    Step, StepSelection, UnitOutcome, discover_units, transcribe,
};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs_f64();
    if secs < 60.0 {
        format!("{:.1}s", secs)
    } else {
        format!("{:.0}m {:.0}s", (secs / 60.0).floor(), secs % 60.0)
    }
}

/// CLI names for steps (needed for clap ValueEnum)
#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum CliStep {
    Srt2txt,
    Txt2md,
    Md2docx,
    All,
}

fn selection_from(steps: &[CliStep]) -> StepSelection {
    if steps.is_empty() || steps.contains(&CliStep::All) {
        return StepSelection::All;
    }
    StepSelection::only(steps.iter().filter_map(|step| match step {
        CliStep::Srt2txt => Some(Step::Srt2Txt),
        CliStep::Txt2md => Some(Step::Txt2Md),
        CliStep::Md2docx => Some(Step::Md2Docx),
        CliStep::All => None,
    }))
}

#[derive(Parser)]
#[command(name = "studydoc")]
#[command(about = "Turn lecture videos and subtitles into summarized study documents")]
struct Cli {
    /// Input video, subtitle, text or markdown file, or a directory of them
    #[arg(short, long)]
    input: PathBuf,

    /// Output directory. Defaults to paths.default_output_dir from the config
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Steps to run, in pipeline order
    #[arg(short, long, value_enum, num_args = 1.., value_delimiter = ',', default_value = "all")]
    steps: Vec<CliStep>,

    /// Configuration file (default: <config dir>/studydoc/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Recompute every requested stage even if its output exists
    #[arg(short, long)]
    force: bool,
}

fn load_config(explicit: Option<&Path>) -> Result<Config> {
    let config = match explicit {
        Some(path) => Config::load(path)?,
        None => match Config::default_path() {
            Some(path) => Config::load_or_default(&path)?,
            None => Config::default(),
        },
    }
    .with_env_overrides();
    config.validate()?;
    Ok(config)
}

/// Console logs go to stderr, file logs to `<log_dir>/pipeline-<unix-seconds>.log`.
fn init_tracing(config: &Config) -> Result<Option<PathBuf>> {
    let level = config.logging.level.to_lowercase();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("warn,studydoc={level},studydoc_core={level}"))
    });

    let console_layer = config
        .logging
        .log_to_console
        .then(|| fmt::layer().with_writer(std::io::stderr).with_target(false));

    let mut log_path = None;
    let file_layer = if config.logging.log_to_file {
        std::fs::create_dir_all(&config.paths.log_dir).with_context(|| {
            format!("creating log directory {}", config.paths.log_dir.display())
        })?;
        let started = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        let path = config.paths.log_dir.join(format!("pipeline-{started}.log"));
        let file = std::fs::File::create(&path)
            .with_context(|| format!("creating log file {}", path.display()))?;
        log_path = Some(path);
        Some(fmt::layer().with_writer(Mutex::new(file)).with_ansi(false))
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .init();
    Ok(log_path)
}

fn create_progress(len: u64, visible: bool) -> Result<ProgressBar> {
    if !visible {
        return Ok(ProgressBar::hidden());
    }
    let pb = ProgressBar::new(len);
    pb.set_style(
        ProgressStyle::default_bar()
            .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ")
            .template("{spinner:.cyan} [{bar:30.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("=> "),
    );
    pb.enable_steady_tick(Duration::from_millis(80));
    Ok(pb)
}

fn outcome_line(outcome: &UnitOutcome, elapsed: Duration) -> String {
    let marker = if outcome.is_failed() {
        style("✗").red().bold()
    } else {
        style("✓").green().bold()
    };
    let detail = match &outcome.error {
        Some(failure) => style(failure.to_string()).red().to_string(),
        None if outcome.ran.is_empty() => style("(up to date)").dim().to_string(),
        None => {
            let ran: Vec<String> = outcome.ran.iter().map(|s| s.to_string()).collect();
            style(ran.join(", ")).dim().to_string()
        }
    };
    format!(
        "{} {} {} {}",
        marker,
        outcome.unit_id,
        detail,
        style(format!("[{}]", format_duration(elapsed))).dim()
    )
}

fn print_report(report: &BatchReport) {
    println!("{}", style("─".repeat(60)).dim());
    println!("{:<32} {:<20} {}", style("Unit").bold(), style("State").bold(), style("Source").bold());
    for outcome in &report.outcomes {
        let state = outcome.state.to_string();
        let state = if outcome.is_failed() {
            style(state).red()
        } else {
            style(state).green()
        };
        println!(
            "{:<32} {:<20} {}",
            outcome.unit_id,
            state,
            style(outcome.source.display()).dim()
        );
    }
    println!("{}", style("─".repeat(60)).dim());
    println!(
        "{} {}   {} {}   {} {}",
        style("Succeeded:").dim(),
        style(report.succeeded()).green().bold(),
        style("Failed:").dim(),
        style(report.failed()).red().bold(),
        style("Up to date:").dim(),
        style(report.up_to_date()).cyan()
    );
}

/// Startup failures (bad config, unreadable input, missing API key) exit with 2.
fn or_exit<T>(result: std::result::Result<T, impl std::fmt::Display>) -> T {
    match result {
        Ok(value) => value,
        Err(e) => {
            eprintln!("{} {:#}", style("Error:").red().bold(), e);
            std::process::exit(2);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = or_exit(load_config(cli.config.as_deref()));
    let log_path = or_exit(init_tracing(&config));

    let selection = selection_from(&cli.steps);
    let output_root = cli.output.clone().or_else(|| config.default_output_root());
    let units = or_exit(discover_units(&cli.input, &selection, output_root.as_deref()));

    println!(
        "\n{}  {}\n",
        style("studydoc").cyan().bold(),
        style(format!("steps: {selection}")).dim()
    );

    if units.is_empty() {
        println!("{} Nothing to do under {}", style("✓").green().bold(), cli.input.display());
        return Ok(());
    }

    // Validate API key early
    let backend = or_exit(OpenAiCompatibleBackend::new(&config.backend));
    tracing::info!(endpoint = backend.endpoint(), units = units.len(), "Starting batch");

    let services = Services {
        transcriber: or_exit(transcribe::from_config(&config.transcription)),
        backend: Arc::new(backend),
        renderer: Arc::new(PandocRenderer::new(&config.processing.md2docx)),
    };
    let pipeline = Pipeline::new(&config, services, StageIo::new(output_root, cli.force));

    let total_start = Instant::now();
    let pb = create_progress(units.len() as u64, config.ui.show_progress_bars)?;
    let mut report = BatchReport::default();
    for unit in &units {
        pb.set_message(unit.id.clone());
        let unit_start = Instant::now();
        let outcome = pipeline.process_unit(unit, &selection).await;
        pb.println(outcome_line(&outcome, unit_start.elapsed()));
        pb.inc(1);
        report.push(outcome);
    }
    pb.finish_and_clear();

    print_report(&report);
    println!(
        "{} {}",
        style("Total time:").dim(),
        style(format_duration(total_start.elapsed())).cyan().bold()
    );
    if let Some(path) = log_path {
        println!("{} {}", style("Log:").dim(), style(path.display()).cyan());
    }

    if report.has_failures() {
        std::process::exit(1);
    }
    Ok(())
}
