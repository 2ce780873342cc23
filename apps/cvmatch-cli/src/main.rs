use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use parking_lot::Mutex;
use tracing::info;
use tracing_subscriber::EnvFilter;

use cvmatch_core::{
    Config, EmbeddingModelKind, GenerativeModelKind, MatchResult, MatchSettings, PromptVersion, RetrievalBackend,
    SettingsHandle,
};
use cvmatch_pipeline::{Orchestrator, PartialSink, RunOutcome};

mod extract;

const EXIT_CANCELLED: i32 = 130;

#[derive(Parser, Debug)]
#[command(name = "cvmatch", about = "Rank CVs against a job description and explain the fit with an LLM")]
struct Cli {
    /// Directory holding cvmatch.toml (defaults to the working directory)
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Match CVs against a job description
    Match(MatchArgs),
    /// Print the effective settings as JSON
    Config,
}

#[derive(Args, Debug)]
struct MatchArgs {
    /// Job description file, or the description text itself
    #[arg(long)]
    jd: String,

    /// CV file (.txt, .md or .pdf); repeatable
    #[arg(long = "cv")]
    cvs: Vec<PathBuf>,

    /// Directory searched recursively for CV files
    #[arg(long)]
    cv_dir: Option<PathBuf>,

    #[arg(long)]
    embedding: Option<EmbeddingModelKind>,

    #[arg(long)]
    generator: Option<GenerativeModelKind>,

    #[arg(long)]
    backend: Option<RetrievalBackend>,

    #[arg(long)]
    prompt: Option<PromptVersion>,

    #[arg(long)]
    top_k: Option<usize>,

    /// Drop candidates scoring below this cosine similarity
    #[arg(long)]
    min_score: Option<f32>,

    /// Generation timeout in seconds
    #[arg(long)]
    timeout: Option<f64>,
}

impl MatchArgs {
    fn apply(&self, settings: &mut MatchSettings) {
        if let Some(v) = self.embedding { settings.pipeline.embedding_model = v; }
        if let Some(v) = self.generator { settings.pipeline.generative_model = v; }
        if let Some(v) = self.backend { settings.pipeline.retrieval_backend = v; }
        if let Some(v) = self.prompt { settings.pipeline.prompt_version = v; }
        if let Some(v) = self.top_k { settings.retrieval.top_k = v; }
        if self.min_score.is_some() { settings.retrieval.min_score = self.min_score; }
        if let Some(v) = self.timeout { settings.generation.timeout_secs = v; }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = match &cli.config_dir {
        Some(dir) => Config::load_from(dir),
        None => Config::load(),
    }
    .context("loading configuration")?;
    let mut settings = config.settings().context("reading settings")?;
    init_tracing(&settings.log.level);

    match cli.command {
        Command::Config => {
            println!("{}", serde_json::to_string_pretty(&settings)?);
        }
        Command::Match(args) => {
            args.apply(&mut settings);
            settings.validate()?;
            let code = run_match(args, settings).await?;
            if code != 0 {
                std::process::exit(code);
            }
        }
    }
    Ok(())
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

async fn run_match(args: MatchArgs, settings: MatchSettings) -> Result<i32> {
    let job_description = extract::read_job_description(&args.jd)?;
    let mut files = args.cvs.clone();
    if let Some(dir) = &args.cv_dir {
        files.extend(extract::collect_cv_paths(dir));
    }
    let loaded = extract::load_cvs(&files);
    if loaded.is_empty() {
        bail!("no readable CVs given; pass --cv or --cv-dir");
    }
    info!(cvs = loaded.len(), "loaded candidates");
    let (paths, candidates): (Vec<PathBuf>, Vec<String>) = loaded.into_iter().unzip();

    let orchestrator = Arc::new(Orchestrator::with_defaults(SettingsHandle::new(settings)));
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed}] {msg}")?);
    spinner.set_message("matching candidates...");
    spinner.enable_steady_tick(Duration::from_millis(100));

    let mut handle = orchestrator.spawn_run(job_description, candidates.clone(), streaming_sink(spinner.clone()));
    let outcome = tokio::select! {
        joined = &mut handle => joined.context("matching task panicked")?,
        _ = tokio::signal::ctrl_c() => {
            orchestrator.cancel();
            handle.await.context("matching task panicked")?
        }
    };
    spinner.finish_and_clear();
    println!();

    match outcome {
        RunOutcome::Completed(report) => {
            print_ranking(&report.matches, &paths, &candidates);
            Ok(0)
        }
        RunOutcome::TimedOut { matches, partial } => {
            println!("The model is taking too long to respond; showing what it produced so far.");
            if !partial.is_empty() {
                println!("\n{partial}\n");
            }
            print_ranking(&matches, &paths, &candidates);
            Ok(0)
        }
        RunOutcome::Cancelled => Ok(EXIT_CANCELLED),
        RunOutcome::Failed(e) => Err(e.into()),
    }
}

/// Prints the new suffix of each cumulative partial.
fn streaming_sink(spinner: ProgressBar) -> PartialSink {
    let printed = Arc::new(Mutex::new(String::new()));
    Arc::new(move |partial: &str| {
        if !spinner.is_finished() {
            spinner.finish_and_clear();
        }
        let mut printed = printed.lock();
        if let Some(suffix) = partial.strip_prefix(printed.as_str()) {
            let mut out = std::io::stdout().lock();
            let _ = out.write_all(suffix.as_bytes());
            let _ = out.flush();
            *printed = partial.to_string();
        }
    })
}

fn print_ranking(matches: &[MatchResult], paths: &[PathBuf], candidates: &[String]) {
    if matches.is_empty() {
        println!("{}", cvmatch_core::NO_MATCHES_TEXT);
        return;
    }
    println!("Ranking:");
    for (rank, m) in matches.iter().enumerate() {
        let source = candidates
            .iter()
            .position(|text| *text == m.candidate_text)
            .and_then(|i| paths.get(i))
            .map_or_else(|| "<unknown>".to_string(), |p| display_name(p));
        println!("  {}. {:>7}  {source}", rank + 1, m.score_percent());
    }
}

fn display_name(path: &Path) -> String {
    path.file_name().map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_settings() {
        let cli = Cli::parse_from([
            "cvmatch", "match", "--jd", "Need Swift", "--cv", "a.txt", "--embedding", "bge_m3",
            "--backend", "exact", "--prompt", "v2", "--top-k", "5", "--min-score", "0.4", "--timeout", "30",
        ]);
        let Command::Match(args) = cli.command else { panic!("expected match") };
        let mut settings = MatchSettings::default();
        args.apply(&mut settings);
        assert_eq!(settings.pipeline.embedding_model, EmbeddingModelKind::BgeM3);
        assert_eq!(settings.pipeline.retrieval_backend, RetrievalBackend::Exact);
        assert_eq!(settings.pipeline.prompt_version, PromptVersion::V2);
        assert_eq!(settings.pipeline.generative_model, GenerativeModelKind::LocalTinyLlama);
        assert_eq!(settings.retrieval.top_k, 5);
        assert_eq!(settings.retrieval.min_score, Some(0.4));
        assert_eq!(settings.generation.timeout_secs, 30.0);
    }

    #[test]
    fn streaming_sink_tracks_what_was_printed() {
        let spinner = ProgressBar::hidden();
        let sink = streaming_sink(spinner.clone());
        sink("Candidate 1");
        sink("Candidate 1: strong");
        assert!(spinner.is_finished());
    }

    #[test]
    fn unknown_axis_value_is_rejected() {
        let res = Cli::try_parse_from(["cvmatch", "match", "--jd", "x", "--generator", "gpt5"]);
        assert!(res.is_err());
    }
}
