use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{CommandFactory, Parser};
use tracing_subscriber::EnvFilter;

use script_localizer::pipeline::memory::{read_snapshot_file, write_snapshot_file};
use script_localizer::pipeline::trace::TraceWriter;
use script_localizer::pipeline::{init_default_config, CliOverrides, Orchestrator, PipelineConfig};
use script_localizer::progress::ConsoleProgress;
use script_localizer::session::{SessionSettings, TranslationSession};
use script_localizer::table::{DialogueSchema, Table};

#[derive(Parser, Debug)]
#[command(name = "script-localizer")]
#[command(about = "Game script localizer: terminology, speaker personalities and rolling context around an LLM backend", long_about = None)]
struct Args {
    /// Generate a default config file, then exit
    #[arg(long)]
    init_config: bool,

    /// Directory to write the config file to (default: current directory)
    #[arg(long, value_name = "DIR")]
    init_config_dir: Option<PathBuf>,

    /// Overwrite an existing config file when used with --init-config
    #[arg(long)]
    force: bool,

    /// Dialogue rows as a JSON array of objects
    #[arg(value_name = "ROWS.json")]
    input: Option<PathBuf>,

    /// Output JSON (default: <input_stem>_translated.json)
    #[arg(short, long, value_name = "JSON")]
    output: Option<PathBuf>,

    /// Config file path (default: search for script-localizer.toml upwards)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Terminology table JSON (source column + one column per language)
    #[arg(long, value_name = "JSON")]
    terms: Option<PathBuf>,

    /// Personality table JSON (role + description columns)
    #[arg(long, value_name = "JSON")]
    personality: Option<PathBuf>,

    /// Target languages, comma separated (e.g. 英文,日文)
    #[arg(long, value_delimiter = ',')]
    languages: Option<Vec<String>>,

    /// Custom requirements; highest priority in every prompt
    #[arg(long)]
    requirements: Option<String>,

    /// Model name sent to the backend
    #[arg(long)]
    model: Option<String>,

    /// OpenAI-compatible base URL
    #[arg(long)]
    endpoint: Option<String>,

    /// Attempts per row before keeping the source text
    #[arg(long)]
    max_retries: Option<u32>,

    /// Restore per-language context from a previous run
    #[arg(long, value_name = "JSON")]
    context_in: Option<PathBuf>,

    /// Save per-language context after the run
    #[arg(long, value_name = "JSON")]
    context_out: Option<PathBuf>,

    /// Print speaker names needing confirmation as JSON, then exit
    #[arg(long)]
    review: bool,

    /// Write composed prompts to DIR without calling the backend
    #[arg(long, value_name = "DIR")]
    prompts_only: Option<PathBuf>,

    /// Write every prompt and raw reply to the trace directory
    #[arg(long)]
    trace: bool,

    /// Debug-level logging (RUST_LOG takes precedence)
    #[arg(short, long)]
    verbose: bool,

    /// No progress lines
    #[arg(short, long)]
    quiet: bool,
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn default_output_for(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("output")
        .to_string();
    input.with_file_name(format!("{stem}_translated.json"))
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);
    let progress = ConsoleProgress::new(!args.quiet);

    if args.init_config {
        let dir = args
            .init_config_dir
            .clone()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
        let cfg_path = init_default_config(&dir, args.force).context("init default config")?;
        eprintln!("Wrote config: {}", cfg_path.display());
        return Ok(());
    }

    let input = match args.input {
        Some(p) => p,
        None => {
            let mut cmd = Args::command();
            cmd.print_help().context("print help")?;
            eprintln!(
                "\n\nUSAGE:\n  script-localizer rows.json --terms terms.json --personality roles.json\n\nTIPS:\n  - Default config search: script-localizer.toml (upwards), or set SCRIPT_LOCALIZER_CONFIG.\n  - Run with --review first and confirm speakers under [roles.mapping].\n"
            );
            return Ok(());
        }
    };
    let output = args.output.clone().unwrap_or_else(|| default_output_for(&input));

    let overrides = CliOverrides {
        languages: args.languages.clone(),
        requirements: args.requirements.clone(),
        model: args.model.clone(),
        endpoint: args.endpoint.clone(),
        max_retries: args.max_retries,
        trace_prompts: args.trace.then_some(true),
    };
    let cfg = PipelineConfig::from_file_and_args(&input, args.config.clone(), overrides)
        .context("build config")?;

    let table = Table::read_json(&input)?;
    let schema = DialogueSchema::resolve(&table, &cfg.text_column, &cfg.speaker_column)?;
    let rows = schema.rows(&table);
    progress.info(format!(
        "{} rows, languages: {}",
        rows.len(),
        cfg.languages.join(", ")
    ));

    let mut session = TranslationSession::new(SessionSettings {
        context_size: cfg.context_size,
        similarity_threshold: cfg.similarity_threshold,
        fuzzy_matching: cfg.fuzzy_matching,
        requirements: cfg.requirements.clone(),
        reset_context_every: cfg.reset_context_every,
        parallel_languages: cfg.parallel_languages,
    });

    if let Some(path) = args.terms.as_ref() {
        let terms = Table::read_json(path)?;
        let report = session.load_terminology(&terms, &cfg.term_source_column, &cfg.language_columns());
        if !report.ok() {
            tracing::warn!(missing = ?report.missing_columns, "terminology table is missing columns");
        }
        progress.info(format!(
            "terminology: {} entries loaded, {} rows skipped",
            report.total_loaded(),
            report.total_skipped()
        ));
    }
    if let Some(path) = args.personality.as_ref() {
        let roles = Table::read_json(path)?;
        let report = session.load_personalities(&roles, &cfg.role_column, &cfg.description_column);
        progress.info(format!(
            "personalities: {} loaded, {} rows skipped",
            report.loaded, report.skipped
        ));
    }
    session.apply_role_decisions(
        cfg.role_mapping
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str())),
        cfg.rejected_roles.iter().map(String::as_str),
    );
    if let Some(path) = args.context_in.as_ref() {
        let snapshot = read_snapshot_file(path)?;
        session.ledger_mut().restore(snapshot);
        progress.info(format!("context restored: {}", path.display()));
    }

    let report = session.review(&rows).clone();
    if args.review {
        let json = serde_json::to_string_pretty(&report).context("serialize review")?;
        println!("{json}");
        return Ok(());
    }
    if let Err(err) = session.begin_batch() {
        eprintln!(
            "Confirm these speakers under [roles.mapping] (or list them in roles.rejected) in {}",
            cfg.config_path.display()
        );
        return Err(err.into());
    }

    let backend = cfg.build_backend()?;
    let orch = Orchestrator::new(
        backend,
        cfg.style_guide(),
        cfg.generation.clone(),
        cfg.retry.clone(),
    )
    .with_trace(cfg.trace_writer())
    .with_log_max_chars(cfg.log_max_chars);

    if let Some(dir) = args.prompts_only.as_ref() {
        let records = session.compose_batch(&orch, &rows, &cfg.languages)?;
        let writer = TraceWriter::new(dir.clone(), true)?;
        for r in &records {
            writer.write_prompt(r.row, &r.language, &r.prompt)?;
        }
        progress.info(format!("{} prompts written to {}", records.len(), dir.display()));
        return Ok(());
    }

    let total = rows.len();
    let outcome = session.translate_batch(&orch, &rows, &cfg.languages, |r| {
        progress.row_done(r, total)
    })?;

    let mut out_table = table;
    for run in &outcome.runs {
        let cells = run
            .cells
            .iter()
            .enumerate()
            .map(|(i, cell)| match cfg.failure_marker.as_ref() {
                Some(marker) if run.exhausted.contains(&i) => Some(marker.clone()),
                _ => cell.clone(),
            })
            .collect();
        out_table.set_column(&run.language, cells);
    }
    out_table.write_json(&output)?;
    progress.info(format!("Wrote: {}", output.display()));

    if let Some(path) = args.context_out.as_ref() {
        write_snapshot_file(path, &session.ledger().snapshot())?;
        progress.info(format!("context saved: {}", path.display()));
    }

    let exhausted: Vec<(&str, usize)> = outcome.exhausted().collect();
    if !exhausted.is_empty() {
        eprintln!("{} cell(s) kept the source text; review manually:", exhausted.len());
        for (language, row) in exhausted {
            eprintln!("  row {row} [{language}]");
        }
    }
    if outcome.cancelled() {
        eprintln!("Run was cancelled; untranslated cells are empty.");
    }
    Ok(())
}
