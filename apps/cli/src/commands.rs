//! CLI command definitions, routing, and tracing setup.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use textsift_core::stages::{LexiconSentiment, LinguisticEnrichment, RegexTag, RuleAnnotator};
use textsift_core::{Pipeline, ProcessOptions, ProgressSink};
use textsift_elastic::{ElasticStack, connect};
use textsift_shared::{
    AppConfig, Table, init_config, load_config, read_json_lines, write_json_lines,
};
use tracing::info;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// textsift: enrich text records in batches and load them into a search index.
#[derive(Parser)]
#[command(
    name = "textsift",
    version,
    about = "Enrich JSON Lines records with text features and index them into Elasticsearch.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Run an enrichment pipeline over a JSON Lines file.
    Process(ProcessArgs),

    /// Check whether Elasticsearch and Kibana are reachable.
    Status,

    /// Delete every document of an index.
    Truncate {
        /// Index to empty.
        #[arg(long)]
        index: String,

        /// Also delete the Kibana saved objects whose title mentions the index.
        #[arg(long)]
        saved_objects: bool,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Arguments of `textsift process`.
#[derive(clap::Args, Debug)]
pub(crate) struct ProcessArgs {
    /// JSON Lines input, one record per line.
    #[arg(long)]
    pub input: PathBuf,

    /// Target index name.
    #[arg(long)]
    pub index: String,

    /// Full-text column (repeatable).
    #[arg(long = "text")]
    pub text: Vec<String>,

    /// Keyword/tag column (repeatable).
    #[arg(long = "tag")]
    pub tag: Vec<String>,

    /// Numeric column (repeatable).
    #[arg(long = "num")]
    pub num: Vec<String>,

    /// Geo-point column (repeatable).
    #[arg(long = "geo")]
    pub geo: Vec<String>,

    /// Column holding document ids.
    #[arg(long)]
    pub id: Option<String>,

    /// Column holding the record date.
    #[arg(long)]
    pub date: Option<String>,

    /// Column feeding the completion suggester (repeatable).
    #[arg(long = "suggest")]
    pub suggest: Vec<String>,

    /// Regex tag stage as PATTERN=COL:OUT (repeatable).
    #[arg(long = "regex", value_name = "PATTERN=COL:OUT")]
    pub regex: Vec<String>,

    /// Sentiment stage as COL:OUT (repeatable).
    #[arg(long = "sentiment", value_name = "COL:OUT")]
    pub sentiment: Vec<String>,

    /// Linguistic enrichment of a column (repeatable).
    #[arg(long = "annotate", value_name = "COL")]
    pub annotate: Vec<String>,

    /// Rows per batch (defaults to the configured batch size).
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Do not write to Elasticsearch.
    #[arg(long)]
    pub no_sink: bool,

    /// Disable the progress bar.
    #[arg(long)]
    pub no_progress: bool,

    /// Write enriched records here (JSON Lines) instead of stdout.
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Build the Kibana dashboard after processing.
    #[arg(long)]
    pub dashboard: bool,
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "textsift=info",
        1 => "textsift=debug",
        _ => "textsift=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_writer(io::stderr)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Process(args) => cmd_process(&args),
        Command::Status => cmd_status(),
        Command::Truncate {
            index,
            saved_objects,
        } => cmd_truncate(&index, saved_objects),
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(),
        },
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

fn cmd_process(args: &ProcessArgs) -> Result<()> {
    let config = load_config()?;
    let input = read_input(&args.input)?;
    info!(input = %args.input.display(), rows = input.len(), "records loaded");

    let show_progress = config.pipeline.show_progress && !args.no_progress;
    let stack = if args.no_sink {
        None
    } else {
        Some(Arc::new(connect(&config)?))
    };
    if args.dashboard && stack.is_none() {
        return Err(eyre!("--dashboard needs a running Elasticsearch/Kibana, drop --no-sink"));
    }

    let mut pipeline = build_pipeline(args, &config, stack)?;
    if show_progress {
        pipeline = pipeline.with_progress(Box::new(BarProgress::new()));
    }

    let opts = ProcessOptions {
        write_to_sink: Some(!args.no_sink),
        batch_size: args.batch_size.unwrap_or(config.pipeline.batch_size),
        return_processed: true,
        show_progress,
    };
    let output = pipeline.process(&input, &opts)?;
    write_output(&output, args.output.as_deref())?;

    if args.dashboard {
        let ids = pipeline.setup_dashboard()?;
        eprintln!();
        eprintln!("  Dashboard ready: {}", ids.dashboard);
        eprintln!("  Visualizations: {}", ids.visualizations.len());
    }

    let summary = pipeline.timer_summary();
    info!(sections = summary.totals.len(), "timer summary");
    eprintln!();
    eprintln!("  Processed {} records through {} stages", output.len(), pipeline.stage_names().len());
    eprintln!();
    eprint!("{summary}");
    if !pipeline.min_max().is_empty() {
        eprintln!();
        eprintln!("  {:<24} {:<24} {}", "column", "min", "max");
        for (column, mm) in pipeline.min_max() {
            eprintln!("  {column:<24} {:<24} {}", mm.min.to_string(), mm.max);
        }
    }
    eprintln!();

    Ok(())
}

fn cmd_status() -> Result<()> {
    let config = load_config()?;
    let stack = ElasticStack::from_config(&config)?;

    let elastic = stack.elastic();
    let kibana = stack.kibana();
    let elastic_up = elastic.alive();
    let kibana_up = kibana.alive();

    let version = if elastic_up { elastic.version().ok() } else { None };

    println!();
    println!(
        "  Elasticsearch  {:<5} {}{}",
        up_down(elastic_up),
        elastic.url(),
        version.map(|v| format!(" (version {v})")).unwrap_or_default()
    );
    println!(
        "  Kibana         {:<5} {}",
        up_down(kibana_up),
        kibana.url("/")
    );
    println!();

    if elastic_up && kibana_up {
        Ok(())
    } else {
        Err(eyre!("search stack is not fully reachable"))
    }
}

fn up_down(alive: bool) -> &'static str {
    if alive { "up" } else { "down" }
}

fn cmd_truncate(index: &str, saved_objects: bool) -> Result<()> {
    let config = load_config()?;
    let stack = connect(&config)?;
    stack.elastic().delete_all(index)?;
    println!("  Index '{index}' truncated.");
    if saved_objects {
        let removed = stack.kibana().truncate_saved_objects(Some(index))?;
        println!("  Removed {removed} saved objects.");
    }
    Ok(())
}

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// Pipeline wiring
// ---------------------------------------------------------------------------

fn build_pipeline(
    args: &ProcessArgs,
    config: &AppConfig,
    stack: Option<Arc<ElasticStack>>,
) -> Result<Pipeline> {
    let mut pipeline = Pipeline::new(&args.index)
        .with_text_columns(args.text.iter().cloned())
        .with_tag_columns(args.tag.iter().cloned())
        .with_numeric_columns(args.num.iter().cloned())
        .with_geo_columns(args.geo.iter().cloned())
        .with_suggest_columns(args.suggest.iter().cloned())
        .with_lang(config.pipeline.lang()?);
    if let Some(id) = &args.id {
        pipeline = pipeline.with_id_column(id);
    }
    if let Some(date) = &args.date {
        pipeline = pipeline.with_date_column(date);
    }
    if let Some(stack) = stack {
        pipeline = pipeline.with_sink(stack.clone()).with_dashboard(stack);
    }

    for spec in &args.regex {
        let (pattern, column, out) = parse_regex_flag(spec)?;
        pipeline.add(RegexTag::stage(pattern, [column], out)?);
    }
    for spec in &args.sentiment {
        let (column, out) = parse_column_pair(spec)?;
        pipeline.add(LexiconSentiment::stage(column, out));
    }
    for column in &args.annotate {
        pipeline.add(LinguisticEnrichment::new(RuleAnnotator::new()).stage([column.as_str()]));
    }

    info!(index = %args.index, stages = ?pipeline.stage_names(), "pipeline built");
    Ok(pipeline)
}

/// Split `PATTERN=COL:OUT`. The pattern may itself contain `=` or `:`.
fn parse_regex_flag(spec: &str) -> Result<(&str, &str, &str)> {
    let (pattern, target) = spec
        .rsplit_once('=')
        .ok_or_else(|| eyre!("--regex expects PATTERN=COL:OUT, got '{spec}'"))?;
    if pattern.is_empty() {
        return Err(eyre!("--regex '{spec}' has an empty pattern"));
    }
    let (column, out) = parse_column_pair(target)?;
    Ok((pattern, column, out))
}

/// Split `COL:OUT`.
fn parse_column_pair(spec: &str) -> Result<(&str, &str)> {
    match spec.split_once(':') {
        Some((column, out)) if !column.is_empty() && !out.is_empty() => Ok((column, out)),
        _ => Err(eyre!("expected COL:OUT, got '{spec}'")),
    }
}

fn read_input(path: &Path) -> Result<Table> {
    let file =
        File::open(path).wrap_err_with(|| format!("cannot open input {}", path.display()))?;
    Ok(read_json_lines(BufReader::new(file))?)
}

fn write_output(table: &Table, path: Option<&Path>) -> Result<()> {
    match path {
        Some(path) => {
            let file = File::create(path)
                .wrap_err_with(|| format!("cannot create output {}", path.display()))?;
            let mut writer = BufWriter::new(file);
            write_json_lines(table, &mut writer)?;
            writer.flush()?;
            info!(output = %path.display(), rows = table.len(), "records written");
        }
        None => {
            let mut writer = BufWriter::new(io::stdout().lock());
            write_json_lines(table, &mut writer)?;
            writer.flush()?;
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// Row progress rendered as an indicatif bar.
struct BarProgress {
    bar: ProgressBar,
}

impl BarProgress {
    fn new() -> Self {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} rows ({eta})",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ");
        bar.set_style(style);
        bar.enable_steady_tick(Duration::from_millis(100));
        Self { bar }
    }
}

impl ProgressSink for BarProgress {
    fn update(&self, current: usize, total: usize) {
        self.bar.set_length(total as u64);
        self.bar.set_position(current as u64);
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}
