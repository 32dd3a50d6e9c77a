use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use indexmap::IndexSet;
use std::path::{Path, PathBuf};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use stairlight_core::config::CONFIG_PREFIX;
use stairlight_core::{find_config_file, Config, Report, Severity};
use stairlight_engine::{find_tables_by_labels, load_mapping, parse_label, BuildOutput, Pipeline};
use stairlight_graph::{DependencyGraph, Direction, LineageQuery, OutputType, QueryRequest};

/// Stairlight - table-level lineage from SQL files
#[derive(Parser)]
#[command(name = "stairlight")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directory holding stairlight.{toml,yaml,yml}, or the file itself
    #[arg(short, long, global = true, default_value = ".")]
    config: PathBuf,

    /// Mapping file (default: <mapping_prefix>.{toml,yaml,yml} beside the config)
    #[arg(short, long, global = true)]
    mapping: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the dependency graph and print it as JSON
    Build {
        /// Write the graph to this file instead of stdout
        #[arg(short, long)]
        save: Option<PathBuf>,

        /// Write the diagnostics report to this file
        #[arg(short, long)]
        report: Option<PathBuf>,
    },

    /// Report references the mapping does not cover
    Check {
        /// Directory for a timestamped mapping skeleton (prints YAML when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Tables a table reads from
    Up(QueryArgs),

    /// Tables reading from a table
    Down(QueryArgs),

    /// Every table, file or URI in the graph
    List {
        #[arg(short, long, value_enum, default_value = "table")]
        output: ListOutput,

        /// Use persisted graph(s) instead of building
        #[arg(short, long)]
        load: Vec<PathBuf>,
    },
}

#[derive(clap::Args)]
struct QueryArgs {
    /// Seed table (repeatable)
    #[arg(short, long)]
    table: Vec<String>,

    /// Seed tables by label, `key:value` (repeatable, all must match)
    #[arg(short = 'l', long)]
    label: Vec<String>,

    /// Follow edges transitively
    #[arg(short, long)]
    recursive: bool,

    /// Print edge annotations instead of identifiers
    #[arg(long)]
    verbose_output: bool,

    #[arg(short, long, value_enum, default_value = "table")]
    output: QueryOutput,

    /// Use persisted graph(s) instead of building (merged in order)
    #[arg(long)]
    load: Vec<PathBuf>,

    /// Also write the freshly built graph to this file
    #[arg(short, long)]
    save: Option<PathBuf>,
}

#[derive(Clone, Copy, ValueEnum)]
enum QueryOutput {
    Table,
    File,
}

impl From<QueryOutput> for OutputType {
    fn from(output: QueryOutput) -> Self {
        match output {
            QueryOutput::Table => OutputType::Table,
            QueryOutput::File => OutputType::File,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum ListOutput {
    Table,
    File,
    Uri,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(error) = run(cli).await {
        eprintln!("{} {:#}", "error:".red().bold(), error);
        std::process::exit(1);
    }
}

/// Log to stderr; `RUST_LOG` overrides the default level
fn init_tracing(verbose: bool) {
    let default_level = if verbose { "info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    match &cli.command {
        Commands::Build { save, report } => build_command(&cli, save.as_deref(), report.as_deref()).await,
        Commands::Check { output } => check_command(&cli, output.as_deref()).await,
        Commands::Up(args) => query_command(&cli, args, Direction::Up).await,
        Commands::Down(args) => query_command(&cli, args, Direction::Down).await,
        Commands::List { output, load } => list_command(&cli, *output, load).await,
    }
}

/// Resolve `--config` to a file and load it
fn load_config(path: &Path) -> Result<Config> {
    let file = if path.is_dir() {
        find_config_file(path, CONFIG_PREFIX).ok_or_else(|| {
            anyhow!(
                "No {}.toml, {}.yaml or {}.yml found in {}",
                CONFIG_PREFIX,
                CONFIG_PREFIX,
                CONFIG_PREFIX,
                path.display()
            )
        })?
    } else {
        path.to_path_buf()
    };
    Config::from_file(&file).with_context(|| format!("Failed to load {}", file.display()))
}

async fn build_graph(cli: &Cli) -> Result<BuildOutput> {
    let config = load_config(&cli.config)?;
    let mapping = load_mapping(&config, cli.mapping.as_deref()).context("Failed to load mapping")?;

    if cli.verbose {
        eprintln!(
            "{} {} backend(s), {} mapping entries",
            "Building from".cyan(),
            config.include.len(),
            mapping.mapping.len()
        );
    }

    let pipeline = Pipeline::from_config(&config, mapping)?;
    Ok(pipeline.build().await?)
}

/// Build command - scan, parse and assemble the graph
async fn build_command(cli: &Cli, save: Option<&Path>, report_path: Option<&Path>) -> Result<()> {
    let output = build_graph(cli).await?;

    match save {
        Some(path) => {
            output.graph.save_to_file(path)?;
            eprintln!("{} {}", "Graph saved to:".green(), path.display());
        }
        None => println!("{}", output.graph.to_json()?),
    }

    if let Some(path) = report_path {
        output.report.save_to_file(path)?;
        if cli.verbose {
            eprintln!("{} {}", "Report saved to:".green(), path.display());
        }
    }

    print_report_summary(&output.report, cli.verbose);
    Ok(())
}

/// Check command - undefined references and mapping skeletons
async fn check_command(cli: &Cli, output_dir: Option<&Path>) -> Result<()> {
    let config = load_config(&cli.config)?;
    let mapping = load_mapping(&config, cli.mapping.as_deref()).context("Failed to load mapping")?;
    let output = Pipeline::from_config(&config, mapping)?.build().await?;
    let check = output.check;

    if check.is_empty() {
        eprintln!("{}", "✓ Every reference is covered by the mapping".green().bold());
        return Ok(());
    }

    match output_dir {
        Some(dir) => {
            let path = check.save(dir, &config.settings.mapping_prefix)?;
            eprintln!(
                "{} {} undefined reference(s), skeleton written to {}",
                "⚠".yellow(),
                check.undefined.len(),
                path.display()
            );
        }
        None => print!("{}", check.to_yaml()?),
    }
    Ok(())
}

/// Up/Down command - lineage of one or more seed tables
async fn query_command(cli: &Cli, args: &QueryArgs, direction: Direction) -> Result<()> {
    let labels = args
        .label
        .iter()
        .map(|label| parse_label(label))
        .collect::<Result<Vec<_>, _>>()?;

    let labelled = if labels.is_empty() {
        Vec::new()
    } else {
        let config = load_config(&cli.config)?;
        let mapping = load_mapping(&config, cli.mapping.as_deref()).context("Failed to load mapping")?;
        find_tables_by_labels(&mapping, &labels)
    };

    let graph = if args.load.is_empty() {
        let output = build_graph(cli).await?;
        if let Some(path) = &args.save {
            output.graph.save_to_file(path)?;
            eprintln!("{} {}", "Graph saved to:".green(), path.display());
        }
        output.graph
    } else {
        load_graphs(&args.load)?
    };

    let seeds = seed_tables(&args.table, labelled);
    if seeds.is_empty() {
        println!("{}", empty_query_output(!labels.is_empty())?);
        return Ok(());
    }

    let request = QueryRequest::new(seeds, direction)
        .recursive(args.recursive)
        .verbose(args.verbose_output)
        .output(args.output.into());
    let query = LineageQuery::new(&graph);

    let json = match request.tables.as_slice() {
        [seed] => serde_json::to_string_pretty(&query.run(seed, &request))?,
        _ => serde_json::to_string_pretty(&query.run_many(&request))?,
    };
    println!("{}", json);
    Ok(())
}

/// List command - tables, files or URIs of the graph
async fn list_command(cli: &Cli, output: ListOutput, load: &[PathBuf]) -> Result<()> {
    let graph = if load.is_empty() {
        build_graph(cli).await?.graph
    } else {
        load_graphs(load)?
    };

    let items = match output {
        ListOutput::Table => graph.tables(),
        ListOutput::File => graph.files(),
        ListOutput::Uri => graph.uris(),
    };
    println!("{}", serde_json::to_string_pretty(&items)?);
    Ok(())
}

/// Load persisted graphs and merge them in order
fn load_graphs(paths: &[PathBuf]) -> Result<DependencyGraph> {
    let mut graph = DependencyGraph::new();
    for path in paths {
        let loaded = DependencyGraph::from_file(path)
            .with_context(|| format!("Failed to load graph {}", path.display()))?;
        graph.merge(loaded);
    }
    Ok(graph)
}

/// Explicit tables first, then label matches, each once
fn seed_tables(tables: &[String], labelled: Vec<String>) -> Vec<String> {
    tables
        .iter()
        .cloned()
        .chain(labelled)
        .collect::<IndexSet<String>>()
        .into_iter()
        .collect()
}

/// Result printed when no seed table is left
///
/// Labels that match no mapped table give an empty result.
fn empty_query_output(label_given: bool) -> Result<String> {
    if !label_given {
        return Err(anyhow!("No seed table: pass --table or --label"));
    }
    Ok(serde_json::to_string_pretty(&serde_json::Map::new())?)
}

/// Print report summary to stderr
fn print_report_summary(report: &Report, verbose: bool) {
    eprintln!("\n{}", "=".repeat(60).bright_blue());
    eprintln!("{}", "Stairlight Build Report".bold().bright_blue());
    eprintln!("{}", "=".repeat(60).bright_blue());

    eprintln!("  Sources located: {}", report.summary.sources_located);
    eprintln!("  Units built:     {}", report.summary.units_built);
    eprintln!("  Edges:           {}", report.summary.edges);

    if report.summary.errors > 0 {
        eprintln!("  Errors:   {}", format!("{}", report.summary.errors).red().bold());
    } else {
        eprintln!("  Errors:   {}", format!("{}", report.summary.errors).green());
    }

    if report.summary.warnings > 0 {
        eprintln!("  Warnings: {}", format!("{}", report.summary.warnings).yellow());
    } else {
        eprintln!("  Warnings: {}", format!("{}", report.summary.warnings).green());
    }

    if verbose {
        for diag in &report.diagnostics {
            let severity_str = match diag.severity {
                Severity::Error => "ERROR".red().bold(),
                Severity::Warn => "WARN".yellow().bold(),
                Severity::Info => "INFO".cyan(),
            };
            eprint!("  [{}] {}: {}", severity_str, diag.code, diag.message);
            if let Some(loc) = &diag.location {
                eprint!(" at {}", loc.file);
                if let Some(line) = loc.line {
                    eprint!(":{}", line);
                }
            }
            eprintln!();
        }
    }

    eprintln!("{}", "=".repeat(60).bright_blue());
}
