use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use querylens_core::{Config, Diagnostic, DiagnosticCode, Location, Model, Query, Report, Severity};
use querylens_sql::{QueryFlattener, QueryInference, SqlParser};

/// QueryLens - element inference and flattening for CQN-style queries
#[derive(Parser)]
#[command(name = "querylens")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file (default: querylens.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the inferred target and elements of a query
    Infer(QueryArgs),

    /// Print the flattened query tree
    Flatten(QueryArgs),

    /// Infer and flatten every query of a file and write report.json
    Check {
        /// Path to the CSN model
        #[arg(short, long)]
        model: PathBuf,

        /// JSON object mapping query names to queries (CQN objects or SQL strings)
        queries: PathBuf,

        /// Output file for report.json
        #[arg(short, long, default_value = "report.json")]
        output: PathBuf,
    },
}

#[derive(Args)]
struct QueryArgs {
    /// Path to the CSN model
    #[arg(short, long)]
    model: PathBuf,

    /// Path to a CQN query in JSON form
    #[arg(short, long, conflicts_with = "sql", required_unless_present = "sql")]
    query: Option<PathBuf>,

    /// SQL text of a SELECT statement
    #[arg(long)]
    sql: Option<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .init();

    let config = if let Some(config_path) = &cli.config {
        Config::from_file(config_path)?
    } else if Path::new("querylens.toml").exists() {
        Config::from_file(Path::new("querylens.toml"))?
    } else {
        if cli.verbose {
            eprintln!("{}", "No config file found, using defaults".yellow());
        }
        Config::default()
    };

    if cli.verbose {
        eprintln!("{} dialect: {:?}", "Using".cyan(), config.dialect);
    }

    match cli.command {
        Commands::Infer(args) => infer_command(&config, &args, cli.verbose),
        Commands::Flatten(args) => flatten_command(&config, &args, cli.verbose),
        Commands::Check { model, queries, output } => check_command(&config, &model, &queries, &output, cli.verbose),
    }
}

fn load_model(path: &Path, verbose: bool) -> Result<Model> {
    if verbose {
        eprintln!("{} {}", "Loading model from:".cyan(), path.display());
    }
    querylens_core::csn::load_file(path).with_context(|| format!("Failed to load model {}", path.display()))
}

fn read_query(config: &Config, args: &QueryArgs) -> Result<Query> {
    if let Some(sql) = &args.sql {
        return SqlParser::from_dialect(&config.dialect)
            .parse_query(sql)
            .context("Failed to read SQL query");
    }
    let path = args
        .query
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("Either --query or --sql is required"))?;
    let json = std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    Query::from_json(&json).with_context(|| format!("Invalid query in {}", path.display()))
}

/// Infer command - print target and element map
fn infer_command(config: &Config, args: &QueryArgs, verbose: bool) -> Result<()> {
    let model = load_model(&args.model, verbose)?;
    let query = read_query(config, args)?;

    let inferred = QueryInference::with_config(&model, config.inference.clone()).infer(&query)?;
    println!("{}", serde_json::to_string_pretty(&inferred)?);

    if verbose {
        eprintln!("{} {} columns", "Inferred".green(), inferred.elements.len());
    }
    Ok(())
}

/// Flatten command - print the rewritten query tree
fn flatten_command(config: &Config, args: &QueryArgs, verbose: bool) -> Result<()> {
    let model = load_model(&args.model, verbose)?;
    let query = read_query(config, args)?;

    let flattener = QueryFlattener::with_config(&model, config.inference.clone(), config.flatten.clone());
    let flat = flattener.flatten(&query)?;
    println!("{}", serde_json::to_string_pretty(&flat)?);
    Ok(())
}

/// Check command - infer and flatten each named query, collect diagnostics
fn check_command(config: &Config, model_path: &Path, queries_path: &Path, output: &Path, verbose: bool) -> Result<()> {
    let mut report = Report::new();
    let file = queries_path.display().to_string();

    let model = match querylens_core::csn::load_file(model_path) {
        Ok(model) => Some(model),
        Err(e) => {
            report.add_diagnostic(
                Diagnostic::new(DiagnosticCode::ModelError, Severity::Error, e.to_string())
                    .with_location(Location::new(model_path.display().to_string())),
            );
            None
        }
    };

    if let Some(model) = &model {
        let json = std::fs::read_to_string(queries_path)
            .with_context(|| format!("Failed to read {}", queries_path.display()))?;
        let queries: serde_json::Map<String, serde_json::Value> =
            serde_json::from_str(&json).with_context(|| format!("Expected a JSON object in {}", file))?;

        let parser = SqlParser::from_dialect(&config.dialect);
        let inference = QueryInference::with_config(model, config.inference.clone());
        let flattener = QueryFlattener::with_config(model, config.inference.clone(), config.flatten.clone());

        for (name, value) in &queries {
            if verbose {
                eprintln!("  {} {}...", "Checking".cyan(), name);
            }
            let location = Location::query(file.clone(), name.clone());

            let query = match value {
                serde_json::Value::String(sql) => parser.parse_query(sql).map_err(|e| e.to_diagnostic()),
                other => serde_json::from_value::<Query>(other.clone()).map_err(|e| {
                    Diagnostic::new(DiagnosticCode::SqlParseError, Severity::Error, format!("Invalid query: {}", e))
                }),
            };

            let diagnostic = match query {
                Err(diag) => Some(diag.with_location(location)),
                Ok(query) => inference
                    .infer(&query)
                    .and_then(|_| flattener.flatten(&query))
                    .err()
                    .map(|e| e.to_diagnostic(Some(location))),
            };

            match diagnostic {
                Some(mut diag) => {
                    diag.severity = config.severity.get_severity(diag.code, diag.severity);
                    let passed = diag.severity != Severity::Error;
                    if verbose {
                        eprintln!("    {} {}", diag.code.to_string().red(), diag.message);
                    }
                    report.add_diagnostic(diag);
                    report.record_query(name.clone(), passed);
                }
                None => {
                    if verbose {
                        eprintln!("    {}", "✓ OK".green());
                    }
                    report.record_query(name.clone(), true);
                }
            }
        }
    }

    report.save_to_file(output)?;
    if verbose {
        eprintln!("{} {}", "Report saved to:".green(), output.display());
    }

    print_report_summary(&report);

    if report.has_errors() {
        std::process::exit(1);
    }
    Ok(())
}

/// Print report summary to stderr
fn print_report_summary(report: &Report) {
    eprintln!("\n{}", "=".repeat(60).bright_blue());
    eprintln!("{}", "QueryLens Check Report".bold().bright_blue());
    eprintln!("{}", "=".repeat(60).bright_blue());
    eprintln!();

    eprintln!("Version: {}", report.version);
    eprintln!("Timestamp: {}", report.timestamp);
    eprintln!();

    eprintln!("{}", "Summary:".bold());
    eprintln!(
        "  Queries:  {} checked, {} passed",
        report.summary.queries_checked, report.summary.queries_passed
    );

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
    eprintln!();

    if report.diagnostics.is_empty() {
        eprintln!("{}", "✓ No issues found!".green().bold());
    } else {
        eprintln!("{}", "Diagnostics:".bold());
        for diag in &report.diagnostics {
            let severity_str = match diag.severity {
                Severity::Error => "ERROR".red().bold(),
                Severity::Warn => "WARN".yellow().bold(),
                Severity::Info => "INFO".cyan(),
            };

            eprintln!("  [{}] {}: {}", severity_str, diag.code, diag.message);

            if let Some(loc) = &diag.location {
                match &loc.query {
                    Some(query) => eprintln!("    at {} ({})", loc.file, query),
                    None => eprintln!("    at {}", loc.file),
                }
            }

            if !diag.candidates.is_empty() {
                eprintln!("    Candidates: {}", diag.candidates.join(", "));
            }
        }
    }

    eprintln!();
    eprintln!("{}", "=".repeat(60).bright_blue());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn sql_and_query_are_exclusive() {
        let parsed = Cli::try_parse_from(["querylens", "infer", "--model", "m.json", "--sql", "SELECT 1", "--query", "q.json"]);
        assert!(parsed.is_err());

        let parsed = Cli::try_parse_from(["querylens", "infer", "--model", "m.json"]);
        assert!(parsed.is_err());

        let parsed = Cli::try_parse_from(["querylens", "flatten", "-m", "m.json", "--sql", "SELECT ID FROM Books"]);
        assert!(parsed.is_ok());
    }
}
