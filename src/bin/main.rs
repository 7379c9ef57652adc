//! relquery CLI - compile query files against an entity model
//!
//! Usage:
//!   relquery compile --model <model.toml> --query <query.toml> [--dialect <dialect>] [--count]
//!   relquery check --model <model.toml>
//!
//! Examples:
//!   relquery compile --model shop.toml --query open_orders.toml
//!   relquery compile --model shop.toml --query open_orders.toml --dialect sqlserver --count
//!   relquery check --model shop.toml

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use relquery::compile::{compile_file, CompileOptions, CompileOutput};
use relquery::config::Settings;
use relquery::sql::{Dialect, Statement};
use relquery::Catalog;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "relquery")]
#[command(about = "Compile relational queries over an entity model to SQL")]
#[command(version)]
struct Cli {
    /// Settings file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a query file to SQL
    Compile {
        /// Path to the model file
        #[arg(short, long)]
        model: PathBuf,

        /// Path to the query file
        #[arg(short, long)]
        query: PathBuf,

        /// SQL dialect to generate (defaults to the configured dialect)
        #[arg(short, long)]
        dialect: Option<DialectArg>,

        /// Also print the count statement
        #[arg(long)]
        count: bool,

        /// Output format
        #[arg(short, long, default_value = "sql")]
        format: OutputFormat,
    },

    /// Validate a model file and list its entities
    Check {
        /// Path to the model file
        #[arg(short, long)]
        model: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum DialectArg {
    Postgresql,
    Mysql,
    Sqlserver,
}

impl From<DialectArg> for Dialect {
    fn from(arg: DialectArg) -> Self {
        match arg {
            DialectArg::Postgresql => Dialect::PostgreSql,
            DialectArg::Mysql => Dialect::MySql,
            DialectArg::Sqlserver => Dialect::SqlServer,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// SQL text followed by parameters as comments
    Sql,
    /// Statements, parameters and output shape as JSON
    Json,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let settings = match &cli.config {
        Some(path) => match Settings::load(path) {
            Ok(settings) => settings,
            Err(e) => {
                eprintln!("Error loading settings '{}': {}", path.display(), e);
                return ExitCode::FAILURE;
            }
        },
        None => Settings::default(),
    };

    match cli.command {
        Commands::Compile {
            model,
            query,
            dialect,
            count,
            format,
        } => cmd_compile(&settings, model, query, dialect, count, format),
        Commands::Check { model } => cmd_check(&settings, model),
    }
}

fn load_catalog(settings: &Settings, model: &Path) -> Option<Catalog> {
    match Catalog::from_path(model, settings) {
        Ok(catalog) => Some(catalog),
        Err(e) => {
            eprintln!("Model error: {}", e);
            None
        }
    }
}

fn cmd_compile(
    settings: &Settings,
    model: PathBuf,
    query: PathBuf,
    dialect: Option<DialectArg>,
    count: bool,
    format: OutputFormat,
) -> ExitCode {
    let Some(catalog) = load_catalog(settings, &model) else {
        return ExitCode::FAILURE;
    };

    let mut options = CompileOptions::for_catalog(&catalog).with_count(count);
    if let Some(dialect) = dialect {
        options = options.with_dialect(dialect.into());
    }

    let output = match compile_file(&catalog, &query, &options) {
        Ok(output) => output,
        Err(e) => {
            eprintln!("Compilation error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match format {
        OutputFormat::Sql => print_sql(&output),
        OutputFormat::Json => {
            let document = JsonOutput {
                dialect: output.dialect,
                statement: &output.statement,
                count: output.count.as_ref(),
                shape: &output.shape,
            };
            match serde_json::to_string_pretty(&document) {
                Ok(json) => println!("{}", json),
                Err(e) => {
                    eprintln!("Error serializing output: {}", e);
                    return ExitCode::FAILURE;
                }
            }
        }
    }
    ExitCode::SUCCESS
}

#[derive(Serialize)]
struct JsonOutput<'a> {
    dialect: Dialect,
    statement: &'a Statement,
    count: Option<&'a Statement>,
    shape: &'a relquery::select::OutputShape,
}

fn print_sql(output: &CompileOutput) {
    print_statement(&output.statement);
    if let Some(count) = &output.count {
        println!();
        println!("-- count");
        print_statement(count);
    }
}

fn print_statement(statement: &Statement) {
    println!("{};", statement.sql);
    for param in &statement.params {
        match &param.sql_type {
            Some(sql_type) => println!("-- {} = {} ({})", param.name, param.value, sql_type),
            None => println!("-- {} = {}", param.name, param.value),
        }
    }
}

fn cmd_check(settings: &Settings, model: PathBuf) -> ExitCode {
    let Some(catalog) = load_catalog(settings, &model) else {
        return ExitCode::FAILURE;
    };

    println!("File: {}", model.display());
    println!();
    println!("Entities:");
    for definition in catalog.definitions() {
        println!(
            "  - {} (table: \"{}\", {} columns, {} relationships)",
            definition.name,
            definition.table,
            definition.columns.len(),
            definition.relationships.len()
        );
    }

    match catalog.fingerprint() {
        Ok(fingerprint) => {
            println!();
            println!("Fingerprint: {}", fingerprint);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error computing fingerprint: {}", e);
            ExitCode::FAILURE
        }
    }
}
