//! `tq`: process documents into the table store and ask questions about them.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use tablequery::chat::TableChat;
use tablequery::config::load_settings;
use tablequery::context::AppContext;
use tablequery::models::StoredTable;
use tablequery::repository::{RawResult, SearchField};
use tablequery::services::{export_results, DocumentPipeline, ExportFormat, PipelineOptions};

#[derive(Parser)]
#[command(name = "tq")]
#[command(about = "Extract tables from documents and query them in natural language")]
#[command(version)]
struct Cli {
    /// Data directory holding the table store (overrides configuration)
    #[arg(long, global = true, env = "TABLEQUERY_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract, describe and store the tables of one or more documents
    Process {
        /// HTML or spreadsheet files
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Directory for processed documents and artifacts
        #[arg(long)]
        output_dir: Option<PathBuf>,

        /// Kind of document, used as context for table descriptions
        #[arg(long)]
        context: Option<String>,

        /// Do not write artifact files
        #[arg(long)]
        no_save: bool,

        /// Clear the store before processing
        #[arg(long)]
        clear: bool,
    },
    /// Turn a question into a validated SQL statement
    Ask {
        question: String,

        /// Execute the statement and print the result
        #[arg(long)]
        run: bool,
    },
    /// List stored tables
    Tables {
        /// Only tables from this source file
        #[arg(long)]
        source: Option<String>,
    },
    /// Show stored rows of a table
    Show {
        table_id: String,

        #[arg(long, default_value = "10")]
        limit: i64,
    },
    /// Search table ids, source files and descriptions
    Search { term: String },
    /// Show store totals
    Summary,
    /// Delete all stored tables and rows
    Clear,
    /// Copy the store to a file
    Backup { path: PathBuf },
    /// Replace the store with a backup
    Restore { path: PathBuf },
    /// Run a statement and write its result to a file
    Export {
        sql: String,

        /// csv, json or txt
        #[arg(long, default_value = "csv")]
        format: ExportFormat,

        #[arg(long)]
        output_dir: Option<PathBuf>,
    },
}

fn init_logging(verbose: bool) {
    let default = if verbose {
        "tablequery=debug"
    } else {
        "tablequery=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let mut settings = load_settings().await;
    if let Some(data_dir) = cli.data_dir {
        settings.output_dir = data_dir.join("output");
        settings.data_dir = data_dir;
    }
    let ctx = AppContext::from_settings(settings)
        .await
        .context("Invalid configuration")?;

    match cli.command {
        Commands::Process {
            files,
            output_dir,
            context,
            no_save,
            clear,
        } => {
            let options = PipelineOptions {
                context_hint: context,
                output_dir,
                save_outputs: !no_save,
                clear_store_on_start: clear,
            };
            let report = DocumentPipeline::new(&ctx, options)
                .process_batch(&files)
                .await?;

            for item in &report.items {
                match &item.result {
                    Ok(doc) => {
                        println!(
                            "✓ {}: {}/{} tables stored, {} replaced",
                            item.path.display(),
                            doc.successful_tables,
                            doc.total_tables,
                            doc.replacement.successful_replacements
                        );
                        for table in doc.tables.iter().filter(|t| !t.stored) {
                            println!(
                                "    ✗ {}: {}",
                                table.table_id,
                                table.error.as_deref().unwrap_or("not stored")
                            );
                        }
                        for path in &doc.artifacts {
                            println!("    → {}", path.display());
                        }
                    }
                    Err(e) => println!("✗ {}: {}", item.path.display(), e),
                }
            }
            println!(
                "\n{} processed, {} failed",
                report.succeeded(),
                report.failed()
            );
            Ok(if report.failed() == 0 {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }

        Commands::Ask { question, run } => {
            let chat = TableChat::from_context(&ctx);
            let outcome = chat.ask(&question).await;
            println!("{}", outcome);

            let Some(statement) = outcome.statement() else {
                return Ok(ExitCode::FAILURE);
            };
            if run {
                let result = chat.run_statement(statement).await?;
                print_result(&result);
            }
            Ok(ExitCode::SUCCESS)
        }

        Commands::Tables { source } => {
            let tables = match source {
                Some(source) => ctx.store.list_tables_by_source(&source).await?,
                None => ctx.store.list_tables().await?,
            };
            print_tables(&tables);
            Ok(ExitCode::SUCCESS)
        }

        Commands::Show { table_id, limit } => {
            let Some(table) = ctx.store.get_table(&table_id).await? else {
                println!("No table named {}", table_id);
                return Ok(ExitCode::FAILURE);
            };
            println!("{} ({} rows)", table.table_id, table.row_count);
            println!("{}", table.column_names.join(" | "));
            for row in ctx.store.get_rows(&table_id, Some(limit), 0).await? {
                let values: Vec<String> = table
                    .column_names
                    .iter()
                    .map(|c| row.row_data.get(c).map(display_value).unwrap_or_default())
                    .collect();
                println!("{}", values.join(" | "));
            }
            Ok(ExitCode::SUCCESS)
        }

        Commands::Search { term } => {
            let tables = ctx.store.search(&term, &SearchField::ALL).await?;
            print_tables(&tables);
            Ok(ExitCode::SUCCESS)
        }

        Commands::Summary => {
            let summary = TableChat::from_context(&ctx).database_summary().await?;
            println!("Tables:       {}", summary.total_tables);
            println!("Rows:         {}", summary.total_rows);
            println!("Sessions:     {}", summary.total_sessions);
            println!("Source files: {}", summary.unique_sources);
            Ok(ExitCode::SUCCESS)
        }

        Commands::Clear => {
            ctx.store.clear().await?;
            println!("Cleared {}", ctx.store.db_path().display());
            Ok(ExitCode::SUCCESS)
        }

        Commands::Backup { path } => {
            ctx.store.backup(&path).await?;
            println!("Backed up to {}", path.display());
            Ok(ExitCode::SUCCESS)
        }

        Commands::Restore { path } => {
            ctx.store.restore(&path).await?;
            println!("Restored from {}", path.display());
            Ok(ExitCode::SUCCESS)
        }

        Commands::Export {
            sql,
            format,
            output_dir,
        } => {
            let result = TableChat::from_context(&ctx).run_statement(&sql).await?;
            let dir = output_dir.unwrap_or_else(|| ctx.settings.output_dir.clone());
            let path = export_results(&result, format, &dir, Some(&sql))?;
            println!("Exported {} rows to {}", result.row_count(), path.display());
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn print_tables(tables: &[StoredTable]) {
    println!("{} tables", tables.len());
    for table in tables {
        println!("\n• {} ({})", table.table_id, table.source_file);
        println!(
            "  Rows: {}, Columns: {}",
            table.row_count, table.column_count
        );
        if let Some(description) = &table.description {
            println!("  {}", description);
        }
    }
}

fn print_result(result: &RawResult) {
    match result {
        RawResult::Rows { columns, rows } => {
            println!("\n{} rows", rows.len());
            println!("{}", columns.join(" | "));
            for row in rows {
                let values: Vec<String> = columns
                    .iter()
                    .map(|c| row.get(c).map(display_value).unwrap_or_default())
                    .collect();
                println!("{}", values.join(" | "));
            }
        }
        RawResult::Affected(n) => println!("\n{} rows affected", n),
    }
}

fn display_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
