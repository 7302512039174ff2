//! Binary entry point for engram.
//!
//! `engram serve` runs the stdio JSON-RPC server; the remaining subcommands
//! are administrative: export, import, environment validation, statistics.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(missing_docs)]
// CLI output goes to stderr so stdout stays a clean JSON-RPC channel
#![allow(clippy::print_stderr)]

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use engram::config::{ServerConfig, validate_environment};
use engram::context::ContextRegistry;
use engram::io::{
    ConflictResolution, ExportFormat, ExportOptions, ImportMode, ImportOptions, build_export,
    import_document, parse_document, render_export,
};
use engram::server::McpServer;
use std::path::PathBuf;
use std::sync::Arc;

/// Embedded knowledge-graph memory service.
#[derive(Parser)]
#[command(name = "engram", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the stdio JSON-RPC tool server.
    Serve,
    /// Export contexts to stdout or a file.
    Export {
        /// Export one context (default: all).
        #[arg(long)]
        context: Option<String>,
        /// Output format: json, jsonl, or compressed.
        #[arg(long, default_value = "json")]
        format: String,
        /// gzip level for the compressed format (0-9).
        #[arg(long)]
        level: Option<u32>,
        /// Write to this file instead of stdout.
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Import a previously exported document.
    Import {
        /// Path to the document.
        file: PathBuf,
        /// Import mode: merge, replace, update, or append.
        #[arg(long, default_value = "merge")]
        mode: String,
        /// Conflict resolution: skip, overwrite, or rename.
        #[arg(long, default_value = "skip")]
        conflict: String,
        /// Plan only, write nothing.
        #[arg(long)]
        dry_run: bool,
        /// Verify structure and checksum first.
        #[arg(long)]
        validate: bool,
    },
    /// Validate engram environment variables.
    CheckEnv,
    /// Print per-context statistics.
    Stats {
        /// Limit to one context.
        #[arg(long)]
        context: Option<String>,
    },
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_env("LOG_LEVEL")
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();

    for warning in validate_environment() {
        tracing::warn!("{warning}");
    }

    let cli = Cli::parse();
    let config = ServerConfig::from_env();

    match cli.command {
        Command::Serve => {
            let registry =
                Arc::new(ContextRegistry::open(config.clone()).context("opening registry")?);
            let server = McpServer::new(registry, config);
            server.run().await.context("server loop failed")?;
        },
        Command::Export {
            context,
            format,
            level,
            output,
        } => {
            let registry = ContextRegistry::open(config).context("opening registry")?;
            let format = ExportFormat::parse(&format, level)
                .context("unknown export format (expected json, jsonl, or compressed)")?;
            let mut options = ExportOptions::default().with_format(format);
            options.context = context;

            let export = build_export(&registry, &options).context("building export")?;
            let document = render_export(&export, format).context("rendering export")?;
            match output {
                Some(path) => {
                    std::fs::write(&path, &document)
                        .with_context(|| format!("writing {}", path.display()))?;
                    eprintln!(
                        "exported {} entities to {}",
                        export.metadata.total_entities,
                        path.display()
                    );
                },
                None => {
                    // Machine-readable document on stderr would be useless;
                    // this is the one command whose stdout is the artifact
                    use std::io::Write as _;
                    std::io::stdout().write_all(document.as_bytes())?;
                },
            }
            registry.shutdown();
        },
        Command::Import {
            file,
            mode,
            conflict,
            dry_run,
            validate,
        } => {
            let registry = ContextRegistry::open(config).context("opening registry")?;
            let document = std::fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let parsed = parse_document(&document).context("parsing document")?;
            let options = ImportOptions {
                mode: ImportMode::parse(&mode).context("unknown import mode")?,
                conflict_resolution: ConflictResolution::parse(&conflict)
                    .context("unknown conflict resolution")?,
                dry_run,
                validate_before_import: validate,
                ..ImportOptions::default()
            };
            let outcome =
                import_document(&registry, &parsed, &options).context("importing document")?;
            eprintln!(
                "imported {} entities ({} updated, {} skipped), {} relations{}",
                outcome.summary.entities_imported,
                outcome.summary.entities_updated,
                outcome.summary.entities_skipped,
                outcome.summary.relations_imported,
                if dry_run { " [dry run]" } else { "" },
            );
            for warning in &outcome.warnings {
                eprintln!("warning: {warning}");
            }
            registry.shutdown();
        },
        Command::CheckEnv => {
            let warnings = validate_environment();
            if warnings.is_empty() {
                eprintln!("environment ok");
            } else {
                for warning in warnings {
                    eprintln!("warning: {warning}");
                }
            }
        },
        Command::Stats { context } => {
            let registry = ContextRegistry::open(config).context("opening registry")?;
            let names: Vec<String> = context.map_or_else(
                || registry.list().into_iter().map(|m| m.name).collect(),
                |name| vec![name],
            );
            for name in names {
                let Some(ctx) = registry.get(&name) else {
                    eprintln!("unknown context '{name}'");
                    continue;
                };
                let stats = ctx.stats().context("collecting stats")?;
                eprintln!(
                    "{}: {} entities, {} relations, {} observations, cache hit rate {:.2}",
                    stats.name,
                    stats.entities,
                    stats.relations,
                    stats.observations,
                    stats.entity_cache.hit_rate,
                );
            }
            registry.shutdown();
        },
    }
    Ok(())
}
