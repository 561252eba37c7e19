use clap::{Parser, Subcommand};
use repolens::config::Settings;
use repolens::dispatcher::Dispatcher;
use repolens::error::IndexError;
use repolens::export::{SecureExporter, SensitiveMatcher};
use repolens::paths::PathResolver;
use repolens::store::IndexStore;
use repolens::subscriptions::SubscriptionManager;
use repolens::watcher::WatchService;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "repolens")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Code indexing and search service for local agents")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Repository root (defaults to the current directory)
    #[arg(long, global = true)]
    root: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize configuration file
    Init {
        /// Force overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Index a file or the whole repository
    Index {
        /// Path to index; omit to index the repository root
        path: Option<PathBuf>,

        /// Drop cached file state so unchanged files re-index too
        #[arg(short, long)]
        force: bool,
    },

    /// Full-text and symbol search
    Search {
        query: String,

        /// Request semantic search (degrades to keyword search when no
        /// embedding backend is configured)
        #[arg(long)]
        semantic: bool,

        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// Look up a symbol definition
    Symbol {
        name: String,
    },

    /// Search documentation files for a topic
    Docs {
        topic: String,

        /// Restrict to specific document types (readme, guide, api, ...)
        #[arg(long)]
        doc_type: Vec<String>,

        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// Show index, plugin, and cache status
    Status,

    /// List plugins and their states
    Plugins,

    /// Watch the repository and re-index on change
    Watch,

    /// Export a shareable index with sensitive files removed
    Export {
        /// Destination database file
        output: PathBuf,

        /// File with additional newline-separated sensitive patterns
        #[arg(long)]
        patterns_file: Option<PathBuf>,
    },
}

fn main() {
    let cli = Cli::parse();
    std::process::exit(match run(cli) {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("error: {e}");
            for suggestion in e.recovery_suggestions() {
                eprintln!("  hint: {suggestion}");
            }
            e.exit_code()
        }
    });
}

fn run(cli: Cli) -> Result<(), IndexError> {
    let settings = Settings::load().map_err(|e| IndexError::Config {
        reason: e.to_string(),
    })?;
    repolens::logging::init_with_config(&settings.logging);
    let settings = Arc::new(settings);

    let root = cli
        .root
        .clone()
        .unwrap_or_else(|| settings.workspace_root());

    if let Commands::Init { force } = &cli.command {
        let path = Settings::init_config_file(&root, *force).map_err(|e| IndexError::Config {
            reason: e.to_string(),
        })?;
        println!("Wrote {}", path.display());
        return Ok(());
    }

    let resolver = PathResolver::new(&root)?;
    let db_path = root
        .join(&settings.index_path)
        .join(resolver.repo_hash())
        .join("code_index.db");
    let store = Arc::new(IndexStore::open(&db_path)?);
    store.integrity_check()?;
    let dispatcher = Arc::new(Dispatcher::new(settings.clone(), store.clone(), resolver)?);

    match cli.command {
        Commands::Init { .. } => unreachable!("handled above"),

        Commands::Index { path, force } => {
            if force {
                dispatcher.query_cache().clear();
            }
            match path {
                Some(path) => {
                    let outcome = dispatcher.index_file(&path)?;
                    println!("{outcome:?}");
                }
                None => {
                    let (indexed, skipped, failed) = dispatcher.index_directory(None)?;
                    println!("Indexed {indexed} files ({skipped} unchanged/skipped, {failed} failed)");
                    if failed > 0 && indexed == 0 {
                        return Err(IndexError::General(
                            "indexing failed for every file".to_string(),
                        ));
                    }
                }
            }
            Ok(())
        }

        Commands::Search {
            query,
            semantic,
            limit,
        } => {
            if query.trim().is_empty() {
                return Err(IndexError::InvalidInput {
                    reason: "empty query".to_string(),
                });
            }
            let results = dispatcher.search(&query, semantic, limit)?;
            if results.is_empty() {
                println!("No results.");
            }
            for result in results {
                println!(
                    "{}:{}  [{:.2}]  {}",
                    result.file_path,
                    result.line,
                    result.score,
                    result.snippet.replace('\n', " ")
                );
            }
            Ok(())
        }

        Commands::Symbol { name } => {
            match dispatcher.lookup(&name)? {
                Some(def) => {
                    println!(
                        "{}",
                        serde_json::to_string_pretty(&def).unwrap_or_default()
                    );
                }
                None => println!("Symbol '{name}' not found."),
            }
            Ok(())
        }

        Commands::Docs {
            topic,
            doc_type,
            limit,
        } => {
            let doc_types = if doc_type.is_empty() {
                None
            } else {
                Some(doc_type)
            };
            let results =
                dispatcher.search_documentation(&topic, doc_types.as_deref(), limit)?;
            if results.is_empty() {
                println!("No documentation found for '{topic}'.");
            }
            for result in results {
                println!(
                    "{}:{}  [{:.2}]  {}",
                    result.file_path,
                    result.line,
                    result.score,
                    result.snippet.replace('\n', " ")
                );
            }
            Ok(())
        }

        Commands::Status => {
            let status = dispatcher.status()?;
            println!("{}", serde_json::to_string_pretty(&status).unwrap_or_default());
            Ok(())
        }

        Commands::Plugins => {
            for plugin in dispatcher.plugins() {
                println!("{}", serde_json::to_string(&plugin).unwrap_or_default());
            }
            Ok(())
        }

        Commands::Watch => {
            let runtime = tokio::runtime::Runtime::new()
                .map_err(|e| IndexError::General(format!("tokio runtime: {e}")))?;
            runtime.block_on(async {
                let subscriptions =
                    SubscriptionManager::new(settings.subscriptions.clone());
                // Bring the index up to date before watching
                let (indexed, skipped, failed) = dispatcher.index_directory(None)?;
                println!("Initial index: {indexed} indexed, {skipped} unchanged/skipped, {failed} failed");

                let service = WatchService::new(dispatcher.clone(), Some(subscriptions));
                service
                    .watch()
                    .await
                    .map_err(|e| IndexError::General(e.to_string()))
            })
        }

        Commands::Export {
            output,
            patterns_file,
        } => {
            let matcher = match patterns_file {
                Some(path) => {
                    let content =
                        std::fs::read_to_string(&path).map_err(|source| IndexError::FileRead {
                            path: path.clone(),
                            source,
                        })?;
                    SensitiveMatcher::from_pattern_file(
                        &content,
                        &settings.export.sensitive_patterns,
                    )
                }
                None => SensitiveMatcher::new(&settings.export.sensitive_patterns),
            };
            let exporter = SecureExporter::new(matcher);
            let audit = exporter.export(&store, &output)?;
            let audit_path = exporter.write_audit(&audit, &output)?;
            println!(
                "Exported {} of {} files to {} ({} excluded; audit at {})",
                audit.included,
                audit.total_files,
                output.display(),
                audit.excluded,
                audit_path.display()
            );
            Ok(())
        }
    }
}
