use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use diagram_snapshots::client::SnapshotClient;
use diagram_snapshots::config::Config;
use diagram_snapshots::models::{format_iso_seconds, SnapshotEntry, SubmitDocumentInput};
use diagram_snapshots::service::{RenderRequest, SnapshotService};
use diagram_snapshots::{api, validate, SnapshotError};

#[derive(Parser)]
#[command(name = "dsnap")]
#[command(about = "Versioned HTML snapshots of an embedded diagram editor")]
struct Cli {
    /// Project root (overrides DSNAP_ROOT and the config file)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Snapshot directory (overrides DSNAP_SNAPSHOT_DIR and the config file)
    #[arg(long, global = true)]
    snapshot_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the editor API and the snapshot pages
    Serve {
        /// Port for HTTP API (overrides the configured address's port)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Render a document file into a snapshot page without activating it
    Render {
        /// Document to embed
        #[arg(long, default_value = "diagram.xml")]
        diagram: PathBuf,
        /// Page title / heading
        #[arg(long, default_value = "Diagram Snapshot")]
        title: String,
        /// Paragraph under the heading
        #[arg(long)]
        note: Option<String>,
        /// Diagram editor embed URL
        #[arg(long)]
        embed_url: Option<String>,
        /// Output page; defaults to <snapshot-dir>/diagram_editor_<timestamp>.html
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Archive, activate and snapshot a document in the local tree
    Submit {
        file: PathBuf,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        note: Option<String>,
    },
    /// Submit a document to a running server
    Push {
        file: PathBuf,
        /// Server base URL (default: DSNAP_URL or http://127.0.0.1:5000)
        #[arg(long)]
        url: Option<String>,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        note: Option<String>,
    },
    /// List snapshots, newest first
    List {
        /// Ask a running server instead of reading the local manifest
        #[arg(long)]
        url: Option<String>,
    },
    /// Print the active document
    Show {
        /// Ask a running server instead of reading the local tree
        #[arg(long)]
        url: Option<String>,
    },
    /// Regenerate the catalog page from the manifest
    Catalog,
    /// Check that a document is well-formed
    Validate { file: PathBuf },
    /// Delete archived documents and pages that no manifest entry references
    Sweep {
        /// Only report what would be deleted
        #[arg(long)]
        dry_run: bool,
    },
}

/// Initialize tracing on stderr so command output on stdout stays clean.
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG")
            .unwrap_or_else(|_| "diagram_snapshots=debug,tower_http=debug".into()),
    );

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn load_config(cli: &Cli) -> Config {
    let mut config = Config::load();
    if let Some(root) = &cli.root {
        config.root = root.clone();
    }
    if let Some(dir) = &cli.snapshot_dir {
        config.snapshot_dir = dir.clone();
    }
    config
}

fn client(url: Option<String>) -> SnapshotClient {
    url.map(SnapshotClient::new)
        .unwrap_or_else(SnapshotClient::from_env)
}

fn print_entries(entries: &[SnapshotEntry]) {
    if entries.is_empty() {
        println!("No snapshots yet.");
        return;
    }
    for entry in entries {
        println!(
            "{}  {}  {}  (source: {})",
            format_iso_seconds(&entry.generated_at),
            entry.filename,
            entry.display_title(),
            entry.source_document
        );
    }
}

async fn serve(config: Config, port: Option<u16>) -> anyhow::Result<()> {
    let service = SnapshotService::open(&config).context("Failed to open snapshot tree")?;
    service.rebuild_catalog().context("Failed to build catalog")?;

    let addr = match port {
        Some(port) => format!("127.0.0.1:{}", port),
        None => config.addr.clone(),
    };
    let app = api::create_router(service, Some(config.root.clone()));

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!("Diagram snapshot server listening on http://{}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing();
    let config = load_config(&cli);

    match cli.command {
        None => serve(config, None).await?,
        Some(Commands::Serve { port }) => serve(config, port).await?,
        Some(Commands::Render {
            diagram,
            title,
            note,
            embed_url,
            output,
        }) => {
            let service = SnapshotService::open(&config)?;
            let outcome = service.render_file(RenderRequest {
                document: diagram,
                title,
                note,
                embed_url,
                output,
            })?;
            println!("Wrote {}", outcome.artifact.display());
            match outcome.entry {
                Some(_) => println!(
                    "Updated catalog at {}",
                    service.layout().catalog_path.display()
                ),
                None => println!(
                    "Skipping catalog update: output file is outside the snapshot directory."
                ),
            }
        }
        Some(Commands::Submit { file, title, note }) => {
            let xml = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let service = SnapshotService::open(&config)?;
            let entry = service.submit_document(&SubmitDocumentInput {
                xml: Some(xml),
                title,
                note,
            })?;
            println!("Created {} from {}", entry.filename, entry.source_document);
        }
        Some(Commands::Push {
            file,
            url,
            title,
            note,
        }) => {
            let xml = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let response = client(url)
                .submit(&SubmitDocumentInput {
                    xml: Some(xml),
                    title,
                    note,
                })
                .await?;
            println!(
                "Created {} from {} at {}",
                response.snapshot, response.raw_xml, response.timestamp
            );
        }
        Some(Commands::List { url: Some(url) }) => {
            print_entries(&client(Some(url)).versions().await?);
        }
        Some(Commands::List { url: None }) => {
            let service = SnapshotService::open(&config)?;
            print_entries(&service.list_snapshots()?);
        }
        Some(Commands::Show { url: Some(url) }) => {
            let latest = client(Some(url)).latest().await?;
            eprintln!("{} (updated {})", latest.source, latest.updated_at);
            println!("{}", latest.xml);
        }
        Some(Commands::Show { url: None }) => {
            let service = SnapshotService::open(&config)?;
            let active = service.fetch_active_document()?;
            eprintln!(
                "{} (updated {})",
                active.source,
                format_iso_seconds(&active.last_modified)
            );
            println!("{}", active.content);
        }
        Some(Commands::Catalog) => {
            let service = SnapshotService::open(&config)?;
            let count = service.rebuild_catalog()?;
            println!(
                "Rebuilt {} with {} snapshot(s)",
                service.layout().catalog_path.display(),
                count
            );
        }
        Some(Commands::Validate { file }) => {
            let xml = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            match validate::check_well_formed(&xml) {
                Ok(()) => println!("Validation successful: '{}' is well-formed XML.", file.display()),
                Err(SnapshotError::InvalidDocument {
                    message,
                    line,
                    column,
                }) => {
                    eprintln!("--- XML Validation Failed ---");
                    eprintln!("An error was found in '{}'.", file.display());
                    eprintln!("Error message: {}", message);
                    eprintln!("Line number:   {}", line);
                    eprintln!("Column number: {}", column);
                    if let Some(text) = xml.lines().nth(line.saturating_sub(1)) {
                        eprintln!("Problematic line content: > {}", text.trim());
                    }
                    return Ok(ExitCode::FAILURE);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Some(Commands::Sweep { dry_run }) => {
            let service = SnapshotService::open(&config)?;
            let report = service.sweep(dry_run)?;
            if let Some(reason) = &report.skipped {
                eprintln!("Sweep skipped: {}", reason);
                return Ok(ExitCode::FAILURE);
            }
            let verb = if report.dry_run { "Would remove" } else { "Removed" };
            for reference in &report.documents {
                println!("{} document {}", verb, reference);
            }
            for name in &report.artifacts {
                println!("{} page {}", verb, name);
            }
            println!(
                "{} {} document(s) and {} page(s)",
                verb,
                report.documents.len(),
                report.artifacts.len()
            );
        }
    }

    Ok(ExitCode::SUCCESS)
}
