mod app;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use log::info;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use bookpress::compile::{CompilationController, CompileOutcome, CompileRequest, JobStatusView};
use bookpress::config::{load_config, LoggingConfig};
use bookpress::cover::{CoverDesign, CoverGeometry, CoverSpec, CoverType, PaperType};
use bookpress::fulfillment::{PlaceOrderRequest, QuoteRequest, ShippingAddress, ShippingLevel};
use bookpress::geometry::BookSize;
use bookpress::render::{BookManifest, InMemoryPageSource};
use bookpress::telemetry::init_tracing;
use bookpress::{BookpressError, CompilationJob};

use app::App;

#[derive(Parser)]
#[command(name = "bookpress")]
#[command(about = "Compile scrapbooks into print-ready PDFs and order printed copies")]
struct Cli {
    /// Configuration file.
    #[arg(long, short, global = true, default_value = "bookpress.json")]
    config: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate, render and merge a book manifest into a print PDF.
    Compile {
        /// Book manifest exported by the editor (JSON).
        manifest: PathBuf,
        /// Accept critical bleed issues on behalf of this user.
        #[arg(long)]
        acknowledge: Option<String>,
        #[arg(long)]
        requested_by: Option<String>,
    },
    /// Show the status of a compilation job.
    Status { job_id: String },
    /// List a family's compilation jobs, newest first.
    Jobs { family_id: String },
    /// Mint a fresh download link for a complete job.
    Refresh { family_id: String, job_id: String },
    /// Price a print run.
    Estimate {
        #[arg(long, value_parser = parse_book_size)]
        size: BookSize,
        #[arg(long)]
        pages: u32,
        #[arg(long, value_parser = parse_cover_type, default_value = "soft")]
        cover: CoverType,
        #[arg(long, value_parser = parse_paper_type, default_value = "standard")]
        paper: PaperType,
        #[arg(long, default_value_t = 1)]
        quantity: u32,
        #[arg(long, value_parser = parse_shipping_level, default_value = "ground")]
        shipping: ShippingLevel,
        #[arg(long, default_value = "US")]
        country: String,
    },
    /// Order printed copies of a complete job.
    Order {
        family_id: String,
        job_id: String,
        /// Order details (JSON): cover, paper, quantity, address, shipping and design.
        #[arg(long)]
        details: PathBuf,
    },
    /// Refresh an order's status from the print provider.
    OrderStatus { order_id: String },
    /// List a family's print orders, newest first.
    Orders { family_id: String },
    /// Print the cover spread geometry for a book.
    CoverGeometry {
        #[arg(long, value_parser = parse_book_size)]
        size: BookSize,
        #[arg(long)]
        pages: u32,
        #[arg(long, value_parser = parse_cover_type, default_value = "soft")]
        cover: CoverType,
        #[arg(long, value_parser = parse_paper_type, default_value = "standard")]
        paper: PaperType,
        #[arg(long)]
        dpi: Option<f64>,
    },
}

/// Contents of the `--details` file for `order`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderDetails {
    #[serde(default)]
    cover_type: CoverType,
    #[serde(default)]
    paper_type: PaperType,
    quantity: u32,
    shipping_address: ShippingAddress,
    #[serde(default)]
    shipping_level: ShippingLevel,
    cover_design: CoverDesign,
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Bookpress(#[from] BookpressError),

    #[error("Failed to read '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid JSON in '{path}': {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to write output: {0}")]
    Output(#[from] serde_json::Error),

    #[error("No print provider configured")]
    NoProvider,
}

macro_rules! library_error {
    ($($ty:ty),*) => {
        $(impl From<$ty> for CliError {
            fn from(e: $ty) -> Self {
                CliError::Bookpress(e.into())
            }
        })*
    };
}

library_error!(
    bookpress::ConfigError,
    bookpress::compile::CompileError,
    bookpress::fulfillment::FulfillmentError,
    bookpress::telemetry::TelemetryError
);

fn parse_book_size(s: &str) -> Result<BookSize, String> {
    BookSize::parse(s).ok_or_else(|| {
        let known: Vec<&str> = BookSize::ALL.iter().map(|b| b.as_str()).collect();
        format!("unknown book size '{}' (expected one of {})", s, known.join(", "))
    })
}

fn parse_cover_type(s: &str) -> Result<CoverType, String> {
    CoverType::parse(s).ok_or_else(|| format!("unknown cover type '{}' (soft, hard)", s))
}

fn parse_paper_type(s: &str) -> Result<PaperType, String> {
    PaperType::parse(s).ok_or_else(|| format!("unknown paper type '{}' (standard, premium)", s))
}

fn parse_shipping_level(s: &str) -> Result<ShippingLevel, String> {
    ShippingLevel::parse(s).ok_or_else(|| format!("unknown shipping level '{}'", s))
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    // Geometry needs neither configuration nor services.
    if let Commands::CoverGeometry {
        size,
        pages,
        cover,
        paper,
        dpi,
    } = cli.command
    {
        init_tracing(&LoggingConfig::default())?;
        let spec = CoverSpec {
            book_size: size,
            page_count: pages,
            paper_type: paper,
            cover_type: cover,
        };
        let geometry = match dpi {
            Some(dpi) => CoverGeometry::compute_at(spec, dpi),
            None => CoverGeometry::compute(spec),
        };
        return print_json(&geometry);
    }

    let config = load_config(&cli.config)?;
    init_tracing(&config.logging)?;
    info!("Loaded configuration from {}", cli.config.display());

    match cli.command {
        Commands::Compile {
            manifest,
            acknowledge,
            requested_by,
        } => {
            let manifest: BookManifest = read_json(&manifest)?;
            let pages = Arc::new(InMemoryPageSource::from_manifest(&manifest));
            let app = App::build(&config, pages)?;
            let request = CompileRequest {
                family_id: manifest.family_id.clone(),
                book_size: manifest.book_size,
                page_ids: manifest.page_ids(),
                requested_by,
                acknowledged_by: acknowledge,
            };
            match app.compiler.compile(request).await? {
                CompileOutcome::Started {
                    job_id,
                    estimated_duration_secs,
                } => {
                    info!(
                        "Job {} started, estimated {}s",
                        job_id, estimated_duration_secs
                    );
                    let job = follow(&app.compiler, &job_id).await?;
                    print_json(&JobStatusView::from(job))
                }
                outcome => print_json(&outcome),
            }
        }
        Commands::Status { job_id } => {
            let app = App::build(&config, Arc::new(InMemoryPageSource::new()))?;
            print_json(&app.compiler.job_status(&job_id).await?)
        }
        Commands::Jobs { family_id } => {
            let app = App::build(&config, Arc::new(InMemoryPageSource::new()))?;
            let jobs: Vec<JobStatusView> = app
                .compiler
                .list_jobs(&family_id)
                .await?
                .into_iter()
                .map(JobStatusView::from)
                .collect();
            print_json(&jobs)
        }
        Commands::Refresh { family_id, job_id } => {
            let app = App::build(&config, Arc::new(InMemoryPageSource::new()))?;
            print_json(&app.compiler.refresh_download(&family_id, &job_id).await?)
        }
        Commands::Estimate {
            size,
            pages,
            cover,
            paper,
            quantity,
            shipping,
            country,
        } => {
            let app = App::build(&config, Arc::new(InMemoryPageSource::new()))?;
            let request = QuoteRequest {
                book_size: size,
                page_count: pages,
                cover_type: cover,
                paper_type: paper,
                quantity,
                shipping_level: shipping,
                country_code: country,
            };
            let cost = match &app.fulfillment {
                Some(bridge) => bridge.estimate(&request).await,
                None => app.price_table.estimate(&request),
            };
            print_json(&cost)
        }
        Commands::Order {
            family_id,
            job_id,
            details,
        } => {
            let details: OrderDetails = read_json(&details)?;
            let app = App::build(&config, Arc::new(InMemoryPageSource::new()))?;
            let bridge = app.fulfillment.as_ref().ok_or(CliError::NoProvider)?;
            let order = bridge
                .place_order(PlaceOrderRequest {
                    family_id,
                    job_id,
                    cover_type: details.cover_type,
                    paper_type: details.paper_type,
                    quantity: details.quantity,
                    shipping_address: details.shipping_address,
                    shipping_level: details.shipping_level,
                    cover_design: details.cover_design,
                })
                .await?;
            print_json(&order)
        }
        Commands::OrderStatus { order_id } => {
            let app = App::build(&config, Arc::new(InMemoryPageSource::new()))?;
            let bridge = app.fulfillment.as_ref().ok_or(CliError::NoProvider)?;
            print_json(&bridge.sync_status(&order_id).await?)
        }
        Commands::Orders { family_id } => {
            let app = App::build(&config, Arc::new(InMemoryPageSource::new()))?;
            let bridge = app.fulfillment.as_ref().ok_or(CliError::NoProvider)?;
            print_json(&bridge.list_orders(&family_id).await?)
        }
        Commands::CoverGeometry { .. } => Ok(()),
    }
}

/// Logs each update until the job settles and returns the final record.
async fn follow(
    compiler: &CompilationController,
    job_id: &str,
) -> Result<CompilationJob, CliError> {
    let mut updates = compiler.watch(job_id).await?;
    let mut last = None;
    while let Some(job) = updates.next().await {
        info!(
            "{}: {} ({}%, {}/{} pages)",
            job.id,
            job.status.label(),
            job.progress_percent(),
            job.pages_rendered,
            job.total_pages
        );
        let settled = job.status.is_terminal() || job.blocked_by_validation;
        last = Some(job);
        if settled {
            break;
        }
    }
    match last {
        Some(job) => Ok(job),
        None => Ok(compiler.wait_for_job(job_id).await?),
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, CliError> {
    let content = std::fs::read_to_string(path).map_err(|source| CliError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| CliError::Json {
        path: path.to_path_buf(),
        source,
    })
}

fn print_json<T: Serialize>(value: &T) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
