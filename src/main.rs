use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use anyhow::Context;
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use log::{info, warn};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use std::path::PathBuf;
use std::process::ExitCode;

use study_chain::api::{self, ApiDoc};
use study_chain::config::LedgerConfig;
use study_chain::ledger::{Ledger, OwnerId, SessionRecord, SessionStatus};

mod cli;

/// Tamper-evident proof-of-work ledger of study sessions
#[derive(Parser, Debug)]
#[command(name = "study-chain", version, about)]
struct Cli {
    #[command(flatten)]
    config: LedgerConfig,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP API
    Serve,

    /// Mine and store a study session
    Record {
        owner: OwnerId,

        #[arg(long)]
        subject: String,

        /// Length of the session, in minutes unless --hours is given
        #[arg(long)]
        duration: u32,

        #[arg(long)]
        hours: bool,

        #[arg(long, default_value = "pending")]
        status: SessionStatus,

        /// Day of the session (YYYY-MM-DD), today when omitted
        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Verify one chain, or every chain
    Verify {
        #[arg(long)]
        owner: Option<OwnerId>,
    },

    /// Show study statistics for one chain, or every chain
    Stats {
        #[arg(long)]
        owner: Option<OwnerId>,
    },

    /// Write a chain and its verification result to a JSON file
    Export { owner: OwnerId, file: PathBuf },

    /// Draw a chain as ASCII blocks
    Visualize { owner: OwnerId },
}

// Open the ledger in the data directory, or fall back to memory
fn initialize_ledger(config: &LedgerConfig) -> anyhow::Result<Ledger> {
    if let Err(err) = std::fs::create_dir_all(&config.data_dir) {
        warn!("Failed to create data directory: {}", err);
    }

    match config.open_ledger() {
        Ok(ledger) => {
            info!("Loaded chains from storage at {}", config.data_dir.display());
            Ok(ledger)
        }
        Err(err) => {
            warn!("Failed to load chains from storage: {}", err);
            warn!("Creating in-memory ledger instead");
            Ok(config.memory_ledger()?)
        }
    }
}

async fn serve(config: LedgerConfig, ledger: Ledger) -> std::io::Result<()> {
    let ledger = web::Data::new(ledger);

    info!("Starting HTTP server at http://{}", config.bind_addr);

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        let openapi = ApiDoc::openapi();

        App::new()
            .wrap(middleware::Logger::default())
            .wrap(cors)
            .app_data(ledger.clone())
            .configure(api::configure_routes)
            .service(SwaggerUi::new("/swagger-ui/{_:.*}").url("/api-docs/openapi.json", openapi))
    })
    .bind(config.bind_addr)?
    .run()
    .await
}

fn owners_or_all(ledger: &Ledger, owner: Option<OwnerId>) -> anyhow::Result<Vec<OwnerId>> {
    match owner {
        Some(owner) => Ok(vec![owner]),
        None => Ok(ledger.owners()?),
    }
}

fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let config = cli.config;
    config.validate()?;

    let ledger = match cli.command {
        Command::Serve => initialize_ledger(&config)?,
        _ => config
            .open_ledger()
            .with_context(|| format!("failed to open chains in {}", config.data_dir.display()))?,
    };

    match cli.command {
        Command::Serve => {
            actix_web::rt::System::new().block_on(serve(config, ledger))?;
        }
        Command::Record {
            owner,
            subject,
            duration,
            hours,
            status,
            date,
        } => {
            let minutes = if hours {
                duration
                    .checked_mul(60)
                    .context("duration is too long")?
            } else {
                duration
            };
            let date = date.unwrap_or_else(|| Utc::now().date_naive());
            let record = SessionRecord::new(date, &subject, minutes, status);

            let block = ledger.record_session(&owner, record)?;
            println!("Block #{} mined for {}", block.sequence_number, owner);
            println!("  Nonce: {}", block.nonce);
            println!("  Hash: {}", block.hash);
        }
        Command::Verify { owner } => {
            let reports = match owner {
                Some(owner) => {
                    let report = ledger.verify_owner(&owner)?;
                    vec![(owner, report)]
                }
                None => ledger.verify_all()?,
            };

            print!("{}", cli::render_verification(&reports));
            if reports.iter().any(|(_, report)| !report.is_valid()) {
                return Ok(ExitCode::FAILURE);
            }
        }
        Command::Stats { owner } => {
            let today = Utc::now().date_naive();
            for owner in owners_or_all(&ledger, owner)? {
                print!("{}", cli::render_stats(&ledger.stats(&owner, today)?));
            }
        }
        Command::Export { owner, file } => {
            let export = ledger.export(&owner)?;
            let json = serde_json::to_string_pretty(&export)?;
            std::fs::write(&file, json)
                .with_context(|| format!("failed to write {}", file.display()))?;

            println!("Chain exported to {}", file.display());
            println!("  Owner: {}", owner);
            println!("  Blocks: {}", export.blocks.len());
            println!(
                "  Status: {}",
                if export.verification.valid { "Valid" } else { "Invalid" }
            );
        }
        Command::Visualize { owner } => {
            let blocks = ledger.chain(&owner)?;
            print!("{}", cli::render_chain(&owner, &blocks));
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn main() -> anyhow::Result<ExitCode> {
    // Initialize logger
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    run(Cli::parse())
}
