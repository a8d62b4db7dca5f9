//! patrol-sync - command-line front end for the patrol client core
//!
//! Logs in, mirrors the equipment hierarchy locally and files
//! cannot-patrol reports that survive being offline.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use std::path::PathBuf;
use std::sync::Arc;

use patrol_sync::models::{Plant, ReportInput, ReportStatus, Reporter};
use patrol_sync::{
    ApiClient, Config, Connectivity, CredentialStore, Database, FixedConnectivity, ReportQueue,
    Session, SubmitOutcome, TcpProbe,
};

#[derive(Parser)]
#[command(name = "patrol-sync")]
#[command(about = "Offline-first hierarchy sync and cannot-patrol reporting")]
#[command(version)]
struct Cli {
    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new config file
    Init {
        /// Output path for config file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Log in and download the hierarchy
    Login {
        #[arg(short, long)]
        email: String,

        #[arg(short, long)]
        password: String,
    },

    /// Log out and wipe the local hierarchy
    Logout,

    /// Download the hierarchy again
    Refresh,

    /// Print the locally stored hierarchy
    Show {
        /// Print as JSON instead of a tree
        #[arg(long)]
        json: bool,
    },

    /// Show session, store and connectivity state
    Status,

    /// File a cannot-patrol report
    Report {
        /// JPEG photo of the site
        #[arg(long)]
        photo: PathBuf,

        /// Rain, Technical Issue or Urgent
        #[arg(long)]
        status: ReportStatus,

        #[arg(long)]
        reason: String,

        #[arg(long, default_value = "")]
        location: String,

        #[arg(long, allow_hyphen_values = true)]
        lon: Decimal,

        #[arg(long, allow_hyphen_values = true)]
        lat: Decimal,

        /// Save locally without trying the server
        #[arg(long)]
        offline: bool,
    },

    /// List locally stored reports
    Reports,

    /// Push reports that have not reached the server yet
    Sync,
}

/// Everything a command needs, built once from the config
struct App {
    config: Config,
    api: Arc<ApiClient>,
    db: Arc<Database>,
}

impl App {
    fn open(config: Config) -> Result<Self> {
        let api = ApiClient::new(config.base_url()?, config.request_timeout())
            .context("Failed to create API client")?;
        let db = Database::open(&config.database.path).context("Failed to open database")?;

        Ok(Self {
            config,
            api: Arc::new(api),
            db: Arc::new(db),
        })
    }

    fn credentials(&self) -> Arc<dyn CredentialStore> {
        self.db.clone()
    }

    fn session(&self) -> Session<ApiClient> {
        Session::new(self.api.clone(), self.db.clone(), self.credentials())
    }

    fn connectivity(&self, offline: bool) -> Result<Arc<dyn Connectivity>> {
        if offline {
            return Ok(Arc::new(FixedConnectivity::offline()));
        }
        let probe = TcpProbe::for_url(self.api.base_url(), self.config.probe_timeout())
            .context("api.base_url has no host to probe")?;
        Ok(Arc::new(probe))
    }

    fn queue(&self, offline: bool) -> Result<ReportQueue<ApiClient>> {
        Ok(ReportQueue::new(
            self.api.clone(),
            self.db.clone(),
            self.credentials(),
            self.connectivity(offline)?,
        ))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("patrol_sync=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    if let Commands::Init { output } = &cli.command {
        let path = output.clone().unwrap_or_else(|| PathBuf::from("config.toml"));
        Config::default().save_to(&path)?;

        println!("Created config file: {}", path.display());
        println!();
        println!("Next steps:");
        println!("  1. Set api.base_url to your patrol server");
        println!(
            "  2. Log in: patrol-sync --config {} login --email <email> --password <password>",
            path.display()
        );
        return Ok(());
    }

    let cfg = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    let app = App::open(cfg)?;

    match cli.command {
        Commands::Init { .. } => Ok(()),

        Commands::Login { email, password } => {
            let session = app.session();
            let user = session.login(&email, &password).await?;
            let counts = app.db.hierarchy_counts()?;

            println!("Logged in as {} ({})", user.name, user.email);
            println!("  {} / {}", user.department, user.role);
            if counts.plants == 0 {
                println!("No hierarchy stored yet. Try: patrol-sync refresh");
            } else {
                println!(
                    "Hierarchy: {} plants, {} tags, {} parameters",
                    counts.plants, counts.tags, counts.parameters
                );
            }
            Ok(())
        }

        Commands::Logout => {
            app.session().logout().await?;
            println!("Logged out. Local hierarchy cleared.");
            Ok(())
        }

        Commands::Refresh => {
            let plants = app.session().refresh_hierarchy().await?;
            if plants == 0 {
                println!("Server returned no plants; local hierarchy unchanged.");
            } else {
                println!("Refreshed {} plants.", plants);
            }
            Ok(())
        }

        Commands::Show { json } => {
            let plants = app.session().load_hierarchy().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&plants)?);
            } else if plants.is_empty() {
                println!("No hierarchy stored.");
            } else {
                print_tree(&plants);
            }
            Ok(())
        }

        Commands::Status => {
            let session = app.session();
            let counts = app.db.hierarchy_counts()?;
            let pending = app.db.pending_reports()?.len();
            let connectivity = app.connectivity(false)?;
            let state = tokio::task::spawn_blocking(move || connectivity.state()).await?;

            println!("Server:    {}", app.api.base_url());
            println!("Database:  {}", app.config.database.path.display());
            println!("Network:   {:?}", state);
            let authenticated = session.is_authenticated()?;
            match session.current_user()? {
                Some(user) if authenticated => {
                    println!("Session:   {} ({})", user.name, user.email)
                }
                _ => println!("Session:   not logged in"),
            }
            println!(
                "Hierarchy: {} plants, {} areas, {} groups, {} types, {} tags, {} parameters",
                counts.plants, counts.areas, counts.groups, counts.types, counts.tags, counts.parameters
            );
            println!("Pending:   {} reports", pending);
            Ok(())
        }

        Commands::Report {
            photo,
            status,
            reason,
            location,
            lon,
            lat,
            offline,
        } => {
            let user = app
                .session()
                .current_user()?
                .context("No cached user. Run 'patrol-sync login' first.")?;
            let photo = std::fs::read(&photo)
                .with_context(|| format!("Failed to read photo {}", photo.display()))?;

            let submission = app
                .queue(offline)?
                .submit_report(ReportInput {
                    reporter: Reporter::from(&user),
                    status,
                    reason,
                    location,
                    longitude: lon,
                    latitude: lat,
                    photo,
                })
                .await?;

            match submission.outcome {
                SubmitOutcome::SavedAndSynced => println!("Report sent."),
                SubmitOutcome::SavedOfflineOnly => println!("Report saved locally."),
            }
            if let Some(warning) = submission.warning {
                println!("{}", warning);
            }
            println!("  id: {}", submission.report.id);
            Ok(())
        }

        Commands::Reports => {
            let reports = app.db.list_reports()?;
            if reports.is_empty() {
                println!("No reports stored.");
            }
            for stored in reports {
                let report = &stored.report;
                let state = match &stored.synced_at {
                    Some(at) => format!("synced {}", at),
                    None => "pending".to_string(),
                };
                println!(
                    "{}  {}  {:<15}  {}  [{}]",
                    report.id, report.reason_date, report.status, report.location, state
                );
            }
            Ok(())
        }

        Commands::Sync => {
            let flushed = app.queue(false)?.flush_pending().await?;
            println!("Synced {} reports.", flushed.synced.len());
            for (id, reason) in &flushed.failed {
                println!("  {} failed: {}", id, reason);
            }
            Ok(())
        }
    }
}

fn print_tree(plants: &[Plant]) {
    for plant in plants {
        println!("{} [{}]", plant.name, plant.plant_id);
        for area in &plant.areas {
            println!("  {} [{}]", area.name, area.area_id);
            for group in &area.groups {
                println!("    {} [{}]", group.name, group.group_id);
                for kind in &group.types {
                    println!("      {} [{}]", kind.name, kind.type_id);
                    for tag in &kind.tags {
                        println!("        {} [{}]", tag.name, tag.tag_id);
                        for param in &tag.parameters {
                            let required = if param.mandatory { "*" } else { "" };
                            println!(
                                "          {}. {}{} ({}, {})",
                                param.ordering,
                                param.name,
                                required,
                                param.form_type.as_str(),
                                param.unit
                            );
                        }
                    }
                }
            }
        }
    }
}
