//! Operator CLI for the account scheduler.
//!
//! Inspects and maintains the shared coordination store using the same
//! scripts the gateway runs.

use std::path::PathBuf;

use account_scheduler::config::loader::load_config;
use account_scheduler::observability::logging::init_logging;
use account_scheduler::{AccountCandidate, Scheduler, SchedulerConfig};
use clap::{ArgGroup, Parser, Subcommand};
use serde_json::{json, Value};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "schedctl")]
#[command(about = "Inspect and maintain account scheduler state", long_about = None)]
struct Cli {
    /// Scheduler config file (TOML). Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the store URL from the config.
    #[arg(short, long)]
    url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Live slot count of an account or user
    #[command(group(ArgGroup::new("scope").required(true).args(["account", "user"])))]
    Count {
        #[arg(long)]
        account: Option<u64>,
        #[arg(long)]
        user: Option<u64>,
    },
    /// Global wait-queue depth
    WaitDepth,
    /// Drop every slot held on an account
    ResetAccount { account_id: u64 },
    /// Probe selection: reserve a slot, print the choice, release it
    Select {
        /// Candidate as ID:PRIORITY:MAX (repeatable)
        #[arg(long = "candidate", required = true)]
        candidates: Vec<AccountCandidate>,
        /// Holder token; a random one is generated when omitted
        #[arg(long)]
        holder: Option<String>,
        /// Jitter seed; derived from the holder when omitted
        #[arg(long)]
        seed: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => SchedulerConfig::default(),
    };
    if let Some(url) = cli.url {
        config.store.url = url;
    }
    init_logging(&config.observability)?;

    let scheduler = Scheduler::connect(config).await?;

    let output = match cli.command {
        Commands::Count { account, user } => match (account, user) {
            (Some(id), _) => json!({
                "account_id": id,
                "concurrency": scheduler.account_concurrency(id).await?,
            }),
            (None, user) => {
                let id = user.ok_or("either --account or --user is required")?;
                json!({
                    "user_id": id,
                    "concurrency": scheduler.user_concurrency(id).await?,
                })
            }
        },
        Commands::WaitDepth => json!({ "wait_depth": scheduler.wait_queue_depth().await? }),
        Commands::ResetAccount { account_id } => {
            scheduler.reset_account_concurrency(account_id).await?;
            json!({ "account_id": account_id, "reset": true })
        }
        Commands::Select {
            candidates,
            holder,
            seed,
        } => {
            let holder = holder.unwrap_or_else(|| format!("schedctl-{}", Uuid::new_v4()));
            select(&scheduler, &candidates, &holder, seed).await?
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn select(
    scheduler: &Scheduler,
    candidates: &[AccountCandidate],
    holder: &str,
    seed: Option<u64>,
) -> Result<Value, Box<dyn std::error::Error>> {
    let reservation = match seed {
        Some(seed) => scheduler.select_account_seeded(candidates, holder, seed).await?,
        None => scheduler.select_account(candidates, holder).await?,
    };

    let Some(reservation) = reservation else {
        return Ok(json!({ "holder": holder, "account_id": 0, "selected": false }));
    };
    let result = json!({
        "holder": holder,
        "account_id": reservation.account_id,
        "concurrency": reservation.concurrency,
        "selected": true,
    });
    reservation.release().await;
    Ok(result)
}
