use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use dota_ingest::config::{IngestConfig, LOGGED_KEYS};
use dota_ingest::database_ops::{db::Db, MemoryStore};
use dota_ingest::ingest::{FactStore, IngestSummary, Ingestor, Scheduler, TrackedAccounts};
use dota_ingest::util::{env as env_util, logging};
use tokio::sync::broadcast;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "ingest", version, about = "Dota 2 match ingestion CLI")]
struct Cli {
    /// Write into an in-memory store instead of Postgres and print row counts
    #[arg(long = "dry-run", global = true, action = ArgAction::SetTrue)]
    dry_run: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ingest an account's most recent matches
    Recent(RecentArgs),
    /// Ingest an account's whole reachable history
    Full(AccountArg),
    /// Manage the accounts the scheduler refreshes
    Track {
        #[command(subcommand)]
        action: TrackAction,
    },
    /// Refresh every tracked account on a fixed interval
    Schedule {
        /// Run a single pass and exit
        #[arg(long, action = ArgAction::SetTrue)]
        once: bool,
    },
    /// Apply pending SQL migrations
    Migrate,
}

#[derive(Debug, Args)]
struct AccountArg {
    /// 32-bit Steam account id
    #[arg(long)]
    account: i64,
}

#[derive(Debug, Args)]
struct RecentArgs {
    #[arg(long)]
    account: i64,
    /// Maximum number of matches to discover
    #[arg(long, default_value_t = 100)]
    limit: usize,
}

#[derive(Subcommand, Debug)]
enum TrackAction {
    Add(AccountArg),
    Remove(AccountArg),
    List,
}

/// Where rows and tracked accounts live for this invocation.
enum Backend {
    Postgres(Db),
    Memory(Arc<MemoryStore>),
}

impl Backend {
    async fn open(dry_run: bool, max_conns: u32) -> Result<Self> {
        if dry_run {
            info!("dry run: writing to in-memory store");
            return Ok(Backend::Memory(Arc::new(MemoryStore::new())));
        }
        let url = env_util::db_url().context("no database URL configured for ingest CLI")?;
        Ok(Backend::Postgres(Db::connect(&url, max_conns).await?))
    }

    fn facts(&self) -> Arc<dyn FactStore> {
        match self {
            Backend::Postgres(db) => Arc::new(db.clone()),
            Backend::Memory(mem) => mem.clone(),
        }
    }

    fn accounts(&self) -> Arc<dyn TrackedAccounts> {
        match self {
            Backend::Postgres(db) => Arc::new(db.clone()),
            Backend::Memory(mem) => mem.clone(),
        }
    }

    fn report(&self) {
        if let Backend::Memory(mem) = self {
            match serde_json::to_string_pretty(&mem.row_counts()) {
                Ok(json) => println!("{json}"),
                Err(err) => eprintln!("cannot render row counts: {err}"),
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_util::init_env();
    logging::init_tracing(logging::DEFAULT_FILTER)?;
    let cli = Cli::parse();

    if let Command::Migrate = cli.command {
        let url = env_util::db_url().context("no database URL configured for migrate")?;
        let db = Db::connect_no_migrate(&url, 2).await?;
        let applied = db.migrate().await?;
        println!("applied {applied} migration(s)");
        return Ok(());
    }

    let required: &[&str] = if cli.dry_run {
        &["STEAM_API_KEY"]
    } else {
        &["STEAM_API_KEY", "DATABASE_URL"]
    };
    env_util::preflight_check("ingest", required, LOGGED_KEYS)?;
    let cfg = IngestConfig::from_env()?;
    let backend = Backend::open(cli.dry_run, cfg.db_max_conns).await?;

    match cli.command {
        Command::Recent(args) => {
            let ingestor = dota_ingest::build_ingestor(&cfg, backend.facts())?;
            let summary = ingestor.ingest_recent(args.account, args.limit).await?;
            print_summary(args.account, &summary)?;
        }
        Command::Full(args) => {
            let ingestor = dota_ingest::build_ingestor(&cfg, backend.facts())?;
            let summary = ingestor.ingest_full(args.account).await?;
            print_summary(args.account, &summary)?;
        }
        Command::Track { action } => {
            let accounts = backend.accounts();
            match action {
                TrackAction::Add(a) => {
                    let added = accounts.track_account(a.account).await?;
                    println!("{} {}", if added { "tracking" } else { "already tracking" }, a.account);
                }
                TrackAction::Remove(a) => {
                    let removed = accounts.untrack_account(a.account).await?;
                    println!("{} {}", if removed { "untracked" } else { "not tracked" }, a.account);
                }
                TrackAction::List => {
                    for id in accounts.tracked_accounts().await? {
                        println!("{id}");
                    }
                }
            }
        }
        Command::Schedule { once } => {
            let ingestor: Arc<Ingestor> =
                Arc::new(dota_ingest::build_ingestor(&cfg, backend.facts())?);
            let scheduler = Scheduler::new(ingestor, backend.accounts(), cfg.schedule_settings());
            if once {
                let report = scheduler.run_once().await?;
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        info!("shutdown: Ctrl+C received");
                        let _ = shutdown_tx.send(());
                    }
                });
                scheduler.run_forever(shutdown_rx).await;
            }
        }
        // Handled before configuration is loaded.
        Command::Migrate => {}
    }

    backend.report();
    Ok(())
}

fn print_summary(account_id: i64, summary: &IngestSummary) -> Result<()> {
    info!(account_id, matches = summary.matches_committed, "ingest complete");
    println!("{}", serde_json::to_string_pretty(summary)?);
    Ok(())
}
