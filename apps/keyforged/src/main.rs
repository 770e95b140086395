mod notifier;
mod provision;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use keyforge_core::collaborators::{NoopProvisioner, Notifier, ServerProvisioner, StubGateway};
use keyforge_core::services::account_service::AccountService;
use keyforge_core::services::admin_service::{AdminOutcome, AdminService};
use keyforge_core::services::issuance_service::IssuanceService;
use keyforge_core::services::sweeper::{DEFAULT_SWEEP_INTERVAL, ExpirySweeper};
use keyforge_core::session::{self, AdminCommand};
use tracing::info;

#[derive(Parser)]
#[command(name = "keyforged")]
#[command(about = "VPN key distribution daemon", long_about = None)]
struct Cli {
    /// SQLite database location
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite://keyforge.db")]
    database_url: String,

    /// Seconds between expiry sweeps
    #[arg(long, env = "SWEEP_INTERVAL_SECS", default_value_t = DEFAULT_SWEEP_INTERVAL.as_secs())]
    sweep_interval_secs: u64,

    /// Skip pushing keys to node agents (useful without live backends)
    #[arg(long, env = "NO_PROVISION")]
    no_provision: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the maintenance daemon
    Serve,
    /// Administrative tools
    Admin {
        #[command(subcommand)]
        subcommand: AdminCommands,
    },
}

#[derive(Subcommand)]
enum AdminCommands {
    /// Issue a key to a user without payment
    GiveKey {
        /// External user identity
        user_id: i64,
        /// Days of access
        days: i64,
    },
    /// Revoke all of a user's keys
    BlockUser { user_id: i64 },
    /// Send a text to every known user
    Broadcast { text: String },
    /// Register a VPN server
    AddServer {
        address: String,
        port: u16,
        #[arg(long, default_value = "vless")]
        protocol: String,
    },
    /// Take a server out of rotation
    RemoveServer { server_id: i64 },
    /// Change what a tariff charges, in major units (e.g. 300 or 299.50)
    SetPrice { tariff: String, price: String },
    /// List registered servers
    Servers,
    /// List tariffs
    Tariffs,
    /// Show headline counters
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(
            |_| "keyforged=info,keyforge_core=info,keyforge_db=info,sqlx=warn".into(),
        ))
        .init();

    let cli = Cli::parse();

    let pool = keyforge_db::connect(&cli.database_url)
        .await
        .context("Failed to open database")?;

    let notifier: Arc<dyn Notifier> = Arc::new(notifier::LogNotifier);
    let provisioner: Arc<dyn ServerProvisioner> = if cli.no_provision {
        Arc::new(NoopProvisioner)
    } else {
        Arc::new(provision::HttpProvisioner::new()?)
    };

    let accounts = AccountService::new(pool.clone());
    let issuance = IssuanceService::new(
        pool.clone(),
        accounts,
        Arc::new(StubGateway),
        notifier.clone(),
        provisioner,
    );
    let admin = AdminService::new(pool.clone(), issuance, notifier.clone());

    match cli.command {
        Commands::Serve => {
            let sweeper = ExpirySweeper::new(
                pool,
                notifier,
                Duration::from_secs(cli.sweep_interval_secs),
            );
            let sweep_task = tokio::spawn(sweeper.run());

            info!("keyforged running, press Ctrl-C to stop");
            tokio::signal::ctrl_c().await?;
            info!("shutting down");
            sweep_task.abort();
        }
        Commands::Admin { subcommand } => {
            run_admin(&admin, subcommand).await?;
        }
    }

    Ok(())
}

async fn run_admin(admin: &AdminService, subcommand: AdminCommands) -> Result<()> {
    let command = match subcommand {
        AdminCommands::GiveKey { user_id, days } => AdminCommand::GiveKey { user_id, days },
        AdminCommands::BlockUser { user_id } => AdminCommand::BlockUser { user_id },
        AdminCommands::Broadcast { text } => AdminCommand::Broadcast { text },
        AdminCommands::AddServer {
            address,
            port,
            protocol,
        } => AdminCommand::AddServer {
            address,
            port,
            protocol,
        },
        AdminCommands::RemoveServer { server_id } => AdminCommand::RemoveServer { server_id },
        AdminCommands::SetPrice { tariff, price } => {
            let amount = session::parse_amount(&price)
                .with_context(|| format!("'{price}' is not a price (major units, e.g. 299.50)"))?;
            AdminCommand::EditPrice { tariff, amount }
        }
        AdminCommands::Servers => {
            for server in admin.list_servers().await? {
                println!(
                    "{:>4}  {}:{}  {}  {}",
                    server.id, server.address, server.port, server.protocol, server.status
                );
            }
            return Ok(());
        }
        AdminCommands::Tariffs => {
            for tariff in admin.list_tariffs().await? {
                println!(
                    "{:<12} {:>10}  {} days",
                    tariff.name,
                    format_amount(tariff.amount),
                    tariff.duration_days
                );
            }
            return Ok(());
        }
        AdminCommands::Stats => {
            let stats = admin.stats().await?;
            println!("users:          {}", stats.users);
            println!("keys:           {}", stats.keys);
            println!("active servers: {}", stats.active_servers);
            return Ok(());
        }
    };

    match admin.execute(command, Utc::now()).await? {
        AdminOutcome::KeyIssued { user_id, issued } => {
            println!("Issued key for user {user_id}:");
            println!("  key:     {}", issued.key);
            println!("  server:  {}", issued.server_id);
            println!("  expires: {}", issued.expires_at);
        }
        AdminOutcome::UserBlocked {
            user_id,
            revoked_keys,
        } => {
            println!("Blocked user {user_id}, revoked {revoked_keys} key(s).");
        }
        AdminOutcome::BroadcastSent(report) => {
            println!(
                "Broadcast delivered to {} user(s), {} failed.",
                report.delivered, report.failed
            );
        }
        AdminOutcome::ServerAdded { server_id } => {
            println!("Server {server_id} registered.");
        }
        AdminOutcome::ServerRemoved { server_id } => {
            println!("Server {server_id} taken out of rotation.");
        }
        AdminOutcome::PriceUpdated { tariff, amount } => {
            println!("Tariff {tariff} now costs {}.", format_amount(amount));
        }
    }

    Ok(())
}

fn format_amount(minor: i64) -> String {
    format!("{}.{:02}", minor / 100, minor % 100)
}
