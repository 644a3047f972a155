use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "mbx")]
#[command(about = "Mailbox inventory sync CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Database commands
    Db {
        #[command(subcommand)]
        cmd: DbCmd,
    },

    /// Compute layered config hash + print canonical JSON
    ConfigHash {
        /// Paths in merge order (base -> env -> local...)
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Sync jobs
    Sync {
        #[command(subcommand)]
        cmd: SyncCmd,
    },

    /// Read the account cache
    Accounts {
        #[command(subcommand)]
        cmd: AccountsCmd,
    },

    /// Cache maintenance
    Cache {
        #[command(subcommand)]
        cmd: CacheCmd,
    },
}

#[derive(Subcommand)]
enum DbCmd {
    Status,
    /// Apply embedded SQL migrations.
    Migrate,
}

#[derive(Subcommand)]
enum SyncCmd {
    /// Run one sync in the foreground and print the final job as JSON.
    Run {
        /// Layered config paths in merge order. Falls back to MBX_CONFIG.
        #[arg(long = "config")]
        config_paths: Vec<String>,
    },

    /// Print one job as JSON.
    Status {
        #[arg(long)]
        job_id: String,
    },

    /// Print the most recently started job as JSON.
    Latest,
}

#[derive(Subcommand)]
enum AccountsCmd {
    /// Print every cached account (optionally one workspace) with freshness.
    List {
        #[arg(long)]
        workspace: Option<String>,

        /// Freshness TTL in minutes
        #[arg(long, default_value_t = mbx_cache::DEFAULT_TTL_MINUTES)]
        ttl_minutes: i64,
    },

    /// Totals per instance and per workspace.
    Summary,
}

#[derive(Subcommand)]
enum CacheCmd {
    /// Delete accounts not synced for N days. Guardrail: requires --yes.
    Prune {
        #[arg(long)]
        older_than_days: i64,

        /// Acknowledge that pruned rows are gone until the next sync sees them.
        #[arg(long, default_value_t = false)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Silent if the file does not exist.
    let _ = dotenvy::from_filename(".env.local");
    init_tracing();

    let cli = Cli::parse();

    match cli.cmd {
        Commands::Db { cmd } => {
            let pool = mbx_db::connect_from_env().await?;
            match cmd {
                DbCmd::Status => {
                    let s = mbx_db::status(&pool).await?;
                    println!(
                        "db_ok={} has_accounts_table={} has_jobs_table={}",
                        s.ok, s.has_accounts_table, s.has_jobs_table
                    );
                }
                DbCmd::Migrate => {
                    mbx_db::migrate(&pool).await?;
                    println!("migrations_applied=true");
                }
            }
        }

        Commands::ConfigHash { paths } => {
            let path_refs: Vec<&str> = paths.iter().map(|s| s.as_str()).collect();
            let loaded = mbx_config::load_layered_yaml(&path_refs)?;
            println!("config_hash={}", loaded.config_hash);
            println!("{}", loaded.canonical_json);
        }

        Commands::Sync { cmd } => match cmd {
            SyncCmd::Run { config_paths } => commands::sync::run(&config_paths).await?,
            SyncCmd::Status { job_id } => commands::sync::status(&job_id).await?,
            SyncCmd::Latest => commands::sync::latest().await?,
        },

        Commands::Accounts { cmd } => match cmd {
            AccountsCmd::List {
                workspace,
                ttl_minutes,
            } => commands::accounts::list(workspace, ttl_minutes).await?,
            AccountsCmd::Summary => commands::accounts::summary().await?,
        },

        Commands::Cache { cmd } => match cmd {
            CacheCmd::Prune {
                older_than_days,
                yes,
            } => commands::accounts::prune(older_than_days, yes).await?,
        },
    }

    Ok(())
}

/// Logs go to stderr so stdout stays machine-readable.
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .init();
}
