use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use journalsync::config::{format_duration, parse_duration};
use journalsync::health::HealthCheck;
use journalsync::{Config, ConfigStore, NoticeLevel, SyncError, SyncResult, SyncService};

#[derive(Parser)]
#[command(name = "journalsync")]
#[command(about = "Git-backed synchronization for a journal data directory")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (defaults to XDG config location)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Print results as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the data directory as a git repository
    Init {
        /// Remote URL to configure as the sync remote
        #[arg(short, long)]
        remote: Option<String>,
    },

    /// Run one full sync pass (pull, commit, push)
    Sync,

    /// Pull remote changes only
    Pull,

    /// Push local commits only
    Push,

    /// Show repository and working tree status
    Status,

    /// Show or change the sync policy
    Config {
        #[command(subcommand)]
        config_command: ConfigCommands,
    },

    /// Check that git is installed
    CheckTool,

    /// Print the current data directory
    DataDir,

    /// Move the data directory to a new location
    Migrate {
        /// Target directory (must exist, be writable, and be empty or a clone)
        target: PathBuf,

        /// Only validate the target
        #[arg(long)]
        validate_only: bool,

        /// Commit uncommitted changes before migrating
        #[arg(long)]
        force: bool,
    },

    /// Rebuild the host search index from the data directory
    Reindex,

    /// Run the sync scheduler in the foreground (Ctrl+C to stop)
    Daemon {
        /// Seconds to wait for an in-flight pass on shutdown
        #[arg(long, default_value_t = 30)]
        shutdown_wait: u64,
    },

    /// System health check and diagnostics
    Doctor,

    /// Show recent sync history
    History {
        /// Number of events to show
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show the current configuration
    Show,

    /// Update sync policy fields
    Set {
        /// Enable scheduled syncing
        #[arg(long)]
        enabled: Option<bool>,

        /// Commit changes during a pass
        #[arg(long)]
        auto_commit: Option<bool>,

        /// Push commits during a pass
        #[arg(long)]
        auto_push: Option<bool>,

        /// Interval between scheduled passes (e.g. "30s", "5m", "1h")
        #[arg(long)]
        interval: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (config, config_path) = load_config(cli.config).await?;
    init_logging(cli.verbose, &config)?;
    info!("Starting journalsync v{}", env!("CARGO_PKG_VERSION"));

    let store = ConfigStore::with_file(config, config_path);
    let service = SyncService::builder(store).build()?;
    let json = cli.json;

    match cli.command {
        Commands::Init { remote } => cmd_init(&service, remote, json).await,
        Commands::Sync => report(service.sync_now().await, json),
        Commands::Pull => report(service.git_pull().await, json),
        Commands::Push => report(service.git_push().await, json),
        Commands::Status => cmd_status(&service, json).await,
        Commands::Config { config_command } => cmd_config(&service, config_command, json),
        Commands::CheckTool => cmd_check_tool(&service, json).await,
        Commands::DataDir => cmd_data_dir(&service, json).await,
        Commands::Migrate {
            target,
            validate_only,
            force,
        } => cmd_migrate(&service, target, validate_only, force).await,
        Commands::Reindex => cmd_reindex(&service).await,
        Commands::Daemon { shutdown_wait } => cmd_daemon(&service, shutdown_wait).await,
        Commands::Doctor => cmd_doctor(&service).await,
        Commands::History { limit } => cmd_history(&service, limit, json).await,
    }
}

/// Initialize logging from the verbosity flag and the logging config
fn init_logging(verbose: bool, config: &Config) -> Result<()> {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_ansi(config.logging.color).with_writer(std::io::stderr))
        .with(filter)
        .init();

    Ok(())
}

/// Load configuration from specified path or default location
async fn load_config(config_path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    match config_path {
        Some(path) => Ok((Config::load(&path)?, path)),
        None => Ok((Config::load_or_default()?, Config::default_config_path()?)),
    }
}

/// Print a pass result; conflicts and failed pushes are results, not errors
fn report(outcome: Result<SyncResult, SyncError>, json: bool) -> Result<()> {
    let result = match outcome {
        Ok(result) => result,
        Err(SyncError::AlreadySyncing) => {
            println!("⏳ A sync or migration is already running, try again shortly");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    let icon = if result.status().needs_attention() { "⚠️ " } else { "✅" };
    println!("{} {}", icon, result.status());
    if let Some(message) = result.message() {
        println!("   {}", message);
    }
    if let Some(files) = result.files_changed() {
        println!("   📝 Files changed: {}", files);
    }
    Ok(())
}

async fn cmd_init(service: &SyncService, remote: Option<String>, json: bool) -> Result<()> {
    let state = service.init_repository(remote.as_deref()).await?;

    if json {
        let value = serde_json::json!({
            "path": state.path,
            "initialized": state.initialized,
            "remote": state.remote.as_ref().map(|r| &r.url),
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!("✅ Repository initialized at {}", state.path.display());
    match &state.remote {
        Some(remote) => println!("   🔗 {}: {}", remote.name, remote.url),
        None => println!("   Next: add a remote with 'journalsync init --remote <url>'"),
    }
    Ok(())
}

async fn cmd_status(service: &SyncService, json: bool) -> Result<()> {
    let state = service.repository_state().await?;
    let tree = if state.initialized {
        Some(service.working_tree_status().await?)
    } else {
        None
    };

    if json {
        let value = serde_json::json!({
            "path": state.path,
            "initialized": state.initialized,
            "remote": state.remote.as_ref().map(|r| &r.url),
            "branch": tree.as_ref().and_then(|t| t.branch.clone()),
            "ahead": tree.as_ref().map(|t| t.ahead),
            "behind": tree.as_ref().map(|t| t.behind),
            "changed": tree.as_ref().map(|t| t.changed_paths()),
            "conflicted": tree.as_ref().map(|t| t.conflicted.clone()),
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!("📁 {}", state.path.display());
    let Some(tree) = tree else {
        println!("   🔴 Not a git repository (run 'journalsync init')");
        return Ok(());
    };

    match &state.remote {
        Some(remote) => println!("   🔗 {}: {}", remote.name, remote.url),
        None => println!("   🔗 No remote configured"),
    }
    if let Some(branch) = &tree.branch {
        println!("   🌿 Branch: {}", branch);
    }
    if tree.upstream.is_some() {
        println!("   ⬆️  Ahead: {}  ⬇️  Behind: {}", tree.ahead, tree.behind);
    }
    if !tree.conflicted.is_empty() {
        println!("   ⚠️  Conflicts: {}", tree.conflicted.join(", "));
    }

    let changed = tree.changed_paths();
    if changed.is_empty() {
        println!("   ✅ Working tree clean");
    } else {
        println!("   📝 {} uncommitted change(s):", changed.len());
        for path in changed.iter().take(20) {
            println!("      {}", path);
        }
        if changed.len() > 20 {
            println!("      ... and {} more", changed.len() - 20);
        }
    }
    Ok(())
}

fn cmd_config(service: &SyncService, command: ConfigCommands, json: bool) -> Result<()> {
    match command {
        ConfigCommands::Show => {
            let sync = service.get_sync_config();
            if json {
                println!("{}", serde_json::to_string_pretty(&sync)?);
            } else {
                println!("⚙️  Sync configuration");
                println!("   Enabled: {}", sync.enabled);
                println!("   Auto-commit: {}", sync.auto_commit);
                println!("   Auto-push: {}", sync.auto_push);
                println!("   Interval: {}", format_duration(sync.commit_interval));
            }
        }
        ConfigCommands::Set {
            enabled,
            auto_commit,
            auto_push,
            interval,
        } => {
            let mut sync = service.get_sync_config();
            if let Some(enabled) = enabled {
                sync.enabled = enabled;
            }
            if let Some(auto_commit) = auto_commit {
                sync.auto_commit = auto_commit;
            }
            if let Some(auto_push) = auto_push {
                sync.auto_push = auto_push;
            }
            if let Some(interval) = interval {
                sync.commit_interval = parse_duration(&interval)
                    .with_context(|| format!("Invalid interval: {}", interval))?;
            }
            service.set_sync_config(sync)?;
            println!("✅ Sync configuration saved");
        }
    }
    Ok(())
}

async fn cmd_check_tool(service: &SyncService, json: bool) -> Result<()> {
    let installed = service.check_tool_installed().await;
    if json {
        println!("{}", serde_json::json!({ "installed": installed }));
    } else if installed {
        println!("✅ git is installed");
    } else {
        println!("❌ git is not installed or not on PATH");
    }
    Ok(())
}

async fn cmd_data_dir(service: &SyncService, json: bool) -> Result<()> {
    let path = service.current_data_directory().await;
    if json {
        println!("{}", serde_json::json!({ "path": path }));
    } else {
        println!("{}", path.display());
    }
    Ok(())
}

async fn cmd_migrate(service: &SyncService, target: PathBuf, validate_only: bool, force: bool) -> Result<()> {
    if validate_only {
        service.validate_migration_target(&target).await?;
        println!("✅ {} is a valid migration target", target.display());
        return Ok(());
    }

    let source = service.current_data_directory().await;
    println!("🚚 Migrating {} -> {}", source.display(), target.display());
    service.migrate_to_directory(&target, force).await?;

    println!("✅ Data directory is now {}", service.current_data_directory().await.display());
    println!("   The previous directory was left in place: {}", source.display());
    Ok(())
}

async fn cmd_reindex(service: &SyncService) -> Result<()> {
    service.reindex_database().await?;
    println!("✅ Search index rebuilt");
    Ok(())
}

async fn cmd_daemon(service: &SyncService, shutdown_wait: u64) -> Result<()> {
    let sync = service.get_sync_config();
    if !sync.enabled {
        println!("⚠️  Scheduled sync is disabled; ticks will be ignored until it is enabled");
        println!("   Enable it with 'journalsync config set --enabled true'");
    }

    service.start_scheduler();
    println!(
        "🖥️  Sync scheduler running every {} (Ctrl+C to stop)",
        format_duration(sync.commit_interval)
    );

    tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl+C")?;
    println!("🛑 Stopping...");

    if !service.shutdown(Some(Duration::from_secs(shutdown_wait))).await {
        println!("⚠️  A sync pass was still running after {}s", shutdown_wait);
    }

    let status = service.scheduler_status();
    println!("📊 Scheduler statistics:");
    println!("   Passes: {}", status.passes_run);
    println!("   Skipped (busy): {}", status.ticks_skipped);
    if let Some(last) = status.last_status {
        println!("   Last status: {}", last);
    }
    if let Some(error) = &status.last_error {
        println!("   Last error: {}", error);
    }
    Ok(())
}

async fn cmd_doctor(service: &SyncService) -> Result<()> {
    let health = service.health().await;
    print_health_report(&health);
    if !health.all_passed() {
        std::process::exit(1);
    }
    Ok(())
}

async fn cmd_history(service: &SyncService, limit: usize, json: bool) -> Result<()> {
    let events = service.history(limit).await?;

    if json {
        let values: Vec<_> = events
            .iter()
            .map(|event| {
                serde_json::json!({
                    "id": event.id,
                    "timestamp": event.timestamp.to_rfc3339(),
                    "operation": event.operation.as_str(),
                    "trigger": event.trigger,
                    "status": event.status,
                    "error_code": event.error_code,
                    "summary": event.summary,
                    "files_changed": event.files_changed,
                    "data_directory": event.data_directory,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&values)?);
        return Ok(());
    }

    if events.is_empty() {
        println!("No sync history recorded");
        return Ok(());
    }

    for event in events {
        let local = event.timestamp.with_timezone(&chrono::Local);
        println!(
            "{} {} {:<9} {}",
            local.format("%Y-%m-%d %H:%M:%S"),
            level_icon(event.level()),
            event.operation.as_str(),
            event.summary
        );
    }
    Ok(())
}

fn level_icon(level: NoticeLevel) -> &'static str {
    match level {
        NoticeLevel::Success => "✅",
        NoticeLevel::Error => "❌",
        NoticeLevel::Info => "ℹ️ ",
    }
}

/// Print health check report to stdout
fn print_health_report(health: &HealthCheck) {
    use journalsync::health::CheckResult;

    fn print_check(name: &str, result: &CheckResult) {
        println!("{}:", name);
        let icon = if result.passed {
            if result.is_warning { "⚠️ " } else { "✅" }
        } else {
            "❌"
        };
        println!("  {} {}", icon, result.message);
        if let Some(details) = &result.details {
            for line in details.lines() {
                println!("     {}", line);
            }
        }
    }

    println!("🔍 journalsync System Diagnostics");
    println!();

    for (name, result) in health.all_checks() {
        print_check(name, result);
        println!();
    }

    if health.all_passed() {
        println!("✅ All checks passed");
    } else {
        println!("❌ Some checks failed");
    }
}
