//! cloudreader-sync entry point.

use clap::Parser;
use cloudreader_sync::{
    SettingsStore, SyncEngine,
    config::{Cli, Command, Config, ProgressCommand, SetCommand},
    library::Book,
    sync::{
        Host, OpenOutcome, ProgressChoice, ProgressDecision, ProgressRecord, Scheduler,
        TcpReachability,
    },
};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Host that asks on the terminal.
struct TerminalHost;

impl Host for TerminalHost {
    fn resolve_progress_conflict(
        &self,
        book_id: &str,
        local: &ProgressRecord,
        remote: &ProgressRecord,
    ) -> ProgressChoice {
        let question = format!(
            "{}: this device is at {:.1}% (page {}), another device at {:.1}% (page {}). Jump? [y/N] ",
            book_id, local.percentage, local.current_page, remote.percentage, remote.current_page
        );
        match prompt(&question) {
            Ok(answer) if answer.eq_ignore_ascii_case("y") => ProgressChoice::ApplyRemote,
            _ => ProgressChoice::KeepLocal,
        }
    }

    fn notify(&self, message: &str) {
        println!("{}", message);
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cloudreader_sync=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    // Find or load config
    let config_path = cli.config.clone().or_else(Config::find_config_file);
    let config = if let Some(ref path) = config_path {
        Config::load(path)?
    } else {
        Config::default()
    };

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run(cli.command, config, config_path))
}

/// Write a default config file. The settings database already exists by
/// the time this runs.
fn cmd_init(path: Option<PathBuf>, settings_path: &Path, force: bool) -> anyhow::Result<()> {
    let config_path = path.unwrap_or_else(|| PathBuf::from("cloudreader-sync.toml"));

    if config_path.exists() && !force {
        anyhow::bail!(
            "Config file already exists: {}. Use --force to overwrite.",
            config_path.display()
        );
    }

    if let Some(parent) = config_path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&config_path, Config::generate_default())?;
    println!("Created config file: {}", config_path.display());
    println!("Settings database:   {}", settings_path.display());

    println!("\nNext steps:");
    println!("  cloudreader-sync login <username> --server http://nas:8080");
    println!("  cloudreader-sync set library /path/to/books");
    println!("  cloudreader-sync sync --bundles");

    Ok(())
}

async fn run(
    command: Command,
    config: Config,
    config_path: Option<PathBuf>,
) -> anyhow::Result<()> {
    if let Some(parent) = config.storage.settings_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let store = SettingsStore::open(&config.storage.settings_path)?;
    let reachability =
        TcpReachability::new(Duration::from_millis(config.connectivity.timeout_ms));

    let mut engine = SyncEngine::open(config, store)?
        .with_host(Box::new(TerminalHost))
        .with_connectivity(Box::new(reachability));

    match command {
        Command::Init { force } => {
            cmd_init(config_path, &engine.config().storage.settings_path, force)?
        }

        Command::Login {
            username,
            password,
            server,
        } => {
            if let Some(url) = server {
                engine.set_server(&url)?;
            }
            let password = match password {
                Some(p) => p,
                None => prompt_password("Password: ")?,
            };
            let session = engine.login(&username, &password).await?;
            println!("Logged in as {} (id: {})", session.username, session.user_id);
        }

        Command::Register {
            username,
            password,
            server,
        } => {
            if let Some(url) = server {
                engine.set_server(&url)?;
            }
            let password = match password {
                Some(p) => p,
                None => prompt_password("Password: ")?,
            };
            let session = engine.register(&username, &password).await?;
            println!("Registered and logged in as {}", session.username);
        }

        Command::Logout => {
            engine.logout().await?;
            println!("Logged out.");
        }

        Command::Status => cmd_status(&engine),

        Command::Set { setting } => match setting {
            SetCommand::Server { url } => {
                engine.set_server(&url)?;
                println!("Server set to {}. Log in again.", url);
            }
            SetCommand::Library { path } => {
                let path = std::path::absolute(&path)?;
                engine.set_library_dir(&path)?;
                println!("Library directory set to {}", path.display());
            }
            SetCommand::AutoSync { enabled } => {
                engine.set_auto_sync(enabled)?;
                println!("Auto-sync {}", if enabled { "enabled" } else { "disabled" });
            }
        },

        Command::Sync { full, bundles } => {
            let report = if full {
                engine.sync_library().await?
            } else {
                match engine.auto_sync().await? {
                    Some(report) => report,
                    None => anyhow::bail!("Server unreachable"),
                }
            };
            println!(
                "Library: {} created, {} skipped, {} errors",
                report.created, report.skipped, report.errors
            );

            if bundles {
                print_bundle_report(&engine).await?;
            }
        }

        Command::SyncBundles => print_bundle_report(&engine).await?,

        Command::Open { path } => {
            let path = std::path::absolute(&path)?;
            match engine.on_before_open(&path).await? {
                OpenOutcome::NotPlaceholder => println!("{} is ready.", path.display()),
                OpenOutcome::Materialized { book_id, bytes } => {
                    println!("Downloaded {} ({} bytes) to {}", book_id, bytes, path.display())
                }
                OpenOutcome::Offline { book_id } => {
                    anyhow::bail!("{} is a placeholder and the server is unreachable", book_id)
                }
            }
        }

        Command::Progress { action } => cmd_progress(&engine, action).await?,

        Command::Daemon => {
            let mut scheduler = Scheduler::new(engine.config().sync.interval());
            scheduler.refresh(&engine);
            if !scheduler.is_armed() {
                anyhow::bail!("Auto-sync needs a server, a session and `set auto-sync true`");
            }

            tracing::info!(
                interval_secs = engine.config().sync.interval_seconds,
                "Starting auto-sync"
            );
            let shutdown = async {
                let _ = tokio::signal::ctrl_c().await;
            };
            scheduler.run(&mut engine, shutdown).await;
        }
    }

    Ok(())
}

fn cmd_status(engine: &SyncEngine) {
    let settings = engine.settings();
    println!(
        "Server:      {}",
        settings.server_url.as_deref().unwrap_or("(not set)")
    );
    match engine.session() {
        Some(session) => println!("Session:     {} ({})", session.username, session.user_id),
        None => println!("Session:     (logged out)"),
    }
    println!(
        "Library:     {}",
        settings
            .library_dir
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(not set)".to_string())
    );
    println!("Auto-sync:   {}", if settings.auto_sync { "on" } else { "off" });
    println!("Device:      {}", settings.device_id);
    println!("Books:       {}", engine.index().len());

    let books: Vec<&Book> = engine.index().iter().take(20).collect();
    if !books.is_empty() {
        println!("\n{:<36} {:<30} AUTHORS", "ID", "TITLE");
        println!("{}", "-".repeat(80));
        for book in books {
            println!("{:<36} {:<30} {}", book.id, book.title, book.authors_display());
        }
    }
}

async fn print_bundle_report(engine: &SyncEngine) -> anyhow::Result<()> {
    let report = engine.sync_all_bundles().await?;
    println!(
        "Bundles: {} uploaded, {} downloaded, {} unchanged, {} skipped, {} errors",
        report.uploaded, report.downloaded, report.unchanged, report.skipped, report.errors
    );
    Ok(())
}

async fn cmd_progress(engine: &SyncEngine, action: ProgressCommand) -> anyhow::Result<()> {
    match action {
        ProgressCommand::Push {
            book_id,
            page,
            total,
        } => {
            let record = ProgressRecord::from_pages(page, total);
            engine.push_progress(&book_id, &record).await?;
            println!(
                "Pushed {}: page {}/{} ({:.1}%)",
                book_id, record.current_page, record.total_pages, record.percentage
            );
        }

        ProgressCommand::Pull {
            book_id,
            page,
            total,
        } => {
            let Some(remote) = engine.pull_progress(&book_id).await? else {
                println!("No progress stored for {}", book_id);
                return Ok(());
            };

            let updated = remote
                .device_id
                .as_deref()
                .map(|d| format!(" from device {}", d))
                .unwrap_or_default();
            println!(
                "Server: page {}/{} ({:.1}%, {:?}){}",
                remote.current_page, remote.total_pages, remote.percentage, remote.status, updated
            );

            if let (Some(page), Some(total)) = (page, total) {
                let local = ProgressRecord::from_pages(page, total);
                match engine.reconcile_progress(&local, &remote) {
                    ProgressDecision::InSync => println!("In sync with this device."),
                    ProgressDecision::Diverged { delta } => {
                        println!("Differs by {:.1}% from this device.", delta)
                    }
                }
            }
        }
    }

    Ok(())
}

fn prompt(message: &str) -> io::Result<String> {
    print!("{}", message);
    io::stdout().flush()?;

    let mut line = String::new();
    io::stdin().read_line(&mut line)?;

    Ok(line.trim().to_string())
}

/// Prompt for password input.
fn prompt_password(message: &str) -> anyhow::Result<String> {
    Ok(prompt(message)?)
}
