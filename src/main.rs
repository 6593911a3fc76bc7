use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::Weekday;
use clap::{Parser, Subcommand};
use colored::Colorize;
use console::Emoji;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};
use url::Url;

use kiosk_sync::{
    ActivePlaylist, AssetStore, Clock, Config, Credential, InputHandles, LocalClock, NoopReporter,
    PassOutcome, PassReport, Playlist, ProgressEvent, ProgressReporter, RefreshOutcome,
    ReqwestClient, SchedulePoller, ScheduleResolver, SharedProgressReporter, SyncCoordinator,
    SyncInputs, SyncState, all_assets_present, resolve_active,
};

// Emoji with fallback for terminals without Unicode support
static SCREEN: Emoji<'_, '_> = Emoji("📺 ", "");
static SEARCH: Emoji<'_, '_> = Emoji("🔍 ", "[~] ");
static PLAN: Emoji<'_, '_> = Emoji("🗂️  ", "[i] ");
static DOWNLOAD: Emoji<'_, '_> = Emoji("📥 ", "[v] ");
static SUCCESS: Emoji<'_, '_> = Emoji("✅ ", "[+] ");
static FAILURE: Emoji<'_, '_> = Emoji("❌ ", "[!] ");
static TRASH: Emoji<'_, '_> = Emoji("🗑️  ", "[-] ");
static PARTY: Emoji<'_, '_> = Emoji("🎉 ", "[*] ");
static FOLDER: Emoji<'_, '_> = Emoji("📁 ", "");
static CROSS: Emoji<'_, '_> = Emoji("✗ ", "x ");

/// Keep a signage player's setup and media cache in sync with its backend
#[derive(Parser, Debug)]
#[command(name = "kiosk-sync")]
#[command(version)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short = 'C', long, env = "KIOSK_SYNC_CONFIG", default_value = "kiosk-sync.toml")]
    config: PathBuf,

    /// Device endpoint returning the assigned setup
    #[arg(long, env = "KIOSK_SYNC_ENDPOINT")]
    endpoint: Option<Url>,

    /// Directory holding cached media
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Device API key
    #[arg(long, env = "KIOSK_SYNC_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet mode - suppress progress output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a single sync pass
    Sync {
        /// Maximum number of concurrent downloads
        #[arg(short = 'c', long)]
        concurrent: Option<usize>,
    },
    /// Show the cached setup and what would play now
    Status,
    /// Keep syncing and follow the schedule until interrupted
    Run,
}

/// Progress reporter using indicatif for terminal output
struct IndicatifReporter {
    multi: MultiProgress,
    bars: Mutex<HashMap<String, ProgressBar>>,
    main_bar: ProgressBar,
}

impl IndicatifReporter {
    fn new() -> Result<Self> {
        let multi = MultiProgress::new();

        let main_style = ProgressStyle::default_bar().template("{spinner:.green} {wide_msg}")?;

        let main_bar = multi.add(ProgressBar::new_spinner());
        main_bar.set_style(main_style);
        main_bar.enable_steady_tick(Duration::from_millis(100));

        Ok(Self {
            multi,
            bars: Mutex::new(HashMap::new()),
            main_bar,
        })
    }

    fn lock_bars(&self) -> std::sync::MutexGuard<'_, HashMap<String, ProgressBar>> {
        self.bars
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn create_bar(&self, file_name: &str) -> ProgressBar {
        let bar = self.multi.add(ProgressBar::new_spinner());
        if let Ok(style) = ProgressStyle::default_spinner()
            .template(&format!("  {DOWNLOAD}{{spinner:.cyan}} {{wide_msg}}"))
        {
            bar.set_style(style);
        }
        bar.enable_steady_tick(Duration::from_millis(120));
        self.lock_bars().insert(file_name.to_string(), bar.clone());
        bar
    }

    fn take_bar(&self, file_name: &str) -> Option<ProgressBar> {
        self.lock_bars().remove(file_name)
    }
}

impl ProgressReporter for IndicatifReporter {
    fn report(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::FetchingSetup { url } => {
                self.main_bar
                    .set_message(format!("{SEARCH}Fetching setup: {}", url.cyan()));
            }

            ProgressEvent::SyncPlanReady {
                playlists,
                to_download,
                to_delete,
            } => {
                self.main_bar.set_message(format!(
                    "{PLAN}{} playlists • {} to download, {} to delete",
                    playlists.to_string().bold().green(),
                    to_download.to_string().yellow(),
                    to_delete.to_string().yellow()
                ));
            }

            ProgressEvent::DownloadStarting {
                file_name,
                index,
                total,
            } => {
                let bar = self.create_bar(&file_name);
                bar.set_message(format!(
                    "[{}/{}] {}",
                    (index + 1).to_string().cyan(),
                    total.to_string().cyan(),
                    truncate_name(&file_name, 40)
                ));
            }

            ProgressEvent::DownloadCompleted { file_name, bytes } => {
                if let Some(bar) = self.take_bar(&file_name) {
                    bar.finish_and_clear();
                }
                self.multi
                    .println(format!(
                        "  {SUCCESS}{} {}",
                        truncate_name(&file_name, 40).green(),
                        format_bytes(bytes).dimmed()
                    ))
                    .ok();
            }

            ProgressEvent::DownloadFailed { file_name, error } => {
                let message = format!(
                    "{FAILURE}{} - {}",
                    truncate_name(&file_name, 30).red(),
                    error.red()
                );
                match self.take_bar(&file_name) {
                    Some(bar) => bar.abandon_with_message(message),
                    None => {
                        self.multi.println(format!("  {message}")).ok();
                    }
                }
            }

            ProgressEvent::AssetDeleted { file_name } => {
                self.multi
                    .println(format!("  {TRASH}{}", file_name.dimmed()))
                    .ok();
            }

            ProgressEvent::PartialFilesCleanedUp { count } => {
                self.multi
                    .println(format!(
                        "  {TRASH}Removed {} interrupted download(s)",
                        count.to_string().yellow()
                    ))
                    .ok();
            }

            ProgressEvent::SyncCompleted {
                downloaded_count,
                deleted_count,
                failed_count,
            } => {
                self.main_bar.finish_and_clear();
                println!(
                    "\n{PARTY}{} {} downloaded, {} deleted, {} failed",
                    "Sync complete:".bold().green(),
                    downloaded_count.to_string().green().bold(),
                    deleted_count.to_string().yellow(),
                    if failed_count > 0 {
                        failed_count.to_string().red().bold()
                    } else {
                        failed_count.to_string().green()
                    }
                );
            }

            ProgressEvent::SyncAborted { error } => {
                self.main_bar.finish_and_clear();
                println!("\n{FAILURE}{} {}", "Sync aborted:".bold().red(), error.red());
            }
        }
    }
}

fn truncate_name(name: &str, max_len: usize) -> String {
    if name.chars().count() <= max_len {
        name.to_string()
    } else {
        let kept: String = name.chars().take(max_len.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

fn init_logging(verbose: bool, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_level(verbose))
        .with(filter)
        .init();
}

/// Config file values with command line overrides applied
fn load_config(args: &Args) -> Result<Config> {
    let mut config = Config::load(Some(&args.config))
        .with_context(|| format!("Failed to load {}", args.config.display()))?;

    if let Some(endpoint) = &args.endpoint {
        config.endpoint = Some(endpoint.clone());
    }
    if let Some(cache_dir) = &args.cache_dir {
        config.cache_dir = cache_dir.clone();
    }
    if let Some(api_key) = &args.api_key {
        config.api_key = Some(api_key.clone());
    }
    if let Command::Sync {
        concurrent: Some(concurrent),
    } = args.command
    {
        config.sync.max_concurrent = concurrent;
    }

    Ok(config)
}

fn open_store(config: &Config) -> Result<AssetStore> {
    let store = match &config.manifest_path {
        Some(manifest_path) => AssetStore::open_with_manifest(&config.cache_dir, manifest_path),
        None => AssetStore::open(&config.cache_dir),
    }
    .with_context(|| format!("Failed to open cache at {}", config.cache_dir.display()))?;

    Ok(store.with_download_timeout(config.download_timeout()))
}

/// The returned handles must outlive the coordinator's trigger watcher
fn build_coordinator(
    config: &Config,
    reporter: SharedProgressReporter,
) -> Result<(InputHandles, SyncCoordinator<ReqwestClient>)> {
    let Some(endpoint) = config.endpoint.clone() else {
        bail!("No endpoint configured; set `endpoint` in the config file or pass --endpoint");
    };
    let Some(api_key) = config.api_key.clone() else {
        bail!("No API key configured; set KIOSK_SYNC_API_KEY or pass --api-key");
    };

    let client = ReqwestClient::with_timeout(config.sync_options().request_timeout)
        .context("Failed to build HTTP client")?;
    let store = open_store(config)?;

    // The credential is fixed for the process and the network is assumed up
    let (handles, inputs) = SyncInputs::channel(Some(Credential::new(api_key)), true);
    let coordinator = SyncCoordinator::new(client, store, endpoint, inputs, config.sync_options())
        .with_reporter(reporter);

    Ok((handles, coordinator))
}

async fn run_sync(config: &Config, quiet: bool) -> Result<()> {
    let reporter: SharedProgressReporter = if quiet {
        NoopReporter::shared()
    } else {
        Arc::new(IndicatifReporter::new()?)
    };
    let (_handles, coordinator) = build_coordinator(config, reporter)?;

    let RefreshOutcome::Completed { report, .. } = coordinator.refresh().await else {
        bail!("Sync did not run");
    };

    if !quiet && !report.failed.is_empty() {
        println!("\n{}", "Failed items:".red().bold());
        for (file_name, error) in &report.failed {
            println!("  {}{} - {}", CROSS, file_name.yellow(), error.dimmed());
        }
    }

    if !quiet {
        println!(
            "\n{FOLDER}Cache: {}\n",
            coordinator.store().cache_dir().display().to_string().cyan()
        );
    }

    sync_result(&report, &coordinator.state())
}

/// Turn a finished pass into the command's result
fn sync_result(report: &PassReport, state: &SyncState) -> Result<()> {
    if let PassOutcome::Aborted { error, .. } = &report.outcome {
        bail!("Sync aborted: {error}");
    }
    if !state.assets_complete {
        bail!("Sync finished with assets missing from the cache");
    }

    Ok(())
}

async fn show_status(config: &Config) -> Result<()> {
    let store = open_store(config)?;
    let manifest = store
        .read_manifest()
        .await
        .context("Failed to read local manifest")?;

    println!(
        "{FOLDER}Cache: {}",
        store.cache_dir().display().to_string().cyan()
    );

    let Some(manifest) = manifest else {
        println!("{}", "No setup stored".yellow());
        return Ok(());
    };

    let cached = store
        .list_assets()
        .await
        .context("Failed to list cached assets")?;
    let complete = all_assets_present(Some(&manifest), &cached);
    println!(
        "Assets: {}",
        if complete {
            "complete".green().bold()
        } else {
            "incomplete".red().bold()
        }
    );

    let active = resolve_active(&manifest, LocalClock.now());
    for (index, playlist) in manifest.playlists.iter().enumerate() {
        let marker = if active.is_some_and(|a| std::ptr::eq(a, playlist)) {
            "▶".green().bold()
        } else {
            " ".normal()
        };
        println!(
            "\n{marker} Playlist {} {}-{} {}",
            index.to_string().bold(),
            playlist.start,
            playlist.end,
            format_days(playlist).dimmed()
        );
        for (kind, media) in playlist.media() {
            let present = cached.contains(media.file_name());
            let duration = media
                .screen_time(kind)
                .map_or_else(|| "to end".to_string(), |secs| format!("{secs}s"));
            println!(
                "    {}{:?} {} ({})",
                if present { &SUCCESS } else { &FAILURE },
                kind,
                media.file_name(),
                duration.dimmed()
            );
        }
    }

    if active.is_none() {
        println!("\n{}", "Nothing scheduled right now".yellow());
    }

    Ok(())
}

fn format_days(playlist: &Playlist) -> String {
    const DAYS: [(Weekday, &str); 7] = [
        (Weekday::Mon, "Mo"),
        (Weekday::Tue, "Tu"),
        (Weekday::Wed, "We"),
        (Weekday::Thu, "Th"),
        (Weekday::Fri, "Fr"),
        (Weekday::Sat, "Sa"),
        (Weekday::Sun, "Su"),
    ];
    DAYS.iter()
        .filter(|(day, _)| playlist.days.contains(*day))
        .map(|(_, label)| *label)
        .collect::<Vec<_>>()
        .join(",")
}

async fn run_daemon(config: &Config) -> Result<()> {
    let (_handles, coordinator) = build_coordinator(config, NoopReporter::shared())?;
    let coordinator = Arc::new(coordinator);
    coordinator.load_local().await;

    let triggers = Arc::clone(&coordinator).watch_triggers();
    let periodic = Arc::clone(&coordinator).refresh_every(config.refresh_interval());

    let resolver = ScheduleResolver::new(
        coordinator.subscribe(),
        coordinator.store().cache_dir().to_path_buf(),
    );
    let poller = SchedulePoller::new(resolver, LocalClock, config.poll_interval());
    let (tx, mut active) = watch::channel::<Option<ActivePlaylist>>(None);
    let polling = tokio::spawn(poller.run(tx));

    info!(endpoint = ?config.endpoint.as_ref().map(Url::as_str), "kiosk-sync running");

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    warn!(error = %e, "could not listen for ctrl-c");
                }
                break;
            }
            changed = active.changed() => {
                if changed.is_err() {
                    break;
                }
                match active.borrow_and_update().as_ref() {
                    Some(playlist) => println!(
                        "{SCREEN}Now playing playlist {} ({} items)",
                        playlist.index.to_string().bold().green(),
                        playlist.items.len()
                    ),
                    None => println!("{SCREEN}{}", "Nothing scheduled".yellow()),
                }
            }
        }
    }

    triggers.abort();
    periodic.abort();
    polling.abort();
    info!("kiosk-sync stopped");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    let config = load_config(&args)?;

    match args.command {
        Command::Sync { .. } => {
            if !args.quiet {
                println!(
                    "\n{}{} {}\n",
                    SCREEN,
                    "kiosk-sync".bold().magenta(),
                    "- Setup & media sync".dimmed()
                );
            }
            run_sync(&config, args.quiet).await
        }
        Command::Status => show_status(&config).await,
        Command::Run => run_daemon(&config).await,
    }
}
