mod cli;

use std::fs::File;
use std::io::Write;
use std::time::Duration;

use clap::Parser;
use thiserror::Error;
use tokio::time::timeout;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use cli::{Cli, Command, ShowArgs};
use hisame::catalog::{CatalogClient, CatalogError, TranslationType};
use hisame::config::{Config, LoggingConfig};
use hisame::doctor;
use hisame::episodes::{EpisodeRecord, EpisodeResolver, Resolution, ResolveError};
use hisame::player::{PlaybackController, PlaybackError, PlaybackEvent, PlayerSettings};
use hisame::sources::{SourceError, SourceResolver};

const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(30);
const PLAY_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Error, Debug)]
enum AppError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error(transparent)]
    Sources(#[from] SourceError),
    #[error(transparent)]
    Playback(#[from] PlaybackError),
    #[error("{0} timed out")]
    Timeout(&'static str),
    #[error("episode {0} not found")]
    EpisodeNotFound(u32),
    #[error("player error: {0}")]
    Player(String),
    #[error("some checks failed")]
    ChecksFailed,
}

fn init_logging(config: &LoggingConfig) {
    let log_file = config.file_path().and_then(|path| {
        if let Some(dir) = path.parent() {
            let _ = std::fs::create_dir_all(dir);
        }
        File::create(path).ok()
    });

    if let Some(file) = log_file {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| EnvFilter::new(&config.level)),
            )
            .with_target(false)
            .with_ansi(false)
            .with_writer(file)
            .init();
    } else {
        // Fallback to stderr if can't create log file
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
            )
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config: {}", e);
            if let Ok(path) = Config::config_path() {
                eprintln!("Config file: {}", path.display());
            }
            std::process::exit(1);
        }
    };

    init_logging(&config.logging);

    let translation = cli.translation.unwrap_or(config.player.translation);
    info!(%translation, command = ?cli.command, "starting");

    if let Err(e) = run(cli.command, &config, translation).await {
        error!(error = %e, "command failed");
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run(command: Command, config: &Config, translation: TranslationType) -> Result<(), AppError> {
    match command {
        Command::Episodes { show } => {
            let (_, resolution) = resolve(config, translation, &show).await?;
            print_episodes(&resolution);
            Ok(())
        }
        Command::Sources { show, episode } => {
            let (client, resolution) = resolve(config, translation, &show).await?;
            let record = find_episode(&resolution, episode)?;
            let sources = SourceResolver::new(client, translation);

            let candidates = timeout(DISCOVERY_TIMEOUT, sources.get_sources(record))
                .await
                .map_err(|_| AppError::Timeout("source listing"))??;

            println!("{}", record.display_title());
            for candidate in candidates {
                println!(
                    "  {:>6.2}  {:<12} {}",
                    candidate.priority, candidate.source_name, candidate.kind
                );
            }
            Ok(())
        }
        Command::Play { show, episode } => {
            let (client, resolution) = resolve(config, translation, &show).await?;
            let record = find_episode(&resolution, episode)?;
            let sources = SourceResolver::new(client, translation);
            play(config, &sources, record).await
        }
        Command::Doctor => {
            let results = doctor::run_checks(config).await;
            doctor::print_results(&results);
            if doctor::all_passed(&results) {
                Ok(())
            } else {
                Err(AppError::ChecksFailed)
            }
        }
    }
}

async fn resolve(
    config: &Config,
    translation: TranslationType,
    show: &ShowArgs,
) -> Result<(CatalogClient, Resolution), AppError> {
    let client = CatalogClient::new(&config.catalog)?;
    let resolver = EpisodeResolver::new(client.clone(), translation);

    let resolution = timeout(DISCOVERY_TIMEOUT, resolver.resolve(&show.to_query()))
        .await
        .map_err(|_| AppError::Timeout("episode discovery"))??;

    Ok((client, resolution))
}

fn find_episode(resolution: &Resolution, overall: u32) -> Result<&EpisodeRecord, AppError> {
    resolution
        .find_overall(overall)
        .ok_or(AppError::EpisodeNotFound(overall))
}

fn print_episodes(resolution: &Resolution) {
    for show in &resolution.shows {
        println!(
            "{} ({} {})",
            show.name, show.season.quarter, show.season.year
        );
    }
    println!();
    for episode in &resolution.episodes {
        println!(
            "  {:>4}  {} ep {}  [{}]",
            episode.overall, episode.show_title, episode.episode_label, episode.match_type
        );
    }
}

async fn play(config: &Config, sources: &SourceResolver, episode: &EpisodeRecord) -> Result<(), AppError> {
    let mut controller = PlaybackController::new(PlayerSettings::from_config(&config.player));

    // A player that is already up is left running if this times out
    let mut events = timeout(PLAY_ATTEMPT_TIMEOUT, controller.play_episode(sources, episode))
        .await
        .map_err(|_| AppError::Timeout("playback start"))??;

    let mut outcome = Ok(());
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(PlaybackEvent::Started) => println!("Playing {}", episode.display_title()),
                Some(PlaybackEvent::Progress { percent }) => {
                    print!("\r  {:>5.1}%", percent);
                    let _ = std::io::stdout().flush();
                }
                Some(PlaybackEvent::Ended { percent }) => {
                    println!("\nFinished at {:.1}%", percent);
                    break;
                }
                Some(PlaybackEvent::Error { cause }) => {
                    println!();
                    outcome = Err(AppError::Player(cause));
                    break;
                }
                None => break,
            },
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    warn!(error = %e, "failed to listen for ctrl-c");
                }
                info!("interrupted, stopping player");
                controller.stop();
            }
        }
    }

    controller.cleanup();
    outcome
}
