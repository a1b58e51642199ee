mod config;
mod db_manager;
mod errors;
mod metadata;
mod player_registry;
mod player_watcher;
mod protocol;
mod session_bus;

use std::path::PathBuf;

use clap::Parser;
use db_manager::DbManager;
use log::info;
use player_registry::PlayerRegistry;
use player_watcher::PlayerWatcher;
use session_bus::SessionBus;

/// Logs the tracks played by media players on the session bus.
#[derive(Debug, Parser)]
#[command(name = "music-watcher", version)]
struct Args {
    /// The location of the database file.
    #[arg(long, value_name = "PATH")]
    dbpath: Option<PathBuf>,
    /// Configuration file to use instead of the default one.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Log debug output regardless of the configured level.
    #[arg(long)]
    verbose: bool,
    /// Print the most recent plays and exit.
    #[arg(long, value_name = "COUNT")]
    history: Option<usize>,
}

fn print_history(db: &DbManager, count: usize) -> Result<(), rusqlite::Error> {
    for record in db.play_history(count)? {
        let album = record.album.as_deref().unwrap_or("-");
        let people = if record.people.is_empty() {
            "-".to_string()
        } else {
            record.people.join(", ")
        };
        println!(
            "{}  {}  [{}]  {}  {}",
            record.played_at, record.title, album, people, record.url
        );
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut clog = colog::default_builder();
    clog.filter(None, log::LevelFilter::Trace);
    clog.init();
    log::set_max_level(log::LevelFilter::Info);

    std::panic::set_hook(Box::new(|panic_info| {
        let current_thread = std::thread::current();
        let thread_name = current_thread.name().unwrap_or("unnamed");
        log::error!("panic in thread '{}': {}", thread_name, panic_info);
    }));

    let config_path = args
        .config
        .clone()
        .or_else(config::default_config_path)
        .ok_or("could not determine the config directory")?;
    let config = config::load_or_create(&config_path)?;
    log::set_max_level(if args.verbose {
        log::LevelFilter::Debug
    } else {
        config.logging.level.level_filter()
    });

    let db_path = args
        .dbpath
        .clone()
        .or_else(|| config.database.path.clone())
        .or_else(config::default_database_path)
        .ok_or("could not determine the data directory")?;
    let mut db = DbManager::open(&db_path)?;

    if let Some(count) = args.history {
        print_history(&db, count)?;
        return Ok(());
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async {
        let bus = SessionBus::connect().await?;
        let registry = PlayerRegistry::new(config.watcher.filtered_players.clone());
        let mut watcher = PlayerWatcher::new(bus, registry);
        watcher
            .run(|track| db.store_play(track).map(|_| ()))
            .await
    })?;

    info!("music-watcher stopped");
    Ok(())
}
