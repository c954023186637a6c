use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use imageboard_api::Client;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use thread_locator::cli::{Args, Commands, WatchArgs};
use thread_locator::config::LocatorConfig;
use thread_locator::logging::{Verbosity, init_logging};
use thread_locator::monitor::MonitorEvent;
use thread_locator::notification::{BrowserNavigator, NavigationTarget, Navigator, PrintNavigator};
use thread_locator::orchestrator::{EngineOutcome, EngineSettings, Orchestrator};
use thread_locator::page::ApiThreadPage;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(Verbosity::from_flags(args.verbose, args.quiet), args.json)?;

    let config =
        LocatorConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    match args.command {
        Commands::Config { show } => show_config(&config, args.config, show),
        Commands::Watch(watch) => watch_thread(config, watch).await,
    }
}

fn show_config(
    config: &LocatorConfig,
    path: Option<std::path::PathBuf>,
    show: bool,
) -> anyhow::Result<()> {
    if show {
        print!("{}", config.to_toml()?);
        return Ok(());
    }

    match path.or_else(LocatorConfig::default_path) {
        Some(path) => println!("{}", path.display()),
        None => println!("No configuration directory on this platform"),
    }
    Ok(())
}

async fn watch_thread(mut config: LocatorConfig, watch: WatchArgs) -> anyhow::Result<()> {
    watch.apply(&mut config);
    let (board, thread_id) = watch.target(&config.board)?;
    config.board = board;
    config.validate()?;

    let client = Client::builder(&config.board)
        .api_base(&config.api_base)
        .timeout(config.request_timeout())
        .build()
        .context("Failed to build API client")?;
    let settings = EngineSettings::from_config(&config)?;

    let page = Arc::new(ApiThreadPage::new(
        client.clone(),
        thread_id,
        settings.monitor.keywords.clone(),
        config.marker_md5.clone(),
        config.page_refresh_interval(),
    ));

    let target = NavigationTarget::new(&config.site_base, &config.board);
    let navigator: Arc<dyn Navigator> = if watch.dry_run {
        Arc::new(PrintNavigator::new(target))
    } else {
        Arc::new(BrowserNavigator::new(
            target,
            config.new_thread_auto_open,
            config.new_thread_open_in_new_tab,
        ))
    };
    debug!(navigator = navigator.navigator_type(), "Navigator ready");

    let token = CancellationToken::new();
    tokio::spawn({
        let token = token.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupted, shutting down");
                token.cancel();
            }
        }
    });

    let orchestrator = Orchestrator::new(page, Arc::new(client), navigator, settings, token);
    spawn_event_logger(orchestrator.events().subscribe());

    info!(board = %config.board, thread = %thread_id, "Starting thread locator");
    let outcome = orchestrator
        .run()
        .await
        .with_context(|| format!("Failed to read /{}/ thread {}", config.board, thread_id))?;

    match outcome {
        EngineOutcome::Inactive => {
            warn!("Thread {} is not a tracked general, exiting", thread_id)
        }
        EngineOutcome::Found(id) => info!("Successor of {} is {}", thread_id, id),
        EngineOutcome::FeedClosed => {
            warn!("Thread {} is gone and no successor was found", thread_id)
        }
        EngineOutcome::Cancelled => info!("Stopped"),
    }
    Ok(())
}

/// Surface monitor progress in the log.
fn spawn_event_logger(mut events: broadcast::Receiver<MonitorEvent>) {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event @ MonitorEvent::Retrying { .. }) => debug!("{}", event.description()),
                Ok(event) => info!("{}", event.description()),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Monitor event log fell behind"),
                Err(RecvError::Closed) => break,
            }
        }
    });
}
