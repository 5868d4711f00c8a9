use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_wars::config::DispatcherConfig;
use async_wars::downloader::{ImageSource, SimulatedDownloader};
use async_wars::platform::Platform;
use async_wars::screen::{Screen, UiState};
use async_wars::strategy::ExecutionStrategy;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(
    name = "async-wars",
    version,
    about = "Run a blocking download through one of several execution strategies"
)]
struct Cli {
    /// Execution strategy, e.g. direct-thread, shared-pool, coroutine, blocking
    #[arg(long, default_value = "direct-thread")]
    strategy: ExecutionStrategy,

    /// Number of times to press the download button
    #[arg(long, default_value_t = 1)]
    clicks: usize,

    /// Simulated download latency
    #[arg(long, default_value = "300ms")]
    latency: humantime::Duration,

    /// Make every download come back empty
    #[arg(long)]
    fail: bool,

    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print the final screen state as JSON
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "async_wars=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = DispatcherConfig::load(cli.config.as_deref()).context("loading configuration")?;
    let platform = Arc::new(Platform::start(config).context("starting platform")?);

    let latency: Duration = cli.latency.into();
    let source: Arc<dyn ImageSource> = if cli.fail {
        Arc::new(SimulatedDownloader::failing(latency))
    } else {
        Arc::new(SimulatedDownloader::new(latency))
    };

    let mut screen = Screen::create(Arc::clone(&platform), cli.strategy, source);
    screen.on_start();
    for _ in 0..cli.clicks {
        screen.on_click().context("dispatching download")?;
    }

    let expected = if cli.strategy == ExecutionStrategy::Blocking {
        0
    } else {
        cli.clicks
    };
    let deadline = Instant::now() + latency * (cli.clicks as u32 + 1) + Duration::from_secs(5);
    let state = wait_for_deliveries(&screen, expected, deadline)?;

    screen.on_stop();
    screen.destroy();

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&state)?);
    } else {
        print_summary(&state);
    }
    Ok(())
}

fn wait_for_deliveries(screen: &Screen, expected: usize, deadline: Instant) -> Result<UiState> {
    loop {
        let state = screen.snapshot().context("reading screen state")?;
        if state.deliveries >= expected {
            return Ok(state);
        }
        if Instant::now() >= deadline {
            tracing::warn!(
                delivered = state.deliveries,
                expected,
                "timed out waiting for results"
            );
            return Ok(state);
        }
        thread::sleep(Duration::from_millis(10));
    }
}

fn print_summary(state: &UiState) {
    println!("{}", state.status_text);
    match &state.image {
        Some(image) => println!("Image: {} ({} bytes)", image.id, image.data.len()),
        None => println!("Image: none"),
    }
    if let Some(toast) = &state.toast {
        println!("{toast}");
    }
    println!("Deliveries: {}", state.deliveries);
}
