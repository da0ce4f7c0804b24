//! Flower Classifier
//!
//! Loads the flower model once, then classifies each image path given on the
//! command line. Every status transition is printed as one JSON line for the
//! front end to render.

use anyhow::Result;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use floraid::config::Config;
use floraid::engine::{OpenVinoLoader, RawImage};
use floraid::service::{Application, Status};

fn emit(status: &Status) {
    match serde_json::to_string(status) {
        Ok(line) => println!("{}", line),
        Err(e) => warn!("Failed to serialize status: {}", e),
    }
}

/// Print every transition published since the last call
fn drain(events: &mut broadcast::Receiver<Status>) {
    loop {
        match events.try_recv() {
            Ok(status) => emit(&status),
            Err(TryRecvError::Lagged(skipped)) => warn!("Dropped {} status updates", skipped),
            Err(_) => break,
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Initialize logging
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    info!("Starting Flower Classifier v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = Config::load(Config::default_path()).unwrap_or_else(|e| {
        info!("Using default config ({})", e);
        Config::default()
    });

    info!("Configuration loaded:");
    info!("  Model: {}", config.model.manifest.display());
    info!("  Device: {}", config.model.device);
    info!("  Input: {}x{}", config.input.width, config.input.height);
    info!("  Classes: {}", config.classes.iter().collect::<Vec<_>>().join(", "));

    let loader = OpenVinoLoader::from_config(&config.model);
    let app = Application::new(config);
    let mut events = app.subscribe();
    emit(&app.status());

    // The session stays up without a model; each image then reports it
    if let Err(e) = app.load_model(loader).await {
        warn!("Continuing without a model ({}): {}", e.kind().as_str(), e);
    }
    drain(&mut events);

    for path in std::env::args().skip(1) {
        let image = match RawImage::open(&path) {
            Ok(image) => Some(image),
            Err(e) => {
                warn!("Could not read {}: {:#}", path, e);
                None
            }
        };

        app.select_image(image.as_ref());
        match app.classify(image.as_ref()) {
            Ok(result) => info!("{}: {} ({:.2}%)", path, result.label, result.confidence),
            Err(e) => warn!("{}: not classified ({})", path, e.kind().as_str()),
        }
        drain(&mut events);
    }

    let ledger = app.ledger().snapshot();
    info!(
        "Done: {} tensors allocated, {} released, {} live",
        ledger.allocated, ledger.released, ledger.live
    );
    Ok(())
}
