// ============================================================================
// main.rs — Heatmask
// Entry point. Initializes logging and runs the headless pipeline.
// Usage: heatmask [config.json]
// ============================================================================

use std::path::Path;

use heatmask::headless::run_headless;
use heatmask::{HeatmaskConfig, HeatmaskError};

fn load_config() -> Result<HeatmaskConfig, HeatmaskError> {
    match std::env::args().nth(1) {
        Some(path) => HeatmaskConfig::load(Path::new(&path)),
        None => {
            log::info!("No config given; using defaults");
            Ok(HeatmaskConfig::default())
        }
    }
}

fn main() {
    env_logger::init();
    log::info!("Heatmask starting up");

    if let Err(e) = load_config().and_then(|config| run_headless(&config)) {
        log::error!("Fatal error: {e}");
        std::process::exit(1);
    }
}
