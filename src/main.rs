use pianoscope::{Config, DEFAULT_CONFIG_FILE, PianoscopeApp, Session};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

    let config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("{}: {e}; using defaults", config_path.display());
            Config::default()
        }
    };

    let session = Session::new(config);

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1200.0, 800.0])
            .with_title("Pianoscope"),
        ..Default::default()
    };

    if let Err(e) = eframe::run_native(
        "Pianoscope",
        options,
        Box::new(|_cc| Ok(Box::new(PianoscopeApp::new(session)))),
    ) {
        tracing::error!("window closed with an error: {e}");
    }
}
