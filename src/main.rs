use clap::Parser;
use moodsync::app::{open_camera, Controller};
use moodsync::cli::{self, Cli};
use moodsync::config::AppConfig;
use moodsync::emotion::OnnxDetector;
use moodsync::error::{MoodSyncError, Result};
use moodsync::ui::MoodSyncApp;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initializes logging to `log_file`, and to stderr as well when `console` is set
fn init_logging(log_file: &Path, console: bool) -> Result<()> {
    let log_file = std::fs::File::create(log_file).map_err(MoodSyncError::Io)?;

    let file_layer = fmt::layer()
        .with_writer(Arc::new(log_file))
        .with_ansi(false);
    let console_layer = console.then(|| fmt::layer().with_writer(std::io::stderr));
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(console_layer)
        .init();

    Ok(())
}

fn main() -> Result<()> {
    let args = Cli::parse();
    let (config, origin) = AppConfig::load(&args.config)?;
    let log_file = args.log_file.clone().unwrap_or_else(|| config.log_file.clone());
    init_logging(&log_file, args.command.is_some())?;
    origin.log(&args.config);
    let config = args.apply(config)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    if let Some(command) = args.command {
        return runtime.block_on(cli::run(command, &config));
    }

    let detector = OnnxDetector::new(
        config.models.face_cascade.clone(),
        config.models.emotion_model.clone(),
    );
    let mut controller = runtime.block_on(Controller::from_config(&config, Box::new(detector)))?;

    let camera = match open_camera(&config.capture) {
        Ok(camera) => {
            controller.camera_ready();
            Some(camera)
        }
        Err(e) => {
            error!("Camera initialization failed: {}", e);
            controller.camera_unavailable(&e);
            None
        }
    };

    info!("Starting desktop UI");
    let result = eframe::run_native(
        "MoodSync",
        eframe::NativeOptions {
            viewport: egui::ViewportBuilder::default()
                .with_inner_size([1280.0, 960.0])
                .with_title("MoodSync"),
            ..Default::default()
        },
        Box::new(move |_cc| Ok(Box::new(MoodSyncApp::new(controller, camera)))),
    );

    if let Err(e) = result {
        error!("Application error: {}", e);
    }

    Ok(())
}
