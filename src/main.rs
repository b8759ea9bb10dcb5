use std::{path::PathBuf, process::ExitCode, sync::Arc};

use structopt::StructOpt;
use tokio::sync::watch;
use tracing::{error, info, info_span, trace, warn, Instrument};

#[macro_use]
extern crate quick_error;

mod camera;
mod config;
mod hub;
mod impulse;
mod pipeline;

use camera::{CameraError, FrameSource, Overlay, ReplaySource};
use config::{Config, ConfigCamera, ConfigError};
use hub::{ConnectionString, HubError, HubMessenger};
use impulse::{ImpulseRunner, RunnerError};
use pipeline::{PipelineError, PipelineSettings, RunOutcome, Session, Startup};

#[derive(Debug, StructOpt)]
#[structopt(
    name = "lugnut_sentry",
    about = "Counts lug nuts on camera frames and alerts an Azure IoT hub when some are missing."
)]
struct CliArgs {
    #[structopt(parse(from_os_str), help = "Path to the .eim model file")]
    model: PathBuf,
    #[structopt(
        short = "c",
        long = "count-target",
        default_value = "6",
        help = "Number of lug nuts a wheel must have"
    )]
    count_target: u32,
    #[structopt(
        short = "s",
        long = "connection-string",
        env = "IOTHUB_DEVICE_CONNECTION_STRING",
        hide_env_values = true,
        help = "Azure IoT hub device connection string"
    )]
    connection_string: Option<String>,
    #[structopt(
        short = "p",
        long = "camera-port",
        help = "Camera index to use instead of probing"
    )]
    camera_port: Option<u32>,
    #[structopt(
        short = "d",
        long = "display-camera",
        help = "Write every processed frame with its boxes to the preview file"
    )]
    display_camera: bool,
    #[structopt(
        parse(from_os_str),
        long = "config",
        default_value = "lugnut.toml",
        help = "Path to the settings file",
        env = "LUGNUT_CONFIG"
    )]
    config: PathBuf,
    #[structopt(
        parse(from_os_str),
        long = "replay",
        conflicts_with = "camera_port",
        help = "Read frames from a directory of images instead of a camera"
    )]
    replay: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = CliArgs::from_args();
    let cfg = match config::load_config(&args.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let filter = tracing_subscriber::EnvFilter::new(&cfg.system.log_level);
    let stdout_subscriber = tracing_subscriber::fmt()
        // Filter from user
        .with_env_filter(filter)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(stdout_subscriber) {
        eprintln!("Unable to install logger: {}", e);
    }

    info!("Lug nut sentry starting");
    trace!("Config: {:?}", cfg);

    match run(args, cfg).await {
        Ok(RunOutcome::Cancelled) => {
            info!("Interrupted, exiting");
            ExitCode::SUCCESS
        }
        Ok(RunOutcome::SourceExhausted) => {
            info!("All frames processed, exiting");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

/// Listens for interrupts before anything is acquired, so an interrupt during startup
/// releases what is held and exits cleanly.
async fn run(args: CliArgs, cfg: Config) -> Result<RunOutcome, AppError> {
    let credential = config::require_credential(args.connection_string.clone())?;
    let connection: ConnectionString = credential.parse()?;
    let wait = cfg.pipeline.disconnect_timeout();

    let (cancel_tx, mut cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupt received, shutting down");
                let _ = cancel_tx.send(true);
            }
            Err(e) => warn!("Unable to listen for interrupts: {}", e),
        }
    });

    let (hub_cfg, model_path, runner_cfg) = (&cfg.hub, &args.model, &cfg.runner);
    let (connection, opts, settings_file) = (&connection, &args, &cfg);
    let startup = pipeline::acquire(
        &mut cancel_rx,
        wait,
        move || async move {
            let messenger = HubMessenger::connect(connection, hub_cfg).await?;
            Ok::<_, AppError>(Arc::new(messenger))
        },
        move || async move {
            let (runner, model) = ImpulseRunner::start(model_path, runner_cfg).await?;
            info!(
                "Loaded runner for \"{} / {}\"",
                model.project.owner, model.project.name
            );
            info!("Labels: {:?}", model.labels());
            Ok::<_, AppError>((runner, model.labels().to_vec()))
        },
        move |labels| async move { validate_and_open(opts, settings_file, &labels).await },
    )
    .await?;
    let (messenger, runner, source) = match startup {
        Startup::Ready {
            messenger,
            detector,
            source,
        } => (messenger, detector, source),
        Startup::Cancelled => return Ok(RunOutcome::Cancelled),
    };

    let settings = PipelineSettings {
        labels: cfg.labels.clone(),
        required_count: args.count_target,
        frame_period: cfg.pipeline.frame_period(),
        send_timeout: cfg.pipeline.send_timeout(),
        disconnect_timeout: wait,
        preview: args
            .display_camera
            .then(|| Overlay::new(&cfg.display.preview_path)),
    };

    let session = Session::new(source, runner, messenger, settings);
    let outcome = session
        .run(cancel_rx)
        .instrument(info_span!("pipeline", required = args.count_target))
        .await?;
    Ok(outcome)
}

async fn validate_and_open(
    args: &CliArgs,
    cfg: &Config,
    labels: &[String],
) -> Result<Box<dyn FrameSource>, AppError> {
    cfg.labels.validate(labels)?;
    let source: Box<dyn FrameSource> = match &args.replay {
        Some(dir) => Box::new(ReplaySource::open(dir)?),
        None => open_camera(args.camera_port, &cfg.camera).await?,
    };
    Ok(source)
}

#[cfg(feature = "camera-v4l2")]
async fn open_camera(
    port: Option<u32>,
    cfg: &ConfigCamera,
) -> Result<Box<dyn FrameSource>, CameraError> {
    use camera::{select_camera, v4l2::V4lCameras, CameraProvider};

    let cameras = V4lCameras::new(cfg);
    let port = select_camera(&cameras, port, cfg.probe_ports).await?;
    Ok(Box::new(cameras.open(port).await?))
}

#[cfg(not(feature = "camera-v4l2"))]
async fn open_camera(
    _port: Option<u32>,
    _cfg: &ConfigCamera,
) -> Result<Box<dyn FrameSource>, CameraError> {
    Err(CameraError::Unsupported(
        "built without the camera-v4l2 feature, use --replay".into(),
    ))
}

quick_error! {
    #[derive(Debug)]
    enum AppError {
        Config(error: ConfigError) {
            display("{}", error)
            from()
            source(error)
        }
        Hub(error: HubError) {
            display("{}", error)
            from()
            source(error)
        }
        Runner(error: RunnerError) {
            display("Failed to load model: {}", error)
            from()
            source(error)
        }
        Camera(error: CameraError) {
            display("{}", error)
            from()
            source(error)
        }
        Pipeline(error: PipelineError) {
            display("{}", error)
            from()
            source(error)
        }
    }
}
