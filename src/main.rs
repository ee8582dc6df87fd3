//! rust-camera command line
//!
//! Drives cameras through the simulated backend. Useful for trying out a
//! configuration file and for watching the event stream.
//!
//! ```text
//! rust-camera --config config/cameras.toml list
//! rust-camera --config config/cameras.toml expose guider --exptime 2.5 --stack 3
//! rust-camera cool SIM_0001 -- -10
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use rust_camera::camera::CameraListing;
use rust_camera::logging;
use rust_camera::simulated::SimulatedBackend;
use rust_camera::{
    AddCameraOptions, CameraBackend, CameraCollection, CameraQuery, Callback, CollectionConfig,
    ExposeOptions, ImageType, StackFunction,
};

/// Camera control from the command line
#[derive(Parser, Debug)]
#[command(name = "rust-camera")]
#[command(version, about, long_about = None)]
struct Args {
    /// Collection configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Simulated device uids. Defaults to the configured cameras.
    #[arg(long = "device")]
    devices: Vec<String>,

    /// Log level when RUST_LOG is not set
    #[arg(long)]
    log_level: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the devices reported by the backend
    List,
    /// Print a camera's status
    Status {
        /// Camera name or uid
        camera: String,
    },
    /// Take an exposure and write it to disk
    Expose {
        /// Camera name or uid
        camera: String,
        /// Exposure time in seconds
        #[arg(short, long, default_value_t = 1.0)]
        exptime: f64,
        /// bias, dark, flat or object
        #[arg(short = 't', long, default_value = "object")]
        image_type: ImageType,
        /// Number of frames to combine
        #[arg(short, long, default_value_t = 1)]
        stack: u32,
        /// median, mean, sum, min or max
        #[arg(long, default_value = "median")]
        stack_function: StackFunction,
        /// Output file. Defaults to the camera's image namer.
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Skip writing the image
        #[arg(long)]
        no_write: bool,
    },
    /// Set a temperature set point and wait for it
    Cool {
        /// Camera name or uid
        camera: String,
        /// Set point in degrees Celsius
        #[arg(allow_negative_numbers = true)]
        temperature: f64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Some(
            CollectionConfig::load_from(path)
                .with_context(|| format!("loading {}", path.display()))?,
        ),
        None => None,
    };

    let level = args
        .log_level
        .clone()
        .or_else(|| config.as_ref().map(|c| c.collection.log_level.clone()))
        .unwrap_or_else(|| "info".to_string());
    logging::init_tracing(&level, args.json)?;

    let mut devices = args.devices.clone();
    if devices.is_empty() {
        if let Some(config) = &config {
            devices.extend(config.cameras.values().map(|camera| camera.uid.clone()));
        }
    }
    if devices.is_empty() {
        devices.push("SIM_0001".to_string());
    }

    let backend = Arc::new(SimulatedBackend::new(devices));
    info!(version = %backend.version(), "Using simulated backend");

    if let Command::List = args.command {
        match backend.list_available_cameras().await? {
            CameraListing::Supported(uids) => {
                for uid in uids {
                    println!("{uid}");
                }
            }
            CameraListing::Unsupported => println!("backend cannot list cameras"),
        }
        return Ok(());
    }

    let collection = CameraCollection::new(backend, config.clone());
    let listener = collection.subscribe()?;
    listener.register_callback(Callback::sync(|event, payload| {
        info!(%event, camera = payload.get_str("name").unwrap_or("-"), "Event");
    }));

    let result = run(&collection, config.as_ref(), args.command).await;
    collection.shutdown().await?;
    result
}

async fn run(
    collection: &Arc<CameraCollection>,
    config: Option<&CollectionConfig>,
    command: Command,
) -> Result<()> {
    match command {
        Command::List => Ok(()),
        Command::Status { camera } => {
            let camera = collection
                .add_camera(query(config, &camera), AddCameraOptions::default())
                .await?;
            let status = camera.get_status(true).await;
            println!("{}", serde_json::to_string_pretty(&status)?);
            Ok(())
        }
        Command::Expose {
            camera,
            exptime,
            image_type,
            stack,
            stack_function,
            output,
            no_write,
        } => {
            let camera = collection
                .add_camera(query(config, &camera), AddCameraOptions::default())
                .await?;

            let mut options = ExposeOptions::default()
                .image_type(image_type)
                .stack(stack)
                .stack_function(stack_function)
                .write(!no_write);
            if let Some(output) = output {
                options = options.output_path(output);
            }

            let exposure = camera.expose(exptime, options).await?;
            match &exposure.path {
                Some(path) if !no_write => println!("{}", path.display()),
                _ => println!("{exposure:?}"),
            }
            Ok(())
        }
        Command::Cool {
            camera,
            temperature,
        } => {
            let camera = collection
                .add_camera(query(config, &camera), AddCameraOptions::default())
                .await?;
            let outcome = camera.set_temperature(temperature).await?;
            println!("{outcome:?}");
            Ok(())
        }
    }
}

/// Configured camera names are looked up by name, anything else is a uid.
fn query(config: Option<&CollectionConfig>, camera: &str) -> CameraQuery {
    match config.and_then(|config| config.camera_by_name(camera)) {
        Some(_) => CameraQuery::name(camera),
        None => CameraQuery::uid(camera),
    }
}
