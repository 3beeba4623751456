//! Holoframe - Command line front end
//!
//! Lists lightfield displays, shows quilt images on them and splits quilts
//! into their views.

mod config;

use anyhow::{bail, Context as _, Result};
use clap::{Parser, Subcommand};
use holoframe_core::{DeviceId, DeviceTypeCatalog, LayoutCatalog, Lightfield};
use holoframe_registry::{Context, DeviceFilter, DeviceSummary, DisplayOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use crate::config::Config;

#[derive(Parser, Debug)]
#[command(name = "holoframe")]
#[command(about = "Drive lightfield displays through the display driver")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "holoframe.toml")]
    config: PathBuf,

    /// Driver address, overrides the configuration file
    #[arg(short, long)]
    address: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List displays reported by the driver
    Devices {
        /// Also list emulated displays
        #[arg(long)]
        emulated: bool,
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Print the driver version
    Version,
    /// Show a quilt image on a display
    Show {
        /// Quilt PNG file
        quilt: PathBuf,
        /// Device id (defaults to the active display)
        #[arg(short, long)]
        device: Option<u32>,
        /// Override the display aspect ratio
        #[arg(long)]
        aspect: Option<f64>,
        /// Override view order inversion
        #[arg(long)]
        invert: Option<bool>,
    },
    /// Hide the quilt shown on a display
    Hide {
        #[arg(short, long)]
        device: Option<u32>,
    },
    /// Reset a display to the driver's idle screen
    Wipe {
        #[arg(short, long)]
        device: Option<u32>,
    },
    /// Split a quilt image into one PNG per view
    Split {
        quilt: PathBuf,
        out_dir: PathBuf,
    },
    /// List known quilt layouts
    Layouts,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    let mut config = config::load_config(&args.config)?;
    if let Some(address) = args.address {
        config.driver.address = address;
    }
    let layouts = config.layout_catalog()?;

    match args.command {
        Command::Layouts => print_layouts(&layouts),
        Command::Split { quilt, out_dir } => split(&quilt, &out_dir, &layouts)?,
        Command::Devices { emulated, json } => {
            let mut context = Context::new(DeviceTypeCatalog::builtin(), layouts);
            if let Err(e) = context.connect_default(&config.transport_options()).await {
                if !emulated {
                    return Err(e).context(format!("Failed to connect to driver at {}", config.driver.address));
                }
                warn!(error = %e, "Driver unavailable, listing emulated displays only");
            }
            context.refresh().await?;
            if emulated && config.devices.emulate {
                context.add_emulated(&config.devices.exclude_emulated);
            }
            print_devices(&context, emulated, json)?;
            context.shutdown().await;
        }
        Command::Version => {
            let mut context = connect(&config, layouts).await?;
            if let Some(service) = context.services.active() {
                let version = service.lock().await.get_version().await?;
                println!("{}", version);
            }
            context.shutdown().await;
        }
        Command::Show {
            quilt,
            device,
            aspect,
            invert,
        } => {
            let mut context = connect(&config, layouts).await?;
            let bytes = std::fs::read(&quilt).with_context(|| format!("Failed to read {}", quilt.display()))?;
            let lightfield = Lightfield::from_png(&bytes, &context.layouts)
                .with_context(|| format!("{} is not a known quilt", quilt.display()))?;
            info!(layout = %lightfield.layout(), "Loaded quilt");

            let id = select_device(&mut context, device)?;
            let target = context.devices.get_mut(id).context("Display disappeared")?;
            target
                .display(Arc::new(lightfield), DisplayOptions { aspect, invert })
                .await?;
            println!("Showing {} on {}", quilt.display(), target);
            context.shutdown().await;
        }
        Command::Hide { device } => {
            let mut context = connect(&config, layouts).await?;
            let id = select_device(&mut context, device)?;
            let target = context.devices.get(id).context("Display disappeared")?;
            // Goes straight to the service: `Device::clear` only hides what this
            // process displayed, and a fresh process has displayed nothing
            if let Some(service) = target.service() {
                service.lock().await.hide(target.index()).await?;
            }
            println!("Hid {}", target);
            context.shutdown().await;
        }
        Command::Wipe { device } => {
            let mut context = connect(&config, layouts).await?;
            let id = select_device(&mut context, device)?;
            let target = context.devices.get_mut(id).context("Display disappeared")?;
            target.wipe().await?;
            println!("Wiped {}", target);
            context.shutdown().await;
        }
    }

    Ok(())
}

/// Connect to the driver and refresh the device list
async fn connect(config: &Config, layouts: LayoutCatalog) -> Result<Context> {
    let mut context = Context::new(DeviceTypeCatalog::builtin(), layouts);
    context
        .connect_default(&config.transport_options())
        .await
        .with_context(|| format!("Failed to connect to driver at {}", config.driver.address))?;
    context.refresh().await?;
    Ok(context)
}

fn select_device(context: &mut Context, device: Option<u32>) -> Result<DeviceId> {
    if let Some(id) = device {
        context.devices.select_active(DeviceId(id))?;
    }
    match context.devices.get_active() {
        Some(active) if active.is_connected() => Ok(active.id()),
        Some(active) => bail!("{} is not connected", active),
        None => bail!("No connected display found"),
    }
}

fn print_devices(context: &Context, emulated: bool, json: bool) -> Result<()> {
    let filter = if emulated {
        DeviceFilter::all()
    } else {
        DeviceFilter {
            emulated: Some(false),
            ..DeviceFilter::default()
        }
    };
    let devices = context.devices.list(&filter);

    if json {
        let summaries: Vec<DeviceSummary> = devices.iter().map(|d| d.summary()).collect();
        println!("{}", serde_json::to_string_pretty(&summaries)?);
        return Ok(());
    }

    if devices.is_empty() {
        println!("No displays found");
        return Ok(());
    }

    let active = context.devices.active_id();
    println!("{} displays:", devices.len());
    for device in devices {
        let marker = if Some(device.id()) == active { "*" } else { " " };
        println!("{} {}", marker, device);
        println!(
            "    Type: {}  Serial: {}  Index: {}",
            device.hardware_type(),
            device.serial(),
            device.index()
        );
        if !device.is_emulated() {
            println!(
                "    Connected: {}  Last seen: {}",
                device.is_connected(),
                device.last_seen().format("%Y-%m-%d %H:%M:%S UTC")
            );
        }
    }
    Ok(())
}

fn print_layouts(layouts: &LayoutCatalog) {
    for (id, layout) in layouts.iter() {
        println!(
            "{:>3}  {:<24} {}x{} px, {}x{} views of {}x{}",
            id,
            layout.description,
            layout.quilt_width,
            layout.quilt_height,
            layout.columns,
            layout.rows,
            layout.view_width,
            layout.view_height
        );
    }
}

fn split(quilt: &Path, out_dir: &Path, layouts: &LayoutCatalog) -> Result<()> {
    let bytes = std::fs::read(quilt).with_context(|| format!("Failed to read {}", quilt.display()))?;
    let lightfield = Lightfield::from_png(&bytes, layouts)
        .with_context(|| format!("{} is not a known quilt", quilt.display()))?;

    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create {}", out_dir.display()))?;
    let images = lightfield.view_images()?;
    for (index, image) in images.iter().enumerate() {
        let path = out_dir.join(format!("view_{:03}.png", index));
        image
            .save_with_format(&path, image::ImageFormat::Png)
            .with_context(|| format!("Failed to write {}", path.display()))?;
    }

    println!(
        "Wrote {} views ({}) to {}",
        images.len(),
        lightfield.layout(),
        out_dir.display()
    );
    Ok(())
}
