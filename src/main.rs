// imageedit: apply plugin transforms to images from the command line.
//
// Subcommands:
//   list  : load the plugin directory and print the available transforms
//   apply : open an image, run one transform over it, save the result
//   new   : create a blank image, optionally transform it, save it

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use image::{DynamicImage, RgbaImage};
use log::{info, warn};
use ndarray::ArrayView3;

use imageedit::{HostConfig, Image, Session};

#[derive(Parser)]
#[command(name = "imageedit", about = "Apply plugin transforms to images")]
struct Cli {
    /// JSON configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Plugin directory (overrides the configuration)
    #[arg(long, global = true)]
    plugins: Option<PathBuf>,
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// List the transforms found in the plugin directory
    List,
    /// Transform an existing image
    Apply {
        input: PathBuf,
        output: PathBuf,
        #[command(flatten)]
        selection: Selection,
    },
    /// Create a blank image and transform it
    New {
        output: PathBuf,
        #[arg(long)]
        width: Option<usize>,
        #[arg(long)]
        height: Option<usize>,
        #[command(flatten)]
        selection: Selection,
    },
}

#[derive(Args)]
struct Selection {
    /// Transform name (the last one loaded wins if names repeat)
    #[arg(long, conflicts_with = "index")]
    plugin: Option<String>,
    /// Transform position, as printed by `list`
    #[arg(long)]
    index: Option<usize>,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_micros()
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => HostConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => HostConfig::default(),
    };
    if let Some(dir) = cli.plugins {
        config.plugin_dir = dir;
    }

    let mut session = Session::from_config(&config)?;
    let report = session
        .plugins_changed()
        .with_context(|| format!("scanning {}", config.plugin_dir.display()))?;
    for err in &report.errors {
        warn!("{err}");
    }

    match cli.command {
        Cmd::List => {
            for (index, name) in session.names().iter().enumerate() {
                println!("{index:>3}  {name}");
            }
        }
        Cmd::Apply {
            input,
            output,
            selection,
        } => {
            session.open(load_image(&input)?)?;
            select(&mut session, &selection)?;
            save_result(&mut session, &output)?;
        }
        Cmd::New {
            output,
            width,
            height,
            selection,
        } => {
            let width = width.unwrap_or(config.blank_width);
            let height = height.unwrap_or(config.blank_height);
            session.new_blank(width, height)?;
            select(&mut session, &selection)?;
            save_result(&mut session, &output)?;
        }
    }
    Ok(())
}

fn select(session: &mut Session, selection: &Selection) -> anyhow::Result<()> {
    let index = match (&selection.plugin, selection.index) {
        (Some(name), _) => match session.names().iter().rposition(|n| n == name) {
            Some(index) => Some(index),
            None => bail!("no transform named '{name}'"),
        },
        (None, index) => index,
    };
    session.select(index)?;
    if let Some(transform) = session.selected() {
        info!("applied '{}'", transform.name());
    }
    Ok(())
}

fn load_image(path: &Path) -> anyhow::Result<Image> {
    let decoded = image::open(path)
        .with_context(|| format!("failed to open image {}", path.display()))?
        .to_rgba8();
    let (width, height) = (decoded.width() as usize, decoded.height() as usize);
    let channels = ArrayView3::from_shape((height, width, 4), decoded.as_raw().as_slice())?;
    Ok(Image::from_rgb_channels(channels)?)
}

fn save_result(session: &mut Session, path: &Path) -> anyhow::Result<()> {
    let Some(computed) = session.take_computed() else {
        bail!("nothing to save");
    };
    let channels = computed.to_rgb_channels()?;
    let (height, width) = (channels.shape()[0], channels.shape()[1]);
    let rgba = RgbaImage::from_raw(width as u32, height as u32, channels.iter().copied().collect())
        .context("computed image has unexpected size")?;

    let jpeg = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("jpg") || ext.eq_ignore_ascii_case("jpeg"));
    let output = if jpeg {
        DynamicImage::ImageRgb8(DynamicImage::ImageRgba8(rgba).to_rgb8())
    } else {
        DynamicImage::ImageRgba8(rgba)
    };
    output
        .save(path)
        .with_context(|| format!("failed to save {}", path.display()))?;
    info!("wrote {}x{} image to {}", width, height, path.display());
    Ok(())
}
