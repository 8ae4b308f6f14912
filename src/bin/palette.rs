use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use palette_extractor::{
    Adjustments, ClusterSettings, ColorSpace, PaletteRequest, Preprocessing, ResponseFormat, analyze,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Extract dominant color palettes from image files.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// One or more input image paths
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Number of clusters
    #[arg(short = 'k', long, default_value_t = 5)]
    n_colors: i64,

    /// Brightness offset in [-100, 100]; selects manual preprocessing
    #[arg(long, allow_hyphen_values = true)]
    brightness: Option<i32>,

    /// Contrast factor in [-100, 100]; selects manual preprocessing
    #[arg(long, allow_hyphen_values = true)]
    contrast: Option<i32>,

    /// Desaturate before clustering; selects manual preprocessing
    #[arg(long)]
    grayscale: bool,

    /// Skip preprocessing entirely
    #[arg(long, conflicts_with_all = ["brightness", "contrast", "grayscale"])]
    raw: bool,

    /// Output shape: `clusters` or `palette`
    #[arg(short, long, default_value = "clusters")]
    format: ResponseFormat,

    /// Cluster in CIELAB instead of RGB
    #[arg(long)]
    lab: bool,

    /// Base seed for the k-means restarts
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Leave out clusters that end up empty
    #[arg(long)]
    drop_empty: bool,
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(tracing::level_filters::LevelFilter::WARN.into())
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    init_logging();
    let args = Args::parse();

    let preprocessing = if args.raw {
        Preprocessing::None
    } else if args.brightness.is_some() || args.contrast.is_some() || args.grayscale {
        Preprocessing::Manual(Adjustments::new(
            args.brightness.unwrap_or(0),
            args.contrast.unwrap_or(0),
            args.grayscale,
        )?)
    } else {
        Preprocessing::default()
    };
    let request = PaletteRequest {
        n_colors: args.n_colors,
        preprocessing,
        format: args.format,
    };
    let settings = ClusterSettings {
        seed: args.seed,
        color_space: if args.lab { ColorSpace::Lab } else { ColorSpace::Rgb },
        drop_empty: args.drop_empty,
        ..ClusterSettings::default()
    };

    for input in &args.inputs {
        let bytes = fs::read(input).with_context(|| format!("reading {}", input.display()))?;
        let response = analyze(&bytes, &request, &settings)
            .with_context(|| format!("palette extraction failed for {}", input.display()))?;
        info!(input = %input.display(), "extracted");
        println!("{}", serde_json::to_string_pretty(&response)?);
    }

    Ok(())
}
