//! nano_infer - Run one image through a model and print the result.
//!
//! Prints the inference result as JSON on stdout and, with `--output`,
//! writes the annotated image in the input's format.

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use std::path::PathBuf;

use nano_ha_bridge::{
    snapshot::{annotate, annotate_labeled, decode_image, LabelFont},
    BackendRegistry, DetectionResult, Frame, ModelKind, ModelSpec, Overlay, SnapshotEncoder,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Run one image through an inference backend")]
struct Args {
    /// Input image (JPEG or PNG).
    image: PathBuf,

    /// Model kind: classifier, detector or pose.
    #[arg(long, default_value = "detector")]
    kind: String,

    /// Network name or model file path.
    #[arg(long, default_value = "ssd-mobilenet-v2")]
    network: String,

    /// Registered backend name; the registry default when omitted.
    #[arg(long, env = "NANO_BRIDGE_BACKEND")]
    backend: Option<String>,

    #[arg(long)]
    threshold: Option<f32>,

    /// Overlay flags, e.g. `box,labels,conf`.
    #[arg(long)]
    overlay: Option<String>,

    /// Where to write the annotated image.
    #[arg(long)]
    output: Option<PathBuf>,

    /// TrueType font for class names in label tags.
    #[arg(long)]
    font: Option<PathBuf>,
}

#[derive(Serialize)]
struct Report<'a> {
    network: &'a str,
    backend: &'a str,
    label: String,
    result: &'a DetectionResult,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let kind: ModelKind = args.kind.parse()?;
    let mut spec = ModelSpec::new(kind, &args.network);
    if let Some(backend) = args.backend {
        spec = spec.with_backend(backend);
    }
    if let Some(threshold) = args.threshold {
        spec = spec.with_threshold(threshold);
    }
    if let Some(overlay) = args.overlay.as_deref() {
        spec = spec.with_overlay(overlay.parse::<Overlay>()?);
    }

    let registry = BackendRegistry::with_builtins();
    let mut adapter = registry.build_adapter(&spec)?;

    let bytes = std::fs::read(&args.image)
        .with_context(|| format!("failed to read {}", args.image.display()))?;
    let (image, format) = decode_image(&bytes)?;
    let result = adapter.run(&Frame::from_rgb_image(image.clone()))?;

    let report = Report {
        network: adapter.network(),
        backend: adapter.backend_name(),
        label: adapter.reply_label(&result),
        result: &result,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);

    if let Some(output) = args.output {
        let font = match &args.font {
            Some(path) => Some(LabelFont::load(path)?),
            None => LabelFont::discover(),
        };
        let mut annotated = image;
        match &font {
            Some(font) => annotate_labeled(&mut annotated, &result, adapter.overlay(), font, &|id| {
                adapter.class_label(id)
            }),
            None => annotate(&mut annotated, &result, adapter.overlay()),
        }
        let encoded = SnapshotEncoder::default().encode_rgb(&annotated, format)?;
        std::fs::write(&output, encoded.as_bytes())
            .with_context(|| format!("failed to write {}", output.display()))?;
        log::info!("annotated image written to {}", output.display());
    }
    Ok(())
}
