//! Headless front end for the engine: renders a synthetic CT phantom through
//! the CPU or GPU path and writes the result as a PNG.

use std::path::PathBuf;
use std::rc::Rc;

use anyhow::Context;
use clap::Parser;
use mirador_engine::coords::{Affine2, SurfaceSize};
use mirador_engine::gpu::{GpuInit, WgpuPlatform};
use mirador_engine::logging::{init_logging, LoggingConfig};
use mirador_engine::{
    EnabledElement, Image, PixelCanvas, PixelData, Renderer, RendererConfig, RendererKind, SurfaceId,
    Viewport, Voi,
};

#[derive(Parser, Debug)]
#[command(name = "mirador-studio", about = "Render a synthetic CT slice to PNG")]
struct Args {
    /// Phantom edge length in pixels.
    #[arg(long, default_value_t = 512)]
    size: u32,

    /// Window width in modality units.
    #[arg(long, default_value_t = 400.0)]
    ww: f64,

    /// Window center in modality units.
    #[arg(long, default_value_t = 40.0)]
    wc: f64,

    #[arg(long)]
    invert: bool,

    /// Rotation in degrees, clockwise.
    #[arg(long, default_value_t = 0.0)]
    rotate: f32,

    /// Nearest-neighbour magnification instead of smoothing.
    #[arg(long)]
    pixel_replication: bool,

    /// Render through the GPU path.
    #[arg(long)]
    gpu: bool,

    /// Output canvas edge length in pixels.
    #[arg(long, default_value_t = 768)]
    canvas: u32,

    #[arg(long, default_value = "mirador.png")]
    out: PathBuf,

    /// Log filter, env_logger syntax.
    #[arg(long)]
    log: Option<String>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(match &args.log {
        Some(filter) => LoggingConfig::with_filter(filter.as_str()),
        None => LoggingConfig::default(),
    });

    let image = Rc::new(phantom(args.size)?);
    let target_size = SurfaceSize::new(args.canvas, args.canvas);

    let mut viewport = Viewport::new(Voi::new(args.ww, args.wc));
    viewport.invert = args.invert;
    viewport.rotation = args.rotate as f64;
    viewport.pixel_replication = args.pixel_replication;
    viewport.renderer = if args.gpu { RendererKind::Gpu } else { RendererKind::Canvas };

    let element = EnabledElement::new(SurfaceId(0), Rc::clone(&image), viewport)
        .with_transform(fit_transform(image.size(), target_size, args.rotate));

    let mut renderer = Renderer::new(WgpuPlatform::new(GpuInit::default()), RendererConfig::default());
    let mut canvas = PixelCanvas::new(target_size);
    let outcome = renderer.render(&element, &mut canvas, false)?;
    log::info!("rendered {}x{} phantom via {:?}", args.size, args.size, outcome.path);

    canvas
        .into_pixels()
        .save(&args.out)
        .with_context(|| format!("writing {}", args.out.display()))?;
    println!("wrote {}", args.out.display());
    Ok(())
}

/// Scales the image to fit the canvas, centred, then rotates about the centre.
fn fit_transform(image: SurfaceSize, target: SurfaceSize, degrees: f32) -> Affine2 {
    let scale = (target.width as f32 / image.width as f32).min(target.height as f32 / image.height as f32);
    let to_origin = Affine2::translation(-(image.width as f32) / 2.0, -(image.height as f32) / 2.0);
    let to_centre = Affine2::translation(target.width as f32 / 2.0, target.height as f32 / 2.0);

    to_centre
        .then(Affine2::rotation(degrees.to_radians()))
        .then(Affine2::scale(scale, scale))
        .then(to_origin)
}

/// Signed 16-bit CT-like slice: air outside, soft tissue body, a bone ring
/// and two low-density "lungs".
fn phantom(size: u32) -> anyhow::Result<Image> {
    let edge = size.max(8);
    let c = edge as f32 / 2.0;
    let mut samples = Vec::with_capacity((edge * edge) as usize);
    for y in 0..edge {
        for x in 0..edge {
            let (dx, dy) = ((x as f32 + 0.5 - c) / c, (y as f32 + 0.5 - c) / c);
            let r = (dx * dx + dy * dy * 1.4).sqrt();
            let lung = |ox: f32| ((dx - ox) * (dx - ox) * 4.0 + dy * dy * 2.0).sqrt() < 0.5;
            let hu: i16 = if r > 0.9 {
                -1000
            } else if r > 0.82 {
                900
            } else if lung(-0.35) || lung(0.35) {
                -750
            } else {
                40 + ((x ^ y) % 16) as i16
            };
            samples.push(hu);
        }
    }

    Image::new("phantom", edge, edge, PixelData::GrayI16(samples)).context("building phantom")
}
