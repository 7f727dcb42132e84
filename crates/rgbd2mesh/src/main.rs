mod export;
mod io;

use anyhow::{bail, Context, Result};
use clap::Parser;
use env_logger::Env;
use lenticular::data::initial_scale;
use lenticular::{
    Control, ControlInput, DisplayTransform, FixedFov, FrameEvent, InteractionController,
    Pipeline, PipelineConfig, ResolutionTier,
};
use log::{debug, error, info, warn};
use rayon::prelude::*;
use std::{
    fs::{self, File},
    io::BufWriter,
    path::{Path, PathBuf},
    time::Instant,
};
use walkdir::WalkDir;

/// Converts side-by-side RGBDE images into depth-deformed grid meshes.
#[derive(Parser, Debug, Clone)]
#[command(name = "rgbd2mesh", version)]
struct Args {
    /// A single RGBDE PNG, or a directory searched recursively for them.
    #[arg(long, env = "RGBD2MESH_INPUT")]
    input: PathBuf,

    /// Receives `<stem>.obj`, `<stem>_crop.png` and `<stem>.json` per input.
    #[arg(long, env = "RGBD2MESH_OUTPUT", default_value = "meshes")]
    output_dir: PathBuf,

    /// Pipeline configuration as JSON. Flags below override its values.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Mesh resolution cap: low, medium or high.
    #[arg(long)]
    tier: Option<ResolutionTier>,

    /// Physical mesh width in world units.
    #[arg(long)]
    object_size: Option<f32>,

    /// Horizontal pan in viewport units.
    #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
    pan_x: i32,

    /// Vertical pan in viewport units.
    #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
    pan_y: i32,

    /// Zoom on top of the load-time fit.
    #[arg(long, default_value_t = 1.0)]
    scale: f32,

    #[arg(long)]
    magnification: Option<f32>,

    #[arg(long)]
    crop_distance: Option<f32>,

    #[arg(long)]
    compress_near: Option<f32>,

    #[arg(long)]
    compress_far: Option<f32>,

    #[arg(long)]
    compress_span: Option<f32>,

    /// Vertical field of view of the target display, in degrees.
    #[arg(long)]
    fov: Option<f32>,

    #[arg(long, default_value_t = false)]
    overwrite: bool,

    /// Frames to run before giving up on an image.
    #[arg(long, default_value_t = 16)]
    max_ticks: u32,
}

impl Args {
    fn control_overrides(&self) -> Vec<(Control, f32)> {
        [
            (Control::Magnification, self.magnification),
            (Control::CropDistance, self.crop_distance),
            (Control::CompressNear, self.compress_near),
            (Control::CompressFar, self.compress_far),
            (Control::CompressSpan, self.compress_span),
        ]
        .into_iter()
        .filter_map(|(control, value)| value.map(|v| (control, v)))
        .collect()
    }
}

fn load_config(args: &Args) -> Result<PipelineConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            serde_json::from_str(&text)
                .with_context(|| format!("parsing config {}", path.display()))?
        }
        None => PipelineConfig::default(),
    };

    if let Some(tier) = args.tier {
        config.mesh.tier = tier;
    }
    if let Some(size) = args.object_size {
        config.mesh.object_size = size;
    }

    Ok(config)
}

fn collect_inputs(input: &Path) -> Vec<PathBuf> {
    if input.is_file() {
        return vec![input.to_path_buf()];
    }

    let mut inputs: Vec<PathBuf> = WalkDir::new(input)
        .follow_links(true)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| {
            path.extension()
                .and_then(|s| s.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case("png"))
        })
        .collect();

    inputs.sort();
    inputs
}

/// Output paths for one input.
struct Outputs {
    obj: PathBuf,
    crop: PathBuf,
    summary: PathBuf,
}

impl Outputs {
    fn for_input(path: &Path, output_dir: &Path) -> Result<Self> {
        let stem = path
            .file_stem()
            .with_context(|| format!("{} has no file stem", path.display()))?
            .to_string_lossy();

        Ok(Self {
            obj: output_dir.join(format!("{stem}.obj")),
            crop: output_dir.join(format!("{stem}_crop.png")),
            summary: output_dir.join(format!("{stem}.json")),
        })
    }

    fn any_exists(&self) -> bool {
        [&self.obj, &self.crop, &self.summary]
            .iter()
            .any(|p| p.exists())
    }
}

fn process_one(path: &Path, args: &Args, config: &PipelineConfig) -> Result<()> {
    let outputs = Outputs::for_input(path, &args.output_dir)?;
    if outputs.any_exists() && !args.overwrite {
        warn!(
            "Skipping {}: outputs exist (use --overwrite)",
            path.display()
        );
        return Ok(());
    }

    let started = Instant::now();
    info!("Processing {} -> {}", path.display(), outputs.obj.display());

    let image = io::load_rgbde(path)?;
    let (w, h) = (image.width(), image.height());

    let fit = initial_scale(w, h, config.viewport.width, config.viewport.height);
    let mut interaction =
        InteractionController::new(config.interaction, &config.viewport, w, h, fit);

    let mut pipeline = Pipeline::new(config.clone(), interaction.subscribe());
    if let Some(fov) = args.fov {
        pipeline = pipeline.with_fov(FixedFov(fov));
    }
    pipeline.load_image(image);

    interaction.set_transform(DisplayTransform {
        pan_x: args.pan_x,
        pan_y: args.pan_y,
        scale: args.scale,
    });

    for (control, value) in args.control_overrides() {
        for fix in pipeline.set_control(control, ControlInput::Direct(value)) {
            warn!(
                "{}: {} adjusted to {}",
                path.display(),
                fix.control,
                fix.control.label(fix.value)
            );
        }
    }

    let mut ticks = 0;
    while ticks < args.max_ticks {
        ticks += 1;
        for event in pipeline.tick() {
            match event {
                FrameEvent::MeshRebuilt { cols, rows } => debug!("mesh {cols}x{rows}"),
                FrameEvent::ControlCorrected(_) => {}
                other => debug!("{:?}", other),
            }
        }
        if pipeline.is_settled() {
            break;
        }
    }

    if pipeline.positions().is_empty() {
        bail!(
            "no visible mesh after {} frame(s) (transform {:?})",
            ticks,
            pipeline.transform()
        );
    }

    let file = File::create(&outputs.obj)
        .with_context(|| format!("creating {}", outputs.obj.display()))?;
    export::write_obj(BufWriter::new(file), pipeline.mesh(), pipeline.positions())
        .with_context(|| format!("writing {}", outputs.obj.display()))?;

    if let Some(cropped) = pipeline.cropped() {
        io::save_png(cropped, &outputs.crop)?;
    }

    let summary = export::Summary::collect(&path.display().to_string(), &pipeline);
    let file = File::create(&outputs.summary)
        .with_context(|| format!("creating {}", outputs.summary.display()))?;
    serde_json::to_writer_pretty(BufWriter::new(file), &summary)
        .with_context(|| format!("writing {}", outputs.summary.display()))?;

    info!(
        "Wrote {} ({} vertices, {} triangles) in {:.2?}",
        outputs.obj.display(),
        summary.vertices,
        summary.triangles,
        started.elapsed()
    );

    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = load_config(&args)?;
    fs::create_dir_all(&args.output_dir)
        .with_context(|| format!("creating {}", args.output_dir.display()))?;

    let inputs = collect_inputs(&args.input);
    if inputs.is_empty() {
        bail!("no PNG inputs under {}", args.input.display());
    }

    info!("Processing {} image(s)...", inputs.len());

    inputs.par_iter().for_each(|path| {
        if let Err(err) = process_one(path, &args, &config) {
            error!("Error processing {}: {:#}", path.display(), err);
        }
    });

    Ok(())
}
