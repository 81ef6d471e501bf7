// ============================================================================
// graffiti-canvas CLI: headless edit / crop / export via command-line arguments
// ============================================================================
//
// Usage examples:
//   graffiti-canvas compose -i photo.jpg --script strokes.json -o post.jpg
//   graffiti-canvas compose --demo --script strokes.json --preview preview.jpg
//   graffiti-canvas compose -i photo.jpg --upload-dir bucket/ --public-base https://cdn.example.com
//   graffiti-canvas crop -i face.png --display-width 320 --region 40,20,200,200 --aspect 1 --circle -o avatar.png
//
// Everything runs synchronously on the current thread; rayon is only used
// inside the compositing and resampling helpers.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;

use clap::{Args, Parser, Subcommand};
use serde::Deserialize;

use crate::components::tools::{PointerEvent, StrokeMode, parse_hex_color};
use crate::error::CanvasError;
use crate::io::{DecodedSource, ImageSource, PLACEHOLDER_DEFAULT_SIZE, read_source};
use crate::ops::crop::{CropRegion, crop};
use crate::session::EditSession;
use crate::settings::EngineSettings;
use crate::upload::{DirectoryBridge, UploadBridge, UploadCategory};

// ============================================================================
// CLI argument definition (clap Derive)
// ============================================================================

/// Headless annotation and export engine.
#[derive(Parser, Debug)]
#[command(
    name = "graffiti-canvas",
    version,
    about = "Draw on images, crop avatars / banners and export upload-ready JPEGs",
    long_about = "Load a photo (or a blank placeholder), replay a JSON script of\n\
                  brush / eraser strokes with undo and redo, and export the\n\
                  preview and upload tiers. The crop command produces avatar\n\
                  and banner images from a region chosen on a displayed image.\n\n\
                  Example:\n  \
                  graffiti-canvas compose -i photo.jpg --script strokes.json -o post.jpg"
)]
pub struct CliArgs {
    /// Settings file (key=value). Defaults to the per-user config location.
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Print per-step timing information.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Load an image, replay strokes and export.
    Compose(ComposeArgs),
    /// Crop a region chosen on a displayed image.
    Crop(CropArgs),
}

#[derive(Args, Debug)]
pub struct ComposeArgs {
    /// Image path, `data:` / `file://` / `http(s)://` URL or `placeholder.svg?width=..&height=..`.
    #[arg(short, long, value_name = "IMAGE", required_unless_present = "demo")]
    pub input: Option<String>,

    /// Start from a blank white placeholder instead of an image.
    #[arg(long, conflicts_with = "input")]
    pub demo: bool,

    /// JSON stroke script to replay.
    #[arg(short, long, value_name = "OPS.json")]
    pub script: Option<PathBuf>,

    /// Write the editing-resolution preview here.
    #[arg(long, value_name = "FILE")]
    pub preview: Option<PathBuf>,

    /// Write the upload-tier JPEG here.
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Store the upload-tier JPEG in this directory-backed bucket.
    #[arg(long, value_name = "DIR")]
    pub upload_dir: Option<PathBuf>,

    /// Public URL prefix for objects in --upload-dir.
    #[arg(long, default_value = "http://localhost/uploads", value_name = "URL")]
    pub public_base: String,

    /// posts, profile or background_image.
    #[arg(long, default_value = "posts", value_name = "CATEGORY")]
    pub category: String,

    /// Owner id used for profile / background keys.
    #[arg(long, value_name = "ID")]
    pub owner: Option<String>,
}

#[derive(Args, Debug)]
pub struct CropArgs {
    /// Image to crop.
    #[arg(short, long, value_name = "IMAGE")]
    pub input: String,

    /// Width the image is displayed at while choosing the region.
    #[arg(long, value_name = "PX")]
    pub display_width: f32,

    /// Displayed height; derived from the image aspect when omitted.
    #[arg(long, value_name = "PX")]
    pub display_height: Option<f32>,

    /// Region in displayed pixels: x,y,width,height.
    #[arg(long, value_name = "X,Y,W,H")]
    pub region: String,

    /// Required width / height ratio (1 for avatars, 3 for banners).
    #[arg(long, value_name = "RATIO")]
    pub aspect: Option<f32>,

    /// Mask to a circle (PNG output).
    #[arg(long)]
    pub circle: bool,

    /// Output file.
    #[arg(short, long, value_name = "FILE")]
    pub output: PathBuf,

    /// Filename prefix for the generated blob name.
    #[arg(long, default_value = "crop", value_name = "NAME")]
    pub context: String,
}

// ============================================================================
// Stroke scripts
// ============================================================================

/// One entry of a replay script.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum ScriptOp {
    Stroke {
        #[serde(default)]
        mode: StrokeMode,
        #[serde(default)]
        color: Option<String>,
        #[serde(default)]
        width: Option<f32>,
        points: Vec<[f32; 2]>,
        /// Size the points were captured at; editing surface size when absent.
        #[serde(default)]
        display: Option<[f32; 2]>,
    },
    Undo,
    Redo,
}

pub fn parse_script(json: &str) -> Result<Vec<ScriptOp>, String> {
    serde_json::from_str(json).map_err(|e| format!("invalid script: {}", e))
}

/// Replay `ops` against a loaded session, one mouse stroke per `stroke` op.
pub fn apply_script(session: &mut EditSession, ops: &[ScriptOp]) -> Result<(), CanvasError> {
    for (i, op) in ops.iter().enumerate() {
        match op {
            ScriptOp::Stroke { mode, color, width, points, display } => {
                let Some(first) = points.first() else {
                    log::warn!("script op {}: stroke without points, skipped", i);
                    continue;
                };
                let mut brush = session.brush();
                brush.mode = *mode;
                if let Some(text) = color {
                    match parse_hex_color(text) {
                        Some(c) => brush.color = c,
                        None => log::warn!("script op {}: bad color '{}', keeping {:?}", i, text, brush.color),
                    }
                }
                if let Some(w) = width {
                    brush.set_width(*w);
                }
                match display {
                    Some([w, h]) => session.set_display_size(*w, *h),
                    None => {
                        if let Some((w, h)) = session.edit_size() {
                            session.set_display_size(w as f32, h as f32);
                        }
                    }
                }

                session.begin_stroke_with(PointerEvent::mouse(first[0], first[1]), brush)?;
                for p in &points[1..] {
                    session.continue_stroke(PointerEvent::mouse(p[0], p[1]));
                }
                session.end_stroke();
            }
            ScriptOp::Undo => {
                if !session.undo() {
                    log::debug!("script op {}: nothing to undo", i);
                }
            }
            ScriptOp::Redo => {
                if !session.redo() {
                    log::debug!("script op {}: nothing to redo", i);
                }
            }
        }
    }
    Ok(())
}

// ============================================================================
// Public entry point
// ============================================================================

/// Run the selected subcommand and return an OS exit code.
/// `0` = success, `1` = failure (message already printed to stderr).
pub fn run(args: CliArgs) -> ExitCode {
    let start = Instant::now();
    match execute(&args) {
        Ok(()) => {
            if args.verbose {
                println!("done in {:.0}ms", start.elapsed().as_secs_f64() * 1000.0);
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

/// Resolve settings and dispatch to the subcommand.
pub fn execute(args: &CliArgs) -> Result<(), String> {
    let settings = match &args.config {
        Some(path) => {
            if !path.exists() {
                return Err(format!("config file '{}' does not exist.", path.display()));
            }
            EngineSettings::load_from(path)
        }
        None => EngineSettings::load(),
    };

    match &args.command {
        Command::Compose(c) => run_compose(c, settings),
        Command::Crop(c) => run_crop(c, &settings),
    }
}

// ============================================================================
// compose
// ============================================================================

fn run_compose(args: &ComposeArgs, settings: EngineSettings) -> Result<(), String> {
    if args.preview.is_none() && args.output.is_none() && args.upload_dir.is_none() {
        return Err("nothing to do: pass --preview, --output or --upload-dir".to_string());
    }
    let category = UploadCategory::from_name(&args.category)
        .ok_or_else(|| format!("unknown upload category '{}'", args.category))?;

    // -- Step 1: Load ----------------------------------------------------
    let source = if args.demo {
        ImageSource::Placeholder { width: PLACEHOLDER_DEFAULT_SIZE, height: PLACEHOLDER_DEFAULT_SIZE }
    } else {
        match &args.input {
            Some(arg) => ImageSource::from_arg(arg),
            None => return Err("--input or --demo is required".to_string()),
        }
    };
    let mut session = EditSession::new(settings);
    session.load(source).map_err(|e| format!("load failed: {}", e))?;

    // -- Step 2: Replay strokes (optional) -------------------------------
    if let Some(path) = &args.script {
        let json = std::fs::read_to_string(path)
            .map_err(|e| format!("could not read script '{}': {}", path.display(), e))?;
        let ops = parse_script(&json)?;
        apply_script(&mut session, &ops).map_err(|e| format!("script failed: {}", e))?;
        if let Some(history) = session.history() {
            println!("replayed {} ops, history {}/{}", ops.len(), history.index(), history.len() - 1);
        }
    }

    // -- Step 3: Export --------------------------------------------------
    if let Some(path) = &args.preview {
        let blob = session.export_preview().map_err(|e| format!("preview failed: {}", e))?;
        write_blob(&blob.data, path)?;
        println!("preview {}x{} -> {}", blob.width, blob.height, path.display());
    }

    if args.output.is_none() && args.upload_dir.is_none() {
        return Ok(());
    }
    let blob = session.export_for_upload().map_err(|e| format!("export failed: {}", e))?;
    if let Some(path) = &args.output {
        write_blob(&blob.data, path)?;
        println!("image {}x{} -> {}", blob.width, blob.height, path.display());
    }

    // -- Step 4: Upload (optional) ---------------------------------------
    if let Some(dir) = &args.upload_dir {
        let mut bridge = DirectoryBridge::new(dir, &args.public_base);
        if let Some(owner) = &args.owner {
            bridge = bridge.with_owner(owner);
        }
        let url = bridge
            .upload(&blob, category)
            .map_err(|e| format!("upload failed: {}", e))?;
        println!("{}", url);
    }
    Ok(())
}

// ============================================================================
// crop
// ============================================================================

fn run_crop(args: &CropArgs, settings: &EngineSettings) -> Result<(), String> {
    let image = match read_source(&ImageSource::from_arg(&args.input), None)
        .map_err(|e| format!("load failed: {}", e))?
    {
        DecodedSource::Raster(img) => img,
        DecodedSource::Placeholder { .. } => {
            return Err("placeholder canvases cannot be cropped".to_string());
        }
    };

    let display_w = args.display_width;
    let display_h = args
        .display_height
        .unwrap_or_else(|| display_w * image.height() as f32 / image.width() as f32);

    let (x, y, w, h) = parse_region(&args.region)?;
    let mut region = CropRegion::new(x, y, w, h).with_circle(args.circle);
    if let Some(aspect) = args.aspect {
        region = region.with_aspect(aspect);
    }

    let blob = crop(
        &image,
        (display_w, display_h),
        &region,
        settings.crop_quality,
        settings.resample,
        &args.context,
    )
    .map_err(|e| format!("crop failed: {}", e))?;

    write_blob(&blob.data, &args.output)?;
    println!("{} {}x{} -> {}", blob.filename, blob.width, blob.height, args.output.display());
    Ok(())
}

// ============================================================================
// Helpers
// ============================================================================

/// `x,y,w,h` in displayed pixels.
fn parse_region(text: &str) -> Result<(f32, f32, f32, f32), String> {
    let parts: Vec<f32> = text
        .split(',')
        .map(|p| p.trim().parse::<f32>())
        .collect::<Result<_, _>>()
        .map_err(|_| format!("invalid region '{}', expected x,y,width,height", text))?;
    match parts.as_slice() {
        [x, y, w, h] => Ok((*x, *y, *w, *h)),
        _ => Err(format!("invalid region '{}', expected x,y,width,height", text)),
    }
}

fn write_blob(data: &[u8], path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("could not create '{}': {}", parent.display(), e))?;
    }
    std::fs::write(path, data).map_err(|e| format!("could not write '{}': {}", path.display(), e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_ops_parse() {
        let ops = parse_script(
            r##"[
                {"op":"stroke","mode":"brush","color":"#ff3b30","width":10,"points":[[1,2],[3,4]],"display":[300,300]},
                {"op":"stroke","mode":"eraser","points":[[5,5]]},
                {"op":"undo"},
                {"op":"redo"}
            ]"##,
        )
        .unwrap();
        assert_eq!(ops.len(), 4);
        assert!(matches!(
            &ops[0],
            ScriptOp::Stroke { mode: StrokeMode::Brush, width: Some(w), display: Some(_), .. } if *w == 10.0
        ));
        assert!(matches!(&ops[1], ScriptOp::Stroke { mode: StrokeMode::Eraser, color: None, .. }));
        assert_eq!(ops[2], ScriptOp::Undo);
    }

    #[test]
    fn unknown_ops_are_rejected() {
        assert!(parse_script(r#"[{"op":"fill"}]"#).is_err());
    }

    #[test]
    fn regions_parse() {
        assert_eq!(parse_region("1, 2,3.5,4").unwrap(), (1.0, 2.0, 3.5, 4.0));
        assert!(parse_region("1,2,3").is_err());
        assert!(parse_region("a,b,c,d").is_err());
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        CliArgs::command().debug_assert();
    }

    #[test]
    fn compose_requires_input_or_demo() {
        assert!(CliArgs::try_parse_from(["graffiti-canvas", "compose", "-o", "x.jpg"]).is_err());
        assert!(CliArgs::try_parse_from(["graffiti-canvas", "compose", "--demo", "-o", "x.jpg"]).is_ok());
    }
}
