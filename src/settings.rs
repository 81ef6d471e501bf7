// ============================================================================
// ENGINE SETTINGS: key=value config file in the OS config directory
// ============================================================================

use std::path::{Path, PathBuf};

use image::Rgba;

use crate::components::tools::{
    DEFAULT_BRUSH_COLOR, DEFAULT_BRUSH_WIDTH, MAX_BRUSH_WIDTH, MIN_BRUSH_WIDTH, parse_hex_color,
    to_hex_color,
};
use crate::io::Quality;
use crate::ops::transform::Interpolation;

const SETTINGS_FILE: &str = "graffiti_canvas.cfg";

#[derive(Clone, Debug, PartialEq)]
pub struct EngineSettings {
    /// Longest side of the interactive editing surface.
    pub max_edit_dim: u32,
    /// Longest side of the upload-tier export.
    pub upload_max_dim: u32,
    pub preview_quality: Quality,
    pub upload_quality: Quality,
    pub crop_quality: Quality,
    /// History cap including the blank entry; `0` keeps everything.
    pub max_history_entries: usize,
    pub default_brush_width: f32,
    pub default_brush_color: Rgba<u8>,
    /// Filter for every downscale / upscale the engine performs.
    pub resample: Interpolation,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_edit_dim: 480,
            upload_max_dim: 1200,
            preview_quality: Quality::new(85),
            upload_quality: Quality::new(92),
            crop_quality: Quality::new(95),
            max_history_entries: 50,
            default_brush_width: DEFAULT_BRUSH_WIDTH,
            default_brush_color: DEFAULT_BRUSH_COLOR,
            resample: Interpolation::Lanczos3,
        }
    }
}

impl EngineSettings {
    pub fn settings_path() -> Option<PathBuf> {
        #[cfg(target_os = "windows")]
        {
            let appdata = std::env::var("APPDATA").or_else(|_| std::env::var("USERPROFILE")).ok()?;
            return Some(PathBuf::from(appdata).join("GraffitiCanvas").join(SETTINGS_FILE));
        }
        #[cfg(target_os = "macos")]
        {
            let home = std::env::var("HOME").ok()?;
            return Some(
                PathBuf::from(home)
                    .join("Library")
                    .join("Application Support")
                    .join("GraffitiCanvas")
                    .join(SETTINGS_FILE),
            );
        }
        #[cfg(not(any(target_os = "windows", target_os = "macos")))]
        {
            let config_dir = std::env::var("XDG_CONFIG_HOME")
                .map(PathBuf::from)
                .or_else(|_| std::env::var("HOME").map(|home| PathBuf::from(home).join(".config")))
                .ok()?;
            Some(config_dir.join("graffiti-canvas").join(SETTINGS_FILE))
        }
    }

    /// Load from the default location (defaults if missing or corrupt).
    pub fn load() -> Self {
        match Self::settings_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    pub fn load_from(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::from_config_str(&content),
            Err(_) => Self::default(),
        }
    }

    pub fn save_to(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_config_string())
    }

    pub fn to_config_string(&self) -> String {
        format!(
            "max_edit_dim={}\n\
             upload_max_dim={}\n\
             preview_quality={}\n\
             upload_quality={}\n\
             crop_quality={}\n\
             max_history_entries={}\n\
             default_brush_width={}\n\
             default_brush_color={}\n\
             resample={}\n",
            self.max_edit_dim,
            self.upload_max_dim,
            self.preview_quality.value(),
            self.upload_quality.value(),
            self.crop_quality.value(),
            self.max_history_entries,
            self.default_brush_width,
            to_hex_color(self.default_brush_color),
            self.resample.name(),
        )
    }

    /// Parse `key=value` lines. Unknown keys and bad values keep the default.
    pub fn from_config_str(content: &str) -> Self {
        let mut s = Self::default();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, val)) = line.split_once('=') else { continue };
            let key = key.trim();
            let val = val.trim();
            match key {
                "max_edit_dim" => {
                    s.max_edit_dim = parse_dim(val).unwrap_or(s.max_edit_dim);
                }
                "upload_max_dim" => {
                    s.upload_max_dim = parse_dim(val).unwrap_or(s.upload_max_dim);
                }
                "preview_quality" => {
                    if let Ok(q) = val.parse::<u8>() { s.preview_quality = Quality::new(q); }
                }
                "upload_quality" => {
                    if let Ok(q) = val.parse::<u8>() { s.upload_quality = Quality::new(q); }
                }
                "crop_quality" => {
                    if let Ok(q) = val.parse::<u8>() { s.crop_quality = Quality::new(q); }
                }
                "max_history_entries" => {
                    s.max_history_entries = val.parse().unwrap_or(s.max_history_entries);
                }
                "default_brush_width" => {
                    if let Ok(w) = val.parse::<f32>()
                        && w.is_finite()
                    {
                        s.default_brush_width = w.clamp(MIN_BRUSH_WIDTH, MAX_BRUSH_WIDTH);
                    }
                }
                "default_brush_color" => {
                    if let Some(c) = parse_hex_color(val) { s.default_brush_color = c; }
                }
                "resample" => {
                    if let Some(i) = Interpolation::from_name(val) { s.resample = i; }
                }
                _ => log::warn!("settings: ignoring unknown key '{}'", key),
            }
        }
        s
    }
}

fn parse_dim(val: &str) -> Option<u32> {
    val.parse::<u32>().ok().filter(|d| *d > 0)
}
