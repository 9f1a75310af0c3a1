//! Figure capture and post-processing
//!
//! After a run, every figure the interpreter left open is rendered to
//! bytes. Two contracts exist: the plain one renders each figure as a
//! PNG/SVG pair; the quality-driven one renders PNG only, with print
//! parameters derived from the compression settings (optionally
//! overridden per figure by a content probe) and a lossless re-encode
//! that flattens alpha onto white.
//!
//! Cleanup is a guaranteed-run finalizer around the whole routine: open
//! figures are closed and scratch renders deleted no matter how far
//! rendering got. A failed render aborts the capture but never skips
//! cleanup.

use crate::interpreter::{commands, Interpreter};
use crate::models::{FigureData, FigureFormat};
use crate::utils::config::{CompressionConfig, FigureConfig, OptimizeFor};
use crate::utils::errors::{EngineError, Result};
use bytes::Bytes;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{ExtendedColorType, ImageEncoder};
use serde_json::Value;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Figures with more filled patches than this count as complex
const PATCH_COMPLEXITY_THRESHOLD: u64 = 10;

/// What a figure mostly contains, per the content probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ContentProfile {
    /// Embedded images or surfaces: render sharp
    RasterHeavy,
    /// Many filled patches: moderate quality
    PatchHeavy,
    /// Plain line plots: quality budget can drop
    LineArt,
}

/// Print parameters handed to the interpreter's render command
#[derive(Debug, Clone, Copy)]
struct PrintParams {
    dpi: u32,
    renderer: &'static str,
    loose: bool,
    smoothing: bool,
}

impl PrintParams {
    fn derive(config: &CompressionConfig, profile: Option<ContentProfile>) -> Self {
        Self {
            dpi: config.dpi,
            renderer: match profile {
                Some(ContentProfile::RasterHeavy) => "-opengl",
                _ => "-painters",
            },
            loose: config.optimize_for == OptimizeFor::Quality,
            smoothing: config.quality >= 75,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FigureCapture {
    config: FigureConfig,
    output_dir: PathBuf,
}

impl FigureCapture {
    pub fn new(config: FigureConfig, output_dir: PathBuf) -> Self {
        Self { config, output_dir }
    }

    /// Render every open figure, then clean up regardless of outcome
    pub fn capture(&self, interpreter: &dyn Interpreter) -> Result<Vec<FigureData>> {
        let rendered = self.render_all(interpreter);

        // File-reference payloads survive until the next cleanup pass
        let keep: HashSet<PathBuf> = rendered
            .as_ref()
            .map(|figures| {
                figures
                    .iter()
                    .filter_map(|figure| figure.file_path().map(Path::to_path_buf))
                    .collect()
            })
            .unwrap_or_default();
        self.cleanup_keeping(interpreter, &keep);

        rendered
    }

    /// Close all open figures and delete scratch renders. Safe to call
    /// repeatedly; failures are logged, never raised.
    pub fn cleanup(&self, interpreter: &dyn Interpreter) {
        self.cleanup_keeping(interpreter, &HashSet::new());
    }

    fn cleanup_keeping(&self, interpreter: &dyn Interpreter, keep: &HashSet<PathBuf>) {
        if let Err(e) = interpreter.evaluate(commands::CLOSE_ALL, false) {
            warn!("Error closing figures: {e}");
        }

        let entries = match std::fs::read_dir(&self.output_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return,
            Err(e) => {
                warn!("Error scanning output directory: {e}");
                return;
            }
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if !is_scratch_render(&path) || keep.contains(&path) {
                continue;
            }
            if let Err(e) = std::fs::remove_file(&path) {
                warn!("Error cleaning up {}: {e}", path.display());
            }
        }
    }

    fn render_all(&self, interpreter: &dyn Interpreter) -> Result<Vec<FigureData>> {
        let count = self.figure_count(interpreter)?;
        debug!("Capturing {count} open figures");

        let mut figures = Vec::new();
        for index in 0..count {
            // Interpreter figure handles are 1-based, file names 0-based
            let handle = index + 1;
            match &self.config.compression {
                None => {
                    figures.push(self.render_plain(interpreter, handle, index, FigureFormat::Png)?);
                    figures.push(self.render_plain(interpreter, handle, index, FigureFormat::Svg)?);
                }
                Some(compression) => {
                    figures.push(self.render_optimized(interpreter, handle, index, compression)?);
                }
            }
        }
        Ok(figures)
    }

    fn figure_count(&self, interpreter: &dyn Interpreter) -> Result<usize> {
        let outcome = interpreter.evaluate(commands::FIGURE_COUNT, true)?;
        Ok(match outcome.value {
            Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0) as usize,
            _ => 0,
        })
    }

    fn render_plain(
        &self,
        interpreter: &dyn Interpreter,
        handle: usize,
        index: usize,
        format: FigureFormat,
    ) -> Result<FigureData> {
        let path = self.render_path(index, format);
        let command = match format {
            FigureFormat::Png => commands::save_png(handle, &path),
            FigureFormat::Svg => commands::save_svg(handle, &path),
        };
        interpreter.evaluate(&command, false)?;

        let bytes = std::fs::read(&path)?;
        let size = bytes.len() as u64;
        let figure = if self.config.store_as_files {
            FigureData::file_ref(path, format)
        } else {
            FigureData::inline(Bytes::from(bytes), format)
        };
        Ok(figure.with_sizes(size, size))
    }

    fn render_optimized(
        &self,
        interpreter: &dyn Interpreter,
        handle: usize,
        index: usize,
        compression: &CompressionConfig,
    ) -> Result<FigureData> {
        let (effective, profile) = if compression.smart_optimization {
            match self.probe_content(interpreter, handle) {
                Ok(profile) => (apply_profile(compression, profile), Some(profile)),
                Err(e) => {
                    debug!("Content probe failed, using configured settings: {e}");
                    (compression.clone(), None)
                }
            }
        } else {
            (compression.clone(), None)
        };

        let path = self.render_path(index, FigureFormat::Png);
        let params = PrintParams::derive(&effective, profile);
        interpreter.evaluate(
            &commands::print_png(
                handle,
                &path,
                params.dpi,
                params.renderer,
                params.loose,
                params.smoothing,
            ),
            false,
        )?;

        let raw = std::fs::read(&path)?;
        let original_size = raw.len() as u64;

        let optimized = optimize_png(&raw, &effective)?;
        // Keep whichever encoding came out smaller
        let bytes = if optimized.len() < raw.len() { optimized } else { raw };
        let compressed_size = bytes.len() as u64;

        let figure = if self.config.store_as_files {
            std::fs::write(&path, &bytes)?;
            FigureData::file_ref(path, FigureFormat::Png)
        } else {
            FigureData::inline(Bytes::from(bytes), FigureFormat::Png)
        };
        Ok(figure
            .with_sizes(original_size, compressed_size)
            .with_compression(effective))
    }

    fn probe_content(
        &self,
        interpreter: &dyn Interpreter,
        handle: usize,
    ) -> Result<ContentProfile> {
        let outcome = interpreter.evaluate(&commands::content_probe(handle), true)?;
        let probe: Vec<f64> = match outcome.value {
            Some(Value::Array(items)) => items
                .iter()
                .map(|v| v.as_f64().unwrap_or(0.0))
                .collect(),
            _ => {
                return Err(EngineError::RuntimeError(
                    "content probe produced no value".into(),
                ))
            }
        };

        let has_raster = probe.first().copied().unwrap_or(0.0) != 0.0;
        let patches = probe.get(1).copied().unwrap_or(0.0) as u64;
        Ok(if has_raster {
            ContentProfile::RasterHeavy
        } else if patches > PATCH_COMPLEXITY_THRESHOLD {
            ContentProfile::PatchHeavy
        } else {
            ContentProfile::LineArt
        })
    }

    fn render_path(&self, index: usize, format: FigureFormat) -> PathBuf {
        self.output_dir
            .join(format!("figure_{index}.{}", format.extension()))
    }
}

fn is_scratch_render(path: &Path) -> bool {
    let named_like_render = path
        .file_name()
        .and_then(|name| name.to_str())
        .map(|name| name.starts_with("figure_"))
        .unwrap_or(false);
    let render_extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext == "png" || ext == "svg")
        .unwrap_or(false);
    named_like_render && render_extension
}

/// Tune quality and resolution to what the figure actually contains
fn apply_profile(base: &CompressionConfig, profile: ContentProfile) -> CompressionConfig {
    let mut adjusted = base.clone();
    match profile {
        ContentProfile::RasterHeavy => {
            adjusted.quality = base.quality.max(90);
            adjusted.dpi = base.dpi.max(300).min(600);
        }
        ContentProfile::PatchHeavy => {
            adjusted.quality = base.quality.clamp(70, 85);
        }
        ContentProfile::LineArt => {
            adjusted.quality = base.quality.min(60);
        }
    }
    adjusted
}

/// Map the 1-100 quality setting onto the encoder's compression levels;
/// optimizing for size biases one step toward heavier compression
fn compression_level(quality: u32, optimize_for: OptimizeFor) -> CompressionType {
    let effective = match optimize_for {
        OptimizeFor::Size => quality.saturating_sub(15),
        OptimizeFor::Quality => quality,
    };
    if effective <= 40 {
        CompressionType::Best
    } else if effective <= 80 {
        CompressionType::Default
    } else {
        CompressionType::Fast
    }
}

/// Lossless re-encode: flatten alpha onto white and re-compress at the
/// level mapped from the quality setting
fn optimize_png(raw: &[u8], compression: &CompressionConfig) -> Result<Vec<u8>> {
    let decoded = image::load_from_memory(raw)
        .map_err(|e| EngineError::RenderFailed(format!("failed to decode render: {e}")))?;
    let rgba = decoded.to_rgba8();
    let (width, height) = rgba.dimensions();

    let mut flattened = image::RgbImage::new(width, height);
    for (x, y, pixel) in rgba.enumerate_pixels() {
        let alpha = pixel[3] as u32;
        let blend =
            |channel: u8| -> u8 { ((channel as u32 * alpha + 255 * (255 - alpha)) / 255) as u8 };
        flattened.put_pixel(x, y, image::Rgb([blend(pixel[0]), blend(pixel[1]), blend(pixel[2])]));
    }

    let mut encoded = Vec::new();
    let encoder = PngEncoder::new_with_quality(
        &mut encoded,
        compression_level(compression.quality, compression.optimize_for),
        FilterType::Adaptive,
    );
    encoder
        .write_image(flattened.as_raw(), width, height, ExtendedColorType::Rgb8)
        .map_err(|e| EngineError::RenderFailed(format!("failed to re-encode render: {e}")))?;
    Ok(encoded)
}
