//! Fully-resolved pipeline configuration.
//!
//! The CLI layer gathers the YAML config file and command-line arguments and
//! resolves them into one immutable [`ProcessingConfig`] value. The pipeline
//! never reads configuration from anywhere else, and validation happens
//! eagerly in [`ProcessingConfig::validate`] so a misconfigured run fails
//! before the first frame is touched.

use std::collections::HashMap;
use std::path::PathBuf;

use crate::error::{Error, Result};

/// Datatype names the converter accepts for `-d`.
pub const DATATYPES: &[&str] = &[
    "uint8", "sint8", "uint10", "uint12", "uint16", "sint16", "uint32", "sint32", "half", "float",
    "double",
];

/// Which external demosaic engine to invoke.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebayerEngine {
    /// dcraw-style: wide-gamut linear 16-bit TIFF on stdout, no auto stretch.
    Dcraw,
    /// rawtherapee-style: profile-driven 16-bit float linear TIFF to a named path.
    RawTherapee,
}

/// Exposure decision for a run.
///
/// Exactly one mode is active at a time; a fixed manual gain displaces both
/// autoexposure modes at the configuration layer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ExposureMode {
    /// No exposure adjustment; gain is 1.0.
    None,
    /// Manual constant gain.
    Fixed(f32),
    /// One gain per sequence, sampled from the middle frame.
    Static,
    /// A fresh gain per frame, sampled from its debayered intermediate.
    PerFrame,
}

/// Per-output-format knobs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FormatSettings {
    /// Converter datatype name, validated against [`DATATYPES`].
    pub datatype: Option<String>,
    /// Compression flags passed to the converter verbatim.
    pub compression: Vec<String>,
    /// Default resize spec for this format; overrides the global resize.
    pub resize: Option<String>,
    /// Output colorspace for the OCIO transform.
    pub colorspace_out: Option<String>,
}

/// Immutable, fully-resolved configuration for one run.
#[derive(Debug, Clone)]
pub struct ProcessingConfig {
    /// Selected demosaic engine.
    pub engine: DebayerEngine,
    /// Path to the engine binary.
    pub engine_path: PathBuf,
    /// Path to the image converter binary.
    pub converter_path: PathBuf,
    /// Path to the metadata tool; `None` degrades to no metadata copying.
    pub metadata_tool: Option<PathBuf>,
    /// Tone-neutral rawtherapee profile; required for [`DebayerEngine::RawTherapee`].
    pub rt_profile: Option<PathBuf>,
    /// Requested output formats, in order.
    pub output_formats: Vec<String>,
    /// Per-format settings keyed by format name.
    pub formats: HashMap<String, FormatSettings>,
    /// Global resize spec, used when a format has no default of its own.
    pub resize: Option<String>,
    /// Resampling filter name for resizes.
    pub resize_filter: Option<String>,
    /// Colorspace of the debayered intermediates.
    pub colorspace_in: String,
    /// OCIO config path; `None` degrades to no color transform.
    pub ocio_config: Option<PathBuf>,
    /// Exposure decision.
    pub exposure: ExposureMode,
    /// Autoexposure target luminance.
    pub autoexposure_target: f32,
    /// Autoexposure center sample box, as a fraction of width/height in (0, 1].
    pub autoexposure_center: f32,
    /// Overwrite existing outputs instead of skipping them.
    pub overwrite: bool,
    /// Skip any source path containing one of these substrings.
    pub exclude: Vec<String>,
    /// If non-empty, only process source paths containing one of these.
    pub include: Vec<String>,
    /// Destination root directory.
    pub dest_root: PathBuf,
    /// Recognized raw extensions, lowercase.
    pub raw_extensions: Vec<String>,
    /// Worker threads for frames within a sequence; 1 = sequential.
    pub threads: usize,
}

impl ProcessingConfig {
    /// Settings for a format, falling back to defaults for unknown formats.
    pub fn settings(&self, format: &str) -> FormatSettings {
        self.formats.get(format).cloned().unwrap_or_default()
    }

    /// Checks everything needed before any frame is processed.
    ///
    /// Unknown datatype names are rejected here rather than silently dropped
    /// at conversion time.
    pub fn validate(&self) -> Result<()> {
        if !self.engine_path.is_file() {
            return Err(Error::ToolNotFound {
                path: self.engine_path.clone(),
            });
        }
        if !self.converter_path.is_file() {
            return Err(Error::ToolNotFound {
                path: self.converter_path.clone(),
            });
        }
        if self.engine == DebayerEngine::RawTherapee {
            match &self.rt_profile {
                Some(profile) if profile.is_file() => {}
                Some(profile) => {
                    return Err(Error::ProfileNotFound {
                        path: profile.clone(),
                    });
                }
                None => {
                    return Err(Error::invalid_config(
                        "profile-based engine selected but no profile configured",
                    ));
                }
            }
        }
        if self.output_formats.is_empty() {
            return Err(Error::invalid_config("no output formats requested"));
        }
        for format in &self.output_formats {
            if let Some(datatype) = &self.settings(format).datatype {
                if !DATATYPES.contains(&datatype.as_str()) {
                    return Err(Error::UnknownDatatype {
                        datatype: datatype.clone(),
                        format: format.clone(),
                    });
                }
            }
        }
        if !(self.autoexposure_center > 0.0 && self.autoexposure_center <= 1.0) {
            return Err(Error::invalid_config(format!(
                "autoexposure center percentage {} outside (0, 1]",
                self.autoexposure_center
            )));
        }
        if self.autoexposure_target <= 0.0 {
            return Err(Error::invalid_config(format!(
                "autoexposure target {} must be positive",
                self.autoexposure_target
            )));
        }
        if let ExposureMode::Fixed(gain) = self.exposure {
            if gain <= 0.0 {
                return Err(Error::invalid_config(format!(
                    "manual exposure gain {gain} must be positive"
                )));
            }
        }
        Ok(())
    }
}
