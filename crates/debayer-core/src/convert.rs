//! Conversion stage: one intermediate TIFF to one final-format output.
//!
//! Builds a single converter invocation whose argument order matters: each
//! flag operates on the accumulated pixel buffer, so resize runs inside a
//! range-compress/expand pair before the datatype cast, exposure multiply and
//! color transform, and compression flags come last before the output.

use std::path::{Path, PathBuf};

use tracing::{debug, error, warn};

use crate::config::{ExposureMode, ProcessingConfig};
use crate::exposure::ExposureEstimator;
use crate::metadata::MetadataPropagator;
use crate::pathmap;
use crate::tools::{ToolCommand, ToolRunner};

/// Converts debayered intermediates into final deliverables.
pub struct ConversionStage<'a> {
    config: &'a ProcessingConfig,
    runner: &'a dyn ToolRunner,
    metadata: &'a MetadataPropagator<'a>,
    estimator: &'a ExposureEstimator,
}

impl<'a> ConversionStage<'a> {
    /// Creates the stage.
    pub fn new(
        config: &'a ProcessingConfig,
        runner: &'a dyn ToolRunner,
        metadata: &'a MetadataPropagator<'a>,
        estimator: &'a ExposureEstimator,
    ) -> Self {
        Self {
            config,
            runner,
            metadata,
            estimator,
        }
    }

    /// Produces `dest_stem.{format}` from `intermediate`.
    ///
    /// `sequence_gain` is the gain decided at sequence level; in per-frame
    /// mode a fresh gain is sampled from the intermediate instead. Returns
    /// `None` when the converter produced no output file; the caller moves
    /// on to the next format.
    pub fn convert(
        &self,
        intermediate: &Path,
        dest_stem: &Path,
        format: &str,
        sequence_gain: f32,
    ) -> Option<PathBuf> {
        let gain = match self.config.exposure {
            ExposureMode::PerFrame => self.estimator.estimate(intermediate).unwrap_or_else(|| {
                warn!(src = %intermediate.display(), "estimator unavailable, using gain 1.0");
                1.0
            }),
            _ => sequence_gain,
        };

        let destination = pathmap::with_format(dest_stem, format);
        let settings = self.config.settings(format);
        let mut cmd = ToolCommand::new(&self.config.converter_path)
            .arg("-v")
            .arg_path(intermediate);

        // A per-format default resize displaces the global one; only one applies.
        let resize = settings
            .resize
            .as_deref()
            .or(self.config.resize.as_deref());
        if let Some(resize) = resize {
            cmd = cmd.arg("--rangecompress");
            cmd = match self.config.resize_filter.as_deref() {
                Some(filter) => cmd.arg(format!("--resize:filter={filter}")),
                None => cmd.arg("--resize"),
            };
            cmd = cmd.arg(resize).arg("--rangeexpand");
        }

        if let Some(datatype) = &settings.datatype {
            cmd = cmd.arg("-d").arg(datatype);
        }

        if gain != 1.0 {
            // Color channels only; the alpha multiplier stays 1.0.
            cmd = cmd.arg("--mulc").arg(format!("{gain},{gain},{gain},1.0"));
        }

        if let (Some(colorspace_out), Some(ocio)) =
            (&settings.colorspace_out, &self.config.ocio_config)
        {
            cmd = cmd
                .arg("--colorconfig")
                .arg_path(ocio)
                .arg("--colorconvert")
                .arg(&self.config.colorspace_in)
                .arg(colorspace_out);
        }

        cmd = cmd.args(settings.compression.iter().cloned());
        cmd = cmd.arg("-o").arg_path(&destination);

        match self.runner.run(&cmd) {
            Ok(out) if !out.status_ok => debug!(format, "converter exited non-zero"),
            Ok(_) => {}
            Err(err) => warn!(format, %err, "converter invocation failed"),
        }

        if destination.is_file() {
            if format == "tif" {
                self.metadata.copy(intermediate, &destination);
            }
            Some(destination)
        } else {
            error!(format, dst = %destination.display(), "converter produced no output");
            None
        }
    }
}
