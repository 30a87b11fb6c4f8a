//! Demosaic stage: one raw frame to one scene-linear intermediate TIFF.
//!
//! Applies the skip policy (existing outputs, include/exclude filters),
//! dispatches to the configured engine with a bounded retry loop, validates
//! the produced file, and propagates source metadata onto the intermediate.
//!
//! Engine stderr chatter and exit status are logged but never treated as
//! failure; many raw decoders emit warnings unconditionally. Only a missing
//! or undersized output file fails the frame.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::config::{DebayerEngine, ProcessingConfig};
use crate::metadata::MetadataPropagator;
use crate::pathmap;
use crate::tools::{ToolCommand, ToolRunner};

/// Smallest output considered viable; anything at or below this is treated
/// as corrupt or truncated.
pub const MIN_OUTPUT_BYTES: u64 = 10 * 1024;

/// Total attempts for the dcraw-style engine (1 + 3 retries).
const DCRAW_ATTEMPTS: u32 = 4;
/// Total attempts for the profile-based engine (1 + 1 retry).
const RT_ATTEMPTS: u32 = 2;

/// Why a frame was skipped without invoking the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// A requested output already exists at a viable size.
    ExistingOutput(PathBuf),
    /// The source path contains this configured exclude substring.
    Excluded(String),
    /// Include substrings are configured and none matched.
    NotIncluded,
}

/// Why a frame was abandoned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailReason {
    /// The engine produced no viable output after all attempts.
    EngineOutputMissing {
        /// Attempts made.
        attempts: u32,
    },
    /// Every requested output format failed to convert.
    AllFormatsFailed,
    /// Destination or scratch path handling failed.
    Path(String),
}

/// Result of [`DebayerStage::debayer`].
#[derive(Debug)]
pub enum DebayerOutcome {
    /// The intermediate TIFF was produced at this path.
    Debayered(PathBuf),
    /// The frame was skipped before the engine ran.
    Skipped(SkipReason),
    /// The frame was abandoned.
    Failed(FailReason),
}

/// Invokes the demosaic engine on single frames.
pub struct DebayerStage<'a> {
    config: &'a ProcessingConfig,
    runner: &'a dyn ToolRunner,
    metadata: &'a MetadataPropagator<'a>,
}

impl<'a> DebayerStage<'a> {
    /// Creates the stage.
    pub fn new(
        config: &'a ProcessingConfig,
        runner: &'a dyn ToolRunner,
        metadata: &'a MetadataPropagator<'a>,
    ) -> Self {
        Self {
            config,
            runner,
            metadata,
        }
    }

    /// Debayers `frame` into `tmp_dir`, named after `dest_stem`'s base name.
    ///
    /// `dest_stem` is the mapped destination path without its format
    /// extension; it is also where the existing-output skip check looks.
    pub fn debayer(&self, frame: &Path, dest_stem: &Path, tmp_dir: &Path) -> DebayerOutcome {
        if let Some(reason) = self.skip_reason(frame, dest_stem) {
            return DebayerOutcome::Skipped(reason);
        }

        let Some(base) = dest_stem.file_name() else {
            return DebayerOutcome::Failed(FailReason::Path(format!(
                "destination stem '{}' has no file name",
                dest_stem.display()
            )));
        };
        let intermediate = pathmap::with_format(&tmp_dir.join(base), "tif");
        debug!(tmp = %intermediate.display(), "debayer target");

        let produced = match self.config.engine {
            DebayerEngine::Dcraw => self.run_dcraw(frame, &intermediate),
            DebayerEngine::RawTherapee => self.run_rawtherapee(frame, &intermediate),
        };
        match produced {
            Ok(()) => {
                self.metadata.copy(frame, &intermediate);
                DebayerOutcome::Debayered(intermediate)
            }
            Err(reason) => DebayerOutcome::Failed(reason),
        }
    }

    /// Skip policy, checked in order: existing outputs, exclude, include.
    fn skip_reason(&self, frame: &Path, dest_stem: &Path) -> Option<SkipReason> {
        if !self.config.overwrite {
            for format in &self.config.output_formats {
                let final_output = pathmap::with_format(dest_stem, format);
                if file_size(&final_output) > MIN_OUTPUT_BYTES {
                    warn!(existing = %final_output.display(), "skip existing");
                    return Some(SkipReason::ExistingOutput(final_output));
                }
            }
        }
        let source = frame.to_string_lossy();
        if let Some(hit) = self.config.exclude.iter().find(|s| source.contains(*s)) {
            warn!(src = %source, filter = %hit, "excluded");
            return Some(SkipReason::Excluded(hit.clone()));
        }
        if !self.config.include.is_empty()
            && !self.config.include.iter().any(|s| source.contains(s))
        {
            warn!(src = %source, "not in include filter");
            return Some(SkipReason::NotIncluded);
        }
        None
    }

    /// dcraw-style engine: linear 16-bit wide-gamut TIFF on stdout.
    ///
    /// Success is output-file existence; the undersize check does not apply.
    fn run_dcraw(&self, frame: &Path, intermediate: &Path) -> Result<(), FailReason> {
        for attempt in 1..=DCRAW_ATTEMPTS {
            let cmd = ToolCommand::new(&self.config.engine_path)
                .args(["-v", "-T", "-4", "-o", "6", "-q", "3", "-w", "-H", "0", "-W", "-c"])
                .arg_path(frame)
                .stdout_to(intermediate);
            match self.runner.run(&cmd) {
                Ok(out) if !out.status_ok => {
                    debug!(attempt, "engine exited non-zero");
                }
                Ok(_) => {}
                Err(err) => warn!(attempt, %err, "engine invocation failed"),
            }
            if intermediate.is_file() {
                return Ok(());
            }
            warn!(attempt, src = %frame.display(), "engine produced no output");
        }
        Err(FailReason::EngineOutputMissing {
            attempts: DCRAW_ATTEMPTS,
        })
    }

    /// Profile-based engine: 16-bit float linear TIFF to a named path.
    ///
    /// Success requires existence and a viable size; an undersized file is
    /// removed before the single retry.
    fn run_rawtherapee(&self, frame: &Path, intermediate: &Path) -> Result<(), FailReason> {
        let Some(profile) = self.config.rt_profile.as_deref() else {
            // validate() rejects this configuration before a run starts.
            return Err(FailReason::Path("no rawtherapee profile configured".into()));
        };
        for attempt in 1..=RT_ATTEMPTS {
            let cmd = ToolCommand::new(&self.config.engine_path)
                .arg("-o")
                .arg_path(intermediate)
                .arg("-p")
                .arg_path(profile)
                .args(["-b16f", "-Y", "-q", "-f", "-t", "-c"])
                .arg_path(frame);
            match self.runner.run(&cmd) {
                Ok(out) if !out.status_ok => debug!(attempt, "engine exited non-zero"),
                Ok(_) => {}
                Err(err) => warn!(attempt, %err, "engine invocation failed"),
            }
            if intermediate.is_file() {
                let size = file_size(intermediate);
                if size > MIN_OUTPUT_BYTES {
                    return Ok(());
                }
                warn!(attempt, size, "engine output below viable size, removing");
                let _ = fs::remove_file(intermediate);
            } else {
                warn!(attempt, src = %frame.display(), "engine produced no output");
            }
        }
        Err(FailReason::EngineOutputMissing {
            attempts: RT_ATTEMPTS,
        })
    }
}

/// File size in bytes, 0 for missing files.
pub(crate) fn file_size(path: &Path) -> u64 {
    fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}
