//! Pipeline orchestration.
//!
//! Drives discovery output through the stages: per sequence, ensure the
//! destination directory, decide the exposure gain, then debayer and convert
//! every frame and clean up its intermediate. The process-scoped temp
//! workspace is owned here and removed on every exit path by RAII.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use rayon::prelude::*;
use tempfile::TempDir;
use tracing::{debug, info, warn};

use crate::config::{ExposureMode, ProcessingConfig};
use crate::convert::ConversionStage;
use crate::debayer::{DebayerOutcome, DebayerStage, FailReason, SkipReason};
use crate::error::{Error, Result};
use crate::exposure::ExposureEstimator;
use crate::metadata::MetadataPropagator;
use crate::pathmap;
use crate::sequence::{Frame, ImageSequence};
use crate::tools::ToolRunner;

/// Result of processing one frame.
#[derive(Debug)]
pub enum FrameOutcome {
    /// At least one output was produced.
    Converted {
        /// Final output paths, one per successful format.
        outputs: Vec<PathBuf>,
        /// Wall time for debayer plus all conversions.
        elapsed: Duration,
        /// `true` when some requested formats failed.
        partial: bool,
    },
    /// The frame was skipped before the engine ran.
    Skipped(SkipReason),
    /// The frame was abandoned.
    Failed(FailReason),
}

/// Aggregate counters for a run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    /// Sequences processed.
    pub sequences: usize,
    /// Frames with every requested format produced.
    pub converted: usize,
    /// Frames with some but not all formats produced.
    pub partial: usize,
    /// Frames skipped by policy.
    pub skipped: usize,
    /// Frames abandoned.
    pub failed: usize,
}

impl RunSummary {
    fn record(&mut self, outcome: &FrameOutcome) {
        match outcome {
            FrameOutcome::Converted { partial: false, .. } => self.converted += 1,
            FrameOutcome::Converted { partial: true, .. } => self.partial += 1,
            FrameOutcome::Skipped(_) => self.skipped += 1,
            FrameOutcome::Failed(_) => self.failed += 1,
        }
    }
}

/// Owns the run: configuration, tool runner, estimator and scratch space.
pub struct Orchestrator<'a> {
    config: &'a ProcessingConfig,
    runner: &'a dyn ToolRunner,
    metadata: MetadataPropagator<'a>,
    estimator: ExposureEstimator,
    scratch: TempDir,
}

impl<'a> Orchestrator<'a> {
    /// Validates the configuration and creates the scratch workspace.
    pub fn new(config: &'a ProcessingConfig, runner: &'a dyn ToolRunner) -> Result<Self> {
        config.validate()?;
        let scratch = TempDir::new()?;
        debug!(path = %scratch.path().display(), "created scratch workspace");
        Ok(Self {
            config,
            runner,
            metadata: MetadataPropagator::new(config.metadata_tool.as_deref(), runner),
            estimator: ExposureEstimator::new(
                config.autoexposure_target,
                config.autoexposure_center,
            ),
            scratch,
        })
    }

    /// Root of the process-scoped scratch workspace.
    pub fn scratch_root(&self) -> &Path {
        self.scratch.path()
    }

    /// Processes every sequence; fails fast when there is nothing to do.
    pub fn run(&self, sequences: &[ImageSequence]) -> Result<RunSummary> {
        if sequences.is_empty() {
            return Err(Error::NoSequences);
        }
        let mut summary = RunSummary {
            sequences: sequences.len(),
            ..Default::default()
        };
        for (seq_index, sequence) in sequences.iter().enumerate() {
            for outcome in self.process_sequence(seq_index, sequence)? {
                summary.record(&outcome);
            }
        }
        info!(
            sequences = summary.sequences,
            converted = summary.converted,
            partial = summary.partial,
            skipped = summary.skipped,
            failed = summary.failed,
            "run complete"
        );
        Ok(summary)
    }

    fn process_sequence(
        &self,
        seq_index: usize,
        sequence: &ImageSequence,
    ) -> Result<Vec<FrameOutcome>> {
        if sequence.is_empty() {
            return Ok(Vec::new());
        }
        // Short runs of 1-2 frames are usually stills, not sequences.
        if sequence.len() > 2 {
            info!(
                dir = %sequence.dir.display(),
                frames = sequence.len(),
                "debayering image sequence"
            );
        }

        let dest_dir = pathmap::map(&sequence.dir, &sequence.root, &self.config.dest_root)?;
        fs::create_dir_all(&dest_dir)?;

        // The sequence gain is fixed before any frame is converted.
        let gain = self.sequence_gain(seq_index, sequence);

        let process = |(frame_index, frame): (usize, &Frame)| {
            self.process_frame(seq_index, frame_index, frame, sequence, gain)
        };
        let outcomes: Vec<FrameOutcome> = if self.config.threads == 1 {
            sequence.frames.iter().enumerate().map(process).collect()
        } else {
            sequence
                .frames
                .par_iter()
                .enumerate()
                .map(process)
                .collect()
        };
        Ok(outcomes)
    }

    /// Gain shared by every frame of the sequence.
    ///
    /// Static mode debayers the middle frame into scratch purely to sample
    /// it; the scratch output is discarded afterwards. Any failure degrades
    /// to gain 1.0 and the run continues.
    fn sequence_gain(&self, seq_index: usize, sequence: &ImageSequence) -> f32 {
        match self.config.exposure {
            ExposureMode::None | ExposureMode::PerFrame => 1.0,
            ExposureMode::Fixed(gain) => gain,
            ExposureMode::Static => self.static_gain(seq_index, sequence),
        }
    }

    fn static_gain(&self, seq_index: usize, sequence: &ImageSequence) -> f32 {
        let Some(middle) = sequence.middle_frame() else {
            return 1.0;
        };
        let result = (|| {
            let dest_stem = self.dest_stem(&middle.path, &sequence.root)?;
            let tmp_dir = self.frame_scratch(seq_index, usize::MAX)?;
            let stage = DebayerStage::new(self.config, self.runner, &self.metadata);
            Ok::<_, Error>(match stage.debayer(&middle.path, &dest_stem, &tmp_dir) {
                DebayerOutcome::Debayered(sample) => {
                    let gain = self.estimator.estimate(&sample);
                    let _ = fs::remove_file(&sample);
                    gain
                }
                _ => None,
            })
        })();
        match result {
            Ok(Some(gain)) => {
                info!(gain, frame = %middle.path.display(), "static exposure from middle frame");
                gain
            }
            Ok(None) => {
                warn!(
                    frame = %middle.path.display(),
                    "could not compute sequence exposure, using gain 1.0"
                );
                1.0
            }
            Err(err) => {
                warn!(%err, "could not compute sequence exposure, using gain 1.0");
                1.0
            }
        }
    }

    fn process_frame(
        &self,
        seq_index: usize,
        frame_index: usize,
        frame: &Frame,
        sequence: &ImageSequence,
        gain: f32,
    ) -> FrameOutcome {
        let start = Instant::now();
        info!(src = %frame.path.display(), "processing frame");

        let dest_stem = match self.dest_stem(&frame.path, &sequence.root) {
            Ok(stem) => stem,
            Err(err) => return FrameOutcome::Failed(FailReason::Path(err.to_string())),
        };
        let tmp_dir = match self.frame_scratch(seq_index, frame_index) {
            Ok(dir) => dir,
            Err(err) => return FrameOutcome::Failed(FailReason::Path(err.to_string())),
        };

        let stage = DebayerStage::new(self.config, self.runner, &self.metadata);
        let intermediate = match stage.debayer(&frame.path, &dest_stem, &tmp_dir) {
            DebayerOutcome::Debayered(path) => path,
            DebayerOutcome::Skipped(reason) => return FrameOutcome::Skipped(reason),
            DebayerOutcome::Failed(reason) => return FrameOutcome::Failed(reason),
        };

        let converter = ConversionStage::new(self.config, self.runner, &self.metadata, &self.estimator);
        let mut outputs = Vec::new();
        let mut failures = 0usize;
        for format in &self.config.output_formats {
            match converter.convert(&intermediate, &dest_stem, format, gain) {
                Some(output) => {
                    info!(dst = %output.display(), "wrote output");
                    outputs.push(output);
                }
                None => failures += 1,
            }
        }

        // The intermediate is only needed until every format has been attempted.
        let _ = fs::remove_file(&intermediate);

        let elapsed = start.elapsed();
        info!(
            src = %frame.path.display(),
            elapsed_ms = elapsed.as_millis() as u64,
            outputs = outputs.len(),
            "frame done"
        );
        if outputs.is_empty() {
            FrameOutcome::Failed(FailReason::AllFormatsFailed)
        } else {
            FrameOutcome::Converted {
                outputs,
                elapsed,
                partial: failures > 0,
            }
        }
    }

    /// Mapped destination path for a frame, with the raw extension removed.
    fn dest_stem(&self, frame: &Path, root: &Path) -> Result<PathBuf> {
        let dest = pathmap::map(frame, root, &self.config.dest_root)?;
        Ok(dest.with_extension(""))
    }

    /// Per-frame scratch directory; unique so parallel frames cannot collide.
    fn frame_scratch(&self, seq_index: usize, frame_index: usize) -> Result<PathBuf> {
        let dir = self
            .scratch
            .path()
            .join(format!("s{seq_index:03}_f{frame_index:05}"));
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }
}
