//! # debayer-core
//!
//! Batch pipeline that turns camera raw frames into scene-linear,
//! color-managed deliverables (EXR/TIFF/JPEG).
//!
//! The heavy lifting (demosaicing, color transforms, codecs) is delegated to
//! external tools invoked as black boxes; this crate owns the sequencing:
//!
//! - [`SequenceDiscovery`] - group raw files into ordered frame sequences
//! - [`pathmap`] - mirror source trees under a destination root
//! - [`ExposureEstimator`] - sample a decoded frame for an exposure gain
//! - [`DebayerStage`] - demosaic one frame with validation and bounded retries
//! - [`ConversionStage`] - produce the final per-format outputs
//! - [`Orchestrator`] - drive the whole run and own the scratch space
//!
//! External processes are reached through the [`ToolRunner`] trait so every
//! stage can be exercised without the real binaries installed.

pub mod config;
pub mod convert;
pub mod debayer;
pub mod error;
pub mod exposure;
pub mod metadata;
pub mod pathmap;
pub mod pipeline;
pub mod sequence;
pub mod tools;

pub use config::{DebayerEngine, ExposureMode, FormatSettings, ProcessingConfig};
pub use debayer::{DebayerStage, SkipReason};
pub use error::{Error, Result};
pub use exposure::ExposureEstimator;
pub use pipeline::{FrameOutcome, Orchestrator, RunSummary};
pub use sequence::{Frame, ImageSequence, SequenceDiscovery};
pub use tools::{CommandRunner, ToolCommand, ToolOutput, ToolRunner};
