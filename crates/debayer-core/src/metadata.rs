//! Metadata propagation between images.
//!
//! Embedded tags from the source raw are carried onto intermediates and tif
//! outputs with an exiftool-style external tool. A missing tool is a
//! degraded mode: warned once, never fatal.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, warn};

use crate::tools::{ToolCommand, ToolRunner};

/// Result of one metadata copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataOutcome {
    /// Tags were copied.
    Applied,
    /// No metadata tool is configured.
    Unavailable,
    /// The tool ran but reported an error.
    Failed,
}

/// Copies embedded tags from a source image onto a destination in place.
pub struct MetadataPropagator<'a> {
    tool: Option<&'a Path>,
    runner: &'a dyn ToolRunner,
    warned: AtomicBool,
}

impl<'a> MetadataPropagator<'a> {
    /// Creates a propagator; `tool` of `None` disables copying.
    pub fn new(tool: Option<&'a Path>, runner: &'a dyn ToolRunner) -> Self {
        Self {
            tool,
            runner,
            warned: AtomicBool::new(false),
        }
    }

    /// Overwrites `dst`'s tags in place from `src`.
    pub fn copy(&self, src: &Path, dst: &Path) -> MetadataOutcome {
        let Some(tool) = self.tool else {
            if !self.warned.swap(true, Ordering::Relaxed) {
                warn!("no metadata tool configured, tags will not be copied");
            }
            return MetadataOutcome::Unavailable;
        };

        let cmd = ToolCommand::new(tool)
            .arg("-overwrite_original")
            .arg("-tagsFromFile")
            .arg_path(src)
            .arg_path(dst);
        match self.runner.run(&cmd) {
            Ok(out) if out.status_ok => {
                debug!(src = %src.display(), dst = %dst.display(), "copied metadata");
                MetadataOutcome::Applied
            }
            Ok(out) => {
                warn!(dst = %dst.display(), stderr = %out.stderr.trim(), "metadata copy failed");
                MetadataOutcome::Failed
            }
            Err(err) => {
                warn!(dst = %dst.display(), %err, "metadata tool invocation failed");
                MetadataOutcome::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::tools::ToolOutput;
    use std::path::PathBuf;
    use std::sync::Mutex;

    struct Recorder {
        calls: Mutex<Vec<ToolCommand>>,
        ok: bool,
    }

    impl ToolRunner for Recorder {
        fn run(&self, cmd: &ToolCommand) -> Result<ToolOutput> {
            self.calls.lock().unwrap().push(cmd.clone());
            Ok(ToolOutput {
                status_ok: self.ok,
                stderr: String::new(),
            })
        }
    }

    #[test]
    fn test_unavailable_without_tool() {
        let runner = Recorder {
            calls: Mutex::new(Vec::new()),
            ok: true,
        };
        let propagator = MetadataPropagator::new(None, &runner);
        let outcome = propagator.copy(Path::new("a.cr2"), Path::new("b.tif"));
        assert_eq!(outcome, MetadataOutcome::Unavailable);
        assert!(runner.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_copy_invokes_tool_in_place() {
        let runner = Recorder {
            calls: Mutex::new(Vec::new()),
            ok: true,
        };
        let tool = PathBuf::from("/usr/bin/exiftool");
        let propagator = MetadataPropagator::new(Some(&tool), &runner);
        let outcome = propagator.copy(Path::new("/in/a.cr2"), Path::new("/out/b.tif"));
        assert_eq!(outcome, MetadataOutcome::Applied);
        let calls = runner.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].has_arg("-overwrite_original"));
        assert_eq!(calls[0].arg_after("-tagsFromFile"), Some("/in/a.cr2"));
        assert_eq!(calls[0].args.last().map(String::as_str), Some("/out/b.tif"));
    }

    #[test]
    fn test_tool_error_reports_failure() {
        let runner = Recorder {
            calls: Mutex::new(Vec::new()),
            ok: false,
        };
        let tool = PathBuf::from("exiftool");
        let propagator = MetadataPropagator::new(Some(&tool), &runner);
        assert_eq!(
            propagator.copy(Path::new("a.cr2"), Path::new("b.tif")),
            MetadataOutcome::Failed
        );
    }
}
