//! Raw frame sequence discovery.
//!
//! Files are grouped into ordered sequences by (directory, stem prefix,
//! extension), where the stem prefix is the file stem with its trailing
//! frame number removed. Ordering is numeric frame index order, not lexical,
//! so `shot.2.cr2` sorts before `shot.10.cr2`.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use tracing::{debug, warn};

use crate::error::Result;

/// One raw file inside a sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Absolute source path.
    pub path: PathBuf,
    /// Numeric frame index parsed from the file stem, if any.
    pub index: Option<u64>,
    /// Lowercased file extension.
    pub extension: String,
}

/// An ordered run of frames sharing a directory, naming pattern and extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSequence {
    /// Directory containing the frames.
    pub dir: PathBuf,
    /// Top-level input root this sequence was discovered under; destination
    /// paths are reconstructed relative to it.
    pub root: PathBuf,
    /// Frames in numeric index order.
    pub frames: Vec<Frame>,
}

impl ImageSequence {
    /// Number of frames.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Returns `true` if the sequence holds no frames.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// The middle frame, used for static exposure sampling.
    pub fn middle_frame(&self) -> Option<&Frame> {
        self.frames.get(self.frames.len() / 2)
    }
}

/// Recursive scanner producing [`ImageSequence`]s for recognized raw files.
pub struct SequenceDiscovery {
    extensions: Vec<String>,
    frame_number: Regex,
}

impl SequenceDiscovery {
    /// Creates a scanner for the given raw extensions (matched case-insensitively).
    pub fn new<I, S>(extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            extensions: extensions
                .into_iter()
                .map(|e| e.as_ref().to_lowercase())
                .collect(),
            frame_number: Regex::new(r"^(?P<prefix>.*?)(?P<number>\d+)$")
                .expect("hardcoded pattern"),
        }
    }

    /// Scans one input path.
    ///
    /// Directories are walked recursively; a raw file given directly is
    /// wrapped as a one-frame sequence rooted at its parent directory. An
    /// empty result is not an error by itself.
    pub fn scan(&self, input: &Path) -> Result<Vec<ImageSequence>> {
        if input.is_file() {
            return Ok(self.wrap_single(input));
        }
        let mut sequences = Vec::new();
        self.scan_dir(input, input, &mut sequences)?;
        sequences.sort_by(|a, b| a.frames[0].path.cmp(&b.frames[0].path));
        debug!(input = %input.display(), sequences = sequences.len(), "discovery complete");
        Ok(sequences)
    }

    fn scan_dir(&self, root: &Path, dir: &Path, out: &mut Vec<ImageSequence>) -> Result<()> {
        let mut groups: BTreeMap<(String, String), Vec<Frame>> = BTreeMap::new();

        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_dir() {
                self.scan_dir(root, &path, out)?;
                continue;
            }
            let Some(frame) = self.parse_frame(&path) else {
                continue;
            };
            let prefix = self.stem_prefix(&path);
            groups
                .entry((prefix, frame.extension.clone()))
                .or_default()
                .push(frame);
        }

        for ((_prefix, _ext), mut frames) in groups {
            frames.sort_by(|a, b| a.index.cmp(&b.index).then_with(|| a.path.cmp(&b.path)));
            out.push(ImageSequence {
                dir: dir.to_path_buf(),
                root: root.to_path_buf(),
                frames,
            });
        }
        Ok(())
    }

    fn wrap_single(&self, path: &Path) -> Vec<ImageSequence> {
        let Some(frame) = self.parse_frame(path) else {
            warn!(path = %path.display(), "not a recognized raw file, ignoring");
            return Vec::new();
        };
        let parent = path.parent().unwrap_or(Path::new(".")).to_path_buf();
        vec![ImageSequence {
            dir: parent.clone(),
            root: parent,
            frames: vec![frame],
        }]
    }

    /// Builds a [`Frame`] if `path` carries a recognized raw extension.
    fn parse_frame(&self, path: &Path) -> Option<Frame> {
        let extension = path.extension()?.to_str()?.to_lowercase();
        if !self.extensions.contains(&extension) {
            return None;
        }
        let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
        let index = self
            .frame_number
            .captures(stem)
            .and_then(|caps| caps["number"].parse::<u64>().ok());
        Some(Frame {
            path: path.to_path_buf(),
            index,
            extension,
        })
    }

    /// File stem with any trailing frame number stripped.
    fn stem_prefix(&self, path: &Path) -> String {
        let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
        match self.frame_number.captures(stem) {
            Some(caps) => caps["prefix"].to_string(),
            None => stem.to_string(),
        }
    }
}
