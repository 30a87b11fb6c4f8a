//! Source-to-destination path mapping.
//!
//! A frame discovered under an input root is written under the destination
//! root with the same relative structure. The root must be a structural
//! prefix of the source path; anything else is a configuration error rather
//! than a silently garbled destination.

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Maps `source` from under `root` to the same relative location under `dest_root`.
pub fn map(source: &Path, root: &Path, dest_root: &Path) -> Result<PathBuf> {
    let relative = source.strip_prefix(root).map_err(|_| Error::NotAPrefix {
        root: root.to_path_buf(),
        path: source.to_path_buf(),
    })?;
    Ok(dest_root.join(relative))
}

/// Appends `.{format}` to a stem path without touching existing dots.
///
/// `Path::with_extension` would turn `shot.0001` into `shot.exr`, losing the
/// frame number, so the extension is appended textually.
pub fn with_format(stem: &Path, format: &str) -> PathBuf {
    let mut os = stem.as_os_str().to_os_string();
    os.push(".");
    os.push(format);
    PathBuf::from(os)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_reconstructs_relative_path() {
        let dest = map(
            Path::new("/a/b/c/img.raw"),
            Path::new("/a/b"),
            Path::new("/out"),
        )
        .unwrap();
        assert_eq!(dest, PathBuf::from("/out/c/img.raw"));
    }

    #[test]
    fn test_map_root_equals_source_dir() {
        let dest = map(Path::new("/a/b"), Path::new("/a/b"), Path::new("/out")).unwrap();
        assert_eq!(dest, PathBuf::from("/out"));
    }

    #[test]
    fn test_map_rejects_non_prefix_root() {
        // "/a/b" appears as a substring but not as a path prefix.
        let err = map(
            Path::new("/x/a/b/img.raw"),
            Path::new("/a/b"),
            Path::new("/out"),
        )
        .unwrap_err();
        assert!(matches!(err, Error::NotAPrefix { .. }));
    }

    #[test]
    fn test_with_format_preserves_frame_number() {
        assert_eq!(
            with_format(Path::new("/out/shot.0001"), "exr"),
            PathBuf::from("/out/shot.0001.exr")
        );
        assert_eq!(
            with_format(Path::new("/out/photo"), "jpg"),
            PathBuf::from("/out/photo.jpg")
        );
    }

}
