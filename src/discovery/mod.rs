//! Source image discovery.
//!
//! Lists every image under the source root in natural order and probes its
//! pixel count from the header.

pub mod natural;
pub mod probe;

use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::WalkDir;

pub use natural::compare_natural;
pub use probe::pixel_count;

/// Extensions treated as images (compared case-insensitively).
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "gif", "tif", "tiff", "webp"];

/// Whether `path` has one of [`IMAGE_EXTENSIONS`].
pub fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|known| known.eq_ignore_ascii_case(ext))
        })
}

/// Recursively lists images under `root`, sorted naturally by path.
///
/// Unreadable entries below the root are logged and skipped.
///
/// # Errors
///
/// Returns an error if `root` is not a readable directory.
pub fn discover_images(root: &Path) -> io::Result<Vec<PathBuf>> {
    if !root.is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("source directory '{}' does not exist", root.display()),
        ));
    }

    let mut images: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(error = %e, "Skipping unreadable entry");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| is_image(path))
        .collect();

    images.sort_by(|a, b| {
        let a = a.strip_prefix(root).unwrap_or(a).to_string_lossy();
        let b = b.strip_prefix(root).unwrap_or(b).to_string_lossy();
        compare_natural(&a, &b)
    });

    debug!(root = %root.display(), count = images.len(), "Discovered images");
    Ok(images)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"x").unwrap();
    }

    #[test]
    fn test_is_image() {
        assert!(is_image(Path::new("a.PNG")));
        assert!(is_image(Path::new("dir/b.jpeg")));
        assert!(!is_image(Path::new("notes.txt")));
        assert!(!is_image(Path::new("no_extension")));
    }

    #[test]
    fn test_discovery_is_recursive_and_natural() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        touch(root, "ch10/1.png");
        touch(root, "ch2/10.jpg");
        touch(root, "ch2/9.jpg");
        touch(root, "ch2/readme.txt");
        touch(root, "cover.PNG");

        let found: Vec<String> = discover_images(root)
            .unwrap()
            .iter()
            .map(|p| p.strip_prefix(root).unwrap().to_string_lossy().replace('\\', "/"))
            .collect();

        assert_eq!(found, vec!["ch2/9.jpg", "ch2/10.jpg", "ch10/1.png", "cover.PNG"]);
    }

    #[test]
    fn test_missing_root_is_error() {
        let temp = TempDir::new().unwrap();
        let err = discover_images(&temp.path().join("Source")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
