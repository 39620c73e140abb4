//! Resolution probe.
//!
//! Reads only the image header. Anything unreadable reports 0 pixels, which
//! classifies as pass-through.

use std::path::Path;

use tracing::warn;

/// Width × height of the image at `path`, or 0 if it cannot be read.
pub fn pixel_count(path: &Path) -> u64 {
    match image::image_dimensions(path) {
        Ok((width, height)) => u64::from(width) * u64::from(height),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Could not read image dimensions");
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_reads_header_dimensions() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("page.png");
        image::RgbImage::new(30, 20).save(&path).unwrap();

        assert_eq!(pixel_count(&path), 600);
    }

    #[test]
    fn test_unreadable_is_zero() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("broken.png");
        std::fs::write(&path, b"not an image").unwrap();

        assert_eq!(pixel_count(&path), 0);
        assert_eq!(pixel_count(&temp.path().join("missing.png")), 0);
    }
}
