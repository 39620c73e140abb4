//! Resolution-based size classification.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Lower bound (inclusive) of `Small`: 480x360.
pub const SMALL_MIN_PIXELS: u64 = 172_800;
/// Lower bound (inclusive) of `Normal`: 1024x768.
pub const NORMAL_MIN_PIXELS: u64 = 786_432;
/// Lower bound (inclusive) of `Large`: 5000x4500.
pub const LARGE_MIN_PIXELS: u64 = 22_500_000;
/// Lower bound (inclusive) of `VeryLarge`: 10000x10000.
pub const VERY_LARGE_MIN_PIXELS: u64 = 100_000_000;

/// Discrete bucket derived from an image's pixel count.
///
/// Variants are declared in ascending threshold order, so the derived `Ord`
/// matches pixel-count order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizeClass {
    VeryTiny,
    Small,
    Normal,
    Large,
    VeryLarge,
}

impl SizeClass {
    /// Classifies a pixel count. Zero (unreadable image) lands in `VeryTiny`.
    pub fn from_pixel_count(pixels: u64) -> Self {
        if pixels >= VERY_LARGE_MIN_PIXELS {
            SizeClass::VeryLarge
        } else if pixels >= LARGE_MIN_PIXELS {
            SizeClass::Large
        } else if pixels >= NORMAL_MIN_PIXELS {
            SizeClass::Normal
        } else if pixels >= SMALL_MIN_PIXELS {
            SizeClass::Small
        } else {
            SizeClass::VeryTiny
        }
    }

    /// Whether images of this class bypass the enhancement tool.
    pub fn is_pass_through(&self) -> bool {
        matches!(self, SizeClass::VeryTiny)
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            SizeClass::VeryTiny => "very_tiny",
            SizeClass::Small => "small",
            SizeClass::Normal => "normal",
            SizeClass::Large => "large",
            SizeClass::VeryLarge => "very_large",
        }
    }
}

impl std::fmt::Display for SizeClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// An image queued for the pipeline. Immutable once classified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassifiedImage {
    path: PathBuf,
    pixel_count: u64,
    size_class: SizeClass,
}

impl ClassifiedImage {
    pub fn new(path: impl Into<PathBuf>, pixel_count: u64) -> Self {
        Self {
            path: path.into(),
            pixel_count,
            size_class: SizeClass::from_pixel_count(pixel_count),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn pixel_count(&self) -> u64 {
        self.pixel_count
    }

    pub fn size_class(&self) -> SizeClass {
        self.size_class
    }
}

/// Classifies every path with the given probe, preserving input order.
pub fn classify_all<F>(paths: Vec<PathBuf>, mut probe: F) -> Vec<ClassifiedImage>
where
    F: FnMut(&Path) -> u64,
{
    paths
        .into_iter()
        .map(|path| {
            let pixels = probe(&path);
            ClassifiedImage::new(path, pixels)
        })
        .collect()
}
