//! Per-class stage planning.
//!
//! A plan is the ordered list of enhancement tool invocations needed to fully
//! process one image. Large inputs get a denoise pass before magnification so
//! artifacts are not magnified; mid-size inputs are magnified first and refined
//! afterwards.

use std::path::{Path, PathBuf};

use serde::Serialize;

use super::classify::SizeClass;

/// The single output format the enhancement tool writes.
pub const OUTPUT_EXTENSION: &str = "png";

/// Where a stage reads its input from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InputSelector {
    /// The source image itself.
    Original,
    /// The output of the previous stage.
    PreviousStage,
}

/// Where a stage writes its output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputSelector {
    /// Mirrored path under the temp folder.
    Temp,
    /// Mirrored path under the destination folder.
    Final,
}

/// Parameters for one external invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct InvocationSpec {
    pub input: InputSelector,
    pub output: OutputSelector,
    /// Magnification factor; 1 is a denoise-only pass.
    pub magnification: u32,
    /// Images processed per batch.
    pub batch: u32,
    /// Tile (split) size in pixels.
    pub split: u32,
}

impl InvocationSpec {
    const fn new(
        input: InputSelector,
        output: OutputSelector,
        magnification: u32,
        batch: u32,
        split: u32,
    ) -> Self {
        Self {
            input,
            output,
            magnification,
            batch,
            split,
        }
    }

    /// Whether this pass only denoises.
    pub fn is_denoise_only(&self) -> bool {
        self.magnification == 1
    }
}

/// Ordered invocations for one image. Empty means pass-through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StagePlan {
    stages: Vec<InvocationSpec>,
}

impl StagePlan {
    pub fn stages(&self) -> &[InvocationSpec] {
        &self.stages
    }

    pub fn is_pass_through(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Product of all stage magnifications (1 for pass-through).
    pub fn total_magnification(&self) -> u32 {
        self.stages.iter().map(|s| s.magnification).product()
    }
}

/// Builds the plan for a size class.
pub fn plan(class: SizeClass) -> StagePlan {
    use InputSelector::{Original, PreviousStage};
    use OutputSelector::{Final, Temp};

    let stages = match class {
        SizeClass::VeryLarge | SizeClass::Large => vec![
            InvocationSpec::new(Original, Temp, 1, 2, 256),
            InvocationSpec::new(PreviousStage, Final, 2, 2, 256),
        ],
        SizeClass::Normal | SizeClass::Small => vec![
            InvocationSpec::new(Original, Temp, 2, 4, 128),
            InvocationSpec::new(PreviousStage, Final, 1, 4, 128),
        ],
        SizeClass::VeryTiny => Vec::new(),
    };

    StagePlan { stages }
}

/// Resolves stage selectors into concrete paths that mirror the source tree.
#[derive(Debug, Clone)]
pub struct StagePaths {
    source_root: PathBuf,
    temp_root: PathBuf,
    destination_root: PathBuf,
}

impl StagePaths {
    pub fn new(
        source_root: impl Into<PathBuf>,
        temp_root: impl Into<PathBuf>,
        destination_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            source_root: source_root.into(),
            temp_root: temp_root.into(),
            destination_root: destination_root.into(),
        }
    }

    pub fn source_root(&self) -> &Path {
        &self.source_root
    }

    pub fn temp_root(&self) -> &Path {
        &self.temp_root
    }

    pub fn destination_root(&self) -> &Path {
        &self.destination_root
    }

    /// Path of `original` relative to the source root.
    ///
    /// Files outside the source root keep only their file name.
    pub fn relative(&self, original: &Path) -> PathBuf {
        match original.strip_prefix(&self.source_root) {
            Ok(rel) => rel.to_path_buf(),
            Err(_) => original
                .file_name()
                .map(PathBuf::from)
                .unwrap_or_else(|| original.to_path_buf()),
        }
    }

    /// Mirrored output location for a stage, before extension normalization.
    pub fn output_for(&self, original: &Path, selector: OutputSelector) -> PathBuf {
        let root = match selector {
            OutputSelector::Temp => &self.temp_root,
            OutputSelector::Final => &self.destination_root,
        };
        root.join(self.relative(original))
    }

    /// Mirrored location under the destination root, keeping the extension.
    pub fn destination_mirror(&self, original: &Path) -> PathBuf {
        self.destination_root.join(self.relative(original))
    }
}

/// Replaces the extension with the tool's output format.
pub fn normalize_output_path(path: &Path) -> PathBuf {
    path.with_extension(OUTPUT_EXTENSION)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_CLASSES: [SizeClass; 5] = [
        SizeClass::VeryTiny,
        SizeClass::Small,
        SizeClass::Normal,
        SizeClass::Large,
        SizeClass::VeryLarge,
    ];

    fn params(plan: &StagePlan) -> Vec<(u32, u32, u32)> {
        plan.stages()
            .iter()
            .map(|s| (s.magnification, s.batch, s.split))
            .collect()
    }

    #[test]
    fn test_very_tiny_is_empty() {
        let plan = plan(SizeClass::VeryTiny);
        assert!(plan.is_pass_through());
        assert_eq!(plan.len(), 0);
        assert_eq!(plan.total_magnification(), 1);
    }

    #[test]
    fn test_large_classes_denoise_first() {
        for class in [SizeClass::Large, SizeClass::VeryLarge] {
            let plan = plan(class);
            assert_eq!(params(&plan), vec![(1, 2, 256), (2, 2, 256)]);
            assert!(plan.stages()[0].is_denoise_only());
        }
    }

    #[test]
    fn test_mid_classes_magnify_first() {
        for class in [SizeClass::Small, SizeClass::Normal] {
            let plan = plan(class);
            assert_eq!(params(&plan), vec![(2, 4, 128), (1, 4, 128)]);
            assert!(plan.stages()[1].is_denoise_only());
        }
    }

    #[test]
    fn test_every_real_plan_doubles_once() {
        for class in ALL_CLASSES.iter().filter(|c| !c.is_pass_through()) {
            let plan = plan(*class);
            assert_eq!(plan.len(), 2, "{}", class);
            assert_eq!(plan.total_magnification(), 2, "{}", class);
        }
    }

    #[test]
    fn test_stage_selectors_chain() {
        for class in ALL_CLASSES.iter().filter(|c| !c.is_pass_through()) {
            let plan = plan(*class);
            let first = plan.stages()[0];
            let second = plan.stages()[1];
            assert_eq!(first.input, InputSelector::Original);
            assert_eq!(first.output, OutputSelector::Temp);
            assert_eq!(second.input, InputSelector::PreviousStage);
            assert_eq!(second.output, OutputSelector::Final);
        }
    }

    #[test]
    fn test_paths_mirror_source_tree() {
        let paths = StagePaths::new("/work/Source", "/work/Temp", "/work/Destination");
        let original = Path::new("/work/Source/vol1/page 02.jpg");

        assert_eq!(paths.relative(original), PathBuf::from("vol1/page 02.jpg"));
        assert_eq!(
            normalize_output_path(&paths.output_for(original, OutputSelector::Temp)),
            PathBuf::from("/work/Temp/vol1/page 02.png")
        );
        assert_eq!(
            normalize_output_path(&paths.output_for(original, OutputSelector::Final)),
            PathBuf::from("/work/Destination/vol1/page 02.png")
        );
        assert_eq!(
            paths.destination_mirror(original),
            PathBuf::from("/work/Destination/vol1/page 02.jpg")
        );
    }

    #[test]
    fn test_paths_outside_source_keep_file_name() {
        let paths = StagePaths::new("/work/Source", "/work/Temp", "/work/Destination");
        let stray = Path::new("/elsewhere/cover.bmp");
        assert_eq!(
            paths.output_for(stray, OutputSelector::Final),
            PathBuf::from("/work/Destination/cover.bmp")
        );
    }

    #[test]
    fn test_normalize_output_path_without_extension() {
        assert_eq!(
            normalize_output_path(Path::new("/tmp/scan")),
            PathBuf::from("/tmp/scan.png")
        );
    }
}
