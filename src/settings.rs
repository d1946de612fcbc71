//! Compression settings

use crate::formats::{RotationFormat, VectorFormat};

// ============================================================================
// Range Reduction Flags
// ============================================================================

/// No channel is range-reduced
pub const RANGE_REDUCTION_NONE: u8 = 0;
/// Range-reduce rotation tracks
pub const RANGE_REDUCTION_ROTATIONS: u8 = 1;
/// Range-reduce translation tracks
pub const RANGE_REDUCTION_TRANSLATIONS: u8 = 2;
/// Range-reduce scale tracks
pub const RANGE_REDUCTION_SCALES: u8 = 4;
/// Range-reduce every channel
pub const RANGE_REDUCTION_ALL: u8 =
    RANGE_REDUCTION_ROTATIONS | RANGE_REDUCTION_TRANSLATIONS | RANGE_REDUCTION_SCALES;

/// How much of the permutation space the object-space refinement explores
///
/// Higher levels try larger bit-rate increments per outer iteration, which
/// converges in fewer iterations and can find smaller footprints at the cost
/// of more error evaluations per iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CompressionLevel {
    /// Single-increment permutations only
    Low,
    /// Single-increment permutations only
    Medium,
    /// Adds two-increment permutations
    High,
    /// Adds three-increment permutations
    Highest,
}

/// Settings for splitting a clip into segments
#[derive(Debug, Clone, Copy)]
pub struct SegmentingSettings {
    pub enabled: bool,

    /// Preferred samples per segment
    pub ideal_num_samples: u32,
    /// A clip at most this long stays whole
    pub max_num_samples: u32,

    /// Range reduction applied per segment, on top of the clip-wide pass.
    /// Segment-normalized channels are what make the constant bit rate legal.
    pub range_reduction: u8,
}

impl Default for SegmentingSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            ideal_num_samples: 16,
            max_num_samples: 31,
            range_reduction: RANGE_REDUCTION_NONE,
        }
    }
}

/// Settings driving the whole compression pipeline
#[derive(Debug, Clone, Copy)]
pub struct CompressionSettings {
    pub rotation_format: RotationFormat,
    pub translation_format: VectorFormat,
    pub scale_format: VectorFormat,

    /// Clip-wide range reduction flags
    pub range_reduction: u8,

    pub segmenting: SegmentingSettings,

    pub level: CompressionLevel,

    /// Default object-space error threshold, used for bones whose metadata
    /// does not override it
    pub error_threshold: f32,

    /// Componentwise threshold below which a rotation track is clip-constant
    pub constant_rotation_threshold: f32,
    /// Componentwise threshold below which a translation track is clip-constant
    pub constant_translation_threshold: f32,
    /// Componentwise threshold below which a scale track is clip-constant
    pub constant_scale_threshold: f32,
}

impl Default for CompressionSettings {
    fn default() -> Self {
        Self {
            rotation_format: RotationFormat::QuatDropWVariable,
            translation_format: VectorFormat::Vector3Variable,
            scale_format: VectorFormat::Vector3Variable,
            range_reduction: RANGE_REDUCTION_ALL,
            segmenting: SegmentingSettings::default(),
            level: CompressionLevel::Medium,
            error_threshold: 0.01,
            constant_rotation_threshold: 0.00001,
            constant_translation_threshold: 0.001,
            constant_scale_threshold: 0.00001,
        }
    }
}

impl CompressionSettings {
    /// Whether any channel format participates in the variable search
    #[inline]
    pub fn is_any_variable(&self) -> bool {
        self.rotation_format.is_variable()
            || self.translation_format.is_variable()
            || self.scale_format.is_variable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_ordering() {
        assert!(CompressionLevel::Low < CompressionLevel::Medium);
        assert!(CompressionLevel::Medium < CompressionLevel::High);
        assert!(CompressionLevel::High < CompressionLevel::Highest);
    }

    #[test]
    fn test_default_settings_are_variable() {
        let settings = CompressionSettings::default();
        assert!(settings.is_any_variable());
        assert_eq!(settings.range_reduction, RANGE_REDUCTION_ALL);
    }
}
