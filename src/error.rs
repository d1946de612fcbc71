//! Error types for clip validation and compression

use thiserror::Error;

/// Errors that can occur when building or compressing a clip
///
/// These are boundary failures: a malformed input never enters the bit-rate
/// search. A search that cannot reach the requested precision is NOT an
/// error; the committed bit rates are the lowest-error achievable and the
/// residual can be inspected by a stats collector.
#[derive(Debug, Error)]
pub enum CompressError {
    /// Clip has no bones
    #[error("Clip has no bones")]
    ZeroBones,

    /// Clip has no samples
    #[error("Clip has no samples")]
    ZeroSamples,

    /// Sample rate must be positive and finite
    #[error("Invalid sample rate: {0}")]
    InvalidSampleRate(f32),

    /// A bone track holds a different number of samples than the clip
    #[error("Bone {bone_index} track has {actual} samples, expected {expected}")]
    TrackLengthMismatch {
        bone_index: u16,
        expected: u32,
        actual: u32,
    },

    /// Metadata array length does not match the bone count
    #[error("Metadata holds {actual} entries, expected {expected}")]
    MetadataLengthMismatch { expected: u16, actual: u16 },

    /// Parents must come before their children
    #[error("Bone {bone_index} has parent {parent_index}, parents must precede children")]
    InvalidParentIndex { bone_index: u16, parent_index: u16 },

    /// Segmenting settings are inconsistent
    #[error("Invalid segmenting settings: ideal {ideal} > max {max}")]
    InvalidSegmentingSettings { ideal: u32, max: u32 },

    /// Additive base bone count does not match the clip
    #[error("Additive base has {base} bones, clip has {clip}")]
    AdditiveBaseBoneMismatch { base: u16, clip: u16 },

    /// Variable vector formats quantize normalized samples only
    #[error("Variable {channel} format requires {channel} range reduction")]
    VariableFormatRequiresRangeReduction { channel: &'static str },

    /// Segment range reduction on a channel the clip does not range-reduce
    #[error("Segment range reduction flags 0x{flags:02x} are not a subset of the clip flags")]
    SegmentRangeReductionWithoutClip { flags: u8 },
}
