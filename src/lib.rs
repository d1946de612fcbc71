//! Nether-Anim: variable bit-rate skeletal animation compression
//!
//! **This is a pure codec** - it compresses uniformly sampled skeletal
//! animation clips by searching, per bone and per segment, for the smallest
//! fixed-point bit width that keeps the reconstructed pose within a per-bone
//! error threshold. File format headers and runtime decompression are handled
//! by the caller.
//!
//! # Pipeline
//!
//! ```text
//! AnimationClip (raw quat/vec3 tracks + bone metadata)
//!   -> ClipContext        raw streams, one segment
//!   -> convert rotations  drop-W space when the variant drops W
//!   -> compact constants  clip-constant tracks shrink to one sample
//!   -> range extraction   per-bone min/extent, normalize to [0, 1]
//!   -> segmenting         split long clips into ~16 sample segments
//!   -> per segment:
//!        local-space priming     smallest footprint meeting the threshold
//!        object-space refinement raise bit rates down the bone chain
//!        commit                  pack every track at its chosen bit rate
//! ```
//!
//! # Packed formats
//!
//! Rotations drop their W component (rebuilt as `sqrt(1 - x^2 - y^2 - z^2)`
//! at decode) and store X/Y/Z at N bits each, N picked from a fixed table by
//! the search. Translations and scales store X/Y/Z the same way. Three
//! special cases per track: constant over the segment (one 48-bit sample),
//! raw (full f32 triples), and default (bind pose, no payload at all).
//!
//! # Error metric
//!
//! Reconstruction error is the maximum displacement of two points on a
//! sphere of per-bone `shell_distance` radius, measured in object space
//! through the bone chain, so one scalar threshold is meaningful across
//! bones of very different sizes. See [`TransformErrorMetric`].
//!
//! # Usage
//!
//! ```no_run
//! use nether_anim::{compress_clip, AnimationClip, CompressionSettings, QvvTransformErrorMetric};
//!
//! # fn demo(clip: AnimationClip) -> Result<(), nether_anim::CompressError> {
//! let settings = CompressionSettings::default();
//! let metric = QvvTransformErrorMetric;
//! let compressed = compress_clip(&clip, None, &settings, &metric)?;
//! for _segment in compressed.segments() {
//!     // hand the packed streams to the serializer
//! }
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod formats;
pub mod metric;
pub mod packing;
pub mod quantize;
pub mod settings;
pub mod stream;
pub mod transform;

pub use error::CompressError;
pub use formats::{
    is_constant_bit_rate, is_raw_bit_rate, num_bits_at_bit_rate, BoneBitRate, RotationFormat,
    VectorFormat, HIGHEST_BIT_RATE, INVALID_BIT_RATE, LOWEST_BIT_RATE, NUM_BIT_RATES,
};
pub use metric::{QvvTransformErrorMetric, TransformErrorMetric};
pub use quantize::compress_clip;
pub use settings::{
    CompressionLevel, CompressionSettings, SegmentingSettings, RANGE_REDUCTION_ALL,
    RANGE_REDUCTION_NONE, RANGE_REDUCTION_ROTATIONS, RANGE_REDUCTION_SCALES,
    RANGE_REDUCTION_TRANSLATIONS,
};
pub use stream::clip::{AnimationClip, ClipContext, RawBoneTrack, SegmentContext, TransformMetadata};
pub use stream::{BoneRanges, BoneStreams, RotationTrackStream, TrackStreamRange, VectorTrackStream};
pub use transform::Transform;
