//! Clip contexts
//!
//! [`AnimationClip`] is the ingestion boundary: uniformly sampled raw tracks
//! plus per-bone metadata. [`ClipContext`] is the working representation the
//! pipeline mutates in place: flat arrays of segments, streams, ranges and
//! metadata. Contexts reference each other by index, never by pointer; bones
//! are ordered parents-before-children.

use glam::{Quat, Vec3A, Vec4};
use smallvec::SmallVec;

use crate::error::CompressError;
use crate::formats::{RotationFormat, VectorFormat, INVALID_BIT_RATE};
use crate::settings::CompressionSettings;
use crate::stream::{
    BoneRanges, BoneStreams, RotationTrackStream, TrackStream, TrackStreamRange, VectorTrackStream,
};

/// Rotation angle under which a constant rotation track counts as default
const DEFAULT_ROTATION_THRESHOLD_ANGLE: f32 = 0.00284714461;

/// Componentwise threshold for default translation (zero) and scale (one)
const DEFAULT_VECTOR_THRESHOLD: f32 = 0.00001;

/// Raw sampled tracks of one bone
#[derive(Debug, Clone)]
pub struct RawBoneTrack {
    /// One rotation per clip sample, unit quaternions
    pub rotations: Vec<Quat>,
    /// One translation per clip sample
    pub translations: Vec<Vec3A>,
    /// One scale per clip sample
    pub scales: Vec<Vec3A>,
}

/// Per-bone compression metadata
#[derive(Debug, Clone, Copy)]
pub struct TransformMetadata {
    /// Parent bone, `None` for roots; parents must precede children
    pub parent_index: Option<u16>,
    /// Object-space error threshold for this bone
    pub precision: f32,
    /// Radius of the error metric's probe sphere
    pub shell_distance: f32,
}

/// A uniformly sampled animation clip, the input to compression
#[derive(Debug, Clone)]
pub struct AnimationClip {
    pub bones: Vec<RawBoneTrack>,
    pub metadata: Vec<TransformMetadata>,
    /// Samples per second
    pub sample_rate: f32,
}

impl AnimationClip {
    /// Number of samples per track
    pub fn num_samples(&self) -> u32 {
        self.bones
            .first()
            .map(|bone| bone.rotations.len() as u32)
            .unwrap_or(0)
    }

    /// Clip duration in seconds
    pub fn duration(&self) -> f32 {
        let num_samples = self.num_samples();
        if num_samples <= 1 {
            0.0
        } else {
            (num_samples - 1) as f32 / self.sample_rate
        }
    }
}

/// A contiguous range of clip samples, bit-rate searched as a unit
#[derive(Debug, Clone)]
pub struct SegmentContext {
    pub bone_streams: Vec<BoneStreams>,
    /// Per-bone segment ranges, filled when segment range reduction runs
    pub ranges: Vec<BoneRanges>,

    pub num_samples: u32,
    pub clip_sample_offset: u32,
    pub segment_index: u32,

    pub are_rotations_normalized: bool,
    pub are_translations_normalized: bool,
    pub are_scales_normalized: bool,
}

/// The working clip representation mutated by the pipeline
#[derive(Debug, Clone)]
pub struct ClipContext {
    segments: Vec<SegmentContext>,
    /// Per-bone clip ranges
    pub ranges: Vec<BoneRanges>,
    pub metadata: Vec<TransformMetadata>,

    pub num_bones: u16,
    pub num_samples: u32,
    pub sample_rate: f32,
    pub duration: f32,

    pub are_rotations_normalized: bool,
    pub are_translations_normalized: bool,
    pub are_scales_normalized: bool,

    /// False once every scale track is default
    pub has_scale: bool,
    pub has_additive_base: bool,
}

impl ClipContext {
    /// Build the initial single-segment context from a raw clip
    pub fn build(clip: &AnimationClip) -> Result<Self, CompressError> {
        let num_bones = clip.bones.len();
        if num_bones == 0 {
            return Err(CompressError::ZeroBones);
        }
        if num_bones != clip.metadata.len() {
            return Err(CompressError::MetadataLengthMismatch {
                expected: num_bones as u16,
                actual: clip.metadata.len() as u16,
            });
        }
        if !clip.sample_rate.is_finite() || clip.sample_rate <= 0.0 {
            return Err(CompressError::InvalidSampleRate(clip.sample_rate));
        }

        let num_samples = clip.num_samples();
        if num_samples == 0 {
            return Err(CompressError::ZeroSamples);
        }

        for (bone_index, bone) in clip.bones.iter().enumerate() {
            for len in [
                bone.rotations.len(),
                bone.translations.len(),
                bone.scales.len(),
            ] {
                if len as u32 != num_samples {
                    return Err(CompressError::TrackLengthMismatch {
                        bone_index: bone_index as u16,
                        expected: num_samples,
                        actual: len as u32,
                    });
                }
            }

            if let Some(parent) = clip.metadata[bone_index].parent_index {
                if parent as usize >= bone_index {
                    return Err(CompressError::InvalidParentIndex {
                        bone_index: bone_index as u16,
                        parent_index: parent,
                    });
                }
            }
        }

        let sample_rate = clip.sample_rate;
        let mut bone_streams = Vec::with_capacity(num_bones);

        for bone in &clip.bones {
            let mut rotations = TrackStream::new(num_samples, 128, sample_rate, INVALID_BIT_RATE);
            let mut translations =
                TrackStream::new(num_samples, 128, sample_rate, INVALID_BIT_RATE);
            let mut scales = TrackStream::new(num_samples, 128, sample_rate, INVALID_BIT_RATE);

            for sample_index in 0..num_samples {
                let rotation = bone.rotations[sample_index as usize].normalize();
                rotations.set_raw_sample(sample_index, Vec4::from(rotation.to_array()));

                let translation = bone.translations[sample_index as usize];
                translations
                    .set_raw_sample(sample_index, Vec4::from((translation, 0.0)));

                let scale = bone.scales[sample_index as usize];
                scales.set_raw_sample(sample_index, Vec4::from((scale, 0.0)));
            }

            bone_streams.push(BoneStreams {
                rotations: RotationTrackStream::new(rotations, RotationFormat::QuatFull),
                translations: VectorTrackStream::new(translations, VectorFormat::Vector3Full),
                scales: VectorTrackStream::new(scales, VectorFormat::Vector3Full),
                is_rotation_constant: false,
                is_rotation_default: false,
                is_translation_constant: false,
                is_translation_default: false,
                is_scale_constant: false,
                is_scale_default: false,
            });
        }

        let segment = SegmentContext {
            bone_streams,
            ranges: Vec::new(),
            num_samples,
            clip_sample_offset: 0,
            segment_index: 0,
            are_rotations_normalized: false,
            are_translations_normalized: false,
            are_scales_normalized: false,
        };

        Ok(Self {
            segments: vec![segment],
            ranges: vec![BoneRanges::default(); num_bones],
            metadata: clip.metadata.clone(),
            num_bones: num_bones as u16,
            num_samples,
            sample_rate,
            duration: clip.duration(),
            are_rotations_normalized: false,
            are_translations_normalized: false,
            are_scales_normalized: false,
            has_scale: true,
            has_additive_base: false,
        })
    }

    #[inline]
    pub fn segments(&self) -> &[SegmentContext] {
        &self.segments
    }

    #[inline]
    pub fn segments_mut(&mut self) -> &mut [SegmentContext] {
        &mut self.segments
    }

    pub(crate) fn replace_segments(&mut self, segments: Vec<SegmentContext>) {
        self.segments = segments;
    }

    #[inline]
    pub fn num_segments(&self) -> u32 {
        self.segments.len() as u32
    }

    /// Parent indices for every bone, `None` for roots
    pub fn parent_indices(&self) -> Vec<Option<u16>> {
        self.metadata.iter().map(|m| m.parent_index).collect()
    }

    /// Bone chain from the root down to `bone_index` inclusive
    pub fn bone_chain(&self, bone_index: u16) -> SmallVec<[u16; 16]> {
        let mut chain: SmallVec<[u16; 16]> = SmallVec::new();
        let mut current = Some(bone_index);
        while let Some(index) = current {
            chain.push(index);
            current = self.metadata[index as usize].parent_index;
        }
        chain.reverse();
        chain
    }
}

/// Rewrite rotation samples with a non-negative W component
///
/// Dropped-component formats rebuild W as `sqrt(1 - x^2 - y^2 - z^2)`, which
/// can only represent non-negative W. Raw and lossy samples must live in that
/// same space for the search to compare them meaningfully.
pub(crate) fn convert_rotation_streams(clip: &mut ClipContext, rotation_format: RotationFormat) {
    if !rotation_format.drops_w() {
        return;
    }

    for segment in clip.segments_mut() {
        for bone_stream in &mut segment.bone_streams {
            for sample_index in 0..bone_stream.rotations.num_samples() {
                let rotation = bone_stream.rotations.stream.raw_sample(sample_index);
                if rotation.w < 0.0 {
                    bone_stream.rotations.stream.set_raw_sample(sample_index, -rotation);
                }
            }
            let stream =
                std::mem::replace(&mut bone_stream.rotations.stream, TrackStream::empty(0.0));
            bone_stream.rotations = RotationTrackStream::new(stream, RotationFormat::QuatDropWFull);
        }
    }
}

/// Shrink clip-constant tracks to a single sample and flag default tracks
///
/// Ranges must already be extracted. Constant tracks keep their first sample
/// at full precision; a constant track matching the channel identity (bind
/// pose) is additionally flagged default. `has_scale` clears when every scale
/// track is default.
pub(crate) fn compact_constant_streams(clip: &mut ClipContext, settings: &CompressionSettings) {
    assert_eq!(
        clip.num_segments(),
        1,
        "Constant tracks are compacted before segmenting"
    );

    let num_bones = clip.num_bones as usize;
    let mut num_default_bone_scales = 0u16;
    let sample_rate = clip.sample_rate;

    let segment = &mut clip.segments[0];
    for bone_index in 0..num_bones {
        let bone_stream = &mut segment.bone_streams[bone_index];
        let bone_range = &mut clip.ranges[bone_index];

        if bone_range
            .rotation
            .is_constant(settings.constant_rotation_threshold)
        {
            let rotation = bone_stream.rotations.stream.raw_sample(0);
            let mut constant_stream = TrackStream::new(1, 128, sample_rate, INVALID_BIT_RATE);
            constant_stream.set_raw_sample(0, rotation);

            let format = bone_stream.rotations.format();
            bone_stream.rotations = RotationTrackStream::new(constant_stream, format);
            bone_stream.is_rotation_constant = true;
            bone_stream.is_rotation_default = {
                let quat = Quat::from_xyzw(rotation.x, rotation.y, rotation.z, rotation.w);
                let positive_w_angle = 2.0 * quat.w.abs().min(1.0).acos();
                positive_w_angle < DEFAULT_ROTATION_THRESHOLD_ANGLE
            };

            bone_range.rotation = TrackStreamRange::new(rotation, rotation);
        }

        if bone_range
            .translation
            .is_constant(settings.constant_translation_threshold)
        {
            let translation = bone_stream.translations.stream.raw_sample(0);
            let mut constant_stream = TrackStream::new(1, 128, sample_rate, INVALID_BIT_RATE);
            constant_stream.set_raw_sample(0, translation);

            let format = bone_stream.translations.format();
            bone_stream.translations = VectorTrackStream::new(constant_stream, format);
            bone_stream.is_translation_constant = true;
            bone_stream.is_translation_default =
                translation.truncate().abs().max_element() < DEFAULT_VECTOR_THRESHOLD;

            bone_range.translation = TrackStreamRange::new(translation, translation);
        }

        if bone_range
            .scale
            .is_constant(settings.constant_scale_threshold)
        {
            let scale = bone_stream.scales.stream.raw_sample(0);
            let mut constant_stream = TrackStream::new(1, 128, sample_rate, INVALID_BIT_RATE);
            constant_stream.set_raw_sample(0, scale);

            let format = bone_stream.scales.format();
            bone_stream.scales = VectorTrackStream::new(constant_stream, format);
            bone_stream.is_scale_constant = true;
            bone_stream.is_scale_default = (scale.truncate() - glam::Vec3::ONE)
                .abs()
                .max_element()
                < DEFAULT_VECTOR_THRESHOLD;

            bone_range.scale = TrackStreamRange::new(scale, scale);

            if bone_stream.is_scale_default {
                num_default_bone_scales += 1;
            }
        }
    }

    clip.has_scale = num_default_bone_scales != clip.num_bones;
}
