//! Range extraction and normalization
//!
//! Per-bone componentwise min/max over the raw samples, then an in-place
//! rescale of every animated sample to [0, 1]:
//!
//! ```text
//! normalized = (sample - range_min) / range_extent
//! sample     = (normalized * range_extent) + range_min
//! ```
//!
//! Components whose extent falls under [`MIN_RANGE_EXTENT`] normalize to 0 so
//! a flat channel never amplifies float noise into the packed bits.

use glam::Vec4;

use crate::settings::{
    RANGE_REDUCTION_ROTATIONS, RANGE_REDUCTION_SCALES, RANGE_REDUCTION_TRANSLATIONS,
};
use crate::stream::clip::{ClipContext, SegmentContext};
use crate::stream::{BoneRanges, TrackStream, TrackStreamRange};

/// Extents under this threshold collapse to a zero normalized value
pub const MIN_RANGE_EXTENT: f32 = 1e-9;

fn track_range(stream: &TrackStream) -> TrackStreamRange {
    let mut min = Vec4::splat(f32::INFINITY);
    let mut max = Vec4::splat(f32::NEG_INFINITY);
    for sample_index in 0..stream.num_samples() {
        let sample = stream.raw_sample(sample_index);
        min = min.min(sample);
        max = max.max(sample);
    }
    TrackStreamRange::new(min, max)
}

/// Compute clip-wide per-bone ranges from the single unsegmented stream set
pub(crate) fn extract_clip_bone_ranges(clip: &mut ClipContext) {
    assert_eq!(
        clip.num_segments(),
        1,
        "Clip ranges are extracted before segmenting"
    );

    let mut ranges = Vec::with_capacity(clip.num_bones as usize);
    let segment = &clip.segments()[0];
    for bone_stream in &segment.bone_streams {
        ranges.push(BoneRanges {
            rotation: track_range(&bone_stream.rotations.stream),
            translation: track_range(&bone_stream.translations.stream),
            scale: track_range(&bone_stream.scales.stream),
        });
    }
    clip.ranges = ranges;
}

/// Compute per-bone ranges of one segment's streams
pub(crate) fn extract_segment_bone_ranges(segment: &mut SegmentContext) {
    let mut ranges = Vec::with_capacity(segment.bone_streams.len());
    for bone_stream in &segment.bone_streams {
        ranges.push(BoneRanges {
            rotation: track_range(&bone_stream.rotations.stream),
            translation: track_range(&bone_stream.translations.stream),
            scale: track_range(&bone_stream.scales.stream),
        });
    }
    segment.ranges = ranges;
}

/// Rescale one sample into [0, 1] against a range
#[inline]
pub(crate) fn normalize_sample(sample: Vec4, range: &TrackStreamRange) -> Vec4 {
    let extent = range.extent();
    let normalized = (sample - range.min()) / extent;
    // A flat component carries no information, clamp it to zero
    Vec4::select(extent.cmplt(Vec4::splat(MIN_RANGE_EXTENT)), Vec4::ZERO, normalized)
}

/// Inverse of [`normalize_sample`]
#[inline]
pub(crate) fn denormalize_sample(normalized: Vec4, range: &TrackStreamRange) -> Vec4 {
    normalized * range.extent() + range.min()
}

fn normalize_stream(stream: &mut TrackStream, range: &TrackStreamRange) {
    for sample_index in 0..stream.num_samples() {
        let sample = stream.raw_sample(sample_index);
        let normalized = normalize_sample(sample, range);
        debug_assert!(
            normalized.truncate().min_element() >= 0.0
                && normalized.truncate().max_element() <= 1.0,
            "Invalid normalized sample: 0.0 <= {:?} <= 1.0",
            normalized
        );
        stream.set_raw_sample(sample_index, normalized);
    }
}

/// Normalize animated clip streams in place per the range reduction flags
pub(crate) fn normalize_clip_streams(clip: &mut ClipContext, range_reduction: u8) {
    let num_bones = clip.num_bones as usize;

    if range_reduction & RANGE_REDUCTION_ROTATIONS != 0 {
        for bone_index in 0..num_bones {
            let range = clip.ranges[bone_index].rotation;
            let segment = &mut clip.segments_mut()[0];
            let bone_stream = &mut segment.bone_streams[bone_index];
            if bone_stream.is_rotation_animated() {
                normalize_stream(&mut bone_stream.rotations.stream, &range);
            }
        }
        clip.are_rotations_normalized = true;
    }

    if range_reduction & RANGE_REDUCTION_TRANSLATIONS != 0 {
        for bone_index in 0..num_bones {
            let range = clip.ranges[bone_index].translation;
            let segment = &mut clip.segments_mut()[0];
            let bone_stream = &mut segment.bone_streams[bone_index];
            if bone_stream.is_translation_animated() {
                normalize_stream(&mut bone_stream.translations.stream, &range);
            }
        }
        clip.are_translations_normalized = true;
    }

    if range_reduction & RANGE_REDUCTION_SCALES != 0 {
        for bone_index in 0..num_bones {
            let range = clip.ranges[bone_index].scale;
            let segment = &mut clip.segments_mut()[0];
            let bone_stream = &mut segment.bone_streams[bone_index];
            if bone_stream.is_scale_animated() {
                normalize_stream(&mut bone_stream.scales.stream, &range);
            }
        }
        clip.are_scales_normalized = true;
    }
}

/// Extract segment ranges and normalize segment streams per the segmenting
/// range reduction flags
///
/// Legal for a single-segment clip as well; segment-normalized channels are
/// the precondition for the constant bit rate.
pub(crate) fn normalize_segment_streams(clip: &mut ClipContext, range_reduction: u8) {
    if range_reduction == 0 {
        return;
    }

    for segment in clip.segments_mut() {
        extract_segment_bone_ranges(segment);

        let num_bones = segment.bone_streams.len();
        if range_reduction & RANGE_REDUCTION_ROTATIONS != 0 {
            for bone_index in 0..num_bones {
                let range = segment.ranges[bone_index].rotation;
                let bone_stream = &mut segment.bone_streams[bone_index];
                if bone_stream.is_rotation_animated() {
                    normalize_stream(&mut bone_stream.rotations.stream, &range);
                }
            }
            segment.are_rotations_normalized = true;
        }

        if range_reduction & RANGE_REDUCTION_TRANSLATIONS != 0 {
            for bone_index in 0..num_bones {
                let range = segment.ranges[bone_index].translation;
                let bone_stream = &mut segment.bone_streams[bone_index];
                if bone_stream.is_translation_animated() {
                    normalize_stream(&mut bone_stream.translations.stream, &range);
                }
            }
            segment.are_translations_normalized = true;
        }

        if range_reduction & RANGE_REDUCTION_SCALES != 0 {
            for bone_index in 0..num_bones {
                let range = segment.ranges[bone_index].scale;
                let bone_stream = &mut segment.bone_streams[bone_index];
                if bone_stream.is_scale_animated() {
                    normalize_stream(&mut bone_stream.scales.stream, &range);
                }
            }
            segment.are_scales_normalized = true;
        }
    }
}
