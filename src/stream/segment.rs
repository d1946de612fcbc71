//! Clip segmenting
//!
//! Long clips are split into segments of roughly `ideal_num_samples` samples
//! each so ranges stay tight and the bit-rate search stays local. The
//! remainder of the last segment is redistributed across the others when the
//! per-segment slack allows, which keeps segment sizes even.

use crate::error::CompressError;
use crate::settings::SegmentingSettings;
use crate::stream::clip::{ClipContext, SegmentContext};
use crate::stream::{BoneStreams, RotationTrackStream, TrackStream, VectorTrackStream};

/// Split the single-segment clip per the segmenting settings
pub(crate) fn segment_streams(
    clip: &mut ClipContext,
    settings: &SegmentingSettings,
) -> Result<(), CompressError> {
    if !settings.enabled {
        return Ok(());
    }

    assert_eq!(clip.num_segments(), 1, "Clip is already segmented");

    if settings.ideal_num_samples > settings.max_num_samples {
        return Err(CompressError::InvalidSegmentingSettings {
            ideal: settings.ideal_num_samples,
            max: settings.max_num_samples,
        });
    }

    if clip.num_samples <= settings.max_num_samples {
        return Ok(());
    }

    let mut num_segments =
        (clip.num_samples + settings.ideal_num_samples - 1) / settings.ideal_num_samples;
    let max_num_samples = num_segments * settings.ideal_num_samples;

    let mut num_samples_per_segment = vec![settings.ideal_num_samples; num_segments as usize];

    let leftover_samples = settings.ideal_num_samples - (max_num_samples - clip.num_samples);
    if leftover_samples != 0 {
        num_samples_per_segment[num_segments as usize - 1] = leftover_samples;
    }

    let slack = settings.max_num_samples - settings.ideal_num_samples;
    if (num_segments - 1) * slack >= leftover_samples {
        // Enough slack in the other segments to absorb the leftover
        while num_samples_per_segment[num_segments as usize - 1] != 0 {
            for segment_index in 0..num_segments as usize - 1 {
                if num_samples_per_segment[num_segments as usize - 1] == 0 {
                    break;
                }
                num_samples_per_segment[segment_index] += 1;
                num_samples_per_segment[num_segments as usize - 1] -= 1;
            }
        }
        num_segments -= 1;
    }

    assert!(num_segments > 1, "Expected more than one segment");

    let source_segment = clip.segments()[0].clone();
    let num_bones = clip.num_bones as usize;
    let mut segments = Vec::with_capacity(num_segments as usize);

    let mut clip_sample_index = 0u32;
    for segment_index in 0..num_segments {
        let num_samples_in_segment = num_samples_per_segment[segment_index as usize];

        let mut bone_streams = Vec::with_capacity(num_bones);
        for bone_index in 0..num_bones {
            let clip_bone_stream = &source_segment.bone_streams[bone_index];

            let rotations = if !clip_bone_stream.is_rotation_animated() {
                clip_bone_stream.rotations.clone()
            } else {
                RotationTrackStream::new(
                    copy_stream_window(
                        &clip_bone_stream.rotations.stream,
                        clip_sample_index,
                        num_samples_in_segment,
                    ),
                    clip_bone_stream.rotations.format(),
                )
            };

            let translations = if !clip_bone_stream.is_translation_animated() {
                clip_bone_stream.translations.clone()
            } else {
                VectorTrackStream::new(
                    copy_stream_window(
                        &clip_bone_stream.translations.stream,
                        clip_sample_index,
                        num_samples_in_segment,
                    ),
                    clip_bone_stream.translations.format(),
                )
            };

            let scales = if !clip_bone_stream.is_scale_animated() {
                clip_bone_stream.scales.clone()
            } else {
                VectorTrackStream::new(
                    copy_stream_window(
                        &clip_bone_stream.scales.stream,
                        clip_sample_index,
                        num_samples_in_segment,
                    ),
                    clip_bone_stream.scales.format(),
                )
            };

            bone_streams.push(BoneStreams {
                rotations,
                translations,
                scales,
                is_rotation_constant: clip_bone_stream.is_rotation_constant,
                is_rotation_default: clip_bone_stream.is_rotation_default,
                is_translation_constant: clip_bone_stream.is_translation_constant,
                is_translation_default: clip_bone_stream.is_translation_default,
                is_scale_constant: clip_bone_stream.is_scale_constant,
                is_scale_default: clip_bone_stream.is_scale_default,
            });
        }

        segments.push(SegmentContext {
            bone_streams,
            ranges: Vec::new(),
            num_samples: num_samples_in_segment,
            clip_sample_offset: clip_sample_index,
            segment_index,
            are_rotations_normalized: false,
            are_translations_normalized: false,
            are_scales_normalized: false,
        });

        clip_sample_index += num_samples_in_segment;
    }

    clip.replace_segments(segments);
    Ok(())
}

fn copy_stream_window(stream: &TrackStream, start_sample: u32, num_samples: u32) -> TrackStream {
    debug_assert!(stream.bits_per_sample() % 8 == 0);
    let mut window = TrackStream::new(
        num_samples,
        stream.bits_per_sample(),
        stream.sample_rate(),
        stream.bit_rate(),
    );
    let sample_size = stream.bits_per_sample() as usize / 8;
    let src = &stream.sample_bytes(start_sample)[..num_samples as usize * sample_size];
    window.sample_bytes_mut(0)[..src.len()].copy_from_slice(src);
    window
}
