//! Tests for streams, ranges, segmenting and sampling

use glam::{Quat, Vec3A, Vec4};

use super::clip::{
    compact_constant_streams, convert_rotation_streams, AnimationClip, ClipContext, RawBoneTrack,
    TransformMetadata,
};
use super::range::{
    extract_clip_bone_ranges, normalize_clip_streams, normalize_sample, normalize_segment_streams,
};
use super::sample::{calculate_interpolation_keys, quat_from_positive_w, sample_raw_pose};
use super::segment::segment_streams;
use super::{TrackStream, TrackStreamRange, STREAM_PADDING};
use crate::error::CompressError;
use crate::formats::RotationFormat;
use crate::settings::{CompressionSettings, SegmentingSettings, RANGE_REDUCTION_ALL};
use crate::transform::Transform;

fn make_clip(num_bones: usize, num_samples: usize) -> AnimationClip {
    let bones = (0..num_bones)
        .map(|bone_index| RawBoneTrack {
            rotations: (0..num_samples)
                .map(|i| Quat::from_rotation_y(0.01 * (i + bone_index) as f32))
                .collect(),
            translations: (0..num_samples)
                .map(|i| Vec3A::new(i as f32 * 0.1, bone_index as f32, 0.5))
                .collect(),
            scales: vec![Vec3A::ONE; num_samples],
        })
        .collect();
    let metadata = (0..num_bones)
        .map(|bone_index| TransformMetadata {
            parent_index: if bone_index == 0 {
                None
            } else {
                Some(bone_index as u16 - 1)
            },
            precision: 0.01,
            shell_distance: 1.0,
        })
        .collect();
    AnimationClip {
        bones,
        metadata,
        sample_rate: 30.0,
    }
}

// ========================================================================
// Track Stream Tests
// ========================================================================

#[test]
fn test_stream_payload_length_and_padding() {
    // 10 samples at 3x11 bits = 330 bits = 42 bytes nominal
    let stream = TrackStream::new(10, 33, 30.0, 5);
    assert_eq!(stream.payload_len(), 42);
    assert_eq!(stream.data().len(), 42 + STREAM_PADDING);
    assert_eq!(stream.sample_bit_offset(9), 297);
}

#[test]
fn test_stream_raw_sample_roundtrip() {
    let mut stream = TrackStream::new(4, 128, 30.0, 0xFF);
    let v = Vec4::new(0.1, -0.2, 0.3, 0.9);
    stream.set_raw_sample(2, v);
    assert_eq!(stream.raw_sample(2), v);
    assert_eq!(stream.raw_sample(0), Vec4::ZERO);
}

#[test]
fn test_padding_is_zero_filled() {
    let stream = TrackStream::new(3, 57, 30.0, 17);
    let payload_len = stream.payload_len();
    assert!(stream.data()[payload_len..].iter().all(|&b| b == 0));
}

// ========================================================================
// Range Tests
// ========================================================================

#[test]
fn test_range_extraction() {
    let clip = make_clip(1, 16);
    let mut context = ClipContext::build(&clip).unwrap();
    extract_clip_bone_ranges(&mut context);

    let range = &context.ranges[0].translation;
    assert_eq!(range.min().x, 0.0);
    assert!((range.max().x - 1.5).abs() < 1e-6);
    assert_eq!(range.min().z, 0.5);
    assert_eq!(range.max().z, 0.5);
}

#[test]
fn test_normalize_sample_zero_extent() {
    // A flat component must normalize to exactly zero, not NaN or noise
    let range = TrackStreamRange::new(Vec4::new(0.5, 0.0, 1.0, 0.0), Vec4::new(0.5, 2.0, 1.0, 0.0));
    let normalized = normalize_sample(Vec4::new(0.5, 1.0, 1.0, 0.0), &range);
    assert_eq!(normalized.x, 0.0);
    assert!((normalized.y - 0.5).abs() < 1e-6);
    assert_eq!(normalized.z, 0.0);
}

#[test]
fn test_normalized_samples_in_unit_range() {
    let clip = make_clip(2, 16);
    let mut context = ClipContext::build(&clip).unwrap();
    let settings = CompressionSettings::default();
    convert_rotation_streams(&mut context, settings.rotation_format);
    extract_clip_bone_ranges(&mut context);
    compact_constant_streams(&mut context, &settings);
    normalize_clip_streams(&mut context, RANGE_REDUCTION_ALL);

    assert!(context.are_rotations_normalized);
    assert!(context.are_translations_normalized);
    for bone_stream in &context.segments()[0].bone_streams {
        if bone_stream.is_translation_animated() {
            let stream = &bone_stream.translations.stream;
            for sample_index in 0..stream.num_samples() {
                let v = stream.raw_sample(sample_index);
                assert!(v.truncate().min_element() >= 0.0);
                assert!(v.truncate().max_element() <= 1.0);
            }
        }
    }
}

// ========================================================================
// Constant Compaction Tests
// ========================================================================

#[test]
fn test_constant_and_default_detection() {
    let num_samples = 8;
    let clip = AnimationClip {
        bones: vec![RawBoneTrack {
            // Identity rotation: constant AND default
            rotations: vec![Quat::IDENTITY; num_samples],
            // Constant but not default
            translations: vec![Vec3A::new(1.0, 2.0, 3.0); num_samples],
            // Unit scale: constant and default
            scales: vec![Vec3A::ONE; num_samples],
        }],
        metadata: vec![TransformMetadata {
            parent_index: None,
            precision: 0.01,
            shell_distance: 1.0,
        }],
        sample_rate: 30.0,
    };

    let mut context = ClipContext::build(&clip).unwrap();
    let settings = CompressionSettings::default();
    convert_rotation_streams(&mut context, settings.rotation_format);
    extract_clip_bone_ranges(&mut context);
    compact_constant_streams(&mut context, &settings);

    let bone_stream = &context.segments()[0].bone_streams[0];
    assert!(bone_stream.is_rotation_constant);
    assert!(bone_stream.is_rotation_default);
    assert!(bone_stream.is_translation_constant);
    assert!(!bone_stream.is_translation_default);
    assert!(bone_stream.is_scale_constant);
    assert!(bone_stream.is_scale_default);
    assert!(!context.has_scale);

    // Constant streams shrink to one sample
    assert_eq!(bone_stream.translations.num_samples(), 1);
}

#[test]
fn test_rotation_conversion_forces_positive_w() {
    let clip = AnimationClip {
        bones: vec![RawBoneTrack {
            // A quaternion with negative w; equivalent rotation, flipped sign
            rotations: vec![Quat::from_xyzw(0.0, 0.0, 0.7071068, -0.7071068); 4],
            translations: vec![Vec3A::ZERO; 4],
            scales: vec![Vec3A::ONE; 4],
        }],
        metadata: vec![TransformMetadata {
            parent_index: None,
            precision: 0.01,
            shell_distance: 1.0,
        }],
        sample_rate: 30.0,
    };

    let mut context = ClipContext::build(&clip).unwrap();
    convert_rotation_streams(&mut context, RotationFormat::QuatDropWVariable);

    let bone_stream = &context.segments()[0].bone_streams[0];
    assert_eq!(bone_stream.rotations.format(), RotationFormat::QuatDropWFull);
    let sample = bone_stream.rotations.stream.raw_sample(0);
    assert!(sample.w >= 0.0);
    // Same rotation on the hypersphere
    let recovered = quat_from_positive_w(sample);
    let original = Quat::from_xyzw(0.0, 0.0, 0.7071068, -0.7071068);
    assert!(recovered.dot(original).abs() > 0.9999);
}

// ========================================================================
// Validation Tests
// ========================================================================

#[test]
fn test_build_rejects_empty_clip() {
    let clip = AnimationClip {
        bones: Vec::new(),
        metadata: Vec::new(),
        sample_rate: 30.0,
    };
    assert!(matches!(
        ClipContext::build(&clip),
        Err(CompressError::ZeroBones)
    ));
}

#[test]
fn test_build_rejects_parent_after_child() {
    let mut clip = make_clip(2, 4);
    clip.metadata[0].parent_index = Some(1);
    assert!(matches!(
        ClipContext::build(&clip),
        Err(CompressError::InvalidParentIndex { .. })
    ));
}

#[test]
fn test_build_rejects_mismatched_tracks() {
    let mut clip = make_clip(1, 4);
    clip.bones[0].translations.pop();
    assert!(matches!(
        ClipContext::build(&clip),
        Err(CompressError::TrackLengthMismatch { .. })
    ));
}

// ========================================================================
// Segmenting Tests
// ========================================================================

#[test]
fn test_short_clip_stays_whole() {
    let clip = make_clip(1, 16);
    let mut context = ClipContext::build(&clip).unwrap();
    let settings = SegmentingSettings {
        enabled: true,
        ..Default::default()
    };
    segment_streams(&mut context, &settings).unwrap();
    assert_eq!(context.num_segments(), 1);
}

#[test]
fn test_long_clip_splits_evenly() {
    let clip = make_clip(1, 100);
    let mut context = ClipContext::build(&clip).unwrap();
    let settings = SegmentingSettings {
        enabled: true,
        ..Default::default()
    };
    segment_streams(&mut context, &settings).unwrap();

    assert!(context.num_segments() > 1);
    let mut total = 0;
    let mut offset = 0;
    for segment in context.segments() {
        assert_eq!(segment.clip_sample_offset, offset);
        assert!(segment.num_samples <= settings.max_num_samples);
        offset += segment.num_samples;
        total += segment.num_samples;
    }
    assert_eq!(total, 100);
}

#[test]
fn test_segment_boundary_samples_match_clip() {
    let clip = make_clip(1, 100);
    let mut context = ClipContext::build(&clip).unwrap();
    let settings = SegmentingSettings {
        enabled: true,
        ..Default::default()
    };
    segment_streams(&mut context, &settings).unwrap();

    let second = &context.segments()[1];
    let offset = second.clip_sample_offset;
    let expected = Quat::from_rotation_y(0.01 * offset as f32);
    let actual = second.bone_streams[0].rotations.stream.raw_sample(0);
    let actual = Quat::from_xyzw(actual.x, actual.y, actual.z, actual.w);
    assert!(actual.dot(expected).abs() > 0.99999);
}

#[test]
fn test_segment_normalization_sets_flags() {
    let clip = make_clip(1, 100);
    let mut context = ClipContext::build(&clip).unwrap();
    let settings = CompressionSettings::default();
    convert_rotation_streams(&mut context, settings.rotation_format);
    extract_clip_bone_ranges(&mut context);
    compact_constant_streams(&mut context, &settings);
    normalize_clip_streams(&mut context, RANGE_REDUCTION_ALL);

    let seg_settings = SegmentingSettings {
        enabled: true,
        range_reduction: RANGE_REDUCTION_ALL,
        ..Default::default()
    };
    segment_streams(&mut context, &seg_settings).unwrap();
    normalize_segment_streams(&mut context, seg_settings.range_reduction);

    for segment in context.segments() {
        assert!(segment.are_rotations_normalized);
        assert!(segment.are_translations_normalized);
        assert!(segment.are_scales_normalized);
        assert_eq!(segment.ranges.len(), 1);
    }
}

// ========================================================================
// Sampling Tests
// ========================================================================

#[test]
fn test_interpolation_keys() {
    // 10 samples at 30 Hz, duration = 9/30 s
    let duration = 9.0 / 30.0;
    assert_eq!(calculate_interpolation_keys(10, duration, 0.0), (0, 1, 0.0));

    let (k0, k1, alpha) = calculate_interpolation_keys(10, duration, duration);
    assert_eq!((k0, k1), (9, 9));
    assert!(alpha.abs() < 1e-6);

    let (k0, k1, alpha) = calculate_interpolation_keys(10, duration, 2.5 / 30.0);
    assert_eq!((k0, k1), (2, 3));
    assert!((alpha - 0.5).abs() < 1e-5);
}

#[test]
fn test_interpolation_keys_single_sample() {
    assert_eq!(calculate_interpolation_keys(1, 0.0, 0.0), (0, 0, 0.0));
}

#[test]
fn test_sample_raw_pose_at_sample_points() {
    let clip = make_clip(2, 10);
    let context = ClipContext::build(&clip).unwrap();

    let mut pose = [Transform::IDENTITY; 2];
    sample_raw_pose(&context, 3.0 / 30.0, &mut pose);

    let expected = Quat::from_rotation_y(0.01 * 3.0);
    assert!(pose[0].rotation.dot(expected).abs() > 0.99999);
    assert!((pose[0].translation - Vec3A::new(0.3, 0.0, 0.5)).length() < 1e-5);
    let expected_child = Quat::from_rotation_y(0.01 * 4.0);
    assert!(pose[1].rotation.dot(expected_child).abs() > 0.99999);
}

#[test]
fn test_quat_from_positive_w_unit_result() {
    let q = Quat::from_rotation_x(0.8);
    let v = Vec4::new(q.x, q.y, q.z, 0.0);
    let rebuilt = quat_from_positive_w(v);
    assert!(rebuilt.dot(q).abs() > 0.99999);
    assert!((rebuilt.length() - 1.0).abs() < 1e-6);
}
