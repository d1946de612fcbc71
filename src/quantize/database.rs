//! Bit-rate database
//!
//! The search evaluates the same (bone, bit rate) pair thousands of times
//! across chain permutations. The database materializes each reconstructed
//! (quantize, unpack, denormalize) sample array once per segment and serves
//! interpolated lossy transforms out of the cache. Entries build lazily on
//! first query; [`BitRateDatabase::set_segment`] drops them all.

use glam::{Quat, Vec3A};

use crate::formats::{
    is_constant_bit_rate, BoneBitRate, INVALID_BIT_RATE, NUM_BIT_RATES,
};
use crate::stream::clip::{ClipContext, SegmentContext};
use crate::stream::sample::{
    calculate_interpolation_keys, constant_rotation, constant_scale, constant_translation,
    current_rotation_sample, current_vector_sample, quat_nlerp, reconstruct_rotation_sample,
    reconstruct_vector_sample, vec3_lerp, ReconstructArgs,
};
use crate::transform::Transform;

/// Names one bone and the bit-rate triple to reconstruct it at
#[derive(Debug, Clone, Copy)]
pub(crate) struct SingleTrackQuery {
    pub bone_index: u16,
    pub bit_rates: BoneBitRate,
}

const NUM_RATE_SLOTS: usize = NUM_BIT_RATES as usize;

/// Cached reconstructed sample arrays for one channel of one bone
struct RateSlots<T> {
    /// One lazily-built array per bit rate; constant-rate arrays hold 1 entry
    slots: [Option<Box<[T]>>; NUM_RATE_SLOTS],
    /// Value served for constant and default tracks excluded from the search
    constant: Option<T>,
    /// Full-precision samples of an animated track excluded from the search
    /// (fixed storage formats)
    current: Option<Box<[T]>>,
}

impl<T: Copy> RateSlots<T> {
    fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| None),
            constant: None,
            current: None,
        }
    }

    fn clear(&mut self) {
        for slot in &mut self.slots {
            *slot = None;
        }
        self.constant = None;
        self.current = None;
    }
}

/// Per-segment cache of reconstructed samples keyed (bone, channel, bit rate)
pub(crate) struct BitRateDatabase {
    rotations: Vec<RateSlots<Quat>>,
    translations: Vec<RateSlots<Vec3A>>,
    scales: Vec<RateSlots<Vec3A>>,
    num_samples: u32,
    clip_sample_offset: u32,
}

impl BitRateDatabase {
    pub fn new(num_bones: u16) -> Self {
        Self {
            rotations: (0..num_bones).map(|_| RateSlots::new()).collect(),
            translations: (0..num_bones).map(|_| RateSlots::new()).collect(),
            scales: (0..num_bones).map(|_| RateSlots::new()).collect(),
            num_samples: 0,
            clip_sample_offset: 0,
        }
    }

    /// Point the cache at a segment, invalidating every entry
    pub fn set_segment(&mut self, segment: &SegmentContext) {
        self.num_samples = segment.num_samples;
        self.clip_sample_offset = segment.clip_sample_offset;
        for slots in &mut self.rotations {
            slots.clear();
        }
        for slots in &mut self.translations {
            slots.clear();
        }
        for slots in &mut self.scales {
            slots.clear();
        }
    }

    fn reconstruct_args<'a>(
        clip: &'a ClipContext,
        segment: &'a SegmentContext,
        bone_index: usize,
        channel: Channel,
    ) -> ReconstructArgs<'a> {
        let clip_ranges = &clip.ranges[bone_index];
        let segment_ranges = segment.ranges.get(bone_index);
        match channel {
            Channel::Rotation => ReconstructArgs {
                clip_range: &clip_ranges.rotation,
                segment_range: segment_ranges.map(|r| &r.rotation),
                clip_normalized: clip.are_rotations_normalized,
                segment_normalized: segment.are_rotations_normalized,
                clip_sample_offset: segment.clip_sample_offset,
            },
            Channel::Translation => ReconstructArgs {
                clip_range: &clip_ranges.translation,
                segment_range: segment_ranges.map(|r| &r.translation),
                clip_normalized: clip.are_translations_normalized,
                segment_normalized: segment.are_translations_normalized,
                clip_sample_offset: segment.clip_sample_offset,
            },
            Channel::Scale => ReconstructArgs {
                clip_range: &clip_ranges.scale,
                segment_range: segment_ranges.map(|r| &r.scale),
                clip_normalized: clip.are_scales_normalized,
                segment_normalized: segment.are_scales_normalized,
                clip_sample_offset: segment.clip_sample_offset,
            },
        }
    }

    fn rotation_samples(
        &mut self,
        clip: &ClipContext,
        raw_clip: &ClipContext,
        segment: &SegmentContext,
        bone_index: usize,
        bit_rate: u8,
    ) -> RotationLookup<'_> {
        let slots = &mut self.rotations[bone_index];
        if bit_rate == INVALID_BIT_RATE {
            let bone_streams = &segment.bone_streams[bone_index];
            if bone_streams.is_rotation_animated() {
                // A fixed storage format: excluded from the search but still
                // animated, serve the full-precision samples
                if slots.current.is_none() {
                    let args = Self::reconstruct_args(clip, segment, bone_index, Channel::Rotation);
                    let drops_w = bone_streams.rotations.format().drops_w();
                    let samples: Box<[Quat]> = (0..segment.num_samples)
                        .map(|sample_index| {
                            current_rotation_sample(bone_streams, &args, sample_index, drops_w)
                        })
                        .collect();
                    slots.current = Some(samples);
                }
                return RotationLookup::Samples(slots.current.as_deref().unwrap());
            }
            let value = *slots
                .constant
                .get_or_insert_with(|| constant_rotation(bone_streams));
            return RotationLookup::Constant(value);
        }

        if slots.slots[bit_rate as usize].is_none() {
            let args = Self::reconstruct_args(clip, segment, bone_index, Channel::Rotation);
            let lossy = &segment.bone_streams[bone_index];
            let raw = &raw_clip.segments()[0].bone_streams[bone_index];
            let count = if is_constant_bit_rate(bit_rate) {
                1
            } else {
                segment.num_samples
            };
            let samples: Box<[Quat]> = (0..count)
                .map(|sample_index| {
                    reconstruct_rotation_sample(lossy, raw, &args, sample_index, bit_rate)
                })
                .collect();
            slots.slots[bit_rate as usize] = Some(samples);
        }
        RotationLookup::Samples(slots.slots[bit_rate as usize].as_deref().unwrap())
    }

    fn vector_samples(
        &mut self,
        clip: &ClipContext,
        raw_clip: &ClipContext,
        segment: &SegmentContext,
        bone_index: usize,
        channel: Channel,
        bit_rate: u8,
    ) -> VectorLookup<'_> {
        let slots = match channel {
            Channel::Translation => &mut self.translations[bone_index],
            Channel::Scale => &mut self.scales[bone_index],
            Channel::Rotation => unreachable!(),
        };

        if bit_rate == INVALID_BIT_RATE {
            let bone_streams = &segment.bone_streams[bone_index];
            let (stream, is_animated) = match channel {
                Channel::Translation => (
                    &bone_streams.translations,
                    bone_streams.is_translation_animated(),
                ),
                Channel::Scale => (&bone_streams.scales, bone_streams.is_scale_animated()),
                Channel::Rotation => unreachable!(),
            };
            if is_animated {
                if slots.current.is_none() {
                    let args = Self::reconstruct_args(clip, segment, bone_index, channel);
                    let samples: Box<[Vec3A]> = (0..segment.num_samples)
                        .map(|sample_index| current_vector_sample(stream, &args, sample_index))
                        .collect();
                    slots.current = Some(samples);
                }
                return VectorLookup::Samples(slots.current.as_deref().unwrap());
            }
            let value = *slots.constant.get_or_insert_with(|| match channel {
                Channel::Translation => constant_translation(bone_streams),
                Channel::Scale => constant_scale(bone_streams),
                Channel::Rotation => unreachable!(),
            });
            return VectorLookup::Constant(value);
        }

        if slots.slots[bit_rate as usize].is_none() {
            let args = Self::reconstruct_args(clip, segment, bone_index, channel);
            let bone_streams = &segment.bone_streams[bone_index];
            let raw_bone_streams = &raw_clip.segments()[0].bone_streams[bone_index];
            let (lossy_stream, raw_stream) = match channel {
                Channel::Translation => {
                    (&bone_streams.translations, &raw_bone_streams.translations)
                }
                Channel::Scale => (&bone_streams.scales, &raw_bone_streams.scales),
                Channel::Rotation => unreachable!(),
            };
            let count = if is_constant_bit_rate(bit_rate) {
                1
            } else {
                segment.num_samples
            };
            let samples: Box<[Vec3A]> = (0..count)
                .map(|sample_index| {
                    reconstruct_vector_sample(lossy_stream, raw_stream, &args, sample_index, bit_rate)
                })
                .collect();
            slots.slots[bit_rate as usize] = Some(samples);
        }
        VectorLookup::Samples(slots.slots[bit_rate as usize].as_deref().unwrap())
    }

    /// Segment-relative interpolation keys for a clip-global sample time
    fn segment_keys(&self, clip: &ClipContext, sample_time: f32) -> (u32, u32, f32) {
        let (key0, key1, alpha) =
            calculate_interpolation_keys(clip.num_samples, clip.duration, sample_time);
        let last = self.num_samples.saturating_sub(1);
        let segment_key0 = key0.saturating_sub(self.clip_sample_offset).min(last);
        let segment_key1 = key1.saturating_sub(self.clip_sample_offset).min(last);
        (segment_key0, segment_key1, alpha)
    }

    /// Fill one bone of `out_pose` with its lossy transform at `sample_time`
    ///
    /// Transforms of other bones are left untouched; callers only read the
    /// bones they queried.
    pub fn sample_single(
        &mut self,
        clip: &ClipContext,
        raw_clip: &ClipContext,
        segment: &SegmentContext,
        query: &SingleTrackQuery,
        sample_time: f32,
        out_pose: &mut [Transform],
    ) {
        let (key0, key1, alpha) = self.segment_keys(clip, sample_time);
        out_pose[query.bone_index as usize] = self.lossy_transform(
            clip,
            raw_clip,
            segment,
            query.bone_index as usize,
            &query.bit_rates,
            key0,
            key1,
            alpha,
        );
    }

    /// Fill every chain bone of `out_pose` with its lossy transform
    pub fn sample_hierarchical(
        &mut self,
        clip: &ClipContext,
        raw_clip: &ClipContext,
        segment: &SegmentContext,
        chain: &[u16],
        bit_rate_per_bone: &[BoneBitRate],
        sample_time: f32,
        out_pose: &mut [Transform],
    ) {
        let (key0, key1, alpha) = self.segment_keys(clip, sample_time);
        for &bone_index in chain {
            out_pose[bone_index as usize] = self.lossy_transform(
                clip,
                raw_clip,
                segment,
                bone_index as usize,
                &bit_rate_per_bone[bone_index as usize],
                key0,
                key1,
                alpha,
            );
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn lossy_transform(
        &mut self,
        clip: &ClipContext,
        raw_clip: &ClipContext,
        segment: &SegmentContext,
        bone_index: usize,
        bit_rates: &BoneBitRate,
        key0: u32,
        key1: u32,
        alpha: f32,
    ) -> Transform {
        let rotation = match self.rotation_samples(
            clip,
            raw_clip,
            segment,
            bone_index,
            bit_rates.rotation,
        ) {
            RotationLookup::Constant(value) => value,
            RotationLookup::Samples(samples) => {
                let last = samples.len() - 1;
                quat_nlerp(
                    samples[(key0 as usize).min(last)],
                    samples[(key1 as usize).min(last)],
                    alpha,
                )
            }
        };

        let translation = match self.vector_samples(
            clip,
            raw_clip,
            segment,
            bone_index,
            Channel::Translation,
            bit_rates.translation,
        ) {
            VectorLookup::Constant(value) => value,
            VectorLookup::Samples(samples) => {
                let last = samples.len() - 1;
                vec3_lerp(
                    samples[(key0 as usize).min(last)],
                    samples[(key1 as usize).min(last)],
                    alpha,
                )
            }
        };

        let scale = match self.vector_samples(
            clip,
            raw_clip,
            segment,
            bone_index,
            Channel::Scale,
            bit_rates.scale,
        ) {
            VectorLookup::Constant(value) => value,
            VectorLookup::Samples(samples) => {
                let last = samples.len() - 1;
                vec3_lerp(
                    samples[(key0 as usize).min(last)],
                    samples[(key1 as usize).min(last)],
                    alpha,
                )
            }
        };

        Transform::new(rotation, translation, scale)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Channel {
    Rotation,
    Translation,
    Scale,
}

enum RotationLookup<'a> {
    Constant(Quat),
    Samples(&'a [Quat]),
}

enum VectorLookup<'a> {
    Constant(Vec3A),
    Samples(&'a [Vec3A]),
}
