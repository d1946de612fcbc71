//! Quantization workspace
//!
//! One [`QuantizationContext`] lives for the compression of one segment. It
//! owns every scratch buffer the search touches: the bit-rate database, the
//! per-bone bit rates, the chain index buffer and the cached raw local and
//! object transforms of the current segment. Caching the raw side once in
//! [`QuantizationContext::set_segment`] is what keeps the thousands of error
//! evaluations cheap: only the lossy side is recomputed per candidate.

use smallvec::SmallVec;

use crate::formats::BoneBitRate;
use crate::metric::TransformErrorMetric;
use crate::quantize::database::{BitRateDatabase, SingleTrackQuery};
use crate::settings::CompressionSettings;
use crate::stream::clip::{ClipContext, SegmentContext};
use crate::stream::sample::sample_raw_pose;
use crate::transform::Transform;

/// Whether an error scan may stop at the first sample over the threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StopCondition {
    UntilErrorTooHigh,
    UntilEndOfSegment,
}

pub(crate) struct QuantizationContext<'a> {
    pub clip: &'a ClipContext,
    pub raw_clip: &'a ClipContext,
    pub additive_base: Option<&'a ClipContext>,
    pub metric: &'a dyn TransformErrorMetric,
    pub settings: &'a CompressionSettings,

    pub segment_index: usize,
    pub num_bones: usize,
    pub num_samples: u32,
    pub segment_sample_start_index: u32,
    pub sample_rate: f32,
    pub clip_duration: f32,
    pub has_scale: bool,
    pub has_additive_base: bool,
    pub needs_conversion: bool,

    pub database: BitRateDatabase,

    pub bit_rate_per_bone: Vec<BoneBitRate>,
    pub parent_indices: Vec<Option<u16>>,
    /// Dirty list covering every bone, in hierarchy order
    pub all_bone_indices: Vec<u16>,
    /// Chain of the bone currently being refined, root first
    pub chain_bone_indices: SmallVec<[u16; 16]>,

    // Scratch poses, one transform per bone
    lossy_local_pose: Vec<Transform>,
    lossy_converted: Vec<Transform>,
    lossy_object_pose: Vec<Transform>,

    // Cached per segment, row-major [sample][bone]
    raw_local_transforms: Vec<Transform>,
    raw_object_transforms: Vec<Transform>,
    base_local_transforms: Vec<Transform>,
}

impl<'a> QuantizationContext<'a> {
    pub fn new(
        clip: &'a ClipContext,
        raw_clip: &'a ClipContext,
        additive_base: Option<&'a ClipContext>,
        settings: &'a CompressionSettings,
        metric: &'a dyn TransformErrorMetric,
        segment_index: usize,
    ) -> Self {
        let num_bones = clip.num_bones as usize;
        let segment = &clip.segments()[segment_index];
        let num_samples = segment.num_samples;
        let has_scale = clip.has_scale;
        let has_additive_base = additive_base.is_some();
        let needs_conversion = metric.needs_conversion(has_scale);

        let pose_len = num_bones * num_samples as usize;

        Self {
            clip,
            raw_clip,
            additive_base,
            metric,
            settings,
            segment_index,
            num_bones,
            num_samples,
            segment_sample_start_index: segment.clip_sample_offset,
            sample_rate: clip.sample_rate,
            clip_duration: clip.duration,
            has_scale,
            has_additive_base,
            needs_conversion,
            database: BitRateDatabase::new(clip.num_bones),
            bit_rate_per_bone: vec![BoneBitRate::INVALID; num_bones],
            parent_indices: clip.parent_indices(),
            all_bone_indices: (0..num_bones as u16).collect(),
            chain_bone_indices: SmallVec::new(),
            lossy_local_pose: vec![Transform::IDENTITY; num_bones],
            lossy_converted: vec![Transform::IDENTITY; num_bones],
            lossy_object_pose: vec![Transform::IDENTITY; num_bones],
            raw_local_transforms: vec![Transform::IDENTITY; pose_len],
            raw_object_transforms: vec![Transform::IDENTITY; pose_len],
            base_local_transforms: if has_additive_base {
                vec![Transform::IDENTITY; pose_len]
            } else {
                Vec::new()
            },
        }
    }

    #[inline]
    pub fn segment(&self) -> &'a SegmentContext {
        &self.clip.segments()[self.segment_index]
    }

    /// Error threshold for one bone
    #[inline]
    pub fn precision(&self, bone_index: u16) -> f32 {
        let precision = self.clip.metadata[bone_index as usize].precision;
        if precision.is_finite() && precision >= 0.0 {
            precision
        } else {
            self.settings.error_threshold
        }
    }

    /// Clip-global time of a segment sample, consistent with decompression
    #[inline]
    pub fn sample_time(&self, sample_index: u32) -> f32 {
        (((self.segment_sample_start_index + sample_index) as f32) / self.sample_rate)
            .min(self.clip_duration)
    }

    /// Cache the raw local and object transforms of every segment sample
    ///
    /// These never change during the search; every subsequent error
    /// evaluation reads them instead of re-sampling the raw clip.
    pub fn set_segment(&mut self) {
        let segment = &self.clip.segments()[self.segment_index];
        self.database.set_segment(segment);

        let num_bones = self.num_bones;
        let metric = self.metric;
        let has_scale = self.has_scale;
        let dirty = &self.all_bone_indices;

        let mut raw_pose = vec![Transform::IDENTITY; num_bones];
        let mut base_pose = vec![Transform::IDENTITY; num_bones];
        let mut converted = vec![Transform::IDENTITY; num_bones];

        for sample_index in 0..self.num_samples {
            let sample_time = self.sample_time(sample_index);
            let row = sample_index as usize * num_bones;

            sample_raw_pose(self.raw_clip, sample_time, &mut raw_pose);

            let raw_row = &mut self.raw_local_transforms[row..row + num_bones];
            if self.needs_conversion {
                if has_scale {
                    metric.convert_transforms(dirty, &raw_pose, &mut converted);
                } else {
                    metric.convert_transforms_no_scale(dirty, &raw_pose, &mut converted);
                }
                raw_row.copy_from_slice(&converted);
            } else {
                raw_row.copy_from_slice(&raw_pose);
            }

            if let Some(base_clip) = self.additive_base {
                // Remap the clip time into the base clip's own duration
                let base_time = if base_clip.num_samples > 1 && self.clip_duration > 0.0 {
                    (sample_time / self.clip_duration) * base_clip.duration
                } else {
                    0.0
                };
                sample_raw_pose(base_clip, base_time, &mut base_pose);

                let base_row = &mut self.base_local_transforms[row..row + num_bones];
                if self.needs_conversion {
                    if has_scale {
                        metric.convert_transforms(dirty, &base_pose, &mut converted);
                    } else {
                        metric.convert_transforms_no_scale(dirty, &base_pose, &mut converted);
                    }
                    base_row.copy_from_slice(&converted);
                } else {
                    base_row.copy_from_slice(&base_pose);
                }

                let raw_row = &mut self.raw_local_transforms[row..row + num_bones];
                let base_row = &self.base_local_transforms[row..row + num_bones];
                if has_scale {
                    metric.apply_additive_to_base(dirty, base_row, raw_row);
                } else {
                    metric.apply_additive_to_base_no_scale(dirty, base_row, raw_row);
                }
            }

            let (raw_rows, object_rows) = (
                &self.raw_local_transforms[row..row + num_bones],
                &mut self.raw_object_transforms[row..row + num_bones],
            );
            if has_scale {
                metric.local_to_object_space(dirty, &self.parent_indices, raw_rows, object_rows);
            } else {
                metric.local_to_object_space_no_scale(
                    dirty,
                    &self.parent_indices,
                    raw_rows,
                    object_rows,
                );
            }
        }
    }

    /// Resolve and store the bone chain of `bone_index`, root first
    pub fn set_chain(&mut self, bone_index: u16) {
        self.chain_bone_indices = self.clip.bone_chain(bone_index);
    }

    /// Max local-space error of `target_bone` over the segment at the current
    /// bit rates
    pub fn calculate_max_error_local(
        &mut self,
        target_bone: u16,
        threshold: f32,
        stop: StopCondition,
    ) -> f32 {
        let segment = &self.clip.segments()[self.segment_index];
        let target = target_bone as usize;
        let num_bones = self.num_bones;
        let shell_distance = self.clip.metadata[target].shell_distance;
        let query = SingleTrackQuery {
            bone_index: target_bone,
            bit_rates: self.bit_rate_per_bone[target],
        };
        let dirty = [target_bone];

        let mut max_error = 0.0f32;
        for sample_index in 0..self.num_samples {
            let sample_time = self.sample_time(sample_index);
            let row = sample_index as usize * num_bones;

            self.database.sample_single(
                self.clip,
                self.raw_clip,
                segment,
                &query,
                sample_time,
                &mut self.lossy_local_pose,
            );

            let lossy = if self.needs_conversion {
                if self.has_scale {
                    self.metric
                        .convert_transforms(&dirty, &self.lossy_local_pose, &mut self.lossy_converted);
                } else {
                    self.metric.convert_transforms_no_scale(
                        &dirty,
                        &self.lossy_local_pose,
                        &mut self.lossy_converted,
                    );
                }
                &mut self.lossy_converted
            } else {
                &mut self.lossy_local_pose
            };

            if self.has_additive_base {
                let base_row = &self.base_local_transforms[row..row + num_bones];
                if self.has_scale {
                    self.metric.apply_additive_to_base(&dirty, base_row, lossy);
                } else {
                    self.metric
                        .apply_additive_to_base_no_scale(&dirty, base_row, lossy);
                }
            }

            let raw = &self.raw_local_transforms[row + target];
            let error = if self.has_scale {
                self.metric.calculate_error(raw, &lossy[target], shell_distance)
            } else {
                self.metric
                    .calculate_error_no_scale(raw, &lossy[target], shell_distance)
            };

            max_error = max_error.max(error);
            if stop == StopCondition::UntilErrorTooHigh && error >= threshold {
                break;
            }
        }

        max_error
    }

    /// Max object-space error of `target_bone` over the segment at the
    /// current bit rates; the chain must already be set
    pub fn calculate_max_error_object(
        &mut self,
        target_bone: u16,
        threshold: f32,
        stop: StopCondition,
    ) -> f32 {
        debug_assert!(
            self.chain_bone_indices.contains(&target_bone),
            "Bone chain does not cover bone {}",
            target_bone
        );

        let segment = &self.clip.segments()[self.segment_index];
        let target = target_bone as usize;
        let num_bones = self.num_bones;
        let shell_distance = self.clip.metadata[target].shell_distance;

        let mut max_error = 0.0f32;
        for sample_index in 0..self.num_samples {
            let sample_time = self.sample_time(sample_index);
            let row = sample_index as usize * num_bones;

            self.database.sample_hierarchical(
                self.clip,
                self.raw_clip,
                segment,
                &self.chain_bone_indices,
                &self.bit_rate_per_bone,
                sample_time,
                &mut self.lossy_local_pose,
            );

            let lossy = if self.needs_conversion {
                if self.has_scale {
                    self.metric.convert_transforms(
                        &self.chain_bone_indices,
                        &self.lossy_local_pose,
                        &mut self.lossy_converted,
                    );
                } else {
                    self.metric.convert_transforms_no_scale(
                        &self.chain_bone_indices,
                        &self.lossy_local_pose,
                        &mut self.lossy_converted,
                    );
                }
                &mut self.lossy_converted
            } else {
                &mut self.lossy_local_pose
            };

            if self.has_additive_base {
                let base_row = &self.base_local_transforms[row..row + num_bones];
                if self.has_scale {
                    self.metric
                        .apply_additive_to_base(&self.chain_bone_indices, base_row, lossy);
                } else {
                    self.metric.apply_additive_to_base_no_scale(
                        &self.chain_bone_indices,
                        base_row,
                        lossy,
                    );
                }
            }

            if self.has_scale {
                self.metric.local_to_object_space(
                    &self.chain_bone_indices,
                    &self.parent_indices,
                    lossy,
                    &mut self.lossy_object_pose,
                );
            } else {
                self.metric.local_to_object_space_no_scale(
                    &self.chain_bone_indices,
                    &self.parent_indices,
                    lossy,
                    &mut self.lossy_object_pose,
                );
            }

            let raw = &self.raw_object_transforms[row + target];
            let error = if self.has_scale {
                self.metric
                    .calculate_error(raw, &self.lossy_object_pose[target], shell_distance)
            } else {
                self.metric.calculate_error_no_scale(
                    raw,
                    &self.lossy_object_pose[target],
                    shell_distance,
                )
            };

            max_error = max_error.max(error);
            if stop == StopCondition::UntilErrorTooHigh && error >= threshold {
                break;
            }
        }

        max_error
    }
}
