//! Skeletal transform error metrics
//!
//! The metric is consumed by the bit-rate search, never owned by it. Errors
//! are measured as the maximum displacement of two probe points on a sphere
//! of per-bone `shell_distance` radius under the delta between the raw and
//! lossy transforms, which gives the scalar threshold a consistent geometric
//! meaning across bones of very different sizes.
//!
//! Every operation comes in a scale-aware and a `_no_scale` flavor; the
//! caller picks the family once per evaluation loop based on whether the
//! clip animates scale, so there is no per-sample dispatch.

use glam::Vec3A;

use crate::transform::Transform;

/// Error metric over rotation/translation/scale transforms
///
/// Operations take a list of dirty transform indices so a caller refreshing a
/// single bone or a single bone chain does not pay for the whole pose. For
/// `local_to_object_space` the dirty list must order parents before children
/// and every dirty bone's parent chain must already be resolved in the
/// output pose or be dirty itself.
pub trait TransformErrorMetric {
    fn name(&self) -> &'static str;

    /// Whether transforms must be converted into a metric-specific
    /// representation before error evaluation
    fn needs_conversion(&self, _has_scale: bool) -> bool {
        false
    }

    /// Convert dirty transforms into the metric's representation
    fn convert_transforms(&self, dirty: &[u16], local: &[Transform], out: &mut [Transform]) {
        for &index in dirty {
            out[index as usize] = local[index as usize];
        }
    }

    /// [`TransformErrorMetric::convert_transforms`] ignoring scale
    fn convert_transforms_no_scale(
        &self,
        dirty: &[u16],
        local: &[Transform],
        out: &mut [Transform],
    ) {
        self.convert_transforms(dirty, local, out);
    }

    /// Combine additive delta transforms onto their base pose, in place
    ///
    /// `local` holds the delta transforms on entry and the applied result on
    /// return.
    fn apply_additive_to_base(&self, dirty: &[u16], base: &[Transform], local: &mut [Transform]);

    /// [`TransformErrorMetric::apply_additive_to_base`] ignoring scale
    fn apply_additive_to_base_no_scale(
        &self,
        dirty: &[u16],
        base: &[Transform],
        local: &mut [Transform],
    );

    /// Compose dirty local transforms with their parents into object space
    fn local_to_object_space(
        &self,
        dirty: &[u16],
        parent_indices: &[Option<u16>],
        local: &[Transform],
        out_object: &mut [Transform],
    );

    /// [`TransformErrorMetric::local_to_object_space`] ignoring scale
    fn local_to_object_space_no_scale(
        &self,
        dirty: &[u16],
        parent_indices: &[Option<u16>],
        local: &[Transform],
        out_object: &mut [Transform],
    );

    /// Maximum shell-point displacement between two transforms
    fn calculate_error(&self, raw: &Transform, lossy: &Transform, shell_distance: f32) -> f32;

    /// [`TransformErrorMetric::calculate_error`] ignoring scale
    fn calculate_error_no_scale(
        &self,
        raw: &Transform,
        lossy: &Transform,
        shell_distance: f32,
    ) -> f32;
}

/// Default metric using qvv transform arithmetic throughout
///
/// Object space composition combines scales componentwise, which can be
/// inaccurate under rotated non-uniform scale (shear); acceptable for the
/// search since raw and lossy poses go through the same arithmetic.
pub struct QvvTransformErrorMetric;

impl QvvTransformErrorMetric {
    #[inline]
    fn shell_points(shell_distance: f32) -> (Vec3A, Vec3A) {
        (
            Vec3A::new(shell_distance, 0.0, 0.0),
            Vec3A::new(0.0, shell_distance, 0.0),
        )
    }
}

impl TransformErrorMetric for QvvTransformErrorMetric {
    fn name(&self) -> &'static str {
        "QvvTransformErrorMetric"
    }

    fn apply_additive_to_base(&self, dirty: &[u16], base: &[Transform], local: &mut [Transform]) {
        for &index in dirty {
            let index = index as usize;
            let delta = local[index];
            let base = &base[index];
            local[index] = Transform {
                rotation: (base.rotation * delta.rotation).normalize(),
                translation: base.translation + delta.translation,
                scale: base.scale * delta.scale,
            };
        }
    }

    fn apply_additive_to_base_no_scale(
        &self,
        dirty: &[u16],
        base: &[Transform],
        local: &mut [Transform],
    ) {
        for &index in dirty {
            let index = index as usize;
            let delta = local[index];
            let base = &base[index];
            local[index] = Transform {
                rotation: (base.rotation * delta.rotation).normalize(),
                translation: base.translation + delta.translation,
                scale: delta.scale,
            };
        }
    }

    fn local_to_object_space(
        &self,
        dirty: &[u16],
        parent_indices: &[Option<u16>],
        local: &[Transform],
        out_object: &mut [Transform],
    ) {
        for &index in dirty {
            let index = index as usize;
            out_object[index] = match parent_indices[index] {
                Some(parent) => local[index].mul(&out_object[parent as usize]),
                None => local[index],
            };
        }
    }

    fn local_to_object_space_no_scale(
        &self,
        dirty: &[u16],
        parent_indices: &[Option<u16>],
        local: &[Transform],
        out_object: &mut [Transform],
    ) {
        for &index in dirty {
            let index = index as usize;
            out_object[index] = match parent_indices[index] {
                Some(parent) => local[index].mul_no_scale(&out_object[parent as usize]),
                None => local[index],
            };
        }
    }

    fn calculate_error(&self, raw: &Transform, lossy: &Transform, shell_distance: f32) -> f32 {
        let (vtx0, vtx1) = Self::shell_points(shell_distance);
        let vtx0_error = raw
            .transform_point(vtx0)
            .distance(lossy.transform_point(vtx0));
        let vtx1_error = raw
            .transform_point(vtx1)
            .distance(lossy.transform_point(vtx1));
        vtx0_error.max(vtx1_error)
    }

    fn calculate_error_no_scale(
        &self,
        raw: &Transform,
        lossy: &Transform,
        shell_distance: f32,
    ) -> f32 {
        let (vtx0, vtx1) = Self::shell_points(shell_distance);
        let vtx0_error = raw
            .transform_point_no_scale(vtx0)
            .distance(lossy.transform_point_no_scale(vtx0));
        let vtx1_error = raw
            .transform_point_no_scale(vtx1)
            .distance(lossy.transform_point_no_scale(vtx1));
        vtx0_error.max(vtx1_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Quat;
    use std::f32::consts::FRAC_PI_2;

    #[test]
    fn test_identical_transforms_have_zero_error() {
        let metric = QvvTransformErrorMetric;
        let t = Transform::new(
            Quat::from_rotation_x(0.3),
            Vec3A::new(1.0, 2.0, 3.0),
            Vec3A::ONE,
        );
        assert_eq!(metric.calculate_error(&t, &t, 3.0), 0.0);
        assert_eq!(metric.calculate_error_no_scale(&t, &t, 3.0), 0.0);
    }

    #[test]
    fn test_translation_error_is_exact() {
        let metric = QvvTransformErrorMetric;
        let raw = Transform::IDENTITY;
        let lossy = Transform::new(Quat::IDENTITY, Vec3A::new(0.5, 0.0, 0.0), Vec3A::ONE);
        let error = metric.calculate_error(&raw, &lossy, 1.0);
        assert!((error - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_rotation_error_scales_with_shell_distance() {
        let metric = QvvTransformErrorMetric;
        let raw = Transform::IDENTITY;
        let lossy = Transform::new(Quat::from_rotation_z(0.01), Vec3A::ZERO, Vec3A::ONE);
        let near = metric.calculate_error_no_scale(&raw, &lossy, 1.0);
        let far = metric.calculate_error_no_scale(&raw, &lossy, 10.0);
        assert!((far / near - 10.0).abs() < 0.01);
    }

    #[test]
    fn test_object_space_composition_through_chain() {
        let metric = QvvTransformErrorMetric;
        let parents = [None, Some(0u16)];
        let local = [
            Transform::new(
                Quat::from_rotation_y(FRAC_PI_2),
                Vec3A::new(1.0, 0.0, 0.0),
                Vec3A::ONE,
            ),
            Transform::new(Quat::IDENTITY, Vec3A::new(1.0, 0.0, 0.0), Vec3A::ONE),
        ];
        let mut object = [Transform::IDENTITY; 2];
        metric.local_to_object_space_no_scale(&[0, 1], &parents, &local, &mut object);
        assert!((object[1].translation - Vec3A::new(1.0, 0.0, -1.0)).length() < 1e-5);
    }

    #[test]
    fn test_additive_combine() {
        let metric = QvvTransformErrorMetric;
        let mut pose = [Transform::new(
            Quat::from_rotation_x(0.2),
            Vec3A::new(0.0, 1.0, 0.0),
            Vec3A::splat(2.0),
        )];
        let base = [Transform::new(
            Quat::from_rotation_x(-0.2),
            Vec3A::new(0.0, -1.0, 0.0),
            Vec3A::ONE,
        )];
        metric.apply_additive_to_base(&[0], &base, &mut pose);
        // Opposite rotations and translations cancel
        assert!(pose[0].rotation.dot(Quat::IDENTITY).abs() > 0.9999);
        assert!(pose[0].translation.length() < 1e-6);
        assert!((pose[0].scale - Vec3A::splat(2.0)).length() < 1e-6);
    }
}
