//! Rotation/translation/scale transform type
//!
//! The pose element consumed by the error metric and the sampling layer.
//! Composition follows the usual qvv approximation: scales combine
//! componentwise, which ignores the shear a rotated non-uniform scale would
//! introduce.

use glam::{Quat, Vec3A};

/// A local or object space bone transform
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub rotation: Quat,
    pub translation: Vec3A,
    pub scale: Vec3A,
}

impl Transform {
    /// Identity transform (no rotation, no translation, unit scale)
    pub const IDENTITY: Self = Self {
        rotation: Quat::IDENTITY,
        translation: Vec3A::ZERO,
        scale: Vec3A::ONE,
    };

    #[inline]
    pub fn new(rotation: Quat, translation: Vec3A, scale: Vec3A) -> Self {
        Self {
            rotation,
            translation,
            scale,
        }
    }

    /// Compose `self` (local) with `parent` (object): apply self, then parent
    #[inline]
    pub fn mul(&self, parent: &Transform) -> Transform {
        Transform {
            rotation: (parent.rotation * self.rotation).normalize(),
            translation: parent.rotation * (self.translation * parent.scale) + parent.translation,
            scale: self.scale * parent.scale,
        }
    }

    /// [`Transform::mul`] ignoring both scales
    #[inline]
    pub fn mul_no_scale(&self, parent: &Transform) -> Transform {
        Transform {
            rotation: (parent.rotation * self.rotation).normalize(),
            translation: parent.rotation * self.translation + parent.translation,
            scale: self.scale,
        }
    }

    /// Transform a point: scale, rotate, translate
    #[inline]
    pub fn transform_point(&self, point: Vec3A) -> Vec3A {
        self.rotation * (point * self.scale) + self.translation
    }

    /// Transform a point ignoring scale
    #[inline]
    pub fn transform_point_no_scale(&self, point: Vec3A) -> Vec3A {
        self.rotation * point + self.translation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::FRAC_PI_2;

    #[test]
    fn test_identity_composition() {
        let t = Transform::new(
            Quat::from_rotation_y(0.5),
            Vec3A::new(1.0, 2.0, 3.0),
            Vec3A::splat(2.0),
        );
        let composed = t.mul(&Transform::IDENTITY);
        assert!((composed.translation - t.translation).length() < 1e-6);
        assert!(composed.rotation.dot(t.rotation).abs() > 0.9999);
    }

    #[test]
    fn test_parent_child_composition() {
        // Parent rotates 90 deg about Y and sits at x=1; child sits at x=1 locally.
        // The child lands at parent + rotated offset = (1, 0, -1).
        let parent = Transform::new(
            Quat::from_rotation_y(FRAC_PI_2),
            Vec3A::new(1.0, 0.0, 0.0),
            Vec3A::ONE,
        );
        let child = Transform::new(Quat::IDENTITY, Vec3A::new(1.0, 0.0, 0.0), Vec3A::ONE);
        let object = child.mul(&parent);
        assert!((object.translation - Vec3A::new(1.0, 0.0, -1.0)).length() < 1e-6);
    }

    #[test]
    fn test_parent_scale_applies_to_child_translation() {
        let parent = Transform::new(Quat::IDENTITY, Vec3A::ZERO, Vec3A::splat(2.0));
        let child = Transform::new(Quat::IDENTITY, Vec3A::new(1.0, 0.0, 0.0), Vec3A::ONE);
        let object = child.mul(&parent);
        assert!((object.translation - Vec3A::new(2.0, 0.0, 0.0)).length() < 1e-6);
        assert!((object.scale - Vec3A::splat(2.0)).length() < 1e-6);

        let no_scale = child.mul_no_scale(&parent);
        assert!((no_scale.translation - Vec3A::new(1.0, 0.0, 0.0)).length() < 1e-6);
    }

    #[test]
    fn test_transform_point() {
        let t = Transform::new(
            Quat::from_rotation_z(FRAC_PI_2),
            Vec3A::new(0.0, 1.0, 0.0),
            Vec3A::splat(3.0),
        );
        let p = t.transform_point(Vec3A::new(1.0, 0.0, 0.0));
        assert!((p - Vec3A::new(0.0, 4.0, 0.0)).length() < 1e-5);
    }
}
