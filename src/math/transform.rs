// Copyright 2020 @TwoCookingMice

use super::constants::{ Matrix4f, Quaternionf, Vector3f, Vector4f };
use super::ray::Ray3f;

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Transform {
    matrix: Matrix4f,
    inv_matrix: Matrix4f
}

impl Default for Transform {
    fn default() -> Self {
        Self { matrix: Matrix4f::identity(),
               inv_matrix: Matrix4f::identity() }
    }
}

impl std::ops::Mul for Transform {
    type Output = Transform;

    // (a * b) applies b first.
    fn mul(self, rhs: Transform) -> Transform {
        Transform { matrix: self.matrix * rhs.matrix,
                    inv_matrix: rhs.inv_matrix * self.inv_matrix }
    }
}

impl Transform {
    pub fn new(matrix: Matrix4f) -> Self {
        Self { matrix,
               inv_matrix: matrix.try_inverse().unwrap_or(Matrix4f::identity()) }
    }

    pub fn from_translation(t: Vector3f) -> Self {
        Self::new(Matrix4f::new_translation(&t))
    }

    /// Translation * Rotation * Scale.
    pub fn from_trs(translation: Vector3f, rotation: Quaternionf, scale: Vector3f) -> Self {
        let m = Matrix4f::new_translation(&translation)
            * rotation.to_homogeneous()
            * Matrix4f::new_nonuniform_scaling(&scale);
        Self::new(m)
    }

    /// Rebuilds a transform from the row-major 3x4 layout used on the device.
    pub fn from_rows(rows: &[f32; 12]) -> Self {
        let mut m = Matrix4f::identity();
        for r in 0..3 {
            for c in 0..4 {
                m[(r, c)] = rows[r * 4 + c];
            }
        }
        Self::new(m)
    }

    pub fn matrix(&self) -> &Matrix4f {
        &self.matrix
    }

    pub fn inverse(&self) -> Transform {
        Transform { matrix: self.inv_matrix, inv_matrix: self.matrix }
    }

    /// Row-major 3x4 affine part, the layout of device-side matrices.
    pub fn to_rows(&self) -> [f32; 12] {
        let mut rows = [0.0f32; 12];
        for r in 0..3 {
            for c in 0..4 {
                rows[r * 4 + c] = self.matrix[(r, c)];
            }
        }
        rows
    }

    pub fn apply_point(&self, p: Vector3f) -> Vector3f {
        let h = self.matrix * Vector4f::new(p.x, p.y, p.z, 1.0);
        let w = if h.w != 0.0 { h.w } else { 1.0 };
        Vector3f::new(h.x / w, h.y / w, h.z / w)
    }

    pub fn apply_vector(&self, v: Vector3f) -> Vector3f {
        self.matrix.transform_vector(&v)
    }

    // Normals transform with the inverse transpose: (M^{-1})^T n.
    pub fn apply_normal(&self, n: Vector3f) -> Vector3f {
        self.inv_matrix.transpose().transform_vector(&n)
    }

    /// Maps the ray without renormalizing, so hit distances are shared
    /// between the two spaces.
    pub fn apply_ray(&self, ray: &Ray3f) -> Ray3f {
        Ray3f::unnormalized(self.apply_point(ray.origin()),
                            self.apply_vector(ray.dir()),
                            ray.min_t, ray.max_t)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trs_order() {
        let t = Transform::from_trs(Vector3f::new(1.0, 0.0, 0.0),
                                    Quaternionf::identity(),
                                    Vector3f::new(2.0, 2.0, 2.0));
        let p = t.apply_point(Vector3f::new(1.0, 1.0, 1.0));
        assert!((p - Vector3f::new(3.0, 2.0, 2.0)).norm() < 1e-6);
        let back = t.inverse().apply_point(p);
        assert!((back - Vector3f::new(1.0, 1.0, 1.0)).norm() < 1e-6);
    }

    #[test]
    fn test_rows_round_trip_and_compose() {
        let a = Transform::from_translation(Vector3f::new(0.0, 1.0, 0.0));
        let b = Transform::from_trs(Vector3f::zeros(),
                                    Quaternionf::from_euler_angles(0.0, 0.0, std::f32::consts::FRAC_PI_2),
                                    Vector3f::new(1.0, 1.0, 1.0));
        let ab = a * b;
        let p = ab.apply_point(Vector3f::new(1.0, 0.0, 0.0));
        assert!((p - Vector3f::new(0.0, 2.0, 0.0)).norm() < 1e-5);

        let rebuilt = Transform::from_rows(&ab.to_rows());
        let q = rebuilt.apply_point(Vector3f::new(1.0, 0.0, 0.0));
        assert!((q - p).norm() < 1e-5);
    }

    #[test]
    fn test_normal_under_nonuniform_scale() {
        let t = Transform::from_trs(Vector3f::zeros(), Quaternionf::identity(), Vector3f::new(1.0, 4.0, 1.0));
        let n = t.apply_normal(Vector3f::new(0.0, 1.0, 0.0)).normalize();
        assert!((n - Vector3f::new(0.0, 1.0, 0.0)).norm() < 1e-6);
    }
}
