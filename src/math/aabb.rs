// Copyright 2020 @TwoCookingMice

use super::constants::{ Float, Vector3f, FLOAT_MIN, FLOAT_MAX };
use super::ray::Ray3f;
use super::transform::Transform;

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct AABB {
    pub p_min: Vector3f,
    pub p_max: Vector3f
}

impl Default for AABB {
    fn default() -> Self {
        Self { p_min: Vector3f::new(FLOAT_MAX, FLOAT_MAX, FLOAT_MAX),
               p_max: Vector3f::new(FLOAT_MIN, FLOAT_MIN, FLOAT_MIN) }
    }
}

impl AABB {
    pub fn new(a: Vector3f, b: Vector3f) -> Self {
        Self { p_min: a.inf(&b), p_max: a.sup(&b) }
    }

    pub fn from_points<'a, I: IntoIterator<Item = &'a Vector3f>>(points: I) -> Self {
        let mut bounds = Self::default();
        for p in points {
            bounds.expand_by_point(p);
        }
        bounds
    }

    pub fn center(&self) -> Vector3f {
        0.5 * (self.p_min + self.p_max)
    }

    pub fn expand_by_point(&mut self, p: &Vector3f) {
        self.p_min = self.p_min.inf(p);
        self.p_max = self.p_max.sup(p);
    }

    pub fn expand_by_aabb(&mut self, other: &AABB) {
        self.p_min = self.p_min.inf(&other.p_min);
        self.p_max = self.p_max.sup(&other.p_max);
    }

    /// Bounds of the eight transformed corners.
    pub fn transformed(&self, transform: &Transform) -> AABB {
        if !self.is_valid() {
            return *self;
        }
        let mut bounds = AABB::default();
        for corner in 0..8 {
            let p = Vector3f::new(
                if corner & 1 == 0 { self.p_min.x } else { self.p_max.x },
                if corner & 2 == 0 { self.p_min.y } else { self.p_max.y },
                if corner & 4 == 0 { self.p_min.z } else { self.p_max.z },
            );
            bounds.expand_by_point(&transform.apply_point(p));
        }
        bounds
    }

    pub fn ray_intersect(&self, ray: &Ray3f) -> bool {
        if !self.is_valid() {
            return false;
        }

        let o = ray.origin();
        let d = ray.dir();
        let mut t_min = ray.min_t;
        let mut t_max = ray.max_t;

        for idx in 0..3 {
            let dir = d[idx];
            if dir.abs() < 1e-8 {
                if o[idx] < self.p_min[idx] || o[idx] > self.p_max[idx] {
                    return false;
                }
                continue;
            }

            let inv = 1.0 / dir;
            let mut t0 = (self.p_min[idx] - o[idx]) * inv;
            let mut t1 = (self.p_max[idx] - o[idx]) * inv;
            if t0 > t1 {
                std::mem::swap(&mut t0, &mut t1);
            }

            t_min = t_min.max(t0);
            t_max = t_max.min(t1);
            if t_max < t_min {
                return false;
            }
        }

        true
    }

    pub fn surface_area(&self) -> Float {
        let d = self.diagonal();
        2.0 * (d.x * d.y + d.x * d.z + d.y * d.z)
    }

    pub fn diagonal(&self) -> Vector3f {
        self.p_max - self.p_min
    }

    pub fn max_extent(&self) -> usize {
        let d = self.diagonal();
        if d.x > d.y && d.x > d.z {
            0
        } else if d.y > d.z {
            1
        } else {
            2
        }
    }

    pub fn is_valid(&self) -> bool {
        (0..3).all(|idx| self.p_min[idx] <= self.p_max[idx])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aabb_geometry() {
        let mut bbox = AABB::new(Vector3f::new(1.0, 7.0, 3.0), Vector3f::new(4.0, 4.0, 4.0));
        assert_eq!(bbox.center(), Vector3f::new(2.5, 5.5, 3.5));
        assert!((bbox.surface_area() - 30.0).abs() < 1e-5);

        bbox.expand_by_point(&Vector3f::new(-1.0, 5.0, 6.0));
        assert_eq!(bbox.p_min.x, -1.0);
        assert_eq!(bbox.p_max.z, 6.0);
        assert_eq!(bbox.max_extent(), 0);

        let mut empty = AABB::default();
        assert!(!empty.is_valid());
        empty.expand_by_aabb(&bbox);
        assert_eq!(empty, bbox);
    }

    #[test]
    fn test_aabb_intersect() {
        let bbox = AABB::new(Vector3f::new(-1.0, -1.0, -1.0), Vector3f::new(1.0, 1.0, 1.0));
        let o1 = Vector3f::new(0.0, 0.0, 0.0);
        let d1 = Vector3f::new(1.0, 1.0, 1.0);
        assert!(bbox.ray_intersect(&Ray3f::new(o1, d1, Some(0.0), Some(1.0))));

        let r3 = Ray3f::new(Vector3f::new(-1.1, 0.0, 0.0), Vector3f::new(-0.1, 10.0, 10.0), None, None);
        assert!(!bbox.ray_intersect(&r3));
    }

    #[test]
    fn test_aabb_transformed_by_translation() {
        let bbox = AABB::new(Vector3f::zeros(), Vector3f::new(1.0, 1.0, 1.0));
        let moved = bbox.transformed(&Transform::from_translation(Vector3f::new(2.0, 0.0, 0.0)));
        assert_eq!(moved.p_min, Vector3f::new(2.0, 0.0, 0.0));
        assert_eq!(moved.p_max, Vector3f::new(3.0, 1.0, 1.0));
    }
}
