// Copyright 2020 @TwoCookingMice

use super::constants::{Float, Vector3f};

#[derive(Debug, Clone, Copy)]
pub struct Ray3f {
    origin: Vector3f,
    dir: Vector3f,
    pub min_t: Float,
    pub max_t: Float
}

impl Ray3f {
    pub fn new(o: Vector3f, d: Vector3f,
               min_t: Option<Float>, max_t: Option<Float>) -> Self {
        Self::unnormalized(o, d.normalize(), min_t.unwrap_or(0.0), max_t.unwrap_or(std::f32::MAX))
    }

    // Keeps the direction as given, so parametric distances survive
    // a change of space (world to object space with scaling).
    pub fn unnormalized(o: Vector3f, d: Vector3f, min_t: Float, max_t: Float) -> Self {
        Self { origin: o, dir: d, min_t, max_t }
    }

    pub fn origin(&self) -> Vector3f {
        self.origin
    }

    pub fn dir(&self) -> Vector3f {
        self.dir
    }

    pub fn update(&mut self, t: Float) -> bool {
        if t < self.min_t || t > self.max_t {
            false
        } else {
            self.max_t = t;
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Vector3f;
    use super::Ray3f;

    #[test]
    fn test_ray3f() {
        let o = Vector3f::new(0.0, 0.0, 0.0);
        let d = Vector3f::new(1.0, 0.0, 1.0);
        let mut ray = Ray3f::new(o, d, None, None);
        assert_eq!(o, ray.origin());

        assert!((ray.dir()[0] - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-5);
        assert!((ray.dir()[2] - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-5);

        assert!(ray.update(100.0));
        assert!(!ray.update(105.0));
    }

    #[test]
    fn test_unnormalized_ray_keeps_length() {
        let ray = Ray3f::unnormalized(Vector3f::zeros(), Vector3f::new(0.0, 0.0, 2.0), 0.0, 10.0);
        assert_eq!(ray.dir(), Vector3f::new(0.0, 0.0, 2.0));
    }
}
