// Copyright @yucwang 2026

use std::collections::HashMap;

use super::bvh::Bvh;
use super::{Instance, TraversableHandle};
use crate::math::aabb::AABB;
use crate::math::constants::{Float, Vector2f, Vector3f};
use crate::math::ray::Ray3f;
use crate::math::transform::Transform;

/// Bottom level: one triangle geometry.
pub struct TriangleAccel {
    vertices: Vec<Vector3f>,
    triangles: Vec<[u32; 3]>,
    bvh: Bvh,
}

/// Top level: instances of bottom-level structures.
pub struct InstanceAccel {
    instances: Vec<Instance>,
    object_to_world: Vec<Transform>,
    bvh: Bvh,
}

pub enum AccelStructure {
    Triangles(TriangleAccel),
    Instances(InstanceAccel),
}

#[derive(Clone, Copy, Debug)]
pub struct Intersection {
    pub t: Float,
    pub primitive: u32,
    pub barycentrics: Vector2f,
    pub instance: u32,
    pub instance_id: u32,
    pub sbt_offset: u32,
    pub object_to_world: Transform,
}

// Moller-Trumbore; returns (t, u, v).
fn intersect_triangle(p0: &Vector3f, p1: &Vector3f, p2: &Vector3f, ray: &Ray3f) -> Option<(Float, Float, Float)> {
    let e1 = p1 - p0;
    let e2 = p2 - p0;
    let pvec = ray.dir().cross(&e2);
    let det = e1.dot(&pvec);
    if det.abs() < 1e-12 {
        return None;
    }
    let inv_det = 1.0 / det;
    let tvec = ray.origin() - p0;
    let u = tvec.dot(&pvec) * inv_det;
    if !(0.0..=1.0).contains(&u) {
        return None;
    }
    let qvec = tvec.cross(&e1);
    let v = ray.dir().dot(&qvec) * inv_det;
    if v < 0.0 || u + v > 1.0 {
        return None;
    }
    let t = e2.dot(&qvec) * inv_det;
    if t <= ray.min_t || t > ray.max_t {
        return None;
    }
    Some((t, u, v))
}

impl TriangleAccel {
    pub fn build(vertices: Vec<Vector3f>, triangles: Vec<[u32; 3]>) -> Result<Self, String> {
        let mut bounds = Vec::with_capacity(triangles.len());
        for (i, tri) in triangles.iter().enumerate() {
            if let Some(bad) = tri.iter().find(|&&v| v as usize >= vertices.len()) {
                return Err(format!("triangle {} references vertex {} of {}", i, bad, vertices.len()));
            }
            bounds.push(AABB::from_points(tri.iter().map(|&v| &vertices[v as usize])));
        }
        let bvh = Bvh::build(bounds);
        Ok(Self { vertices, triangles, bvh })
    }

    pub fn bounds(&self) -> AABB {
        self.bvh.bounds()
    }

    fn corners(&self, prim: usize) -> (&Vector3f, &Vector3f, &Vector3f) {
        let [a, b, c] = self.triangles[prim];
        (&self.vertices[a as usize], &self.vertices[b as usize], &self.vertices[c as usize])
    }

    /// (primitive, t, barycentrics) of the closest hit, or of any hit.
    pub fn intersect(&self, ray: &Ray3f, any_hit: bool) -> Option<(u32, Float, Vector2f)> {
        if any_hit {
            let mut found = None;
            self.bvh.any(ray, |prim, r| {
                let (p0, p1, p2) = self.corners(prim);
                match intersect_triangle(p0, p1, p2, r) {
                    Some((t, u, v)) => {
                        found = Some((prim as u32, t, Vector2f::new(u, v)));
                        true
                    }
                    None => false,
                }
            });
            found
        } else {
            self.bvh.closest(ray, |prim, r| {
                let (p0, p1, p2) = self.corners(prim);
                intersect_triangle(p0, p1, p2, r).map(|(t, u, v)| ((Vector2f::new(u, v), t), t))
            }).map(|(prim, (bary, t))| (prim as u32, t, bary))
        }
    }
}

impl InstanceAccel {
    pub fn build(instances: Vec<Instance>, blas: &HashMap<TraversableHandle, AccelStructure>) -> Result<Self, String> {
        let mut object_to_world = Vec::with_capacity(instances.len());
        let mut bounds = Vec::with_capacity(instances.len());
        for (i, inst) in instances.iter().enumerate() {
            let child = match blas.get(&inst.traversable) {
                Some(AccelStructure::Triangles(child)) => child,
                Some(AccelStructure::Instances(_)) => {
                    return Err(format!("instance {} references a top-level structure", i));
                }
                None => return Err(format!("instance {} references unknown traversable {}", i, inst.traversable)),
            };
            let transform = Transform::from_rows(&inst.transform);
            bounds.push(child.bounds().transformed(&transform));
            object_to_world.push(transform);
        }
        let bvh = Bvh::build(bounds);
        Ok(Self { instances, object_to_world, bvh })
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}

/// Walks the structure behind `handle`. Errors describe dangling handles
/// and surface as launch faults.
pub fn traverse(accels: &HashMap<TraversableHandle, AccelStructure>,
                handle: TraversableHandle,
                ray: &Ray3f,
                any_hit: bool) -> Result<Option<Intersection>, String> {
    match accels.get(&handle) {
        None => Err(format!("traversable handle {} is not valid", handle)),
        Some(AccelStructure::Triangles(tri)) => Ok(tri.intersect(ray, any_hit).map(|(primitive, t, barycentrics)| {
            Intersection {
                t,
                primitive,
                barycentrics,
                instance: 0,
                instance_id: 0,
                sbt_offset: 0,
                object_to_world: Transform::default(),
            }
        })),
        Some(AccelStructure::Instances(top)) => {
            let mut error = None;
            let mut test = |idx: usize, r: &Ray3f| -> Option<Intersection> {
                let inst = &top.instances[idx];
                let to_world = &top.object_to_world[idx];
                let child = match accels.get(&inst.traversable) {
                    Some(AccelStructure::Triangles(child)) => child,
                    _ => {
                        error = Some(format!("instance {} references destroyed traversable {}", idx, inst.traversable));
                        return None;
                    }
                };
                // Unnormalized object-space ray keeps t comparable across instances.
                let local = to_world.inverse().apply_ray(r);
                child.intersect(&local, any_hit).map(|(primitive, t, barycentrics)| Intersection {
                    t,
                    primitive,
                    barycentrics,
                    instance: idx as u32,
                    instance_id: inst.instance_id,
                    sbt_offset: inst.sbt_offset,
                    object_to_world: *to_world,
                })
            };

            let hit = if any_hit {
                let mut found = None;
                top.bvh.any(ray, |idx, r| {
                    found = test(idx, r);
                    found.is_some()
                });
                found
            } else {
                top.bvh.closest(ray, |idx, r| test(idx, r).map(|h| (h, h.t))).map(|(_, h)| h)
            };
            match error {
                Some(msg) => Err(msg),
                None => Ok(hit),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::constants::Quaternionf;

    fn quad_accel() -> TriangleAccel {
        let vertices = vec![Vector3f::new(-1.0, -1.0, 0.0), Vector3f::new(1.0, -1.0, 0.0),
                            Vector3f::new(1.0, 1.0, 0.0), Vector3f::new(-1.0, 1.0, 0.0)];
        TriangleAccel::build(vertices, vec![[0, 1, 2], [0, 2, 3]]).unwrap()
    }

    fn instance(transform: Transform, id: u32, traversable: TraversableHandle) -> Instance {
        Instance { transform: transform.to_rows(), instance_id: id, sbt_offset: id * 2, traversable }
    }

    #[test]
    fn test_triangle_hit_and_barycentrics() {
        let accel = quad_accel();
        let ray = Ray3f::new(Vector3f::new(0.5, -0.5, 2.0), Vector3f::new(0.0, 0.0, -1.0), None, None);
        let (prim, t, bary) = accel.intersect(&ray, false).unwrap();
        assert_eq!(prim, 0);
        assert!((t - 2.0).abs() < 1e-5);
        assert!(bary.x >= 0.0 && bary.y >= 0.0 && bary.x + bary.y <= 1.0);

        let miss = Ray3f::new(Vector3f::new(3.0, 0.0, 2.0), Vector3f::new(0.0, 0.0, -1.0), None, None);
        assert!(accel.intersect(&miss, false).is_none());
        assert!(TriangleAccel::build(vec![Vector3f::zeros()], vec![[0, 1, 2]]).is_err());
    }

    #[test]
    fn test_closest_hit_through_instance_transforms() {
        let mut accels = HashMap::new();
        accels.insert(1, AccelStructure::Triangles(quad_accel()));
        let near = Transform::from_trs(Vector3f::new(0.0, 0.0, 1.0), Quaternionf::identity(), Vector3f::new(0.5, 0.5, 0.5));
        let far = Transform::from_translation(Vector3f::new(0.0, 0.0, -1.0));
        let top = InstanceAccel::build(vec![instance(far, 0, 1), instance(near, 1, 1)], &accels).unwrap();
        assert_eq!(top.len(), 2);
        accels.insert(2, AccelStructure::Instances(top));

        let ray = Ray3f::new(Vector3f::new(0.1, 0.1, 5.0), Vector3f::new(0.0, 0.0, -1.0), None, None);
        let hit = traverse(&accels, 2, &ray, false).unwrap().unwrap();
        assert_eq!(hit.instance_id, 1);
        assert_eq!(hit.sbt_offset, 2);
        assert!((hit.t - 4.0).abs() < 1e-4);

        // Outside the scaled-down near quad, only the far one is hit.
        let side = Ray3f::new(Vector3f::new(0.8, 0.8, 5.0), Vector3f::new(0.0, 0.0, -1.0), None, None);
        let hit = traverse(&accels, 2, &side, false).unwrap().unwrap();
        assert_eq!(hit.instance_id, 0);
        assert!((hit.t - 6.0).abs() < 1e-4);

        assert!(traverse(&accels, 2, &side, true).unwrap().is_some());
        assert!(traverse(&accels, 9, &side, false).is_err());

        accels.remove(&1);
        assert!(traverse(&accels, 2, &side, false).is_err());
    }
}
