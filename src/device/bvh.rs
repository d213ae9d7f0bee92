// Copyright @yucwang 2026

use crate::math::aabb::AABB;
use crate::math::constants::{Float, Vector3f};
use crate::math::ray::Ray3f;

const SAH_BUCKETS: usize = 12;
const MAX_LEAF_SIZE: usize = 4;

#[derive(Clone, Debug)]
struct Node {
    bounds: AABB,
    // Interior: index of the right child (left child follows the node).
    // Leaf: first primitive slot.
    offset: usize,
    count: usize,
}

impl Node {
    fn is_leaf(&self) -> bool {
        self.count > 0
    }
}

/// SAH-bucketed bounding volume hierarchy over opaque primitives.
/// Primitive tests are supplied by the caller during traversal.
#[derive(Clone, Debug, Default)]
pub struct Bvh {
    nodes: Vec<Node>,
    order: Vec<usize>,
}

struct BuildInput {
    bounds: Vec<AABB>,
    centroids: Vec<Vector3f>,
}

impl Bvh {
    pub fn build(prim_bounds: Vec<AABB>) -> Self {
        let centroids = prim_bounds.iter().map(|b| b.center()).collect();
        let input = BuildInput { bounds: prim_bounds, centroids };
        let mut bvh = Self { nodes: Vec::new(), order: (0..input.bounds.len()).collect() };
        if !bvh.order.is_empty() {
            let end = bvh.order.len();
            bvh.build_range(&input, 0, end);
        }
        bvh
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn bounds(&self) -> AABB {
        self.nodes.first().map(|n| n.bounds).unwrap_or_default()
    }

    /// Closest primitive hit. `hit_fn` receives the ray clipped to the best
    /// distance found so far and returns the hit with its distance.
    pub fn closest<F, T>(&self, ray: &Ray3f, mut hit_fn: F) -> Option<(usize, T)>
    where
        F: FnMut(usize, &Ray3f) -> Option<(T, Float)>,
    {
        if self.nodes.is_empty() {
            return None;
        }

        let mut ray = *ray;
        let mut best: Option<(usize, T)> = None;
        let mut stack = vec![0usize];
        while let Some(node_idx) = stack.pop() {
            let node = &self.nodes[node_idx];
            if !node.bounds.ray_intersect(&ray) {
                continue;
            }
            if node.is_leaf() {
                for slot in node.offset..node.offset + node.count {
                    let prim = self.order[slot];
                    if let Some((hit, t)) = hit_fn(prim, &ray) {
                        if ray.update(t) {
                            best = Some((prim, hit));
                        }
                    }
                }
            } else {
                stack.push(node.offset);
                stack.push(node_idx + 1);
            }
        }
        best
    }

    /// Stops at the first primitive accepted by `hit_fn`.
    pub fn any<F>(&self, ray: &Ray3f, mut hit_fn: F) -> Option<usize>
    where
        F: FnMut(usize, &Ray3f) -> bool,
    {
        if self.nodes.is_empty() {
            return None;
        }

        let mut stack = vec![0usize];
        while let Some(node_idx) = stack.pop() {
            let node = &self.nodes[node_idx];
            if !node.bounds.ray_intersect(ray) {
                continue;
            }
            if node.is_leaf() {
                for slot in node.offset..node.offset + node.count {
                    let prim = self.order[slot];
                    if hit_fn(prim, ray) {
                        return Some(prim);
                    }
                }
            } else {
                stack.push(node.offset);
                stack.push(node_idx + 1);
            }
        }
        None
    }

    fn push_leaf(&mut self, bounds: AABB, start: usize, count: usize) -> usize {
        self.nodes.push(Node { bounds, offset: start, count });
        self.nodes.len() - 1
    }

    fn build_range(&mut self, input: &BuildInput, start: usize, end: usize) -> usize {
        let mut bounds = AABB::default();
        let mut centroid_bounds = AABB::default();
        for &prim in &self.order[start..end] {
            bounds.expand_by_aabb(&input.bounds[prim]);
            centroid_bounds.expand_by_point(&input.centroids[prim]);
        }

        let count = end - start;
        if count <= MAX_LEAF_SIZE {
            return self.push_leaf(bounds, start, count);
        }

        let axis = centroid_bounds.max_extent();
        let lo = centroid_bounds.p_min[axis];
        let extent = centroid_bounds.p_max[axis] - lo;
        if extent.abs() < 1e-6 {
            return self.push_leaf(bounds, start, count);
        }
        let bucket_of = |c: Float| (((c - lo) / extent * SAH_BUCKETS as Float) as usize).min(SAH_BUCKETS - 1);

        let mut buckets = [(0usize, AABB::default()); SAH_BUCKETS];
        for &prim in &self.order[start..end] {
            let b = bucket_of(input.centroids[prim][axis]);
            buckets[b].0 += 1;
            buckets[b].1.expand_by_aabb(&input.bounds[prim]);
        }

        let area = bounds.surface_area().max(1e-6);
        let side_cost = |range: &[(usize, AABB)]| {
            let mut b = AABB::default();
            let mut n = 0usize;
            for (c, bb) in range {
                n += c;
                b.expand_by_aabb(bb);
            }
            if n > 0 { n as Float * b.surface_area() } else { 0.0 }
        };
        let (split, cost) = (0..SAH_BUCKETS - 1)
            .map(|i| (i, 1.0 + (side_cost(&buckets[..=i]) + side_cost(&buckets[i + 1..])) / area))
            .fold((0usize, Float::MAX), |best, cur| if cur.1 < best.1 { cur } else { best });

        if cost >= count as Float {
            return self.push_leaf(bounds, start, count);
        }

        let mut mid = start;
        for i in start..end {
            if bucket_of(input.centroids[self.order[i]][axis]) <= split {
                self.order.swap(i, mid);
                mid += 1;
            }
        }
        if mid == start || mid == end {
            return self.push_leaf(bounds, start, count);
        }

        let node_idx = self.push_leaf(bounds, 0, 0);
        self.build_range(input, start, mid);
        let right = self.build_range(input, mid, end);
        self.nodes[node_idx] = Node { bounds, offset: right, count: 0 };
        node_idx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn boxes() -> Vec<AABB> {
        (0..32).map(|i| {
            let x = i as Float * 2.0;
            AABB::new(Vector3f::new(x, 0.0, -0.1), Vector3f::new(x + 1.0, 1.0, 0.1))
        }).collect()
    }

    fn slab_t(b: &AABB, ray: &Ray3f) -> Option<((), Float)> {
        if b.ray_intersect(ray) {
            Some(((), (b.p_max.z - ray.origin().z) / ray.dir().z))
        } else {
            None
        }
    }

    #[test]
    fn test_bvh_matches_linear_scan() {
        let prims = boxes();
        let bvh = Bvh::build(prims.clone());
        assert!(!bvh.is_empty());

        for i in 0..32 {
            let ray = Ray3f::new(Vector3f::new(i as Float * 2.0 + 0.5, 0.5, 1.0),
                                 Vector3f::new(0.0, 0.0, -1.0), None, None);
            let hit = bvh.closest(&ray, |prim, r| slab_t(&prims[prim], r));
            assert_eq!(hit.map(|h| h.0), Some(i));
            assert_eq!(bvh.any(&ray, |prim, r| prims[prim].ray_intersect(r)), Some(i));
        }

        let miss = Ray3f::new(Vector3f::new(1.5, 0.5, 1.0), Vector3f::new(0.0, 0.0, -1.0), None, None);
        assert!(bvh.closest(&miss, |prim, r| slab_t(&prims[prim], r)).is_none());
    }

    #[test]
    fn test_empty_bvh() {
        let bvh = Bvh::build(Vec::new());
        let ray = Ray3f::new(Vector3f::zeros(), Vector3f::new(0.0, 0.0, 1.0), None, None);
        assert!(bvh.closest(&ray, |_, _| Some(((), 1.0))).is_none());
        assert!(!bvh.bounds().is_valid());
    }
}
