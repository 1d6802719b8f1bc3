// ==============================================================================
// octree.rs — POINT OCTREE FOR VERTEX NEIGHBORHOOD QUERIES
// ==============================================================================
// Deformation needs "closest original vertex to this contact point" and the
// vertex lists run into the tens of thousands, so each deformable mesh gets
// a lazily built octree over its original vertex positions.
//
// Nodes live in a flat arena and split into 8 octants when they exceed
// capacity. nearest() is branch-and-bound: a subtree is visited only when
// the squared distance from the query to its box undercuts the best match
// found so far, children closest-first.
// ==============================================================================

use nalgebra::Point3;

const NODE_CAPACITY: usize = 16;
const MAX_DEPTH: u32 = 8;

#[derive(Debug, Clone, Copy)]
struct Aabb {
    center: Point3<f32>,
    half: f32, // cubic cells
}

impl Aabb {
    fn octant_of(&self, p: &Point3<f32>) -> usize {
        ((p.x >= self.center.x) as usize)
            | (((p.y >= self.center.y) as usize) << 1)
            | (((p.z >= self.center.z) as usize) << 2)
    }

    fn octant(&self, i: usize) -> Aabb {
        let h = self.half * 0.5;
        let s = |bit: usize| if i >> bit & 1 == 1 { h } else { -h };
        Aabb {
            center: Point3::new(
                self.center.x + s(0),
                self.center.y + s(1),
                self.center.z + s(2),
            ),
            half: h,
        }
    }

    /// Squared distance from a point to this box, zero inside.
    fn dist_sq(&self, p: &Point3<f32>) -> f32 {
        let mut d = 0.0;
        for axis in 0..3 {
            let lo = self.center[axis] - self.half;
            let hi = self.center[axis] + self.half;
            let v = p[axis];
            if v < lo {
                d += (lo - v) * (lo - v);
            } else if v > hi {
                d += (v - hi) * (v - hi);
            }
        }
        d
    }
}

#[derive(Debug, Clone)]
struct Node {
    bounds: Aabb,
    depth: u32,
    /// Arena indices of the 8 children once split.
    children: Option<[usize; 8]>,
    /// (position, payload) pairs held while the node is a leaf.
    points: Vec<(Point3<f32>, u32)>,
}

#[derive(Debug, Clone)]
pub struct Octree {
    nodes: Vec<Node>,
    /// Points outside the root bounds; scanned linearly by every query.
    outliers: Vec<(Point3<f32>, u32)>,
    len: usize,
}

impl Octree {
    /// Build over a vertex list; payloads are the vertex indices.
    pub fn from_points(points: &[Point3<f32>]) -> Self {
        let mut min = Point3::new(f32::MAX, f32::MAX, f32::MAX);
        let mut max = Point3::new(f32::MIN, f32::MIN, f32::MIN);
        for p in points {
            for axis in 0..3 {
                min[axis] = min[axis].min(p[axis]);
                max[axis] = max[axis].max(p[axis]);
            }
        }
        let (center, half) = if points.is_empty() {
            (Point3::origin(), 1.0)
        } else {
            let center = Point3::new(
                (min.x + max.x) * 0.5,
                (min.y + max.y) * 0.5,
                (min.z + max.z) * 0.5,
            );
            let half = (max.x - min.x)
                .max(max.y - min.y)
                .max(max.z - min.z)
                .max(1e-3)
                * 0.5
                + 1e-3;
            (center, half)
        };

        let mut tree = Self {
            nodes: vec![Node {
                bounds: Aabb { center, half },
                depth: 0,
                children: None,
                points: Vec::new(),
            }],
            outliers: Vec::new(),
            len: 0,
        };
        for (i, p) in points.iter().enumerate() {
            tree.insert(*p, i as u32);
        }
        tree
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn insert(&mut self, point: Point3<f32>, payload: u32) {
        self.len += 1;
        // Outside the root bounds the octant walk has no valid cell; such
        // points go to the side list so queries still see them.
        if self.nodes[0].bounds.dist_sq(&point) > 0.0 {
            self.outliers.push((point, payload));
            return;
        }
        let mut idx = 0;
        loop {
            if let Some(children) = self.nodes[idx].children {
                idx = children[self.nodes[idx].bounds.octant_of(&point)];
                continue;
            }
            if self.nodes[idx].points.len() < NODE_CAPACITY
                || self.nodes[idx].depth >= MAX_DEPTH
            {
                self.nodes[idx].points.push((point, payload));
                return;
            }
            self.split(idx);
        }
    }

    /// Turn a full leaf into an interior node and redistribute its points.
    fn split(&mut self, idx: usize) {
        let bounds = self.nodes[idx].bounds;
        let depth = self.nodes[idx].depth;
        let first_child = self.nodes.len();
        for i in 0..8 {
            self.nodes.push(Node {
                bounds: bounds.octant(i),
                depth: depth + 1,
                children: None,
                points: Vec::new(),
            });
        }
        let points = std::mem::take(&mut self.nodes[idx].points);
        self.nodes[idx].children =
            Some(std::array::from_fn(|i| first_child + i));
        for (p, payload) in points {
            let child = first_child + bounds.octant_of(&p);
            self.nodes[child].points.push((p, payload));
        }
    }

    /// Payload and squared distance of the point closest to `query`.
    pub fn nearest(&self, query: &Point3<f32>) -> Option<(u32, f32)> {
        if self.len == 0 {
            return None;
        }
        let mut best: Option<(u32, f32)> = None;
        for (p, payload) in &self.outliers {
            let d = (p - query).norm_squared();
            if best.map_or(true, |(_, b)| d < b) {
                best = Some((*payload, d));
            }
        }
        self.nearest_in(0, query, &mut best);
        best
    }

    /// Payloads of every point within `radius` of `query`.
    pub fn within_radius(&self, query: &Point3<f32>, radius: f32, out: &mut Vec<u32>) {
        out.clear();
        if self.len == 0 {
            return;
        }
        let r_sq = radius * radius;
        for (p, payload) in &self.outliers {
            if (p - query).norm_squared() <= r_sq {
                out.push(*payload);
            }
        }
        let mut stack = vec![0usize];
        while let Some(idx) = stack.pop() {
            let node = &self.nodes[idx];
            if node.bounds.dist_sq(query) > r_sq {
                continue;
            }
            match node.children {
                Some(children) => stack.extend(children),
                None => {
                    for (p, payload) in &node.points {
                        if (p - query).norm_squared() <= r_sq {
                            out.push(*payload);
                        }
                    }
                }
            }
        }
    }

    fn nearest_in(&self, idx: usize, query: &Point3<f32>, best: &mut Option<(u32, f32)>) {
        let node = &self.nodes[idx];
        if let Some((_, best_sq)) = *best {
            if node.bounds.dist_sq(query) >= best_sq {
                return;
            }
        }

        match node.children {
            Some(children) => {
                // Closest child first tightens the bound early.
                let mut order: [usize; 8] = children;
                order.sort_by(|&a, &b| {
                    self.nodes[a]
                        .bounds
                        .dist_sq(query)
                        .total_cmp(&self.nodes[b].bounds.dist_sq(query))
                });
                for child in order {
                    self.nearest_in(child, query, best);
                }
            }
            None => {
                for (p, payload) in &node.points {
                    let d = (p - query).norm_squared();
                    if best.map_or(true, |(_, b)| d < b) {
                        *best = Some((*payload, d));
                    }
                }
            }
        }
    }
}
