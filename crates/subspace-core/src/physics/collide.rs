//! Collision geometry: spaces, bounding boxes, sweep-and-prune and the
//! primitive narrow phase.
//!
//! Every narrow-phase routine reports normals pointing from its first shape
//! toward its second. Plane/plane pairs never touch.

use glam::{DMat3, DVec3};

use super::joint::ContactPoint;
use super::{BodyId, SpaceId};
use crate::components::Shape;
use crate::math::Pose;

/// Half-size used for the bounding box of unbounded shapes
const UNBOUNDED: f64 = 1.0e30;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: DVec3,
    pub max: DVec3,
}

impl Aabb {
    pub fn overlaps(&self, other: &Aabb) -> bool {
        self.min.cmple(other.max).all() && other.min.cmple(self.max).all()
    }

    pub fn of(shape: &Shape, pose: &Pose) -> Aabb {
        let half = match *shape {
            Shape::Sphere { radius } => DVec3::splat(radius),
            Shape::Box { half_extents } => abs_mat(pose.basis) * half_extents,
            Shape::Capsule { radius, half_length } => {
                pose.basis.z_axis.abs() * half_length + DVec3::splat(radius)
            }
            Shape::Plane { .. } => DVec3::splat(UNBOUNDED),
        };
        let center = if shape.is_unbounded() { DVec3::ZERO } else { pose.loc };
        Aabb {
            min: center - half,
            max: center + half,
        }
    }
}

fn abs_mat(m: DMat3) -> DMat3 {
    DMat3::from_cols(m.x_axis.abs(), m.y_axis.abs(), m.z_axis.abs())
}

/// A collision shape, either riding on a body or fixed in absolute space
#[derive(Debug, Clone)]
pub struct Geom {
    pub(crate) shape: Shape,
    pub(crate) body: Option<BodyId>,
    /// Placement relative to the body frame
    pub(crate) offset: Pose,
    /// Absolute pose for static geoms
    pub(crate) pose: Pose,
    pub(crate) space: SpaceId,
    pub(crate) enabled: bool,
}

impl Geom {
    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn body(&self) -> Option<BodyId> {
        self.body
    }

    pub fn space(&self) -> SpaceId {
        self.space
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

/// Grouping of geoms that can be switched off as a unit
#[derive(Debug, Clone, Default)]
pub struct Space {
    pub(crate) parent: Option<SpaceId>,
    pub(crate) enabled: bool,
}

impl Space {
    pub fn parent(&self) -> Option<SpaceId> {
        self.parent
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

/// Sweep-and-prune along x; returns index pairs `(i, k)` with `i < k`, sorted
pub fn overlapping_pairs(aabbs: &[Aabb]) -> Vec<(usize, usize)> {
    let mut order: Vec<usize> = (0..aabbs.len()).collect();
    order.sort_by(|&a, &b| aabbs[a].min.x.total_cmp(&aabbs[b].min.x).then(a.cmp(&b)));

    let mut active: Vec<usize> = Vec::new();
    let mut out = Vec::new();
    for idx in order {
        let current = &aabbs[idx];
        active.retain(|&j| aabbs[j].max.x >= current.min.x);
        for &j in &active {
            if aabbs[j].overlaps(current) {
                out.push(if j < idx { (j, idx) } else { (idx, j) });
            }
        }
        active.push(idx);
    }
    out.sort_unstable();
    out
}

fn rank(shape: &Shape) -> u8 {
    match shape {
        Shape::Sphere { .. } => 0,
        Shape::Box { .. } => 1,
        Shape::Capsule { .. } => 2,
        Shape::Plane { .. } => 3,
    }
}

/// Contact points between two placed shapes, deepest first, at most `max`
pub fn collide(a: &Shape, pa: &Pose, b: &Shape, pb: &Pose, max: usize) -> Vec<ContactPoint> {
    let mut points = if rank(a) <= rank(b) {
        collide_ordered(a, pa, b, pb)
    } else {
        let mut swapped = collide_ordered(b, pb, a, pa);
        for p in &mut swapped {
            p.normal = -p.normal;
        }
        swapped
    };
    points.sort_by(|x, y| y.depth.total_cmp(&x.depth));
    points.truncate(max);
    points
}

fn collide_ordered(a: &Shape, pa: &Pose, b: &Shape, pb: &Pose) -> Vec<ContactPoint> {
    use Shape::*;
    match (*a, *b) {
        (Sphere { radius: ra }, Sphere { radius: rb }) => {
            sphere_sphere(pa.loc, ra, pb.loc, rb).into_iter().collect()
        }
        (Sphere { radius }, Box { half_extents }) => {
            sphere_box(pa.loc, radius, pb, half_extents).into_iter().collect()
        }
        (Sphere { radius }, Capsule { radius: rc, half_length }) => {
            let (s0, s1) = segment(pb, half_length);
            let q = closest_on_segment(s0, s1, pa.loc);
            sphere_sphere(pa.loc, radius, q, rc).into_iter().collect()
        }
        (Sphere { radius }, Plane { normal, offset }) => {
            let (n, d) = world_plane(pb, normal, offset);
            sphere_plane(pa.loc, radius, n, d).into_iter().collect()
        }
        (Box { half_extents: ha }, Box { half_extents: hb }) => box_box(pa, ha, pb, hb),
        (Box { half_extents }, Capsule { radius, half_length }) => {
            capsule_spheres(pb, half_length)
                .into_iter()
                .filter_map(|c| sphere_box(c, radius, pa, half_extents))
                .map(|mut p| {
                    p.normal = -p.normal;
                    p
                })
                .collect()
        }
        (Box { half_extents }, Plane { normal, offset }) => {
            let (n, d) = world_plane(pb, normal, offset);
            box_corners(pa, half_extents)
                .into_iter()
                .filter_map(|c| sphere_plane(c, 0.0, n, d))
                .collect()
        }
        (Capsule { radius: ra, half_length: la }, Capsule { radius: rb, half_length: lb }) => {
            let (a0, a1) = segment(pa, la);
            let (b0, b1) = segment(pb, lb);
            let (p, q) = closest_between_segments(a0, a1, b0, b1);
            sphere_sphere(p, ra, q, rb).into_iter().collect()
        }
        (Capsule { radius, half_length }, Plane { normal, offset }) => {
            let (n, d) = world_plane(pb, normal, offset);
            let (s0, s1) = segment(pa, half_length);
            [s0, s1]
                .into_iter()
                .filter_map(|c| sphere_plane(c, radius, n, d))
                .collect()
        }
        (Plane { .. }, Plane { .. }) => Vec::new(),
        _ => Vec::new(),
    }
}

fn world_plane(pose: &Pose, normal: DVec3, offset: f64) -> (DVec3, f64) {
    let n = (pose.basis * normal).normalize_or_zero();
    (n, offset + n.dot(pose.loc))
}

fn sphere_sphere(ca: DVec3, ra: f64, cb: DVec3, rb: f64) -> Option<ContactPoint> {
    let d = cb - ca;
    let dist = d.length();
    let depth = ra + rb - dist;
    if depth <= 0.0 {
        return None;
    }
    let normal = if dist > 1.0e-12 { d / dist } else { DVec3::Z };
    Some(ContactPoint {
        position: ca + normal * (ra - depth * 0.5),
        normal,
        depth,
    })
}

/// Normal points from the sphere into the plane's solid side
fn sphere_plane(center: DVec3, radius: f64, n: DVec3, offset: f64) -> Option<ContactPoint> {
    let dist = n.dot(center) - offset;
    let depth = radius - dist;
    if depth <= 0.0 {
        return None;
    }
    Some(ContactPoint {
        position: center - n * dist,
        normal: -n,
        depth,
    })
}

/// Normal points from the sphere toward the box
fn sphere_box(center: DVec3, radius: f64, pose: &Pose, half: DVec3) -> Option<ContactPoint> {
    let local = pose.inverse().transform_point(center);
    let clamped = local.clamp(-half, half);
    let outside = local - clamped;
    let dist = outside.length();

    if dist > 1.0e-12 {
        let depth = radius - dist;
        if depth <= 0.0 {
            return None;
        }
        let from_box = pose.transform_vector(outside / dist);
        return Some(ContactPoint {
            position: pose.transform_point(clamped),
            normal: -from_box,
            depth,
        });
    }

    // Center inside the box: push out through the nearest face
    let gaps = half - local.abs();
    let axis = if gaps.x <= gaps.y && gaps.x <= gaps.z {
        0
    } else if gaps.y <= gaps.z {
        1
    } else {
        2
    };
    let mut face = DVec3::ZERO;
    face[axis] = if local[axis] >= 0.0 { 1.0 } else { -1.0 };
    let from_box = pose.transform_vector(face);
    Some(ContactPoint {
        position: center,
        normal: -from_box,
        depth: gaps[axis] + radius,
    })
}

fn box_corners(pose: &Pose, half: DVec3) -> [DVec3; 8] {
    let mut corners = [DVec3::ZERO; 8];
    for (i, corner) in corners.iter_mut().enumerate() {
        let sign = DVec3::new(
            if i & 1 == 0 { -1.0 } else { 1.0 },
            if i & 2 == 0 { -1.0 } else { 1.0 },
            if i & 4 == 0 { -1.0 } else { 1.0 },
        );
        *corner = pose.transform_point(sign * half);
    }
    corners
}

/// Corners of either box inside the other; edge-edge crossings are missed
fn box_box(pa: &Pose, ha: DVec3, pb: &Pose, hb: DVec3) -> Vec<ContactPoint> {
    let mut out = Vec::new();
    for corner in box_corners(pb, hb) {
        if let Some((normal, depth)) = corner_in_box(corner, pa, ha) {
            out.push(ContactPoint { position: corner, normal, depth });
        }
    }
    for corner in box_corners(pa, ha) {
        if let Some((normal, depth)) = corner_in_box(corner, pb, hb) {
            out.push(ContactPoint { position: corner, normal: -normal, depth });
        }
    }
    out
}

/// Outward face normal and penetration of `point` inside the box
fn corner_in_box(point: DVec3, pose: &Pose, half: DVec3) -> Option<(DVec3, f64)> {
    let local = pose.inverse().transform_point(point);
    let gaps = half - local.abs();
    if gaps.min_element() <= 0.0 {
        return None;
    }
    let axis = if gaps.x <= gaps.y && gaps.x <= gaps.z {
        0
    } else if gaps.y <= gaps.z {
        1
    } else {
        2
    };
    let mut face = DVec3::ZERO;
    face[axis] = if local[axis] >= 0.0 { 1.0 } else { -1.0 };
    Some((pose.transform_vector(face), gaps[axis]))
}

fn segment(pose: &Pose, half_length: f64) -> (DVec3, DVec3) {
    let offset = pose.basis.z_axis * half_length;
    (pose.loc - offset, pose.loc + offset)
}

fn capsule_spheres(pose: &Pose, half_length: f64) -> [DVec3; 3] {
    let (s0, s1) = segment(pose, half_length);
    [s0, pose.loc, s1]
}

fn closest_on_segment(s0: DVec3, s1: DVec3, p: DVec3) -> DVec3 {
    let d = s1 - s0;
    let len2 = d.length_squared();
    if len2 < 1.0e-18 {
        return s0;
    }
    s0 + d * ((p - s0).dot(d) / len2).clamp(0.0, 1.0)
}

fn closest_between_segments(p0: DVec3, p1: DVec3, q0: DVec3, q1: DVec3) -> (DVec3, DVec3) {
    let d1 = p1 - p0;
    let d2 = q1 - q0;
    let r = p0 - q0;
    let a = d1.length_squared();
    let e = d2.length_squared();
    let f = d2.dot(r);

    if a < 1.0e-18 && e < 1.0e-18 {
        return (p0, q0);
    }
    let (s, t) = if a < 1.0e-18 {
        (0.0, (f / e).clamp(0.0, 1.0))
    } else {
        let c = d1.dot(r);
        if e < 1.0e-18 {
            ((-c / a).clamp(0.0, 1.0), 0.0)
        } else {
            let b = d1.dot(d2);
            let denom = a * e - b * b;
            let mut s = if denom > 1.0e-18 { ((b * f - c * e) / denom).clamp(0.0, 1.0) } else { 0.0 };
            let mut t = (b * s + f) / e;
            if t < 0.0 {
                t = 0.0;
                s = (-c / a).clamp(0.0, 1.0);
            } else if t > 1.0 {
                t = 1.0;
                s = ((b - c) / a).clamp(0.0, 1.0);
            }
            (s, t)
        }
    };
    (p0 + d1 * s, q0 + d2 * t)
}
