//! Sequential-impulse velocity solver.
//!
//! Every constraint is flattened into scalar rows `J v = target` with an
//! impulse range `[lo, hi]`. Rows are swept `iterations` times, clamping the
//! accumulated impulse each visit.

use glam::DVec3;
use slab::Slab;

use super::body::Body;

#[derive(Debug, Clone, Copy)]
pub(crate) struct Row {
    pub a: Option<usize>,
    pub b: Option<usize>,
    pub lin_a: DVec3,
    pub ang_a: DVec3,
    pub lin_b: DVec3,
    pub ang_b: DVec3,
    /// Desired value of `J v`
    pub target: f64,
    pub lo: f64,
    pub hi: f64,
    /// Friction rows: (index of the normal row, coefficient)
    pub friction: Option<(usize, f64)>,
    inv_k: f64,
    pub impulse: f64,
}

impl Row {
    pub fn new(a: Option<usize>, b: Option<usize>) -> Self {
        Self {
            a,
            b,
            lin_a: DVec3::ZERO,
            ang_a: DVec3::ZERO,
            lin_b: DVec3::ZERO,
            ang_b: DVec3::ZERO,
            target: 0.0,
            lo: f64::NEG_INFINITY,
            hi: f64::INFINITY,
            friction: None,
            inv_k: 0.0,
            impulse: 0.0,
        }
    }

    /// Linear row along `dir` between anchor offsets `ra` and `rb`
    pub fn linear(a: Option<usize>, b: Option<usize>, ra: DVec3, rb: DVec3, dir: DVec3) -> Self {
        let mut row = Self::new(a, b);
        row.lin_a = -dir;
        row.ang_a = -ra.cross(dir);
        row.lin_b = dir;
        row.ang_b = rb.cross(dir);
        row
    }

    /// Angular row on the relative angular velocity along `dir`
    pub fn angular(a: Option<usize>, b: Option<usize>, dir: DVec3) -> Self {
        let mut row = Self::new(a, b);
        row.ang_a = -dir;
        row.ang_b = dir;
        row
    }

    pub fn with_target(mut self, target: f64) -> Self {
        self.target = target;
        self
    }

    pub fn with_bounds(mut self, lo: f64, hi: f64) -> Self {
        self.lo = lo;
        self.hi = hi;
        self
    }

    /// Compute the effective mass; false if the row cannot act on anything
    pub fn finalize(&mut self, bodies: &Slab<Body>) -> bool {
        let mut k = 0.0;
        if let Some(body) = self.a.and_then(|i| bodies.get(i)) {
            k += body.inv_mass * self.lin_a.length_squared() + body.inv_moment * self.ang_a.length_squared();
        }
        if let Some(body) = self.b.and_then(|i| bodies.get(i)) {
            k += body.inv_mass * self.lin_b.length_squared() + body.inv_moment * self.ang_b.length_squared();
        }
        if k <= 1.0e-12 {
            return false;
        }
        self.inv_k = 1.0 / k;
        true
    }

    pub fn velocity(&self, bodies: &Slab<Body>) -> f64 {
        let mut v = 0.0;
        if let Some(body) = self.a.and_then(|i| bodies.get(i)) {
            v += self.lin_a.dot(body.lin_vel) + self.ang_a.dot(body.ang_vel);
        }
        if let Some(body) = self.b.and_then(|i| bodies.get(i)) {
            v += self.lin_b.dot(body.lin_vel) + self.ang_b.dot(body.ang_vel);
        }
        v
    }

    fn apply(&self, bodies: &mut Slab<Body>, lambda: f64) {
        if let Some(body) = self.a.and_then(|i| bodies.get_mut(i)) {
            body.lin_vel += self.lin_a * (body.inv_mass * lambda);
            body.ang_vel += self.ang_a * (body.inv_moment * lambda);
        }
        if let Some(body) = self.b.and_then(|i| bodies.get_mut(i)) {
            body.lin_vel += self.lin_b * (body.inv_mass * lambda);
            body.ang_vel += self.ang_b * (body.inv_moment * lambda);
        }
    }
}

pub(crate) fn solve(rows: &mut [Row], bodies: &mut Slab<Body>, iterations: u32) {
    for _ in 0..iterations {
        for i in 0..rows.len() {
            if let Some((normal, mu)) = rows[i].friction {
                let limit = mu * rows[normal].impulse.max(0.0);
                rows[i].lo = -limit;
                rows[i].hi = limit;
            }
            let row = &mut rows[i];
            let v = row.velocity(bodies);
            let delta = (row.target - v) * row.inv_k;
            let old = row.impulse;
            row.impulse = (old + delta).clamp(row.lo, row.hi);
            let applied = row.impulse - old;
            if applied != 0.0 {
                row.apply(bodies, applied);
            }
        }
    }
}
