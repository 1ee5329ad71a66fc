use crate::interpolator::FLOOR_TOLERANCE;
use crate::volume::Volume;

use glam::{DMat4, DVec2, DVec3};

/// Largest number of vertices a clipped polygon can have.
pub const MAX_POLYGON_POINTS: usize = 32;

/// Convex polygon in slice coordinates, all vertices at the same z.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Polygon {
    points: Vec<DVec3>,
}

impl Polygon {
    pub fn points(&self) -> &[DVec3] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// An empty polygon means there is nothing to draw.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// `[xmin, xmax, ymin, ymax]`, or `None` for an empty polygon.
    pub fn bounds(&self) -> Option<[f64; 4]> {
        let first = self.points.first()?;
        let init = [first.x, first.x, first.y, first.y];
        Some(self.points.iter().fold(init, |b, p| {
            [b[0].min(p.x), b[1].max(p.x), b[2].min(p.y), b[3].max(p.y)]
        }))
    }

    /// Signed area in the xy plane, positive for counter-clockwise order.
    pub fn area(&self) -> f64 {
        let n = self.points.len();
        if n < 3 {
            return 0.0;
        }
        0.5 * (0..n)
            .map(|i| {
                let (a, b) = (self.points[i], self.points[(i + 1) % n]);
                a.x * b.y - b.x * a.y
            })
            .sum::<f64>()
    }

    /// Whether every turn of the outline goes the same way, allowing
    /// `tolerance` for nearly collinear vertices.
    pub fn is_convex(&self, tolerance: f64) -> bool {
        let n = self.points.len();
        if n < 3 {
            return true;
        }
        let mut sign = 0.0;
        for i in 0..n {
            let a = self.points[i].truncate();
            let b = self.points[(i + 1) % n].truncate();
            let c = self.points[(i + 2) % n].truncate();
            let turn = (b - a).perp_dot(c - b);
            if turn.abs() <= tolerance {
                continue;
            }
            if sign == 0.0 {
                sign = turn.signum();
            } else if turn.signum() != sign {
                return false;
            }
        }
        true
    }
}

/// Index-space box of `volume`, grown by half a voxel with a border and by
/// the minimum voxel tolerance without.
///
/// Axes that hold a single voxel are grown to at least `flat_half_width`
/// so a slice through them is still hit.
pub fn data_bounds(volume: &Volume, border: bool, flat_half_width: f64) -> [f64; 6] {
    let tolerance = if border { 0.5 } else { FLOOR_TOLERANCE };
    let extent = volume.extent();
    let mut bounds = [0.0; 6];
    for axis in 0..3 {
        let (lo, hi) = (extent[2 * axis], extent[2 * axis + 1]);
        let grow = if lo == hi {
            tolerance.max(flat_half_width)
        } else {
            tolerance
        };
        bounds[2 * axis] = lo as f64 - grow;
        bounds[2 * axis + 1] = hi as f64 + grow;
    }
    bounds
}

/// Intersects a slice or slab with a box.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PolygonClipper {
    tolerance: f64,
}

impl Default for PolygonClipper {
    fn default() -> Self {
        Self { tolerance: 0.5 }
    }
}

impl PolygonClipper {
    /// `tolerance` is the distance under which vertices are merged.
    pub fn new(tolerance: f64) -> Self {
        Self {
            tolerance: tolerance.abs(),
        }
    }

    /// Merge tolerance of half a screen pixel, given the world height of the
    /// view and its height in pixels.
    pub fn for_screen(view_height: f64, viewport_height: u32) -> Self {
        if viewport_height == 0 {
            return Self::default();
        }
        Self::new(0.5 * view_height / viewport_height as f64)
    }

    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    /// Polygon where the slab `slice_z ± slab_thickness / 2` meets `bounds`.
    ///
    /// `bounds_to_slice` maps the box coordinates into slice coordinates.
    /// All output vertices are placed at `slice_z`.
    pub fn compute(
        &self,
        bounds: [f64; 6],
        bounds_to_slice: DMat4,
        slice_z: f64,
        slab_thickness: f64,
    ) -> Polygon {
        let thickness = slab_thickness.max(0.0);
        let mut corners = [DVec3::ZERO; 8];
        let mut near = [0.0; 8];
        let mut far = [0.0; 8];
        for (i, corner) in corners.iter_mut().enumerate() {
            let point = DVec3::new(
                bounds[i & 1],
                bounds[2 + ((i >> 1) & 1)],
                bounds[4 + ((i >> 2) & 1)],
            );
            *corner = bounds_to_slice.transform_point3(point);
            near[i] = corner.z - slice_z - 0.5 * thickness;
            far[i] = near[i] + thickness;
        }
        let below = near.map(|w| w < 0.0);
        let above = far.map(|w| w >= 0.0);

        let mut candidates: Vec<DVec2> = Vec::with_capacity(20);
        if thickness > 0.0 {
            for i in 0..8 {
                if above[i] && below[i] {
                    candidates.push(corners[i].truncate());
                }
            }
        }

        for edge in 0..12usize {
            let i1 = (edge & 3) | (((edge << 1) ^ (edge << 2)) & 4);
            let i2 = i1 ^ (1 << (edge >> 2));
            if above[i1] != above[i2] {
                candidates.push(intersect(&corners, &far, i1, i2));
            }
            if thickness > 0.0 && below[i1] != below[i2] {
                candidates.push(intersect(&corners, &near, i1, i2));
            }
        }

        if candidates.is_empty() {
            tracing::debug!("slice plane misses the data bounds");
            return Polygon::default();
        }

        let centre = candidates.iter().copied().sum::<DVec2>() / candidates.len() as f64;
        candidates.sort_by(|a, b| {
            let ta = (a.y - centre.y).atan2(a.x - centre.x);
            let tb = (b.y - centre.y).atan2(b.x - centre.x);
            ta.total_cmp(&tb)
        });

        let tol2 = self.tolerance * self.tolerance;
        let mut merged = merge_close(&candidates, tol2);
        if thickness > 0.0 {
            merged = convex_hull_pass(&merged, tol2);
        }
        merged.truncate(MAX_POLYGON_POINTS);

        Polygon {
            points: merged.into_iter().map(|p| p.extend(slice_z)).collect(),
        }
    }
}

/// Point where the edge `i1 -> i2` crosses the plane with signed distances
/// `weights`.
fn intersect(corners: &[DVec3; 8], weights: &[f64; 8], i1: usize, i2: usize) -> DVec2 {
    let w1 = weights[i2];
    let w2 = -weights[i1];
    ((corners[i1] * w1 + corners[i2] * w2) / (w1 + w2)).truncate()
}

/// Drop points closer than the tolerance to the previously kept point,
/// including the closing edge.
fn merge_close(points: &[DVec2], tol2: f64) -> Vec<DVec2> {
    let mut merged: Vec<DVec2> = Vec::with_capacity(points.len());
    for &point in points {
        match merged.last() {
            Some(last) if last.distance_squared(point) <= tol2 => {}
            _ => merged.push(point),
        }
    }
    while merged.len() > 1 {
        let (first, last) = (merged[0], merged[merged.len() - 1]);
        if first.distance_squared(last) > tol2 {
            break;
        }
        merged.pop();
    }
    merged
}

/// Remove points that make the counter-clockwise outline concave.
fn convex_hull_pass(points: &[DVec2], tol2: f64) -> Vec<DVec2> {
    let n = points.len();
    if n < 3 {
        return points.to_vec();
    }
    let mut hull: Vec<DVec2> = Vec::with_capacity(n);
    for i in 0..n {
        let point = points[i];
        let last = hull.last().copied().unwrap_or(points[n - 1]);
        let next = points[(i + 1) % n];
        let turn = (next.x - last.x) * (point.y - last.y) - (next.y - last.y) * (point.x - last.x);
        if turn < tol2 {
            hull.push(point);
        }
    }
    hull
}
