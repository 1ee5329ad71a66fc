use crate::enums::{BorderMode, InterpolationMode};
use crate::volume::{Scalar, Volume, dispatch_scalars};

use ndarray::ArrayView4;

/// Smallest bounds tolerance, applied even when the border is off.
pub(crate) const FLOOR_TOLERANCE: f64 = 7.62939453125e-06;

/// Tolerance used for wrap and mirror padding, where every point is inside.
const UNBOUNDED_TOLERANCE: f64 = 2.0 * i32::MAX as f64;

/// Default half-voxel border.
pub const DEFAULT_BORDER_THICKNESS: f64 = 0.5;

/// Kernel taps along a single axis, as array offsets relative to the extent start.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct AxisTaps {
    pub(crate) index: [usize; 4],
    pub(crate) weight: [f64; 4],
    pub(crate) count: usize,
}

impl AxisTaps {
    fn single(index: usize) -> Self {
        Self {
            index: [index, 0, 0, 0],
            weight: [1.0, 0.0, 0.0, 0.0],
            count: 1,
        }
    }
}

/// Samples a volume at continuous voxel-index coordinates.
///
/// The interpolator is immutable once built and can be shared across the
/// rows of a resample running in parallel.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Interpolator {
    mode: InterpolationMode,
    border_mode: BorderMode,
    tolerance: f64,
}

impl Default for Interpolator {
    fn default() -> Self {
        Self::new(InterpolationMode::default())
    }
}

impl Interpolator {
    /// Clamping interpolator with the default half-voxel border.
    pub fn new(mode: InterpolationMode) -> Self {
        Self {
            mode,
            border_mode: BorderMode::Clamp,
            tolerance: DEFAULT_BORDER_THICKNESS,
        }
    }

    /// Interpolator whose tolerance follows the border settings: the border
    /// thickness for clamping with the border on, a tiny tolerance with the
    /// border off, and no bounds at all for wrap and mirror.
    pub fn with_border(
        mode: InterpolationMode,
        border_mode: BorderMode,
        border: bool,
        border_thickness: f64,
    ) -> Self {
        let tolerance = match border_mode {
            BorderMode::Clamp if border => border_thickness,
            BorderMode::Clamp => 0.0,
            BorderMode::Wrap | BorderMode::Mirror => UNBOUNDED_TOLERANCE,
        };
        Self {
            mode,
            border_mode,
            tolerance: tolerance.max(FLOOR_TOLERANCE),
        }
    }

    pub fn mode(&self) -> InterpolationMode {
        self.mode
    }

    pub fn border_mode(&self) -> BorderMode {
        self.border_mode
    }

    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    /// All kernels of this interpolator are separable.
    pub fn is_separable(&self) -> bool {
        true
    }

    /// Whether `point` lies within the extent grown by the tolerance.
    ///
    /// NaN coordinates are always out of bounds.
    #[inline]
    pub fn check_bounds(&self, extent: [i32; 6], point: [f64; 3]) -> bool {
        (0..3).all(|axis| {
            let lo = extent[2 * axis] as f64 - self.tolerance;
            let hi = extent[2 * axis + 1] as f64 + self.tolerance;
            point[axis] >= lo && point[axis] <= hi
        })
    }

    /// Interpolate `volume` at `point`, one value per component.
    ///
    /// Returns `false` and leaves `out` untouched when the point is out of
    /// bounds.
    pub fn sample(&self, volume: &Volume, point: [f64; 3], out: &mut [f64]) -> bool {
        let extent = volume.extent();
        dispatch_scalars!(volume.scalars(), data => self.sample_array(data.view(), extent, point, out))
    }

    pub(crate) fn sample_array<T: Scalar>(
        &self,
        data: ArrayView4<'_, T>,
        extent: [i32; 6],
        point: [f64; 3],
        out: &mut [f64],
    ) -> bool {
        if data.is_empty() || !self.check_bounds(extent, point) {
            return false;
        }
        let tx = self.axis_taps(point[0], extent[0], extent[1]);
        let ty = self.axis_taps(point[1], extent[2], extent[3]);
        let tz = self.axis_taps(point[2], extent[4], extent[5]);

        for (c, value) in out.iter_mut().enumerate().take(data.dim().3) {
            let mut sum = 0.0;
            for k in 0..tz.count {
                for j in 0..ty.count {
                    let wzy = tz.weight[k] * ty.weight[j];
                    let mut row = 0.0;
                    for i in 0..tx.count {
                        row += tx.weight[i] * data[[tz.index[k], ty.index[j], tx.index[i], c]].to_f64();
                    }
                    sum += wzy * row;
                }
            }
            *value = sum;
        }
        true
    }

    /// Taps and weights of the kernel along one axis of extent `[lo, hi]`.
    pub(crate) fn axis_taps(&self, coord: f64, lo: i32, hi: i32) -> AxisTaps {
        let (lo, hi) = (lo as i64, hi as i64);
        let fix = |i: i64| (self.apply_border(i, lo, hi) - lo) as usize;
        match self.mode {
            InterpolationMode::Nearest => AxisTaps::single(fix((coord + 0.5).floor() as i64)),
            InterpolationMode::Linear => {
                let base = coord.floor();
                let f = coord - base;
                let i0 = base as i64;
                let i1 = i0 + i64::from(f != 0.0);
                AxisTaps {
                    index: [fix(i0), fix(i1), 0, 0],
                    weight: [1.0 - f, f, 0.0, 0.0],
                    count: self.mode.support_size(),
                }
            }
            InterpolationMode::Cubic => {
                let base = coord.floor();
                let f = coord - base;
                let i0 = base as i64;
                if lo == hi || f == 0.0 {
                    return AxisTaps::single(fix(i0));
                }
                AxisTaps {
                    index: [fix(i0 - 1), fix(i0), fix(i0 + 1), fix(i0 + 2)],
                    weight: cubic_weights(f),
                    count: self.mode.support_size(),
                }
            }
        }
    }

    #[inline]
    fn apply_border(&self, i: i64, lo: i64, hi: i64) -> i64 {
        match self.border_mode {
            BorderMode::Clamp => i.clamp(lo, hi),
            BorderMode::Wrap => wrap(i, lo, hi),
            BorderMode::Mirror => mirror(i, lo, hi),
        }
    }
}

/// Catmull-Rom weights for fractional offset `f`.
#[inline]
fn cubic_weights(f: f64) -> [f64; 4] {
    let fm1 = f - 1.0;
    let fd2 = f * 0.5;
    let ft3 = f * 3.0;
    [
        -fd2 * fm1 * fm1,
        ((ft3 - 2.0) * fd2 - 1.0) * fm1,
        -((ft3 - 4.0) * f - 1.0) * fd2,
        f * fd2 * fm1,
    ]
}

#[inline]
fn wrap(i: i64, lo: i64, hi: i64) -> i64 {
    (i - lo).rem_euclid(hi - lo + 1) + lo
}

#[inline]
fn mirror(i: i64, lo: i64, hi: i64) -> i64 {
    let range = hi - lo + 1;
    let period = 2 * range;
    let mut offset = i - lo;
    if offset < 0 {
        offset = -offset - 1;
    }
    offset %= period;
    if offset >= range {
        offset = period - offset - 1;
    }
    offset + lo
}
