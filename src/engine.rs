//! Resampling of a volume on an oblique output lattice.
//!
//! For every output sample `(i, j, k)` of an [`OutputGrid`], the engine maps
//! the lattice point into continuous voxel-index space through
//!
//! ```text
//! IndexMatrix = DataToIndex · ResliceAxes · GridToSlice
//! ```
//!
//! interpolates there, optionally composites a slab of parallel samples
//! along the slice normal, and applies the scalar shift and scale. Output
//! rows are independent and are distributed over the rayon thread pool.

use crate::axes::ResliceAxes;
use crate::enums::{BorderMode, InterpolationMode, Orientation, ScalarType, SlabMode};
use crate::error::ResliceError;
use crate::interpolator::{AxisTaps, DEFAULT_BORDER_THICKNESS, Interpolator};
use crate::volume::{Scalar, Scalars, Volume, dispatch_scalars, extent_len};

use glam::{DMat3, DMat4, DVec3};
use ndarray::{Array3, ArrayView4};
use rayon::prelude::*;

const IDENTITY_DIRECTION: [f64; 9] = [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0];

/// Sample lattice of a reslice output, in slice coordinates.
///
/// Extent index `(i, j, k)` sits at `origin + spacing * (i, j, k)`.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct OutputGrid {
    pub extent: [i32; 6],
    pub spacing: [f64; 3],
    pub origin: [f64; 3],
}

impl OutputGrid {
    pub fn new(extent: [i32; 6], spacing: [f64; 3], origin: [f64; 3]) -> Self {
        Self {
            extent,
            spacing,
            origin,
        }
    }

    /// Number of samples as (depth, height, width).
    pub fn dim(&self) -> (usize, usize, usize) {
        let e = self.extent;
        (
            extent_len(e[4], e[5]),
            extent_len(e[2], e[3]),
            extent_len(e[0], e[1]),
        )
    }

    pub fn is_empty(&self) -> bool {
        let (depth, height, width) = self.dim();
        depth == 0 || height == 0 || width == 0
    }

    /// Maps extent indices to slice coordinates.
    pub fn grid_to_slice(&self) -> DMat4 {
        let mut matrix = DMat4::from_diagonal(DVec3::from(self.spacing).extend(1.0));
        matrix.w_axis = DVec3::from(self.origin).extend(1.0);
        matrix
    }
}

/// Thick-slab compositing settings.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SlabSpec {
    mode: SlabMode,
    number_of_slices: u32,
    slice_spacing_fraction: f64,
    trapezoid: bool,
    thickness: f64,
}

impl Default for SlabSpec {
    fn default() -> Self {
        Self {
            mode: SlabMode::default(),
            number_of_slices: 1,
            slice_spacing_fraction: 1.0,
            trapezoid: false,
            thickness: 0.0,
        }
    }
}

impl SlabSpec {
    /// Slab of `thickness` sampled `sample_factor` times per `base_spacing`.
    ///
    /// The number of slices is `1 + sample_factor * ceil(thickness / base_spacing)`,
    /// so a zero thickness gives a single slice.
    pub fn from_thickness(
        thickness: f64,
        base_spacing: f64,
        sample_factor: u32,
        mode: SlabMode,
        trapezoid: bool,
    ) -> Result<Self, ResliceError> {
        if !thickness.is_finite() || thickness < 0.0 {
            return Err(ResliceError::InvalidSlabThickness(thickness));
        }
        if !(1..=2).contains(&sample_factor) {
            return Err(ResliceError::InvalidSlabSampleFactor(sample_factor));
        }
        let number_of_slices = if thickness > 0.0 && base_spacing > 0.0 {
            let too_many = || ResliceError::TooManySlabSlices {
                thickness,
                base_spacing,
            };
            let steps = (thickness / base_spacing).ceil();
            if steps > u32::MAX as f64 {
                return Err(too_many());
            }
            (steps as u32)
                .checked_mul(sample_factor)
                .and_then(|n| n.checked_add(1))
                .ok_or_else(too_many)?
        } else {
            1
        };
        Ok(Self {
            mode,
            number_of_slices,
            slice_spacing_fraction: 1.0,
            trapezoid,
            thickness,
        })
    }

    pub fn mode(&self) -> SlabMode {
        self.mode
    }

    pub fn number_of_slices(&self) -> u32 {
        self.number_of_slices
    }

    pub fn slice_spacing_fraction(&self) -> f64 {
        self.slice_spacing_fraction
    }

    pub fn trapezoid(&self) -> bool {
        self.trapezoid
    }

    pub fn thickness(&self) -> f64 {
        self.thickness
    }

    /// Distance between neighbouring slab samples, 1 for a single slice.
    pub fn sample_spacing(&self) -> f64 {
        if self.number_of_slices > 1 && self.thickness > 0.0 {
            self.thickness / (self.number_of_slices - 1) as f64
        } else {
            1.0
        }
    }

    /// Offsets of the slab samples in output z steps, centred on zero.
    fn offsets(&self) -> Vec<f64> {
        let n = self.number_of_slices.max(1) as usize;
        let centre = 0.5 * (n - 1) as f64;
        (0..n)
            .map(|s| (s as f64 - centre) * self.slice_spacing_fraction)
            .collect()
    }
}

/// Output of [`ResliceEngine::execute`].
#[derive(Clone, Debug)]
pub struct Resliced {
    /// Resampled scalars on the output grid, in slice coordinates.
    pub image: Volume,
    /// `true` where the sample was interpolated from the input, `false`
    /// where it was filled with the background. Present when stencil
    /// generation is enabled.
    pub stencil: Option<Array3<bool>>,
}

/// Resamples a volume through a set of reslice axes.
#[derive(Clone, Debug)]
pub struct ResliceEngine {
    axes: ResliceAxes,
    interpolation: InterpolationMode,
    border_mode: BorderMode,
    border: bool,
    border_thickness: f64,
    slab: SlabSpec,
    output_scalar_type: Option<ScalarType>,
    scalar_shift: f64,
    scalar_scale: f64,
    background: [f64; 4],
    output_grid: Option<OutputGrid>,
    output_dimensionality: u32,
    auto_crop_output: bool,
    generate_stencil: bool,
    sliding_window: bool,
}

impl Default for ResliceEngine {
    fn default() -> Self {
        Self {
            axes: ResliceAxes::identity(),
            interpolation: InterpolationMode::Nearest,
            border_mode: BorderMode::Clamp,
            border: true,
            border_thickness: DEFAULT_BORDER_THICKNESS,
            slab: SlabSpec::default(),
            output_scalar_type: None,
            scalar_shift: 0.0,
            scalar_scale: 1.0,
            background: [0.0; 4],
            output_grid: None,
            output_dimensionality: 3,
            auto_crop_output: false,
            generate_stencil: false,
            sliding_window: false,
        }
    }
}

impl ResliceEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Axis relabeling without interpolation.
    pub fn permute(orientation: Orientation) -> Self {
        Self {
            axes: ResliceAxes::permutation(orientation),
            ..Self::default()
        }
    }

    pub fn reslice_axes(&self) -> &ResliceAxes {
        &self.axes
    }

    pub fn reslice_axes_mut(&mut self) -> &mut ResliceAxes {
        &mut self.axes
    }

    /// Returns whether the axes changed.
    pub fn set_reslice_axes(&mut self, matrix: DMat4) -> bool {
        self.axes.set_matrix(matrix)
    }

    pub fn interpolation_mode(&self) -> InterpolationMode {
        self.interpolation
    }

    pub fn set_interpolation_mode(&mut self, mode: InterpolationMode) {
        self.interpolation = mode;
    }

    pub fn border(&self) -> bool {
        self.border
    }

    pub fn set_border(&mut self, border: bool) {
        self.border = border;
    }

    pub fn set_border_thickness(&mut self, thickness: f64) -> Result<(), ResliceError> {
        if !thickness.is_finite() || thickness < 0.0 {
            return Err(ResliceError::InvalidBorderThickness(thickness));
        }
        self.border_thickness = thickness;
        Ok(())
    }

    pub fn border_mode(&self) -> BorderMode {
        self.border_mode
    }

    pub fn set_border_mode(&mut self, mode: BorderMode) {
        self.border_mode = mode;
    }

    pub fn set_wrap(&mut self, wrap: bool) -> Result<(), ResliceError> {
        self.set_padding(wrap, BorderMode::Wrap, BorderMode::Mirror)
    }

    pub fn set_mirror(&mut self, mirror: bool) -> Result<(), ResliceError> {
        self.set_padding(mirror, BorderMode::Mirror, BorderMode::Wrap)
    }

    fn set_padding(
        &mut self,
        enable: bool,
        mode: BorderMode,
        other: BorderMode,
    ) -> Result<(), ResliceError> {
        if enable && self.border_mode == other {
            return Err(ResliceError::ConflictingBorderModes);
        }
        if enable {
            self.border_mode = mode;
        } else if self.border_mode == mode {
            self.border_mode = BorderMode::Clamp;
        }
        Ok(())
    }

    pub fn slab(&self) -> &SlabSpec {
        &self.slab
    }

    pub fn set_slab(&mut self, slab: SlabSpec) {
        self.slab = slab;
    }

    pub fn set_slab_mode(&mut self, mode: SlabMode) {
        self.slab.mode = mode;
    }

    pub fn set_slab_number_of_slices(&mut self, slices: u32) -> Result<(), ResliceError> {
        if slices < 1 {
            return Err(ResliceError::InvalidSlabNumberOfSlices(slices));
        }
        self.slab.number_of_slices = slices;
        Ok(())
    }

    pub fn set_slab_slice_spacing_fraction(&mut self, fraction: f64) -> Result<(), ResliceError> {
        if !fraction.is_finite() || fraction <= 0.0 {
            return Err(ResliceError::InvalidSlabSpacingFraction(fraction));
        }
        self.slab.slice_spacing_fraction = fraction;
        Ok(())
    }

    pub fn set_slab_trapezoid_integration(&mut self, trapezoid: bool) {
        self.slab.trapezoid = trapezoid;
    }

    pub fn output_scalar_type(&self) -> Option<ScalarType> {
        self.output_scalar_type
    }

    /// `None` keeps the input scalar type.
    pub fn set_output_scalar_type(&mut self, scalar_type: Option<ScalarType>) {
        self.output_scalar_type = scalar_type;
    }

    pub fn scalar_shift(&self) -> f64 {
        self.scalar_shift
    }

    pub fn set_scalar_shift(&mut self, shift: f64) {
        self.scalar_shift = shift;
    }

    pub fn scalar_scale(&self) -> f64 {
        self.scalar_scale
    }

    pub fn set_scalar_scale(&mut self, scale: f64) {
        self.scalar_scale = scale;
    }

    pub fn background_color(&self) -> [f64; 4] {
        self.background
    }

    pub fn set_background_color(&mut self, color: [f64; 4]) {
        self.background = color;
    }

    pub fn set_background_level(&mut self, level: f64) {
        self.background = [level; 4];
    }

    pub fn output_grid(&self) -> Option<OutputGrid> {
        self.output_grid
    }

    /// `None` derives the grid from the input with [`Self::default_output_grid`].
    pub fn set_output_grid(&mut self, grid: Option<OutputGrid>) {
        self.output_grid = grid;
    }

    pub fn set_output_dimensionality(&mut self, dimensionality: u32) -> Result<(), ResliceError> {
        if !(2..=3).contains(&dimensionality) {
            return Err(ResliceError::InvalidOutputDimensionality(dimensionality));
        }
        self.output_dimensionality = dimensionality;
        Ok(())
    }

    pub fn set_auto_crop_output(&mut self, auto_crop: bool) {
        self.auto_crop_output = auto_crop;
    }

    pub fn set_generate_stencil(&mut self, generate: bool) {
        self.generate_stencil = generate;
    }

    /// Reuse partial sums along output rows when the index matrix is a
    /// permutation. Other matrices silently use the general path.
    pub fn set_sliding_window(&mut self, sliding_window: bool) {
        self.sliding_window = sliding_window;
    }

    /// Interpolator for the current settings.
    pub fn interpolator(&self) -> Interpolator {
        Interpolator::with_border(
            self.interpolation,
            self.border_mode,
            self.border,
            self.border_thickness,
        )
    }

    /// Continuous voxel index of every output extent index.
    pub fn index_matrix(&self, volume: &Volume, grid: &OutputGrid) -> DMat4 {
        volume.data_to_index() * self.axes.matrix() * grid.grid_to_slice()
    }

    /// Grid used when none is set: the input grid seen through the reslice
    /// axes, with positive spacing and centred on the input centre.
    pub fn default_output_grid(&self, volume: &Volume) -> OutputGrid {
        let axes = self.axes.matrix();
        let frame = DMat4::from_mat3(inverse_direction(volume)) * axes;
        let in_spacing = volume.spacing();
        let in_extent = volume.extent();
        let center = self.axes.inverse().transform_point3(volume.center());
        let bounds = self.auto_crop_output.then(|| self.cropped_bounds(volume));

        let mut grid = OutputGrid::new([0; 6], [1.0; 3], [0.0; 3]);
        for i in 0..3 {
            let column = frame.col(i).truncate();
            let (mut s, mut d, mut e, mut r) = (0.0, 0.0, 0.0, 0.0);
            for j in 0..3 {
                let weight = column[j] * column[j];
                s += weight * in_spacing[j].abs();
                d += weight * (in_extent[2 * j + 1] - in_extent[2 * j]) as f64 * in_spacing[j].abs();
                e += weight * in_extent[2 * j] as f64;
                r += weight;
            }
            if r > 0.0 {
                s /= r;
                d /= r * r.sqrt();
                e /= r;
            }
            if s <= 0.0 {
                s = 1.0;
            }
            grid.spacing[i] = s;

            if i as u32 >= self.output_dimensionality {
                continue;
            }
            if let Some(bounds) = bounds {
                d = bounds[2 * i + 1] - bounds[2 * i];
            }
            let lo = round(e);
            let hi = round(lo as f64 + (d / s).abs());
            grid.extent[2 * i] = lo;
            grid.extent[2 * i + 1] = hi;
            grid.origin[i] = match bounds {
                Some(bounds) => bounds[2 * i] - lo as f64 * s,
                None => center[i] - 0.5 * (lo + hi) as f64 * s,
            };
        }
        grid
    }

    /// Bounds of the input corners in slice coordinates.
    fn cropped_bounds(&self, volume: &Volume) -> [f64; 6] {
        let index_to_slice = self.axes.inverse() * volume.index_to_data();
        let e = volume.extent();
        let mut bounds = [f64::MAX, f64::MIN, f64::MAX, f64::MIN, f64::MAX, f64::MIN];
        for corner in 0..8 {
            let index = DVec3::new(
                e[corner & 1] as f64,
                e[2 + ((corner >> 1) & 1)] as f64,
                e[4 + ((corner >> 2) & 1)] as f64,
            );
            let point = index_to_slice.transform_point3(index);
            for axis in 0..3 {
                bounds[2 * axis] = bounds[2 * axis].min(point[axis]);
                bounds[2 * axis + 1] = bounds[2 * axis + 1].max(point[axis]);
            }
        }
        bounds
    }

    /// Resample `volume` on the output grid.
    ///
    /// A degenerate grid gives an empty image and an input without scalars
    /// gives an image filled with the background color. Only allocation
    /// failures are reported as errors.
    pub fn execute(&self, volume: &Volume) -> Result<Resliced, ResliceError> {
        let grid = self
            .output_grid
            .unwrap_or_else(|| self.default_output_grid(volume));
        let output_type = self
            .output_scalar_type
            .unwrap_or_else(|| volume.scalar_type());
        let components = volume.number_of_components().max(1);
        let (depth, height, width) = grid.dim();
        let _span = tracing::info_span!(
            "reslice",
            width,
            height,
            depth,
            interpolation = self.interpolation.as_str(),
            slab_mode = self.slab.mode.as_str(),
            slab = self.slab.number_of_slices
        )
        .entered();

        let pixels = depth
            .checked_mul(height)
            .and_then(|n| n.checked_mul(width))
            .ok_or(ResliceError::OutputAllocation(usize::MAX))?;
        let samples = pixels
            .checked_mul(components)
            .ok_or(ResliceError::OutputAllocation(usize::MAX))?;
        tracing::trace!(
            samples,
            bytes = samples.saturating_mul(output_type.size_of()),
            "allocating output"
        );
        let mut values = allocate(samples, 0.0)?;
        let mut mask = allocate(pixels, false)?;

        if samples == 0 {
            tracing::debug!(extent = ?grid.extent, "degenerate output extent");
        } else {
            if volume.is_empty() {
                tracing::debug!("input has no scalars, output is background");
            } else {
                let index_matrix = self.index_matrix(volume, &grid);
                let extent = volume.extent();
                dispatch_scalars!(volume.scalars(), data => self.resample(
                    data.view(),
                    extent,
                    &grid,
                    index_matrix,
                    &mut values,
                    &mut mask,
                ));
            }
            self.post_process(output_type, components, &mut values, &mask);
        }

        let scalars = Scalars::from_values(output_type, (depth, height, width, components), &values)?;
        let image = Volume::try_new(
            scalars,
            grid.extent,
            grid.spacing,
            grid.origin,
            IDENTITY_DIRECTION,
        )?;
        let stencil = if self.generate_stencil {
            Some(
                Array3::from_shape_vec((depth, height, width), mask).map_err(|_| {
                    ResliceError::ShapeMismatch {
                        expected: [depth, height, width, 1],
                        found: [pixels, 1, 1, 1],
                    }
                })?,
            )
        } else {
            None
        };
        Ok(Resliced { image, stencil })
    }

    fn resample<T: Scalar>(
        &self,
        data: ArrayView4<'_, T>,
        extent: [i32; 6],
        grid: &OutputGrid,
        index_matrix: DMat4,
        values: &mut [f64],
        mask: &mut [bool],
    ) {
        let interpolator = self.interpolator();
        let components = data.dim().3;
        let (_, height, width) = grid.dim();
        let offsets = self.slab.offsets();
        let step = index_matrix.z_axis.truncate();
        let window = if self.sliding_window {
            SlidingWindow::plan(index_matrix, &interpolator, extent, grid)
        } else {
            None
        };
        if self.sliding_window && window.is_none() {
            tracing::trace!("index matrix is not a permutation, sliding window disabled");
        }

        values
            .par_chunks_mut(width * components)
            .zip(mask.par_chunks_mut(width))
            .enumerate()
            .for_each_init(
                || RowScratch::new(components),
                |scratch, (row, (row_values, row_mask))| {
                    let k = (grid.extent[4] + (row / height) as i32) as f64;
                    let j = (grid.extent[2] + (row % height) as i32) as f64;
                    match &window {
                        Some(window) => {
                            window.fill_lines(data, &interpolator, extent, j, k, &offsets, scratch);
                            let RowScratch { sample, lines, row_ok } = scratch;
                            for (i, (pixel, hit)) in row_values
                                .chunks_mut(components)
                                .zip(row_mask.iter_mut())
                                .enumerate()
                            {
                                *hit = self.composite(
                                    offsets.len(),
                                    |n, out| window.sample(i, n, lines, row_ok, out),
                                    sample,
                                    pixel,
                                );
                            }
                        }
                        None => {
                            for (i, (pixel, hit)) in row_values
                                .chunks_mut(components)
                                .zip(row_mask.iter_mut())
                                .enumerate()
                            {
                                let x = (grid.extent[0] + i as i32) as f64;
                                let base = index_matrix.transform_point3(DVec3::new(x, j, k));
                                *hit = self.composite(
                                    offsets.len(),
                                    |n, out| {
                                        let point = base + step * offsets[n];
                                        interpolator.sample_array(data, extent, point.to_array(), out)
                                    },
                                    &mut scratch.sample,
                                    pixel,
                                );
                            }
                        }
                    }
                },
            );
    }

    /// Combine the in-bounds slab samples of one pixel into `pixel`.
    ///
    /// Returns whether any sample was in bounds.
    #[inline]
    fn composite<F>(&self, slices: usize, mut sample: F, scratch: &mut [f64], pixel: &mut [f64]) -> bool
    where
        F: FnMut(usize, &mut [f64]) -> bool,
    {
        let mode = self.slab.mode;
        let mut count = 0usize;
        let mut weight_sum = 0.0;
        for n in 0..slices {
            if !sample(n, scratch) {
                continue;
            }
            let weight = if self.slab.trapezoid && slices > 1 && (n == 0 || n == slices - 1) {
                0.5
            } else {
                1.0
            };
            for (p, &s) in pixel.iter_mut().zip(scratch.iter()) {
                *p = match (mode, count) {
                    (SlabMode::Min | SlabMode::Max, 0) => s,
                    (SlabMode::Min, _) => p.min(s),
                    (SlabMode::Max, _) => p.max(s),
                    (SlabMode::Mean | SlabMode::Sum, 0) => weight * s,
                    (SlabMode::Mean | SlabMode::Sum, _) => *p + weight * s,
                };
            }
            count += 1;
            weight_sum += weight;
        }
        if count == 0 {
            return false;
        }
        if mode == SlabMode::Mean && weight_sum > 0.0 {
            pixel.iter_mut().for_each(|p| *p /= weight_sum);
        }
        true
    }

    /// Shift, scale and convert in-bounds samples, fill the rest with the
    /// background color.
    fn post_process(&self, output_type: ScalarType, components: usize, values: &mut [f64], mask: &[bool]) {
        let (lo, hi) = output_type.range();
        let integer = output_type.is_integer();
        let (shift, scale) = (self.scalar_shift, self.scalar_scale);
        let background = self.background;
        values
            .par_chunks_mut(components)
            .zip(mask.par_iter())
            .for_each(|(pixel, &hit)| {
                for (c, v) in pixel.iter_mut().enumerate() {
                    let value = if hit {
                        *v * scale + shift
                    } else {
                        background.get(c).copied().unwrap_or(0.0)
                    };
                    *v = if integer {
                        (value + 0.5).floor().clamp(lo, hi)
                    } else {
                        value
                    };
                }
            });
    }
}

/// Per-thread buffers reused across output rows.
struct RowScratch {
    sample: Vec<f64>,
    lines: Vec<f64>,
    row_ok: Vec<bool>,
}

impl RowScratch {
    fn new(components: usize) -> Self {
        Self {
            sample: vec![0.0; components],
            lines: Vec::new(),
            row_ok: Vec::new(),
        }
    }
}

/// Separable evaluation for index matrices that only permute, scale and
/// translate the axes.
///
/// Output x walks along a single input axis, so the taps of the two other
/// input axes are constant over a row. They are collapsed once per row into
/// a line of partial sums over the walking axis, and each output sample
/// only applies its own taps along that line.
struct SlidingWindow {
    index_matrix: DMat4,
    walk_axis: usize,
    row_axes: [usize; 2],
    walk_len: usize,
    column_ok: Vec<bool>,
    column_taps: Vec<AxisTaps>,
    x_start: f64,
}

impl SlidingWindow {
    fn plan(
        index_matrix: DMat4,
        interpolator: &Interpolator,
        extent: [i32; 6],
        grid: &OutputGrid,
    ) -> Option<Self> {
        if !interpolator.is_separable() || !is_permutation(&index_matrix) {
            return None;
        }
        let walk_axis = (0..3).find(|&a| index_matrix.x_axis[a] != 0.0)?;
        let row_axes = match walk_axis {
            0 => [1, 2],
            1 => [0, 2],
            _ => [0, 1],
        };
        let (_, _, width) = grid.dim();
        let scale = index_matrix.x_axis[walk_axis];
        let translation = index_matrix.w_axis[walk_axis];
        let (lo, hi) = (extent[2 * walk_axis], extent[2 * walk_axis + 1]);
        let column_coords: Vec<f64> = (0..width)
            .map(|i| scale * (grid.extent[0] + i as i32) as f64 + translation)
            .collect();
        let column_taps = column_coords
            .iter()
            .map(|&coord| interpolator.axis_taps(coord, lo, hi))
            .collect();
        let tolerance = interpolator.tolerance();
        let column_ok = column_coords
            .iter()
            .map(|&coord| coord >= lo as f64 - tolerance && coord <= hi as f64 + tolerance)
            .collect();
        Some(Self {
            index_matrix,
            walk_axis,
            row_axes,
            walk_len: extent_len(lo, hi),
            column_ok,
            column_taps,
            x_start: grid.extent[0] as f64,
        })
    }

    /// Collapse the row-axis taps of every slab sample of row `(j, k)`.
    #[allow(clippy::too_many_arguments)]
    fn fill_lines<T: Scalar>(
        &self,
        data: ArrayView4<'_, T>,
        interpolator: &Interpolator,
        extent: [i32; 6],
        j: f64,
        k: f64,
        offsets: &[f64],
        scratch: &mut RowScratch,
    ) {
        let components = data.dim().3;
        let line_len = self.walk_len * components;
        scratch.lines.clear();
        scratch.lines.resize(line_len * offsets.len(), 0.0);
        scratch.row_ok.clear();

        let step = self.index_matrix.z_axis.truncate();
        let walk_lo = extent[2 * self.walk_axis] as f64;
        for (n, line) in scratch.lines.chunks_mut(line_len).enumerate() {
            let mut point = self
                .index_matrix
                .transform_point3(DVec3::new(self.x_start, j, k))
                + step * offsets[n];
            point[self.walk_axis] = walk_lo;
            let ok = interpolator.check_bounds(extent, point.to_array());
            scratch.row_ok.push(ok);
            if !ok {
                continue;
            }
            let [a1, a2] = self.row_axes;
            let t1 = interpolator.axis_taps(point[a1], extent[2 * a1], extent[2 * a1 + 1]);
            let t2 = interpolator.axis_taps(point[a2], extent[2 * a2], extent[2 * a2 + 1]);
            let mut index = [0usize; 4];
            for (t, cell) in line.chunks_mut(components).enumerate() {
                index[2 - self.walk_axis] = t;
                for (c, value) in cell.iter_mut().enumerate() {
                    index[3] = c;
                    let mut sum = 0.0;
                    for v in 0..t2.count {
                        index[2 - a2] = t2.index[v];
                        let mut partial = 0.0;
                        for u in 0..t1.count {
                            index[2 - a1] = t1.index[u];
                            partial += t1.weight[u] * data[index].to_f64();
                        }
                        sum += t2.weight[v] * partial;
                    }
                    *value = sum;
                }
            }
        }
    }

    /// Sample column `i` of slab line `n`.
    #[inline]
    fn sample(&self, i: usize, n: usize, lines: &[f64], row_ok: &[bool], out: &mut [f64]) -> bool {
        if !row_ok[n] || !self.column_ok[i] {
            return false;
        }
        let components = out.len();
        let line_len = self.walk_len * components;
        let line = &lines[n * line_len..(n + 1) * line_len];
        let taps = &self.column_taps[i];
        for (c, value) in out.iter_mut().enumerate() {
            let mut sum = 0.0;
            for t in 0..taps.count {
                sum += taps.weight[t] * line[taps.index[t] * components + c];
            }
            *value = sum;
        }
        true
    }
}

/// Whether the 3x3 part of `matrix` has exactly one non-zero per row and
/// column.
fn is_permutation(matrix: &DMat4) -> bool {
    let m = DMat3::from_mat4(*matrix);
    let cols = [m.x_axis, m.y_axis, m.z_axis];
    let col_ok = cols
        .iter()
        .all(|c| (0..3).filter(|&r| c[r] != 0.0).count() == 1);
    let row_ok = (0..3).all(|r| cols.iter().filter(|c| c[r] != 0.0).count() == 1);
    col_ok && row_ok
}

fn inverse_direction(volume: &Volume) -> DMat3 {
    let direction = volume.direction_matrix();
    if direction.determinant().abs() > 1e-12 {
        direction.inverse()
    } else {
        DMat3::IDENTITY
    }
}

#[inline]
fn round(value: f64) -> i32 {
    (value + 0.5).floor() as i32
}

fn allocate<T: Clone>(len: usize, fill: T) -> Result<Vec<T>, ResliceError> {
    let mut buffer = Vec::new();
    buffer
        .try_reserve_exact(len)
        .map_err(|_| ResliceError::OutputAllocation(len))?;
    buffer.resize(len, fill);
    Ok(buffer)
}
