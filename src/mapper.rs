//! One render call from volume to colored slice.
//!
//! [`ResliceMapper`] owns the geometry resolver, the reslice engine and the
//! color stage, and runs them in order for a camera and viewport passed in
//! by the caller. Between calls it keeps the clipped polygon and the
//! texture grid, and decides whether the slice is resampled once per screen
//! pixel or once per input voxel.

use crate::camera::{Camera, Viewport};
use crate::color::{Checkerboard, ColorStage, LookupTable};
use crate::engine::{OutputGrid, ResliceEngine, SlabSpec};
use crate::enums::{ColorFormat, InterpolationMode, SlabMode};
use crate::error::ResliceError;
use crate::polygon::{Polygon, PolygonClipper, data_bounds};
use crate::slice_geometry::{
    GeometryInput, ResliceAxesSource, SliceGeometryResolver, axis_spacing,
};
use crate::volume::Volume;

use glam::DMat4;
use std::time::Duration;
use web_time::Instant;

/// Largest image, in voxels per axis, that may drop to texture resolution
/// while interacting.
const MAX_TEXTURE_SIZE: usize = 1024;

/// Display settings of the rendered image.
#[derive(Clone, Debug, PartialEq)]
pub struct ImageProperty {
    pub color_window: f64,
    pub color_level: f64,
    /// Table used instead of a greyscale ramp.
    pub lookup_table: Option<LookupTable>,
    /// Keep the range of `lookup_table` instead of deriving it from the
    /// window and level.
    pub use_lookup_table_scalar_range: bool,
    pub interpolation: InterpolationMode,
    pub opacity: f64,
    pub checkerboard: Option<Checkerboard>,
    /// RGBA, 0 to 1 per channel.
    pub background_color: [f64; 4],
}

impl Default for ImageProperty {
    fn default() -> Self {
        Self {
            color_window: 255.0,
            color_level: 127.5,
            lookup_table: None,
            use_lookup_table_scalar_range: false,
            interpolation: InterpolationMode::Linear,
            opacity: 1.0,
            checkerboard: None,
            background_color: [0.0, 0.0, 0.0, 1.0],
        }
    }
}

impl ImageProperty {
    fn lookup_table(&self) -> LookupTable {
        match &self.lookup_table {
            Some(table) if self.use_lookup_table_scalar_range => table.clone(),
            Some(table) => {
                let mut table = table.clone();
                let half = 0.5 * self.color_window;
                table.set_range((self.color_level - half, self.color_level + half));
                table
            }
            None => LookupTable::from_window_level(self.color_window, self.color_level),
        }
    }
}

/// Per-call inputs of [`ResliceMapper::render`].
#[derive(Clone, Copy, Debug)]
pub struct RenderRequest<'a> {
    pub camera: &'a Camera,
    pub viewport: Viewport,
    /// Data to world transform of the image.
    pub prop_matrix: DMat4,
    /// Time budget of this frame in seconds.
    pub allocated_render_time: f64,
    pub property: &'a ImageProperty,
}

/// Result of a render call, ready for a display adapter.
#[derive(Clone, Debug)]
pub struct RenderedSlice {
    /// 8-bit colors, or `f32` scalars when window/level is left to the
    /// display.
    pub image: Volume,
    /// Visible part of the slice in slice coordinates.
    pub polygon: Polygon,
    pub slice_to_world: DMat4,
    pub grid: OutputGrid,
    /// Whether `image` has exactly one texel per viewport pixel.
    pub exact_pixel_match: bool,
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct PolygonKey {
    axes: [f64; 16],
    index_to_data: [f64; 16],
    extent: [i32; 6],
    tolerance: f64,
    slab_thickness: f64,
    border: bool,
}

/// Turns a volume and a camera into a colored slice.
#[derive(Clone, Debug)]
pub struct ResliceMapper {
    input: Option<Volume>,
    resolver: SliceGeometryResolver,
    engine: ResliceEngine,
    color: ColorStage,
    polygon: Polygon,
    polygon_key: Option<PolygonKey>,
    slab_mode: SlabMode,
    slab_thickness: f64,
    slab_sample_factor: u32,
    image_sample_factor: u32,
    border: bool,
    background: bool,
    separate_window_level: bool,
    resample_to_screen_pixels: bool,
    auto_adjust_image_quality: bool,
    exact_pixel_match: bool,
    last_camera: Option<Camera>,
    last_render_time: Option<Duration>,
}

impl Default for ResliceMapper {
    fn default() -> Self {
        Self {
            input: None,
            resolver: SliceGeometryResolver::new(ResliceAxesSource::default()),
            engine: ResliceEngine::new(),
            color: ColorStage::new(None, ColorFormat::Rgba),
            polygon: Polygon::default(),
            polygon_key: None,
            slab_mode: SlabMode::Mean,
            slab_thickness: 0.0,
            slab_sample_factor: 2,
            image_sample_factor: 1,
            border: false,
            background: false,
            separate_window_level: false,
            resample_to_screen_pixels: true,
            auto_adjust_image_quality: true,
            exact_pixel_match: false,
            last_camera: None,
            last_render_time: None,
        }
    }
}

impl ResliceMapper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn input(&self) -> Option<&Volume> {
        self.input.as_ref()
    }

    pub fn set_input(&mut self, volume: Option<Volume>) {
        self.input = volume;
        self.polygon_key = None;
    }

    pub fn resolver(&self) -> &SliceGeometryResolver {
        &self.resolver
    }

    pub fn resolver_mut(&mut self) -> &mut SliceGeometryResolver {
        &mut self.resolver
    }

    pub fn set_axes_source(&mut self, source: ResliceAxesSource) {
        self.resolver.set_source(source);
    }

    pub fn slab_mode(&self) -> SlabMode {
        self.slab_mode
    }

    pub fn set_slab_mode(&mut self, mode: SlabMode) {
        self.slab_mode = mode;
    }

    pub fn slab_thickness(&self) -> f64 {
        self.slab_thickness
    }

    /// Slab thickness in world units, 0 for a single slice.
    pub fn set_slab_thickness(&mut self, thickness: f64) -> Result<(), ResliceError> {
        if !thickness.is_finite() || thickness < 0.0 {
            return Err(ResliceError::InvalidSlabThickness(thickness));
        }
        self.slab_thickness = thickness;
        Ok(())
    }

    pub fn slab_sample_factor(&self) -> u32 {
        self.slab_sample_factor
    }

    /// Slab samples per input slice, 1 or 2.
    pub fn set_slab_sample_factor(&mut self, factor: u32) -> Result<(), ResliceError> {
        if !(1..=2).contains(&factor) {
            return Err(ResliceError::InvalidSlabSampleFactor(factor));
        }
        self.slab_sample_factor = factor;
        Ok(())
    }

    pub fn image_sample_factor(&self) -> u32 {
        self.image_sample_factor
    }

    /// Texels per input voxel in texture mode.
    pub fn set_image_sample_factor(&mut self, factor: u32) -> Result<(), ResliceError> {
        if factor < 1 {
            return Err(ResliceError::InvalidImageSampleFactor(factor));
        }
        self.image_sample_factor = factor;
        Ok(())
    }

    pub fn border(&self) -> bool {
        self.border
    }

    /// Extend the image by half a voxel at its edges.
    pub fn set_border(&mut self, border: bool) {
        self.border = border;
    }

    /// Paint pixels outside the volume with the background color of the
    /// property instead of leaving them transparent.
    pub fn set_background(&mut self, background: bool) {
        self.background = background;
    }

    /// Leave window/level to the display and hand out `f32` scalars.
    pub fn set_separate_window_level(&mut self, separate: bool) {
        self.separate_window_level = separate;
    }

    pub fn set_resample_to_screen_pixels(&mut self, resample: bool) {
        self.resample_to_screen_pixels = resample;
    }

    pub fn set_auto_adjust_image_quality(&mut self, adjust: bool) {
        self.auto_adjust_image_quality = adjust;
    }

    /// Whether the last render resampled once per screen pixel.
    pub fn exact_pixel_match(&self) -> bool {
        self.exact_pixel_match
    }

    pub fn last_render_time(&self) -> Option<Duration> {
        self.last_render_time
    }

    /// Polygon of the last render.
    pub fn polygon(&self) -> &Polygon {
        &self.polygon
    }

    /// Reslice and color the input for `request`.
    ///
    /// Returns `Ok(None)` when there is no input or it has no scalars. On
    /// error the cached geometry is left as it was before the call.
    pub fn render(
        &mut self,
        request: &RenderRequest<'_>,
    ) -> Result<Option<RenderedSlice>, ResliceError> {
        let volume = match self.input.take() {
            Some(volume) if !volume.is_empty() => volume,
            other => {
                self.input = other;
                tracing::warn!("nothing to render, input is missing or empty");
                return Ok(None);
            }
        };
        let result = self.render_volume(&volume, request);
        self.input = Some(volume);
        result.map(Some)
    }

    fn render_volume(
        &mut self,
        volume: &Volume,
        request: &RenderRequest<'_>,
    ) -> Result<RenderedSlice, ResliceError> {
        let _span = tracing::info_span!("render_slice").entered();
        let start = Instant::now();
        let camera = request.camera;

        let screen = self.choose_resample_to_screen(volume, request);
        let resolver = self.resolver.clone();
        let polygon = (self.polygon.clone(), self.polygon_key);

        let result = self.resample(volume, request, screen);
        match &result {
            Ok(_) => {
                self.exact_pixel_match = screen;
                self.last_camera = Some(*camera);
                let elapsed = start.elapsed();
                self.last_render_time = Some(elapsed);
                tracing::debug!(?elapsed, exact_pixel_match = screen, "slice rendered");
            }
            Err(error) => {
                tracing::warn!(%error, "render failed, keeping previous geometry");
                self.resolver = resolver;
                (self.polygon, self.polygon_key) = polygon;
            }
        }
        result
    }

    /// Level of detail for this frame.
    ///
    /// A small image drops to texture resolution when the frame budget is
    /// under one second. Going back down from screen resolution waits until
    /// the camera moves.
    fn choose_resample_to_screen(&self, volume: &Volume, request: &RenderRequest<'_>) -> bool {
        let mut screen = self.resample_to_screen_pixels;
        if self.auto_adjust_image_quality && screen {
            let (depth, height, width) = volume.dim();
            let image_size = depth.max(height).max(width);
            if image_size <= request.viewport.max_dimension() as usize && image_size <= MAX_TEXTURE_SIZE {
                screen = request.allocated_render_time >= 1.0;
            }
        }
        if !screen && self.exact_pixel_match && self.last_camera.as_ref() == Some(request.camera) {
            screen = true;
        }
        screen
    }

    fn resample(
        &mut self,
        volume: &Volume,
        request: &RenderRequest<'_>,
        screen: bool,
    ) -> Result<RenderedSlice, ResliceError> {
        let camera = request.camera;
        let property = request.property;
        self.resolver.update(&GeometryInput {
            volume,
            camera,
            prop_matrix: request.prop_matrix,
            resample_to_screen_pixels: screen,
        });
        let axes = self.resolver.reslice_axes().matrix();
        let slice_to_world = self.resolver.slice_to_world();
        let faces_camera = matches!(
            self.resolver.source(),
            ResliceAxesSource::CameraDerived(slicing) if slicing.slice_faces_camera
        );

        self.update_polygon(volume, camera, request.viewport);

        let mut grid = if screen {
            self.resolver.screen_grid(camera, request.viewport)
        } else {
            self.resolver
                .texture_grid(volume, &self.polygon, self.border, self.image_sample_factor)
        };

        let base_spacing = axis_spacing(volume, axes.z_axis.truncate());
        let slab = SlabSpec::from_thickness(
            self.slab_thickness,
            base_spacing,
            self.slab_sample_factor,
            self.slab_mode,
            true,
        )?;
        grid.spacing[2] = if slab.number_of_slices() > 1 {
            slab.sample_spacing()
        } else {
            base_spacing
        };

        let engine = &mut self.engine;
        engine.set_reslice_axes(axes);
        engine.set_interpolation_mode(property.interpolation);
        engine.set_slab(slab);
        engine.set_scalar_scale(if self.slab_mode == SlabMode::Sum {
            grid.spacing[2]
        } else {
            1.0
        });
        if (faces_camera && screen && !self.separate_window_level) || self.slab_thickness > 0.0 {
            engine.set_border(self.border);
            engine.set_border_thickness(0.5)?;
        } else {
            // the polygon decides what is shown, so sample a voxel further
            engine.set_border(true);
            engine.set_border_thickness(1.0)?;
        }
        engine.set_output_grid(Some(grid));
        engine.set_generate_stencil(true);
        let resliced = engine.execute(volume)?;

        let color = &mut self.color;
        color.set_lookup_table(Some(property.lookup_table()));
        color.set_bypass(self.separate_window_level);
        color.set_opacity(property.opacity);
        color.set_background_color(if self.background {
            property.background_color.map(|c| c * 255.0)
        } else {
            [0.0; 4]
        });
        let mut image = color.map_to_colors(&resliced.image, resliced.stencil.as_ref())?;

        if let Some(checkerboard) = property.checkerboard {
            if screen
                && faces_camera
                && !self.separate_window_level
                && self.color.output_format().has_alpha()
            {
                let focal = slice_to_world
                    .inverse()
                    .transform_point3(camera.focal_point);
                checkerboard.apply(&mut image, [focal.x, focal.y]);
            }
        }

        Ok(RenderedSlice {
            image,
            polygon: self.polygon.clone(),
            slice_to_world,
            grid,
            exact_pixel_match: screen,
        })
    }

    /// Recompute the visible polygon when the geometry it depends on changed.
    fn update_polygon(&mut self, volume: &Volume, camera: &Camera, viewport: Viewport) {
        let clipper = PolygonClipper::for_screen(camera.view_height(), viewport.height);
        let index_to_data = volume.index_to_data();
        let key = PolygonKey {
            axes: self.resolver.reslice_axes().matrix().to_cols_array(),
            index_to_data: index_to_data.to_cols_array(),
            extent: volume.extent(),
            tolerance: clipper.tolerance(),
            slab_thickness: self.slab_thickness,
            border: self.border,
        };
        if self.polygon_key == Some(key) {
            return;
        }

        let smallest_spacing = volume
            .spacing()
            .iter()
            .map(|s| s.abs())
            .filter(|s| *s > 0.0)
            .fold(f64::INFINITY, f64::min);
        let flat_half_width = if smallest_spacing.is_finite() {
            clipper.tolerance() / smallest_spacing
        } else {
            clipper.tolerance()
        };
        let bounds = data_bounds(volume, self.border, flat_half_width);
        let bounds_to_slice = self.resolver.reslice_axes().inverse() * index_to_data;
        self.polygon = clipper.compute(bounds, bounds_to_slice, 0.0, self.slab_thickness);
        self.polygon_key = Some(key);
    }
}
