//! Where the cutting plane lies and how it is sampled.
//!
//! [`SliceGeometryResolver`] turns either an explicit matrix or the current
//! camera into [`ResliceAxes`], and derives the output grid for the two
//! sampling strategies: one sample per screen pixel, or one sample per
//! input voxel for a texture the display scales on its own.

use crate::axes::ResliceAxes;
use crate::camera::{Camera, Viewport};
use crate::engine::OutputGrid;
use crate::interpolator::FLOOR_TOLERANCE;
use crate::polygon::Polygon;
use crate::volume::Volume;

use glam::{DMat3, DMat4, DQuat, DVec3};

const ORTHONORMAL_TOLERANCE: f64 = 1e-12;
const AXIS_ALIGNED_TOLERANCE: f64 = 1e-12;
const EDGE_ON_TOLERANCE: f64 = 1e-6;

/// Plane in world coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SlicePlane {
    pub normal: DVec3,
    pub origin: DVec3,
}

impl Default for SlicePlane {
    fn default() -> Self {
        Self {
            normal: DVec3::Z,
            origin: DVec3::ZERO,
        }
    }
}

/// How a camera drives the slice plane.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CameraSlicing {
    /// Keep the plane normal along the view direction.
    pub slice_faces_camera: bool,
    /// Keep the plane through the camera focal point.
    pub slice_at_focal_point: bool,
    /// Snap the plane to the closest voxel slice when it is aligned with a
    /// volume axis. Only used together with `slice_at_focal_point`.
    pub jump_to_nearest_slice: bool,
}

impl Default for CameraSlicing {
    fn default() -> Self {
        Self {
            slice_faces_camera: true,
            slice_at_focal_point: true,
            jump_to_nearest_slice: false,
        }
    }
}

/// Source of the reslice axes.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ResliceAxesSource {
    /// Axes in data coordinates given by the caller.
    Explicit(DMat4),
    /// Axes rebuilt from the slice plane and camera on every update.
    CameraDerived(CameraSlicing),
}

impl Default for ResliceAxesSource {
    fn default() -> Self {
        ResliceAxesSource::CameraDerived(CameraSlicing::default())
    }
}

/// Per-update inputs of [`SliceGeometryResolver::update`].
#[derive(Clone, Copy, Debug)]
pub struct GeometryInput<'a> {
    pub volume: &'a Volume,
    pub camera: &'a Camera,
    /// Data to world transform of the displayed image.
    pub prop_matrix: DMat4,
    pub resample_to_screen_pixels: bool,
}

#[derive(Clone, Debug, Default)]
pub struct SliceGeometryResolver {
    source: ResliceAxesSource,
    plane: SlicePlane,
    axes: ResliceAxes,
    slice_to_world: DMat4,
    texture_grid: Option<OutputGrid>,
}

impl SliceGeometryResolver {
    pub fn new(source: ResliceAxesSource) -> Self {
        Self {
            source,
            slice_to_world: DMat4::IDENTITY,
            ..Default::default()
        }
    }

    pub fn source(&self) -> ResliceAxesSource {
        self.source
    }

    pub fn set_source(&mut self, source: ResliceAxesSource) {
        self.source = source;
    }

    pub fn slice_plane(&self) -> SlicePlane {
        self.plane
    }

    pub fn set_slice_plane(&mut self, plane: SlicePlane) {
        self.plane = plane;
    }

    pub fn reslice_axes(&self) -> &ResliceAxes {
        &self.axes
    }

    /// Slice coordinates to world coordinates, valid after an update.
    pub fn slice_to_world(&self) -> DMat4 {
        self.slice_to_world
    }

    /// Recompute the reslice axes. Returns whether they changed.
    pub fn update(&mut self, input: &GeometryInput<'_>) -> bool {
        let prop = input.prop_matrix;
        let world_to_data = invert_or_identity(prop);
        match self.source {
            ResliceAxesSource::Explicit(matrix) => {
                let changed = self.axes.set_matrix(matrix);
                self.slice_to_world = prop * self.axes.matrix();
                let normal = self
                    .slice_to_world
                    .x_axis
                    .truncate()
                    .cross(self.slice_to_world.y_axis.truncate())
                    .normalize_or_zero();
                self.plane = SlicePlane {
                    normal,
                    origin: self.slice_to_world.w_axis.truncate(),
                };
                changed
            }
            ResliceAxesSource::CameraDerived(slicing) => {
                self.update_from_camera(slicing, input, world_to_data)
            }
        }
    }

    fn update_from_camera(
        &mut self,
        slicing: CameraSlicing,
        input: &GeometryInput<'_>,
        world_to_data: DMat4,
    ) -> bool {
        let camera = input.camera;
        let prop = input.prop_matrix;
        if slicing.slice_faces_camera {
            self.plane.normal = -camera.direction_of_projection();
        }
        if slicing.slice_at_focal_point {
            self.plane.origin = camera.focal_point;
        }

        let view = camera.view_matrix();
        let backward = view.row(2).truncate();
        let mut normal = self.plane.normal.normalize_or_zero();
        if normal == DVec3::ZERO {
            normal = backward;
        }
        if normal.dot(backward) < 0.0 {
            normal = -normal;
        }
        self.plane.normal = normal;
        let mut origin = self.plane.origin;

        let plane = prop.transpose() * normal.extend(-normal.dot(origin));
        let data_normal = plane.truncate().normalize_or_zero();
        let mut data_origin = world_to_data.transform_point3(origin);

        if slicing.slice_at_focal_point && slicing.jump_to_nearest_slice {
            data_origin = snap_to_nearest_slice(input.volume, data_normal, data_origin);
            origin = prop.transform_point3(data_origin);
        }

        let matrix = if is_orthonormal(prop) && !input.resample_to_screen_pixels {
            let axes = data_space_axes(data_normal, data_origin);
            self.slice_to_world = prop * axes;
            axes
        } else {
            self.slice_to_world = camera_slice_to_world(&view, normal, origin);
            world_to_data * self.slice_to_world
        };
        let changed = self.axes.set_matrix(matrix);
        if changed {
            tracing::trace!(normal = ?data_normal, "reslice axes changed");
        }
        changed
    }

    /// One output sample per viewport pixel, covering the whole view.
    pub fn screen_grid(&self, camera: &Camera, viewport: Viewport) -> OutputGrid {
        let view_to_world = invert_or_identity(camera.world_to_view(viewport.aspect()));
        let normal = self.plane.normal;
        let origin = self.slice_to_world.w_axis.truncate();
        let plane = view_to_world.transpose() * normal.extend(-normal.dot(origin));
        let view_to_slice = invert_or_identity(self.slice_to_world) * view_to_world;

        let mut corners: Vec<DVec3> = Vec::with_capacity(8);
        for (x, y) in [(-1.0, -1.0), (1.0, -1.0), (-1.0, 1.0), (1.0, 1.0)] {
            if plane.z.abs() < EDGE_ON_TOLERANCE {
                corners.push(DVec3::new(x, y, 0.0));
                corners.push(DVec3::new(x, y, 1.0));
            } else {
                let z = (-(x * plane.x + y * plane.y + plane.w) / plane.z).clamp(0.0, 1.0);
                corners.push(DVec3::new(x, y, z));
            }
        }

        let (mut min, mut max) = (DVec3::splat(f64::MAX), DVec3::splat(f64::MIN));
        for corner in corners {
            let point = view_to_slice.project_point3(corner);
            min = min.min(point);
            max = max.max(point);
        }

        let size = [viewport.width.max(1), viewport.height.max(1)];
        let spacing = [
            (max.x - min.x) / size[0] as f64,
            (max.y - min.y) / size[1] as f64,
            1.0,
        ];
        OutputGrid::new(
            [0, size[0] as i32 - 1, 0, size[1] as i32 - 1, 0, 0],
            spacing,
            [min.x + 0.5 * spacing[0], min.y + 0.5 * spacing[1], 0.0],
        )
    }

    /// Roughly one output sample per input voxel, covering `polygon`.
    ///
    /// The previous extent is kept while the new size stays within 10 % of
    /// it, and the origin only moves beyond a small tolerance, so an
    /// animated slice reuses its buffer.
    pub fn texture_grid(
        &mut self,
        volume: &Volume,
        polygon: &Polygon,
        border: bool,
        image_sample_factor: u32,
    ) -> OutputGrid {
        let previous = self
            .texture_grid
            .unwrap_or(OutputGrid::new([0, -1, 0, -1, 0, 0], [1.0; 3], [0.0; 3]));
        let axes = self.axes.matrix();
        let factor = image_sample_factor.max(1) as f64;

        let mut spacing = previous.spacing;
        for (j, value) in spacing.iter_mut().enumerate() {
            let s = axis_spacing(volume, axes.col(j).truncate()) / factor;
            if s > 0.0 && ((s - *value) / s).abs() > 1e-12 {
                *value = s;
            }
        }

        let [xmin, xmax, ymin, ymax] = polygon.bounds().unwrap_or([0.0; 4]);
        let tol = FLOOR_TOLERANCE;
        let mut xsize = ((xmax - xmin) / spacing[0] + tol).floor() as i32;
        let mut ysize = ((ymax - ymin) / spacing[1] + tol).floor() as i32;
        if !border {
            xsize += 1;
            ysize += 1;
        }
        let xsize = xsize.max(1);
        let ysize = ysize.max(1);

        let mut extent = previous.extent;
        if xsize - 1 > extent[1]
            || ysize - 1 > extent[3]
            || 0.9 * extent[1] as f64 / xsize as f64 > 1.0
            || 0.9 * extent[3] as f64 / ysize as f64 > 1.0
        {
            extent[1] = xsize - 1;
            extent[3] = ysize - 1;
        }
        extent[0] = 0;
        extent[2] = 0;
        extent[4] = 0;
        extent[5] = 0;

        let half = if border { 0.5 } else { 0.0 };
        let x0 = xmin + half * spacing[0];
        let y0 = ymin + half * spacing[1];
        let mut origin = previous.origin;
        let (dx, dy, dz) = (x0 - origin[0], y0 - origin[1], -origin[2]);
        if dx * dx + dy * dy + dz * dz > tol * tol * spacing[0] * spacing[1] {
            origin = [x0, y0, 0.0];
        }

        let grid = OutputGrid::new(extent, spacing, origin);
        self.texture_grid = Some(grid);
        grid
    }
}

/// Input voxel size seen along `column`, a slice axis in data coordinates.
pub(crate) fn axis_spacing(volume: &Volume, column: DVec3) -> f64 {
    let direction = volume.direction_matrix();
    let column = if direction.determinant().abs() > 1e-12 {
        direction.inverse() * column
    } else {
        column
    };
    let spacing = volume.spacing();
    let norm2 = column.length_squared();
    if norm2 == 0.0 {
        return 1.0;
    }
    (0..3)
        .map(|i| column[i] * column[i] * spacing[i].abs())
        .sum::<f64>()
        / norm2
}

fn invert_or_identity(matrix: DMat4) -> DMat4 {
    if matrix.determinant() == 0.0 {
        tracing::warn!("singular transform, using identity");
        DMat4::IDENTITY
    } else {
        matrix.inverse()
    }
}

fn is_orthonormal(matrix: DMat4) -> bool {
    let m = DMat3::from_mat4(matrix);
    let product = m.transpose() * m;
    product.abs_diff_eq(DMat3::IDENTITY, ORTHONORMAL_TOLERANCE)
}

/// Index of the component with the largest magnitude.
fn major_axis(v: DVec3) -> usize {
    let a = v.abs();
    if a.x >= a.y && a.x >= a.z {
        0
    } else if a.y >= a.z {
        1
    } else {
        2
    }
}

/// Rotation taking unit vector `from` onto unit vector `to`.
fn rotation_between(from: DVec3, to: DVec3) -> DQuat {
    let axis = from.cross(to);
    let sin = axis.length();
    let cos = from.dot(to);
    if sin == 0.0 {
        return DQuat::IDENTITY;
    }
    DQuat::from_axis_angle(axis / sin, sin.atan2(cos))
}

/// Snap `origin` to the closest slice of the volume when `normal` is
/// aligned with one of its index axes.
fn snap_to_nearest_slice(volume: &Volume, normal: DVec3, origin: DVec3) -> DVec3 {
    let index_to_data = volume.index_to_data();
    let index_normal = DMat3::from_mat4(index_to_data).transpose() * normal;
    let squared = index_normal * index_normal;
    let sum = squared.x + squared.y + squared.z;
    let axis = major_axis(index_normal);
    if sum == 0.0 || 1.0 - squared[axis] / sum >= AXIS_ALIGNED_TOLERANCE {
        return origin;
    }
    let mut index = volume.data_to_index().transform_point3(origin);
    index[axis] = (index[axis] + 0.5).floor();
    index_to_data.transform_point3(index)
}

/// Axes in data space for a plane with unit `normal` through `origin`.
///
/// The in-plane axes come from the volume axis closest to the normal,
/// rotated onto the plane, so axis-aligned planes get axis-aligned axes.
fn data_space_axes(normal: DVec3, origin: DVec3) -> DMat4 {
    let major = major_axis(normal);
    let mut axis = DVec3::ZERO;
    axis[major] = if normal[major] < 0.0 { -1.0 } else { 1.0 };
    let t_axis = if major == 1 { DVec3::Z } else { DVec3::Y };
    let s_axis = t_axis.cross(axis);
    let rotation = rotation_between(axis, normal);
    DMat4::from_cols(
        (rotation * s_axis).extend(0.0),
        (rotation * t_axis).extend(0.0),
        normal.extend(0.0),
        (normal * normal.dot(origin)).extend(1.0),
    )
}

/// Slice to world transform whose in-plane axes follow the screen.
fn camera_slice_to_world(view: &DMat4, normal: DVec3, origin: DVec3) -> DMat4 {
    let right = view.row(0).truncate();
    let up = view.row(1).truncate();
    let backward = view.row(2).truncate();
    let rotation = rotation_between(backward, normal);
    DMat4::from_cols(
        (rotation * right).extend(0.0),
        (rotation * up).extend(0.0),
        normal.extend(0.0),
        (normal * normal.dot(origin)).extend(1.0),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    fn volume() -> Volume {
        Volume::from_array3(Array3::<u8>::zeros((10, 8, 8)), [1.0, 1.0, 1.5])
    }

    fn camera_looking_down(focal_point: DVec3) -> Camera {
        Camera::parallel(focal_point + DVec3::new(0.0, 0.0, 100.0), focal_point, DVec3::Y, 10.0)
    }

    fn update(resolver: &mut SliceGeometryResolver, volume: &Volume, camera: &Camera, screen: bool) -> bool {
        resolver.update(&GeometryInput {
            volume,
            camera,
            prop_matrix: DMat4::IDENTITY,
            resample_to_screen_pixels: screen,
        })
    }

    fn slice_z(resolver: &SliceGeometryResolver, point: DVec3) -> f64 {
        resolver.reslice_axes().inverse().transform_point3(point).z
    }

    #[test]
    fn test_camera_at_focal_point() {
        let volume = volume();
        let camera = camera_looking_down(DVec3::new(3.0, 4.0, 6.2));
        let mut resolver = SliceGeometryResolver::default();
        assert!(update(&mut resolver, &volume, &camera, false));
        let axes = resolver.reslice_axes().matrix();
        assert_eq!(axes.x_axis.truncate(), DVec3::X);
        assert_eq!(axes.y_axis.truncate(), DVec3::Y);
        assert_eq!(axes.w_axis.truncate(), DVec3::new(0.0, 0.0, 6.2));
        assert!(!update(&mut resolver, &volume, &camera, false));
    }

    #[test]
    fn test_jump_to_nearest_slice() {
        let volume = volume();
        let camera = camera_looking_down(DVec3::new(3.0, 4.0, 6.2));
        let mut resolver = SliceGeometryResolver::new(ResliceAxesSource::CameraDerived(CameraSlicing {
            jump_to_nearest_slice: true,
            ..Default::default()
        }));
        update(&mut resolver, &volume, &camera, false);
        let z = resolver.reslice_axes().origin().z;
        assert!((z - 6.0).abs() < 1e-12);
    }

    #[test]
    fn test_oblique_plane_is_orthonormal() {
        let volume = volume();
        let focal = DVec3::new(4.0, 4.0, 7.0);
        let camera = Camera::new(focal + DVec3::new(30.0, -20.0, 50.0), focal, DVec3::Y);
        let mut resolver = SliceGeometryResolver::default();
        update(&mut resolver, &volume, &camera, false);
        let [x, y, z] = resolver.reslice_axes().direction_cosines();
        assert!((x.length() - 1.0).abs() < 1e-12);
        assert!(x.dot(y).abs() < 1e-12);
        assert!((x.cross(y) - z).length() < 1e-12);
        assert!(z.dot(-camera.direction_of_projection()) > 0.999_999);
        assert!(slice_z(&resolver, focal).abs() < 1e-9);
    }

    #[test]
    fn test_normal_faces_camera() {
        let volume = volume();
        let camera = camera_looking_down(DVec3::new(3.0, 4.0, 6.0));
        let mut resolver = SliceGeometryResolver::new(ResliceAxesSource::CameraDerived(CameraSlicing {
            slice_faces_camera: false,
            ..Default::default()
        }));
        resolver.set_slice_plane(SlicePlane {
            normal: DVec3::NEG_Z,
            origin: DVec3::ZERO,
        });
        update(&mut resolver, &volume, &camera, false);
        assert_eq!(resolver.slice_plane().normal, DVec3::Z);
    }

    #[test]
    fn test_scaled_prop_uses_camera_axes() {
        let volume = volume();
        let focal = DVec3::new(6.0, 8.0, 9.0);
        let camera = camera_looking_down(focal);
        let mut resolver = SliceGeometryResolver::default();
        let prop = DMat4::from_scale(DVec3::new(2.0, 2.0, 1.0));
        resolver.update(&GeometryInput {
            volume: &volume,
            camera: &camera,
            prop_matrix: prop,
            resample_to_screen_pixels: false,
        });
        let slice_to_world = resolver.slice_to_world();
        assert!((slice_to_world.x_axis.truncate() - DVec3::X).length() < 1e-12);
        let data_focal = prop.inverse().transform_point3(focal);
        assert!(slice_z(&resolver, data_focal).abs() < 1e-9);
    }

    #[test]
    fn test_explicit_axes() {
        let volume = volume();
        let camera = Camera::default();
        let matrix = DMat4::from_translation(DVec3::new(0.0, 0.0, 45.0));
        let mut resolver = SliceGeometryResolver::new(ResliceAxesSource::Explicit(matrix));
        update(&mut resolver, &volume, &camera, false);
        assert_eq!(resolver.reslice_axes().matrix(), matrix);
        assert_eq!(resolver.slice_plane().normal, DVec3::Z);
        assert_eq!(resolver.slice_plane().origin, DVec3::new(0.0, 0.0, 45.0));
    }

    #[test]
    fn test_screen_grid_matches_pixels() {
        let volume = volume();
        let camera = camera_looking_down(DVec3::ZERO);
        let mut resolver = SliceGeometryResolver::default();
        update(&mut resolver, &volume, &camera, true);
        let grid = resolver.screen_grid(&camera, Viewport::new(100, 50));
        assert_eq!(grid.extent, [0, 99, 0, 49, 0, 0]);
        assert!((grid.spacing[0] - 0.4).abs() < 1e-9);
        assert!((grid.spacing[1] - 0.4).abs() < 1e-9);
        assert!((grid.origin[0] + 19.8).abs() < 1e-9);
        assert!((grid.origin[1] + 9.8).abs() < 1e-9);
    }

    #[test]
    fn test_texture_grid_hysteresis() {
        let volume = volume();
        let camera = camera_looking_down(DVec3::ZERO);
        let mut resolver = SliceGeometryResolver::default();
        update(&mut resolver, &volume, &camera, false);
        let square = |size: f64| {
            let clipper = crate::polygon::PolygonClipper::new(1e-6);
            clipper.compute(
                [0.0, size, 0.0, size, -1.0, 1.0],
                DMat4::IDENTITY,
                0.0,
                0.0,
            )
        };
        let first = resolver.texture_grid(&volume, &square(20.0), false, 1);
        assert_eq!(first.extent, [0, 20, 0, 20, 0, 0]);
        let shrunk = resolver.texture_grid(&volume, &square(19.0), false, 1);
        assert_eq!(shrunk.extent, first.extent);
        let small = resolver.texture_grid(&volume, &square(10.0), false, 1);
        assert_eq!(small.extent, [0, 10, 0, 10, 0, 0]);
        let sampled = resolver.texture_grid(&volume, &square(10.0), false, 2);
        assert_eq!(sampled.spacing[0], 0.5);
        assert_eq!(sampled.extent, [0, 20, 0, 20, 0, 0]);
    }

    #[test]
    fn test_axis_spacing_weights_directions() {
        let volume = volume();
        assert_eq!(axis_spacing(&volume, DVec3::Z), 1.5);
        assert!((axis_spacing(&volume, DVec3::new(1.0, 0.0, 1.0)) - 1.25).abs() < 1e-12);
    }
}
