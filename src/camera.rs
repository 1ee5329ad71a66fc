use glam::{DMat4, DVec3};

/// Pixel size of the render target.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn aspect(&self) -> f64 {
        if self.height == 0 {
            1.0
        } else {
            self.width as f64 / self.height as f64
        }
    }

    pub fn max_dimension(&self) -> u32 {
        self.width.max(self.height)
    }
}

/// Scene camera in world coordinates.
///
/// The view matrix rows are the camera right, up and backward directions,
/// so row 2 points from the focal point towards the camera. Projection maps
/// depth to [0, 1].
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Camera {
    pub position: DVec3,
    pub focal_point: DVec3,
    pub view_up: DVec3,
    pub parallel_projection: bool,
    /// Half of the viewport height in world units, for parallel projection.
    pub parallel_scale: f64,
    /// Vertical field of view in degrees, for perspective projection.
    pub view_angle: f64,
    /// Near and far distances from the camera.
    pub clipping_range: [f64; 2],
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: DVec3::new(0.0, 0.0, 1.0),
            focal_point: DVec3::ZERO,
            view_up: DVec3::Y,
            parallel_projection: false,
            parallel_scale: 1.0,
            view_angle: 30.0,
            clipping_range: [0.01, 1000.01],
        }
    }
}

impl Camera {
    pub fn new(position: DVec3, focal_point: DVec3, view_up: DVec3) -> Self {
        Self {
            position,
            focal_point,
            view_up,
            ..Default::default()
        }
    }

    /// Parallel projection camera looking at `focal_point` from `position`.
    pub fn parallel(position: DVec3, focal_point: DVec3, view_up: DVec3, scale: f64) -> Self {
        let distance = position.distance(focal_point);
        Self {
            parallel_projection: true,
            parallel_scale: scale,
            clipping_range: [0.01 * distance.max(1.0), 2.0 * distance.max(1.0)],
            ..Self::new(position, focal_point, view_up)
        }
    }

    pub fn distance(&self) -> f64 {
        self.position.distance(self.focal_point)
    }

    /// Unit vector from the camera position to the focal point.
    pub fn direction_of_projection(&self) -> DVec3 {
        (self.focal_point - self.position).normalize_or_zero()
    }

    pub fn view_matrix(&self) -> DMat4 {
        DMat4::look_at_rh(self.position, self.focal_point, self.view_up)
    }

    pub fn projection_matrix(&self, aspect: f64) -> DMat4 {
        let [near, far] = self.clipping_range;
        if self.parallel_projection {
            let half_height = self.parallel_scale;
            let half_width = half_height * aspect;
            DMat4::orthographic_rh(-half_width, half_width, -half_height, half_height, near, far)
        } else {
            DMat4::perspective_rh(self.view_angle.to_radians(), aspect, near, far)
        }
    }

    /// World to normalized device coordinates.
    pub fn world_to_view(&self, aspect: f64) -> DMat4 {
        self.projection_matrix(aspect) * self.view_matrix()
    }

    /// World-space height of the view at the focal point.
    pub fn view_height(&self) -> f64 {
        if self.parallel_projection {
            2.0 * self.parallel_scale
        } else {
            2.0 * self.distance() * (0.5 * self.view_angle.to_radians()).tan()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_view_matrix_rows() {
        let camera = Camera::new(DVec3::new(0.0, 0.0, 10.0), DVec3::ZERO, DVec3::Y);
        let view = camera.view_matrix();
        assert!((view.row(2).truncate() - DVec3::Z).length() < 1e-12);
        assert!((view.row(0).truncate() - DVec3::X).length() < 1e-12);
        assert_eq!(camera.direction_of_projection(), DVec3::NEG_Z);
    }

    #[test]
    fn test_focal_point_projects_to_centre() {
        let camera = Camera::parallel(DVec3::new(0.0, 0.0, 10.0), DVec3::ZERO, DVec3::Y, 5.0);
        let ndc = camera.world_to_view(1.0).project_point3(DVec3::new(5.0, -5.0, 0.0));
        assert!((ndc.x - 1.0).abs() < 1e-12);
        assert!((ndc.y + 1.0).abs() < 1e-12);
        assert!(ndc.z > 0.0 && ndc.z < 1.0);
    }

    #[test]
    fn test_view_height() {
        let camera = Camera::parallel(DVec3::new(0.0, 0.0, 10.0), DVec3::ZERO, DVec3::Y, 5.0);
        assert_eq!(camera.view_height(), 10.0);
        let mut perspective = camera;
        perspective.parallel_projection = false;
        perspective.view_angle = 90.0;
        assert!((perspective.view_height() - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_viewport_aspect() {
        assert_eq!(Viewport::new(200, 100).aspect(), 2.0);
        assert_eq!(Viewport::new(200, 0).aspect(), 1.0);
    }
}
