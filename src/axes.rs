use crate::enums::Orientation;

use glam::{DMat4, DVec3, DVec4};

/// Cutting-plane transform from slice coordinates to data coordinates.
///
/// Columns 0 to 2 are the slice x, y and z axes, column 3 the slice origin.
/// Every setter reports whether the stored matrix actually changed, and the
/// last answer stays available through [`ResliceAxes::changed`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ResliceAxes {
    matrix: DMat4,
    changed: bool,
}

impl Default for ResliceAxes {
    fn default() -> Self {
        Self::identity()
    }
}

impl ResliceAxes {
    pub fn identity() -> Self {
        Self::from_matrix(DMat4::IDENTITY)
    }

    /// Axes copied from a caller matrix. The bottom row is forced to
    /// (0, 0, 0, 1).
    pub fn from_matrix(matrix: DMat4) -> Self {
        Self {
            matrix: affine(matrix),
            changed: true,
        }
    }

    /// Axes built from direction cosines and an origin, all in data space.
    pub fn from_direction_cosines(x: DVec3, y: DVec3, z: DVec3, origin: DVec3) -> Self {
        Self::from_matrix(DMat4::from_cols(
            x.extend(0.0),
            y.extend(0.0),
            z.extend(0.0),
            origin.extend(1.0),
        ))
    }

    /// Axis relabeling for the three medical orientations, no rotation
    /// beyond a permutation with sign.
    pub fn permutation(orientation: Orientation) -> Self {
        let (x, y, z) = match orientation {
            Orientation::Axial => (DVec3::X, DVec3::Y, DVec3::Z),
            Orientation::Coronal => (DVec3::X, DVec3::Z, DVec3::NEG_Y),
            Orientation::Sagittal => (DVec3::Y, DVec3::Z, DVec3::X),
        };
        Self::from_direction_cosines(x, y, z, DVec3::ZERO)
    }

    pub fn matrix(&self) -> DMat4 {
        self.matrix
    }

    /// Inverse of the axes, i.e. data space to slice space.
    ///
    /// A singular matrix yields the identity.
    pub fn inverse(&self) -> DMat4 {
        if self.matrix.determinant() == 0.0 {
            tracing::warn!("reslice axes are singular, using identity");
            return DMat4::IDENTITY;
        }
        self.matrix.inverse()
    }

    /// Whether the last setter call modified the matrix.
    pub fn changed(&self) -> bool {
        self.changed
    }

    pub fn origin(&self) -> DVec3 {
        self.matrix.w_axis.truncate()
    }

    pub fn direction_cosines(&self) -> [DVec3; 3] {
        [
            self.matrix.x_axis.truncate(),
            self.matrix.y_axis.truncate(),
            self.matrix.z_axis.truncate(),
        ]
    }

    /// Slice normal in data space.
    pub fn normal(&self) -> DVec3 {
        self.matrix.z_axis.truncate()
    }

    /// Replace the matrix, comparing element by element with the current one.
    pub fn set_matrix(&mut self, matrix: DMat4) -> bool {
        let matrix = affine(matrix);
        self.changed = matrix.to_cols_array() != self.matrix.to_cols_array();
        if self.changed {
            self.matrix = matrix;
        }
        self.changed
    }

    pub fn set_direction_cosines(&mut self, x: DVec3, y: DVec3, z: DVec3) -> bool {
        let mut matrix = self.matrix;
        matrix.x_axis = x.extend(0.0);
        matrix.y_axis = y.extend(0.0);
        matrix.z_axis = z.extend(0.0);
        self.set_matrix(matrix)
    }

    pub fn set_origin(&mut self, origin: DVec3) -> bool {
        let mut matrix = self.matrix;
        matrix.w_axis = origin.extend(1.0);
        self.set_matrix(matrix)
    }
}

fn affine(mut matrix: DMat4) -> DMat4 {
    matrix.x_axis.w = 0.0;
    matrix.y_axis.w = 0.0;
    matrix.z_axis.w = 0.0;
    matrix.w_axis = DVec4::new(matrix.w_axis.x, matrix.w_axis.y, matrix.w_axis.z, 1.0);
    matrix
}
