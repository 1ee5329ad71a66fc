use crate::enums::{Orientation, ScalarType};
use crate::error::ResliceError;

use glam::{DMat3, DMat4, DVec3};
use image::{DynamicImage, ImageBuffer, Luma, LumaA, Rgb, Rgba};
use ndarray::{Array3, Array4, Axis, s};

/// Inverse spacing used in place of `1 / 0`.
const MAX_INV_SPACING: f64 = 1.0e12;

/// Element types a [`Scalars`] array can hold.
pub trait Scalar: bytemuck::Pod + Send + Sync + PartialOrd {
    const TYPE: ScalarType;

    fn to_f64(self) -> f64;

    /// Plain `as` cast; integer callers round and clamp first.
    fn from_f64(value: f64) -> Self;

    fn wrap(data: Array4<Self>) -> Scalars;
}

macro_rules! impl_scalar {
    ($t:ty, $variant:ident) => {
        impl Scalar for $t {
            const TYPE: ScalarType = ScalarType::$variant;

            #[inline]
            fn to_f64(self) -> f64 {
                self as f64
            }

            #[inline]
            fn from_f64(value: f64) -> Self {
                value as $t
            }

            fn wrap(data: Array4<Self>) -> Scalars {
                Scalars::$variant(data)
            }
        }
    };
}

impl_scalar!(u8, U8);
impl_scalar!(i8, I8);
impl_scalar!(u16, U16);
impl_scalar!(i16, I16);
impl_scalar!(u32, U32);
impl_scalar!(i32, I32);
impl_scalar!(f32, F32);
impl_scalar!(f64, F64);

/// Voxel storage, laid out as (z, y, x, component).
#[derive(Clone, Debug)]
pub enum Scalars {
    U8(Array4<u8>),
    I8(Array4<i8>),
    U16(Array4<u16>),
    I16(Array4<i16>),
    U32(Array4<u32>),
    I32(Array4<i32>),
    F32(Array4<f32>),
    F64(Array4<f64>),
}

/// Runs `$body` with `$array` bound to the typed array inside a [`Scalars`].
macro_rules! dispatch_scalars {
    ($scalars:expr, $array:ident => $body:expr) => {
        match $scalars {
            $crate::volume::Scalars::U8($array) => $body,
            $crate::volume::Scalars::I8($array) => $body,
            $crate::volume::Scalars::U16($array) => $body,
            $crate::volume::Scalars::I16($array) => $body,
            $crate::volume::Scalars::U32($array) => $body,
            $crate::volume::Scalars::I32($array) => $body,
            $crate::volume::Scalars::F32($array) => $body,
            $crate::volume::Scalars::F64($array) => $body,
        }
    };
}
pub(crate) use dispatch_scalars;

impl Scalars {
    pub fn scalar_type(&self) -> ScalarType {
        match self {
            Scalars::U8(_) => ScalarType::U8,
            Scalars::I8(_) => ScalarType::I8,
            Scalars::U16(_) => ScalarType::U16,
            Scalars::I16(_) => ScalarType::I16,
            Scalars::U32(_) => ScalarType::U32,
            Scalars::I32(_) => ScalarType::I32,
            Scalars::F32(_) => ScalarType::F32,
            Scalars::F64(_) => ScalarType::F64,
        }
    }

    /// Shape as (depth, height, width, components)
    pub fn dim(&self) -> (usize, usize, usize, usize) {
        dispatch_scalars!(self, a => a.dim())
    }

    pub fn len(&self) -> usize {
        dispatch_scalars!(self, a => a.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn value(&self, z: usize, y: usize, x: usize, c: usize) -> f64 {
        dispatch_scalars!(self, a => a[[z, y, x, c]].to_f64())
    }

    /// Raw bytes of the samples, for handing the buffer to a texture upload.
    ///
    /// `None` when the array is not contiguous in standard order.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        dispatch_scalars!(self, a => a.as_slice().map(bytemuck::cast_slice::<_, u8>))
    }

    /// Build an array of `scalar_type` from already rounded and clamped values.
    pub fn from_values(
        scalar_type: ScalarType,
        shape: (usize, usize, usize, usize),
        values: &[f64],
    ) -> Result<Scalars, ResliceError> {
        fn build<T: Scalar>(
            shape: (usize, usize, usize, usize),
            values: &[f64],
        ) -> Result<Scalars, ResliceError> {
            let mut data = Vec::new();
            data.try_reserve_exact(values.len())
                .map_err(|_| ResliceError::OutputAllocation(values.len()))?;
            data.extend(values.iter().map(|&v| T::from_f64(v)));
            let array = Array4::from_shape_vec(shape, data).map_err(|_| {
                ResliceError::ShapeMismatch {
                    expected: [shape.0, shape.1, shape.2, shape.3],
                    found: [values.len(), 1, 1, 1],
                }
            })?;
            Ok(T::wrap(array))
        }

        match scalar_type {
            ScalarType::U8 => build::<u8>(shape, values),
            ScalarType::I8 => build::<i8>(shape, values),
            ScalarType::U16 => build::<u16>(shape, values),
            ScalarType::I16 => build::<i16>(shape, values),
            ScalarType::U32 => build::<u32>(shape, values),
            ScalarType::I32 => build::<i32>(shape, values),
            ScalarType::F32 => build::<f32>(shape, values),
            ScalarType::F64 => build::<f64>(shape, values),
        }
    }
}

/// A 3D image with its physical placement.
///
/// Index `(i, j, k)` of the extent maps to data coordinates
/// `origin + direction * (spacing * (i, j, k))`. The array itself is indexed
/// relative to the lower corner of the extent.
#[derive(Clone, Debug)]
pub struct Volume {
    scalars: Scalars,
    extent: [i32; 6],
    spacing: [f64; 3],
    origin: [f64; 3],
    direction: [f64; 9],
}

impl Volume {
    /// Volume with extent starting at zero, zero origin and identity direction.
    pub fn new(scalars: Scalars, spacing: [f64; 3]) -> Self {
        let (depth, height, width, _) = scalars.dim();
        Self {
            scalars,
            extent: [
                0,
                width as i32 - 1,
                0,
                height as i32 - 1,
                0,
                depth as i32 - 1,
            ],
            spacing,
            origin: [0.0; 3],
            direction: [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
        }
    }

    /// Single component volume from a (depth, height, width) array.
    pub fn from_array3<T: Scalar>(data: Array3<T>, spacing: [f64; 3]) -> Self {
        Self::new(T::wrap(data.insert_axis(Axis(3))), spacing)
    }

    /// Fully specified volume; the extent must match the scalar shape.
    pub fn try_new(
        scalars: Scalars,
        extent: [i32; 6],
        spacing: [f64; 3],
        origin: [f64; 3],
        direction: [f64; 9],
    ) -> Result<Self, ResliceError> {
        let (depth, height, width, components) = scalars.dim();
        let expected = [
            extent_len(extent[4], extent[5]),
            extent_len(extent[2], extent[3]),
            extent_len(extent[0], extent[1]),
            components,
        ];
        if expected != [depth, height, width, components] {
            return Err(ResliceError::ShapeMismatch {
                expected,
                found: [depth, height, width, components],
            });
        }
        Ok(Self {
            scalars,
            extent,
            spacing,
            origin,
            direction,
        })
    }

    pub fn with_origin(mut self, origin: [f64; 3]) -> Self {
        self.origin = origin;
        self
    }

    pub fn with_direction(mut self, direction: [f64; 9]) -> Self {
        self.direction = direction;
        self
    }

    /// Move the extent so that it starts at `lower`, keeping its size.
    pub fn with_extent_start(mut self, lower: [i32; 3]) -> Self {
        for (axis, &lo) in lower.iter().enumerate() {
            let size = self.extent[2 * axis + 1] - self.extent[2 * axis];
            self.extent[2 * axis] = lo;
            self.extent[2 * axis + 1] = lo + size;
        }
        self
    }

    /// Get the dimensions of the volume (depth, height, width)
    pub fn dim(&self) -> (usize, usize, usize) {
        let (depth, height, width, _) = self.scalars.dim();
        (depth, height, width)
    }

    /// Get a reference to the underlying data
    pub fn scalars(&self) -> &Scalars {
        &self.scalars
    }

    /// Get a mutable reference to the underlying data
    pub fn scalars_mut(&mut self) -> &mut Scalars {
        &mut self.scalars
    }

    pub fn extent(&self) -> [i32; 6] {
        self.extent
    }

    pub fn spacing(&self) -> [f64; 3] {
        self.spacing
    }

    pub fn origin(&self) -> [f64; 3] {
        self.origin
    }

    /// Direction cosines, row-major 3x3.
    pub fn direction(&self) -> [f64; 9] {
        self.direction
    }

    pub fn scalar_type(&self) -> ScalarType {
        self.scalars.scalar_type()
    }

    pub fn number_of_components(&self) -> usize {
        self.scalars.dim().3
    }

    pub fn is_empty(&self) -> bool {
        self.scalars.is_empty()
    }

    /// Sample at an extent index (not an array index).
    pub fn value_at(&self, i: i32, j: i32, k: i32, component: usize) -> Option<f64> {
        let (depth, height, width, components) = self.scalars.dim();
        let x = usize::try_from(i - self.extent[0]).ok()?;
        let y = usize::try_from(j - self.extent[2]).ok()?;
        let z = usize::try_from(k - self.extent[4]).ok()?;
        if x >= width || y >= height || z >= depth || component >= components {
            return None;
        }
        Some(self.scalars.value(z, y, x, component))
    }

    pub fn direction_matrix(&self) -> DMat3 {
        let d = self.direction;
        DMat3::from_cols(
            DVec3::new(d[0], d[3], d[6]),
            DVec3::new(d[1], d[4], d[7]),
            DVec3::new(d[2], d[5], d[8]),
        )
    }

    /// Maps continuous extent indices to data coordinates.
    pub fn index_to_data(&self) -> DMat4 {
        let linear = self.direction_matrix() * DMat3::from_diagonal(DVec3::from(self.spacing));
        DMat4::from_cols(
            linear.x_axis.extend(0.0),
            linear.y_axis.extend(0.0),
            linear.z_axis.extend(0.0),
            DVec3::from(self.origin).extend(1.0),
        )
    }

    /// Maps data coordinates to continuous extent indices.
    ///
    /// Zero spacing yields a very large inverse instead of infinity, and a
    /// singular direction matrix is treated as the identity.
    pub fn data_to_index(&self) -> DMat4 {
        let inv_spacing = DVec3::from(self.spacing.map(|s| {
            if s == 0.0 {
                MAX_INV_SPACING
            } else {
                1.0 / s
            }
        }));
        let direction = self.direction_matrix();
        let inv_direction = if direction.determinant().abs() > 1e-12 {
            direction.inverse()
        } else {
            tracing::warn!("volume direction matrix is singular, using identity");
            DMat3::IDENTITY
        };
        let linear = DMat3::from_diagonal(inv_spacing) * inv_direction;
        let translation = -(linear * DVec3::from(self.origin));
        DMat4::from_cols(
            linear.x_axis.extend(0.0),
            linear.y_axis.extend(0.0),
            linear.z_axis.extend(0.0),
            translation.extend(1.0),
        )
    }

    /// Data coordinates of the centre of the extent.
    pub fn center(&self) -> DVec3 {
        let e = self.extent;
        let center = DVec3::new(
            0.5 * (e[0] + e[1]) as f64,
            0.5 * (e[2] + e[3]) as f64,
            0.5 * (e[4] + e[5]) as f64,
        );
        self.index_to_data().transform_point3(center)
    }

    /// Copy of one axis-aligned slice as (rows, columns, components) doubles.
    pub fn slice_values(&self, index: usize, orientation: &Orientation) -> Option<Array3<f64>> {
        if !self.is_valid_index(index, orientation) {
            return None;
        }
        Some(dispatch_scalars!(&self.scalars, data => {
            let view = match orientation {
                Orientation::Axial => data.slice(s![index, .., .., ..]),
                Orientation::Coronal => data.slice(s![.., index, .., ..]),
                Orientation::Sagittal => data.slice(s![.., .., index, ..]),
            };
            view.mapv(|v| v.to_f64())
        }))
    }

    fn is_valid_index(&self, index: usize, orientation: &Orientation) -> bool {
        let dim = self.dim();
        let max_index = match orientation {
            Orientation::Axial => dim.0,
            Orientation::Coronal => dim.1,
            Orientation::Sagittal => dim.2,
        };
        index < max_index
    }

    #[inline]
    fn normalize_to_u8(value: f64, range: (f64, f64)) -> u8 {
        let (lo, hi) = range;
        if hi <= lo {
            return 0;
        }
        (((value - lo) / (hi - lo)) * 255.0).clamp(0.0, 255.0) as u8
    }

    /// Convert one z slice into an image.
    ///
    /// 8-bit data is copied as is, with 1 to 4 components mapped to
    /// L, LA, RGB and RGBA. Other integer types are scaled from their full
    /// range to 0..255; floating point data is taken as already in 0..255.
    pub fn to_image(&self, z: usize) -> Option<DynamicImage> {
        let (depth, height, width, components) = self.scalars.dim();
        if z >= depth {
            return None;
        }
        let range = match self.scalar_type() {
            ScalarType::U8 | ScalarType::F32 | ScalarType::F64 => (0.0, 255.0),
            other => other.range(),
        };
        let pixel_data: Vec<u8> = dispatch_scalars!(&self.scalars, data => data
            .slice(s![z, .., .., ..])
            .iter()
            .map(|&v| Self::normalize_to_u8(v.to_f64(), range))
            .collect());
        let (width, height) = (width as u32, height as u32);
        match components {
            1 => ImageBuffer::<Luma<u8>, _>::from_raw(width, height, pixel_data)
                .map(DynamicImage::ImageLuma8),
            2 => ImageBuffer::<LumaA<u8>, _>::from_raw(width, height, pixel_data)
                .map(DynamicImage::ImageLumaA8),
            3 => ImageBuffer::<Rgb<u8>, _>::from_raw(width, height, pixel_data)
                .map(DynamicImage::ImageRgb8),
            4 => ImageBuffer::<Rgba<u8>, _>::from_raw(width, height, pixel_data)
                .map(DynamicImage::ImageRgba8),
            _ => None,
        }
    }
}

#[inline]
pub(crate) fn extent_len(lo: i32, hi: i32) -> usize {
    if hi < lo { 0 } else { (hi - lo) as usize + 1 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    fn ramp() -> Volume {
        let data = Array3::from_shape_fn((3, 4, 5), |(z, y, x)| (100 * z + 10 * y + x) as u16);
        Volume::from_array3(data, [1.0, 2.0, 3.0]).with_origin([10.0, 20.0, 30.0])
    }

    #[test]
    fn test_extent_follows_shape() {
        let volume = ramp();
        assert_eq!(volume.extent(), [0, 4, 0, 3, 0, 2]);
        assert_eq!(volume.dim(), (3, 4, 5));
        assert_eq!(volume.number_of_components(), 1);
        assert_eq!(volume.scalar_type(), ScalarType::U16);
    }

    #[test]
    fn test_index_data_round_trip() {
        let volume = ramp().with_direction([0.0, -1.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0]);
        let point = DVec3::new(1.5, 2.0, 0.25);
        let data = volume.index_to_data().transform_point3(point);
        let back = volume.data_to_index().transform_point3(data);
        assert!((back - point).length() < 1e-12);
    }

    #[test]
    fn test_zero_spacing_is_finite() {
        let volume = Volume::from_array3(Array3::<u8>::zeros((1, 2, 2)), [1.0, 1.0, 0.0]);
        let m = volume.data_to_index();
        assert!(m.to_cols_array().iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_value_at_uses_extent_offsets() {
        let volume = ramp().with_extent_start([-2, 0, 5]);
        assert_eq!(volume.value_at(-2, 0, 5, 0), Some(0.0));
        assert_eq!(volume.value_at(2, 3, 7, 0), Some(234.0));
        assert_eq!(volume.value_at(3, 0, 5, 0), None);
    }

    #[test]
    fn test_try_new_rejects_wrong_extent() {
        let scalars = Scalars::U8(Array4::zeros((2, 2, 2, 1)));
        let result = Volume::try_new(
            scalars,
            [0, 2, 0, 1, 0, 1],
            [1.0; 3],
            [0.0; 3],
            [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
        );
        assert!(matches!(result, Err(ResliceError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_slice_values_orientations() {
        let volume = ramp();
        let axial = volume.slice_values(1, &Orientation::Axial).unwrap();
        assert_eq!(axial.dim(), (4, 5, 1));
        assert_eq!(axial[[2, 3, 0]], 123.0);
        let sagittal = volume.slice_values(4, &Orientation::Sagittal).unwrap();
        assert_eq!(sagittal.dim(), (3, 4, 1));
        assert_eq!(sagittal[[2, 1, 0]], 214.0);
        assert!(volume.slice_values(5, &Orientation::Sagittal).is_none());
    }

    #[test]
    fn test_to_image_u8_rgba() {
        let scalars = Scalars::U8(Array4::from_elem((1, 2, 3, 4), 7u8));
        let volume = Volume::new(scalars, [1.0; 3]);
        let image = volume.to_image(0).unwrap();
        assert_eq!(image.width(), 3);
        assert_eq!(image.height(), 2);
        assert_eq!(image.to_rgba8().get_pixel(1, 1).0, [7, 7, 7, 7]);
    }

    #[test]
    fn test_as_bytes_length() {
        let volume = ramp();
        assert_eq!(volume.scalars().as_bytes().unwrap().len(), 3 * 4 * 5 * 2);
    }
}
