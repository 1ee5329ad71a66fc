#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Medical slice orientations, used to build permutation reslice axes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Orientation {
    Axial,
    Coronal,
    Sagittal,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum InterpolationMode {
    #[default]
    Nearest,
    Linear,
    Cubic,
}

impl InterpolationMode {
    /// Number of taps along each axis.
    pub fn support_size(self) -> usize {
        match self {
            InterpolationMode::Nearest => 1,
            InterpolationMode::Linear => 2,
            InterpolationMode::Cubic => 4,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            InterpolationMode::Nearest => "Nearest",
            InterpolationMode::Linear => "Linear",
            InterpolationMode::Cubic => "Cubic",
        }
    }
}

/// How indices outside the volume extent are brought back inside.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum BorderMode {
    /// Duplicate the edge voxels.
    #[default]
    Clamp,
    /// Periodic repetition of the volume.
    Wrap,
    /// Reflection about the edges, edge voxels duplicated.
    Mirror,
}

/// Compositing operator for thick slabs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum SlabMode {
    Min,
    Max,
    #[default]
    Mean,
    /// Sum of the slab samples.
    ///
    /// When the slab is configured through
    /// [`ResliceMapper`](crate::ResliceMapper) the samples are also
    /// multiplied by the slab sample spacing, so the output approximates a
    /// path integral and its unit is intensity × distance rather than
    /// intensity.
    Sum,
}

impl SlabMode {
    pub fn as_str(self) -> &'static str {
        match self {
            SlabMode::Min => "Min",
            SlabMode::Max => "Max",
            SlabMode::Mean => "Mean",
            SlabMode::Sum => "Sum",
        }
    }
}

/// Scalar types a volume or a reslice output can hold.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ScalarType {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    F32,
    F64,
}

impl ScalarType {
    pub fn is_integer(self) -> bool {
        !matches!(self, ScalarType::F32 | ScalarType::F64)
    }

    /// Representable range, used when clamping integer output.
    pub fn range(self) -> (f64, f64) {
        match self {
            ScalarType::U8 => (u8::MIN as f64, u8::MAX as f64),
            ScalarType::I8 => (i8::MIN as f64, i8::MAX as f64),
            ScalarType::U16 => (u16::MIN as f64, u16::MAX as f64),
            ScalarType::I16 => (i16::MIN as f64, i16::MAX as f64),
            ScalarType::U32 => (u32::MIN as f64, u32::MAX as f64),
            ScalarType::I32 => (i32::MIN as f64, i32::MAX as f64),
            ScalarType::F32 => (f32::MIN as f64, f32::MAX as f64),
            ScalarType::F64 => (f64::MIN, f64::MAX),
        }
    }

    pub fn size_of(self) -> usize {
        match self {
            ScalarType::U8 | ScalarType::I8 => 1,
            ScalarType::U16 | ScalarType::I16 => 2,
            ScalarType::U32 | ScalarType::I32 | ScalarType::F32 => 4,
            ScalarType::F64 => 8,
        }
    }
}

/// Pixel layout produced by the color stage.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ColorFormat {
    Luminance,
    LuminanceAlpha,
    Rgb,
    #[default]
    Rgba,
}

impl ColorFormat {
    pub fn components(self) -> usize {
        match self {
            ColorFormat::Luminance => 1,
            ColorFormat::LuminanceAlpha => 2,
            ColorFormat::Rgb => 3,
            ColorFormat::Rgba => 4,
        }
    }

    pub fn has_alpha(self) -> bool {
        matches!(self, ColorFormat::LuminanceAlpha | ColorFormat::Rgba)
    }
}

/// Order of the slices of a DICOM series.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SortBy {
    #[default]
    ImagePositionPatient,
    TablePosition,
    InstanceNumber,
    None,
}
