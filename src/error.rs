use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResliceError {
    #[error("Slab thickness must be a finite value >= 0, got {0}")]
    InvalidSlabThickness(f64),

    #[error("Image sample factor must be >= 1, got {0}")]
    InvalidImageSampleFactor(u32),

    #[error("Slab sample factor must be 1 or 2, got {0}")]
    InvalidSlabSampleFactor(u32),

    #[error("Slab must have at least one slice, got {0}")]
    InvalidSlabNumberOfSlices(u32),

    #[error("Slab of thickness {thickness} over slices {base_spacing} apart needs too many samples")]
    TooManySlabSlices { thickness: f64, base_spacing: f64 },

    #[error("Slab slice spacing fraction must be a finite value > 0, got {0}")]
    InvalidSlabSpacingFraction(f64),

    #[error("Border thickness must be a finite value >= 0, got {0}")]
    InvalidBorderThickness(f64),

    #[error("Output dimensionality must be 2 or 3, got {0}")]
    InvalidOutputDimensionality(u32),

    #[error("Wrap and mirror padding cannot be combined with each other")]
    ConflictingBorderModes,

    #[error("Scalar data has shape {found:?}, expected {expected:?}")]
    ShapeMismatch {
        expected: [usize; 4],
        found: [usize; 4],
    },

    #[error("Could not allocate an output buffer of {0} samples")]
    OutputAllocation(usize),

    #[error("Color mapping expects 1 to 4 components, got {0}")]
    UnsupportedComponents(usize),
}
