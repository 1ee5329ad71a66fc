//! # DICOM-reslice library
//!
//! This crate cuts arbitrary planes and thick slabs out of 3D volumes and
//! turns them into images for display.
//!
//! It builds on the dicom-rs ecosystem to load a series of DICOM files into
//! a [`Volume`] and then resamples that volume along any plane, not only the
//! three medical axes:
//!  - Axial
//!  - Coronal
//!  - Sagittal
//!
//!  The plane is either given explicitly as a set of reslice axes or follows
//!  a [`Camera`], facing it and passing through its focal point. Samples are
//!  interpolated with nearest neighbour, trilinear or tricubic kernels, and
//!  slabs of several parallel samples can be combined into minimum, maximum,
//!  mean or summed projections. Output rows are computed in parallel using
//!  rayon.
//!
//!  The pieces can be used on their own:
//!   - [`ResliceEngine`] resamples a volume on an output grid
//!   - [`SliceGeometryResolver`] derives the reslice axes and output grids
//!   - [`PolygonClipper`] finds the visible part of a slice
//!   - [`ColorStage`] maps scalars to 8-bit colors
//!
//!  or driven together for a viewport by [`ResliceMapper`].
//!
//! # Examples
//!
//! ## Reslicing a DICOM series
//!
//! To read all DICOM files from the dicom/ directory sorted by
//! InstanceNumber and save the coronal plane through the centre of the
//! volume.
//!
//! ```no_run
//! # use dicom_reslice::{Orientation, ResliceEngine, SortBy, VolumeLoader};
//! let volume = VolumeLoader::load_from_directory("dicom", SortBy::InstanceNumber)
//!     .expect("should have loaded files from directory");
//! let mut engine = ResliceEngine::permute(Orientation::Coronal);
//! engine.reslice_axes_mut().set_origin(volume.center());
//! engine
//!     .set_output_dimensionality(2)
//!     .expect("2 is a valid dimensionality");
//! let resliced = engine.execute(&volume).expect("should have resliced the volume");
//! let image = resliced
//!     .image
//!     .to_image(0)
//!     .expect("should have returned the coronal slice");
//! image.save("result.png");
//! ```

mod axes;
mod camera;
mod color;
mod engine;
pub mod enums;
mod error;
mod interpolator;
mod mapper;
mod polygon;
mod slice_geometry;
pub mod volume;
pub mod volume_loader;

pub use axes::ResliceAxes;
pub use camera::{Camera, Viewport};
pub use color::{Checkerboard, ColorStage, LookupTable};
pub use engine::{OutputGrid, ResliceEngine, Resliced, SlabSpec};
pub use enums::{
    BorderMode, ColorFormat, InterpolationMode, Orientation, ScalarType, SlabMode, SortBy,
};
pub use error::ResliceError;
pub use interpolator::{DEFAULT_BORDER_THICKNESS, Interpolator};
pub use mapper::{ImageProperty, RenderRequest, RenderedSlice, ResliceMapper};
pub use polygon::{MAX_POLYGON_POINTS, Polygon, PolygonClipper, data_bounds};
pub use slice_geometry::{
    CameraSlicing, GeometryInput, ResliceAxesSource, SliceGeometryResolver, SlicePlane,
};
pub use volume::{Scalar, Scalars, Volume};
pub use volume_loader::{VolumeLoader, VolumeLoaderError};
