use crate::{enums::SortBy, volume::Volume};

use dicom::{
    object::{FileDicomObject, InMemDicomObject, open_file},
    pixeldata::{ConvertOptions, PixelDecoder, VoiLutOption},
};
use dicom_dictionary_std::tags;
use glam::DVec3;
use ndarray::{Array2, Array3, s};
use std::{fs, path::Path};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VolumeLoaderError {
    #[error("No valid DICOM images found")]
    NoValidImages,

    #[error("Inconsistent image dimensions")]
    InconsistentDimensions,

    #[error("Missing spacing information")]
    MissingSpacing,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("DICOM error: {0}")]
    Dicom(#[from] dicom::object::ReadError),
}

/// One decoded slice with the attributes used to place it.
struct SliceImage {
    order: Option<f32>,
    position: Option<DVec3>,
    pixels: Array2<u16>,
}

pub struct VolumeLoader;

impl VolumeLoader {
    /// Load a volume from DICOM objects
    ///
    /// # Arguments
    ///
    /// * `dicom_objects` - Slice of DICOM file objects
    /// * `sort_by` - Method to sort the slices
    ///
    /// The volume origin is the ImagePositionPatient of the first slice after
    /// sorting and its direction comes from ImageOrientationPatient. Both
    /// default to the identity placement when missing.
    ///
    /// # Errors
    ///
    /// Returns error if no valid images found or dimensions are inconsistent
    pub fn load_from_dicom_objects(
        dicom_objects: &[FileDicomObject<InMemDicomObject>],
        sort_by: SortBy,
    ) -> Result<Volume, VolumeLoaderError> {
        let mut slices: Vec<_> = dicom_objects
            .iter()
            .filter_map(|dicom_object| Self::extract_slice(dicom_object, &sort_by))
            .collect();

        if slices.is_empty() {
            return Err(VolumeLoaderError::NoValidImages);
        }

        Self::sort_slices(&mut slices, sort_by);
        Self::validate_dimensions(&slices)?;

        let (pixel_spacing, thickness) =
            Self::get_spacing(dicom_objects).ok_or(VolumeLoaderError::MissingSpacing)?;
        let positions: Vec<_> = slices.iter().filter_map(|slice| slice.position).collect();
        let (row, column) = dicom_objects
            .iter()
            .find_map(Self::get_orientation)
            .unwrap_or((DVec3::X, DVec3::Y));
        let normal = slice_normal(row, column, &positions);
        let slice_spacing = slice_spacing(&positions, normal).unwrap_or(thickness);

        tracing::debug!(
            slices = slices.len(),
            ?pixel_spacing,
            slice_spacing,
            "loaded DICOM series"
        );

        let origin = positions.first().copied().unwrap_or(DVec3::ZERO);
        let volume_array = Self::build_volume_array(&slices);
        Ok(
            Volume::from_array3(volume_array, [pixel_spacing[1], pixel_spacing[0], slice_spacing])
                .with_origin(origin.to_array())
                .with_direction([
                    row.x, column.x, normal.x, row.y, column.y, normal.y, row.z, column.z, normal.z,
                ]),
        )
    }

    /// Load a volume from file paths
    pub fn load_from_file_paths(
        paths: &[impl AsRef<Path>],
        sort_by: SortBy,
    ) -> Result<Volume, VolumeLoaderError> {
        let objects: Result<Vec<_>, _> =
            paths.iter().map(|path| open_file(path.as_ref())).collect();

        Self::load_from_dicom_objects(&objects?, sort_by)
    }

    /// Load a volume from a directory containing .dcm files
    pub fn load_from_directory(
        path: impl AsRef<Path>,
        sort_by: SortBy,
    ) -> Result<Volume, VolumeLoaderError> {
        let paths: Vec<_> = fs::read_dir(path.as_ref())?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| {
                path.extension()
                    .and_then(|s| s.to_str())
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("dcm"))
            })
            .collect();

        if paths.is_empty() {
            return Err(VolumeLoaderError::NoValidImages);
        }

        Self::load_from_file_paths(&paths, sort_by)
    }

    fn extract_slice(
        dicom_object: &FileDicomObject<InMemDicomObject>,
        sort_by: &SortBy,
    ) -> Option<SliceImage> {
        let order = Self::get_sort_order(dicom_object, sort_by)?;
        let pixels = Self::decode_image(dicom_object)?;
        let position = Self::get_position(dicom_object);
        Some(SliceImage {
            order,
            position,
            pixels,
        })
    }

    fn get_sort_order(
        dicom_object: &FileDicomObject<InMemDicomObject>,
        sort_by: &SortBy,
    ) -> Option<Option<f32>> {
        match sort_by {
            SortBy::ImagePositionPatient => {
                let pos = dicom_object
                    .element(tags::IMAGE_POSITION_PATIENT)
                    .ok()?
                    .to_multi_float32()
                    .ok()?;
                Some(pos.get(2).copied())
            }
            SortBy::TablePosition => {
                let pos = dicom_object
                    .element(tags::TABLE_POSITION)
                    .ok()?
                    .to_float32()
                    .ok();
                Some(pos)
            }
            SortBy::InstanceNumber => {
                let num = dicom_object
                    .element(tags::INSTANCE_NUMBER)
                    .ok()?
                    .to_int::<i32>()
                    .ok()
                    .map(|n| n as f32);
                Some(num)
            }
            SortBy::None => Some(Some(0.0)),
        }
    }

    fn get_position(dicom_object: &FileDicomObject<InMemDicomObject>) -> Option<DVec3> {
        let pos = dicom_object
            .element(tags::IMAGE_POSITION_PATIENT)
            .ok()?
            .to_multi_float64()
            .ok()?;
        (pos.len() >= 3).then(|| DVec3::new(pos[0], pos[1], pos[2]))
    }

    /// Row and column direction cosines.
    fn get_orientation(dicom_object: &FileDicomObject<InMemDicomObject>) -> Option<(DVec3, DVec3)> {
        let cosines = dicom_object
            .element(tags::IMAGE_ORIENTATION_PATIENT)
            .ok()?
            .to_multi_float64()
            .ok()?;
        if cosines.len() < 6 {
            return None;
        }
        let row = DVec3::new(cosines[0], cosines[1], cosines[2]).try_normalize()?;
        let column = DVec3::new(cosines[3], cosines[4], cosines[5]).try_normalize()?;
        Some((row, column))
    }

    fn decode_image(dicom_object: &FileDicomObject<InMemDicomObject>) -> Option<Array2<u16>> {
        let pixel_data = dicom_object.decode_pixel_data().ok()?;
        let options = ConvertOptions::new().with_voi_lut(VoiLutOption::First);
        pixel_data
            .to_ndarray_with_options::<u16>(&options)
            .ok()
            .map(|arr| arr.slice_move(s![0, .., .., 0]))
    }

    fn sort_slices(slices: &mut [SliceImage], sort_by: SortBy) {
        if !matches!(sort_by, SortBy::None) {
            slices.sort_by(|a, b| {
                a.order
                    .partial_cmp(&b.order)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
        }

        if matches!(sort_by, SortBy::ImagePositionPatient) {
            slices.reverse();
        }
    }

    fn validate_dimensions(slices: &[SliceImage]) -> Result<(), VolumeLoaderError> {
        let first_dim = slices[0].pixels.dim();
        if slices.iter().any(|slice| slice.pixels.dim() != first_dim) {
            return Err(VolumeLoaderError::InconsistentDimensions);
        }
        Ok(())
    }

    fn build_volume_array(slices: &[SliceImage]) -> Array3<u16> {
        let (height, width) = slices[0].pixels.dim();
        let depth = slices.len();
        let mut volume = Array3::<u16>::zeros((depth, height, width));

        for (i, slice) in slices.iter().enumerate() {
            volume.slice_mut(s![i, .., ..]).assign(&slice.pixels);
        }

        volume
    }

    /// PixelSpacing (row, column) and SliceThickness.
    fn get_spacing(
        dicom_objects: &[FileDicomObject<InMemDicomObject>],
    ) -> Option<([f64; 2], f64)> {
        dicom_objects.iter().find_map(|dicom_object| {
            let pixel_spacing = dicom_object
                .element(tags::PIXEL_SPACING)
                .ok()?
                .to_multi_float64()
                .ok()?;

            let slice_thickness = dicom_object
                .element(tags::SLICE_THICKNESS)
                .ok()?
                .to_float64()
                .ok()?;

            (pixel_spacing.len() >= 2)
                .then(|| ([pixel_spacing[0], pixel_spacing[1]], slice_thickness))
        })
    }
}

/// Normal of the image plane, pointing from the first slice to the last.
fn slice_normal(row: DVec3, column: DVec3, positions: &[DVec3]) -> DVec3 {
    let normal = row.cross(column).normalize_or(DVec3::Z);
    match (positions.first(), positions.last()) {
        (Some(first), Some(last)) if (*last - *first).dot(normal) < 0.0 => -normal,
        _ => normal,
    }
}

/// Distance between the first two slice positions along `normal`.
fn slice_spacing(positions: &[DVec3], normal: DVec3) -> Option<f64> {
    let [first, second, ..] = positions else {
        return None;
    };
    let spacing = (*second - *first).dot(normal).abs();
    (spacing > 0.0).then_some(spacing)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slice_normal_follows_positions() {
        let positions = [DVec3::new(0.0, 0.0, 10.0), DVec3::new(0.0, 0.0, 8.5)];
        assert_eq!(slice_normal(DVec3::X, DVec3::Y, &positions), DVec3::NEG_Z);
        assert_eq!(slice_normal(DVec3::X, DVec3::Y, &[]), DVec3::Z);
    }

    #[test]
    fn test_slice_spacing_from_positions() {
        let positions = [DVec3::new(0.0, 0.0, 10.0), DVec3::new(0.0, 0.0, 8.5)];
        assert_eq!(slice_spacing(&positions, DVec3::NEG_Z), Some(1.5));
        assert_eq!(slice_spacing(&positions[..1], DVec3::Z), None);
        assert_eq!(slice_spacing(&[DVec3::ZERO, DVec3::ZERO], DVec3::Z), None);
    }

    #[test]
    fn test_sort_by_position_is_descending() {
        let slice = |order: f32| SliceImage {
            order: Some(order),
            position: None,
            pixels: Array2::zeros((1, 1)),
        };
        let mut slices = vec![slice(1.0), slice(3.0), slice(2.0)];
        VolumeLoader::sort_slices(&mut slices, SortBy::ImagePositionPatient);
        let orders: Vec<_> = slices.iter().map(|s| s.order).collect();
        assert_eq!(orders, vec![Some(3.0), Some(2.0), Some(1.0)]);
    }

    #[test]
    fn test_missing_images() {
        let result = VolumeLoader::load_from_dicom_objects(&[], SortBy::InstanceNumber);
        assert!(matches!(result, Err(VolumeLoaderError::NoValidImages)));
    }
}
