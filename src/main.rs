use std::path::PathBuf;

use dicom_reslice::{
    Camera, ImageProperty, InterpolationMode, RenderRequest, ResliceMapper, SlabMode, SortBy,
    Viewport, VolumeLoader,
};
use glam::{DMat4, DVec3};

fn main() {
    let volume = VolumeLoader::load_from_directory(PathBuf::from("dicom"), SortBy::InstanceNumber)
        .expect("should have loaded files from directory");

    let center = volume.center();
    let (depth, height, width) = volume.dim();
    let spacing = volume.spacing();
    let half_height = 0.5 * (height as f64 * spacing[1]).max(depth as f64 * spacing[2]);
    let camera = Camera::parallel(
        center + DVec3::new(0.0, -4.0 * half_height, 0.0),
        center,
        DVec3::Z,
        half_height,
    );
    let property = ImageProperty {
        interpolation: InterpolationMode::Cubic,
        ..Default::default()
    };
    let request = RenderRequest {
        camera: &camera,
        viewport: Viewport::new(width as u32, width as u32),
        prop_matrix: DMat4::IDENTITY,
        allocated_render_time: 1.0,
        property: &property,
    };

    let mut mapper = ResliceMapper::new();
    mapper.set_input(Some(volume));
    let slice = mapper
        .render(&request)
        .expect("should have rendered the coronal slice")
        .expect("volume should not be empty");
    slice
        .image
        .to_image(0)
        .expect("should have returned image at center of volume")
        .save("result.png")
        .expect("should have saved the slice");

    mapper
        .set_slab_thickness(20.0)
        .expect("should accept a positive slab thickness");
    mapper.set_slab_mode(SlabMode::Max);
    let slab = mapper
        .render(&request)
        .expect("should have rendered the slab")
        .expect("volume should not be empty");
    slab.image
        .to_image(0)
        .expect("should have returned slab image")
        .save("result_mip.png")
        .expect("should have saved the slab");
}
