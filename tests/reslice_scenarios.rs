use dicom_reslice::{
    Camera, ColorFormat, ImageProperty, InterpolationMode, Interpolator, BorderMode,
    OutputGrid, PolygonClipper, RenderRequest, ResliceEngine, ResliceMapper, ScalarType,
    Scalars, Viewport, Volume, data_bounds,
};
use glam::{DMat4, DVec3};
use ndarray::Array3;

fn ramp_volume() -> Volume {
    let data = Array3::from_shape_fn((93, 64, 64), |(z, y, x)| (x + 100 * y + 10_000 * z) as u32);
    Volume::from_array3(data, [3.2, 3.2, 1.5])
}

fn f64_values(volume: &Volume) -> Vec<f64> {
    let (depth, height, width) = volume.dim();
    let mut values = Vec::with_capacity(depth * height * width);
    let e = volume.extent();
    for k in e[4]..=e[5] {
        for j in e[2]..=e[3] {
            for i in e[0]..=e[1] {
                values.push(volume.value_at(i, j, k, 0).unwrap());
            }
        }
    }
    values
}

#[test]
fn identity_reslice_reproduces_input() {
    let data = Array3::from_shape_fn((3, 4, 5), |(z, y, x)| (z * 100 + y * 10 + x) as i16 - 150);
    let volume = Volume::from_array3(data, [1.0; 3]);
    let mut engine = ResliceEngine::new();
    engine.set_interpolation_mode(InterpolationMode::Nearest);
    engine.set_output_grid(Some(OutputGrid::new(volume.extent(), [1.0; 3], [0.0; 3])));

    let resliced = engine.execute(&volume).unwrap();
    assert_eq!(resliced.image.scalar_type(), ScalarType::I16);
    assert_eq!(resliced.image.extent(), volume.extent());
    assert_eq!(f64_values(&resliced.image), f64_values(&volume));
}

#[test]
fn axial_slice_extraction() {
    let volume = ramp_volume();
    assert_eq!(volume.extent(), [0, 63, 0, 63, 0, 92]);
    let expected: Vec<f64> = volume
        .slice_values(30, &dicom_reslice::Orientation::Axial)
        .unwrap()
        .iter()
        .copied()
        .collect();
    assert_eq!(expected.len(), 64 * 64);
    assert_eq!(expected[64 + 2], 300_102.0);

    for mode in [InterpolationMode::Nearest, InterpolationMode::Linear] {
        let mut engine = ResliceEngine::new();
        engine.set_interpolation_mode(mode);
        engine.reslice_axes_mut().set_origin(DVec3::new(0.0, 0.0, 45.0));
        engine.set_output_dimensionality(2).unwrap();

        let resliced = engine.execute(&volume).unwrap();
        let image = &resliced.image;
        assert_eq!(image.extent(), [0, 63, 0, 63, 0, 0]);
        assert_eq!(image.spacing(), [3.2, 3.2, 1.5]);
        assert_eq!(image.scalar_type(), ScalarType::U32);
        assert_eq!(f64_values(image), expected, "{mode:?}");
    }
}

#[test]
fn shift_and_scale_clamp_to_output_type() {
    let volume = Volume::from_array3(Array3::from_elem((2, 2, 2), 300u16), [1.0; 3]);
    let mut engine = ResliceEngine::new();
    engine.set_output_scalar_type(Some(ScalarType::U8));
    engine.set_scalar_shift(1000.0);
    let high = engine.execute(&volume).unwrap();
    assert_eq!(high.image.scalar_type(), ScalarType::U8);
    assert!(f64_values(&high.image).iter().all(|&v| v == 255.0));

    engine.set_scalar_shift(-1000.0);
    let low = engine.execute(&volume).unwrap();
    assert!(f64_values(&low.image).iter().all(|&v| v == 0.0));

    engine.set_scalar_shift(0.0);
    engine.set_scalar_scale(0.5);
    let half = engine.execute(&volume).unwrap();
    assert!(f64_values(&half.image).iter().all(|&v| v == 150.0));
}

#[test]
fn plane_outside_volume_gives_background() {
    let volume = Volume::from_array3(Array3::from_elem((4, 4, 4), 9u8), [1.0; 3]);
    let mut engine = ResliceEngine::new();
    engine.reslice_axes_mut().set_origin(DVec3::new(0.0, 0.0, 1000.0));
    engine.set_output_grid(Some(OutputGrid::new([0, 9, 0, 7, 0, 0], [1.0; 3], [0.0; 3])));
    engine.set_background_level(7.0);
    engine.set_generate_stencil(true);

    let resliced = engine.execute(&volume).unwrap();
    assert_eq!(resliced.image.dim(), (1, 8, 10));
    assert!(f64_values(&resliced.image).iter().all(|&v| v == 7.0));
    assert!(resliced.stencil.unwrap().iter().all(|&hit| !hit));

    let bounds = data_bounds(&volume, true, 0.0);
    let bounds_to_slice = engine.reslice_axes().inverse() * volume.index_to_data();
    let polygon = PolygonClipper::default().compute(bounds, bounds_to_slice, 0.0, 0.0);
    assert!(polygon.is_empty());
    assert_eq!(polygon.area(), 0.0);
}

#[test]
fn border_reaches_half_a_voxel() {
    let data = Array3::from_shape_fn((6, 6, 6), |(z, y, x)| (x + 2 * y + 3 * z) as f32);
    let volume = Volume::from_array3(data, [1.0; 3]);
    let interpolator =
        Interpolator::with_border(InterpolationMode::Linear, BorderMode::Clamp, true, 0.5);

    let mut at_edge = [0.0];
    let mut beyond = [0.0];
    assert!(interpolator.sample(&volume, [5.0, 2.0, 3.0], &mut at_edge));
    assert!(interpolator.sample(&volume, [5.5, 2.0, 3.0], &mut beyond));
    assert_eq!(at_edge, beyond);
    assert!(!interpolator.sample(&volume, [5.51, 2.0, 3.0], &mut beyond));
}

#[test]
fn oblique_render_through_mapper() {
    let data = Array3::from_shape_fn((16, 16, 16), |(z, y, x)| (x + y + z) as u8 * 5);
    let volume = Volume::from_array3(data, [1.0; 3]);
    let centre = volume.center();
    let camera = Camera::parallel(
        centre + DVec3::new(30.0, 20.0, 50.0),
        centre,
        DVec3::Y,
        12.0,
    );
    let property = ImageProperty {
        interpolation: InterpolationMode::Cubic,
        ..Default::default()
    };

    let mut mapper = ResliceMapper::new();
    mapper.set_input(Some(volume));
    mapper.set_resample_to_screen_pixels(false);
    let slice = mapper
        .render(&RenderRequest {
            camera: &camera,
            viewport: Viewport::new(64, 64),
            prop_matrix: DMat4::IDENTITY,
            allocated_render_time: 1.0,
            property: &property,
        })
        .unwrap()
        .unwrap();

    assert!(slice.polygon.len() >= 3);
    assert!(slice.polygon.is_convex(1e-9));
    assert!(slice.polygon.area() > 0.0);
    let Scalars::U8(pixels) = slice.image.scalars() else {
        panic!("expected 8-bit colors");
    };
    assert_eq!(pixels.dim().3, ColorFormat::Rgba.components());

    let normal = slice.slice_to_world.z_axis.truncate();
    let towards_camera = (camera.position - camera.focal_point).normalize();
    assert!(normal.dot(towards_camera) > 0.999_999);
    let focal = slice.slice_to_world.inverse().transform_point3(centre);
    assert!(focal.z.abs() < 1e-9);
}
