use dicom_reslice::{
    InterpolationMode, OutputGrid, PolygonClipper, ResliceAxes, ResliceEngine, ScalarType,
    SlabMode, Volume,
};
use glam::{DMat4, DVec3};
use ndarray::Array3;
use proptest::prelude::*;

fn random_volume(values: Vec<f64>, shape: (usize, usize, usize)) -> Volume {
    Volume::from_array3(Array3::from_shape_vec(shape, values).unwrap(), [1.0; 3])
}

fn values(volume: &Volume) -> Vec<f64> {
    let e = volume.extent();
    let mut out = Vec::new();
    for k in e[4]..=e[5] {
        for j in e[2]..=e[3] {
            for i in e[0]..=e[1] {
                out.push(volume.value_at(i, j, k, 0).unwrap());
            }
        }
    }
    out
}

fn unit_normal(theta: f64, phi: f64) -> DVec3 {
    DVec3::new(phi.sin() * theta.cos(), phi.sin() * theta.sin(), phi.cos())
}

proptest! {
    #[test]
    fn polygon_is_convex_and_on_the_box(
        lo in prop::array::uniform3(-10.0f64..0.0),
        size in prop::array::uniform3(0.5f64..10.0),
        theta in 0.0f64..std::f64::consts::TAU,
        phi in 0.05f64..std::f64::consts::PI - 0.05,
        offset in -1.0f64..1.0,
    ) {
        let bounds = [
            lo[0], lo[0] + size[0],
            lo[1], lo[1] + size[1],
            lo[2], lo[2] + size[2],
        ];
        let centre = DVec3::new(
            lo[0] + 0.5 * size[0],
            lo[1] + 0.5 * size[1],
            lo[2] + 0.5 * size[2],
        );
        let normal = unit_normal(theta, phi);
        let x = normal.any_orthonormal_vector();
        let y = normal.cross(x);
        let origin = centre + normal * offset * 0.5 * size[0].min(size[1]).min(size[2]);
        let axes = ResliceAxes::from_direction_cosines(x, y, normal, origin);

        let polygon = PolygonClipper::new(1e-9).compute(bounds, axes.inverse(), 0.0, 0.0);
        prop_assert!(polygon.len() >= 3);
        prop_assert!(polygon.is_convex(1e-9));
        prop_assert!(polygon.area() > 0.0);
        for point in polygon.points() {
            prop_assert_eq!(point.z, 0.0);
            let p = axes.matrix().transform_point3(*point);
            let mut on_face = false;
            for axis in 0..3 {
                prop_assert!(p[axis] >= bounds[2 * axis] - 1e-6);
                prop_assert!(p[axis] <= bounds[2 * axis + 1] + 1e-6);
                on_face |= (p[axis] - bounds[2 * axis]).abs() < 1e-6
                    || (p[axis] - bounds[2 * axis + 1]).abs() < 1e-6;
            }
            prop_assert!(on_face);
        }
    }

    #[test]
    fn slab_modes_are_ordered(
        data in prop::collection::vec(-100.0f64..100.0, 4 * 4 * 8),
        slices in 2u32..=5,
        z in 2.0f64..5.0,
    ) {
        let volume = random_volume(data, (8, 4, 4));
        let grid = OutputGrid::new([0, 3, 0, 3, 0, 0], [1.0; 3], [0.0; 3]);
        let run = |mode: SlabMode| {
            let mut engine = ResliceEngine::new();
            engine.set_interpolation_mode(InterpolationMode::Linear);
            engine.set_output_scalar_type(Some(ScalarType::F64));
            engine.set_output_grid(Some(grid));
            engine.reslice_axes_mut().set_origin(DVec3::new(0.0, 0.0, z));
            engine.set_slab_mode(mode);
            engine.set_slab_number_of_slices(slices).unwrap();
            values(&engine.execute(&volume).unwrap().image)
        };
        let min = run(SlabMode::Min);
        let max = run(SlabMode::Max);
        let mean = run(SlabMode::Mean);
        let sum = run(SlabMode::Sum);
        for i in 0..min.len() {
            prop_assert!(min[i] <= mean[i] + 1e-9);
            prop_assert!(mean[i] <= max[i] + 1e-9);
            prop_assert!((sum[i] - mean[i] * slices as f64).abs() < 1e-9);
        }
    }

    #[test]
    fn single_slice_slab_matches_plain_reslice(
        data in prop::collection::vec(-100.0f64..100.0, 4 * 4 * 4),
        z in 0.0f64..3.0,
        mode in prop_oneof![
            Just(SlabMode::Min),
            Just(SlabMode::Max),
            Just(SlabMode::Mean),
            Just(SlabMode::Sum),
        ],
    ) {
        let volume = random_volume(data, (4, 4, 4));
        let mut engine = ResliceEngine::new();
        engine.set_interpolation_mode(InterpolationMode::Cubic);
        engine.reslice_axes_mut().set_origin(DVec3::new(0.0, 0.0, z));
        engine.set_output_dimensionality(2).unwrap();
        let plain = values(&engine.execute(&volume).unwrap().image);
        engine.set_slab_mode(mode);
        engine.set_slab_number_of_slices(1).unwrap();
        let slab = values(&engine.execute(&volume).unwrap().image);
        prop_assert_eq!(plain, slab);
    }

    #[test]
    fn sliding_window_matches_direct_sampling(
        data in prop::collection::vec(-100.0f64..100.0, 5 * 6 * 7),
        spacing in prop::array::uniform2(0.3f64..3.0),
        origin in prop::array::uniform2(-1.0f64..1.0),
        z in 0.0f64..4.0,
        mode in prop_oneof![
            Just(InterpolationMode::Nearest),
            Just(InterpolationMode::Linear),
            Just(InterpolationMode::Cubic),
        ],
    ) {
        let volume = random_volume(data, (5, 6, 7));
        let grid = OutputGrid::new(
            [0, 8, 0, 8, 0, 0],
            [spacing[0], spacing[1], 1.0],
            [origin[0], origin[1], 0.0],
        );
        let run = |sliding: bool| {
            let mut engine = ResliceEngine::new();
            engine.set_interpolation_mode(mode);
            engine.set_output_grid(Some(grid));
            engine.set_reslice_axes(DMat4::from_translation(DVec3::new(0.0, 0.0, z)));
            engine.set_sliding_window(sliding);
            values(&engine.execute(&volume).unwrap().image)
        };
        let direct = run(false);
        let sliding = run(true);
        for (a, b) in direct.iter().zip(&sliding) {
            prop_assert!((a - b).abs() < 1e-10);
        }
    }
}
