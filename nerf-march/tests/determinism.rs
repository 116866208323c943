//! Repeating an operation from the same state gives bit-identical results.

use euclid::size2;

use nerf_march::config::NerfConfig;
use nerf_march::math::{Aab, Rgb};
use nerf_march::testing::{NoiseField, orbit_cameras, sphere_dataset};
use nerf_march::tracer::{RenderBuffer, Tracer};
use nerf_march::training::train_nerf;
use nerf_march::{NerfContext, NetworkOutput, VoxelField};

fn config() -> NerfConfig {
    let mut config = NerfConfig::default();
    config.grid.grid_size = 32;
    config.grid.steps_per_unit = 128;
    config.render.samples_per_pixel = 2;
    config
}

#[test]
fn render_with_frozen_field_is_bit_identical() {
    let dataset = sphere_dataset(2, 8, 0.3, Rgb::ONE, Rgb::ZERO);
    let ctx = NerfContext::new(dataset, NoiseField::new(3), config()).unwrap();
    let camera = &orbit_cameras(5, 24, 2.5, 0.7)[2];

    let render = || {
        let mut tracer = Tracer::new();
        let mut buffer = RenderBuffer::new(size2(1, 1));
        for _ in 0..3 {
            ctx.render(&mut tracer, camera, &mut buffer).unwrap();
        }
        buffer
    };
    let first = render();
    let second = render();
    assert_eq!(first.spp(), 6);
    assert!(first == second);
}

#[test]
fn training_then_rendering_is_bit_identical() {
    let run = || {
        let dataset = sphere_dataset(3, 8, 0.25, Rgb::new(0.2, 0.6, 0.9), Rgb::ONE);
        let field = VoxelField::new(8, Aab::UNIT_CUBE, NetworkOutput::default());
        let mut ctx = NerfContext::new(dataset, field, config()).unwrap();
        let metrics = train_nerf(&mut ctx, 2048, 4).unwrap();

        let mut tracer = Tracer::new();
        let mut buffer = RenderBuffer::new(size2(1, 1));
        ctx.render_training_view(&mut tracer, 1, &mut buffer).unwrap();
        (metrics, buffer.pixels())
    };
    let (first_metrics, first_pixels) = run();
    let (second_metrics, second_pixels) = run();
    assert_eq!(first_metrics, second_metrics);
    assert!(first_pixels == second_pixels);
}
