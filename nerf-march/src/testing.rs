//! Analytic fields and synthetic datasets for tests and benchmarks.
//! Not part of the stable API.

#![allow(missing_docs)]

use euclid::{point3, size2, vec3};

use crate::camera::{Aperture, Camera};
use crate::dataset::{Dataset, TrainingImage};
use crate::field::{NetworkInput, NetworkOutput, RadianceField};
use crate::math::{CameraPose, FreePoint, Rgb};
use crate::raycast::Ray;

/// Field with the same raw output everywhere.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ConstantField {
    output: NetworkOutput,
}

impl ConstantField {
    pub fn new(rgb: [f32; 3], density: f32) -> Self {
        Self {
            output: NetworkOutput::new(rgb, density),
        }
    }
}

impl RadianceField for ConstantField {
    fn evaluate(&self, inputs: &[NetworkInput], outputs: &mut [NetworkOutput]) {
        for (input, output) in inputs.iter().zip(outputs) {
            if input.is_used() {
                *output = self.output;
            }
        }
    }
}

/// Solid ball of constant raw color and density, with zero raw density outside.
///
/// Intended for use with [`Activation::None`](crate::Activation::None) on density.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SphereField {
    pub center: FreePoint,
    pub radius: f32,
    pub rgb: [f32; 3],
    pub density: f32,
}

impl SphereField {
    pub fn new(center: FreePoint, radius: f32, rgb: [f32; 3], density: f32) -> Self {
        Self {
            center,
            radius,
            rgb,
            density,
        }
    }

    fn output_at(&self, position: FreePoint) -> NetworkOutput {
        if (position - self.center).square_length() <= self.radius * self.radius {
            NetworkOutput::new(self.rgb, self.density)
        } else {
            NetworkOutput::new(self.rgb, 0.0)
        }
    }
}

impl RadianceField for SphereField {
    fn evaluate(&self, inputs: &[NetworkInput], outputs: &mut [NetworkOutput]) {
        for (input, output) in inputs.iter().zip(outputs) {
            if input.is_used() {
                *output = self.output_at(input.position);
            }
        }
    }
}

/// Deterministic, irregular raw density in roughly `[-4, 4]`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NoiseField {
    frequency: f32,
}

impl NoiseField {
    pub fn new(seed: u32) -> Self {
        Self {
            frequency: 7.0 + (seed % 97) as f32 * 0.37,
        }
    }
}

impl RadianceField for NoiseField {
    fn evaluate(&self, inputs: &[NetworkInput], outputs: &mut [NetworkOutput]) {
        for (input, output) in inputs.iter().zip(outputs) {
            let p = input.position.to_vector() * self.frequency;
            let density = 4.0 * (p.x.sin() * (1.3 * p.y).cos() + (0.7 * p.z + p.x).sin()) * 0.5;
            *output = NetworkOutput::new([p.x.sin(), p.y.sin(), p.z.sin()], density);
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// `count` cameras on a horizontal circle of radius `distance` around the unit cube's
/// center, all looking at it.
pub fn orbit_cameras(count: usize, resolution: u32, distance: f32, fov_y: f32) -> Vec<Camera> {
    let center = point3(0.5, 0.5, 0.5);
    (0..count)
        .map(|i| {
            let angle = i as f32 / count as f32 * core::f32::consts::TAU;
            let position = center + vec3(angle.sin(), 0.3, -angle.cos()) * distance;
            Camera::from_fov_y(
                CameraPose::look_at(position, center, vec3(0.0, 1.0, 0.0)),
                size2(resolution, resolution),
                fov_y,
            )
        })
        .collect()
}

/// Distance along `ray` (unit direction) to the nearer intersection with a sphere.
pub fn ray_sphere(ray: &Ray, center: FreePoint, radius: f32) -> Option<f32> {
    let oc = ray.origin - center;
    let b = oc.dot(ray.direction);
    let c = oc.square_length() - radius * radius;
    let discriminant = b * b - c;
    if discriminant < 0.0 {
        return None;
    }
    let t = -b - discriminant.sqrt();
    (t >= 0.0).then_some(t)
}

/// Image of an opaque uniformly colored sphere over a uniform background, sampled at pixel
/// centers.
pub fn sphere_image(
    camera: &Camera,
    center: FreePoint,
    radius: f32,
    color: Rgb,
    background: Rgb,
) -> TrainingImage {
    let mut pixels = Vec::with_capacity(camera.pixel_count());
    for y in 0..camera.resolution.height {
        for x in 0..camera.resolution.width {
            let uv = camera.pixel_uv(x, y, euclid::vec2(0.5, 0.5));
            let ray = camera.ray_for_uv(uv, None, Aperture::default(), euclid::vec2(0.5, 0.5));
            let rgb = match ray_sphere(&ray.ray, center, radius) {
                Some(_) => color,
                None => background,
            };
            pixels.push(rgb.with_alpha_one());
        }
    }
    TrainingImage::new(camera.clone(), pixels)
}

/// Dataset of `count` views of a sphere at the unit cube's center.
pub fn sphere_dataset(
    count: usize,
    resolution: u32,
    radius: f32,
    color: Rgb,
    background: Rgb,
) -> Dataset {
    let images = orbit_cameras(count, resolution, 2.0, 0.6)
        .iter()
        .map(|camera| sphere_image(camera, point3(0.5, 0.5, 0.5), radius, color, background))
        .collect();
    match Dataset::new(images, 1) {
        Ok(dataset) => dataset,
        Err(error) => panic!("synthetic dataset invalid: {error}"),
    }
}
