//! Cameras and ray generation.

pub mod path;

pub use burn::tensor::{backend::Backend, Tensor, TensorData};
pub use path::*;

use bytemuck::cast_slice;
use rayon::iter::{IntoParallelIterator, ParallelIterator};

/// Pinhole intrinsics with the principal point at the image centre.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Intrinsics {
    /// Image height `H`.
    pub image_height: u32,
    /// Image width `W`.
    pub image_width: u32,
    /// Focal length in pixels.
    pub focal: f64,
}

/// A camera-to-world pose.
///
/// It is in **row-major order**, i.e., `M[row][col]`.
///
/// # Format
///
/// ```plaintext
/// [R_c2w | T_c2w]
/// ```
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Pose(pub [[f64; 4]; 3]);

/// Ray origins and directions in world space, one per pixel in row-major order.
///
/// The directions are unnormalized, their magnitude scales the depths.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Rays {
    pub origins: Vec<[f32; 3]>,
    pub directions: Vec<[f32; 3]>,
}

/// Rays uploaded for rendering.
#[derive(Clone, Debug)]
pub struct RayBatch<B: Backend> {
    /// `[R, 3]`
    pub origins: Tensor<B, 2>,
    /// `[R, 3]`
    pub directions: Tensor<B, 2>,
    /// Normalized world-space directions before any remapping.
    ///
    /// `[R, 3]`
    pub view_dirs: Tensor<B, 2>,
}

impl Intrinsics {
    #[inline]
    pub const fn new(
        image_height: u32,
        image_width: u32,
        focal: f64,
    ) -> Self {
        Self {
            image_height,
            image_width,
            focal,
        }
    }

    /// Returns the calibration matrix `K`.
    ///
    /// It is in **row-major order**, i.e., `K[row][col]`.
    #[inline]
    pub fn matrix(&self) -> [[f64; 3]; 3] {
        let f = self.focal;
        [
            [f, 0.0, 0.5 * self.image_width as f64],
            [0.0, f, 0.5 * self.image_height as f64],
            [0.0, 0.0, 1.0],
        ]
    }

    /// Pixel count `H * W`.
    #[inline]
    pub const fn pixel_count(&self) -> usize {
        self.image_height as usize * self.image_width as usize
    }

    /// Shrinks the image and the focal length by `factor`.
    pub fn downsample(
        &self,
        factor: u32,
    ) -> Self {
        if factor <= 1 {
            return *self;
        }
        Self {
            image_height: self.image_height / factor,
            image_width: self.image_width / factor,
            focal: self.focal / factor as f64,
        }
    }
}

impl Pose {
    /// Takes the upper 3 rows of a homogeneous transform.
    #[inline]
    pub fn from_matrix(matrix: &[[f64; 4]; 4]) -> Self {
        Self([matrix[0], matrix[1], matrix[2]])
    }

    #[inline]
    pub fn rotation(&self) -> [[f64; 3]; 3] {
        let m = &self.0;
        [
            [m[0][0], m[0][1], m[0][2]],
            [m[1][0], m[1][1], m[1][2]],
            [m[2][0], m[2][1], m[2][2]],
        ]
    }

    /// Camera position in world space.
    #[inline]
    pub fn translation(&self) -> [f64; 3] {
        let m = &self.0;
        [m[0][3], m[1][3], m[2][3]]
    }
}

impl Default for Pose {
    #[inline]
    fn default() -> Self {
        Self([
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
        ])
    }
}

/// Generates one ray per pixel.
///
/// Image rows grow downwards while the camera `+Y` points up, and the camera
/// looks along `-Z`.
pub fn get_rays(
    image_height: u32,
    image_width: u32,
    k: &[[f64; 3]; 3],
    pose: &Pose,
) -> Rays {
    let width = image_width as usize;
    let pixel_count = image_height as usize * width;
    let r = pose.rotation();
    let t = pose.translation();
    let origin = [t[0] as f32, t[1] as f32, t[2] as f32];

    let directions = (0..pixel_count)
        .into_par_iter()
        .map(|index| {
            let row = (index / width) as f64;
            let col = (index % width) as f64;
            let d = [
                (col - k[0][2]) / k[0][0],
                -(row - k[1][2]) / k[1][1],
                -1.0,
            ];
            [
                (r[0][0] * d[0] + r[0][1] * d[1] + r[0][2] * d[2]) as f32,
                (r[1][0] * d[0] + r[1][1] * d[1] + r[1][2] * d[2]) as f32,
                (r[2][0] * d[0] + r[2][1] * d[1] + r[2][2] * d[2]) as f32,
            ]
        })
        .collect();

    Rays {
        origins: vec![origin; pixel_count],
        directions,
    }
}

impl Rays {
    #[inline]
    pub fn len(&self) -> usize {
        self.origins.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.origins.is_empty()
    }

    /// Gathers the rays at `indices`.
    pub fn select(
        &self,
        indices: &[usize],
    ) -> Self {
        Self {
            origins: indices.iter().map(|&i| self.origins[i]).collect(),
            directions: indices.iter().map(|&i| self.directions[i]).collect(),
        }
    }

    /// The rays in `range`.
    pub fn slice(
        &self,
        range: std::ops::Range<usize>,
    ) -> Self {
        Self {
            origins: self.origins[range.to_owned()].to_vec(),
            directions: self.directions[range].to_vec(),
        }
    }

    /// Remaps the rays into normalized device coordinates of a forward-facing
    /// capture, after shifting the origins onto the plane `z = -near`.
    ///
    /// The depth range `[near, inf)` maps to `[0, 1]`.
    pub fn to_ndc(
        &self,
        intrinsics: &Intrinsics,
        near: f32,
    ) -> Self {
        let scale_x = -2.0 * intrinsics.focal as f32 / intrinsics.image_width as f32;
        let scale_y = -2.0 * intrinsics.focal as f32 / intrinsics.image_height as f32;

        let (origins, directions) = self
            .origins
            .iter()
            .zip(&self.directions)
            .map(|(o, d)| {
                let t = -(near + o[2]) / d[2];
                let o = [o[0] + t * d[0], o[1] + t * d[1], o[2] + t * d[2]];
                let origin = [
                    scale_x * o[0] / o[2],
                    scale_y * o[1] / o[2],
                    1.0 + 2.0 * near / o[2],
                ];
                let direction = [
                    scale_x * (d[0] / d[2] - o[0] / o[2]),
                    scale_y * (d[1] / d[2] - o[1] / o[2]),
                    -2.0 * near / o[2],
                ];
                (origin, direction)
            })
            .unzip();

        Self {
            origins,
            directions,
        }
    }

    /// Uploads the rays, remapping them into NDC when `ndc` is given.
    ///
    /// The view directions always come from the world-space directions.
    pub fn to_batch<B: Backend>(
        &self,
        ndc: Option<&Intrinsics>,
        device: &B::Device,
    ) -> RayBatch<B> {
        let count = self.len();
        let view_dirs = self
            .directions
            .iter()
            .map(|d| {
                let norm = (d[0] * d[0] + d[1] * d[1] + d[2] * d[2]).sqrt().max(1e-12);
                [d[0] / norm, d[1] / norm, d[2] / norm]
            })
            .collect::<Vec<_>>();
        let remapped = ndc.map(|intrinsics| self.to_ndc(intrinsics, 1.0));
        let rays = remapped.as_ref().unwrap_or(self);

        let upload = |values: &[[f32; 3]]| {
            Tensor::<B, 2>::from_data(
                TensorData::new(cast_slice::<[f32; 3], f32>(values).to_vec(), [count, 3]),
                device,
            )
        };

        RayBatch {
            origins: upload(&rays.origins),
            directions: upload(&rays.directions),
            view_dirs: upload(&view_dirs),
        }
    }
}

impl<B: Backend> RayBatch<B> {
    /// Ray count `R`.
    #[inline]
    pub fn len(&self) -> usize {
        self.origins.dims()[0]
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
