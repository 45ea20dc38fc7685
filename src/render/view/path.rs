//! Camera paths around the scene.

pub use super::Pose;

/// Frame count of [`spiral_path`].
pub const SPIRAL_FRAME_COUNT: usize = 40;

/// Elevation of [`spiral_path`] in degrees.
pub const SPIRAL_PHI: f64 = -30.0;

/// Orbit radius of [`spiral_path`].
pub const SPIRAL_RADIUS: f64 = 4.0;

/// A pose on a sphere around the origin, looking at the origin.
///
/// `theta` is the azimuth and `phi` the elevation, both in degrees.
/// The world axes follow the Blender convention (`+Z` up).
pub fn spherical_pose(
    theta: f64,
    phi: f64,
    radius: f64,
) -> Pose {
    let (sin_phi, cos_phi) = phi.to_radians().sin_cos();
    let (sin_theta, cos_theta) = theta.to_radians().sin_cos();

    let translate = [
        [1.0, 0.0, 0.0, 0.0],
        [0.0, 1.0, 0.0, 0.0],
        [0.0, 0.0, 1.0, radius],
        [0.0, 0.0, 0.0, 1.0],
    ];
    let rotate_phi = [
        [1.0, 0.0, 0.0, 0.0],
        [0.0, cos_phi, -sin_phi, 0.0],
        [0.0, sin_phi, cos_phi, 0.0],
        [0.0, 0.0, 0.0, 1.0],
    ];
    let rotate_theta = [
        [cos_theta, 0.0, -sin_theta, 0.0],
        [0.0, 1.0, 0.0, 0.0],
        [sin_theta, 0.0, cos_theta, 0.0],
        [0.0, 0.0, 0.0, 1.0],
    ];
    let swap_axes = [
        [-1.0, 0.0, 0.0, 0.0],
        [0.0, 0.0, 1.0, 0.0],
        [0.0, 1.0, 0.0, 0.0],
        [0.0, 0.0, 0.0, 1.0],
    ];

    let c2w = matmul(&rotate_phi, &translate);
    let c2w = matmul(&rotate_theta, &c2w);
    let c2w = matmul(&swap_axes, &c2w);
    Pose::from_matrix(&c2w)
}

/// An orbit of [`SPIRAL_FRAME_COUNT`] poses with the azimuth over `[-180, 180)`.
pub fn spiral_path(frame_count: usize) -> Vec<Pose> {
    let step = 360.0 / frame_count.max(1) as f64;
    (0..frame_count)
        .map(|index| spherical_pose(-180.0 + step * index as f64, SPIRAL_PHI, SPIRAL_RADIUS))
        .collect()
}

fn matmul(
    lhs: &[[f64; 4]; 4],
    rhs: &[[f64; 4]; 4],
) -> [[f64; 4]; 4] {
    let mut output = [[0.0; 4]; 4];
    for row in 0..4 {
        for col in 0..4 {
            output[row][col] = (0..4).map(|k| lhs[row][k] * rhs[k][col]).sum();
        }
    }
    output
}
