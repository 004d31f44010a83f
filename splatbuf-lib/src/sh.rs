use std::array;

use glam::{Mat3A, Vec3A};

/// Real spherical-harmonic rotation for bands 1 and 2, derived from the 3x3
/// part of a world transform. The matrix is assumed to be a rotation;
/// orthogonality is not verified.
///
/// Band-1 inputs and outputs are RGB 3-vectors, one per coefficient: input k
/// gathers coefficient k of the R, G and B channels. Band 2 works the same
/// way over five coefficients. The band-2 rows are built from pairwise
/// products of the band-1 rows (Ivanic-Ruedenberg recursion specialized to
/// l = 2); the exact expressions are load-bearing for bit-comparable output.
#[derive(Debug, Clone)]
pub struct ShRotation {
    sh1: [[f32; 3]; 3],
    sh2: [[f32; 5]; 5],
}

impl ShRotation {
    pub fn from_matrix(matrix: &Mat3A) -> Self {
        // Band-1 rows, indexed column-major into the source matrix.
        let sh11 = [matrix.y_axis.y, -matrix.z_axis.y, matrix.x_axis.y];
        let sh12 = [-matrix.y_axis.z, matrix.z_axis.z, -matrix.x_axis.z];
        let sh13 = [matrix.y_axis.x, -matrix.z_axis.x, matrix.x_axis.x];
        let sh2 = band2_rows(&sh11, &sh12, &sh13);
        Self {
            sh1: [sh11, sh12, sh13],
            sh2,
        }
    }

    pub fn rotate_band1(&self, input: &[Vec3A; 3]) -> [Vec3A; 3] {
        array::from_fn(|row| {
            let [a, b, c] = self.sh1[row];
            input[0] * a + input[1] * b + input[2] * c
        })
    }

    pub fn rotate_band2(&self, input: &[Vec3A; 5]) -> [Vec3A; 5] {
        array::from_fn(|row| {
            let [a, b, c, d, e] = self.sh2[row];
            input[0] * a + input[1] * b + input[2] * c + input[3] * d + input[4] * e
        })
    }
}

fn band2_rows(sh11: &[f32; 3], sh12: &[f32; 3], sh13: &[f32; 3]) -> [[f32; 5]; 5] {
    let k14 = (1.0f32 / 4.0).sqrt();
    let k34 = (3.0f32 / 4.0).sqrt();
    let k13 = (1.0f32 / 3.0).sqrt();
    let k43 = (4.0f32 / 3.0).sqrt();
    let k112 = (1.0f32 / 12.0).sqrt();

    let sh21 = [
        k14 * ((sh13[2] * sh11[0] + sh13[0] * sh11[2]) + (sh11[2] * sh13[0] + sh11[0] * sh13[2])),
        sh13[1] * sh11[0] + sh11[1] * sh13[0],
        k34 * (sh13[1] * sh11[1] + sh11[1] * sh13[1]),
        sh13[1] * sh11[2] + sh11[1] * sh13[2],
        k14 * ((sh13[2] * sh11[2] - sh13[0] * sh11[0]) + (sh11[2] * sh13[2] - sh11[0] * sh13[0])),
    ];

    let sh22 = [
        k14 * ((sh12[2] * sh11[0] + sh12[0] * sh11[2]) + (sh11[2] * sh12[0] + sh11[0] * sh12[2])),
        sh12[1] * sh11[0] + sh11[1] * sh12[0],
        k34 * (sh12[1] * sh11[1] + sh11[1] * sh12[1]),
        sh12[1] * sh11[2] + sh11[1] * sh12[2],
        k14 * ((sh12[2] * sh11[2] - sh12[0] * sh11[0]) + (sh11[2] * sh12[2] - sh11[0] * sh12[0])),
    ];

    let sh23 = [
        k13 * (sh12[2] * sh12[0] + sh12[0] * sh12[2])
            - k112 * ((sh13[2] * sh13[0] + sh13[0] * sh13[2]) + (sh11[2] * sh11[0] + sh11[0] * sh11[2])),
        k43 * sh12[1] * sh12[0] - k13 * (sh13[1] * sh13[0] + sh11[1] * sh11[0]),
        sh12[1] * sh12[1] - k14 * (sh13[1] * sh13[1] + sh11[1] * sh11[1]),
        k43 * sh12[1] * sh12[2] - k13 * (sh13[1] * sh13[2] + sh11[1] * sh11[2]),
        k13 * (sh12[2] * sh12[2] - sh12[0] * sh12[0])
            - k112 * ((sh13[2] * sh13[2] - sh13[0] * sh13[0]) + (sh11[2] * sh11[2] - sh11[0] * sh11[0])),
    ];

    let sh24 = [
        k14 * ((sh12[2] * sh13[0] + sh12[0] * sh13[2]) + (sh13[2] * sh12[0] + sh13[0] * sh12[2])),
        sh12[1] * sh13[0] + sh13[1] * sh12[0],
        k34 * (sh12[1] * sh13[1] + sh13[1] * sh12[1]),
        sh12[1] * sh13[2] + sh13[1] * sh12[2],
        k14 * ((sh12[2] * sh13[2] - sh12[0] * sh13[0]) + (sh13[2] * sh12[2] - sh13[0] * sh12[0])),
    ];

    let sh25 = [
        k14 * ((sh13[2] * sh13[0] + sh13[0] * sh13[2]) - (sh11[2] * sh11[0] + sh11[0] * sh11[2])),
        sh13[1] * sh13[0] - sh11[1] * sh11[0],
        k34 * (sh13[1] * sh13[1] - sh11[1] * sh11[1]),
        sh13[1] * sh13[2] - sh11[1] * sh11[2],
        k14 * ((sh13[2] * sh13[2] - sh13[0] * sh13[0]) - (sh11[2] * sh11[2] - sh11[0] * sh11[0])),
    ];

    [sh21, sh22, sh23, sh24, sh25]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::{FRAC_PI_2, FRAC_PI_4, FRAC_PI_6};

    fn assert_vec_near(a: Vec3A, b: Vec3A, eps: f32) {
        assert!((a - b).abs().max_element() <= eps, "{a:?} vs {b:?}");
    }

    #[test]
    fn identity_matrix_passes_coefficients_through() {
        let rotation = ShRotation::from_matrix(&Mat3A::IDENTITY);
        let band1 = [
            Vec3A::new(0.1, 0.4, 0.7),
            Vec3A::new(0.2, 0.5, 0.8),
            Vec3A::new(0.3, 0.6, 0.9),
        ];
        let out = rotation.rotate_band1(&band1);
        for k in 0..3 {
            assert_eq!(out[k], band1[k]);
        }

        let band2 = [
            Vec3A::new(0.11, 0.21, 0.31),
            Vec3A::new(0.12, 0.22, 0.32),
            Vec3A::new(0.13, 0.23, 0.33),
            Vec3A::new(0.14, 0.24, 0.34),
            Vec3A::new(0.15, 0.25, 0.35),
        ];
        let out = rotation.rotate_band2(&band2);
        for k in 0..5 {
            assert_eq!(out[k], band2[k]);
        }
    }

    #[test]
    fn z_rotation_maps_x_lobe_onto_y_lobe() {
        let rotation = ShRotation::from_matrix(&Mat3A::from_rotation_z(FRAC_PI_2));
        let input = [Vec3A::new(1.0, 0.0, 0.0), Vec3A::ZERO, Vec3A::ZERO];
        let out = rotation.rotate_band1(&input);
        assert_vec_near(out[0], Vec3A::ZERO, 1e-6);
        assert_vec_near(out[1], Vec3A::ZERO, 1e-6);
        assert_vec_near(out[2], Vec3A::new(-1.0, 0.0, 0.0), 1e-6);
    }

    #[test]
    fn rotation_composes() {
        let m1 = Mat3A::from_rotation_z(FRAC_PI_6);
        let m2 = Mat3A::from_rotation_x(FRAC_PI_4);
        let composed = ShRotation::from_matrix(&(m1 * m2));
        let first = ShRotation::from_matrix(&m2);
        let second = ShRotation::from_matrix(&m1);

        let band1 = [
            Vec3A::new(0.3, -0.2, 0.9),
            Vec3A::new(-0.6, 0.1, 0.4),
            Vec3A::new(0.5, 0.8, -0.7),
        ];
        let direct = composed.rotate_band1(&band1);
        let chained = second.rotate_band1(&first.rotate_band1(&band1));
        for k in 0..3 {
            assert_vec_near(direct[k], chained[k], 1e-5);
        }

        let band2 = [
            Vec3A::new(0.25, -0.15, 0.05),
            Vec3A::new(-0.35, 0.45, 0.55),
            Vec3A::new(0.65, -0.75, 0.85),
            Vec3A::new(0.1, 0.2, -0.3),
            Vec3A::new(-0.4, 0.5, 0.6),
        ];
        let direct = composed.rotate_band2(&band2);
        let chained = second.rotate_band2(&first.rotate_band2(&band2));
        for k in 0..5 {
            assert_vec_near(direct[k], chained[k], 1e-5);
        }
    }

    #[test]
    fn band2_rows_are_orthonormal_for_rotations() {
        let rotation = ShRotation::from_matrix(&Mat3A::from_rotation_y(0.9));
        for row in 0..5 {
            let mut dot = 0.0;
            for k in 0..5 {
                dot += rotation.sh2[row][k] * rotation.sh2[row][k];
            }
            assert!((dot - 1.0).abs() < 1e-5, "row {row} norm^2 {dot}");
        }
    }
}
