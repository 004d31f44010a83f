use glam::{Mat3A, Quat, Vec3A};
use half::f16;

/// Symmetric 3x3 covariance, stored as the six upper-triangular elements in
/// the order (0,0), (1,0), (2,0), (1,1), (2,1), (2,2).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SymMat3([f32; 6]);

impl SymMat3 {
    pub fn new(elements: [f32; 6]) -> Self {
        Self(elements)
    }

    /// Covariance of a splat with the given per-axis scale and orientation:
    /// with M = R*S this is M*M^T, accumulated as the sum of outer products
    /// of the scaled rotation columns.
    pub fn from_scale_rotation(scale: Vec3A, quat: Quat) -> Self {
        let rot = Mat3A::from_quat(quat);
        let sx = rot.x_axis * scale.x;
        let sy = rot.y_axis * scale.y;
        let sz = rot.z_axis * scale.z;

        let xx = sx.x * sx.x + sy.x * sy.x + sz.x * sz.x;
        let xy = sx.x * sx.y + sy.x * sy.y + sz.x * sz.y;
        let xz = sx.x * sx.z + sy.x * sy.z + sz.x * sz.z;
        let yy = sx.y * sx.y + sy.y * sy.y + sz.y * sz.y;
        let yz = sx.y * sx.z + sy.y * sy.z + sz.y * sz.z;
        let zz = sx.z * sx.z + sy.z * sy.z + sz.z * sz.z;

        Self([xx, xy, xz, yy, yz, zz])
    }

    pub fn xx(&self) -> f32 {
        self.0[0]
    }
    pub fn xy(&self) -> f32 {
        self.0[1]
    }
    pub fn xz(&self) -> f32 {
        self.0[2]
    }
    pub fn yy(&self) -> f32 {
        self.0[3]
    }
    pub fn yz(&self) -> f32 {
        self.0[4]
    }
    pub fn zz(&self) -> f32 {
        self.0[5]
    }

    pub fn to_mat3(&self) -> Mat3A {
        Mat3A::from_cols(
            Vec3A::new(self.xx(), self.xy(), self.xz()),
            Vec3A::new(self.xy(), self.yy(), self.yz()),
            Vec3A::new(self.xz(), self.yz(), self.zz()),
        )
    }

    /// Conjugates by the 3x3 part of a world transform: T * S * T^T.
    pub fn transformed(&self, transform: &Mat3A) -> Self {
        let conjugated = *transform * self.to_mat3() * transform.transpose();
        Self([
            conjugated.x_axis.x,
            conjugated.x_axis.y,
            conjugated.x_axis.z,
            conjugated.y_axis.y,
            conjugated.y_axis.z,
            conjugated.z_axis.z,
        ])
    }

    pub fn to_array(&self) -> [f32; 6] {
        self.0
    }

    pub fn to_f16_array(&self) -> [f16; 6] {
        self.0.map(f16::from_f32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::FRAC_PI_2;

    fn quadratic_form(cov: &SymMat3, v: Vec3A) -> f32 {
        (cov.to_mat3() * v).dot(v)
    }

    #[test]
    fn axis_aligned_covariance_is_squared_scale() {
        let cov = SymMat3::from_scale_rotation(Vec3A::new(1.0, 2.0, 3.0), Quat::IDENTITY);
        assert_eq!(cov.to_array(), [1.0, 0.0, 0.0, 4.0, 0.0, 9.0]);
    }

    #[test]
    fn rotation_permutes_principal_axes() {
        let cov = SymMat3::from_scale_rotation(
            Vec3A::new(1.0, 2.0, 3.0),
            Quat::from_rotation_z(FRAC_PI_2),
        );
        // x and y variances swap under a 90-degree z rotation
        assert!((cov.xx() - 4.0).abs() < 1e-5);
        assert!((cov.yy() - 1.0).abs() < 1e-5);
        assert!((cov.zz() - 9.0).abs() < 1e-5);
        assert!(cov.xy().abs() < 1e-5);
    }

    #[test]
    fn covariance_is_positive_semidefinite() {
        let quats = [
            Quat::from_xyzw(0.1, 0.2, 0.3, 0.93).normalize(),
            Quat::from_xyzw(-0.5, 0.5, -0.5, 0.5),
            Quat::from_rotation_x(1.1),
        ];
        let probes = [
            Vec3A::X,
            Vec3A::Y,
            Vec3A::Z,
            Vec3A::new(1.0, -2.0, 0.5),
            Vec3A::new(-0.3, 0.7, -1.9),
        ];
        for quat in quats {
            let cov = SymMat3::from_scale_rotation(Vec3A::new(0.5, 1.5, 2.5), quat);
            for probe in probes {
                assert!(quadratic_form(&cov, probe) >= 0.0);
            }
        }
    }

    #[test]
    fn conjugation_matches_transformed_splat() {
        let scale = Vec3A::new(0.5, 1.0, 2.0);
        let quat = Quat::from_rotation_y(0.7);
        let transform = Mat3A::from_rotation_z(0.4);

        let direct = SymMat3::from_scale_rotation(scale, Quat::from_mat3a(&(transform * Mat3A::from_quat(quat))));
        let conjugated = SymMat3::from_scale_rotation(scale, quat).transformed(&transform);
        let [a, b] = [direct.to_array(), conjugated.to_array()];
        for i in 0..6 {
            assert!((a[i] - b[i]).abs() < 1e-5, "element {i}: {} vs {}", a[i], b[i]);
        }
    }
}
