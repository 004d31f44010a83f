use glam::{Quat, Vec3A};
use smallvec::SmallVec;

use crate::layout::sh_components_for_degree;

// Defaults applied by the writer when optional attributes are absent.
pub const DEFAULT_SCALE: f32 = 0.01;
pub const DEFAULT_RGB: [u8; 3] = [255, 0, 0];
pub const DEFAULT_OPACITY: u8 = 255;

/// One uncompressed splat as produced by a source parser.
///
/// SH coefficients are channel-major per degree band: R0..Rk, G0..Gk, B0..Bk
/// for band 1 (k = 2), followed by the same grouping for band 2 (R3..R7 etc.).
/// Missing trailing components read as zero.
#[derive(Debug, Clone, Default)]
pub struct Splat {
    pub center: Vec3A,
    pub scale: Option<Vec3A>,
    pub rotation: Option<Quat>,
    pub rgb: Option<[u8; 3]>,
    pub opacity: Option<u8>,
    pub sh: SmallVec<[f32; 24]>,
}

impl Splat {
    pub fn new(center: Vec3A, scale: Vec3A, rotation: Quat, rgb: [u8; 3], opacity: u8) -> Self {
        Self {
            center,
            scale: Some(scale),
            rotation: Some(rotation),
            rgb: Some(rgb),
            opacity: Some(opacity),
            sh: SmallVec::new(),
        }
    }

    pub fn with_sh(mut self, sh: &[f32]) -> Self {
        self.sh = SmallVec::from_slice(sh);
        self
    }

    pub fn sh_component(&self, index: usize) -> f32 {
        self.sh.get(index).copied().unwrap_or(0.0)
    }

    pub fn opacity_or_default(&self) -> u8 {
        self.opacity.unwrap_or(DEFAULT_OPACITY)
    }
}

/// An uncompressed splat list plus its SH degree; one input array becomes one
/// section of the written buffer.
#[derive(Debug, Clone, Default)]
pub struct SplatArray {
    pub sh_degree: usize,
    pub splats: Vec<Splat>,
}

impl SplatArray {
    pub fn new(sh_degree: usize) -> Self {
        assert!(sh_degree <= 2, "SH degree must be between 0 and 2");
        Self {
            sh_degree,
            splats: Vec::new(),
        }
    }

    pub fn new_capacity(capacity: usize, sh_degree: usize) -> Self {
        let mut array = Self::new(sh_degree);
        array.splats.reserve(capacity);
        array
    }

    pub fn len(&self) -> usize {
        self.splats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.splats.is_empty()
    }

    pub fn sh_components(&self) -> usize {
        sh_components_for_degree(self.sh_degree)
    }

    pub fn push_splat(&mut self, splat: Splat) -> usize {
        let index = self.splats.len();
        self.splats.push(splat);
        index
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_sh_components_read_as_zero() {
        let splat = Splat::new(
            Vec3A::ZERO,
            Vec3A::ONE,
            Quat::IDENTITY,
            [10, 20, 30],
            200,
        )
        .with_sh(&[0.5, -0.5]);
        assert_eq!(splat.sh_component(0), 0.5);
        assert_eq!(splat.sh_component(1), -0.5);
        assert_eq!(splat.sh_component(8), 0.0);
    }
}
