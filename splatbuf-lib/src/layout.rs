/// Per-splat field sizes for one compression level.
///
/// Level 0 stores every numeric field as f32; level 1 stores centers as
/// bucket-relative quantized u16 and everything else (except color) as f16.
pub struct LevelLayout {
    pub bytes_per_center: usize,
    pub bytes_per_scale: usize,
    pub bytes_per_rotation: usize,
    pub bytes_per_color: usize,
    pub bytes_per_sh_component: usize,
    pub scale_range: u32,
}

pub const LEVEL_LAYOUTS: [LevelLayout; 2] = [
    LevelLayout {
        bytes_per_center: 12,
        bytes_per_scale: 12,
        bytes_per_rotation: 16,
        bytes_per_color: 4,
        bytes_per_sh_component: 4,
        scale_range: 1,
    },
    LevelLayout {
        bytes_per_center: 6,
        bytes_per_scale: 6,
        bytes_per_rotation: 8,
        bytes_per_color: 4,
        bytes_per_sh_component: 2,
        scale_range: 32767,
    },
];

pub const MAX_COMPRESSION_LEVEL: u16 = 1;
pub const MAX_SH_DEGREE: u16 = 2;

// Element offsets of the scale and rotation fields, in units of the field
// width (4 bytes at level 0, 2 bytes at level 1).
pub const SCALE_OFFSET_ELEMENTS: usize = 3;
pub const ROTATION_OFFSET_ELEMENTS: usize = 6;

pub fn sh_components_for_degree(sh_degree: usize) -> usize {
    3 * ((sh_degree + 1) * (sh_degree + 1) - 1)
}

/// Byte layout of a single splat for a (compression level, SH degree) pair.
///
/// Field order within a splat is center, scale, rotation, color, SH; all
/// fields are naturally aligned within their widths.
#[derive(Debug, Clone, Copy)]
pub struct SplatLayout {
    pub compression_level: usize,
    pub sh_degree: usize,
    pub bytes_per_center: usize,
    pub bytes_per_scale: usize,
    pub bytes_per_rotation: usize,
    pub bytes_per_color: usize,
    pub bytes_per_sh_component: usize,
    pub sh_components_per_splat: usize,
    pub sh_bytes_per_splat: usize,
    pub bytes_per_splat: usize,
    pub scale_offset_bytes: usize,
    pub rotation_offset_bytes: usize,
    pub color_offset_bytes: usize,
    pub sh_offset_bytes: usize,
    pub scale_range: u32,
}

impl SplatLayout {
    pub fn new(compression_level: usize, sh_degree: usize) -> Self {
        assert!(compression_level <= MAX_COMPRESSION_LEVEL as usize);
        assert!(sh_degree <= MAX_SH_DEGREE as usize);
        let level = &LEVEL_LAYOUTS[compression_level];
        let sh_components_per_splat = sh_components_for_degree(sh_degree);
        let sh_bytes_per_splat = sh_components_per_splat * level.bytes_per_sh_component;
        let scale_offset_bytes = level.bytes_per_center;
        let rotation_offset_bytes = scale_offset_bytes + level.bytes_per_scale;
        let color_offset_bytes = rotation_offset_bytes + level.bytes_per_rotation;
        let sh_offset_bytes = color_offset_bytes + level.bytes_per_color;
        Self {
            compression_level,
            sh_degree,
            bytes_per_center: level.bytes_per_center,
            bytes_per_scale: level.bytes_per_scale,
            bytes_per_rotation: level.bytes_per_rotation,
            bytes_per_color: level.bytes_per_color,
            bytes_per_sh_component: level.bytes_per_sh_component,
            sh_components_per_splat,
            sh_bytes_per_splat,
            bytes_per_splat: sh_offset_bytes + sh_bytes_per_splat,
            scale_offset_bytes,
            rotation_offset_bytes,
            color_offset_bytes,
            sh_offset_bytes,
            scale_range: level.scale_range,
        }
    }

    /// Width in bytes of one scale/rotation/SH element at this level.
    pub fn field_width(&self) -> usize {
        self.bytes_per_sh_component
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sh_component_counts() {
        assert_eq!(sh_components_for_degree(0), 0);
        assert_eq!(sh_components_for_degree(1), 9);
        assert_eq!(sh_components_for_degree(2), 24);
    }

    #[test]
    fn level0_layout_sizes() {
        let layout = SplatLayout::new(0, 0);
        assert_eq!(layout.bytes_per_splat, 44);
        assert_eq!(layout.color_offset_bytes, 40);

        let layout = SplatLayout::new(0, 2);
        assert_eq!(layout.sh_bytes_per_splat, 96);
        assert_eq!(layout.bytes_per_splat, 44 + 96);
    }

    #[test]
    fn level1_layout_sizes() {
        let layout = SplatLayout::new(1, 1);
        assert_eq!(layout.scale_offset_bytes, 6);
        assert_eq!(layout.rotation_offset_bytes, 12);
        assert_eq!(layout.color_offset_bytes, 20);
        assert_eq!(layout.sh_offset_bytes, 24);
        assert_eq!(layout.bytes_per_splat, 24 + 18);
        assert_eq!(layout.scale_range, 32767);
        assert_eq!(layout.scale_offset_bytes / layout.field_width(), SCALE_OFFSET_ELEMENTS);
        assert_eq!(layout.rotation_offset_bytes / layout.field_width(), ROTATION_OFFSET_ELEMENTS);
    }
}
