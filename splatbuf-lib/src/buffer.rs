use std::array;

use anyhow::anyhow;
use glam::{Mat3A, Mat4, Quat, Vec3A};
use half::f16;

use crate::covariance::SymMat3;
use crate::header::{BufferHeader, SectionHeader, HEADER_BYTES, SECTION_HEADER_BYTES};
use crate::layout::{sh_components_for_degree, SplatLayout};
use crate::sh::ShRotation;

/// Parsed per-section metadata plus absolute byte offsets into the buffer.
/// `base` points at the partial-bucket-length table, `buckets_base` at the
/// bucket-center array, `data_base` at the splat region.
#[derive(Debug, Clone)]
pub struct Section {
    pub header: SectionHeader,
    pub base: usize,
    pub buckets_base: usize,
    pub data_base: usize,
    pub splat_count_offset: usize,
    pub compression_scale_factor: f32,
}

/// A parsed splat buffer. Owns its bytes; all accessors decode in place, so
/// concurrent readers are safe as long as nothing calls the two counter
/// updaters. Accessors do not bounds-check global indices beyond the map
/// arrays; feeding indices at or above `splat_count` is a caller error.
pub struct SplatBuffer {
    data: Vec<u8>,
    header: BufferHeader,
    layout: SplatLayout,
    sections: Vec<Section>,
    global_to_section: Vec<u32>,
    global_to_local: Vec<u32>,
}

impl SplatBuffer {
    pub fn parse(data: Vec<u8>) -> anyhow::Result<Self> {
        let header = BufferHeader::parse(&data)?;
        let layout = SplatLayout::new(header.compression_level as usize, header.sh_degree as usize);

        let max_section_count = header.max_section_count as usize;
        let headers_end = HEADER_BYTES + max_section_count * SECTION_HEADER_BYTES;
        if headers_end > data.len() {
            return Err(anyhow!("Truncated splat buffer: section header region"));
        }

        let mut sections = Vec::with_capacity(max_section_count);
        let mut base = headers_end;
        let mut splat_count_offset = 0usize;
        for index in 0..max_section_count {
            let section_header =
                SectionHeader::parse(&data, HEADER_BYTES + index * SECTION_HEADER_BYTES)?;
            let storage = section_header.storage_size_bytes as usize;
            let bucket_region = section_header.bucket_region_bytes();
            let splat_region = section_header.max_splat_count as usize * layout.bytes_per_splat;
            if bucket_region + splat_region > storage || base + storage > data.len() {
                return Err(anyhow!("Truncated splat buffer: section {index}"));
            }
            let compression_scale_factor = if section_header.compression_scale_range == 0 {
                0.0
            } else {
                section_header.bucket_block_size
                    / 2.0
                    / section_header.compression_scale_range as f32
            };
            sections.push(Section {
                base,
                buckets_base: base + section_header.partially_filled_bucket_count as usize * 4,
                data_base: base + bucket_region,
                splat_count_offset,
                compression_scale_factor,
                header: section_header,
            });
            splat_count_offset += sections[index].header.max_splat_count as usize;
            base += storage;
        }

        let mut global_to_section = Vec::with_capacity(splat_count_offset);
        let mut global_to_local = Vec::with_capacity(splat_count_offset);
        for (index, section) in sections.iter().enumerate() {
            for local in 0..section.header.max_splat_count {
                global_to_section.push(index as u32);
                global_to_local.push(local);
            }
        }

        Ok(Self {
            data,
            header,
            layout,
            sections,
            global_to_section,
            global_to_local,
        })
    }

    pub fn splat_count(&self) -> usize {
        self.header.splat_count as usize
    }

    pub fn max_splat_count(&self) -> usize {
        self.header.max_splat_count as usize
    }

    pub fn section_count(&self) -> usize {
        self.header.section_count as usize
    }

    pub fn max_section_count(&self) -> usize {
        self.header.max_section_count as usize
    }

    pub fn compression_level(&self) -> usize {
        self.header.compression_level as usize
    }

    pub fn sh_degree(&self) -> usize {
        self.header.sh_degree as usize
    }

    pub fn scene_center(&self) -> Vec3A {
        self.header.scene_center
    }

    pub fn layout(&self) -> &SplatLayout {
        &self.layout
    }

    pub fn section(&self, index: usize) -> &Section {
        &self.sections[index]
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn section_index_of(&self, global_index: usize) -> usize {
        self.global_to_section[global_index] as usize
    }

    pub fn local_index_of(&self, global_index: usize) -> usize {
        self.global_to_local[global_index] as usize
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// Publishes progress of a streaming producer by rewriting the two live
    /// file-header counters. Counts clamp to their max counterparts; payload
    /// bytes are untouched. Callers keep counters monotonic.
    pub fn update_loaded_counts(&mut self, section_count: u32, splat_count: u32) {
        self.header.section_count = section_count.min(self.header.max_section_count);
        self.header.splat_count = splat_count.min(self.header.max_splat_count);
        self.data[8..12].copy_from_slice(&self.header.section_count.to_le_bytes());
        self.data[16..20].copy_from_slice(&self.header.splat_count.to_le_bytes());
    }

    /// Per-section counterpart of [`Self::update_loaded_counts`].
    pub fn update_section_loaded_count(&mut self, section_index: usize, splat_count: u32) {
        let section = &mut self.sections[section_index];
        section.header.splat_count = splat_count.min(section.header.max_splat_count);
        let offset = HEADER_BYTES + section_index * SECTION_HEADER_BYTES;
        self.data[offset..offset + 4].copy_from_slice(&section.header.splat_count.to_le_bytes());
    }

    fn locate(&self, global_index: usize) -> (&Section, usize) {
        let section = &self.sections[self.global_to_section[global_index] as usize];
        (section, self.global_to_local[global_index] as usize)
    }

    fn splat_base(&self, section: &Section, local: usize) -> usize {
        section.data_base + local * self.layout.bytes_per_splat
    }

    /// Bucket owning local index `local`: full buckets by division, partial
    /// buckets by scanning the length table at the section base.
    fn bucket_for_local(&self, section: &Section, local: usize) -> usize {
        let bucket_size = section.header.bucket_size as usize;
        let full_bucket_count = section.header.full_bucket_count as usize;
        let full_span = full_bucket_count * bucket_size;
        if local < full_span {
            return local / bucket_size;
        }
        let mut window_base = full_span;
        for index in 0..section.header.partially_filled_bucket_count as usize {
            let length = u32_at(&self.data, section.base + index * 4) as usize;
            if local < window_base + length {
                return full_bucket_count + index;
            }
            window_base += length;
        }
        (section.header.bucket_count as usize).saturating_sub(1)
    }

    fn bucket_center(&self, section: &Section, bucket_index: usize) -> Vec3A {
        let offset = section.buckets_base + bucket_index * 12;
        Vec3A::new(
            f32_at(&self.data, offset),
            f32_at(&self.data, offset + 4),
            f32_at(&self.data, offset + 8),
        )
    }

    pub fn splat_center(&self, global_index: usize) -> Vec3A {
        let (section, local) = self.locate(global_index);
        self.center_at(section, local)
    }

    pub fn splat_scale(&self, global_index: usize) -> Vec3A {
        let (section, local) = self.locate(global_index);
        self.scale_at(section, local)
    }

    pub fn splat_rotation(&self, global_index: usize) -> Quat {
        let (section, local) = self.locate(global_index);
        self.rotation_at(section, local)
    }

    pub fn splat_scale_and_rotation(&self, global_index: usize) -> (Vec3A, Quat) {
        let (section, local) = self.locate(global_index);
        (self.scale_at(section, local), self.rotation_at(section, local))
    }

    pub fn splat_color(&self, global_index: usize) -> [u8; 4] {
        let (section, local) = self.locate(global_index);
        self.color_at(section, local)
    }

    fn center_at(&self, section: &Section, local: usize) -> Vec3A {
        let base = self.splat_base(section, local);
        if self.layout.compression_level == 0 {
            return Vec3A::new(
                f32_at(&self.data, base),
                f32_at(&self.data, base + 4),
                f32_at(&self.data, base + 8),
            );
        }
        let bucket_center = self.bucket_center(section, self.bucket_for_local(section, local));
        let range = section.header.compression_scale_range as f32;
        let factor = section.compression_scale_factor;
        Vec3A::new(
            (u16_at(&self.data, base) as f32 - range) * factor + bucket_center.x,
            (u16_at(&self.data, base + 2) as f32 - range) * factor + bucket_center.y,
            (u16_at(&self.data, base + 4) as f32 - range) * factor + bucket_center.z,
        )
    }

    fn scale_at(&self, section: &Section, local: usize) -> Vec3A {
        let base = self.splat_base(section, local) + self.layout.scale_offset_bytes;
        Vec3A::from_array(array::from_fn(|index| self.field_at(base, index)))
    }

    fn rotation_at(&self, section: &Section, local: usize) -> Quat {
        let base = self.splat_base(section, local) + self.layout.rotation_offset_bytes;
        // Stored (w, x, y, z), exposed (x, y, z, w)
        let [w, x, y, z] = array::from_fn(|index| self.field_at(base, index));
        Quat::from_xyzw(x, y, z, w)
    }

    fn color_at(&self, section: &Section, local: usize) -> [u8; 4] {
        let base = self.splat_base(section, local) + self.layout.color_offset_bytes;
        [
            self.data[base],
            self.data[base + 1],
            self.data[base + 2],
            self.data[base + 3],
        ]
    }

    fn sh_component_at(&self, section: &Section, local: usize, component: usize) -> f32 {
        let base = self.splat_base(section, local)
            + self.layout.sh_offset_bytes
            + component * self.layout.bytes_per_sh_component;
        if self.layout.compression_level == 0 {
            f32_at(&self.data, base)
        } else {
            f16_at(&self.data, base)
        }
    }

    /// One scale/rotation element at `index` field widths past `base`.
    fn field_at(&self, base: usize, index: usize) -> f32 {
        let offset = base + index * self.layout.field_width();
        if self.layout.compression_level == 0 {
            f32_at(&self.data, offset)
        } else {
            f16_at(&self.data, offset)
        }
    }

    /// Writes centers for the inclusive source range into `out` at stride 3,
    /// optionally through an affine transform.
    pub fn fill_centers(
        &self,
        out: &mut [f32],
        transform: Option<&Mat4>,
        src_from: usize,
        src_to: usize,
        dest_from: usize,
    ) {
        for (slot, global_index) in (src_from..=src_to).enumerate() {
            let mut center = self.splat_center(global_index);
            if let Some(transform) = transform {
                center = transform.transform_point3a(center);
            }
            let base = (dest_from + slot) * 3;
            out[base..base + 3].copy_from_slice(&center.to_array());
        }
    }

    /// Copies RGBA at stride 4. Output alpha below `minimum_alpha` is
    /// rewritten to zero; the source bytes and RGB stay untouched.
    pub fn fill_colors(
        &self,
        out: &mut [u8],
        minimum_alpha: u8,
        src_from: usize,
        src_to: usize,
        dest_from: usize,
    ) {
        for (slot, global_index) in (src_from..=src_to).enumerate() {
            let color = self.splat_color(global_index);
            let base = (dest_from + slot) * 4;
            out[base..base + 3].copy_from_slice(&color[..3]);
            out[base + 3] = if color[3] < minimum_alpha { 0 } else { color[3] };
        }
    }

    /// Upper-triangular 3D covariances at stride 6, f32 output.
    pub fn fill_covariances(
        &self,
        out: &mut [f32],
        transform: Option<&Mat4>,
        src_from: usize,
        src_to: usize,
        dest_from: usize,
    ) {
        self.fill_covariances_into(out, transform, src_from, src_to, dest_from);
    }

    /// Covariance fill for a desired output compression level of 1.
    pub fn fill_covariances_f16(
        &self,
        out: &mut [f16],
        transform: Option<&Mat4>,
        src_from: usize,
        src_to: usize,
        dest_from: usize,
    ) {
        self.fill_covariances_into(out, transform, src_from, src_to, dest_from);
    }

    fn fill_covariances_into<E: OutputElement>(
        &self,
        out: &mut [E],
        transform: Option<&Mat4>,
        src_from: usize,
        src_to: usize,
        dest_from: usize,
    ) {
        let rotation = transform.map(|transform| Mat3A::from_mat4(*transform));
        for (slot, global_index) in (src_from..=src_to).enumerate() {
            let (scale, quat) = self.splat_scale_and_rotation(global_index);
            let mut covariance = SymMat3::from_scale_rotation(scale, quat);
            if let Some(rotation) = &rotation {
                covariance = covariance.transformed(rotation);
            }
            let base = (dest_from + slot) * 6;
            for (index, value) in covariance.to_array().into_iter().enumerate() {
                out[base + index] = E::from_f32(value);
            }
        }
    }

    /// SH coefficients at stride `3*((out_degree+1)^2 - 1)` in the stored
    /// channel-major layout, f32 output. `out_degree` saturates at the stored
    /// degree. With a transform the coefficients are rotated through the
    /// real-SH engine; without one they pass through.
    pub fn fill_spherical_harmonics(
        &self,
        out: &mut [f32],
        out_degree: usize,
        transform: Option<&Mat4>,
        src_from: usize,
        src_to: usize,
        dest_from: usize,
    ) {
        self.fill_spherical_harmonics_into(out, out_degree, transform, src_from, src_to, dest_from);
    }

    /// SH fill for a desired output compression level of 1.
    pub fn fill_spherical_harmonics_f16(
        &self,
        out: &mut [f16],
        out_degree: usize,
        transform: Option<&Mat4>,
        src_from: usize,
        src_to: usize,
        dest_from: usize,
    ) {
        self.fill_spherical_harmonics_into(out, out_degree, transform, src_from, src_to, dest_from);
    }

    fn fill_spherical_harmonics_into<E: OutputElement>(
        &self,
        out: &mut [E],
        out_degree: usize,
        transform: Option<&Mat4>,
        src_from: usize,
        src_to: usize,
        dest_from: usize,
    ) {
        let out_degree = out_degree.min(self.layout.sh_degree);
        let stride = sh_components_for_degree(out_degree);
        if stride == 0 {
            return;
        }
        let rotation =
            transform.map(|transform| ShRotation::from_matrix(&Mat3A::from_mat4(*transform)));

        for (slot, global_index) in (src_from..=src_to).enumerate() {
            let (section, local) = self.locate(global_index);
            let out_base = (dest_from + slot) * stride;

            let band1_in: [Vec3A; 3] = array::from_fn(|coeff| {
                Vec3A::new(
                    self.sh_component_at(section, local, coeff),
                    self.sh_component_at(section, local, 3 + coeff),
                    self.sh_component_at(section, local, 6 + coeff),
                )
            });
            let band1 = match &rotation {
                Some(rotation) => rotation.rotate_band1(&band1_in),
                None => band1_in,
            };
            for coeff in 0..3 {
                out[out_base + coeff] = E::from_f32(band1[coeff].x);
                out[out_base + 3 + coeff] = E::from_f32(band1[coeff].y);
                out[out_base + 6 + coeff] = E::from_f32(band1[coeff].z);
            }

            if out_degree >= 2 {
                let band2_in: [Vec3A; 5] = array::from_fn(|coeff| {
                    Vec3A::new(
                        self.sh_component_at(section, local, 9 + coeff),
                        self.sh_component_at(section, local, 14 + coeff),
                        self.sh_component_at(section, local, 19 + coeff),
                    )
                });
                let band2 = match &rotation {
                    Some(rotation) => rotation.rotate_band2(&band2_in),
                    None => band2_in,
                };
                for coeff in 0..5 {
                    out[out_base + 9 + coeff] = E::from_f32(band2[coeff].x);
                    out[out_base + 14 + coeff] = E::from_f32(band2[coeff].y);
                    out[out_base + 19 + coeff] = E::from_f32(band2[coeff].z);
                }
            }
        }
    }
}

pub(crate) trait OutputElement: Copy {
    fn from_f32(value: f32) -> Self;
}

impl OutputElement for f32 {
    #[inline]
    fn from_f32(value: f32) -> Self {
        value
    }
}

impl OutputElement for f16 {
    #[inline]
    fn from_f32(value: f32) -> Self {
        f16::from_f32(value)
    }
}

#[inline]
fn u16_at(data: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([data[offset], data[offset + 1]])
}

#[inline]
fn u32_at(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

#[inline]
fn f32_at(data: &[u8], offset: usize) -> f32 {
    f32::from_le_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

#[inline]
fn f16_at(data: &[u8], offset: usize) -> f32 {
    f16::from_bits(u16_at(data, offset)).to_f32()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::{BufferHeader, VERSION_MAJOR, VERSION_MINOR};

    fn empty_buffer_bytes() -> Vec<u8> {
        let mut bytes = vec![0u8; HEADER_BYTES + SECTION_HEADER_BYTES];
        BufferHeader {
            version_major: VERSION_MAJOR,
            version_minor: VERSION_MINOR,
            max_section_count: 1,
            section_count: 1,
            max_splat_count: 0,
            splat_count: 0,
            compression_level: 0,
            scene_center: Vec3A::ZERO,
            sh_degree: 0,
        }
        .write(&mut bytes)
        .unwrap();
        bytes
    }

    #[test]
    fn parse_rejects_missing_section_headers() {
        let mut bytes = empty_buffer_bytes();
        bytes.truncate(HEADER_BYTES + 10);
        assert!(SplatBuffer::parse(bytes).is_err());
    }

    #[test]
    fn parse_rejects_truncated_section_payload() {
        let mut bytes = empty_buffer_bytes();
        // claim a splat region that the buffer does not contain
        let section_offset = HEADER_BYTES;
        bytes[section_offset + 4..section_offset + 8].copy_from_slice(&8u32.to_le_bytes());
        bytes[section_offset + 28..section_offset + 32]
            .copy_from_slice(&(8u32 * 44).to_le_bytes());
        assert!(SplatBuffer::parse(bytes).is_err());
    }

    #[test]
    fn parse_accepts_empty_single_section() {
        let buffer = SplatBuffer::parse(empty_buffer_bytes()).unwrap();
        assert_eq!(buffer.splat_count(), 0);
        assert_eq!(buffer.section_count(), 1);
        assert_eq!(buffer.layout().bytes_per_splat, 44);
    }
}
