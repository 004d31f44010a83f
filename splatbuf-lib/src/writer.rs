use anyhow::anyhow;
use glam::{Quat, Vec3A};
use half::f16;
use itertools::Itertools;

use crate::bucket::compute_buckets;
use crate::header::{
    write_f32, write_u32, BufferHeader, SectionHeader, HEADER_BYTES, SECTION_HEADER_BYTES,
    VERSION_MAJOR, VERSION_MINOR,
};
use crate::layout::SplatLayout;
use crate::splat::{Splat, SplatArray, DEFAULT_RGB, DEFAULT_SCALE};

pub const DEFAULT_BLOCK_SIZE: f32 = 5.0;
pub const DEFAULT_BUCKET_SIZE: u32 = 256;
pub const BUCKET_CENTER_BYTES: u16 = 12;

/// Per-section multipliers on the writer-wide block and bucket sizes.
#[derive(Debug, Clone, Copy)]
pub struct SectionOptions {
    pub block_size_factor: f32,
    pub bucket_size_factor: f32,
}

impl Default for SectionOptions {
    fn default() -> Self {
        Self {
            block_size_factor: 1.0,
            bucket_size_factor: 1.0,
        }
    }
}

/// Assembles a splat buffer from uncompressed splat arrays, one section per
/// array: opacity filtering, spatial bucketing (level 1), quantization and
/// half-float packing, then header + section headers + payloads in one
/// contiguous allocation.
pub struct SplatBufferWriter {
    minimum_alpha: u8,
    compression_level: u16,
    scene_center: Vec3A,
    block_size: f32,
    bucket_size: u32,
    section_options: Vec<SectionOptions>,
}

impl SplatBufferWriter {
    pub fn new(compression_level: u16) -> Self {
        Self {
            minimum_alpha: 1,
            compression_level: compression_level.min(1),
            scene_center: Vec3A::ZERO,
            block_size: DEFAULT_BLOCK_SIZE,
            bucket_size: DEFAULT_BUCKET_SIZE,
            section_options: Vec::new(),
        }
    }

    pub fn with_minimum_alpha(mut self, minimum_alpha: u8) -> Self {
        self.minimum_alpha = minimum_alpha;
        self
    }

    pub fn with_scene_center(mut self, scene_center: Vec3A) -> Self {
        self.scene_center = scene_center;
        self
    }

    pub fn with_block_size(mut self, block_size: f32) -> Self {
        self.block_size = block_size;
        self
    }

    pub fn with_bucket_size(mut self, bucket_size: u32) -> Self {
        self.bucket_size = bucket_size.max(1);
        self
    }

    pub fn with_section_options(mut self, section_options: Vec<SectionOptions>) -> Self {
        self.section_options = section_options;
        self
    }

    pub fn encode(&self, arrays: &[SplatArray]) -> anyhow::Result<Vec<u8>> {
        if arrays.is_empty() {
            return Err(anyhow!("No splat arrays to encode"));
        }
        if !arrays.iter().map(|array| array.sh_degree).all_equal() {
            return Err(anyhow!("Mismatched SH degrees across input splat arrays"));
        }
        let sh_degree = arrays[0].sh_degree;
        let layout = SplatLayout::new(self.compression_level as usize, sh_degree);

        let mut headers = Vec::with_capacity(arrays.len());
        let mut payloads = Vec::with_capacity(arrays.len());
        for (index, array) in arrays.iter().enumerate() {
            let options = self
                .section_options
                .get(index)
                .copied()
                .unwrap_or_default();
            let (header, payload) = self.encode_section(array, &layout, &options)?;
            headers.push(header);
            payloads.push(payload);
        }

        let splat_count: u32 = headers.iter().map(|header| header.splat_count).sum();
        let header = BufferHeader {
            version_major: VERSION_MAJOR,
            version_minor: VERSION_MINOR,
            max_section_count: arrays.len() as u32,
            section_count: arrays.len() as u32,
            max_splat_count: splat_count,
            splat_count,
            compression_level: self.compression_level,
            scene_center: self.scene_center,
            sh_degree: sh_degree as u16,
        };

        let payload_bytes: usize = payloads.iter().map(|payload| payload.len()).sum();
        let mut out =
            vec![0u8; HEADER_BYTES + arrays.len() * SECTION_HEADER_BYTES + payload_bytes];
        header.write(&mut out)?;
        let mut cursor = HEADER_BYTES + arrays.len() * SECTION_HEADER_BYTES;
        for (index, (section_header, payload)) in headers.iter().zip(&payloads).enumerate() {
            section_header.write(&mut out, HEADER_BYTES + index * SECTION_HEADER_BYTES)?;
            out[cursor..cursor + payload.len()].copy_from_slice(payload);
            cursor += payload.len();
        }
        Ok(out)
    }

    fn encode_section(
        &self,
        array: &SplatArray,
        layout: &SplatLayout,
        options: &SectionOptions,
    ) -> anyhow::Result<(SectionHeader, Vec<u8>)> {
        let block_size = self.block_size * options.block_size_factor;
        let bucket_size = ((self.bucket_size as f32 * options.bucket_size_factor) as u32).max(1);

        let valid: Vec<Splat> = array
            .splats
            .iter()
            .filter(|splat| splat.opacity_or_default() >= self.minimum_alpha)
            .cloned()
            .collect();
        let splat_count = valid.len() as u32;

        if self.compression_level == 0 {
            // No spatial bucketing: bare splat region in input order.
            let mut payload = vec![0u8; valid.len() * layout.bytes_per_splat];
            for (slot, splat) in valid.iter().enumerate() {
                write_splat(
                    &mut payload,
                    slot * layout.bytes_per_splat,
                    splat,
                    layout,
                    None,
                )?;
            }
            let header = SectionHeader {
                splat_count,
                max_splat_count: splat_count,
                storage_size_bytes: payload.len() as u32,
                ..Default::default()
            };
            return Ok((header, payload));
        }

        let buckets = compute_buckets(&valid, block_size, bucket_size as usize);
        let bucket_count = buckets.bucket_count() as u32;
        let partial_count = buckets.partial.len() as u32;
        let bucket_region =
            partial_count as usize * 4 + bucket_count as usize * BUCKET_CENTER_BYTES as usize;
        let mut payload = vec![0u8; bucket_region + valid.len() * layout.bytes_per_splat];

        for (index, bucket) in buckets.partial.iter().enumerate() {
            write_u32(&mut payload, index * 4, bucket.splats.len() as u32)?;
        }
        let centers_base = partial_count as usize * 4;
        for (index, bucket) in buckets.iter().enumerate() {
            let offset = centers_base + index * BUCKET_CENTER_BYTES as usize;
            write_f32(&mut payload, offset, bucket.center.x)?;
            write_f32(&mut payload, offset + 4, bucket.center.y)?;
            write_f32(&mut payload, offset + 8, bucket.center.z)?;
        }

        let quantization = Quantization::new(block_size, layout.scale_range);
        let mut out_splat_count = 0usize;
        for bucket in buckets.iter() {
            for &local in &bucket.splats {
                write_splat(
                    &mut payload,
                    bucket_region + out_splat_count * layout.bytes_per_splat,
                    &valid[local as usize],
                    layout,
                    Some((&bucket.center, &quantization)),
                )?;
                out_splat_count += 1;
            }
        }

        let header = SectionHeader {
            splat_count,
            max_splat_count: splat_count,
            bucket_size,
            bucket_count,
            bucket_block_size: block_size,
            bucket_storage_size_bytes: BUCKET_CENTER_BYTES,
            compression_scale_range: layout.scale_range,
            storage_size_bytes: payload.len() as u32,
            full_bucket_count: buckets.full.len() as u32,
            partially_filled_bucket_count: partial_count,
        };
        Ok((header, payload))
    }
}

struct Quantization {
    scale_range: u32,
    encode_factor: f32,
}

impl Quantization {
    fn new(block_size: f32, scale_range: u32) -> Self {
        Self {
            scale_range,
            encode_factor: scale_range as f32 / (block_size / 2.0),
        }
    }

    /// Bucket-relative quantized center component, clamped into the u16 range
    /// so maximum-face cells stay representable.
    fn quantize(&self, value: f32, bucket_center: f32) -> u16 {
        let quantized =
            ((value - bucket_center) * self.encode_factor).round() as i64 + self.scale_range as i64;
        quantized.clamp(0, 2 * self.scale_range as i64 + 1) as u16
    }
}

fn write_splat(
    out: &mut [u8],
    offset: usize,
    splat: &Splat,
    layout: &SplatLayout,
    bucket: Option<(&Vec3A, &Quantization)>,
) -> anyhow::Result<()> {
    let scale = splat.scale.unwrap_or(Vec3A::splat(DEFAULT_SCALE));
    let rotation = match splat.rotation {
        // A splat without per-splat geometry also gets the identity orientation.
        Some(rotation) if splat.scale.is_some() && rotation.length_squared() > 0.0 => {
            rotation.normalize()
        }
        _ => Quat::IDENTITY,
    };
    let rgb = splat.rgb.unwrap_or(DEFAULT_RGB);
    let opacity = splat.opacity_or_default();

    match bucket {
        None => {
            write_f32(out, offset, splat.center.x)?;
            write_f32(out, offset + 4, splat.center.y)?;
            write_f32(out, offset + 8, splat.center.z)?;
        }
        Some((center, quantization)) => {
            for (axis, (value, bucket_center)) in splat
                .center
                .to_array()
                .into_iter()
                .zip(center.to_array())
                .enumerate()
            {
                let quantized = quantization.quantize(value, bucket_center);
                out[offset + axis * 2..offset + axis * 2 + 2]
                    .copy_from_slice(&quantized.to_le_bytes());
            }
        }
    }

    // Rotation memory order is (w, x, y, z); user-facing order is (x, y, z, w).
    let scale_elements = scale.to_array();
    let rotation_elements = [rotation.w, rotation.x, rotation.y, rotation.z];
    if layout.compression_level == 0 {
        for (index, value) in scale_elements.into_iter().enumerate() {
            write_f32(out, offset + layout.scale_offset_bytes + index * 4, value)?;
        }
        for (index, value) in rotation_elements.into_iter().enumerate() {
            write_f32(out, offset + layout.rotation_offset_bytes + index * 4, value)?;
        }
    } else {
        for (index, value) in scale_elements.into_iter().enumerate() {
            write_f16(out, offset + layout.scale_offset_bytes + index * 2, value);
        }
        for (index, value) in rotation_elements.into_iter().enumerate() {
            write_f16(out, offset + layout.rotation_offset_bytes + index * 2, value);
        }
    }

    let color_offset = offset + layout.color_offset_bytes;
    out[color_offset] = rgb[0];
    out[color_offset + 1] = rgb[1];
    out[color_offset + 2] = rgb[2];
    out[color_offset + 3] = opacity;

    for component in 0..layout.sh_components_per_splat {
        let value = splat.sh_component(component);
        let sh_offset = offset + layout.sh_offset_bytes + component * layout.bytes_per_sh_component;
        if layout.compression_level == 0 {
            write_f32(out, sh_offset, value)?;
        } else {
            write_f16(out, sh_offset, value);
        }
    }
    Ok(())
}

#[inline]
fn write_f16(out: &mut [u8], offset: usize, value: f32) {
    out[offset..offset + 2].copy_from_slice(&f16::from_f32(value).to_bits().to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::BufferHeader;

    fn opaque_splat(x: f32, opacity: u8) -> Splat {
        Splat::new(
            Vec3A::new(x, 0.0, 0.0),
            Vec3A::ONE,
            Quat::IDENTITY,
            [1, 2, 3],
            opacity,
        )
    }

    #[test]
    fn mixed_sh_degrees_are_rejected() {
        let mut a = SplatArray::new(1);
        a.push_splat(opaque_splat(0.0, 255));
        let mut b = SplatArray::new(2);
        b.push_splat(opaque_splat(1.0, 255));
        let writer = SplatBufferWriter::new(0);
        assert!(writer.encode(&[a, b]).is_err());
    }

    #[test]
    fn empty_batch_is_rejected() {
        assert!(SplatBufferWriter::new(0).encode(&[]).is_err());
    }

    #[test]
    fn opacity_filter_drops_below_threshold() {
        let mut array = SplatArray::new(0);
        array.push_splat(opaque_splat(0.0, 10));
        array.push_splat(opaque_splat(1.0, 200));

        let bytes = SplatBufferWriter::new(0)
            .with_minimum_alpha(16)
            .encode(&[array.clone()])
            .unwrap();
        let header = BufferHeader::parse(&bytes).unwrap();
        assert_eq!(header.splat_count, 1);

        let bytes = SplatBufferWriter::new(0)
            .with_minimum_alpha(0)
            .encode(&[array])
            .unwrap();
        let header = BufferHeader::parse(&bytes).unwrap();
        assert_eq!(header.splat_count, 2);
    }

    #[test]
    fn quantization_clamps_to_u16_domain() {
        let quantization = Quantization::new(5.0, 32767);
        assert_eq!(quantization.quantize(0.0, 0.0), 32767);
        assert_eq!(quantization.quantize(2.5, 0.0), 65534);
        assert_eq!(quantization.quantize(1000.0, 0.0), 65535);
        assert_eq!(quantization.quantize(-1000.0, 0.0), 0);
    }
}
