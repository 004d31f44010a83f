use anyhow::anyhow;
use glam::Vec3A;

use crate::layout::{MAX_COMPRESSION_LEVEL, MAX_SH_DEGREE};

pub const HEADER_BYTES: usize = 4096;
pub const SECTION_HEADER_BYTES: usize = 1024;

pub const VERSION_MAJOR: u8 = 0;
pub const VERSION_MINOR: u8 = 1;

/// The 4096-byte file header. Only the leading fields are meaningful; the
/// remainder is reserved zero. `section_count` and `splat_count` are live
/// counters that a streaming producer may grow up to their max counterparts.
#[derive(Debug, Clone, PartialEq)]
pub struct BufferHeader {
    pub version_major: u8,
    pub version_minor: u8,
    pub max_section_count: u32,
    pub section_count: u32,
    pub max_splat_count: u32,
    pub splat_count: u32,
    pub compression_level: u16,
    pub scene_center: Vec3A,
    pub sh_degree: u16,
}

impl BufferHeader {
    pub fn parse(buffer: &[u8]) -> anyhow::Result<Self> {
        if buffer.len() < HEADER_BYTES {
            return Err(anyhow!("Buffer too small for splat buffer header"));
        }

        let version_major = buffer[0];
        let version_minor = buffer[1];
        if version_major != VERSION_MAJOR || version_minor < VERSION_MINOR {
            return Err(anyhow!(
                "Unsupported splat buffer version: {version_major}.{version_minor}"
            ));
        }

        let compression_level = read_u16(buffer, 20)?;
        if compression_level > MAX_COMPRESSION_LEVEL {
            return Err(anyhow!("Invalid compression level {compression_level}"));
        }
        let sh_degree = read_u16(buffer, 36)?;
        if sh_degree > MAX_SH_DEGREE {
            return Err(anyhow!("Invalid SH degree {sh_degree}"));
        }

        Ok(Self {
            version_major,
            version_minor,
            max_section_count: read_u32(buffer, 4)?,
            section_count: read_u32(buffer, 8)?,
            max_splat_count: read_u32(buffer, 12)?,
            splat_count: read_u32(buffer, 16)?,
            compression_level,
            scene_center: Vec3A::new(
                read_f32(buffer, 24)?,
                read_f32(buffer, 28)?,
                read_f32(buffer, 32)?,
            ),
            sh_degree,
        })
    }

    /// Writes the defined fields into the head of `out`; bytes beyond them are
    /// left as-is (callers hand in a zeroed region).
    pub fn write(&self, out: &mut [u8]) -> anyhow::Result<()> {
        if out.len() < HEADER_BYTES {
            return Err(anyhow!("Output too small for splat buffer header"));
        }
        out[0] = self.version_major;
        out[1] = self.version_minor;
        write_u32(out, 4, self.max_section_count)?;
        write_u32(out, 8, self.section_count)?;
        write_u32(out, 12, self.max_splat_count)?;
        write_u32(out, 16, self.splat_count)?;
        write_u16(out, 20, self.compression_level)?;
        write_f32(out, 24, self.scene_center.x)?;
        write_f32(out, 28, self.scene_center.y)?;
        write_f32(out, 32, self.scene_center.z)?;
        write_u16(out, 36, self.sh_degree)?;
        Ok(())
    }
}

/// One 1024-byte section header. Bucket fields are zero at compression
/// level 0, where the payload is the bare splat region.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SectionHeader {
    pub splat_count: u32,
    pub max_splat_count: u32,
    pub bucket_size: u32,
    pub bucket_count: u32,
    pub bucket_block_size: f32,
    pub bucket_storage_size_bytes: u16,
    pub compression_scale_range: u32,
    pub storage_size_bytes: u32,
    pub full_bucket_count: u32,
    pub partially_filled_bucket_count: u32,
}

impl SectionHeader {
    pub fn parse(buffer: &[u8], offset: usize) -> anyhow::Result<Self> {
        if offset + SECTION_HEADER_BYTES > buffer.len() {
            return Err(anyhow!("Buffer too small for section header"));
        }
        Ok(Self {
            splat_count: read_u32(buffer, offset)?,
            max_splat_count: read_u32(buffer, offset + 4)?,
            bucket_size: read_u32(buffer, offset + 8)?,
            bucket_count: read_u32(buffer, offset + 12)?,
            bucket_block_size: read_f32(buffer, offset + 16)?,
            bucket_storage_size_bytes: read_u16(buffer, offset + 20)?,
            compression_scale_range: read_u32(buffer, offset + 24)?,
            storage_size_bytes: read_u32(buffer, offset + 28)?,
            full_bucket_count: read_u32(buffer, offset + 32)?,
            partially_filled_bucket_count: read_u32(buffer, offset + 36)?,
        })
    }

    pub fn write(&self, out: &mut [u8], offset: usize) -> anyhow::Result<()> {
        if offset + SECTION_HEADER_BYTES > out.len() {
            return Err(anyhow!("Output too small for section header"));
        }
        write_u32(out, offset, self.splat_count)?;
        write_u32(out, offset + 4, self.max_splat_count)?;
        write_u32(out, offset + 8, self.bucket_size)?;
        write_u32(out, offset + 12, self.bucket_count)?;
        write_f32(out, offset + 16, self.bucket_block_size)?;
        write_u16(out, offset + 20, self.bucket_storage_size_bytes)?;
        write_u32(out, offset + 24, self.compression_scale_range)?;
        write_u32(out, offset + 28, self.storage_size_bytes)?;
        write_u32(out, offset + 32, self.full_bucket_count)?;
        write_u32(out, offset + 36, self.partially_filled_bucket_count)?;
        Ok(())
    }

    /// Bytes of the bucket region preceding the splat data: the
    /// partial-bucket-length table plus the bucket-center table.
    pub fn bucket_region_bytes(&self) -> usize {
        self.partially_filled_bucket_count as usize * 4
            + self.bucket_count as usize * self.bucket_storage_size_bytes as usize
    }
}

#[inline]
pub(crate) fn read_u16(buf: &[u8], offset: usize) -> anyhow::Result<u16> {
    buf.get(offset..offset + 2)
        .ok_or_else(|| anyhow!("Unexpected EOF"))
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
}

#[inline]
pub(crate) fn read_u32(buf: &[u8], offset: usize) -> anyhow::Result<u32> {
    buf.get(offset..offset + 4)
        .ok_or_else(|| anyhow!("Unexpected EOF"))
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

#[inline]
pub(crate) fn read_f32(buf: &[u8], offset: usize) -> anyhow::Result<f32> {
    buf.get(offset..offset + 4)
        .ok_or_else(|| anyhow!("Unexpected EOF"))
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

#[inline]
pub(crate) fn write_u16(out: &mut [u8], offset: usize, value: u16) -> anyhow::Result<()> {
    out.get_mut(offset..offset + 2)
        .ok_or_else(|| anyhow!("Write OOB"))?
        .copy_from_slice(&value.to_le_bytes());
    Ok(())
}

#[inline]
pub(crate) fn write_u32(out: &mut [u8], offset: usize, value: u32) -> anyhow::Result<()> {
    out.get_mut(offset..offset + 4)
        .ok_or_else(|| anyhow!("Write OOB"))?
        .copy_from_slice(&value.to_le_bytes());
    Ok(())
}

#[inline]
pub(crate) fn write_f32(out: &mut [u8], offset: usize, value: f32) -> anyhow::Result<()> {
    out.get_mut(offset..offset + 4)
        .ok_or_else(|| anyhow!("Write OOB"))?
        .copy_from_slice(&value.to_le_bytes());
    Ok(())
}
