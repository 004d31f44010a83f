use ahash::AHashMap;
use glam::Vec3A;

use crate::splat::Splat;

/// A group of up to `bucket_size` splats sharing one cell of a uniform grid.
/// `splats` holds local indices into the source array; `center` is the cell
/// center that level-1 positions are encoded relative to.
#[derive(Debug, Clone)]
pub struct Bucket {
    pub splats: Vec<u32>,
    pub center: Vec3A,
}

#[derive(Debug, Clone, Default)]
pub struct BucketSets {
    pub full: Vec<Bucket>,
    pub partial: Vec<Bucket>,
}

impl BucketSets {
    pub fn bucket_count(&self) -> usize {
        self.full.len() + self.partial.len()
    }

    /// Buckets in final layout order: full first, then partial.
    pub fn iter(&self) -> impl Iterator<Item = &Bucket> {
        self.full.iter().chain(self.partial.iter())
    }
}

/// Partitions splats into spatial buckets on a uniform grid of side
/// `block_size`. A bucket that reaches exactly `bucket_size` splats moves to
/// the full list and its grid slot resets, so later splats in the same cell
/// open a fresh bucket. Remaining non-empty slots become partial buckets in
/// insertion order.
pub fn compute_buckets(splats: &[Splat], block_size: f32, bucket_size: usize) -> BucketSets {
    if splats.is_empty() {
        return BucketSets::default();
    }

    let mut min = splats[0].center;
    let mut max = splats[0].center;
    for splat in &splats[1..] {
        min = min.min(splat.center);
        max = max.max(splat.center);
    }
    let dimensions = max - min;

    // Degenerate axes still span one block so distinct cells keep distinct keys.
    let y_blocks = ((dimensions.y / block_size).ceil() as u64).max(1);
    let z_blocks = ((dimensions.z / block_size).ceil() as u64).max(1);
    let half_block = block_size / 2.0;

    let mut full = Vec::new();
    let mut open: Vec<Option<Bucket>> = Vec::new();
    let mut slots: AHashMap<u64, usize> = AHashMap::new();

    for (index, splat) in splats.iter().enumerate() {
        let cell = ((splat.center - min) / block_size).floor();
        let [x_block, y_block, z_block] = [cell.x as u64, cell.y as u64, cell.z as u64];
        let key = x_block * y_blocks * z_blocks + y_block * z_blocks + z_block;

        let slot = match slots.get(&key) {
            Some(&slot) if open[slot].is_some() => slot,
            _ => {
                let center = Vec3A::new(
                    x_block as f32 * block_size + min.x + half_block,
                    y_block as f32 * block_size + min.y + half_block,
                    z_block as f32 * block_size + min.z + half_block,
                );
                open.push(Some(Bucket {
                    splats: Vec::new(),
                    center,
                }));
                slots.insert(key, open.len() - 1);
                open.len() - 1
            }
        };

        let bucket = open[slot].as_mut().unwrap();
        bucket.splats.push(index as u32);
        if bucket.splats.len() >= bucket_size {
            full.push(open[slot].take().unwrap());
        }
    }

    BucketSets {
        full,
        partial: open.into_iter().flatten().collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3A;

    fn splat_at(x: f32, y: f32, z: f32) -> Splat {
        Splat {
            center: Vec3A::new(x, y, z),
            ..Default::default()
        }
    }

    #[test]
    fn buckets_cover_all_indices_exactly_once() {
        let mut splats = Vec::new();
        // 600 splats in one cell, 10 in a far cell
        for i in 0..600 {
            let jitter = (i % 7) as f32 * 0.1;
            splats.push(splat_at(jitter, jitter * 0.5, jitter * 0.25));
        }
        for i in 0..10 {
            splats.push(splat_at(50.0 + i as f32 * 0.01, 50.0, 50.0));
        }

        let sets = compute_buckets(&splats, 5.0, 256);
        assert_eq!(sets.full.len(), 2);
        for bucket in &sets.full {
            assert_eq!(bucket.splats.len(), 256);
        }

        let mut seen = vec![false; splats.len()];
        for bucket in sets.iter() {
            for &index in &bucket.splats {
                assert!(!seen[index as usize], "duplicate index {index}");
                seen[index as usize] = true;
            }
        }
        assert!(seen.iter().all(|&s| s));
    }

    #[test]
    fn bucket_centers_sit_at_cell_midpoints() {
        let splats = vec![splat_at(0.0, 0.0, 0.0), splat_at(1.0, 2.0, 3.0), splat_at(-1.0, -2.0, -3.0)];
        let sets = compute_buckets(&splats, 5.0, 256);
        // bbox min (-1,-2,-3), dims (2,4,6): splat 1 lands one z-cell over
        assert_eq!(sets.full.len(), 0);
        assert_eq!(sets.partial.len(), 2);
        assert_eq!(sets.partial[0].splats, vec![0, 2]);
        assert_eq!(sets.partial[1].splats, vec![1]);
        assert_eq!(sets.partial[0].center, Vec3A::new(1.5, 0.5, -0.5));
        assert_eq!(sets.partial[1].center, Vec3A::new(1.5, 0.5, 4.5));
    }

    #[test]
    fn full_cell_reopens_under_same_key() {
        let splats: Vec<Splat> = (0..5).map(|_| splat_at(0.0, 0.0, 0.0)).collect();
        let sets = compute_buckets(&splats, 5.0, 2);
        assert_eq!(sets.full.len(), 2);
        assert_eq!(sets.partial.len(), 1);
        assert_eq!(sets.partial[0].splats.len(), 1);
    }
}
