//! Uniform-grid bucket index for radius-bounded neighbour queries over atom
//! spheres.
//!
//! The cell edge is at least as large as the largest query radius, so a
//! query only ever inspects the 3x3x3 block of cells around the query
//! point. Buckets are stored in a flat counting-sort layout (offset,
//! length, data) built in one pass with no per-cell allocation.

use glam::Vec3;

/// Smallest permitted cell edge, guarding against degenerate radii.
const MIN_CELL_SIZE: f32 = 0.1;

/// Spatial hash over a set of atom spheres.
pub struct SpatialHash<'a> {
    positions: &'a [Vec3],
    radii: &'a [f32],
    min: Vec3,
    cell_size: f32,
    dims: [usize; 3],
    cell_offsets: Vec<u32>,
    cell_lengths: Vec<u32>,
    data: Vec<u32>,
    neighbour_list_len: usize,
}

impl<'a> SpatialHash<'a> {
    /// Bucket `positions` into cells of edge `max(0.1, max_distance)`
    /// spanning the box `min..=max`.
    ///
    /// `radii` must be matched 1:1 to `positions`; they are the sphere
    /// radii tested by [`Self::within_radii`].
    #[must_use]
    pub fn new(
        positions: &'a [Vec3],
        radii: &'a [f32],
        min: Vec3,
        max: Vec3,
        max_distance: f32,
    ) -> Self {
        let cell_size = max_distance.max(MIN_CELL_SIZE);
        let dims = [
            axis_cell(max.x, min.x, cell_size).max(0) as usize + 1,
            axis_cell(max.y, min.y, cell_size).max(0) as usize + 1,
            axis_cell(max.z, min.z, cell_size).max(0) as usize + 1,
        ];
        let n_cells = dims[0] * dims[1] * dims[2];

        let mut hash = Self {
            positions,
            radii,
            min,
            cell_size,
            dims,
            cell_offsets: vec![0; n_cells],
            cell_lengths: vec![0; n_cells],
            data: vec![0; positions.len()],
            neighbour_list_len: 1,
        };

        let cell_ids: Vec<usize> =
            positions.iter().map(|&p| hash.cell_id(p)).collect();
        for &cid in &cell_ids {
            hash.cell_lengths[cid] += 1;
        }

        let mut offset = 0u32;
        let mut max_cell_length = 0u32;
        for (start, &len) in
            hash.cell_offsets.iter_mut().zip(hash.cell_lengths.iter())
        {
            *start = offset;
            offset += len;
            max_cell_length = max_cell_length.max(len);
        }

        let mut fill = vec![0u32; n_cells];
        for (atom, &cid) in cell_ids.iter().enumerate() {
            let slot = (hash.cell_offsets[cid] + fill[cid]) as usize;
            hash.data[slot] = atom as u32;
            fill[cid] += 1;
        }

        // 27 adjacent cells of maximal population, plus the terminator
        hash.neighbour_list_len = 27 * max_cell_length as usize + 1;
        hash
    }

    /// Length an output buffer must have for [`Self::within_radii`].
    #[must_use]
    pub fn neighbour_list_len(&self) -> usize {
        self.neighbour_list_len
    }

    /// Allocate an output buffer sized for [`Self::within_radii`].
    #[must_use]
    pub fn neighbour_buffer(&self) -> Vec<i32> {
        vec![-1; self.neighbour_list_len]
    }

    /// Cell edge length actually used.
    #[must_use]
    pub fn cell_size(&self) -> f32 {
        self.cell_size
    }

    /// Write into `out` the index of every atom whose `radius + r_extra`
    /// sphere contains `point`, followed by a `-1` terminator. Returns the
    /// number of atoms written.
    ///
    /// `out` must hold at least [`Self::neighbour_list_len`] entries.
    pub fn within_radii(
        &self,
        point: Vec3,
        r_extra: f32,
        out: &mut [i32],
    ) -> usize {
        let near = [
            axis_cell(point.x, self.min.x, self.cell_size),
            axis_cell(point.y, self.min.y, self.cell_size),
            axis_cell(point.z, self.min.z, self.cell_size),
        ];
        let lo = near.map(|c| (c - 1).max(0) as usize);
        let hi = [
            (near[0] + 2).clamp(0, self.dims[0] as i64) as usize,
            (near[1] + 2).clamp(0, self.dims[1] as i64) as usize,
            (near[2] + 2).clamp(0, self.dims[2] as i64) as usize,
        ];

        let jk_dim = self.dims[1] * self.dims[2];
        let mut count = 0;
        for i in lo[0]..hi[0] {
            for j in lo[1]..hi[1] {
                let row = i * jk_dim + j * self.dims[2];
                for cid in row + lo[2]..row + hi[2] {
                    let tail = &mut out[count..];
                    count += self.scan_cell(cid, point, r_extra, tail);
                }
            }
        }
        out[count] = -1;
        count
    }

    fn scan_cell(
        &self,
        cid: usize,
        point: Vec3,
        r_extra: f32,
        out: &mut [i32],
    ) -> usize {
        let start = self.cell_offsets[cid] as usize;
        let end = start + self.cell_lengths[cid] as usize;
        let mut written = 0;
        for &atom in &self.data[start..end] {
            let atom = atom as usize;
            let r_sum = self.radii[atom] + r_extra;
            if self.positions[atom].distance_squared(point) <= r_sum * r_sum {
                out[written] = atom as i32;
                written += 1;
            }
        }
        written
    }

    fn cell_id(&self, p: Vec3) -> usize {
        let clamp = |c: i64, dim: usize| c.clamp(0, dim as i64 - 1) as usize;
        let i = clamp(axis_cell(p.x, self.min.x, self.cell_size), self.dims[0]);
        let j = clamp(axis_cell(p.y, self.min.y, self.cell_size), self.dims[1]);
        let k = clamp(axis_cell(p.z, self.min.z, self.cell_size), self.dims[2]);
        (i * self.dims[1] + j) * self.dims[2] + k
    }
}

fn axis_cell(w: f32, min: f32, cell_size: f32) -> i64 {
    ((w - min) / cell_size).floor() as i64
}

/// Iterate the atom indices of a `-1` terminated neighbour list.
pub fn neighbours(list: &[i32]) -> impl Iterator<Item = usize> + '_ {
    list.iter().take_while(|&&a| a >= 0).map(|&a| a as usize)
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::*;

    fn bounds(positions: &[Vec3]) -> (Vec3, Vec3) {
        positions.iter().fold(
            (Vec3::splat(f32::MAX), Vec3::splat(f32::MIN)),
            |(lo, hi), &p| (lo.min(p), hi.max(p)),
        )
    }

    #[test]
    fn matches_brute_force() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let n = 400;
        let positions: Vec<Vec3> = (0..n)
            .map(|_| {
                Vec3::new(
                    rng.random_range(-20.0..20.0),
                    rng.random_range(-20.0..20.0),
                    rng.random_range(-20.0..20.0),
                )
            })
            .collect();
        let radii: Vec<f32> =
            (0..n).map(|_| rng.random_range(0.5..3.0)).collect();
        let r_extra = 1.0;
        let max_radius = radii.iter().copied().fold(0.0f32, f32::max);
        let (min, max) = bounds(&positions);
        let hash = SpatialHash::new(
            &positions,
            &radii,
            min,
            max,
            max_radius + r_extra,
        );
        let mut out = hash.neighbour_buffer();

        for _ in 0..100 {
            let q = Vec3::new(
                rng.random_range(-22.0..22.0),
                rng.random_range(-22.0..22.0),
                rng.random_range(-22.0..22.0),
            );
            let count = hash.within_radii(q, r_extra, &mut out);
            assert_eq!(out[count], -1);

            let mut found: Vec<usize> = neighbours(&out).collect();
            found.sort_unstable();
            let expected: Vec<usize> = (0..n)
                .filter(|&a| {
                    let r = radii[a] + r_extra;
                    positions[a].distance_squared(q) <= r * r
                })
                .collect();
            assert_eq!(found, expected, "query {q}");
        }
    }

    #[test]
    fn zero_distance_uses_minimum_cell() {
        let positions = [Vec3::ZERO, Vec3::ZERO];
        let radii = [0.0, 0.0];
        let hash =
            SpatialHash::new(&positions, &radii, Vec3::ZERO, Vec3::ZERO, 0.0);
        assert_eq!(hash.cell_size(), MIN_CELL_SIZE);
        // both atoms share one cell
        assert_eq!(hash.neighbour_list_len(), 27 * 2 + 1);

        let mut out = hash.neighbour_buffer();
        assert_eq!(hash.within_radii(Vec3::ZERO, 0.0, &mut out), 2);
    }

    #[test]
    fn far_query_finds_nothing() {
        let positions = [Vec3::ZERO, Vec3::X];
        let radii = [1.0, 1.0];
        let hash =
            SpatialHash::new(&positions, &radii, Vec3::ZERO, Vec3::X, 2.0);
        let mut out = hash.neighbour_buffer();
        assert_eq!(hash.within_radii(Vec3::splat(100.0), 0.0, &mut out), 0);
        assert_eq!(hash.within_radii(Vec3::splat(-100.0), 0.0, &mut out), 0);
        assert_eq!(out[0], -1);
    }

    #[test]
    fn empty_set_is_queryable() {
        let hash = SpatialHash::new(&[], &[], Vec3::ZERO, Vec3::ZERO, 1.0);
        let mut out = hash.neighbour_buffer();
        assert_eq!(out.len(), 1);
        assert_eq!(hash.within_radii(Vec3::ONE, 5.0, &mut out), 0);
    }
}
