//! Grid placement for molecular surface fields.

use glam::{Mat4, Vec3};

/// Upper bound on `dims.x * dims.y * dims.z * 3` before the scale factor
/// is reduced.
const MAX_GRID_SIZE: f32 = 256.0e6;

/// Placement and resolution of a dense field grid around a set of atoms.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceGrid {
    /// World position of grid point `(0, 0, 0)`.
    pub min: Vec3,
    /// World position of the last grid point.
    pub max: Vec3,
    /// Number of grid points along x, y and z.
    pub dims: [usize; 3],
    /// Grid points per angstrom, possibly reduced from the requested one.
    pub scale_factor: f32,
    /// Grid to world transform for the x-fastest layout.
    pub matrix: Mat4,
}

impl SurfaceGrid {
    /// Pad the atom bounding box `min..max` by
    /// `3 / scale_factor + max_radius + extra_margin`, snap it to the grid
    /// and derive dimensions. Oversized grids are coarsened once so the
    /// point count stays under the memory budget.
    #[must_use]
    pub fn new(
        min: Vec3,
        max: Vec3,
        max_radius: f32,
        scale_factor: f32,
        extra_margin: f32,
    ) -> Self {
        let margin = 3.0 / scale_factor + max_radius + extra_margin;
        let padded_min = min - Vec3::splat(margin);
        let padded_max = max + Vec3::splat(margin);

        let mut scale = scale_factor;
        let (mut lo, mut hi, mut dims) = snap(padded_min, padded_max, scale);

        let size = dims[0] as f32 * dims[1] as f32 * dims[2] as f32 * 3.0;
        if size >= MAX_GRID_SIZE {
            scale *= (MAX_GRID_SIZE / size).cbrt();
            log::debug!(
                "surface grid {dims:?} too large, scale factor reduced to \
                 {scale:.3}"
            );
            (lo, hi, dims) = snap(lo, hi, scale);
        }

        Self {
            min: lo,
            max: hi,
            dims,
            scale_factor: scale,
            matrix: Mat4::from_translation(lo)
                * Mat4::from_scale(Vec3::splat(1.0 / scale)),
        }
    }

    /// Total number of grid points.
    #[must_use]
    pub fn len(&self) -> usize {
        self.dims[0] * self.dims[1] * self.dims[2]
    }

    /// Whether the grid has no points.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// World coordinate of grid point `(i, j, k)`.
    #[must_use]
    pub fn point(&self, i: usize, j: usize, k: usize) -> Vec3 {
        self.min + Vec3::new(i as f32, j as f32, k as f32) / self.scale_factor
    }

    /// Grid coordinate (floored) of a world position, possibly outside
    /// the grid.
    #[must_use]
    pub fn cell_of(&self, p: Vec3) -> [i64; 3] {
        let g = ((p - self.min) * self.scale_factor).floor();
        [g.x as i64, g.y as i64, g.z as i64]
    }

    /// World coordinates of the grid points along each axis.
    #[must_use]
    pub fn axis_coordinates(&self) -> [Vec<f32>; 3] {
        let step = 1.0 / self.scale_factor;
        [0, 1, 2].map(|axis| {
            (0..self.dims[axis])
                .map(|i| self.min[axis] + step * i as f32)
                .collect()
        })
    }
}

fn snap(min: Vec3, max: Vec3, scale: f32) -> (Vec3, Vec3, [usize; 3]) {
    let lo = (min * scale).floor() / scale;
    let hi = (max * scale).ceil() / scale;
    let d = ((hi - lo) * scale).ceil() + Vec3::ONE;
    (lo, hi, [d.x as usize, d.y as usize, d.z as usize])
}

/// Axis-aligned bounds of a point set; an empty set yields a zero box.
#[must_use]
pub fn bounding_box(positions: &[Vec3]) -> (Vec3, Vec3) {
    if positions.is_empty() {
        return (Vec3::ZERO, Vec3::ZERO);
    }
    positions.iter().fold(
        (Vec3::splat(f32::INFINITY), Vec3::splat(f32::NEG_INFINITY)),
        |(lo, hi), &p| (lo.min(p), hi.max(p)),
    )
}
