//! Analytic molecular surface field.
//!
//! Every grid point inside a probe-expanded atom sphere is projected onto
//! that sphere; unobscured projections store the distance to the sphere
//! surface. Points on the circles where two expanded spheres intersect
//! (the probe's torus rim) then splat plain Euclidean distances into the
//! surrounding cells, which carves the concave re-entrant regions.

use std::f32::consts::TAU;

use glam::Vec3;
use web_time::Instant;

use super::field::{
    AtomData, FieldBuilder, FieldParams, GeneratedField, ScalarField,
    UNVISITED,
};
use super::grid::{bounding_box, SurfaceGrid};
use crate::spatial_hash::{neighbours, SpatialHash};

/// Analytic (sphere and torus projection) field builder.
///
/// The field is triangulated at `isolevel = probe_radius`.
#[derive(Debug, Clone, Copy, Default)]
pub struct AvSurface;

impl FieldBuilder for AvSurface {
    fn build_field(
        &self,
        atoms: &AtomData,
        params: &FieldParams,
    ) -> GeneratedField {
        let start = Instant::now();

        let expanded: Vec<f32> =
            atoms.radii.iter().map(|r| r + params.probe_radius).collect();
        let mut projection = Projection::new(atoms, &expanded, params);
        log::debug!("AvSurface init: {:?}", start.elapsed());

        let t = Instant::now();
        projection.project_points();
        log::debug!("AvSurface project_points: {:?}", t.elapsed());

        let t = Instant::now();
        projection.project_torii();
        log::debug!("AvSurface project_torii: {:?}", t.elapsed());

        let generated = projection.finish();
        log::debug!(
            "AvSurface field {:?} for {} atoms in {:?}",
            generated.field.dims(),
            atoms.len(),
            start.elapsed()
        );
        generated
    }
}

/// Per-call projection state. Nothing here outlives one field build, so
/// concurrent builds on different threads never share scratch memory.
pub(crate) struct Projection<'a> {
    positions: &'a [Vec3],
    atoms: &'a AtomData,
    r: &'a [f32],
    r2: Vec<f32>,
    hash: SpatialHash<'a>,
    grid: SurfaceGrid,
    axes: [Vec<f32>; 3],
    cos_table: Vec<f32>,
    sin_table: Vec<f32>,
    ng_torus: i64,
    probe_radius: f32,
    set_atom_id: bool,
    field: Vec<f32>,
    atom_index: Vec<i32>,
    neighbours: Vec<i32>,
    samples: Vec<Vec3>,
    last_clip: Option<usize>,
}

impl<'a> Projection<'a> {
    /// `expanded` holds the probe-expanded radius of every atom.
    pub(crate) fn new(
        atoms: &'a AtomData,
        expanded: &'a [f32],
        params: &FieldParams,
    ) -> Self {
        let (min, max) = bounding_box(&atoms.positions);
        let max_radius = expanded.iter().copied().fold(0.0, f32::max);

        let grid =
            SurfaceGrid::new(min, max, max_radius, params.scale_factor, 0.0);
        let ng_torus =
            (2 + (params.probe_radius * grid.scale_factor).floor() as i64).max(5);

        let n_samples = params.probe_positions as usize;
        let step = TAU / n_samples.max(1) as f32;
        let (sin_table, cos_table): (Vec<f32>, Vec<f32>) =
            (0..n_samples).map(|i| (step * i as f32).sin_cos()).unzip();

        let hash = SpatialHash::new(
            &atoms.positions,
            expanded,
            min,
            max,
            2.01 * max_radius,
        );
        let neighbours = hash.neighbour_buffer();

        Self {
            positions: &atoms.positions,
            atoms,
            r: expanded,
            r2: expanded.iter().map(|r| r * r).collect(),
            hash,
            axes: grid.axis_coordinates(),
            grid,
            cos_table,
            sin_table,
            ng_torus,
            probe_radius: params.probe_radius,
            set_atom_id: params.set_atom_id,
            field: vec![UNVISITED; grid.len()],
            atom_index: vec![-1; grid.len()],
            neighbours,
            samples: Vec::with_capacity(n_samples),
            last_clip: None,
        }
    }

    /// First atom (other than `a` and `b`) whose expanded sphere strictly
    /// contains `p`, searched among the current neighbour list.
    fn obscured(
        &mut self,
        p: Vec3,
        a: usize,
        b: Option<usize>,
    ) -> Option<usize> {
        let ignored = |ai: usize| ai == a || Some(ai) == b;

        // consecutive queries are usually clipped by the same atom
        if let Some(ai) = self.last_clip {
            if !ignored(ai) && self.obscures(ai, p) {
                return Some(ai);
            }
            self.last_clip = None;
        }

        let hit = neighbours(&self.neighbours)
            .find(|&ai| !ignored(ai) && self.obscures(ai, p));
        self.last_clip = hit;
        hit
    }

    fn obscures(&self, ai: usize, p: Vec3) -> bool {
        self.positions[ai].distance_squared(p) < self.r2[ai]
    }

    /// Clamped cell range `[lo, hi)` per axis of a block of half-width
    /// `ng` around the cell containing `p`.
    fn block(&self, p: Vec3, ng: i64) -> [std::ops::Range<usize>; 3] {
        let cell = self.grid.cell_of(p);
        [0, 1, 2].map(|axis| {
            let dim = self.grid.dims[axis] as i64;
            let lo = (cell[axis] - ng).max(0);
            let hi = (cell[axis] + ng + 2).min(dim);
            lo as usize..hi.max(lo) as usize
        })
    }

    fn cell(&self, ix: usize, iy: usize, iz: usize) -> usize {
        ix + self.grid.dims[0] * (iy + self.grid.dims[1] * iz)
    }

    fn grid_point(&self, ix: usize, iy: usize, iz: usize) -> Vec3 {
        Vec3::new(self.axes[0][ix], self.axes[1][iy], self.axes[2][iz])
    }

    /// Radial projection of `g` onto the expanded sphere of atom `i`.
    pub(crate) fn projection_onto(&self, i: usize, g: Vec3) -> Vec3 {
        let a = self.positions[i];
        let d = g - a;
        let dir = d.try_normalize().unwrap_or(Vec3::X);
        a + dir * self.r[i]
    }

    /// Project grid point `g` onto atom `i` and return the projected
    /// point when no other neighbour sphere obscures it. The neighbour
    /// list must have been filled for atom `i`.
    fn accept_projection(&mut self, i: usize, g: Vec3) -> Option<Vec3> {
        let sp = self.projection_onto(i, g);
        self.obscured(sp, i, None).is_none().then_some(sp)
    }

    fn load_neighbours(&mut self, i: usize) {
        let _ = self.hash.within_radii(
            self.positions[i],
            self.r[i],
            &mut self.neighbours,
        );
    }

    pub(crate) fn project_points(&mut self) {
        for i in 0..self.positions.len() {
            self.load_neighbours(i);
            let ng = (self.r[i] * self.grid.scale_factor).ceil() as i64;
            let [xs, ys, zs] = self.block(self.positions[i], ng);
            for iz in zs {
                for iy in ys.clone() {
                    for ix in xs.clone() {
                        self.project_cell(i, [ix, iy, iz]);
                    }
                }
            }
        }
    }

    fn project_cell(&mut self, i: usize, [ix, iy, iz]: [usize; 3]) {
        let g = self.grid_point(ix, iy, iz);
        let d2 = g.distance_squared(self.positions[i]);
        if d2 >= self.r2[i] {
            return;
        }
        let idx = self.cell(ix, iy, iz);
        if self.field[idx] < 0.0 {
            // inside some sphere: visited
            self.field[idx] = -self.field[idx];
        }
        if self.accept_projection(i, g).is_none() {
            return;
        }
        let dd = self.r[i] - d2.sqrt();
        if dd < self.field[idx] {
            self.field[idx] = dd;
            if self.set_atom_id {
                self.atom_index[idx] = i as i32;
            }
        }
    }

    pub(crate) fn project_torii(&mut self) {
        for a in 0..self.positions.len() {
            self.load_neighbours(a);
            let partners: Vec<usize> =
                neighbours(&self.neighbours).filter(|&b| a < b).collect();
            for b in partners {
                self.project_torus(a, b);
            }
        }
    }

    /// Circle where the expanded spheres of `a` and `b` intersect, as
    /// `(centre, in-plane basis scaled by the circle radius, centre - a)`.
    /// `None` when the spheres do not meet in a circle.
    fn torus_circle(
        &self,
        a: usize,
        b: usize,
    ) -> Option<(Vec3, Vec3, Vec3, Vec3)> {
        let (r1, r2) = (self.r[a], self.r[b]);
        let atob = self.positions[b] - self.positions[a];
        let d = atob.length();
        if d <= f32::EPSILON {
            return None;
        }

        // law of cosines: angle between the axis and the circle
        let cos_a = (r1 * r1 + d * d - r2 * r2) / (2.0 * r1 * d);
        let dmp = r1 * cos_a;
        let r_int_sq = r1 * r1 - dmp * dmp;
        if r_int_sq <= 0.0 {
            return None;
        }
        let r_int = r_int_sq.sqrt();

        let axis = atob / d;
        let n1 = normal_to_line(axis).normalize();
        let n2 = axis.cross(n1).normalize();
        let mid = self.positions[a] + axis * dmp;
        Some((mid, n1 * r_int, n2 * r_int, axis * dmp))
    }

    /// The `probe_positions` equally spaced points on the intersection
    /// circle of `a` and `b`.
    pub(crate) fn torus_samples(
        &self,
        a: usize,
        b: usize,
    ) -> impl Iterator<Item = Vec3> + '_ {
        let circle = self.torus_circle(a, b);
        circle.into_iter().flat_map(move |(mid, n1, n2, _)| {
            self.cos_table
                .iter()
                .zip(&self.sin_table)
                .map(move |(&c, &s)| mid + n1 * c + n2 * s)
        })
    }

    fn project_torus(&mut self, a: usize, b: usize) {
        let Some((_, _, _, atob)) = self.torus_circle(a, b) else {
            return;
        };
        let mut samples = std::mem::take(&mut self.samples);
        samples.clear();
        samples.extend(self.torus_samples(a, b));

        self.last_clip = None;
        for &p in &samples {
            if self.obscured(p, a, Some(b)).is_none() {
                self.splat_distance(p, a, b, atob);
            }
        }
        self.samples = samples;
    }

    /// `atob` runs from atom `a` to the circle centre; its sign decides
    /// which atom owns a grid point.
    fn splat_distance(&mut self, p: Vec3, a: usize, b: usize, atob: Vec3) {
        let [xs, ys, zs] = self.block(p, self.ng_torus);
        for iz in zs {
            for iy in ys.clone() {
                for ix in xs.clone() {
                    let idx = self.cell(ix, iy, iz);
                    let current = self.field[idx];
                    let d = p - self.grid_point(ix, iy, iz);
                    let d2 = d.length_squared();
                    if current > 0.0 && d2 < current * current {
                        self.field[idx] = d2.sqrt();
                        if self.set_atom_id {
                            let owner = if d.dot(atob) < 0.0 { b } else { a };
                            self.atom_index[idx] = owner as i32;
                        }
                    }
                }
            }
        }
    }

    fn finish(self) -> GeneratedField {
        let mut field = self.field;
        for v in &mut field {
            if *v < 0.0 {
                *v = 0.0;
            }
        }
        let atom_index = self.set_atom_id.then(|| {
            self.atom_index
                .iter()
                .map(|&i| {
                    if i >= 0 {
                        self.atoms.external_id(i as usize)
                    } else {
                        -1
                    }
                })
                .collect()
        });
        GeneratedField {
            field: ScalarField::from_parts(field, self.grid.dims, atom_index),
            matrix: self.grid.matrix,
            isolevel: self.probe_radius,
            scale_factor: self.grid.scale_factor,
        }
    }
}

/// A vector perpendicular to `p`: start from `(1, 1, 1)` and solve for the
/// first non-zero axis of `p`.
fn normal_to_line(p: Vec3) -> Vec3 {
    let mut out = Vec3::ONE;
    if p.x != 0.0 {
        out.x = (p.y + p.z) / -p.x;
    } else if p.y != 0.0 {
        out.y = (p.x + p.z) / -p.y;
    } else if p.z != 0.0 {
        out.z = (p.x + p.y) / -p.z;
    }
    out
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::*;

    fn atoms(positions: &[Vec3], radius: f32) -> AtomData {
        AtomData {
            positions: positions.to_vec(),
            radii: vec![radius; positions.len()],
            ids: (0..positions.len() as u32).map(|i| 100 + i).collect(),
        }
    }

    fn expanded(atoms: &AtomData, probe: f32) -> Vec<f32> {
        atoms.radii.iter().map(|r| r + probe).collect()
    }

    #[test]
    fn normal_to_line_is_perpendicular() {
        for p in [Vec3::X, Vec3::Y, Vec3::Z, Vec3::new(0.3, -2.0, 1.1)] {
            assert!(normal_to_line(p).dot(p).abs() < 1e-5);
        }
    }

    #[test]
    fn accepted_projections_are_never_inside_other_atoms() {
        let mut rng = StdRng::seed_from_u64(42);
        let positions: Vec<Vec3> = (0..30)
            .map(|_| {
                Vec3::new(
                    rng.random_range(0.0..8.0),
                    rng.random_range(0.0..8.0),
                    rng.random_range(0.0..8.0),
                )
            })
            .collect();
        let mut data = atoms(&positions, 1.0);
        for r in &mut data.radii {
            *r = rng.random_range(1.0..2.0);
        }
        let params = FieldParams::default();
        let radii = expanded(&data, params.probe_radius);
        let mut projection = Projection::new(&data, &radii, &params);

        let mut accepted = 0;
        for i in 0..data.len() {
            projection.load_neighbours(i);
            for _ in 0..200 {
                let dir = Vec3::new(
                    rng.random_range(-1.0..1.0),
                    rng.random_range(-1.0..1.0),
                    rng.random_range(-1.0..1.0),
                );
                let g = data.positions[i] + dir;
                let Some(sp) = projection.accept_projection(i, g) else {
                    continue;
                };
                accepted += 1;
                for (j, &c) in data.positions.iter().enumerate() {
                    if j != i {
                        assert!(
                            c.distance(sp) >= data.radii[j],
                            "projection of atom {i} inside atom {j}"
                        );
                    }
                }
            }
        }
        assert!(accepted > 0);
    }

    #[test]
    fn torus_yields_probe_positions_samples_on_both_spheres() {
        let data = atoms(&[Vec3::ZERO, Vec3::new(3.0, 0.5, -0.2)], 1.5);
        for n in [1, 7, 30] {
            let params = FieldParams {
                probe_positions: n,
                ..FieldParams::default()
            };
            let radii = expanded(&data, params.probe_radius);
            let projection = Projection::new(&data, &radii, &params);
            let samples: Vec<Vec3> = projection.torus_samples(0, 1).collect();
            assert_eq!(samples.len(), n as usize);
            for p in samples {
                assert!((p.distance(data.positions[0]) - radii[0]).abs() < 1e-4);
                assert!((p.distance(data.positions[1]) - radii[1]).abs() < 1e-4);
            }
        }
    }

    #[test]
    fn torus_ownership_follows_the_circle_centre() {
        // small a, large b: the circle centre lies behind a
        let data = AtomData {
            positions: vec![Vec3::ZERO, Vec3::new(2.5, 0.0, 0.0)],
            radii: vec![1.0, 3.0],
            ids: vec![100, 101],
        };
        let params = FieldParams {
            probe_radius: 0.0,
            ..FieldParams::default()
        };
        let radii = data.radii.clone();
        let mut projection = Projection::new(&data, &radii, &params);
        let (mid, _, _, atob) = projection.torus_circle(0, 1).unwrap();
        assert!((mid.x + 0.35).abs() < 1e-5);
        assert!(atob.distance(mid) < 1e-5);

        let p = projection.torus_samples(0, 1).next().unwrap();
        projection.field.fill(100.0);
        projection.splat_distance(p, 0, 1, atob);

        let [xs, ys, zs] = projection.block(p, projection.ng_torus);
        let mut owned_by_a_beyond_p = 0;
        for iz in zs {
            for iy in ys.clone() {
                for ix in xs.clone() {
                    let idx = projection.cell(ix, iy, iz);
                    let g = projection.grid_point(ix, iy, iz);
                    let owner = projection.atom_index[idx];
                    let expected = i32::from((p - g).dot(atob) < 0.0);
                    assert_eq!(owner, expected, "grid point {g}");
                    if g.x > p.x + 0.1 && owner == 0 {
                        owned_by_a_beyond_p += 1;
                    }
                }
            }
        }
        assert!(owned_by_a_beyond_p > 0);
    }

    #[test]
    fn disjoint_spheres_have_no_torus() {
        let data = atoms(&[Vec3::ZERO, Vec3::new(20.0, 0.0, 0.0)], 1.5);
        let params = FieldParams::default();
        let radii = expanded(&data, params.probe_radius);
        let projection = Projection::new(&data, &radii, &params);
        assert_eq!(projection.torus_samples(0, 1).count(), 0);
    }

    #[test]
    fn field_is_positive_inside_and_zero_outside() {
        let data = atoms(&[Vec3::ZERO], 1.5);
        let generated = AvSurface.build_field(&data, &FieldParams::default());
        let field = &generated.field;
        assert!(field.data().iter().all(|&v| v >= 0.0));
        assert_eq!(generated.isolevel, 1.4);

        // grid point nearest to the atom centre holds the expanded radius
        let centre = generated.matrix.inverse().transform_point3(Vec3::ZERO);
        let (x, y, z) = (
            centre.x.round() as usize,
            centre.y.round() as usize,
            centre.z.round() as usize,
        );
        assert!((field.get(x, y, z) - 2.9).abs() < 0.5);
        assert_eq!(field.get(0, 0, 0), 0.0);

        let ids = field.atom_index().unwrap();
        assert_eq!(ids[field.index(x, y, z)], 100);
        assert_eq!(ids[0], -1);
    }

    #[test]
    fn empty_atom_set_gives_empty_field() {
        let generated =
            AvSurface.build_field(&AtomData::default(), &FieldParams::default());
        assert!(generated.field.data().iter().all(|&v| v == 0.0));
    }
}
