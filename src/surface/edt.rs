//! Euclidean distance transform molecular surface field.
//!
//! Atom balls are rasterised into a voxel occupancy grid, the boundary of
//! the probe-expanded union is found, and a shell-by-shell sweep
//! propagates the nearest boundary voxel inwards. Voxels at least the
//! cutoff away from the solvent accessible boundary, or beyond the reach
//! of the sweep, form the solvent excluded volume. Without an explicit
//! cutoff it is the probe radius divided by the scale factor, in grid
//! units. The result is a 1/0 occupancy field.

use rustc_hash::FxHashMap;
use web_time::Instant;

use super::field::{
    AtomData, FieldBuilder, FieldParams, GeneratedField, ScalarField,
    SurfaceType,
};
use super::grid::{bounding_box, SurfaceGrid};

const INOUT: u8 = 1;
const IS_DONE: u8 = 2;
const IS_BOUND: u8 = 4;

/// Occupancy fields are triangulated half way between 0 and 1.
pub const EDT_ISOLEVEL: f32 = 0.5;

/// Slack on the propagation stop distance.
const PROPAGATION_SLACK: f32 = 1.0404;

/// Face, edge and corner neighbour offsets, swept in that order.
const NEIGHBOURS: [[i32; 3]; 26] = [
    [1, 0, 0],
    [-1, 0, 0],
    [0, 1, 0],
    [0, -1, 0],
    [0, 0, 1],
    [0, 0, -1],
    [1, 1, 0],
    [1, -1, 0],
    [-1, 1, 0],
    [-1, -1, 0],
    [1, 0, 1],
    [1, 0, -1],
    [-1, 0, 1],
    [-1, 0, -1],
    [0, 1, 1],
    [0, 1, -1],
    [0, -1, 1],
    [0, -1, -1],
    [1, 1, 1],
    [1, 1, -1],
    [1, -1, 1],
    [-1, 1, 1],
    [1, -1, -1],
    [-1, -1, 1],
    [-1, 1, -1],
    [-1, -1, -1],
];

/// Distance-transform field builder for the `vws`, `sas`, `ms` and `ses`
/// flavours.
#[derive(Debug, Clone, Copy)]
pub struct EdtSurface {
    surface_type: SurfaceType,
}

impl EdtSurface {
    /// Builder for `surface_type`; [`SurfaceType::Av`] is treated as `ms`.
    #[must_use]
    pub fn new(surface_type: SurfaceType) -> Self {
        let surface_type = match surface_type {
            SurfaceType::Av => SurfaceType::Ms,
            other => other,
        };
        Self { surface_type }
    }

    /// Flavour this builder produces.
    #[must_use]
    pub fn surface_type(&self) -> SurfaceType {
        self.surface_type
    }
}

impl FieldBuilder for EdtSurface {
    fn build_field(
        &self,
        atoms: &AtomData,
        params: &FieldParams,
    ) -> GeneratedField {
        let start = Instant::now();
        let ty = self.surface_type;
        let expand = ty != SurfaceType::Vws;

        let mut voxels = Voxels::new(atoms, params, expand);

        let t = Instant::now();
        voxels.fill_atoms(expand);
        log::debug!("EdtSurface fill: {:?}", t.elapsed());

        voxels.build_boundary();

        if matches!(ty, SurfaceType::Ms | SurfaceType::Ses) {
            let t = Instant::now();
            voxels.distance_map();
            log::debug!("EdtSurface distance map: {:?}", t.elapsed());
        }
        if ty == SurfaceType::Ses {
            voxels.fill_van_der_waals();
        }

        let generated = voxels.finish(ty);
        log::debug!(
            "EdtSurface {ty} field {:?} for {} atoms in {:?}",
            generated.field.dims(),
            atoms.len(),
            start.elapsed()
        );
        generated
    }
}

/// Per-call voxel state.
struct Voxels<'a> {
    atoms: &'a AtomData,
    grid: SurfaceGrid,
    dims: [i32; 3],
    probe: f32,
    scale: f32,
    cut_radius: f32,
    cutoff: f32,
    set_atom_id: bool,
    centres: Vec<[i32; 3]>,
    bits: Vec<u8>,
    distance: Vec<f32>,
    boundary_point: Vec<[u16; 3]>,
    atom_id: Vec<i32>,
    balls: FxHashMap<u32, Vec<[i32; 3]>>,
}

impl<'a> Voxels<'a> {
    fn new(atoms: &'a AtomData, params: &FieldParams, expand: bool) -> Self {
        let probe = params.probe_radius;
        let (min, max) = bounding_box(&atoms.positions);
        let grid = SurfaceGrid::new(
            min,
            max,
            atoms.max_radius(),
            params.scale_factor,
            if expand { probe } else { 0.0 },
        );
        let scale = grid.scale_factor;
        let cut_radius = probe * scale;
        let cutoff = if params.cutoff > 0.0 {
            params.cutoff
        } else {
            probe / scale
        };

        let centres = atoms
            .positions
            .iter()
            .map(|&p| {
                let c = (0.5 + scale * (p - grid.min)).floor();
                [c.x as i32, c.y as i32, c.z as i32]
            })
            .collect();

        let n = grid.len();
        Self {
            atoms,
            dims: grid.dims.map(|d| d as i32),
            grid,
            probe,
            scale,
            cut_radius,
            cutoff,
            set_atom_id: params.set_atom_id,
            centres,
            bits: vec![0; n],
            distance: if expand { vec![-1.0; n] } else { Vec::new() },
            boundary_point: Vec::new(),
            atom_id: vec![-1; n],
            balls: FxHashMap::default(),
        }
    }

    fn index(&self, [x, y, z]: [i32; 3]) -> Option<usize> {
        let [nx, ny, nz] = self.dims;
        ((0..nx).contains(&x) && (0..ny).contains(&y) && (0..nz).contains(&z))
            .then(|| (x + nx * (y + ny * z)) as usize)
    }

    fn coords(&self, idx: usize) -> [i32; 3] {
        let nx = self.dims[0] as usize;
        let ny = self.dims[1] as usize;
        [
            (idx % nx) as i32,
            ((idx / nx) % ny) as i32,
            (idx / (nx * ny)) as i32,
        ]
    }

    /// Voxel offsets of a ball of `radius` angstroms, cached per radius.
    fn ball(&mut self, radius: f32) -> Vec<[i32; 3]> {
        let scale = self.scale;
        self.balls
            .entry(radius.to_bits())
            .or_insert_with(|| {
                let t = radius * scale + 0.5;
                let t2 = t * t;
                let w = t.floor() as i32;
                let mut offsets = Vec::new();
                for dz in -w..=w {
                    for dy in -w..=w {
                        for dx in -w..=w {
                            if (dx * dx + dy * dy + dz * dz) as f32 <= t2 {
                                offsets.push([dx, dy, dz]);
                            }
                        }
                    }
                }
                offsets
            })
            .clone()
    }

    /// Squared voxel distance from `v` to the centre of atom `atom`.
    fn centre_dist2(&self, v: [i32; 3], atom: usize) -> i32 {
        let c = self.centres[atom];
        let d = [v[0] - c[0], v[1] - c[1], v[2] - c[2]];
        d[0] * d[0] + d[1] * d[1] + d[2] * d[2]
    }

    /// Mark every voxel of the atom balls with `flag`, keeping the nearest
    /// atom centre as the voxel's atom.
    fn rasterise(&mut self, flag: u8, expand: bool) {
        for atom in 0..self.atoms.len() {
            let radius = self.atoms.radii[atom]
                + if expand { self.probe } else { 0.0 };
            let ball = self.ball(radius);
            let c = self.centres[atom];
            for off in ball {
                let v = [c[0] + off[0], c[1] + off[1], c[2] + off[2]];
                let Some(idx) = self.index(v) else {
                    continue;
                };
                if self.bits[idx] & flag == 0 {
                    self.bits[idx] |= flag;
                    self.atom_id[idx] = atom as i32;
                } else if self.set_atom_id {
                    let owner = self.atom_id[idx];
                    if owner >= 0
                        && owner as usize != atom
                        && self.centre_dist2(v, atom)
                            < self.centre_dist2(v, owner as usize)
                    {
                        self.atom_id[idx] = atom as i32;
                    }
                }
            }
        }
    }

    fn fill_atoms(&mut self, expand: bool) {
        self.rasterise(INOUT, expand);
        for b in &mut self.bits {
            if *b & INOUT != 0 {
                *b |= IS_DONE;
            }
        }
    }

    /// Union the plain van der Waals balls into the done set.
    fn fill_van_der_waals(&mut self) {
        for b in &mut self.bits {
            *b &= !IS_DONE;
        }
        self.rasterise(IS_DONE, false);
    }

    /// Flag filled voxels with at least one unfilled 26-neighbour.
    fn build_boundary(&mut self) {
        for idx in 0..self.bits.len() {
            if self.bits[idx] & INOUT == 0 {
                continue;
            }
            let v = self.coords(idx);
            let on_boundary = NEIGHBOURS.iter().any(|nb| {
                self.index([v[0] + nb[0], v[1] + nb[1], v[2] + nb[2]])
                    .is_some_and(|n| self.bits[n] & INOUT == 0)
            });
            if on_boundary {
                self.bits[idx] |= IS_BOUND;
            }
        }
    }

    /// Propagate the nearest boundary voxel into the filled volume and
    /// keep voxels at least `cutoff` grid units inside as solid.
    fn distance_map(&mut self) {
        let n = self.bits.len();
        self.boundary_point = vec![[0; 3]; n];

        let mut frontier = Vec::new();
        for idx in 0..n {
            self.bits[idx] &= !IS_DONE;
            let b = self.bits[idx];
            if b & INOUT != 0 && b & IS_BOUND != 0 {
                let v = self.coords(idx);
                self.boundary_point[idx] = v.map(|c| c as u16);
                self.distance[idx] = 0.0;
                self.bits[idx] = (b | IS_DONE) & !IS_BOUND;
                frontier.push(idx);
            }
        }

        let stop = PROPAGATION_SLACK * self.cut_radius * self.cut_radius;
        let mut reached = Vec::new();
        while !frontier.is_empty() {
            reached.clear();
            for group in [0..6, 6..18, 18..26] {
                for &idx in &frontier {
                    self.sweep(idx, &NEIGHBOURS[group.clone()], &mut reached);
                }
            }
            frontier.clear();
            for &idx in &reached {
                self.bits[idx] &= !IS_BOUND;
                if self.distance[idx] <= stop {
                    frontier.push(idx);
                }
            }
        }

        let cutoff_sq = self.cutoff * self.cutoff;
        for idx in 0..n {
            self.settle(idx, cutoff_sq);
        }
    }

    /// Final solid test for one voxel after propagation: filled voxels not
    /// reached by the sweep, or at least `cutoff` from the boundary.
    fn settle(&mut self, idx: usize, cutoff_sq: f32) {
        let b = self.bits[idx] & !IS_BOUND;
        self.bits[idx] = b;
        if b & INOUT == 0 {
            return;
        }
        let done = b & IS_DONE != 0;
        if !done || self.distance[idx] >= cutoff_sq {
            self.bits[idx] |= IS_BOUND;
            if self.set_atom_id && done {
                let bp = self.boundary_point[idx].map(i32::from);
                if let Some(src) = self.index(bp) {
                    self.atom_id[idx] = self.atom_id[src];
                }
            }
        }
    }

    /// Offer the boundary point of `idx` to its neighbours in `offsets`,
    /// recording newly improved voxels in `reached`.
    fn sweep(
        &mut self,
        idx: usize,
        offsets: &[[i32; 3]],
        reached: &mut Vec<usize>,
    ) {
        let v = self.coords(idx);
        let bp = self.boundary_point[idx];
        let bpi = bp.map(i32::from);
        for nb in offsets {
            let t = [v[0] + nb[0], v[1] + nb[1], v[2] + nb[2]];
            let Some(ti) = self.index(t) else {
                continue;
            };
            let b = self.bits[ti];
            if b & INOUT == 0 {
                continue;
            }
            let d = [t[0] - bpi[0], t[1] - bpi[1], t[2] - bpi[2]];
            let square = (d[0] * d[0] + d[1] * d[1] + d[2] * d[2]) as f32;
            if b & IS_DONE == 0 {
                self.boundary_point[ti] = bp;
                self.distance[ti] = square;
                self.bits[ti] |= IS_DONE | IS_BOUND;
                reached.push(ti);
            } else if square < self.distance[ti] {
                self.boundary_point[ti] = bp;
                self.distance[ti] = square;
                if b & IS_BOUND == 0 {
                    self.bits[ti] |= IS_BOUND;
                    reached.push(ti);
                }
            }
        }
    }

    fn finish(self, ty: SurfaceType) -> GeneratedField {
        let solid = |b: u8| match ty {
            SurfaceType::Ms => b & IS_BOUND != 0,
            SurfaceType::Ses => b & (IS_BOUND | IS_DONE) != 0,
            SurfaceType::Vws | SurfaceType::Sas | SurfaceType::Av => {
                b & IS_DONE != 0
            }
        };
        let data = self
            .bits
            .iter()
            .map(|&b| if solid(b) { 1.0 } else { 0.0 })
            .collect();
        let atom_index = self.set_atom_id.then(|| {
            self.atom_id
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
            field: ScalarField::from_parts(data, self.grid.dims, atom_index),
            matrix: self.grid.matrix,
            isolevel: EDT_ISOLEVEL,
            scale_factor: self.scale,
        }
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec3;

    use super::*;

    fn single_atom() -> AtomData {
        AtomData {
            positions: vec![Vec3::ZERO],
            radii: vec![1.5],
            ids: vec![7],
        }
    }

    fn solid_count(ty: SurfaceType, atoms: &AtomData) -> usize {
        let generated =
            EdtSurface::new(ty).build_field(atoms, &FieldParams::default());
        generated.field.data().iter().filter(|&&v| v == 1.0).count()
    }

    #[test]
    fn occupancy_is_binary() {
        let generated = EdtSurface::new(SurfaceType::Ms)
            .build_field(&single_atom(), &FieldParams::default());
        assert!(generated
            .field
            .data()
            .iter()
            .all(|&v| v == 0.0 || v == 1.0));
        assert_eq!(generated.isolevel, EDT_ISOLEVEL);
    }

    #[test]
    fn sas_contains_vws() {
        let atoms = single_atom();
        let vws = solid_count(SurfaceType::Vws, &atoms);
        let sas = solid_count(SurfaceType::Sas, &atoms);
        assert!(vws > 0);
        assert!(sas > vws);
    }

    #[test]
    fn default_cutoff_is_probe_over_scale() {
        let atoms = single_atom();
        let voxels = Voxels::new(&atoms, &FieldParams::default(), true);
        assert!((voxels.cutoff - 0.7).abs() < 1e-6);
        assert!((voxels.cut_radius - 2.8).abs() < 1e-6);
        let explicit = FieldParams {
            cutoff: 2.0,
            ..FieldParams::default()
        };
        assert_eq!(Voxels::new(&atoms, &explicit, true).cutoff, 2.0);
    }

    #[test]
    fn default_cutoff_strips_only_the_boundary_shell() {
        let atoms = single_atom();
        let vws = solid_count(SurfaceType::Vws, &atoms);
        let sas = solid_count(SurfaceType::Sas, &atoms);
        let ms = solid_count(SurfaceType::Ms, &atoms);
        assert!(ms > vws);
        assert!(ms < sas);
    }

    #[test]
    fn probe_sized_cutoff_stays_inside_the_vdw_ball() {
        let atoms = single_atom();
        let params = FieldParams {
            cutoff: 1.4 * 2.0,
            ..FieldParams::default()
        };
        let count = |ty| {
            let generated = EdtSurface::new(ty).build_field(&atoms, &params);
            generated.field.data().iter().filter(|&&v| v == 1.0).count()
        };
        let vws = count(SurfaceType::Vws);
        let ms = count(SurfaceType::Ms);
        assert!(ms > 0);
        assert!(ms < vws);
        // the van der Waals fill restores the full ball
        assert_eq!(count(SurfaceType::Ses), vws);
    }

    #[test]
    fn atom_ids_are_external() {
        let generated = EdtSurface::new(SurfaceType::Sas)
            .build_field(&single_atom(), &FieldParams::default());
        let field = &generated.field;
        let ids = field.atom_index().unwrap();
        for (v, &id) in field.data().iter().zip(ids) {
            if *v == 1.0 {
                assert_eq!(id, 7);
            }
        }
        assert!(ids.contains(&-1));
    }

    #[test]
    fn av_request_falls_back_to_ms() {
        let builder = EdtSurface::new(SurfaceType::Av);
        assert_eq!(builder.surface_type(), SurfaceType::Ms);
    }
}
