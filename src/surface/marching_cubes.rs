//! Table-driven marching cubes over a [`ScalarField`].
//!
//! Edge crossings are cached per `(grid point, axis)` so neighbouring cubes
//! share vertices. Output positions are in grid coordinates; callers apply
//! the grid to world transform.

use std::sync::Arc;

use glam::Vec3;
use serde::{Deserialize, Serialize};
use web_time::Instant;

use super::field::ScalarField;
use super::tables::{ALLOWED_CONTOURS, EDGE_TABLE, TRI_TABLE};
use super::{IndexBuffer, SurfaceData};

/// Grid offsets of the eight cube corners, in corner-bit order.
const CORNERS: [[i64; 3]; 8] = [
    [0, 0, 0],
    [1, 0, 0],
    [1, 1, 0],
    [0, 1, 0],
    [0, 0, 1],
    [1, 0, 1],
    [1, 1, 1],
    [0, 1, 1],
];

/// Cube edges as `(from corner, to corner, axis)`; `to` is always `from`
/// plus one step along `axis`.
const EDGES: [(usize, usize, usize); 12] = [
    (0, 1, 0),
    (1, 2, 1),
    (3, 2, 0),
    (0, 3, 1),
    (4, 5, 0),
    (5, 6, 1),
    (7, 6, 0),
    (4, 7, 1),
    (0, 4, 2),
    (1, 5, 2),
    (2, 6, 2),
    (3, 7, 2),
];

/// Inclusive integer grid box restricting a triangulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridBox {
    /// First grid point of the box.
    pub min: [i64; 3],
    /// Last grid point of the box.
    pub max: [i64; 3],
}

impl GridBox {
    /// Round a fractional grid-space box to integer grid points.
    #[must_use]
    pub fn round(min: Vec3, max: Vec3) -> Self {
        let r = |v: Vec3| [v.x, v.y, v.z].map(|c| c.round() as i64);
        Self {
            min: r(min),
            max: r(max),
        }
    }
}

/// Parameters of one triangulation pass.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TriangulateParams {
    /// Field value the surface passes through.
    pub isolevel: f32,
    /// Skip gradient normals (implied by `contour`).
    pub no_normals: bool,
    /// Restrict cubes to this box; wrapped periodically when `wrap` is set.
    pub grid_box: Option<GridBox>,
    /// Emit line segments instead of triangles.
    pub contour: bool,
    /// Treat the field as periodic.
    pub wrap: bool,
}

/// Reusable triangulator bound to one field.
///
/// Gradient normals are memoised per grid point across passes, so scrubbing
/// the isolevel on the same field only pays for new grid points.
#[derive(Debug)]
pub struct MarchingCubes {
    field: Arc<ScalarField>,
    vertex_index: Vec<i32>,
    normal_cache: Vec<Vec3>,
    normal_done: Vec<bool>,
}

/// Output buffers of one pass.
#[derive(Default)]
struct Mesh {
    position: Vec<f32>,
    normal: Vec<f32>,
    atom_index: Vec<i32>,
    index: Vec<u32>,
}

/// Per-pass settings derived from [`TriangulateParams`].
#[derive(Clone, Copy)]
struct Pass {
    isolevel: f32,
    normals: bool,
    normal_factor: f32,
    contour: bool,
    wrap: bool,
}

impl MarchingCubes {
    /// Triangulator for `field`.
    #[must_use]
    pub fn new(field: Arc<ScalarField>) -> Self {
        Self {
            field,
            vertex_index: Vec::new(),
            normal_cache: Vec::new(),
            normal_done: Vec::new(),
        }
    }

    /// Field being triangulated.
    #[must_use]
    pub fn field(&self) -> &Arc<ScalarField> {
        &self.field
    }

    /// Polygonize the field at `params.isolevel`.
    ///
    /// Isolevels outside the field's range yield an empty mesh. Box
    /// coordinates outside the grid are clamped unless `wrap` is set.
    pub fn triangulate(&mut self, params: &TriangulateParams) -> SurfaceData {
        let start = Instant::now();
        let contour = params.contour;
        let pass = Pass {
            isolevel: params.isolevel,
            normals: !(params.no_normals || contour),
            normal_factor: if params.isolevel > 0.0 { -1.0 } else { 1.0 },
            contour,
            wrap: params.wrap,
        };

        let dims = self.field.dims().map(|d| d as i64);
        let (mut beg, mut end) = match params.grid_box {
            Some(b) => (b.min, b.max),
            None => ([0; 3], dims.map(|d| d - 1)),
        };

        if !pass.wrap {
            let (lo, hi) = if pass.normals { (1, 2) } else { (0, 1) };
            beg = beg.map(|b| b.max(lo));
            end = [0, 1, 2].map(|a| end[a].min(dims[a] - hi));
            match self.occupied_bounds(beg, end, pass.isolevel) {
                Some((first, last)) => {
                    beg = [0, 1, 2].map(|a| beg[a].max(first[a] - 1));
                    end = [0, 1, 2].map(|a| end[a].min(last[a] + 1));
                }
                None => return SurfaceData::empty(contour),
            }
        }
        if (0..3).any(|a| beg[a] >= end[a]) || self.field.is_empty() {
            return SurfaceData::empty(contour);
        }

        self.reset_vertex_index(beg, end, pass.wrap);
        if pass.normals && self.normal_cache.len() != self.field.len() {
            self.normal_cache = vec![Vec3::ZERO; self.field.len()];
            self.normal_done = vec![false; self.field.len()];
        }

        let mut mesh = Mesh::default();
        let mut edge_filter = 15u8;
        for z in beg[2]..end[2] {
            edge_filter |= 2;
            for y in beg[1]..end[1] {
                edge_filter |= 1;
                for x in beg[0]..end[0] {
                    self.polygonize([x, y, z], &pass, edge_filter, &mut mesh);
                    edge_filter &= !1;
                }
                edge_filter &= !2;
            }
            edge_filter &= !4;
        }

        let vertex_count = mesh.position.len() / 3;
        log::debug!(
            "MarchingCubes iso {} {}: {vertex_count} vertices in {:?}",
            pass.isolevel,
            if contour { "contour" } else { "mesh" },
            start.elapsed()
        );
        SurfaceData {
            position: mesh.position,
            normal: pass.normals.then_some(mesh.normal),
            index: IndexBuffer::from_indices(mesh.index, vertex_count),
            atom_index: self.field.atom_index().map(|_| mesh.atom_index),
            contour,
        }
    }

    /// Bounding box of the grid points within `beg..=end` whose value is
    /// at or above `isolevel`.
    ///
    /// Cubes outside this box, widened by one, have every corner below the
    /// isolevel, so clipping to it never drops a crossing.
    fn occupied_bounds(
        &self,
        beg: [i64; 3],
        end: [i64; 3],
        isolevel: f32,
    ) -> Option<([i64; 3], [i64; 3])> {
        let mut first = [i64::MAX; 3];
        let mut last = [i64::MIN; 3];
        let field = &*self.field;
        for z in beg[2]..=end[2] {
            for y in beg[1]..=end[1] {
                let row = field.index(0, y as usize, z as usize);
                for x in beg[0]..=end[0] {
                    if field.data()[row + x as usize] >= isolevel {
                        let p = [x, y, z];
                        first = [0, 1, 2].map(|a| first[a].min(p[a]));
                        last = [0, 1, 2].map(|a| last[a].max(p[a]));
                    }
                }
            }
        }
        (first[0] <= last[0]).then_some((first, last))
    }

    fn reset_vertex_index(&mut self, beg: [i64; 3], end: [i64; 3], wrap: bool) {
        let n = self.field.len();
        if self.vertex_index.len() != 3 * n || wrap {
            self.vertex_index.clear();
            self.vertex_index.resize(3 * n, -1);
            return;
        }
        let [nx, ny, nz] = self.field.dims().map(|d| d as i64);
        let lo = beg.map(|b| (b - 2).max(0));
        let hi = [
            (end[0] + 2).min(nx),
            (end[1] + 2).min(ny),
            (end[2] + 2).min(nz),
        ];
        for z in lo[2]..hi[2] {
            for y in lo[1]..hi[1] {
                let row = 3 * (nx * (y + ny * z)) as usize;
                let from = row + 3 * lo[0] as usize;
                let to = row + 3 * hi[0] as usize;
                self.vertex_index[from..to].fill(-1);
            }
        }
    }

    fn flat_index(&self, [x, y, z]: [i64; 3], wrap: bool) -> usize {
        let [nx, ny, nz] = self.field.dims().map(|d| d as i64);
        let (x, y, z) = if wrap {
            (x.rem_euclid(nx), y.rem_euclid(ny), z.rem_euclid(nz))
        } else {
            (x, y, z)
        };
        (x + nx * (y + ny * z)) as usize
    }

    /// Central-difference gradient at flat index `q`, memoised. Offsets
    /// wrap around the flat array.
    fn gradient(&mut self, q: usize) -> Vec3 {
        if self.normal_done[q] {
            return self.normal_cache[q];
        }
        let f = self.field.data();
        let n = f.len();
        let yd = self.field.nx();
        let zd = yd * self.field.ny();
        let diff = |d: usize| f[(q + n - d % n) % n] - f[(q + d) % n];
        let g = Vec3::new(diff(1), diff(yd), diff(zd));
        self.normal_cache[q] = g;
        self.normal_done[q] = true;
        g
    }

    fn polygonize(
        &mut self,
        origin: [i64; 3],
        pass: &Pass,
        edge_filter: u8,
        mesh: &mut Mesh,
    ) {
        let corner_index = CORNERS.map(|c| {
            self.flat_index(
                [origin[0] + c[0], origin[1] + c[1], origin[2] + c[2]],
                pass.wrap,
            )
        });
        let values = corner_index.map(|q| self.field.data()[q]);

        let mut cube = 0usize;
        for (i, &v) in values.iter().enumerate() {
            if v < pass.isolevel {
                cube |= 1 << i;
            }
        }
        let bits = EDGE_TABLE[cube];
        if bits == 0 {
            return;
        }

        let mut edge_vertex = [0u32; 12];
        for (e, &(from, to, axis)) in EDGES.iter().enumerate() {
            if bits & (1 << e) == 0 {
                continue;
            }
            let key = 3 * corner_index[from] + axis;
            let cached = self.vertex_index[key];
            edge_vertex[e] = if cached >= 0 {
                cached as u32
            } else {
                let v = self.emit_vertex(
                    origin,
                    (from, to, axis),
                    corner_index,
                    values,
                    pass,
                    mesh,
                );
                self.vertex_index[key] = v as i32;
                v
            };
        }

        for tri in TRI_TABLE[cube].chunks_exact(3) {
            if tri[0] < 0 {
                break;
            }
            let [e1, e2, e3] = [tri[0], tri[1], tri[2]].map(|e| e as usize);
            if pass.contour {
                for (a, b) in [(e1, e2), (e2, e3), (e1, e3)] {
                    if ALLOWED_CONTOURS[a][b] & edge_filter != 0 {
                        mesh.index.extend([edge_vertex[a], edge_vertex[b]]);
                    }
                }
            } else if pass.isolevel < 0.0 {
                mesh.index.extend([e1, e2, e3].map(|e| edge_vertex[e]));
            } else {
                mesh.index.extend([e2, e1, e3].map(|e| edge_vertex[e]));
            }
        }
    }

    fn emit_vertex(
        &mut self,
        origin: [i64; 3],
        (from, to, axis): (usize, usize, usize),
        corner_index: [usize; 8],
        values: [f32; 8],
        pass: &Pass,
        mesh: &mut Mesh,
    ) -> u32 {
        let (v1, v2) = (values[from], values[to]);
        let mu = (pass.isolevel - v1) / (v2 - v1);

        let c = CORNERS[from];
        let mut p = Vec3::new(
            (origin[0] + c[0]) as f32,
            (origin[1] + c[1]) as f32,
            (origin[2] + c[2]) as f32,
        );
        p[axis] += mu;
        mesh.position.extend_from_slice(&p.to_array());

        if pass.normals {
            let n1 = self.gradient(corner_index[from]);
            let n2 = self.gradient(corner_index[to]);
            let n = pass.normal_factor * n1.lerp(n2, mu);
            mesh.normal.extend_from_slice(&n.to_array());
        }

        if let Some(ids) = self.field.atom_index() {
            let nearest = if mu >= 0.5 { to } else { from };
            mesh.atom_index.push(ids[corner_index[nearest]]);
        }

        (mesh.position.len() / 3 - 1) as u32
    }
}
