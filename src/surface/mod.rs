//! Surface extraction: field builders, marching cubes, smoothing and the
//! molecular surface facade.
//!
//! The flow is leaf first. A [`FieldBuilder`] fills a [`ScalarField`]
//! around atom spheres, [`MarchingCubes`] polygonizes it, and
//! [`laplacian_smooth`] optionally relaxes the result. [`Surface`] is the
//! record handed to downstream buffer builders.

mod av;
mod edt;
mod field;
mod grid;
mod marching_cubes;
mod molecular;
mod smooth;
mod tables;

use glam::{Mat3, Mat4, Vec3};
use serde::{Deserialize, Serialize};

pub use av::AvSurface;
pub use edt::{EdtSurface, EDT_ISOLEVEL};
pub use field::{
    AtomData, FieldBuilder, FieldParams, GeneratedField, ScalarField,
    SurfaceType, UNVISITED,
};
pub use grid::{bounding_box, SurfaceGrid};
pub use marching_cubes::{GridBox, MarchingCubes, TriangulateParams};
pub(crate) use molecular::molsurf_task;
pub use molecular::{
    covalent_radius, vdw_radius, AtomList, MolecularSurface,
    MolecularSurfaceParams, RadiusKind, RadiusParams, StructureSource,
};
pub use smooth::{compute_vertex_normals, laplacian_smooth};

/// Vertex indices of a mesh, 16-bit when every vertex fits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexBuffer {
    /// Meshes of at most 65535 vertices.
    U16(Vec<u16>),
    /// Larger meshes.
    U32(Vec<u32>),
}

impl IndexBuffer {
    /// Pick the narrowest width able to address `vertex_count` vertices.
    #[must_use]
    pub fn from_indices(indices: Vec<u32>, vertex_count: usize) -> Self {
        if vertex_count > usize::from(u16::MAX) {
            Self::U32(indices)
        } else {
            Self::U16(indices.into_iter().map(|i| i as u16).collect())
        }
    }

    /// Number of indices.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::U16(v) => v.len(),
            Self::U32(v) => v.len(),
        }
    }

    /// Whether there are no indices.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Index `i` widened to 32 bits.
    #[must_use]
    pub fn get(&self, i: usize) -> Option<u32> {
        match self {
            Self::U16(v) => v.get(i).map(|&x| u32::from(x)),
            Self::U32(v) => v.get(i).copied(),
        }
    }

    /// Indices widened to 32 bits.
    #[must_use]
    pub fn to_u32_vec(&self) -> Vec<u32> {
        match self {
            Self::U16(v) => v.iter().map(|&x| u32::from(x)).collect(),
            Self::U32(v) => v.clone(),
        }
    }

    /// Whether the indices are 32-bit.
    #[must_use]
    pub fn is_u32(&self) -> bool {
        matches!(self, Self::U32(_))
    }

    /// Raw bytes for upload to an index buffer.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::U16(v) => bytemuck::cast_slice(v),
            Self::U32(v) => bytemuck::cast_slice(v),
        }
    }
}

/// Mesh produced by triangulation: xyz-interleaved positions, optional
/// normals and per-vertex atom ids, and triangle (or line) indices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurfaceData {
    /// Vertex positions, three floats per vertex.
    pub position: Vec<f32>,
    /// Vertex normals, same layout as `position`.
    pub normal: Option<Vec<f32>>,
    /// Triangles, or line segments when `contour` is set.
    pub index: IndexBuffer,
    /// Atom id per vertex, `-1` where none contributed.
    pub atom_index: Option<Vec<i32>>,
    /// Whether `index` holds line segments.
    pub contour: bool,
}

impl SurfaceData {
    /// Mesh with no vertices.
    #[must_use]
    pub fn empty(contour: bool) -> Self {
        Self {
            position: Vec::new(),
            normal: None,
            index: IndexBuffer::U16(Vec::new()),
            atom_index: None,
            contour,
        }
    }

    /// Number of vertices.
    #[must_use]
    pub fn vertex_count(&self) -> usize {
        self.position.len() / 3
    }

    /// Whether the mesh has no vertices.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.position.is_empty()
    }

    /// Raw position bytes for upload to a vertex buffer.
    #[must_use]
    pub fn position_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.position)
    }

    /// Map positions through `matrix` and normals through its cofactor
    /// matrix, renormalising them.
    pub fn transform(&mut self, matrix: &Mat4) {
        for p in self.position.chunks_exact_mut(3) {
            matrix.transform_point3(Vec3::from_slice(p)).write_to_slice(p);
        }
        if let Some(normal) = &mut self.normal {
            let n_mat = normal_matrix(matrix);
            for n in normal.chunks_exact_mut(3) {
                (n_mat * Vec3::from_slice(n)).normalize_or_zero().write_to_slice(n);
            }
        }
    }

    /// Vertex positions as vectors.
    #[must_use]
    pub fn vertices(&self) -> Vec<Vec3> {
        self.position.chunks_exact(3).map(Vec3::from_slice).collect()
    }
}

/// Cofactor matrix of the linear part of `matrix`, mapping normals.
#[must_use]
pub fn normal_matrix(matrix: &Mat4) -> Mat3 {
    let m = Mat3::from_mat4(*matrix);
    Mat3::from_cols(
        m.y_axis.cross(m.z_axis),
        m.z_axis.cross(m.x_axis),
        m.x_axis.cross(m.y_axis),
    )
}

/// Provenance of a [`Surface`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SurfaceInfo {
    /// Isosurface of a scalar volume.
    Volume {
        /// Isolevel in field units.
        isolevel: f32,
        /// Smoothing iterations applied.
        smooth: u32,
        /// Name of the source volume.
        volume: String,
    },
    /// Molecular surface around atom spheres.
    Molecular {
        /// Field builder flavour.
        surface_type: SurfaceType,
        /// Solvent probe radius in angstroms.
        probe_radius: f32,
        /// Grid points per angstrom actually used.
        scale_factor: f32,
        /// Smoothing iterations applied.
        smooth: u32,
        /// Distance-map cutoff requested.
        cutoff: f32,
    },
}

/// Finished surface in world coordinates, ready for buffer construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Surface {
    /// Display name.
    pub name: String,
    /// Mesh buffers.
    pub data: SurfaceData,
    /// Where the surface came from.
    pub info: SurfaceInfo,
    bounding_box: (Vec3, Vec3),
    center: Vec3,
}

impl Surface {
    /// Wrap world-space mesh `data`, computing its bounds.
    #[must_use]
    pub fn new(name: impl Into<String>, data: SurfaceData, info: SurfaceInfo) -> Self {
        let bounding_box = bounding_box(&data.vertices());
        Self {
            name: name.into(),
            center: (bounding_box.0 + bounding_box.1) * 0.5,
            bounding_box,
            data,
            info,
        }
    }

    /// Axis-aligned bounds of the vertices; zero for an empty mesh.
    #[must_use]
    pub fn bounding_box(&self) -> (Vec3, Vec3) {
        self.bounding_box
    }

    /// Centre of [`Self::bounding_box`].
    #[must_use]
    pub fn center(&self) -> Vec3 {
        self.center
    }

    /// Number of vertices.
    #[must_use]
    pub fn vertex_count(&self) -> usize {
        self.data.vertex_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_width_follows_vertex_count() {
        let small = IndexBuffer::from_indices(vec![0, 1, 2], 3);
        assert!(!small.is_u32());
        assert_eq!(small.as_bytes().len(), 6);
        let large = IndexBuffer::from_indices(vec![0, 70_000, 2], 70_001);
        assert!(large.is_u32());
        assert_eq!(large.get(1), Some(70_000));
        assert_eq!(large.as_bytes().len(), 12);
        assert_eq!(small.to_u32_vec(), vec![0, 1, 2]);
    }

    #[test]
    fn transform_maps_positions_and_renormalises_normals() {
        let mut data = SurfaceData {
            position: vec![1.0, 2.0, 3.0],
            normal: Some(vec![1.0, 1.0, 0.0]),
            index: IndexBuffer::U16(Vec::new()),
            atom_index: None,
            contour: false,
        };
        let m = Mat4::from_translation(Vec3::new(10.0, 0.0, 0.0))
            * Mat4::from_scale(Vec3::new(2.0, 1.0, 1.0));
        data.transform(&m);
        assert_eq!(data.position, vec![12.0, 2.0, 3.0]);
        let n = Vec3::from_slice(data.normal.as_deref().unwrap());
        assert!((n.length() - 1.0).abs() < 1e-6);
        // stretching x squashes the x component of normals
        assert!(n.x < n.y);
    }

    #[test]
    fn normal_matrix_of_rotation_is_the_rotation() {
        let r = Mat4::from_rotation_z(0.7);
        let n = normal_matrix(&r);
        assert!(n.abs_diff_eq(Mat3::from_mat4(r), 1e-6));
    }

    #[test]
    fn surface_bounds_and_center() {
        let data = SurfaceData {
            position: vec![0.0, 0.0, 0.0, 2.0, 4.0, -2.0],
            normal: None,
            index: IndexBuffer::U16(Vec::new()),
            atom_index: None,
            contour: false,
        };
        let info = SurfaceInfo::Volume {
            isolevel: 1.0,
            smooth: 0,
            volume: "map".into(),
        };
        let surface = Surface::new("map@1.0", data, info);
        assert_eq!(surface.center(), Vec3::new(1.0, 2.0, -1.0));
        assert_eq!(surface.vertex_count(), 2);
        let json = serde_json::to_string(&surface.info).unwrap();
        assert!(json.contains("\"kind\":\"volume\""));
    }
}
