//! Dense scalar fields and the contract shared by field builders.

use glam::{Mat4, Vec3};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::av::AvSurface;
use super::edt::EdtSurface;
use crate::error::IsomeshError;
use crate::options::SurfaceOptions;

/// Initial value of field cells no atom has visited yet.
pub const UNVISITED: f32 = -1001.0;

/// Dense scalar grid of `nx * ny * nz` values in x-fastest order
/// (`index = x + nx * (y + ny * z)`), with optional per-cell atom ids.
///
/// Atom ids are `-1` where no atom contributed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalarField {
    data: Vec<f32>,
    nx: usize,
    ny: usize,
    nz: usize,
    atom_index: Option<Vec<i32>>,
}

impl ScalarField {
    /// Wrap `data` as an `nx * ny * nz` grid.
    ///
    /// # Errors
    ///
    /// Returns [`IsomeshError::InvalidGrid`] when the data length does not
    /// match the dimensions.
    pub fn new(
        data: Vec<f32>,
        nx: usize,
        ny: usize,
        nz: usize,
    ) -> Result<Self, IsomeshError> {
        if data.len() != nx * ny * nz {
            return Err(IsomeshError::InvalidGrid(format!(
                "{} values for a {nx}x{ny}x{nz} grid",
                data.len()
            )));
        }
        Ok(Self {
            data,
            nx,
            ny,
            nz,
            atom_index: None,
        })
    }

    /// Grid of `nx * ny * nz` cells all set to `value`.
    #[must_use]
    pub fn filled(nx: usize, ny: usize, nz: usize, value: f32) -> Self {
        Self {
            data: vec![value; nx * ny * nz],
            nx,
            ny,
            nz,
            atom_index: None,
        }
    }

    /// Sample `f(x, y, z)` at every grid point.
    #[must_use]
    pub fn from_fn(
        nx: usize,
        ny: usize,
        nz: usize,
        mut f: impl FnMut(usize, usize, usize) -> f32,
    ) -> Self {
        let mut data = Vec::with_capacity(nx * ny * nz);
        for z in 0..nz {
            for y in 0..ny {
                for x in 0..nx {
                    data.push(f(x, y, z));
                }
            }
        }
        Self {
            data,
            nx,
            ny,
            nz,
            atom_index: None,
        }
    }

    /// Assemble a grid whose parts are consistent by construction.
    pub(crate) fn from_parts(
        data: Vec<f32>,
        dims: [usize; 3],
        atom_index: Option<Vec<i32>>,
    ) -> Self {
        debug_assert_eq!(data.len(), dims[0] * dims[1] * dims[2]);
        Self {
            data,
            nx: dims[0],
            ny: dims[1],
            nz: dims[2],
            atom_index,
        }
    }

    /// Attach per-cell atom ids.
    ///
    /// # Errors
    ///
    /// Returns [`IsomeshError::InvalidGrid`] when the id count does not
    /// match the cell count.
    pub fn with_atom_index(
        mut self,
        atom_index: Vec<i32>,
    ) -> Result<Self, IsomeshError> {
        if atom_index.len() != self.data.len() {
            return Err(IsomeshError::InvalidGrid(format!(
                "{} atom ids for {} cells",
                atom_index.len(),
                self.data.len()
            )));
        }
        self.atom_index = Some(atom_index);
        Ok(self)
    }

    /// Grid size along x.
    #[must_use]
    pub fn nx(&self) -> usize {
        self.nx
    }

    /// Grid size along y.
    #[must_use]
    pub fn ny(&self) -> usize {
        self.ny
    }

    /// Grid size along z.
    #[must_use]
    pub fn nz(&self) -> usize {
        self.nz
    }

    /// Grid sizes as `[nx, ny, nz]`.
    #[must_use]
    pub fn dims(&self) -> [usize; 3] {
        [self.nx, self.ny, self.nz]
    }

    /// Number of cells.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the grid has no cells.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Flat index of cell `(x, y, z)`.
    #[must_use]
    pub fn index(&self, x: usize, y: usize, z: usize) -> usize {
        x + self.nx * (y + self.ny * z)
    }

    /// Value of cell `(x, y, z)`.
    #[must_use]
    pub fn get(&self, x: usize, y: usize, z: usize) -> f32 {
        self.data[self.index(x, y, z)]
    }

    /// Field values.
    #[must_use]
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Per-cell atom ids, when present.
    #[must_use]
    pub fn atom_index(&self) -> Option<&[i32]> {
        self.atom_index.as_deref()
    }
}

/// Field builder and molecular surface flavour.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum SurfaceType {
    /// Analytic sphere and torus projection.
    Av,
    /// Van der Waals spheres (distance transform).
    Vws,
    /// Solvent accessible surface (distance transform).
    Sas,
    /// Solvent excluded surface without the van der Waals fill.
    #[default]
    Ms,
    /// Solvent excluded surface unioned with the van der Waals fill.
    Ses,
}

impl SurfaceType {
    /// Short lowercase name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Av => "av",
            Self::Vws => "vws",
            Self::Sas => "sas",
            Self::Ms => "ms",
            Self::Ses => "ses",
        }
    }

    /// Fill a field for `atoms` with the builder this flavour selects.
    #[must_use]
    pub fn build_field(
        self,
        atoms: &AtomData,
        params: &FieldParams,
    ) -> GeneratedField {
        match self {
            Self::Av => AvSurface.build_field(atoms, params),
            Self::Vws | Self::Sas | Self::Ms | Self::Ses => {
                EdtSurface::new(self).build_field(atoms, params)
            }
        }
    }
}

impl std::fmt::Display for SurfaceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Atom spheres handed to a field builder: positions, un-expanded radii and
/// external ids, matched 1:1.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AtomData {
    /// Atom centres.
    pub positions: Vec<Vec3>,
    /// Atom radii (before probe expansion).
    pub radii: Vec<f32>,
    /// External atom ids written into the field's atom index.
    pub ids: Vec<u32>,
}

impl AtomData {
    /// Build from xyz-interleaved coordinates, radii and ids.
    ///
    /// # Errors
    ///
    /// Returns [`IsomeshError::InvalidInput`] when the arrays disagree on
    /// the atom count.
    pub fn from_flat(
        coords: &[f32],
        radii: Vec<f32>,
        ids: Vec<u32>,
    ) -> Result<Self, IsomeshError> {
        if coords.len() % 3 != 0
            || coords.len() / 3 != radii.len()
            || radii.len() != ids.len()
        {
            return Err(IsomeshError::InvalidInput(format!(
                "{} coordinates, {} radii and {} ids do not describe the \
                 same atoms",
                coords.len(),
                radii.len(),
                ids.len()
            )));
        }
        Ok(Self {
            positions: coords
                .chunks_exact(3)
                .map(|c| Vec3::new(c[0], c[1], c[2]))
                .collect(),
            radii,
            ids,
        })
    }

    /// Number of atoms.
    #[must_use]
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// Whether there are no atoms.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Largest radius, 0 for an empty set.
    #[must_use]
    pub fn max_radius(&self) -> f32 {
        self.radii.iter().copied().fold(0.0, f32::max)
    }

    /// External id of atom `i` as stored in a field's atom index.
    #[must_use]
    pub fn external_id(&self, i: usize) -> i32 {
        self.ids.get(i).map_or(-1, |&id| id as i32)
    }
}

/// Parameters shared by all field builders.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FieldParams {
    /// Solvent probe radius in angstroms.
    pub probe_radius: f32,
    /// Requested grid points per angstrom.
    pub scale_factor: f32,
    /// Distance-map cutoff in grid units; 0 derives it from the probe.
    pub cutoff: f32,
    /// Angular samples per torus (analytic builder only).
    pub probe_positions: u32,
    /// Record the contributing atom id per cell.
    pub set_atom_id: bool,
}

impl Default for FieldParams {
    fn default() -> Self {
        Self {
            probe_radius: 1.4,
            scale_factor: 2.0,
            cutoff: 0.0,
            probe_positions: 30,
            set_atom_id: true,
        }
    }
}

impl From<&SurfaceOptions> for FieldParams {
    fn from(opts: &SurfaceOptions) -> Self {
        Self {
            probe_radius: opts.probe_radius,
            scale_factor: opts.scale_factor,
            cutoff: opts.cutoff,
            probe_positions: opts.probe_positions,
            set_atom_id: true,
        }
    }
}

/// A filled field together with what is needed to triangulate it.
#[derive(Debug, Clone)]
pub struct GeneratedField {
    /// The filled grid.
    pub field: ScalarField,
    /// Grid to world transform.
    pub matrix: Mat4,
    /// Isolevel at which the field is triangulated.
    pub isolevel: f32,
    /// Grid points per angstrom actually used.
    pub scale_factor: f32,
}

/// Strategy that fills a dense field from atom spheres.
///
/// Builders never triangulate; their output goes to
/// [`MarchingCubes`](super::MarchingCubes) unchanged.
pub trait FieldBuilder {
    /// Fill a field around `atoms`.
    fn build_field(
        &self,
        atoms: &AtomData,
        params: &FieldParams,
    ) -> GeneratedField;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_mismatched_lengths() {
        assert!(ScalarField::new(vec![0.0; 7], 2, 2, 2).is_err());
        let field = ScalarField::new(vec![0.0; 8], 2, 2, 2).unwrap();
        assert!(field.clone().with_atom_index(vec![0; 3]).is_err());
        assert!(field.with_atom_index(vec![0; 8]).is_ok());
    }

    #[test]
    fn layout_is_x_fastest() {
        let field =
            ScalarField::from_fn(3, 4, 5, |x, y, z| (x + 10 * y + 100 * z) as f32);
        assert_eq!(field.index(1, 0, 0), 1);
        assert_eq!(field.index(0, 1, 0), 3);
        assert_eq!(field.index(0, 0, 1), 12);
        assert_eq!(field.get(2, 3, 4), 432.0);
    }

    #[test]
    fn atom_data_from_flat_arrays() {
        let atoms = AtomData::from_flat(
            &[0.0, 1.0, 2.0, 3.0, 4.0, 5.0],
            vec![1.5, 1.7],
            vec![10, 11],
        )
        .unwrap();
        assert_eq!(atoms.positions[1], Vec3::new(3.0, 4.0, 5.0));
        assert_eq!(atoms.max_radius(), 1.7);
        assert_eq!(atoms.external_id(1), 11);
        assert!(AtomData::from_flat(&[0.0; 5], vec![1.0], vec![0]).is_err());
    }

    #[test]
    fn surface_type_names_round_trip() {
        for ty in [
            SurfaceType::Av,
            SurfaceType::Vws,
            SurfaceType::Sas,
            SurfaceType::Ms,
            SurfaceType::Ses,
        ] {
            let json = serde_json::to_string(&ty).unwrap();
            assert_eq!(json, format!("\"{ty}\""));
        }
    }
}
