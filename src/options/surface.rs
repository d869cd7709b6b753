use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::surface::{RadiusParams, SurfaceType};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
#[schemars(title = "Molecular Surface", inline)]
#[serde(default)]
/// Parameters for molecular surface generation from atoms.
pub struct SurfaceOptions {
    /// Field builder and surface flavour.
    #[schemars(title = "Surface Type")]
    pub surface_type: SurfaceType,
    /// Solvent probe radius in angstroms.
    #[schemars(title = "Probe Radius", range(min = 0.0, max = 3.0), extend("step" = 0.05))]
    pub probe_radius: f32,
    /// Grid points per angstrom.
    #[schemars(title = "Scale Factor", range(min = 0.1, max = 5.0), extend("step" = 0.1))]
    pub scale_factor: f32,
    /// Laplacian smoothing iterations (0 disables smoothing).
    #[schemars(title = "Smooth", range(min = 0, max = 10))]
    pub smooth: u32,
    /// Distance-map cutoff in grid units (0 derives it from the probe).
    #[schemars(title = "Cutoff", range(min = 0.0, max = 10.0), extend("step" = 0.1))]
    pub cutoff: f32,
    /// Angular samples on each torus between overlapping atoms.
    #[schemars(skip)]
    pub probe_positions: u32,
    /// Emit contour lines instead of triangles.
    #[schemars(title = "Contour")]
    pub contour: bool,
    /// Radius assignment for atoms.
    #[schemars(skip)]
    pub radius: RadiusParams,
    /// Run field generation on the worker pool.
    #[schemars(title = "Use Worker")]
    pub use_worker: bool,
}

impl Default for SurfaceOptions {
    fn default() -> Self {
        Self {
            surface_type: SurfaceType::default(),
            probe_radius: 1.4,
            scale_factor: 2.0,
            smooth: 2,
            cutoff: 0.0,
            probe_positions: 30,
            contour: false,
            radius: RadiusParams::default(),
            use_worker: true,
        }
    }
}

impl SurfaceOptions {
    /// Smoothing iterations actually applied: contour output is never
    /// smoothed.
    #[must_use]
    pub fn effective_smooth(&self) -> u32 {
        if self.contour {
            0
        } else {
            self.smooth
        }
    }
}
