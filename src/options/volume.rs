use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// How the configured isolevel is interpreted.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum IsolevelType {
    /// Absolute field value.
    Value,
    /// Multiple of the field's rms deviation above its mean.
    #[default]
    Sigma,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
#[schemars(title = "Volume Surface", inline)]
#[serde(default)]
/// Parameters for isosurfaces extracted from density volumes.
pub struct VolumeOptions {
    /// Isolevel; `None` uses the 2-sigma contour.
    #[schemars(title = "Isolevel")]
    pub isolevel: Option<f32>,
    /// Interpretation of [`Self::isolevel`].
    #[schemars(title = "Isolevel Type")]
    pub isolevel_type: IsolevelType,
    /// Laplacian smoothing iterations.
    #[schemars(title = "Smooth", range(min = 0, max = 10))]
    pub smooth: u32,
    /// Half-size of the extraction box around the focus point (0 = whole
    /// grid).
    #[schemars(title = "Box Size", range(min = 0.0, max = 100.0), extend("step" = 1.0))]
    pub box_size: f32,
    /// Emit contour lines instead of triangles.
    #[schemars(title = "Contour")]
    pub contour: bool,
    /// Treat the grid as periodic (crystallographic maps).
    #[schemars(title = "Wrap")]
    pub wrap: bool,
    /// Extract on the worker pool.
    #[schemars(title = "Use Worker")]
    pub use_worker: bool,
}

impl Default for VolumeOptions {
    fn default() -> Self {
        Self {
            isolevel: Some(2.0),
            isolevel_type: IsolevelType::Sigma,
            smooth: 0,
            box_size: 0.0,
            contour: false,
            wrap: false,
            use_worker: true,
        }
    }
}
