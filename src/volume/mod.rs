//! Isosurfaces of dense scalar volumes.
//!
//! [`Volume`] pairs a [`ScalarField`] with its grid to world transform and
//! lazily computed statistics, and extracts isosurfaces from it either on
//! the calling thread or on a worker primed with the field.
//! [`VolumeSurface`] is the triangulation pipeline both paths share.

mod filtered;
mod stats;

use std::cell::OnceCell;
use std::sync::Arc;

use glam::{Mat3, Mat4, Vec3};
use serde::{Deserialize, Serialize};

pub use filtered::FilteredVolume;
pub use stats::{FieldStats, GridStats};

use crate::error::IsomeshError;
use crate::options::{IsolevelType, VolumeOptions};
use crate::surface::{
    bounding_box, compute_vertex_normals, laplacian_smooth, normal_matrix,
    GridBox, MarchingCubes, ScalarField, Surface, SurfaceData, SurfaceInfo,
    TriangulateParams,
};
use crate::worker::{
    Inbox, Request, Response, TaskArgs, TaskError, TaskParams, TaskRegistry,
    WorkerPool, WorkerState,
};

/// Per-request volume surface parameters, as sent to workers.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct VolumeSurfaceParams {
    /// Isolevel in field units.
    pub isolevel: f32,
    /// Laplacian smoothing iterations.
    pub smooth: u32,
    /// Grid box to restrict extraction to.
    pub grid_box: Option<GridBox>,
    /// Grid to world transform applied to the output.
    pub matrix: Option<Mat4>,
    /// Emit contour lines.
    pub contour: bool,
    /// Treat the field as periodic.
    pub wrap: bool,
}

/// Triangulate, smooth and place surfaces of one field, reusing the
/// marching cubes caches across requests.
#[derive(Debug)]
pub struct VolumeSurface {
    mc: MarchingCubes,
}

impl VolumeSurface {
    /// Pipeline over `field`.
    #[must_use]
    pub fn new(field: Arc<ScalarField>) -> Self {
        Self {
            mc: MarchingCubes::new(field),
        }
    }

    /// Field being triangulated.
    #[must_use]
    pub fn field(&self) -> &Arc<ScalarField> {
        self.mc.field()
    }

    /// Extract the surface described by `params`.
    ///
    /// Smoothed meshes get normals recomputed from the smoothed geometry
    /// instead of field gradients.
    pub fn get_surface(&mut self, params: &VolumeSurfaceParams) -> SurfaceData {
        let smooth = params.smooth > 0 && !params.contour;
        let mut data = self.mc.triangulate(&TriangulateParams {
            isolevel: params.isolevel,
            no_normals: smooth,
            grid_box: params.grid_box,
            contour: params.contour,
            wrap: params.wrap,
        });

        if smooth && !data.is_empty() {
            let index = data.index.to_u32_vec();
            laplacian_smooth(&mut data.position, &index, params.smooth);
            let mut normal = vec![0.0; data.position.len()];
            compute_vertex_normals(&data.position, &index, &mut normal);
            data.normal = Some(normal);
        }

        if let Some(matrix) = &params.matrix {
            data.transform(matrix);
        }
        data
    }
}

/// Worker handler for [`crate::worker::TaskKind::VolSurf`].
///
/// A request carrying the field primes the worker; later requests for the
/// same volume reuse it.
pub(crate) fn volsurf_task(
    state: &mut WorkerState,
    request: Request,
) -> Result<Response, TaskError> {
    let TaskParams::VolSurf(params) = request.params else {
        return Err(TaskError::InvalidArgs("expected volsurf parameters".into()));
    };
    match request.args {
        TaskArgs::Field(field) => state.volume = Some(VolumeSurface::new(field)),
        TaskArgs::None => {}
        TaskArgs::Atoms(_) => {
            return Err(TaskError::InvalidArgs("volsurf takes a field".into()));
        }
    }
    let volsurf = state.volume.as_mut().ok_or(TaskError::NotPrimed)?;
    Ok(Response {
        data: volsurf.get_surface(&params),
        params: request.params,
        scale_factor: None,
    })
}

/// One isosurface query against a [`Volume`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IsosurfaceRequest {
    /// Isolevel in field units; NaN selects the 2-sigma contour.
    pub isolevel: f32,
    /// Laplacian smoothing iterations.
    pub smooth: u32,
    /// World-space focus of the extraction box.
    pub center: Option<Vec3>,
    /// Half-size of the extraction box; 0 extracts the whole grid.
    pub size: f32,
    /// Emit contour lines.
    pub contour: bool,
    /// Treat the field as periodic.
    pub wrap: bool,
}

impl Default for IsosurfaceRequest {
    fn default() -> Self {
        Self {
            isolevel: f32::NAN,
            smooth: 0,
            center: None,
            size: 0.0,
            contour: false,
            wrap: false,
        }
    }
}

type SurfaceCallback = Box<dyn FnOnce(Surface)>;

/// Dense scalar volume with a grid to world transform.
pub struct Volume {
    name: String,
    field: Arc<ScalarField>,
    matrix: Mat4,
    inverse_matrix: Mat4,
    normal_matrix: Mat3,
    bounding_box: (Vec3, Vec3),
    center: Vec3,
    stats: OnceCell<FieldStats>,
    stats_override: Option<FieldStats>,
    position: OnceCell<Vec<f32>>,
    volsurf: Option<VolumeSurface>,
    registry: Arc<TaskRegistry>,
    max_workers: usize,
    pool: Option<WorkerPool>,
    inbox: Inbox<(VolumeSurfaceParams, SurfaceCallback)>,
}

impl Volume {
    /// Volume called `name` over `field`, placed by `matrix`.
    #[must_use]
    pub fn new(name: impl Into<String>, field: ScalarField, matrix: Mat4) -> Self {
        let mut volume = Self {
            name: name.into(),
            field: Arc::new(field),
            matrix: Mat4::IDENTITY,
            inverse_matrix: Mat4::IDENTITY,
            normal_matrix: Mat3::IDENTITY,
            bounding_box: (Vec3::ZERO, Vec3::ZERO),
            center: Vec3::ZERO,
            stats: OnceCell::new(),
            stats_override: None,
            position: OnceCell::new(),
            volsurf: None,
            registry: Arc::new(TaskRegistry::new()),
            max_workers: 2,
            pool: None,
            inbox: Inbox::new(),
        };
        volume.set_matrix(matrix);
        volume
    }

    /// Volume over `nx * ny * nz` values in x-fastest order.
    ///
    /// # Errors
    ///
    /// Returns [`IsomeshError::InvalidGrid`] when the data length does not
    /// match the dimensions.
    pub fn from_data(
        name: impl Into<String>,
        data: Vec<f32>,
        dims: [usize; 3],
        matrix: Mat4,
    ) -> Result<Self, IsomeshError> {
        let field = ScalarField::new(data, dims[0], dims[1], dims[2])?;
        Ok(Self::new(name, field, matrix))
    }

    /// Run worker requests from `registry` on up to `max_workers` threads.
    #[must_use]
    pub fn with_workers(mut self, registry: Arc<TaskRegistry>, max_workers: usize) -> Self {
        self.dispose();
        self.registry = registry;
        self.max_workers = max_workers;
        self
    }

    /// Replace the field. Statistics, positions, triangulation caches and
    /// workers primed with the old field are discarded.
    pub fn set_data(&mut self, field: ScalarField) {
        self.field = Arc::new(field);
        self.stats = OnceCell::new();
        self.stats_override = None;
        self.position = OnceCell::new();
        self.volsurf = None;
        self.dispose();
        self.set_matrix(self.matrix);
    }

    /// Replace the grid to world transform.
    pub fn set_matrix(&mut self, matrix: Mat4) {
        self.matrix = matrix;
        self.inverse_matrix = matrix.inverse();
        self.normal_matrix = normal_matrix(&matrix);
        let far = Vec3::from_array(self.field.dims().map(|n| n.saturating_sub(1) as f32));
        let corners = box_corners(Vec3::ZERO, far).map(|c| matrix.transform_point3(c));
        self.bounding_box = bounding_box(&corners);
        self.center = (self.bounding_box.0 + self.bounding_box.1) * 0.5;
        self.position = OnceCell::new();
    }

    /// Override the statistics, e.g. with those of the whole dataset this
    /// volume is a slice of. `None` restores the computed ones.
    pub fn set_stats(&mut self, stats: Option<FieldStats>) {
        self.stats_override = stats;
    }

    /// Display name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The scalar field.
    #[must_use]
    pub fn field(&self) -> &Arc<ScalarField> {
        &self.field
    }

    /// Grid to world transform.
    #[must_use]
    pub fn matrix(&self) -> Mat4 {
        self.matrix
    }

    /// World to grid transform.
    #[must_use]
    pub fn inverse_matrix(&self) -> Mat4 {
        self.inverse_matrix
    }

    /// Cofactor matrix mapping grid normals to world normals.
    #[must_use]
    pub fn normal_matrix(&self) -> Mat3 {
        self.normal_matrix
    }

    /// World bounds of the grid corners.
    #[must_use]
    pub fn bounding_box(&self) -> (Vec3, Vec3) {
        self.bounding_box
    }

    /// Centre of [`Self::bounding_box`].
    #[must_use]
    pub fn center(&self) -> Vec3 {
        self.center
    }

    /// World position of every grid point, xyz-interleaved in field order.
    #[must_use]
    pub fn position(&self) -> &[f32] {
        self.position.get_or_init(|| {
            let [nx, ny, nz] = self.field.dims();
            let mut position = Vec::with_capacity(nx * ny * nz * 3);
            for z in 0..nz {
                for y in 0..ny {
                    for x in 0..nx {
                        let p = self
                            .matrix
                            .transform_point3(Vec3::new(x as f32, y as f32, z as f32));
                        position.extend_from_slice(&p.to_array());
                    }
                }
            }
            position
        })
    }

    /// Integer grid box covering the world box `center ± size`.
    #[must_use]
    pub fn get_box(&self, center: Vec3, size: f32) -> GridBox {
        let lo = center - Vec3::splat(size);
        let hi = center + Vec3::splat(size);
        let corners = box_corners(lo, hi).map(|c| self.inverse_matrix.transform_point3(c));
        let (min, max) = bounding_box(&corners);
        GridBox::round(min, max)
    }

    /// Request for `opts`, converting sigma isolevels to field values.
    #[must_use]
    pub fn request(&self, opts: &VolumeOptions, center: Option<Vec3>) -> IsosurfaceRequest {
        let isolevel = match (opts.isolevel, opts.isolevel_type) {
            (None, _) => f32::NAN,
            (Some(level), IsolevelType::Value) => level,
            (Some(sigma), IsolevelType::Sigma) => self.value_for_sigma(sigma),
        };
        IsosurfaceRequest {
            isolevel,
            smooth: opts.smooth,
            center,
            size: opts.box_size,
            contour: opts.contour,
            wrap: opts.wrap,
        }
    }

    fn surface_params(&self, request: &IsosurfaceRequest) -> VolumeSurfaceParams {
        let isolevel = if request.isolevel.is_nan() {
            self.value_for_sigma(2.0)
        } else {
            request.isolevel
        };
        let grid_box = match request.center {
            Some(center) if request.size > 0.0 => Some(self.get_box(center, request.size)),
            _ => None,
        };
        VolumeSurfaceParams {
            isolevel,
            smooth: request.smooth,
            grid_box,
            matrix: Some(self.matrix),
            contour: request.contour,
            wrap: request.wrap,
        }
    }

    fn extract(&mut self, params: &VolumeSurfaceParams) -> SurfaceData {
        let field = &self.field;
        self.volsurf
            .get_or_insert_with(|| VolumeSurface::new(Arc::clone(field)))
            .get_surface(params)
    }

    fn make_surface(&self, data: SurfaceData, params: &VolumeSurfaceParams) -> Surface {
        Surface::new(
            format!("{}@{}", self.name, to_precision2(params.isolevel)),
            data,
            SurfaceInfo::Volume {
                isolevel: params.isolevel,
                smooth: params.smooth,
                volume: self.name.clone(),
            },
        )
    }

    /// Isosurface for `request`, computed on the calling thread.
    pub fn get_surface(&mut self, request: &IsosurfaceRequest) -> Surface {
        let params = self.surface_params(request);
        let data = self.extract(&params);
        self.make_surface(data, &params)
    }

    /// Compute the isosurface for `request` on a worker; `callback`
    /// receives it from [`Self::poll`] or [`Self::wait`].
    ///
    /// The first request a worker sees carries the field; later ones reuse
    /// the worker's copy. Falls back to the calling thread, with a
    /// warning, when no worker can be spawned or when the worker fails.
    pub fn get_surface_worker(
        &mut self,
        request: &IsosurfaceRequest,
        callback: impl FnOnce(Surface) + 'static,
    ) {
        let params = self.surface_params(request);
        let pool = self.pool.get_or_insert_with(|| {
            WorkerPool::new("volsurf", self.max_workers, Arc::clone(&self.registry))
        });
        let (ticket, on_message, on_error) = self.inbox.register((params, Box::new(callback)));
        let posted = pool.get_next_worker().map(|worker| {
            let args = if worker.post_count() == 0 {
                TaskArgs::Field(Arc::clone(&self.field))
            } else {
                TaskArgs::None
            };
            worker.post(
                Request {
                    args,
                    params: TaskParams::VolSurf(params),
                },
                on_message,
                on_error,
            )
        });
        if let Err(e) = posted {
            log::warn!("Volume worker unavailable ({e}), computing without worker");
            if let Some((params, callback)) = self.inbox.cancel(ticket) {
                let data = self.extract(&params);
                callback(self.make_surface(data, &params));
            }
        }
    }

    /// Deliver finished worker surfaces without blocking. Returns the
    /// number of callbacks run.
    pub fn poll(&mut self) -> usize {
        if let Some(pool) = &mut self.pool {
            let _ = pool.poll();
        }
        self.resolve()
    }

    /// Block until every worker request has been delivered.
    pub fn wait(&mut self) -> usize {
        if let Some(pool) = &mut self.pool {
            let _ = pool.wait_all();
        }
        self.resolve()
    }

    fn resolve(&mut self) -> usize {
        let delivered = self.inbox.drain();
        let count = delivered.len();
        for ((params, callback), result) in delivered {
            let data = match result {
                Ok(response) => response.data,
                Err(e) => {
                    log::warn!("Volume worker error ({e}), computing without worker");
                    self.extract(&params)
                }
            };
            callback(self.make_surface(data, &params));
        }
        count
    }

    /// Requests posted but not yet delivered.
    #[must_use]
    pub fn waiting(&self) -> usize {
        self.inbox.waiting()
    }

    /// Live workers of this volume's pool.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.pool.as_ref().map_or(0, WorkerPool::count)
    }

    /// Terminate the worker pool; undelivered requests are dropped.
    pub fn dispose(&mut self) {
        if let Some(mut pool) = self.pool.take() {
            pool.terminate();
        }
        if self.inbox.waiting() > 0 {
            log::debug!("{}: dropping {} undelivered surface(s)", self.name, self.inbox.waiting());
        }
        self.inbox = Inbox::new();
    }
}

impl GridStats for Volume {
    fn stats(&self) -> FieldStats {
        self.stats_override.unwrap_or_else(|| {
            *self.stats.get_or_init(|| FieldStats::compute(self.field.data()))
        })
    }
}

impl std::fmt::Debug for Volume {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Volume")
            .field("name", &self.name)
            .field("dims", &self.field.dims())
            .field("matrix", &self.matrix)
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}

/// The eight corners of the box `lo..hi`.
fn box_corners(lo: Vec3, hi: Vec3) -> [Vec3; 8] {
    std::array::from_fn(|i| {
        Vec3::new(
            if i & 1 == 0 { lo.x } else { hi.x },
            if i & 2 == 0 { lo.y } else { hi.y },
            if i & 4 == 0 { lo.z } else { hi.z },
        )
    })
}

/// Format `value` with two significant digits, switching to exponent
/// notation outside `1e-6..100`.
fn to_precision2(value: f32) -> String {
    if !value.is_finite() {
        return value.to_string();
    }
    if value == 0.0 {
        return "0.0".to_owned();
    }
    let exp = format!("{value:.1e}");
    let Some((mantissa, power)) = exp.split_once('e') else {
        return exp;
    };
    let power: i32 = power.parse().unwrap_or(0);
    if (-6..2).contains(&power) {
        let decimals = (1 - power).max(0) as usize;
        format!("{value:.decimals$}")
    } else if power < 0 {
        format!("{mantissa}e{power}")
    } else {
        format!("{mantissa}e+{power}")
    }
}
