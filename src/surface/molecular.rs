//! Molecular surface facade: atom extraction, field building and worker
//! offload behind one entry point.

use std::sync::Arc;

use glam::Vec3;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::field::{AtomData, FieldParams, SurfaceType};
use super::{Surface, SurfaceData, SurfaceInfo};
use crate::options::SurfaceOptions;
use crate::volume::{VolumeSurface, VolumeSurfaceParams};
use crate::worker::{
    Inbox, Request, Response, TaskArgs, TaskError, TaskParams, TaskRegistry,
    WorkerPool, WorkerState,
};

/// How atom radii are assigned.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum RadiusKind {
    /// Van der Waals radius of the element.
    #[default]
    Vdw,
    /// Covalent radius of the element.
    Covalent,
    /// The same radius for every atom.
    Uniform,
    /// Radii supplied by the structure, van der Waals where missing.
    Explicit,
}

/// Radius scheme: a per-element table or a fixed size, then scaled.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct RadiusParams {
    /// Where radii come from.
    pub kind: RadiusKind,
    /// Radius used by [`RadiusKind::Uniform`].
    pub size: f32,
    /// Factor applied to every radius.
    pub scale: f32,
}

impl Default for RadiusParams {
    fn default() -> Self {
        Self {
            kind: RadiusKind::Vdw,
            size: 1.0,
            scale: 1.0,
        }
    }
}

impl RadiusParams {
    /// Radius for an atom of `element`, optionally carrying its own radius.
    #[must_use]
    pub fn radius(&self, element: &str, explicit: Option<f32>) -> f32 {
        let base = match self.kind {
            RadiusKind::Vdw => vdw_radius(element),
            RadiusKind::Covalent => covalent_radius(element),
            RadiusKind::Uniform => self.size,
            RadiusKind::Explicit => {
                explicit.unwrap_or_else(|| vdw_radius(element))
            }
        };
        base * self.scale
    }
}

const DEFAULT_VDW_RADIUS: f32 = 2.0;
const DEFAULT_COVALENT_RADIUS: f32 = 1.6;

/// Van der Waals radius in angstroms; 2.0 for unknown elements.
#[must_use]
pub fn vdw_radius(element: &str) -> f32 {
    match element.trim().to_ascii_uppercase().as_str() {
        "H" => 1.1,
        "C" => 1.7,
        "N" => 1.55,
        "O" => 1.52,
        "F" => 1.47,
        "NA" => 2.27,
        "MG" => 1.73,
        "P" => 1.8,
        "S" => 1.8,
        "CL" => 1.75,
        "K" => 2.75,
        "CA" => 2.31,
        "FE" => 2.05,
        "ZN" => 2.1,
        "SE" => 1.9,
        "BR" => 1.83,
        "I" => 1.98,
        _ => DEFAULT_VDW_RADIUS,
    }
}

/// Covalent radius in angstroms; 1.6 for unknown elements.
#[must_use]
pub fn covalent_radius(element: &str) -> f32 {
    match element.trim().to_ascii_uppercase().as_str() {
        "H" => 0.31,
        "C" => 0.76,
        "N" => 0.71,
        "O" => 0.66,
        "F" => 0.57,
        "NA" => 1.66,
        "MG" => 1.41,
        "P" => 1.07,
        "S" => 1.05,
        "CL" => 1.02,
        "K" => 2.03,
        "CA" => 1.76,
        "FE" => 1.32,
        _ => DEFAULT_COVALENT_RADIUS,
    }
}

/// Read access to the atoms of a structure.
pub trait StructureSource {
    /// Display name used for surfaces.
    fn name(&self) -> &str;
    /// Number of atoms.
    fn atom_count(&self) -> usize;
    /// Position of atom `i`.
    fn position(&self, i: usize) -> Vec3;
    /// Element symbol of atom `i`.
    fn element(&self, i: usize) -> &str;
    /// Radius carried by atom `i` itself, if any.
    fn explicit_radius(&self, _i: usize) -> Option<f32> {
        None
    }
    /// External id of atom `i`.
    fn atom_id(&self, i: usize) -> u32 {
        i as u32
    }

    /// Positions, radii and ids of every atom under `radius`.
    fn atom_data(&self, radius: &RadiusParams) -> AtomData {
        let n = self.atom_count();
        AtomData {
            positions: (0..n).map(|i| self.position(i)).collect(),
            radii: (0..n)
                .map(|i| radius.radius(self.element(i), self.explicit_radius(i)))
                .collect(),
            ids: (0..n).map(|i| self.atom_id(i)).collect(),
        }
    }
}

/// Plain in-memory atom list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AtomList {
    /// Display name.
    pub name: String,
    /// Atom centres.
    pub positions: Vec<Vec3>,
    /// Element symbols.
    pub elements: Vec<String>,
    /// Per-atom radii, when known.
    pub radii: Vec<Option<f32>>,
}

impl AtomList {
    /// Empty list called `name`.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Append an atom.
    pub fn push(&mut self, position: Vec3, element: &str, radius: Option<f32>) {
        self.positions.push(position);
        self.elements.push(element.to_owned());
        self.radii.push(radius);
    }
}

impl StructureSource for AtomList {
    fn name(&self) -> &str {
        &self.name
    }

    fn atom_count(&self) -> usize {
        self.positions.len()
    }

    fn position(&self, i: usize) -> Vec3 {
        self.positions[i]
    }

    fn element(&self, i: usize) -> &str {
        self.elements.get(i).map_or("", String::as_str)
    }

    fn explicit_radius(&self, i: usize) -> Option<f32> {
        self.radii.get(i).copied().flatten()
    }
}

/// Per-request molecular surface parameters, as sent to workers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MolecularSurfaceParams {
    /// Field builder flavour.
    pub surface_type: SurfaceType,
    /// Solvent probe radius in angstroms.
    pub probe_radius: f32,
    /// Requested grid points per angstrom.
    pub scale_factor: f32,
    /// Distance-map cutoff; 0 derives it from the probe.
    pub cutoff: f32,
    /// Smoothing iterations.
    pub smooth: u32,
    /// Emit contour lines.
    pub contour: bool,
    /// Angular samples per torus.
    pub probe_positions: u32,
}

impl Default for MolecularSurfaceParams {
    fn default() -> Self {
        Self::from(&SurfaceOptions::default())
    }
}

impl From<&SurfaceOptions> for MolecularSurfaceParams {
    fn from(opts: &SurfaceOptions) -> Self {
        Self {
            surface_type: opts.surface_type,
            probe_radius: opts.probe_radius,
            scale_factor: opts.scale_factor,
            cutoff: opts.cutoff,
            smooth: opts.effective_smooth(),
            contour: opts.contour,
            probe_positions: opts.probe_positions,
        }
    }
}

impl MolecularSurfaceParams {
    fn field_params(&self) -> FieldParams {
        FieldParams {
            probe_radius: self.probe_radius,
            scale_factor: self.scale_factor,
            cutoff: self.cutoff,
            probe_positions: self.probe_positions,
            set_atom_id: true,
        }
    }
}

/// Fill, triangulate and place a molecular surface. Returns the mesh in
/// world coordinates and the scale factor actually used.
fn extract(atoms: &AtomData, params: &MolecularSurfaceParams) -> (SurfaceData, f32) {
    let generated = params.surface_type.build_field(atoms, &params.field_params());
    let mut volsurf = VolumeSurface::new(Arc::new(generated.field));
    let data = volsurf.get_surface(&VolumeSurfaceParams {
        isolevel: generated.isolevel,
        smooth: if params.contour { 0 } else { params.smooth },
        grid_box: None,
        matrix: Some(generated.matrix),
        contour: params.contour,
        wrap: false,
    });
    (data, generated.scale_factor)
}

/// Worker handler for [`crate::worker::TaskKind::MolSurf`].
pub(crate) fn molsurf_task(
    _state: &mut WorkerState,
    request: Request,
) -> Result<Response, TaskError> {
    let TaskParams::MolSurf(params) = request.params else {
        return Err(TaskError::InvalidArgs("expected molsurf parameters".into()));
    };
    let TaskArgs::Atoms(atoms) = request.args else {
        return Err(TaskError::InvalidArgs("molsurf needs atoms".into()));
    };
    let (data, scale_factor) = extract(&atoms, &params);
    Ok(Response {
        data,
        params: request.params,
        scale_factor: Some(scale_factor),
    })
}

type SurfaceCallback = Box<dyn FnOnce(Surface)>;

/// Molecular surfaces of one structure, computed on the calling thread or
/// on a worker.
pub struct MolecularSurface<S> {
    structure: S,
    registry: Arc<TaskRegistry>,
    max_workers: usize,
    pool: Option<WorkerPool>,
    inbox: Inbox<(MolecularSurfaceParams, RadiusParams, SurfaceCallback)>,
}

impl<S: StructureSource> MolecularSurface<S> {
    /// Facade over `structure` with the built-in task registry and a pool
    /// of up to two workers.
    #[must_use]
    pub fn new(structure: S) -> Self {
        Self::with_registry(structure, Arc::new(TaskRegistry::new()), 2)
    }

    /// Facade whose worker pool runs tasks from `registry`.
    #[must_use]
    pub fn with_registry(
        structure: S,
        registry: Arc<TaskRegistry>,
        max_workers: usize,
    ) -> Self {
        Self {
            structure,
            registry,
            max_workers,
            pool: None,
            inbox: Inbox::new(),
        }
    }

    /// Underlying structure.
    #[must_use]
    pub fn structure(&self) -> &S {
        &self.structure
    }

    /// Surface for `opts`, computed on the calling thread.
    #[must_use]
    pub fn get_surface(&self, opts: &SurfaceOptions) -> Surface {
        let params = MolecularSurfaceParams::from(opts);
        let atoms = self.structure.atom_data(&opts.radius);
        self.compute(&atoms, &params)
    }

    fn compute(&self, atoms: &AtomData, params: &MolecularSurfaceParams) -> Surface {
        let (data, scale_factor) = extract(atoms, params);
        self.make_surface(data, params, scale_factor)
    }

    fn make_surface(
        &self,
        data: SurfaceData,
        params: &MolecularSurfaceParams,
        scale_factor: f32,
    ) -> Surface {
        let name = format!("{} {}", self.structure.name(), params.surface_type);
        Surface::new(
            name,
            data,
            SurfaceInfo::Molecular {
                surface_type: params.surface_type,
                probe_radius: params.probe_radius,
                scale_factor,
                smooth: params.smooth,
                cutoff: params.cutoff,
            },
        )
    }

    /// Compute the surface for `opts` on a worker; `callback` receives it
    /// from [`Self::poll`] or [`Self::wait`].
    ///
    /// Falls back to the calling thread, with a warning, when no worker
    /// can be spawned, when `opts.use_worker` is off (then `callback` runs
    /// before this returns) or when the worker fails.
    pub fn get_surface_worker(
        &mut self,
        opts: &SurfaceOptions,
        callback: impl FnOnce(Surface) + 'static,
    ) {
        let params = MolecularSurfaceParams::from(opts);
        let atoms = self.structure.atom_data(&opts.radius);
        if !opts.use_worker {
            callback(self.compute(&atoms, &params));
            return;
        }

        let pool = self.pool.get_or_insert_with(|| {
            WorkerPool::new("molsurf", self.max_workers, Arc::clone(&self.registry))
        });
        let (ticket, on_message, on_error) =
            self.inbox.register((params, opts.radius, Box::new(callback)));
        let request = Request {
            args: TaskArgs::Atoms(atoms),
            params: TaskParams::MolSurf(params),
        };
        if let Err(e) = pool.post(request, on_message, on_error) {
            log::warn!("MolecularSurface worker unavailable ({e}), computing without worker");
            if let Some((params, radius, callback)) = self.inbox.cancel(ticket) {
                let atoms = self.structure.atom_data(&radius);
                callback(self.compute(&atoms, &params));
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
        for ((params, radius, callback), result) in delivered {
            let surface = match result {
                Ok(response) => self.make_surface(
                    response.data,
                    &params,
                    response.scale_factor.unwrap_or(params.scale_factor),
                ),
                Err(e) => {
                    log::warn!(
                        "MolecularSurface worker error ({e}), computing without worker"
                    );
                    let atoms = self.structure.atom_data(&radius);
                    self.compute(&atoms, &params)
                }
            };
            callback(surface);
        }
        count
    }

    /// Requests posted but not yet delivered.
    #[must_use]
    pub fn waiting(&self) -> usize {
        self.inbox.waiting()
    }

    /// Terminate the worker pool; undelivered requests are dropped.
    pub fn dispose(&mut self) {
        if let Some(mut pool) = self.pool.take() {
            pool.terminate();
        }
        self.inbox = Inbox::new();
    }
}

impl<S> std::fmt::Debug for MolecularSurface<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MolecularSurface")
            .field("max_workers", &self.max_workers)
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::worker::TaskKind;

    fn pair(distance: f32) -> AtomList {
        let mut atoms = AtomList::new("pair");
        atoms.push(Vec3::ZERO, "C", Some(1.5));
        atoms.push(Vec3::new(distance, 0.0, 0.0), "C", Some(1.5));
        atoms
    }

    fn explicit() -> SurfaceOptions {
        SurfaceOptions {
            radius: RadiusParams {
                kind: RadiusKind::Explicit,
                ..RadiusParams::default()
            },
            ..SurfaceOptions::default()
        }
    }

    #[test]
    fn radius_tables() {
        let vdw = RadiusParams::default();
        assert_eq!(vdw.radius("c", None), 1.7);
        assert_eq!(vdw.radius("Xx", None), DEFAULT_VDW_RADIUS);
        let cov = RadiusParams {
            kind: RadiusKind::Covalent,
            scale: 2.0,
            ..RadiusParams::default()
        };
        assert!((cov.radius("O", None) - 1.32).abs() < 1e-6);
        let uniform = RadiusParams {
            kind: RadiusKind::Uniform,
            size: 1.3,
            scale: 1.0,
        };
        assert_eq!(uniform.radius("FE", Some(9.0)), 1.3);
        let own = RadiusParams {
            kind: RadiusKind::Explicit,
            ..RadiusParams::default()
        };
        assert_eq!(own.radius("N", Some(1.2)), 1.2);
        assert_eq!(own.radius("N", None), 1.55);
    }

    #[test]
    fn atom_data_follows_the_scheme() {
        let atoms = pair(3.0).atom_data(&RadiusParams::default());
        assert_eq!(atoms.radii, vec![1.7, 1.7]);
        assert_eq!(atoms.ids, vec![0, 1]);
    }

    #[test]
    fn surface_carries_provenance() {
        let facade = MolecularSurface::new(pair(3.0));
        let opts = SurfaceOptions {
            surface_type: SurfaceType::Av,
            smooth: 0,
            ..explicit()
        };
        let surface = facade.get_surface(&opts);
        assert!(surface.vertex_count() > 0);
        assert_eq!(
            surface.info,
            SurfaceInfo::Molecular {
                surface_type: SurfaceType::Av,
                probe_radius: 1.4,
                scale_factor: 2.0,
                smooth: 0,
                cutoff: 0.0,
            }
        );
        assert!(surface.data.atom_index.is_some());
    }

    #[test]
    fn worker_result_matches_synchronous_result() {
        let mut facade = MolecularSurface::new(pair(3.0));
        let opts = SurfaceOptions {
            surface_type: SurfaceType::Ms,
            ..explicit()
        };
        let expected = facade.get_surface(&opts);

        let received = Rc::new(RefCell::new(None));
        let sink = Rc::clone(&received);
        facade.get_surface_worker(&opts, move |s| *sink.borrow_mut() = Some(s));
        assert_eq!(facade.waiting(), 1);
        assert_eq!(facade.wait(), 1);
        assert_eq!(received.borrow().as_ref(), Some(&expected));
    }

    #[test]
    fn worker_disabled_runs_inline() {
        let mut facade = MolecularSurface::new(pair(3.0));
        let opts = SurfaceOptions {
            use_worker: false,
            ..explicit()
        };
        let received = Rc::new(RefCell::new(0));
        let sink = Rc::clone(&received);
        facade.get_surface_worker(&opts, move |s| {
            *sink.borrow_mut() = s.vertex_count();
        });
        assert!(*received.borrow() > 0);
        assert_eq!(facade.waiting(), 0);
    }

    #[test]
    fn failing_worker_falls_back() {
        let mut facade = MolecularSurface::with_registry(
            pair(3.0),
            Arc::new(TaskRegistry::empty()),
            2,
        );
        let received = Rc::new(RefCell::new(None));
        let sink = Rc::clone(&received);
        facade.get_surface_worker(&SurfaceOptions::default(), move |s| {
            *sink.borrow_mut() = Some(s.vertex_count());
        });
        assert_eq!(facade.wait(), 1);
        assert!(received.borrow().is_some_and(|n| n > 0));
    }

    fn fail_on_contour(
        state: &mut WorkerState,
        request: Request,
    ) -> Result<Response, TaskError> {
        match request.params {
            TaskParams::MolSurf(p) if p.contour => {
                Err(TaskError::InvalidArgs("contour".to_owned()))
            }
            _ => {
                std::thread::sleep(std::time::Duration::from_millis(1000));
                molsurf_task(state, request)
            }
        }
    }

    #[test]
    fn requests_queued_behind_a_failure_are_recomputed() {
        let mut registry = TaskRegistry::empty();
        registry.register(TaskKind::MolSurf, fail_on_contour);
        let mut facade =
            MolecularSurface::with_registry(pair(3.0), Arc::new(registry), 1);
        let received = Rc::new(RefCell::new(Vec::new()));
        for contour in [true, false] {
            let sink = Rc::clone(&received);
            let opts = SurfaceOptions {
                contour,
                ..explicit()
            };
            facade.get_surface_worker(&opts, move |s| {
                sink.borrow_mut().push((s.data.contour, s.vertex_count()));
            });
        }
        let expected = facade.get_surface(&explicit()).vertex_count();

        let start = web_time::Instant::now();
        let mut delivered = 0;
        while delivered < 2 && start.elapsed().as_secs() < 5 {
            delivered += facade.poll();
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        assert_eq!(delivered, 2);
        assert!(start.elapsed().as_millis() < 800);
        assert_eq!(facade.waiting(), 0);
        let received = received.borrow();
        assert_eq!(received.len(), 2);
        assert!(received[0].0 && received[0].1 > 0);
        assert_eq!(received[1], (false, expected));
    }
}
