//! Typed messages exchanged between callers and extraction workers.
//!
//! A request carries optional heavy arguments (atoms or a whole field) and
//! the light parameters of one extraction; the response echoes the
//! parameters next to the mesh. Buffers move across the thread boundary
//! without being copied.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::surface::{AtomData, MolecularSurfaceParams, ScalarField, SurfaceData};
use crate::volume::VolumeSurfaceParams;

/// Task a worker runs for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    /// Molecular surface from atom spheres.
    MolSurf,
    /// Isosurface of a field the worker was primed with.
    VolSurf,
}

impl TaskKind {
    /// Registry name of the task.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MolSurf => "molsurf",
            Self::VolSurf => "volsurf",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Heavy request payload, moved into the worker.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum TaskArgs {
    /// Nothing new; the worker reuses what it was primed with.
    #[default]
    None,
    /// Atom spheres for a molecular surface.
    Atoms(AtomData),
    /// Field the worker caches for later isosurface requests.
    Field(Arc<ScalarField>),
}

/// Light per-request parameters, echoed back in the response.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum TaskParams {
    /// Molecular surface parameters.
    MolSurf(MolecularSurfaceParams),
    /// Volume isosurface parameters.
    VolSurf(VolumeSurfaceParams),
}

impl TaskParams {
    /// Task these parameters belong to.
    #[must_use]
    pub fn kind(&self) -> TaskKind {
        match self {
            Self::MolSurf(_) => TaskKind::MolSurf,
            Self::VolSurf(_) => TaskKind::VolSurf,
        }
    }
}

/// One extraction job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Heavy payload.
    pub args: TaskArgs,
    /// Extraction parameters.
    pub params: TaskParams,
}

impl Request {
    /// Task this request runs.
    #[must_use]
    pub fn kind(&self) -> TaskKind {
        self.params.kind()
    }
}

/// Result of a successful job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Extracted mesh.
    pub data: SurfaceData,
    /// Parameters of the request, echoed.
    pub params: TaskParams,
    /// Grid points per angstrom actually used, for molecular surfaces.
    pub scale_factor: Option<f32>,
}

/// Failure of a job inside a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskError {
    /// No handler is registered for the task.
    UnknownTask(TaskKind),
    /// An isosurface request reached a worker never sent a field.
    NotPrimed,
    /// The handler panicked; the message is the panic payload.
    Panicked(String),
    /// The worker thread is gone.
    Disconnected,
    /// The request arguments do not fit the task.
    InvalidArgs(String),
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownTask(kind) => write!(f, "no handler for task {kind}"),
            Self::NotPrimed => f.write_str("worker has no field loaded"),
            Self::Panicked(msg) => write!(f, "task panicked: {msg}"),
            Self::Disconnected => f.write_str("worker thread disconnected"),
            Self::InvalidArgs(msg) => write!(f, "invalid task arguments: {msg}"),
        }
    }
}

impl std::error::Error for TaskError {}
