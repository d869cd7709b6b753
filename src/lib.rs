// -- Lint policy ---------------------------------------------------------
// This is the single source of truth for crate-wide lints.

// Broad lint groups
#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![deny(clippy::nursery)]
// Documentation
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(rustdoc::private_intra_doc_links)]
#![deny(rustdoc::bare_urls)]
// No panicking in library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]
// No debug/print artifacts
#![deny(clippy::dbg_macro)]
#![deny(clippy::print_stdout)]
#![deny(clippy::print_stderr)]
// Import hygiene
#![deny(clippy::wildcard_imports)]
// Complexity limits
#![deny(clippy::cognitive_complexity)]
#![deny(clippy::excessive_nesting)]
// Function signature hygiene
#![deny(clippy::fn_params_excessive_bools)]
// Clone / pass-by-value hygiene
#![deny(clippy::needless_pass_by_value)]
#![deny(clippy::implicit_clone)]
// String hygiene
#![deny(clippy::inefficient_to_string)]
#![deny(clippy::redundant_closure_for_method_calls)]
#![deny(clippy::manual_string_new)]
#![deny(clippy::str_to_string)]
// Cargo lints (warn, not deny since cargo lints can be noisy)
#![warn(clippy::cargo)]
// Unused / redundant code
#![deny(unused_results)]
#![deny(unused_qualifications)]
// Cast hygiene
#![deny(trivial_casts)]
#![deny(trivial_numeric_casts)]

//! Isosurface extraction engine for molecular graphics.
//!
//! Isomesh turns either atom positions and radii or a dense scalar density
//! grid into a triangulated (or contour-line) surface mesh, ready to be
//! handed to a GPU buffer builder.
//!
//! # Key entry points
//!
//! - [`surface::MolecularSurface`] - molecular surfaces (AV or EDT field
//!   builders) from a [`surface::StructureSource`]
//! - [`volume::Volume`] - isosurfaces of a scalar grid with a grid to world
//!   transform and lazily computed statistics
//! - [`surface::MarchingCubes`] - the table-driven polygonizer shared by
//!   both paths
//! - [`worker::WorkerPool`] - bounded pool of extraction threads
//! - [`options::Options`] - runtime configuration with TOML presets
//!
//! # Architecture
//!
//! A request flows leaf-first: a [`spatial_hash::SpatialHash`] indexes the
//! atoms, a [`surface::FieldBuilder`] fills a [`surface::ScalarField`],
//! [`surface::MarchingCubes`] polygonizes it and optional Laplacian
//! smoothing relaxes the result. Extraction can run on the calling thread
//! or be posted to a [`worker::WorkerPool`], whose workers execute the
//! same code behind a typed message protocol and fall back to the caller
//! thread when they fail.

pub mod error;
pub mod options;
pub mod spatial_hash;
pub mod surface;
pub mod volume;
pub mod worker;

pub use error::IsomeshError;
pub use options::Options;
pub use surface::{Surface, SurfaceData};
pub use volume::Volume;
