//! Volume isosurfaces through the public API: isolevel heuristics,
//! determinism, worker priming and superseded requests.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use glam::{Mat4, Vec3};
use isomesh::options::{IsolevelType, Options, VolumeOptions};
use isomesh::surface::{ScalarField, SurfaceInfo};
use isomesh::volume::{FilteredVolume, GridStats, IsosurfaceRequest, Volume};
use isomesh::worker::{GenerationToken, TaskRegistry};
use isomesh::Surface;

/// Gaussian blob of height 10 centred in an `n`-cube.
fn blob(n: usize) -> ScalarField {
    let c = (n - 1) as f32 / 2.0;
    ScalarField::from_fn(n, n, n, |x, y, z| {
        let d2 = Vec3::new(x as f32 - c, y as f32 - c, z as f32 - c).length_squared();
        10.0 * (-d2 / 12.0).exp()
    })
}

fn placed(n: usize) -> Volume {
    let matrix = Mat4::from_translation(Vec3::new(-5.0, 2.0, 0.0))
        * Mat4::from_scale(Vec3::splat(0.75));
    Volume::new("blob", blob(n), matrix)
}

#[test]
fn isolevel_outside_the_data_range_is_empty() {
    let mut volume = placed(16);
    for isolevel in [-1.0, 10.5] {
        let surface = volume.get_surface(&IsosurfaceRequest {
            isolevel,
            ..IsosurfaceRequest::default()
        });
        assert!(surface.data.is_empty());
        assert!(surface.data.index.is_empty());
    }
}

#[test]
fn default_request_uses_the_two_sigma_contour() {
    let mut volume = placed(16);
    let surface = volume.get_surface(&IsosurfaceRequest::default());
    let two_sigma = volume.value_for_sigma(2.0);
    assert!(matches!(
        surface.info,
        SurfaceInfo::Volume { isolevel, .. } if isolevel == two_sigma
    ));
    assert!(surface.name.starts_with("blob@"));
    assert!(!surface.data.is_empty());
}

#[test]
fn options_drive_requests() {
    let mut volume = placed(16);
    let opts = Options::from_toml_str(
        "[volume]\nisolevel = 5.0\nisolevel_type = \"value\"\nsmooth = 1\n",
    )
    .unwrap();
    let request = volume.request(&opts.volume, None);
    assert_eq!(request.isolevel, 5.0);
    let surface = volume.get_surface(&request);
    assert_eq!(surface.name, "blob@5.0");
    assert!(surface.data.normal.is_some());

    let sigma = VolumeOptions {
        isolevel: Some(1.5),
        isolevel_type: IsolevelType::Sigma,
        ..VolumeOptions::default()
    };
    let request = volume.request(&sigma, None);
    assert!((volume.sigma_for_value(request.isolevel) - 1.5).abs() < 1e-5);
}

#[test]
fn unchanged_requests_are_bit_identical() {
    let mut volume = placed(20);
    let request = IsosurfaceRequest {
        isolevel: 4.0,
        ..IsosurfaceRequest::default()
    };
    let surfaces: Vec<Surface> = (0..3).map(|_| volume.get_surface(&request)).collect();
    assert!(surfaces.windows(2).all(|w| w[0].data == w[1].data));
}

#[test]
fn worker_surfaces_match_and_stale_ones_are_discarded() {
    let mut volume = placed(20);
    let token = GenerationToken::new();
    let latest: Rc<RefCell<Option<(f32, Surface)>>> = Rc::default();
    let discarded = Rc::new(RefCell::new(0));

    for isolevel in [2.0, 3.0, 4.0, 5.0, 6.0] {
        let generation = token.advance();
        let token = token.clone();
        let latest = Rc::clone(&latest);
        let discarded = Rc::clone(&discarded);
        volume.get_surface_worker(
            &IsosurfaceRequest {
                isolevel,
                ..IsosurfaceRequest::default()
            },
            move |surface| {
                if token.is_current(generation) {
                    *latest.borrow_mut() = Some((isolevel, surface));
                } else {
                    *discarded.borrow_mut() += 1;
                }
            },
        );
    }
    assert!(volume.worker_count() <= 2);
    assert_eq!(volume.wait(), 5);
    assert_eq!(*discarded.borrow(), 4);

    let (isolevel, surface) = latest.borrow_mut().take().unwrap();
    assert_eq!(isolevel, 6.0);
    let expected = volume.get_surface(&IsosurfaceRequest {
        isolevel: 6.0,
        ..IsosurfaceRequest::default()
    });
    assert_eq!(surface, expected);
}

#[test]
fn new_data_reprimes_workers() {
    let mut volume = placed(12);
    let request = IsosurfaceRequest {
        isolevel: 3.0,
        ..IsosurfaceRequest::default()
    };
    let seen: Rc<RefCell<Vec<Surface>>> = Rc::default();
    let sink = Rc::clone(&seen);
    volume.get_surface_worker(&request, move |s| sink.borrow_mut().push(s));
    let _ = volume.wait();

    volume.set_data(blob(18));
    let sink = Rc::clone(&seen);
    volume.get_surface_worker(&request, move |s| sink.borrow_mut().push(s));
    let _ = volume.wait();

    let expected = volume.get_surface(&request);
    let seen = seen.borrow();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[1], expected);
    assert_ne!(seen[0].data, seen[1].data);
}

#[test]
fn broken_registry_still_delivers() {
    let mut volume = placed(12).with_workers(Arc::new(TaskRegistry::empty()), 2);
    let count = Rc::new(RefCell::new(0));
    for _ in 0..3 {
        let count = Rc::clone(&count);
        volume.get_surface_worker(&IsosurfaceRequest::default(), move |s| {
            assert!(!s.data.is_empty());
            *count.borrow_mut() += 1;
        });
    }
    assert_eq!(volume.wait(), 3);
    assert_eq!(*count.borrow(), 3);
    assert_eq!(volume.worker_count(), 0);
}

#[test]
fn periodic_grid_closes_across_the_boundary() {
    // A slab across z = 0 of a periodic grid. Without wrapping the seam
    // cubes between the last and first grid planes are missing.
    let n = 10;
    let field = ScalarField::from_fn(n, n, n, |_, _, z| {
        let dz = (z as f32).min((n - z) as f32);
        3.0 - dz
    });
    let mut volume = Volume::new("slab", field, Mat4::IDENTITY);
    let request = IsosurfaceRequest {
        isolevel: 1.5,
        center: Some(Vec3::splat(4.5)),
        size: 6.0,
        wrap: true,
        ..IsosurfaceRequest::default()
    };
    let wrapped = volume.get_surface(&request);
    let clipped = volume.get_surface(&IsosurfaceRequest {
        wrap: false,
        ..request
    });
    assert!(!clipped.data.is_empty());
    assert!(wrapped.data.index.len() > clipped.data.index.len());
}

#[test]
fn filtered_view_uses_volume_statistics() {
    let volume = placed(10);
    let filtered = FilteredVolume::new(&volume, Some(5.0), None, false);
    assert!(!filtered.is_empty());
    assert!(filtered.data().iter().all(|&v| v >= 5.0));
    assert_eq!(filtered.position().len(), filtered.len() * 3);
    assert_eq!(filtered.value_for_sigma(1.0), volume.value_for_sigma(1.0));
}
