//! End-to-end molecular surface properties: topology of simple atom
//! arrangements, determinism and worker offload.

use std::cell::RefCell;
use std::rc::Rc;

use glam::Vec3;
use isomesh::options::SurfaceOptions;
use isomesh::surface::{
    AtomList, MolecularSurface, RadiusKind, RadiusParams, SurfaceType,
};
use isomesh::{Surface, SurfaceData};

fn two_atoms(distance: f32) -> AtomList {
    let mut atoms = AtomList::new("pair");
    atoms.push(Vec3::ZERO, "C", Some(1.5));
    atoms.push(Vec3::new(distance, 0.0, 0.0), "C", Some(1.5));
    atoms
}

fn options(surface_type: SurfaceType) -> SurfaceOptions {
    SurfaceOptions {
        surface_type,
        probe_radius: 1.4,
        scale_factor: 2.0,
        smooth: 0,
        radius: RadiusParams {
            kind: RadiusKind::Explicit,
            ..RadiusParams::default()
        },
        use_worker: false,
        ..SurfaceOptions::default()
    }
}

fn root(parent: &mut [usize], mut i: usize) -> usize {
    while parent[i] != i {
        parent[i] = parent[parent[i]];
        i = parent[i];
    }
    i
}

/// Connected components of the triangle graph.
fn components(data: &SurfaceData) -> usize {
    let index = data.index.to_u32_vec();
    let mut parent: Vec<usize> = (0..data.vertex_count()).collect();
    for tri in index.chunks_exact(3) {
        let a = root(&mut parent, tri[0] as usize);
        for &v in &tri[1..] {
            let b = root(&mut parent, v as usize);
            parent[b] = a;
        }
    }
    let mut roots: Vec<usize> = index
        .iter()
        .map(|&v| root(&mut parent, v as usize))
        .collect();
    roots.sort_unstable();
    roots.dedup();
    roots.len()
}

#[test]
fn overlapping_atoms_give_one_component() {
    let surface =
        MolecularSurface::new(two_atoms(3.0)).get_surface(&options(SurfaceType::Av));
    assert!(surface.data.index.len() / 3 > 0);
    assert_eq!(components(&surface.data), 1);
}

#[test]
fn distant_atoms_give_two_components() {
    for ty in [SurfaceType::Av, SurfaceType::Ses] {
        let surface = MolecularSurface::new(two_atoms(20.0)).get_surface(&options(ty));
        assert_eq!(components(&surface.data), 2, "{ty}");
        let vertices = surface.data.vertices();
        for tri in surface.data.index.to_u32_vec().chunks_exact(3) {
            let left = tri.iter().filter(|&&v| vertices[v as usize].x < 10.0).count();
            assert!(left == 0 || left == 3, "{ty}: triangle bridges the gap");
        }
    }
}

#[test]
fn atom_ids_reference_the_nearest_atom() {
    let surface =
        MolecularSurface::new(two_atoms(20.0)).get_surface(&options(SurfaceType::Av));
    let ids = surface.data.atom_index.as_ref().unwrap();
    let mut matched = 0;
    for (v, &id) in surface.data.vertices().iter().zip(ids) {
        let expected = i32::from(v.x > 10.0);
        assert!(id == expected || id == -1, "vertex {v} has atom {id}");
        matched += usize::from(id == expected);
    }
    assert!(matched > ids.len() / 2);
}

#[test]
fn every_flavour_encloses_the_atoms() {
    let facade = MolecularSurface::new(two_atoms(3.0));
    for ty in [
        SurfaceType::Av,
        SurfaceType::Vws,
        SurfaceType::Sas,
        SurfaceType::Ms,
        SurfaceType::Ses,
    ] {
        let surface = facade.get_surface(&options(ty));
        let (lo, hi) = surface.bounding_box();
        assert!(lo.x < 0.0 && hi.x > 3.0, "{ty}: {lo} .. {hi}");
    }
}

#[test]
fn sas_is_larger_than_vws() {
    let facade = MolecularSurface::new(two_atoms(3.0));
    let extent = |ty| {
        let (lo, hi): (Vec3, Vec3) = facade.get_surface(&options(ty)).bounding_box();
        hi.x - lo.x
    };
    assert!(extent(SurfaceType::Sas) > extent(SurfaceType::Vws) + 1.5);
}

#[test]
fn repeated_extraction_is_bit_identical() {
    let facade = MolecularSurface::new(two_atoms(3.0));
    let opts = SurfaceOptions {
        smooth: 2,
        ..options(SurfaceType::Ms)
    };
    let first = facade.get_surface(&opts);
    let second = facade.get_surface(&opts);
    assert_eq!(first.data.position, second.data.position);
    assert_eq!(first.data.index, second.data.index);
}

#[test]
fn contour_output_has_line_segments() {
    let opts = SurfaceOptions {
        contour: true,
        smooth: 3,
        ..options(SurfaceType::Av)
    };
    let surface = MolecularSurface::new(two_atoms(3.0)).get_surface(&opts);
    assert!(surface.data.contour);
    assert!(surface.data.normal.is_none());
    assert_eq!(surface.data.index.len() % 2, 0);
    assert!(!surface.data.index.is_empty());
}

#[test]
fn empty_structure_gives_empty_surface() {
    let surface = MolecularSurface::new(AtomList::new("none"))
        .get_surface(&options(SurfaceType::Ms));
    assert!(surface.data.is_empty());
}

#[test]
fn worker_requests_are_delivered_in_full() {
    let mut facade = MolecularSurface::new(two_atoms(3.0));
    let received: Rc<RefCell<Vec<Surface>>> = Rc::default();
    for probe in [1.0, 1.4] {
        let sink = Rc::clone(&received);
        let opts = SurfaceOptions {
            probe_radius: probe,
            use_worker: true,
            ..options(SurfaceType::Ms)
        };
        facade.get_surface_worker(&opts, move |s| sink.borrow_mut().push(s));
    }
    while facade.waiting() > 0 {
        let _ = facade.poll();
        std::thread::yield_now();
    }
    let received = received.borrow();
    assert_eq!(received.len(), 2);
    let expected = facade.get_surface(&SurfaceOptions {
        probe_radius: 1.0,
        ..options(SurfaceType::Ms)
    });
    assert!(received.iter().any(|s| s.data == expected.data));
    facade.dispose();
}
