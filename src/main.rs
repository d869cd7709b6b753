//! `isomesh` command-line tool: molecular surface of an xyzr atom file,
//! written as Wavefront OBJ.

use std::cell::RefCell;
use std::fmt::Write as _;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::rc::Rc;
use std::sync::Arc;

use clap::Parser;
use glam::Vec3;
use isomesh::surface::{AtomList, MolecularSurface, RadiusKind};
use isomesh::worker::TaskRegistry;
use isomesh::{IsomeshError, Options, Surface};
use web_time::Instant;

/// Build the molecular surface of an atom file and write it as OBJ.
#[derive(Parser)]
#[command(name = "isomesh", version)]
struct Args {
    /// Atom rows of `x y z radius [element]`.
    atoms: PathBuf,
    /// TOML options preset.
    #[arg(long, value_name = "PRESET")]
    options: Option<PathBuf>,
    /// Output OBJ file; stdout when omitted.
    #[arg(long, value_name = "MESH")]
    out: Option<PathBuf>,
}

/// Rows of `x y z radius [element]`; blank lines and `#` comments skipped.
fn read_atoms(path: &Path) -> Result<AtomList, IsomeshError> {
    let content = std::fs::read_to_string(path)?;
    let name = path
        .file_stem()
        .map_or_else(|| "atoms".to_owned(), |s| s.to_string_lossy().into_owned());
    let mut atoms = AtomList::new(name);
    for (n, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        let bad = || IsomeshError::InvalidInput(format!("{}:{}: {line}", path.display(), n + 1));
        if fields.len() < 4 {
            return Err(bad());
        }
        let mut values = [0.0f32; 4];
        for (value, field) in values.iter_mut().zip(&fields) {
            *value = field.parse().map_err(|_| bad())?;
        }
        let element = fields.get(4).copied().unwrap_or("C");
        atoms.push(Vec3::new(values[0], values[1], values[2]), element, Some(values[3]));
    }
    Ok(atoms)
}

fn to_obj(surface: &Surface) -> String {
    let data = &surface.data;
    let mut obj = format!("# {}\no {}\n", surface.name, surface.name.replace(' ', "_"));
    for p in data.position.chunks_exact(3) {
        let _ = writeln!(obj, "v {} {} {}", p[0], p[1], p[2]);
    }
    if let Some(normal) = &data.normal {
        for n in normal.chunks_exact(3) {
            let _ = writeln!(obj, "vn {} {} {}", n[0], n[1], n[2]);
        }
    }
    let index = data.index.to_u32_vec();
    if data.contour {
        for l in index.chunks_exact(2) {
            let _ = writeln!(obj, "l {} {}", l[0] + 1, l[1] + 1);
        }
    } else if data.normal.is_some() {
        for f in index.chunks_exact(3) {
            let [a, b, c] = [f[0] + 1, f[1] + 1, f[2] + 1];
            let _ = writeln!(obj, "f {a}//{a} {b}//{b} {c}//{c}");
        }
    } else {
        for f in index.chunks_exact(3) {
            let _ = writeln!(obj, "f {} {} {}", f[0] + 1, f[1] + 1, f[2] + 1);
        }
    }
    obj
}

fn run(args: &Args) -> Result<(), IsomeshError> {
    let mut options = match &args.options {
        Some(path) => Options::load(path)?,
        None => Options::default(),
    };
    options.surface.radius.kind = RadiusKind::Explicit;
    let atoms = read_atoms(&args.atoms)?;
    log::info!("read {} atoms from {}", atoms.positions.len(), args.atoms.display());

    let start = Instant::now();
    let mut facade = MolecularSurface::with_registry(
        atoms,
        Arc::new(TaskRegistry::new()),
        options.worker.clamped_max_count(),
    );
    let received = Rc::new(RefCell::new(None));
    let sink = Rc::clone(&received);
    facade.get_surface_worker(&options.surface, move |s| *sink.borrow_mut() = Some(s));
    let _ = facade.wait();
    facade.dispose();
    let surface = received
        .borrow_mut()
        .take()
        .ok_or_else(|| IsomeshError::Worker("no surface was delivered".to_owned()))?;

    let (lo, hi) = surface.bounding_box();
    log::info!(
        "{}: {} vertices, {} indices, bounds {lo} .. {hi}, {:?}",
        surface.name,
        surface.vertex_count(),
        surface.data.index.len(),
        start.elapsed()
    );

    let obj = to_obj(&surface);
    match &args.out {
        Some(path) => std::fs::write(path, obj)?,
        None => std::io::stdout().lock().write_all(obj.as_bytes())?,
    }
    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();

    let args = Args::parse();
    if let Err(e) = run(&args) {
        log::error!("{e}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn command_definition_is_valid() {
        Args::command().debug_assert();
    }

    #[test]
    fn flags_and_positional_atoms() {
        let args = Args::try_parse_from([
            "isomesh",
            "--out",
            "mesh.obj",
            "protein.xyzr",
            "--options",
            "fine.toml",
        ])
        .unwrap();
        assert_eq!(args.atoms, PathBuf::from("protein.xyzr"));
        assert_eq!(args.options, Some(PathBuf::from("fine.toml")));
        assert_eq!(args.out, Some(PathBuf::from("mesh.obj")));
    }

    #[test]
    fn missing_atoms_and_unknown_flags_are_rejected() {
        assert!(Args::try_parse_from(["isomesh"]).is_err());
        assert!(Args::try_parse_from(["isomesh", "a.xyzr", "--bogus"]).is_err());
        assert!(Args::try_parse_from(["isomesh", "a.xyzr", "--out"]).is_err());
    }
}
