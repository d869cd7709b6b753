//! Mesh relaxation and vertex normals for triangle soups stored as flat
//! xyz arrays.

use glam::Vec3;

/// Inward displacement, in units of the vertex normal, applied after each
/// smoothing iteration to counter the shrinkage of Laplacian averaging.
const INFLATE: f32 = -0.75 / 4.5;

fn vertex(positions: &[f32], i: usize) -> Vec3 {
    Vec3::from_slice(&positions[3 * i..3 * i + 3])
}

fn store(positions: &mut [f32], i: usize, v: Vec3) {
    v.write_to_slice(&mut positions[3 * i..3 * i + 3]);
}

/// Deduplicated vertex adjacency of a triangle list.
fn adjacency(vertex_count: usize, index: &[u32]) -> Vec<Vec<u32>> {
    let mut neighbours: Vec<Vec<u32>> = vec![Vec::new(); vertex_count];
    for face in index.chunks_exact(3) {
        for (a, b) in [(0, 1), (1, 2), (2, 0)] {
            let (va, vb) = (face[a], face[b]);
            if !neighbours[va as usize].contains(&vb) {
                neighbours[va as usize].push(vb);
            }
            if !neighbours[vb as usize].contains(&va) {
                neighbours[vb as usize].push(va);
            }
        }
    }
    neighbours
}

/// Relax `positions` by `iterations` rounds of Laplacian averaging over
/// the triangle adjacency in `index`.
///
/// Vertices with fewer than three neighbours stay put, vertices with three
/// or four weigh themselves by one half, all others by one. Each round is
/// followed by a slight inflation along the current vertex normals.
pub fn laplacian_smooth(positions: &mut [f32], index: &[u32], iterations: u32) {
    let vertex_count = positions.len() / 3;
    if vertex_count == 0 || index.is_empty() {
        return;
    }
    let neighbours = adjacency(vertex_count, index);
    let mut normals = vec![0.0; positions.len()];
    let mut scratch = positions.to_vec();

    for _ in 0..iterations {
        scratch.copy_from_slice(positions);
        for (i, adj) in neighbours.iter().enumerate() {
            let degree = adj.len();
            if degree < 3 {
                continue;
            }
            let sum = adj
                .iter()
                .fold(Vec3::ZERO, |acc, &j| acc + vertex(&scratch, j as usize));
            let own = if degree <= 4 { 0.5 } else { 1.0 };
            let relaxed =
                (sum + own * vertex(&scratch, i)) / (degree as f32 + own);
            store(positions, i, relaxed);
        }

        compute_vertex_normals(positions, index, &mut normals);
        for i in 0..vertex_count {
            let moved = vertex(positions, i) + INFLATE * vertex(&normals, i);
            store(positions, i, moved);
        }
    }
}

/// Area-weighted unit vertex normals of a triangle list, written to
/// `normals` (same layout as `positions`). Vertices not referenced by any
/// face, or whose faces are degenerate, get a zero normal.
pub fn compute_vertex_normals(
    positions: &[f32],
    index: &[u32],
    normals: &mut [f32],
) {
    normals.fill(0.0);
    for face in index.chunks_exact(3) {
        let [a, b, c] = [face[0], face[1], face[2]].map(|i| i as usize);
        let pa = vertex(positions, a);
        let pb = vertex(positions, b);
        let pc = vertex(positions, c);
        let n = (pc - pb).cross(pa - pb);
        for v in [a, b, c] {
            let acc = vertex(normals, v) + n;
            store(normals, v, acc);
        }
    }
    for n in normals.chunks_exact_mut(3) {
        let unit = Vec3::from_slice(n).normalize_or_zero();
        unit.write_to_slice(n);
    }
}
