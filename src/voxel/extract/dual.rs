//! Smooth extraction with surface nets
//!
//! Every cell (cube of 8 samples) that the surface crosses gets one vertex at
//! the average of its edge crossings. Every sample edge with a sign change
//! becomes a quad joining the four cells around it.

use crate::core::types::Vec3;
use crate::voxel::density::DensityBlock;
use crate::voxel::mesh::{ExtractedMesh, ExtractionStrategy, MeshVertex, NormalMode};

/// The 12 edges of a cell as pairs of corner indices (bit 0 = x, 1 = y, 2 = z)
const CELL_EDGES: [(usize, usize); 12] = [
    (0, 1), (2, 3), (4, 5), (6, 7),
    (0, 2), (1, 3), (4, 6), (5, 7),
    (0, 4), (1, 5), (2, 6), (3, 7),
];

const NO_VERTEX: u32 = u32::MAX;

fn corner_offset(corner: usize) -> [usize; 3] {
    [corner & 1, (corner >> 1) & 1, (corner >> 2) & 1]
}

/// Density gradient across a cell from its 8 corners, pointing towards air
fn cell_gradient(d: &[f32; 8]) -> Vec3 {
    let gx = (d[1] - d[0]) + (d[3] - d[2]) + (d[5] - d[4]) + (d[7] - d[6]);
    let gy = (d[2] - d[0]) + (d[3] - d[1]) + (d[6] - d[4]) + (d[7] - d[5]);
    let gz = (d[4] - d[0]) + (d[5] - d[1]) + (d[6] - d[2]) + (d[7] - d[3]);
    let g = Vec3::new(gx, gy, gz);
    if g.length_squared() > 1e-12 {
        g.normalize()
    } else {
        Vec3::Y
    }
}

/// Extract a smooth surface.
///
/// Cells `0..=n` are considered; cell `c` spans samples `c..=c + 1`, i.e.
/// local space `[(c - 1), c] * voxel_size`. Quads are emitted only for edges
/// whose start sample lies in `1..=n` on every axis, which gives each edge
/// exactly one owning chunk.
pub fn extract(block: &DensityBlock, normals: NormalMode) -> ExtractedMesh {
    let n = block.cells();
    let cells = n + 1;
    let vs = block.voxel_size() as f32;
    let mut mesh = ExtractedMesh::empty(block.coord(), ExtractionStrategy::Dual);
    let mut cell_vertex = vec![NO_VERTEX; cells * cells * cells];
    let cell_index = |x: usize, y: usize, z: usize| (z * cells + y) * cells + x;

    for z in 0..cells {
        for y in 0..cells {
            for x in 0..cells {
                let mut d = [0.0f32; 8];
                let mut solid_material = None;
                for (corner, slot) in d.iter_mut().enumerate() {
                    let [ox, oy, oz] = corner_offset(corner);
                    let s = block.get(x + ox, y + oy, z + oz);
                    *slot = s.density;
                    if s.is_solid() && solid_material.is_none() {
                        solid_material = Some(s.material);
                    }
                }

                let mut sum = Vec3::ZERO;
                let mut crossings = 0u32;
                for &(a, b) in CELL_EDGES.iter() {
                    let (da, db) = (d[a], d[b]);
                    if (da < 0.0) == (db < 0.0) {
                        continue;
                    }
                    let t = da / (da - db);
                    let pa = Vec3::from(corner_offset(a).map(|v| v as f32));
                    let pb = Vec3::from(corner_offset(b).map(|v| v as f32));
                    sum += pa + (pb - pa) * t;
                    crossings += 1;
                }
                if crossings == 0 {
                    continue;
                }

                let local = sum / crossings as f32;
                let cell = Vec3::new(x as f32, y as f32, z as f32);
                let position = (cell + local - Vec3::ONE) * vs;
                let normal = match normals {
                    NormalMode::Gradient => cell_gradient(&d),
                    NormalMode::Geometry => Vec3::ZERO,
                };
                let color = solid_material.map(|m| m.color()).unwrap_or(Vec3::ZERO);

                cell_vertex[cell_index(x, y, z)] = mesh.vertices.len() as u32;
                mesh.vertices.push(MeshVertex {
                    position: position.to_array(),
                    normal: normal.to_array(),
                    color: color.to_array(),
                });
            }
        }
    }

    for axis in 0..3 {
        let b_axis = (axis + 1) % 3;
        let c_axis = (axis + 2) % 3;
        for z in 1..=n {
            for y in 1..=n {
                for x in 1..=n {
                    let p = [x, y, z];
                    let mut q = p;
                    q[axis] += 1;
                    let d0 = block.density(p[0], p[1], p[2]);
                    let d1 = block.density(q[0], q[1], q[2]);
                    if (d0 < 0.0) == (d1 < 0.0) {
                        continue;
                    }

                    let mut p_b = p;
                    p_b[b_axis] -= 1;
                    let mut p_c = p;
                    p_c[c_axis] -= 1;
                    let mut p_bc = p_b;
                    p_bc[c_axis] -= 1;

                    let v0 = cell_vertex[cell_index(p_bc[0], p_bc[1], p_bc[2])];
                    let v1 = cell_vertex[cell_index(p_c[0], p_c[1], p_c[2])];
                    let v2 = cell_vertex[cell_index(p_b[0], p_b[1], p_b[2])];
                    let v3 = cell_vertex[cell_index(p[0], p[1], p[2])];
                    if [v0, v1, v2, v3].contains(&NO_VERTEX) {
                        continue;
                    }

                    if d0 < 0.0 {
                        mesh.indices.extend_from_slice(&[v0, v1, v3, v0, v3, v2]);
                    } else {
                        mesh.indices.extend_from_slice(&[v0, v3, v1, v0, v2, v3]);
                    }
                }
            }
        }
    }

    if normals == NormalMode::Geometry {
        accumulate_face_normals(&mut mesh);
    }

    mesh
}

/// Area-weighted average of adjacent triangle normals
fn accumulate_face_normals(mesh: &mut ExtractedMesh) {
    let mut acc = vec![Vec3::ZERO; mesh.vertices.len()];
    for tri in mesh.indices.chunks_exact(3) {
        let [a, b, c] = [tri[0] as usize, tri[1] as usize, tri[2] as usize];
        let pa = Vec3::from(mesh.vertices[a].position);
        let pb = Vec3::from(mesh.vertices[b].position);
        let pc = Vec3::from(mesh.vertices[c].position);
        let face = (pb - pa).cross(pc - pa);
        acc[a] += face;
        acc[b] += face;
        acc[c] += face;
    }
    for (vertex, n) in mesh.vertices.iter_mut().zip(acc) {
        vertex.normal = n.try_normalize().unwrap_or(Vec3::Y).to_array();
    }
}
