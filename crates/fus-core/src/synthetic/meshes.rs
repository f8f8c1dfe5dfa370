//! Synthetic skin and photoscan surfaces.

use crate::{Pt3, Real, TriangleMesh, Vec3, plane_basis};

/// Closed ellipsoid with outward-facing triangles.
///
/// `n_lat` latitude bands (>= 2) and `n_lon` longitude segments (>= 3).
/// Vertex 0 is the `+z` pole and the last vertex is the `-z` pole.
pub fn ellipsoid(center: Pt3, radii: Vec3, n_lat: usize, n_lon: usize) -> TriangleMesh {
    let n_lat = n_lat.max(2);
    let n_lon = n_lon.max(3);
    let mut vertices = Vec::with_capacity((n_lat - 1) * n_lon + 2);
    vertices.push(center + Vec3::new(0.0, 0.0, radii.z));
    for i in 1..n_lat {
        let theta = std::f64::consts::PI * i as Real / n_lat as Real;
        for j in 0..n_lon {
            let phi = std::f64::consts::TAU * j as Real / n_lon as Real;
            vertices.push(
                center
                    + Vec3::new(
                        radii.x * theta.sin() * phi.cos(),
                        radii.y * theta.sin() * phi.sin(),
                        radii.z * theta.cos(),
                    ),
            );
        }
    }
    vertices.push(center - Vec3::new(0.0, 0.0, radii.z));
    let south = vertices.len() - 1;
    let ring = |i: usize, j: usize| 1 + (i - 1) * n_lon + (j % n_lon);

    let mut triangles = Vec::with_capacity(2 * n_lat * n_lon);
    for j in 0..n_lon {
        triangles.push([0, ring(1, j), ring(1, j + 1)]);
    }
    for i in 1..n_lat - 1 {
        for j in 0..n_lon {
            let (a, b, c, d) = (ring(i, j), ring(i + 1, j), ring(i + 1, j + 1), ring(i, j + 1));
            triangles.push([a, b, c]);
            triangles.push([a, c, d]);
        }
    }
    for j in 0..n_lon {
        triangles.push([south, ring(n_lat - 1, j + 1), ring(n_lat - 1, j)]);
    }
    TriangleMesh {
        vertices,
        triangles,
    }
}

/// Head-sized ellipsoid centred at the patient origin (RAS mm).
pub fn head_surface() -> TriangleMesh {
    ellipsoid(Pt3::origin(), Vec3::new(75.0, 95.0, 85.0), 36, 72)
}

/// Square `n x n` grid patch in the plane through `center` with unit
/// `normal`, spanning `2 * half_extent` on each side.
pub fn plane_patch(center: Pt3, normal: Vec3, half_extent: Real, n: usize) -> TriangleMesh {
    let n = n.max(2);
    let (e1, e2) = plane_basis(&normal, &Vec3::x());
    let step = 2.0 * half_extent / (n - 1) as Real;
    let mut vertices = Vec::with_capacity(n * n);
    for r in 0..n {
        for c in 0..n {
            let u = -half_extent + c as Real * step;
            let v = -half_extent + r as Real * step;
            vertices.push(center + e1 * u + e2 * v);
        }
    }
    let mut triangles = Vec::with_capacity(2 * (n - 1) * (n - 1));
    for r in 0..n - 1 {
        for c in 0..n - 1 {
            let a = r * n + c;
            triangles.push([a, a + 1, a + n + 1]);
            triangles.push([a, a + n + 1, a + n]);
        }
    }
    TriangleMesh {
        vertices,
        triangles,
    }
}
