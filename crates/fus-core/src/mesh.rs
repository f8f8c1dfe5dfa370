//! Triangulated surfaces and nearest-vertex queries.
//!
//! Skin surfaces (from segmentation) and photoscans (from photogrammetry) are
//! both plain triangle meshes; the wrappers only record where they came from.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::{LengthUnit, PlanResult, PlanningError, Pt3, Real, Vec3};

/// Indexed triangle mesh in millimetres.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriangleMesh {
    pub vertices: Vec<Pt3>,
    pub triangles: Vec<[usize; 3]>,
}

impl TriangleMesh {
    /// Build a mesh, checking that every triangle indexes existing vertices.
    pub fn new(vertices: Vec<Pt3>, triangles: Vec<[usize; 3]>) -> PlanResult<Self> {
        let mesh = Self {
            vertices,
            triangles,
        };
        mesh.validate()?;
        Ok(mesh)
    }

    pub fn validate(&self) -> PlanResult<()> {
        if self.vertices.is_empty() {
            return Err(PlanningError::InvalidInput("mesh has no vertices".into()));
        }
        if let Some(p) = self
            .vertices
            .iter()
            .find(|p| !(p.x.is_finite() && p.y.is_finite() && p.z.is_finite()))
        {
            return Err(PlanningError::InvalidInput(format!(
                "mesh vertex {p:?} is not finite"
            )));
        }
        let n = self.vertices.len();
        for (i, tri) in self.triangles.iter().enumerate() {
            if tri.iter().any(|&v| v >= n) {
                return Err(PlanningError::InvalidInput(format!(
                    "triangle {i} references a vertex outside 0..{n}"
                )));
            }
        }
        Ok(())
    }

    pub fn num_vertices(&self) -> usize {
        self.vertices.len()
    }

    fn triangle_cross(&self, tri: &[usize; 3]) -> Vec3 {
        let a = self.vertices[tri[0]];
        let b = self.vertices[tri[1]];
        let c = self.vertices[tri[2]];
        (b - a).cross(&(c - a))
    }

    /// Total surface area (mm²).
    pub fn area(&self) -> Real {
        self.triangles
            .iter()
            .map(|t| 0.5 * self.triangle_cross(t).norm())
            .sum()
    }

    /// Per-vertex area share (one third of each incident triangle).
    ///
    /// Point clouds without triangles get unit weight per vertex.
    pub fn vertex_areas(&self) -> Vec<Real> {
        if self.triangles.is_empty() {
            return vec![1.0; self.vertices.len()];
        }
        let mut areas = vec![0.0; self.vertices.len()];
        for tri in &self.triangles {
            let a = 0.5 * self.triangle_cross(tri).norm() / 3.0;
            for &v in tri {
                areas[v] += a;
            }
        }
        areas
    }

    /// Area-weighted vertex normals following the triangle winding.
    ///
    /// Isolated vertices get a zero normal.
    pub fn vertex_normals(&self) -> Vec<Vec3> {
        let mut normals = vec![Vec3::zeros(); self.vertices.len()];
        for tri in &self.triangles {
            let n = self.triangle_cross(tri);
            for &v in tri {
                normals[v] += n;
            }
        }
        for n in &mut normals {
            let len = n.norm();
            if len > 0.0 {
                *n /= len;
            }
        }
        normals
    }

    pub fn centroid(&self) -> Pt3 {
        let sum = self
            .vertices
            .iter()
            .fold(Vec3::zeros(), |acc, p| acc + p.coords);
        Pt3::from(sum / self.vertices.len().max(1) as Real)
    }

    /// Axis-aligned bounding box `(min, max)`.
    pub fn bounds(&self) -> (Pt3, Pt3) {
        bounds_of(&self.vertices)
    }

    /// Sub-mesh made of the selected vertices and the triangles fully inside
    /// the selection. Vertices keep their relative order.
    pub fn submesh(&self, keep: &[bool]) -> TriangleMesh {
        let mut remap = vec![usize::MAX; self.vertices.len()];
        let mut vertices = Vec::new();
        for (i, (&k, p)) in keep.iter().zip(&self.vertices).enumerate() {
            if k {
                remap[i] = vertices.len();
                vertices.push(*p);
            }
        }
        let triangles = self
            .triangles
            .iter()
            .filter(|t| t.iter().all(|&v| keep.get(v).copied().unwrap_or(false)))
            .map(|t| [remap[t[0]], remap[t[1]], remap[t[2]]])
            .collect();
        TriangleMesh {
            vertices,
            triangles,
        }
    }

    /// Closest vertex by exhaustive search.
    pub fn closest_vertex(&self, p: &Pt3) -> Option<(usize, Real)> {
        self.vertices
            .iter()
            .enumerate()
            .map(|(i, v)| (i, (v - p).norm()))
            .min_by(|a, b| a.1.total_cmp(&b.1))
    }
}

fn bounds_of(points: &[Pt3]) -> (Pt3, Pt3) {
    let mut lo = Pt3::new(Real::INFINITY, Real::INFINITY, Real::INFINITY);
    let mut hi = Pt3::new(Real::NEG_INFINITY, Real::NEG_INFINITY, Real::NEG_INFINITY);
    for p in points {
        lo = Pt3::new(lo.x.min(p.x), lo.y.min(p.y), lo.z.min(p.z));
        hi = Pt3::new(hi.x.max(p.x), hi.y.max(p.y), hi.z.max(p.z));
    }
    (lo, hi)
}

/// Skin surface in patient space, produced by the segmentation collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkinSurfaceMesh {
    pub mesh: TriangleMesh,
}

impl SkinSurfaceMesh {
    pub fn new(mesh: TriangleMesh) -> PlanResult<Self> {
        mesh.validate()?;
        Ok(Self { mesh })
    }
}

/// Surface reconstructed from photographs, in its own local frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhotoscanMesh {
    /// Identifier used by tracking results to reference this photoscan.
    pub id: String,
    pub mesh: TriangleMesh,
    /// Units of the reconstruction; converted to mm by [`PhotoscanMesh::in_mm`].
    #[serde(default)]
    pub units: LengthUnit,
    /// Opaque reference to the texture image, if any.
    #[serde(default)]
    pub texture: Option<String>,
}

impl PhotoscanMesh {
    /// Copy of this photoscan with vertices expressed in millimetres.
    pub fn in_mm(&self) -> PhotoscanMesh {
        let s = self.units.to_mm();
        let mut out = self.clone();
        if s != 1.0 {
            for v in &mut out.mesh.vertices {
                *v = Pt3::from(v.coords * s);
            }
        }
        out.units = LengthUnit::Millimeter;
        out
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Nearest-neighbour index
// ─────────────────────────────────────────────────────────────────────────────

/// Uniform hash grid over a point set for nearest-neighbour lookups.
#[derive(Debug, Clone)]
pub struct PointGrid {
    points: Vec<Pt3>,
    cell: Real,
    cells: HashMap<(i64, i64, i64), Vec<usize>>,
    key_lo: (i64, i64, i64),
    key_hi: (i64, i64, i64),
}

/// Beyond this many rings a linear scan is cheaper than walking the grid.
const MAX_GRID_RINGS: i64 = 48;

impl PointGrid {
    /// Build a grid sized for a handful of points per occupied cell.
    pub fn new(points: &[Pt3]) -> Self {
        let (lo, hi) = bounds_of(points);
        let extent = if points.is_empty() {
            Vec3::repeat(1.0)
        } else {
            (hi - lo).map(|v| v.max(1e-6))
        };
        let target_per_cell = 4.0;
        let n = points.len().max(1) as Real;
        let mut dims = [extent.x, extent.y, extent.z];
        dims.sort_by(|a, b| b.total_cmp(a));
        // Surfaces fill area rather than volume; take the coarser estimate.
        let volumetric = (dims[0] * dims[1] * dims[2] * target_per_cell / n).cbrt();
        let areal = (dims[0] * dims[1] * target_per_cell / n).sqrt();
        let cell = volumetric
            .max(areal)
            .max(extent.max() / 256.0)
            .max(1e-6);
        let mut cells: HashMap<(i64, i64, i64), Vec<usize>> = HashMap::new();
        for (i, p) in points.iter().enumerate() {
            cells.entry(Self::key(p, cell)).or_default().push(i);
        }
        let key_lo = Self::key(&lo, cell);
        let key_hi = Self::key(&hi, cell);
        Self {
            points: points.to_vec(),
            cell,
            cells,
            key_lo,
            key_hi,
        }
    }

    fn key(p: &Pt3, cell: Real) -> (i64, i64, i64) {
        (
            (p.x / cell).floor() as i64,
            (p.y / cell).floor() as i64,
            (p.z / cell).floor() as i64,
        )
    }

    pub fn points(&self) -> &[Pt3] {
        &self.points
    }

    /// Nearest point to `q` within `max_dist` (unbounded if `None`).
    ///
    /// Ties resolve to the lowest index so results are deterministic.
    pub fn nearest(&self, q: &Pt3, max_dist: Option<Real>) -> Option<(usize, Real)> {
        if self.points.is_empty() {
            return None;
        }
        let (cx, cy, cz) = Self::key(q, self.cell);
        let reach = |c: i64, lo: i64, hi: i64| (c - lo).abs().max((c - hi).abs());
        let max_ring = reach(cx, self.key_lo.0, self.key_hi.0)
            .max(reach(cy, self.key_lo.1, self.key_hi.1))
            .max(reach(cz, self.key_lo.2, self.key_hi.2));
        if max_ring > MAX_GRID_RINGS && max_dist.is_none() {
            return self.nearest_linear(q);
        }
        let mut best: Option<(usize, Real)> = None;
        let mut settled = false;
        for ring in 0..=max_ring.min(MAX_GRID_RINGS) {
            for dx in -ring..=ring {
                for dy in -ring..=ring {
                    // Interior columns only touch the shell at their two ends.
                    let on_side = dx.abs() == ring || dy.abs() == ring;
                    let stride = if on_side || ring == 0 { 1 } else { 2 * ring as usize };
                    for dz in (-ring..=ring).step_by(stride) {
                        let Some(ids) = self.cells.get(&(cx + dx, cy + dy, cz + dz)) else {
                            continue;
                        };
                        for &i in ids {
                            let d = (self.points[i] - q).norm();
                            let better = match best {
                                None => true,
                                Some((bi, bd)) => d < bd || (d == bd && i < bi),
                            };
                            if better {
                                best = Some((i, d));
                            }
                        }
                    }
                }
            }
            // Anything in a farther ring is at least `ring * cell` away.
            let shell = ring as Real * self.cell;
            let found = matches!(best, Some((_, bd)) if bd <= shell);
            let out_of_reach = matches!(max_dist, Some(limit) if shell > limit);
            if found || out_of_reach || ring == max_ring {
                settled = true;
                break;
            }
        }
        if !settled {
            best = self.nearest_linear(q);
        }
        match (best, max_dist) {
            (Some((_, d)), Some(limit)) if d > limit => None,
            (b, _) => b,
        }
    }

    fn nearest_linear(&self, q: &Pt3) -> Option<(usize, Real)> {
        self.points
            .iter()
            .enumerate()
            .map(|(i, p)| (i, (p - q).norm()))
            .min_by(|a, b| a.1.total_cmp(&b.1))
    }

    /// Indices of all points within `radius` of `q`, ascending.
    pub fn within(&self, q: &Pt3, radius: Real) -> Vec<usize> {
        let reach = (radius / self.cell).ceil() as i64;
        let (cx, cy, cz) = Self::key(q, self.cell);
        let mut out = Vec::new();
        for dx in -reach..=reach {
            for dy in -reach..=reach {
                for dz in -reach..=reach {
                    if let Some(ids) = self.cells.get(&(cx + dx, cy + dy, cz + dz)) {
                        out.extend(
                            ids.iter()
                                .copied()
                                .filter(|&i| (self.points[i] - q).norm() <= radius),
                        );
                    }
                }
            }
        }
        out.sort_unstable();
        out
    }
}
