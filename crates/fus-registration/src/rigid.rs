//! Weighted least-squares rigid alignment of paired points (Kabsch).

use fus_core::{Iso3, Mat3, PlanResult, PlanningError, Pt3, Real, Vec3, build_iso};

/// Result of a paired-point alignment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RigidFit {
    /// Maps source points onto target points: `target ≈ iso * source`.
    pub iso: Iso3,
    /// Least-squares uniform scale between the sets. Reported only; `iso`
    /// is always rigid.
    pub scale: Real,
    /// Weighted RMS residual of `iso` over the pairs (mm).
    pub rms_mm: Real,
}

/// Align `source` onto `target` with optional per-pair weights.
///
/// Fails with [`PlanningError::InvalidInput`] for mismatched lengths, fewer
/// than three pairs, non-positive total weight or collinear points.
pub fn fit_rigid(
    source: &[Pt3],
    target: &[Pt3],
    weights: Option<&[Real]>,
) -> PlanResult<RigidFit> {
    if source.len() != target.len() {
        return Err(PlanningError::InvalidInput(format!(
            "point sets differ in size: {} vs {}",
            source.len(),
            target.len()
        )));
    }
    if source.len() < 3 {
        return Err(PlanningError::InvalidInput(
            "rigid alignment needs at least three pairs".into(),
        ));
    }
    if let Some(w) = weights
        && w.len() != source.len()
    {
        return Err(PlanningError::InvalidInput(format!(
            "expected {} weights, got {}",
            source.len(),
            w.len()
        )));
    }
    let weight = |i: usize| weights.map_or(1.0, |w| w[i]);

    let mut w_sum = 0.0;
    let mut c_s = Vec3::zeros();
    let mut c_t = Vec3::zeros();
    for (i, (s, t)) in source.iter().zip(target).enumerate() {
        let w = weight(i);
        w_sum += w;
        c_s += s.coords * w;
        c_t += t.coords * w;
    }
    if w_sum <= 0.0 || !w_sum.is_finite() {
        return Err(PlanningError::InvalidInput(
            "total correspondence weight is zero".into(),
        ));
    }
    c_s /= w_sum;
    c_t /= w_sum;

    let mut h = Mat3::zeros();
    let mut var_s = 0.0;
    for (i, (s, t)) in source.iter().zip(target).enumerate() {
        let w = weight(i);
        let ds = s.coords - c_s;
        let dt = t.coords - c_t;
        h += (dt * ds.transpose()) * w;
        var_s += w * ds.norm_squared();
    }

    let svd = h.svd(true, true);
    let (Some(u), Some(v_t)) = (svd.u, svd.v_t) else {
        return Err(PlanningError::InvalidInput("SVD of cross-covariance failed".into()));
    };
    let sv = svd.singular_values;
    if sv[1] <= 1e-9 * sv[0].max(1e-300) {
        return Err(PlanningError::InvalidInput(
            "points are collinear; rotation is not determined".into(),
        ));
    }

    let mut r = u * v_t;
    let mut trace = sv[0] + sv[1] + sv[2];
    if r.determinant() < 0.0 {
        let mut u_fix = u;
        u_fix.column_mut(2).neg_mut();
        r = u_fix * v_t;
        trace -= 2.0 * sv[2];
    }
    let t = c_t - r * c_s;
    let iso = build_iso(r, t);

    let mut sq = 0.0;
    for (i, (s, tp)) in source.iter().zip(target).enumerate() {
        sq += weight(i) * (iso.transform_point(s) - tp).norm_squared();
    }
    Ok(RigidFit {
        iso,
        scale: if var_s > 0.0 { trace / var_s } else { 1.0 },
        rms_mm: (sq / w_sum).sqrt(),
    })
}
