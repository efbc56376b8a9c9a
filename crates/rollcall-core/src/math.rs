//! Pure vector arithmetic shared by the scorer and the enrollment path.
//!
//! Every function takes two slices of equal length. A length mismatch is a
//! caller bug; the scorer filters mismatched entries before calling in.

/// Sum of elementwise products.
pub fn dot(a: &[f64], b: &[f64]) -> f64 {
    debug_assert_eq!(a.len(), b.len());
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Euclidean (L2) norm.
pub fn norm(a: &[f64]) -> f64 {
    dot(a, a).sqrt()
}

/// Cosine similarity in [-1, 1]. Higher = more similar.
///
/// Returns `0.0` when either vector has zero norm. Both vectors are scaled
/// by their largest component first, so magnitudes near the ends of the
/// `f64` range neither overflow nor underflow to zero.
pub fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    debug_assert_eq!(a.len(), b.len());
    let (sa, sb) = (max_abs(a), max_abs(b));
    if sa == 0.0 || sb == 0.0 {
        return 0.0;
    }
    let (mut ab, mut aa, mut bb) = (0.0, 0.0, 0.0);
    for (x, y) in a.iter().zip(b.iter()) {
        let (x, y) = (x / sa, y / sb);
        ab += x * y;
        aa += x * x;
        bb += y * y;
    }
    (ab / (aa.sqrt() * bb.sqrt())).clamp(-1.0, 1.0)
}

/// `1 - cosine_similarity`, in [0, 2]. Lower = more similar.
pub fn cosine_distance(a: &[f64], b: &[f64]) -> f64 {
    1.0 - cosine_similarity(a, b)
}

/// L2 distance divided by the number of dimensions.
///
/// Note the divisor is `len`, not `sqrt(len)`. The euclidean fallback
/// threshold (0.8) is calibrated against this scaling, so it must stay.
pub fn normalized_euclidean_distance(a: &[f64], b: &[f64]) -> f64 {
    debug_assert_eq!(a.len(), b.len());
    if a.is_empty() {
        return 0.0;
    }
    let scale = a
        .iter()
        .zip(b.iter())
        .fold(0.0_f64, |m, (x, y)| m.max((x - y).abs()));
    if scale == 0.0 {
        return 0.0;
    }
    let sum: f64 = a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| ((x - y) / scale).powi(2))
        .sum();
    scale * sum.sqrt() / a.len() as f64
}

fn max_abs(a: &[f64]) -> f64 {
    a.iter().fold(0.0_f64, |m, v| m.max(v.abs()))
}
