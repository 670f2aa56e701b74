//! Forward (alpha) recursion.

use super::lattice::LatticeDims;
use crate::rnnt::logspace::{LossFloat, log_add};

/// Fill `alphas` for one element and return the forward log-likelihood.
///
/// ```text
/// alpha(0, 0) = 0
/// alpha(t, u) = log_add(alpha(t-1, u) + blank(t-1, u),
///                       alpha(t, u-1) + emit(t, u-1))
/// ll          = alpha(T-1, U-1) + blank(T-1, U-1)
/// ```
///
/// Row-major order visits every predecessor first. Cells outside
/// `t_len × u_len` are left at `-inf`.
pub fn compute_alphas<T: LossFloat>(edge_log_probs: &[T], dims: &LatticeDims, alphas: &mut [T]) -> T {
    let alphas = &mut alphas[..dims.nodes()];
    alphas.fill(T::neg_infinity());
    alphas[0] = T::zero();

    for t in 0..dims.t_len {
        for u in 0..dims.u_len {
            if t == 0 && u == 0 {
                continue;
            }
            let mut acc = T::neg_infinity();
            if t > 0 {
                let prev = dims.node(t - 1, u);
                acc = alphas[prev] + edge_log_probs[2 * prev];
            }
            if u > 0 {
                let prev = dims.node(t, u - 1);
                acc = log_add(acc, alphas[prev] + edge_log_probs[2 * prev + 1]);
            }
            alphas[dims.node(t, u)] = acc;
        }
    }

    let last = dims.terminal();
    alphas[last] + edge_log_probs[2 * last]
}
