//! Backward (beta) recursion.

use super::lattice::LatticeDims;
use crate::rnnt::logspace::{LossFloat, log_add};

/// Fill `betas` for one element and return `beta(0, 0)`, the backward
/// log-likelihood (the element's cost is its negation).
///
/// ```text
/// beta(T-1, U-1) = blank(T-1, U-1)
/// beta(t, u)     = log_add(beta(t+1, u) + blank(t, u),
///                          beta(t, u+1) + emit(t, u))
/// ```
pub fn compute_betas<T: LossFloat>(edge_log_probs: &[T], dims: &LatticeDims, betas: &mut [T]) -> T {
    let betas = &mut betas[..dims.nodes()];
    betas.fill(T::neg_infinity());

    let last = dims.terminal();
    betas[last] = edge_log_probs[2 * last];

    for t in (0..dims.t_len).rev() {
        for u in (0..dims.u_len).rev() {
            let node = dims.node(t, u);
            if node == last {
                continue;
            }
            let mut acc = T::neg_infinity();
            if t + 1 < dims.t_len {
                acc = betas[dims.node(t + 1, u)] + edge_log_probs[2 * node];
            }
            if u + 1 < dims.u_len {
                acc = log_add(acc, betas[dims.node(t, u + 1)] + edge_log_probs[2 * node + 1]);
            }
            betas[node] = acc;
        }
    }

    betas[0]
}
