//! Per-element lattice geometry and per-node edge log-probabilities.

use crate::rnnt::logspace::{LossFloat, log_sum_exp};

/// Geometry of one batch element's lattice.
///
/// `max_t`/`max_u` are the padded strides shared by the whole batch;
/// `t_len`/`u_len` bound the cells this element actually visits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatticeDims {
    pub max_t: usize,
    pub max_u: usize,
    pub alphabet: usize,
    pub blank: usize,
    /// Valid time steps (input length)
    pub t_len: usize,
    /// Valid label positions (label length + 1)
    pub u_len: usize,
}

impl LatticeDims {
    /// Flat node index of `(t, u)` within the element.
    #[inline]
    pub fn node(&self, t: usize, u: usize) -> usize {
        t * self.max_u + u
    }

    /// Node count of the padded grid.
    #[inline]
    pub fn nodes(&self) -> usize {
        self.max_t * self.max_u
    }

    /// Terminal node `(t_len - 1, u_len - 1)`.
    #[inline]
    pub fn terminal(&self) -> usize {
        self.node(self.t_len - 1, self.u_len - 1)
    }
}

/// Normalise every reachable node over the vocabulary.
///
/// Writes `denominators[node] = -logsumexp(acts[node, :])` and, per node,
/// `edge_log_probs[2*node] = log p(blank)` and
/// `edge_log_probs[2*node + 1] = log p(label[u])` (`-inf` on the last row,
/// which has no emit edge).
pub fn fill_edge_log_probs<T: LossFloat>(
    acts: &[T],
    labels: &[i32],
    dims: &LatticeDims,
    denominators: &mut [T],
    edge_log_probs: &mut [T],
) {
    let v = dims.alphabet;
    for t in 0..dims.t_len {
        for u in 0..dims.u_len {
            let node = dims.node(t, u);
            let logits = &acts[node * v..(node + 1) * v];
            let denom = -log_sum_exp(logits);
            denominators[node] = denom;
            edge_log_probs[2 * node] = logits[dims.blank] + denom;
            edge_log_probs[2 * node + 1] = if u + 1 < dims.u_len {
                logits[labels[u] as usize] + denom
            } else {
                T::neg_infinity()
            };
        }
    }
}
