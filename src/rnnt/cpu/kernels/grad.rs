//! Gradient of the cost w.r.t. the logits.

use super::lattice::LatticeDims;
use crate::rnnt::logspace::LossFloat;

/// Inputs shared by every node of one element.
pub struct GradInputs<'a, T> {
    /// `[max_t * max_u, alphabet]` logits of this element
    pub acts: &'a [T],
    pub labels: &'a [i32],
    pub denominators: &'a [T],
    pub edge_log_probs: &'a [T],
    pub alphas: &'a [T],
    pub betas: &'a [T],
    /// Forward log-likelihood of the element
    pub log_likelihood: T,
}

/// Write `d cost / d logit` for one element into `grads`.
///
/// Per reachable node the softmax is weighted by the node's posterior
/// occupancy, then the posterior of each outgoing edge is subtracted from the
/// symbol that edge consumes:
///
/// ```text
/// grad(t,u,k) = exp(lp(t,u,k) + alpha(t,u) + beta(t,u) - ll)
///             - [k = blank]    exp(alpha(t,u) + blank(t,u) + beta(t+1,u) - ll)
///             - [k = label[u]] exp(alpha(t,u) + emit(t,u)  + beta(t,u+1) - ll)
/// ```
///
/// The terminal node's blank edge leaves the lattice, so its successor term
/// is `beta = 0`. Padding cells and elements with a non-finite likelihood get
/// zero gradient.
pub fn compute_grads<T: LossFloat>(inputs: &GradInputs<'_, T>, dims: &LatticeDims, grads: &mut [T]) {
    let v = dims.alphabet;
    let grads = &mut grads[..dims.nodes() * v];
    grads.fill(T::zero());

    let ll = inputs.log_likelihood;
    if !ll.is_finite() {
        return;
    }

    for t in 0..dims.t_len {
        for u in 0..dims.u_len {
            let node = dims.node(t, u);
            let alpha = inputs.alphas[node];
            let logits = &inputs.acts[node * v..(node + 1) * v];
            let g = &mut grads[node * v..(node + 1) * v];

            let occupancy = alpha + inputs.betas[node] - ll + inputs.denominators[node];
            for (gk, &logit) in g.iter_mut().zip(logits) {
                *gk = (logit + occupancy).exp();
            }

            let blank_lp = inputs.edge_log_probs[2 * node];
            if t + 1 < dims.t_len {
                let succ = inputs.betas[dims.node(t + 1, u)];
                g[dims.blank] = g[dims.blank] - (alpha + blank_lp + succ - ll).exp();
            } else if u + 1 == dims.u_len {
                g[dims.blank] = g[dims.blank] - (alpha + blank_lp - ll).exp();
            }

            if u + 1 < dims.u_len {
                let k = inputs.labels[u] as usize;
                let emit_lp = inputs.edge_log_probs[2 * node + 1];
                let succ = inputs.betas[dims.node(t, u + 1)];
                g[k] = g[k] - (alpha + emit_lp + succ - ll).exp();
            }
        }
    }
}
