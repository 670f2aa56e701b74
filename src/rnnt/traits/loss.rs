//! RNN-Transducer loss operations trait

use crate::error::Result;
use crate::rnnt::options::RnntOptions;
use numr::runtime::Runtime;
use numr::tensor::Tensor;

/// Result of one loss call.
pub struct RnntLossOutput<R: Runtime> {
    /// `[B]` negative log-likelihood per element, `+inf` for rejected elements
    pub costs: Tensor<R>,
    /// Same shape and layout as `acts`; `None` for a cost-only call
    pub grads: Option<Tensor<R>>,
}

/// Forward/backward tables of one call, batch-first.
pub struct RnntLattice<R: Runtime> {
    /// `[B, max_t, max_u]` forward log-probabilities
    pub alphas: Tensor<R>,
    /// `[B, max_t, max_u]` backward log-probabilities
    pub betas: Tensor<R>,
    /// `[B]` forward log-likelihood `alpha(T-1, U-1) + blank(T-1, U-1)`
    pub log_likelihood: Tensor<R>,
    /// `[B]` `-beta(0, 0)`
    pub costs: Tensor<R>,
}

/// RNN-Transducer loss
///
/// Sums over every monotonic alignment of a label sequence against a
/// `max_t × max_u` lattice of joint-network logits. Each node `(t, u)` has a
/// blank edge to `(t+1, u)` and an emit edge (consuming `labels[u]`) to
/// `(t, u+1)`; the path ends with a blank out of `(T-1, U-1)`.
///
/// ```text
/// cost     = -log sum_{paths} prod_{edges} softmax(acts[t, u])[symbol]
/// grad     = d cost / d acts   (w.r.t. the unnormalised logits)
/// ```
///
/// # Layout contract
///
/// - `acts`: `[B, max_t, max_u, V]` (`BatchLayout::BatchFirst`) or
///   `[max_t, max_u, B, V]` (`BatchLayout::TimeFirst`), F32 or F64
/// - `labels`: `[B, L]` I32, padded; element `b` uses `labels[b, ..label_lengths[b]]`
/// - `input_lengths`: `[B]` I32, `1..=max_t`
/// - `label_lengths`: `[B]` I32, `0..=min(L, max_u - 1)`
/// - `workspace`: U8 with at least
///   [`workspace_size`](crate::rnnt::workspace_size) bytes for the options'
///   target, owned by the caller and overwritten by the call
/// - Output `grads`: same shape and layout as `acts`
///
/// Malformed lengths or labels affect only their own element: its cost is
/// `+inf` and its gradient zero. Everything else returns an error.
///
/// Device backends enqueue on the client's stream and do not synchronise.
pub trait RnntLossOps<R: Runtime> {
    fn rnnt_loss(
        &self,
        acts: &Tensor<R>,
        labels: &Tensor<R>,
        input_lengths: &Tensor<R>,
        label_lengths: &Tensor<R>,
        workspace: &Tensor<R>,
        options: &RnntOptions,
        compute_grads: bool,
    ) -> Result<RnntLossOutput<R>>;

    /// Run both lattice passes and return the raw tables.
    ///
    /// Same contract as [`rnnt_loss`](Self::rnnt_loss), without gradients.
    fn rnnt_lattice(
        &self,
        acts: &Tensor<R>,
        labels: &Tensor<R>,
        input_lengths: &Tensor<R>,
        label_lengths: &Tensor<R>,
        workspace: &Tensor<R>,
        options: &RnntOptions,
    ) -> Result<RnntLattice<R>>;
}
