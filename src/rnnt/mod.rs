//! RNN-Transducer loss.
//!
//! The loss sums over every monotonic alignment of a label sequence against a
//! `T × U` lattice of joint-network logits, in log space. For each batch
//! element the backends run the same chain over a caller-provided workspace:
//!
//! ```text
//! acts ──log-softmax──► edge log-probs ──► alphas (forward)
//!                                     └──► betas  (backward) ──► cost = -beta(0,0)
//!                     alphas + betas + edge log-probs ──► d cost / d acts
//! ```
//!
//! - [`workspace_size`] is a pure sizing query; the caller owns the buffer.
//! - [`RnntLossOps`] is implemented for `CpuClient` and, with the `cuda`
//!   feature, `CudaClient`. F32 and F64 activations are supported.
//! - [`cpu::compute_rnnt_loss`] is the host entry point over plain slices.

pub mod cpu;
#[cfg(feature = "cuda")]
pub mod cuda;
pub mod impl_generic;
pub mod logspace;
pub mod options;
pub mod traits;
pub mod workspace;

pub use logspace::{LossFloat, Precision, log_add, log_sum_exp};
pub use options::{BatchLayout, ExecTarget, RnntOptions};
pub use traits::{RnntLattice, RnntLossOps, RnntLossOutput};
pub use workspace::{HostWorkspace, WorkspaceLayout, workspace_size};
