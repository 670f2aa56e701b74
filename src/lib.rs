//! # rnntr
//!
//! **RNN-Transducer loss and gradients on numr.**
//!
//! rnntr computes the RNN-T negative log-likelihood of label sequences under
//! a `T × U × V` grid of joint-network logits, and its exact gradient w.r.t.
//! those logits, for F32 and F64 on the CPU and (with the `cuda` feature) on
//! CUDA devices. It uses numr's runtime, tensors and clients directly.
//!
//! ## Relationship to numr
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                    rnntr ◄── YOU ARE HERE                │
//! │     (RNN-T lattice passes, workspace, loss module)       │
//! └──────────────────────────┬──────────────────────────────┘
//! │                      numr                                │
//! │     (tensors, ops, runtime, autograd, linalg, FFT)       │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Design
//!
//! - **Extension trait**: [`RnntLossOps`] implemented on numr's clients
//! - **Caller-owned workspace**: sized by [`workspace_size`], reused across calls
//! - **Host engine**: [`rnnt::cpu::compute_rnnt_loss`] over plain slices, rayon
//!   pool over batch elements
//! - **Custom kernels**: per-node log-softmax, anti-diagonal alpha/beta passes
//!   and the gradient as PTX

pub mod error;
pub mod nn;
pub mod rnnt;

// Re-export primary rnntr types
pub use nn::{Reduction, RnntLoss};
pub use rnnt::{
    BatchLayout, ExecTarget, Precision, RnntLattice, RnntLossOps, RnntLossOutput, RnntOptions,
    workspace_size,
};

// Re-export numr types that users will commonly need
pub use numr::dtype::DType;
pub use numr::error::{Error as NumrError, Result as NumrResult};
pub use numr::runtime::{Runtime, RuntimeClient};
pub use numr::tensor::Tensor;
