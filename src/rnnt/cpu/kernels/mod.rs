pub mod alpha;
pub mod beta;
pub mod grad;
pub mod lattice;

pub use alpha::compute_alphas;
pub use beta::compute_betas;
pub use grad::{GradInputs, compute_grads};
pub use lattice::{LatticeDims, fill_edge_log_probs};
