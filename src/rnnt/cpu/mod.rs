//! Host backend: the raw-slice engine, its lattice kernels and the
//! `CpuClient` implementation of [`RnntLossOps`](crate::rnnt::RnntLossOps).

pub mod engine;
pub mod kernels;
pub mod loss;

pub use engine::{HostLattice, RnntBatch, compute_rnnt_lattice, compute_rnnt_loss};
