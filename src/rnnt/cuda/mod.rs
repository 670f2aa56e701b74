//! CUDA backend: PTX kernels and the `CudaClient` implementation of
//! [`RnntLossOps`](crate::rnnt::RnntLossOps).

pub mod kernels;
pub mod loss;
