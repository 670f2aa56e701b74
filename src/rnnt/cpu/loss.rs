//! CPU implementation of RnntLossOps
//!
//! Copies the inputs to host vectors, runs the host engine against the
//! caller's workspace tensor in place, and wraps the results in tensors.

use crate::error::Result;
use crate::rnnt::cpu::engine::{RnntBatch, compute_rnnt_lattice, compute_rnnt_loss};
use crate::rnnt::impl_generic::{
    RnntShape, check_target, from_batch_first, to_batch_first, validate_rnnt_inputs,
};
use crate::rnnt::logspace::{LossFloat, Precision};
use crate::rnnt::options::{ExecTarget, RnntOptions};
use crate::rnnt::traits::{RnntLattice, RnntLossOps, RnntLossOutput};
use numr::runtime::cpu::{CpuClient, CpuRuntime};
use numr::tensor::Tensor;

/// Host copies of the index tensors.
struct IndexData {
    labels: Vec<i32>,
    input_lengths: Vec<i32>,
    label_lengths: Vec<i32>,
}

impl IndexData {
    fn read(
        labels: &Tensor<CpuRuntime>,
        input_lengths: &Tensor<CpuRuntime>,
        label_lengths: &Tensor<CpuRuntime>,
    ) -> Self {
        Self {
            labels: labels.contiguous().to_vec::<i32>(),
            input_lengths: input_lengths.contiguous().to_vec::<i32>(),
            label_lengths: label_lengths.contiguous().to_vec::<i32>(),
        }
    }

    fn batch<'a, T>(&'a self, acts: &'a [T], shape: &RnntShape) -> RnntBatch<'a, T> {
        RnntBatch {
            acts,
            labels: &self.labels,
            label_width: shape.label_width,
            input_lengths: &self.input_lengths,
            label_lengths: &self.label_lengths,
            alphabet_size: shape.alphabet,
            batch: shape.batch,
        }
    }
}

/// Mutable byte view of a validated workspace tensor.
///
/// # Safety
///
/// `workspace` must be a contiguous U8 CPU tensor of at least `len` bytes with
/// no other live view for the duration of the borrow.
unsafe fn workspace_bytes(workspace: &Tensor<CpuRuntime>, len: usize) -> &mut [u8] {
    unsafe { std::slice::from_raw_parts_mut(workspace.ptr() as *mut u8, len) }
}

fn host_loss<T: LossFloat>(
    acts: &[T],
    index: &IndexData,
    shape: &RnntShape,
    workspace: &mut [u8],
    options: &RnntOptions,
    compute_grads: bool,
) -> Result<(Vec<T>, Option<Vec<T>>)> {
    let mut costs = vec![T::zero(); shape.batch];
    let mut grads = compute_grads.then(|| vec![T::zero(); acts.len()]);
    compute_rnnt_loss(
        &index.batch(acts, shape),
        &mut costs,
        grads.as_deref_mut(),
        workspace,
        options,
    )?;
    Ok((costs, grads))
}

impl RnntLossOps<CpuRuntime> for CpuClient {
    fn rnnt_loss(
        &self,
        acts: &Tensor<CpuRuntime>,
        labels: &Tensor<CpuRuntime>,
        input_lengths: &Tensor<CpuRuntime>,
        label_lengths: &Tensor<CpuRuntime>,
        workspace: &Tensor<CpuRuntime>,
        options: &RnntOptions,
        compute_grads: bool,
    ) -> Result<RnntLossOutput<CpuRuntime>> {
        let shape =
            validate_rnnt_inputs(acts, labels, input_lengths, label_lengths, workspace, options)?;
        check_target(options, ExecTarget::Cpu)?;

        let device = acts.device();
        let acts_bf = to_batch_first(acts, options.layout())?;
        let index = IndexData::read(labels, input_lengths, label_lengths);
        let ws = unsafe { workspace_bytes(workspace, shape.workspace.total_bytes) };

        let (costs, grads) = match shape.precision {
            Precision::Single => {
                let data = acts_bf.to_vec::<f32>();
                let (c, g) = host_loss(&data, &index, &shape, ws, options, compute_grads)?;
                (
                    Tensor::<CpuRuntime>::from_slice(&c, &[shape.batch], device),
                    g.map(|g| Tensor::<CpuRuntime>::from_slice(&g, &shape.acts_shape(), device)),
                )
            }
            Precision::Double => {
                let data = acts_bf.to_vec::<f64>();
                let (c, g) = host_loss(&data, &index, &shape, ws, options, compute_grads)?;
                (
                    Tensor::<CpuRuntime>::from_slice(&c, &[shape.batch], device),
                    g.map(|g| Tensor::<CpuRuntime>::from_slice(&g, &shape.acts_shape(), device)),
                )
            }
        };

        let grads = grads
            .map(|g| from_batch_first(g, options.layout()))
            .transpose()?;
        Ok(RnntLossOutput { costs, grads })
    }

    fn rnnt_lattice(
        &self,
        acts: &Tensor<CpuRuntime>,
        labels: &Tensor<CpuRuntime>,
        input_lengths: &Tensor<CpuRuntime>,
        label_lengths: &Tensor<CpuRuntime>,
        workspace: &Tensor<CpuRuntime>,
        options: &RnntOptions,
    ) -> Result<RnntLattice<CpuRuntime>> {
        let shape =
            validate_rnnt_inputs(acts, labels, input_lengths, label_lengths, workspace, options)?;
        check_target(options, ExecTarget::Cpu)?;

        let device = acts.device();
        let acts_bf = to_batch_first(acts, options.layout())?;
        let index = IndexData::read(labels, input_lengths, label_lengths);
        let ws = unsafe { workspace_bytes(workspace, shape.workspace.total_bytes) };
        let lattice_shape = shape.lattice_shape();

        macro_rules! wrap {
            ($lattice:expr) => {{
                let l = $lattice;
                RnntLattice {
                    alphas: Tensor::<CpuRuntime>::from_slice(&l.alphas, &lattice_shape, device),
                    betas: Tensor::<CpuRuntime>::from_slice(&l.betas, &lattice_shape, device),
                    log_likelihood: Tensor::<CpuRuntime>::from_slice(
                        &l.log_likelihood,
                        &[shape.batch],
                        device,
                    ),
                    costs: Tensor::<CpuRuntime>::from_slice(&l.costs, &[shape.batch], device),
                }
            }};
        }

        match shape.precision {
            Precision::Single => {
                let data = acts_bf.to_vec::<f32>();
                Ok(wrap!(compute_rnnt_lattice(&index.batch(&data, &shape), ws, options)?))
            }
            Precision::Double => {
                let data = acts_bf.to_vec::<f64>();
                Ok(wrap!(compute_rnnt_lattice(&index.batch(&data, &shape), ws, options)?))
            }
        }
    }
}
