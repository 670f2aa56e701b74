//! CUDA implementation of RnntLossOps
//!
//! Four launches on the client's stream: per-node log-softmax, forward pass,
//! backward pass and (optionally) the gradient. Nothing is synchronised; the
//! returned tensors are valid once the stream reaches them.

use crate::error::{Error, Result};
use crate::rnnt::cuda::kernels::{self, RNNT_MODULE};
use crate::rnnt::impl_generic::{
    RnntShape, check_target, from_batch_first, to_batch_first, validate_rnnt_inputs,
};
use crate::rnnt::logspace::Precision;
use crate::rnnt::options::{ExecTarget, RnntOptions};
use crate::rnnt::traits::{RnntLattice, RnntLossOps, RnntLossOutput};
use cudarc::driver::PushKernelArg;
use cudarc::driver::safe::LaunchConfig;
use numr::runtime::Device;
use numr::runtime::cuda::{CudaClient, CudaRuntime};
use numr::tensor::Tensor;

/// Threads per block for the per-node kernels (power of two for the reductions).
const NODE_THREADS: u32 = 128;

fn kernel_suffix(precision: Precision) -> &'static str {
    match precision {
        Precision::Single => "f32",
        Precision::Double => "f64",
    }
}

fn dim_i32(arg: &'static str, v: usize) -> Result<i32> {
    i32::try_from(v).map_err(|_| Error::InvalidArgument {
        arg,
        reason: format!("{} exceeds i32 kernel indexing", v),
    })
}

fn grid_u32(arg: &'static str, v: usize) -> Result<u32> {
    u32::try_from(v).map_err(|_| Error::InvalidArgument {
        arg,
        reason: format!("grid of {} blocks exceeds the launch limit", v),
    })
}

/// Device addresses for one call.
struct DevicePtrs {
    acts: u64,
    labels: u64,
    input_lengths: u64,
    label_lengths: u64,
    denominators: u64,
    edges: u64,
    valid: u64,
    alphas: u64,
    betas: u64,
    log_likelihood: u64,
    costs: u64,
}

impl DevicePtrs {
    /// Scratch regions come from the workspace; `alphas`, `betas` and
    /// `log_likelihood` default to the workspace too and may be redirected.
    fn new(
        shape: &RnntShape,
        acts: &Tensor<CudaRuntime>,
        labels: &Tensor<CudaRuntime>,
        input_lengths: &Tensor<CudaRuntime>,
        label_lengths: &Tensor<CudaRuntime>,
        workspace: &Tensor<CudaRuntime>,
        costs: &Tensor<CudaRuntime>,
    ) -> Result<Self> {
        let base = workspace.ptr();
        let align = shape.precision.bytes() as u64;
        if base % align != 0 {
            return Err(Error::WorkspaceMisaligned {
                align: shape.precision.bytes(),
            });
        }
        let layout = &shape.workspace;
        Ok(Self {
            acts: acts.ptr(),
            labels: labels.ptr(),
            input_lengths: input_lengths.ptr(),
            label_lengths: label_lengths.ptr(),
            denominators: base + layout.denominators.offset as u64,
            edges: base + layout.edge_log_probs.offset as u64,
            valid: base + layout.valid.offset as u64,
            alphas: base + layout.alphas.offset as u64,
            betas: base + layout.betas.offset as u64,
            log_likelihood: base + layout.log_likelihood.offset as u64,
            costs: costs.ptr(),
        })
    }
}

/// Enqueue the normalisation and both lattice passes, plus the gradient when
/// `grads` is given.
fn launch_rnnt(
    client: &CudaClient,
    device_index: usize,
    shape: &RnntShape,
    options: &RnntOptions,
    p: &DevicePtrs,
    grads: Option<u64>,
) -> Result<()> {
    let suffix = kernel_suffix(shape.precision);
    let module = kernels::get_or_load_module(client.context(), device_index, RNNT_MODULE)?;

    let batch = dim_i32("batch", shape.batch)?;
    let max_t = dim_i32("max_t", shape.max_t)?;
    let max_u = dim_i32("max_u", shape.max_u)?;
    let vocab = dim_i32("alphabet", shape.alphabet)?;
    let label_width = dim_i32("labels", shape.label_width)?;
    let blank = dim_i32("blank", options.blank())?;

    let nodes = grid_u32("acts", shape.batch * shape.max_t * shape.max_u)?;
    let node_cfg = LaunchConfig {
        grid_dim: (nodes, 1, 1),
        block_dim: (NODE_THREADS, 1, 1),
        shared_mem_bytes: NODE_THREADS * shape.precision.bytes() as u32,
    };
    let lane_threads = (shape.max_u.div_ceil(32) * 32).min(1024) as u32;
    let element_cfg = LaunchConfig {
        grid_dim: (grid_u32("batch", shape.batch)?, 1, 1),
        block_dim: (lane_threads, 1, 1),
        shared_mem_bytes: 0,
    };

    log::debug!(
        "rnnt cuda: device={} batch={} max_t={} max_u={} vocab={} kernels=*_{} grads={}",
        device_index,
        shape.batch,
        shape.max_t,
        shape.max_u,
        shape.alphabet,
        suffix,
        grads.is_some(),
    );

    let func = kernels::get_kernel_function(&module, &format!("rnnt_log_softmax_{}", suffix))?;
    unsafe {
        let mut builder = client.stream().launch_builder(&func);
        builder.arg(&p.acts);
        builder.arg(&p.labels);
        builder.arg(&p.input_lengths);
        builder.arg(&p.label_lengths);
        builder.arg(&p.denominators);
        builder.arg(&p.edges);
        builder.arg(&p.valid);
        builder.arg(&batch);
        builder.arg(&max_t);
        builder.arg(&max_u);
        builder.arg(&vocab);
        builder.arg(&label_width);
        builder.arg(&blank);
        builder.launch(node_cfg).map_err(|e| Error::KernelError {
            reason: format!("rnnt_log_softmax launch failed: {:?}", e),
        })?;
    }

    let func = kernels::get_kernel_function(&module, &format!("rnnt_alphas_{}", suffix))?;
    unsafe {
        let mut builder = client.stream().launch_builder(&func);
        builder.arg(&p.edges);
        builder.arg(&p.input_lengths);
        builder.arg(&p.label_lengths);
        builder.arg(&p.valid);
        builder.arg(&p.alphas);
        builder.arg(&p.log_likelihood);
        builder.arg(&max_t);
        builder.arg(&max_u);
        builder.launch(element_cfg).map_err(|e| Error::KernelError {
            reason: format!("rnnt_alphas launch failed: {:?}", e),
        })?;
    }

    let func = kernels::get_kernel_function(&module, &format!("rnnt_betas_{}", suffix))?;
    unsafe {
        let mut builder = client.stream().launch_builder(&func);
        builder.arg(&p.edges);
        builder.arg(&p.input_lengths);
        builder.arg(&p.label_lengths);
        builder.arg(&p.valid);
        builder.arg(&p.betas);
        builder.arg(&p.costs);
        builder.arg(&max_t);
        builder.arg(&max_u);
        builder.launch(element_cfg).map_err(|e| Error::KernelError {
            reason: format!("rnnt_betas launch failed: {:?}", e),
        })?;
    }

    let Some(grads) = grads else {
        return Ok(());
    };

    let node_cfg = LaunchConfig {
        shared_mem_bytes: 0,
        ..node_cfg
    };
    let func = kernels::get_kernel_function(&module, &format!("rnnt_grads_{}", suffix))?;
    unsafe {
        let mut builder = client.stream().launch_builder(&func);
        builder.arg(&p.acts);
        builder.arg(&p.labels);
        builder.arg(&p.input_lengths);
        builder.arg(&p.label_lengths);
        builder.arg(&p.valid);
        builder.arg(&p.denominators);
        builder.arg(&p.edges);
        builder.arg(&p.alphas);
        builder.arg(&p.betas);
        builder.arg(&p.log_likelihood);
        builder.arg(&grads);
        builder.arg(&max_t);
        builder.arg(&max_u);
        builder.arg(&vocab);
        builder.arg(&label_width);
        builder.arg(&blank);
        builder.launch(node_cfg).map_err(|e| Error::KernelError {
            reason: format!("rnnt_grads launch failed: {:?}", e),
        })?;
    }

    Ok(())
}

impl RnntLossOps<CudaRuntime> for CudaClient {
    fn rnnt_loss(
        &self,
        acts: &Tensor<CudaRuntime>,
        labels: &Tensor<CudaRuntime>,
        input_lengths: &Tensor<CudaRuntime>,
        label_lengths: &Tensor<CudaRuntime>,
        workspace: &Tensor<CudaRuntime>,
        options: &RnntOptions,
        compute_grads: bool,
    ) -> Result<RnntLossOutput<CudaRuntime>> {
        let shape =
            validate_rnnt_inputs(acts, labels, input_lengths, label_lengths, workspace, options)?;
        check_target(options, ExecTarget::Gpu)?;

        let device = acts.device();
        let dtype = shape.precision.dtype();
        let acts_bf = to_batch_first(acts, options.layout())?;
        let labels = labels.contiguous();
        let input_lengths = input_lengths.contiguous();
        let label_lengths = label_lengths.contiguous();

        let costs = Tensor::<CudaRuntime>::empty(&[shape.batch], dtype, device);
        let grads = compute_grads
            .then(|| Tensor::<CudaRuntime>::empty(&shape.acts_shape(), dtype, device));

        let ptrs = DevicePtrs::new(
            &shape,
            &acts_bf,
            &labels,
            &input_lengths,
            &label_lengths,
            workspace,
            &costs,
        )?;
        launch_rnnt(
            self,
            device.id(),
            &shape,
            options,
            &ptrs,
            grads.as_ref().map(|g| g.ptr()),
        )?;

        let grads = grads
            .map(|g| from_batch_first(g, options.layout()))
            .transpose()?;
        Ok(RnntLossOutput { costs, grads })
    }

    fn rnnt_lattice(
        &self,
        acts: &Tensor<CudaRuntime>,
        labels: &Tensor<CudaRuntime>,
        input_lengths: &Tensor<CudaRuntime>,
        label_lengths: &Tensor<CudaRuntime>,
        workspace: &Tensor<CudaRuntime>,
        options: &RnntOptions,
    ) -> Result<RnntLattice<CudaRuntime>> {
        let shape =
            validate_rnnt_inputs(acts, labels, input_lengths, label_lengths, workspace, options)?;
        check_target(options, ExecTarget::Gpu)?;

        let device = acts.device();
        let dtype = shape.precision.dtype();
        let acts_bf = to_batch_first(acts, options.layout())?;
        let labels = labels.contiguous();
        let input_lengths = input_lengths.contiguous();
        let label_lengths = label_lengths.contiguous();

        let alphas = Tensor::<CudaRuntime>::empty(&shape.lattice_shape(), dtype, device);
        let betas = Tensor::<CudaRuntime>::empty(&shape.lattice_shape(), dtype, device);
        let log_likelihood = Tensor::<CudaRuntime>::empty(&[shape.batch], dtype, device);
        let costs = Tensor::<CudaRuntime>::empty(&[shape.batch], dtype, device);

        let mut ptrs = DevicePtrs::new(
            &shape,
            &acts_bf,
            &labels,
            &input_lengths,
            &label_lengths,
            workspace,
            &costs,
        )?;
        ptrs.alphas = alphas.ptr();
        ptrs.betas = betas.ptr();
        ptrs.log_likelihood = log_likelihood.ptr();
        launch_rnnt(self, device.id(), &shape, options, &ptrs, None)?;

        Ok(RnntLattice {
            alphas,
            betas,
            log_likelihood,
            costs,
        })
    }
}
