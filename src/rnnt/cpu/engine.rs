//! Host-slice RNN-T engine.
//!
//! Raw-buffer entry point used by the `CpuClient` op and by callers that
//! already hold host memory. Batch elements are independent: each one's
//! normalise → alpha → beta → grad chain runs as a single task on a rayon
//! pool, over disjoint chunks of the workspace and output buffers, so no
//! locking is needed.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use rayon::ThreadPool;
use rayon::prelude::*;

use super::kernels::{
    GradInputs, LatticeDims, compute_alphas, compute_betas, compute_grads, fill_edge_log_probs,
};
use crate::error::{Error, Result};
use crate::rnnt::logspace::LossFloat;
use crate::rnnt::options::{ExecTarget, RnntOptions};
use crate::rnnt::workspace::WorkspaceLayout;

/// Borrowed, batch-first view of one loss call's inputs.
#[derive(Debug, Clone, Copy)]
pub struct RnntBatch<'a, T> {
    /// `[batch, max_t, max_u, alphabet]` logits
    pub acts: &'a [T],
    /// `[batch, label_width]` padded label ids
    pub labels: &'a [i32],
    pub label_width: usize,
    /// `[batch]` valid time steps per element
    pub input_lengths: &'a [i32],
    /// `[batch]` label count per element
    pub label_lengths: &'a [i32],
    pub alphabet_size: usize,
    pub batch: usize,
}

/// Lattice tables copied out of the workspace after a run.
#[derive(Debug, Clone)]
pub struct HostLattice<T> {
    /// `[batch, max_t, max_u]`
    pub alphas: Vec<T>,
    /// `[batch, max_t, max_u]`
    pub betas: Vec<T>,
    /// `[batch]` forward log-likelihood
    pub log_likelihood: Vec<T>,
    /// `[batch]` `-beta(0, 0)`
    pub costs: Vec<T>,
}

/// Compute per-element costs and, optionally, gradients.
///
/// `costs` has one slot per element; `grads`, when present, has the shape of
/// `acts`. `workspace` must hold at least
/// [`workspace_size`](crate::rnnt::workspace_size) bytes for a CPU target.
pub fn compute_rnnt_loss<T: LossFloat>(
    batch: &RnntBatch<'_, T>,
    costs: &mut [T],
    grads: Option<&mut [T]>,
    workspace: &mut [u8],
    options: &RnntOptions,
) -> Result<()> {
    check_batch(batch, options)?;
    if costs.len() != batch.batch {
        return Err(Error::InvalidArgument {
            arg: "costs",
            reason: format!("expected {} slots, got {}", batch.batch, costs.len()),
        });
    }
    if let Some(g) = grads.as_deref() {
        if g.len() != batch.acts.len() {
            return Err(Error::InvalidArgument {
                arg: "grads",
                reason: format!("expected {} elements, got {}", batch.acts.len(), g.len()),
            });
        }
    }

    let mut ll = vec![T::zero(); batch.batch];
    run_batch(batch, costs, grads, &mut ll, workspace, options)?;
    Ok(())
}

/// Run both passes and return the alpha/beta tables alongside the costs.
pub fn compute_rnnt_lattice<T: LossFloat>(
    batch: &RnntBatch<'_, T>,
    workspace: &mut [u8],
    options: &RnntOptions,
) -> Result<HostLattice<T>> {
    check_batch(batch, options)?;

    let mut costs = vec![T::zero(); batch.batch];
    let mut ll = vec![T::zero(); batch.batch];
    let layout = run_batch(batch, &mut costs, None, &mut ll, workspace, options)?;

    let regions = layout.split_host::<T>(workspace)?;
    Ok(HostLattice {
        alphas: regions.alphas.to_vec(),
        betas: regions.betas.to_vec(),
        log_likelihood: ll,
        costs,
    })
}

fn check_batch<T: LossFloat>(batch: &RnntBatch<'_, T>, options: &RnntOptions) -> Result<()> {
    options.validate_alphabet(batch.alphabet_size)?;
    if options.target() != ExecTarget::Cpu {
        return Err(Error::InvalidDevice {
            reason: format!("host engine cannot run target {:?}", options.target()),
        });
    }

    let expected_acts = [options.max_t(), options.max_u(), batch.alphabet_size]
        .into_iter()
        .try_fold(batch.batch, usize::checked_mul)
        .ok_or_else(|| Error::InvalidArgument {
            arg: "acts",
            reason: "batch * max_t * max_u * alphabet overflows usize".into(),
        })?;
    let expected_labels =
        batch
            .batch
            .checked_mul(batch.label_width)
            .ok_or_else(|| Error::InvalidArgument {
                arg: "labels",
                reason: "batch * label_width overflows usize".into(),
            })?;
    let checks: [(&'static str, usize, usize); 4] = [
        ("acts", batch.acts.len(), expected_acts),
        ("labels", batch.labels.len(), expected_labels),
        ("input_lengths", batch.input_lengths.len(), batch.batch),
        ("label_lengths", batch.label_lengths.len(), batch.batch),
    ];
    for (arg, got, expected) in checks {
        if got != expected {
            return Err(Error::InvalidArgument {
                arg,
                reason: format!("expected {expected} elements, got {got}"),
            });
        }
    }
    Ok(())
}

/// Dedicated worker pools, keyed by thread count
#[allow(clippy::type_complexity)]
static POOL_CACHE: OnceLock<Mutex<HashMap<usize, Arc<ThreadPool>>>> = OnceLock::new();

/// Pool for an explicit thread count, built once and reused.
///
/// `0` returns `None`: the work runs on rayon's global pool.
pub(crate) fn worker_pool(num_threads: usize) -> Result<Option<Arc<ThreadPool>>> {
    if num_threads == 0 {
        return Ok(None);
    }

    let cache = POOL_CACHE.get_or_init(|| Mutex::new(HashMap::new()));
    let mut guard = cache.lock().map_err(|e| Error::KernelError {
        reason: format!("worker pool cache mutex poisoned: {e}"),
    })?;
    if let Some(pool) = guard.get(&num_threads) {
        return Ok(Some(pool.clone()));
    }

    log::debug!("building rnnt worker pool with {num_threads} threads");
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(num_threads)
        .thread_name(|i| format!("rnnt-worker-{i}"))
        .build()
        .map_err(|e| Error::KernelError {
            reason: format!("failed to build rnnt worker pool: {e}"),
        })?;
    let pool = Arc::new(pool);
    guard.insert(num_threads, pool.clone());
    Ok(Some(pool))
}

/// One batch element's share of every buffer.
struct ElementTask<'a, T> {
    index: usize,
    alphas: &'a mut [T],
    betas: &'a mut [T],
    edge_log_probs: &'a mut [T],
    denominators: &'a mut [T],
    valid: &'a mut i32,
    cost: &'a mut T,
    log_likelihood: &'a mut T,
    grads: Option<&'a mut [T]>,
}

fn run_batch<T: LossFloat>(
    batch: &RnntBatch<'_, T>,
    costs: &mut [T],
    grads: Option<&mut [T]>,
    ll: &mut [T],
    workspace: &mut [u8],
    options: &RnntOptions,
) -> Result<WorkspaceLayout> {
    let layout = WorkspaceLayout::new(
        options.max_t(),
        options.max_u(),
        batch.batch,
        T::PRECISION,
        ExecTarget::Cpu,
    )?;
    let regions = layout.split_host::<T>(workspace)?;

    let threads = options.effective_threads();
    log::debug!(
        "rnnt cpu: batch={} max_t={} max_u={} vocab={} precision={:?} threads={} grads={} workspace={}B",
        batch.batch,
        options.max_t(),
        options.max_u(),
        batch.alphabet_size,
        T::PRECISION,
        threads,
        grads.is_some(),
        layout.total_bytes,
    );

    let nodes = layout.nodes_per_element();
    let grad_chunks: Vec<Option<&mut [T]>> = match grads {
        Some(g) => g
            .chunks_mut(nodes * batch.alphabet_size)
            .map(Some)
            .collect(),
        None => (0..batch.batch).map(|_| None).collect(),
    };

    let tasks: Vec<ElementTask<'_, T>> = regions
        .alphas
        .chunks_mut(nodes)
        .zip(regions.betas.chunks_mut(nodes))
        .zip(regions.edge_log_probs.chunks_mut(2 * nodes))
        .zip(regions.denominators.chunks_mut(nodes))
        .zip(regions.valid.iter_mut())
        .zip(costs.iter_mut())
        .zip(ll.iter_mut())
        .zip(grad_chunks)
        .enumerate()
        .map(
            |(index, (((((((alphas, betas), edge_log_probs), denominators), valid), cost), log_likelihood), grads))| {
                ElementTask {
                    index,
                    alphas,
                    betas,
                    edge_log_probs,
                    denominators,
                    valid,
                    cost,
                    log_likelihood,
                    grads,
                }
            },
        )
        .collect();

    let pool = worker_pool(options.num_threads())?;
    let work = || {
        tasks
            .into_par_iter()
            .for_each(|task| task.run(batch, options))
    };
    match pool {
        Some(pool) => pool.install(work),
        None => work(),
    }

    Ok(layout)
}

impl<T: LossFloat> ElementTask<'_, T> {
    fn run(self, batch: &RnntBatch<'_, T>, options: &RnntOptions) {
        let b = self.index;
        let nodes = self.alphas.len();
        let v = batch.alphabet_size;
        let acts = &batch.acts[b * nodes * v..(b + 1) * nodes * v];
        let labels = &batch.labels[b * batch.label_width..(b + 1) * batch.label_width];

        let dims = match element_dims(batch, b, labels, options) {
            Ok(dims) => dims,
            Err(reason) => {
                log::warn!("rnnt: batch element {b} rejected: {reason}");
                *self.valid = 0;
                *self.cost = T::infinity();
                *self.log_likelihood = T::neg_infinity();
                self.alphas.fill(T::neg_infinity());
                self.betas.fill(T::neg_infinity());
                if let Some(g) = self.grads {
                    g.fill(T::zero());
                }
                return;
            }
        };

        *self.valid = 1;
        fill_edge_log_probs(acts, labels, &dims, self.denominators, self.edge_log_probs);
        let ll = compute_alphas(self.edge_log_probs, &dims, self.alphas);
        let beta0 = compute_betas(self.edge_log_probs, &dims, self.betas);
        *self.log_likelihood = ll;
        *self.cost = -beta0;

        if let Some(g) = self.grads {
            let inputs = GradInputs {
                acts,
                labels,
                denominators: &*self.denominators,
                edge_log_probs: &*self.edge_log_probs,
                alphas: &*self.alphas,
                betas: &*self.betas,
                log_likelihood: ll,
            };
            compute_grads(&inputs, &dims, g);
        }
    }
}

/// Lattice bounds for element `b`, or why it cannot be scored.
fn element_dims<T>(
    batch: &RnntBatch<'_, T>,
    b: usize,
    labels: &[i32],
    options: &RnntOptions,
) -> std::result::Result<LatticeDims, String> {
    let t_len = usize::try_from(batch.input_lengths[b])
        .map_err(|_| format!("negative input length {}", batch.input_lengths[b]))?;
    if t_len == 0 || t_len > options.max_t() {
        return Err(format!(
            "input length {} outside 1..={}",
            t_len,
            options.max_t()
        ));
    }

    let l_len = usize::try_from(batch.label_lengths[b])
        .map_err(|_| format!("negative label length {}", batch.label_lengths[b]))?;
    let max_labels = (options.max_u() - 1).min(batch.label_width);
    if l_len > max_labels {
        return Err(format!("label length {l_len} exceeds {max_labels}"));
    }

    for (u, &label) in labels[..l_len].iter().enumerate() {
        let ok = usize::try_from(label)
            .map(|k| k < batch.alphabet_size && k != options.blank())
            .unwrap_or(false);
        if !ok {
            return Err(format!("label[{u}] = {label} is blank or outside the alphabet"));
        }
    }

    Ok(LatticeDims {
        max_t: options.max_t(),
        max_u: options.max_u(),
        alphabet: batch.alphabet_size,
        blank: options.blank(),
        t_len,
        u_len: l_len + 1,
    })
}
