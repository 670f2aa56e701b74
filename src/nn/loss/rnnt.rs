//! RNN-Transducer loss with batch reduction.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::rnnt::logspace::Precision;
use crate::rnnt::traits::RnntLossOps;
use crate::rnnt::{RnntOptions, workspace_size};
use numr::dtype::DType;
use numr::ops::ScalarOps;
use numr::runtime::{Runtime, RuntimeClient};
use numr::tensor::Tensor;

/// How per-element costs are folded into the returned loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reduction {
    /// No reduction; `loss` is `None` and `costs` is the result
    None,
    /// Sum over the batch
    #[default]
    Sum,
    /// Sum divided by the batch size; gradients scaled to match
    Mean,
}

/// Output of [`RnntLoss::forward`].
pub struct RnntLossResult<R: Runtime> {
    /// Reduced loss on the host, `None` under [`Reduction::None`]
    pub loss: Option<f64>,
    /// `[B]` per-element costs, unreduced
    pub costs: Tensor<R>,
    /// Gradient of `loss` w.r.t. the activations, in the caller's layout
    pub grads: Option<Tensor<R>>,
}

/// RNN-T loss module: allocates a right-sized workspace per call, runs
/// [`RnntLossOps::rnnt_loss`] and reduces the costs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RnntLoss {
    options: RnntOptions,
    #[serde(default)]
    reduction: Reduction,
}

impl RnntLoss {
    pub fn new(options: RnntOptions) -> Self {
        Self {
            options,
            reduction: Reduction::Sum,
        }
    }

    pub fn with_reduction(mut self, reduction: Reduction) -> Self {
        self.reduction = reduction;
        self
    }

    pub fn options(&self) -> &RnntOptions {
        &self.options
    }

    pub fn reduction(&self) -> Reduction {
        self.reduction
    }

    /// Loss and gradient.
    pub fn forward<R, C>(
        &self,
        client: &C,
        acts: &Tensor<R>,
        labels: &Tensor<R>,
        input_lengths: &Tensor<R>,
        label_lengths: &Tensor<R>,
    ) -> Result<RnntLossResult<R>>
    where
        R: Runtime<DType = DType>,
        C: RuntimeClient<R> + RnntLossOps<R> + ScalarOps<R>,
    {
        self.run(client, acts, labels, input_lengths, label_lengths, true)
    }

    /// Loss only; no gradient buffer is produced.
    pub fn cost_only<R, C>(
        &self,
        client: &C,
        acts: &Tensor<R>,
        labels: &Tensor<R>,
        input_lengths: &Tensor<R>,
        label_lengths: &Tensor<R>,
    ) -> Result<RnntLossResult<R>>
    where
        R: Runtime<DType = DType>,
        C: RuntimeClient<R> + RnntLossOps<R> + ScalarOps<R>,
    {
        self.run(client, acts, labels, input_lengths, label_lengths, false)
    }

    fn run<R, C>(
        &self,
        client: &C,
        acts: &Tensor<R>,
        labels: &Tensor<R>,
        input_lengths: &Tensor<R>,
        label_lengths: &Tensor<R>,
        compute_grads: bool,
    ) -> Result<RnntLossResult<R>>
    where
        R: Runtime<DType = DType>,
        C: RuntimeClient<R> + RnntLossOps<R> + ScalarOps<R>,
    {
        let precision = Precision::from_dtype(acts.dtype(), "rnnt_loss")?;
        let batch = input_lengths.shape().first().copied().unwrap_or(0);
        let bytes = workspace_size(
            self.options.max_t(),
            self.options.max_u(),
            batch,
            precision,
            self.options.target(),
        )?;
        let workspace = Tensor::<R>::zeros(&[bytes], DType::U8, acts.device());

        let out = client.rnnt_loss(
            acts,
            labels,
            input_lengths,
            label_lengths,
            &workspace,
            &self.options,
            compute_grads,
        )?;

        let total = || -> f64 {
            match precision {
                Precision::Single => out.costs.to_vec::<f32>().iter().map(|&c| c as f64).sum(),
                Precision::Double => out.costs.to_vec::<f64>().iter().sum(),
            }
        };

        let (loss, grads) = match self.reduction {
            Reduction::None => (None, out.grads),
            Reduction::Sum => (Some(total()), out.grads),
            Reduction::Mean => {
                let scale = 1.0 / batch as f64;
                let loss = total() * scale;
                let grads = out
                    .grads
                    .map(|g| client.mul_scalar(&g, scale).map_err(Error::Numr))
                    .transpose()?;
                (Some(loss), grads)
            }
        };

        Ok(RnntLossResult {
            loss,
            costs: out.costs,
            grads,
        })
    }
}
