//! Backend-independent input checks and layout normalisation.
//!
//! Every backend runs the same validation before it touches the workspace,
//! so shape and dtype errors are identical on CPU and CUDA.

use crate::error::{Error, Result};
use crate::rnnt::logspace::Precision;
use crate::rnnt::options::{BatchLayout, ExecTarget, RnntOptions};
use crate::rnnt::workspace::WorkspaceLayout;
use numr::dtype::DType;
use numr::runtime::Runtime;
use numr::tensor::Tensor;

/// Validated dimensions of one call.
#[derive(Debug, Clone, Copy)]
pub struct RnntShape {
    pub batch: usize,
    pub max_t: usize,
    pub max_u: usize,
    pub alphabet: usize,
    /// Padded label stride `L`
    pub label_width: usize,
    pub precision: Precision,
    pub workspace: WorkspaceLayout,
}

impl RnntShape {
    /// `[B, max_t, max_u, V]`
    pub fn acts_shape(&self) -> [usize; 4] {
        [self.batch, self.max_t, self.max_u, self.alphabet]
    }

    /// `[B, max_t, max_u]`
    pub fn lattice_shape(&self) -> [usize; 3] {
        [self.batch, self.max_t, self.max_u]
    }
}

/// Fail unless `options` target the backend that received the call.
pub fn check_target(options: &RnntOptions, backend: ExecTarget) -> Result<()> {
    if options.target() != backend {
        return Err(Error::InvalidDevice {
            reason: format!(
                "options target {:?} but the call was issued on a {:?} client",
                options.target(),
                backend
            ),
        });
    }
    Ok(())
}

fn expect_dtype<R: Runtime<DType = DType>>(
    t: &Tensor<R>,
    arg: &'static str,
    dtype: DType,
) -> Result<()> {
    if t.dtype() != dtype {
        return Err(Error::InvalidArgument {
            arg,
            reason: format!("expected {:?}, got {:?}", dtype, t.dtype()),
        });
    }
    Ok(())
}

/// Check every tensor of a loss call and derive its dimensions.
///
/// The activation dtype is checked first so an unsupported precision never
/// reaches the workspace.
pub fn validate_rnnt_inputs<R: Runtime<DType = DType>>(
    acts: &Tensor<R>,
    labels: &Tensor<R>,
    input_lengths: &Tensor<R>,
    label_lengths: &Tensor<R>,
    workspace: &Tensor<R>,
    options: &RnntOptions,
) -> Result<RnntShape> {
    let precision = Precision::from_dtype(acts.dtype(), "rnnt_loss")?;
    options.validate()?;

    let shape = acts.shape();
    if shape.len() != 4 {
        return Err(Error::InvalidArgument {
            arg: "acts",
            reason: format!("expected 4D activations, got {:?}", shape),
        });
    }
    let (batch, max_t, max_u, alphabet) = match options.layout() {
        BatchLayout::BatchFirst => (shape[0], shape[1], shape[2], shape[3]),
        BatchLayout::TimeFirst => (shape[2], shape[0], shape[1], shape[3]),
    };
    if max_t != options.max_t() || max_u != options.max_u() {
        return Err(Error::InvalidArgument {
            arg: "acts",
            reason: format!(
                "lattice dims ({}, {}) do not match options ({}, {})",
                max_t,
                max_u,
                options.max_t(),
                options.max_u()
            ),
        });
    }
    if batch == 0 {
        return Err(Error::InvalidArgument {
            arg: "acts",
            reason: "empty batch".into(),
        });
    }
    options.validate_alphabet(alphabet)?;

    expect_dtype(labels, "labels", DType::I32)?;
    let label_shape = labels.shape();
    if label_shape.len() != 2 || label_shape[0] != batch {
        return Err(Error::InvalidArgument {
            arg: "labels",
            reason: format!("expected [{}, L], got {:?}", batch, label_shape),
        });
    }

    for (arg, t) in [("input_lengths", input_lengths), ("label_lengths", label_lengths)] {
        expect_dtype(t, arg, DType::I32)?;
        if t.shape().len() != 1 || t.shape()[0] != batch {
            return Err(Error::InvalidArgument {
                arg,
                reason: format!("expected [{}], got {:?}", batch, t.shape()),
            });
        }
    }

    expect_dtype(workspace, "workspace", DType::U8)?;
    let layout = WorkspaceLayout::new(max_t, max_u, batch, precision, options.target())?;
    layout.check(workspace.numel())?;

    Ok(RnntShape {
        batch,
        max_t,
        max_u,
        alphabet,
        label_width: label_shape[1],
        precision,
        workspace: layout,
    })
}

/// Contiguous `[B, T, U, V]` view of `acts`.
pub fn to_batch_first<R: Runtime>(acts: &Tensor<R>, layout: BatchLayout) -> Result<Tensor<R>> {
    match layout {
        BatchLayout::BatchFirst => Ok(acts.contiguous()),
        // [T, U, B, V] -> [B, T, U, V]
        BatchLayout::TimeFirst => Ok(acts.permute(&[2, 0, 1, 3]).map_err(Error::Numr)?.contiguous()),
    }
}

/// Put batch-first gradients back into the caller's layout.
pub fn from_batch_first<R: Runtime>(grads: Tensor<R>, layout: BatchLayout) -> Result<Tensor<R>> {
    match layout {
        BatchLayout::BatchFirst => Ok(grads),
        // [B, T, U, V] -> [T, U, B, V]
        BatchLayout::TimeFirst => Ok(grads.permute(&[1, 2, 0, 3]).map_err(Error::Numr)?.contiguous()),
    }
}
