//! Lattice geometry and per-call options.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Position of the batch axis in the activation tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchLayout {
    /// `[batch, time, label_pos, vocab]`
    #[default]
    BatchFirst,
    /// `[time, label_pos, batch, vocab]`; permuted to batch-first before the passes
    TimeFirst,
}

/// Where the lattice passes run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecTarget {
    /// Host memory, rayon worker pool over batch elements
    #[default]
    Cpu,
    /// Device memory, kernels enqueued on the CUDA client's stream
    Gpu,
}

impl ExecTarget {
    pub fn is_gpu(self) -> bool {
        matches!(self, ExecTarget::Gpu)
    }
}

/// Immutable configuration for one RNN-T loss call.
///
/// `max_t` and `max_u` describe the padded activation tensor: `max_u` counts
/// lattice rows, i.e. the longest label sequence plus one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RnntOptions {
    max_t: usize,
    max_u: usize,
    #[serde(default)]
    blank: usize,
    #[serde(default)]
    layout: BatchLayout,
    #[serde(default)]
    target: ExecTarget,
    #[serde(default)]
    num_threads: usize,
}

impl RnntOptions {
    /// Options for a `max_t × max_u` lattice with blank id 0, batch-first
    /// layout, CPU target and one worker per available core.
    pub fn new(max_t: usize, max_u: usize) -> Self {
        Self {
            max_t,
            max_u,
            blank: 0,
            layout: BatchLayout::BatchFirst,
            target: ExecTarget::Cpu,
            num_threads: 0,
        }
    }

    /// Set the blank symbol id.
    pub fn with_blank(mut self, blank: usize) -> Self {
        self.blank = blank;
        self
    }

    /// Set the activation layout.
    pub fn with_layout(mut self, layout: BatchLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Set the execution target.
    pub fn with_target(mut self, target: ExecTarget) -> Self {
        self.target = target;
        self
    }

    /// Set the CPU worker count; 0 uses every available core.
    pub fn with_num_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = num_threads;
        self
    }

    pub fn max_t(&self) -> usize {
        self.max_t
    }

    pub fn max_u(&self) -> usize {
        self.max_u
    }

    pub fn blank(&self) -> usize {
        self.blank
    }

    pub fn layout(&self) -> BatchLayout {
        self.layout
    }

    pub fn target(&self) -> ExecTarget {
        self.target
    }

    pub fn num_threads(&self) -> usize {
        self.num_threads
    }

    /// Worker count actually used by the CPU backend, never below 1.
    pub fn effective_threads(&self) -> usize {
        if self.num_threads > 0 {
            return self.num_threads;
        }
        rayon::current_num_threads().max(1)
    }

    /// Validate config constraints. Returns error if invalid.
    pub fn validate(&self) -> Result<()> {
        if self.max_t == 0 {
            return Err(Error::InvalidArgument {
                arg: "max_t",
                reason: "lattice needs at least one time step".into(),
            });
        }
        if self.max_u == 0 {
            return Err(Error::InvalidArgument {
                arg: "max_u",
                reason: "lattice needs at least one label position".into(),
            });
        }
        Ok(())
    }

    /// Validate against a concrete alphabet size.
    pub fn validate_alphabet(&self, alphabet_size: usize) -> Result<()> {
        self.validate()?;
        if self.blank >= alphabet_size {
            return Err(Error::InvalidArgument {
                arg: "blank",
                reason: format!(
                    "blank id {} outside alphabet of size {}",
                    self.blank, alphabet_size
                ),
            });
        }
        Ok(())
    }
}
