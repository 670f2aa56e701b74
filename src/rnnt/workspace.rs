//! Workspace sizing and sub-region layout.
//!
//! The caller owns one flat byte buffer per call. Its size and internal layout
//! are a pure function of `(max_t, max_u, batch, precision, target)`, so the
//! sizing query can run before any activation exists. Regions are laid out
//! back to back, each starting on a [`REGION_ALIGN`] boundary:
//!
//! ```text
//! | alphas | betas | edge_log_probs | denominators | log_likelihood | valid |
//!   B*T*U    B*T*U    B*T*U*2          B*T*U          B (GPU only)     B i32
//! ```
//!
//! `edge_log_probs` holds the blank and emit log-probabilities of every node,
//! `denominators` the per-node log-softmax normaliser, and `valid` a per
//! element flag (1 = lengths and labels well formed).

use super::logspace::{LossFloat, Precision};
use super::options::ExecTarget;
use crate::error::{Error, Result};

/// Byte alignment of every region start.
pub const REGION_ALIGN: usize = 256;

/// Alignment a host workspace base address must satisfy.
pub const HOST_ALIGN: usize = 8;

/// One named slice of the workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    /// Byte offset from the workspace base
    pub offset: usize,
    /// Number of elements
    pub len: usize,
    /// Bytes per element
    pub elem_bytes: usize,
}

impl Region {
    pub fn bytes(&self) -> usize {
        self.len * self.elem_bytes
    }

    pub fn end(&self) -> usize {
        self.offset + self.bytes()
    }
}

/// Exact partitioning of a workspace for one call shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkspaceLayout {
    pub max_t: usize,
    pub max_u: usize,
    pub batch: usize,
    pub precision: Precision,
    pub target: ExecTarget,
    pub alphas: Region,
    pub betas: Region,
    pub edge_log_probs: Region,
    pub denominators: Region,
    pub log_likelihood: Region,
    pub valid: Region,
    pub total_bytes: usize,
}

fn overflow() -> Error {
    Error::InvalidArgument {
        arg: "shape",
        reason: "workspace size overflows usize".into(),
    }
}

fn align_up(n: usize) -> Result<usize> {
    n.checked_add(REGION_ALIGN - 1)
        .map(|v| v / REGION_ALIGN * REGION_ALIGN)
        .ok_or_else(overflow)
}

/// Sequential region allocator.
struct Cursor {
    offset: usize,
}

impl Cursor {
    fn push(&mut self, len: usize, elem_bytes: usize) -> Result<Region> {
        let start = align_up(self.offset)?;
        let bytes = len.checked_mul(elem_bytes).ok_or_else(overflow)?;
        self.offset = start.checked_add(bytes).ok_or_else(overflow)?;
        Ok(Region {
            offset: start,
            len,
            elem_bytes,
        })
    }
}

impl WorkspaceLayout {
    pub fn new(
        max_t: usize,
        max_u: usize,
        batch: usize,
        precision: Precision,
        target: ExecTarget,
    ) -> Result<Self> {
        if max_t == 0 || max_u == 0 || batch == 0 {
            return Err(Error::InvalidArgument {
                arg: "shape",
                reason: format!(
                    "workspace dims must be > 0, got max_t={max_t} max_u={max_u} batch={batch}"
                ),
            });
        }

        let nodes = max_t
            .checked_mul(max_u)
            .and_then(|n| n.checked_mul(batch))
            .ok_or_else(overflow)?;
        let edges = nodes.checked_mul(2).ok_or_else(overflow)?;
        let fb = precision.bytes();

        let mut cursor = Cursor { offset: 0 };
        let alphas = cursor.push(nodes, fb)?;
        let betas = cursor.push(nodes, fb)?;
        let edge_log_probs = cursor.push(edges, fb)?;
        let denominators = cursor.push(nodes, fb)?;
        // The device grads kernel reads the forward likelihood back from here;
        // the host keeps it on the worker's stack.
        let ll_len = if target.is_gpu() { batch } else { 0 };
        let log_likelihood = cursor.push(ll_len, fb)?;
        let valid = cursor.push(batch, std::mem::size_of::<i32>())?;
        let total_bytes = align_up(cursor.offset)?;

        Ok(Self {
            max_t,
            max_u,
            batch,
            precision,
            target,
            alphas,
            betas,
            edge_log_probs,
            denominators,
            log_likelihood,
            valid,
            total_bytes,
        })
    }

    /// Nodes per batch element (`max_t * max_u`).
    pub fn nodes_per_element(&self) -> usize {
        self.max_t * self.max_u
    }

    /// Fail if a buffer of `len` bytes cannot hold this layout.
    pub fn check(&self, len: usize) -> Result<()> {
        if len < self.total_bytes {
            return Err(Error::WorkspaceTooSmall {
                required: self.total_bytes,
                got: len,
            });
        }
        Ok(())
    }

    /// Partition a host buffer into typed, non-overlapping views.
    pub fn split_host<'a, T: LossFloat>(&self, ws: &'a mut [u8]) -> Result<HostRegions<'a, T>> {
        if T::PRECISION != self.precision {
            return Err(Error::InvalidArgument {
                arg: "workspace",
                reason: format!(
                    "layout sized for {:?}, viewed as {:?}",
                    self.precision,
                    T::PRECISION
                ),
            });
        }
        self.check(ws.len())?;
        if ws.as_ptr() as usize % HOST_ALIGN != 0 {
            return Err(Error::WorkspaceMisaligned { align: HOST_ALIGN });
        }

        let mut rest: &'a mut [u8] = ws;
        let mut consumed = 0usize;
        let alphas = carve(&mut rest, &mut consumed, self.alphas);
        let betas = carve(&mut rest, &mut consumed, self.betas);
        let edge_log_probs = carve(&mut rest, &mut consumed, self.edge_log_probs);
        let denominators = carve(&mut rest, &mut consumed, self.denominators);
        let log_likelihood = carve(&mut rest, &mut consumed, self.log_likelihood);
        let valid = carve(&mut rest, &mut consumed, self.valid);

        Ok(HostRegions {
            alphas: cast_region(alphas)?,
            betas: cast_region(betas)?,
            edge_log_probs: cast_region(edge_log_probs)?,
            denominators: cast_region(denominators)?,
            log_likelihood: cast_region(log_likelihood)?,
            valid: cast_region(valid)?,
        })
    }
}

fn carve<'a>(rest: &mut &'a mut [u8], consumed: &mut usize, region: Region) -> &'a mut [u8] {
    let buf = std::mem::take(rest);
    let (_, buf) = buf.split_at_mut(region.offset - *consumed);
    let (head, tail) = buf.split_at_mut(region.bytes());
    *consumed = region.end();
    *rest = tail;
    head
}

fn cast_region<T: bytemuck::Pod>(bytes: &mut [u8]) -> Result<&mut [T]> {
    if bytes.is_empty() {
        return Ok(&mut []);
    }
    bytemuck::try_cast_slice_mut(bytes).map_err(|_| Error::WorkspaceMisaligned {
        align: std::mem::align_of::<T>(),
    })
}

/// Minimum workspace bytes for one call with these parameters.
pub fn workspace_size(
    max_t: usize,
    max_u: usize,
    batch: usize,
    precision: Precision,
    target: ExecTarget,
) -> Result<usize> {
    Ok(WorkspaceLayout::new(max_t, max_u, batch, precision, target)?.total_bytes)
}

/// Typed views into a host workspace.
pub struct HostRegions<'a, T> {
    pub alphas: &'a mut [T],
    pub betas: &'a mut [T],
    pub edge_log_probs: &'a mut [T],
    pub denominators: &'a mut [T],
    pub log_likelihood: &'a mut [T],
    pub valid: &'a mut [i32],
}

/// Owned host arena with the alignment [`WorkspaceLayout::split_host`] needs.
#[derive(Debug, Clone)]
pub struct HostWorkspace {
    words: Vec<u64>,
    len: usize,
}

impl HostWorkspace {
    pub fn new(bytes: usize) -> Self {
        Self {
            words: vec![0u64; bytes.div_ceil(8)],
            len: bytes,
        }
    }

    pub fn for_layout(layout: &WorkspaceLayout) -> Self {
        Self::new(layout.total_bytes)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        let len = self.len;
        &mut bytemuck::cast_slice_mut::<u64, u8>(&mut self.words)[..len]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn regions(layout: &WorkspaceLayout) -> [Region; 6] {
        [
            layout.alphas,
            layout.betas,
            layout.edge_log_probs,
            layout.denominators,
            layout.log_likelihood,
            layout.valid,
        ]
    }

    #[test]
    fn test_regions_are_aligned_and_disjoint() {
        let layout =
            WorkspaceLayout::new(7, 5, 3, Precision::Single, ExecTarget::Cpu).unwrap();
        let rs = regions(&layout);
        for r in &rs {
            assert_eq!(r.offset % REGION_ALIGN, 0);
            assert!(r.end() <= layout.total_bytes);
        }
        for pair in rs.windows(2) {
            assert!(pair[0].end() <= pair[1].offset);
        }
        assert_eq!(layout.alphas.len, 7 * 5 * 3);
        assert_eq!(layout.edge_log_probs.len, 7 * 5 * 3 * 2);
        assert_eq!(layout.valid.len, 3);
        assert_eq!(layout.valid.elem_bytes, 4);
    }

    #[test]
    fn test_size_is_pure_and_target_dependent() {
        let cpu = workspace_size(10, 4, 2, Precision::Single, ExecTarget::Cpu).unwrap();
        assert_eq!(
            cpu,
            workspace_size(10, 4, 2, Precision::Single, ExecTarget::Cpu).unwrap()
        );
        let gpu = workspace_size(10, 4, 2, Precision::Single, ExecTarget::Gpu).unwrap();
        let f64_cpu = workspace_size(10, 4, 2, Precision::Double, ExecTarget::Cpu).unwrap();
        assert!(gpu > cpu);
        assert!(f64_cpu > cpu);
        // alphas + betas alone
        assert!(cpu >= 2 * 10 * 4 * 2 * 4);
    }

    #[test]
    fn test_zero_dims_rejected() {
        assert!(workspace_size(0, 4, 2, Precision::Single, ExecTarget::Cpu).is_err());
        assert!(workspace_size(4, 0, 2, Precision::Single, ExecTarget::Cpu).is_err());
        assert!(workspace_size(4, 4, 0, Precision::Single, ExecTarget::Cpu).is_err());
        assert!(workspace_size(usize::MAX, 4, 2, Precision::Double, ExecTarget::Cpu).is_err());
    }

    #[test]
    fn test_split_host_too_small() {
        let layout =
            WorkspaceLayout::new(4, 3, 2, Precision::Double, ExecTarget::Cpu).unwrap();
        let mut ws = HostWorkspace::new(layout.total_bytes - 1);
        let err = layout.split_host::<f64>(ws.as_bytes_mut()).err().unwrap();
        assert!(matches!(err, Error::WorkspaceTooSmall { .. }));
    }

    #[test]
    fn test_split_host_precision_mismatch() {
        let layout =
            WorkspaceLayout::new(4, 3, 2, Precision::Double, ExecTarget::Cpu).unwrap();
        let mut ws = HostWorkspace::for_layout(&layout);
        assert!(layout.split_host::<f32>(ws.as_bytes_mut()).is_err());
    }

    #[test]
    fn test_split_host_views() {
        let layout = WorkspaceLayout::new(4, 3, 2, Precision::Single, ExecTarget::Gpu).unwrap();
        let mut ws = HostWorkspace::for_layout(&layout);
        let regions = layout.split_host::<f32>(ws.as_bytes_mut()).unwrap();
        assert_eq!(regions.alphas.len(), 24);
        assert_eq!(regions.betas.len(), 24);
        assert_eq!(regions.edge_log_probs.len(), 48);
        assert_eq!(regions.denominators.len(), 24);
        assert_eq!(regions.log_likelihood.len(), 2);
        assert_eq!(regions.valid.len(), 2);

        regions.alphas.fill(1.0);
        regions.betas.fill(2.0);
        regions.valid.fill(7);
        assert!(regions.alphas.iter().all(|&a| a == 1.0));
    }

    #[test]
    fn test_split_host_misaligned() {
        let layout = WorkspaceLayout::new(2, 2, 1, Precision::Single, ExecTarget::Cpu).unwrap();
        let mut ws = HostWorkspace::new(layout.total_bytes + 1);
        let bytes = ws.as_bytes_mut();
        let err = layout.split_host::<f32>(&mut bytes[1..]).err().unwrap();
        assert!(matches!(err, Error::WorkspaceMisaligned { .. }));
    }
}
