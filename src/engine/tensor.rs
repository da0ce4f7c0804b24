//! Ledger-tracked tensors
//!
//! Every numeric buffer in the pipeline is a [`Tensor`] created through a
//! [`TensorLedger`]. A tensor holds a lease on its ledger and gives it back
//! when dropped, so an early return or `?` can never leave a buffer behind.
//! The ledger counters make that observable: after any call that creates
//! tensors, `live()` must be back to where it started.

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use ndarray::{ArrayD, ArrayViewD, Axis, Ix3, IxDyn};
use serde::Serialize;
use thiserror::Error;
use tracing::trace;

/// Tensor construction and transformation errors
#[derive(Error, Debug)]
pub enum TensorError {
    #[error("tensor budget exhausted ({limit} live tensors)")]
    Exhausted { limit: usize },

    #[error("shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    #[error("empty dimension in shape {0:?}")]
    EmptyDimension(Vec<usize>),

    #[error("expected rank {expected}, got shape {shape:?}")]
    Rank { expected: usize, shape: Vec<usize> },
}

/// Element type of a tensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    U8,
    F32,
}

/// Scalar types a [`Tensor`] can hold
pub trait Element: Copy + Default + fmt::Debug + Send + Sync + 'static {
    const DTYPE: DType;
}

impl Element for u8 {
    const DTYPE: DType = DType::U8;
}

impl Element for f32 {
    const DTYPE: DType = DType::F32;
}

#[derive(Default)]
struct LedgerInner {
    live: AtomicUsize,
    peak: AtomicUsize,
    allocated: AtomicU64,
    released: AtomicU64,
    limit: Option<usize>,
}

/// Point-in-time view of the ledger counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct LedgerSnapshot {
    pub live: usize,
    pub peak: usize,
    pub allocated: u64,
    pub released: u64,
}

/// Shared allocation tracker for tensors
///
/// Cloning is cheap; all clones observe the same counters. An optional
/// limit caps the number of simultaneously live tensors, and allocation
/// beyond it fails with [`TensorError::Exhausted`].
#[derive(Clone, Default)]
pub struct TensorLedger {
    inner: Arc<LedgerInner>,
}

impl TensorLedger {
    /// Create an unbounded ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a ledger allowing at most `limit` live tensors
    pub fn with_limit(limit: Option<usize>) -> Self {
        Self {
            inner: Arc::new(LedgerInner {
                limit,
                ..Default::default()
            }),
        }
    }

    pub fn limit(&self) -> Option<usize> {
        self.inner.limit
    }

    /// Number of tensors currently alive
    pub fn live(&self) -> usize {
        self.inner.live.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            live: self.inner.live.load(Ordering::SeqCst),
            peak: self.inner.peak.load(Ordering::SeqCst),
            allocated: self.inner.allocated.load(Ordering::SeqCst),
            released: self.inner.released.load(Ordering::SeqCst),
        }
    }

    /// Take ownership of an existing buffer as a tracked tensor
    pub fn adopt<A: Element>(&self, data: ArrayD<A>) -> Result<Tensor<A>, TensorError> {
        let lease = self.reserve()?;
        Ok(Tensor { data, lease })
    }

    /// Allocate a zero-filled tensor
    pub fn zeros<A: Element>(&self, shape: &[usize]) -> Result<Tensor<A>, TensorError> {
        let lease = self.reserve()?;
        Ok(Tensor {
            data: ArrayD::from_elem(IxDyn(shape), A::default()),
            lease,
        })
    }

    fn reserve(&self) -> Result<Lease, TensorError> {
        let inner = &self.inner;
        let limit = inner.limit;
        let previous = inner
            .live
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |live| match limit {
                Some(max) if live >= max => None,
                _ => Some(live + 1),
            })
            .map_err(|_| TensorError::Exhausted {
                limit: limit.unwrap_or_default(),
            })?;

        inner.peak.fetch_max(previous + 1, Ordering::SeqCst);
        inner.allocated.fetch_add(1, Ordering::SeqCst);
        trace!(live = previous + 1, "tensor allocated");

        Ok(Lease {
            ledger: inner.clone(),
        })
    }
}

impl fmt::Debug for TensorLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TensorLedger")
            .field("limit", &self.inner.limit)
            .field("counters", &self.snapshot())
            .finish()
    }
}

/// One live slot in a ledger, returned on drop
struct Lease {
    ledger: Arc<LedgerInner>,
}

impl Drop for Lease {
    fn drop(&mut self) {
        let live = self.ledger.live.fetch_sub(1, Ordering::SeqCst) - 1;
        self.ledger.released.fetch_add(1, Ordering::SeqCst);
        trace!(live, "tensor released");
    }
}

/// Owned numeric buffer tracked by a [`TensorLedger`]
///
/// Operations never mutate in place; each returns a new tensor allocated
/// from the same ledger.
pub struct Tensor<A: Element> {
    data: ArrayD<A>,
    lease: Lease,
}

impl<A: Element> Tensor<A> {
    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    pub fn dtype(&self) -> DType {
        A::DTYPE
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn view(&self) -> ArrayViewD<'_, A> {
        self.data.view()
    }

    /// Copy the elements out in logical (row-major) order
    pub fn to_vec(&self) -> Vec<A> {
        self.data.iter().copied().collect()
    }

    /// Ledger this tensor was allocated from
    pub fn ledger(&self) -> TensorLedger {
        TensorLedger {
            inner: self.lease.ledger.clone(),
        }
    }

    /// Reserve a slot before computing, so an exhausted ledger fails
    /// without building the buffer first.
    fn derive<B, F>(&self, f: F) -> Result<Tensor<B>, TensorError>
    where
        B: Element,
        F: FnOnce(&ArrayD<A>) -> Result<ArrayD<B>, TensorError>,
    {
        let lease = self.ledger().reserve()?;
        let data = f(&self.data)?;
        Ok(Tensor { data, lease })
    }

    /// Insert a length-1 axis at `axis`
    pub fn expand_dims(&self, axis: usize) -> Result<Tensor<A>, TensorError> {
        if axis > self.data.ndim() {
            return Err(TensorError::Rank {
                expected: axis,
                shape: self.shape().to_vec(),
            });
        }
        self.derive(|data| Ok(data.clone().insert_axis(Axis(axis))))
    }

    /// Nearest-neighbour resize of an `[H, W, C]` tensor
    ///
    /// Uses the TensorFlow convention without corner alignment or
    /// half-pixel centres: `src = min(floor(dst * in / out), in - 1)`.
    pub fn resize_nearest(&self, height: usize, width: usize) -> Result<Tensor<A>, TensorError> {
        if self.data.ndim() != 3 {
            return Err(TensorError::Rank {
                expected: 3,
                shape: self.shape().to_vec(),
            });
        }
        let (in_h, in_w, channels) = (self.shape()[0], self.shape()[1], self.shape()[2]);
        if in_h == 0 || in_w == 0 || channels == 0 || height == 0 || width == 0 {
            return Err(TensorError::EmptyDimension(vec![height, width, channels]));
        }

        let rows = nearest_indices(in_h, height);
        let cols = nearest_indices(in_w, width);

        self.derive(|data| {
            let src = data.view().into_dimensionality::<Ix3>()?;
            let out = ndarray::Array3::from_shape_fn((height, width, channels), |(y, x, c)| {
                src[[rows[y], cols[x], c]]
            });
            Ok(out.into_dyn())
        })
    }
}

impl<A: Element + Into<f32>> Tensor<A> {
    /// Convert every element to `f32`
    pub fn cast_f32(&self) -> Result<Tensor<f32>, TensorError> {
        self.derive(|data| Ok(data.mapv(|v| v.into())))
    }
}

impl Tensor<f32> {
    pub fn div_scalar(&self, divisor: f32) -> Result<Tensor<f32>, TensorError> {
        self.derive(|data| Ok(data.mapv(|v| v / divisor)))
    }
}

impl<A: Element> fmt::Debug for Tensor<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tensor")
            .field("shape", &self.shape())
            .field("dtype", &A::DTYPE)
            .finish()
    }
}

/// Source index for each output position along one axis
fn nearest_indices(input: usize, output: usize) -> Vec<usize> {
    let scale = input as f64 / output as f64;
    (0..output)
        .map(|i| ((i as f64 * scale).floor() as usize).min(input - 1))
        .collect()
}
