//! Loss functions for neural network training.
//!
//! | Type | Use case |
//! |---|---|
//! | [`RnntLoss`] | Streaming speech recognition (RNN-Transducer) |

pub mod rnnt;

pub use rnnt::{Reduction, RnntLoss, RnntLossResult};
