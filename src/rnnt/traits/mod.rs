pub mod loss;

pub use loss::{RnntLattice, RnntLossOps, RnntLossOutput};
