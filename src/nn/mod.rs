pub mod loss;

pub use loss::{Reduction, RnntLoss, RnntLossResult};
