pub mod helpers;

pub mod rnnt;
