pub mod derivative;
pub mod locks;

pub use derivative::{Derivative, DerivativeCache};
pub use locks::{KeyGuard, KeyLocks};
