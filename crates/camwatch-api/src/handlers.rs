//! Request handlers.

pub mod gpu;
pub mod health;
pub mod queue;
pub mod segments;

pub use gpu::*;
pub use health::*;
pub use queue::*;
pub use segments::*;
