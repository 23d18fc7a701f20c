//! Wait-free linearizable objects built on one primitive: the atomic swap
//! of the contents of two cells.
//!
//! - [`SwapUniversal`] turns any sequential object (a cloneable state plus
//!   deterministic operations) into a wait-free shared one.
//! - [`SwapQueue`] applies the same chain-and-help pattern by hand to get
//!   a wait-free FIFO queue.
//! - [`ExchangeCell`] is the swap primitive both are built on.
//!
//! Memory of resolved invocation records is reclaimed by reference
//! counting as soon as the last cell pointing at them is rewritten.

mod sync;
mod slot;
mod chain;

pub mod cell;
pub use self::cell::ExchangeCell;
pub mod universal;
pub use self::universal::{Operation, SwapUniversal, Universal};
pub mod queue;
pub use self::queue::SwapQueue;
