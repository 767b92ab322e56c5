pub mod filter;
pub mod statistics;
pub mod types;
pub mod value;
pub mod wire;

pub use filter::*;
pub use statistics::*;
pub use types::*;
pub use value::*;
pub use wire::{FilterType, FilterWire, WireValue};
