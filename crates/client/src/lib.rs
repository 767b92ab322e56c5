//! Session facade over the scanbridge storage layer, plus the foreign surfaces built on it.
//!
//! Key modules:
//! - `bridge`: [`Bridge`], registration and scan entry points
//! - [`export`]: structural chunk export through the Arrow C data interface
//! - [`ffi`]: stable C ABI (feature `ffi`)
//! - `python`: pyo3 bindings (feature `python`)

mod bridge;
mod request;
mod session;

pub mod export;
#[cfg(feature = "ffi")]
pub mod ffi;
#[cfg(feature = "python")]
mod python;

pub use bridge::Bridge;
pub use export::{ChunkMatrix, RawArrowArray};
pub use request::request_from_json;
