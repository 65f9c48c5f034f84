//! Definitions shared by all packstore crates: the error type, `Result`, the
//! argument and stored-data checks, and a thin async runtime shim.

pub mod async_runtime;
pub mod error;
pub mod result;

pub use error::{Error, ErrorKind};
pub use result::Result;
