pub mod constants;
pub mod error;
pub mod status;

pub use error::{Error, Result};
pub use status::{NfcStatus, normalize_error};

/// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
