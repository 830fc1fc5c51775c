#[allow(clippy::module_inception)]
pub mod error;
pub mod code;
pub mod store;

pub use code::ErrorCode;
pub use error::{CliError, GovernorError};
pub use store::StoreError;
