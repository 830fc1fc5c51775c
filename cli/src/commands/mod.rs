pub mod cli;
pub mod monitor;
pub mod process;
pub mod simulate;
pub mod status;
pub mod store;

use serde::Serialize;
use tollgate_core::api::CliError;

/// Print `value` as pretty JSON, or `text` otherwise.
pub(crate) fn emit<T: Serialize>(json: bool, value: &T, text: impl FnOnce() -> String) -> Result<(), CliError> {
    if json {
        let out = serde_json::to_string_pretty(value)
            .map_err(|e| CliError::Command(format!("encode output: {e}")))?;
        println!("{out}");
    } else {
        println!("{}", text());
    }
    Ok(())
}
