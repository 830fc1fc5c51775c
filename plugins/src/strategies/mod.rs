mod retry;

pub use retry::{JitteredBackoffPlugin, LinearRetryPlugin};
