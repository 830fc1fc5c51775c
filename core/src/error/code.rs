/// Stable numeric codes for governor failures, used for exit codes and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ErrorCode {
    Success = 0,
    GeneralError = 1,
    ConfigError = 3,
    RetriesExhausted = 20,
    QuotaExceeded = 22,
    Timeout = 30,
    LockTimeout = 32,
    BackendError = 60,
}

impl ErrorCode {
    pub fn as_u16(self) -> u16 {
        self as u16
    }
}
