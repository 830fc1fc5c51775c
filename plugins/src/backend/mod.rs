mod file;

pub use file::FileBackend;
