//! Error types for the diskforge core library.

use std::path::PathBuf;

/// The main error type for diskforge build operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error with optional path context.
    #[error("I/O error{}: {source}", path.as_ref().map(|p| format!(" at '{}'", p.display())).unwrap_or_default())]
    Io {
        source: std::io::Error,
        path: Option<PathBuf>,
    },

    /// A field, count, or byte stream failed validation.
    #[error("invalid input: {message}")]
    InvalidInput { message: String },

    /// The config document could not be deserialized.
    #[error("config parse error: {message}")]
    ConfigParse { message: String },

    /// Content does not fit within the declared disk size.
    #[error("disk too small: needs {needed_additional_mib} more MiB")]
    DiskTooSmall { needed_additional_mib: u64 },

    /// A single file exceeds ext2 triple-indirect addressing.
    #[error("file too large for ext2: {path}")]
    FileTooLarge { path: PathBuf },

    /// Kernel, trampoline, or bootloader image missing at expected path.
    #[error("kernel image missing: {path}")]
    KernelMissing { path: PathBuf },

    /// VHD output requested for a disk size not a multiple of 2 MiB.
    #[error("unsupported disk size for VHD: {disk_size_mib} MiB is not a multiple of 2")]
    UnsupportedDiskSize { disk_size_mib: u64 },

    /// Destination path exists and is a directory.
    #[error("destination is a directory: {path}")]
    DestinationIsDirectory { path: PathBuf },
}

/// A specialized Result type for diskforge operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create an I/O error with path context.
    pub fn io(source: std::io::Error, path: impl Into<PathBuf>) -> Self {
        Self::Io {
            source,
            path: Some(path.into()),
        }
    }

    /// Create an I/O error without path context.
    pub fn io_simple(source: std::io::Error) -> Self {
        Self::Io { source, path: None }
    }

    /// Create an invalid-input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create a config-parse error.
    pub fn config_parse(message: impl Into<String>) -> Self {
        Self::ConfigParse {
            message: message.into(),
        }
    }

    /// Create a disk-too-small error.
    pub fn disk_too_small(needed_additional_mib: u64) -> Self {
        Self::DiskTooSmall {
            needed_additional_mib,
        }
    }

    /// Create a file-too-large error.
    pub fn file_too_large(path: impl Into<PathBuf>) -> Self {
        Self::FileTooLarge { path: path.into() }
    }

    /// Create a kernel-missing error.
    pub fn kernel_missing(path: impl Into<PathBuf>) -> Self {
        Self::KernelMissing { path: path.into() }
    }

    /// Create an unsupported-disk-size error.
    pub fn unsupported_disk_size(disk_size_mib: u64) -> Self {
        Self::UnsupportedDiskSize { disk_size_mib }
    }

    /// Create a destination-is-directory error.
    pub fn destination_is_directory(path: impl Into<PathBuf>) -> Self {
        Self::DestinationIsDirectory { path: path.into() }
    }
}

impl From<std::io::Error> for Error {
    fn from(source: std::io::Error) -> Self {
        Self::io_simple(source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_with_path() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = Error::io(io_err, "/path/to/file.bin");
        let msg = err.to_string();
        assert!(msg.contains("I/O error"));
        assert!(msg.contains("/path/to/file.bin"));
    }

    #[test]
    fn test_io_error_without_path() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = Error::io_simple(io_err);
        let msg = err.to_string();
        assert!(msg.contains("I/O error"));
        assert!(!msg.contains("at '"));
    }

    #[test]
    fn test_invalid_input_error() {
        let err = Error::invalid_input("arg count exceeds 16");
        assert!(err.to_string().contains("invalid input"));
    }

    #[test]
    fn test_config_parse_error() {
        let err = Error::config_parse("unexpected token");
        assert!(err.to_string().contains("config parse error"));
    }

    #[test]
    fn test_disk_too_small_error() {
        let err = Error::disk_too_small(3);
        assert!(err.to_string().contains("3 more MiB"));
    }

    #[test]
    fn test_file_too_large_error() {
        let err = Error::file_too_large("/files/huge.bin");
        assert!(err.to_string().contains("huge.bin"));
    }

    #[test]
    fn test_kernel_missing_error() {
        let err = Error::kernel_missing("/kernels/vkernel-PROD-1.img");
        assert!(err.to_string().contains("vkernel-PROD-1.img"));
    }

    #[test]
    fn test_unsupported_disk_size_error() {
        let err = Error::unsupported_disk_size(3);
        assert!(err.to_string().contains("not a multiple of 2"));
    }

    #[test]
    fn test_destination_is_directory_error() {
        let err = Error::destination_is_directory("/out");
        assert!(err.to_string().contains("/out"));
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io { path: None, .. }));
    }
}
