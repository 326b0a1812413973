/*
 * aurtree - AUR packages kept as git subtrees, built only when needed.
 * Copyright (C) 2025  compiledkernel-idk and pacboost contributors
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

//! Error taxonomy for package operations.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Package-level operation kinds, used to key cached failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Download,
    Build,
    Install,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Download => write!(f, "download"),
            Operation::Build => write!(f, "build"),
            Operation::Install => write!(f, "install"),
        }
    }
}

/// Main error type for aurtree operations
#[derive(Debug, Error)]
pub enum Error {
    /// Name is unknown to the AUR
    #[error("package '{package}' not found in the AUR")]
    PackageNotFound { package: String },

    /// No declared architecture matches this machine
    #[error("package '{package}' does not support {arch} (declared: {})", .declared.join(", "))]
    UnsupportedArchitecture {
        package: String,
        arch: String,
        declared: Vec<String>,
    },

    /// Build or install attempted before the source tree exists
    #[error("package '{package}' has not been downloaded")]
    NotDownloaded { package: String },

    /// A delegated tool exited unsuccessfully
    #[error("command `{command}` failed in {} ({})", .cwd.display(), exit_status(.code))]
    ExternalCommand {
        command: String,
        cwd: PathBuf,
        code: Option<i32>,
    },

    /// The AUR reported an error or could not be reached
    #[error("AUR RPC error: {message}")]
    RemoteService { message: String },

    /// Failure of one package operation, prefixed with the package name.
    /// Cached and replayed on later calls within the same run.
    #[error("{package}: {operation}: {source}")]
    Operation {
        package: String,
        operation: Operation,
        #[source]
        source: Arc<Error>,
    },

    /// File system errors
    #[error("file system error for '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Metadata that cannot be interpreted at all
    #[error("malformed metadata for '{package}': {reason}")]
    MalformedMetadata { package: String, reason: String },

    /// Configuration errors
    #[error("configuration error: {message}")]
    Config { message: String },
}

fn exit_status(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {}", code),
        None => "terminated by signal".to_string(),
    }
}

impl Error {
    /// Whether the error is an expected operational failure.
    ///
    /// Operational failures are wrapped, cached and isolated per package.
    /// Anything else indicates a defect in data or logic and aborts the run.
    pub fn is_operational(&self) -> bool {
        matches!(
            self,
            Error::PackageNotFound { .. }
                | Error::UnsupportedArchitecture { .. }
                | Error::NotDownloaded { .. }
                | Error::ExternalCommand { .. }
                | Error::RemoteService { .. }
                | Error::Operation { .. }
        )
    }

    /// Create a filesystem error
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Create a remote service error from any displayable cause
    pub fn remote(message: impl fmt::Display) -> Self {
        Error::RemoteService {
            message: message.to_string(),
        }
    }

    /// Wrap a failure with the package and operation prefix
    pub fn operation(package: &str, operation: Operation, source: Arc<Error>) -> Self {
        Error::Operation {
            package: package.to_string(),
            operation,
            source,
        }
    }

    /// The innermost error of a chain of operation prefixes
    pub fn root_cause(&self) -> &Error {
        match self {
            Error::Operation { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

/// Result type alias for aurtree operations
pub type Result<T> = std::result::Result<T, Error>;

/// Extension trait attaching a path to I/O errors
pub trait IoContext<T> {
    fn at_path(self, path: impl AsRef<Path>) -> Result<T>;
}

impl<T> IoContext<T> for std::result::Result<T, std::io::Error> {
    fn at_path(self, path: impl AsRef<Path>) -> Result<T> {
        self.map_err(|e| Error::io(path, e))
    }
}
