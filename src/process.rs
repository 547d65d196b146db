//! Named endpoints.
//!
//! Processes are addressed by a [`ProcessName`] rather than a raw socket path.
//! A [`SocketDir`] maps each name to `<dir>/<name>.sock`, the default directory
//! being a `namedipc` folder inside the system temporary directory.
use std::{
    fmt, fs, io,
    os::unix::fs::{DirBuilderExt, FileTypeExt},
    path::{Path, PathBuf},
    str::FromStr,
};

use thiserror::Error;

const SOCKET_EXTENSION: &str = "sock";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProcessNameError {
    #[error("process name can't be empty")]
    Empty,

    #[error("invalid process name '{0}', only [a-zA-Z0-9_-] characters are allowed")]
    InvalidCharacter(String),
}

/// Identifier of a process, one or more `[a-zA-Z0-9_-]` characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProcessName(String);

impl ProcessName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for ProcessName {
    type Err = ProcessNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ProcessNameError::Empty);
        }

        if !s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(ProcessNameError::InvalidCharacter(s.to_string()));
        }

        Ok(Self(s.to_string()))
    }
}

impl TryFrom<&str> for ProcessName {
    type Error = ProcessNameError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for ProcessName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Socket path of a named process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    name: ProcessName,
    path: PathBuf,
}

impl Address {
    pub fn name(&self) -> &ProcessName {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Directory holding the sockets of every named process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketDir {
    path: PathBuf,
}

impl Default for SocketDir {
    fn default() -> Self {
        Self::new(std::env::temp_dir().join("namedipc"))
    }
}

impl SocketDir {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn address(&self, name: &ProcessName) -> Address {
        Address {
            name: name.clone(),
            path: self
                .path
                .join(format!("{}.{SOCKET_EXTENSION}", name.as_str())),
        }
    }

    /// Create the directory, restricted to the current user, if missing.
    ///
    /// An existing directory is left untouched.
    pub fn ensure(&self) -> io::Result<()> {
        if self.path.is_dir() {
            return Ok(());
        }

        fs::DirBuilder::new()
            .recursive(true)
            .mode(0o700)
            .create(&self.path)
    }

    /// Whether a socket file currently exists for `name`.
    pub fn exists(&self, name: &ProcessName) -> bool {
        fs::metadata(self.address(name).path)
            .map(|meta| meta.file_type().is_socket())
            .unwrap_or(false)
    }

    /// Names of every process owning a socket in this directory.
    pub fn processes(&self) -> io::Result<Vec<ProcessName>> {
        let entries = match fs::read_dir(&self.path) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_socket() {
                continue;
            }

            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(SOCKET_EXTENSION) {
                continue;
            }

            if let Some(name) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse().ok())
            {
                names.push(name);
            }
        }

        names.sort();
        Ok(names)
    }
}
