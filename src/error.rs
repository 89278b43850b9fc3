use core::fmt;
use std::error::Error;
use std::path::PathBuf;

/// Errors surfaced while resolving glob patterns into concrete files (C1) or
/// while building `Artifact` records from them (C2).
#[derive(Debug)]
pub enum CollectError {
    /// A pattern could not be parsed as a glob at all. Fatal for the whole
    /// collection.
    BadPattern {
        pattern: String,
        source: glob::PatternError,
    },
    /// Opening, statting or reading a matched file failed. Fatal for the
    /// whole collection.
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl Error for CollectError {}

impl fmt::Display for CollectError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::BadPattern { pattern, source } => {
                write!(f, "pattern [{}] is not a valid glob: {}", pattern, source)
            }
            Self::Io { path, source } => {
                write!(f, "failed to read {}: {}", path.display(), source)
            }
        }
    }
}

/// Invalid destination strings, missing environment variables, unparsable
/// ACLs, and similar caller mistakes. Never retried.
#[derive(Debug)]
pub enum ConfigurationError {
    UnknownScheme { destination: String },
    MissingEnvVar { name: &'static str },
    InvalidAcl { value: String },
    InvalidDuration { name: &'static str, value: String },
}

impl Error for ConfigurationError {}

impl fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::UnknownScheme { destination } => {
                write!(f, "[{}] does not match any known store adapter", destination)
            }
            Self::MissingEnvVar { name } => {
                write!(f, "required environment variable {} is not set", name)
            }
            Self::InvalidAcl { value } => write!(f, "[{}] is not a recognized canned ACL", value),
            Self::InvalidDuration { name, value } => {
                write!(f, "[{}] is not a valid duration for {}", value, name)
            }
        }
    }
}

/// Transport-level or 5xx/429 failures. Retried per the retry strategy
/// attached at the call site (C6).
#[derive(Debug)]
pub enum TransientTransportError {
    Request(reqwest::Error),
    Status { status: u16, body: String },
}

impl Error for TransientTransportError {}

impl fmt::Display for TransientTransportError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Request(err) => write!(f, "transport error: {}", err),
            Self::Status { status, body } => write!(f, "server returned {}: {}", status, body),
        }
    }
}

impl From<reqwest::Error> for TransientTransportError {
    fn from(value: reqwest::Error) -> Self {
        Self::Request(value)
    }
}

/// A specific 4xx response other than 429. Breaks the retry loop (C6).
#[derive(Debug)]
pub struct NonRetryableRemoteError {
    pub status: u16,
    pub body: String,
}

impl Error for NonRetryableRemoteError {}

impl fmt::Display for NonRetryableRemoteError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "server rejected request with {}: {}",
            self.status, self.body
        )
    }
}

/// Errors that can occur while moving bytes for a single work unit, or while
/// talking to the control plane.
#[derive(Debug)]
pub enum TransferError {
    Config(ConfigurationError),
    Transient(TransientTransportError),
    NonRetryable(NonRetryableRemoteError),
    Io(std::io::Error),
}

impl Error for TransferError {}

impl fmt::Display for TransferError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Config(err) => write!(f, "{}", err),
            Self::Transient(err) => write!(f, "{}", err),
            Self::NonRetryable(err) => write!(f, "{}", err),
            Self::Io(err) => write!(f, "local I/O error: {}", err),
        }
    }
}

impl From<ConfigurationError> for TransferError {
    fn from(value: ConfigurationError) -> Self {
        Self::Config(value)
    }
}

impl From<TransientTransportError> for TransferError {
    fn from(value: TransientTransportError) -> Self {
        Self::Transient(value)
    }
}

impl From<NonRetryableRemoteError> for TransferError {
    fn from(value: NonRetryableRemoteError) -> Self {
        Self::NonRetryable(value)
    }
}

impl From<std::io::Error> for TransferError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<reqwest::Error> for TransferError {
    fn from(value: reqwest::Error) -> Self {
        Self::Transient(TransientTransportError::Request(value))
    }
}

/// One artifact that ended the session in the `error` state.
#[derive(Debug)]
pub struct ArtifactFailure {
    pub relative_path: String,
    pub message: String,
}

impl fmt::Display for ArtifactFailure {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: {}", self.relative_path, self.message)
    }
}

/// Top-level error returned by a session (`upload`/`download`). The session
/// returns `Ok(Stats)` only when every artifact reached `finished`.
#[derive(Debug)]
pub enum SessionError {
    /// Fatal before or during collection: bad glob, unreadable file.
    Collect(CollectError),
    Configuration(ConfigurationError),
    /// Registration with the control plane exhausted its retries.
    Registration(TransientTransportError),
    /// Searching the control plane for artifacts to download exhausted its
    /// retries.
    Search(TransientTransportError),
    /// One or more artifacts ended in `error` state after registration.
    PartialUpload(Vec<ArtifactFailure>),
}

impl Error for SessionError {}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Collect(err) => write!(f, "collecting artifacts failed: {}", err),
            Self::Configuration(err) => write!(f, "{}", err),
            Self::Registration(err) => write!(f, "registering artifacts failed: {}", err),
            Self::Search(err) => write!(f, "searching for artifacts failed: {}", err),
            Self::PartialUpload(failures) => {
                write!(f, "{} artifact(s) failed:", failures.len())?;
                for failure in failures {
                    write!(f, "\n  {}", failure)?;
                }
                Ok(())
            }
        }
    }
}

impl From<CollectError> for SessionError {
    fn from(value: CollectError) -> Self {
        Self::Collect(value)
    }
}

impl From<ConfigurationError> for SessionError {
    fn from(value: ConfigurationError) -> Self {
        Self::Configuration(value)
    }
}
