use std::fmt;

/// The error kind taxonomy shared by every fallible operation in the device
/// runtime. Each variant carries enough context to reconstruct a
/// human-readable message without the caller needing to downcast.
#[derive(Debug)]
pub enum DeviceError {
    /// A device, module, record, or file was absent.
    NotFound(String),
    /// The operation is illegal in the device's current state.
    BadState { expected: String, found: String },
    /// A persistence precondition was violated.
    BadDatabase(String),
    /// A bounded wait exceeded its deadline.
    Timeout,
    /// The underlying vendor SDK call failed; `message` is its text verbatim.
    DeviceFailure(String),
    /// The device does not support a requested capability (e.g. streaming).
    CannotStream(String),
    /// A calibration failed to converge to a non-degenerate solution.
    Degenerate(String),
    /// The operation was cancelled on request.
    Cancelled,
    /// A lower-level I/O error.
    Io(std::io::Error),
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceError::NotFound(what) => write!(f, "not found: {}", what),
            DeviceError::BadState { expected, found } => {
                write!(f, "bad state: expected {}, found {}", expected, found)
            }
            DeviceError::BadDatabase(msg) => write!(f, "bad database: {}", msg),
            DeviceError::Timeout => write!(f, "timeout"),
            DeviceError::DeviceFailure(msg) => write!(f, "device failure: {}", msg),
            DeviceError::CannotStream(what) => write!(f, "cannot stream: {}", what),
            DeviceError::Degenerate(cause) => write!(f, "degenerate: {}", cause),
            DeviceError::Cancelled => write!(f, "cancelled"),
            DeviceError::Io(e) => write!(f, "io error: {}", e),
        }
    }
}

impl std::error::Error for DeviceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DeviceError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for DeviceError {
    fn from(value: std::io::Error) -> Self {
        DeviceError::Io(value)
    }
}

impl From<obs_async::TimeoutError> for DeviceError {
    fn from(_: obs_async::TimeoutError) -> Self {
        DeviceError::Timeout
    }
}

impl From<obs_async::task::Error> for DeviceError {
    fn from(value: obs_async::task::Error) -> Self {
        match value {
            obs_async::task::Error::Aborted => DeviceError::Cancelled,
            obs_async::task::Error::Completed => {
                DeviceError::DeviceFailure("task already completed".into())
            }
            obs_async::task::Error::Pending => DeviceError::BadState {
                expected: "spawned".into(),
                found: "pending".into(),
            },
        }
    }
}

/// Errors specific to resolving a [`crate::name::DeviceName`] through the
/// [`crate::locator::ModuleRepository`].
#[derive(Debug)]
pub enum LocatorError {
    ModuleNotFound(String),
    Device(DeviceError),
}

impl fmt::Display for LocatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LocatorError::ModuleNotFound(name) => write!(f, "module not found: {}", name),
            LocatorError::Device(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for LocatorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LocatorError::Device(e) => Some(e),
            _ => None,
        }
    }
}

impl From<DeviceError> for LocatorError {
    fn from(value: DeviceError) -> Self {
        LocatorError::Device(value)
    }
}
