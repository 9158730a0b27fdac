use std::{
    error::Error,
    fmt::{self, Display},
    path::PathBuf,
};
use thiserror::Error;

use crate::config::NetInterworkingModel;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The result of a monovm-related operation.
pub type MonovmResult<T> = Result<T, MonovmError>;

/// An error that occurred while managing sandbox networking or a hypervisor.
#[derive(pretty_error_debug::Debug, Error)]
pub enum MonovmError {
    /// An I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A system call failed.
    #[error("system call error: {0}")]
    Nix(#[from] nix::errno::Errno),

    /// A JSON document could not be encoded or decoded.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// An error bubbled up from the shared utilities.
    #[error(transparent)]
    Monoutils(#[from] monoutils::MonoutilsError),

    /// An error that can represent any error.
    #[error(transparent)]
    Custom(#[from] AnyError),

    /// A netlink request was rejected or failed.
    #[error("netlink {operation} failed: {source}")]
    Netlink {
        /// The request that failed, with the device it targeted.
        operation: String,

        /// The error returned by the netlink layer.
        #[source]
        source: rtnetlink::Error,
    },

    /// A device node could not be opened.
    #[error("failed to open {device}: {source}")]
    DeviceOpen {
        /// The device node.
        device: PathBuf,

        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A MAC address string could not be parsed.
    #[error("invalid MAC address: {0}")]
    InvalidMacAddress(String),

    /// An interface name does not fit the kernel's name limit.
    #[error("invalid interface name: {0}")]
    InvalidInterfaceName(String),

    /// A link with the given name or index does not exist.
    #[error("link not found: {0}")]
    LinkNotFound(String),

    /// A link exists but is not of the requested kind.
    #[error("link {name} has type {actual}, expected {expected}")]
    UnexpectedLinkType {
        /// The link name.
        name: String,

        /// The type that was requested.
        expected: String,

        /// The type the kernel reported.
        actual: String,
    },

    /// An invalid hypervisor configuration was used.
    #[error("invalid hypervisor configuration: {0}")]
    InvalidHypervisorConfig(InvalidHypervisorConfigError),

    /// An endpoint was requested with a negative index.
    #[error("invalid endpoint index: {0}")]
    InvalidEndpointIndex(i32),

    /// A persisted endpoint carried a type that is not known.
    #[error("unknown endpoint type: {0}")]
    UnknownEndpointType(String),

    /// A scanned interface cannot be mapped onto any endpoint kind.
    #[error("unsupported network interface: {0}")]
    UnsupportedInterface(String),

    /// A network model name could not be parsed.
    #[error("unknown network interworking model: {0}")]
    UnknownNetworkModel(String),

    /// The model is a declared one but is not implemented.
    #[error("unsupported networking model: {0}")]
    UnsupportedNetworkModel(NetInterworkingModel),

    /// The model does not describe any way of wiring a VM.
    #[error("invalid internetworking model: {0}")]
    InvalidNetworkModel(NetInterworkingModel),

    /// The operation is not supported by this endpoint or hypervisor.
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// Host networking was requested, which the runtime refuses.
    #[error("host networking requested, not supported by runtime")]
    HostNetworkingUnsupported,

    /// A callback was to run in a namespace but none was given.
    #[error("network namespace path cannot be empty")]
    EmptyNetnsPath,

    /// The network monitor was to be started without a binary.
    #[error("netmon path is empty")]
    EmptyNetmonPath,

    /// A hypervisor type name could not be parsed.
    #[error("unknown hypervisor type: {0}")]
    UnknownHypervisorType(String),

    /// The VM cannot perform the requested operation from its current state.
    #[error("cannot {operation} a VM that is {state}")]
    InvalidStateTransition {
        /// The requested operation.
        operation: String,

        /// The state the VM was in.
        state: String,
    },

    /// A resource request would take the VM past what it can hold.
    #[error("{resource} request of {requested} exceeds the VM limit of {limit}")]
    ResourceLimitExceeded {
        /// The resource, `vcpus` or `memory`.
        resource: String,

        /// The amount requested.
        requested: u64,

        /// The most the VM can hold.
        limit: u64,
    },

    /// The VM did not come up in time.
    #[error("VM did not start within {0} seconds")]
    StartTimeout(u32),

    /// An asset path is not usable.
    #[error("invalid asset {kind} path: {path}")]
    InvalidAsset {
        /// The asset kind.
        kind: String,

        /// The offending path.
        path: String,
    },

    /// An asset's content does not match its expected digest.
    #[error("{kind} asset {path} hash mismatch: expected {expected}, got {actual}")]
    AssetHashMismatch {
        /// The asset kind.
        kind: String,

        /// The asset path.
        path: PathBuf,

        /// The expected SHA-512 digest.
        expected: String,

        /// The computed SHA-512 digest.
        actual: String,
    },

    /// A kernel parameter had an empty key.
    #[error("kernel parameter key cannot be empty")]
    EmptyKernelParamKey,

    /// An operation on the containers map was missing its container id.
    #[error("missing container ID")]
    NeedContainerId,

    /// An operation on the containers map was missing its sandbox id.
    #[error("missing sandbox ID")]
    NeedSandboxId,
}

/// An error that occurred when an invalid hypervisor configuration was used.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InvalidHypervisorConfigError {
    /// No kernel path was given.
    #[error("missing kernel path")]
    MissingKernelPath,

    /// Neither an image nor an initrd path was given.
    #[error("missing image and initrd path")]
    MissingImageAndInitrd,

    /// Booting to and from a template were both requested.
    #[error("cannot set both 'to be' and 'from' vm template")]
    ConflictingTemplateModes,

    /// A template mode was requested without a memory path.
    #[error("missing memory path for vm template")]
    MissingTemplateMemoryPath,

    /// Booting from a template was requested without a device state path.
    #[error("missing devices state path for vm template")]
    MissingTemplateDevicesStatePath,
}

/// An error that can represent any error.
#[derive(Debug)]
pub struct AnyError {
    error: anyhow::Error,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl MonovmError {
    /// Creates a new `Err` result.
    pub fn custom(error: impl Into<anyhow::Error>) -> MonovmError {
        MonovmError::Custom(AnyError {
            error: error.into(),
        })
    }

    /// Wraps a netlink failure with the operation that produced it.
    pub fn netlink(operation: impl Into<String>, source: rtnetlink::Error) -> MonovmError {
        MonovmError::Netlink {
            operation: operation.into(),
            source,
        }
    }
}

impl AnyError {
    /// Downcasts the error to a `T`.
    pub fn downcast<T>(&self) -> Option<&T>
    where
        T: Display + fmt::Debug + Send + Sync + 'static,
    {
        self.error.downcast_ref::<T>()
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Creates an `Ok` `MonovmResult`.
#[allow(non_snake_case)]
pub fn Ok<T>(value: T) -> MonovmResult<T> {
    Result::Ok(value)
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl From<InvalidHypervisorConfigError> for MonovmError {
    fn from(error: InvalidHypervisorConfigError) -> Self {
        MonovmError::InvalidHypervisorConfig(error)
    }
}

impl PartialEq for AnyError {
    fn eq(&self, other: &Self) -> bool {
        self.error.to_string() == other.error.to_string()
    }
}

impl Display for AnyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)
    }
}

impl Error for AnyError {}
