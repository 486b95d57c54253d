use netlink_gateway::GatewayError;
use thiserror::Error;

/// Error surface shared by the attachment core (spec §7).
///
/// `NotFound` / `AlreadyExists` are the two flavors reconcilers branch on:
/// a delete that hits `NotFound` is success, an add that hits `AlreadyExists`
/// on a matching object is success. Everything else is fatal and propagated
/// verbatim to the caller.
#[derive(Debug, Error)]
pub enum CniError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("kernel refused the request: {0}")]
    KernelRefused(String),
    #[error("failed to enter network namespace: {0}")]
    NamespaceEnter(String),
    #[error("vswitch oracle error: {0}")]
    Oracle(String),
    #[error("no eligible vswitch among candidates")]
    NoEligibleVSwitch,
    #[error("invariant violated: {0}")]
    Invariant(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CniError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, CniError::NotFound(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, CniError::AlreadyExists(_))
    }
}

pub type CniResult<T> = Result<T, CniError>;

/// `netlink-gateway` is the one leaf crate with a typed error (SPEC_FULL.md
/// §1.2): callers that only deal in `anyhow::Error` still need to branch on
/// it, so `CniError` gains a direct conversion and the two predicates below
/// downcast it alongside `std::io::Error`.
impl From<GatewayError> for CniError {
    fn from(e: GatewayError) -> Self {
        match e {
            GatewayError::NotFound(m) => CniError::NotFound(m),
            GatewayError::AlreadyExists(m) => CniError::AlreadyExists(m),
            GatewayError::PermissionDenied(m) => CniError::PermissionDenied(m),
            GatewayError::KernelRefused(m) => CniError::KernelRefused(m),
            GatewayError::Other(e) => CniError::Other(e),
        }
    }
}

pub fn anyhow_io_kind(e: &anyhow::Error) -> Option<std::io::ErrorKind> {
    e.downcast_ref::<std::io::Error>().map(|it| it.kind())
}

pub fn is_already_exists_error(e: &anyhow::Error) -> bool {
    if let Some(ge) = e.downcast_ref::<GatewayError>() {
        return ge.is_already_exists();
    }
    anyhow_io_kind(e).map_or(false, |it| it == std::io::ErrorKind::AlreadyExists)
}

pub fn is_not_found_error(e: &anyhow::Error) -> bool {
    if let Some(ge) = e.downcast_ref::<GatewayError>() {
        return ge.is_not_found();
    }
    anyhow_io_kind(e).map_or(false, |it| it == std::io::ErrorKind::NotFound)
}

#[macro_export]
macro_rules! wrap_err {
    ($e:expr) => {
        $e.map_err(|e| anyhow::anyhow!("{:?}", e))
    };
}
