use thiserror::Error;

/// Errors surfaced by the kernel-state gateway. `NotFound` and `AlreadyExists`
/// get their own variants (spec.md §4.A: "surface a `not-found` flavor
/// distinguishable from other") so reconcilers in `attach-driver` can branch
/// on them without string matching or errno downcasting.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("kernel refused the request: {0}")]
    KernelRefused(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl GatewayError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, GatewayError::NotFound(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, GatewayError::AlreadyExists(_))
    }

    pub(crate) fn from_errno(action: &str, errno: i32) -> Self {
        match errno {
            libc::ENOENT | libc::ENODEV => GatewayError::NotFound(format!("{action}: errno {errno}")),
            libc::EEXIST => GatewayError::AlreadyExists(format!("{action}: errno {errno}")),
            libc::EPERM | libc::EACCES => {
                GatewayError::PermissionDenied(format!("{action}: errno {errno}"))
            }
            _ => GatewayError::KernelRefused(format!("{action}: errno {errno}")),
        }
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;
