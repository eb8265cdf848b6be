use thiserror::Error;

#[derive(Debug, Error)]
pub enum MaintenanceError {
    #[error("maintenance marker path must not be empty")]
    EmptyPath,

    #[error("maintenance poll interval must be positive")]
    ZeroInterval,
}

pub type MaintenanceResult<T> = Result<T, MaintenanceError>;
