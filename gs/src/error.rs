//! Error types for shared-memory setup and semaphore operations

use nix::errno::Errno;
use thiserror::Error;

/// Errors raised while creating, attaching or releasing shared regions
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to create shared region {name}: {source}")]
    Create { name: String, source: Errno },

    #[error("Shared region {name} already exists; another game may be running, or a crashed one left it behind")]
    AlreadyExists { name: String },

    #[error("Shared region {name} has not been created yet")]
    NotCreated { name: String },

    #[error("Failed to open shared region {name}: {source}")]
    Open { name: String, source: Errno },

    #[error("Failed to size shared region {name} to {len} bytes: {source}")]
    Resize { name: String, len: usize, source: Errno },

    #[error("Failed to map shared region {name}: {source}")]
    Map { name: String, source: Errno },

    #[error("Failed to unlink shared region {name}: {source}")]
    Unlink { name: String, source: Errno },

    #[error("Semaphore {what} failed: {source}")]
    Semaphore { what: &'static str, source: SemError },

    #[error("Invalid layout: {0}")]
    InvalidLayout(String),

    #[error("Region {0} is mapped read-only")]
    ReadOnly(String),

    #[error("Too many agents: {count} (max {max})")]
    TooManyAgents { count: usize, max: usize },
}

impl StoreError {
    /// Check if this error means the region does not exist yet
    ///
    /// Attaching processes use this to decide whether to retry.
    pub fn is_not_created(&self) -> bool {
        matches!(self, StoreError::NotCreated { .. })
    }

    /// Check if creation failed because the name is already taken
    pub fn is_already_exists(&self) -> bool {
        matches!(self, StoreError::AlreadyExists { .. })
    }
}

/// Result alias for region operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors from individual semaphore operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SemError {
    #[error("Interrupted by signal")]
    Interrupted,

    #[error("OS error: {0}")]
    Os(Errno),
}

impl SemError {
    /// Read the current errno into a SemError
    pub(crate) fn last() -> Self {
        match Errno::last() {
            Errno::EINTR => SemError::Interrupted,
            errno => SemError::Os(errno),
        }
    }

    /// Check if the operation was cut short by a signal
    pub fn is_interrupted(&self) -> bool {
        matches!(self, SemError::Interrupted)
    }
}

/// Result alias for semaphore operations
pub type SemResult<T> = Result<T, SemError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_not_created() {
        let err = StoreError::NotCreated {
            name: "/game_state".to_string(),
        };
        assert!(err.is_not_created());

        let err = StoreError::Open {
            name: "/game_state".to_string(),
            source: Errno::EACCES,
        };
        assert!(!err.is_not_created());
    }

    #[test]
    fn test_already_exists_names_the_region() {
        let err = StoreError::AlreadyExists {
            name: "/game_state".to_string(),
        };
        assert!(err.is_already_exists());
        assert!(!err.is_not_created());
        assert!(err.to_string().contains("/game_state"));
    }

    #[test]
    fn test_error_messages_name_the_region() {
        let err = StoreError::Resize {
            name: "/game_sync".to_string(),
            len: 4096,
            source: Errno::EINVAL,
        };
        let msg = err.to_string();
        assert!(msg.contains("/game_sync"));
        assert!(msg.contains("4096"));
    }

    #[test]
    fn test_sem_error_interrupted() {
        assert!(SemError::Interrupted.is_interrupted());
        assert!(!SemError::Os(Errno::EINVAL).is_interrupted());
    }
}
