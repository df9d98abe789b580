//! Error types for the M8 driver

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// M8 driver error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// TCP connection to the sensor could not be established
    #[error("Connection failed: {0}")]
    Connection(#[from] std::io::Error),

    /// The driver threads are already running
    #[error("Client is already running")]
    AlreadyRunning,
}
