// src/error.rs
use std::io;
use std::net::SocketAddr;
use thiserror::Error;

/// Result type used throughout the exporter
pub type Result<T> = std::result::Result<T, ExportError>;

/// Errors that can fail an export cycle or exporter setup
#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Failed to connect to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("Write error: {0}")]
    Write(#[from] io::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Resolve error: {0}")]
    Resolve(String),
}

impl ExportError {
    /// Build a connection error for the given address
    pub fn connect(addr: SocketAddr, source: io::Error) -> Self {
        ExportError::Connect { addr, source }
    }

    /// Whether the cycle failed before anything was written
    pub fn is_connect(&self) -> bool {
        matches!(self, ExportError::Connect { .. })
    }
}
