/*
 * aurlink - Asynchronous AUR client.
 * Copyright (C) 2025  compiledkernel-idk and aurlink contributors
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

//! Error types for requests, processes and configuration.

use thiserror::Error;

/// Main error type for aurlink operations
#[derive(Debug, Error)]
pub enum AurError {
    /// A transfer failed before a usable response arrived
    #[error("Network error for {url}: {message}")]
    Network { url: String, message: String },

    /// The server answered with a non-2xx status
    #[error("unexpected HTTP status code {status}")]
    UnexpectedStatus { status: i32 },

    /// The RPC endpoint returned an error document
    #[error("AUR RPC error: {message}")]
    Rpc { message: String },

    /// Response body could not be decoded
    #[error("failed to parse response: {0}")]
    Parse(#[from] serde_json::Error),

    /// The VCS child could not be started
    #[error("failed to fork new process for git: {source}")]
    Spawn {
        #[source]
        source: std::io::Error,
    },

    /// The VCS child ran but did not succeed
    #[error("{operation} of '{package}' failed: {message}")]
    VcsExit {
        package: String,
        operation: String,
        message: String,
        status: i32,
    },

    /// Registering an event source with the notifier failed
    #[error("failed to register {what} with the event loop: {source}")]
    Registration {
        what: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// File system errors
    #[error("File system error for '{path}': {message}")]
    FileSystem {
        path: String,
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// AUR package not found
    #[error("AUR package '{package}' not found")]
    PackageNotFound { package: String },

    /// Request loop was cancelled or aborted
    #[error("operation interrupted (status {status})")]
    Interrupted { status: i32 },
}

impl AurError {
    /// Negative errno suitable for a callback or wait() status
    pub fn errno(&self) -> i32 {
        let code = match self {
            AurError::Spawn { source } | AurError::Registration { source, .. } => {
                source.raw_os_error().unwrap_or(libc::EIO)
            }
            AurError::FileSystem {
                source: Some(source),
                ..
            } => source.raw_os_error().unwrap_or(libc::EIO),
            AurError::PackageNotFound { .. } => libc::ENOENT,
            AurError::Parse(_) | AurError::Config { .. } => libc::EINVAL,
            AurError::Interrupted { .. } => libc::EINTR,
            _ => libc::EIO,
        };
        -code
    }

    /// Create a filesystem error
    pub fn filesystem(
        path: impl Into<String>,
        message: impl Into<String>,
        source: std::io::Error,
    ) -> Self {
        AurError::FileSystem {
            path: path.into(),
            message: message.into(),
            source: Some(source),
        }
    }

    /// Create a network error
    pub fn network(url: impl Into<String>, message: impl Into<String>) -> Self {
        AurError::Network {
            url: url.into(),
            message: message.into(),
        }
    }
}

/// Result type alias for aurlink operations
pub type AurResult<T> = std::result::Result<T, AurError>;

/// Classification of a failed transfer.
///
/// The `Display` text is the canonical description used when a transfer
/// produced no more specific detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TransferError {
    #[error("URL using bad/illegal format or missing URL")]
    BadUrl,
    #[error("Couldn't connect to server")]
    Connect,
    #[error("Timeout was reached")]
    Timeout,
    #[error("Failed sending data to the peer")]
    Send,
    #[error("Failure when receiving data from the peer")]
    Receive,
    #[error("Unrecognized or bad HTTP Content or Transfer-Encoding")]
    Decode,
    #[error("Operation was aborted by an application callback")]
    Aborted,
}

impl TransferError {
    pub fn classify(error: &reqwest::Error) -> Self {
        if error.is_builder() {
            TransferError::BadUrl
        } else if error.is_timeout() {
            TransferError::Timeout
        } else if error.is_connect() {
            TransferError::Connect
        } else if error.is_decode() {
            TransferError::Decode
        } else if error.is_body() {
            TransferError::Receive
        } else {
            TransferError::Send
        }
    }
}
