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

//! Typed responses and the completion handler that produces them.

use std::fmt;
use std::rc::Rc;
use tracing::trace;

use super::package::{AurPackageInfo, AurRpcResponse};
use crate::error::{AurError, AurResult};

/// A typed result plus the raw status it completed with.
///
/// `status` is the HTTP status code for transfers (0 when no response was
/// received), the exit status for processes, or a negated errno when the
/// work could not be started at all.
#[derive(Debug)]
pub struct Response<T> {
    pub value: T,
    pub status: i32,
    pub error: String,
}

impl<T> Response<T> {
    pub fn new(value: T, status: i32, error: String) -> Self {
        Self {
            value,
            status,
            error,
        }
    }
}

/// Body of an RPC query
#[derive(Debug, Default)]
pub struct RpcResponse {
    pub body: Vec<u8>,
}

impl RpcResponse {
    /// Decode the body into package records
    pub fn parse(&self) -> AurResult<Vec<AurPackageInfo>> {
        let envelope: AurRpcResponse = serde_json::from_slice(&self.body)?;
        trace!(
            "rpc v{} {}: {} result(s)",
            envelope.version,
            envelope.response_type,
            envelope.resultcount
        );
        if envelope.response_type == "error" || envelope.error.is_some() {
            return Err(AurError::Rpc {
                message: envelope.error.unwrap_or_else(|| "unknown error".to_string()),
            });
        }
        Ok(envelope.results)
    }
}

impl Response<RpcResponse> {
    pub fn is_ok(&self) -> bool {
        (200..300).contains(&self.status) && self.error.is_empty()
    }
}

/// Body of a raw file or tarball fetch
#[derive(Debug, Default)]
pub struct RawResponse {
    pub bytes: Vec<u8>,
}

impl Response<RawResponse> {
    pub fn is_ok(&self) -> bool {
        (200..300).contains(&self.status) && self.error.is_empty()
    }
}

/// Which git operation a clone request turned into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloneOperation {
    Clone,
    Update,
}

impl CloneOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloneOperation::Clone => "clone",
            CloneOperation::Update => "update",
        }
    }
}

impl fmt::Display for CloneOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
pub struct CloneResponse {
    pub operation: CloneOperation,
}

impl Response<CloneResponse> {
    pub fn is_ok(&self) -> bool {
        self.status == 0 && self.error.is_empty()
    }
}

/// Caller callbacks. A negative return value aborts the whole engine:
/// every other pending request is cancelled and `wait()` returns it.
pub type RpcCallback = Rc<dyn Fn(Response<RpcResponse>) -> i32>;
pub type RawCallback = Rc<dyn Fn(Response<RawResponse>) -> i32>;
pub type CloneCallback = Rc<dyn Fn(Response<CloneResponse>) -> i32>;

enum Dispatch {
    Rpc(RpcCallback),
    Raw(RawCallback),
    Clone {
        operation: CloneOperation,
        callback: CloneCallback,
    },
}

/// Completion token for one transfer or process.
///
/// Owned by the engine's active-request table. `run` consumes it, so a
/// handler can fire at most once; cancellation simply drops it.
pub(crate) struct ResponseHandler {
    body: Vec<u8>,
    dispatch: Dispatch,
}

impl ResponseHandler {
    pub fn rpc(callback: RpcCallback) -> Self {
        Self {
            body: Vec::new(),
            dispatch: Dispatch::Rpc(callback),
        }
    }

    pub fn raw(callback: RawCallback) -> Self {
        Self {
            body: Vec::new(),
            dispatch: Dispatch::Raw(callback),
        }
    }

    pub fn clone_op(operation: CloneOperation, callback: CloneCallback) -> Self {
        Self {
            body: Vec::new(),
            dispatch: Dispatch::Clone {
                operation,
                callback,
            },
        }
    }

    pub fn append(&mut self, data: &[u8]) {
        self.body.extend_from_slice(data);
    }

    pub fn kind(&self) -> &'static str {
        match self.dispatch {
            Dispatch::Rpc(_) => "rpc",
            Dispatch::Raw(_) => "raw",
            Dispatch::Clone { operation, .. } => operation.as_str(),
        }
    }

    /// Invoke the callback with the final status and consume the handler.
    pub fn run(self, status: i32, error: String) -> i32 {
        match self.dispatch {
            Dispatch::Rpc(callback) => {
                callback(Response::new(RpcResponse { body: self.body }, status, error))
            }
            Dispatch::Raw(callback) => {
                callback(Response::new(RawResponse { bytes: self.body }, status, error))
            }
            Dispatch::Clone {
                operation,
                callback,
            } => callback(Response::new(CloneResponse { operation }, status, error)),
        }
    }
}

impl fmt::Debug for ResponseHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseHandler")
            .field("kind", &self.kind())
            .field("buffered", &self.body.len())
            .finish()
    }
}
