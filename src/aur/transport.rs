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

//! HTTP transfers multiplexed over a bounded connection pool.

use futures::StreamExt;
use reqwest::{header, Client, Request};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::AbortHandle;
use tracing::trace;

use super::debug::Tracer;
use super::notifier::{Event, Notifier, TransferId};
use crate::error::TransferError;

/// Transfers allowed to hold a connection at the same time
pub const MAX_CONNECTIONS: usize = 5;
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const USER_AGENT: &str = concat!("aurlink/", env!("CARGO_PKG_VERSION"));

/// What a transfer fetches; decides the compression policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    Rpc,
    Raw,
    /// Snapshot tarballs are already compressed
    Tarball,
}

impl TransferKind {
    /// Explicit Accept-Encoding, or `None` for the client default
    pub fn accept_encoding(&self) -> Option<&'static str> {
        match self {
            TransferKind::Rpc | TransferKind::Raw => None,
            TransferKind::Tarball => Some("identity"),
        }
    }
}

#[derive(Debug)]
pub(crate) struct TransferFailure {
    pub kind: TransferError,
    /// Best available detail; may be empty
    pub detail: String,
}

/// Everything a finished transfer reports back
#[derive(Debug)]
pub(crate) struct TransferOutcome {
    /// 0 when no response line was received
    pub status: u16,
    pub body: Vec<u8>,
    pub failure: Option<TransferFailure>,
}

impl TransferOutcome {
    fn failed(status: u16, body: Vec<u8>, error: &reqwest::Error) -> Self {
        Self {
            status,
            body,
            failure: Some(TransferFailure {
                kind: TransferError::classify(error),
                detail: error.to_string(),
            }),
        }
    }

    /// Detail if there is any, the canonical description otherwise
    pub fn error_message(&self) -> String {
        match &self.failure {
            None => String::new(),
            Some(failure) if !failure.detail.is_empty() => failure.detail.clone(),
            Some(failure) => failure.kind.to_string(),
        }
    }
}

pub(crate) struct Multiplexer {
    client: Client,
    slots: Arc<Semaphore>,
    tracer: Tracer,
    next_id: u64,
    transfers: HashMap<TransferId, AbortHandle>,
}

impl Multiplexer {
    /// HTTP/2 is offered through ALPN (`native-tls-alpn`) and used where the
    /// server accepts it, with HTTP/1.1 as the fallback.
    pub fn new(tracer: Tracer, use_proxy: bool) -> reqwest::Result<Self> {
        let mut builder = Client::builder()
            .pool_max_idle_per_host(MAX_CONNECTIONS)
            .pool_idle_timeout(Duration::from_secs(90))
            .connect_timeout(CONNECT_TIMEOUT)
            .tcp_nodelay(true)
            .http2_adaptive_window(true);
        if !use_proxy {
            builder = builder.no_proxy();
        }

        Ok(Self {
            client: builder.build()?,
            slots: Arc::new(Semaphore::new(MAX_CONNECTIONS)),
            tracer,
            next_id: 0,
            transfers: HashMap::new(),
        })
    }

    /// Build the request for one locator
    pub fn prepare(&self, url: &str, kind: TransferKind) -> reqwest::Result<Request> {
        let mut builder = self.client.get(url).header(header::USER_AGENT, USER_AGENT);
        if let Some(encoding) = kind.accept_encoding() {
            builder = builder.header(header::ACCEPT_ENCODING, encoding);
        }
        builder.build()
    }

    /// Start a transfer; its outcome arrives as `Event::TransferDone`.
    pub fn add(&mut self, notifier: &Notifier, url: &str, kind: TransferKind) -> TransferId {
        self.next_id += 1;
        let id = TransferId(self.next_id);

        let request = self.prepare(url, kind);
        let client = self.client.clone();
        let slots = self.slots.clone();
        let tracer = self.tracer.clone();
        let sender = notifier.sender();

        let abort = notifier.spawn(async move {
            let outcome = perform(client, slots, request, tracer).await;
            let _ = sender.send(Event::TransferDone { id, outcome });
        });

        trace!("queued {:?} {:?} {}", id, kind, url);
        self.transfers.insert(id, abort);
        id
    }

    /// Abort a transfer that has not been reported yet
    pub fn remove(&mut self, id: TransferId) -> bool {
        match self.transfers.remove(&id) {
            Some(abort) => {
                abort.abort();
                true
            }
            None => false,
        }
    }

    /// Forget a transfer whose outcome was delivered
    pub fn finish(&mut self, id: TransferId) {
        self.transfers.remove(&id);
    }

    #[cfg(test)]
    pub fn running(&self) -> usize {
        self.transfers.len()
    }
}

async fn perform(
    client: Client,
    slots: Arc<Semaphore>,
    request: reqwest::Result<Request>,
    tracer: Tracer,
) -> TransferOutcome {
    let request = match request {
        Ok(request) => request,
        Err(e) => return TransferOutcome::failed(0, Vec::new(), &e),
    };
    let url = request.url().to_string();

    let _permit = match slots.acquire_owned().await {
        Ok(permit) => permit,
        Err(_) => {
            return TransferOutcome {
                status: 0,
                body: Vec::new(),
                failure: Some(TransferFailure {
                    kind: TransferError::Aborted,
                    detail: String::new(),
                }),
            }
        }
    };

    tracer.request(&request);
    let response = match client.execute(request).await {
        Ok(response) => response,
        Err(e) => {
            tracer.failure(&url, &e.to_string());
            return TransferOutcome::failed(0, Vec::new(), &e);
        }
    };
    tracer.response(&response);

    let status = response.status().as_u16();
    let mut body = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(bytes) => body.extend_from_slice(&bytes),
            Err(e) => {
                tracer.failure(&url, &e.to_string());
                return TransferOutcome::failed(status, body, &e);
            }
        }
    }

    TransferOutcome {
        status,
        body,
        failure: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn multiplexer() -> Multiplexer {
        Multiplexer::new(Tracer::default(), false).unwrap()
    }

    #[test]
    fn test_tarball_disables_compression() {
        let mux = multiplexer();
        let request = mux
            .prepare("https://aur.archlinux.org/cgit/aur.git/snapshot/a.tar.gz", TransferKind::Tarball)
            .unwrap();
        assert_eq!(request.headers()[header::ACCEPT_ENCODING], "identity");
    }

    #[test]
    fn test_rpc_and_raw_keep_default_encoding() {
        let mux = multiplexer();
        for kind in [TransferKind::Rpc, TransferKind::Raw] {
            let request = mux.prepare("https://aur.archlinux.org/rpc/?v=5", kind).unwrap();
            assert!(request.headers().get(header::ACCEPT_ENCODING).is_none());
            assert_eq!(request.headers()[header::USER_AGENT], USER_AGENT);
        }
    }

    #[test]
    fn test_bad_url_fails_to_prepare() {
        let mux = multiplexer();
        assert!(mux.prepare("not a url", TransferKind::Rpc).is_err());
    }

    #[test]
    fn test_error_message_prefers_detail() {
        let mut outcome = TransferOutcome {
            status: 0,
            body: Vec::new(),
            failure: Some(TransferFailure {
                kind: TransferError::Connect,
                detail: "tcp connect error: Connection refused".to_string(),
            }),
        };
        assert_eq!(outcome.error_message(), "tcp connect error: Connection refused");

        if let Some(failure) = outcome.failure.as_mut() {
            failure.detail.clear();
        }
        assert_eq!(outcome.error_message(), "Couldn't connect to server");

        outcome.failure = None;
        assert_eq!(outcome.error_message(), "");
    }
}
