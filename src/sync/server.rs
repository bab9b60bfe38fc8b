// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Unix socket server receiving calls from the edge core.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::{UnixListener, UnixStream};
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use uuid::Uuid;

use super::codec::ServerCodec;
use super::handler::SyncHandler;
use super::message::{ResponseFrame, StatusCode};
use crate::error::SyncError;

/// Pause after a failed accept, so a persistent error does not spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// How long [`SyncServer::stop`] waits for requests in flight.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Server side of the synchronization channel.
///
/// Each connection is served on its own task; requests on one connection
/// are answered in order.
#[derive(Debug)]
pub struct SyncServer {
    path: PathBuf,
    token: CancellationToken,
    connections: TaskTracker,
    acceptor: Mutex<Option<JoinHandle<()>>>,
}

impl SyncServer {
    /// Binds `path`, replacing a stale socket file, and starts accepting.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Io`] if the socket cannot be bound.
    pub fn bind(path: impl Into<PathBuf>, handler: SyncHandler) -> Result<Self, SyncError> {
        let path = path.into();
        remove_socket(&path)?;
        let listener = UnixListener::bind(&path)?;
        tracing::info!(path = %path.display(), "Sync server listening");

        let token = CancellationToken::new();
        let connections = TaskTracker::new();
        let acceptor = tokio::spawn(accept_loop(
            listener,
            handler,
            token.clone(),
            connections.clone(),
        ));

        Ok(Self {
            path,
            token,
            connections,
            acceptor: Mutex::new(Some(acceptor)),
        })
    }

    /// Returns the socket path.
    #[must_use]
    pub fn local_path(&self) -> &Path {
        &self.path
    }

    /// Stops accepting, closes open connections and removes the socket
    /// file. Idempotent.
    ///
    /// Returns once every connection task has finished, so no request is
    /// still being applied afterwards.
    pub async fn stop(&self) {
        self.token.cancel();
        let acceptor = self.acceptor.lock().take();
        let Some(acceptor) = acceptor else {
            return;
        };
        if let Err(e) = acceptor.await {
            tracing::error!(error = %e, "Sync acceptor panicked");
        }

        self.connections.close();
        if tokio::time::timeout(DRAIN_TIMEOUT, self.connections.wait())
            .await
            .is_err()
        {
            tracing::warn!(
                open = self.connections.len(),
                "Sync connections still busy after drain timeout"
            );
        }
        if let Err(e) = remove_socket(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %e, "Could not remove socket");
        }
        tracing::info!(path = %self.path.display(), "Sync server stopped");
    }
}

impl Drop for SyncServer {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

fn remove_socket(path: &Path) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

async fn accept_loop(
    listener: UnixListener,
    handler: SyncHandler,
    token: CancellationToken,
    connections: TaskTracker,
) {
    loop {
        let accepted = tokio::select! {
            biased;
            () = token.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok((stream, _)) => {
                connections.spawn(serve_connection(
                    stream,
                    handler.clone(),
                    token.child_token(),
                ));
            }
            Err(e) => {
                tracing::warn!(error = %e, "Accept failed");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }
}

async fn serve_connection(stream: UnixStream, handler: SyncHandler, token: CancellationToken) {
    let mut framed = Framed::new(stream, ServerCodec::new());

    loop {
        let next = tokio::select! {
            biased;
            () = token.cancelled() => break,
            next = framed.next() => next,
        };
        let response = match next {
            None => break,
            Some(Ok(frame)) => handler.handle(frame).await,
            Some(Err(e)) => {
                tracing::warn!(error = %e, "Malformed request, closing connection");
                let reply = ResponseFrame::error(Uuid::nil(), StatusCode::InvalidArgument, e.to_string());
                if let Err(e) = framed.send(reply).await {
                    tracing::debug!(error = %e, "Could not answer malformed request");
                }
                break;
            }
        };
        if let Err(e) = framed.send(response).await {
            tracing::debug!(error = %e, "Connection lost while answering");
            break;
        }
    }
}
