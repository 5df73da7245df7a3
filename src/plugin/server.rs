//! HTTP/1 server for the plugin protocol on a Unix socket.

use std::convert::Infallible;
use std::future::Future;

use bytes::Bytes;
use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::{CONTENT_TYPE, HeaderValue};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::UnixListener;
use tokio::signal::unix::{SignalKind, signal};
use tracing::{debug, info, warn};

use super::{Endpoint, PLUGIN_CONTENT_TYPE, PluginError, PluginHandler};
use crate::host::CommandRunner;
use crate::provider::BlockStore;

/// Serves a [`PluginHandler`] on a Unix socket.
#[derive(Debug)]
pub struct PluginServer<S: ?Sized, R> {
    socket_path: Utf8PathBuf,
    handler: PluginHandler<S, R>,
}

impl<S, R> PluginServer<S, R>
where
    S: BlockStore + ?Sized + 'static,
    R: CommandRunner + 'static,
{
    /// Creates a server for `handler` listening on `socket_path`.
    #[must_use]
    pub fn new(socket_path: impl Into<Utf8PathBuf>, handler: PluginHandler<S, R>) -> Self {
        Self {
            socket_path: socket_path.into(),
            handler,
        }
    }

    /// Accepts connections until `shutdown` resolves, then removes the socket.
    ///
    /// A stale socket left behind by a previous run is replaced. Requests in
    /// flight when `shutdown` resolves are abandoned.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Bind`] when the socket cannot be created and
    /// [`PluginError::Accept`] when the listener fails.
    pub async fn serve<F>(self, shutdown: F) -> Result<(), PluginError>
    where
        F: Future<Output = ()>,
    {
        let listener = bind(&self.socket_path)?;
        info!(socket = %self.socket_path, "plugin listening");

        tokio::pin!(shutdown);
        let outcome = loop {
            tokio::select! {
                () = &mut shutdown => break Ok(()),
                accepted = listener.accept() => match accepted {
                    Ok((stream, _)) => self.spawn_connection(stream),
                    Err(err) => break Err(PluginError::Accept(err.to_string())),
                },
            }
        };

        drop(listener);
        if let Err(err) = remove_socket(&self.socket_path) {
            warn!(socket = %self.socket_path, error = %err, "failed to remove plugin socket");
        }
        info!(socket = %self.socket_path, "plugin stopped");
        outcome
    }

    fn spawn_connection(&self, stream: tokio::net::UnixStream) {
        let handler = self.handler.clone();
        tokio::spawn(async move {
            let service = service_fn(move |request| {
                let request_handler = handler.clone();
                async move { Ok::<_, Infallible>(respond(&request_handler, request).await) }
            });
            if let Err(err) = http1::Builder::new()
                .serve_connection(TokioIo::new(stream), service)
                .await
            {
                debug!(error = %err, "plugin connection closed with error");
            }
        });
    }
}

async fn respond<S, R>(
    handler: &PluginHandler<S, R>,
    request: Request<Incoming>,
) -> Response<Full<Bytes>>
where
    S: BlockStore + ?Sized,
    R: CommandRunner,
{
    let path = request.uri().path().to_owned();
    let Some(endpoint) = Endpoint::from_path(&path) else {
        debug!(%path, "unknown plugin endpoint");
        return reply(StatusCode::NOT_FOUND, Bytes::new());
    };

    let body = match request.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(err) => {
            warn!(%path, error = %err, "failed to read request body");
            return reply(StatusCode::BAD_REQUEST, Bytes::new());
        }
    };

    match handler.handle(endpoint, &body).await {
        Ok(encoded) => reply(StatusCode::OK, Bytes::from(encoded)),
        Err(err) => {
            warn!(%path, error = %err, "failed to encode plugin response");
            reply(StatusCode::INTERNAL_SERVER_ERROR, Bytes::new())
        }
    }
}

fn reply(status: StatusCode, body: Bytes) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(PLUGIN_CONTENT_TYPE));
    response
}

fn bind(socket_path: &Utf8Path) -> Result<UnixListener, PluginError> {
    let bind_error = |message: String| PluginError::Bind {
        path: socket_path.to_string(),
        message,
    };
    if let Some(parent) = socket_path.parent().filter(|dir| !dir.as_str().is_empty()) {
        Dir::create_ambient_dir_all(parent, ambient_authority())
            .map_err(|err| bind_error(err.to_string()))?;
    }
    remove_socket(socket_path).map_err(|err| bind_error(err.to_string()))?;
    UnixListener::bind(socket_path).map_err(|err| bind_error(err.to_string()))
}

fn remove_socket(socket_path: &Utf8Path) -> std::io::Result<()> {
    let Some(file_name) = socket_path.file_name() else {
        return Ok(());
    };
    let parent = socket_path
        .parent()
        .filter(|dir| !dir.as_str().is_empty())
        .unwrap_or_else(|| Utf8Path::new("."));
    let dir = Dir::open_ambient_dir(parent, ambient_authority())?;
    match dir.remove_file(file_name) {
        Err(err) if err.kind() != std::io::ErrorKind::NotFound => Err(err),
        _ => Ok(()),
    }
}

/// Resolves once SIGINT or SIGTERM is received.
///
/// # Errors
///
/// Returns [`PluginError::Signal`] when the handlers cannot be installed.
pub fn shutdown_signal() -> Result<impl Future<Output = ()>, PluginError> {
    let mut interrupt =
        signal(SignalKind::interrupt()).map_err(|err| PluginError::Signal(err.to_string()))?;
    let mut terminate =
        signal(SignalKind::terminate()).map_err(|err| PluginError::Signal(err.to_string()))?;
    Ok(async move {
        tokio::select! {
            _ = interrupt.recv() => info!("received SIGINT, shutting down"),
            _ = terminate.recv() => info!("received SIGTERM, shutting down"),
        }
    })
}
