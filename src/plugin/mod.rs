//! Docker volume plugin protocol.
//!
//! Requests arrive as JSON bodies posted to `/Plugin.Activate` and
//! `/VolumeDriver.*`. Responses always carry an `Err` string that is empty on
//! success; lifecycle failures are flattened to their display text.

mod server;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::driver::VolumeDriver;
use crate::error::VolumeError;
use crate::host::CommandRunner;
use crate::provider::BlockStore;
use crate::registry::VolumeEntry;

pub use server::{PluginServer, shutdown_signal};

/// Content type used by plugin responses.
pub const PLUGIN_CONTENT_TYPE: &str = "application/vnd.docker.plugins.v1+json";

/// Errors raised by the plugin server itself.
#[derive(Debug, Error)]
pub enum PluginError {
    /// Raised when the socket cannot be prepared or bound.
    #[error("failed to bind plugin socket {path}: {message}")]
    Bind {
        /// Socket path.
        path: String,
        /// Operating system error string.
        message: String,
    },
    /// Raised when accepting a connection fails.
    #[error("failed to accept plugin connection: {0}")]
    Accept(String),
    /// Raised when signal handlers cannot be installed.
    #[error("failed to install signal handler: {0}")]
    Signal(String),
    /// Raised when a response cannot be encoded.
    #[error("failed to encode plugin response: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Protocol endpoints served by the plugin.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Endpoint {
    /// `/Plugin.Activate`
    Activate,
    /// `/VolumeDriver.Create`
    Create,
    /// `/VolumeDriver.Mount`
    Mount,
    /// `/VolumeDriver.Path`
    Path,
    /// `/VolumeDriver.Unmount`
    Unmount,
    /// `/VolumeDriver.Remove`
    Remove,
    /// `/VolumeDriver.Get`
    Get,
    /// `/VolumeDriver.List`
    List,
    /// `/VolumeDriver.Capabilities`
    Capabilities,
}

impl Endpoint {
    /// Maps a request path to an endpoint.
    #[must_use]
    pub fn from_path(path: &str) -> Option<Self> {
        let endpoint = match path {
            "/Plugin.Activate" => Self::Activate,
            "/VolumeDriver.Create" => Self::Create,
            "/VolumeDriver.Mount" => Self::Mount,
            "/VolumeDriver.Path" => Self::Path,
            "/VolumeDriver.Unmount" => Self::Unmount,
            "/VolumeDriver.Remove" => Self::Remove,
            "/VolumeDriver.Get" => Self::Get,
            "/VolumeDriver.List" => Self::List,
            "/VolumeDriver.Capabilities" => Self::Capabilities,
            _ => return None,
        };
        Some(endpoint)
    }
}

/// Body of requests naming a single volume.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct NameRequest {
    /// Volume name, optionally followed by `/subpath`.
    pub name: String,
}

/// Body of `/VolumeDriver.Create`.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct CreateRequest {
    /// Volume name.
    pub name: String,
    /// Driver options given with `docker volume create -o`.
    #[serde(default)]
    pub opts: Option<BTreeMap<String, String>>,
}

/// Reply of `/Plugin.Activate`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ActivateResponse {
    /// Implemented plugin subsystems.
    pub implements: Vec<String>,
}

/// Reply carrying only an error string.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ErrResponse {
    /// Error message, empty on success.
    pub err: String,
}

/// Reply of `/VolumeDriver.Mount` and `/VolumeDriver.Path`.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct MountpointResponse {
    /// Mount point, empty on failure.
    pub mountpoint: String,
    /// Error message, empty on success.
    pub err: String,
}

/// Reply of `/VolumeDriver.Get`.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct GetResponse {
    /// Volume properties, absent on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<BTreeMap<String, String>>,
    /// Error message, empty on success.
    pub err: String,
}

/// Reply of `/VolumeDriver.List`.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ListResponse {
    /// Properties of every named volume.
    pub volumes: Vec<BTreeMap<String, String>>,
    /// Error message, empty on success.
    pub err: String,
}

/// Reply of `/VolumeDriver.Capabilities`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CapabilitiesResponse {
    /// Capability map, for example `{"Scope": "global"}`.
    pub capabilities: BTreeMap<String, String>,
}

/// Property map of a volume: `Name`, `AwsVolumeId`, and `Mountpoint` when mounted.
#[must_use]
pub fn volume_properties(entry: &VolumeEntry) -> BTreeMap<String, String> {
    let mut properties = BTreeMap::new();
    properties.insert(String::from("Name"), entry.name.clone());
    properties.insert(String::from("AwsVolumeId"), entry.volume_id.clone());
    if let Some(mountpoint) = &entry.mountpoint {
        properties.insert(String::from("Mountpoint"), mountpoint.to_string());
    }
    properties
}

fn error_text(result: &Result<(), VolumeError>) -> String {
    result
        .as_ref()
        .err()
        .map(ToString::to_string)
        .unwrap_or_default()
}

fn parse<T: DeserializeOwned>(body: &[u8]) -> Result<T, String> {
    serde_json::from_slice(body).map_err(|err| format!("malformed request body: {err}"))
}

/// Dispatches decoded plugin requests to a [`VolumeDriver`].
#[derive(Debug)]
pub struct PluginHandler<S: ?Sized, R> {
    driver: Arc<VolumeDriver<S, R>>,
}

impl<S: ?Sized, R> Clone for PluginHandler<S, R> {
    fn clone(&self) -> Self {
        Self {
            driver: Arc::clone(&self.driver),
        }
    }
}

impl<S, R> PluginHandler<S, R>
where
    S: BlockStore + ?Sized,
    R: CommandRunner,
{
    /// Wraps a shared driver.
    #[must_use]
    pub const fn new(driver: Arc<VolumeDriver<S, R>>) -> Self {
        Self { driver }
    }

    /// Handles one request and returns the encoded JSON reply.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Encode`] when the reply cannot be serialised.
    pub async fn handle(&self, endpoint: Endpoint, body: &[u8]) -> Result<Vec<u8>, PluginError> {
        let encoded = match endpoint {
            Endpoint::Activate => serde_json::to_vec(&ActivateResponse {
                implements: vec![String::from("VolumeDriver")],
            })?,
            Endpoint::Create => serde_json::to_vec(&self.create(body).await)?,
            Endpoint::Mount | Endpoint::Path => {
                serde_json::to_vec(&self.mountpoint(endpoint, body).await)?
            }
            Endpoint::Unmount | Endpoint::Remove => {
                serde_json::to_vec(&self.release(endpoint, body).await)?
            }
            Endpoint::Get => serde_json::to_vec(&self.get(body).await)?,
            Endpoint::List => serde_json::to_vec(&self.list().await)?,
            Endpoint::Capabilities => {
                let capabilities = self.driver.capabilities();
                let mut map = BTreeMap::new();
                map.insert(String::from("Scope"), capabilities.scope.to_string());
                serde_json::to_vec(&CapabilitiesResponse { capabilities: map })?
            }
        };
        Ok(encoded)
    }

    async fn create(&self, body: &[u8]) -> ErrResponse {
        let request: CreateRequest = match parse(body) {
            Ok(request) => request,
            Err(err) => return ErrResponse { err },
        };
        info!(volume = %request.name, "create requested");
        let options = request.opts.unwrap_or_default();
        let result = self.driver.create(&request.name, &options).await;
        log_outcome("create", &request.name, &result);
        ErrResponse {
            err: error_text(&result),
        }
    }

    async fn mountpoint(&self, endpoint: Endpoint, body: &[u8]) -> MountpointResponse {
        let request: NameRequest = match parse(body) {
            Ok(request) => request,
            Err(err) => {
                return MountpointResponse {
                    mountpoint: String::new(),
                    err,
                };
            }
        };
        let (operation, result) = if endpoint == Endpoint::Mount {
            info!(volume = %request.name, "mount requested");
            ("mount", self.driver.mount(&request.name).await)
        } else {
            ("path", self.driver.path(&request.name))
        };
        log_outcome(operation, &request.name, &result);
        match result {
            Ok(path) => MountpointResponse {
                mountpoint: path.into_string(),
                err: String::new(),
            },
            Err(err) => MountpointResponse {
                mountpoint: String::new(),
                err: err.to_string(),
            },
        }
    }

    async fn release(&self, endpoint: Endpoint, body: &[u8]) -> ErrResponse {
        let request: NameRequest = match parse(body) {
            Ok(request) => request,
            Err(err) => return ErrResponse { err },
        };
        let (operation, result) = if endpoint == Endpoint::Unmount {
            info!(volume = %request.name, "unmount requested");
            ("unmount", self.driver.unmount(&request.name).await)
        } else {
            info!(volume = %request.name, "remove requested");
            ("remove", self.driver.remove(&request.name).await)
        };
        log_outcome(operation, &request.name, &result);
        ErrResponse {
            err: error_text(&result),
        }
    }

    async fn get(&self, body: &[u8]) -> GetResponse {
        let request: NameRequest = match parse(body) {
            Ok(request) => request,
            Err(err) => {
                return GetResponse { volume: None, err };
            }
        };
        match self.driver.get(&request.name).await {
            Ok(entry) => GetResponse {
                volume: Some(volume_properties(&entry)),
                err: String::new(),
            },
            Err(err) => GetResponse {
                volume: None,
                err: err.to_string(),
            },
        }
    }

    async fn list(&self) -> ListResponse {
        match self.driver.list().await {
            Ok(entries) => ListResponse {
                volumes: entries.iter().map(volume_properties).collect(),
                err: String::new(),
            },
            Err(err) => {
                warn!(error = %err, "listing volumes failed");
                ListResponse {
                    volumes: Vec::new(),
                    err: err.to_string(),
                }
            }
        }
    }
}

fn log_outcome<T>(operation: &str, name: &str, result: &Result<T, VolumeError>) {
    match result {
        Ok(_) => info!(operation, volume = name, "request completed"),
        Err(err) => warn!(operation, volume = name, error = %err, "request failed"),
    }
}
