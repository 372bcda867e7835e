//! Provider abstraction for launching and destroying backend servers.

use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

/// Immutable snapshot of a backend server.
///
/// Snapshots are never mutated in place; callers re-fetch through
/// [`Provider::get_server`] whenever they need fresh state.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Server {
    /// Provider specific identifier.
    pub id: String,
    /// Server name as recorded by the backend.
    pub name: String,
    /// Identifier of the image the server was launched from, when reported.
    pub image: Option<String>,
    /// Backend-defined state string. The crate only ever compares it against
    /// `"running"` and otherwise treats it as opaque.
    pub state: String,
    /// Public IPv4 address, once the backend has assigned one.
    pub public_address: Option<String>,
    /// Creation timestamp as reported by the backend.
    pub created_at: String,
}

impl Server {
    /// Returns `true` when the backend reports the server as running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state == "running"
    }
}

/// Parameters required to launch a new server.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LaunchRequest {
    /// Name to assign to the server.
    pub name: String,
    /// Concrete image identifier to boot from.
    pub image: String,
    /// OS series the image was resolved from.
    pub series: String,
}

impl LaunchRequest {
    /// Starts a builder for a [`LaunchRequest`].
    #[must_use]
    pub fn builder() -> LaunchRequestBuilder {
        LaunchRequestBuilder::default()
    }

    /// Validates the request, returning a descriptive error when a required
    /// field is missing.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Validation`] when any field is empty.
    pub fn validate(&self) -> Result<(), ProviderError> {
        if self.name.is_empty() {
            return Err(ProviderError::Validation("name".to_owned()));
        }
        if self.image.is_empty() {
            return Err(ProviderError::Validation("image".to_owned()));
        }
        if self.series.is_empty() {
            return Err(ProviderError::Validation("series".to_owned()));
        }
        Ok(())
    }
}

/// Builder for [`LaunchRequest`] that defers trimming and validation to
/// construction.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct LaunchRequestBuilder {
    name: String,
    image: String,
    series: String,
}

impl LaunchRequestBuilder {
    /// Sets the server name.
    #[must_use]
    pub fn name(mut self, value: impl Into<String>) -> Self {
        self.name = value.into();
        self
    }

    /// Sets the image identifier.
    #[must_use]
    pub fn image(mut self, value: impl Into<String>) -> Self {
        self.image = value.into();
        self
    }

    /// Sets the OS series.
    #[must_use]
    pub fn series(mut self, value: impl Into<String>) -> Self {
        self.series = value.into();
        self
    }

    /// Builds and validates the [`LaunchRequest`], trimming string inputs.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Validation`] when any required field is empty.
    pub fn build(self) -> Result<LaunchRequest, ProviderError> {
        let request = LaunchRequest {
            name: self.name.trim().to_owned(),
            image: self.image.trim().to_owned(),
            series: self.series.trim().to_owned(),
        };
        request.validate()?;
        Ok(request)
    }
}

/// Errors raised by providers.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ProviderError {
    /// Raised when a request is missing a required field.
    #[error("missing or empty field: {0}")]
    Validation(String),
    /// Raised when the requested series has no catalog entry.
    #[error("no image catalog entry for series '{series}'")]
    UnknownSeries {
        /// Series requested by the caller.
        series: String,
    },
    /// Raised when the image catalog lookup yields no usable image.
    #[error("image '{label}' (arch {arch}) not found in zone {zone}")]
    ImageNotFound {
        /// Image label the series mapped to.
        label: String,
        /// Architecture requested.
        arch: String,
        /// Zone used for the lookup.
        zone: String,
    },
    /// Raised when a server lookup finds nothing.
    #[error("server {server_id} not found")]
    NotFound {
        /// Provider server identifier.
        server_id: String,
    },
    /// Raised when the backend returns an error status.
    #[error("provider API error: {message}")]
    Api {
        /// Message returned by the backend, or a transport error description.
        message: String,
    },
    /// Raised when the backend returns an empty or unparseable body.
    #[error("provider returned no usable response from {endpoint}")]
    EmptyResponse {
        /// Endpoint that produced the response.
        endpoint: String,
    },
}

impl From<scaleway_rs::ScalewayError> for ProviderError {
    fn from(value: scaleway_rs::ScalewayError) -> Self {
        Self::Api {
            message: value.to_string(),
        }
    }
}

/// Future returned by provider operations.
pub type ProviderFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ProviderError>> + Send + 'a>>;

/// Interface to the cloud backend consumed by operations and commands.
///
/// Implementations must tolerate concurrent invocation; the worker pool calls
/// into a shared handle from several tasks with no serialisation.
pub trait Provider: Send + Sync {
    /// Creates and boots a new server.
    fn launch_server<'a>(&'a self, request: &'a LaunchRequest) -> ProviderFuture<'a, Server>;

    /// Fetches a fresh snapshot of one server.
    fn get_server<'a>(&'a self, server_id: &'a str) -> ProviderFuture<'a, Server>;

    /// Terminates a server and releases its resources.
    fn terminate_server<'a>(&'a self, server_id: &'a str) -> ProviderFuture<'a, ()>;

    /// Lists all servers visible to the configured credentials.
    fn list_servers(&self) -> ProviderFuture<'_, Vec<Server>>;

    /// Resolves an OS series to a concrete image identifier.
    fn resolve_image<'a>(&'a self, series: &'a str) -> ProviderFuture<'a, String>;
}
