//! Single GET requests tracked in the store under their full URL.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::notification::{Dispatch, RequestNotification, RequestState};
use crate::store::{RequestRecord, Store};

/// Error returned by a [`Transport`].
#[derive(Error, Debug)]
pub enum TransportError {
    /// The server answered with a non-success status.
    #[error("request failed with status code {0}")]
    Status(u16),

    /// Anything else: connection, decoding, ...
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Performs HTTP GETs on behalf of [`ApiRequest`].
#[async_trait]
pub trait Transport: Send + Sync {
    /// Fetch `url` and decode its body as JSON.
    async fn get(&self, url: &str) -> Result<Value, TransportError>;
}

/// A failed single fetch.
#[derive(Error, Debug)]
#[error("GET {url} failed: {source}")]
pub struct RequestError {
    pub url: String,
    #[source]
    pub source: TransportError,
}

/// Where a request's URL comes from.
pub enum UrlSource<A> {
    /// The same URL for every call.
    Fixed(String),
    /// A URL computed from the call arguments.
    Build(Arc<dyn Fn(&A) -> String + Send + Sync>),
}

impl<A> UrlSource<A> {
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&A) -> String + Send + Sync + 'static,
    {
        Self::Build(Arc::new(f))
    }

    fn resolve(&self, args: &A) -> String {
        match self {
            Self::Fixed(url) => url.clone(),
            Self::Build(f) => f(args),
        }
    }
}

impl<A> Clone for UrlSource<A> {
    fn clone(&self) -> Self {
        match self {
            Self::Fixed(url) => Self::Fixed(url.clone()),
            Self::Build(f) => Self::Build(f.clone()),
        }
    }
}

impl<A> From<&str> for UrlSource<A> {
    fn from(url: &str) -> Self {
        Self::Fixed(url.to_string())
    }
}

impl<A> From<String> for UrlSource<A> {
    fn from(url: String) -> Self {
        Self::Fixed(url)
    }
}

/// A GET endpoint whose lifecycle is reported to the store.
pub struct ApiRequest<A> {
    url: UrlSource<A>,
    transport: Arc<dyn Transport>,
}

impl<A> Clone for ApiRequest<A> {
    fn clone(&self) -> Self {
        Self {
            url: self.url.clone(),
            transport: self.transport.clone(),
        }
    }
}

impl<A> ApiRequest<A> {
    pub fn new(url: impl Into<UrlSource<A>>, transport: Arc<dyn Transport>) -> Self {
        Self {
            url: url.into(),
            transport,
        }
    }

    /// The full URL for these arguments. It doubles as the store key.
    pub fn url(&self, args: &A) -> String {
        self.url.resolve(args)
    }

    /// Bind call-time arguments, producing a thunk ready to dispatch.
    pub fn request(&self, args: &A) -> RequestThunk {
        self.request_url(self.url(args))
    }

    pub(crate) fn request_url(&self, url: String) -> RequestThunk {
        RequestThunk {
            url,
            transport: self.transport.clone(),
        }
    }

    /// Current status of the request for these arguments.
    pub fn status(&self, store: &Store, args: &A) -> RequestRecord {
        store.request_status(&self.url(args))
    }

    /// Rewrite the cached data for these arguments without refetching.
    pub fn patch<F>(&self, args: &A, dispatch: &dyn Dispatch, transform: F)
    where
        F: Fn(Value) -> Value + Send + Sync + 'static,
    {
        let state = RequestState::Patch(Arc::new(transform));
        dispatch.dispatch(RequestNotification::new(self.url(args), state).into());
    }
}

/// A request bound to its URL, waiting for a dispatcher.
pub struct RequestThunk {
    url: String,
    transport: Arc<dyn Transport>,
}

impl RequestThunk {
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Perform the fetch, reporting LOADING then SUCCESS or ERROR.
    ///
    /// The failure is also returned so a task step can propagate it.
    pub async fn dispatch(self, dispatch: &dyn Dispatch) -> Result<Value, RequestError> {
        dispatch.dispatch(RequestNotification::new(self.url.clone(), RequestState::Loading).into());
        debug!(url = %self.url, "request started");

        let outcome = self.transport.get(&self.url).await;
        match outcome {
            Ok(data) => {
                let notification = RequestNotification::new(
                    self.url.clone(),
                    RequestState::Success { data: data.clone() },
                );
                dispatch.dispatch(notification.into());
                Ok(data)
            }
            Err(source) => {
                let err = RequestError {
                    url: self.url.clone(),
                    source,
                };
                let notification = RequestNotification::new(
                    self.url,
                    RequestState::Error {
                        error: err.to_string(),
                    },
                );
                dispatch.dispatch(notification.into());
                Err(err)
            }
        }
    }
}
