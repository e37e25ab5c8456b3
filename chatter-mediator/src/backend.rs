//! Room service collaborator.
//!
//! Defines the [`Backend`] trait the mediator calls for every client message,
//! and [`HttpBackend`], which reaches a room service over HTTP. Each call
//! returns the ordered [`MessageCollection`] the mediator fans back out.

use std::time::Duration;

use chatter_proto::message::{Goodbye, Hello, MessageCollection, RoomCommand, USER_ID_HEADER};
use serde::Serialize;
use url::Url;

/// Path of the room service endpoint receiving `roomHello` payloads.
pub const HELLO_PATH: &str = "/hello";

/// Path of the room service endpoint receiving `roomGoodbye` payloads.
pub const GOODBYE_PATH: &str = "/goodbye";

/// Path of the room service endpoint receiving `room` command payloads.
pub const COMMAND_PATH: &str = "/room";

/// Errors raised when the room service cannot produce a reply.
///
/// Any of these drops the triggering message; the session stays open.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// The request could not be sent or the response not read.
    #[error("backend unavailable: {0}")]
    Http(#[from] reqwest::Error),

    /// The room service answered with a non-success status.
    #[error("backend returned HTTP {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, for diagnostics.
        body: String,
    },

    /// The response body is not a message collection.
    #[error("invalid backend response: {0}")]
    Decode(#[from] serde_json::Error),

    /// The call did not complete within the configured deadline.
    #[error("backend did not answer within {0:?}")]
    Timeout(Duration),
}

/// Request/response room service the mediator forwards client messages to.
///
/// Implementations receive the decoded payload and return the replies to
/// route. The caller's identity travels inside each payload's `UserInfo`.
pub trait Backend: Send + Sync + 'static {
    /// Forwards a `roomHello`.
    fn hello(
        &self,
        hello: &Hello,
    ) -> impl std::future::Future<Output = Result<MessageCollection, BackendError>> + Send;

    /// Forwards a `roomGoodbye`.
    fn goodbye(
        &self,
        goodbye: &Goodbye,
    ) -> impl std::future::Future<Output = Result<MessageCollection, BackendError>> + Send;

    /// Forwards a `room` chat or command message.
    fn command(
        &self,
        command: &RoomCommand,
    ) -> impl std::future::Future<Output = Result<MessageCollection, BackendError>> + Send;
}

/// [`Backend`] that POSTs payloads as JSON to a room service.
///
/// Requests go to `<base_url>/hello`, `<base_url>/goodbye` and
/// `<base_url>/room`, carrying the user id in the `X-Game-On-UserID` header.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpBackend {
    /// Creates a backend for the room service at `base_url`.
    #[must_use]
    pub fn new(base_url: Url) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    /// Creates a backend using a preconfigured HTTP client.
    #[must_use]
    pub const fn with_client(client: reqwest::Client, base_url: Url) -> Self {
        Self { client, base_url }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.base_url.as_str().trim_end_matches('/'))
    }

    async fn post<T: Serialize + Sync>(
        &self,
        path: &str,
        user_id: &str,
        body: &T,
    ) -> Result<MessageCollection, BackendError> {
        let url = self.endpoint(path);
        tracing::debug!(url = %url, user_id = %user_id, "calling room service");

        let response = self
            .client
            .post(&url)
            .header(USER_ID_HEADER, user_id)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response.bytes().await?;
        tracing::debug!(url = %url, status = %status, len = bytes.len(), "room service replied");
        Ok(serde_json::from_slice(&bytes)?)
    }
}

impl Backend for HttpBackend {
    async fn hello(&self, hello: &Hello) -> Result<MessageCollection, BackendError> {
        self.post(HELLO_PATH, &hello.user.user_id, hello).await
    }

    async fn goodbye(&self, goodbye: &Goodbye) -> Result<MessageCollection, BackendError> {
        self.post(GOODBYE_PATH, &goodbye.user.user_id, goodbye).await
    }

    async fn command(&self, command: &RoomCommand) -> Result<MessageCollection, BackendError> {
        self.post(COMMAND_PATH, &command.user.user_id, command).await
    }
}
