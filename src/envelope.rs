//! The JSON response envelope and the [`IntoReply`] conversion trait.
//!
//! Every success and failure body shares one wire shape:
//!
//! ```json
//! { "status": "success", "data": { "authToken": "..." }, "extra": { ... } }
//! ```
//!
//! `status` is derived from the HTTP code (see
//! [`envelope_status`](crate::status::envelope_status)), so a client needs a
//! single parser for both paths.

use serde_json::{Value, json};

use crate::response::Response;
use crate::status::{Status, envelope_status};

/// What a handler hands back to the dispatcher.
#[derive(Clone, Debug)]
pub enum Payload {
    /// Wrapped in the envelope as `data`.
    Json(Value),
    /// Written verbatim; no envelope.
    Text(String),
}

/// A status code plus the body, headers and `extra` the dispatcher renders.
#[derive(Clone, Debug)]
pub struct StatusResponse {
    pub status_code: u16,
    pub data: Payload,
    pub headers: Vec<(String, String)>,
    pub extra: Option<Value>,
}

impl StatusResponse {
    pub fn new(status: Status, data: Value) -> Self {
        Self::with_code(status.into(), data)
    }

    /// Envelope with an arbitrary numeric status code.
    pub fn with_code(status_code: u16, data: Value) -> Self {
        Self { status_code, data: Payload::Json(data), headers: Vec::new(), extra: None }
    }

    /// A literal string body, written without the envelope.
    pub fn text(status: Status, body: impl Into<String>) -> Self {
        Self {
            status_code: status.into(),
            data: Payload::Text(body.into()),
            headers: Vec::new(),
            extra: None,
        }
    }

    /// `200` with `data`.
    pub fn ok(data: Value) -> Self {
        Self::new(Status::Ok, data)
    }

    /// `201` with `data`.
    pub fn created(data: Value) -> Self {
        Self::new(Status::Created, data)
    }

    /// A failure envelope whose `data` is `{"message": ...}`.
    pub fn failure(status: Status, message: impl Into<String>) -> Self {
        Self::new(status, json!({ "message": message.into() }))
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::failure(Status::BadRequest, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::failure(Status::Unauthorized, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::failure(Status::Forbidden, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::failure(Status::NotFound, message)
    }

    pub fn internal_error() -> Self {
        Self::failure(Status::InternalServerError, "Internal server error")
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_owned(), value.to_owned()));
        self
    }

    pub fn extra(mut self, extra: Value) -> Self {
        self.extra = Some(extra);
        self
    }

    /// The envelope `status` string for this response's code.
    pub fn status(&self) -> &'static str {
        envelope_status(self.status_code)
    }

    /// Renders the transport response.
    ///
    /// `defaults` are applied first; a handler-supplied header replaces a
    /// default with the same name (case-insensitive).
    pub(crate) fn render(self, defaults: &[(String, String)], pretty: bool) -> Response {
        let mut headers: Vec<(String, String)> = defaults.iter()
            .filter(|(k, _)| !self.headers.iter().any(|(h, _)| h.eq_ignore_ascii_case(k)))
            .cloned()
            .collect();
        let status = self.status();
        headers.extend(self.headers);

        let body = match self.data {
            Payload::Text(text) => text.into_bytes(),
            Payload::Json(data) => {
                let mut envelope = json!({ "status": status, "data": data });
                if let Some(extra) = self.extra {
                    envelope["extra"] = extra;
                }
                let encoded = if pretty {
                    serde_json::to_vec_pretty(&envelope)
                } else {
                    serde_json::to_vec(&envelope)
                };
                // A `Value` always serializes; the fallback only guards the type signature.
                encoded.unwrap_or_else(|_| br#"{"status":"error","data":null}"#.to_vec())
            }
        };

        Response { body: body.into(), headers, status: self.status_code }
    }
}

/// The outcome of one handler invocation.
#[derive(Debug)]
pub enum Reply {
    /// Rendered through the envelope with the default headers.
    Envelope(StatusResponse),
    /// Already a complete transport response; written as-is.
    Handled(Response),
    /// The handler failed. The detail is logged and the caller gets a 500.
    Failed(String),
}

/// Conversion into a handler [`Reply`].
///
/// Implemented for [`StatusResponse`], raw [`Response`], bare JSON values
/// (a `200` envelope) and `Result`s of those whose error is displayable.
///
/// ```rust,ignore
/// async fn show(ctx: RequestContext) -> Result<StatusResponse, waypost::Error> {
///     let doc = articles.find_one(ctx.url_param("id").unwrap_or_default()).await?;
///     Ok(StatusResponse::ok(doc))
/// }
/// ```
pub trait IntoReply {
    fn into_reply(self) -> Reply;
}

impl IntoReply for Reply {
    fn into_reply(self) -> Reply { self }
}

impl IntoReply for StatusResponse {
    fn into_reply(self) -> Reply { Reply::Envelope(self) }
}

impl IntoReply for Response {
    fn into_reply(self) -> Reply { Reply::Handled(self) }
}

impl IntoReply for Value {
    fn into_reply(self) -> Reply { Reply::Envelope(StatusResponse::ok(self)) }
}

impl<T, E> IntoReply for Result<T, E>
where
    T: IntoReply,
    E: std::fmt::Display,
{
    fn into_reply(self) -> Reply {
        match self {
            Ok(reply) => reply.into_reply(),
            Err(e) => Reply::Failed(e.to_string()),
        }
    }
}
