//! HTTP status codes used by the envelope layer.
//!
//! ```rust
//! use waypost::{Status, StatusResponse};
//!
//! let created = StatusResponse::new(Status::Created, serde_json::json!({ "_id": "42" }));
//! assert_eq!(created.status(), "success");
//!
//! let missing = StatusResponse::failure(Status::NotFound, "Item not found");
//! assert_eq!(missing.status(), "fail");
//! ```

/// The status codes the framework itself produces.
///
/// Handlers are free to use any other code through
/// [`StatusResponse::with_code`](crate::StatusResponse::with_code).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Status {
    // ── 2xx Success ───────────────────────────────────────────────────────────
    Ok,                  // 200
    Created,             // 201
    NoContent,           // 204

    // ── 4xx Client errors ─────────────────────────────────────────────────────
    BadRequest,          // 400
    Unauthorized,        // 401
    Forbidden,           // 403
    NotFound,            // 404
    MethodNotAllowed,    // 405
    TooManyRequests,     // 429

    // ── 5xx Server errors ─────────────────────────────────────────────────────
    InternalServerError, // 500
}

impl From<Status> for u16 {
    fn from(s: Status) -> u16 {
        match s {
            Status::Ok                  => 200,
            Status::Created             => 201,
            Status::NoContent           => 204,
            Status::BadRequest          => 400,
            Status::Unauthorized        => 401,
            Status::Forbidden           => 403,
            Status::NotFound            => 404,
            Status::MethodNotAllowed    => 405,
            Status::TooManyRequests     => 429,
            Status::InternalServerError => 500,
        }
    }
}

/// Envelope `status` string for a numeric code.
///
/// 1xx, 2xx and 3xx are `"success"`, 4xx is `"fail"`, everything else is
/// `"error"`.
pub fn envelope_status(code: u16) -> &'static str {
    match code {
        100..=399 => "success",
        400..=499 => "fail",
        _         => "error",
    }
}
