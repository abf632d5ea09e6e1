//! Version tokens at the HTTP boundary.
//!
//! A stream [`Version`] travels to clients as a weak entity tag, `W/"<n>"`.
//! Clients echo it back in `If-Match` on state-changing requests, and the
//! parsed value becomes the expected version of the request's
//! [`AppendScope`]. After a successful write the new version goes out again
//! as `ETag`.
//!
//! Only the weak form is understood. Strong tags, lists and `*` are treated
//! as malformed because a version number is never a byte-for-byte validator.

use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, header};
use thiserror::Error;
use uuid::Uuid;

use crate::{envelope::RequestMetadata, error::ErrorKind, scope::AppendScope, version::Version};

/// Request header carrying the correlation id of a logical operation.
pub const CORRELATION_ID: HeaderName = HeaderName::from_static("x-correlation-id");

/// Request header carrying the id of the message that caused this request.
pub const CAUSATION_ID: HeaderName = HeaderName::from_static("x-causation-id");

/// A request's `If-Match` precondition is unusable.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum PreconditionError {
    /// The method requires `If-Match` and the request has none.
    #[error("missing If-Match header")]
    Missing,
    /// The header is present but is not a weak version tag.
    #[error("malformed If-Match header `{0}`, expected W/\"<version>\"")]
    Malformed(String),
}

impl PreconditionError {
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        ErrorKind::InvalidPrecondition
    }

    /// `428 Precondition Required` when missing, `400 Bad Request` when
    /// malformed.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::Missing => StatusCode::PRECONDITION_REQUIRED,
            Self::Malformed(_) => StatusCode::BAD_REQUEST,
        }
    }
}

/// Format a version as a weak entity tag: `W/"7"`.
#[must_use]
pub fn format_etag(version: Version) -> String {
    format!("W/\"{version}\"")
}

/// Header value for an `ETag` response header.
///
/// `None` only if the formatted tag is not a valid header value.
#[must_use]
pub fn etag_value(version: Version) -> Option<HeaderValue> {
    HeaderValue::from_str(&format_etag(version)).ok()
}

/// Parse a weak entity tag back into a version.
///
/// # Errors
///
/// Returns [`PreconditionError::Malformed`] unless `raw` is exactly
/// `W/"<n>"` (surrounding whitespace allowed) with `n` a base-10 `u64`.
pub fn parse_if_match(raw: &str) -> Result<Version, PreconditionError> {
    let malformed = || PreconditionError::Malformed(raw.to_string());
    let quoted = raw.trim().strip_prefix("W/").ok_or_else(malformed)?;
    let digits = quoted
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
        .ok_or_else(malformed)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(malformed());
    }
    digits.parse::<Version>().map_err(|_| malformed())
}

/// Whether `method` must carry `If-Match`.
#[must_use]
pub fn requires_if_match(method: &Method) -> bool {
    *method == Method::PUT || *method == Method::PATCH || *method == Method::DELETE
}

/// Expected version carried by a request, if any.
///
/// PUT, PATCH and DELETE must send `If-Match`. POST may send it; when it
/// does it is validated like any other, and creation only accepts `W/"0"`.
/// Other methods never write, so the header is ignored for them.
///
/// # Errors
///
/// Returns [`PreconditionError::Missing`] when a method that requires the
/// header lacks it, and [`PreconditionError::Malformed`] when a header that
/// is considered does not parse.
pub fn expected_version(
    method: &Method,
    headers: &HeaderMap,
) -> Result<Option<Version>, PreconditionError> {
    let required = requires_if_match(method);
    if !required && *method != Method::POST {
        return Ok(None);
    }

    match headers.get(header::IF_MATCH) {
        None if required => Err(PreconditionError::Missing),
        None => Ok(None),
        Some(value) => {
            let raw = value.to_str().map_err(|_| {
                PreconditionError::Malformed(String::from_utf8_lossy(value.as_bytes()).into_owned())
            })?;
            parse_if_match(raw).map(Some)
        }
    }
}

/// Build the [`AppendScope`] for an inbound request.
///
/// The expected version comes from `If-Match` (see [`expected_version`]) and
/// the event metadata from the correlation headers. Unparsable correlation
/// headers are ignored rather than failing the request.
///
/// # Errors
///
/// Returns a [`PreconditionError`] when the `If-Match` precondition is
/// missing or malformed.
pub fn scope_for_request(
    method: &Method,
    headers: &HeaderMap,
) -> Result<AppendScope, PreconditionError> {
    let expected = expected_version(method, headers)?;
    let metadata = RequestMetadata::new(
        uuid_header(headers, &CORRELATION_ID),
        uuid_header(headers, &CAUSATION_ID),
    );
    tracing::trace!(%method, ?expected, ?metadata, "built append scope for request");
    Ok(AppendScope::new()
        .with_expected(expected)
        .with_metadata(metadata))
}

fn uuid_header(headers: &HeaderMap, name: &HeaderName) -> Option<Uuid> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| Uuid::parse_str(value.trim()).ok())
}

/// Set `ETag` on a response carrying `status`.
///
/// Only successful (2xx) responses advertise a version; the header is left
/// untouched otherwise. Returns whether the header was set.
pub fn apply_etag(status: StatusCode, headers: &mut HeaderMap, version: Version) -> bool {
    if !status.is_success() {
        return false;
    }
    let Some(value) = etag_value(version) else {
        tracing::warn!(%version, "version does not format as a header value");
        return false;
    };
    headers.insert(header::ETAG, value);
    true
}

/// HTTP status for a failure of the given kind.
///
/// `InvalidPrecondition` maps to `428`; use [`PreconditionError::status`]
/// to tell a missing header from a malformed one.
#[must_use]
pub const fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::AlreadyExists => StatusCode::CONFLICT,
        ErrorKind::ConcurrencyConflict => StatusCode::PRECONDITION_FAILED,
        ErrorKind::DomainRuleViolation => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::InvalidPrecondition => StatusCode::PRECONDITION_REQUIRED,
        ErrorKind::Transient | ErrorKind::Timeout | ErrorKind::Cancelled => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
