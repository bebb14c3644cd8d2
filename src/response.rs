//! Outgoing HTTP response type.
//!
//! Handlers never build a [`Response`] directly: they write into the one held
//! by the [`Context`](crate::Context), which dispatch hands back to the
//! transport once the chain has returned.

use bytes::Bytes;
use http::header::{CONTENT_TYPE, HeaderName, HeaderValue};
use http::{HeaderMap, StatusCode};
use http_body_util::Full;

pub(crate) const JSON: &str = "application/json";
pub(crate) const TEXT: &str = "text/plain; charset=utf-8";

/// An outgoing HTTP response. Defaults to `200 OK` with no body.
#[derive(Debug, Default)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl Response {
    pub fn status(&self) -> StatusCode { self.status }
    pub fn headers(&self) -> &HeaderMap { &self.headers }
    pub fn body(&self) -> &[u8] { &self.body }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)?.to_str().ok()
    }

    pub(crate) fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub(crate) fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    /// Replaces status and body. Headers already set (e.g. `Allow`) survive,
    /// the content type is overwritten.
    pub(crate) fn write(&mut self, status: StatusCode, content_type: &'static str, body: impl Into<Bytes>) {
        self.status = status;
        self.headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
        self.body = body.into();
    }

    /// [`write`](Self::write) for a content type only known at runtime.
    pub(crate) fn write_typed(&mut self, status: StatusCode, content_type: HeaderValue, body: impl Into<Bytes>) {
        self.status = status;
        self.headers.insert(CONTENT_TYPE, content_type);
        self.body = body.into();
    }

    pub(crate) fn insert_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.headers.insert(name, value);
    }

    /// Adds a value without replacing existing ones (`Set-Cookie`).
    pub(crate) fn append_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.headers.append(name, value);
    }

    /// Bare `500` used when the transport cannot reach dispatch at all.
    pub(crate) fn internal_error() -> Self {
        let mut response = Self::default();
        response.write(
            StatusCode::INTERNAL_SERVER_ERROR,
            JSON,
            r#"{"code":500,"message":"Internal Server Error"}"#,
        );
        response
    }

    pub(crate) fn into_http(self) -> http::Response<Full<Bytes>> {
        let mut res = http::Response::new(Full::new(self.body));
        *res.status_mut() = self.status;
        *res.headers_mut() = self.headers;
        res
    }
}

#[cfg(test)]
mod tests {
    use http::header::ALLOW;

    use super::*;

    #[test]
    fn write_keeps_existing_headers() {
        let mut res = Response::default();
        res.insert_header(ALLOW, HeaderValue::from_static("GET"));
        res.write(StatusCode::METHOD_NOT_ALLOWED, JSON, "{}");

        assert_eq!(res.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(res.header("allow"), Some("GET"));
        assert_eq!(res.header("content-type"), Some(JSON));
    }

    #[test]
    fn converts_into_http_response() {
        let mut res = Response::default();
        res.write(StatusCode::CREATED, TEXT, "done");
        let http = res.into_http();
        assert_eq!(http.status(), StatusCode::CREATED);
        assert_eq!(http.headers()[CONTENT_TYPE], TEXT);
    }
}
