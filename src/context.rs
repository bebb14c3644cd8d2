//! Per-request state.
//!
//! A [`Context`] carries the transport request, the response being built,
//! the resolved `Controller.Action`, a lazily parsed query cache, and an
//! arbitrary key/value store shared by middlewares and the action.
//!
//! Contexts are pooled (see [`crate::pool`]). Everything a request leaves
//! behind is wiped on release and again on acquire, so values set while
//! serving one request are never visible to the next.

use std::any::Any;
use std::collections::HashMap;
use std::mem;
use std::path::Path;

use http::StatusCode;
use http::header::{CONTENT_TYPE, HeaderName, HeaderValue, LOCATION, SET_COOKIE};
use parking_lot::RwLock;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::cookie::Cookie;
use crate::descriptor::ActionDescriptor;
use crate::error::BoxError;
use crate::files;
use crate::http_error::HttpError;
use crate::ip::IpExtractor;
use crate::request::Request;
use crate::response::{JSON, Response, TEXT};

const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";
const MULTIPART: &str = "multipart/form-data";

/// Store key under which the router leaves the `Allow` value for the built-in
/// `405` action.
pub const ALLOWED_METHODS_KEY: &str = "corvid.allowed_methods";

type Store = HashMap<String, Box<dyn Any + Send + Sync>>;

pub struct Context {
    request: Request,
    response: Response,
    controller: String,
    action: String,
    path: String,
    query: Option<Vec<(String, String)>>,
    store: RwLock<Store>,
    ip: IpExtractor,
}

impl Context {
    pub(crate) fn new(ip: IpExtractor) -> Self {
        Self {
            request: Request::default(),
            response: Response::default(),
            controller: String::new(),
            action: String::new(),
            path: String::new(),
            query: None,
            store: RwLock::new(HashMap::new()),
            ip,
        }
    }

    /// Rebinds the context to a new request. Clears everything first so a
    /// reset never depends on the previous release having run.
    pub(crate) fn reset(&mut self, request: Request, controller: &str, action: &str, path: &str) {
        self.clear();
        self.request = request;
        self.controller.push_str(controller);
        self.action.push_str(action);
        self.path.push_str(path);
    }

    /// Drops all request state. String buffers and the store's allocation are
    /// kept for reuse.
    pub(crate) fn clear(&mut self) {
        self.request = Request::default();
        self.response = Response::default();
        self.controller.clear();
        self.action.clear();
        self.path.clear();
        self.query = None;
        self.store.get_mut().clear();
    }

    pub(crate) fn response_mut(&mut self) -> &mut Response {
        &mut self.response
    }

    pub(crate) fn take_response(&mut self) -> Response {
        mem::take(&mut self.response)
    }

    pub(crate) fn retarget(&mut self, controller: &str, action: &str) {
        self.controller.clear();
        self.controller.push_str(controller);
        self.action.clear();
        self.action.push_str(action);
    }

    pub fn controller(&self) -> &str { &self.controller }
    pub fn action(&self) -> &str { &self.action }

    /// The route pattern that matched, e.g. `/users/{id}`.
    pub fn path(&self) -> &str { &self.path }

    pub fn descriptor(&self) -> ActionDescriptor {
        ActionDescriptor::new(&self.controller, &self.action)
    }

    pub fn request(&self) -> &Request { &self.request }
    pub fn response(&self) -> &Response { &self.response }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.request.param(name)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.request.header(name)
    }

    pub fn body(&self) -> &[u8] {
        self.request.body()
    }

    /// Client address according to the configured [`IpExtractor`].
    pub fn real_ip(&self) -> String {
        self.ip.extract(&self.request)
    }

    /// Decoded query pairs, parsed on first use and cached for the request.
    pub fn query(&mut self) -> &[(String, String)] {
        let request = &self.request;
        self.query.get_or_insert_with(|| {
            request
                .query_string()
                .map(|qs| url::form_urlencoded::parse(qs.as_bytes()).into_owned().collect())
                .unwrap_or_default()
        })
    }

    pub fn query_param(&mut self, name: &str) -> Option<&str> {
        self.query()
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Form fields: the decoded `application/x-www-form-urlencoded` body
    /// first, then the query string. Other bodies contribute nothing;
    /// multipart bodies are refused with `415`.
    pub fn form_params(&mut self) -> Result<Vec<(String, String)>, HttpError> {
        let content_type = self.header(CONTENT_TYPE.as_str()).unwrap_or_default().to_ascii_lowercase();
        if content_type.starts_with(MULTIPART) {
            return Err(HttpError::new(415, "Multipart forms are not supported"));
        }

        let mut params: Vec<(String, String)> = if content_type.starts_with(FORM_URLENCODED) {
            url::form_urlencoded::parse(self.request.body()).into_owned().collect()
        } else {
            Vec::new()
        };
        params.extend(self.query().iter().cloned());
        Ok(params)
    }

    /// The first form field called `name`; see [`form_params`](Self::form_params).
    pub fn form_value(&mut self, name: &str) -> Option<String> {
        self.form_params()
            .ok()?
            .into_iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v)
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.request.cookie(name)
    }

    pub fn cookies(&self) -> Vec<(&str, &str)> {
        self.request.cookies().collect()
    }

    /// Deserialises the JSON body. Failures are `400 Bad Request`.
    pub fn bind<T: DeserializeOwned>(&self) -> Result<T, HttpError> {
        serde_json::from_slice(self.request.body())
            .map_err(|e| HttpError::bad_request("Invalid request body").with_attr("reason", e.to_string()))
    }

    // ── Store ────────────────────────────────────────────────────────────────

    pub fn set<V: Any + Send + Sync>(&self, key: impl Into<String>, value: V) {
        self.store.write().insert(key.into(), Box::new(value));
    }

    /// `None` when the key is absent or holds a different type.
    pub fn get<V: Any + Clone>(&self, key: &str) -> Option<V> {
        self.store.read().get(key)?.downcast_ref::<V>().cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.store.read().contains_key(key)
    }

    pub fn remove(&self, key: &str) -> bool {
        self.store.write().remove(key).is_some()
    }

    // ── Response writers ─────────────────────────────────────────────────────

    pub fn json<T: Serialize + ?Sized>(&mut self, status: u16, value: &T) -> Result<(), BoxError> {
        let body = serde_json::to_vec(value)?;
        self.response.write(status_code(status), JSON, body);
        Ok(())
    }

    pub fn text(&mut self, status: u16, body: impl Into<String>) {
        self.response.write(status_code(status), TEXT, body.into());
    }

    /// Sets the status without touching the body.
    pub fn status(&mut self, status: u16) {
        self.response.set_status(status_code(status));
    }

    pub fn no_content(&mut self) {
        self.status(204);
    }

    pub fn redirect(&mut self, status: u16, location: &str) -> Result<(), HttpError> {
        if !(300..=308).contains(&status) {
            return Err(HttpError::internal("Invalid redirect status code"));
        }
        self.set_header(LOCATION, location)?;
        self.status(status);
        Ok(())
    }

    /// Appends a `Set-Cookie` header; earlier cookies are kept.
    pub fn set_cookie(&mut self, cookie: &Cookie) -> Result<(), HttpError> {
        let value = HeaderValue::try_from(cookie.to_string())
            .map_err(|_| HttpError::internal("Invalid cookie").with_attr("cookie", cookie.name()))?;
        self.response.append_header(SET_COOKIE, value);
        Ok(())
    }

    /// Sends the file at `path`, relative to the working directory unless
    /// absolute. A directory sends its `index.html`; a missing file is `404`.
    pub fn file(&mut self, path: impl AsRef<Path>) -> Result<(), HttpError> {
        files::send(self, path.as_ref(), files::DEFAULT_INDEX)
    }

    /// Sends `path` resolved under `root`. Paths escaping `root` are `404`.
    pub fn file_in(&mut self, root: impl AsRef<Path>, path: &str) -> Result<(), HttpError> {
        let resolved = files::resolve(root.as_ref(), path).ok_or_else(|| HttpError::not_found("File not found"))?;
        files::send(self, &resolved, files::DEFAULT_INDEX)
    }

    /// Sends the file as a download saved under `name`.
    pub fn attachment(&mut self, path: impl AsRef<Path>, name: &str) -> Result<(), HttpError> {
        files::send_as(self, path.as_ref(), name, "attachment")
    }

    /// Sends the file for display in the browser, named `name`.
    pub fn inline(&mut self, path: impl AsRef<Path>, name: &str) -> Result<(), HttpError> {
        files::send_as(self, path.as_ref(), name, "inline")
    }

    pub fn set_header(&mut self, name: HeaderName, value: &str) -> Result<(), HttpError> {
        let value = HeaderValue::try_from(value)
            .map_err(|_| HttpError::internal("Invalid header value").with_attr("header", name.as_str()))?;
        self.response.insert_header(name, value);
        Ok(())
    }
}

fn status_code(status: u16) -> StatusCode {
    StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

#[cfg(test)]
mod tests {
    use http::Method;

    use super::*;

    fn context(target: &str) -> Context {
        let mut ctx = Context::new(IpExtractor::Direct);
        ctx.reset(Request::new(Method::GET, target), "ItemsController", "Index", "/items");
        ctx
    }

    #[test]
    fn store_round_trips_typed_values() {
        let ctx = context("/items");
        ctx.set("user_id", 7_u64);
        assert_eq!(ctx.get::<u64>("user_id"), Some(7));
        assert_eq!(ctx.get::<String>("user_id"), None);
        assert!(ctx.remove("user_id"));
        assert!(!ctx.contains("user_id"));
    }

    #[test]
    fn reset_clears_previous_request() {
        let mut ctx = context("/items?page=2");
        ctx.set("secret", "token".to_owned());
        assert_eq!(ctx.query_param("page"), Some("2"));
        ctx.text(201, "created");

        ctx.reset(Request::new(Method::POST, "/users"), "UsersController", "Create", "/users");

        assert_eq!(ctx.get::<String>("secret"), None);
        assert_eq!(ctx.query_param("page"), None);
        assert_eq!(ctx.controller(), "UsersController");
        assert_eq!(ctx.action(), "Create");
        assert_eq!(ctx.path(), "/users");
        assert_eq!(ctx.response().status(), StatusCode::OK);
        assert!(ctx.response().body().is_empty());
    }

    #[test]
    fn clear_zeroes_identity() {
        let mut ctx = context("/items");
        ctx.clear();
        assert!(ctx.controller().is_empty());
        assert!(ctx.action().is_empty());
        assert!(ctx.path().is_empty());
    }

    #[test]
    fn query_is_decoded() {
        let mut ctx = context("/items?q=red%20shoes&tag=a&tag=b");
        assert_eq!(ctx.query_param("q"), Some("red shoes"));
        assert_eq!(ctx.query().len(), 3);
    }

    #[test]
    fn json_writes_body_and_content_type() {
        let mut ctx = context("/items");
        ctx.json(200, &serde_json::json!({"id": 1})).unwrap();
        assert_eq!(ctx.response().body(), br#"{"id":1}"#);
        assert_eq!(ctx.response().header("content-type"), Some("application/json"));
    }

    #[test]
    fn redirect_rejects_non_3xx() {
        let mut ctx = context("/items");
        let err = ctx.redirect(200, "/elsewhere").unwrap_err();
        assert_eq!(err.code, 500);

        ctx.redirect(302, "/elsewhere").unwrap();
        assert_eq!(ctx.response().status(), StatusCode::FOUND);
        assert_eq!(ctx.response().header("location"), Some("/elsewhere"));
    }

    #[test]
    fn form_params_put_body_before_query() {
        let mut ctx = Context::new(IpExtractor::Direct);
        ctx.reset(
            Request::new(Method::POST, "/signup?source=ad&name=query")
                .with_header("content-type", "application/x-www-form-urlencoded; charset=utf-8")
                .with_body("name=Ada+Lovelace&email=ada%40example.com"),
            "A",
            "B",
            "/",
        );
        let params = ctx.form_params().unwrap();
        assert_eq!(params[0], ("name".to_owned(), "Ada Lovelace".to_owned()));
        assert_eq!(params.len(), 4);
        assert_eq!(ctx.form_value("name").as_deref(), Some("Ada Lovelace"));
        assert_eq!(ctx.form_value("email").as_deref(), Some("ada@example.com"));
        assert_eq!(ctx.form_value("source").as_deref(), Some("ad"));
    }

    #[test]
    fn form_params_ignore_json_and_refuse_multipart() {
        let mut ctx = Context::new(IpExtractor::Direct);
        ctx.reset(
            Request::new(Method::POST, "/?a=1")
                .with_header("content-type", "application/json")
                .with_body(r#"{"a":2}"#),
            "A",
            "B",
            "/",
        );
        assert_eq!(ctx.form_params().unwrap(), [("a".to_owned(), "1".to_owned())]);

        ctx.reset(
            Request::new(Method::POST, "/").with_header("content-type", "multipart/form-data; boundary=x"),
            "A",
            "B",
            "/",
        );
        assert_eq!(ctx.form_params().unwrap_err().code, 415);
        assert_eq!(ctx.form_value("a"), None);
    }

    #[test]
    fn cookies_are_read_and_appended() {
        let mut ctx = Context::new(IpExtractor::Direct);
        ctx.reset(
            Request::new(Method::GET, "/").with_header("cookie", "session=abc; theme=dark"),
            "A",
            "B",
            "/",
        );
        assert_eq!(ctx.cookie("session"), Some("abc"));
        assert_eq!(ctx.cookies(), [("session", "abc"), ("theme", "dark")]);

        ctx.set_cookie(&Cookie::new("session", "xyz").http_only(true)).unwrap();
        ctx.set_cookie(&Cookie::removal("theme")).unwrap();
        let set: Vec<_> = ctx
            .response()
            .headers()
            .get_all("set-cookie")
            .iter()
            .map(|v| v.to_str().unwrap().to_owned())
            .collect();
        assert_eq!(set.len(), 2);
        assert_eq!(set[0], "session=xyz; HttpOnly");
        assert!(set[1].starts_with("theme=; Max-Age=0"));
    }

    #[test]
    fn file_in_rejects_escape_and_inline_sets_disposition() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("logo.png"), [0x89, b'P', b'N', b'G']).unwrap();

        let mut ctx = context("/files/logo.png");
        ctx.file_in(dir.path(), "logo.png").unwrap();
        assert_eq!(ctx.response().header("content-type"), Some("image/png"));

        let mut ctx = context("/files/x");
        assert_eq!(ctx.file_in(dir.path(), "../etc/passwd").unwrap_err().code, 404);

        let mut ctx = context("/files/x");
        ctx.inline(dir.path().join("logo.png"), "logo.png").unwrap();
        assert_eq!(ctx.response().header("content-disposition"), Some(r#"inline; filename="logo.png""#));
        assert_eq!(ctx.response().body().len(), 4);

        let mut ctx = context("/files/x");
        ctx.file(dir.path().join("logo.png")).unwrap();
        assert_eq!(ctx.response().header("content-disposition"), None);

        let mut ctx = context("/files/x");
        ctx.attachment(dir.path().join("logo.png"), "brand.png").unwrap();
        assert_eq!(
            ctx.response().header("content-disposition"),
            Some(r#"attachment; filename="brand.png""#)
        );
        assert_eq!(ctx.file(dir.path().join("gone.png")).unwrap_err().code, 404);
    }

    #[test]
    fn bind_reports_bad_request() {
        let mut ctx = Context::new(IpExtractor::Direct);
        ctx.reset(Request::new(Method::POST, "/").with_body("{"), "A", "B", "/");
        let err = ctx.bind::<serde_json::Value>().unwrap_err();
        assert_eq!(err.code, 400);
    }
}
