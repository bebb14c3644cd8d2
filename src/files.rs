//! File responses and the built-in static file controller.
//!
//! [`Context::file`](crate::Context::file) and friends read a file from disk
//! and write it as the response body, with the content type guessed from the
//! extension and `Last-Modified` set from the file's mtime. A request whose
//! `If-Modified-Since` is not older than the file gets `304` with no body. A
//! directory serves its index page.
//!
//! When `static.enabled` is set, [`App::build`](crate::App::build) registers
//! [`StaticController`] and routes `GET {prefix}` and `GET {prefix}/{*path}`
//! to it, serving files under `static.root`.

use std::fs;
use std::io;
use std::path::{Component as PathComponent, Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use http::StatusCode;
use http::header::{CONTENT_DISPOSITION, HeaderValue, IF_MODIFIED_SINCE, LAST_MODIFIED};
use tracing::warn;

use crate::component::{Actions, Component, Controller};
use crate::config::StaticConfig;
use crate::context::Context;
use crate::error::BoxError;
use crate::http_error::HttpError;
use crate::resources::Resources;
use crate::router::Routes;

pub(crate) const DEFAULT_INDEX: &str = "index.html";

/// Writes the file at `path`, or `index` inside it when `path` is a
/// directory.
pub(crate) fn send(ctx: &mut Context, path: &Path, index: &str) -> Result<(), HttpError> {
    let mut path = path.to_path_buf();
    let mut meta = fs::metadata(&path).map_err(|e| read_error(&path, e))?;
    if meta.is_dir() {
        path.push(index);
        meta = fs::metadata(&path).map_err(|e| read_error(&path, e))?;
    }
    if !meta.is_file() {
        return Err(not_found());
    }

    let modified = meta.modified().ok().map(whole_seconds);
    if let Some(modified) = modified {
        ctx.set_header(LAST_MODIFIED, &httpdate::fmt_http_date(modified))?;
        let since = ctx
            .header(IF_MODIFIED_SINCE.as_str())
            .and_then(|value| httpdate::parse_http_date(value).ok());
        if since.is_some_and(|since| modified <= since) {
            ctx.status(StatusCode::NOT_MODIFIED.as_u16());
            return Ok(());
        }
    }

    let body = fs::read(&path).map_err(|e| read_error(&path, e))?;
    let content_type = mime_guess::from_path(&path).first_or_octet_stream();
    let content_type = HeaderValue::try_from(content_type.as_ref())
        .unwrap_or(HeaderValue::from_static("application/octet-stream"));
    ctx.response_mut().write_typed(StatusCode::OK, content_type, body);
    Ok(())
}

/// [`send`] with a `Content-Disposition` of `disposition` naming `name`.
pub(crate) fn send_as(
    ctx: &mut Context,
    path: &Path,
    name: &str,
    disposition: &str,
) -> Result<(), HttpError> {
    let escaped = name.replace('\\', "\\\\").replace('"', "\\\"");
    ctx.set_header(CONTENT_DISPOSITION, &format!("{disposition}; filename=\"{escaped}\""))?;
    send(ctx, path, DEFAULT_INDEX)
}

/// Maps a request path onto `root`. Percent-escapes are decoded; `..`,
/// absolute paths and prefixes yield `None`.
pub(crate) fn resolve(root: &Path, request_path: &str) -> Option<PathBuf> {
    let decoded = percent_encoding::percent_decode_str(request_path.trim_start_matches('/'))
        .decode_utf8()
        .ok()?;
    let mut resolved = root.to_path_buf();
    for component in Path::new(decoded.as_ref()).components() {
        match component {
            PathComponent::Normal(part) => resolved.push(part),
            PathComponent::CurDir => {}
            PathComponent::ParentDir | PathComponent::RootDir | PathComponent::Prefix(_) => return None,
        }
    }
    Some(resolved)
}

fn whole_seconds(time: SystemTime) -> SystemTime {
    time.duration_since(UNIX_EPOCH)
        .map(|d| UNIX_EPOCH + Duration::from_secs(d.as_secs()))
        .unwrap_or(time)
}

fn not_found() -> HttpError {
    HttpError::not_found("File not found")
}

fn read_error(path: &Path, e: io::Error) -> HttpError {
    match e.kind() {
        io::ErrorKind::NotFound | io::ErrorKind::NotADirectory => not_found(),
        io::ErrorKind::PermissionDenied => HttpError::forbidden("Access denied"),
        _ => {
            warn!(path = %path.display(), error = %e, "failed to read file");
            HttpError::internal("")
        }
    }
}

// ── StaticController ──────────────────────────────────────────────────────────

/// Serves files under `static.root`. Registered by the app when
/// `static.enabled` is set.
#[derive(Debug, Default)]
pub struct StaticController {
    config: StaticConfig,
}

impl StaticController {
    /// `GET prefix` and `GET prefix/{*path}` to `Static#Serve`.
    pub fn routes(prefix: &str) -> Routes {
        let prefix = prefix.trim_end_matches('/');
        Routes::new()
            .get(if prefix.is_empty() { "/" } else { prefix }, "Static#Serve")
            .get(&format!("{prefix}/{{*path}}"), "Static#Serve")
    }

    fn serve(&self, ctx: &mut Context) -> Result<(), BoxError> {
        let requested = ctx.param("path").unwrap_or_default();
        let path = resolve(Path::new(&self.config.root), requested).ok_or_else(not_found)?;
        send(ctx, &path, &self.config.index)?;
        Ok(())
    }
}

impl Component for StaticController {
    fn init(&mut self, resources: &Arc<Resources>) -> Result<(), BoxError> {
        self.config = resources.config().static_files.clone();
        Ok(())
    }
}

impl Controller for StaticController {
    fn name() -> &'static str {
        "Static"
    }

    fn actions(actions: &mut Actions<Self>) {
        actions.add("Serve", Self::serve);
    }
}
