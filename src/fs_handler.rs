//! The default route: serves files and directory listings from a
//! virtual host's document root.
//!
//! Accepts only `GET` and `HEAD`; any other method produces `405
//! Method Not Allowed`. Path resolution is purely textual — `.`/`..`
//! segments are resolved against the already-emitted prefix and a
//! `..` at the root stays at the root rather than escaping it. The
//! `stat` that follows is the authoritative file identity; no symlink
//! resolution is attempted for containment purposes.

use crate::arena::Arena;
use crate::http::request::Request;
use crate::http::response::Response;
use crate::http::types::{Method, StatusCode};
use crate::vhost::Host;
use std::fs::{self, File};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;

const PARENT_ROW: &[u8] =
    b"<tr><td><a href=\"../\">..</a></td><td>-</td><td>-</td></tr>\n";

/// Collapses `//`, `.`, and `..` segments in `request_path` against
/// `root`. A `..` that would climb above `root` is clamped to `root`
/// instead of erroring — the server never serves anything outside the
/// document root, by construction rather than by rejecting the
/// request.
pub(crate) fn normalize(root: &Path, request_path: &[u8]) -> PathBuf {
    let mut stack: Vec<&[u8]> = Vec::new();
    for segment in request_path.split(|&b| b == b'/') {
        match segment {
            b"" | b"." => {}
            b".." => {
                stack.pop();
            }
            s => stack.push(s),
        }
    }
    let mut out = root.to_path_buf();
    for segment in stack {
        // SAFETY-equivalent note: request paths are validated UTF-8 by
        // the parser's grammar (ASCII request-target bytes); a
        // non-UTF-8 segment here simply fails to match any real file.
        if let Ok(s) = std::str::from_utf8(segment) {
            out.push(s);
        }
    }
    out
}

/// Handles one request against `host`'s document root.
pub(crate) fn handle(host: &Host, pool: &Arena, request: &Request, response: &mut Response) {
    if !matches!(request.method, Method::Get | Method::Head) {
        response.status(StatusCode::MethodNotAllowed);
        response.body(b"");
        return;
    }
    response.no_send_body_for(request.method);

    let target = normalize(&host.docroot, request.uri.path());
    match fs::metadata(&target) {
        Ok(meta) if meta.is_file() => serve_file(pool, &target, meta.len(), response),
        Ok(meta) if meta.is_dir() => {
            serve_autoindex(host, pool, &target, request, response)
        }
        Ok(_) => not_found(response),
        Err(err) => match err.kind() {
            std::io::ErrorKind::NotFound => not_found(response),
            std::io::ErrorKind::PermissionDenied => forbidden(response),
            _ => internal_error(response),
        },
    }
}

fn not_found(response: &mut Response) {
    response.status(StatusCode::NotFound);
    response.body(b"Not Found");
}

fn forbidden(response: &mut Response) {
    response.status(StatusCode::Forbidden);
    response.body(b"Forbidden");
}

fn internal_error(response: &mut Response) {
    response.status(StatusCode::InternalServerError);
    response.body(b"Internal Server Error");
}

fn serve_file(pool: &Arena, path: &Path, len: u64, response: &mut Response) {
    match File::open(path) {
        Ok(file) => {
            let fd = file.as_raw_fd();
            // Ties the descriptor's lifetime (close-on-drop) to the
            // response's arena, so it outlives every `sendfile` call
            // the worker makes while draining this response.
            pool.attach(file);
            response.status(StatusCode::Ok);
            response.file_body(fd, 0, len);
        }
        Err(err) => match err.kind() {
            std::io::ErrorKind::NotFound => not_found(response),
            std::io::ErrorKind::PermissionDenied => forbidden(response),
            _ => internal_error(response),
        },
    }
}

fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes}{}", UNITS[0])
    } else {
        format!("{size:.1} {}", UNITS[unit])
    }
}

fn format_mtime(meta: &fs::Metadata) -> String {
    match meta.modified() {
        Ok(t) => {
            let dt: OffsetDateTime = t.into();
            format!(
                "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
                dt.year(),
                u8::from(dt.month()),
                dt.day(),
                dt.hour(),
                dt.minute(),
                dt.second()
            )
        }
        Err(_) => "-".to_string(),
    }
}

struct Entry {
    name: String,
    is_dir: bool,
    size: String,
    mtime: String,
}

fn list_entries(dir: &Path) -> std::io::Result<Vec<Entry>> {
    let mut entries = Vec::new();
    for item in fs::read_dir(dir)? {
        let item = item?;
        let name = item.file_name().to_string_lossy().into_owned();
        let meta = match item.metadata() {
            Ok(m) => m,
            Err(_) => continue,
        };
        entries.push(Entry {
            size: if meta.is_file() { human_size(meta.len()) } else { "-".to_string() },
            mtime: format_mtime(&meta),
            is_dir: meta.is_dir(),
            name,
        });
    }
    // Directories first, then natural (case-insensitive) name order.
    entries.sort_by(|a, b| match (a.is_dir, b.is_dir) {
        (true, false) => std::cmp::Ordering::Less,
        (false, true) => std::cmp::Ordering::Greater,
        _ => a.name.to_lowercase().cmp(&b.name.to_lowercase()),
    });
    Ok(entries)
}

fn row(entry: &Entry) -> Vec<u8> {
    let suffix = if entry.is_dir { "/" } else { "" };
    format!(
        "<tr><td><a href=\"{name}{suffix}\">{name}{suffix}</a></td><td>{size}</td><td>{mtime}</td></tr>\n",
        name = html_escape(&entry.name),
        suffix = suffix,
        size = entry.size,
        mtime = entry.mtime,
    )
    .into_bytes()
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

fn serve_autoindex(host: &Host, pool: &Arena, dir: &Path, request: &Request, response: &mut Response) {
    let entries = match list_entries(dir) {
        Ok(e) => e,
        Err(err) if err.kind() == std::io::ErrorKind::PermissionDenied => {
            return forbidden(response);
        }
        Err(_) => return internal_error(response),
    };

    let uri_path = String::from_utf8_lossy(request.uri.path()).into_owned();
    let is_root = request.uri.path() == b"/";

    let head = format!(
        "<!DOCTYPE html><html><head><title>Index of {uri}</title></head><body>\
         <h1>Index of {uri}</h1><table><thead><tr><th>Name</th><th>Size</th><th>Last modified</th></tr></thead><tbody>\n",
        uri = html_escape(&uri_path)
    );
    let tail = format!(
        "</tbody></table><hr><address>originhttpd at {host}:{port}</address></body></html>",
        host = host.hostname,
        port = host.port
    );

    response.status(StatusCode::Ok);
    response.header(b"content-type", b"text/html; charset=UTF-8");

    if request.version == crate::http::types::Version::Http10 {
        let mut body = Vec::new();
        body.extend_from_slice(head.as_bytes());
        if !is_root {
            body.extend_from_slice(PARENT_ROW);
        }
        for entry in &entries {
            body.extend_from_slice(&row(entry));
        }
        body.extend_from_slice(tail.as_bytes());
        let leaked = pool.alloc(body.len());
        leaked.copy_from_slice(&body);
        response.body(leaked);
        return;
    }

    response.begin_chunked();
    response.chunk(head.as_bytes());
    if !is_root {
        response.chunk(PARENT_ROW);
    }
    for entry in &entries {
        response.chunk(&row(entry));
    }
    response.chunk(tail.as_bytes());
    response.end_chunked();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_collapses_dot_and_dot_dot() {
        let root = Path::new("/srv/www");
        assert_eq!(normalize(root, b"/a/./b/../c"), root.join("a/c"));
    }

    #[test]
    fn normalize_clamps_escape_attempts_to_root() {
        let root = Path::new("/srv/www");
        assert_eq!(normalize(root, b"/../../etc/passwd"), root.join("etc/passwd"));
    }

    #[test]
    fn normalize_collapses_duplicate_slashes() {
        let root = Path::new("/srv/www");
        assert_eq!(normalize(root, b"//a//b"), root.join("a/b"));
    }

    #[test]
    fn human_size_formats_common_magnitudes() {
        assert_eq!(human_size(512), "512B");
        assert_eq!(human_size(2048), "2.0 KiB");
    }
}
