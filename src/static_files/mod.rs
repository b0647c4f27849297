//! Static file resolution under a document root.
//!
//! Maps the decoded path of an unmatched GET request to a file path and a
//! content type. Whether the file exists is left to the caller.

use std::path::PathBuf;

use tracing::warn;

use crate::http::response::DEFAULT_CONTENT_TYPE;

/// Extension → content type, matched case-insensitively against the end of the path.
const CONTENT_TYPES: &[(&str, &str)] = &[
    (".txt", "text/plain"),
    (".htm", "text/html"),
    (".html", "text/html"),
    (".css", "text/css"),
    (".js", "application/javascript"),
    (".json", "application/json"),
    (".woff", "font/woff"),
    (".woff2", "font/woff2"),
    (".ttf", "font/ttf"),
    (".otf", "font/otf"),
    (".jpg", "image/jpeg"),
    (".jpeg", "image/jpeg"),
    (".png", "image/png"),
    (".gif", "image/gif"),
    (".svg", "image/svg+xml"),
    (".ico", "image/x-icon"),
];

/// A request path resolved against the document root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticFile {
    pub path: PathBuf,
    pub content_type: &'static str,
}

/// Resolves request paths to files under a document root.
///
/// # Examples
///
/// ```
/// use mhttpd::static_files::StaticResolver;
///
/// let resolver = StaticResolver::new("./web/");
/// let file = resolver.resolve("/docs/").unwrap();
/// assert_eq!(file.path.to_str(), Some("./web/docs/index.html"));
/// assert_eq!(file.content_type, "text/html");
/// ```
#[derive(Debug, Clone)]
pub struct StaticResolver {
    root: String,
}

impl StaticResolver {
    /// Creates a resolver for `root`, used verbatim as the path prefix.
    pub fn new(root: impl Into<String>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the document root.
    pub fn root(&self) -> &str {
        &self.root
    }

    /// Resolves `path` to a file under the root.
    ///
    /// A path ending in `/` gets `index.html` appended. Root and path are
    /// concatenated and every `//` is collapsed to `/`. Paths with a `..`
    /// segment are refused (`None`) so requests cannot climb out of the root.
    pub fn resolve(&self, path: &str) -> Option<StaticFile> {
        if path.split(['/', '\\']).any(|segment| segment == "..") {
            warn!(path, "refusing static path with parent segment");
            return None;
        }

        let mut target = format!("{}{}", self.root, path);
        if path.ends_with('/') {
            target.push_str("index.html");
        }
        let target = target.replace("//", "/");

        Some(StaticFile {
            content_type: content_type_for(&target),
            path: PathBuf::from(target),
        })
    }
}

/// Returns the content type for a file name, `application/octet-stream` when unknown.
pub fn content_type_for(name: &str) -> &'static str {
    let name = name.to_ascii_lowercase();
    CONTENT_TYPES
        .iter()
        .find(|(ext, _)| name.ends_with(ext))
        .map(|(_, content_type)| *content_type)
        .unwrap_or(DEFAULT_CONTENT_TYPE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directory_gets_index_html() {
        let r = StaticResolver::new("./web/");
        let f = r.resolve("/").unwrap();
        assert_eq!(f.path, PathBuf::from("./web/index.html"));
        assert_eq!(f.content_type, "text/html");

        let f = r.resolve("/a/b/").unwrap();
        assert_eq!(f.path, PathBuf::from("./web/a/b/index.html"));
    }

    #[test]
    fn doubled_separator_is_collapsed() {
        let r = StaticResolver::new("/srv/www/");
        assert_eq!(r.resolve("/app.js").unwrap().path, PathBuf::from("/srv/www/app.js"));

        let r = StaticResolver::new("/srv/www");
        assert_eq!(r.resolve("/app.js").unwrap().path, PathBuf::from("/srv/www/app.js"));
    }

    #[test]
    fn content_types_are_case_insensitive() {
        assert_eq!(content_type_for("logo.PNG"), "image/png");
        assert_eq!(content_type_for("a.Jpeg"), "image/jpeg");
        assert_eq!(content_type_for("font.woff2"), "font/woff2");
        assert_eq!(content_type_for("font.woff"), "font/woff");
        assert_eq!(content_type_for("page.htm"), "text/html");
        assert_eq!(content_type_for("icon.svg"), "image/svg+xml");
    }

    #[test]
    fn unknown_extension_is_octet_stream() {
        assert_eq!(content_type_for("archive.tar.zst"), "application/octet-stream");
        assert_eq!(content_type_for("README"), "application/octet-stream");
    }

    #[test]
    fn parent_segments_are_refused() {
        let r = StaticResolver::new("./web/");
        assert!(r.resolve("/../etc/passwd").is_none());
        assert!(r.resolve("/css/../../secret.txt").is_none());
        assert!(r.resolve("/..").is_none());
        // dots inside a name are fine
        assert!(r.resolve("/v1..2/notes.txt").is_some());
    }
}
