//! Request-path handling for the static file tree: default documents,
//! suffix based content types, source view and the 404 diagnostic.

use std::{
    fmt::Write as _,
    path::{Component, Path, PathBuf},
};

pub const DEFAULT_DOCUMENT: &str = "index.html";
pub const SOURCE_VIEW_SUFFIX: &str = ".src";
pub const DOWNLOAD_ARG: &str = "download";

pub const TEXT_PLAIN: &str = "text/plain";
pub const OCTET_STREAM: &str = "application/octet-stream";

const CONTENT_TYPES: &[(&str, &str)] = &[
    (".html", "text/html"),
    (".htm", "text/html"),
    (".css", "text/css"),
    (".js", "application/javascript"),
    (".png", "image/png"),
    (".gif", "image/gif"),
    (".jpg", "image/jpeg"),
    (".ico", "image/x-icon"),
    (".xml", "text/xml"),
    (".pdf", "application/pdf"),
    (".zip", "application/zip"),
];

pub fn content_type_for(path: &str) -> &'static str {
    CONTENT_TYPES
        .iter()
        .find(|(suffix, _)| path.ends_with(suffix))
        .map(|(_, content_type)| *content_type)
        .unwrap_or(TEXT_PLAIN)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedFile {
    pub path: String,
    pub content_type: &'static str,
}

impl ResolvedFile {
    /// Location of the file under `root`, or `None` if the request path tries
    /// to leave the root.
    pub fn location(&self, root: &Path) -> Option<PathBuf> {
        let mut location = root.to_path_buf();
        for component in Path::new(self.path.trim_start_matches('/')).components() {
            match component {
                Component::Normal(part) => location.push(part),
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
            }
        }
        Some(location)
    }
}

pub fn resolve(uri_path: &str, download: bool) -> ResolvedFile {
    let mut path = uri_path.to_string();
    if path.ends_with('/') {
        path.push_str(DEFAULT_DOCUMENT);
    }

    let content_type = if path.ends_with(SOURCE_VIEW_SUFFIX) {
        if let Some(dot) = path.rfind('.') {
            path.truncate(dot);
        }
        TEXT_PLAIN
    } else {
        content_type_for(&path)
    };

    ResolvedFile {
        path,
        content_type: if download { OCTET_STREAM } else { content_type },
    }
}

pub fn has_arg(args: &[(String, String)], name: &str) -> bool {
    args.iter().any(|(arg, _)| arg == name)
}

pub fn not_found_message(method: &str, uri: &str, args: &[(String, String)]) -> String {
    let mut message = String::from("File Not Found\n\n");
    let _ = write!(message, "URI: {uri}\nMethod: {method}\nArguments: {}\n", args.len());
    for (name, value) in args {
        let _ = write!(message, " NAME:{name}\n VALUE:{value}\n");
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn maps_known_suffixes() {
        assert_eq!(content_type_for("/a.png"), "image/png");
        assert_eq!(content_type_for("/index.htm"), "text/html");
        assert_eq!(content_type_for("/app.js"), "application/javascript");
        assert_eq!(content_type_for("/photo.jpg"), "image/jpeg");
        assert_eq!(content_type_for("/favicon.ico"), "image/x-icon");
        assert_eq!(content_type_for("/notes.md"), "text/plain");
        assert_eq!(content_type_for("/noext"), "text/plain");
    }

    #[test]
    fn directory_gets_default_document() {
        let resolved = resolve("/dir/", false);
        assert_eq!(
            resolved,
            ResolvedFile {
                path: "/dir/index.html".to_string(),
                content_type: "text/html",
            }
        );
        assert_eq!(resolve("/", false).path, "/index.html");
    }

    #[test]
    fn source_view_strips_suffix_and_serves_text() {
        let resolved = resolve("/readme.txt.src", false);
        assert_eq!(resolved.path, "/readme.txt");
        assert_eq!(resolved.content_type, "text/plain");

        let resolved = resolve("/index.html.src", false);
        assert_eq!(resolved.path, "/index.html");
        assert_eq!(resolved.content_type, "text/plain");
    }

    #[test]
    fn download_forces_binary() {
        assert_eq!(resolve("/a.png", true).content_type, OCTET_STREAM);
        assert_eq!(resolve("/docs/", true).content_type, OCTET_STREAM);
    }

    #[test]
    fn location_stays_under_root() {
        let root = Path::new("/srv/www");
        let resolved = resolve("/css/site.css", false);
        assert_eq!(resolved.location(root), Some(PathBuf::from("/srv/www/css/site.css")));

        let escape = resolve("/../etc/passwd", false);
        assert_eq!(escape.location(root), None);
    }

    #[test]
    fn download_flag_is_found_by_name() {
        let args = vec![
            ("download".to_string(), String::new()),
            ("name".to_string(), "a b".to_string()),
        ];
        assert!(has_arg(&args, "download"));
        assert!(!has_arg(&args, "upload"));
        assert!(!has_arg(&[], "download"));
    }

    #[test]
    fn not_found_lists_every_argument() {
        let args = vec![
            ("a".to_string(), "1".to_string()),
            ("b".to_string(), String::new()),
        ];

        assert_eq!(
            not_found_message("GET", "/missing.html", &args),
            "File Not Found\n\nURI: /missing.html\nMethod: GET\nArguments: 2\n NAME:a\n VALUE:1\n NAME:b\n VALUE:\n"
        );
    }
}
