use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::dispatcher::{BodyValue, HandlerEntry, HandlerScope};
use crate::server::Server;

/// Registers one closing handler per file under a directory tree.
///
/// Each handler re-reads its file on every request and serves it under
/// the MIME type guessed from the extension. URIs mirror the path
/// relative to the base directory, with an optional stem prefix stripped.
#[derive(Clone)]
pub struct StaticFiles {
    base_dir: PathBuf,
    stem: Option<String>,
}

impl StaticFiles {
    pub fn new<P: Into<PathBuf>>(base: P) -> Self {
        Self {
            base_dir: base.into(),
            stem: None,
        }
    }

    /// Strip `stem` from the front of every derived URI.
    #[must_use]
    pub fn with_stem(mut self, stem: &str) -> Self {
        self.stem = Some(stem.trim_matches('/').to_string());
        self
    }

    /// Walk the tree and register a handler for every file found.
    /// Returns how many handlers were registered.
    pub fn register(&self, server: &mut Server) -> io::Result<usize> {
        let mut count = 0;
        let base = self.base_dir.clone();
        if base.is_dir() {
            self.walk(&base, server, &mut count)?;
        } else {
            self.register_file(&base, server);
            count += 1;
        }
        info!(files = count, base = %self.base_dir.display(), "static tree mounted");
        Ok(count)
    }

    fn walk(&self, dir: &Path, server: &mut Server, count: &mut usize) -> io::Result<()> {
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_dir() {
                self.walk(&path, server, count)?;
            } else {
                self.register_file(&path, server);
                *count += 1;
            }
        }
        Ok(())
    }

    fn register_file(&self, path: &Path, server: &mut Server) {
        let Some(uri) = self.uri_for(path) else {
            return;
        };
        let mime = mime_guess::from_path(path)
            .first_or_octet_stream()
            .essence_str()
            .to_string();
        let file = path.to_path_buf();
        server.register_uri(
            &uri,
            HandlerEntry::closing(Vec::new(), move |_scope: &mut HandlerScope| {
                Ok(BodyValue::Bytes(fs::read(&file)?))
            })
            .with_content_type(&mime),
        );
    }

    fn uri_for(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.base_dir).ok()?;
        let mut joined = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        if let Some(stem) = &self.stem {
            if let Some(rest) = joined
                .strip_prefix(stem.as_str())
                .and_then(|r| r.strip_prefix('/'))
            {
                joined = rest.to_string();
            }
        }
        Some(format!("/{joined}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uri_for_nested_path() {
        let sf = StaticFiles::new("/srv/site");
        assert_eq!(
            sf.uri_for(Path::new("/srv/site/css/app.css")).as_deref(),
            Some("/css/app.css")
        );
    }

    #[test]
    fn test_uri_for_with_stem() {
        let sf = StaticFiles::new("/srv/site").with_stem("public");
        assert_eq!(
            sf.uri_for(Path::new("/srv/site/public/index.html")).as_deref(),
            Some("/index.html")
        );
        assert_eq!(
            sf.uri_for(Path::new("/srv/site/other/readme.txt")).as_deref(),
            Some("/other/readme.txt")
        );
    }

    #[test]
    fn test_uri_outside_base_is_skipped() {
        let sf = StaticFiles::new("/srv/site");
        assert!(sf.uri_for(Path::new("/etc/passwd")).is_none());
    }
}
