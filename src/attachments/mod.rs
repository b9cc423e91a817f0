//! Turning exported files into MIME parts.
//!
//! [`AttachmentResolver`] reads a file from disk and wraps it as a
//! [`MimePart`]. Appended attachments first pass through an
//! [`AttachmentMerger`] and then through filename deduplication.

use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

use crate::errors::{DeliveryError, DeliveryResult};
use crate::mime::{Disposition, MimePart};
use crate::types::AttachmentRef;

/// Extensions whose guessed type would carry a content encoding (compressed
/// files). These are sent as opaque binary.
const ENCODED_EXTENSIONS: &[&str] = &["gz", "z", "bz2", "xz", "br", "svgz", "tgz", "taz", "tz", "tbz2", "txz"];

/// Rewrites the list of appended attachments before they are resolved.
///
/// The hosting service can use this to combine several exported PDFs into a
/// single document. Whatever the merger returns is what gets attached.
#[cfg_attr(test, mockall::automock)]
pub trait AttachmentMerger: Send + Sync {
    /// Returns the attachments to append, in order.
    fn merge(&self, attachments: Vec<AttachmentRef>) -> DeliveryResult<Vec<AttachmentRef>>;
}

/// Merger that returns its input unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughMerger;

impl AttachmentMerger for PassthroughMerger {
    fn merge(&self, attachments: Vec<AttachmentRef>) -> DeliveryResult<Vec<AttachmentRef>> {
        Ok(attachments)
    }
}

/// Reads attachment files and builds MIME parts for them.
#[derive(Debug, Clone, Default)]
pub struct AttachmentResolver {
    home: Option<PathBuf>,
}

impl AttachmentResolver {
    /// Creates a resolver that expands `~` to the current user's home.
    pub fn new() -> Self {
        Self { home: dirs::home_dir() }
    }

    /// Creates a resolver with an explicit home directory.
    pub fn with_home(home: impl Into<PathBuf>) -> Self {
        Self { home: Some(home.into()) }
    }

    /// Expands a leading `~` and makes the path absolute.
    pub fn absolute_path(&self, path: &Path) -> DeliveryResult<PathBuf> {
        let expanded = match (path.components().next(), &self.home) {
            (Some(Component::Normal(first)), Some(home)) if first == "~" => {
                home.join(path.components().skip(1).collect::<PathBuf>())
            }
            _ => path.to_path_buf(),
        };

        if expanded.is_absolute() {
            return Ok(expanded);
        }

        let cwd = std::env::current_dir().map_err(|e| {
            DeliveryError::other(format!("Unable to resolve {}", path.display())).with_cause(e)
        })?;
        Ok(cwd.join(expanded))
    }

    /// Reads one file into a MIME part.
    ///
    /// The display name is `override_name` when given, else the file's base
    /// name. Inline parts get a Content-ID equal to the display name.
    pub async fn resolve(
        &self,
        path: &Path,
        disposition: Disposition,
        override_name: Option<&str>,
    ) -> DeliveryResult<MimePart> {
        let path = self.absolute_path(path)?;

        let filename = match override_name {
            Some(name) => name.to_string(),
            None => path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .ok_or_else(|| {
                    DeliveryError::other(format!("Attachment path has no file name: {}", path.display()))
                })?,
        };

        let payload = tokio::fs::read(&path).await.map_err(|e| {
            DeliveryError::other(format!("Unable to read attachment {}", path.display())).with_cause(e)
        })?;

        let content_type = guess_content_type(&path);
        debug!(path = %path.display(), filename = %filename, content_type = %content_type, bytes = payload.len(), "Resolved attachment");

        Ok(match disposition {
            Disposition::Inline => MimePart::inline(content_type, filename, payload),
            Disposition::Attachment => MimePart::attachment(content_type, filename, payload),
        })
    }

    /// Resolves the files rendered inside the body, in order. Inline parts
    /// are always named after the file, since that is what the body's
    /// `cid:` references point at.
    pub async fn resolve_inline(&self, attachments: &[AttachmentRef]) -> DeliveryResult<Vec<MimePart>> {
        let mut parts = Vec::with_capacity(attachments.len());
        for attachment in attachments {
            parts.push(self.resolve(attachment.path(), Disposition::Inline, None).await?);
        }
        Ok(parts)
    }

    /// Resolves appended files in order, giving each requested display name
    /// to the first attachment that asks for it. Later attachments asking
    /// for a taken name fall back to their file name.
    pub async fn resolve_appended(&self, attachments: &[AttachmentRef]) -> DeliveryResult<Vec<MimePart>> {
        let mut used_names: HashSet<&str> = HashSet::new();
        let mut parts = Vec::with_capacity(attachments.len());

        for attachment in attachments {
            let override_name = match attachment.override_name.as_deref() {
                Some(name) if used_names.insert(name) => Some(name),
                Some(name) => {
                    warn!(
                        filename = name,
                        path = %attachment.path().display(),
                        "Attempted to attach duplicate filename, using unique auto-generated name instead"
                    );
                    None
                }
                None => None,
            };

            parts.push(self.resolve(attachment.path(), Disposition::Attachment, override_name).await?);
        }

        Ok(parts)
    }
}

/// Guesses a content type from the file extension.
pub fn guess_content_type(path: &Path) -> mime::Mime {
    let encoded = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ENCODED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()));

    if encoded {
        return mime::APPLICATION_OCTET_STREAM;
    }

    mime_guess::from_path(path)
        .first()
        .unwrap_or(mime::APPLICATION_OCTET_STREAM)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::fs;
    use tempfile::TempDir;

    fn write_file(dir: &TempDir, name: &str, contents: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, contents).unwrap();
        path
    }

    #[rstest]
    #[case("chart.png", "image/png")]
    #[case("report.pdf", "application/pdf")]
    #[case("data.csv", "text/csv")]
    #[case("archive.tar.gz", "application/octet-stream")]
    #[case("bundle.tgz", "application/octet-stream")]
    #[case("noextension", "application/octet-stream")]
    #[case("mystery.zzqx", "application/octet-stream")]
    fn test_guess_content_type(#[case] name: &str, #[case] expected: &str) {
        assert_eq!(guess_content_type(Path::new(name)).essence_str(), expected);
    }

    #[test]
    fn test_home_expansion() {
        let resolver = AttachmentResolver::with_home("/home/alerts");
        assert_eq!(
            resolver.absolute_path(Path::new("~/exports/viz.png")).unwrap(),
            PathBuf::from("/home/alerts/exports/viz.png")
        );
        assert_eq!(
            resolver.absolute_path(Path::new("/var/tmp/viz.png")).unwrap(),
            PathBuf::from("/var/tmp/viz.png")
        );
    }

    #[test]
    fn test_relative_path_is_made_absolute() {
        let resolver = AttachmentResolver::new();
        let resolved = resolver.absolute_path(Path::new("viz.png")).unwrap();
        assert!(resolved.is_absolute());
        assert!(resolved.ends_with("viz.png"));
    }

    #[tokio::test]
    async fn test_resolve_inline() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "chart.png", b"\x89PNG");

        let part = AttachmentResolver::new()
            .resolve(&path, Disposition::Inline, None)
            .await
            .unwrap();

        assert_eq!(part.filename, "chart.png");
        assert_eq!(part.content_id.as_deref(), Some("chart.png"));
        assert_eq!(part.content_type, mime::IMAGE_PNG);
        assert_eq!(part.payload, b"\x89PNG");
    }

    #[tokio::test]
    async fn test_resolve_with_override() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "export-1234.pdf", b"%PDF");

        let part = AttachmentResolver::new()
            .resolve(&path, Disposition::Attachment, Some("Weekly report.pdf"))
            .await
            .unwrap();

        assert_eq!(part.filename, "Weekly report.pdf");
        assert_eq!(part.disposition, Disposition::Attachment);
        assert!(part.content_id.is_none());
        assert_eq!(part.content_type, mime::APPLICATION_PDF);
    }

    #[tokio::test]
    async fn test_missing_file_is_other_error() {
        let dir = TempDir::new().unwrap();
        let err = AttachmentResolver::new()
            .resolve(&dir.path().join("gone.png"), Disposition::Inline, None)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), crate::errors::DeliveryErrorKind::Other);
        assert!(err.message().contains("gone.png"));
    }

    #[tokio::test]
    async fn test_resolve_appended_dedups_override_names() {
        let dir = TempDir::new().unwrap();
        let first = write_file(&dir, "a.pdf", b"a");
        let second = write_file(&dir, "b.pdf", b"b");
        let third = write_file(&dir, "c.csv", b"c");

        let refs = vec![
            AttachmentRef::new(&first).with_name("report.pdf"),
            AttachmentRef::new(&second).with_name("report.pdf"),
            AttachmentRef::new(&third),
        ];

        let parts = AttachmentResolver::new().resolve_appended(&refs).await.unwrap();
        let names: Vec<&str> = parts.iter().map(|p| p.filename.as_str()).collect();
        assert_eq!(names, vec!["report.pdf", "b.pdf", "c.csv"]);
        assert!(parts.iter().all(|p| p.disposition == Disposition::Attachment));
    }

    #[tokio::test]
    async fn test_fallback_does_not_claim_name() {
        let dir = TempDir::new().unwrap();
        let first = write_file(&dir, "x.pdf", b"1");
        let second = write_file(&dir, "y.pdf", b"2");
        let third = write_file(&dir, "z.pdf", b"3");

        // The second entry collides and falls back to "y.pdf"; that fallback
        // must not block a later override of the same name.
        let refs = vec![
            AttachmentRef::new(&first).with_name("y.pdf"),
            AttachmentRef::new(&second).with_name("y.pdf"),
            AttachmentRef::new(&third).with_name("summary.pdf"),
        ];

        let parts = AttachmentResolver::new().resolve_appended(&refs).await.unwrap();
        let names: Vec<&str> = parts.iter().map(|p| p.filename.as_str()).collect();
        assert_eq!(names, vec!["y.pdf", "y.pdf", "summary.pdf"]);
    }

    #[tokio::test]
    async fn test_resolve_inline_ignores_override() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "viz.png", b"img");

        let parts = AttachmentResolver::new()
            .resolve_inline(&[AttachmentRef::new(&path).with_name("other.png")])
            .await
            .unwrap();

        assert_eq!(parts[0].filename, "viz.png");
        assert_eq!(parts[0].content_id.as_deref(), Some("viz.png"));
    }

    #[test]
    fn test_passthrough_merger() {
        let refs = vec![AttachmentRef::new("a.pdf"), AttachmentRef::new("b.pdf")];
        assert_eq!(PassthroughMerger.merge(refs.clone()).unwrap(), refs);
    }
}
