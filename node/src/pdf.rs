//! PDF text-extraction collaborator boundary (spec.md §1 Non-goals, §6
//! "Collaborator contracts": `pages(path) -> [string]`,
//! `title(path, index_map) -> string | none`).
//!
//! Actual PDF parsing (`original_source/pdfreader.py`'s `pypdf`-backed
//! `parse_pdf_to_pages_text`) is explicitly out of scope for this crate.
//! [`JsonPagesReader`] stands in for it: it reads a pre-extracted JSON
//! array of page strings, so the rest of the pipeline (digesting,
//! signing, mining) can be exercised end to end without vendoring a PDF
//! parser this specification does not ask for.

use std::collections::HashSet;
use std::path::Path;

pub trait PdfReader {
    /// Ordered page text content, one entry per page.
    fn pages(&self, path: &Path) -> anyhow::Result<Vec<String>>;

    /// Derives a document title from `path`, rejecting one already present
    /// in `known_titles` (mirrors `original_source/pdfreader.py::get_pdf_title`'s
    /// duplicate-filename guard).
    fn title(&self, path: &Path, known_titles: &HashSet<String>) -> anyhow::Result<Option<String>>;
}

/// Reads pages from a JSON file containing an array of strings, one per
/// page; an empty string marks an image-only page, matching the
/// `"[Page N - No text extracted or image-only page]"` placeholder the
/// Python source substitutes (spec.md §4.B already defines the digest's
/// empty-content path for exactly this case).
pub struct JsonPagesReader;

impl PdfReader for JsonPagesReader {
    fn pages(&self, path: &Path) -> anyhow::Result<Vec<String>> {
        let bytes = std::fs::read(path).map_err(|e| anyhow::anyhow!("reading {}: {e}", path.display()))?;
        let pages: Vec<String> = serde_json::from_slice(&bytes)
            .map_err(|e| anyhow::anyhow!("{} is not a JSON array of page strings: {e}", path.display()))?;
        Ok(pages)
    }

    fn title(&self, path: &Path, known_titles: &HashSet<String>) -> anyhow::Result<Option<String>> {
        let title = path
            .file_name()
            .ok_or_else(|| anyhow::anyhow!("{} has no file name component", path.display()))?
            .to_string_lossy()
            .into_owned();
        if known_titles.contains(&title) {
            return Ok(None);
        }
        Ok(Some(title))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_rejects_a_name_already_in_the_index() {
        let reader = JsonPagesReader;
        let mut known = HashSet::new();
        known.insert("doc.json".to_string());
        assert_eq!(reader.title(Path::new("doc.json"), &known).unwrap(), None);
    }

    #[test]
    fn title_uses_the_file_name() {
        let reader = JsonPagesReader;
        let known = HashSet::new();
        assert_eq!(
            reader.title(Path::new("/tmp/somewhere/report.json"), &known).unwrap(),
            Some("report.json".to_string())
        );
    }
}
