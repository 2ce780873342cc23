//! Turns CV files into plain text. The pipeline only ever sees the resulting strings.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use tracing::{debug, warn};
use walkdir::WalkDir;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Plain,
    Pdf,
}

impl Format {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "txt" | "md" => Some(Format::Plain),
            "pdf" => Some(Format::Pdf),
            _ => None,
        }
    }
}

/// Extracted text, or `None` when the format is unsupported or nothing readable came out.
pub fn extract_text(path: &Path) -> Result<Option<String>> {
    let Some(format) = Format::from_path(path) else {
        return Ok(None);
    };
    let text = match format {
        Format::Plain => {
            let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
            String::from_utf8_lossy(&bytes).into_owned()
        }
        Format::Pdf => pdf_extract::extract_text(path).map_err(|e| anyhow!("extracting {}: {e}", path.display()))?,
    };
    let text = text.trim();
    Ok((!text.is_empty()).then(|| text.to_string()))
}

/// Supported files under `dir`, recursively, in path order.
pub fn collect_cv_paths(dir: &Path) -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| Format::from_path(path).is_some())
        .collect();
    paths.sort();
    paths
}

/// Reads every file, skipping the ones that yield no text. Returns `(path, text)` pairs.
pub fn load_cvs(files: &[PathBuf]) -> Vec<(PathBuf, String)> {
    let mut out = Vec::with_capacity(files.len());
    for path in files {
        match extract_text(path) {
            Ok(Some(text)) => {
                debug!(path = %path.display(), chars = text.len(), "extracted CV");
                out.push((path.clone(), text));
            }
            Ok(None) => warn!(path = %path.display(), "skipping unsupported or empty file"),
            Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable file"),
        }
    }
    out
}

/// `--jd` accepts either a file or the description itself.
pub fn read_job_description(arg: &str) -> Result<String> {
    let path = Path::new(arg);
    if path.is_file() {
        return extract_text(path)?.ok_or_else(|| anyhow!("no text in job description file {}", path.display()));
    }
    Ok(arg.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_files_are_read_lossily() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cv.txt");
        fs::write(&path, b"  Swift \xff developer \n").unwrap();
        let text = extract_text(&path).unwrap().unwrap();
        assert_eq!(text, "Swift \u{fffd} developer");
    }

    #[test]
    fn unsupported_and_empty_files_yield_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let docx = dir.path().join("cv.docx");
        let empty = dir.path().join("empty.md");
        fs::write(&docx, "binary").unwrap();
        fs::write(&empty, "   \n").unwrap();
        assert_eq!(extract_text(&docx).unwrap(), None);
        assert_eq!(extract_text(&empty).unwrap(), None);
        assert_eq!(load_cvs(&[docx, empty]).len(), 0);
    }

    #[test]
    fn directory_walk_finds_supported_files_in_order() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("b.md"), "React").unwrap();
        fs::write(dir.path().join("nested/a.TXT"), "iOS").unwrap();
        fs::write(dir.path().join("notes.json"), "{}").unwrap();
        let found = collect_cv_paths(dir.path());
        let names: Vec<_> = found.iter().map(|p| p.strip_prefix(dir.path()).unwrap().to_path_buf()).collect();
        assert_eq!(names, vec![PathBuf::from("b.md"), PathBuf::from("nested/a.TXT")]);
    }

    #[test]
    fn job_description_may_be_inline_text() {
        assert_eq!(read_job_description("Senior iOS engineer").unwrap(), "Senior iOS engineer");
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jd.md");
        fs::write(&path, "Need Swift\n").unwrap();
        assert_eq!(read_job_description(path.to_str().unwrap()).unwrap(), "Need Swift");
    }
}
