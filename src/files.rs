//! File-context extraction
//!
//! Turns a text-like file on disk into a `FileContext` the worker prompt
//! can embed. Binary formats are rejected rather than guessed at.

use crate::error::OrchestrationError;
use crate::models::FileContext;
use crate::Result;
use std::path::Path;
use tracing::debug;

const TEXT_EXTENSIONS: &[&str] = &["txt", "md", "log", "json", "csv", "yaml", "yml"];
const SOURCE_EXTENSIONS: &[&str] = &["py", "js", "ts", "rs", "java", "cpp", "c", "h", "sql"];

/// Larger files are cut to this many bytes.
pub const MAX_FILE_BYTES: usize = 256 * 1024;

pub fn supported_extensions() -> Vec<&'static str> {
    TEXT_EXTENSIONS
        .iter()
        .chain(SOURCE_EXTENSIONS.iter())
        .copied()
        .collect()
}

fn kind_for(extension: &str) -> Option<String> {
    if TEXT_EXTENSIONS.contains(&extension) {
        Some(format!("text/{}", extension))
    } else if SOURCE_EXTENSIONS.contains(&extension) {
        Some(format!("code/{}", extension))
    } else {
        None
    }
}

pub fn extract(path: impl AsRef<Path>) -> Result<FileContext> {
    let path = path.as_ref();

    if !path.is_file() {
        return Err(OrchestrationError::FileError(format!(
            "File not found: {}",
            path.display()
        )));
    }

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default();

    let kind = kind_for(&extension).ok_or_else(|| {
        OrchestrationError::FileError(format!(
            "Unsupported file type: .{}. Supported: {}",
            extension,
            supported_extensions().join(", ")
        ))
    })?;

    let bytes = std::fs::read(path)?;
    let truncated = bytes.len() > MAX_FILE_BYTES;
    let mut content = String::from_utf8_lossy(&bytes[..bytes.len().min(MAX_FILE_BYTES)]).into_owned();
    if truncated {
        content.push_str("\n...[file truncated]");
    }

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    debug!(file = %name, kind = %kind, bytes = bytes.len(), truncated, "Extracted file context");

    Ok(FileContext { name, kind, content })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn temp_file(name: &str, body: &[u8]) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("files-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        std::fs::File::create(&path).unwrap().write_all(body).unwrap();
        path
    }

    #[test]
    fn test_extract_csv() {
        let path = temp_file("prices.CSV", b"ticker,price\nAAPL,190.1\n");
        let ctx = extract(&path).unwrap();
        assert_eq!(ctx.name, "prices.CSV");
        assert_eq!(ctx.kind, "text/csv");
        assert!(ctx.content.contains("AAPL,190.1"));
        assert!(ctx.render().contains("FILE: prices.CSV"));
    }

    #[test]
    fn test_extract_source_file() {
        let path = temp_file("model.py", b"print('hi')\n");
        assert_eq!(extract(&path).unwrap().kind, "code/py");
    }

    #[test]
    fn test_unsupported_extension_is_error() {
        let path = temp_file("chart.png", &[0x89, 0x50, 0x4e, 0x47]);
        let err = extract(&path).unwrap_err();
        assert!(err.to_string().contains("Unsupported file type: .png"));
    }

    #[test]
    fn test_missing_file_is_error() {
        let err = extract("/definitely/not/here.txt").unwrap_err();
        assert!(matches!(err, OrchestrationError::FileError(_)));
    }

    #[test]
    fn test_large_file_is_truncated() {
        let body = vec![b'a'; MAX_FILE_BYTES + 10];
        let ctx = extract(temp_file("big.log", &body)).unwrap();
        assert!(ctx.content.ends_with("...[file truncated]"));
    }
}
