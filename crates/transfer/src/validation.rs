use std::path::{Path, PathBuf};

use crate::TransferError;
use crate::types::ReceivedFile;

/// Maximum length of a sanitized file name, in bytes.
const MAX_FILE_NAME_LEN: usize = 255;

/// Turns a peer-supplied file name into a safe local file name.
///
/// Keeps only the final path component (either separator style), drops
/// control characters and surrounding whitespace, and truncates to 255
/// bytes on a character boundary.
///
/// Rejects:
/// - Empty names, or names that are empty after cleanup
/// - `.` and `..`
pub fn sanitize_file_name(name: &str) -> Result<String, TransferError> {
    let last = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = last.chars().filter(|c| !c.is_control()).collect();
    let cleaned = cleaned.trim();

    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        return Err(TransferError::InvalidFileName(name.to_owned()));
    }

    let mut end = cleaned.len().min(MAX_FILE_NAME_LEN);
    while !cleaned.is_char_boundary(end) {
        end -= 1;
    }
    Ok(cleaned[..end].to_owned())
}

/// Writes `file` into `dir` under its sanitized name and returns the path.
///
/// An existing file with the same name is overwritten.
pub fn save_received_file(dir: &Path, file: &ReceivedFile) -> Result<PathBuf, TransferError> {
    let name = sanitize_file_name(file.name())?;
    std::fs::create_dir_all(dir)?;
    let path = dir.join(name);
    std::fs::write(&path, &file.data)?;
    tracing::info!(path = %path.display(), bytes = file.len(), "received file saved");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use p2pburger_protocol::FileMetadata;
    use tempfile::TempDir;

    #[test]
    fn rejects_empty_name() {
        assert!(sanitize_file_name("").is_err());
        assert!(sanitize_file_name("   ").is_err());
    }

    #[test]
    fn strips_unix_directories() {
        assert_eq!(sanitize_file_name("../../../etc/passwd").unwrap(), "passwd");
        assert_eq!(sanitize_file_name("/tmp/malicious").unwrap(), "malicious");
    }

    #[test]
    fn strips_windows_directories() {
        assert_eq!(sanitize_file_name("C:\\Windows\\evil.exe").unwrap(), "evil.exe");
    }

    #[test]
    fn rejects_dot_names() {
        assert!(sanitize_file_name("..").is_err());
        assert!(sanitize_file_name("sub/.").is_err());
        assert!(sanitize_file_name("dir/").is_err());
    }

    #[test]
    fn removes_control_characters() {
        assert_eq!(sanitize_file_name("bur\0ger\n.png").unwrap(), "burger.png");
    }

    #[test]
    fn accepts_simple_and_dotfile_names() {
        assert_eq!(sanitize_file_name("burger.png").unwrap(), "burger.png");
        assert_eq!(sanitize_file_name(".bashrc").unwrap(), ".bashrc");
    }

    #[test]
    fn truncates_on_char_boundary() {
        let long = "é".repeat(200);
        let out = sanitize_file_name(&long).unwrap();
        assert!(out.len() <= MAX_FILE_NAME_LEN);
        assert!(out.chars().all(|c| c == 'é'));
    }

    #[test]
    fn saves_under_sanitized_name() {
        let dir = TempDir::new().unwrap();
        let file = ReceivedFile {
            metadata: FileMetadata {
                name: "../escape.txt".into(),
                size: 5,
                mime_type: "text/plain".into(),
            },
            data: b"hello".to_vec(),
        };

        let path = save_received_file(dir.path(), &file).unwrap();
        assert_eq!(path, dir.path().join("escape.txt"));
        assert_eq!(std::fs::read(&path).unwrap(), b"hello");
    }

    #[test]
    fn save_rejects_unusable_name() {
        let dir = TempDir::new().unwrap();
        let file = ReceivedFile {
            metadata: FileMetadata {
                name: "..".into(),
                size: 0,
                mime_type: String::new(),
            },
            data: Vec::new(),
        };
        let result = save_received_file(dir.path(), &file);
        assert!(matches!(result, Err(TransferError::InvalidFileName(_))));
    }
}
