//! Signed document store.
//!
//! Users upload PDFs they have signed and download them later. Each
//! identifier gets its own directory under the documents root:
//!
//! ```text
//! signed_pdfs/
//!   LOA950310/
//!     contrato.pdf
//!     anexo.pdf
//! ```
//!
//! Only `.pdf` names are accepted, and names are taken as a single path
//! component. Uploading a file with an existing name replaces it.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

use crate::config::DOCUMENT_EXTENSION;
use crate::identity::Identifier;

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("only PDF files are accepted")]
    NotPdf,

    #[error("invalid document name")]
    InvalidName,

    #[error("document {0} not found")]
    NotFound(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// One listed document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentEntry {
    pub name: String,
    pub size: u64,
}

#[derive(Debug, Clone)]
pub struct DocumentStore {
    root: PathBuf,
}

impl DocumentStore {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn user_dir(&self, owner: &Identifier) -> PathBuf {
        self.root.join(owner.as_str())
    }

    /// Documents owned by `owner`, sorted by name. Empty if none were uploaded.
    pub fn list(&self, owner: &Identifier) -> Result<Vec<DocumentEntry>, DocumentError> {
        let dir = self.user_dir(owner);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut docs = Vec::new();
        for entry in entries {
            let entry = entry?;
            let meta = entry.metadata()?;
            if !meta.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if has_pdf_extension(&name) {
                docs.push(DocumentEntry {
                    name,
                    size: meta.len(),
                });
            }
        }
        docs.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(docs)
    }

    /// Store `bytes` as `name` for `owner`. Returns the stored entry.
    pub fn save(
        &self,
        owner: &Identifier,
        name: &str,
        bytes: &[u8],
    ) -> Result<DocumentEntry, DocumentError> {
        let name = sanitize_name(name)?;
        let dir = self.user_dir(owner);
        fs::create_dir_all(&dir)?;
        fs::write(dir.join(name), bytes)?;
        Ok(DocumentEntry {
            name: name.to_string(),
            size: bytes.len() as u64,
        })
    }

    pub fn open(&self, owner: &Identifier, name: &str) -> Result<Vec<u8>, DocumentError> {
        let name = sanitize_name(name)?;
        match fs::read(self.user_dir(owner).join(name)) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(DocumentError::NotFound(name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn has_pdf_extension(name: &str) -> bool {
    name.to_ascii_lowercase().ends_with(DOCUMENT_EXTENSION)
}

/// Accept a bare file name ending in `.pdf`; reject anything path-like.
fn sanitize_name(name: &str) -> Result<&str, DocumentError> {
    let name = name.trim();
    if name.is_empty()
        || name.contains(&['/', '\\', '\0'][..])
        || name.contains("..")
        || name.starts_with('.')
    {
        return Err(DocumentError::InvalidName);
    }
    if !has_pdf_extension(name) || name.len() == DOCUMENT_EXTENSION.len() {
        return Err(DocumentError::NotPdf);
    }
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner() -> Identifier {
        Identifier::normalize("LOA950310").unwrap()
    }

    #[test]
    fn save_list_open() {
        let dir = tempfile::tempdir().unwrap();
        let store = DocumentStore::new(dir.path());

        assert!(store.list(&owner()).unwrap().is_empty());

        store.save(&owner(), "b.pdf", b"%PDF-1.7 b").unwrap();
        store.save(&owner(), "a.PDF", b"%PDF-1.7 aa").unwrap();

        let listed = store.list(&owner()).unwrap();
        assert_eq!(
            listed,
            vec![
                DocumentEntry { name: "a.PDF".into(), size: 11 },
                DocumentEntry { name: "b.pdf".into(), size: 10 },
            ]
        );
        assert_eq!(store.open(&owner(), "b.pdf").unwrap(), b"%PDF-1.7 b");
    }

    #[test]
    fn non_pdf_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = DocumentStore::new(dir.path());
        assert!(matches!(
            store.save(&owner(), "notes.txt", b"hi"),
            Err(DocumentError::NotPdf)
        ));
        assert!(matches!(
            store.save(&owner(), ".pdf", b"hi"),
            Err(DocumentError::InvalidName)
        ));
    }

    #[test]
    fn path_traversal_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = DocumentStore::new(dir.path());
        for name in ["../x.pdf", "a/b.pdf", "a\\b.pdf", "..pdf", ""] {
            assert!(
                matches!(store.save(&owner(), name, b"x"), Err(DocumentError::InvalidName)),
                "{name:?}"
            );
        }
    }

    #[test]
    fn missing_document_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = DocumentStore::new(dir.path());
        assert!(matches!(
            store.open(&owner(), "ghost.pdf"),
            Err(DocumentError::NotFound(name)) if name == "ghost.pdf"
        ));
    }

    #[test]
    fn owners_do_not_see_each_other() {
        let dir = tempfile::tempdir().unwrap();
        let store = DocumentStore::new(dir.path());
        let other = Identifier::normalize("GAM011231").unwrap();

        store.save(&owner(), "mine.pdf", b"%PDF").unwrap();
        assert!(store.list(&other).unwrap().is_empty());
        assert!(matches!(
            store.open(&other, "mine.pdf"),
            Err(DocumentError::NotFound(_))
        ));
    }
}
