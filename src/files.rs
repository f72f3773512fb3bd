//! Narrow interface to the persistence layer's file tree.
//!
//! The collaboration server never talks to storage directly; it calls the
//! four mutation operations on [`FileStore`] and re-broadcasts the result.
//! The tree is modeled arena-style — records refer to their parent by id,
//! never by reference — and deletion is a soft-delete that cascades to
//! descendants.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FileError {
    #[error("{0}")]
    NotFound(&'static str),
    #[error("{0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FileKind {
    File,
    Folder,
}

impl FileKind {
    pub fn parse(s: &str) -> Result<Self, FileError> {
        match s {
            "FILE" => Ok(Self::File),
            "FOLDER" => Ok(Self::Folder),
            other => Err(FileError::Invalid(format!("Unknown file type: {other}"))),
        }
    }
}

/// The record handed back to clients in FILE_CREATED broadcasts.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    pub id: i64,
    pub project_id: String,
    pub name: String,
    pub path: String,
    #[serde(rename = "type")]
    pub kind: FileKind,
    pub parent_id: Option<i64>,
}

/// The file-mutation operations the router consumes. All failures are
/// domain conditions ("not found", "invalid") that the router turns into a
/// sender-directed ERROR reply.
pub trait FileStore: Send + Sync {
    fn create_file(
        &self,
        project_id: &str,
        name: &str,
        path: &str,
        kind: FileKind,
        parent_id: i64,
    ) -> Result<FileRecord, FileError>;

    fn update_file(&self, file_id: i64, content: &str) -> Result<(), FileError>;

    /// Soft-delete; cascades to all descendants of a folder.
    fn delete_file(&self, file_id: i64) -> Result<(), FileError>;

    fn rename_file(&self, file_id: i64, name: &str) -> Result<(), FileError>;
}

#[derive(Debug)]
struct StoredFile {
    record: FileRecord,
    #[allow(dead_code)]
    content: String,
    deleted: bool,
}

/// In-memory store backing the default wiring and the test suite. A real
/// deployment substitutes the persistence service behind the same trait.
#[derive(Debug, Default)]
pub struct InMemoryFileStore {
    files: Mutex<HashMap<i64, StoredFile>>,
    next_id: AtomicI64,
}

impl InMemoryFileStore {
    pub fn new() -> Self {
        Self {
            files: Mutex::new(HashMap::new()),
            next_id: AtomicI64::new(1),
        }
    }
}

impl FileStore for InMemoryFileStore {
    fn create_file(
        &self,
        project_id: &str,
        name: &str,
        path: &str,
        kind: FileKind,
        parent_id: i64,
    ) -> Result<FileRecord, FileError> {
        let mut files = self.files.lock().expect("file store lock");

        let parent = if parent_id != 0 {
            let parent = files
                .get(&parent_id)
                .filter(|f| !f.deleted)
                .ok_or(FileError::NotFound("Parent folder not found"))?;
            if parent.record.kind != FileKind::Folder {
                return Err(FileError::Invalid(
                    "Parent must be a folder".to_string(),
                ));
            }
            Some(parent_id)
        } else {
            None
        };

        let duplicate = files.values().any(|f| {
            !f.deleted
                && f.record.project_id == project_id
                && f.record.path == path
                && f.record.name == name
                && f.record.kind == kind
        });
        if duplicate {
            return Err(FileError::Invalid(
                "File/folder with this path already exists".to_string(),
            ));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let record = FileRecord {
            id,
            project_id: project_id.to_string(),
            name: name.to_string(),
            path: path.to_string(),
            kind,
            parent_id: parent,
        };
        files.insert(
            id,
            StoredFile {
                record: record.clone(),
                content: String::new(),
                deleted: false,
            },
        );
        Ok(record)
    }

    fn update_file(&self, file_id: i64, content: &str) -> Result<(), FileError> {
        let mut files = self.files.lock().expect("file store lock");
        let file = files
            .get_mut(&file_id)
            .filter(|f| !f.deleted)
            .ok_or(FileError::NotFound("File not exists"))?;
        file.content = content.to_string();
        Ok(())
    }

    fn delete_file(&self, file_id: i64) -> Result<(), FileError> {
        let mut files = self.files.lock().expect("file store lock");
        if !files.get(&file_id).is_some_and(|f| !f.deleted) {
            return Err(FileError::NotFound("File not exists"));
        }

        // Walk the id-linked tree down from the target.
        let mut to_delete = vec![file_id];
        let mut frontier = vec![file_id];
        while let Some(parent) = frontier.pop() {
            for (id, f) in files.iter() {
                if !f.deleted && f.record.parent_id == Some(parent) {
                    to_delete.push(*id);
                    frontier.push(*id);
                }
            }
        }
        for id in to_delete {
            if let Some(f) = files.get_mut(&id) {
                f.deleted = true;
            }
        }
        Ok(())
    }

    fn rename_file(&self, file_id: i64, name: &str) -> Result<(), FileError> {
        let mut files = self.files.lock().expect("file store lock");
        let file = files
            .get_mut(&file_id)
            .filter(|f| !f.deleted)
            .ok_or(FileError::NotFound("File not exists"))?;
        file.record.name = name.to_string();
        Ok(())
    }
}
