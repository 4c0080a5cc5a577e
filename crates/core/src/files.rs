use std::path::Path;

use plinth_storage::{FileRecord, NewFile, OwnerId, ProjectId};
use snafu::{ResultExt, ensure};
use uuid::Uuid;

use super::error::{
    CoreResult, FileTooLargeSnafu, MissingFieldSnafu, StoreUploadSnafu, UnsupportedFileTypeSnafu,
    map_storage,
};
use super::service::ChatService;

pub const MAX_UPLOAD_BYTES: u64 = 16 * 1024 * 1024;

pub const ALLOWED_EXTENSIONS: &[&str] = &[
    "txt", "pdf", "png", "jpg", "jpeg", "gif", "doc", "docx",
];

pub fn extension_allowed(filename: &str) -> bool {
    filename
        .rsplit_once('.')
        .map(|(stem, extension)| {
            !stem.is_empty()
                && ALLOWED_EXTENSIONS.contains(&extension.to_ascii_lowercase().as_str())
        })
        .unwrap_or(false)
}

/// Reduces a client-supplied filename to a portable basename: path segments
/// are stripped, anything outside `[A-Za-z0-9._-]` becomes an underscore, and
/// leading dots go so the result can never be a hidden or traversal name.
pub fn sanitize_filename(raw: &str) -> String {
    let basename = raw.rsplit(['/', '\\']).next().unwrap_or(raw);
    let cleaned: String = basename
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "file".to_string()
    } else {
        cleaned.to_string()
    }
}

impl ChatService {
    /// Validates and stores an upload, then registers it against the project.
    ///
    /// The stored name is `<uuid>_<sanitized original>`, unique on disk and in
    /// the registry. If registration fails after the bytes landed, the file is
    /// unlinked again so disk and registry cannot drift apart.
    pub async fn upload_file(
        &self,
        owner: OwnerId,
        project_id: ProjectId,
        original_filename: &str,
        content_type: &str,
        bytes: &[u8],
        external_ref: Option<String>,
    ) -> CoreResult<FileRecord> {
        self.authorize_project(owner, project_id, "file-upload-authorize")
            .await?;

        ensure!(
            !original_filename.trim().is_empty(),
            MissingFieldSnafu {
                stage: "file-upload-validate",
                field: "filename",
            }
        );
        ensure!(
            extension_allowed(original_filename),
            UnsupportedFileTypeSnafu {
                stage: "file-upload-validate",
                original_filename,
            }
        );
        let size_bytes = bytes.len() as u64;
        ensure!(
            size_bytes <= MAX_UPLOAD_BYTES,
            FileTooLargeSnafu {
                stage: "file-upload-validate",
                original_filename,
                size_bytes,
                limit_bytes: MAX_UPLOAD_BYTES,
            }
        );

        let sanitized = sanitize_filename(original_filename);
        let stored_filename = format!("{}_{}", Uuid::now_v7(), sanitized);
        let stored_path = self.upload_dir.join(&stored_filename);

        tokio::fs::create_dir_all(&self.upload_dir)
            .await
            .context(StoreUploadSnafu {
                stage: "file-upload-create-dir",
                path: self.upload_dir.display().to_string(),
            })?;
        tokio::fs::write(&stored_path, bytes)
            .await
            .context(StoreUploadSnafu {
                stage: "file-upload-write",
                path: stored_path.display().to_string(),
            })?;

        let content_type = if content_type.trim().is_empty() {
            "unknown"
        } else {
            content_type
        };

        let registered = self
            .storage
            .register_file(
                project_id,
                NewFile {
                    stored_filename: stored_filename.clone(),
                    original_filename: original_filename.to_string(),
                    size_bytes,
                    content_type: content_type.to_string(),
                    external_ref,
                },
            )
            .await;

        match registered {
            Ok(record) => Ok(record),
            Err(failure) => {
                remove_stored_bytes(&stored_path).await;
                Err(map_storage("file-upload-register")(failure))
            }
        }
    }

    pub async fn list_files(
        &self,
        owner: OwnerId,
        project_id: ProjectId,
    ) -> CoreResult<Vec<FileRecord>> {
        self.authorize_project(owner, project_id, "file-list-authorize")
            .await?;
        self.storage
            .list_files(project_id)
            .await
            .map_err(map_storage("file-list"))
    }

    /// Deletes a project with everything under it. Rows go first in one
    /// cascading transaction; the stored bytes are unlinked afterwards, and a
    /// file that will not unlink is logged rather than resurrecting the rows.
    pub async fn delete_project(&self, owner: OwnerId, project_id: ProjectId) -> CoreResult<()> {
        self.authorize_project(owner, project_id, "project-delete-authorize")
            .await?;

        let files = self
            .storage
            .list_files(project_id)
            .await
            .map_err(map_storage("project-delete-list-files"))?;

        self.storage
            .delete_project(project_id)
            .await
            .map_err(map_storage("project-delete"))?;

        for file in files {
            remove_stored_bytes(&self.upload_dir.join(&file.stored_filename)).await;
        }

        tracing::info!(project_id = %project_id, "project deleted");
        Ok(())
    }
}

async fn remove_stored_bytes(path: &Path) {
    if let Err(failure) = tokio::fs::remove_file(path).await
        && failure.kind() != std::io::ErrorKind::NotFound
    {
        tracing::warn!(
            path = %path.display(),
            error = %failure,
            "failed to remove stored upload"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CoreError, ErrorClass};
    use crate::service::test_support::harness;

    #[tokio::test]
    async fn upload_stores_bytes_and_registers_the_file() {
        let h = harness().await;
        let project = h
            .service
            .create_project(h.owner, "agent", "", "")
            .await
            .unwrap();

        let record = h
            .service
            .upload_file(
                h.owner,
                project.id,
                "notes.txt",
                "text/plain",
                b"hello notes",
                None,
            )
            .await
            .unwrap();

        assert_eq!(record.original_filename, "notes.txt");
        assert_eq!(record.size_bytes, 11);
        assert!(record.stored_filename.ends_with("_notes.txt"));
        assert_eq!(record.external_ref, None);

        let on_disk = tokio::fs::read(h.service.upload_dir.join(&record.stored_filename))
            .await
            .unwrap();
        assert_eq!(on_disk, b"hello notes");

        let listed = h.service.list_files(h.owner, project.id).await.unwrap();
        assert_eq!(listed, vec![record]);
    }

    #[tokio::test]
    async fn disallowed_extension_is_rejected() {
        let h = harness().await;
        let project = h
            .service
            .create_project(h.owner, "agent", "", "")
            .await
            .unwrap();

        let result = h
            .service
            .upload_file(h.owner, project.id, "tool.exe", "application/x-dosexec", b"MZ", None)
            .await;

        match result {
            Err(failure @ CoreError::UnsupportedFileType { .. }) => {
                assert_eq!(failure.class(), ErrorClass::Validation);
            }
            other => panic!("expected unsupported-type failure, got {other:?}"),
        }
        assert!(h.service.list_files(h.owner, project.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn oversized_upload_is_rejected() {
        let h = harness().await;
        let project = h
            .service
            .create_project(h.owner, "agent", "", "")
            .await
            .unwrap();

        let oversized = vec![0_u8; (MAX_UPLOAD_BYTES + 1) as usize];
        let result = h
            .service
            .upload_file(h.owner, project.id, "big.txt", "text/plain", &oversized, None)
            .await;

        assert!(matches!(result, Err(CoreError::FileTooLarge { .. })));
    }

    #[tokio::test]
    async fn external_ref_survives_registration() {
        let h = harness().await;
        let project = h
            .service
            .create_project(h.owner, "agent", "", "")
            .await
            .unwrap();

        let record = h
            .service
            .upload_file(
                h.owner,
                project.id,
                "paper.pdf",
                "application/pdf",
                b"%PDF-1.4",
                Some("file-abc123".to_string()),
            )
            .await
            .unwrap();

        assert_eq!(record.external_ref.as_deref(), Some("file-abc123"));
    }

    #[tokio::test]
    async fn project_delete_removes_rows_and_bytes() {
        let h = harness().await;
        let project = h
            .service
            .create_project(h.owner, "agent", "", "")
            .await
            .unwrap();
        let record = h
            .service
            .upload_file(h.owner, project.id, "notes.txt", "text/plain", b"x", None)
            .await
            .unwrap();
        let stored_path = h.service.upload_dir.join(&record.stored_filename);
        assert!(stored_path.exists());

        h.service.delete_project(h.owner, project.id).await.unwrap();

        assert!(!stored_path.exists());
        let result = h.service.get_project(h.owner, project.id).await;
        assert!(matches!(result, Err(CoreError::NotFound { .. })));
    }

    #[tokio::test]
    async fn foreign_owner_cannot_delete_a_project() {
        let h = harness().await;
        let project = h
            .service
            .create_project(h.owner, "agent", "", "")
            .await
            .unwrap();

        let result = h.service.delete_project(OwnerId::new_v7(), project.id).await;

        assert!(matches!(result, Err(CoreError::NotFound { .. })));
        h.service.get_project(h.owner, project.id).await.unwrap();
    }

    #[test]
    fn filenames_are_reduced_to_portable_basenames() {
        assert_eq!(sanitize_filename("notes.txt"), "notes.txt");
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("..\\..\\boot.ini"), "boot.ini");
        assert_eq!(sanitize_filename("my report (final).txt"), "my_report__final_.txt");
        assert_eq!(sanitize_filename(".hidden"), "hidden");
        assert_eq!(sanitize_filename("..."), "file");
    }

    #[test]
    fn extension_gate_matches_the_allow_list() {
        assert!(extension_allowed("a.txt"));
        assert!(extension_allowed("a.PDF"));
        assert!(extension_allowed("archive.tar.gif"));
        assert!(!extension_allowed("a.exe"));
        assert!(!extension_allowed("noextension"));
        assert!(!extension_allowed(".txt"));
    }
}
