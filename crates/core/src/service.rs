use std::path::PathBuf;
use std::sync::Arc;

use plinth_llm::GenerationClient;
use plinth_storage::{
    DEFAULT_SESSION_TITLE, MessageRecord, NewProject, NewPrompt, OwnerId, ProjectId, ProjectPatch,
    ProjectRecord, PromptRecord, SessionId, SessionRecord, SqliteStorage,
};
use snafu::ensure;

use super::config::PlatformConfig;
use super::error::{CoreResult, MissingFieldSnafu, NotFoundSnafu, map_generation, map_storage};
use super::extract::{DocumentParser, NoDocumentParser};
use super::turn::SessionLocks;

/// Facade over the whole platform core. The excluded web layer talks to this
/// and nothing else; every operation takes the already-resolved caller
/// identity explicitly.
pub struct ChatService {
    pub(crate) storage: SqliteStorage,
    pub(crate) generation: GenerationClient,
    pub(crate) parser: Arc<dyn DocumentParser>,
    pub(crate) upload_dir: PathBuf,
    pub(crate) turn_locks: SessionLocks,
}

impl ChatService {
    pub fn new(
        storage: SqliteStorage,
        generation: GenerationClient,
        parser: Arc<dyn DocumentParser>,
        upload_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            storage,
            generation,
            parser,
            upload_dir: upload_dir.into(),
            turn_locks: SessionLocks::default(),
        }
    }

    /// Opens storage and the generation client from configuration. Documents
    /// are not parsed until a real parser is injected via
    /// [`ChatService::with_parser`].
    pub async fn open(config: &PlatformConfig) -> CoreResult<Self> {
        let storage = SqliteStorage::open(&config.database_path)
            .await
            .map_err(map_storage("service-open-storage"))?;
        let generation = GenerationClient::new(config.generation.to_client_config())
            .map_err(map_generation("service-open-generation-client"))?;

        Ok(Self::new(
            storage,
            generation,
            Arc::new(NoDocumentParser),
            config.upload_dir.clone(),
        ))
    }

    pub fn with_parser(mut self, parser: Arc<dyn DocumentParser>) -> Self {
        self.parser = parser;
        self
    }

    pub fn storage(&self) -> &SqliteStorage {
        &self.storage
    }

    // --- projects ---

    pub async fn create_project(
        &self,
        owner: OwnerId,
        name: &str,
        description: &str,
        system_prompt: &str,
    ) -> CoreResult<ProjectRecord> {
        ensure!(
            !name.trim().is_empty(),
            MissingFieldSnafu {
                stage: "project-create-validate",
                field: "name",
            }
        );

        self.storage
            .create_project(NewProject {
                owner_id: owner,
                name: name.to_string(),
                description: description.to_string(),
                system_prompt: system_prompt.to_string(),
            })
            .await
            .map_err(map_storage("project-create"))
    }

    pub async fn get_project(
        &self,
        owner: OwnerId,
        project_id: ProjectId,
    ) -> CoreResult<ProjectRecord> {
        self.authorize_project(owner, project_id, "project-get-authorize")
            .await
    }

    pub async fn list_projects(&self, owner: OwnerId) -> CoreResult<Vec<ProjectRecord>> {
        self.storage
            .list_projects(owner)
            .await
            .map_err(map_storage("project-list"))
    }

    pub async fn update_project(
        &self,
        owner: OwnerId,
        project_id: ProjectId,
        patch: ProjectPatch,
    ) -> CoreResult<ProjectRecord> {
        self.authorize_project(owner, project_id, "project-update-authorize")
            .await?;
        self.storage
            .update_project(project_id, patch)
            .await
            .map_err(map_storage("project-update"))
    }

    // --- prompts ---

    pub async fn create_prompt(
        &self,
        owner: OwnerId,
        project_id: ProjectId,
        title: &str,
        content: &str,
    ) -> CoreResult<PromptRecord> {
        ensure!(
            !title.trim().is_empty(),
            MissingFieldSnafu {
                stage: "prompt-create-validate",
                field: "title",
            }
        );
        ensure!(
            !content.trim().is_empty(),
            MissingFieldSnafu {
                stage: "prompt-create-validate",
                field: "content",
            }
        );

        self.authorize_project(owner, project_id, "prompt-create-authorize")
            .await?;
        self.storage
            .create_prompt(
                project_id,
                NewPrompt {
                    title: title.to_string(),
                    content: content.to_string(),
                },
            )
            .await
            .map_err(map_storage("prompt-create"))
    }

    pub async fn list_prompts(
        &self,
        owner: OwnerId,
        project_id: ProjectId,
    ) -> CoreResult<Vec<PromptRecord>> {
        self.authorize_project(owner, project_id, "prompt-list-authorize")
            .await?;
        self.storage
            .list_prompts(project_id)
            .await
            .map_err(map_storage("prompt-list"))
    }

    // --- sessions and messages ---

    pub async fn create_session(
        &self,
        owner: OwnerId,
        project_id: ProjectId,
    ) -> CoreResult<SessionRecord> {
        self.authorize_project(owner, project_id, "session-create-authorize")
            .await?;
        self.storage
            .create_session(project_id, DEFAULT_SESSION_TITLE.to_string())
            .await
            .map_err(map_storage("session-create"))
    }

    pub async fn get_session(
        &self,
        owner: OwnerId,
        session_id: SessionId,
    ) -> CoreResult<SessionRecord> {
        self.authorize_session(owner, session_id, "session-get-authorize")
            .await
    }

    pub async fn list_sessions(
        &self,
        owner: OwnerId,
        project_id: ProjectId,
    ) -> CoreResult<Vec<SessionRecord>> {
        self.authorize_project(owner, project_id, "session-list-authorize")
            .await?;
        self.storage
            .list_sessions(project_id)
            .await
            .map_err(map_storage("session-list"))
    }

    pub async fn list_messages(
        &self,
        owner: OwnerId,
        session_id: SessionId,
    ) -> CoreResult<Vec<MessageRecord>> {
        self.authorize_session(owner, session_id, "message-list-authorize")
            .await?;
        self.storage
            .list_messages(session_id)
            .await
            .map_err(map_storage("message-list"))
    }

    /// Ownership gate: a project that exists but belongs to someone else is
    /// indistinguishable from a missing one.
    pub(crate) async fn authorize_project(
        &self,
        owner: OwnerId,
        project_id: ProjectId,
        stage: &'static str,
    ) -> CoreResult<ProjectRecord> {
        let project = self
            .storage
            .get_project(project_id)
            .await
            .map_err(map_storage(stage))?;

        match project {
            Some(project) if project.owner_id == owner => Ok(project),
            _ => NotFoundSnafu {
                stage,
                entity: "project",
                id: project_id.to_string(),
            }
            .fail(),
        }
    }

    pub(crate) async fn authorize_session(
        &self,
        owner: OwnerId,
        session_id: SessionId,
        stage: &'static str,
    ) -> CoreResult<SessionRecord> {
        let session = self
            .storage
            .get_session(session_id)
            .await
            .map_err(map_storage(stage))?;

        let Some(session) = session else {
            return NotFoundSnafu {
                stage,
                entity: "session",
                id: session_id.to_string(),
            }
            .fail();
        };

        // A session reached through the wrong owner is also just not found.
        match self.authorize_project(owner, session.project_id, stage).await {
            Ok(_) => Ok(session),
            Err(_) => NotFoundSnafu {
                stage,
                entity: "session",
                id: session_id.to_string(),
            }
            .fail(),
        }
    }
}
