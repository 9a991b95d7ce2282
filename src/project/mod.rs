//! Host project collaborators.
//!
//! The bundle engine never touches a project's tables or files directly. It
//! reads live entities through [`ProjectStore`] and replaces them through a
//! [`UnitOfWork`], which is committed explicitly and rolled back when dropped.
//!
//! Two hosts ship with the crate:
//!
//! - [`PgProject`]: the project lives in PostgreSQL, attachment files under the
//!   project environment directory.
//! - [`MemoryProject`]: an in-process project with an operation journal, used by
//!   tests and dry runs.

pub mod memory;
pub mod postgres;

pub use memory::{MemoryProject, ProjectState};
pub use postgres::{PgProject, run_migrations};

use crate::models::{
    Attachment, Component, Group, MailingList, Milestone, PermissionGrant, Priority, Version,
    WikiPage, Workflow,
};
use rocket_db_pools::sqlx;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised by a host project.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("rejected by project: {0}")]
    Rejected(String),
    #[error("not found in project: {0}")]
    NotFound(String),
}

impl StoreError {
    pub fn rejected(reason: impl Into<String>) -> Self {
        StoreError::Rejected(reason.into())
    }
}

/// A live collection that a unit of work can clear.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    WikiPages,
    WikiAttachments,
    Workflows,
    TicketTypes,
    Priorities,
    Versions,
    Components,
    Groups,
    Permissions,
    MailingLists,
    Milestones,
}

impl Collection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::WikiPages => "wiki_pages",
            Collection::WikiAttachments => "wiki_attachments",
            Collection::Workflows => "workflows",
            Collection::TicketTypes => "ticket_types",
            Collection::Priorities => "priorities",
            Collection::Versions => "versions",
            Collection::Components => "components",
            Collection::Groups => "groups",
            Collection::Permissions => "permissions",
            Collection::MailingLists => "mailing_lists",
            Collection::Milestones => "milestones",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read access to a project plus the entry point for atomic replacement.
#[rocket::async_trait]
pub trait ProjectStore: Send + Sync {
    fn project_name(&self) -> &str;

    /// Location of the project's version-control repository. It may not exist.
    fn repository_path(&self) -> PathBuf;

    /// All live wiki pages (deleted pages excluded).
    async fn wiki_pages(&self) -> Result<Vec<WikiPage>, StoreError>;

    async fn attachments(&self) -> Result<Vec<Attachment>, StoreError>;

    /// Copy an attachment's content to `dest`, returning the number of bytes written.
    async fn export_attachment(&self, attachment: &Attachment, dest: &Path)
    -> Result<u64, StoreError>;

    async fn ticket_type_names(&self) -> Result<Vec<String>, StoreError>;

    /// Serialize a ticket type through the ticket-type subsystem.
    ///
    /// The returned payload is opaque to the caller and is accepted unchanged by
    /// [`UnitOfWork::apply_ticket_type_definition`].
    async fn serialize_ticket_type(&self, name: &str) -> Result<String, StoreError>;

    async fn workflows(&self) -> Result<Vec<Workflow>, StoreError>;
    async fn priorities(&self) -> Result<Vec<Priority>, StoreError>;
    async fn versions(&self) -> Result<Vec<Version>, StoreError>;
    async fn components(&self) -> Result<Vec<Component>, StoreError>;
    async fn groups(&self) -> Result<Vec<Group>, StoreError>;
    async fn permissions(&self) -> Result<Vec<PermissionGrant>, StoreError>;
    async fn mailing_lists(&self) -> Result<Vec<MailingList>, StoreError>;
    async fn milestones(&self) -> Result<Vec<Milestone>, StoreError>;

    /// Open a unit of work. Nothing it does is visible until [`UnitOfWork::commit`].
    async fn begin<'a>(&'a self) -> Result<Box<dyn UnitOfWork + 'a>, StoreError>;
}

/// A scoped set of mutations against a project.
///
/// Dropping a unit without committing rolls every mutation back, so an early
/// return through `?` can never leave a half-replaced collection behind.
#[rocket::async_trait]
pub trait UnitOfWork: Send {
    /// Remove every entity of `collection`, returning how many were removed.
    async fn clear(&mut self, collection: Collection) -> Result<u64, StoreError>;

    async fn create_wiki_page(&mut self, page: &WikiPage) -> Result<(), StoreError>;

    /// Register an attachment whose content is read from `content`.
    async fn store_attachment(
        &mut self,
        attachment: &Attachment,
        content: &Path,
    ) -> Result<(), StoreError>;

    async fn install_workflow(&mut self, workflow: &Workflow) -> Result<(), StoreError>;

    /// Apply an opaque ticket-type payload, returning the ticket type's name.
    ///
    /// Payloads referring to a workflow that is not installed are rejected.
    async fn apply_ticket_type_definition(&mut self, payload: &str) -> Result<String, StoreError>;

    async fn insert_priority(&mut self, priority: &Priority) -> Result<(), StoreError>;
    async fn insert_version(&mut self, version: &Version) -> Result<(), StoreError>;
    async fn insert_component(&mut self, component: &Component) -> Result<(), StoreError>;
    async fn create_group(&mut self, group: &Group) -> Result<(), StoreError>;
    async fn grant_permission(&mut self, grant: &PermissionGrant) -> Result<(), StoreError>;
    async fn insert_mailing_list(&mut self, list: &MailingList) -> Result<(), StoreError>;
    async fn insert_milestone(&mut self, milestone: &Milestone) -> Result<(), StoreError>;
    async fn set_milestone_parent(&mut self, name: &str, parent: &str) -> Result<(), StoreError>;

    async fn commit(&mut self) -> Result<(), StoreError>;
}
