//! PostgreSQL-backed project host.
//!
//! Entities live in the tables created by `migrations/`. Attachment content
//! lives on disk under `<env>/attachments/wiki/<page>/<file>`; a unit of work
//! stages new files in a sibling directory and swaps it in on commit.

use super::{Collection, ProjectStore, StoreError, UnitOfWork};
use crate::bundle::codecs::{is_safe_component, is_safe_relative};
use crate::models::{
    Attachment, Component, Group, GroupKind, MailingList, Milestone, PermissionGrant, Priority,
    TicketTypeHeader, Version, WikiPage, Workflow,
};
use rocket_db_pools::sqlx::{self, PgPool, Postgres, Transaction, migrate::Migrator};
use std::path::{Path, PathBuf};
use uuid::Uuid;

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Apply pending schema migrations. Already-applied migrations are skipped.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    log::info!("checking database migration state");
    MIGRATOR.run(pool).await?;
    log::info!("database migrations up to date");
    Ok(())
}

const UNIQUE_VIOLATION: &str = "23505";

fn insert_error(err: sqlx::Error, what: &str) -> StoreError {
    match &err {
        sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some(UNIQUE_VIOLATION) => {
            StoreError::rejected(format!("duplicate {what}"))
        }
        _ => StoreError::Database(err),
    }
}

pub struct PgProject {
    pool: PgPool,
    name: String,
    env_path: PathBuf,
    repository: PathBuf,
}

impl PgProject {
    pub fn new(
        pool: PgPool,
        name: impl Into<String>,
        env_path: impl Into<PathBuf>,
        repository: impl Into<PathBuf>,
    ) -> Self {
        Self {
            pool,
            name: name.into(),
            env_path: env_path.into(),
            repository: repository.into(),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn attachments_root(&self) -> PathBuf {
        self.env_path.join("attachments")
    }

    fn attachment_path(root: &Path, attachment: &Attachment) -> PathBuf {
        root.join(&attachment.parent_id).join(&attachment.filename)
    }
}

#[rocket::async_trait]
impl ProjectStore for PgProject {
    fn project_name(&self) -> &str {
        &self.name
    }

    fn repository_path(&self) -> PathBuf {
        self.repository.clone()
    }

    async fn wiki_pages(&self) -> Result<Vec<WikiPage>, StoreError> {
        let pages = sqlx::query_as::<_, WikiPage>(
            "SELECT name, readonly, author, text FROM wiki_pages WHERE NOT deleted ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(pages)
    }

    async fn attachments(&self) -> Result<Vec<Attachment>, StoreError> {
        let attachments = sqlx::query_as::<_, Attachment>(
            r#"SELECT parent_id, filename, size, version, description
               FROM attachments
               WHERE parent_type = 'wiki'
               ORDER BY parent_id, filename"#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(attachments)
    }

    async fn export_attachment(
        &self,
        attachment: &Attachment,
        dest: &Path,
    ) -> Result<u64, StoreError> {
        if !is_safe_relative(&attachment.parent_id) || !is_safe_component(&attachment.filename) {
            return Err(StoreError::rejected(format!(
                "unsafe attachment path `{}/{}`",
                attachment.parent_id, attachment.filename
            )));
        }
        let source = Self::attachment_path(&self.attachments_root().join("wiki"), attachment);
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        match tokio::fs::copy(&source, dest).await {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Err(StoreError::NotFound(
                format!("attachment file {}", source.display()),
            )),
            Err(err) => Err(err.into()),
        }
    }

    async fn ticket_type_names(&self) -> Result<Vec<String>, StoreError> {
        let names: Vec<String> = sqlx::query_scalar("SELECT name FROM ticket_types ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        Ok(names)
    }

    async fn serialize_ticket_type(&self, name: &str) -> Result<String, StoreError> {
        let definition: Option<String> =
            sqlx::query_scalar("SELECT definition FROM ticket_types WHERE name = $1")
                .bind(name)
                .fetch_optional(&self.pool)
                .await?;
        definition.ok_or_else(|| StoreError::NotFound(format!("ticket type {name}")))
    }

    async fn workflows(&self) -> Result<Vec<Workflow>, StoreError> {
        let workflows = sqlx::query_as::<_, Workflow>(
            "SELECT name, definition FROM workflows ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(workflows)
    }

    async fn priorities(&self) -> Result<Vec<Priority>, StoreError> {
        let priorities = sqlx::query_as::<_, Priority>(
            "SELECT name, value FROM priorities ORDER BY value, name",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(priorities)
    }

    async fn versions(&self) -> Result<Vec<Version>, StoreError> {
        let versions = sqlx::query_as::<_, Version>(
            "SELECT name, time, description FROM versions ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(versions)
    }

    async fn components(&self) -> Result<Vec<Component>, StoreError> {
        let components = sqlx::query_as::<_, Component>(
            "SELECT name, owner, description FROM components ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(components)
    }

    async fn groups(&self) -> Result<Vec<Group>, StoreError> {
        let rows: Vec<(String, String, Option<String>, String)> = sqlx::query_as(
            "SELECT sid, label, description, kind FROM project_groups ORDER BY sid",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(sid, label, description, kind)| {
                let kind = kind
                    .parse::<GroupKind>()
                    .map_err(|e| StoreError::rejected(format!("group {sid}: {e}")))?;
                Ok(Group {
                    sid,
                    label,
                    description,
                    kind,
                })
            })
            .collect()
    }

    async fn permissions(&self) -> Result<Vec<PermissionGrant>, StoreError> {
        let grants = sqlx::query_as::<_, PermissionGrant>(
            "SELECT principal, action FROM permissions ORDER BY principal, action",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(grants)
    }

    async fn mailing_lists(&self) -> Result<Vec<MailingList>, StoreError> {
        let lists = sqlx::query_as::<_, MailingList>(
            r#"SELECT name, email, description, private, postperm, replyto
               FROM mailing_lists
               ORDER BY name"#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(lists)
    }

    async fn milestones(&self) -> Result<Vec<Milestone>, StoreError> {
        let milestones = sqlx::query_as::<_, Milestone>(
            r#"SELECT name, start, due, completed, description, parent
               FROM milestones
               ORDER BY name"#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(milestones)
    }

    async fn begin<'a>(&'a self) -> Result<Box<dyn UnitOfWork + 'a>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgUnit {
            tx: Some(tx),
            attachments_root: self.attachments_root(),
            staging: None,
        }))
    }
}

struct PgUnit {
    tx: Option<Transaction<'static, Postgres>>,
    attachments_root: PathBuf,
    /// Replacement attachment tree, created when attachments are cleared.
    staging: Option<PathBuf>,
}

impl PgUnit {
    fn tx(&mut self) -> Result<&mut Transaction<'static, Postgres>, StoreError> {
        self.tx
            .as_mut()
            .ok_or_else(|| StoreError::rejected("unit of work already committed"))
    }

    async fn staging_dir(&mut self) -> Result<PathBuf, StoreError> {
        if let Some(staging) = &self.staging {
            return Ok(staging.clone());
        }
        let staging = self
            .attachments_root
            .join(format!(".staging-{}", Uuid::new_v4().simple()));
        tokio::fs::create_dir_all(&staging).await?;
        self.staging = Some(staging.clone());
        Ok(staging)
    }

    /// Replace the live attachment tree with the staged one.
    ///
    /// Returns the retired tree so it can be restored if the transaction
    /// fails to commit. If the staged tree cannot be moved into place the
    /// live tree is put back before the error is returned.
    async fn swap_attachments(&mut self, staging: &Path) -> Result<Option<PathBuf>, StoreError> {
        let live = self.attachments_root.join("wiki");
        let retired = if tokio::fs::try_exists(&live).await? {
            let retired = self
                .attachments_root
                .join(format!(".retired-{}", Uuid::new_v4().simple()));
            tokio::fs::rename(&live, &retired).await?;
            Some(retired)
        } else {
            None
        };
        if let Err(err) = tokio::fs::rename(staging, &live).await {
            if let Some(retired) = &retired {
                if let Err(restore_err) = restore_tree(&live, retired).await {
                    log::error!(
                        "failed to restore attachments from {}: {}",
                        retired.display(),
                        restore_err
                    );
                }
            }
            return Err(err.into());
        }
        self.staging = None;
        Ok(retired)
    }
}

#[rocket::async_trait]
impl UnitOfWork for PgUnit {
    async fn clear(&mut self, collection: Collection) -> Result<u64, StoreError> {
        let sql = match collection {
            Collection::WikiPages => "DELETE FROM wiki_pages",
            Collection::WikiAttachments => "DELETE FROM attachments WHERE parent_type = 'wiki'",
            Collection::Workflows => "DELETE FROM workflows",
            Collection::TicketTypes => "DELETE FROM ticket_types",
            Collection::Priorities => "DELETE FROM priorities",
            Collection::Versions => "DELETE FROM versions",
            Collection::Components => "DELETE FROM components",
            Collection::Groups => "DELETE FROM project_groups",
            Collection::Permissions => "DELETE FROM permissions",
            Collection::MailingLists => "DELETE FROM mailing_lists",
            Collection::Milestones => "DELETE FROM milestones",
        };
        if collection == Collection::WikiAttachments {
            self.staging_dir().await?;
        }
        let tx = self.tx()?;
        let result = sqlx::query(sql).execute(&mut **tx).await?;
        log::debug!("cleared {} rows from {}", result.rows_affected(), collection);
        Ok(result.rows_affected())
    }

    async fn create_wiki_page(&mut self, page: &WikiPage) -> Result<(), StoreError> {
        let tx = self.tx()?;
        sqlx::query("INSERT INTO wiki_pages (name, readonly, author, text) VALUES ($1, $2, $3, $4)")
            .bind(&page.name)
            .bind(page.readonly)
            .bind(&page.author)
            .bind(&page.text)
            .execute(&mut **tx)
            .await
            .map_err(|e| insert_error(e, &format!("wiki page `{}`", page.name)))?;
        Ok(())
    }

    async fn store_attachment(
        &mut self,
        attachment: &Attachment,
        content: &Path,
    ) -> Result<(), StoreError> {
        let staging = self.staging_dir().await?;
        let dest = PgProject::attachment_path(&staging, attachment);
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(content, &dest).await?;

        let tx = self.tx()?;
        sqlx::query(
            r#"INSERT INTO attachments (parent_type, parent_id, filename, size, version, description)
               VALUES ('wiki', $1, $2, $3, $4, $5)"#,
        )
        .bind(&attachment.parent_id)
        .bind(&attachment.filename)
        .bind(attachment.size)
        .bind(attachment.version)
        .bind(&attachment.description)
        .execute(&mut **tx)
        .await
        .map_err(|e| {
            insert_error(
                e,
                &format!("attachment `{}/{}`", attachment.parent_id, attachment.filename),
            )
        })?;
        Ok(())
    }

    async fn install_workflow(&mut self, workflow: &Workflow) -> Result<(), StoreError> {
        let tx = self.tx()?;
        sqlx::query(
            r#"INSERT INTO workflows (name, definition) VALUES ($1, $2)
               ON CONFLICT (name) DO UPDATE SET definition = EXCLUDED.definition"#,
        )
        .bind(&workflow.name)
        .bind(&workflow.definition)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn apply_ticket_type_definition(&mut self, payload: &str) -> Result<String, StoreError> {
        let header = TicketTypeHeader::parse(payload)
            .map_err(|e| StoreError::rejected(format!("invalid ticket type definition: {e}")))?;
        let tx = self.tx()?;

        if let Some(workflow) = &header.workflow {
            let installed: Option<String> =
                sqlx::query_scalar("SELECT name FROM workflows WHERE name = $1")
                    .bind(workflow)
                    .fetch_optional(&mut **tx)
                    .await?;
            if installed.is_none() {
                return Err(StoreError::rejected(format!(
                    "ticket type `{}` uses unknown workflow `{}`",
                    header.name, workflow
                )));
            }
        }

        sqlx::query(
            r#"INSERT INTO ticket_types (name, workflow, definition) VALUES ($1, $2, $3)
               ON CONFLICT (name) DO UPDATE
               SET workflow = EXCLUDED.workflow, definition = EXCLUDED.definition"#,
        )
        .bind(&header.name)
        .bind(&header.workflow)
        .bind(payload)
        .execute(&mut **tx)
        .await?;
        Ok(header.name)
    }

    async fn insert_priority(&mut self, priority: &Priority) -> Result<(), StoreError> {
        let tx = self.tx()?;
        sqlx::query("INSERT INTO priorities (name, value) VALUES ($1, $2)")
            .bind(&priority.name)
            .bind(priority.value)
            .execute(&mut **tx)
            .await
            .map_err(|e| insert_error(e, &format!("priority `{}`", priority.name)))?;
        Ok(())
    }

    async fn insert_version(&mut self, version: &Version) -> Result<(), StoreError> {
        let tx = self.tx()?;
        sqlx::query("INSERT INTO versions (name, time, description) VALUES ($1, $2, $3)")
            .bind(&version.name)
            .bind(version.time)
            .bind(&version.description)
            .execute(&mut **tx)
            .await
            .map_err(|e| insert_error(e, &format!("version `{}`", version.name)))?;
        Ok(())
    }

    async fn insert_component(&mut self, component: &Component) -> Result<(), StoreError> {
        let tx = self.tx()?;
        sqlx::query("INSERT INTO components (name, owner, description) VALUES ($1, $2, $3)")
            .bind(&component.name)
            .bind(&component.owner)
            .bind(&component.description)
            .execute(&mut **tx)
            .await
            .map_err(|e| insert_error(e, &format!("component `{}`", component.name)))?;
        Ok(())
    }

    async fn create_group(&mut self, group: &Group) -> Result<(), StoreError> {
        let tx = self.tx()?;
        sqlx::query(
            "INSERT INTO project_groups (sid, label, description, kind) VALUES ($1, $2, $3, $4)",
        )
        .bind(&group.sid)
        .bind(&group.label)
        .bind(&group.description)
        .bind(group.kind.as_str())
        .execute(&mut **tx)
        .await
        .map_err(|e| insert_error(e, &format!("group `{}`", group.sid)))?;
        Ok(())
    }

    async fn grant_permission(&mut self, grant: &PermissionGrant) -> Result<(), StoreError> {
        let tx = self.tx()?;
        sqlx::query(
            "INSERT INTO permissions (principal, action) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(&grant.principal)
        .bind(&grant.action)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn insert_mailing_list(&mut self, list: &MailingList) -> Result<(), StoreError> {
        let tx = self.tx()?;
        sqlx::query(
            r#"INSERT INTO mailing_lists (name, email, description, private, postperm, replyto)
               VALUES ($1, $2, $3, $4, $5, $6)"#,
        )
        .bind(&list.name)
        .bind(&list.email)
        .bind(&list.description)
        .bind(list.private)
        .bind(&list.postperm)
        .bind(&list.replyto)
        .execute(&mut **tx)
        .await
        .map_err(|e| insert_error(e, &format!("mailing list `{}`", list.name)))?;
        Ok(())
    }

    async fn insert_milestone(&mut self, milestone: &Milestone) -> Result<(), StoreError> {
        let tx = self.tx()?;
        sqlx::query(
            r#"INSERT INTO milestones (name, start, due, completed, description, parent)
               VALUES ($1, $2, $3, $4, $5, $6)"#,
        )
        .bind(&milestone.name)
        .bind(milestone.start)
        .bind(milestone.due)
        .bind(milestone.completed)
        .bind(&milestone.description)
        .bind(&milestone.parent)
        .execute(&mut **tx)
        .await
        .map_err(|e| insert_error(e, &format!("milestone `{}`", milestone.name)))?;
        Ok(())
    }

    async fn set_milestone_parent(&mut self, name: &str, parent: &str) -> Result<(), StoreError> {
        let tx = self.tx()?;
        let result = sqlx::query("UPDATE milestones SET parent = $2 WHERE name = $1")
            .bind(name)
            .bind(parent)
            .execute(&mut **tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("milestone {name}")));
        }
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| StoreError::rejected("unit of work already committed"))?;

        let retired = match self.staging.clone() {
            Some(staging) => self.swap_attachments(&staging).await?,
            None => None,
        };

        if let Err(err) = tx.commit().await {
            if let Some(retired) = retired {
                let live = self.attachments_root.join("wiki");
                if let Err(restore_err) = restore_tree(&live, &retired).await {
                    log::error!(
                        "failed to restore attachments from {}: {}",
                        retired.display(),
                        restore_err
                    );
                }
            }
            return Err(err.into());
        }

        if let Some(retired) = retired {
            if let Err(err) = tokio::fs::remove_dir_all(&retired).await {
                log::warn!("failed to remove {}: {}", retired.display(), err);
            }
        }
        Ok(())
    }
}

async fn restore_tree(live: &Path, retired: &Path) -> std::io::Result<()> {
    if tokio::fs::try_exists(live).await? {
        tokio::fs::remove_dir_all(live).await?;
    }
    tokio::fs::rename(retired, live).await
}

impl Drop for PgUnit {
    fn drop(&mut self) {
        // The transaction rolls itself back when dropped; only staged files remain.
        if let Some(staging) = self.staging.take() {
            if let Err(err) = std::fs::remove_dir_all(&staging) {
                log::warn!("failed to remove staging directory {}: {}", staging.display(), err);
            }
        }
    }
}
