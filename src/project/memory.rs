//! In-process project host.
//!
//! A unit of work operates on a private copy of the project state and swaps it
//! in on commit, so readers only ever observe whole collections. Every call is
//! appended to a journal that tests use to check the order operations reached
//! the host in.

use super::{Collection, ProjectStore, StoreError, UnitOfWork};
use crate::models::{
    Attachment, Component, Group, MailingList, Milestone, PermissionGrant, Priority,
    TicketTypeHeader, Version, WikiPage, Workflow,
};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// Complete live state of an in-memory project.
#[derive(Debug, Clone, Default)]
pub struct ProjectState {
    pub wiki: BTreeMap<String, WikiPage>,
    /// Keyed by (parent page, filename); the value carries the file content.
    pub attachments: BTreeMap<(String, String), (Attachment, Vec<u8>)>,
    pub workflows: BTreeMap<String, Workflow>,
    /// Ticket type name to the payload it was applied from.
    pub ticket_types: BTreeMap<String, String>,
    pub priorities: Vec<Priority>,
    pub versions: Vec<Version>,
    pub components: Vec<Component>,
    pub groups: BTreeMap<String, Group>,
    pub permissions: BTreeSet<PermissionGrant>,
    pub mailing_lists: Vec<MailingList>,
    pub milestones: Vec<Milestone>,
}

impl ProjectState {
    fn clear(&mut self, collection: Collection) -> u64 {
        fn drain<T>(items: &mut Vec<T>) -> u64 {
            let removed = items.len() as u64;
            items.clear();
            removed
        }

        match collection {
            Collection::WikiPages => {
                let removed = self.wiki.len() as u64;
                self.wiki.clear();
                removed
            }
            Collection::WikiAttachments => {
                let removed = self.attachments.len() as u64;
                self.attachments.clear();
                removed
            }
            Collection::Workflows => {
                let removed = self.workflows.len() as u64;
                self.workflows.clear();
                removed
            }
            Collection::TicketTypes => {
                let removed = self.ticket_types.len() as u64;
                self.ticket_types.clear();
                removed
            }
            Collection::Priorities => drain(&mut self.priorities),
            Collection::Versions => drain(&mut self.versions),
            Collection::Components => drain(&mut self.components),
            Collection::Groups => {
                let removed = self.groups.len() as u64;
                self.groups.clear();
                removed
            }
            Collection::Permissions => {
                let removed = self.permissions.len() as u64;
                self.permissions.clear();
                removed
            }
            Collection::MailingLists => drain(&mut self.mailing_lists),
            Collection::Milestones => drain(&mut self.milestones),
        }
    }
}

pub struct MemoryProject {
    name: String,
    repository: PathBuf,
    state: Mutex<ProjectState>,
    journal: Mutex<Vec<String>>,
}

impl MemoryProject {
    pub fn new(name: impl Into<String>, repository: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            repository: repository.into(),
            state: Mutex::new(ProjectState::default()),
            journal: Mutex::new(Vec::new()),
        }
    }

    /// Mutate the live state directly, bypassing units of work.
    pub fn seed(&self, f: impl FnOnce(&mut ProjectState)) {
        f(&mut self.state.lock());
    }

    pub fn state(&self) -> ProjectState {
        self.state.lock().clone()
    }

    /// Operations received so far, oldest first.
    pub fn journal(&self) -> Vec<String> {
        self.journal.lock().clone()
    }

    fn record(&self, entry: String) {
        self.journal.lock().push(entry);
    }
}

#[rocket::async_trait]
impl ProjectStore for MemoryProject {
    fn project_name(&self) -> &str {
        &self.name
    }

    fn repository_path(&self) -> PathBuf {
        self.repository.clone()
    }

    async fn wiki_pages(&self) -> Result<Vec<WikiPage>, StoreError> {
        Ok(self.state.lock().wiki.values().cloned().collect())
    }

    async fn attachments(&self) -> Result<Vec<Attachment>, StoreError> {
        Ok(self
            .state
            .lock()
            .attachments
            .values()
            .map(|(attachment, _)| attachment.clone())
            .collect())
    }

    async fn export_attachment(
        &self,
        attachment: &Attachment,
        dest: &Path,
    ) -> Result<u64, StoreError> {
        let content = {
            let state = self.state.lock();
            let key = (attachment.parent_id.clone(), attachment.filename.clone());
            state
                .attachments
                .get(&key)
                .map(|(_, content)| content.clone())
                .ok_or_else(|| {
                    StoreError::NotFound(format!(
                        "attachment {}/{}",
                        attachment.parent_id, attachment.filename
                    ))
                })?
        };

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(dest, &content).await?;
        Ok(content.len() as u64)
    }

    async fn ticket_type_names(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.state.lock().ticket_types.keys().cloned().collect())
    }

    async fn serialize_ticket_type(&self, name: &str) -> Result<String, StoreError> {
        self.state
            .lock()
            .ticket_types
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("ticket type {name}")))
    }

    async fn workflows(&self) -> Result<Vec<Workflow>, StoreError> {
        Ok(self.state.lock().workflows.values().cloned().collect())
    }

    async fn priorities(&self) -> Result<Vec<Priority>, StoreError> {
        Ok(self.state.lock().priorities.clone())
    }

    async fn versions(&self) -> Result<Vec<Version>, StoreError> {
        Ok(self.state.lock().versions.clone())
    }

    async fn components(&self) -> Result<Vec<Component>, StoreError> {
        Ok(self.state.lock().components.clone())
    }

    async fn groups(&self) -> Result<Vec<Group>, StoreError> {
        Ok(self.state.lock().groups.values().cloned().collect())
    }

    async fn permissions(&self) -> Result<Vec<PermissionGrant>, StoreError> {
        Ok(self.state.lock().permissions.iter().cloned().collect())
    }

    async fn mailing_lists(&self) -> Result<Vec<MailingList>, StoreError> {
        Ok(self.state.lock().mailing_lists.clone())
    }

    async fn milestones(&self) -> Result<Vec<Milestone>, StoreError> {
        Ok(self.state.lock().milestones.clone())
    }

    async fn begin<'a>(&'a self) -> Result<Box<dyn UnitOfWork + 'a>, StoreError> {
        let staged = self.state.lock().clone();
        self.record("begin".to_string());
        Ok(Box::new(MemoryUnit {
            project: self,
            staged,
            committed: false,
        }))
    }
}

struct MemoryUnit<'a> {
    project: &'a MemoryProject,
    staged: ProjectState,
    committed: bool,
}

impl MemoryUnit<'_> {
    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.committed {
            return Err(StoreError::rejected("unit of work already committed"));
        }
        Ok(())
    }

    fn insert_unique<T: Clone>(
        items: &mut Vec<T>,
        item: &T,
        name: &str,
        name_of: impl Fn(&T) -> &str,
        kind: &str,
    ) -> Result<(), StoreError> {
        if items.iter().any(|existing| name_of(existing) == name) {
            return Err(StoreError::rejected(format!("duplicate {kind} `{name}`")));
        }
        items.push(item.clone());
        Ok(())
    }
}

#[rocket::async_trait]
impl UnitOfWork for MemoryUnit<'_> {
    async fn clear(&mut self, collection: Collection) -> Result<u64, StoreError> {
        self.ensure_open()?;
        self.project.record(format!("clear:{collection}"));
        Ok(self.staged.clear(collection))
    }

    async fn create_wiki_page(&mut self, page: &WikiPage) -> Result<(), StoreError> {
        self.ensure_open()?;
        if self.staged.wiki.contains_key(&page.name) {
            return Err(StoreError::rejected(format!(
                "duplicate wiki page `{}`",
                page.name
            )));
        }
        self.project.record(format!("create_wiki_page:{}", page.name));
        self.staged.wiki.insert(page.name.clone(), page.clone());
        Ok(())
    }

    async fn store_attachment(
        &mut self,
        attachment: &Attachment,
        content: &Path,
    ) -> Result<(), StoreError> {
        self.ensure_open()?;
        let bytes = tokio::fs::read(content).await?;
        self.project.record(format!(
            "store_attachment:{}/{}",
            attachment.parent_id, attachment.filename
        ));
        self.staged.attachments.insert(
            (attachment.parent_id.clone(), attachment.filename.clone()),
            (attachment.clone(), bytes),
        );
        Ok(())
    }

    async fn install_workflow(&mut self, workflow: &Workflow) -> Result<(), StoreError> {
        self.ensure_open()?;
        self.project
            .record(format!("install_workflow:{}", workflow.name));
        self.staged
            .workflows
            .insert(workflow.name.clone(), workflow.clone());
        Ok(())
    }

    async fn apply_ticket_type_definition(&mut self, payload: &str) -> Result<String, StoreError> {
        self.ensure_open()?;
        let header = TicketTypeHeader::parse(payload)
            .map_err(|e| StoreError::rejected(format!("invalid ticket type definition: {e}")))?;
        if let Some(workflow) = &header.workflow {
            if !self.staged.workflows.contains_key(workflow) {
                return Err(StoreError::rejected(format!(
                    "ticket type `{}` uses unknown workflow `{}`",
                    header.name, workflow
                )));
            }
        }
        self.project
            .record(format!("apply_ticket_type:{}", header.name));
        self.staged
            .ticket_types
            .insert(header.name.clone(), payload.to_string());
        Ok(header.name)
    }

    async fn insert_priority(&mut self, priority: &Priority) -> Result<(), StoreError> {
        self.ensure_open()?;
        Self::insert_unique(
            &mut self.staged.priorities,
            priority,
            &priority.name,
            |p| &p.name,
            "priority",
        )
    }

    async fn insert_version(&mut self, version: &Version) -> Result<(), StoreError> {
        self.ensure_open()?;
        Self::insert_unique(
            &mut self.staged.versions,
            version,
            &version.name,
            |v| &v.name,
            "version",
        )
    }

    async fn insert_component(&mut self, component: &Component) -> Result<(), StoreError> {
        self.ensure_open()?;
        Self::insert_unique(
            &mut self.staged.components,
            component,
            &component.name,
            |c| &c.name,
            "component",
        )
    }

    async fn create_group(&mut self, group: &Group) -> Result<(), StoreError> {
        self.ensure_open()?;
        if self.staged.groups.contains_key(&group.sid) {
            return Err(StoreError::rejected(format!("duplicate group `{}`", group.sid)));
        }
        self.project.record(format!("create_group:{}", group.sid));
        self.staged.groups.insert(group.sid.clone(), group.clone());
        Ok(())
    }

    async fn grant_permission(&mut self, grant: &PermissionGrant) -> Result<(), StoreError> {
        self.ensure_open()?;
        self.project
            .record(format!("grant_permission:{}:{}", grant.principal, grant.action));
        self.staged.permissions.insert(grant.clone());
        Ok(())
    }

    async fn insert_mailing_list(&mut self, list: &MailingList) -> Result<(), StoreError> {
        self.ensure_open()?;
        Self::insert_unique(
            &mut self.staged.mailing_lists,
            list,
            &list.name,
            |l| &l.name,
            "mailing list",
        )
    }

    async fn insert_milestone(&mut self, milestone: &Milestone) -> Result<(), StoreError> {
        self.ensure_open()?;
        Self::insert_unique(
            &mut self.staged.milestones,
            milestone,
            &milestone.name,
            |m| &m.name,
            "milestone",
        )
    }

    async fn set_milestone_parent(&mut self, name: &str, parent: &str) -> Result<(), StoreError> {
        self.ensure_open()?;
        let milestone = self
            .staged
            .milestones
            .iter_mut()
            .find(|m| m.name == name)
            .ok_or_else(|| StoreError::NotFound(format!("milestone {name}")))?;
        milestone.parent = Some(parent.to_string());
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        self.ensure_open()?;
        *self.project.state.lock() = std::mem::take(&mut self.staged);
        self.committed = true;
        self.project.record("commit".to_string());
        Ok(())
    }
}

impl Drop for MemoryUnit<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.project.record("rollback".to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(name: &str, text: &str) -> WikiPage {
        WikiPage {
            name: name.to_string(),
            readonly: false,
            author: None,
            text: text.to_string(),
        }
    }

    #[tokio::test]
    async fn uncommitted_unit_leaves_state_untouched() {
        let project = MemoryProject::new("alpha", "/nonexistent");
        project.seed(|state| {
            state.wiki.insert("WikiStart".into(), page("WikiStart", "hello"));
        });

        {
            let mut unit = project.begin().await.unwrap();
            unit.clear(Collection::WikiPages).await.unwrap();
            unit.create_wiki_page(&page("Other", "text")).await.unwrap();
        }

        let state = project.state();
        assert_eq!(state.wiki.len(), 1);
        assert!(state.wiki.contains_key("WikiStart"));
        assert_eq!(project.journal().last().map(String::as_str), Some("rollback"));
    }

    #[tokio::test]
    async fn commit_swaps_in_staged_state() {
        let project = MemoryProject::new("alpha", "/nonexistent");
        project.seed(|state| {
            state.wiki.insert("WikiStart".into(), page("WikiStart", "hello"));
        });

        let mut unit = project.begin().await.unwrap();
        assert_eq!(unit.clear(Collection::WikiPages).await.unwrap(), 1);
        unit.create_wiki_page(&page("Other", "text")).await.unwrap();
        unit.commit().await.unwrap();
        drop(unit);

        let state = project.state();
        assert_eq!(state.wiki.keys().collect::<Vec<_>>(), vec!["Other"]);
        assert!(!project.journal().contains(&"rollback".to_string()));
    }

    #[tokio::test]
    async fn ticket_type_with_unknown_workflow_is_rejected() {
        let project = MemoryProject::new("alpha", "/nonexistent");
        let mut unit = project.begin().await.unwrap();

        let err = unit
            .apply_ticket_type_definition(r#"{"name":"defect","workflow":"bugs"}"#)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Rejected(_)));

        unit.install_workflow(&Workflow {
            name: "bugs".into(),
            definition: "<workflow/>".into(),
        })
        .await
        .unwrap();
        let name = unit
            .apply_ticket_type_definition(r#"{"name":"defect","workflow":"bugs"}"#)
            .await
            .unwrap();
        assert_eq!(name, "defect");
    }
}
