use chrono::{DateTime, Utc};
use rocket_db_pools::sqlx::FromRow;
use rocket_okapi::okapi::schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ===== Wiki =====

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct WikiPage {
    pub name: String,
    pub readonly: bool,
    pub author: Option<String>,
    pub text: String,
}

/// Metadata for a file attached to a wiki page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Attachment {
    pub parent_id: String,
    pub filename: String,
    pub size: i64,
    pub version: i32,
    pub description: Option<String>,
}

// ===== Ticket taxonomy =====

/// A named workflow definition. The definition is kept as the raw document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Workflow {
    pub name: String,
    pub definition: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Priority {
    pub name: String,
    pub value: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Version {
    pub name: String,
    pub time: Option<DateTime<Utc>>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Component {
    pub name: String,
    pub owner: Option<String>,
    pub description: Option<String>,
}

/// The part of a ticket-type definition the host inspects when applying it.
///
/// Everything else in the payload is opaque to the bundle engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketTypeHeader {
    pub name: String,
    #[serde(default)]
    pub workflow: Option<String>,
}

impl TicketTypeHeader {
    pub fn parse(payload: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(payload)
    }
}

// ===== Groups and permissions =====

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupKind {
    /// Membership group managed inside the project.
    Project,
    /// Group linked to an external directory domain.
    Domain,
}

impl GroupKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            GroupKind::Project => "project",
            GroupKind::Domain => "domain",
        }
    }
}

impl fmt::Display for GroupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GroupKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "project" => Ok(GroupKind::Project),
            "domain" => Ok(GroupKind::Domain),
            other => Err(format!("unknown group kind `{other}`")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub sid: String,
    pub label: String,
    pub description: Option<String>,
    pub kind: GroupKind,
}

/// Virtual principal every logged-in user belongs to.
pub const AUTHENTICATED: &str = "authenticated";
/// Virtual principal covering every visitor.
pub const ANONYMOUS: &str = "anonymous";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, FromRow)]
pub struct PermissionGrant {
    pub principal: String,
    pub action: String,
}

impl PermissionGrant {
    pub fn new(principal: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            principal: principal.into(),
            action: action.into(),
        }
    }
}

// ===== Mailing lists and milestones =====

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct MailingList {
    pub name: String,
    pub email: String,
    pub description: Option<String>,
    pub private: bool,
    pub postperm: String,
    pub replyto: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Milestone {
    pub name: String,
    pub start: Option<DateTime<Utc>>,
    pub due: Option<DateTime<Utc>>,
    pub completed: Option<DateTime<Utc>>,
    pub description: Option<String>,
    pub parent: Option<String>,
}

impl Milestone {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            start: None,
            due: None,
            completed: None,
            description: None,
            parent: None,
        }
    }
}

// ===== API envelopes =====

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ApiResponse<T> {
    pub data: T,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_kind_parses_case_insensitively() {
        assert_eq!("Project".parse::<GroupKind>(), Ok(GroupKind::Project));
        assert_eq!(" domain ".parse::<GroupKind>(), Ok(GroupKind::Domain));
        assert!("team".parse::<GroupKind>().is_err());
    }

    #[test]
    fn ticket_type_header_ignores_opaque_fields() {
        let header = TicketTypeHeader::parse(
            r#"{"name":"defect","workflow":"bugs","fields":[{"name":"severity"}]}"#,
        )
        .unwrap();
        assert_eq!(header.name, "defect");
        assert_eq!(header.workflow.as_deref(), Some("bugs"));

        let header = TicketTypeHeader::parse(r#"{"name":"task"}"#).unwrap();
        assert_eq!(header.workflow, None);
    }
}
