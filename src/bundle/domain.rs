use rocket_okapi::okapi::schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A unit of project state exported and imported as a whole.
///
/// Declaration order is the export and import order: workflows come before
/// ticket types, groups before permissions.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Wiki,
    Attachments,
    Workflows,
    TicketTypes,
    Priorities,
    Versions,
    Components,
    Archive,
    Groups,
    Permissions,
    MailingLists,
    Milestones,
}

impl Domain {
    pub const ALL: [Domain; 12] = [
        Domain::Wiki,
        Domain::Attachments,
        Domain::Workflows,
        Domain::TicketTypes,
        Domain::Priorities,
        Domain::Versions,
        Domain::Components,
        Domain::Archive,
        Domain::Groups,
        Domain::Permissions,
        Domain::MailingLists,
        Domain::Milestones,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Wiki => "wiki",
            Domain::Attachments => "attachments",
            Domain::Workflows => "workflows",
            Domain::TicketTypes => "ticket_types",
            Domain::Priorities => "priorities",
            Domain::Versions => "versions",
            Domain::Components => "components",
            Domain::Archive => "archive",
            Domain::Groups => "groups",
            Domain::Permissions => "permissions",
            Domain::MailingLists => "mailing_lists",
            Domain::Milestones => "milestones",
        }
    }

    /// Manifest entry whose presence means this domain has an artifact.
    pub fn manifest_entry(&self) -> &'static str {
        match self {
            Domain::Wiki => "wiki",
            Domain::Attachments => "attachment",
            Domain::Workflows => "workflows",
            Domain::TicketTypes => "ticket",
            Domain::Priorities => "priority",
            Domain::Versions => "version",
            Domain::Components => "component",
            Domain::Archive => "archive",
            Domain::Groups | Domain::Permissions => "group",
            Domain::MailingLists => "mailinglist",
            Domain::Milestones => "milestone",
        }
    }

    /// Selection flag that turns this domain on for export.
    pub fn flag(&self) -> Flag {
        match self {
            Domain::Wiki | Domain::Attachments => Flag::Wiki,
            Domain::Workflows
            | Domain::TicketTypes
            | Domain::Priorities
            | Domain::Versions
            | Domain::Components => Flag::Ticket,
            Domain::Archive => Flag::Archive,
            Domain::Groups | Domain::Permissions => Flag::Group,
            Domain::MailingLists => Flag::List,
            Domain::Milestones => Flag::Milestone,
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Export selection flags, as offered to the administrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Flag {
    Wiki,
    Ticket,
    Archive,
    Group,
    List,
    Milestone,
}

impl Flag {
    pub const ALL: [Flag; 6] = [
        Flag::Wiki,
        Flag::Ticket,
        Flag::Archive,
        Flag::Group,
        Flag::List,
        Flag::Milestone,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Flag::Wiki => "wiki",
            Flag::Ticket => "ticket",
            Flag::Archive => "archive",
            Flag::Group => "group",
            Flag::List => "list",
            Flag::Milestone => "milestone",
        }
    }
}

impl FromStr for Flag {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Flag::ALL
            .into_iter()
            .find(|flag| flag.as_str() == value.trim())
            .ok_or_else(|| {
                format!(
                    "unknown domain flag `{}` (expected one of: wiki, ticket, archive, group, list, milestone)",
                    value.trim()
                )
            })
    }
}

/// Which flags an export request turned on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Selection {
    pub wiki: bool,
    pub ticket: bool,
    pub archive: bool,
    pub group: bool,
    pub list: bool,
    pub milestone: bool,
}

impl Selection {
    pub fn all() -> Self {
        Self {
            wiki: true,
            ticket: true,
            archive: true,
            group: true,
            list: true,
            milestone: true,
        }
    }

    /// Build a selection from flag names such as `["wiki", "group"]`.
    pub fn from_flags<I, S>(flags: I) -> Result<Self, String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut selection = Selection::default();
        for flag in flags {
            selection.set(flag.as_ref().parse()?);
        }
        Ok(selection)
    }

    pub fn set(&mut self, flag: Flag) {
        match flag {
            Flag::Wiki => self.wiki = true,
            Flag::Ticket => self.ticket = true,
            Flag::Archive => self.archive = true,
            Flag::Group => self.group = true,
            Flag::List => self.list = true,
            Flag::Milestone => self.milestone = true,
        }
    }

    pub fn contains(&self, flag: Flag) -> bool {
        match flag {
            Flag::Wiki => self.wiki,
            Flag::Ticket => self.ticket,
            Flag::Archive => self.archive,
            Flag::Group => self.group,
            Flag::List => self.list,
            Flag::Milestone => self.milestone,
        }
    }

    pub fn includes(&self, domain: Domain) -> bool {
        self.contains(domain.flag())
    }

    pub fn is_empty(&self) -> bool {
        *self == Selection::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_order_puts_dependencies_first() {
        let position = |d: Domain| Domain::ALL.iter().position(|x| *x == d).unwrap();
        assert!(position(Domain::Workflows) < position(Domain::TicketTypes));
        assert!(position(Domain::Wiki) < position(Domain::Attachments));
        assert!(position(Domain::Groups) < position(Domain::Permissions));

        let mut sorted = Domain::ALL;
        sorted.sort();
        assert_eq!(sorted, Domain::ALL);
    }

    #[test]
    fn selection_parses_known_flags_only() {
        let selection = Selection::from_flags(["wiki", "group"]).unwrap();
        assert!(selection.includes(Domain::Attachments));
        assert!(selection.includes(Domain::Permissions));
        assert!(!selection.includes(Domain::Workflows));

        assert!(Selection::from_flags(["tickets"]).is_err());
        assert!(Selection::from_flags(Vec::<String>::new()).unwrap().is_empty());
    }
}
