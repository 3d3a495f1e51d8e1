//! Bulk loading of the plain-text fixture format.
//!
//! A fixture is a list of sections, one per entity kind:
//!
//! ```text
//! == School ==
//! name | city | state
//! Lincoln High | Lincoln | NE
//!
//! == Club ==
//! name | school | president | vice_president | treasurer | secretary | members
//! Robotics | 1 | 1 | | | | 1 2
//! ```
//!
//! The first row of a section names its columns. References are 1-based row
//! numbers in the section of the referenced kind, and list cells hold
//! space-separated references. Blank lines and lines starting with `#` are
//! ignored.

use crate::{
    auth,
    directory::Directory,
    models::{
        Account, Achievement, Administrator, Club, Company, Competition, CompetitionHost, Entity,
        EntityId, EntityKind, JobOffer, Member, Notification, Post, School, User,
    },
    store::StoreError,
};
use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

const SECTIONS: [(&str, EntityKind); 12] = [
    ("School", EntityKind::School),
    ("User", EntityKind::User),
    ("Administrator", EntityKind::Administrator),
    ("Member", EntityKind::Member),
    ("Company", EntityKind::Company),
    ("CompetitionHost", EntityKind::CompetitionHost),
    ("Club", EntityKind::Club),
    ("Competition", EntityKind::Competition),
    ("JobOffer", EntityKind::JobOffer),
    ("Notification", EntityKind::Notification),
    ("Post", EntityKind::Post),
    ("Achievement", EntityKind::Achievement),
];

fn section_kind(name: &str) -> Option<EntityKind> {
    SECTIONS.iter().find(|(n, _)| *n == name).map(|(_, k)| *k)
}

fn section_name(kind: EntityKind) -> &'static str {
    SECTIONS
        .iter()
        .find(|(_, k)| *k == kind)
        .map_or("?", |(n, _)| *n)
}

#[derive(Debug, Error)]
pub enum FixtureError {
    #[error("line {line}: unknown section `{name}`")]
    UnknownSection { line: usize, name: String },
    #[error("line {line}: section `{name}` appears twice")]
    DuplicateSection { line: usize, name: String },
    #[error("line {line}: rows must follow a section header")]
    OutsideSection { line: usize },
    #[error("line {line}: expected {expected} cells, found {found}")]
    CellCount {
        line: usize,
        expected: usize,
        found: usize,
    },
    #[error("section `{section}` has no `{column}` column")]
    MissingColumn {
        section: &'static str,
        column: String,
    },
    #[error("line {line}: `{column}` must not be empty")]
    MissingValue { line: usize, column: String },
    #[error("line {line}: `{value}` in `{column}` is not a valid {expected}")]
    InvalidValue {
        line: usize,
        column: String,
        value: String,
        expected: &'static str,
    },
    #[error("line {line}: `{column}` refers to {section} row `{row}`, which does not exist")]
    DanglingReference {
        line: usize,
        column: String,
        section: &'static str,
        row: String,
    },
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error(transparent)]
    Fixture(#[from] FixtureError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("failed to hash password on line {line}: {source}")]
    Hash {
        line: usize,
        source: password_hash::Error,
    },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    /// Line in the fixture text, for error messages.
    pub line: usize,
    pub cells: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fixture {
    tables: BTreeMap<EntityKind, Table>,
}

fn section_header(line: &str) -> Option<&str> {
    line.strip_prefix("==")?.strip_suffix("==").map(str::trim)
}

impl Fixture {
    pub fn parse(text: &str) -> Result<Fixture, FixtureError> {
        let mut tables: BTreeMap<EntityKind, Table> = BTreeMap::new();
        let mut current = None;

        for (index, raw) in text.lines().enumerate() {
            let line = index + 1;
            let trimmed = raw.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            if let Some(name) = section_header(trimmed) {
                let kind = section_kind(name).ok_or_else(|| FixtureError::UnknownSection {
                    line,
                    name: name.to_string(),
                })?;
                if tables.insert(kind, Table::default()).is_some() {
                    return Err(FixtureError::DuplicateSection {
                        line,
                        name: name.to_string(),
                    });
                }
                current = Some(kind);
                continue;
            }

            let Some(table) = current.and_then(|kind| tables.get_mut(&kind)) else {
                return Err(FixtureError::OutsideSection { line });
            };
            let cells: Vec<String> = trimmed.split('|').map(|c| c.trim().to_string()).collect();
            if table.columns.is_empty() {
                table.columns = cells;
            } else if cells.len() != table.columns.len() {
                return Err(FixtureError::CellCount {
                    line,
                    expected: table.columns.len(),
                    found: cells.len(),
                });
            } else {
                table.rows.push(Row { line, cells });
            }
        }

        Ok(Fixture { tables })
    }

    pub fn table(&self, kind: EntityKind) -> Option<&Table> {
        self.tables.get(&kind)
    }

    /// Number of records the fixture describes.
    pub fn len(&self) -> usize {
        self.tables.values().map(|t| t.rows.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

type Allocated = HashMap<EntityKind, Vec<EntityId>>;

/// One fixture row with its allocated id.
struct Cursor<'a> {
    kind: EntityKind,
    id: EntityId,
    table: &'a Table,
    row: &'a Row,
    ids: &'a Allocated,
}

impl<'a> Cursor<'a> {
    fn column(&self, column: &str) -> Option<&'a str> {
        let index = self.table.columns.iter().position(|c| c == column)?;
        self.row.cells.get(index).map(String::as_str)
    }

    /// Blank cells and absent columns are both `None`.
    fn optional(&self, column: &str) -> Option<&'a str> {
        self.column(column).filter(|v| !v.is_empty())
    }

    fn required(&self, column: &str) -> Result<&'a str, FixtureError> {
        match self.column(column) {
            None => Err(FixtureError::MissingColumn {
                section: section_name(self.kind),
                column: column.to_string(),
            }),
            Some("") => Err(FixtureError::MissingValue {
                line: self.row.line,
                column: column.to_string(),
            }),
            Some(value) => Ok(value),
        }
    }

    fn text(&self, column: &str) -> String {
        self.optional(column).unwrap_or_default().to_string()
    }

    fn optional_text(&self, column: &str) -> Option<String> {
        self.optional(column).map(str::to_string)
    }

    fn date(&self, column: &str) -> Result<NaiveDate, FixtureError> {
        let value = self.required(column)?;
        value.parse().map_err(|_| FixtureError::InvalidValue {
            line: self.row.line,
            column: column.to_string(),
            value: value.to_string(),
            expected: "date (YYYY-MM-DD)",
        })
    }

    fn resolve(&self, column: &str, target: EntityKind, raw: &str) -> Result<EntityId, FixtureError> {
        let dangling = || FixtureError::DanglingReference {
            line: self.row.line,
            column: column.to_string(),
            section: section_name(target),
            row: raw.to_string(),
        };
        let number: usize = raw.parse().map_err(|_| dangling())?;
        number
            .checked_sub(1)
            .and_then(|index| self.ids.get(&target)?.get(index))
            .copied()
            .ok_or_else(dangling)
    }

    fn reference(&self, column: &str, target: EntityKind) -> Result<Option<EntityId>, FixtureError> {
        self.optional(column)
            .map(|raw| self.resolve(column, target, raw))
            .transpose()
    }

    fn required_reference(&self, column: &str, target: EntityKind) -> Result<EntityId, FixtureError> {
        self.resolve(column, target, self.required(column)?)
    }

    fn references(&self, column: &str, target: EntityKind) -> Result<Vec<EntityId>, FixtureError> {
        self.optional(column)
            .unwrap_or_default()
            .split_whitespace()
            .map(|raw| self.resolve(column, target, raw))
            .collect()
    }

    fn account(&self) -> Result<Account, LoadError> {
        let password_hash =
            auth::hash_password(self.required("password")?).map_err(|source| LoadError::Hash {
                line: self.row.line,
                source,
            })?;
        Ok(Account {
            id: self.id,
            username: self.required("username")?.to_string(),
            name: self.required("name")?.to_string(),
            email: self.required("email")?.to_lowercase(),
            password_hash,
            city: self.text("city"),
            state: self.text("state"),
            email_verified: false,
            major: self.optional_text("major"),
            notes: self.optional_text("notes"),
            photo_url: self.optional_text("photo_url"),
        })
    }
}

fn cursors<'a>(fixture: &'a Fixture, ids: &'a Allocated) -> impl Iterator<Item = Cursor<'a>> {
    fixture.tables.iter().flat_map(move |(kind, table)| {
        table
            .rows
            .iter()
            .zip(ids.get(kind).into_iter().flatten())
            .map(move |(row, id)| Cursor {
                kind: *kind,
                id: *id,
                table,
                row,
                ids,
            })
    })
}

/// Allocates ids for every row and resolves all references. Nothing is
/// stored.
pub async fn build(fixture: &Fixture, directory: &Directory) -> Result<Vec<Entity>, LoadError> {
    let mut ids = Allocated::new();
    for (kind, table) in &fixture.tables {
        let mut allocated = Vec::with_capacity(table.rows.len());
        for _ in &table.rows {
            allocated.push(directory.next_id(*kind).await?);
        }
        ids.insert(*kind, allocated);
    }

    // memberships are listed on the club side
    let mut memberships: HashMap<EntityId, Vec<EntityId>> = HashMap::new();
    for club in cursors(fixture, &ids).filter(|c| c.kind == EntityKind::Club) {
        for member in club.references("members", EntityKind::Member)? {
            memberships.entry(member).or_default().push(club.id);
        }
    }

    let mut entities = Vec::with_capacity(fixture.len());
    for row in cursors(fixture, &ids) {
        let id = row.id;
        let entity = match row.kind {
            EntityKind::School => Entity::School(School {
                id,
                name: row.required("name")?.to_string(),
                city: row.text("city"),
                state: row.text("state"),
            }),
            EntityKind::User => Entity::User(User {
                account: row.account()?,
            }),
            EntityKind::Administrator => Entity::Administrator(Administrator {
                account: row.account()?,
            }),
            EntityKind::Company => Entity::Company(Company {
                account: row.account()?,
            }),
            EntityKind::CompetitionHost => Entity::CompetitionHost(CompetitionHost {
                account: row.account()?,
            }),
            EntityKind::Member => Entity::Member(Member {
                account: row.account()?,
                school_ids: row.references("school", EntityKind::School)?,
                club_ids: memberships.remove(&id).unwrap_or_default(),
                resume: row.optional_text("resume"),
            }),
            EntityKind::Club => Entity::Club(Club {
                id,
                name: row.required("name")?.to_string(),
                school_id: row.required_reference("school", EntityKind::School)?,
                major: row.optional_text("major"),
                photo_url: row.optional_text("photo_url"),
                president: row.reference("president", EntityKind::Member)?,
                vice_president: row.reference("vice_president", EntityKind::Member)?,
                treasurer: row.reference("treasurer", EntityKind::Member)?,
                secretary: row.reference("secretary", EntityKind::Member)?,
            }),
            EntityKind::Competition => Entity::Competition(Competition {
                id,
                name: row.required("name")?.to_string(),
                description: row.text("description"),
                date: row.date("date")?,
                website: row.optional_text("website"),
                host_id: row.required_reference("host", EntityKind::CompetitionHost)?,
                club_ids: row.references("clubs", EntityKind::Club)?,
                member_ids: row.references("members", EntityKind::Member)?,
            }),
            EntityKind::JobOffer => Entity::JobOffer(JobOffer {
                id,
                name: row.required("name")?.to_string(),
                description: row.text("description"),
                date: row.date("date")?,
                location: row.text("location"),
                company_id: row.required_reference("company", EntityKind::Company)?,
                member_ids: row.references("members", EntityKind::Member)?,
            }),
            EntityKind::Notification => {
                let sender = match row.reference("competition", EntityKind::Competition)? {
                    Some(competition) => Some(competition),
                    None => row.reference("job_offer", EntityKind::JobOffer)?,
                };
                let mut recipients = row.references("users", EntityKind::Member)?;
                recipients.extend(row.references("clubs", EntityKind::Club)?);
                Entity::Notification(Notification {
                    id,
                    sender_id: sender,
                    recipient_ids: recipients,
                    date: row.date("date")?,
                })
            }
            EntityKind::Post => Entity::Post(Post {
                id,
                notification_id: row.required_reference("notification", EntityKind::Notification)?,
                title: row.required("title")?.to_string(),
                text: row.text("text"),
                date: row.date("date")?,
                photo_urls: row
                    .optional("photo_urls")
                    .unwrap_or_default()
                    .split_whitespace()
                    .map(str::to_string)
                    .collect(),
                video_url: row.optional_text("video_url"),
            }),
            EntityKind::Achievement => Entity::Achievement(Achievement {
                id,
                title: row.required("title")?.to_string(),
                description: row.text("description"),
                date: row.date("date")?,
                club_id: row.reference("club", EntityKind::Club)?,
                user_ids: row.references("users", EntityKind::Member)?,
            }),
        };
        entities.push(entity);
    }
    Ok(entities)
}

/// Builds every record and stores them in one batch, so a failing fixture
/// leaves the store untouched.
pub async fn load(fixture: &Fixture, directory: &Directory) -> Result<Vec<Entity>, LoadError> {
    let entities = build(fixture, directory).await?;
    directory.insert_all(&entities).await?;
    tracing::info!(count = entities.len(), "fixture loaded");
    Ok(entities)
}
