use chrono::NaiveDate;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::{collections::HashMap, fmt, str::FromStr};
use thiserror::Error;

/// Length of the kind prefix at the start of every rendered [`EntityId`].
pub const PREFIX_LEN: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityKind {
    User,
    Member,
    Company,
    CompetitionHost,
    Administrator,
    School,
    Club,
    Competition,
    JobOffer,
    Notification,
    Post,
    Achievement,
}

lazy_static::lazy_static! {
    static ref PREFIXES: HashMap<&'static str, EntityKind> = EntityKind::ALL
        .iter()
        .map(|kind| (kind.prefix(), *kind))
        .collect();
}

impl EntityKind {
    pub const ALL: [EntityKind; 12] = [
        EntityKind::User,
        EntityKind::Member,
        EntityKind::Company,
        EntityKind::CompetitionHost,
        EntityKind::Administrator,
        EntityKind::School,
        EntityKind::Club,
        EntityKind::Competition,
        EntityKind::JobOffer,
        EntityKind::Notification,
        EntityKind::Post,
        EntityKind::Achievement,
    ];

    pub const ACCOUNTS: [EntityKind; 5] = [
        EntityKind::User,
        EntityKind::Member,
        EntityKind::Company,
        EntityKind::CompetitionHost,
        EntityKind::Administrator,
    ];

    /// The routing prefix. Account prefixes double as the account type codes
    /// accepted by the registration form.
    pub fn prefix(self) -> &'static str {
        match self {
            EntityKind::User => "gest",
            EntityKind::Member => "user",
            EntityKind::Company => "cmpn",
            EntityKind::CompetitionHost => "coho",
            EntityKind::Administrator => "admn",
            EntityKind::School => "schl",
            EntityKind::Club => "club",
            EntityKind::Competition => "cmpt",
            EntityKind::JobOffer => "jobo",
            EntityKind::Notification => "noti",
            EntityKind::Post => "post",
            EntityKind::Achievement => "achv",
        }
    }

    pub fn from_prefix(prefix: &str) -> Option<EntityKind> {
        PREFIXES.get(prefix).copied()
    }

    pub fn is_account(self) -> bool {
        EntityKind::ACCOUNTS.contains(&self)
    }

    pub fn label(self) -> &'static str {
        match self {
            EntityKind::User => "guest",
            EntityKind::Member => "student",
            EntityKind::Company => "company",
            EntityKind::CompetitionHost => "competition host",
            EntityKind::Administrator => "administrator",
            EntityKind::School => "school",
            EntityKind::Club => "club",
            EntityKind::Competition => "competition",
            EntityKind::JobOffer => "job offer",
            EntityKind::Notification => "notification",
            EntityKind::Post => "post",
            EntityKind::Achievement => "achievement",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdError {
    #[error("unknown identifier prefix `{0}`")]
    UnknownPrefix(String),
    #[error("malformed identifier `{0}`")]
    Malformed(String),
}

/// Globally unique identifier. Rendered as `<prefix><seq>`, e.g. `club17`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityId {
    kind: EntityKind,
    seq: u64,
}

impl EntityId {
    pub fn new(kind: EntityKind, seq: u64) -> Self {
        Self { kind, seq }
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.kind.prefix(), self.seq)
    }
}

impl FromStr for EntityId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (Some(prefix), Some(seq)) = (s.get(..PREFIX_LEN), s.get(PREFIX_LEN..)) else {
            return Err(IdError::Malformed(s.to_string()));
        };
        let kind =
            EntityKind::from_prefix(prefix).ok_or_else(|| IdError::UnknownPrefix(prefix.to_string()))?;
        // one spelling per id: no leading zeros
        if seq.is_empty()
            || !seq.bytes().all(|b| b.is_ascii_digit())
            || (seq.len() > 1 && seq.starts_with('0'))
        {
            return Err(IdError::Malformed(s.to_string()));
        }
        let seq = seq.parse().map_err(|_| IdError::Malformed(s.to_string()))?;
        Ok(EntityId { kind, seq })
    }
}

impl TryFrom<String> for EntityId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<EntityId> for String {
    fn from(id: EntityId) -> String {
        id.to_string()
    }
}

impl From<EntityId> for Value {
    fn from(id: EntityId) -> Value {
        Value::String(id.to_string())
    }
}

/// Identity fields shared by every account kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: EntityId,
    pub username: String,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub city: String,
    pub state: String,
    #[serde(default)]
    pub email_verified: bool,
    #[serde(default)]
    pub major: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub photo_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(flatten)]
    pub account: Account,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Member {
    #[serde(flatten)]
    pub account: Account,
    /// The first school is the member's primary school.
    #[serde(default)]
    pub school_ids: Vec<EntityId>,
    #[serde(default)]
    pub club_ids: Vec<EntityId>,
    #[serde(default)]
    pub resume: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Company {
    #[serde(flatten)]
    pub account: Account,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompetitionHost {
    #[serde(flatten)]
    pub account: Account,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Administrator {
    #[serde(flatten)]
    pub account: Account,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct School {
    pub id: EntityId,
    pub name: String,
    pub city: String,
    pub state: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Club {
    pub id: EntityId,
    pub name: String,
    pub school_id: EntityId,
    #[serde(default)]
    pub major: Option<String>,
    #[serde(default)]
    pub photo_url: Option<String>,
    #[serde(default)]
    pub president: Option<EntityId>,
    #[serde(default)]
    pub vice_president: Option<EntityId>,
    #[serde(default)]
    pub treasurer: Option<EntityId>,
    #[serde(default)]
    pub secretary: Option<EntityId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfficerRole {
    President,
    VicePresident,
    Treasurer,
    Secretary,
}

impl OfficerRole {
    pub const ALL: [OfficerRole; 4] = [
        OfficerRole::President,
        OfficerRole::VicePresident,
        OfficerRole::Treasurer,
        OfficerRole::Secretary,
    ];
}

impl FromStr for OfficerRole {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "president" => Ok(OfficerRole::President),
            "vice_president" | "vicepresident" => Ok(OfficerRole::VicePresident),
            "treasurer" => Ok(OfficerRole::Treasurer),
            "secretary" => Ok(OfficerRole::Secretary),
            _ => Err(()),
        }
    }
}

impl Club {
    pub fn officer(&self, role: OfficerRole) -> Option<EntityId> {
        match role {
            OfficerRole::President => self.president,
            OfficerRole::VicePresident => self.vice_president,
            OfficerRole::Treasurer => self.treasurer,
            OfficerRole::Secretary => self.secretary,
        }
    }

    pub fn set_officer(&mut self, role: OfficerRole, member: Option<EntityId>) {
        let slot = match role {
            OfficerRole::President => &mut self.president,
            OfficerRole::VicePresident => &mut self.vice_president,
            OfficerRole::Treasurer => &mut self.treasurer,
            OfficerRole::Secretary => &mut self.secretary,
        };
        *slot = member;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Competition {
    pub id: EntityId,
    pub name: String,
    pub description: String,
    pub date: NaiveDate,
    #[serde(default)]
    pub website: Option<String>,
    pub host_id: EntityId,
    #[serde(default)]
    pub club_ids: Vec<EntityId>,
    #[serde(default)]
    pub member_ids: Vec<EntityId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobOffer {
    pub id: EntityId,
    pub name: String,
    pub description: String,
    pub date: NaiveDate,
    pub location: String,
    pub company_id: EntityId,
    #[serde(default)]
    pub member_ids: Vec<EntityId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: EntityId,
    /// The competition or job offer this notification announces.
    #[serde(default)]
    pub sender_id: Option<EntityId>,
    pub recipient_ids: Vec<EntityId>,
    pub date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: EntityId,
    pub notification_id: EntityId,
    pub title: String,
    pub text: String,
    pub date: NaiveDate,
    #[serde(default)]
    pub photo_urls: Vec<String>,
    #[serde(default)]
    pub video_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Achievement {
    pub id: EntityId,
    pub title: String,
    pub description: String,
    pub date: NaiveDate,
    #[serde(default)]
    pub club_id: Option<EntityId>,
    #[serde(default)]
    pub user_ids: Vec<EntityId>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Entity {
    User(User),
    Member(Member),
    Company(Company),
    CompetitionHost(CompetitionHost),
    Administrator(Administrator),
    School(School),
    Club(Club),
    Competition(Competition),
    JobOffer(JobOffer),
    Notification(Notification),
    Post(Post),
    Achievement(Achievement),
}

impl Entity {
    /// Builds the variant registered for `kind` from a stored document.
    pub fn decode(kind: EntityKind, body: Value) -> serde_json::Result<Entity> {
        use serde_json::from_value;

        Ok(match kind {
            EntityKind::User => Entity::User(from_value(body)?),
            EntityKind::Member => Entity::Member(from_value(body)?),
            EntityKind::Company => Entity::Company(from_value(body)?),
            EntityKind::CompetitionHost => Entity::CompetitionHost(from_value(body)?),
            EntityKind::Administrator => Entity::Administrator(from_value(body)?),
            EntityKind::School => Entity::School(from_value(body)?),
            EntityKind::Club => Entity::Club(from_value(body)?),
            EntityKind::Competition => Entity::Competition(from_value(body)?),
            EntityKind::JobOffer => Entity::JobOffer(from_value(body)?),
            EntityKind::Notification => Entity::Notification(from_value(body)?),
            EntityKind::Post => Entity::Post(from_value(body)?),
            EntityKind::Achievement => Entity::Achievement(from_value(body)?),
        })
    }

    pub fn encode(&self) -> serde_json::Result<Value> {
        use serde_json::to_value;

        match self {
            Entity::User(e) => to_value(e),
            Entity::Member(e) => to_value(e),
            Entity::Company(e) => to_value(e),
            Entity::CompetitionHost(e) => to_value(e),
            Entity::Administrator(e) => to_value(e),
            Entity::School(e) => to_value(e),
            Entity::Club(e) => to_value(e),
            Entity::Competition(e) => to_value(e),
            Entity::JobOffer(e) => to_value(e),
            Entity::Notification(e) => to_value(e),
            Entity::Post(e) => to_value(e),
            Entity::Achievement(e) => to_value(e),
        }
    }

    pub fn id(&self) -> EntityId {
        match self {
            Entity::User(e) => e.id(),
            Entity::Member(e) => e.id(),
            Entity::Company(e) => e.id(),
            Entity::CompetitionHost(e) => e.id(),
            Entity::Administrator(e) => e.id(),
            Entity::School(e) => e.id(),
            Entity::Club(e) => e.id(),
            Entity::Competition(e) => e.id(),
            Entity::JobOffer(e) => e.id(),
            Entity::Notification(e) => e.id(),
            Entity::Post(e) => e.id(),
            Entity::Achievement(e) => e.id(),
        }
    }

    pub fn kind(&self) -> EntityKind {
        self.id().kind()
    }

    /// Display name or title; notifications have none.
    pub fn name(&self) -> Option<&str> {
        match self {
            Entity::School(e) => Some(&e.name),
            Entity::Club(e) => Some(&e.name),
            Entity::Competition(e) => Some(&e.name),
            Entity::JobOffer(e) => Some(&e.name),
            Entity::Notification(_) => None,
            Entity::Post(e) => Some(&e.title),
            Entity::Achievement(e) => Some(&e.title),
            other => other.account().map(|a| a.name.as_str()),
        }
    }

    pub fn account(&self) -> Option<&Account> {
        match self {
            Entity::User(e) => Some(&e.account),
            Entity::Member(e) => Some(&e.account),
            Entity::Company(e) => Some(&e.account),
            Entity::CompetitionHost(e) => Some(&e.account),
            Entity::Administrator(e) => Some(&e.account),
            _ => None,
        }
    }

    pub fn account_mut(&mut self) -> Option<&mut Account> {
        match self {
            Entity::User(e) => Some(&mut e.account),
            Entity::Member(e) => Some(&mut e.account),
            Entity::Company(e) => Some(&mut e.account),
            Entity::CompetitionHost(e) => Some(&mut e.account),
            Entity::Administrator(e) => Some(&mut e.account),
            _ => None,
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Entity::Administrator(_))
    }

    /// Clubs an account belongs to. Only members join clubs.
    pub fn club_ids(&self) -> &[EntityId] {
        match self {
            Entity::Member(m) => &m.club_ids,
            _ => &[],
        }
    }
}

/// A typed entity stored under exactly one [`EntityKind`].
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const KIND: EntityKind;

    fn id(&self) -> EntityId;
    fn into_entity(self) -> Entity;
    fn from_entity(entity: Entity) -> Option<Self>;
}

macro_rules! record {
    ($ty:ident, $($id:ident).+) => {
        impl Record for $ty {
            const KIND: EntityKind = EntityKind::$ty;

            fn id(&self) -> EntityId {
                self.$($id).+
            }

            fn into_entity(self) -> Entity {
                Entity::$ty(self)
            }

            fn from_entity(entity: Entity) -> Option<Self> {
                match entity {
                    Entity::$ty(e) => Some(e),
                    _ => None,
                }
            }
        }
    };
}

record!(User, account.id);
record!(Member, account.id);
record!(Company, account.id);
record!(CompetitionHost, account.id);
record!(Administrator, account.id);
record!(School, id);
record!(Club, id);
record!(Competition, id);
record!(JobOffer, id);
record!(Notification, id);
record!(Post, id);
record!(Achievement, id);
