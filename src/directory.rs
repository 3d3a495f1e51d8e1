//! Typed access to stored entities.
//!
//! [`Directory`] turns store documents into [`Entity`] values, routing each
//! document to its concrete type through the kind encoded in its id, and
//! computes the cross-entity views (a member's clubs, a club's officers, the
//! posts addressed to an account) through secondary queries.

use crate::{
    models::{
        Achievement, Club, Competition, Entity, EntityId, EntityKind, JobOffer, Member,
        Notification, OfficerRole, Post, Record, School,
    },
    store::{Document, Filter, Query, Sort, Store, StoreError, StoreResult},
};
use itertools::Itertools;
use serde::Serialize;
use serde_json::{Map, Value};
use std::{collections::HashMap, sync::Arc};

#[derive(Clone)]
pub struct Directory {
    store: Arc<dyn Store>,
}

/// A record reduced to the fields a caller asked for.
#[derive(Debug, Clone, PartialEq)]
pub struct Projected {
    pub id: EntityId,
    pub fields: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub entity: Entity,
    pub score: f32,
}

/// A post together with the notification that addressed it.
#[derive(Debug, Clone, PartialEq)]
pub struct AddressedPost {
    pub post: Post,
    pub notification: Notification,
}

fn corrupt(id: EntityId, err: serde_json::Error) -> StoreError {
    StoreError::Corrupt {
        id: id.to_string(),
        reason: err.to_string(),
    }
}

fn decode(document: Document) -> StoreResult<Entity> {
    let id = document.id;
    Entity::decode(id.kind(), document.body).map_err(|e| corrupt(id, e))
}

fn decode_as<T: Record>(document: Document) -> StoreResult<T> {
    let id = document.id;
    serde_json::from_value(document.body).map_err(|e| corrupt(id, e))
}

fn to_document(id: EntityId, record: &impl Serialize) -> StoreResult<Document> {
    let body = serde_json::to_value(record).map_err(|e| corrupt(id, e))?;
    Ok(Document { id, body })
}

fn entity_document(entity: &Entity) -> StoreResult<Document> {
    let id = entity.id();
    let body = entity.encode().map_err(|e| corrupt(id, e))?;
    Ok(Document { id, body })
}

impl Directory {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn get_by_id(&self, id: EntityId) -> StoreResult<Option<Entity>> {
        self.store
            .fetch(id.kind(), &[id])
            .await?
            .into_iter()
            .next()
            .map(decode)
            .transpose()
    }

    pub async fn get<T: Record>(&self, id: EntityId) -> StoreResult<Option<T>> {
        if id.kind() != T::KIND {
            return Err(StoreError::KindMismatch {
                id,
                expected: T::KIND,
            });
        }
        self.store
            .fetch(T::KIND, &[id])
            .await?
            .into_iter()
            .next()
            .map(decode_as)
            .transpose()
    }

    /// Loads many entities with one store query per distinct kind. Results
    /// follow the order of `ids`; repeated ids are returned once and missing
    /// ids are skipped.
    pub async fn get_by_ids(&self, ids: &[EntityId]) -> StoreResult<Vec<Entity>> {
        let ids: Vec<EntityId> = ids.iter().copied().unique().collect();
        let mut found = HashMap::with_capacity(ids.len());
        for (kind, batch) in ids.iter().copied().into_group_map_by(|id| id.kind()) {
            for document in self.store.fetch(kind, &batch).await? {
                found.insert(document.id, decode(document)?);
            }
        }
        Ok(ids.iter().filter_map(|id| found.remove(id)).collect())
    }

    async fn get_all<T: Record>(&self, ids: &[EntityId]) -> StoreResult<Vec<T>> {
        Ok(self
            .get_by_ids(ids)
            .await?
            .into_iter()
            .filter_map(T::from_entity)
            .collect())
    }

    pub async fn find<T: Record>(&self, filter: Filter, sort: Option<Sort>) -> StoreResult<Vec<T>> {
        self.store
            .query(&Query::new(&[T::KIND]).filter(filter).sort(sort))
            .await?
            .into_iter()
            .map(decode_as)
            .collect()
    }

    pub async fn find_projected<T: Record>(
        &self,
        filter: Filter,
        sort: Option<Sort>,
        fields: &[&str],
    ) -> StoreResult<Vec<Projected>> {
        let documents = self
            .store
            .query(&Query::new(&[T::KIND]).filter(filter).sort(sort).project(fields))
            .await?;
        Ok(documents
            .into_iter()
            .map(|document| {
                let mut fields = match document.body {
                    Value::Object(map) => map,
                    _ => Map::new(),
                };
                fields.remove("id");
                Projected {
                    id: document.id,
                    fields,
                }
            })
            .collect())
    }

    /// Ranked full-text search over every kind. Each hit is decoded into the
    /// type its id names.
    pub async fn find_text(&self, text: &str, skip: usize, limit: usize) -> StoreResult<Vec<SearchHit>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut hits = self
            .store
            .search(text, skip, limit)
            .await?
            .into_iter()
            .map(|hit| {
                Ok(SearchHit {
                    entity: decode(hit.document)?,
                    score: hit.score,
                })
            })
            .collect::<StoreResult<Vec<_>>>()?;
        hits.truncate(limit);
        Ok(hits)
    }

    pub async fn next_id(&self, kind: EntityKind) -> StoreResult<EntityId> {
        self.store.next_id(kind).await
    }

    /// Allocates a fresh id and stores the record built from it.
    pub async fn create<T, F>(&self, build: F) -> StoreResult<T>
    where
        T: Record,
        F: FnOnce(EntityId) -> T + Send,
    {
        let id = self.store.next_id(T::KIND).await?;
        let record = build(id);
        self.store.insert(vec![to_document(id, &record)?]).await?;
        Ok(record)
    }

    /// Like [`Directory::create`] for a kind only known at runtime.
    pub async fn create_entity<F>(&self, kind: EntityKind, build: F) -> StoreResult<Entity>
    where
        F: FnOnce(EntityId) -> Entity + Send,
    {
        let id = self.store.next_id(kind).await?;
        let entity = build(id);
        if entity.id() != id {
            return Err(StoreError::KindMismatch {
                id: entity.id(),
                expected: kind,
            });
        }
        self.store.insert(vec![entity_document(&entity)?]).await?;
        Ok(entity)
    }

    /// Stores every entity or none of them.
    pub async fn insert_all(&self, entities: &[Entity]) -> StoreResult<()> {
        let documents = entities
            .iter()
            .map(entity_document)
            .collect::<StoreResult<Vec<_>>>()?;
        self.store.insert(documents).await
    }

    pub async fn save<T: Record>(&self, record: &T) -> StoreResult<()> {
        self.store.replace(to_document(record.id(), record)?).await
    }

    pub async fn save_entity(&self, entity: &Entity) -> StoreResult<()> {
        self.store.replace(entity_document(entity)?).await
    }

    async fn find_account(&self, field: &str, value: &str) -> StoreResult<Option<Entity>> {
        self.store
            .query(&Query::new(&EntityKind::ACCOUNTS).filter(Filter::eq(field, value)))
            .await?
            .into_iter()
            .next()
            .map(decode)
            .transpose()
    }

    pub async fn account_by_username(&self, username: &str) -> StoreResult<Option<Entity>> {
        self.find_account("username", username).await
    }

    pub async fn account_by_email(&self, email: &str) -> StoreResult<Option<Entity>> {
        self.find_account("email", email).await
    }

    pub async fn schools_of(&self, member: &Member) -> StoreResult<Vec<School>> {
        let mut schools: Vec<School> = self.get_all(&member.school_ids).await?;
        schools.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(schools)
    }

    /// Clubs an account belongs to, by name.
    pub async fn clubs_of(&self, account: &Entity) -> StoreResult<Vec<Club>> {
        let mut clubs: Vec<Club> = self.get_all(account.club_ids()).await?;
        clubs.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(clubs)
    }

    pub async fn clubs_of_school(&self, school: EntityId) -> StoreResult<Vec<Club>> {
        self.find(Filter::eq("school_id", school), Some(Sort::asc("name")))
            .await
    }

    pub async fn members_of_school(&self, school: EntityId) -> StoreResult<Vec<Member>> {
        self.find(Filter::contains("school_ids", school), Some(Sort::asc("name")))
            .await
    }

    pub async fn members_of_club(&self, club: EntityId) -> StoreResult<Vec<Member>> {
        self.find(Filter::contains("club_ids", club), Some(Sort::asc("name")))
            .await
    }

    /// Filled officer slots of a club, in role order.
    pub async fn officers(&self, club: &Club) -> StoreResult<Vec<(OfficerRole, Member)>> {
        let slots: Vec<(OfficerRole, EntityId)> = OfficerRole::ALL
            .iter()
            .filter_map(|role| club.officer(*role).map(|id| (*role, id)))
            .collect();
        let ids: Vec<EntityId> = slots.iter().map(|(_, id)| *id).collect();
        let members: HashMap<EntityId, Member> = self
            .get_all::<Member>(&ids)
            .await?
            .into_iter()
            .map(|m| (m.account.id, m))
            .collect();
        Ok(slots
            .into_iter()
            .filter_map(|(role, id)| members.get(&id).map(|m| (role, m.clone())))
            .collect())
    }

    pub async fn competitions_of_host(&self, host: EntityId) -> StoreResult<Vec<Competition>> {
        self.find(Filter::eq("host_id", host), Some(Sort::desc("date")))
            .await
    }

    pub async fn competitions_of_member(&self, member: EntityId) -> StoreResult<Vec<Competition>> {
        self.find(Filter::contains("member_ids", member), Some(Sort::desc("date")))
            .await
    }

    pub async fn competitions_of_club(&self, club: EntityId) -> StoreResult<Vec<Competition>> {
        self.find(Filter::contains("club_ids", club), Some(Sort::desc("date")))
            .await
    }

    pub async fn job_offers_of_company(&self, company: EntityId) -> StoreResult<Vec<JobOffer>> {
        self.find(Filter::eq("company_id", company), Some(Sort::desc("date")))
            .await
    }

    pub async fn achievements_of_user(&self, user: EntityId) -> StoreResult<Vec<Achievement>> {
        self.find(Filter::contains("user_ids", user), Some(Sort::desc("date")))
            .await
    }

    pub async fn achievements_of_club(&self, club: EntityId) -> StoreResult<Vec<Achievement>> {
        self.find(Filter::eq("club_id", club), Some(Sort::desc("date")))
            .await
    }

    /// Posts whose notification addresses the account itself or any club the
    /// account belongs to, newest notification first.
    pub async fn addressed_posts(&self, account: &Entity) -> StoreResult<Vec<AddressedPost>> {
        let mut recipients = vec![account.id()];
        recipients.extend_from_slice(account.club_ids());

        let notifications: Vec<Notification> = self
            .find(
                Filter::overlaps("recipient_ids", recipients),
                Some(Sort::desc("date")),
            )
            .await?;
        if notifications.is_empty() {
            return Ok(Vec::new());
        }

        let mut posts = self
            .find::<Post>(
                Filter::is_in("notification_id", notifications.iter().map(|n| n.id)),
                Some(Sort::desc("date")),
            )
            .await?
            .into_iter()
            .into_group_map_by(|p| p.notification_id);

        Ok(notifications
            .into_iter()
            .flat_map(|notification| {
                posts
                    .remove(&notification.id)
                    .unwrap_or_default()
                    .into_iter()
                    .map(move |post| AddressedPost {
                        post,
                        notification: notification.clone(),
                    })
            })
            .collect())
    }
}
