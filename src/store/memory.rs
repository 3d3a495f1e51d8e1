use super::{
    compare_values, project, Document, Query, ScoredDocument, Store, StoreError, StoreResult,
    UniqueField, SEARCH_FIELDS,
};
use crate::models::{EntityId, EntityKind};
use async_trait::async_trait;
use serde_json::Value;
use std::{
    collections::{BTreeMap, HashMap},
    sync::atomic::{AtomicU64, Ordering},
};
use tokio::sync::Mutex;

/// Store kept entirely in process memory.
#[derive(Default)]
pub struct MemoryStore {
    documents: Mutex<BTreeMap<EntityId, Value>>,
    sequence: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.documents.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

fn unique_value(body: &Value, field: UniqueField) -> Option<&str> {
    body.get(field.key()).and_then(Value::as_str)
}

/// Checks `body` against every document in `existing` except `skip`.
fn check_unique<'a>(
    body: &Value,
    existing: impl Iterator<Item = (&'a EntityId, &'a Value)> + Clone,
    skip: Option<EntityId>,
) -> StoreResult<()> {
    for field in UniqueField::DOCUMENT_FIELDS {
        let Some(value) = unique_value(body, field) else {
            continue;
        };
        let taken = existing
            .clone()
            .filter(|(id, _)| Some(**id) != skip)
            .any(|(_, other)| unique_value(other, field) == Some(value));
        if taken {
            return Err(StoreError::Duplicate(field));
        }
    }
    Ok(())
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(str::to_lowercase)
}

/// Term frequency of every query term, damped by document length. Documents
/// missing any term do not match.
fn score(body: &Value, terms: &[String]) -> Option<f32> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    let mut length = 0usize;
    for field in SEARCH_FIELDS {
        if let Some(text) = body.get(field).and_then(Value::as_str) {
            for word in tokenize(text) {
                length += 1;
                *counts.entry(word).or_default() += 1;
            }
        }
    }

    let mut hits = 0usize;
    for term in terms {
        match counts.get(term) {
            Some(n) => hits += n,
            None => return None,
        }
    }
    Some(hits as f32 / (1.0 + (length as f32).ln()))
}

#[async_trait]
impl Store for MemoryStore {
    async fn next_id(&self, kind: EntityKind) -> StoreResult<EntityId> {
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(EntityId::new(kind, seq))
    }

    async fn insert(&self, documents: Vec<Document>) -> StoreResult<()> {
        let mut stored = self.documents.lock().await;

        for (i, document) in documents.iter().enumerate() {
            let earlier = &documents[..i];
            if stored.contains_key(&document.id) || earlier.iter().any(|d| d.id == document.id) {
                return Err(StoreError::Duplicate(UniqueField::Id));
            }
            check_unique(&document.body, stored.iter(), None)?;
            check_unique(
                &document.body,
                earlier.iter().map(|d| (&d.id, &d.body)),
                None,
            )?;
        }

        for document in documents {
            stored.insert(document.id, document.body);
        }
        Ok(())
    }

    async fn replace(&self, document: Document) -> StoreResult<()> {
        let mut stored = self.documents.lock().await;
        if !stored.contains_key(&document.id) {
            return Err(StoreError::Missing(document.id));
        }
        check_unique(&document.body, stored.iter(), Some(document.id))?;
        stored.insert(document.id, document.body);
        Ok(())
    }

    async fn fetch(&self, kind: EntityKind, ids: &[EntityId]) -> StoreResult<Vec<Document>> {
        let stored = self.documents.lock().await;
        Ok(ids
            .iter()
            .filter(|id| id.kind() == kind)
            .filter_map(|id| {
                stored.get(id).map(|body| Document {
                    id: *id,
                    body: body.clone(),
                })
            })
            .collect())
    }

    async fn query(&self, query: &Query) -> StoreResult<Vec<Document>> {
        let stored = self.documents.lock().await;
        let mut found: Vec<Document> = stored
            .iter()
            .filter(|(id, body)| query.kinds.contains(&id.kind()) && query.filter.matches(body))
            .map(|(id, body)| Document {
                id: *id,
                body: body.clone(),
            })
            .collect();
        drop(stored);

        if let Some(sort) = &query.sort {
            found.sort_by(|a, b| {
                let order = compare_values(a.body.get(&sort.field), b.body.get(&sort.field));
                if sort.descending {
                    order.reverse()
                } else {
                    order
                }
            });
        }
        if let Some(fields) = &query.projection {
            for document in &mut found {
                document.body = project(&document.body, fields);
            }
        }
        Ok(found)
    }

    async fn search(
        &self,
        text: &str,
        skip: usize,
        limit: usize,
    ) -> StoreResult<Vec<ScoredDocument>> {
        let terms: Vec<String> = tokenize(text).collect();
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let stored = self.documents.lock().await;
        let mut hits: Vec<ScoredDocument> = stored
            .iter()
            .filter_map(|(id, body)| {
                score(body, &terms).map(|score| ScoredDocument {
                    document: Document {
                        id: *id,
                        body: body.clone(),
                    },
                    score,
                })
            })
            .collect();
        drop(stored);

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.document.id.cmp(&b.document.id))
        });
        Ok(hits.into_iter().skip(skip).take(limit).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Filter, Sort};
    use serde_json::json;

    fn doc(kind: EntityKind, seq: u64, body: Value) -> Document {
        let id = EntityId::new(kind, seq);
        let mut body = body;
        body["id"] = json!(id);
        Document { id, body }
    }

    #[tokio::test]
    async fn sequence_is_shared_across_kinds() {
        let store = MemoryStore::new();
        let a = store.next_id(EntityKind::Club).await.unwrap();
        let b = store.next_id(EntityKind::School).await.unwrap();
        assert_eq!(a.seq(), 1);
        assert_eq!(b.seq(), 2);
    }

    #[tokio::test]
    async fn duplicate_email_rejects_the_whole_batch() {
        let store = MemoryStore::new();
        store
            .insert(vec![doc(
                EntityKind::Member,
                1,
                json!({"username": "ana", "email": "ana@example.com"}),
            )])
            .await
            .unwrap();

        let err = store
            .insert(vec![
                doc(EntityKind::School, 2, json!({"name": "Lincoln High"})),
                doc(
                    EntityKind::Company,
                    3,
                    json!({"username": "acme", "email": "ana@example.com"}),
                ),
            ])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(UniqueField::Email)));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn duplicate_within_one_batch() {
        let store = MemoryStore::new();
        let err = store
            .insert(vec![
                doc(EntityKind::Member, 1, json!({"username": "ana", "email": "a@x"})),
                doc(EntityKind::Member, 2, json!({"username": "ana", "email": "b@x"})),
            ])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(UniqueField::Username)));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn replace_requires_existing_document() {
        let store = MemoryStore::new();
        let school = doc(EntityKind::School, 1, json!({"name": "Lincoln High"}));
        let err = store.replace(school.clone()).await.unwrap_err();
        assert!(matches!(err, StoreError::Missing(_)));

        store.insert(vec![school.clone()]).await.unwrap();
        let mut renamed = school;
        renamed.body["name"] = json!("Lincoln North");
        store.replace(renamed.clone()).await.unwrap();
        let fetched = store.fetch(EntityKind::School, &[renamed.id]).await.unwrap();
        assert_eq!(fetched, vec![renamed]);
    }

    #[tokio::test]
    async fn query_filters_sorts_and_projects() {
        let store = MemoryStore::new();
        store
            .insert(vec![
                doc(EntityKind::Club, 1, json!({"name": "Robotics", "school_id": "schl9"})),
                doc(EntityKind::Club, 2, json!({"name": "Chess", "school_id": "schl9"})),
                doc(EntityKind::Club, 3, json!({"name": "Art", "school_id": "schl8"})),
                doc(EntityKind::School, 9, json!({"name": "Lincoln High"})),
            ])
            .await
            .unwrap();

        let found = store
            .query(
                &Query::new(&[EntityKind::Club])
                    .filter(Filter::eq("school_id", "schl9"))
                    .sort(Some(Sort::asc("name")))
                    .project(&["name"]),
            )
            .await
            .unwrap();
        let bodies: Vec<Value> = found.into_iter().map(|d| d.body).collect();
        assert_eq!(
            bodies,
            vec![
                json!({"id": "club2", "name": "Chess"}),
                json!({"id": "club1", "name": "Robotics"}),
            ]
        );
    }

    #[tokio::test]
    async fn search_requires_every_term_and_ranks() {
        let store = MemoryStore::new();
        store
            .insert(vec![
                doc(EntityKind::Club, 1, json!({"name": "Robotics Club"})),
                doc(
                    EntityKind::Competition,
                    2,
                    json!({"name": "Robotics Open", "description": "robotics for every club in the state"}),
                ),
                doc(EntityKind::Club, 3, json!({"name": "Chess Club"})),
            ])
            .await
            .unwrap();

        let hits = store.search("robotics club", 0, 10).await.unwrap();
        let ids: Vec<String> = hits.iter().map(|h| h.document.id.to_string()).collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&"club1".to_string()));
        assert!(ids.contains(&"cmpt2".to_string()));
        assert!(hits[0].score >= hits[1].score);

        assert!(store.search("  ", 0, 10).await.unwrap().is_empty());
        assert_eq!(store.search("club", 1, 1).await.unwrap().len(), 1);
    }
}
