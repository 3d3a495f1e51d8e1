use super::{Document, Filter, Query, ScoredDocument, Store, StoreError, StoreResult, UniqueField};
use crate::{
    models::{EntityId, EntityKind, IdError},
    schema::entities,
};
use async_trait::async_trait;
use deadpool::managed::{Object, Pool};
use diesel::{
    pg::Pg,
    prelude::*,
    query_builder::{BoxedSqlQuery, SqlQuery},
    result::{DatabaseErrorKind, Error as DieselError},
    sql_types::{Array, BigInt, Float4, Jsonb, Text},
};
use diesel_async::{pooled_connection::AsyncDieselConnectionManager, AsyncPgConnection, RunQueryDsl};
use serde_json::Value;

pub type DbPool = Pool<AsyncDieselConnectionManager<AsyncPgConnection>>;

type Connection = Object<AsyncDieselConnectionManager<AsyncPgConnection>>;

pub fn connect_to_db(db_url: &str) -> anyhow::Result<DbPool> {
    let db_config = AsyncDieselConnectionManager::<AsyncPgConnection>::new(db_url);
    Pool::builder(db_config)
        .build()
        .map_err(|e| anyhow::anyhow!("failed to build database pool: {e}"))
}

/// Store over the `entities` table: one JSONB document per entity.
#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn connection(&self) -> StoreResult<Connection> {
        self.pool
            .get()
            .await
            .map_err(|e| StoreError::Pool(e.to_string()))
    }
}

#[derive(QueryableByName)]
struct DocumentRow {
    #[diesel(sql_type = Text)]
    id: String,
    #[diesel(sql_type = Jsonb)]
    document: Value,
}

#[derive(QueryableByName)]
struct ScoredRow {
    #[diesel(sql_type = Text)]
    id: String,
    #[diesel(sql_type = Jsonb)]
    document: Value,
    #[diesel(sql_type = Float4)]
    score: f32,
}

#[derive(QueryableByName)]
struct NextSeq {
    #[diesel(sql_type = BigInt)]
    seq: i64,
}

#[derive(Insertable)]
#[diesel(table_name = entities)]
struct NewEntity {
    id: String,
    kind: String,
    document: Value,
}

fn into_document(id: String, body: Value) -> StoreResult<Document> {
    let parsed = id.parse().map_err(|e: IdError| StoreError::Corrupt {
        id: id.clone(),
        reason: e.to_string(),
    })?;
    Ok(Document { id: parsed, body })
}

fn map_write_error(err: DieselError) -> StoreError {
    if let DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, info) = &err {
        let field = match info.constraint_name() {
            Some("entities_username_key") => UniqueField::Username,
            Some("entities_email_key") => UniqueField::Email,
            _ => UniqueField::Id,
        };
        return StoreError::Duplicate(field);
    }
    StoreError::Database(err)
}

enum Bind {
    Text(String),
    Texts(Vec<String>),
    Json(Value),
}

/// Raw SQL with numbered placeholders, for the dynamic filters diesel's
/// query builder cannot express over JSONB.
#[derive(Default)]
struct Statement {
    binds: Vec<Bind>,
}

impl Statement {
    fn param(&mut self, bind: Bind) -> String {
        self.binds.push(bind);
        format!("${}", self.binds.len())
    }

    fn condition(&mut self, filter: &Filter) -> String {
        match filter {
            Filter::All => "TRUE".to_string(),
            Filter::Eq(field, value) => {
                let field = self.param(Bind::Text(field.clone()));
                let value = self.param(Bind::Json(value.clone()));
                format!("document -> {field} = {value}")
            }
            Filter::Contains(field, value) => {
                let field = self.param(Bind::Text(field.clone()));
                let value = self.param(Bind::Json(Value::Array(vec![value.clone()])));
                format!("document -> {field} @> {value}")
            }
            Filter::In(field, values) => {
                let field = self.param(Bind::Text(field.clone()));
                let values = self.param(Bind::Json(Value::Array(values.clone())));
                format!("document -> {field} IN (SELECT jsonb_array_elements({values}))")
            }
            Filter::Overlaps(field, values) => {
                let field = self.param(Bind::Text(field.clone()));
                let values = self.param(Bind::Json(Value::Array(values.clone())));
                format!(
                    "EXISTS (SELECT 1 FROM jsonb_array_elements(\
                     CASE jsonb_typeof(document -> {field}) WHEN 'array' THEN document -> {field} ELSE '[]'::jsonb END\
                     ) AS item WHERE item IN (SELECT jsonb_array_elements({values})))"
                )
            }
            Filter::And(filters) if filters.is_empty() => "TRUE".to_string(),
            Filter::And(filters) => filters
                .iter()
                .map(|f| format!("({})", self.condition(f)))
                .collect::<Vec<_>>()
                .join(" AND "),
        }
    }

    fn into_query(self, sql: String) -> BoxedSqlQuery<'static, Pg, SqlQuery> {
        self.binds
            .into_iter()
            .fold(diesel::sql_query(sql).into_boxed(), |query, bind| match bind {
                Bind::Text(v) => query.bind::<Text, _>(v),
                Bind::Texts(v) => query.bind::<Array<Text>, _>(v),
                Bind::Json(v) => query.bind::<Jsonb, _>(v),
            })
    }
}

#[async_trait]
impl Store for PgStore {
    #[tracing::instrument(skip(self))]
    async fn next_id(&self, kind: EntityKind) -> StoreResult<EntityId> {
        let conn = &mut self.connection().await?;
        let next = diesel::sql_query("SELECT nextval('entity_seq') AS seq")
            .get_result::<NextSeq>(conn)
            .await?;
        // the sequence starts at 1 and never goes negative
        Ok(EntityId::new(kind, next.seq as u64))
    }

    #[tracing::instrument(skip(self, documents), fields(count = documents.len()))]
    async fn insert(&self, documents: Vec<Document>) -> StoreResult<()> {
        if documents.is_empty() {
            return Ok(());
        }
        let rows: Vec<NewEntity> = documents
            .into_iter()
            .map(|d| NewEntity {
                id: d.id.to_string(),
                kind: d.id.kind().prefix().to_string(),
                document: d.body,
            })
            .collect();

        let conn = &mut self.connection().await?;
        // a single statement, so the batch commits or fails as a whole
        diesel::insert_into(entities::table)
            .values(rows)
            .execute(conn)
            .await
            .map_err(map_write_error)?;
        Ok(())
    }

    #[tracing::instrument(skip(self, document), fields(id = %document.id))]
    async fn replace(&self, document: Document) -> StoreResult<()> {
        let conn = &mut self.connection().await?;
        let updated = diesel::update(entities::table.find(document.id.to_string()))
            .set(entities::document.eq(document.body))
            .execute(conn)
            .await
            .map_err(map_write_error)?;
        if updated == 0 {
            return Err(StoreError::Missing(document.id));
        }
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn fetch(&self, kind: EntityKind, ids: &[EntityId]) -> StoreResult<Vec<Document>> {
        let ids: Vec<String> = ids
            .iter()
            .filter(|id| id.kind() == kind)
            .map(ToString::to_string)
            .collect();
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let conn = &mut self.connection().await?;
        entities::table
            .filter(entities::kind.eq(kind.prefix()))
            .filter(entities::id.eq_any(ids))
            .select((entities::id, entities::document))
            .load::<(String, Value)>(conn)
            .await?
            .into_iter()
            .map(|(id, body)| into_document(id, body))
            .collect()
    }

    #[tracing::instrument(skip(self))]
    async fn query(&self, query: &Query) -> StoreResult<Vec<Document>> {
        let mut stmt = Statement::default();
        let kinds = stmt.param(Bind::Texts(
            query.kinds.iter().map(|k| k.prefix().to_string()).collect(),
        ));
        let body = match &query.projection {
            None => "document".to_string(),
            Some(fields) => {
                let mut pairs = vec!["'id', document -> 'id'".to_string()];
                for field in fields {
                    let key = stmt.param(Bind::Text(field.clone()));
                    pairs.push(format!("{key}, document -> {key}"));
                }
                format!("jsonb_build_object({})", pairs.join(", "))
            }
        };
        let condition = stmt.condition(&query.filter);
        let order = match &query.sort {
            Some(sort) => {
                let field = stmt.param(Bind::Text(sort.field.clone()));
                let direction = if sort.descending {
                    "DESC NULLS LAST"
                } else {
                    "ASC NULLS FIRST"
                };
                // type rank, then strings byte-wise, then the jsonb value
                format!(
                    "CASE jsonb_typeof(document -> {field}) \
                       WHEN 'null' THEN 0 WHEN 'string' THEN 1 WHEN 'number' THEN 2 \
                       WHEN 'boolean' THEN 3 WHEN 'array' THEN 4 WHEN 'object' THEN 5 END {direction}, \
                     (CASE WHEN jsonb_typeof(document -> {field}) = 'string' \
                       THEN document ->> {field} END) COLLATE \"C\" {direction}, \
                     document -> {field} {direction}, id"
                )
            }
            None => "id".to_string(),
        };
        let sql = format!(
            "SELECT id, {body} AS document FROM entities \
             WHERE kind = ANY({kinds}) AND ({condition}) ORDER BY {order}"
        );

        let conn = &mut self.connection().await?;
        stmt.into_query(sql)
            .load::<DocumentRow>(conn)
            .await?
            .into_iter()
            .map(|row| into_document(row.id, row.document))
            .collect()
    }

    #[tracing::instrument(skip(self))]
    async fn search(
        &self,
        text: &str,
        skip: usize,
        limit: usize,
    ) -> StoreResult<Vec<ScoredDocument>> {
        if text.trim().is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let conn = &mut self.connection().await?;
        diesel::sql_query(
            "SELECT id, document, ts_rank(search, q) AS score \
             FROM entities, plainto_tsquery('simple', $1) AS q \
             WHERE search @@ q \
             ORDER BY score DESC, id \
             OFFSET $2 LIMIT $3",
        )
        .bind::<Text, _>(text)
        .bind::<BigInt, _>(i64::try_from(skip).unwrap_or(i64::MAX))
        .bind::<BigInt, _>(i64::try_from(limit).unwrap_or(i64::MAX))
        .load::<ScoredRow>(conn)
        .await?
        .into_iter()
        .map(|row| {
            Ok(ScoredDocument {
                document: into_document(row.id, row.document)?,
                score: row.score,
            })
        })
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn placeholders_are_numbered_in_bind_order() {
        let mut stmt = Statement::default();
        let filter = Filter::eq("school_id", "schl1").and(Filter::overlaps("club_ids", ["club1"]));
        let sql = stmt.condition(&filter);
        assert_eq!(stmt.binds.len(), 4);
        assert!(sql.starts_with("(document -> $1 = $2) AND (EXISTS"));
        assert!(sql.contains("document -> $3"));
        assert!(sql.contains("jsonb_array_elements($4)"));
    }

    #[test]
    fn contains_binds_a_singleton_array() {
        let mut stmt = Statement::default();
        stmt.condition(&Filter::contains("member_ids", "user1"));
        match &stmt.binds[1] {
            Bind::Json(v) => assert_eq!(v, &json!(["user1"])),
            _ => panic!("expected a jsonb bind"),
        }
    }

    #[test]
    fn corrupt_ids_are_reported() {
        let err = into_document("zzzz1".to_string(), json!({})).unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { ref id, .. } if id == "zzzz1"));
    }
}
