use crate::{
    directory::Directory,
    error::{AppError, AppResult},
    models::{Entity, EntityId, Record},
};
use axum::{http::StatusCode, Router};
use serde::Serialize;

pub mod account;
pub mod auth;
pub mod club;
pub mod competition;
pub mod home;
pub mod verify;

/// A link to another entity, as embedded in every view.
#[derive(Debug, Serialize)]
pub struct EntityRef {
    pub id: EntityId,
    pub name: String,
}

impl EntityRef {
    pub fn new(id: EntityId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

impl From<&Entity> for EntityRef {
    fn from(entity: &Entity) -> Self {
        let id = entity.id();
        EntityRef {
            id,
            name: entity.name().map_or_else(|| id.to_string(), str::to_string),
        }
    }
}

pub(crate) fn refs<'a>(entities: impl IntoIterator<Item = &'a Entity>) -> Vec<EntityRef> {
    entities.into_iter().map(EntityRef::from).collect()
}

/// Path ids that do not parse are a bad request.
pub(crate) fn parse_id(raw: &str) -> AppResult<EntityId> {
    raw.parse()
        .map_err(|e: crate::models::IdError| AppError::from(StatusCode::BAD_REQUEST, e.to_string()))
}

/// Loads the record a route is about. An id of another kind is treated like
/// an absent record.
pub(crate) async fn load<T: Record>(directory: &Directory, raw: &str) -> AppResult<T> {
    let id = parse_id(raw)?;
    if id.kind() != T::KIND {
        return Err(AppError::not_found(T::KIND.label()));
    }
    directory
        .get::<T>(id)
        .await?
        .ok_or_else(|| AppError::not_found(T::KIND.label()))
}

pub fn app() -> Router {
    Router::new()
        .merge(home::app())
        .merge(auth::app())
        .merge(verify::app())
        .merge(account::app())
        .merge(club::app())
        .merge(competition::app())
}
