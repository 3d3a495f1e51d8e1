use super::{load, refs, EntityRef};
use crate::{
    directory::Directory,
    error::AppResult,
    models::{Competition, EntityId},
};
use axum::{extract::Path, routing::get, Extension, Json, Router};
use chrono::NaiveDate;
use serde::Serialize;

#[derive(Serialize)]
struct CompetitionView {
    id: EntityId,
    name: String,
    description: String,
    date: NaiveDate,
    website: Option<String>,
    host: Option<EntityRef>,
    clubs: Vec<EntityRef>,
    members: Vec<EntityRef>,
}

async fn competition(
    Extension(directory): Extension<Directory>,
    Path(id): Path<String>,
) -> AppResult<Json<CompetitionView>> {
    let competition: Competition = load(&directory, &id).await?;
    let host = directory
        .get_by_id(competition.host_id)
        .await?
        .as_ref()
        .map(EntityRef::from);
    let clubs = directory.get_by_ids(&competition.club_ids).await?;
    let members = directory.get_by_ids(&competition.member_ids).await?;

    Ok(Json(CompetitionView {
        id: competition.id,
        name: competition.name,
        description: competition.description,
        date: competition.date,
        website: competition.website,
        host,
        clubs: refs(&clubs),
        members: refs(&members),
    }))
}

pub fn app() -> Router {
    Router::new().route("/competition/:id", get(competition))
}
