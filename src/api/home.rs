use super::{refs, EntityRef};
use crate::{
    auth::Viewer,
    config::Settings,
    directory::{AddressedPost, Directory},
    error::AppResult,
    models::{Entity, EntityId},
};
use axum::{
    extract::{Path, Query},
    routing::get,
    Extension, Json, Router,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Serialize)]
struct ViewerSummary {
    id: EntityId,
    kind: &'static str,
    username: String,
    name: String,
}

#[derive(Serialize)]
struct PostView {
    id: EntityId,
    title: String,
    text: String,
    date: NaiveDate,
    photo_urls: Vec<String>,
    video_url: Option<String>,
    notification_id: EntityId,
    sender_id: Option<EntityId>,
}

impl From<AddressedPost> for PostView {
    fn from(AddressedPost { post, notification }: AddressedPost) -> Self {
        PostView {
            id: post.id,
            title: post.title,
            text: post.text,
            date: post.date,
            photo_urls: post.photo_urls,
            video_url: post.video_url,
            notification_id: notification.id,
            sender_id: notification.sender_id,
        }
    }
}

#[derive(Serialize)]
struct HomeView {
    viewer: Option<ViewerSummary>,
    clubs: Vec<EntityRef>,
    posts: Vec<PostView>,
}

async fn home(
    Extension(directory): Extension<Directory>,
    Viewer(viewer): Viewer,
) -> AppResult<Json<HomeView>> {
    let Some(viewer) = viewer else {
        return Ok(Json(HomeView {
            viewer: None,
            clubs: Vec::new(),
            posts: Vec::new(),
        }));
    };

    let clubs: Vec<Entity> = directory
        .clubs_of(&viewer)
        .await?
        .into_iter()
        .map(Entity::Club)
        .collect();
    let posts = directory
        .addressed_posts(&viewer)
        .await?
        .into_iter()
        .map(PostView::from)
        .collect();
    let summary = viewer.account().map(|account| ViewerSummary {
        id: account.id,
        kind: viewer.kind().label(),
        username: account.username.clone(),
        name: account.name.clone(),
    });

    Ok(Json(HomeView {
        viewer: summary,
        clubs: refs(&clubs),
        posts,
    }))
}

#[derive(Deserialize)]
struct SearchParams {
    skip: Option<usize>,
    limit: Option<usize>,
}

#[derive(Serialize)]
struct SearchHitView {
    id: EntityId,
    kind: &'static str,
    name: Option<String>,
    score: f32,
}

#[derive(Serialize)]
struct SearchView {
    query: String,
    skip: usize,
    limit: usize,
    hits: Vec<SearchHitView>,
}

async fn search(
    Extension(directory): Extension<Directory>,
    Extension(settings): Extension<Arc<Settings>>,
    Path(text): Path<String>,
    Query(params): Query<SearchParams>,
) -> AppResult<Json<SearchView>> {
    let skip = params.skip.unwrap_or(0);
    let limit = params
        .limit
        .unwrap_or(settings.search_limit_max)
        .min(settings.search_limit_max);

    let hits = directory
        .find_text(&text, skip, limit)
        .await?
        .into_iter()
        .map(|hit| SearchHitView {
            id: hit.entity.id(),
            kind: hit.entity.kind().label(),
            name: hit.entity.name().map(str::to_string),
            score: hit.score,
        })
        .collect();

    Ok(Json(SearchView {
        query: text,
        skip,
        limit,
        hits,
    }))
}

pub fn app() -> Router {
    Router::new()
        .route("/", get(home))
        .route("/search/:text", get(search))
}
