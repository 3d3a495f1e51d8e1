use super::{load, parse_id, refs, EntityRef};
use crate::{
    auth::{self, RequireViewer},
    directory::Directory,
    error::{AppError, AppResult},
    models::{Achievement, Company, Competition, CompetitionHost, Entity, EntityId, JobOffer},
};
use axum::{extract::Path, routing::get, Extension, Json, Router};
use chrono::NaiveDate;
use serde::Serialize;

#[derive(Serialize)]
pub(crate) struct DatedView {
    id: EntityId,
    name: String,
    description: String,
    date: NaiveDate,
}

impl From<Achievement> for DatedView {
    fn from(a: Achievement) -> Self {
        DatedView {
            id: a.id,
            name: a.title,
            description: a.description,
            date: a.date,
        }
    }
}

impl From<Competition> for DatedView {
    fn from(c: Competition) -> Self {
        DatedView {
            id: c.id,
            name: c.name,
            description: c.description,
            date: c.date,
        }
    }
}

#[derive(Serialize)]
struct ProfileView {
    id: EntityId,
    kind: &'static str,
    username: String,
    name: String,
    email: String,
    email_verified: bool,
    city: String,
    state: String,
    major: Option<String>,
    notes: Option<String>,
    photo_url: Option<String>,
    resume: Option<String>,
    schools: Vec<EntityRef>,
    clubs: Vec<EntityRef>,
    competitions: Vec<DatedView>,
    achievements: Vec<DatedView>,
}

/// Private profile of any account. Only the owner and administrators see it.
async fn user(
    Extension(directory): Extension<Directory>,
    RequireViewer(viewer): RequireViewer,
    Path(id): Path<String>,
) -> AppResult<Json<ProfileView>> {
    let id = parse_id(&id)?;
    if !id.kind().is_account() {
        return Err(AppError::not_found("user"));
    }
    if !auth::may_access(&viewer, id) {
        return Err(AppError::forbidden());
    }
    let entity = directory
        .get_by_id(id)
        .await?
        .ok_or_else(|| AppError::not_found("user"))?;
    let Some(account) = entity.account() else {
        return Err(AppError::not_found("user"));
    };

    let (schools, resume, competitions) = match &entity {
        Entity::Member(member) => {
            let schools: Vec<Entity> = directory
                .schools_of(member)
                .await?
                .into_iter()
                .map(Entity::School)
                .collect();
            let competitions = directory
                .competitions_of_member(id)
                .await?
                .into_iter()
                .map(DatedView::from)
                .collect();
            (refs(&schools), member.resume.clone(), competitions)
        }
        _ => (Vec::new(), None, Vec::new()),
    };
    let clubs: Vec<Entity> = directory
        .clubs_of(&entity)
        .await?
        .into_iter()
        .map(Entity::Club)
        .collect();
    let achievements = directory
        .achievements_of_user(id)
        .await?
        .into_iter()
        .map(DatedView::from)
        .collect();

    Ok(Json(ProfileView {
        id,
        kind: entity.kind().label(),
        username: account.username.clone(),
        name: account.name.clone(),
        email: account.email.clone(),
        email_verified: account.email_verified,
        city: account.city.clone(),
        state: account.state.clone(),
        major: account.major.clone(),
        notes: account.notes.clone(),
        photo_url: account.photo_url.clone(),
        resume,
        schools,
        clubs: refs(&clubs),
        competitions,
        achievements,
    }))
}

#[derive(Serialize)]
struct JobOfferView {
    id: EntityId,
    name: String,
    description: String,
    date: NaiveDate,
    location: String,
    applicants: usize,
}

impl From<JobOffer> for JobOfferView {
    fn from(offer: JobOffer) -> Self {
        JobOfferView {
            id: offer.id,
            name: offer.name,
            description: offer.description,
            date: offer.date,
            location: offer.location,
            applicants: offer.member_ids.len(),
        }
    }
}

#[derive(Serialize)]
struct OrganizationView<T> {
    id: EntityId,
    name: String,
    city: String,
    state: String,
    photo_url: Option<String>,
    notes: Option<String>,
    #[serde(flatten)]
    listings: T,
}

#[derive(Serialize)]
struct JobOffers {
    job_offers: Vec<JobOfferView>,
}

#[derive(Serialize)]
struct Competitions {
    competitions: Vec<DatedView>,
}

async fn company(
    Extension(directory): Extension<Directory>,
    Path(id): Path<String>,
) -> AppResult<Json<OrganizationView<JobOffers>>> {
    let company: Company = load(&directory, &id).await?;
    let job_offers = directory
        .job_offers_of_company(company.account.id)
        .await?
        .into_iter()
        .map(JobOfferView::from)
        .collect();

    let account = company.account;
    Ok(Json(OrganizationView {
        id: account.id,
        name: account.name,
        city: account.city,
        state: account.state,
        photo_url: account.photo_url,
        notes: account.notes,
        listings: JobOffers { job_offers },
    }))
}

async fn competition_host(
    Extension(directory): Extension<Directory>,
    Path(id): Path<String>,
) -> AppResult<Json<OrganizationView<Competitions>>> {
    let host: CompetitionHost = load(&directory, &id).await?;
    let competitions = directory
        .competitions_of_host(host.account.id)
        .await?
        .into_iter()
        .map(DatedView::from)
        .collect();

    let account = host.account;
    Ok(Json(OrganizationView {
        id: account.id,
        name: account.name,
        city: account.city,
        state: account.state,
        photo_url: account.photo_url,
        notes: account.notes,
        listings: Competitions { competitions },
    }))
}

pub fn app() -> Router {
    Router::new()
        .route("/user/:id", get(user))
        .route("/company/:id", get(company))
        .route("/competition_host/:id", get(competition_host))
}
