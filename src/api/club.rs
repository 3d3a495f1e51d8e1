use super::{account::DatedView, load, refs, EntityRef};
use crate::{
    auth::RequireViewer,
    directory::Directory,
    error::{AppError, AppResult},
    models::{Club, Entity, EntityId, EntityKind, Member, OfficerRole, School},
};
use axum::{
    extract::{Form, Path},
    routing::{get, post},
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};

#[derive(Serialize)]
struct ClubView {
    id: EntityId,
    name: String,
    major: Option<String>,
    photo_url: Option<String>,
    school: Option<EntityRef>,
    president: Option<EntityRef>,
    vice_president: Option<EntityRef>,
    treasurer: Option<EntityRef>,
    secretary: Option<EntityRef>,
    members: Vec<EntityRef>,
    competitions: Vec<DatedView>,
    achievements: Vec<DatedView>,
}

fn member_ref(member: &Member) -> EntityRef {
    EntityRef::new(member.account.id, member.account.name.clone())
}

async fn club_view(directory: &Directory, club: Club) -> AppResult<ClubView> {
    let school = directory
        .get::<School>(club.school_id)
        .await?
        .map(|s| EntityRef::new(s.id, s.name));
    let members = directory
        .members_of_club(club.id)
        .await?
        .iter()
        .map(member_ref)
        .collect();
    let competitions = directory
        .competitions_of_club(club.id)
        .await?
        .into_iter()
        .map(DatedView::from)
        .collect();
    let achievements = directory
        .achievements_of_club(club.id)
        .await?
        .into_iter()
        .map(DatedView::from)
        .collect();

    let mut view = ClubView {
        id: club.id,
        name: club.name.clone(),
        major: club.major.clone(),
        photo_url: club.photo_url.clone(),
        school,
        president: None,
        vice_president: None,
        treasurer: None,
        secretary: None,
        members,
        competitions,
        achievements,
    };
    for (role, member) in directory.officers(&club).await? {
        let slot = match role {
            OfficerRole::President => &mut view.president,
            OfficerRole::VicePresident => &mut view.vice_president,
            OfficerRole::Treasurer => &mut view.treasurer,
            OfficerRole::Secretary => &mut view.secretary,
        };
        *slot = Some(member_ref(&member));
    }
    Ok(view)
}

async fn club(
    Extension(directory): Extension<Directory>,
    Path(id): Path<String>,
) -> AppResult<Json<ClubView>> {
    let club: Club = load(&directory, &id).await?;
    Ok(Json(club_view(&directory, club).await?))
}

#[derive(Deserialize)]
struct OfficerForm {
    role: String,
    /// Empty clears the slot.
    #[serde(default)]
    member_id: String,
}

/// Assigns or clears an officer slot. Allowed for administrators and the
/// club's president.
async fn assign_officer(
    Extension(directory): Extension<Directory>,
    RequireViewer(viewer): RequireViewer,
    Path(id): Path<String>,
    Form(form): Form<OfficerForm>,
) -> AppResult<Json<ClubView>> {
    let mut club: Club = load(&directory, &id).await?;
    if !viewer.is_admin() && club.president != Some(viewer.id()) {
        return Err(AppError::forbidden());
    }

    let role: OfficerRole = form
        .role
        .trim()
        .parse()
        .map_err(|_| AppError::field("role", "is not an officer role"))?;

    let member = match form.member_id.trim() {
        "" => None,
        raw => {
            let id = raw
                .parse::<EntityId>()
                .ok()
                .filter(|id| id.kind() == EntityKind::Member)
                .ok_or_else(|| AppError::field("member_id", "does not name a student"))?;
            let member = directory
                .get::<Member>(id)
                .await?
                .ok_or_else(|| AppError::field("member_id", "does not name a student"))?;
            if !member.club_ids.contains(&club.id) {
                return Err(AppError::field("member_id", "is not a member of this club"));
            }
            Some(id)
        }
    };

    club.set_officer(role, member);
    directory.save(&club).await?;
    tracing::info!(club = %club.id, ?role, ?member, by = %viewer.id(), "officer assigned");

    Ok(Json(club_view(&directory, club).await?))
}

#[derive(Serialize)]
struct SchoolView {
    id: EntityId,
    name: String,
    city: String,
    state: String,
    clubs: Vec<EntityRef>,
    members: Vec<EntityRef>,
}

async fn school(
    Extension(directory): Extension<Directory>,
    Path(id): Path<String>,
) -> AppResult<Json<SchoolView>> {
    let school: School = load(&directory, &id).await?;
    let clubs: Vec<Entity> = directory
        .clubs_of_school(school.id)
        .await?
        .into_iter()
        .map(Entity::Club)
        .collect();
    let members = directory
        .members_of_school(school.id)
        .await?
        .iter()
        .map(member_ref)
        .collect();

    Ok(Json(SchoolView {
        id: school.id,
        name: school.name,
        city: school.city,
        state: school.state,
        clubs: refs(&clubs),
        members,
    }))
}

pub fn app() -> Router {
    Router::new()
        .route("/club/:id", get(club))
        .route("/club/:id/officers", post(assign_officer))
        .route("/school/:id", get(school))
}
