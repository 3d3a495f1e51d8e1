use crate::{
    auth::{self, AdminOnly, SessionKeys},
    config::Settings,
    directory::Directory,
    error::{AppError, AppResult, FieldErrors},
    models::{
        Account, Administrator, Company, CompetitionHost, Entity, EntityId, EntityKind, Member,
        School, User,
    },
    store::{Filter, Sort, StoreError},
};
use axum::{
    extract::{Form, Query},
    http::{header, StatusCode},
    response::{IntoResponse, Redirect},
    routing::get,
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use url::Url;
use validator::{Validate, ValidationErrors};

/// Account types anyone may register as. Administrators are only created by
/// other administrators.
const PUBLIC_ACCOUNT_TYPES: [EntityKind; 4] = [
    EntityKind::Member,
    EntityKind::Company,
    EntityKind::User,
    EntityKind::CompetitionHost,
];

const LOGIN_FAILED: &str = "invalid username or password";

#[derive(Deserialize)]
struct LoginParams {
    came_from: Option<String>,
}

#[derive(Serialize)]
struct LoginPage {
    came_from: String,
    fields: [&'static str; 2],
}

async fn login_page(Query(params): Query<LoginParams>) -> Json<LoginPage> {
    Json(LoginPage {
        came_from: params.came_from.unwrap_or_else(|| "/".to_string()),
        fields: ["username", "password"],
    })
}

#[derive(Deserialize)]
struct LoginForm {
    username: String,
    password: String,
    #[serde(default)]
    came_from: Option<String>,
}

/// Where to go after logging in: a path on this site, never the login form
/// itself.
fn landing(public_host: &Url, came_from: Option<&str>) -> String {
    let Some(raw) = came_from.filter(|s| !s.is_empty()) else {
        return "/".to_string();
    };
    match public_host.join(raw) {
        Ok(target) if target.origin() == public_host.origin() && target.path() != "/login" => {
            match target.query() {
                Some(query) => format!("{}?{query}", target.path()),
                None => target.path().to_string(),
            }
        }
        _ => "/".to_string(),
    }
}

async fn login(
    Extension(directory): Extension<Directory>,
    Extension(keys): Extension<Arc<SessionKeys>>,
    Extension(settings): Extension<Arc<Settings>>,
    Form(form): Form<LoginForm>,
) -> AppResult<impl IntoResponse> {
    let found = directory.account_by_username(form.username.trim()).await?;
    let account = found.as_ref().and_then(Entity::account);
    // unknown usernames and wrong passwords get the same answer, in about the
    // same time
    let verified = auth::check_login(
        &form.password,
        account.map(|account| account.password_hash.as_str()),
    );
    let Some(account) = account.filter(|_| verified) else {
        tracing::debug!(username = %form.username, "login rejected");
        return Err(AppError::from(StatusCode::UNAUTHORIZED, LOGIN_FAILED));
    };

    let token = keys.session_token(account.id)?;
    let target = landing(&settings.public_host, form.came_from.as_deref());
    Ok((
        [(header::SET_COOKIE, keys.session_cookie(&token))],
        Redirect::to(&target),
    ))
}

async fn logout() -> impl IntoResponse {
    (
        [(header::SET_COOKIE, auth::clear_session_cookie())],
        Redirect::to("/"),
    )
}

#[derive(Serialize)]
struct AccountTypeChoice {
    code: &'static str,
    label: &'static str,
}

#[derive(Serialize)]
struct SchoolChoice {
    id: EntityId,
    name: String,
}

#[derive(Serialize)]
struct RegisterPage {
    account_types: Vec<AccountTypeChoice>,
    schools: Vec<SchoolChoice>,
}

async fn register_page(directory: &Directory, kinds: &[EntityKind]) -> AppResult<RegisterPage> {
    let schools = directory
        .find_projected::<School>(Filter::All, Some(Sort::asc("name")), &["name"])
        .await?
        .into_iter()
        .map(|school| SchoolChoice {
            id: school.id,
            name: school
                .fields
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        })
        .collect();

    Ok(RegisterPage {
        account_types: kinds
            .iter()
            .map(|kind| AccountTypeChoice {
                code: kind.prefix(),
                label: kind.label(),
            })
            .collect(),
        schools,
    })
}

#[derive(Default, Deserialize, Validate)]
#[serde(default)]
struct RegistrationForm {
    account_type: String,
    #[validate(length(min = 3, max = 32, message = "must be between 3 and 32 characters"))]
    username: String,
    #[validate(length(min = 1, message = "is required"))]
    name: String,
    #[validate(email(message = "is not a valid email address"))]
    email: String,
    #[validate(length(min = 8, message = "must be at least 8 characters"))]
    password: String,
    #[validate(must_match(other = "password", message = "does not match the password"))]
    confirm_password: String,
    #[validate(length(min = 1, message = "is required"))]
    city: String,
    #[validate(length(min = 1, message = "is required"))]
    state: String,
    major: Option<String>,
    school_id: Option<String>,
}

fn field_errors(errors: &ValidationErrors) -> FieldErrors {
    errors
        .field_errors()
        .into_iter()
        .map(|(field, errors)| {
            let messages = errors
                .iter()
                .map(|e| e.message.as_ref().map_or_else(|| e.code.to_string(), |m| m.to_string()))
                .collect();
            (field.to_string(), messages)
        })
        .collect()
}

fn push(fields: &mut FieldErrors, field: &str, message: &str) {
    fields
        .entry(field.to_string())
        .or_default()
        .push(message.to_string());
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Validates a registration form and stores the account it describes.
async fn create_account(
    directory: &Directory,
    mut form: RegistrationForm,
    allowed: &[EntityKind],
) -> AppResult<Entity> {
    form.username = form.username.trim().to_string();
    form.email = form.email.trim().to_lowercase();

    let mut fields = match form.validate() {
        Ok(()) => FieldErrors::new(),
        Err(e) => field_errors(&e),
    };

    let kind = EntityKind::from_prefix(form.account_type.trim()).filter(|k| allowed.contains(k));
    if kind.is_none() {
        push(&mut fields, "account_type", "is not an account type you may create");
    }

    let mut school = None;
    if kind == Some(EntityKind::Member) {
        match non_empty(form.school_id.take()).map(|raw| raw.parse::<EntityId>()) {
            None => push(&mut fields, "school_id", "is required for students"),
            Some(Ok(id)) if id.kind() == EntityKind::School => {
                if directory.get::<School>(id).await?.is_some() {
                    school = Some(id);
                } else {
                    push(&mut fields, "school_id", "does not name a school");
                }
            }
            Some(_) => push(&mut fields, "school_id", "does not name a school"),
        }
    }

    if !fields.is_empty() {
        return Err(AppError::Validation(fields));
    }
    let kind = kind.ok_or_else(|| AppError::field("account_type", "is required"))?;

    let password_hash = auth::hash_password(&form.password)?;
    let major = non_empty(form.major);
    let created = directory
        .create_entity(kind, move |id| {
            let account = Account {
                id,
                username: form.username,
                name: form.name.trim().to_string(),
                email: form.email,
                password_hash,
                city: form.city.trim().to_string(),
                state: form.state.trim().to_string(),
                email_verified: false,
                major,
                notes: None,
                photo_url: None,
            };
            match kind {
                EntityKind::Member => Entity::Member(Member {
                    account,
                    school_ids: school.into_iter().collect(),
                    club_ids: Vec::new(),
                    resume: None,
                }),
                EntityKind::Company => Entity::Company(Company { account }),
                EntityKind::CompetitionHost => Entity::CompetitionHost(CompetitionHost { account }),
                EntityKind::Administrator => Entity::Administrator(Administrator { account }),
                _ => Entity::User(User { account }),
            }
        })
        .await;

    match created {
        Ok(entity) => {
            tracing::info!(id = %entity.id(), "account created");
            Ok(entity)
        }
        Err(err @ StoreError::Duplicate(_)) => {
            Err(AppError::from(StatusCode::CONFLICT, err.to_string()))
        }
        Err(err) => Err(err.into()),
    }
}

async fn show_register(
    Extension(directory): Extension<Directory>,
) -> AppResult<Json<RegisterPage>> {
    Ok(Json(register_page(&directory, &PUBLIC_ACCOUNT_TYPES).await?))
}

async fn register(
    Extension(directory): Extension<Directory>,
    Extension(keys): Extension<Arc<SessionKeys>>,
    Form(form): Form<RegistrationForm>,
) -> AppResult<impl IntoResponse> {
    let account = create_account(&directory, form, &PUBLIC_ACCOUNT_TYPES).await?;
    let token = keys.session_token(account.id())?;
    Ok((
        [(header::SET_COOKIE, keys.session_cookie(&token))],
        Redirect::to(&format!("/user/{}", account.id())),
    ))
}

#[derive(Serialize)]
struct CreatedAccount {
    id: EntityId,
    kind: &'static str,
    username: String,
}

async fn show_create_user(
    Extension(directory): Extension<Directory>,
    AdminOnly(_): AdminOnly,
) -> AppResult<Json<RegisterPage>> {
    Ok(Json(register_page(&directory, &EntityKind::ACCOUNTS).await?))
}

async fn create_user(
    Extension(directory): Extension<Directory>,
    AdminOnly(admin): AdminOnly,
    Form(form): Form<RegistrationForm>,
) -> AppResult<impl IntoResponse> {
    let created = create_account(&directory, form, &EntityKind::ACCOUNTS).await?;
    tracing::info!(admin = %admin.id(), id = %created.id(), "account created by administrator");
    let username = created
        .account()
        .map(|a| a.username.clone())
        .unwrap_or_default();
    Ok((
        StatusCode::CREATED,
        Json(CreatedAccount {
            id: created.id(),
            kind: created.kind().label(),
            username,
        }),
    ))
}

pub fn app() -> Router {
    Router::new()
        .route("/login", get(login_page).post(login))
        .route("/logout", get(logout))
        .route("/register", get(show_register).post(register))
        .route("/create_user", get(show_create_user).post(create_user))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host() -> Url {
        Url::parse("http://localhost:8080").unwrap()
    }

    #[test]
    fn landing_stays_on_site() {
        assert_eq!(landing(&host(), None), "/");
        assert_eq!(landing(&host(), Some("")), "/");
        assert_eq!(landing(&host(), Some("/club/club3")), "/club/club3");
        assert_eq!(landing(&host(), Some("/search/chess?limit=5")), "/search/chess?limit=5");
        assert_eq!(landing(&host(), Some("https://evil.example/")), "/");
        assert_eq!(landing(&host(), Some("//evil.example/path")), "/");
        assert_eq!(landing(&host(), Some("/login")), "/");
    }

    #[test]
    fn validation_messages_are_keyed_by_field() {
        let form = RegistrationForm {
            account_type: "user".into(),
            username: "an".into(),
            name: "Ana".into(),
            email: "not-an-email".into(),
            password: "longenough".into(),
            confirm_password: "different".into(),
            city: "Lincoln".into(),
            state: "NE".into(),
            ..Default::default()
        };
        let fields = field_errors(&form.validate().unwrap_err());
        assert_eq!(
            fields.keys().map(String::as_str).collect::<Vec<_>>(),
            vec!["confirm_password", "email", "username"]
        );
        assert_eq!(fields["email"], vec!["is not a valid email address"]);
    }
}
