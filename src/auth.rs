use crate::{
    directory::Directory,
    error::AppError,
    models::{Entity, EntityId},
};
use argon2::Argon2;
use axum::{
    async_trait,
    extract::{FromRequest, RequestParts},
    headers::{authorization::Bearer, Authorization, Cookie},
    TypedHeader,
};
use jsonwebtoken::{errors::Result as JwtResult, DecodingKey, EncodingKey, Header, Validation};
use password_hash::{
    self, rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString,
};
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};

pub const SESSION_COOKIE: &str = "session";

const SESSION_AUDIENCE: &str = "session";
const VERIFY_AUDIENCE: &str = "verify_email";

pub fn hash_password(password: impl AsRef<[u8]>) -> password_hash::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_ref(), &salt)
        .map(|h| h.to_string())
}

pub fn verify_password(
    password: impl AsRef<[u8]>,
    password_hash: impl AsRef<str>,
) -> password_hash::Result<bool> {
    let parsed_hash = PasswordHash::new(password_hash.as_ref())?;
    Ok(Argon2::default()
        .verify_password(password.as_ref(), &parsed_hash)
        .is_ok())
}

lazy_static::lazy_static! {
    /// Checked when a login names no account, so that path costs an argon2
    /// verification like any other.
    static ref ABSENT_ACCOUNT_HASH: String =
        hash_password("no such account").unwrap_or_default();
}

/// Decides a login attempt against the stored hash of the named account, if
/// any. A missing account or an unreadable stored hash still runs a full
/// verification before being rejected.
pub fn check_login(password: &str, stored_hash: Option<&str>) -> bool {
    match stored_hash.map(|hash| verify_password(password, hash)) {
        Some(Ok(verified)) => verified,
        Some(Err(err)) => {
            tracing::warn!(%err, "stored password hash is unreadable");
            verify_absent(password)
        }
        None => verify_absent(password),
    }
}

fn verify_absent(password: &str) -> bool {
    let _ = verify_password(password, ABSENT_ACCOUNT_HASH.as_str());
    false
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub aud: String,
    pub exp: u64,
}

/// Signing keys for session cookies and email verification links. Both are
/// HS256 tokens told apart by their audience.
pub struct SessionKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    session_ttl: Duration,
    verify_ttl: Duration,
}

impl SessionKeys {
    pub fn from_base64_secret(
        secret: &str,
        session_ttl: Duration,
        verify_ttl: Duration,
    ) -> JwtResult<SessionKeys> {
        Ok(SessionKeys {
            encoding: EncodingKey::from_base64_secret(secret)?,
            decoding: DecodingKey::from_base64_secret(secret)?,
            session_ttl,
            verify_ttl,
        })
    }

    pub fn from_secret(secret: &[u8], session_ttl: Duration, verify_ttl: Duration) -> SessionKeys {
        SessionKeys {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            session_ttl,
            verify_ttl,
        }
    }

    fn issue(&self, sub: String, aud: &str, ttl: Duration) -> JwtResult<String> {
        jsonwebtoken::encode(
            &Header::default(),
            &Claims {
                sub,
                aud: aud.to_string(),
                exp: jsonwebtoken::get_current_timestamp() + ttl.as_secs(),
            },
            &self.encoding,
        )
    }

    fn check(&self, token: &str, aud: &str) -> JwtResult<Claims> {
        let mut validation = Validation::default();
        validation.set_audience(&[aud]);
        jsonwebtoken::decode::<Claims>(token, &self.decoding, &validation).map(|data| data.claims)
    }

    pub fn session_token(&self, account: EntityId) -> JwtResult<String> {
        self.issue(account.to_string(), SESSION_AUDIENCE, self.session_ttl)
    }

    /// The account a session token was issued to, if the token is valid.
    pub fn session_account(&self, token: &str) -> Option<EntityId> {
        self.check(token, SESSION_AUDIENCE).ok()?.sub.parse().ok()
    }

    pub fn verification_token(&self, email: &str) -> JwtResult<String> {
        self.issue(email.to_string(), VERIFY_AUDIENCE, self.verify_ttl)
    }

    pub fn verifies_email(&self, token: &str, email: &str) -> bool {
        self.check(token, VERIFY_AUDIENCE)
            .map_or(false, |claims| claims.sub == email)
    }

    pub fn session_cookie(&self, token: &str) -> String {
        format!(
            "{SESSION_COOKIE}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
            self.session_ttl.as_secs()
        )
    }
}

pub fn clear_session_cookie() -> String {
    format!("{SESSION_COOKIE}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0")
}

/// Administrators may see everything, everyone else only their own account.
pub fn may_access(viewer: &Entity, owner: EntityId) -> bool {
    viewer.is_admin() || viewer.id() == owner
}

/// The logged in account, if any. Read from the session cookie or a bearer
/// token.
pub struct Viewer(pub Option<Entity>);

#[async_trait]
impl<B> FromRequest<B> for Viewer
where
    B: Send,
{
    type Rejection = AppError;

    async fn from_request(req: &mut RequestParts<B>) -> Result<Self, Self::Rejection> {
        let keys = req
            .extensions()
            .get::<Arc<SessionKeys>>()
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("session keys extension is missing"))?;
        let directory = req
            .extensions()
            .get::<Directory>()
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("directory extension is missing"))?;

        let mut token = TypedHeader::<Cookie>::from_request(req)
            .await
            .ok()
            .and_then(|TypedHeader(cookie)| cookie.get(SESSION_COOKIE).map(str::to_string));
        if token.is_none() {
            token = TypedHeader::<Authorization<Bearer>>::from_request(req)
                .await
                .ok()
                .map(|TypedHeader(auth)| auth.token().to_string());
        }

        let Some(id) = token.and_then(|t| keys.session_account(&t)) else {
            return Ok(Viewer(None));
        };
        let viewer = directory
            .get_by_id(id)
            .await?
            .filter(|entity| entity.account().is_some());
        Ok(Viewer(viewer))
    }
}

/// A logged in account. Anonymous requests are sent to the login form.
pub struct RequireViewer(pub Entity);

#[async_trait]
impl<B> FromRequest<B> for RequireViewer
where
    B: Send,
{
    type Rejection = AppError;

    async fn from_request(req: &mut RequestParts<B>) -> Result<Self, Self::Rejection> {
        let Viewer(viewer) = Viewer::from_request(req).await?;
        viewer.map(RequireViewer).ok_or_else(|| AppError::LoginRequired {
            came_from: req
                .uri()
                .path_and_query()
                .map_or("/", |p| p.as_str())
                .to_string(),
        })
    }
}

pub struct AdminOnly(pub Entity);

#[async_trait]
impl<B> FromRequest<B> for AdminOnly
where
    B: Send,
{
    type Rejection = AppError;

    async fn from_request(req: &mut RequestParts<B>) -> Result<Self, Self::Rejection> {
        let RequireViewer(viewer) = RequireViewer::from_request(req).await?;
        if !viewer.is_admin() {
            return Err(AppError::forbidden());
        }
        Ok(AdminOnly(viewer))
    }
}
