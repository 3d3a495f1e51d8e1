#![allow(dead_code)]

use axum::{
    body::Body,
    http::{header, Request},
    response::Response,
    Extension, Router,
};
use club_directory::{
    auth::SessionKeys,
    config::Settings,
    directory::Directory,
    fixture::{self, Fixture},
    models::{Entity, EntityId},
    store::MemoryStore,
};
use serde_json::Value;
use std::{sync::Arc, time::Duration};
use tower::ServiceExt;
use url::Url;

pub const SEARCH_LIMIT_MAX: usize = 10;

/// Lincoln High with three students, one club and two notifications: one
/// to the club and one to carl alone.
pub const SEED: &str = "
== School ==
name | city | state
Lincoln High | Lincoln | NE

== Administrator ==
username | name | email | password | city | state
admin | Admin | admin@example.com | admin-password | Lincoln | NE

== Member ==
username | name | email | password | major | city | state | school
ana | Ana | ana@example.com | ana-password | | Lincoln | NE | 1
ben | Ben | ben@example.com | ben-password | | Lincoln | NE | 1
carl | Carl | carl@example.com | carl-password | | Lincoln | NE | 1

== Club ==
name | school | president | vice_president | treasurer | secretary | members
Robotics | 1 | 1 | | | | 1 2

== Notification ==
competition | job_offer | users | clubs | date
| | | 1 | 2023-03-01
| | 3 | | 2023-03-02

== Post ==
title | text | date | notification
Robotics kickoff | Build season starts | 2023-03-01 | 1
Carl only | A note for Carl | 2023-03-02 | 2
";

pub struct TestApp {
    pub router: Router,
    pub directory: Directory,
    pub keys: Arc<SessionKeys>,
}

pub struct Seed {
    pub school: EntityId,
    pub robotics: EntityId,
    pub admin: EntityId,
    pub ana: EntityId,
    pub ben: EntityId,
    pub carl: EntityId,
}

pub fn spawn() -> TestApp {
    let directory = Directory::new(Arc::new(MemoryStore::new()));
    let keys = Arc::new(SessionKeys::from_secret(
        b"integration test secret",
        Duration::from_secs(60 * 60),
        Duration::from_secs(60 * 60),
    ));
    let settings = Settings {
        public_host: Url::parse("http://localhost:8080").unwrap(),
        search_limit_max: SEARCH_LIMIT_MAX,
    };
    let router = club_directory::app("static")
        .layer(Extension(directory.clone()))
        .layer(Extension(keys.clone()))
        .layer(Extension(Arc::new(settings)));
    TestApp {
        router,
        directory,
        keys,
    }
}

pub async fn seeded() -> (TestApp, Seed) {
    let app = spawn();
    let fixture = Fixture::parse(SEED).unwrap();
    let entities = fixture::load(&fixture, &app.directory).await.unwrap();
    let id_of = |name: &str| {
        entities
            .iter()
            .find(|e| e.name() == Some(name))
            .map(Entity::id)
            .unwrap()
    };
    let seed = Seed {
        school: id_of("Lincoln High"),
        robotics: id_of("Robotics"),
        admin: id_of("Admin"),
        ana: id_of("Ana"),
        ben: id_of("Ben"),
        carl: id_of("Carl"),
    };
    (app, seed)
}

impl TestApp {
    fn session(&self, viewer: Option<EntityId>) -> Option<String> {
        viewer.map(|id| format!("session={}", self.keys.session_token(id).unwrap()))
    }

    pub async fn send(&self, request: Request<Body>) -> Response {
        self.router.clone().oneshot(request).await.unwrap()
    }

    pub async fn get(&self, uri: &str, viewer: Option<EntityId>) -> Response {
        let mut request = Request::builder().uri(uri);
        if let Some(cookie) = self.session(viewer) {
            request = request.header(header::COOKIE, cookie);
        }
        self.send(request.body(Body::empty()).unwrap()).await
    }

    pub async fn post(&self, uri: &str, form: &[(&str, &str)], viewer: Option<EntityId>) -> Response {
        let body = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(form)
            .finish();
        let mut request = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
        if let Some(cookie) = self.session(viewer) {
            request = request.header(header::COOKIE, cookie);
        }
        self.send(request.body(Body::from(body)).unwrap()).await
    }
}

pub async fn json(response: Response) -> Value {
    let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

pub fn location(response: &Response) -> &str {
    response.headers()[header::LOCATION].to_str().unwrap()
}

/// The `name=value` part of the response's `Set-Cookie` header.
pub fn cookie(response: &Response) -> String {
    let value = response.headers()[header::SET_COOKIE].to_str().unwrap();
    value.split(';').next().unwrap().to_string()
}
