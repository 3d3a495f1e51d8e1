mod common;

use axum::http::StatusCode;
use club_directory::models::{Account, Club, Entity, EntityKind, Member, School, User};
use common::{cookie, json, location, seeded, spawn, SEARCH_LIMIT_MAX};
use serde_json::json;

fn registration<'a>(username: &'a str, email: &'a str, school: &'a str) -> Vec<(&'a str, &'a str)> {
    vec![
        ("account_type", "user"),
        ("username", username),
        ("name", "Dana"),
        ("email", email),
        ("password", "long-enough"),
        ("confirm_password", "long-enough"),
        ("city", "Lincoln"),
        ("state", "NE"),
        ("school_id", school),
    ]
}

#[tokio::test]
async fn club_page_names_its_president() {
    let app = spawn();
    let dir = &app.directory;

    let school = dir
        .create(|id| School {
            id,
            name: "Lincoln High".into(),
            city: "Lincoln".into(),
            state: "NE".into(),
        })
        .await
        .unwrap();
    let ana = dir
        .create(|id| Member {
            account: Account {
                id,
                username: "ana".into(),
                name: "Ana".into(),
                email: "ana@example.com".into(),
                password_hash: String::new(),
                city: "Lincoln".into(),
                state: "NE".into(),
                email_verified: false,
                major: None,
                notes: None,
                photo_url: None,
            },
            school_ids: vec![school.id],
            club_ids: vec![],
            resume: None,
        })
        .await
        .unwrap();
    let robotics = dir
        .create(|id| Club {
            id,
            name: "Robotics".into(),
            school_id: school.id,
            major: None,
            photo_url: None,
            president: Some(ana.account.id),
            vice_president: None,
            treasurer: None,
            secretary: None,
        })
        .await
        .unwrap();

    let response = app.get(&format!("/club/{}", robotics.id), None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json(response).await;
    assert_eq!(body["president"]["name"], "Ana");
    assert_eq!(body["school"]["name"], "Lincoln High");
    assert_eq!(body["vice_president"], serde_json::Value::Null);
}

#[tokio::test]
async fn registration_logs_the_new_account_in() {
    let (app, seed) = seeded().await;

    let page = json(app.get("/register", None).await).await;
    assert_eq!(page["schools"][0]["name"], "Lincoln High");
    assert!(page["account_types"]
        .as_array()
        .unwrap()
        .iter()
        .all(|t| t["code"] != "admn"));

    let school = seed.school.to_string();
    let response = app
        .post("/register", &registration("dana", "Dana@Example.com", &school), None)
        .await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    let target = location(&response).to_string();
    assert!(target.starts_with("/user/user"));
    let session = cookie(&response);
    assert!(session.starts_with("session="));

    let Some(Entity::Member(dana)) = app.directory.account_by_username("dana").await.unwrap() else {
        panic!("dana should be registered as a student");
    };
    assert_eq!(dana.account.email, "dana@example.com");
    assert_eq!(dana.school_ids, vec![seed.school]);
    assert_eq!(target, format!("/user/{}", dana.account.id));

    let profile = app.get(&target, Some(dana.account.id)).await;
    assert_eq!(profile.status(), StatusCode::OK);
    let profile = json(profile).await;
    assert_eq!(profile["username"], "dana");
    assert_eq!(profile["schools"][0]["name"], "Lincoln High");
}

#[tokio::test]
async fn duplicate_identities_conflict() {
    let (app, seed) = seeded().await;
    let school = seed.school.to_string();

    let response = app
        .post("/register", &registration("dana", "ANA@example.com", &school), None)
        .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(json(response).await["message"], "email has been taken");
    assert_eq!(app.directory.account_by_username("dana").await.unwrap(), None);

    let response = app
        .post("/register", &registration("ana", "someone@example.com", &school), None)
        .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(json(response).await["message"], "username has been taken");
    assert_eq!(
        app.directory
            .account_by_email("someone@example.com")
            .await
            .unwrap(),
        None
    );
}

#[tokio::test]
async fn invalid_registrations_list_their_fields() {
    let (app, _) = seeded().await;

    let response = app
        .post(
            "/register",
            &[
                ("account_type", "user"),
                ("username", "dana"),
                ("email", "not-an-email"),
                ("password", "short"),
                ("confirm_password", "other"),
            ],
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = json(response).await;
    for field in ["name", "email", "password", "confirm_password", "city", "state", "school_id"] {
        assert!(body["fields"].get(field).is_some(), "{field} should be rejected");
    }
    assert!(body["fields"].get("username").is_none());

    // administrators cannot be self-registered
    let mut form = registration("eve", "eve@example.com", "");
    form[0] = ("account_type", "admn");
    let response = app.post("/register", &form, None).await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert!(json(response).await["fields"].get("account_type").is_some());
}

#[tokio::test]
async fn companies_register_without_a_school() {
    let (app, _) = seeded().await;
    let mut form = registration("acme", "jobs@acme.example", "");
    form[0] = ("account_type", "cmpn");
    let response = app.post("/register", &form, None).await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    let acme = app.directory.account_by_username("acme").await.unwrap().unwrap();
    assert_eq!(acme.kind(), EntityKind::Company);
}

#[tokio::test]
async fn login_failures_look_the_same() {
    let (app, _) = seeded().await;

    let wrong_password = app
        .post("/login", &[("username", "ana"), ("password", "nope")], None)
        .await;
    let unknown_user = app
        .post("/login", &[("username", "nobody"), ("password", "nope")], None)
        .await;
    assert_eq!(wrong_password.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(unknown_user.status(), StatusCode::UNAUTHORIZED);
    let wrong_password = json(wrong_password).await;
    assert_eq!(wrong_password, json(unknown_user).await);
    assert_eq!(wrong_password["message"], "invalid username or password");
}

#[tokio::test]
async fn unreadable_stored_hashes_fail_like_wrong_passwords() {
    let app = spawn();
    app.directory
        .create(|id| User {
            account: Account {
                id,
                username: "legacy".into(),
                name: "Legacy".into(),
                email: "legacy@example.com".into(),
                password_hash: "not a phc string".into(),
                city: "Lincoln".into(),
                state: "NE".into(),
                email_verified: false,
                major: None,
                notes: None,
                photo_url: None,
            },
        })
        .await
        .unwrap();

    let response = app
        .post("/login", &[("username", "legacy"), ("password", "anything")], None)
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json(response).await["message"], "invalid username or password");
}

#[tokio::test]
async fn login_returns_to_came_from() {
    let (app, seed) = seeded().await;
    let came_from = format!("/club/{}", seed.robotics);

    let response = app
        .post(
            "/login",
            &[
                ("username", "ana"),
                ("password", "ana-password"),
                ("came_from", came_from.as_str()),
            ],
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), came_from);
    assert!(cookie(&response).starts_with("session="));

    let response = app
        .post(
            "/login",
            &[
                ("username", "ana"),
                ("password", "ana-password"),
                ("came_from", "https://elsewhere.example/"),
            ],
            None,
        )
        .await;
    assert_eq!(location(&response), "/");

    let page = json(app.get("/login?came_from=%2Fuser%2Fuser1", None).await).await;
    assert_eq!(page["came_from"], "/user/user1");
}

#[tokio::test]
async fn logout_clears_the_session() {
    let (app, seed) = seeded().await;
    let response = app.get("/logout", Some(seed.ana)).await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/");
    assert_eq!(cookie(&response), "session=");
}

#[tokio::test]
async fn profiles_are_private() {
    let (app, seed) = seeded().await;
    let uri = format!("/user/{}", seed.ana);

    let anonymous = app.get(&uri, None).await;
    assert_eq!(anonymous.status(), StatusCode::SEE_OTHER);
    assert_eq!(
        location(&anonymous),
        format!("/login?came_from=%2Fuser%2F{}", seed.ana)
    );

    let other = app.get(&uri, Some(seed.ben)).await;
    assert_eq!(other.status(), StatusCode::FORBIDDEN);

    let owner = app.get(&uri, Some(seed.ana)).await;
    assert_eq!(owner.status(), StatusCode::OK);
    let body = json(owner).await;
    assert_eq!(body["name"], "Ana");
    assert_eq!(body["clubs"], json!([{ "id": seed.robotics.to_string(), "name": "Robotics" }]));

    let admin = app.get(&uri, Some(seed.admin)).await;
    assert_eq!(admin.status(), StatusCode::OK);

    let missing = app.get("/user/user999", Some(seed.admin)).await;
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn home_shows_addressed_posts() {
    let (app, seed) = seeded().await;

    let anonymous = json(app.get("/", None).await).await;
    assert_eq!(anonymous["viewer"], serde_json::Value::Null);
    assert_eq!(anonymous["posts"], json!([]));

    let titles = |body: &serde_json::Value| -> Vec<String> {
        body["posts"]
            .as_array()
            .unwrap()
            .iter()
            .map(|p| p["title"].as_str().unwrap().to_string())
            .collect()
    };

    let ana = json(app.get("/", Some(seed.ana)).await).await;
    assert_eq!(ana["viewer"]["username"], "ana");
    assert_eq!(ana["clubs"][0]["name"], "Robotics");
    assert_eq!(titles(&ana), vec!["Robotics kickoff"]);

    let carl = json(app.get("/", Some(seed.carl)).await).await;
    assert_eq!(titles(&carl), vec!["Carl only"]);
}

#[tokio::test]
async fn search_is_ranked_and_limited() {
    let (app, _) = seeded().await;

    let body = json(app.get("/search/robotics?limit=1", None).await).await;
    assert_eq!(body["limit"], 1);
    assert_eq!(body["hits"].as_array().unwrap().len(), 1);

    let body = json(app.get("/search/robotics", None).await).await;
    assert_eq!(body["limit"], SEARCH_LIMIT_MAX);
    let hits = body["hits"].as_array().unwrap();
    assert_eq!(hits.len(), 2);
    let scores: Vec<f64> = hits.iter().map(|h| h["score"].as_f64().unwrap()).collect();
    assert!(scores[0] >= scores[1]);

    let body = json(app.get("/search/robotics?limit=1000", None).await).await;
    assert_eq!(body["limit"], SEARCH_LIMIT_MAX);

    let body = json(app.get("/search/robotics?skip=5", None).await).await;
    assert_eq!(body["hits"], json!([]));
}

#[tokio::test]
async fn only_administrators_create_users() {
    let (app, seed) = seeded().await;

    let anonymous = app.get("/create_user", None).await;
    assert_eq!(anonymous.status(), StatusCode::SEE_OTHER);
    let member = app.get("/create_user", Some(seed.ben)).await;
    assert_eq!(member.status(), StatusCode::FORBIDDEN);
    let page = json(app.get("/create_user", Some(seed.admin)).await).await;
    assert!(page["account_types"]
        .as_array()
        .unwrap()
        .iter()
        .any(|t| t["code"] == "admn"));

    let mut form = registration("root", "root@example.com", "");
    form[0] = ("account_type", "admn");
    let forbidden = app.post("/create_user", &form, Some(seed.ben)).await;
    assert_eq!(forbidden.status(), StatusCode::FORBIDDEN);

    let created = app.post("/create_user", &form, Some(seed.admin)).await;
    assert_eq!(created.status(), StatusCode::CREATED);
    let body = json(created).await;
    assert_eq!(body["kind"], "administrator");
    let root = app.directory.account_by_username("root").await.unwrap().unwrap();
    assert!(root.is_admin());
}

#[tokio::test]
async fn email_verification_round_trip() {
    let (app, seed) = seeded().await;

    let requested = app.get("/verify_email/ana@example.com", None).await;
    assert_eq!(requested.status(), StatusCode::ACCEPTED);
    let unknown = app.get("/verify_email/nobody@example.com", None).await;
    assert_eq!(unknown.status(), StatusCode::ACCEPTED);

    let rejected = app
        .get("/verify_email/ana@example.com/not-a-token", None)
        .await;
    assert_eq!(rejected.status(), StatusCode::UNAUTHORIZED);

    let other = app.keys.verification_token("ben@example.com").unwrap();
    let mismatched = app
        .get(&format!("/verify_email/ana@example.com/{other}"), None)
        .await;
    assert_eq!(mismatched.status(), StatusCode::UNAUTHORIZED);

    let token = app.keys.verification_token("ana@example.com").unwrap();
    let verified = app
        .post(&format!("/verify_email/ana@example.com/{token}"), &[], None)
        .await;
    assert_eq!(verified.status(), StatusCode::OK);
    assert_eq!(json(verified).await["verified"], true);

    let ana = app.directory.get_by_id(seed.ana).await.unwrap().unwrap();
    assert!(ana.account().unwrap().email_verified);
}

#[tokio::test]
async fn malformed_ids_are_bad_requests() {
    let (app, seed) = seeded().await;

    let response = app.get("/club/robotics", None).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let response = app.get("/club/zzzz1", None).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    // a padded spelling is not another name for the same record
    let padded = format!("/club/club{:04}", seed.robotics.seq());
    let response = app.get(&padded, None).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let wrong_kind = app.get(&format!("/club/{}", seed.school), None).await;
    assert_eq!(wrong_kind.status(), StatusCode::NOT_FOUND);
    let absent = app.get("/club/club999", None).await;
    assert_eq!(absent.status(), StatusCode::NOT_FOUND);

    let school = app.get(&format!("/school/{}", seed.school), None).await;
    assert_eq!(school.status(), StatusCode::OK);
    let school = json(school).await;
    assert_eq!(school["clubs"][0]["name"], "Robotics");
    assert_eq!(school["members"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn presidents_assign_officers() {
    let (app, seed) = seeded().await;
    let uri = format!("/club/{}/officers", seed.robotics);
    let ben = seed.ben.to_string();
    let carl = seed.carl.to_string();

    let denied = app
        .post(&uri, &[("role", "treasurer"), ("member_id", ben.as_str())], Some(seed.ben))
        .await;
    assert_eq!(denied.status(), StatusCode::FORBIDDEN);

    let outsider = app
        .post(&uri, &[("role", "treasurer"), ("member_id", carl.as_str())], Some(seed.ana))
        .await;
    assert_eq!(outsider.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let bad_role = app
        .post(&uri, &[("role", "mascot"), ("member_id", ben.as_str())], Some(seed.ana))
        .await;
    assert_eq!(bad_role.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let assigned = app
        .post(&uri, &[("role", "vice_president"), ("member_id", ben.as_str())], Some(seed.ana))
        .await;
    assert_eq!(assigned.status(), StatusCode::OK);
    let body = json(assigned).await;
    assert_eq!(body["president"]["name"], "Ana");
    assert_eq!(body["vice_president"]["name"], "Ben");

    let cleared = app
        .post(&uri, &[("role", "vice_president"), ("member_id", "")], Some(seed.admin))
        .await;
    assert_eq!(cleared.status(), StatusCode::OK);
    assert_eq!(json(cleared).await["vice_president"], serde_json::Value::Null);
}
