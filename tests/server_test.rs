//! End-to-end tests over the assembled router: beacons land on disk, the
//! admin gate holds, and the dashboard views reflect what was stored.

use std::path::Path;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, Response, StatusCode};
use axum::Router;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use footfall::config::{AdminConfig, AppConfig, GeoConfig};
use footfall::model;
use footfall::AppState;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

const ADMIN_PASSWORD: &str = "integration-secret";

fn test_config(dir: &TempDir) -> AppConfig {
    AppConfig {
        listen_addr: "127.0.0.1:0".parse().unwrap(),
        logs_dir: dir.path().join("logs"),
        media_dir: dir.path().join("media"),
        log_json: false,
        geo: GeoConfig {
            base_url: None,
            timeout: Duration::from_secs(1),
            local_db: None,
        },
        admin: AdminConfig {
            username: "admin".to_string(),
            password: ADMIN_PASSWORD.to_string(),
            token_secret: "integration-test-signing-secret".to_string(),
            session_ttl: Duration::from_secs(3600),
        },
    }
}

fn test_app(dir: &TempDir) -> Router {
    let state = AppState::from_config(&test_config(dir)).unwrap();
    footfall::router(state)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn get_as(uri: &str, cookie: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(header::COOKIE, cookie)
        .body(Body::empty())
        .unwrap()
}

fn post_json(uri: &str, ip: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-forwarded-for", ip)
        .body(Body::from(serde_json::to_vec(body).unwrap()))
        .unwrap()
}

fn post_video(ip: &str, field_name: &str, content_type: &str, data: &str) -> Request<Body> {
    let boundary = "AaB03xFootfall";
    let body = format!(
        "--{boundary}\r\n\
         Content-Disposition: form-data; name=\"{field_name}\"; filename=\"clip\"\r\n\
         Content-Type: {content_type}\r\n\r\n\
         {data}\r\n\
         --{boundary}--\r\n"
    );
    Request::builder()
        .method("POST")
        .uri("/user-video")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={boundary}"),
        )
        .header("x-forwarded-for", ip)
        .body(Body::from(body))
        .unwrap()
}

async fn body_json(response: Response<Body>) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// Logs in and returns the `admin_token=...` cookie pair.
async fn admin_cookie(app: &Router) -> String {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/adminofthisapp/login")
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Body::from(format!(
                    "username=admin&password={ADMIN_PASSWORD}"
                )))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);

    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .find(|value| value.starts_with("admin_token="))
        .expect("login response carries the admin cookie")
        .split(';')
        .next()
        .unwrap()
        .to_string()
}

fn file_names(dir: &Path) -> Vec<String> {
    match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .flatten()
            .filter_map(|entry| entry.file_name().into_string().ok())
            .collect(),
        Err(_) => Vec::new(),
    }
}

#[tokio::test]
async fn first_contact_mints_a_session_cookie() {
    let dir = TempDir::new().unwrap();
    let app = test_app(&dir);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/")
                .header("x-forwarded-for", "9.9.9.9")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let set_cookie = response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .find(|value| value.starts_with("session_id="))
        .expect("first contact sets the session cookie")
        .to_string();
    assert!(set_cookie.contains("HttpOnly"));

    let session_pair = set_cookie.split(';').next().unwrap().to_string();
    let session_value = session_pair.strip_prefix("session_id=").unwrap();

    // The visit record carries the freshly minted id.
    let users_dir = dir.path().join("logs").join("users");
    let names = file_names(&users_dir);
    assert_eq!(names.len(), 1);
    assert!(names[0].starts_with("9-9-9-9-"));

    let record: Value =
        serde_json::from_slice(&std::fs::read(users_dir.join(&names[0])).unwrap()).unwrap();
    assert_eq!(record["sessionId"], session_value);

    // A returning visitor is not issued a second cookie.
    let response = app
        .clone()
        .oneshot(get_as("/", &session_pair))
        .await
        .unwrap();
    let reissued = response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .any(|value| value.starts_with("session_id="));
    assert!(!reissued);
}

#[tokio::test]
async fn tracking_beacon_persists_payload_and_index_row() {
    let dir = TempDir::new().unwrap();
    let app = test_app(&dir);

    let response = app
        .clone()
        .oneshot(post_json(
            "/tracking-data",
            "1.2.3.4",
            &json!({ "screenInfo": { "width": 1920, "height": 1080 } }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "success");

    let client_dir = dir.path().join("logs").join("client_data").join("1-2-3-4");
    let names = file_names(&client_dir);
    assert_eq!(names.len(), 1);
    assert!(names[0].ends_with("-client.json"));

    let stored: Value =
        serde_json::from_slice(&std::fs::read(client_dir.join(&names[0])).unwrap()).unwrap();
    assert_eq!(stored["screenInfo"]["width"], 1920);
    assert_eq!(stored["serverData"]["ipAddress"], "1.2.3.4");

    let index: Vec<Value> = serde_json::from_slice(
        &std::fs::read(dir.path().join("logs").join("combined_client_data.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(index.len(), 1);
    assert_eq!(index[0]["ipAddress"], "1.2.3.4");
    assert_eq!(index[0]["dataFile"], names[0].as_str());
}

#[tokio::test]
async fn image_beacon_stores_bytes_and_one_index_entry() {
    let dir = TempDir::new().unwrap();
    let app = test_app(&dir);

    let jpeg = b"\xff\xd8\xff\xe0fake-jpeg";
    let data_url = format!("data:image/jpeg;base64,{}", BASE64.encode(jpeg));
    let response = app
        .clone()
        .oneshot(post_json(
            "/user-image",
            "1.2.3.4",
            &json!({ "image": data_url }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "success");

    let images_dir = dir
        .path()
        .join("media")
        .join(model::today_bucket())
        .join("1-2-3-4")
        .join("images");
    let names = file_names(&images_dir);
    assert_eq!(names.len(), 1);
    assert_eq!(
        std::fs::read(images_dir.join(&names[0])).unwrap(),
        jpeg.to_vec()
    );

    let index: Vec<Value> = serde_json::from_slice(
        &std::fs::read(
            dir.path()
                .join("media")
                .join("index")
                .join("media_index.json"),
        )
        .unwrap(),
    )
    .unwrap();
    assert_eq!(index.len(), 1);
    assert_eq!(index[0]["mediaType"], "image");
    assert_eq!(index[0]["sanitizedIp"], "1-2-3-4");
    assert_eq!(index[0]["fileName"], names[0].as_str());

    // The stored index fields resolve back to the bytes through the media
    // view, once authenticated.
    let view_path = format!(
        "/adminofthisapp/media/view/{}/{}/{}/{}",
        index[0]["dateFolder"].as_str().unwrap(),
        index[0]["sanitizedIp"].as_str().unwrap(),
        index[0]["mediaType"].as_str().unwrap(),
        index[0]["fileName"].as_str().unwrap(),
    );

    let anonymous = app.clone().oneshot(get(&view_path)).await.unwrap();
    assert_eq!(anonymous.status(), StatusCode::SEE_OTHER);

    let cookie = admin_cookie(&app).await;
    let response = app.clone().oneshot(get_as(&view_path, &cookie)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "image/jpeg"
    );
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(bytes.as_ref(), jpeg);
}

#[tokio::test]
async fn video_upload_requires_the_video_field() {
    let dir = TempDir::new().unwrap();
    let app = test_app(&dir);

    let response = app
        .clone()
        .oneshot(post_video("1.2.3.4", "attachment", "video/webm", "nope"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["status"], "error");
    assert_eq!(body["message"], "No video file received");

    let response = app
        .clone()
        .oneshot(post_video("1.2.3.4", "video", "video/webm", "webm-bytes"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "success");

    let videos_dir = dir
        .path()
        .join("media")
        .join(model::today_bucket())
        .join("1-2-3-4")
        .join("videos");
    let names = file_names(&videos_dir);
    assert_eq!(names.len(), 1);
    assert!(names[0].starts_with("video-"));
    assert!(names[0].ends_with(".webm"));
}

#[tokio::test]
async fn activity_posts_write_one_file_each_and_sum_on_the_dashboard() {
    let dir = TempDir::new().unwrap();
    let app = test_app(&dir);

    let clicks = [3u64, 4u64];
    for count in clicks {
        let response = app
            .clone()
            .oneshot(post_json(
                "/activity-update",
                "1.2.3.4",
                &json!({
                    "timestamp": model::now_iso(),
                    "activity": { "mouse": { "moves": 10, "clicks": count } },
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        // Filenames carry millisecond stamps; keep the two posts apart.
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let activity_dir = dir
        .path()
        .join("logs")
        .join("activity_data")
        .join("1-2-3-4");
    assert_eq!(file_names(&activity_dir).len(), 2);

    let cookie = admin_cookie(&app).await;
    let response = app
        .clone()
        .oneshot(get_as("/adminofthisapp/user/1-2-3-4", &cookie))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let profile = body_json(response).await;
    assert_eq!(profile["activity"]["mouseClicks"], 7);
    assert_eq!(profile["ipAddress"], "1.2.3.4");
    // Each beacon also left a visit record.
    assert_eq!(profile["visits"], 2);
}

#[tokio::test]
async fn admin_routes_demand_a_valid_token() {
    let dir = TempDir::new().unwrap();
    let app = test_app(&dir);

    let response = app.clone().oneshot(get("/adminofthisapp")).await.unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(
        response.headers().get(header::LOCATION).unwrap(),
        "/adminofthisapp/login"
    );

    // Garbage tokens bounce the same way.
    let response = app
        .clone()
        .oneshot(get_as("/adminofthisapp", "admin_token=not-a-jwt"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);

    // Wrong credentials bounce back to the form with a hint.
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/adminofthisapp/login")
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Body::from("username=admin&password=wrong"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(
        response.headers().get(header::LOCATION).unwrap(),
        "/adminofthisapp/login?error=1"
    );

    let cookie = admin_cookie(&app).await;
    let response = app
        .clone()
        .oneshot(get_as("/adminofthisapp", &cookie))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_json(response).await.is_object());
}

#[tokio::test]
async fn profile_download_arrives_as_an_attachment() {
    let dir = TempDir::new().unwrap();
    let app = test_app(&dir);

    app.clone()
        .oneshot(post_json("/tracking-data", "1.2.3.4", &json!({})))
        .await
        .unwrap();

    let cookie = admin_cookie(&app).await;
    let response = app
        .clone()
        .oneshot(get_as("/adminofthisapp/user/1-2-3-4/download", &cookie))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get(header::CONTENT_DISPOSITION)
            .unwrap(),
        "attachment; filename=\"user-1-2-3-4-data.json\""
    );
    assert_eq!(body_json(response).await["sanitizedIp"], "1-2-3-4");

    // Unknown visitors 404.
    let response = app
        .clone()
        .oneshot(get_as("/adminofthisapp/user/8-8-8-8/download", &cookie))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn overview_views_reflect_stored_records() {
    let dir = TempDir::new().unwrap();
    let app = test_app(&dir);

    app.clone()
        .oneshot(post_json(
            "/activity-update",
            "1.2.3.4",
            &json!({ "activity": { "mouse": { "clicks": 5 }, "keyboard": { "keystrokes": 9 } } }),
        ))
        .await
        .unwrap();
    let jpeg = BASE64.encode(b"img");
    app.clone()
        .oneshot(post_json(
            "/user-image",
            "1.2.3.4",
            &json!({ "image": format!("data:image/jpeg;base64,{jpeg}") }),
        ))
        .await
        .unwrap();

    let cookie = admin_cookie(&app).await;

    let activity = body_json(
        app.clone()
            .oneshot(get_as("/adminofthisapp/activity", &cookie))
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(activity["stats"]["totalClicks"], 5);
    assert_eq!(activity["stats"]["totalKeystrokes"], 9);
    assert_eq!(activity["topUsers"][0]["sanitizedIp"], "1-2-3-4");
    assert_eq!(activity["activityByHour"].as_array().unwrap().len(), 24);

    let media = body_json(
        app.clone()
            .oneshot(get_as("/adminofthisapp/media", &cookie))
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(media["stats"]["totalImages"], 1);
    assert_eq!(media["stats"]["mediaByUser"][0]["ip"], "1.2.3.4");

    let devices = body_json(
        app.clone()
            .oneshot(get_as("/adminofthisapp/devices", &cookie))
            .await
            .unwrap(),
    )
    .await;
    assert!(devices["browsers"].is_array());
    // Every visitor lands in exactly one device bucket. The count includes
    // the admin login itself, which arrives without a forwarded address.
    let split = devices["devices"]["mobile"].as_u64().unwrap()
        + devices["devices"]["tablet"].as_u64().unwrap()
        + devices["devices"]["desktop"].as_u64().unwrap();
    assert_eq!(split, devices["hardware"].as_array().unwrap().len() as u64);
    assert!(devices["hardware"]
        .as_array()
        .unwrap()
        .iter()
        .any(|row| row["sanitizedIp"] == "1-2-3-4"));
}

#[tokio::test]
async fn probes_bypass_visit_logging() {
    let dir = TempDir::new().unwrap();
    let app = test_app(&dir);

    let response = app.clone().oneshot(get("/healthz")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "healthy");

    let response = app.clone().oneshot(get("/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Neither probe left a visit record.
    assert!(file_names(&dir.path().join("logs").join("users")).is_empty());

    app.clone()
        .oneshot(post_json("/tracking-data", "1.2.3.4", &json!({})))
        .await
        .unwrap();

    let response = app.clone().oneshot(get("/metrics")).await.unwrap();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("footfall_tracking_beacons_total 1"));
    assert!(text.contains("footfall_visits_logged_total 1"));
}
