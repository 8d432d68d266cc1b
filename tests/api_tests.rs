//! End-to-end tests for the write and read endpoints.

mod common;

use axum::{
    body::Body,
    http::{Request, StatusCode, header},
};
use common::{
    TestServer,
    server::{body_json, body_string, id_from_confirmation},
};

#[tokio::test]
async fn put_then_get_returns_the_file() {
    let server = TestServer::new().await;

    let response = server.put("report.txt", "hello").await;
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(response.headers()[header::LOCATION], "/report.txt");
    assert_eq!(response.headers()["expiry"], "-1");
    assert_eq!(body_string(response).await, "/report.txt");

    let response = server.get("/report.txt").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_LENGTH], "5");
    assert_eq!(body_string(response).await, "hello");
}

#[tokio::test]
async fn confirmation_is_an_absolute_url_when_the_host_is_known() {
    let server = TestServer::new().await;

    let response = server
        .send(
            Request::put("/notes.md")
                .header(header::HOST, "drop.test:8080")
                .body(Body::from("# notes"))
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(body_string(response).await, "http://drop.test:8080/notes.md");

    let server = TestServer::with_config(|cfg| {
        cfg.public_url = Some("https://drop.example/".into());
    })
    .await;
    let response = server.put("notes.md", "# notes").await;
    assert_eq!(body_string(response).await, "https://drop.example/notes.md");
}

#[tokio::test]
async fn content_type_is_kept_for_files() {
    let server = TestServer::new().await;

    let response = server
        .send(
            Request::put("/data.json")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from("{}"))
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = server.get("/data.json").await;
    assert_eq!(response.headers()[header::CONTENT_TYPE], "application/json");

    server.put("blob.bin", "\u{1}\u{2}").await;
    let response = server.get("/blob.bin").await;
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "application/octet-stream"
    );
}

#[tokio::test]
async fn overwrite_serves_the_latest_upload() {
    let server = TestServer::new().await;

    server.put("report.txt", "first").await;
    let response = server.put("report.txt", "second").await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = server.get("/report.txt").await;
    assert_eq!(body_string(response).await, "second");
    assert_eq!(server.blob_count(), 1);
}

#[tokio::test]
async fn empty_file_is_stored() {
    let server = TestServer::new().await;

    let response = server.put("empty", Body::empty()).await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = server.get("/empty").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "");
}

#[tokio::test]
async fn percent_encoded_names_round_trip() {
    let server = TestServer::new().await;

    let response = server.put("my%20file.txt", "spaced").await;
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(body_string(response).await, "/my%20file.txt");

    let response = server.get("/my%20file.txt").await;
    assert_eq!(body_string(response).await, "spaced");
}

#[tokio::test]
async fn paste_round_trip() {
    let server = TestServer::new().await;

    let response = server.post("/paste", "some text").await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let id = id_from_confirmation(&body_string(response).await);
    assert_eq!(id.len(), 8);

    let response = server.get(&format!("/{}", id)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "text/plain; charset=utf-8"
    );
    assert_eq!(body_string(response).await, "some text");
}

#[tokio::test]
async fn slug_length_header_widens_codes() {
    let server = TestServer::new().await;

    let response = server
        .send(
            Request::post("/paste")
                .header("slug-length", "16")
                .body(Body::from("longer code"))
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let id = id_from_confirmation(&body_string(response).await);
    assert_eq!(id.len(), 16);
}

#[tokio::test]
async fn empty_paste_is_rejected() {
    let server = TestServer::new().await;

    let response = server.post("/paste", Body::empty()).await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = body_json(response).await;
    assert!(body["message"].as_str().is_some_and(|m| !m.is_empty()));
    assert_eq!(server.blob_count(), 0);
}

#[tokio::test]
async fn binary_paste_is_rejected() {
    let server = TestServer::new().await;

    let response = server.post("/paste", vec![0xff_u8, 0xfe, 0x00]).await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body_json(response).await["message"].is_string());
}

#[tokio::test]
async fn url_redirects_to_its_target() {
    let server = TestServer::new().await;

    let response = server.post("/url", "https://example.com").await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let id = id_from_confirmation(&body_string(response).await);

    let response = server.get(&format!("/{}", id)).await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(response.headers()[header::LOCATION], "https://example.com");
}

#[tokio::test]
async fn invalid_url_is_rejected() {
    let server = TestServer::new().await;

    for body in ["", "not a url", "javascript:alert(1)"] {
        let response = server.post("/url", body).await;
        assert_eq!(
            response.status(),
            StatusCode::UNPROCESSABLE_ENTITY,
            "{body:?}"
        );
        assert!(body_json(response).await["message"].is_string());
    }
}

#[tokio::test]
async fn unknown_id_is_not_found() {
    let server = TestServer::new().await;

    let response = server.get("/nope").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert!(body["message"].as_str().unwrap().contains("nope"));
}

#[tokio::test]
async fn unroutable_paths_answer_with_a_message() {
    let server = TestServer::new().await;

    let response = server.get("/a/b").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(body_json(response).await["message"].is_string());

    let response = server.get("/paste").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(body_json(response).await["message"].is_string());
}

#[tokio::test]
async fn reserved_and_unsafe_names_are_rejected() {
    let server = TestServer::new().await;

    for name in ["paste", "url", "healthz"] {
        let response = server.put(name, "x").await;
        assert_eq!(
            response.status(),
            StatusCode::UNPROCESSABLE_ENTITY,
            "{name}"
        );
        assert!(body_json(response).await["message"].is_string());
    }

    for name in ["a%2Fb", "..", "a%5Cb", "x%00y"] {
        let response = server.put(name, "x").await;
        assert_eq!(
            response.status(),
            StatusCode::UNPROCESSABLE_ENTITY,
            "{name}"
        );
    }
    assert_eq!(server.blob_count(), 0);
}

#[tokio::test]
async fn file_cannot_take_a_generated_id() {
    let server = TestServer::new().await;

    let id = server.paste("mine").await;
    let response = server.put(&id, "theirs").await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert!(body_json(response).await["message"].is_string());

    let response = server.get(&format!("/{}", id)).await;
    assert_eq!(body_string(response).await, "mine");
}

#[tokio::test]
async fn max_access_limits_reads() {
    let server = TestServer::new().await;

    let response = server
        .send(
            Request::put("/secret.txt")
                .header("max-access", "1")
                .body(Body::from("burn after reading"))
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = server.get("/secret.txt").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "burn after reading");

    let response = server.get("/secret.txt").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(server.blob_count(), 0);
}

#[tokio::test]
async fn head_does_not_use_up_limited_reads() {
    let server = TestServer::new().await;

    let response = server
        .send(
            Request::put("/once.txt")
                .header("max-access", "1")
                .body(Body::from("read me once"))
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    for _ in 0..2 {
        let response = server
            .send(Request::head("/once.txt").body(Body::empty()).unwrap())
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_LENGTH], "12");
        assert!(body_string(response).await.is_empty());
    }

    let response = server.get("/once.txt").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "read me once");

    let response = server
        .send(Request::head("/once.txt").body(Body::empty()).unwrap())
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn head_on_a_redirect_carries_the_location() {
    let server = TestServer::new().await;

    let response = server.post("/url", "https://example.com/docs").await;
    let id = id_from_confirmation(&body_string(response).await);

    let response = server
        .send(
            Request::head(format!("/{}", id))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(
        response.headers()[header::LOCATION],
        "https://example.com/docs"
    );
}

#[tokio::test]
async fn non_ascii_targets_are_redirected_with_an_ascii_location() {
    let server = TestServer::new().await;

    let response = server.post("/url", "https://例え.jp/ページ").await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let id = id_from_confirmation(&body_string(response).await);

    let response = server.get(&format!("/{}", id)).await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(
        response.headers()[header::LOCATION],
        "https://xn--r8jz45g.jp/%E3%83%9A%E3%83%BC%E3%82%B8"
    );
}

#[tokio::test]
async fn expire_in_sets_the_expiry_header() {
    let server = TestServer::new().await;
    let before = chrono::Utc::now().timestamp();

    let response = server
        .send(
            Request::post("/paste")
                .header("expire-in", "60")
                .body(Body::from("short lived"))
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let expiry: i64 = response.headers()["expiry"]
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!(expiry >= before + 60 && expiry <= before + 62);
}

#[tokio::test]
async fn malformed_settings_are_bad_requests() {
    let server = TestServer::new().await;

    for (name, value) in [
        ("max-access", "many"),
        ("max-access", "0"),
        ("expiry-timestamp", "1000"),
        ("expire-in", "0"),
        ("expire-in", "18446744073709551615"),
    ] {
        let response = server
            .send(
                Request::post("/paste")
                    .header(name, value)
                    .body(Body::from("text"))
                    .unwrap(),
            )
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{name}: {value}");
        assert!(body_json(response).await["message"].is_string());
    }
    assert_eq!(server.blob_count(), 0);
}

#[tokio::test]
async fn retention_curve_bounds_file_lifetime() {
    let server = TestServer::with_config(|cfg| {
        cfg.file_min_age = Some(60);
        cfg.file_max_age = Some(3600);
    })
    .await;
    let before = chrono::Utc::now().timestamp();

    let response = server.put("sized.bin", "tiny").await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let expiry: i64 = response.headers()["expiry"]
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!(expiry > before && expiry <= before + 3601);
}

#[tokio::test]
async fn healthz_and_readyz_pass() {
    let server = TestServer::new().await;

    let response = server.get("/healthz").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "ok");

    let response = server.get("/readyz").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["checks"]["sqlite"]["ok"], true);
    assert_eq!(body["checks"]["disk"]["ok"], true);
}
