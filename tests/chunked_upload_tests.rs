use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{Value, json};
use tower::util::ServiceExt;

mod common;
use common::{session_token, setup_test_app};

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn initiate_upload_requires_guild_membership() {
    let app = setup_test_app().await;
    let token = session_token(&app, "u1", false, false, &["other-guild"]);

    let response = app
        .router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/uploads/initiate")
                .header("Content-Type", "application/json")
                .header("Authorization", format!("Bearer {token}"))
                .body(Body::from(
                    serde_json::to_vec(&json!({
                        "file_name": "sunset.jpg",
                        "file_type": "image/jpeg",
                        "gallery_name": "Summer Trip",
                        "guild_id": "g1",
                        "total_size": 9
                    }))
                    .unwrap(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn initiate_upload_rejects_zero_size() {
    let app = setup_test_app().await;
    let token = session_token(&app, "u1", false, false, &["g1"]);

    let response = app
        .router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/uploads/initiate")
                .header("Content-Type", "application/json")
                .header("Authorization", format!("Bearer {token}"))
                .body(Body::from(
                    serde_json::to_vec(&json!({
                        "file_name": "sunset.jpg",
                        "file_type": "image/jpeg",
                        "gallery_name": "Summer Trip",
                        "guild_id": "g1",
                        "total_size": 0
                    }))
                    .unwrap(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn full_chunked_upload_round_trip() {
    let app = setup_test_app().await;
    let token = session_token(&app, "u1", false, false, &["g1"]);
    let data = b"abcdefghi".to_vec();

    let init_response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/uploads/initiate")
                .header("Content-Type", "application/json")
                .header("Authorization", format!("Bearer {token}"))
                .body(Body::from(
                    serde_json::to_vec(&json!({
                        "file_name": "sunset.jpg",
                        "file_type": "image/jpeg",
                        "gallery_name": "Summer Trip",
                        "guild_id": "g1",
                        "total_size": data.len()
                    }))
                    .unwrap(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(init_response.status(), StatusCode::CREATED);
    let init_body = body_json(init_response).await;
    let upload_id = init_body["upload_id"].as_str().unwrap().to_string();

    for (index, chunk) in data.chunks(3).enumerate() {
        let response = app
            .router
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/api/uploads/chunk?upload_id={upload_id}&index={index}"))
                    .header("Content-Type", "application/octet-stream")
                    .body(Body::from(chunk.to_vec()))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    let progress_response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri(format!("/api/uploads/{upload_id}/progress"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(progress_response.status(), StatusCode::OK);
    let progress = body_json(progress_response).await;
    assert_eq!(progress["status"], "uploading");

    let finalize_response = app
        .router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/uploads/finalize")
                .header("Content-Type", "application/json")
                .body(Body::from(serde_json::to_vec(&json!({ "upload_id": upload_id })).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();

    let status = finalize_response.status();
    let finalize_body = body_json(finalize_response).await;
    assert_eq!(status, StatusCode::OK, "finalize failed: {finalize_body:?}");
    assert_eq!(finalize_body["success"], true);
    assert!(finalize_body["file_path"].as_str().unwrap().starts_with("summer-trip/uploads/"));
    assert!(finalize_body["file_path"].as_str().unwrap().ends_with("/sunset.jpg"));
}

#[tokio::test]
async fn chunk_exceeding_max_chunk_size_is_rejected() {
    let app = setup_test_app().await;
    let token = session_token(&app, "u1", false, false, &["g1"]);

    let init_response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/uploads/initiate")
                .header("Content-Type", "application/json")
                .header("Authorization", format!("Bearer {token}"))
                .body(Body::from(
                    serde_json::to_vec(&json!({
                        "file_name": "big.jpg",
                        "file_type": "image/jpeg",
                        "gallery_name": "Summer Trip",
                        "guild_id": "g1",
                        "total_size": app.state.config.server.max_chunk_size + 1
                    }))
                    .unwrap(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();

    let init_body = body_json(init_response).await;
    let upload_id = init_body["upload_id"].as_str().unwrap().to_string();

    let oversized = vec![0u8; (app.state.config.server.max_chunk_size + 1) as usize];
    let response = app
        .router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/api/uploads/chunk?upload_id={upload_id}&index=0"))
                .header("Content-Type", "application/octet-stream")
                .body(Body::from(oversized))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn cancel_upload_removes_session() {
    let app = setup_test_app().await;
    let token = session_token(&app, "u1", false, false, &["g1"]);

    let init_response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/uploads/initiate")
                .header("Content-Type", "application/json")
                .header("Authorization", format!("Bearer {token}"))
                .body(Body::from(
                    serde_json::to_vec(&json!({
                        "file_name": "sunset.jpg",
                        "file_type": "image/jpeg",
                        "gallery_name": "Summer Trip",
                        "guild_id": "g1",
                        "total_size": 9
                    }))
                    .unwrap(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    let init_body = body_json(init_response).await;
    let upload_id = init_body["upload_id"].as_str().unwrap().to_string();

    let cancel_response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/api/uploads/{upload_id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(cancel_response.status(), StatusCode::OK);

    let progress_response = app
        .router
        .oneshot(
            Request::builder()
                .method("GET")
                .uri(format!("/api/uploads/{upload_id}/progress"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(progress_response.status(), StatusCode::NOT_FOUND);
}
