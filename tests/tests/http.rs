
use anyhow::Result;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use common::*;
use http_body_util::BodyExt;
use mediafabric_proto::ApiVersion;
use mediafabric_server::{query, registration, QueryState};
use serde_json::{json, Value};
use tower::ServiceExt;

fn apps(fabric: &Fabric) -> (Router, Router) {
    let registration_app = registration::router(fabric.registry.clone());
    let query_app = query::router(QueryState {
        query: fabric.query.clone(),
        subscriptions: fabric.subscriptions.clone(),
    });
    (registration_app, query_app)
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.expect("body should collect").to_bytes();
    serde_json::from_slice(&bytes).expect("body should be JSON")
}

fn post_json(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> { Request::builder().uri(uri).body(Body::empty()).unwrap() }

#[tokio::test]
async fn resource_post_round_trips_through_the_query_api() -> Result<()> {
    let fabric = fabric();
    let (registration_app, query_app) = apps(&fabric);

    let response = registration_app
        .clone()
        .oneshot(post_json(
            "/x-nmos/registration/v1.0/resource",
            &node_body("3B8BE755-08FF-452B-B217-C9151EB21193", "n"),
        ))
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(
        response.headers().get(header::LOCATION).and_then(|v| v.to_str().ok()),
        Some(format!("/x-nmos/registration/v1.0/resource/nodes/{NODE_ID}/").as_str())
    );
    let echoed = body_json(response).await;
    assert_eq!(echoed["id"], NODE_ID);
    assert!(echoed.as_object().unwrap().keys().all(|k| !k.starts_with("@_")));

    let response = query_app
        .clone()
        .oneshot(get(&format!("/x-nmos/query/v1.0/nodes/{NODE_ID}")))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let fetched = body_json(response).await;
    assert_eq!(fetched["id"], NODE_ID);
    assert_eq!(fetched["label"], "n");

    // Same resource again: an update, not a creation.
    let response = registration_app
        .oneshot(post_json("/x-nmos/registration/v1.0/resource", &node_body(NODE_ID, "renamed")))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn input_errors_surface_as_400_with_a_message() -> Result<()> {
    let fabric = fabric();
    let (registration_app, _) = apps(&fabric);

    let response = registration_app
        .clone()
        .oneshot(post_json(
            "/x-nmos/registration/v1.0/resource",
            &flow_body(FLOW_ID, SOURCE_ID, None),
        ))
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["code"], 400);
    assert_eq!(body["error"], format!("Source {SOURCE_ID} does not exist"));
    assert!(body["debug"].is_null());

    let response = registration_app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/x-nmos/registration/v1.0/resource")
                .body(Body::from("not json"))
                .unwrap(),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn unknown_versions_and_kinds_are_404() -> Result<()> {
    let fabric = fabric();
    let (registration_app, query_app) = apps(&fabric);

    let response = query_app.clone().oneshot(get("/x-nmos/query/v9.9/nodes")).await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = query_app.oneshot(get("/x-nmos/query/v1.0/widgets")).await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = registration_app
        .oneshot(get(&format!("/x-nmos/registration/v1.0/resource/nodes/{NODE_ID}")))
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn heartbeat_renews_with_no_content() -> Result<()> {
    let fabric = fabric();
    let (registration_app, _) = apps(&fabric);

    let response = registration_app
        .clone()
        .oneshot(post_json("/x-nmos/registration/v1.0/resource", &node_body(NODE_ID, "n")))
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = registration_app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/x-nmos/registration/v1.0/health/nodes/{NODE_ID}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let bytes = response.into_body().collect().await?.to_bytes();
    assert!(bytes.is_empty());

    // The renewed value is readable on the GET side.
    let response = registration_app
        .clone()
        .oneshot(get(&format!("/x-nmos/registration/v1.0/health/nodes/{NODE_ID}")))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_json(response).await.get("health").is_some());

    let response = registration_app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/x-nmos/registration/v1.0/health/nodes/90461aaa-a45a-48f0-ba2e-de51b45ce4ce")
                .body(Body::empty())
                .unwrap(),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn query_filters_and_downgrade_pass_through_the_url() -> Result<()> {
    let fabric = fabric();
    fabric.register(ApiVersion::V1_0, &node_body(NODE_ID, "studio-a")).await;
    fabric.register(ApiVersion::V1_0, &node_body("90461aaa-a45a-48f0-ba2e-de51b45ce4ce", "studio-b")).await;
    let (_, query_app) = apps(&fabric);

    let response = query_app.clone().oneshot(get("/x-nmos/query/v1.0/nodes?label=studio-a")).await?;
    let listed = body_json(response).await;
    assert_eq!(listed.as_array().unwrap().len(), 1);
    assert_eq!(listed[0]["id"], NODE_ID);

    // v1.2 readers need the downgrade opt-in to see v1.0 registrations.
    let response = query_app.clone().oneshot(get("/x-nmos/query/v1.2/nodes")).await?;
    assert_eq!(body_json(response).await, json!([]));
    let response = query_app.oneshot(get("/x-nmos/query/v1.2/nodes?query.downgrade=v1.0")).await?;
    assert_eq!(body_json(response).await.as_array().unwrap().len(), 2);
    Ok(())
}

#[tokio::test]
async fn subscription_collection_lifecycle() -> Result<()> {
    let fabric = fabric();
    let (_, query_app) = apps(&fabric);

    let spec = json!({"resource_path": "/nodes", "params": {"label": "x"}, "persist": false});
    let response = query_app.clone().oneshot(post_json("/x-nmos/query/v1.0/subscriptions", &spec)).await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = body_json(response).await;
    let id = created["id"].as_str().unwrap().to_string();
    assert_eq!(created["resource_path"], "/nodes");
    assert!(created["ws_href"].as_str().unwrap().contains(&format!("uid={id}")));

    // The identical descriptor is shared, not duplicated.
    let response = query_app.clone().oneshot(post_json("/x-nmos/query/v1.0/subscriptions", &spec)).await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["id"], id.as_str());

    let response = query_app.clone().oneshot(get(&format!("/x-nmos/query/v1.0/subscriptions/{id}"))).await?;
    assert_eq!(response.status(), StatusCode::OK);

    // Non-persistent deletion is forbidden.
    let response = query_app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/x-nmos/query/v1.0/subscriptions/{id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = query_app.oneshot(get("/x-nmos/query/v1.0/subscriptions")).await?;
    assert_eq!(body_json(response).await.as_array().unwrap().len(), 1);
    Ok(())
}
