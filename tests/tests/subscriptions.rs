
use std::time::Duration;

use anyhow::Result;
use common::*;
use mediafabric_core::error::QueryError;
use mediafabric_core::watch::{WatchConfig, WatchMessage};
use mediafabric_proto::ApiVersion;
use serde_json::json;

/// Run the real pipeline: change feed long-polling the substrate, a
/// dispatcher task fanning into the manager.
fn start_pipeline(fabric: &Fabric) -> ChangeFeed {
    let (feed, mut events) = ChangeFeed::spawn(fabric.substrate.clone(), WatchConfig::default());
    let subscriptions = fabric.subscriptions.clone();
    tokio::spawn(async move {
        while let Some(message) = events.recv().await {
            subscriptions.dispatch(message);
        }
    });
    feed
}

/// Give the dispatcher a moment to drain already-queued events, so a
/// socket attached afterwards sees only its sync grain first.
async fn settle() { tokio::time::sleep(Duration::from_millis(200)).await }

fn spec(resource_path: &str, filter: &[(&str, &str)], persist: bool) -> SubscriptionSpec {
    SubscriptionSpec {
        resource_path: resource_path.to_string(),
        params: params(filter),
        max_update_rate_ms: 100,
        persist,
    }
}

#[tokio::test]
async fn filtered_transitions_reach_the_socket_in_order() -> Result<()> {
    let fabric = fabric();
    let _feed = start_pipeline(&fabric);

    fabric.register(ApiVersion::V1_0, &node_body(NODE_ID, "a")).await;
    settle().await;

    let (info, created) = fabric.subscriptions.create(spec("/nodes", &[("label", "a")], false), ApiVersion::V1_0);
    assert!(created);
    let mut attachment = fabric.subscriptions.attach(info.id).await?;

    // Sync grain first: the matching node with pre == post.
    let sync = next_grain(&mut attachment.rx).await;
    assert_eq!(sync["flow_id"], info.id.to_string());
    assert_eq!(sync["grain"]["topic"], "/nodes/");
    let data = grain_data(&sync);
    assert_eq!(data.len(), 1);
    assert_eq!(data[0]["path"], NODE_ID);
    assert_eq!(data[0]["pre"], data[0]["post"]);
    assert_eq!(data[0]["post"]["label"], "a");

    // Relabel so the node stops matching: visible -> invisible.
    fabric.register(ApiVersion::V1_0, &node_body(NODE_ID, "b")).await;
    let leave = next_grain(&mut attachment.rx).await;
    let data = grain_data(&leave);
    assert_eq!(data[0]["pre"]["label"], "a");
    assert_eq!(data[0]["post"], json!({}));

    // And back: invisible -> visible.
    fabric.register(ApiVersion::V1_0, &node_body(NODE_ID, "a")).await;
    let join = next_grain(&mut attachment.rx).await;
    let data = grain_data(&join);
    assert_eq!(data[0]["pre"], json!({}));
    assert_eq!(data[0]["post"]["label"], "a");

    // A visible -> visible change carries both sides.
    let mut relabeled = node_body(NODE_ID, "a");
    relabeled["data"]["href"] = json!("http://127.0.0.2:8020/");
    fabric.register(ApiVersion::V1_0, &relabeled).await;
    let update = next_grain(&mut attachment.rx).await;
    let data = grain_data(&update);
    assert_eq!(data[0]["pre"]["href"], "http://127.0.0.1:8020/");
    assert_eq!(data[0]["post"]["href"], "http://127.0.0.2:8020/");

    Ok(())
}

#[tokio::test]
async fn deletion_emits_a_closing_transition() -> Result<()> {
    let fabric = fabric();
    let _feed = start_pipeline(&fabric);

    fabric.register(ApiVersion::V1_0, &node_body(NODE_ID, "n")).await;
    settle().await;

    let (info, _) = fabric.subscriptions.create(spec("/nodes", &[], false), ApiVersion::V1_0);
    let mut attachment = fabric.subscriptions.attach(info.id).await?;
    let _sync = next_grain(&mut attachment.rx).await;

    fabric.registry.delete_resource(ResourceKind::Node, NODE_ID).await?;
    let grain = next_grain(&mut attachment.rx).await;
    let data = grain_data(&grain);
    assert_eq!(data[0]["pre"]["id"], NODE_ID);
    assert_eq!(data[0]["post"], json!({}));
    Ok(())
}

#[tokio::test]
async fn sync_grain_mirrors_the_equivalent_query() -> Result<()> {
    let fabric = fabric();
    fabric.register(ApiVersion::V1_0, &node_body(NODE_ID, "keep")).await;
    fabric.register(ApiVersion::V1_0, &node_body("90461aaa-a45a-48f0-ba2e-de51b45ce4ce", "drop")).await;

    let (info, _) = fabric.subscriptions.create(spec("/nodes", &[("label", "keep")], false), ApiVersion::V1_0);
    let mut attachment = fabric.subscriptions.attach(info.id).await?;
    let sync = next_grain(&mut attachment.rx).await;

    let expected = fabric
        .query
        .list(ResourceKind::Node, &ResourceQuery::new(ApiVersion::V1_0, params(&[("label", "keep")])))
        .await?;
    let posts: Vec<_> = grain_data(&sync).iter().map(|entry| entry["post"].clone()).collect();
    assert_eq!(posts, expected);
    Ok(())
}

#[tokio::test]
async fn subscription_projections_respect_the_api_version() -> Result<()> {
    let fabric = fabric();
    let _feed = start_pipeline(&fabric);

    let (info, _) = fabric.subscriptions.create(spec("/devices", &[], false), ApiVersion::V1_0);
    let mut attachment = fabric.subscriptions.attach(info.id).await?;
    let _sync = next_grain(&mut attachment.rx).await;

    fabric.register(ApiVersion::V1_0, &node_body(NODE_ID, "n")).await;
    let mut device = device_body(DEVICE_ID, NODE_ID);
    let data = device["data"].as_object_mut().unwrap();
    data.insert("description".to_string(), json!(""));
    data.insert("tags".to_string(), json!({}));
    data.insert("controls".to_string(), json!([]));
    fabric.register(ApiVersion::V1_1, &device).await;

    // The v1.0 subscriber sees the device truncated to v1.0 fields.
    let grain = next_grain(&mut attachment.rx).await;
    let entry = &grain_data(&grain)[0];
    assert_eq!(entry["post"]["id"], DEVICE_ID);
    assert!(entry["post"].get("controls").is_none());
    assert!(entry["post"].as_object().unwrap().keys().all(|k| !k.starts_with("@_")));
    Ok(())
}

#[tokio::test]
async fn identical_non_persistent_subscriptions_are_shared() -> Result<()> {
    let fabric = fabric();

    let (first, created_first) = fabric.subscriptions.create(spec("/flows", &[("format", "urn:x-nmos:format:video")], false), ApiVersion::V1_0);
    let (second, created_second) = fabric.subscriptions.create(spec("/flows", &[("format", "urn:x-nmos:format:video")], false), ApiVersion::V1_0);
    assert!(created_first);
    assert!(!created_second);
    assert_eq!(first.id, second.id);

    // A different version is a different subscription.
    let (third, created_third) = fabric.subscriptions.create(spec("/flows", &[("format", "urn:x-nmos:format:video")], false), ApiVersion::V1_1);
    assert!(created_third);
    assert_ne!(first.id, third.id);
    assert_eq!(third.secure, Some(false));

    // Persistent subscriptions are never shared.
    let (p1, c1) = fabric.subscriptions.create(spec("/flows", &[], true), ApiVersion::V1_0);
    let (p2, c2) = fabric.subscriptions.create(spec("/flows", &[], true), ApiVersion::V1_0);
    assert!(c1 && c2);
    assert_ne!(p1.id, p2.id);
    Ok(())
}

#[tokio::test]
async fn only_persistent_subscriptions_can_be_deleted() -> Result<()> {
    let fabric = fabric();
    let (ephemeral, _) = fabric.subscriptions.create(spec("/nodes", &[], false), ApiVersion::V1_0);
    let (durable, _) = fabric.subscriptions.create(spec("/nodes", &[], true), ApiVersion::V1_0);

    assert!(matches!(fabric.subscriptions.delete(ephemeral.id), Err(QueryError::NotPersistent(_))));
    fabric.subscriptions.delete(durable.id)?;
    assert!(fabric.subscriptions.get(durable.id).is_none());
    assert!(matches!(fabric.subscriptions.delete(durable.id), Err(QueryError::SubscriptionNotFound(_))));
    Ok(())
}

#[tokio::test]
async fn last_detach_removes_a_non_persistent_subscription() -> Result<()> {
    let fabric = fabric();
    let (ephemeral, _) = fabric.subscriptions.create(spec("/nodes", &[], false), ApiVersion::V1_0);
    let (durable, _) = fabric.subscriptions.create(spec("/senders", &[], true), ApiVersion::V1_0);

    let attachment = fabric.subscriptions.attach(ephemeral.id).await?;
    fabric.subscriptions.detach(attachment.subscription_id, attachment.socket_id);
    assert!(fabric.subscriptions.get(ephemeral.id).is_none());

    // Never-attached subscriptions stay; so do persistent ones.
    let (fresh, _) = fabric.subscriptions.create(spec("/nodes", &[], false), ApiVersion::V1_0);
    assert!(fabric.subscriptions.get(fresh.id).is_some());

    let attachment = fabric.subscriptions.attach(durable.id).await?;
    fabric.subscriptions.detach(attachment.subscription_id, attachment.socket_id);
    assert!(fabric.subscriptions.get(durable.id).is_some());
    Ok(())
}

#[tokio::test]
async fn an_index_skip_forces_a_resync() -> Result<()> {
    let fabric = fabric();
    let (info, _) = fabric.subscriptions.create(spec("/nodes", &[], true), ApiVersion::V1_0);
    let mut attachment = fabric.subscriptions.attach(info.id).await?;
    let _sync = next_grain(&mut attachment.rx).await;

    fabric.subscriptions.dispatch(WatchMessage::IndexSkip { from: 10, to: 1500 });

    // The server side let go; the channel drains to a close.
    let closed = tokio::time::timeout(Duration::from_secs(5), attachment.rx.recv()).await?;
    assert!(closed.is_none());
    // The persistent subscription itself survives for re-attachment.
    assert!(fabric.subscriptions.get(info.id).is_some());
    Ok(())
}

#[tokio::test]
async fn list_is_scoped_per_version() -> Result<()> {
    let fabric = fabric();
    fabric.subscriptions.create(spec("/nodes", &[], false), ApiVersion::V1_0);
    fabric.subscriptions.create(spec("/flows", &[], false), ApiVersion::V1_1);

    assert_eq!(fabric.subscriptions.list().len(), 2);
    assert_eq!(fabric.subscriptions.list_for(ApiVersion::V1_0).len(), 1);
    assert_eq!(fabric.subscriptions.list_for(ApiVersion::V1_1).len(), 1);
    assert_eq!(fabric.subscriptions.list_for(ApiVersion::V1_2).len(), 0);
    Ok(())
}
