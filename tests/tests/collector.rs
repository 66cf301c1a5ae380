
use std::time::Duration;

use anyhow::Result;
use common::*;
use mediafabric_core::collector::CollectorConfig;
use mediafabric_proto::ApiVersion;

fn collector_config(identity: &str) -> CollectorConfig {
    CollectorConfig { identity: identity.to_string(), ..CollectorConfig::default() }
}

async fn run_pass(fabric: &Fabric) {
    Collector::run_once(&fabric.substrate, &collector_config("test-collector")).await;
}

/// Build node -> device -> source -> flow (flow carrying both parents).
async fn seed_tree(fabric: &Fabric) {
    fabric.register(ApiVersion::V1_0, &node_body(NODE_ID, "n")).await;
    fabric.register(ApiVersion::V1_0, &device_body(DEVICE_ID, NODE_ID)).await;
    fabric.register(ApiVersion::V1_0, &source_body(SOURCE_ID, DEVICE_ID)).await;
    fabric.register(ApiVersion::V1_1, &flow_body(FLOW_ID, SOURCE_ID, Some(DEVICE_ID))).await;
}

#[tokio::test]
async fn live_tree_survives_collection() -> Result<()> {
    let fabric = fabric();
    seed_tree(&fabric).await;
    fabric.register(ApiVersion::V1_0, &sender_body(SENDER_ID, DEVICE_ID, FLOW_ID)).await;
    fabric.register(ApiVersion::V1_0, &receiver_body(RECEIVER_ID, DEVICE_ID)).await;

    run_pass(&fabric).await;

    for (kind, id) in [
        (ResourceKind::Node, NODE_ID),
        (ResourceKind::Device, DEVICE_ID),
        (ResourceKind::Source, SOURCE_ID),
        (ResourceKind::Flow, FLOW_ID),
        (ResourceKind::Sender, SENDER_ID),
        (ResourceKind::Receiver, RECEIVER_ID),
    ] {
        assert!(
            fabric.query_one(ApiVersion::V1_2, kind, id).await.is_some(),
            "{kind} {id} should have survived"
        );
    }
    Ok(())
}

#[tokio::test]
async fn orphaned_flow_is_reaped_after_source_deletion() -> Result<()> {
    let fabric = fabric();
    fabric.register(ApiVersion::V1_0, &node_body(NODE_ID, "n")).await;
    fabric.register(ApiVersion::V1_0, &device_body(DEVICE_ID, NODE_ID)).await;
    fabric.register(ApiVersion::V1_0, &source_body(SOURCE_ID, DEVICE_ID)).await;
    // Registered without a device reference, so the source governs.
    fabric.register(ApiVersion::V1_0, &flow_body(FLOW_ID, SOURCE_ID, None)).await;

    fabric.registry.delete_resource(ResourceKind::Source, SOURCE_ID).await?;
    run_pass(&fabric).await;

    assert!(fabric.query_one(ApiVersion::V1_0, ResourceKind::Flow, FLOW_ID).await.is_none());
    assert!(fabric.query_one(ApiVersion::V1_0, ResourceKind::Device, DEVICE_ID).await.is_some());
    Ok(())
}

#[tokio::test]
async fn flow_with_device_parent_outlives_its_source() -> Result<()> {
    let fabric = fabric();
    seed_tree(&fabric).await;

    // The device reference takes precedence, so losing the source alone
    // does not orphan this flow.
    fabric.registry.delete_resource(ResourceKind::Source, SOURCE_ID).await?;
    run_pass(&fabric).await;

    assert!(fabric.query_one(ApiVersion::V1_1, ResourceKind::Flow, FLOW_ID).await.is_some());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn node_death_cascades_through_all_descendants() -> Result<()> {
    let fabric = fabric();
    seed_tree(&fabric).await;
    fabric.register(ApiVersion::V1_0, &sender_body(SENDER_ID, DEVICE_ID, FLOW_ID)).await;

    // No heartbeat; the liveness key lapses.
    tokio::time::advance(Duration::from_secs(13)).await;
    run_pass(&fabric).await;

    for (kind, id) in [
        (ResourceKind::Node, NODE_ID),
        (ResourceKind::Device, DEVICE_ID),
        (ResourceKind::Source, SOURCE_ID),
        (ResourceKind::Flow, FLOW_ID),
        (ResourceKind::Sender, SENDER_ID),
    ] {
        assert!(
            fabric.query_one(ApiVersion::V1_2, kind, id).await.is_none(),
            "{kind} {id} should have been collected"
        );
    }
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn heartbeats_shield_a_node_from_collection() -> Result<()> {
    let fabric = fabric();
    seed_tree(&fabric).await;

    for _ in 0..4 {
        tokio::time::advance(Duration::from_secs(5)).await;
        fabric.registry.heartbeat(NODE_ID).await?;
    }
    run_pass(&fabric).await;

    assert!(fabric.query_one(ApiVersion::V1_1, ResourceKind::Flow, FLOW_ID).await.is_some());
    Ok(())
}

#[tokio::test]
async fn a_held_lock_skips_the_pass() -> Result<()> {
    let fabric = fabric();
    fabric.register(ApiVersion::V1_0, &node_body(NODE_ID, "n")).await;
    fabric.register(ApiVersion::V1_0, &device_body(DEVICE_ID, NODE_ID)).await;
    fabric.registry.delete_resource(ResourceKind::Node, NODE_ID).await?;

    // Another replica owns the lock; this pass must not delete anything.
    assert!(
        fabric
            .substrate
            .create_exclusive(keys::COLLECTOR_LOCK, "other-collector", Duration::from_secs(15))
            .await?
    );
    run_pass(&fabric).await;
    assert!(fabric.query_one(ApiVersion::V1_0, ResourceKind::Device, DEVICE_ID).await.is_some());
    assert_eq!(
        fabric.substrate.get(keys::COLLECTOR_LOCK).await?,
        Some("other-collector".to_string())
    );

    // Once released, the next pass collects and releases its own lock.
    fabric.substrate.delete(keys::COLLECTOR_LOCK).await?;
    run_pass(&fabric).await;
    assert!(fabric.query_one(ApiVersion::V1_0, ResourceKind::Device, DEVICE_ID).await.is_none());
    assert_eq!(fabric.substrate.get(keys::COLLECTOR_LOCK).await?, None);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn lock_ttl_unblocks_a_crashed_collector() -> Result<()> {
    let fabric = fabric();
    fabric.register(ApiVersion::V1_0, &node_body(NODE_ID, "n")).await;
    fabric.register(ApiVersion::V1_0, &device_body(DEVICE_ID, NODE_ID)).await;
    fabric.registry.delete_resource(ResourceKind::Node, NODE_ID).await?;

    // A collector that died mid-pass leaves its lock behind; the TTL
    // clears it for the successors.
    fabric.substrate.create_exclusive(keys::COLLECTOR_LOCK, "crashed", Duration::from_secs(15)).await?;
    tokio::time::advance(Duration::from_secs(16)).await;

    run_pass(&fabric).await;
    assert!(fabric.query_one(ApiVersion::V1_0, ResourceKind::Device, DEVICE_ID).await.is_none());
    Ok(())
}
