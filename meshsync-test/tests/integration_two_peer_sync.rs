//! End-to-end: two peers stay bit-exact over a long run and reach a
//! 100% sync score.

use meshsync::{SyncConfig, World};
use meshsync_test::helpers::mock_world::{move_input, spawn_input};
use meshsync_test::helpers::Cluster;

#[test]
fn two_peers_reach_full_sync() {
    let mut cluster = Cluster::new(&["peer-a", "peer-b"], SyncConfig::default());

    // Peer A spawns 10 food entities early in the session.
    cluster.relay.schedule(5, "peer-a", spawn_input(10));
    cluster.run(10);

    // A locally queued input lands on the same frame with the same data
    // as the relay's confirmation, so it never conflicts with itself.
    let a = cluster.index_of("peer-a");
    let delayed_frame = cluster.engines[a].stats().local_frame + 2;
    cluster.engines[a].queue_local_input(move_input(1, 0));
    cluster.relay.schedule(delayed_frame, "peer-a", move_input(1, 0));

    cluster.run(100);

    let shadow_hash = cluster.relay.shadow_hash();
    for id in ["peer-a", "peer-b"] {
        let index = cluster.index_of(id);
        let stats = cluster.engines[index].stats();
        assert_eq!(stats.sync_percent, 100.0, "{id} sync percent");
        assert!(stats.passed >= 10, "{id} passed only {}", stats.passed);
        assert_eq!(stats.failed, 0, "{id} failed checks");
        assert!(!stats.is_desynced, "{id} is desynced");
        assert!(!stats.resync_pending, "{id} has a resync pending");
        // Confirmations trail the local frame by one step, so every
        // rollback re-validating a confirmed frame is one frame deep.
        assert!(
            stats.max_rollback_depth <= 1,
            "{id} rollback depth {}",
            stats.max_rollback_depth
        );

        assert_eq!(cluster.worlds[index].state_hash(), shadow_hash, "{id} state");
        assert_eq!(cluster.worlds[index].entity_count(), 10, "{id} entities");
    }
}

#[test]
fn peers_establish_time_sync_over_ping_exchange() {
    let mut cluster = Cluster::new(&["peer-a", "peer-b"], SyncConfig::default());
    cluster.run(110);

    for id in ["peer-a", "peer-b"] {
        let stats = cluster.engines[cluster.index_of(id)].stats();
        assert!(stats.is_time_synced, "{id} never time-synced");
        // A loopback round trip costs two 50ms steps.
        assert!(
            stats.estimated_latency_ms <= 150,
            "{id} latency {}",
            stats.estimated_latency_ms
        );
        assert!(
            (0.90..=1.10).contains(&stats.tick_rate_multiplier),
            "{id} multiplier {}",
            stats.tick_rate_multiplier
        );
    }
}
