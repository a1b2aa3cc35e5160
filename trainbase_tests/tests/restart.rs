//! Persistence across service restarts.

use trainbase_server::{
    anchors::AnchorService,
    persist::{JsonFileBackend, MemoryBackend},
};
use trainbase_shared::{
    category::CarCategory,
    config::AnchorConfig,
    host::Host,
    math::{Quat, Transform, Vec3},
    sim::{prefabs, SimWorld},
};
use trainbase_tests::Harness;

#[test]
fn restart_restores_ownership_and_links() -> anyhow::Result<()> {
    trainbase_tests::init_tracing();
    let mut h = Harness::new();
    let train = h.spawn(prefabs::LOCOMOTIVE, Vec3::ZERO)?;
    let outcome = h
        .service
        .apply_preset(&mut h.world, train, CarCategory::Engine, true)?;
    h.pump();
    let before: Vec<_> = h.service.anchors_of(h.key(train)).to_vec();

    h.restart();

    assert_eq!(h.service.anchors_of(h.key(train)), before.as_slice());
    for (anchor, handle) in before.iter().zip(&outcome.anchors) {
        assert_eq!(h.service.links().get(*anchor), Some(h.key(train)));
        assert_eq!(h.service.resolve(&h.world, *anchor), Some(*handle));
    }

    // The cascade still works after a reload.
    h.kill(train);
    assert!(h.service.store().is_empty());
    assert!(h.world.live_entities().is_empty());
    Ok(())
}

#[test]
fn entities_lost_while_offline_are_swept() -> anyhow::Result<()> {
    let mut h = Harness::new();
    let gone = h.spawn(prefabs::WORKCART, Vec3::ZERO)?;
    let kept = h.spawn(prefabs::FLATBED, Vec3::new(20.0, 0.0, 0.0))?;
    h.service.apply_preset(&mut h.world, gone, CarCategory::Workcart, true)?;
    let kept_anchors = h
        .service
        .apply_preset(&mut h.world, kept, CarCategory::Flatbed, true)?
        .anchors;
    h.pump();
    let gone_key = h.key(gone);
    let lost_anchor = kept_anchors[0];
    let lost_key = h.key(lost_anchor);

    h.restart_with(|world| {
        world.kill(gone);
        world.kill(lost_anchor);
    });

    assert!(h.service.store().get(gone_key).is_none());
    let remaining = h.service.anchors_of(h.key(kept));
    assert_eq!(remaining.len(), 2);
    assert!(!remaining.contains(&lost_key));
    assert!(h.service.links().get(lost_key).is_none());
    h.assert_consistent();
    assert!(h.store_matches_world());

    // Nothing left to purge, and nothing else changes.
    let store = h.service.store().clone();
    let links = h.service.links().clone();
    assert!(h.service.sweep(&h.world).is_clean());
    assert_eq!(h.service.store(), &store);
    assert_eq!(h.service.links(), &links);
    Ok(())
}

#[test]
fn anchor_listed_under_two_trains_keeps_one_owner() -> anyhow::Result<()> {
    trainbase_tests::init_tracing();
    let mut world = SimWorld::new();
    let first = world
        .spawn_prefab(prefabs::WORKCART, Transform::from_position(Vec3::ZERO))
        .ok_or_else(|| anyhow::anyhow!("workcart prefab missing"))?;
    let second = world
        .spawn_prefab(prefabs::FLATBED, Transform::from_position(Vec3::new(20.0, 0.0, 0.0)))
        .ok_or_else(|| anyhow::anyhow!("flatbed prefab missing"))?;
    let anchor = world
        .spawn_prefab(prefabs::FOUNDATION, Transform::from_position(Vec3::ZERO))
        .ok_or_else(|| anyhow::anyhow!("foundation prefab missing"))?;
    let backend = MemoryBackend::with_blob(
        r#"{"trains":[{"trainKey":1,"anchorKeys":[3]},{"trainKey":2,"anchorKeys":[3]}]}"#,
    );

    let mut h = Harness::resume(world, backend);
    let anchor_key = h.key(anchor);
    assert_eq!(h.service.anchors_of(h.key(first)), &[anchor_key]);
    assert!(h.service.store().get(h.key(second)).is_none());
    assert_eq!(h.service.links().get(anchor_key), Some(h.key(first)));
    h.assert_consistent();

    h.kill(anchor);
    assert!(h.service.store().is_empty());
    assert!(h.service.links().is_empty());
    assert!(h.world.is_alive(second));
    h.assert_consistent();
    Ok(())
}

#[test]
fn json_file_survives_process_restart() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let mut world = SimWorld::new();
    let train = world
        .spawn_prefab(prefabs::CABOOSE, Transform::from_position(Vec3::ZERO))
        .ok_or_else(|| anyhow::anyhow!("caboose prefab missing"))?;
    world.discard_events();

    let mut service = AnchorService::start(
        AnchorConfig::default(),
        Box::new(JsonFileBackend::new(dir.path())),
        &world,
    );
    let anchor =
        service.create_anchor(&mut world, train, Vec3::new(0.0, 0.05, 0.0), Quat::IDENTITY)?;
    service.shutdown();

    let path = dir.path().join("TrainBase.json");
    let raw: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
    assert_eq!(raw["trains"][0]["trainKey"], 1);
    assert_eq!(raw["trains"][0]["anchorKeys"][0], 2);

    let mut reloaded = AnchorService::start(
        AnchorConfig::default(),
        Box::new(JsonFileBackend::new(dir.path())),
        &world,
    );
    let train_key = reloaded.key_of(&world, train);
    assert_eq!(reloaded.anchors_of(train_key).len(), 1);
    let anchor_key = reloaded.key_of(&world, anchor);
    assert_eq!(reloaded.resolve(&world, anchor_key), Some(anchor));
    assert!(world.is_alive(anchor));
    Ok(())
}

#[test]
fn corrupt_file_starts_empty() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    std::fs::write(dir.path().join("TrainBase.json"), "{ not json")?;

    let world = SimWorld::new();
    let service = AnchorService::start(
        AnchorConfig::default(),
        Box::new(JsonFileBackend::new(dir.path())),
        &world,
    );
    assert!(service.store().is_empty());
    Ok(())
}
