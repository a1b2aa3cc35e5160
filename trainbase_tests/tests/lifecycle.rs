//! Anchor lifecycle properties under random churn.

use rand::{rngs::StdRng, Rng, SeedableRng};
use trainbase_shared::{
    category::CarCategory,
    ecs::EntityHandle,
    host::Host,
    math::{Quat, Vec3},
    sim::prefabs,
};
use trainbase_tests::Harness;

const TRAIN_PREFABS: [&str; 5] = [
    prefabs::WORKCART,
    prefabs::FLATBED,
    prefabs::ORE_HOPPER,
    prefabs::COVERED,
    prefabs::LOCOMOTIVE,
];

fn live_trains(h: &Harness, trains: &[EntityHandle]) -> Vec<EntityHandle> {
    trains.iter().copied().filter(|t| h.world.is_alive(*t)).collect()
}

#[test]
fn random_churn_keeps_store_and_links_consistent() -> anyhow::Result<()> {
    trainbase_tests::init_tracing();
    let mut rng = StdRng::seed_from_u64(0x7ba5e);
    let mut h = Harness::new();
    let mut trains = Vec::new();

    for step in 0..400 {
        match rng.gen_range(0..7) {
            0 => {
                let prefab = TRAIN_PREFABS[rng.gen_range(0..TRAIN_PREFABS.len())];
                let x = rng.gen_range(-50.0..50.0);
                trains.push(h.spawn(prefab, Vec3::new(x, 0.0, 0.0))?);
            }
            1 | 2 => {
                let live = live_trains(&h, &trains);
                if let Some(&train) = live.get(rng.gen_range(0..live.len().max(1))) {
                    let offset = Vec3::new(rng.gen_range(-2.0..2.0), 0.05, 0.0);
                    h.service.create_anchor(&mut h.world, train, offset, Quat::IDENTITY)?;
                    h.pump();
                }
            }
            3 => {
                let live = live_trains(&h, &trains);
                if let Some(&train) = live.get(rng.gen_range(0..live.len().max(1))) {
                    let category = CarCategory::ALL[rng.gen_range(0..CarCategory::ALL.len())];
                    h.service.apply_preset(&mut h.world, train, category, rng.gen_bool(0.5))?;
                    h.pump();
                }
            }
            4 => {
                let live = live_trains(&h, &trains);
                if let Some(&train) = live.get(rng.gen_range(0..live.len().max(1))) {
                    h.kill(train);
                }
            }
            5 => {
                let record = h.service.store().records().next().cloned();
                if let Some(anchor) = record.and_then(|r| r.anchor_keys.first().copied()) {
                    if let Some(handle) = h.service.resolve(&h.world, anchor) {
                        h.kill(handle);
                    }
                }
            }
            _ => {
                let live = live_trains(&h, &trains);
                if let Some(&train) = live.get(rng.gen_range(0..live.len().max(1))) {
                    h.service.clear_anchors(&mut h.world, train);
                    h.pump();
                }
            }
        }

        h.assert_consistent();
        assert!(h.store_matches_world(), "stale ownership after step {step}");
    }
    Ok(())
}

#[test]
fn killed_train_takes_all_anchors_with_it() -> anyhow::Result<()> {
    let mut h = Harness::new();
    let train = h.spawn(prefabs::FLATBED, Vec3::ZERO)?;
    let outcome = h
        .service
        .apply_preset(&mut h.world, train, CarCategory::Flatbed, true)?;
    h.pump();
    assert_eq!(outcome.anchors.len(), 3);
    let bystander = h.spawn(prefabs::BARREL, Vec3::new(10.0, 0.0, 0.0))?;

    h.kill(train);

    for anchor in &outcome.anchors {
        assert!(!h.world.is_alive(*anchor));
    }
    assert!(h.world.is_alive(bystander));
    assert!(h.service.store().is_empty());
    assert!(h.service.links().is_empty());
    Ok(())
}

#[test]
fn last_anchor_gone_drops_record() -> anyhow::Result<()> {
    let mut h = Harness::new();
    let train = h.spawn(prefabs::WORKCART, Vec3::ZERO)?;
    let a = h
        .service
        .create_anchor(&mut h.world, train, Vec3::ZERO, Quat::IDENTITY)?;
    let b = h
        .service
        .create_anchor(&mut h.world, train, Vec3::new(1.0, 0.0, 0.0), Quat::IDENTITY)?;
    h.pump();

    h.kill(a);
    assert_eq!(h.service.anchors_of(h.key(train)), &[h.key(b)]);
    h.kill(b);
    assert!(h.service.store().get(h.key(train)).is_none());
    assert!(h.world.is_alive(train));
    Ok(())
}

#[test]
fn repeated_preset_with_clear_does_not_accumulate() -> anyhow::Result<()> {
    let mut h = Harness::new();
    let train = h.spawn(prefabs::ORE_HOPPER, Vec3::ZERO)?;
    for _ in 0..5 {
        let category = h.service.detect_category(&h.world, train);
        h.service.apply_preset(&mut h.world, train, category, true)?;
        h.pump();
    }
    assert_eq!(h.service.anchors_of(h.key(train)).len(), 3);
    // One train plus its three live anchors.
    assert_eq!(h.world.live_entities().len(), 4);
    h.assert_consistent();
    Ok(())
}
