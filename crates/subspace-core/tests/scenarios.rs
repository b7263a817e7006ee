//! End-to-end scenarios across the tree, physics, collisions and the
//! snapshot and save formats.
//!
//! Every test builds its own world; nothing here touches the view registry.

use subspace_core::collision::ContactPassReport;
use subspace_core::connector::hinge;
use subspace_core::prelude::*;
use subspace_core::record::{Playback, PropertyMask, Recorder};

// ── Helpers ────────────────────────────────────────────────────────────

fn ball(loc: DVec3, radius: f64) -> ObjectDesc {
    ObjectDesc::new()
        .with_locator(Locator::engine(Pose::from_loc(loc), Inertia::new(1.0, 0.4 * radius * radius)))
        .with_geometry(Geometry::new(Shape::sphere(radius)))
}

fn run(world: &mut World, ticks: usize, dt: f64) {
    for _ in 0..ticks {
        world.tick(dt).unwrap();
    }
}

// ── Tree and frames ────────────────────────────────────────────────────

#[test]
fn passenger_rides_a_moving_subspace() {
    let mut w = World::new(WorldConfig::default());
    let root = w.root();
    let cart = w
        .spawn_in(
            root,
            ObjectDesc::named("cart")
                .with_locator(Locator::Moving(
                    subspace_core::locator::MovingLocator::new(Pose::IDENTITY).with_velocity(DVec3::X),
                ))
                .with_subspace(Subspace::new()),
        )
        .unwrap();
    let rider = w
        .spawn_in(cart, ObjectDesc::named("rider").with_locator(Pose::from_loc(DVec3::Z)))
        .unwrap();

    run(&mut w, 10, 0.1);
    let at = w.absolute_pose(rider).unwrap().loc;
    assert!(at.abs_diff_eq(DVec3::new(1.0, 0.0, 1.0), 1.0e-9));
    assert_eq!(w.relative_pose(rider).unwrap().loc, DVec3::Z);
}

#[test]
fn paused_subspace_freezes_its_contents() {
    let mut w = World::new(WorldConfig::default());
    let root = w.root();
    let bay = w
        .spawn_in(root, ObjectDesc::named("bay").with_subspace(Subspace::new().with_integrator(Integrator::Paused)))
        .unwrap();
    let drone = w
        .spawn_in(
            bay,
            ObjectDesc::named("drone").with_locator(Locator::Moving(
                subspace_core::locator::MovingLocator::new(Pose::IDENTITY).with_velocity(DVec3::Y),
            )),
        )
        .unwrap();

    run(&mut w, 5, 0.1);
    assert_eq!(w.relative_pose(drone).unwrap().loc, DVec3::ZERO);

    w.set_integrator(bay, Integrator::Sequential).unwrap();
    run(&mut w, 5, 0.1);
    assert!(w.relative_pose(drone).unwrap().loc.abs_diff_eq(DVec3::new(0.0, 0.5, 0.0), 1.0e-9));
}

// ── Physics and collisions ─────────────────────────────────────────────

#[test]
fn ball_lands_on_the_ground() {
    let mut w = World::with_physics(WorldConfig::default());
    let root = w.root();
    w.spawn_in(root, ObjectDesc::named("ground").with_geometry(Geometry::new(Shape::ground())))
        .unwrap();
    let b = w.spawn_in(root, ball(DVec3::new(0.0, 0.0, 2.0), 0.5)).unwrap();
    w.enable_collisions().unwrap();
    w.activate(b).unwrap();

    let mut touched = false;
    for _ in 0..200 {
        w.tick(0.01).unwrap();
        touched |= w.last_contact_report().created > 0;
    }
    assert!(touched);
    let z = w.absolute_pose(b).unwrap().loc.z;
    assert!(z > 0.3 && z < 0.8, "ball settled at z = {}", z);
    assert!(w.velocity(b).unwrap().z.abs() < 1.0);
}

#[test]
fn deactivate_returns_to_a_plain_pose_and_unlocks() {
    let mut w = World::with_physics(WorldConfig::default());
    let root = w.root();
    let room = w.spawn_in(root, ObjectDesc::named("room").with_subspace(Subspace::new())).unwrap();
    let b = w.spawn_in(room, ball(DVec3::new(0.0, 0.0, 10.0), 0.5)).unwrap();
    w.activate(b).unwrap();
    assert!(w.is_locked(room).unwrap());
    assert!(w.remove(room).is_err());

    run(&mut w, 10, 0.01);
    let fallen = w.relative_pose(b).unwrap();
    assert!(fallen.loc.z < 10.0);

    w.deactivate(b).unwrap();
    assert!(w.body_of(b).is_none());
    assert!(!w.is_locked(room).unwrap());
    assert!(w.relative_pose(b).unwrap().abs_diff_eq(&fallen, 1.0e-12));
    w.remove(room).unwrap();
}

#[test]
fn destroying_a_jointed_object_frees_its_peer() {
    let mut w = World::with_physics(WorldConfig::default().with_gravity(DVec3::ZERO));
    let root = w.root();
    let joint = JointType::hinge(DVec3::Z);
    let post = w
        .spawn_in(root, ObjectDesc::named("post").with_connector(0, Connector::new(Pose::IDENTITY, joint)))
        .unwrap();
    let arm = w
        .spawn_in(root, ball(DVec3::X, 0.2).with_connector(0, Connector::new(Pose::from_loc(-DVec3::X), joint)))
        .unwrap();
    w.activate(arm).unwrap();
    let post_c = ConnectorRef::new(post, 0);
    w.connect(post_c, ConnectorRef::new(arm, 0), Align::Keep).unwrap();

    w.destroy(arm).unwrap();
    assert!(!w.connector(post_c).unwrap().is_paired());
    assert_eq!(w.physics().map(|p| p.joint_count()), Some(0));
    run(&mut w, 3, 0.01);
}

// ── Scenes, snapshots and saves ────────────────────────────────────────

const WORKSHOP: &str = r#"{
    "physics": true,
    "collisions": true,
    "objects": [
        { "name": "floor", "geometry": { "shape": { "Plane": { "normal": [0.0, 0.0, 1.0], "offset": 0.0 } } } },
        {
            "name": "bench",
            "locator": { "Static": { "pose": { "loc": [2.0, 0.0, 0.0] } } },
            "subspace": {
                "children": [
                    { "name": "crate",
                      "locator": { "Engine": { "pose": { "loc": [0.0, 0.0, 0.5] },
                                               "inertia": { "mass": 4.0, "moment": 0.7 },
                                               "active": true } },
                      "geometry": { "shape": { "Box": { "half_extents": [0.5, 0.5, 0.5] } } } }
                ]
            }
        }
    ]
}"#;

#[test]
fn snapshot_restores_a_moved_object() {
    let mut w = World::from_scene(&SceneDesc::from_json(WORKSHOP).unwrap()).unwrap();
    let crate_ = w.find_path("/bench/crate").unwrap();
    let before = w.write_snapshot(w.root(), PropertyMask::LOCATOR);

    w.set_pose(crate_, Pose::from_loc(DVec3::new(0.0, 3.0, 0.5))).unwrap();
    let stats = w.read_snapshot(&before, PropertyMask::LOCATOR).unwrap();
    assert!(stats.applied >= 2);
    assert!(w.relative_pose(crate_).unwrap().loc.abs_diff_eq(DVec3::new(0.0, 0.0, 0.5), 1.0e-12));
}

#[test]
fn recording_replays_the_trajectory() {
    let mut w = World::from_scene(&SceneDesc::from_json(WORKSHOP).unwrap()).unwrap();
    let crate_ = w.find_path("/bench/crate").unwrap();
    w.set_pose(crate_, Pose::from_loc(DVec3::new(0.0, 0.0, 3.0))).unwrap();

    let mut recorder = Recorder::new(PropertyMask::LOCATOR);
    let mut heights = Vec::new();
    for _ in 0..30 {
        w.tick(0.01).unwrap();
        recorder.record(&w, w.root());
        heights.push(w.relative_pose(crate_).unwrap().loc.z);
    }
    assert_eq!(recorder.blocks(), 30);

    let mut fresh = World::from_scene(&SceneDesc::from_json(WORKSHOP).unwrap()).unwrap();
    let replayed = fresh.find_path("/bench/crate").unwrap();
    let mut playback = Playback::new(recorder.as_str(), PropertyMask::LOCATOR);
    for z in heights {
        playback.apply_next(&mut fresh).unwrap().unwrap();
        assert!((fresh.relative_pose(replayed).unwrap().loc.z - z).abs() < 1.0e-9);
    }
    assert!(playback.apply_next(&mut fresh).is_none());
}

#[test]
fn save_survives_a_reload_mid_flight() {
    let mut w = World::from_scene(&SceneDesc::from_json(WORKSHOP).unwrap()).unwrap();
    let crate_ = w.find_path("/bench/crate").unwrap();
    w.set_velocity(crate_, DVec3::new(0.0, 0.0, 2.0)).unwrap();
    run(&mut w, 5, 0.01);

    let mut buf = Vec::new();
    w.save(&mut buf).unwrap();
    let mut loaded = World::load(&buf[..]).unwrap();
    let reloaded = loaded.find_path("/bench/crate").unwrap();

    run(&mut w, 5, 0.01);
    run(&mut loaded, 5, 0.01);
    let a = w.absolute_pose(crate_).unwrap().loc;
    let b = loaded.absolute_pose(reloaded).unwrap().loc;
    assert!(a.abs_diff_eq(b, 1.0e-6), "{} vs {}", a, b);
    assert_eq!(loaded.ticks(), w.ticks());
}

#[test]
fn hinge_motor_turns_the_arm() {
    let mut w = World::with_physics(WorldConfig::default().with_gravity(DVec3::ZERO));
    let root = w.root();
    let joint = JointType::hinge(DVec3::Z);
    let post = w
        .spawn_in(
            root,
            ObjectDesc::named("post").with_connector(0, Connector::new(Pose::IDENTITY, joint).with_max_force(100.0)),
        )
        .unwrap();
    let arm = w
        .spawn_in(root, ball(DVec3::X, 0.2).with_connector(0, Connector::new(Pose::from_loc(-DVec3::X), joint)))
        .unwrap();
    w.activate(arm).unwrap();
    let c = ConnectorRef::new(post, 0);
    w.connect(c, ConnectorRef::new(arm, 0), Align::Keep).unwrap();
    w.use_connector_control(c, hinge::FORCE_FACTOR, 1.0).unwrap();
    w.use_connector_control(c, hinge::VELOCITY, 1.0).unwrap();

    run(&mut w, 100, 0.01);
    let rate = w.connector_sensor(c, hinge::ANGLE_RATE).unwrap();
    assert!((rate.abs() - 1.0).abs() < 0.05, "rate {}", rate);
    // Arm end stays on the unit circle around the post
    let r = w.absolute_pose(arm).unwrap().loc.length();
    assert!((r - 1.0).abs() < 1.0e-2, "radius {}", r);
    assert_eq!(w.last_contact_report(), ContactPassReport::default());
}
