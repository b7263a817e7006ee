//! Subspace Headless Simulation Harness
//!
//! Loads the workshop scene and validates the world end to end: tree and
//! frames, integrators, physics and contacts, connectors, snapshots,
//! saves and the rendering contract. Runs entirely in-process.
//!
//! Usage:
//!   cargo run -p subspace-simtest
//!   cargo run -p subspace-simtest -- --verbose
//!
//! Set `RUST_LOG=debug` for world-level logging.

use glam::{DMat3, DVec3};
use log::info;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use subspace_core::connector::hinge;
use subspace_core::prelude::*;
use subspace_core::record::{Playback, PropertyMask, Recorder};
use subspace_core::render::{ViewId, ViewRegistry};

// ── Workshop scene ──────────────────────────────────────────────────────
const WORKSHOP_JSON: &str = include_str!("../../../data/workshop.json");

const DT: f64 = 0.01;

// ── Test harness ────────────────────────────────────────────────────────

struct TestResult {
    name: String,
    passed: bool,
    detail: String,
}

fn main() {
    env_logger::init();
    let verbose = std::env::args().any(|a| a == "--verbose");
    println!("=== Subspace Simulation Harness ===\n");

    let mut results = Vec::new();

    // 1. Scene parsing and construction
    results.extend(validate_scene_load(verbose));

    // 2. Frame conversions on random poses
    results.extend(validate_frames(verbose));

    // 3. Integrators and moving subspaces
    results.extend(validate_integrators(verbose));

    // 4. Physics and contacts
    results.extend(validate_physics(verbose));

    // 5. Connectors and joint controls
    results.extend(validate_connectors(verbose));

    // 6. Snapshot protocol
    results.extend(validate_snapshots(verbose));

    // 7. Save / load
    results.extend(validate_persistence(verbose));

    // 8. Rendering contract
    results.extend(validate_rendering(verbose));

    // ── Summary ──
    println!();
    let passed = results.iter().filter(|r| r.passed).count();
    let failed = results.iter().filter(|r| !r.passed).count();
    let total = results.len();

    for r in &results {
        let icon = if r.passed { "✓" } else { "✗" };
        if !r.passed || verbose {
            println!("  {} {}: {}", icon, r.name, r.detail);
        }
    }

    println!("\n=== RESULT: {}/{} passed, {} failed ===", passed, total, failed);

    if failed > 0 {
        std::process::exit(1);
    }
}

fn load_workshop() -> Result<World, String> {
    let scene = SceneDesc::from_json(WORKSHOP_JSON).map_err(|e| format!("JSON parse error: {}", e))?;
    World::from_scene(&scene).map_err(|e| format!("scene build error: {}", e))
}

fn run(world: &mut World, ticks: usize) -> Result<(), WorldError> {
    for _ in 0..ticks {
        world.tick(DT)?;
    }
    Ok(())
}

fn random_pose(rng: &mut StdRng) -> Pose {
    let loc = DVec3::new(rng.gen_range(-5.0..5.0), rng.gen_range(-5.0..5.0), rng.gen_range(-5.0..5.0));
    let axis = DVec3::new(rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0));
    let axis = axis.try_normalize().unwrap_or(DVec3::Z);
    Pose::from_axis_angle(loc, axis, rng.gen_range(-3.0..3.0))
}

// ── 1. Scene Load ───────────────────────────────────────────────────────

fn validate_scene_load(verbose: bool) -> Vec<TestResult> {
    println!("--- Scene Load ---");
    let mut results = Vec::new();

    let scene = match SceneDesc::from_json(WORKSHOP_JSON) {
        Ok(s) => s,
        Err(e) => {
            results.push(TestResult {
                name: "scene_parse".into(),
                passed: false,
                detail: format!("JSON parse error: {}", e),
            });
            return results;
        }
    };
    results.push(TestResult {
        name: "scene_object_count".into(),
        passed: scene.object_count() == 9,
        detail: format!("{} objects described", scene.object_count()),
    });

    let world = match World::from_scene(&scene) {
        Ok(w) => w,
        Err(e) => {
            results.push(TestResult {
                name: "scene_build".into(),
                passed: false,
                detail: format!("build error: {}", e),
            });
            return results;
        }
    };

    // Every named path resolves and maps back to itself
    let paths = [
        "/floor",
        "/rig",
        "/rig/post",
        "/rig/arm",
        "/crate",
        "/cart",
        "/cart/beacon",
        "/storage",
        "/storage/drone",
    ];
    let unresolved: Vec<&str> = paths
        .iter()
        .copied()
        .filter(|p| world.find_path(p).ok().and_then(|e| world.path_of(e)).as_deref() != Some(*p))
        .collect();
    results.push(TestResult {
        name: "scene_paths".into(),
        passed: unresolved.is_empty(),
        detail: if unresolved.is_empty() {
            format!("{} paths resolve", paths.len())
        } else {
            format!("unresolved: {}", unresolved.join(", "))
        },
    });

    // Active engine locators lock themselves and their containers
    let active: Vec<&str> = ["/rig/arm", "/crate"]
        .into_iter()
        .filter(|p| world.find_path(p).map(|e| world.body_of(e).is_some()).unwrap_or(false))
        .collect();
    let rig_locked = world.find_path("/rig").and_then(|e| world.is_locked(e)).unwrap_or(false);
    let cart_locked = world.find_path("/cart").and_then(|e| world.is_locked(e)).unwrap_or(true);
    results.push(TestResult {
        name: "scene_activation".into(),
        passed: active.len() == 2 && rig_locked && !cart_locked,
        detail: format!("active={:?} rig_locked={} cart_locked={}", active, rig_locked, cart_locked),
    });

    // The arm was moved so both connector frames coincide
    let frames = world.find_path("/rig/post").and_then(|post| {
        let arm = world.find_path("/rig/arm")?;
        Ok((
            world.connector_pose(ConnectorRef::new(post, 0))?,
            world.connector_pose(ConnectorRef::new(arm, 0))?,
        ))
    });
    let (aligned, gap) = match frames {
        Ok((a, b)) => (a.loc.abs_diff_eq(b.loc, 1.0e-9), (a.loc - b.loc).length()),
        Err(_) => (false, f64::NAN),
    };
    results.push(TestResult {
        name: "scene_connection_aligned".into(),
        passed: aligned,
        detail: format!("connector frames {:.2e} apart", gap),
    });

    if verbose {
        println!("  Loaded {:?}", world);
    }

    results
}

// ── 2. Frames ───────────────────────────────────────────────────────────

fn validate_frames(_verbose: bool) -> Vec<TestResult> {
    println!("--- Frames ---");
    let mut results = Vec::new();
    let mut rng = StdRng::seed_from_u64(7);

    let mut world = World::new(WorldConfig::default());
    let mut parent = world.root();
    let mut chain = Vec::new();
    for depth in 0..5 {
        let desc = ObjectDesc::named(format!("level{}", depth))
            .with_locator(random_pose(&mut rng))
            .with_subspace(Subspace::new());
        match world.spawn_in(parent, desc) {
            Ok(e) => {
                chain.push(e);
                parent = e;
            }
            Err(e) => {
                results.push(TestResult {
                    name: "frames_build".into(),
                    passed: false,
                    detail: format!("{}", e),
                });
                return results;
            }
        }
    }

    // to_relative(to_absolute(p)) == p at every depth
    let mut worst: f64 = 0.0;
    for _ in 0..200 {
        let object = chain[rng.gen_range(0..chain.len())];
        let pose = random_pose(&mut rng);
        let back = world
            .to_absolute(object, &pose)
            .and_then(|abs| world.to_relative(object, &abs));
        match back {
            Ok(b) => worst = worst.max((b.loc - pose.loc).length()),
            Err(_) => worst = f64::INFINITY,
        }
    }
    results.push(TestResult {
        name: "frames_absolute_roundtrip".into(),
        passed: worst < 1.0e-9,
        detail: format!("worst location error {:.2e}", worst),
    });

    // Walking the chain agrees with the direct conversion
    let deepest = chain[chain.len() - 1];
    let pose = random_pose(&mut rng);
    let walked = world.to_ancestor(deepest, world.root(), &pose);
    let direct = world.to_absolute(deepest, &pose);
    let agree = matches!((walked, direct), (Ok(a), Ok(b)) if a.abs_diff_eq(&b, 1.0e-9));
    results.push(TestResult {
        name: "frames_ancestor_matches_absolute".into(),
        passed: agree,
        detail: "to_ancestor(root) equals to_absolute".into(),
    });

    // Bases stay orthonormal through the chain
    let basis = world.absolute_pose(deepest).map(|p| p.basis).unwrap_or(DMat3::ZERO);
    let drift = (basis.transpose() * basis - DMat3::IDENTITY)
        .to_cols_array()
        .iter()
        .fold(0.0_f64, |m, v| m.max(v.abs()));
    results.push(TestResult {
        name: "frames_orthonormal".into(),
        passed: drift < 1.0e-12,
        detail: format!("max deviation {:.2e}", drift),
    });

    results
}

// ── 3. Integrators ──────────────────────────────────────────────────────

fn validate_integrators(_verbose: bool) -> Vec<TestResult> {
    println!("--- Integrators ---");
    let mut results = Vec::new();

    let mut world = match load_workshop() {
        Ok(w) => w,
        Err(e) => {
            results.push(TestResult { name: "integrators_load".into(), passed: false, detail: e });
            return results;
        }
    };
    let lookup = |w: &World, p: &str| w.find_path(p).and_then(|e| w.absolute_pose(e)).map(|p| p.loc);
    let beacon_before = lookup(&world, "/cart/beacon");
    let drone_before = lookup(&world, "/storage/drone");

    if let Err(e) = run(&mut world, 100) {
        results.push(TestResult {
            name: "integrators_run".into(),
            passed: false,
            detail: format!("tick error: {}", e),
        });
        return results;
    }

    // The beacon rides the cart: 1 s at 0.5 m/s along x
    let moved = match (beacon_before, lookup(&world, "/cart/beacon")) {
        (Ok(a), Ok(b)) => b - a,
        _ => DVec3::NAN,
    };
    results.push(TestResult {
        name: "integrators_subspace_carries_children".into(),
        passed: moved.abs_diff_eq(DVec3::new(0.5, 0.0, 0.0), 1.0e-9),
        detail: format!("beacon moved {}", moved),
    });

    // The paused storage holds its drone in place
    let held = matches!((drone_before, lookup(&world, "/storage/drone")), (Ok(a), Ok(b)) if a == b);
    results.push(TestResult {
        name: "integrators_paused_holds".into(),
        passed: held,
        detail: "drone unchanged after 100 ticks".into(),
    });

    // Pulse controls on a paused object survive until it advances
    let drone = world.find_path("/storage/drone");
    let pulse = drone.and_then(|d| {
        world.use_control(d, 0, 2.5)?;
        world.tick(DT)?;
        Ok(world.controls(d).and_then(|c| c.control(0)))
    });
    results.push(TestResult {
        name: "integrators_paused_pulse_persists".into(),
        passed: pulse == Ok(Some(2.5)),
        detail: format!("thrust after paused tick: {:?}", pulse),
    });

    results.push(TestResult {
        name: "integrators_tick_count".into(),
        passed: world.ticks() == 101,
        detail: format!("{} ticks", world.ticks()),
    });

    results
}

// ── 4. Physics & Contacts ───────────────────────────────────────────────

fn validate_physics(verbose: bool) -> Vec<TestResult> {
    println!("--- Physics & Contacts ---");
    let mut results = Vec::new();

    let mut world = match load_workshop() {
        Ok(w) => w,
        Err(e) => {
            results.push(TestResult { name: "physics_load".into(), passed: false, detail: e });
            return results;
        }
    };
    let Ok(crate_) = world.find_path("/crate") else {
        results.push(TestResult {
            name: "physics_crate".into(),
            passed: false,
            detail: "no /crate".into(),
        });
        return results;
    };

    let mut created = 0;
    let mut max_live = 0;
    for _ in 0..300 {
        if let Err(e) = world.tick(DT) {
            results.push(TestResult {
                name: "physics_run".into(),
                passed: false,
                detail: format!("tick error: {}", e),
            });
            return results;
        }
        created += world.last_contact_report().created;
        let live = world.collision_sync().map(|s| s.contacts().len()).unwrap_or(0);
        max_live = max_live.max(live);
    }

    let z = world.absolute_pose(crate_).map(|p| p.loc.z).unwrap_or(f64::NAN);
    results.push(TestResult {
        name: "physics_crate_rests_on_floor".into(),
        passed: (0.35..0.65).contains(&z),
        detail: format!("crate centre at z = {:.3}", z),
    });
    results.push(TestResult {
        name: "physics_contacts_created".into(),
        passed: created > 0 && max_live >= 1,
        detail: format!("{} contact pairs created, {} live at most", created, max_live),
    });

    // Lifting the crate clear retires its contacts on the next pass
    let lifted = world
        .set_pose(crate_, Pose::from_loc(DVec3::new(2.0, 2.0, 5.0)))
        .and_then(|_| world.tick(DT));
    let report = world.last_contact_report();
    results.push(TestResult {
        name: "physics_contacts_retired".into(),
        passed: lifted.is_ok() && report.retired >= 1,
        detail: format!("{:?}", report),
    });

    // Random drops onto the floor never tunnel through it
    let mut rng = StdRng::seed_from_u64(42);
    let mut drops = World::with_physics(WorldConfig::default());
    let root = drops.root();
    let mut balls = Vec::new();
    let setup = (|| -> Result<(), WorldError> {
        drops.spawn_in(root, ObjectDesc::named("floor").with_geometry(Geometry::new(Shape::ground())))?;
        drops.enable_collisions()?;
        for i in 0..12 {
            let radius = rng.gen_range(0.2..0.5);
            let loc = DVec3::new(i as f64 * 1.5, rng.gen_range(-0.2..0.2), rng.gen_range(1.0..3.0));
            let b = drops.spawn_in(
                root,
                ObjectDesc::new()
                    .with_locator(Locator::engine(Pose::from_loc(loc), Inertia::new(1.0, 0.4 * radius * radius)))
                    .with_geometry(Geometry::new(Shape::sphere(radius))),
            )?;
            drops.activate(b)?;
            balls.push((b, radius));
        }
        run(&mut drops, 300)
    })();
    let lowest = balls
        .iter()
        .map(|&(b, r)| drops.absolute_pose(b).map(|p| p.loc.z - r).unwrap_or(f64::NEG_INFINITY))
        .fold(f64::INFINITY, f64::min);
    results.push(TestResult {
        name: "physics_random_drops".into(),
        passed: setup.is_ok() && lowest > -0.1,
        detail: format!("{} balls, lowest surface at z = {:.3}", balls.len(), lowest),
    });

    if verbose {
        if let Some(engine) = world.physics() {
            println!("  Engine: {} bodies, {} joints", engine.body_count(), engine.joint_count());
        }
    }

    results
}

// ── 5. Connectors ───────────────────────────────────────────────────────

fn validate_connectors(_verbose: bool) -> Vec<TestResult> {
    println!("--- Connectors ---");
    let mut results = Vec::new();

    let mut world = match load_workshop() {
        Ok(w) => w,
        Err(e) => {
            results.push(TestResult { name: "connectors_load".into(), passed: false, detail: e });
            return results;
        }
    };
    let (Ok(post), Ok(arm)) = (world.find_path("/rig/post"), world.find_path("/rig/arm")) else {
        results.push(TestResult {
            name: "connectors_lookup".into(),
            passed: false,
            detail: "rig objects missing".into(),
        });
        return results;
    };
    let post_c = ConnectorRef::new(post, 0);
    let arm_c = ConnectorRef::new(arm, 0);

    // Drive the motor into its stop
    let driven = (|| -> Result<f64, WorldError> {
        world.use_connector_control(post_c, hinge::FORCE_FACTOR, 1.0)?;
        world.use_connector_control(post_c, hinge::VELOCITY, 3.0)?;
        run(&mut world, 200)?;
        world.connector_sensor(post_c, hinge::ANGLE)
    })();
    let angle = driven.unwrap_or(f64::NAN);
    let limit = std::f64::consts::FRAC_PI_2;
    results.push(TestResult {
        name: "connectors_motor_reaches_stop".into(),
        passed: angle.abs() > limit - 0.1 && angle.abs() < limit + 0.1,
        detail: format!("hinge angle {:.3} (stop {:.3})", angle, limit),
    });

    // Only the authoritative side reports
    let subordinate = world.connector_sensor(arm_c, hinge::ANGLE);
    results.push(TestResult {
        name: "connectors_subordinate_reads_zero".into(),
        passed: subordinate == Ok(0.0),
        detail: format!("{:?}", subordinate),
    });

    // Disconnecting from the subordinate side is refused
    let refused = world.disconnect(arm_c).is_err();
    let freed = world.disconnect(post_c).is_ok();
    let joints = world.physics().map(|p| p.joint_count()).unwrap_or(usize::MAX);
    results.push(TestResult {
        name: "connectors_disconnect".into(),
        passed: refused && freed && !world.connector(arm_c).map(|c| c.is_paired()).unwrap_or(true),
        detail: format!("refused={} freed={} joints left={}", refused, freed, joints),
    });

    // Released, the arm falls
    let z0 = world.absolute_pose(arm).map(|p| p.loc.z).unwrap_or(f64::NAN);
    let fell = run(&mut world, 20).is_ok();
    let z1 = world.absolute_pose(arm).map(|p| p.loc.z).unwrap_or(f64::NAN);
    results.push(TestResult {
        name: "connectors_released_arm_falls".into(),
        passed: fell && z1 < z0 - 0.05,
        detail: format!("z {:.3} -> {:.3}", z0, z1),
    });

    // Reconnecting snaps the arm back onto the post
    let rejoined = world.connect(post_c, arm_c, Align::MoveReceiver).is_ok();
    let gap = match (world.connector_pose(post_c), world.connector_pose(arm_c)) {
        (Ok(a), Ok(b)) => (a.loc - b.loc).length(),
        _ => f64::NAN,
    };
    results.push(TestResult {
        name: "connectors_reconnect".into(),
        passed: rejoined && gap < 1.0e-9,
        detail: format!("rejoined={} gap={:.2e}", rejoined, gap),
    });

    results
}

// ── 6. Snapshots ────────────────────────────────────────────────────────

fn validate_snapshots(verbose: bool) -> Vec<TestResult> {
    println!("--- Snapshots ---");
    let mut results = Vec::new();

    let mut world = match load_workshop() {
        Ok(w) => w,
        Err(e) => {
            results.push(TestResult { name: "snapshots_load".into(), passed: false, detail: e });
            return results;
        }
    };
    let all = PropertyMask::LOCATOR | PropertyMask::ACTOR_SENSORS;
    let text = world.write_snapshot(world.root(), all);
    let records = text.lines().count().saturating_sub(2);
    results.push(TestResult {
        name: "snapshots_written".into(),
        passed: records >= 9,
        detail: format!("{} records", records),
    });
    if verbose {
        for line in text.lines().take(4) {
            println!("    {}", line);
        }
    }

    // Perturb, then read the snapshot back
    let crate_ = world.find_path("/crate");
    let before = crate_.clone().and_then(|c| world.relative_pose(c));
    let restored = crate_.clone().and_then(|c| {
        world.set_pose(c, Pose::from_loc(DVec3::new(9.0, 9.0, 9.0)))?;
        Ok(world.read_snapshot(&text, all))
    });
    let after = crate_.and_then(|c| world.relative_pose(c));
    let exact = matches!((&before, &after), (Ok(a), Ok(b)) if a.abs_diff_eq(b, 1.0e-12));
    results.push(TestResult {
        name: "snapshots_restore_pose".into(),
        passed: exact && matches!(&restored, Ok(Ok(s)) if s.skipped == 0),
        detail: format!("{:?}", restored),
    });

    // A truncated block is rejected whole
    let cut: String = text.lines().take(3).map(|l| format!("{}\n", l)).collect();
    let rejected = world.read_snapshot(&cut, all).is_err();
    results.push(TestResult {
        name: "snapshots_reject_truncated".into(),
        passed: rejected,
        detail: "block without trailer".into(),
    });

    // Record a second of motion and replay it into a fresh world
    let mut recorder = Recorder::new(PropertyMask::LOCATOR);
    let mut trail = Vec::new();
    let recorded = (|| -> Result<(), WorldError> {
        let c = world.find_path("/crate")?;
        for _ in 0..100 {
            world.tick(DT)?;
            recorder.record(&world, world.root());
            trail.push(world.relative_pose(c)?.loc);
        }
        Ok(())
    })();
    let replay = load_workshop().and_then(|mut fresh| {
        let c = fresh.find_path("/crate").map_err(|e| e.to_string())?;
        let mut playback = Playback::new(recorder.as_str(), PropertyMask::LOCATOR);
        let mut worst: f64 = 0.0;
        for expected in &trail {
            match playback.apply_next(&mut fresh) {
                Some(Ok(_)) => {}
                other => return Err(format!("playback stopped: {:?}", other.map(|r| r.map(|_| ())))),
            }
            let at = fresh.relative_pose(c).map_err(|e| e.to_string())?.loc;
            worst = worst.max((at - *expected).length());
        }
        Ok(worst)
    });
    results.push(TestResult {
        name: "snapshots_playback".into(),
        passed: recorded.is_ok() && matches!(&replay, Ok(w) if *w < 1.0e-9),
        detail: format!("{} blocks, replay error {:?}", recorder.blocks(), replay),
    });

    results
}

// ── 7. Persistence ──────────────────────────────────────────────────────

fn validate_persistence(_verbose: bool) -> Vec<TestResult> {
    println!("--- Persistence ---");
    let mut results = Vec::new();

    let mut world = match load_workshop() {
        Ok(w) => w,
        Err(e) => {
            results.push(TestResult { name: "persistence_load".into(), passed: false, detail: e });
            return results;
        }
    };
    if let Err(e) = run(&mut world, 50) {
        results.push(TestResult {
            name: "persistence_run".into(),
            passed: false,
            detail: format!("tick error: {}", e),
        });
        return results;
    }

    // Binary save
    let mut buf = Vec::new();
    let saved = world.save(&mut buf);
    let loaded = World::load(&buf[..]);
    let same = match &loaded {
        Ok(copy) => ["/crate", "/rig/arm", "/cart/beacon"].iter().all(|p| {
            let a = world.find_path(p).and_then(|e| world.absolute_pose(e));
            let b = copy.find_path(p).and_then(|e| copy.absolute_pose(e));
            matches!((a, b), (Ok(a), Ok(b)) if a.abs_diff_eq(&b, 1.0e-9))
        }),
        Err(_) => false,
    };
    results.push(TestResult {
        name: "persistence_bincode_roundtrip".into(),
        passed: saved.is_ok() && same,
        detail: format!("{} bytes", buf.len()),
    });

    // JSON export parses back into an equal description
    let exported = world.to_scene();
    let reparsed = exported
        .as_ref()
        .ok()
        .and_then(|s| s.to_json().ok())
        .and_then(|json| SceneDesc::from_json(&json).ok());
    let equal = matches!((&exported, &reparsed), (Ok(a), Some(b)) if a == b);
    results.push(TestResult {
        name: "persistence_json_roundtrip".into(),
        passed: equal,
        detail: format!(
            "{} connections exported",
            exported.as_ref().map(|s| s.connections.len()).unwrap_or(0)
        ),
    });

    // A loaded world keeps ticking
    let resumed = loaded.map_err(|e| e.to_string()).and_then(|mut w| {
        run(&mut w, 10).map_err(|e| e.to_string())?;
        Ok(w.ticks())
    });
    results.push(TestResult {
        name: "persistence_resume".into(),
        passed: resumed == Ok(60),
        detail: format!("{:?}", resumed),
    });
    info!("persistence checks done");

    results
}

// ── 8. Rendering Contract ───────────────────────────────────────────────

fn validate_rendering(verbose: bool) -> Vec<TestResult> {
    println!("--- Rendering Contract ---");
    let mut results = Vec::new();

    let world = match load_workshop() {
        Ok(w) => w,
        Err(e) => {
            results.push(TestResult { name: "render_load".into(), passed: false, detail: e });
            return results;
        }
    };
    let items = match world.draw_list() {
        Ok(items) => items,
        Err(e) => {
            results.push(TestResult {
                name: "render_draw_list".into(),
                passed: false,
                detail: format!("{}", e),
            });
            return results;
        }
    };
    let names: Vec<String> = items.iter().filter_map(|i| world.name(i.object)).collect();
    let expected = ["floor", "post", "arm", "crate", "beacon"];
    results.push(TestResult {
        name: "render_draw_order".into(),
        passed: names == expected,
        detail: names.join(", "),
    });

    // Inner subspaces add lights and override toggles
    let post = items.iter().find(|i| world.name(i.object).as_deref() == Some("post"));
    let floor = items.iter().find(|i| world.name(i.object).as_deref() == Some("floor"));
    let composed = match (post, floor) {
        (Some(p), Some(f)) => {
            p.environment.lights.len() == 2
                && p.environment.toggles.get("fog") == Some(&true)
                && p.environment.toggles.get("shadows") == Some(&true)
                && f.environment.toggles.get("fog") == Some(&false)
        }
        _ => false,
    };
    results.push(TestResult {
        name: "render_environment_composition".into(),
        passed: composed,
        detail: "rig light and fog layered over the root".into(),
    });

    // One current view per rendering thread
    ViewRegistry::init();
    let main_view = ViewRegistry::set_current(ViewId(1));
    let worker = std::thread::spawn(|| ViewRegistry::set_current(ViewId(2)).map(|prev| (prev, ViewRegistry::current())))
        .join()
        .ok();
    let still_mine = ViewRegistry::current();
    ViewRegistry::teardown();
    let after_teardown = ViewRegistry::set_current(ViewId(3));
    results.push(TestResult {
        name: "render_view_registry".into(),
        passed: main_view == Ok(None)
            && worker == Some(Ok((None, Some(ViewId(2)))))
            && still_mine == Some(ViewId(1))
            && after_teardown.is_err(),
        detail: format!("main={:?} worker={:?} after={:?}", still_mine, worker, after_teardown),
    });

    if verbose {
        for item in &items {
            println!("    {:?} at {}", world.name(item.object), item.transform.w_axis.truncate());
        }
    }

    results
}
