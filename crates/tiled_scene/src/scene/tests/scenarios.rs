use std::sync::Arc;

use approx::assert_relative_eq;

use super::{build, config, unit_box, TestHooks};
use crate::foundation::math::{utils, Transform, Vec3, Vec4};
use crate::scene::packer::{region_size, INSTANCE_STRIDE};
use crate::scene::{Light, ObjectKind, Projection, SceneError, SceneObject, ShadowSpec};
use crate::spatial::TileCoord;

fn white() -> Vec4 {
    Vec4::new(1.0, 1.0, 1.0, 1.0)
}

fn fill_every_tile(scene: &mut crate::scene::Scene) -> usize {
    let mut added = 0;
    for x in 0..4 {
        for y in 0..4 {
            for z in 0..4 {
                let center = Vec3::new(12.5 + 25.0 * x as f32, 12.5 + 25.0 * y as f32, 12.5 + 25.0 * z as f32);
                scene
                    .add_object("crate", SceneObject::new(center).with_bounds(unit_box()))
                    .unwrap();
                added += 1;
            }
        }
    }
    added
}

#[test]
fn test_grid_dimensions_and_tile_lookup() {
    let grid = config().tile_grid().unwrap();
    assert_eq!(grid.dims(), [4, 4, 4]);
    assert_eq!(grid.tile_count(), 64);
    assert_eq!(grid.tile_coord(Vec3::new(99.0, 1.0, 1.0)), Some(TileCoord::new(3, 0, 0)));
    assert_eq!(grid.tile_coord(Vec3::new(99.0, 1.0, 1.0)), grid.tile_coord(Vec3::new(99.0, 1.0, 1.0)));
}

#[test]
fn test_tiles_partition_the_world() {
    let grid = config()
        .with_world(Vec3::new(-10.0, 0.0, 5.0), Vec3::new(90.0, 30.0, 60.0))
        .tile_grid()
        .unwrap();
    let world = grid.world_aabb();
    let boxes: Vec<_> = (0..grid.tile_count()).map(|i| grid.tile_aabb(grid.coord_of(i))).collect();

    let union = boxes.iter().skip(1).fold(boxes[0], |acc, b| acc.union(b));
    assert_relative_eq!(union.min, world.min);
    assert_relative_eq!(union.max, world.max);
    let total: f32 = boxes.iter().map(|b| b.volume()).sum();
    assert_relative_eq!(total, world.volume(), max_relative = 1e-5);
    for (i, a) in boxes.iter().enumerate() {
        for b in &boxes[i + 1..] {
            assert!(!a.overlaps_interior(b));
        }
    }
}

#[test]
fn test_instance_stride_and_region_size() {
    assert_eq!(INSTANCE_STRIDE, 80);
    assert_eq!(region_size(1_000_000), 80_000_000);
}

#[test]
fn test_spot_shadow_fov_is_twice_cutoff() {
    let (mut scene, _backend) = build(config(), Arc::new(TestHooks::default()), 1);
    let spot = Light::spot(Vec3::new(50.0, 90.0, 50.0), 45.0, white(), white(), white(), Vec4::zeros());
    let index = scene
        .add_light(spot, Some(ShadowSpec::default().with_range(0.1, 100.0)))
        .unwrap();

    let map = scene.shadows().map_for_light(index).unwrap();
    let fov = utils::rad_to_deg(2.0 * (1.0 / map.projection()[(1, 1)]).atan());
    assert_relative_eq!(fov, 90.0, epsilon = 1e-4);
    assert!(scene.lights()[index].casts_shadows());
    assert!(scene.shadow_map(index).is_some());
}

#[test]
fn test_point_light_shadows_rejected() {
    let (mut scene, backend) = build(config(), Arc::new(TestHooks::default()), 1);
    let point = Light::point(Vec3::new(50.0, 50.0, 50.0), white(), white(), white(), Vec4::new(1.0, 0.0, 0.0, 0.0));
    let result = scene.add_light(point, Some(ShadowSpec::default()));
    assert!(matches!(result, Err(SceneError::UnsupportedShadowLight(0))));
    assert!(scene.lights().is_empty());
    assert_eq!(backend.live_shadow_targets(), 0);
}

#[test]
fn test_object_visible_after_prepare() {
    let (mut scene, _backend) = build(config(), Arc::new(TestHooks::default()), 1);
    scene
        .add_object("crate", SceneObject::new(Vec3::new(12.0, 12.0, 12.0)).with_bounds(unit_box()))
        .unwrap();
    scene.prepare().unwrap();
    scene.update().unwrap();

    let category = scene.category("crate").unwrap();
    let visible = scene.visible().unwrap();
    assert!(visible.count(category) >= 1);
    assert!(visible.tiles().contains(&0));
}

#[test]
fn test_capacity_is_fixed_at_prepare() {
    let (mut scene, _backend) = build(config(), Arc::new(TestHooks::default()), 1);
    scene
        .add_object("crate", SceneObject::new(Vec3::new(12.0, 12.0, 12.0)))
        .unwrap();
    scene.reserve("crate", ObjectKind::Static, 1).unwrap();
    scene.prepare().unwrap();

    // The reserved slot is usable, the next one is not
    scene
        .add_object("crate", SceneObject::new(Vec3::new(60.0, 12.0, 12.0)))
        .unwrap();
    let result = scene.add_object("crate", SceneObject::new(Vec3::new(80.0, 12.0, 12.0)));
    assert!(matches!(result, Err(SceneError::CapacityExceeded { capacity: 2, .. })));

    let category = scene.category("crate").unwrap();
    assert_eq!(scene.category_counts(category).static_count, 2);
}

#[test]
fn test_object_outside_world_rejected() {
    let (mut scene, _backend) = build(config(), Arc::new(TestHooks::default()), 1);
    let result = scene.add_object("crate", SceneObject::new(Vec3::new(150.0, 0.0, 0.0)));
    assert!(matches!(result, Err(SceneError::OutOfBounds { .. })));
}

#[test]
fn test_static_object_added_after_prepare_becomes_visible() {
    let (mut scene, _backend) = build(config(), Arc::new(TestHooks::default()), 1);
    scene
        .add_object("crate", SceneObject::new(Vec3::new(12.0, 12.0, 12.0)).with_bounds(unit_box()))
        .unwrap();
    scene.reserve("crate", ObjectKind::Static, 1).unwrap();
    scene.prepare().unwrap();
    scene.update().unwrap();
    scene.draw().unwrap();

    scene
        .add_object("crate", SceneObject::new(Vec3::new(13.0, 12.0, 12.0)).with_bounds(unit_box()))
        .unwrap();
    scene.update().unwrap();
    let category = scene.category("crate").unwrap();
    assert_eq!(scene.visible().unwrap().count(category), 2);
}

#[test]
fn test_dynamic_packing_is_idempotent() {
    let (mut scene, backend) = build(config(), Arc::new(TestHooks::default()), 1);
    for i in 0..4 {
        let position = Vec3::new(20.0 + 10.0 * i as f32, 50.0, 50.0);
        scene
            .add_object("drone", SceneObject::new(position).with_bounds(unit_box()).dynamic())
            .unwrap();
    }
    scene.prepare().unwrap();
    scene.update().unwrap();
    scene.draw().unwrap();
    let (buffer, _) = scene.dynamic_instance_buffer().unwrap();
    let first = backend.buffer_contents(buffer).unwrap();

    // Move the camera away and back: the data is repacked from scratch
    let home = scene.camera().position();
    scene.camera_mut().translate(Vec3::new(0.0, 0.0, 5.0));
    scene.update().unwrap();
    scene.draw().unwrap();
    scene.camera_mut().set_position(home);
    scene.update().unwrap();
    scene.draw().unwrap();

    assert_eq!(backend.buffer_contents(buffer).unwrap(), first);
    assert_eq!(scene.dynamic_objects().len(), 4);
}

#[test]
fn test_cache_never_exceeds_capacity() {
    let (mut scene, backend) = build(config().with_tile_levels(1).with_cache(2, 0), Arc::new(TestHooks::default()), 1);
    fill_every_tile(&mut scene);
    scene.prepare().unwrap();

    for yaw in [0.0, 180.0, 0.0, 90.0, 180.0, 270.0, 0.0] {
        scene.camera_mut().set_rotation(Vec3::new(0.0, yaw, 0.0));
        scene.update().unwrap();
        scene.draw().unwrap();
        assert!(scene.cached_nodes() <= 2);
    }
    assert!(scene.cache_stats().evictions > 0);
    assert!(backend.violations().is_empty());
}

#[test]
fn test_returning_view_reuses_cached_secondaries() {
    let (mut scene, backend) = build(config().with_tile_levels(1).with_cache(64, 0), Arc::new(TestHooks::default()), 1);
    fill_every_tile(&mut scene);
    scene.prepare().unwrap();

    scene.update().unwrap();
    scene.draw().unwrap();
    let visible = scene.visible().unwrap().len();
    assert!(visible > 0);
    let recorded = scene.secondaries_recorded();
    let allocated = backend.command_buffers_allocated();

    scene.camera_mut().set_rotation(Vec3::new(0.0, 180.0, 0.0));
    scene.update().unwrap();
    scene.draw().unwrap();
    assert!(scene.visible().unwrap().is_empty());
    assert_eq!(scene.cached_nodes(), visible);

    scene.camera_mut().set_rotation(Vec3::zeros());
    scene.update().unwrap();
    scene.draw().unwrap();
    assert_eq!(scene.secondaries_recorded(), recorded);
    assert_eq!(scene.cache_stats().hits, visible as u64);
    assert_eq!(backend.command_buffers_allocated(), allocated);
}

#[test]
fn test_warming_records_neighbors_ahead() {
    let (mut scene, _backend) = build(config().with_tile_levels(1).with_cache(64, 1), Arc::new(TestHooks::default()), 1);
    fill_every_tile(&mut scene);
    // Only the z = 100 slice of tiles is in range
    scene.camera_mut().set_projection(Projection::new(60.0, 4.0 / 3.0, 0.1, 60.0));
    scene.prepare().unwrap();
    scene.update().unwrap();

    let visible = scene.visible().unwrap().len();
    assert!(scene.cached_nodes() > 0);
    assert_eq!(scene.secondaries_recorded(), (visible + scene.cached_nodes()) as u64);
}

#[test]
fn test_moving_static_object_rebuilds_layout() {
    let (mut scene, _backend) = build(config(), Arc::new(TestHooks::default()), 1);
    let key = scene
        .add_object("crate", SceneObject::new(Vec3::new(12.0, 12.0, 12.0)).with_bounds(unit_box()))
        .unwrap();
    scene.prepare().unwrap();
    scene.update().unwrap();
    scene.draw().unwrap();

    scene
        .move_object(key, Transform::from_position(Vec3::new(62.0, 12.0, 12.0)))
        .unwrap();
    scene.update().unwrap();
    assert_eq!(scene.object(key).unwrap().tile(), Some(2));
    assert!(scene.visible().unwrap().tiles().contains(&2));
    assert!(!scene.visible().unwrap().tiles().contains(&0));
}
