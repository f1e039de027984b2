use std::sync::Arc;

use super::{build, config, unit_box, TestHooks};
use crate::foundation::math::{Transform, Vec3, Vec4};
use crate::render::backends::RecordedCommand;
use crate::scene::light::LIGHT_RECORD_SIZE;
use crate::scene::{
    step_camera, FramePhase, InstanceRecord, Light, SceneError, SceneObject, ShadowCasterRecord, ShadowSpec,
};

fn white() -> Vec4 {
    Vec4::new(1.0, 1.0, 1.0, 1.0)
}

fn spot() -> Light {
    Light::spot(Vec3::new(50.0, 95.0, 50.0), 40.0, white(), white(), white(), Vec4::new(1.0, 0.0, 0.0, 0.0))
}

fn populate(scene: &mut crate::scene::Scene) {
    for i in 0..6 {
        let position = Vec3::new(10.0 + 15.0 * i as f32, 20.0, 50.0);
        scene
            .add_object("crate", SceneObject::new(position).with_bounds(unit_box()))
            .unwrap();
    }
}

#[test]
fn test_draw_requires_update() {
    let (mut scene, _backend) = build(config(), Arc::new(TestHooks::default()), 1);
    assert!(matches!(scene.update(), Err(SceneError::InvalidOperation { .. })));

    populate(&mut scene);
    scene.prepare().unwrap();
    assert!(matches!(scene.draw(), Err(SceneError::InvalidOperation { .. })));

    scene.update().unwrap();
    assert_eq!(scene.phase(), FramePhase::Recorded);
    scene.draw().unwrap();
    assert_eq!(scene.phase(), FramePhase::Submitted);
    assert!(matches!(scene.draw(), Err(SceneError::InvalidOperation { .. })));
}

#[test]
fn test_lights_must_precede_prepare() {
    let (mut scene, _backend) = build(config(), Arc::new(TestHooks::default()), 1);
    scene.prepare().unwrap();
    let result = scene.add_light(spot(), None);
    assert!(matches!(result, Err(SceneError::InvalidOperation { .. })));
    assert!(matches!(scene.prepare(), Err(SceneError::InvalidOperation { .. })));
}

#[test]
fn test_passes_chained_by_semaphores() {
    let (mut scene, backend) = build(config(), Arc::new(TestHooks::default()), 1);
    populate(&mut scene);
    scene.add_light(spot(), Some(ShadowSpec::default())).unwrap();
    scene.prepare().unwrap();
    scene.update().unwrap();
    let done = scene.draw().unwrap();

    let submissions = backend.submissions();
    assert_eq!(submissions.len(), 4);
    let [update, shadows, color, dynamic] = [&submissions[0], &submissions[1], &submissions[2], &submissions[3]];

    assert!(update.wait.is_empty());
    assert_eq!(shadows.command_buffers, vec![scene.shadows().maps()[0].command_buffer()]);
    assert_eq!(shadows.wait[0].0, update.signal[0]);

    let frame = *scene.frame_state(0).unwrap();
    assert_eq!(color.command_buffers, vec![frame.static_cmd]);
    assert_eq!(color.wait[0].0, shadows.signal[0]);
    assert_eq!(dynamic.command_buffers, vec![frame.dynamic_cmd]);
    assert_eq!(dynamic.wait[0].0, color.signal[0]);

    // Only the last scene submission carries the fence
    assert!(submissions[..3].iter().all(|s| s.fence.is_none()));
    assert!(dynamic.fence.is_some());
    assert_eq!(done, dynamic.signal[0]);
    assert!(backend.violations().is_empty());
}

#[test]
fn test_postprocess_extends_chain() {
    let (mut scene, backend) = build(config(), Arc::new(TestHooks::with_postprocess()), 1);
    populate(&mut scene);
    scene.prepare().unwrap();
    scene.update().unwrap();
    let done = scene.draw().unwrap();

    // No lights and nothing from the host: no update submission
    let submissions = backend.submissions();
    assert_eq!(submissions.len(), 3);
    let (dynamic, post) = (&submissions[1], &submissions[2]);
    assert_eq!(post.wait[0].0, dynamic.signal[0]);
    assert_eq!(done, post.signal[0]);
}

#[test]
fn test_unchanged_frame_reuses_recording() {
    let hooks = Arc::new(TestHooks::default());
    let (mut scene, backend) = build(config(), hooks.clone(), 1);
    populate(&mut scene);
    scene.prepare().unwrap();
    scene.update().unwrap();
    scene.draw().unwrap();

    let frame = *scene.frame_state(0).unwrap();
    let static_calls = TestHooks::count(&hooks.static_calls);
    let recorded = scene.secondaries_recorded();
    assert!(static_calls > 0);
    backend.take_submissions();

    for _ in 0..3 {
        scene.update().unwrap();
        scene.draw().unwrap();
    }
    assert_eq!(backend.times_recorded(frame.static_cmd), 1);
    assert_eq!(backend.times_recorded(frame.dynamic_cmd), 1);
    assert_eq!(TestHooks::count(&hooks.static_calls), static_calls);
    assert_eq!(scene.secondaries_recorded(), recorded);
    assert_eq!(scene.visibility_recomputations(), 1);
    assert_eq!(TestHooks::count(&hooks.update_calls), 4);

    // Resubmitted unchanged: static then dynamic, every frame
    let submissions = backend.take_submissions();
    assert_eq!(submissions.len(), 6);
    assert!(submissions.chunks(2).all(|pair| pair[0].command_buffers == vec![frame.static_cmd]));
}

#[test]
fn test_camera_move_rerecords_primaries() {
    let (mut scene, backend) = build(config(), Arc::new(TestHooks::default()), 1);
    populate(&mut scene);
    scene.prepare().unwrap();
    scene.update().unwrap();
    scene.draw().unwrap();

    scene.camera_mut().translate(Vec3::new(1.0, 0.0, 0.0));
    scene.update().unwrap();
    scene.draw().unwrap();

    let frame = *scene.frame_state(0).unwrap();
    assert_eq!(backend.times_recorded(frame.static_cmd), 2);
    assert_eq!(scene.visibility_recomputations(), 2);

    let executed: Vec<_> = backend
        .commands(frame.static_cmd)
        .into_iter()
        .filter_map(|command| match command {
            RecordedCommand::ExecuteCommands(secondaries) => Some(secondaries),
            _ => None,
        })
        .collect();
    assert_eq!(executed.len(), 1);
    assert_eq!(executed[0].len(), scene.visible().unwrap().len());
}

#[test]
fn test_frame_slots_recorded_independently() {
    let (mut scene, backend) = build(config(), Arc::new(TestHooks::default()), 2);
    populate(&mut scene);
    scene.prepare().unwrap();
    assert!(scene.set_frame_slot(2).is_err());

    scene.update().unwrap();
    scene.draw().unwrap();
    scene.set_frame_slot(1).unwrap();
    scene.update().unwrap();
    scene.draw().unwrap();
    scene.set_frame_slot(0).unwrap();
    scene.update().unwrap();
    scene.draw().unwrap();

    let slot0 = *scene.frame_state(0).unwrap();
    let slot1 = *scene.frame_state(1).unwrap();
    assert_ne!(slot0.static_cmd, slot1.static_cmd);
    assert_eq!(backend.times_recorded(slot0.static_cmd), 1);
    assert_eq!(backend.times_recorded(slot1.static_cmd), 1);
    assert!(!slot0.needs_record && !slot1.needs_record);
}

#[test]
fn test_light_buffer_uploaded_through_update_pass() {
    let (mut scene, backend) = build(config(), Arc::new(TestHooks::default()), 1);
    populate(&mut scene);
    let index = scene.add_light(spot(), Some(ShadowSpec::default())).unwrap();
    scene.prepare().unwrap();
    scene.update().unwrap();
    scene.draw().unwrap();

    let (buffer, layout) = scene.light_buffer().unwrap();
    let contents = backend.buffer_contents(buffer).unwrap();
    let light = scene.lights()[index].record();
    let offset = layout.light_offset(index) as usize;
    assert_eq!(&contents[offset..offset + LIGHT_RECORD_SIZE as usize], bytemuck::bytes_of(&light));

    let shadow = scene.shadows().maps()[0].record();
    let shadow_offset = layout.shadow_record_offset(index) as usize;
    assert_eq!(shadow_offset % 256, 0);
    assert_eq!(
        &contents[shadow_offset..shadow_offset + std::mem::size_of_val(&shadow)],
        bytemuck::bytes_of(&shadow)
    );

    // A color change rewrites the buffer without re-rendering the shadow map
    backend.take_submissions();
    scene.light_mut(index).unwrap().set_diffuse(Vec4::new(1.0, 0.0, 0.0, 1.0));
    scene.update().unwrap();
    scene.draw().unwrap();
    let submissions = backend.take_submissions();
    assert_eq!(submissions.len(), 3);
    assert_eq!(submissions[1].wait[0].0, submissions[0].signal[0]);
    let contents = backend.buffer_contents(buffer).unwrap();
    let light = scene.lights()[index].record();
    assert_eq!(&contents[offset..offset + LIGHT_RECORD_SIZE as usize], bytemuck::bytes_of(&light));
}

#[test]
fn test_moving_light_rerenders_shadow_map() {
    let hooks = Arc::new(TestHooks::default());
    let (mut scene, backend) = build(config(), hooks.clone(), 1);
    populate(&mut scene);
    scene
        .add_light(spot(), Some(ShadowSpec::default().with_skip_frames(1)))
        .unwrap();
    scene.prepare().unwrap();
    let map_cmd = scene.shadows().maps()[0].command_buffer();

    // Every render is held back by one frame
    scene.update().unwrap();
    scene.draw().unwrap();
    assert_eq!(backend.times_recorded(map_cmd), 0);
    scene.update().unwrap();
    scene.draw().unwrap();
    assert_eq!(backend.times_recorded(map_cmd), 1);
    scene.update().unwrap();
    scene.draw().unwrap();
    assert_eq!(backend.times_recorded(map_cmd), 1);

    scene.light_mut(0).unwrap().set_position(Vec3::new(40.0, 95.0, 50.0));
    scene.update().unwrap();
    scene.draw().unwrap();
    assert_eq!(backend.times_recorded(map_cmd), 1);
    scene.update().unwrap();
    scene.draw().unwrap();
    assert_eq!(backend.times_recorded(map_cmd), 2);
    assert!(TestHooks::count(&hooks.shadow_calls) > 0);
}

#[test]
fn test_turning_light_uploads_its_dynamic_casters() {
    let (mut scene, backend) = build(config(), Arc::new(TestHooks::default()), 1);
    let near = Vec3::new(30.0, 10.0, 30.0);
    let far = Vec3::new(80.0, 10.0, 80.0);
    for position in [near, far] {
        scene
            .add_object("drone", SceneObject::new(position).with_bounds(unit_box()).dynamic())
            .unwrap();
    }
    let mut light = Light::spot(Vec3::new(50.0, 95.0, 50.0), 15.0, white(), white(), white(), Vec4::new(1.0, 0.0, 0.0, 0.0));
    light.look_at(near);
    scene.add_light(light, Some(ShadowSpec::default().with_range(0.1, 200.0))).unwrap();
    scene.prepare().unwrap();
    let (buffer, _) = scene.dynamic_caster_buffer().unwrap();
    let first_caster = |backend: &crate::render::backends::HeadlessBackend| {
        let contents = backend.buffer_contents(buffer).unwrap();
        let record: ShadowCasterRecord =
            bytemuck::pod_read_unaligned(&contents[..std::mem::size_of::<ShadowCasterRecord>()]);
        Vec3::new(record.model[3][0], record.model[3][1], record.model[3][2])
    };

    scene.update().unwrap();
    scene.draw().unwrap();
    assert_eq!(scene.shadows().maps()[0].dynamic().len(), 1);
    assert_eq!(first_caster(&backend), near);

    // Only the light changes: no dynamic object is dirty this frame
    scene.light_mut(0).unwrap().look_at(far);
    scene.update().unwrap();
    scene.draw().unwrap();
    assert_eq!(scene.shadows().maps()[0].dynamic().len(), 1);
    assert_eq!(first_caster(&backend), far);
}

#[test]
fn test_material_change_repacks_dynamic_instances() {
    let hooks = Arc::new(TestHooks::default());
    let (mut scene, backend) = build(config(), hooks.clone(), 1);
    let drone = scene
        .add_object("drone", SceneObject::new(Vec3::new(50.0, 50.0, 50.0)).with_bounds(unit_box()).dynamic())
        .unwrap();
    scene.prepare().unwrap();
    scene.update().unwrap();
    scene.draw().unwrap();
    assert!(scene.catalog().object(drone).unwrap().dirty().is_empty());

    let (buffer, _) = scene.dynamic_instance_buffer().unwrap();
    let material = |backend: &crate::render::backends::HeadlessBackend| {
        let contents = backend.buffer_contents(buffer).unwrap();
        let record: InstanceRecord = bytemuck::pod_read_unaligned(&contents[..std::mem::size_of::<InstanceRecord>()]);
        record.material_index
    };
    let before = material(&backend);

    scene.set_material_base(drone, 3).unwrap();
    assert!(scene.catalog().dynamic_dirty());
    scene.update().unwrap();
    scene.draw().unwrap();

    assert_eq!(material(&backend), before + 3);
    assert_eq!(TestHooks::count(&hooks.dynamic_calls), 2);
    assert!(scene.catalog().object(drone).unwrap().dirty().is_empty());
    assert!(matches!(
        scene.set_material_base(crate::scene::ObjectKey::default(), 1),
        Err(SceneError::UnknownObject)
    ));
}

#[test]
fn test_dynamic_objects_repacked_when_moved() {
    let hooks = Arc::new(TestHooks::default());
    let (mut scene, backend) = build(config(), hooks.clone(), 1);
    populate(&mut scene);
    let drone = scene
        .add_object("drone", SceneObject::new(Vec3::new(50.0, 50.0, 50.0)).with_bounds(unit_box()).dynamic())
        .unwrap();
    scene.prepare().unwrap();
    scene.update().unwrap();
    scene.draw().unwrap();

    assert_eq!(scene.dynamic_objects(), &[drone]);
    assert_eq!(scene.dynamic_sets().total_count(), 1);
    let (buffer, _) = scene.dynamic_instance_buffer().unwrap();
    let before = backend.buffer_contents(buffer).unwrap();
    let frame = *scene.frame_state(0).unwrap();

    scene
        .move_object(drone, Transform::from_position(Vec3::new(60.0, 50.0, 50.0)))
        .unwrap();
    scene.update().unwrap();
    scene.draw().unwrap();

    assert_ne!(backend.buffer_contents(buffer).unwrap(), before);
    assert_eq!(backend.times_recorded(frame.dynamic_cmd), 2);
    assert_eq!(TestHooks::count(&hooks.dynamic_calls), 2);
    // Static secondaries are untouched by dynamic motion
    assert_eq!(scene.visibility_recomputations(), 1);
}

#[test]
fn test_parallel_recording_matches_inline() {
    let inline_hooks = Arc::new(TestHooks::default());
    let (mut inline, _b1) = build(config(), inline_hooks.clone(), 1);
    let threaded_hooks = Arc::new(TestHooks::default());
    let (mut threaded, b2) = build(config().with_worker_threads(3), threaded_hooks.clone(), 1);
    for scene in [&mut inline, &mut threaded] {
        populate(scene);
        scene.prepare().unwrap();
        scene.update().unwrap();
        scene.draw().unwrap();
    }

    assert_eq!(inline.secondaries_recorded(), threaded.secondaries_recorded());
    assert_eq!(
        TestHooks::count(&inline_hooks.static_calls),
        TestHooks::count(&threaded_hooks.static_calls)
    );
    assert!(b2.violations().is_empty());
}

#[test]
fn test_camera_collision_reverts_step() {
    let (mut scene, _backend) = build(config(), Arc::new(TestHooks::default()), 1);
    let pillar = scene
        .add_object(
            "pillar",
            SceneObject::new(Vec3::new(50.0, 50.0, 50.0))
                .with_bounds(unit_box())
                .with_mesh_bounds(vec![unit_box()]),
        )
        .unwrap();
    scene.camera_mut().set_position(Vec3::new(50.0, 50.0, 48.0));
    assert_eq!(scene.check_camera_collision(), None);

    assert_eq!(step_camera(&mut scene, Vec3::new(0.0, 0.0, 1.5)), Some(pillar));
    assert_eq!(scene.camera().position(), Vec3::new(50.0, 50.0, 48.0));
    assert_eq!(step_camera(&mut scene, Vec3::new(0.0, 0.0, -1.0)), None);
    assert_eq!(scene.camera().position(), Vec3::new(50.0, 50.0, 47.0));
}

#[test]
fn test_drop_releases_gpu_resources() {
    let (mut scene, backend) = build(config().with_cache(4, 1), Arc::new(TestHooks::default()), 2);
    populate(&mut scene);
    scene.add_light(spot(), Some(ShadowSpec::default())).unwrap();
    scene.prepare().unwrap();
    for _ in 0..3 {
        scene.camera_mut().rotate(Vec3::new(0.0, 30.0, 0.0));
        scene.update().unwrap();
        scene.draw().unwrap();
    }
    assert!(backend.live_command_buffers() > 0);

    drop(scene);
    assert_eq!(backend.live_command_buffers(), 0);
    assert_eq!(backend.live_buffers(), 0);
    assert_eq!(backend.live_shadow_targets(), 0);
}
