//! Systems keeping anchored entities and their globe poses in sync

use bevy::prelude::*;

use crate::anchor::components::{GlobeAnchor, globe_matrix_from_local};
use crate::anchor::resources::WorldOrigin;
use crate::georeference::components::Georeference;
use crate::georeference::resolver::resolve_georeference;

/// Published after the plugin writes an anchored entity's `Transform`.
///
/// `teleport` mirrors the anchor's flag: physics integrations should move the
/// body instantly without synthesizing a velocity from the jump when it is
/// set.
#[derive(Message, Debug, Clone, Copy)]
pub struct AnchorTransformSynced {
    pub entity: Entity,
    pub teleport: bool,
}

/// Ensure every anchor has a live resolved georeference, re-resolving when
/// the cached one died or the designation changed. Switching to a different
/// live georeference re-derives the local pose from the globe pose, which
/// stays authoritative.
pub fn resolve_anchor_georeferences(
    mut commands: Commands,
    origin: Res<WorldOrigin>,
    georef_entities: Query<Entity, With<Georeference>>,
    georefs: Query<&Georeference>,
    mut anchors: Query<(&mut GlobeAnchor, &mut Transform)>,
) {
    for (mut anchor, mut transform) in &mut anchors {
        let previous = anchor
            .resolved_georeference()
            .filter(|entity| georef_entities.contains(*entity));
        let resolved = resolve_georeference(&mut anchor, &georef_entities, &mut commands);
        if previous == Some(resolved) {
            continue;
        }
        if !anchor.globe_transform().is_valid() {
            continue;
        }
        match georefs.get(resolved) {
            Ok(georef) => anchor.push_local_pose(georef, &mut transform, origin.offset),
            // Just spawned by the resolver and not yet flushed; its state is
            // the default.
            Err(_) => anchor.push_local_pose(&Georeference::default(), &mut transform, origin.offset),
        }
    }
}

/// Bring newly added anchors into a consistent state: a loaded (valid) globe
/// transform is authoritative and flows to the scalars and the local pose; an
/// invalid one is computed from the current local pose.
pub fn initialize_added_anchors(
    origin: Res<WorldOrigin>,
    georefs: Query<&Georeference>,
    mut anchors: Query<(&mut GlobeAnchor, &mut Transform), Added<GlobeAnchor>>,
) {
    for (mut anchor, mut transform) in &mut anchors {
        let Some(georef) = anchor
            .resolved_georeference()
            .and_then(|entity| georefs.get(entity).ok())
        else {
            continue;
        };
        if anchor.globe_transform().is_valid() {
            anchor.update_ecef_scalars();
            anchor.update_geodetic_scalars(georef.ellipsoid());
            anchor.push_local_pose(georef, &mut transform, origin.offset);
        } else {
            anchor.ensure_globe_transform(georef, &transform, origin.offset);
        }
    }
}

/// React to local pose changes from the host: recompute the globe transform
/// and the scalars, adjusting the orientation for curvature when enabled.
/// The anchor's own write-backs are recognized through the guard and consumed
/// without recomputation.
pub fn sync_anchor_transform_changes(
    origin: Res<WorldOrigin>,
    georefs: Query<&Georeference>,
    mut anchors: Query<(Entity, &mut GlobeAnchor, &mut Transform), Changed<Transform>>,
    mut synced: MessageWriter<AnchorTransformSynced>,
) {
    for (entity, mut anchor, mut transform) in &mut anchors {
        if anchor.take_transform_write_guard() {
            synced.write(AnchorTransformSynced {
                entity,
                teleport: anchor.teleport_when_updating_transform(),
            });
            continue;
        }
        let Some(georef) = anchor
            .resolved_georeference()
            .and_then(|entity| georefs.get(entity).ok())
        else {
            continue;
        };

        if !anchor.globe_transform().is_valid()
            || !anchor.adjust_orientation_for_globe_when_moving()
        {
            anchor.update_globe_from_local(georef, &transform, origin.offset);
            anchor.update_ecef_scalars();
            anchor.update_geodetic_scalars(georef.ellipsoid());
            continue;
        }

        let candidate = globe_matrix_from_local(georef, &transform, origin.offset);
        let installed = anchor.set_globe_transform(georef, candidate);
        anchor.update_ecef_scalars();
        anchor.update_geodetic_scalars(georef.ellipsoid());
        if !installed.abs_diff_eq(candidate, 1e-9) {
            anchor.push_local_pose(georef, &mut transform, origin.offset);
        }
    }
}

/// React to georeference edits (origin move, ellipsoid change): the globe
/// pose stays authoritative and only the local pose is re-derived. Scalars
/// are untouched. A georeference that was just added is skipped; anchors
/// initialize or switch against it through the other systems, and reacting
/// here as well would raise the write-back guard for nothing.
pub fn sync_georeference_changes(
    origin: Res<WorldOrigin>,
    changed_probe: Query<(), Changed<Georeference>>,
    georefs: Query<Ref<Georeference>>,
    mut anchors: Query<(&mut GlobeAnchor, &mut Transform)>,
) {
    if changed_probe.is_empty() {
        return;
    }
    for (mut anchor, mut transform) in &mut anchors {
        let Some(resolved) = anchor.resolved_georeference() else {
            continue;
        };
        let Ok(georef) = georefs.get(resolved) else {
            continue;
        };
        if !georef.is_changed() || georef.is_added() {
            continue;
        }
        if anchor.globe_transform().is_valid() {
            anchor.push_local_pose(&georef, &mut transform, origin.offset);
        }
    }
}

/// React to floating-origin re-basing: re-derive every anchored local pose
/// against the new offset. Globe transforms and scalars are untouched.
pub fn apply_world_origin_rebase(
    origin: Res<WorldOrigin>,
    georefs: Query<&Georeference>,
    mut anchors: Query<(&mut GlobeAnchor, &mut Transform)>,
) {
    if !origin.is_changed() || origin.is_added() {
        return;
    }
    for (mut anchor, mut transform) in &mut anchors {
        let Some(georef) = anchor
            .resolved_georeference()
            .and_then(|entity| georefs.get(entity).ok())
        else {
            continue;
        };
        if anchor.globe_transform().is_valid() {
            anchor.push_local_pose(georef, &mut transform, origin.offset);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anchor::GlobeAnchorPlugin;
    use crate::math::ellipsoid::Geodetic;
    use bevy::ecs::system::RunSystemOnce;
    use bevy::math::DVec3;

    /// Counts sync messages and remembers the last teleport flag.
    #[derive(Resource, Default)]
    struct SyncLog {
        count: usize,
        last_teleport: Option<bool>,
    }

    fn log_synced(mut reader: MessageReader<AnchorTransformSynced>, mut log: ResMut<SyncLog>) {
        for message in reader.read() {
            log.count += 1;
            log.last_teleport = Some(message.teleport);
        }
    }

    fn test_app() -> App {
        let mut app = App::new();
        app.add_plugins(GlobeAnchorPlugin)
            .init_resource::<SyncLog>()
            .add_systems(Last, log_synced);
        app
    }

    fn georeference_count(app: &mut App) -> usize {
        let mut query = app
            .world_mut()
            .query_filtered::<Entity, With<Georeference>>();
        query.iter(app.world()).count()
    }

    #[test]
    fn test_default_georeference_is_spawned_and_anchor_initialized() {
        let mut app = test_app();
        let entity = app.world_mut().spawn(GlobeAnchor::default()).id();
        app.update();

        assert_eq!(georeference_count(&mut app), 1);

        let anchor = app.world().get::<GlobeAnchor>(entity).unwrap();
        assert!(anchor.globe_transform().is_valid());
        let origin = Georeference::default().origin();
        assert!((anchor.longitude() - origin.longitude).abs() < 1e-9);
        assert!((anchor.latitude() - origin.latitude).abs() < 1e-9);
        assert!((anchor.height() - origin.height).abs() < 1e-4);
    }

    #[test]
    fn test_existing_georeference_is_reused() {
        let mut app = test_app();
        let georef = app
            .world_mut()
            .spawn(Georeference::from_origin(Geodetic::new(0.0, 0.0, 0.0)))
            .id();
        let entity = app.world_mut().spawn(GlobeAnchor::default()).id();
        app.update();

        assert_eq!(georeference_count(&mut app), 1);
        let anchor = app.world().get::<GlobeAnchor>(entity).unwrap();
        assert_eq!(anchor.resolved_georeference(), Some(georef));
        assert!(anchor.longitude().abs() < 1e-9);
        assert!(anchor.latitude().abs() < 1e-9);
    }

    #[test]
    fn test_host_edit_updates_scalars() {
        let mut app = test_app();
        app.world_mut()
            .spawn(Georeference::from_origin(Geodetic::new(0.0, 0.0, 0.0)));
        let mut anchor = GlobeAnchor::default();
        anchor.set_adjust_orientation_for_globe_when_moving(false);
        let entity = app.world_mut().spawn(anchor).id();
        app.update();

        // Raise the entity 1 km along local up.
        app.world_mut()
            .get_mut::<Transform>(entity)
            .unwrap()
            .translation
            .y = 1000.0;
        app.update();

        let anchor = app.world().get::<GlobeAnchor>(entity).unwrap();
        assert!((anchor.height() - 1000.0).abs() < 0.01);
        assert!(anchor.longitude().abs() < 1e-9);
        assert!(anchor.latitude().abs() < 1e-9);
    }

    #[test]
    fn test_external_edit_triggers_exactly_one_write_back() {
        let mut app = test_app();
        app.world_mut()
            .spawn(Georeference::from_origin(Geodetic::new(0.0, 0.0, 0.0)));
        let entity = app.world_mut().spawn(GlobeAnchor::default()).id();
        app.update();
        assert_eq!(app.world().resource::<SyncLog>().count, 0);

        // Move ~111 km east in local coordinates; curvature adjustment will
        // tilt the entity and write the adjusted pose back.
        app.world_mut()
            .get_mut::<Transform>(entity)
            .unwrap()
            .translation
            .x = 111_319.0;
        app.update();
        let after_edit = *app
            .world()
            .get::<GlobeAnchor>(entity)
            .unwrap()
            .globe_transform();

        // The guarded self-notification is consumed without recomputation and
        // produces the sync message.
        app.update();
        let log = app.world().resource::<SyncLog>();
        assert_eq!(log.count, 1);
        assert_eq!(log.last_teleport, Some(true));
        let after_guard = *app
            .world()
            .get::<GlobeAnchor>(entity)
            .unwrap()
            .globe_transform();
        assert_eq!(after_edit, after_guard);

        // And the pipeline is quiescent afterwards.
        app.update();
        assert_eq!(app.world().resource::<SyncLog>().count, 1);

        // The entity's orientation was tilted by about 1 degree of arc.
        let transform = app.world().get::<Transform>(entity).unwrap();
        let tilt = transform.rotation.angle_between(Quat::IDENTITY);
        assert!((f64::from(tilt) - 1.0_f64.to_radians()).abs() < 1e-3);
    }

    #[test]
    fn test_move_to_geodetic_through_systems() {
        let mut app = test_app();
        app.world_mut()
            .spawn(Georeference::from_origin(Geodetic::new(0.0, 0.0, 0.0)));
        let entity = app.world_mut().spawn(GlobeAnchor::default()).id();
        app.update();

        app.world_mut()
            .run_system_once(
                |mut anchors: Query<(&mut GlobeAnchor, &mut Transform)>,
                 georefs: Query<&Georeference>,
                 origin: Res<WorldOrigin>| {
                    let (mut anchor, mut transform) = anchors.single_mut().unwrap();
                    let georef = georefs.single().unwrap();
                    anchor.move_to_geodetic(1.0, 0.0, 0.0, georef, &mut transform, origin.offset);
                },
            )
            .unwrap();
        app.update();

        let anchor = app.world().get::<GlobeAnchor>(entity).unwrap();
        let expected = crate::math::Ellipsoid::WGS84.geodetic_to_ecef(Geodetic::new(1.0, 0.0, 0.0));
        assert!((anchor.ecef() - expected).length() < 1e-3);
        assert!((anchor.longitude() - 1.0).abs() < 1e-6);

        // The write-back was announced with the teleport flag.
        let log = app.world().resource::<SyncLog>();
        assert_eq!(log.count, 1);
        assert_eq!(log.last_teleport, Some(true));
    }

    #[test]
    fn test_world_origin_rebase_shifts_local_pose_only() {
        let mut app = test_app();
        app.world_mut()
            .spawn(Georeference::from_origin(Geodetic::new(0.0, 0.0, 0.0)));
        let entity = app.world_mut().spawn(GlobeAnchor::default()).id();
        app.update();

        let before = *app.world().get::<Transform>(entity).unwrap();
        let scalars_before = app
            .world()
            .get::<GlobeAnchor>(entity)
            .unwrap()
            .longitude_latitude_height();

        app.world_mut().resource_mut::<WorldOrigin>().offset = DVec3::new(5000.0, 0.0, 0.0);
        app.update();

        let after = *app.world().get::<Transform>(entity).unwrap();
        assert!((f64::from(before.translation.x - after.translation.x) - 5000.0).abs() < 0.5);
        assert!((before.translation.y - after.translation.y).abs() < 0.5);

        let anchor = app.world().get::<GlobeAnchor>(entity).unwrap();
        assert_eq!(anchor.longitude_latitude_height(), scalars_before);
    }

    #[test]
    fn test_georeference_origin_change_rebases_anchors() {
        let mut app = test_app();
        let georef = app
            .world_mut()
            .spawn(Georeference::from_origin(Geodetic::new(0.0, 0.0, 0.0)))
            .id();
        let entity = app.world_mut().spawn(GlobeAnchor::default()).id();
        app.update();

        let scalars_before = app
            .world()
            .get::<GlobeAnchor>(entity)
            .unwrap()
            .longitude_latitude_height();

        // Raise the origin by 100 m; the anchor stays put on the globe, so
        // its local pose drops by 100 m.
        app.world_mut()
            .get_mut::<Georeference>(georef)
            .unwrap()
            .set_origin(Geodetic::new(0.0, 0.0, 100.0));
        app.update();

        let transform = app.world().get::<Transform>(entity).unwrap();
        assert!((f64::from(transform.translation.y) + 100.0).abs() < 0.01);

        let anchor = app.world().get::<GlobeAnchor>(entity).unwrap();
        assert_eq!(anchor.longitude_latitude_height(), scalars_before);
    }

    #[test]
    fn test_switching_designated_georeference_rebases_local_pose() {
        let mut app = test_app();
        let first = app
            .world_mut()
            .spawn(Georeference::from_origin(Geodetic::new(0.0, 0.0, 0.0)))
            .id();
        let second = app
            .world_mut()
            .spawn(Georeference::from_origin(Geodetic::new(0.0, 0.0, 500.0)))
            .id();
        let mut anchor = GlobeAnchor::default();
        anchor.set_georeference(Some(first));
        let entity = app.world_mut().spawn(anchor).id();
        app.update();

        let scalars_before = app
            .world()
            .get::<GlobeAnchor>(entity)
            .unwrap()
            .longitude_latitude_height();

        app.world_mut()
            .get_mut::<GlobeAnchor>(entity)
            .unwrap()
            .set_georeference(Some(second));
        app.update();

        let anchor = app.world().get::<GlobeAnchor>(entity).unwrap();
        assert_eq!(anchor.resolved_georeference(), Some(second));
        // Globe pose is authoritative across the switch.
        assert_eq!(anchor.longitude_latitude_height(), scalars_before);
        // Under the new origin the entity sits 500 m below it.
        let transform = app.world().get::<Transform>(entity).unwrap();
        assert!((f64::from(transform.translation.y) + 500.0).abs() < 0.01);
    }

    #[test]
    fn test_pasted_anchor_recomputes_from_new_local_pose() {
        let mut app = test_app();
        app.world_mut()
            .spawn(Georeference::from_origin(Geodetic::new(0.0, 0.0, 0.0)));
        let original = app.world_mut().spawn(GlobeAnchor::default()).id();
        app.update();

        // Duplicate the anchor onto an entity placed 10 km up.
        let copied = app
            .world()
            .get::<GlobeAnchor>(original)
            .unwrap()
            .clone();
        assert!(!copied.globe_transform().is_valid());
        let pasted = app
            .world_mut()
            .spawn((Transform::from_xyz(0.0, 10_000.0, 0.0), copied))
            .id();
        app.update();

        let anchor = app.world().get::<GlobeAnchor>(pasted).unwrap();
        assert!(anchor.globe_transform().is_valid());
        assert!((anchor.height() - 10_000.0).abs() < 0.01);
    }
}
