//! Find-or-create resolution of the georeference an anchor uses

use bevy::prelude::*;
use tracing::{debug, info};

use crate::anchor::components::GlobeAnchor;
use crate::georeference::components::Georeference;

/// Resolve the effective georeference for an anchor.
///
/// Preference order: the anchor's designated georeference if it is alive and
/// carries the component, otherwise the first georeference in the scene,
/// otherwise a freshly spawned [`Georeference::default()`]. The result is
/// cached on the anchor; repeated calls return the cached entity until it
/// dies or [`GlobeAnchor::invalidate_resolved_georeference`] /
/// [`GlobeAnchor::set_georeference`] clears it.
///
/// Spawning the default is the one scene mutation this module performs; the
/// spawned entity is visible to queries after the next command flush.
pub fn resolve_georeference(
    anchor: &mut GlobeAnchor,
    existing: &Query<Entity, With<Georeference>>,
    commands: &mut Commands,
) -> Entity {
    if let Some(cached) = anchor.resolved_georeference()
        && existing.contains(cached)
    {
        return cached;
    }

    let designated = anchor.georeference();
    if let Some(entity) = designated
        && !existing.contains(entity)
    {
        debug!(
            ?entity,
            "designated georeference is gone or has no Georeference component; falling back"
        );
    }

    let resolved = designated
        .filter(|entity| existing.contains(*entity))
        .or_else(|| existing.iter().next())
        .unwrap_or_else(|| {
            info!("no georeference in the scene; spawning a default one");
            commands.spawn(Georeference::default()).id()
        });

    anchor.set_resolved_georeference(resolved);
    resolved
}

#[cfg(test)]
mod tests {
    use super::*;
    use bevy::ecs::system::SystemState;

    fn georeference_count(world: &mut World) -> usize {
        let mut query = world.query_filtered::<Entity, With<Georeference>>();
        query.iter(world).count()
    }

    #[test]
    fn test_resolves_designated_georeference() {
        let mut world = World::new();
        let designated = world.spawn(Georeference::default()).id();
        let _other = world.spawn(Georeference::default()).id();

        let mut anchor = GlobeAnchor::default();
        anchor.set_georeference(Some(designated));

        let mut state: SystemState<(Commands, Query<Entity, With<Georeference>>)> =
            SystemState::new(&mut world);
        let (mut commands, query) = state.get_mut(&mut world);
        let resolved = resolve_georeference(&mut anchor, &query, &mut commands);
        state.apply(&mut world);

        assert_eq!(resolved, designated);
        assert_eq!(anchor.resolved_georeference(), Some(designated));
    }

    #[test]
    fn test_falls_back_to_first_in_scene() {
        let mut world = World::new();
        let existing = world.spawn(Georeference::default()).id();

        let mut anchor = GlobeAnchor::default();
        let mut state: SystemState<(Commands, Query<Entity, With<Georeference>>)> =
            SystemState::new(&mut world);
        let (mut commands, query) = state.get_mut(&mut world);
        let resolved = resolve_georeference(&mut anchor, &query, &mut commands);
        state.apply(&mut world);

        assert_eq!(resolved, existing);
        assert_eq!(georeference_count(&mut world), 1);
    }

    #[test]
    fn test_spawns_default_when_scene_is_empty() {
        let mut world = World::new();
        let mut anchor = GlobeAnchor::default();

        let mut state: SystemState<(Commands, Query<Entity, With<Georeference>>)> =
            SystemState::new(&mut world);
        let (mut commands, query) = state.get_mut(&mut world);
        let resolved = resolve_georeference(&mut anchor, &query, &mut commands);
        state.apply(&mut world);

        assert_eq!(georeference_count(&mut world), 1);
        assert_eq!(anchor.resolved_georeference(), Some(resolved));
        let spawned = world.get::<Georeference>(resolved).unwrap();
        assert_eq!(*spawned, Georeference::default());
    }

    #[test]
    fn test_cached_result_is_sticky_until_invalidated() {
        let mut world = World::new();
        let first = world.spawn(Georeference::default()).id();

        let mut anchor = GlobeAnchor::default();
        let mut state: SystemState<(Commands, Query<Entity, With<Georeference>>)> =
            SystemState::new(&mut world);
        {
            let (mut commands, query) = state.get_mut(&mut world);
            assert_eq!(
                resolve_georeference(&mut anchor, &query, &mut commands),
                first
            );
        }
        state.apply(&mut world);

        // A second georeference appears; the cached resolution wins.
        let _second = world.spawn(Georeference::default()).id();
        let mut state: SystemState<(Commands, Query<Entity, With<Georeference>>)> =
            SystemState::new(&mut world);
        {
            let (mut commands, query) = state.get_mut(&mut world);
            assert_eq!(
                resolve_georeference(&mut anchor, &query, &mut commands),
                first
            );
        }
        state.apply(&mut world);

        // Until the cache is invalidated and the designated one is set.
        anchor.invalidate_resolved_georeference();
        assert_eq!(anchor.resolved_georeference(), None);
    }

    #[test]
    fn test_dead_designated_falls_through() {
        let mut world = World::new();
        let designated = world.spawn(Georeference::default()).id();
        let survivor = world.spawn(Georeference::default()).id();
        world.despawn(designated);

        let mut anchor = GlobeAnchor::default();
        anchor.set_georeference(Some(designated));

        let mut state: SystemState<(Commands, Query<Entity, With<Georeference>>)> =
            SystemState::new(&mut world);
        let (mut commands, query) = state.get_mut(&mut world);
        let resolved = resolve_georeference(&mut anchor, &query, &mut commands);
        state.apply(&mut world);

        assert_eq!(resolved, survivor);
    }
}
