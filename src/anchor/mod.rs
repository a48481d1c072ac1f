//! Globe anchor component and synchronization pipeline
//!
//! This module holds the anchor component (the dual-representation transform
//! engine), the shared resources, and the `PostUpdate` systems that keep the
//! local and globe-side representations of every anchored entity consistent.

use bevy::prelude::*;

pub mod components;
pub mod resources;
pub mod systems;

pub use components::{GlobeAnchor, GlobeTransform};
pub use resources::WorldOrigin;
pub use systems::{
    AnchorTransformSynced, apply_world_origin_rebase, initialize_added_anchors,
    resolve_anchor_georeferences, sync_anchor_transform_changes, sync_georeference_changes,
};

/// Plugin for globe anchoring and transform synchronization
pub struct GlobeAnchorPlugin;

impl Plugin for GlobeAnchorPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<WorldOrigin>()
            .add_message::<AnchorTransformSynced>()
            .add_systems(
                PostUpdate,
                (
                    resolve_anchor_georeferences,
                    initialize_added_anchors,
                    sync_anchor_transform_changes,
                    sync_georeference_changes,
                    apply_world_origin_rebase,
                )
                    .chain(),
            );
    }
}
