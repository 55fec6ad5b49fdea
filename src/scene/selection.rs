//! Layer masks and node selections.

use std::collections::BTreeSet;

use super::scene::{NodeId, Scene};

/// Membership in up to 32 numbered layers.
///
/// A node is drawn when its layers intersect the mask of the draw. New nodes and cameras are on
/// layer 0.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Layers(u32);

impl Default for Layers {
    fn default() -> Self {
        Self::only(0)
    }
}

impl Layers {
    pub const ALL: Self = Self(u32::MAX);
    pub const NONE: Self = Self(0);

    fn bit(layer: u8) -> u32 {
        debug_assert!(layer < 32, "layer {layer} out of range");
        1u32.checked_shl(u32::from(layer)).unwrap_or(0)
    }

    pub fn only(layer: u8) -> Self {
        Self(Self::bit(layer))
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn set(&mut self, layer: u8) {
        self.0 = Self::bit(layer);
    }

    pub fn enable(&mut self, layer: u8) {
        self.0 |= Self::bit(layer);
    }

    pub fn disable(&mut self, layer: u8) {
        self.0 &= !Self::bit(layer);
    }

    pub fn is_enabled(self, layer: u8) -> bool {
        self.0 & Self::bit(layer) != 0
    }

    pub fn intersects(self, other: Layers) -> bool {
        self.0 & other.0 != 0
    }
}

/// A set of scene nodes tagged with a dedicated layer.
///
/// Adding a node enables the selection layer on it; removing disables it again. A pass that
/// honors selections renders only that layer while the selection is enabled.
#[derive(Clone, Debug)]
pub struct Selection {
    layer: u8,
    pub enabled: bool,
    nodes: BTreeSet<NodeId>,
}

impl Default for Selection {
    fn default() -> Self {
        Self::new(Self::DEFAULT_LAYER)
    }
}

impl Selection {
    pub const DEFAULT_LAYER: u8 = 10;

    pub fn new(layer: u8) -> Self {
        Self {
            layer,
            enabled: true,
            nodes: BTreeSet::new(),
        }
    }

    pub fn layer(&self) -> u8 {
        self.layer
    }

    /// Moves every selected node to `layer`.
    pub fn set_layer(&mut self, scene: &mut Scene, layer: u8) {
        for id in &self.nodes {
            if let Some(node) = scene.get_mut(*id) {
                node.layers.disable(self.layer);
                node.layers.enable(layer);
            }
        }
        self.layer = layer;
    }

    /// The mask a draw uses while this selection is enabled.
    pub fn mask(&self) -> Layers {
        Layers::only(self.layer)
    }

    /// Returns false if the node is unknown or already selected.
    pub fn add(&mut self, scene: &mut Scene, id: NodeId) -> bool {
        let Some(node) = scene.get_mut(id) else {
            return false;
        };
        node.layers.enable(self.layer);
        self.nodes.insert(id)
    }

    pub fn remove(&mut self, scene: &mut Scene, id: NodeId) -> bool {
        if let Some(node) = scene.get_mut(id) {
            node.layers.disable(self.layer);
        }
        self.nodes.remove(&id)
    }

    pub fn clear(&mut self, scene: &mut Scene) {
        for id in std::mem::take(&mut self.nodes) {
            if let Some(node) = scene.get_mut(id) {
                node.layers.disable(self.layer);
            }
        }
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.iter().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::SceneNode;

    #[test]
    fn layers_start_on_layer_zero() {
        let layers = Layers::default();
        assert!(layers.is_enabled(0));
        assert!(!layers.is_enabled(1));
        assert!(layers.intersects(Layers::ALL));
        assert!(!layers.intersects(Layers::NONE));
    }

    #[test]
    fn selecting_tags_the_node_with_the_layer() {
        let mut scene = Scene::new();
        let id = scene.add(SceneNode::new("a"));
        let mut selection = Selection::new(3);
        assert!(selection.add(&mut scene, id));
        assert!(!selection.add(&mut scene, id));
        assert!(scene.get(id).unwrap().layers.is_enabled(3));
        assert!(scene.get(id).unwrap().layers.is_enabled(0));

        selection.set_layer(&mut scene, 5);
        let layers = scene.get(id).unwrap().layers;
        assert!(!layers.is_enabled(3));
        assert!(layers.is_enabled(5));

        selection.clear(&mut scene);
        assert!(selection.is_empty());
        assert!(!scene.get(id).unwrap().layers.is_enabled(5));
    }
}
