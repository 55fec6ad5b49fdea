//! Scene graph.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use glam::{Mat4, Vec4};
use slotmap::SlotMap;

use super::material::Material;
use super::mesh::{MeshData, Transform};
use super::selection::Layers;
use super::signal::{Signal, Subscription};

slotmap::new_key_type! {
    /// Handle to a node in a [`Scene`].
    pub struct NodeId;
}

/// Geometry plus the material it is drawn with.
#[derive(Clone, Debug)]
pub struct MeshRenderer {
    pub mesh: Rc<MeshData>,
    pub material: Material,
}

impl MeshRenderer {
    pub fn new(mesh: Rc<MeshData>, material: Material) -> Self {
        Self { mesh, material }
    }
}

#[derive(Clone, Debug, Default)]
pub struct SceneNode {
    pub name: String,
    pub transform: Transform,
    pub visible: bool,
    pub layers: Layers,
    mesh: Option<MeshRenderer>,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

impl SceneNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            visible: true,
            ..Default::default()
        }
    }

    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self
    }

    pub fn with_layers(mut self, layers: Layers) -> Self {
        self.layers = layers;
        self
    }

    pub fn with_mesh(mut self, mesh: MeshRenderer) -> Self {
        self.mesh = Some(mesh);
        self
    }

    pub fn mesh(&self) -> Option<&MeshRenderer> {
        self.mesh.as_ref()
    }

    pub fn material(&self) -> Option<&Material> {
        self.mesh.as_ref().map(|m| &m.material)
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }
}

/// Structural changes observers care about.
#[derive(Clone, Debug)]
pub enum SceneEvent {
    NodeAdded {
        node: NodeId,
        material: Option<Material>,
    },
    NodeRemoved {
        node: NodeId,
        material: Option<Material>,
    },
}

/// A tree of nodes, some of which carry meshes.
///
/// Adding or removing nodes (and swapping a node's mesh) emits [`SceneEvent`]s synchronously.
/// Listeners run while the caller still holds the scene, so they must not borrow it.
pub struct Scene {
    nodes: SlotMap<NodeId, SceneNode>,
    roots: Vec<NodeId>,
    events: Signal<SceneEvent>,
    pub background: Vec4,
}

pub type SharedScene = Rc<RefCell<Scene>>;

impl Default for Scene {
    fn default() -> Self {
        Self {
            nodes: SlotMap::with_key(),
            roots: Vec::new(),
            events: Signal::new(),
            background: Vec4::new(0.0, 0.0, 0.0, 1.0),
        }
    }
}

impl fmt::Debug for Scene {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scene")
            .field("nodes", &self.nodes.len())
            .field("roots", &self.roots)
            .field("listeners", &self.listener_count())
            .field("background", &self.background)
            .finish()
    }
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared(self) -> SharedScene {
        Rc::new(RefCell::new(self))
    }

    pub fn subscribe(&self, listener: impl Fn(&SceneEvent) + 'static) -> Subscription {
        self.events.subscribe(listener)
    }

    pub fn listener_count(&self) -> usize {
        self.events.listener_count()
    }

    /// Adds a root node.
    pub fn add(&mut self, node: SceneNode) -> NodeId {
        self.insert(None, node)
    }

    /// Adds `node` under `parent`. Returns `None` if `parent` is not in the scene.
    pub fn add_child(&mut self, parent: NodeId, node: SceneNode) -> Option<NodeId> {
        self.nodes.contains_key(parent).then(|| self.insert(Some(parent), node))
    }

    fn insert(&mut self, parent: Option<NodeId>, mut node: SceneNode) -> NodeId {
        node.parent = parent;
        node.children.clear();
        let material = node.material().cloned();
        let id = self.nodes.insert(node);
        match parent {
            Some(parent) => self.nodes[parent].children.push(id),
            None => self.roots.push(id),
        }
        self.events.emit(&SceneEvent::NodeAdded { node: id, material });
        id
    }

    /// Removes `id` and its whole subtree. Returns `false` if the node was not present.
    pub fn remove(&mut self, id: NodeId) -> bool {
        let Some(node) = self.nodes.get(id) else {
            return false;
        };
        match node.parent {
            Some(parent) => {
                if let Some(p) = self.nodes.get_mut(parent) {
                    p.children.retain(|child| *child != id);
                }
            }
            None => self.roots.retain(|root| *root != id),
        }
        self.remove_subtree(id);
        true
    }

    fn remove_subtree(&mut self, id: NodeId) {
        let Some(node) = self.nodes.remove(id) else {
            return;
        };
        for child in &node.children {
            self.remove_subtree(*child);
        }
        self.events.emit(&SceneEvent::NodeRemoved {
            node: id,
            material: node.mesh.map(|m| m.material),
        });
    }

    /// Replaces the mesh of `id`, reporting the change as a removal followed by an addition.
    pub fn set_mesh(&mut self, id: NodeId, mesh: Option<MeshRenderer>) {
        let Some(node) = self.nodes.get_mut(id) else {
            return;
        };
        let previous = std::mem::replace(&mut node.mesh, mesh);
        let material = node.material().cloned();
        self.events.emit(&SceneEvent::NodeRemoved {
            node: id,
            material: previous.map(|m| m.material),
        });
        self.events.emit(&SceneEvent::NodeAdded { node: id, material });
    }

    pub fn get(&self, id: NodeId) -> Option<&SceneNode> {
        self.nodes.get(id)
    }

    /// Mutable access to transform, name and visibility.
    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut SceneNode> {
        self.nodes.get_mut(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    /// Visits every node depth-first, parents before children.
    pub fn traverse(&self, mut visit: impl FnMut(NodeId, &SceneNode)) {
        let mut stack: Vec<NodeId> = self.roots.iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            let node = &self.nodes[id];
            visit(id, node);
            stack.extend(node.children.iter().rev().copied());
        }
    }

    pub fn world_matrix(&self, id: NodeId) -> Mat4 {
        let mut matrix = Mat4::IDENTITY;
        let mut current = Some(id);
        while let Some(node) = current.and_then(|id| self.nodes.get(id)) {
            matrix = node.transform.matrix() * matrix;
            current = node.parent;
        }
        matrix
    }

    /// Visible mesh nodes on any layer of `mask`, with their world matrices, in traversal order.
    ///
    /// A hidden node hides its subtree; layers only filter the node itself.
    pub fn visible_meshes(&self, mask: Layers) -> Vec<(Mat4, MeshRenderer)> {
        let mut out = Vec::new();
        let mut stack: Vec<(NodeId, Mat4)> = self
            .roots
            .iter()
            .rev()
            .map(|id| (*id, Mat4::IDENTITY))
            .collect();
        while let Some((id, parent)) = stack.pop() {
            let node = &self.nodes[id];
            if !node.visible {
                continue;
            }
            let world = parent * node.transform.matrix();
            if let Some(mesh) = node.mesh.as_ref().filter(|_| node.layers.intersects(mask)) {
                out.push((world, mesh.clone()));
            }
            stack.extend(node.children.iter().rev().map(|child| (*child, world)));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;
    use std::cell::Cell;

    fn mesh_node(name: &str, material: &Material) -> SceneNode {
        SceneNode::new(name).with_mesh(MeshRenderer::new(
            Rc::new(MeshData::cube()),
            material.clone(),
        ))
    }

    #[test]
    fn removing_a_parent_removes_its_subtree() {
        let mut scene = Scene::new();
        let root = scene.add(SceneNode::new("root"));
        let child = scene.add_child(root, SceneNode::new("child")).unwrap();
        scene.add_child(child, SceneNode::new("grandchild"));
        assert_eq!(scene.len(), 3);
        assert!(scene.remove(root));
        assert!(scene.is_empty());
        assert!(!scene.remove(root));
    }

    #[test]
    fn events_report_materials() {
        let mut scene = Scene::new();
        let material = Material::standard("m");
        let added = Rc::new(Cell::new(0));
        let removed = Rc::new(Cell::new(0));
        let (a, r) = (added.clone(), removed.clone());
        let _subscription = scene.subscribe(move |event| match event {
            SceneEvent::NodeAdded {
                material: Some(_), ..
            } => a.set(a.get() + 1),
            SceneEvent::NodeRemoved {
                material: Some(_), ..
            } => r.set(r.get() + 1),
            _ => {}
        });

        let root = scene.add(mesh_node("a", &material));
        scene.add_child(root, mesh_node("b", &material));
        scene.add(SceneNode::new("empty"));
        scene.remove(root);

        assert_eq!(added.get(), 2);
        assert_eq!(removed.get(), 2);
    }

    #[test]
    fn traversal_visits_parents_first() {
        let mut scene = Scene::new();
        let a = scene.add(SceneNode::new("a"));
        scene.add_child(a, SceneNode::new("a1"));
        scene.add(SceneNode::new("b"));
        let mut names = Vec::new();
        scene.traverse(|_, node| names.push(node.name.clone()));
        assert_eq!(names, vec!["a", "a1", "b"]);
    }

    #[test]
    fn world_matrix_composes_parents() {
        let mut scene = Scene::new();
        let parent = scene.add(
            SceneNode::new("p").with_transform(Transform::from_position(Vec3::X)),
        );
        let child = scene
            .add_child(
                parent,
                SceneNode::new("c").with_transform(Transform::from_position(Vec3::Y)),
            )
            .unwrap();
        let origin = scene.world_matrix(child).transform_point3(Vec3::ZERO);
        assert_eq!(origin, Vec3::new(1.0, 1.0, 0.0));
    }

    #[test]
    fn hidden_nodes_hide_their_children() {
        let mut scene = Scene::new();
        let material = Material::standard("m");
        let parent = scene.add(mesh_node("p", &material));
        scene.add_child(parent, mesh_node("c", &material));
        assert_eq!(scene.visible_meshes(Layers::ALL).len(), 2);
        scene.get_mut(parent).unwrap().visible = false;
        assert!(scene.visible_meshes(Layers::ALL).is_empty());
    }

    #[test]
    fn layer_mask_filters_nodes_but_not_their_children() {
        let mut scene = Scene::new();
        let material = Material::standard("m");
        let parent = scene.add(mesh_node("p", &material).with_layers(Layers::only(2)));
        scene.add_child(parent, mesh_node("c", &material));
        assert_eq!(scene.visible_meshes(Layers::default()).len(), 1);
        assert_eq!(scene.visible_meshes(Layers::only(2)).len(), 1);
        assert_eq!(scene.visible_meshes(Layers::NONE).len(), 0);
    }

    #[test]
    fn debug_output_summarizes_the_scene() {
        let mut scene = Scene::new();
        scene.add(SceneNode::new("a"));
        let text = format!("{scene:?}");
        assert!(text.starts_with("Scene {"));
        assert!(text.contains("nodes: 1"));
    }
}
