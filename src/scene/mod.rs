//! Scene description read by geometry passes.
//!
//! The scene is an external collaborator of the pipeline: passes only need to walk its mesh
//! nodes, patch their materials and hear about nodes coming and going.
//!
//! # Example
//!
//! ```
//! use std::rc::Rc;
//! use phalanx::scene::{Material, MeshData, MeshRenderer, Scene, SceneNode};
//!
//! let scene = Scene::new().shared();
//! let material = Material::standard("white");
//! scene.borrow_mut().add(
//!     SceneNode::new("cube").with_mesh(MeshRenderer::new(Rc::new(MeshData::cube()), material)),
//! );
//! assert_eq!(scene.borrow().len(), 1);
//! ```

pub mod material;
pub mod mesh;
#[allow(clippy::module_inception)]
pub mod scene;
pub mod selection;
pub mod signal;

pub use material::{
    Material, MaterialCompileContext, MaterialParams, ShaderInjector, g_buffer_output_wgsl,
};
pub use mesh::{MeshData, Transform, Vertex3d};
pub use scene::{MeshRenderer, NodeId, Scene, SceneEvent, SceneNode, SharedScene};
pub use selection::{Layers, Selection};
pub use signal::{Signal, Subscription};
