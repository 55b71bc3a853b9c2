// udb-models — model loaders for the editor's 3D view
//
// Every format loader turns raw file bytes into meshes of `WorldVertex`
// plus one skin name per mesh. `loader` dispatches by extension and
// assembles whole model definitions.

pub mod iqm;
pub mod kvx;
pub mod loader;
pub mod md2;
pub mod md3;
pub mod mesh;
pub mod modeldef;
pub mod obj;
pub mod palette;
pub mod resources;
pub mod unreal;

#[cfg(test)]
mod testutil;

pub use loader::{format_for, load_model, resolve_texture, GzModel, LoadReport, ModelLoader, TextureRef};
pub use mesh::{LoadError, LoadResult, Mesh, WorldVertex};
pub use modeldef::{LoadContext, ModelDef, ModelDefError, ModelEntry, ModelLoadParams};
pub use palette::{Palette, PixelColor, VoxelTexture};
pub use resources::{DirectoryResources, MemoryResources, ResourceChain, ResourceProvider};
