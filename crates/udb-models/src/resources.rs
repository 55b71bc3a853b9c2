// resources.rs — File resolution for model, skin and companion lookups
//
// Loaders never touch the filesystem directly. Everything goes through a
// `ResourceProvider`, which has to be safe for concurrent reads because
// batches of models load in parallel.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use udb_common::paths::{file_extension, normalize_separators};

/// Resource names are case-insensitive and always use '/'.
pub fn resource_key(name: &str) -> String {
    normalize_separators(name).trim_start_matches('/').to_ascii_lowercase()
}

pub trait ResourceProvider: Send + Sync {
    /// Human readable name for diagnostics.
    fn name(&self) -> &str;

    fn load_file(&self, path: &str) -> Option<Arc<[u8]>>;

    fn file_exists(&self, path: &str) -> bool {
        self.load_file(path).is_some()
    }

    /// Whether a texture with this name is already known to the resource set.
    fn texture_exists(&self, _name: &str) -> bool {
        false
    }

    fn sprite_exists(&self, _name: &str) -> bool {
        false
    }

    /// Voxel lookup: the name as given, then with a `.kvx` extension.
    fn voxel_data(&self, name: &str) -> Option<Arc<[u8]>> {
        if let Some(data) = self.load_file(name) {
            return Some(data);
        }
        if file_extension(name).is_empty() {
            return self.load_file(&format!("{}.kvx", name));
        }
        None
    }
}

/// Provider with nothing in it.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyResources;

pub static EMPTY_RESOURCES: EmptyResources = EmptyResources;

impl ResourceProvider for EmptyResources {
    fn name(&self) -> &str {
        "empty"
    }

    fn load_file(&self, _path: &str) -> Option<Arc<[u8]>> {
        None
    }
}

// ============================================================
// In-memory provider
// ============================================================

#[derive(Debug, Default, Clone)]
pub struct MemoryResources {
    name: String,
    files: HashMap<String, Arc<[u8]>>,
    textures: HashSet<String>,
    sprites: HashSet<String>,
}

impl MemoryResources {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Default::default() }
    }

    pub fn add_file(&mut self, path: &str, data: impl Into<Vec<u8>>) -> &mut Self {
        let bytes: Vec<u8> = data.into();
        self.files.insert(resource_key(path), Arc::from(bytes));
        self
    }

    pub fn add_texture(&mut self, name: &str) -> &mut Self {
        self.textures.insert(resource_key(name));
        self
    }

    pub fn add_sprite(&mut self, name: &str) -> &mut Self {
        self.sprites.insert(resource_key(name));
        self
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl ResourceProvider for MemoryResources {
    fn name(&self) -> &str {
        &self.name
    }

    fn load_file(&self, path: &str) -> Option<Arc<[u8]>> {
        self.files.get(&resource_key(path)).cloned()
    }

    fn file_exists(&self, path: &str) -> bool {
        self.files.contains_key(&resource_key(path))
    }

    fn texture_exists(&self, name: &str) -> bool {
        self.textures.contains(&resource_key(name))
    }

    fn sprite_exists(&self, name: &str) -> bool {
        self.sprites.contains(&resource_key(name))
    }
}

// ============================================================
// Directory provider
// ============================================================

/// Reads files below a root directory. File contents are cached after the
/// first read; a lookup that failed is cached too.
#[derive(Debug)]
pub struct DirectoryResources {
    name: String,
    root: PathBuf,
    cache: RwLock<HashMap<String, Option<Arc<[u8]>>>>,
}

impl DirectoryResources {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            name: root.display().to_string(),
            root,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn cached_count(&self) -> usize {
        self.cache.read().len()
    }

    fn read_uncached(&self, key: &str) -> Option<Arc<[u8]>> {
        let direct = self.root.join(key);
        if let Ok(data) = fs::read(&direct) {
            return Some(Arc::from(data));
        }
        // Keys are lower case, files on disk may not be
        let mut dir = self.root.clone();
        for part in key.split('/') {
            let entry = fs::read_dir(&dir)
                .ok()?
                .filter_map(Result::ok)
                .find(|e| e.file_name().to_string_lossy().eq_ignore_ascii_case(part))?;
            dir = entry.path();
        }
        fs::read(&dir).ok().map(Arc::from)
    }
}

impl ResourceProvider for DirectoryResources {
    fn name(&self) -> &str {
        &self.name
    }

    fn load_file(&self, path: &str) -> Option<Arc<[u8]>> {
        let key = resource_key(path);
        if key.is_empty() || key.split('/').any(|p| p == "..") {
            return None;
        }
        if let Some(hit) = self.cache.read().get(&key) {
            return hit.clone();
        }
        let data = self.read_uncached(&key);
        debug!(path = %key, found = data.is_some(), "resource lookup");
        self.cache.write().insert(key, data.clone());
        data
    }
}

// ============================================================
// Provider chain
// ============================================================

/// Several providers searched in order. The first one that has a resource wins.
#[derive(Default)]
pub struct ResourceChain {
    providers: Vec<Box<dyn ResourceProvider>>,
}

impl ResourceChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, provider: impl ResourceProvider + 'static) -> &mut Self {
        self.providers.push(Box::new(provider));
        self
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

impl ResourceProvider for ResourceChain {
    fn name(&self) -> &str {
        "chain"
    }

    fn load_file(&self, path: &str) -> Option<Arc<[u8]>> {
        self.providers.iter().find_map(|p| p.load_file(path))
    }

    fn file_exists(&self, path: &str) -> bool {
        self.providers.iter().any(|p| p.file_exists(path))
    }

    fn texture_exists(&self, name: &str) -> bool {
        self.providers.iter().any(|p| p.texture_exists(name))
    }

    fn sprite_exists(&self, name: &str) -> bool {
        self.providers.iter().any(|p| p.sprite_exists(name))
    }

    fn voxel_data(&self, name: &str) -> Option<Arc<[u8]>> {
        self.providers.iter().find_map(|p| p.voxel_data(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_key() {
        assert_eq!(resource_key("Models\\Foo\\Tris.MD2"), "models/foo/tris.md2");
        assert_eq!(resource_key("/skins/a.png"), "skins/a.png");
    }

    #[test]
    fn test_memory_resources() {
        let mut res = MemoryResources::new("test");
        res.add_file("models/a.md3", vec![1u8, 2, 3]).add_texture("SKIN1").add_sprite("TROOA1");
        assert!(res.file_exists("MODELS/A.MD3"));
        assert_eq!(&*res.load_file("models\\a.md3").unwrap(), &[1, 2, 3]);
        assert!(res.texture_exists("skin1"));
        assert!(res.sprite_exists("trooa1"));
        assert!(!res.file_exists("models/b.md3"));
    }

    #[test]
    fn test_voxel_lookup_adds_extension() {
        let mut res = MemoryResources::new("test");
        res.add_file("barrel.kvx", vec![9u8]);
        assert!(res.voxel_data("barrel").is_some());
        assert!(res.voxel_data("barrel.vox").is_none());
    }

    #[test]
    fn test_directory_resources_case_insensitive_and_cached() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("Models")).unwrap();
        fs::write(dir.path().join("Models").join("Tris.md2"), b"IDP2").unwrap();

        let res = DirectoryResources::new(dir.path());
        let data = res.load_file("models/tris.md2").unwrap();
        assert_eq!(&*data, b"IDP2");
        assert!(res.load_file("models/missing.md2").is_none());
        assert_eq!(res.cached_count(), 2);
        assert!(res.load_file("../etc/passwd").is_none());
    }

    #[test]
    fn test_chain_first_wins() {
        let mut a = MemoryResources::new("a");
        a.add_file("x.obj", b"first".to_vec());
        let mut b = MemoryResources::new("b");
        b.add_file("x.obj", b"second".to_vec()).add_file("y.obj", b"only b".to_vec());

        let mut chain = ResourceChain::new();
        chain.push(a).push(b);
        assert_eq!(&*chain.load_file("x.obj").unwrap(), b"first");
        assert_eq!(&*chain.load_file("y.obj").unwrap(), b"only b");
        assert_eq!(chain.len(), 2);
    }
}
