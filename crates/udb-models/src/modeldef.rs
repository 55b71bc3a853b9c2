// modeldef.rs — Model definitions and per-load parameters
//
// A `ModelDef` is one MODELDEF-style actor model: a set of model files that
// are merged into one renderable model, with skins, frames and a scale.
// Definitions are plain data and can be read from TOML:
//
//   [[model]]
//   name = "ZombieMan"
//   path = "models/zombie"
//   scale = [1.5, 1.5, 1.2]
//
//   [[model.models]]
//   file = "zombie.md3"
//   frame = 2
//   surface_skins = { "0" = "body.png", "1" = "head.png" }

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Deserializer};
use thiserror::Error;

use udb_common::BoundingBoxSizes;

use crate::palette::Palette;
use crate::resources::{ResourceProvider, EMPTY_RESOURCES};

#[derive(Error, Debug)]
pub enum ModelDefError {
    #[error("invalid model definition: {0}")]
    Toml(#[from] toml::de::Error),
}

fn surface_skin_map<'de, D>(deserializer: D) -> Result<BTreeMap<usize, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = BTreeMap::<String, String>::deserialize(deserializer)?;
    raw.into_iter()
        .map(|(k, v)| {
            k.trim()
                .parse::<usize>()
                .map(|index| (index, v))
                .map_err(|_| serde::de::Error::custom(format!("surface index \"{}\" is not a number", k)))
        })
        .collect()
}

/// One model file of a definition.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ModelEntry {
    pub file: String,
    /// Skin for the whole file. Overrides embedded and per-surface skins.
    pub skin: String,
    #[serde(deserialize_with = "surface_skin_map")]
    pub surface_skins: BTreeMap<usize, String>,
    pub frame: i32,
    pub frame_name: String,
}

impl ModelEntry {
    pub fn new(file: impl Into<String>) -> Self {
        Self { file: file.into(), ..Default::default() }
    }

    /// Parameters handed to the format loader for this entry.
    pub fn load_params(&self, palette: Option<Arc<Palette>>) -> ModelLoadParams {
        ModelLoadParams {
            frame: self.frame,
            frame_name: (!self.frame_name.is_empty()).then(|| self.frame_name.to_ascii_lowercase()),
            surface_skins: self.surface_skins.clone(),
            use_skins: self.skin.is_empty(),
            override_palette: palette,
            file_name: self.file.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ModelDef {
    /// Actor or class name, used in diagnostics only.
    pub name: String,
    /// Directory prefix tried first when resolving skins.
    pub path: String,
    pub models: Vec<ModelEntry>,
    pub scale: [f32; 3],
    /// Every model name refers to a KVX voxel.
    pub voxel: bool,
    /// Voxels use the game palette instead of their own.
    pub override_palette: bool,
}

impl Default for ModelDef {
    fn default() -> Self {
        Self {
            name: String::new(),
            path: String::new(),
            models: Vec::new(),
            scale: [1.0, 1.0, 1.0],
            voxel: false,
            override_palette: false,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ModelDefFile {
    #[serde(default, rename = "model")]
    models: Vec<ModelDef>,
}

impl ModelDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Default::default() }
    }

    pub fn with_model(mut self, entry: ModelEntry) -> Self {
        self.models.push(entry);
        self
    }

    /// A single definition from a TOML table.
    pub fn from_toml_str(text: &str) -> Result<ModelDef, ModelDefError> {
        Ok(toml::from_str(text)?)
    }

    /// Every `[[model]]` table of a TOML document.
    pub fn list_from_toml_str(text: &str) -> Result<Vec<ModelDef>, ModelDefError> {
        let file: ModelDefFile = toml::from_str(text)?;
        Ok(file.models)
    }
}

// ============================================================
// Per-load parameters
// ============================================================

/// What a format loader is asked to produce.
#[derive(Debug, Clone)]
pub struct ModelLoadParams {
    pub frame: i32,
    /// Lower-cased frame name. Only MD2 supports frame names.
    pub frame_name: Option<String>,
    /// Skin overrides by surface (or texture group) index.
    pub surface_skins: BTreeMap<usize, String>,
    /// When false the model's own skin names are ignored and every mesh gets "".
    pub use_skins: bool,
    pub override_palette: Option<Arc<Palette>>,
    /// Name the data was loaded from. Used to find companion files.
    pub file_name: String,
}

impl Default for ModelLoadParams {
    fn default() -> Self {
        Self {
            frame: 0,
            frame_name: None,
            surface_skins: BTreeMap::new(),
            use_skins: true,
            override_palette: None,
            file_name: String::new(),
        }
    }
}

impl ModelLoadParams {
    pub fn new(file_name: impl Into<String>) -> Self {
        Self { file_name: file_name.into(), ..Default::default() }
    }

    pub fn with_frame(mut self, frame: i32) -> Self {
        self.frame = frame;
        self
    }

    /// Skin override map, or None when skins are disabled.
    pub fn skins(&self) -> Option<&BTreeMap<usize, String>> {
        self.use_skins.then_some(&self.surface_skins)
    }
}

/// State shared by all loads of one model definition.
pub struct LoadContext<'a> {
    pub bounds: BoundingBoxSizes,
    pub resources: &'a dyn ResourceProvider,
}

impl<'a> LoadContext<'a> {
    pub fn new(resources: &'a dyn ResourceProvider) -> Self {
        Self { bounds: BoundingBoxSizes::default(), resources }
    }
}

impl Default for LoadContext<'static> {
    fn default() -> Self {
        Self::new(&EMPTY_RESOURCES)
    }
}
