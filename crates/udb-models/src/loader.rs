// loader.rs — Model definition loading: format dispatch, skin lookup, bounds
//
// A `ModelDef` names one or more model files. Each file is routed to its
// format loader by extension, the resulting meshes are merged into one
// `GzModel` and every mesh gets a texture reference. Failures of a single
// file are logged and reported, the remaining files still load.

use std::sync::Arc;

use rayon::prelude::*;
use tracing::{debug, warn};

use udb_common::paths::{change_extension, file_extension, file_stem, join, normalize_separators, strip_extension};
use udb_common::BoundingBoxSizes;

use crate::kvx::read_kvx;
use crate::mesh::{LoadResult, Mesh};
use crate::modeldef::{LoadContext, ModelDef, ModelEntry, ModelLoadParams};
use crate::palette::{Palette, VoxelTexture};
use crate::resources::ResourceProvider;
use crate::{iqm, md2, md3, obj, unreal};

/// Shared signature of every format loader.
pub type LoaderFn = fn(&[u8], &ModelLoadParams, &mut LoadContext<'_>) -> LoadResult;

pub struct ModelFormat {
    /// Lower-case extension without the dot.
    pub extension: &'static str,
    pub name: &'static str,
    pub load: LoaderFn,
    pub frame_names: bool,
    pub frames: bool,
}

/// Formats reachable through a model name. KVX voxels are loaded through
/// `ModelDef::voxel` instead.
pub static FORMATS: &[ModelFormat] = &[
    ModelFormat { extension: "md3", name: "MD3", load: md3::load, frame_names: false, frames: true },
    ModelFormat { extension: "md2", name: "MD2", load: md2::load, frame_names: true, frames: true },
    ModelFormat { extension: "3d", name: "Unreal", load: unreal::load, frame_names: false, frames: true },
    ModelFormat { extension: "obj", name: "OBJ", load: obj::load, frame_names: false, frames: false },
    ModelFormat { extension: "iqm", name: "IQM", load: iqm::load, frame_names: false, frames: true },
];

pub fn format_for(file_name: &str) -> Option<&'static ModelFormat> {
    let ext = file_extension(file_name).to_ascii_lowercase();
    FORMATS.iter().find(|f| f.extension == ext)
}

/// Route one model file to its loader.
pub fn load_model(data: &[u8], params: &ModelLoadParams, ctx: &mut LoadContext<'_>) -> LoadResult {
    let Some(format) = format_for(&params.file_name) else {
        return LoadResult::failed("model format is not supported");
    };
    if !format.frame_names && params.frame_name.as_deref().is_some_and(|n| !n.is_empty()) {
        return LoadResult::failed(format!("frame names are not supported for {} models!", format.name));
    }
    if !format.frames && params.frame > 0 {
        return LoadResult::failed(format!(
            "trying to load frame {}, but {} doesn't support frames!",
            params.frame, format.name
        ));
    }
    (format.load)(data, params, ctx)
}

// ============================================================
// Textures
// ============================================================

/// Extensions tried for skins. The first entry drops the extension.
pub const TEXTURE_EXTENSIONS: &[&str] = &["", ".png", ".jpg", ".jpeg", ".tga", ".pcx", ".bmp", ".dds"];

#[derive(Debug, Clone, PartialEq)]
pub enum TextureRef {
    /// Image file loaded from the resources.
    File(String),
    /// Texture already known to the resource set.
    Texture(String),
    Sprite(String),
    Voxel(Arc<VoxelTexture>),
    /// Placeholder for skins that could not be found.
    Unknown,
}

impl TextureRef {
    pub fn is_unknown(&self) -> bool {
        matches!(self, TextureRef::Unknown)
    }
}

/// Find a skin the way GZDoom does: as a file with any supported extension,
/// as a known texture, as a texture named like the file, then as a sprite.
pub fn resolve_texture(resources: &dyn ResourceProvider, texture_name: &str) -> Option<TextureRef> {
    let texture_name = normalize_separators(texture_name);

    for ext in TEXTURE_EXTENSIONS {
        let name = change_extension(&texture_name, ext);
        if resources.file_exists(&name) {
            return Some(TextureRef::File(name));
        }
    }

    for ext in TEXTURE_EXTENSIONS {
        let name = change_extension(&texture_name, ext);
        if resources.texture_exists(&name) {
            return Some(TextureRef::Texture(name));
        }
    }

    let stem = file_stem(&texture_name);
    if resources.texture_exists(stem) {
        return Some(TextureRef::Texture(stem.to_string()));
    }

    let bare = strip_extension(&texture_name);
    if resources.sprite_exists(bare) {
        return Some(TextureRef::Sprite(bare.to_string()));
    }

    None
}

// ============================================================
// Assembled model
// ============================================================

#[derive(Debug, Clone, Default)]
pub struct GzModel {
    pub meshes: Vec<Mesh>,
    /// One entry per mesh, except voxel models which share one swatch per file.
    pub textures: Vec<TextureRef>,
    pub radius: i32,
    /// Scaled bounds of every loaded mesh.
    pub bbox: BoundingBoxSizes,
}

/// Result of loading one definition.
#[derive(Debug, Default)]
pub struct LoadReport {
    /// None when nothing could be loaded.
    pub model: Option<GzModel>,
    pub diagnostics: Vec<String>,
}

pub struct ModelLoader<'a> {
    resources: &'a dyn ResourceProvider,
    game_palette: Option<Arc<Palette>>,
}

impl<'a> ModelLoader<'a> {
    /// Below this many definitions a batch loads sequentially.
    const PARALLEL_BATCH_THRESHOLD: usize = 4;

    pub fn new(resources: &'a dyn ResourceProvider) -> Self {
        Self { resources, game_palette: None }
    }

    /// Palette used by voxel definitions that override their own.
    pub fn with_game_palette(mut self, palette: Palette) -> Self {
        self.game_palette = Some(Arc::new(palette));
        self
    }

    pub fn load(&self, def: &ModelDef) -> Option<GzModel> {
        self.load_report(def).model
    }

    pub fn load_report(&self, def: &ModelDef) -> LoadReport {
        if def.voxel {
            self.load_voxels(def)
        } else {
            self.load_models(def)
        }
    }

    /// Independent definitions, loaded in parallel. Reports keep input order.
    pub fn load_model_batch(&self, defs: &[ModelDef]) -> Vec<LoadReport> {
        if defs.len() >= Self::PARALLEL_BATCH_THRESHOLD {
            defs.par_iter().map(|def| self.load_report(def)).collect()
        } else {
            defs.iter().map(|def| self.load_report(def)).collect()
        }
    }

    fn diagnose(diagnostics: &mut Vec<String>, file: &str, message: &str) {
        warn!("Error while loading \"{}\": {}", file, message);
        diagnostics.push(format!("Error while loading \"{}\": {}", file, message));
    }

    fn load_voxels(&self, def: &ModelDef) -> LoadReport {
        let mut report = LoadReport::default();
        let mut model = GzModel::default();

        let palette = if def.override_palette { self.game_palette.as_deref() } else { None };
        if def.override_palette && palette.is_none() {
            debug!("{}: no game palette set, voxels keep their own", def.name);
        }

        for entry in &def.models {
            let Some(data) = self.resources.voxel_data(&entry.file) else {
                Self::diagnose(&mut report.diagnostics, &entry.file, "unable to find file.");
                continue;
            };
            match read_kvx(&data, palette) {
                Ok(kvx) => {
                    model.radius = kvx.radius(&def.scale);
                    for v in kvx.mesh.vertices() {
                        model.bbox.update(v.x, v.y, v.z);
                    }
                    model.textures.push(TextureRef::Voxel(Arc::new(kvx.texture())));
                    model.meshes.push(kvx.mesh);
                }
                Err(e) => Self::diagnose(&mut report.diagnostics, &entry.file, &e.to_string()),
            }
        }

        if !model.meshes.is_empty() {
            model.bbox = model.bbox.scaled(&def.scale);
            report.model = Some(model);
        }
        report
    }

    fn load_models(&self, def: &ModelDef) -> LoadReport {
        let mut report = LoadReport::default();
        let mut model = GzModel::default();
        let mut ctx = LoadContext::new(self.resources);

        for entry in &def.models {
            let params = entry.load_params(None);
            let Some(data) = self.resources.load_file(&entry.file) else {
                Self::diagnose(&mut report.diagnostics, &entry.file, "unable to find file.");
                continue;
            };

            let result = load_model(&data, &params, &mut ctx);
            if let Some(errors) = result.errors.as_deref().filter(|e| !e.is_empty()) {
                Self::diagnose(&mut report.diagnostics, &entry.file, errors);
                continue;
            }

            let mut errors = Vec::new();
            let textures = self.mesh_textures(def, entry, &params, &result, &mut errors);
            for e in &errors {
                Self::diagnose(&mut report.diagnostics, &entry.file, e);
            }
            model.meshes.extend(result.meshes);
            model.textures.extend(textures);
        }

        if model.meshes.is_empty() {
            return report;
        }

        model.bbox = ctx.bounds.scaled(&def.scale);
        model.radius = model.bbox.radius();
        report.model = Some(model);
        report
    }

    /// Skin lookup below the definition's path first, then as given.
    fn find_skin(&self, def: &ModelDef, skin: &str) -> Option<TextureRef> {
        let skin = normalize_separators(skin);
        let with_path = (!def.path.is_empty()).then(|| join(&def.path, &skin));
        with_path
            .as_deref()
            .and_then(|p| resolve_texture(self.resources, p))
            .or_else(|| resolve_texture(self.resources, &skin))
    }

    /// A texture per mesh of one loaded file.
    fn mesh_textures(
        &self,
        def: &ModelDef,
        entry: &ModelEntry,
        params: &ModelLoadParams,
        result: &LoadResult,
        errors: &mut Vec<String>,
    ) -> Vec<TextureRef> {
        // a definition skin replaces every mesh skin of the file
        if !params.use_skins {
            let texture = self.find_skin(def, &entry.skin).unwrap_or_else(|| {
                errors.push(format!("unable to load skin \"{}\"", entry.skin));
                TextureRef::Unknown
            });
            return vec![texture; result.meshes.len()];
        }

        let mut textures = Vec::with_capacity(result.meshes.len());
        for m in 0..result.meshes.len() {
            let texture = match result.skins.get(m) {
                None => {
                    errors.push(format!("no skin defined for mesh {}.", m));
                    TextureRef::Unknown
                }
                Some(skin) if skin.is_empty() => {
                    errors.push("texture not found in MODELDEF or model skin.".to_string());
                    TextureRef::Unknown
                }
                Some(skin) => self.find_skin(def, skin).unwrap_or_else(|| {
                    errors.push(format!("unable to load skin \"{}\"", skin));
                    TextureRef::Unknown
                }),
            };
            textures.push(texture);
        }
        textures
    }
}
