// main.rs — udb-tools entry point
//
//   udb-tools model defs.toml [--root DIR] [--palette PLAYPAL.lmp]
//   udb-tools leak map.toml --from 0 --to 5 [--from-pos X,Y] [--to-pos X,Y] [--domain source]

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

use udb_common::binreader::BinReader;
use udb_common::mathlib::Vec2;
use udb_models::{DirectoryResources, ModelDef, ModelLoader, Palette, TextureRef};
use udb_soundprop::{propagation_domain, whole_map, LeakFinder, MapSet, SectorId};

#[derive(Parser)]
#[command(name = "udb-tools")]
#[command(about = "Model loading and sound leak checks for Doom-format projects")]
struct Cli {
    /// Log debug output (RUST_LOG overrides)
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load every [[model]] of a definition file and summarize the result
    Model {
        defs: PathBuf,
        /// Resource directory, defaults to the definition file's directory
        #[arg(long)]
        root: Option<PathBuf>,
        /// 768 byte VGA palette used by voxels with override_palette
        #[arg(long)]
        palette: Option<PathBuf>,
    },
    /// Search a map for a sound path crossing at most one blocking line
    Leak {
        map: PathBuf,
        #[arg(long)]
        from: SectorId,
        #[arg(long)]
        to: SectorId,
        /// Source position "x,y", defaults to the sector's wall centre
        #[arg(long, value_parser = parse_point)]
        from_pos: Option<Vec2>,
        #[arg(long, value_parser = parse_point)]
        to_pos: Option<Vec2>,
        #[arg(long, value_enum, default_value_t = Domain::Whole)]
        domain: Domain,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Domain {
    /// Every sector of the map
    Whole,
    /// Sectors the source hears without crossing a blocking line
    Source,
}

fn parse_point(s: &str) -> Result<Vec2, String> {
    let (x, y) = s.split_once(',').ok_or_else(|| format!("expected \"x,y\", got \"{}\"", s))?;
    let coord = |v: &str| v.trim().parse::<f64>().map_err(|e| format!("{}: {}", v, e));
    Ok([coord(x)?, coord(y)?])
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();

    let report = match cli.command {
        Commands::Model { defs, root, palette } => run_model(&defs, root.as_deref(), palette.as_deref())?,
        Commands::Leak { map, from, to, from_pos, to_pos, domain } => {
            run_leak(&map, from, to, from_pos, to_pos, domain)?
        }
    };
    print!("{}", report);
    Ok(())
}

// ============================================================
// model
// ============================================================

fn texture_label(texture: &TextureRef) -> String {
    match texture {
        TextureRef::File(name) => name.clone(),
        TextureRef::Texture(name) => format!("texture {}", name),
        TextureRef::Sprite(name) => format!("sprite {}", name),
        TextureRef::Voxel(tex) => format!("voxel swatch {}x{}", tex.width, tex.height),
        TextureRef::Unknown => "<unknown>".to_string(),
    }
}

fn run_model(defs_path: &Path, root: Option<&Path>, palette_path: Option<&Path>) -> Result<String> {
    let text = fs::read_to_string(defs_path).with_context(|| format!("reading {}", defs_path.display()))?;
    let defs = ModelDef::list_from_toml_str(&text).with_context(|| format!("parsing {}", defs_path.display()))?;

    let root = match root {
        Some(r) => r.to_path_buf(),
        None => defs_path.parent().map(Path::to_path_buf).unwrap_or_default(),
    };
    let resources = DirectoryResources::new(&root);
    let mut loader = ModelLoader::new(&resources);
    if let Some(path) = palette_path {
        let data = fs::read(path).with_context(|| format!("reading palette {}", path.display()))?;
        let palette = Palette::read_vga(&mut BinReader::new(&data))
            .with_context(|| format!("palette {} is not a VGA palette", path.display()))?;
        loader = loader.with_game_palette(palette);
    }

    info!("loading {} model definitions from {}", defs.len(), root.display());
    let reports = loader.load_model_batch(&defs);

    let mut out = String::new();
    for (def, report) in defs.iter().zip(&reports) {
        match &report.model {
            Some(model) => {
                let triangles: usize = model.meshes.iter().map(|m| m.triangle_count()).sum();
                let _ = writeln!(
                    out,
                    "{}: {} meshes, {} triangles, radius {}",
                    def.name,
                    model.meshes.len(),
                    triangles,
                    model.radius
                );
                for (i, texture) in model.textures.iter().enumerate() {
                    let _ = writeln!(out, "  skin {}: {}", i, texture_label(texture));
                }
            }
            None => {
                let _ = writeln!(out, "{}: not loaded", def.name);
            }
        }
        for d in &report.diagnostics {
            let _ = writeln!(out, "  {}", d);
        }
    }
    Ok(out)
}

// ============================================================
// leak
// ============================================================

/// Average of the sector's wall midpoints.
fn sector_center(map: &MapSet, sector: SectorId) -> Vec2 {
    let mut sum = [0.0, 0.0];
    let mut count = 0.0;
    for line in map.sector_lines(sector) {
        let m = map.midpoint(line);
        sum[0] += m[0];
        sum[1] += m[1];
        count += 1.0;
    }
    if count == 0.0 {
        return sum;
    }
    [sum[0] / count, sum[1] / count]
}

fn run_leak(
    map_path: &Path,
    from: SectorId,
    to: SectorId,
    from_pos: Option<Vec2>,
    to_pos: Option<Vec2>,
    domain: Domain,
) -> Result<String> {
    let text = fs::read_to_string(map_path).with_context(|| format!("reading {}", map_path.display()))?;
    let map = MapSet::from_toml_str(&text).with_context(|| format!("parsing {}", map_path.display()))?;

    let sectors = match domain {
        Domain::Whole => whole_map(&map),
        Domain::Source => propagation_domain(&map, from),
    };
    let from_pos = from_pos.unwrap_or_else(|| sector_center(&map, from));
    let to_pos = to_pos.unwrap_or_else(|| sector_center(&map, to));

    let mut finder = LeakFinder::new(&map, from, from_pos, to, to_pos, &sectors)?;
    let mut out = String::new();
    if finder.find_leak() {
        let _ = writeln!(out, "sound leaks from sector {} to sector {}", from, to);
        for line in finder.leak_linedefs() {
            let blocking = map.linedef(line).is_some_and(|ld| ld.blocks_sound());
            let _ = writeln!(out, "  linedef {}{}", line, if blocking { " (blocks sound)" } else { "" });
        }
    } else {
        let _ = writeln!(out, "no sound path from sector {} to sector {}", from, to);
    }
    Ok(out)
}
