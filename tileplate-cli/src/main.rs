use clap::{Parser, Subcommand};
use image::RgbaImage;
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tileplate_core::codec::decode_image;
use tileplate_core::collab::TemplateStore;
use tileplate_core::coords::server_tile_to_display_tile;
use tileplate_core::palette::ColorId;
use tileplate_core::{OverlayParams, TemplateManager, TemplateRequest};

#[derive(Parser)]
#[command(
    name = "tileplate-cli",
    about = "Manage pixel-canvas templates and render them onto canvas tiles"
)]
struct Cli {
    /// Template store file
    #[arg(long, global = true, default_value = "tileplate.json")]
    store: PathBuf,

    /// Named parameter preset: wplace, strict, loose
    #[arg(long, global = true)]
    preset: Option<String>,

    /// JSON file with overlay parameters (overrides --preset)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Per-channel color matching tolerance (overrides preset and config)
    #[arg(long, global = true)]
    tolerance: Option<u8>,

    /// User id that author ids of new templates are derived from
    #[arg(long, global = true, default_value_t = 0)]
    user_id: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a template from an image
    Create {
        /// Template image path
        image: PathBuf,

        /// Anchor as "tile_x, tile_y, pixel_x, pixel_y"
        #[arg(long)]
        coords: String,

        /// Display name (default: Template)
        #[arg(long, default_value = "")]
        name: String,
    },

    /// List stored templates with their pixel counts
    List,

    /// Delete a template by its key ("<sortID> <authorID>")
    Delete { key: String },

    /// Enable a template
    Enable { key: String },

    /// Disable a template without deleting it
    Disable { key: String },

    /// Render templates onto a directory of tiles named <x>_<y>.png
    Render {
        /// Directory with canvas tiles
        tiles_dir: PathBuf,

        /// Output directory (default: tiles_dir/rendered)
        output_dir: Option<PathBuf>,

        /// Palette color ids to hide, comma separated (e.g. "5,7")
        #[arg(long, value_delimiter = ',')]
        hide: Vec<ColorId>,

        /// Number of parallel decode jobs (default: num_cpus)
        #[arg(long, short)]
        jobs: Option<usize>,
    },

    /// Print the template color wanted at a tile pixel
    ColorAt {
        /// Tile as "x,y"
        tile: String,

        /// Pixel within the tile as "x,y"
        pixel: String,
    },

    /// Map a server tile pixel to display-space coordinates
    DisplayCoords {
        /// Tile as "x,y"
        tile: String,

        /// Pixel within the tile as "x,y"
        pixel: String,
    },
}

/// Key-value store persisted as one JSON object in a file.
struct FileStore {
    path: PathBuf,
    values: BTreeMap<String, String>,
}

impl FileStore {
    fn open(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let values = if path.exists() {
            serde_json::from_str(&std::fs::read_to_string(path)?)?
        } else {
            BTreeMap::new()
        };
        Ok(Self {
            path: path.to_path_buf(),
            values,
        })
    }
}

impl TemplateStore for FileStore {
    fn get(&self, key: &str) -> tileplate_core::Result<Option<String>> {
        Ok(self.values.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: String) -> tileplate_core::Result<()> {
        self.values.insert(key.to_string(), value);
        let json = serde_json::to_string_pretty(&self.values)?;
        std::fs::write(&self.path, json).map_err(|e| {
            tileplate_core::Error::Storage(format!("{}: {}", self.path.display(), e))
        })
    }
}

fn resolve_params(cli: &Cli) -> Result<OverlayParams, Box<dyn std::error::Error>> {
    let params = if let Some(ref path) = cli.config {
        serde_json::from_str(&std::fs::read_to_string(path)?)?
    } else if let Some(ref name) = cli.preset {
        OverlayParams::from_preset(name).ok_or_else(|| {
            let names: Vec<&str> = OverlayParams::all_presets().iter().map(|(n, _)| *n).collect();
            format!("Unknown preset '{}'. Available: {}", name, names.join(", "))
        })?
    } else {
        OverlayParams::default()
    };

    Ok(match cli.tolerance {
        Some(tolerance) => params.with_tolerance(tolerance),
        None => params,
    })
}

fn parse_pair(text: &str) -> Result<(u32, u32), Box<dyn std::error::Error>> {
    let (x, y) = text
        .split_once(',')
        .ok_or_else(|| format!("Expected \"x,y\", got '{}'", text))?;
    Ok((x.trim().parse()?, y.trim().parse()?))
}

/// `12_7.png` -> `(12, 7)`.
fn tile_from_path(path: &Path) -> Option<(u32, u32)> {
    if !path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("png"))
    {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    let (x, y) = stem.split_once('_')?;
    Some((x.parse().ok()?, y.parse().ok()?))
}

fn open_manager(cli: &Cli) -> Result<(TemplateManager, FileStore), Box<dyn std::error::Error>> {
    let params = resolve_params(cli)?;
    let mut manager = TemplateManager::new(params)?;
    manager.set_user_id(cli.user_id);

    let store = FileStore::open(&cli.store)?;
    let report = manager.load(&store)?;
    if report.recognized {
        log::debug!(
            "Loaded {} templates from {} ({} skipped)",
            report.loaded,
            cli.store.display(),
            report.skipped
        );
    }
    Ok((manager, store))
}

fn cmd_create(
    manager: &mut TemplateManager,
    store: &mut FileStore,
    image_path: &Path,
    coords: &str,
    name: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let coords = manager.parse_coords(coords)?;
    let key = manager.create_template(TemplateRequest {
        image: std::fs::read(image_path)?,
        display_name: name.to_string(),
        coords,
    })?;
    manager.save(store)?;
    println!("{}", key);
    Ok(())
}

fn cmd_list(manager: &TemplateManager) {
    if manager.templates().is_empty() {
        eprintln!("No templates stored");
        return;
    }
    for template in manager.templates() {
        let coords = template
            .coords
            .map(|c| c.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<12} {:<24} {:<20} {:>8} px  {} segment(s){}",
            template.storage_key(),
            template.display_name,
            coords,
            template.pixel_count.total,
            template.segment_count(),
            if template.enabled { "" } else { "  [disabled]" }
        );
    }
}

fn cmd_render(
    manager: &mut TemplateManager,
    tiles_dir: &Path,
    output_dir: &Path,
    jobs: Option<usize>,
) -> Result<(), Box<dyn std::error::Error>> {
    let tiles: Vec<((u32, u32), PathBuf)> = std::fs::read_dir(tiles_dir)?
        .filter_map(|entry| entry.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .filter_map(|p| tile_from_path(&p).map(|tile| (tile, p)))
        .filter(|(tile, _)| manager.has_templates_on_tile(tile.0, tile.1))
        .collect();

    if tiles.is_empty() {
        eprintln!("No tiles with templates found in {}", tiles_dir.display());
        return Ok(());
    }

    std::fs::create_dir_all(output_dir)?;

    if let Some(n) = jobs {
        rayon::ThreadPoolBuilder::new()
            .num_threads(n)
            .build_global()
            .ok();
    }

    eprintln!("Decoding {} tiles", tiles.len());
    let decoded: Vec<((u32, u32), Result<RgbaImage, String>)> = tiles
        .par_iter()
        .map(|(tile, path)| {
            let img = std::fs::read(path)
                .map_err(|e| e.to_string())
                .and_then(|bytes| decode_image(&bytes).map_err(|e| e.to_string()));
            (*tile, img)
        })
        .collect();

    let mut errors = Vec::new();
    let mut rendered = 0usize;
    for (tile, img) in decoded {
        let img = match img {
            Ok(img) => img,
            Err(e) => {
                errors.push(format!("tile {},{}: {}", tile.0, tile.1, e));
                continue;
            }
        };
        let Some(out) = manager.render_tile(&img, tile.0, tile.1) else {
            continue;
        };
        let out_path = output_dir.join(format!("{}_{}.png", tile.0, tile.1));
        match out.save(&out_path) {
            Ok(()) => {
                log::info!("Rendered tile {},{} -> {}", tile.0, tile.1, out_path.display());
                rendered += 1;
            }
            Err(e) => errors.push(format!("{}: save failed: {}", out_path.display(), e)),
        }
    }

    for report in manager.reports() {
        println!("{} ({}): {}/{} correct", report.name, report.key, report.correct, report.total);
        for stat in &report.colors {
            println!(
                "  {:>3} {:<20} {:>7}/{:<7}{}",
                stat.id,
                stat.name,
                stat.correct,
                stat.total,
                if stat.premium { " premium" } else { "" }
            );
        }
    }

    eprintln!("\nDone! Rendered: {}, Errors: {}", rendered, errors.len());
    for e in &errors {
        eprintln!("  {}", e);
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    if let Commands::DisplayCoords { ref tile, ref pixel } = cli.command {
        let params = resolve_params(&cli)?;
        let (x, y) = server_tile_to_display_tile(parse_pair(tile)?, parse_pair(pixel)?, params.tile_size);
        println!("{}, {}", x, y);
        return Ok(());
    }

    let (mut manager, mut store) = open_manager(&cli)?;

    match cli.command {
        Commands::Create {
            ref image,
            ref coords,
            ref name,
        } => cmd_create(&mut manager, &mut store, image, coords, name)?,

        Commands::List => cmd_list(&manager),

        Commands::Delete { ref key } => {
            if manager.delete_template(key).is_none() {
                return Err(format!("No template with key '{}'", key).into());
            }
            manager.save(&mut store)?;
        }

        Commands::Enable { ref key } | Commands::Disable { ref key } => {
            let enabled = matches!(cli.command, Commands::Enable { .. });
            if !manager.set_template_enabled(key, enabled) {
                return Err(format!("No template with key '{}'", key).into());
            }
            manager.save(&mut store)?;
        }

        Commands::Render {
            ref tiles_dir,
            ref output_dir,
            ref hide,
            jobs,
        } => {
            for &id in hide {
                manager.set_color_filtered(id, true);
            }
            let output_dir = output_dir
                .clone()
                .unwrap_or_else(|| tiles_dir.join("rendered"));
            cmd_render(&mut manager, tiles_dir, &output_dir, jobs)?;
        }

        Commands::ColorAt { ref tile, ref pixel } => {
            match manager.template_color_at(parse_pair(tile)?, parse_pair(pixel)?) {
                Some([r, g, b]) => println!("#{:02X}{:02X}{:02X}", r, g, b),
                None => println!("none"),
            }
        }

        Commands::DisplayCoords { .. } => {}
    }

    Ok(())
}
