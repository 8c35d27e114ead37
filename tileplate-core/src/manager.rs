//! Template collection: creation, persistence and tile rendering with
//! per-color correctness scoring.
//!
//! Rendering a tile:
//! upscale tile -> snapshot "before" -> draw segments by ascending sort id ->
//! score each segment against the snapshot -> encode.

use image::RgbaImage;
use serde::Serialize;
use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet};

use crate::codec::{decode_image, decode_upload, encode_png, number_to_encoded, pixels_to_u32, ENCODING_BASE};
use crate::collab::{LogStatus, StatusSink, TemplateStore, STORAGE_KEY};
use crate::coords::{tile_prefix, TemplateCoords, TileKey};
use crate::error::{Error, Result};
use crate::palette::{alpha_of, rgb_of, ColorId, ColorLookup, PALETTE};
use crate::params::OverlayParams;
use crate::raster::{draw_over, strip_colors, upscale_into};
use crate::schema::{PixelSummary, SchemaHealth, StoredDocument, TemplateDocument, TemplateEntry};
use crate::template::{ColorStat, PixelCount, Segment, Template};

/// Where the live tile is sampled relative to a template cell center, in
/// upscaled canvas pixels `(x, y)`.
pub const TILE_SAMPLE_OFFSET: (i64, i64) = (0, -1);

const DEFAULT_NAME: &str = "Template";

/// A template upload as handed over by the UI.
#[derive(Debug, Clone, Default)]
pub struct TemplateRequest {
    pub image: Vec<u8>,
    pub display_name: String,
    pub coords: Option<TemplateCoords>,
}

/// Outcome of importing a persisted document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    /// False when the document belongs to another tool.
    pub recognized: bool,
    pub health: Option<SchemaHealth>,
    pub loaded: usize,
    pub skipped: usize,
}

impl ImportReport {
    fn unrecognized() -> Self {
        Self {
            recognized: false,
            health: None,
            loaded: 0,
            skipped: 0,
        }
    }
}

/// Progress summary of one template for UI collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateReport {
    pub key: String,
    pub name: String,
    pub enabled: bool,
    pub total: u64,
    pub correct: u64,
    pub colors: Vec<ColorStat>,
}

/// Owns every template of the session and renders them onto canvas tiles.
///
/// Not reentrant: all mutation goes through `&mut self`, so callers
/// serialize template creation and rendering.
pub struct TemplateManager {
    params: OverlayParams,
    lookup: ColorLookup,
    templates: Vec<Template>,
    draw_enabled: bool,
    filtered_colors: BTreeSet<ColorId>,
    user_id: u64,
    status: Box<dyn StatusSink>,
}

impl TemplateManager {
    pub fn new(params: OverlayParams) -> Result<Self> {
        Self::with_status(params, Box::new(LogStatus))
    }

    pub fn with_status(params: OverlayParams, status: Box<dyn StatusSink>) -> Result<Self> {
        params.validate()?;
        Ok(Self {
            params,
            lookup: ColorLookup::build(PALETTE, params.tolerance),
            templates: Vec::new(),
            draw_enabled: true,
            filtered_colors: BTreeSet::new(),
            user_id: 0,
            status,
        })
    }

    pub fn params(&self) -> &OverlayParams {
        &self.params
    }

    pub fn lookup(&self) -> &ColorLookup {
        &self.lookup
    }

    /// Templates in draw order (ascending sort id).
    pub fn templates(&self) -> &[Template] {
        &self.templates
    }

    pub fn template(&self, key: &str) -> Option<&Template> {
        self.templates.iter().find(|t| t.storage_key() == key)
    }

    /// User id that new templates derive their author id from.
    pub fn set_user_id(&mut self, user_id: u64) {
        self.user_id = user_id;
    }

    pub fn user_id(&self) -> u64 {
        self.user_id
    }

    pub fn set_draw_enabled(&mut self, enabled: bool) {
        self.draw_enabled = enabled;
    }

    pub fn draw_enabled(&self) -> bool {
        self.draw_enabled
    }

    /// Hide (or show again) one palette color when drawing templates.
    pub fn set_color_filtered(&mut self, id: ColorId, filtered: bool) {
        if filtered {
            self.filtered_colors.insert(id);
        } else {
            self.filtered_colors.remove(&id);
        }
    }

    pub fn filtered_colors(&self) -> &BTreeSet<ColorId> {
        &self.filtered_colors
    }

    /// Validate, decode, census and shred an upload, then register it.
    /// Returns the new template's storage key.
    pub fn create_template(&mut self, request: TemplateRequest) -> Result<String> {
        let Some(coords) = request.coords else {
            return Err(self.reject("Coordinates are missing. Set the anchor before creating a template."));
        };
        if request.image.is_empty() {
            return Err(self.reject("No file selected."));
        }
        if let Err(e) = coords.validate(self.params.tile_size) {
            self.status.error(&e.to_string());
            return Err(e);
        }

        let img = decode_upload(&request.image).inspect_err(|e| {
            self.status.error(&format!("Could not read the template image: {}", e));
        })?;

        let name = match request.display_name.trim() {
            "" => DEFAULT_NAME,
            name => name,
        };
        let template = Template::from_image(
            name,
            self.next_sort_id(),
            number_to_encoded(self.user_id, ENCODING_BASE),
            coords,
            &img,
            &self.params,
            &self.lookup,
        );
        let key = template.storage_key();
        let total = template.pixel_count.total;

        log::info!(
            "Created template '{}' ({}) at {} with {} segments",
            name,
            key,
            coords,
            template.segment_count()
        );
        self.insert(template);
        self.status.success(&format!(
            "Template created at {}! Total pixels: {}",
            coords, total
        ));
        Ok(key)
    }

    pub fn delete_template(&mut self, key: &str) -> Option<Template> {
        let index = self.templates.iter().position(|t| t.storage_key() == key)?;
        let removed = self.templates.remove(index);
        log::info!("Deleted template '{}' ({})", removed.display_name, key);
        Some(removed)
    }

    /// Returns false when no template has this key.
    pub fn set_template_enabled(&mut self, key: &str, enabled: bool) -> bool {
        match self.templates.iter_mut().find(|t| t.storage_key() == key) {
            Some(template) => {
                template.enabled = enabled;
                true
            }
            None => false,
        }
    }

    fn next_sort_id(&self) -> u32 {
        self.templates
            .iter()
            .map(|t| t.sort_id)
            .max()
            .map_or(0, |max| max + 1)
    }

    fn insert(&mut self, template: Template) {
        let key = template.storage_key();
        self.templates.retain(|t| t.storage_key() != key);
        self.templates.push(template);
        self.templates.sort_by_key(|t| t.sort_id);
    }

    fn reject(&self, message: &str) -> Error {
        self.status.error(message);
        Error::InvalidInput(message.to_string())
    }

    /// Parse anchor coords typed by the user. Blank input means "not set";
    /// unparsable or out-of-range input is reported on the status sink.
    pub fn parse_coords(&self, text: &str) -> Result<Option<TemplateCoords>> {
        match text.trim() {
            "" => Ok(None),
            text => text
                .parse::<TemplateCoords>()
                .and_then(|coords| coords.validate(self.params.tile_size).map(|()| Some(coords)))
                .inspect_err(|e| self.status.error(&e.to_string())),
        }
    }

    pub fn export_document(&self) -> Result<TemplateDocument> {
        let mut doc = TemplateDocument::new();
        for template in &self.templates {
            let entry = TemplateEntry {
                name: template.display_name.clone(),
                coords: template.coords.map(|c| c.to_string()).unwrap_or_default(),
                enabled: template.enabled,
                pixels: PixelSummary {
                    total: template.pixel_count.total,
                    colors: template.pixel_count.colors.clone(),
                },
                tiles: template.encoded_tiles()?,
            };
            doc.templates.insert(template.storage_key(), entry);
        }
        Ok(doc)
    }

    pub fn export_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.export_document()?)?)
    }

    /// Import a stored document. Documents written by other tools are left
    /// alone and reported as unrecognized; only unreadable JSON is an error.
    pub fn import_json(&mut self, json: &str) -> Result<ImportReport> {
        let value: serde_json::Value = serde_json::from_str(json).inspect_err(|e| {
            self.status.error(&format!("Stored templates are unreadable: {}", e));
        })?;
        let doc = match StoredDocument::recognize(value) {
            Some(doc) => doc.inspect_err(|e| {
                self.status.error(&format!("Stored templates are unreadable: {}", e));
            })?,
            None => {
                log::debug!("Ignoring template document from another tool");
                return Ok(ImportReport::unrecognized());
            }
        };
        Ok(self.import_document(doc))
    }

    /// Replace the current templates with those of `doc`.
    ///
    /// Unusable schema versions load nothing; individual broken entries are
    /// skipped.
    pub fn import_document(&mut self, doc: StoredDocument) -> ImportReport {
        let health = doc.health();
        if !health.is_loadable() {
            self.status.error(&format!(
                "Stored templates use schema {} which this version cannot read.",
                doc.schema_version
            ));
            return ImportReport {
                recognized: true,
                health: Some(health),
                loaded: 0,
                skipped: doc.templates.len(),
            };
        }

        let mut loaded = Vec::with_capacity(doc.templates.len());
        let mut skipped = 0;
        for (key, entry) in doc.templates {
            match self.template_from_entry(&key, entry) {
                Ok(template) => loaded.push(template),
                Err(e) => {
                    log::warn!("Skipping template '{}': {}", key, e);
                    skipped += 1;
                }
            }
        }
        loaded.sort_by_key(|t| t.sort_id);
        self.templates = loaded;

        let count = self.templates.len();
        if health == SchemaHealth::Degraded {
            log::warn!(
                "Template schema {} differs from {}",
                doc.schema_version,
                crate::schema::SCHEMA_VERSION
            );
            self.status.success(&format!(
                "Loaded {} templates from an outdated schema ({}). Re-save to upgrade.",
                count, doc.schema_version
            ));
        } else {
            log::info!("Loaded {} templates ({} skipped)", count, skipped);
        }

        ImportReport {
            recognized: true,
            health: Some(health),
            loaded: count,
            skipped,
        }
    }

    fn template_from_entry(&self, key: &str, entry: serde_json::Value) -> Result<Template> {
        let (sort_id, author_id) = Template::parse_storage_key(key)
            .ok_or_else(|| Error::InvalidInput(format!("Malformed template key '{}'", key)))?;
        let entry: TemplateEntry = serde_json::from_value(entry)?;

        let coords = match entry.coords.trim() {
            "" => None,
            text => match text.parse::<TemplateCoords>() {
                Ok(coords) => Some(coords),
                Err(_) => {
                    log::warn!("Template '{}' has unreadable coords '{}'", key, text);
                    None
                }
            },
        };

        let pixel_count = PixelCount::from_colors(entry.pixels.colors);
        if pixel_count.total != entry.pixels.total {
            log::warn!(
                "Template '{}' stores total {} but its colors sum to {}",
                key,
                entry.pixels.total,
                pixel_count.total
            );
        }

        let segments = entry
            .tiles
            .iter()
            .map(|(tile_key, payload)| {
                let tile_key = tile_key.parse::<TileKey>()?;
                if tile_key.pixel_x >= self.params.tile_size || tile_key.pixel_y >= self.params.tile_size {
                    return Err(Error::InvalidInput(format!(
                        "Tile key {} lies outside a {}px tile",
                        tile_key, self.params.tile_size
                    )));
                }
                Segment::from_base64(tile_key, payload, self.params.upscale)
            })
            .collect::<Result<Vec<_>>>()?;

        let mut template = Template::from_segments(entry.name, sort_id, author_id, coords, pixel_count, segments);
        template.enabled = entry.enabled;
        Ok(template)
    }

    pub fn save(&self, store: &mut dyn TemplateStore) -> Result<()> {
        store.set(STORAGE_KEY, self.export_json()?)
    }

    /// Load from `store`; an empty store loads nothing and is not an error.
    pub fn load(&mut self, store: &dyn TemplateStore) -> Result<ImportReport> {
        match store.get(STORAGE_KEY)? {
            Some(json) => self.import_json(&json),
            None => Ok(ImportReport::unrecognized()),
        }
    }

    /// Whether any enabled template draws on this tile.
    pub fn has_templates_on_tile(&self, tile_x: u32, tile_y: u32) -> bool {
        self.templates
            .iter()
            .any(|t| t.enabled && t.segment_on_tile(tile_x, tile_y).is_some())
    }

    /// Network bridge entry point: composite templates onto an encoded tile.
    ///
    /// Every no-op path (drawing off, no template on this tile) hands back
    /// the input bytes untouched.
    pub fn draw_template_on_tile<'a>(&mut self, tile_bytes: &'a [u8], tile: (u32, u32)) -> Result<Cow<'a, [u8]>> {
        if !self.draw_enabled {
            return Ok(Cow::Borrowed(tile_bytes));
        }
        if !self.has_templates_on_tile(tile.0, tile.1) {
            self.report_idle(tile.0, tile.1);
            return Ok(Cow::Borrowed(tile_bytes));
        }

        let tile_img = decode_image(tile_bytes)?;
        match self.render_tile(&tile_img, tile.0, tile.1) {
            Some(composited) => Ok(Cow::Owned(encode_png(&composited)?)),
            None => Ok(Cow::Borrowed(tile_bytes)),
        }
    }

    /// Composite every enabled template segment on `(tile_x, tile_y)` onto an
    /// upscaled copy of `tile` and rescore them. None means nothing to draw.
    pub fn render_tile(&mut self, tile: &RgbaImage, tile_x: u32, tile_y: u32) -> Option<RgbaImage> {
        if !self.draw_enabled {
            return None;
        }

        // templates are kept sorted by sort id, so this is the draw order
        let contributing: Vec<usize> = self
            .templates
            .iter()
            .enumerate()
            .filter(|(_, t)| t.enabled && t.segment_on_tile(tile_x, tile_y).is_some())
            .map(|(i, _)| i)
            .collect();

        if contributing.is_empty() {
            self.report_idle(tile_x, tile_y);
            return None;
        }

        let upscale = self.params.upscale;
        let size = self.params.canvas_size();
        let before = upscale_into(tile, upscale, size, size);
        let before32 = pixels_to_u32(before.as_raw());
        let mut canvas = before.clone();

        for &index in &contributing {
            let (key, correct) = {
                let Some(segment) = self.templates[index].segment_on_tile(tile_x, tile_y) else {
                    continue;
                };
                let key = segment.key();
                let drawn = if self.filtered_colors.is_empty() {
                    Cow::Borrowed(segment.bitmap())
                } else {
                    Cow::Owned(strip_colors(segment.bitmap(), &self.lookup, &self.filtered_colors))
                };
                draw_over(&mut canvas, &drawn, key.pixel_x * upscale, key.pixel_y * upscale);
                (key, score_segment(segment, &before32, size, &self.params, &self.lookup))
            };
            self.templates[index].record_correct(key, correct);
        }

        let (correct, total) = self
            .templates
            .iter()
            .filter(|t| t.enabled)
            .fold((0, 0), |(c, t), template| {
                (c + template.pixel_count.correct_total(), t + template.pixel_count.total)
            });
        log::debug!(
            "Rendered {} templates on tile {}",
            contributing.len(),
            tile_prefix(tile_x, tile_y)
        );
        self.status.success(&format!(
            "Displaying {} template(s). Correct pixels: {}/{}",
            contributing.len(),
            correct,
            total
        ));

        Some(canvas)
    }

    fn report_idle(&self, tile_x: u32, tile_y: u32) {
        log::trace!("No templates on tile {}", tile_prefix(tile_x, tile_y));
        self.status.success("Idle: no templates on this tile.");
    }

    /// The color the topmost enabled template wants at a tile pixel.
    pub fn template_color_at(&self, tile: (u32, u32), pixel: (u32, u32)) -> Option<[u8; 3]> {
        self.templates
            .iter()
            .rev()
            .filter(|t| t.enabled)
            .filter_map(|t| t.segment_on_tile(tile.0, tile.1))
            .filter_map(|segment| segment.sample(pixel, self.params.upscale))
            .find(|&px| alpha_of(px) != 0)
            .map(rgb_of)
    }

    pub fn reports(&self) -> Vec<TemplateReport> {
        self.templates
            .iter()
            .map(|t| TemplateReport {
                key: t.storage_key(),
                name: t.display_name.clone(),
                enabled: t.enabled,
                total: t.pixel_count.total,
                correct: t.pixel_count.correct_total(),
                colors: t.color_stats(),
            })
            .collect()
    }
}

/// Count template cells whose palette color matches the tile underneath.
///
/// `before` is the upscaled tile as packed words, `size` pixels square.
/// Cells where either side is at or below the tolerance in alpha are not
/// comparable and are skipped.
fn score_segment(
    segment: &Segment,
    before: &[u32],
    size: u32,
    params: &OverlayParams,
    lookup: &ColorLookup,
) -> BTreeMap<ColorId, u64> {
    let upscale = params.upscale;
    let tolerance = params.tolerance;
    let width = segment.width();
    let key = segment.key();
    let origin_x = (key.pixel_x * upscale) as i64;
    let origin_y = (key.pixel_y * upscale) as i64;
    let size = size as i64;
    let pixels = segment.pixels();

    let mut correct = BTreeMap::new();
    for y in (params.mask_center()..segment.height()).step_by(upscale as usize) {
        for x in (params.mask_center()..width).step_by(upscale as usize) {
            let template_px = pixels[(y * width + x) as usize];
            if alpha_of(template_px) <= tolerance {
                continue;
            }

            let sx = origin_x + x as i64 + TILE_SAMPLE_OFFSET.0;
            let sy = origin_y + y as i64 + TILE_SAMPLE_OFFSET.1;
            if sx < 0 || sy < 0 || sx >= size || sy >= size {
                continue;
            }
            let tile_px = before[(sy * size + sx) as usize];
            if alpha_of(tile_px) <= tolerance {
                continue;
            }

            let id = lookup.match_color(template_px);
            if id == lookup.match_color(tile_px) {
                *correct.entry(id).or_insert(0) += 1;
            }
        }
    }
    correct
}
