use std::cell::RefCell;
use std::rc::Rc;
use tileplate_core::collab::StatusSink;
use tileplate_core::coords::server_tile_to_display_tile;
use tileplate_core::palette::ColorId;
use tileplate_core::{TemplateManager, TemplateRequest};
use wasm_bindgen::prelude::*;

use crate::params::OverlayParams;
use crate::utils::to_js_error;

/// Status sink for the userscript overlay: logs every outcome and keeps the
/// latest one for the status line.
#[derive(Default)]
struct ConsoleStatus {
    last: RefCell<Option<(bool, String)>>,
}

impl StatusSink for ConsoleStatus {
    fn success(&self, message: &str) {
        log::info!("{}", message);
        *self.last.borrow_mut() = Some((true, message.to_string()));
    }

    fn error(&self, message: &str) {
        log::error!("{}", message);
        *self.last.borrow_mut() = Some((false, message.to_string()));
    }
}

/// Template overlay for one canvas session.
#[wasm_bindgen]
pub struct TemplateOverlay {
    manager: TemplateManager,
    status: Rc<ConsoleStatus>,
}

#[wasm_bindgen]
impl TemplateOverlay {
    #[wasm_bindgen(constructor)]
    pub fn new(params: &OverlayParams) -> Result<TemplateOverlay, JsValue> {
        let status = Rc::new(ConsoleStatus::default());
        let manager = TemplateManager::with_status(params.inner, Box::new(Rc::clone(&status)))
            .map_err(to_js_error)?;
        Ok(Self { manager, status })
    }

    /// Create a template from an uploaded image.
    ///
    /// # Arguments
    /// * `image_bytes` - Uploaded file (PNG, JPEG, WebP, ...)
    /// * `name` - Display name, blank for the default
    /// * `coords` - Anchor as "tx, ty, px, py", empty when not set yet
    ///
    /// # Returns
    /// The storage key of the new template
    #[wasm_bindgen(js_name = createTemplate)]
    pub fn create_template(&mut self, image_bytes: &[u8], name: &str, coords: &str) -> Result<String, JsValue> {
        let coords = self.manager.parse_coords(coords).map_err(to_js_error)?;
        self.manager
            .create_template(TemplateRequest {
                image: image_bytes.to_vec(),
                display_name: name.to_string(),
                coords,
            })
            .map_err(to_js_error)
    }

    /// Composite templates onto a fetched tile. Returns the PNG to hand back
    /// to the page, which is the input itself when nothing is drawn.
    #[wasm_bindgen(js_name = drawTemplateOnTile)]
    pub fn draw_template_on_tile(&mut self, tile_bytes: &[u8], tile_x: u32, tile_y: u32) -> Result<Vec<u8>, JsValue> {
        self.manager
            .draw_template_on_tile(tile_bytes, (tile_x, tile_y))
            .map(|out| out.into_owned())
            .map_err(to_js_error)
    }

    /// Cheap check so the bridge can skip tiles without copying them in.
    #[wasm_bindgen(js_name = hasTemplatesOnTile)]
    pub fn has_templates_on_tile(&self, tile_x: u32, tile_y: u32) -> bool {
        self.manager.draw_enabled() && self.manager.has_templates_on_tile(tile_x, tile_y)
    }

    /// Replace all templates with those of a stored document.
    ///
    /// # Returns
    /// `{ recognized, health, loaded, skipped }`
    #[wasm_bindgen(js_name = importJson)]
    pub fn import_json(&mut self, json: &str) -> Result<JsValue, JsValue> {
        let report = self.manager.import_json(json).map_err(to_js_error)?;
        let json = serde_json::to_string(&report).map_err(to_js_error)?;
        js_sys::JSON::parse(&json)
    }

    #[wasm_bindgen(js_name = exportJson)]
    pub fn export_json(&self) -> Result<String, JsValue> {
        self.manager.export_json().map_err(to_js_error)
    }

    /// Wanted color at a tile pixel as `#RRGGBB`, if any template covers it.
    #[wasm_bindgen(js_name = getTemplateColorAt)]
    pub fn template_color_at(&self, tile_x: u32, tile_y: u32, pixel_x: u32, pixel_y: u32) -> Option<String> {
        self.manager
            .template_color_at((tile_x, tile_y), (pixel_x, pixel_y))
            .map(|[r, g, b]| format!("#{:02X}{:02X}{:02X}", r, g, b))
    }

    #[wasm_bindgen(js_name = setDrawEnabled)]
    pub fn set_draw_enabled(&mut self, enabled: bool) {
        self.manager.set_draw_enabled(enabled);
    }

    #[wasm_bindgen(js_name = setColorFiltered)]
    pub fn set_color_filtered(&mut self, id: ColorId, filtered: bool) {
        self.manager.set_color_filtered(id, filtered);
    }

    #[wasm_bindgen(js_name = setTemplateEnabled)]
    pub fn set_template_enabled(&mut self, key: &str, enabled: bool) -> bool {
        self.manager.set_template_enabled(key, enabled)
    }

    #[wasm_bindgen(js_name = deleteTemplate)]
    pub fn delete_template(&mut self, key: &str) -> bool {
        self.manager.delete_template(key).is_some()
    }

    #[wasm_bindgen(js_name = setUserId)]
    pub fn set_user_id(&mut self, user_id: u64) {
        self.manager.set_user_id(user_id);
    }

    /// Per-template progress: key, name, totals and per-color stats.
    #[wasm_bindgen(js_name = colorStats)]
    pub fn color_stats(&self) -> Result<JsValue, JsValue> {
        let json = serde_json::to_string(&self.manager.reports()).map_err(to_js_error)?;
        js_sys::JSON::parse(&json)
    }

    /// `[x, y]` of a server tile pixel in display space.
    #[wasm_bindgen(js_name = serverTileToDisplayTile)]
    pub fn server_tile_to_display_tile(&self, tile_x: u32, tile_y: u32, pixel_x: u32, pixel_y: u32) -> Vec<u32> {
        let (x, y) = server_tile_to_display_tile(
            (tile_x, tile_y),
            (pixel_x, pixel_y),
            self.manager.params().tile_size,
        );
        vec![x, y]
    }

    /// Latest status line, empty before anything happened.
    #[wasm_bindgen(getter, js_name = statusMessage)]
    pub fn status_message(&self) -> String {
        self.status
            .last
            .borrow()
            .as_ref()
            .map(|(_, message)| message.clone())
            .unwrap_or_default()
    }

    #[wasm_bindgen(getter, js_name = statusIsError)]
    pub fn status_is_error(&self) -> bool {
        matches!(*self.status.last.borrow(), Some((false, _)))
    }
}
