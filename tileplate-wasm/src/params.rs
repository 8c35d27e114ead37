use tileplate_core::params::OverlayParams as CoreOverlayParams;
use wasm_bindgen::prelude::*;

use crate::utils::to_js_error;

/// Canvas geometry and color matching parameters.
#[wasm_bindgen]
#[derive(Clone, Copy)]
pub struct OverlayParams {
    pub(crate) inner: CoreOverlayParams,
}

#[wasm_bindgen]
impl OverlayParams {
    /// Create parameters with custom values.
    #[wasm_bindgen(constructor)]
    pub fn new(tile_size: u32, upscale: u32, tolerance: u8) -> Result<OverlayParams, JsValue> {
        let inner = CoreOverlayParams {
            tile_size,
            upscale,
            tolerance,
        };
        inner.validate().map_err(to_js_error)?;
        Ok(Self { inner })
    }

    /// wplace preset: 1000px tiles, 3x shredding, tolerance 3.
    #[wasm_bindgen(js_name = wplace)]
    pub fn wplace() -> Self {
        Self {
            inner: CoreOverlayParams::wplace(),
        }
    }

    /// Strict preset: exact colors only.
    #[wasm_bindgen(js_name = strict)]
    pub fn strict() -> Self {
        Self {
            inner: CoreOverlayParams::strict(),
        }
    }

    /// Loose preset: tolerant of lossy tile sources.
    #[wasm_bindgen(js_name = loose)]
    pub fn loose() -> Self {
        Self {
            inner: CoreOverlayParams::loose(),
        }
    }

    /// Parse parameters from a JSON object; missing fields take wplace values.
    #[wasm_bindgen(js_name = fromJson)]
    pub fn from_json(json: &str) -> Result<OverlayParams, JsValue> {
        let inner: CoreOverlayParams = serde_json::from_str(json).map_err(to_js_error)?;
        inner.validate().map_err(to_js_error)?;
        Ok(Self { inner })
    }

    #[wasm_bindgen(getter, js_name = tileSize)]
    pub fn tile_size(&self) -> u32 {
        self.inner.tile_size
    }

    #[wasm_bindgen(getter)]
    pub fn upscale(&self) -> u32 {
        self.inner.upscale
    }

    #[wasm_bindgen(getter)]
    pub fn tolerance(&self) -> u8 {
        self.inner.tolerance
    }
}
