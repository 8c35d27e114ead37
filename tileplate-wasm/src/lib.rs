use wasm_bindgen::prelude::*;

mod overlay;
mod params;
mod utils;

pub use overlay::TemplateOverlay;
pub use params::OverlayParams;

/// Initialize the WASM module (panic hook and console logger).
#[wasm_bindgen(start)]
pub fn init() {
    utils::set_panic_hook();
    utils::init_logger();
}
