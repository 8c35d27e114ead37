use log::{Level, LevelFilter, Log, Metadata, Record};
use wasm_bindgen::prelude::*;

/// Set panic hook for better error messages in browser console
pub fn set_panic_hook() {
    #[cfg(feature = "console_error_panic_hook")]
    console_error_panic_hook::set_once();
}

/// Log to browser console
#[wasm_bindgen]
extern "C" {
    #[wasm_bindgen(js_namespace = console)]
    pub fn log(s: &str);
}

/// `log` backend writing to the browser console. Warnings and errors go to
/// their own console channels so devtools can filter them.
struct ConsoleLogger;

static LOGGER: ConsoleLogger = ConsoleLogger;

impl Log for ConsoleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = format!("[tileplate] {}", record.args());
        match record.level() {
            Level::Error => web_sys::console::error_1(&JsValue::from_str(&line)),
            Level::Warn => web_sys::console::warn_1(&JsValue::from_str(&line)),
            _ => log(&line),
        }
    }

    fn flush(&self) {}
}

/// Install the console logger once; later calls keep the first one.
pub fn init_logger() {
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(if cfg!(debug_assertions) {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        });
    }
}

/// Convert any displayable error into a JS `Error`.
pub fn to_js_error(err: impl std::fmt::Display) -> JsValue {
    js_sys::Error::new(&err.to_string()).into()
}
