pub mod codec;
pub mod collab;
pub mod coords;
pub mod error;
pub mod manager;
pub mod palette;
pub mod params;
pub mod raster;
pub mod schema;
pub mod template;

pub use error::{Error, Result};
pub use manager::{ImportReport, TemplateManager, TemplateReport, TemplateRequest};
pub use params::OverlayParams;
