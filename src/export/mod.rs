//! Exporters: rendered frames to PNG/JPEG/WebP, configurations to source code.

pub mod code;
pub mod image;
pub mod minify;

pub use self::code::{export_code, generate_code, CodeExportOptions, CodeFormat};
pub use self::image::{encode_frame, ImageExport, ImageExportOptions, ImageFormat};
pub use self::minify::minify;
