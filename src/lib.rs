//! Parameter facade, presets and exporters for a procedural 3D gradient
//! shader. `ShaderFacade` is the entry point; engines live in `engine`.

pub mod adaptive;
pub mod animation;
pub mod clock;
pub mod config;
pub mod debounce;
pub mod engine;
pub mod error_codes;
pub mod events;
pub mod export;
pub mod facade;
pub mod geometry;
pub mod gradient;
pub mod math;
pub mod noise;
pub mod params;
pub mod presets;
pub mod sync;
pub mod validation;

pub use facade::{FacadeContext, FacadeError, ShaderFacade, UpdateOptions};
