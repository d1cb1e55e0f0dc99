// Tool registry
//
// A declarative virtual-tool surface: rename, hide and default arguments,
// and project outputs, all resolved across tool inheritance chains into
// immutable precomputed views.

pub mod error;
mod interpolate;
mod loader;
pub mod resolve;
pub mod types;

pub use error::RegistryError;
pub use loader::{load_registry, parse_registry};
pub use resolve::{ResolvedRegistry, ResolvedTool};
pub use types::{RegistryDoc, ServerDef, ToolDef, ValidationMode};
