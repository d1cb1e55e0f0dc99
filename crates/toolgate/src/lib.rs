// toolgate: an MCP gateway with a declarative virtual-tool registry
//
// Clients connect over stdio, SSE, or streamable HTTP and see a curated
// set of virtual tools; each call is translated and forwarded to one of
// many upstream MCP servers. The registry drives four transformations,
// resolved across inheritance chains at load time: renaming, input-schema
// projection with hidden defaults, output projection via path
// expressions, and promotion of JSON embedded in free-text responses.

pub mod config;
pub mod gateway;
pub mod jsonpath;
pub mod jsontext;
pub mod metrics;
pub mod projection;
pub mod registry;
pub mod transform;
pub mod upstream;

pub use config::{GatewayConfig, ListenMode};
pub use gateway::{serve, Gateway};
pub use registry::{load_registry, RegistryError, ResolvedRegistry};
