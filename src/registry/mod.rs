//! Registries: nodes, metadata, functions and compiled handlers.

pub mod functions;
pub mod handlers;
pub mod metadata;
pub mod nodes;

pub use functions::{FunctionBuilder, FunctionEntry, FunctionRegistry};
pub use handlers::{HandlerEntry, HandlerRegistry};
pub use metadata::{MetaKey, MetadataRegistry};
pub use nodes::NodeRegistry;
