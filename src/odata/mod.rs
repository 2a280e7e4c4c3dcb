//! OData module
//!
//! Metadata model and reader, type system, request engine, and response
//! normalizer for OData v2 services.

pub mod client;
pub mod guid;
pub mod metadata;
pub mod parser;
pub mod response;
pub mod types;

pub use client::{build_http_client, ClientOptions, ODataClient, QueryOptions};
pub use metadata::{EntityProperty, EntitySet, EntityType, FunctionImport, ServiceMetadata};
pub use parser::MetadataLoader;
pub use response::NormalizeOptions;
