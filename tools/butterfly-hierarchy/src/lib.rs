//! Butterfly-hierarchy - OSRM graph ingestion and contraction hierarchy serialization
//!
//! Reads a road graph in one of the OSRM interchange formats, remaps node
//! identifiers to dense indices, contracts it and writes the node table,
//! hierarchy and spatial index files a query server loads.

pub mod cli;
pub mod config;
pub mod contract;
pub mod formats;
pub mod graph;
pub mod pipeline;
pub mod remap;
pub mod spatial;
pub mod turn_info;
pub mod validate;

pub use formats::{EdgePayload, Hierarchy, HierarchyEdge, HsgrLayout, InputFormat};
pub use graph::{CanonicalEdge, LoadedGraph, NodeRecord};
pub use pipeline::{OutputPaths, Pipeline, PipelineOptions, PipelineReport};
pub use remap::IdRemap;
