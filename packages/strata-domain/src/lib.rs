pub mod graph;
pub mod namespace;

mod error;

pub use error::{Error, Result};
pub use graph::{
	Direction, NodeType, RawDegree, RawEdge, RawEpisode, RawGraphStats, RawNeighbor, RawNode,
	RawPath, RawResult, RawSubgraph, Receipt,
};
pub use namespace::{Namespace, NamespaceKind};
