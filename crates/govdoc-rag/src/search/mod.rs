pub mod filter;
pub mod hybrid;
pub mod retriever;

pub use filter::ExclusionPolicy;
pub use hybrid::{blend, normalize_lexical, rank_results, weighted_fusion};
pub use retriever::{FetchOutcome, HybridRetriever, PartitionReport, SearchOutcome, SearchRequest};
