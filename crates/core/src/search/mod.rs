pub mod fusion;
pub mod lexical;

pub use fusion::reciprocal_rank_fusion;
pub use lexical::{build_match, LexicalIndex, QueryMode};
