pub mod ranker;

pub use ranker::{cosine_similarity, CosineRanker, Ranker};
