//! Inference resources and their process-wide manager

mod embedding;
mod manager;
mod nli;
mod topics;

pub use embedding::{cosine_similarity, l2_normalize, mean_vector, Embedder, EmbeddingError, HashingEmbedder};
#[cfg(feature = "embeddings")]
pub use embedding::FastEmbedEmbedder;
pub use manager::{ModelResourceManager, ResourceError, ResourceHandle, ResourceKey, ResourceLoader};
pub use nli::{LexicalNliClassifier, NliClassifier, NliLabel, NliPrediction};
pub use topics::{folded_terms, KeywordTopicModel, Topic, TopicModel};
