//! Semantic search seam used by retrieval-augmented context.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use tl_core::error::Recoverable;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub score: f32,
    pub content: String,
    pub source: String,
    #[serde(default)]
    pub project: Option<String>,
}

/// An external vector index. Embedding and search failures come back as
/// `Err` and the caller substitutes an empty result.
#[async_trait]
pub trait VectorSearch: Send + Sync {
    async fn search(&self, query: &str, limit: usize) -> Recoverable<Vec<SearchHit>>;
}

/// Index that never returns anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopVectorSearch;

#[async_trait]
impl VectorSearch for NoopVectorSearch {
    async fn search(&self, _query: &str, _limit: usize) -> Recoverable<Vec<SearchHit>> {
        Ok(Vec::new())
    }
}

/// Fixed corpus ranked by how many query words each document contains.
/// Useful for offline runs and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticVectorSearch {
    docs: Vec<SearchHit>,
}

impl StaticVectorSearch {
    pub fn new(docs: Vec<SearchHit>) -> Self {
        Self { docs }
    }
}

#[async_trait]
impl VectorSearch for StaticVectorSearch {
    async fn search(&self, query: &str, limit: usize) -> Recoverable<Vec<SearchHit>> {
        let words: Vec<String> = query
            .split_whitespace()
            .map(|w| w.to_lowercase())
            .filter(|w| w.len() > 2)
            .collect();
        if words.is_empty() {
            return Ok(Vec::new());
        }
        let mut scored: Vec<SearchHit> = self
            .docs
            .iter()
            .filter_map(|doc| {
                let content = doc.content.to_lowercase();
                let hits = words.iter().filter(|w| content.contains(w.as_str())).count();
                (hits > 0).then(|| SearchHit {
                    score: hits as f32 / words.len() as f32,
                    ..doc.clone()
                })
            })
            .collect();
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(limit);
        Ok(scored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(content: &str) -> SearchHit {
        SearchHit {
            score: 0.0,
            content: content.into(),
            source: "notes".into(),
            project: None,
        }
    }

    #[tokio::test]
    async fn static_search_ranks_by_overlap() {
        let index = StaticVectorSearch::new(vec![
            doc("login page styles"),
            doc("login session timeout handling"),
            doc("unrelated"),
        ]);
        let hits = index.search("login timeout", 5).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].content, "login session timeout handling");
        assert!(hits[0].score > hits[1].score);

        assert_eq!(index.search("login", 1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn noop_is_empty() {
        assert!(NoopVectorSearch.search("anything", 5).await.unwrap().is_empty());
    }
}
