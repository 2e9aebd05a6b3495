//! Project manifest lookup.
//!
//! A manifest can be stored three ways under the manifest root:
//! - `<name>.json` -- structured record
//! - `<name>.md` -- free text, truncated to the configured limit
//! - `<name>/` -- a directory holding `manifest.json` or `MANIFEST.md`

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use tl_core::error::{Recoverable, RecoverableError};
use tl_core::text::{to_kebab_case, to_snake_case, truncate_chars};
use tl_core::types::Task;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ManifestContent {
    Structured { data: serde_json::Value },
    Text { text: String, truncated: bool },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    /// Name the manifest was found under.
    pub project: String,
    pub source: String,
    pub content: ManifestContent,
}

#[async_trait]
pub trait ManifestProvider: Send + Sync {
    async fn lookup(&self, project: &str) -> Recoverable<Option<Manifest>>;
}

/// Names to try for a task, in order: board name, `project:` tag, then the
/// kebab-case and snake_case variants of the board name.
pub fn candidate_names(task: &Task) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    let board_name = task.board.as_ref().map(|b| b.name.trim().to_string());

    if let Some(name) = &board_name {
        names.push(name.clone());
    }
    if let Some(project) = task.tag_value("project") {
        names.push(project.to_string());
    }
    if let Some(name) = &board_name {
        names.push(to_kebab_case(name));
        names.push(to_snake_case(name));
    }

    let mut unique = Vec::with_capacity(names.len());
    for name in names {
        if !name.is_empty() && !unique.contains(&name) {
            unique.push(name);
        }
    }
    unique
}

// ---------------------------------------------------------------------------
// FsManifestProvider
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct FsManifestProvider {
    root: PathBuf,
    text_limit: usize,
}

enum Shape {
    Structured,
    Text,
}

impl FsManifestProvider {
    pub fn new(root: impl Into<PathBuf>, text_limit: usize) -> Self {
        Self {
            root: root.into(),
            text_limit,
        }
    }

    fn candidates(&self, project: &str) -> [(PathBuf, Shape); 4] {
        let dir = self.root.join(project);
        [
            (self.root.join(format!("{project}.json")), Shape::Structured),
            (self.root.join(format!("{project}.md")), Shape::Text),
            (dir.join("manifest.json"), Shape::Structured),
            (dir.join("MANIFEST.md"), Shape::Text),
        ]
    }

    async fn read(&self, path: &Path, shape: &Shape) -> Recoverable<ManifestContent> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| RecoverableError::new("manifest", format!("{}: {e}", path.display())))?;
        match shape {
            Shape::Structured => {
                let data = serde_json::from_str(&raw).map_err(|e| {
                    RecoverableError::new("manifest", format!("{}: {e}", path.display()))
                })?;
                Ok(ManifestContent::Structured { data })
            }
            Shape::Text => {
                let text = truncate_chars(&raw, self.text_limit);
                Ok(ManifestContent::Text {
                    truncated: text.len() < raw.len(),
                    text: text.to_string(),
                })
            }
        }
    }
}

#[async_trait]
impl ManifestProvider for FsManifestProvider {
    async fn lookup(&self, project: &str) -> Recoverable<Option<Manifest>> {
        if project.contains(['/', '\\']) || project.contains("..") {
            return Ok(None);
        }
        for (path, shape) in self.candidates(project) {
            if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
                continue;
            }
            let content = self.read(&path, &shape).await?;
            return Ok(Some(Manifest {
                project: project.to_string(),
                source: path.display().to_string(),
                content,
            }));
        }
        Ok(None)
    }
}

/// Provider for deployments without manifests.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoManifests;

#[async_trait]
impl ManifestProvider for NoManifests {
    async fn lookup(&self, _project: &str) -> Recoverable<Option<Manifest>> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidate_order_and_dedup() {
        let task = Task::new("x")
            .with_board("b1", "Billing API")
            .with_tags(["project:billing"]);
        assert_eq!(
            candidate_names(&task),
            vec!["Billing API", "billing", "billing-api", "billing_api"]
        );

        let plain = Task::new("y").with_board("b2", "web");
        assert_eq!(candidate_names(&plain), vec!["web"]);
    }

    #[tokio::test]
    async fn reads_each_storage_shape() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("alpha.json"), r#"{"stack": "rust"}"#).unwrap();
        std::fs::write(dir.path().join("beta.md"), "0123456789").unwrap();
        std::fs::create_dir(dir.path().join("gamma")).unwrap();
        std::fs::write(dir.path().join("gamma").join("MANIFEST.md"), "dir manifest").unwrap();

        let provider = FsManifestProvider::new(dir.path(), 4);

        let alpha = provider.lookup("alpha").await.unwrap().unwrap();
        assert_eq!(
            alpha.content,
            ManifestContent::Structured {
                data: serde_json::json!({"stack": "rust"})
            }
        );

        let beta = provider.lookup("beta").await.unwrap().unwrap();
        assert_eq!(
            beta.content,
            ManifestContent::Text {
                text: "0123".into(),
                truncated: true
            }
        );

        let gamma = provider.lookup("gamma").await.unwrap().unwrap();
        assert!(gamma.source.ends_with("MANIFEST.md"));

        assert!(provider.lookup("missing").await.unwrap().is_none());
        assert!(provider.lookup("../etc").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn malformed_structured_manifest_is_recoverable() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("broken.json"), "{not json").unwrap();
        let provider = FsManifestProvider::new(dir.path(), 100);
        assert!(provider.lookup("broken").await.is_err());
    }
}
