#![allow(clippy::result_large_err)]

use crate::core::error::AppError;
use crate::core::flow::schema::FlowGraph;
use crate::core::flow::validate::{digest, validate, ValidGraph, ValidationError};
use crate::core::types::ErrorCategory;
use crate::utils::{read_json, write_json};
use async_trait::async_trait;
use dashmap::DashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Why a publish was refused.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("graph failed validation with {} error(s)", .0.len())]
    Invalid(Vec<ValidationError>),
    #[error("graph {graph_id} version {version} is already published with different content")]
    VersionExists { graph_id: String, version: u32 },
    #[error(transparent)]
    Store(#[from] AppError),
}

/// Published, immutable graph versions.
#[async_trait]
pub trait GraphCatalog: Send + Sync {
    /// Validate and store. Re-publishing identical content is a no-op.
    async fn publish(&self, graph: FlowGraph) -> Result<Arc<ValidGraph>, PublishError>;

    async fn get(&self, graph_id: &str, version: u32) -> Result<Arc<ValidGraph>, AppError>;

    async fn latest(&self, graph_id: &str) -> Result<Arc<ValidGraph>, AppError>;
}

fn not_published(graph_id: &str, version: Option<u32>) -> AppError {
    let message = match version {
        Some(version) => format!("graph {} version {} is not published", graph_id, version),
        None => format!("graph {} has no published version", graph_id),
    };
    AppError::not_found(message)
}

fn check_existing(existing: &ValidGraph, graph: &FlowGraph) -> Result<(), PublishError> {
    if existing.digest() == digest(graph) {
        Ok(())
    } else {
        Err(PublishError::VersionExists {
            graph_id: graph.id.clone(),
            version: graph.version,
        })
    }
}

#[derive(Default)]
pub struct MemoryGraphCatalog {
    graphs: DashMap<(String, u32), Arc<ValidGraph>>,
}

impl MemoryGraphCatalog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GraphCatalog for MemoryGraphCatalog {
    async fn publish(&self, graph: FlowGraph) -> Result<Arc<ValidGraph>, PublishError> {
        let key = (graph.id.clone(), graph.version);
        if let Some(existing) = self.graphs.get(&key) {
            check_existing(&existing, &graph)?;
            return Ok(existing.clone());
        }
        let valid = Arc::new(validate(&graph).map_err(PublishError::Invalid)?);
        let entry = self.graphs.entry(key).or_insert_with(|| valid.clone());
        check_existing(&entry, &graph)?;
        tracing::info!(graph_id = %graph.id, version = graph.version, "published graph");
        Ok(entry.clone())
    }

    async fn get(&self, graph_id: &str, version: u32) -> Result<Arc<ValidGraph>, AppError> {
        self.graphs
            .get(&(graph_id.to_string(), version))
            .map(|g| g.clone())
            .ok_or_else(|| not_published(graph_id, Some(version)))
    }

    async fn latest(&self, graph_id: &str) -> Result<Arc<ValidGraph>, AppError> {
        self.graphs
            .iter()
            .filter(|entry| entry.key().0 == graph_id)
            .max_by_key(|entry| entry.key().1)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| not_published(graph_id, None))
    }
}

/// Catalog persisted as `graphs/<id>/v<version>.json`.
pub struct FileGraphCatalog {
    root: PathBuf,
    cache: DashMap<(String, u32), Arc<ValidGraph>>,
}

impl FileGraphCatalog {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            cache: DashMap::new(),
        }
    }

    fn graph_dir(&self, graph_id: &str) -> PathBuf {
        self.root.join("graphs").join(graph_id)
    }

    fn graph_file(&self, graph_id: &str, version: u32) -> PathBuf {
        self.graph_dir(graph_id).join(format!("v{}.json", version))
    }

    fn load_file(&self, path: &Path) -> Result<Arc<ValidGraph>, AppError> {
        let graph: FlowGraph = read_json(path)?;
        let key = (graph.id.clone(), graph.version);
        if let Some(cached) = self.cache.get(&key) {
            return Ok(cached.clone());
        }
        let valid = validate(&graph).map_err(|errors| {
            AppError::new(
                ErrorCategory::ValidationError,
                format!(
                    "stored graph {} failed validation: {}",
                    path.display(),
                    errors
                        .iter()
                        .map(ToString::to_string)
                        .collect::<Vec<_>>()
                        .join("; ")
                ),
            )
            .with_code("FLOW-VAL-000")
        })?;
        let valid = Arc::new(valid);
        self.cache.insert(key, valid.clone());
        Ok(valid)
    }

    fn versions(&self, graph_id: &str) -> Result<Vec<u32>, AppError> {
        let dir = self.graph_dir(graph_id);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut versions = Vec::new();
        for entry in fs::read_dir(&dir)?.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(version) = name
                .strip_prefix('v')
                .and_then(|rest| rest.strip_suffix(".json"))
                .and_then(|num| num.parse::<u32>().ok())
            {
                versions.push(version);
            }
        }
        versions.sort_unstable();
        Ok(versions)
    }
}

#[async_trait]
impl GraphCatalog for FileGraphCatalog {
    async fn publish(&self, graph: FlowGraph) -> Result<Arc<ValidGraph>, PublishError> {
        let path = self.graph_file(&graph.id, graph.version);
        if path.exists() {
            let existing = self.load_file(&path)?;
            check_existing(&existing, &graph)?;
            return Ok(existing);
        }
        let valid = Arc::new(validate(&graph).map_err(PublishError::Invalid)?);
        write_json(&path, &graph)?;
        self.cache
            .insert((graph.id.clone(), graph.version), valid.clone());
        tracing::info!(graph_id = %graph.id, version = graph.version, path = %path.display(), "published graph");
        Ok(valid)
    }

    async fn get(&self, graph_id: &str, version: u32) -> Result<Arc<ValidGraph>, AppError> {
        let path = self.graph_file(graph_id, version);
        if !path.exists() {
            return Err(not_published(graph_id, Some(version)));
        }
        self.load_file(&path)
    }

    async fn latest(&self, graph_id: &str) -> Result<Arc<ValidGraph>, AppError> {
        let version = self
            .versions(graph_id)?
            .last()
            .copied()
            .ok_or_else(|| not_published(graph_id, None))?;
        self.get(graph_id, version).await
    }
}
