//! Tool Aggregator: discovers every tool behind a connected backend, assigns
//! it a collision-free namespaced name, persists it into the relational and
//! vector stores, and hands it to the skill classifier when one is wired.

use std::sync::Arc;

use thiserror::Error;
use tracing::warn;

use crate::aggregator::capability::{
    ClassifyInput, Embedder, SkillClassifier, ToolStore, ToolUpsert, VectorFilter, VectorPayload,
    VectorStore,
};
use crate::aggregator::registry::{Registry, ServerStatus, TenantScope};
use crate::aggregator::session_manager::SessionManager;

#[derive(Debug, Error)]
pub enum AggregatorError {
    #[error("server not found: {0}")]
    ServerNotFound(String),

    #[error("server {0} has no live session")]
    NoLiveSession(String),

    #[error("store error: {0}")]
    StoreError(String),

    #[error("classifier error: {0}")]
    ClassifierError(String),
}

pub type Result<T> = std::result::Result<T, AggregatorError>;

/// `parse_namespaced_name`: split once on the first `.`. The left part is the
/// server name; the right part (which may itself contain `.`) is the
/// original tool name at the source.
pub fn parse_namespaced_name(name: &str) -> Option<(&str, &str)> {
    name.split_once('.')
}

pub struct DiscoveryOutcome {
    pub server_id: String,
    pub discovered: usize,
    pub persisted: usize,
}

/// Default embedding dimension used when no embedder is wired, matching the
/// configured `AggregatorConfig::embedding_dimension`.
const DEFAULT_SEARCH_LIMIT: usize = 10;

pub struct ToolAggregator {
    registry: Arc<dyn Registry>,
    sessions: Arc<SessionManager>,
    tool_store: Arc<dyn ToolStore>,
    vector_store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    classifier: Arc<dyn SkillClassifier>,
}

impl ToolAggregator {
    pub fn new(
        registry: Arc<dyn Registry>,
        sessions: Arc<SessionManager>,
        tool_store: Arc<dyn ToolStore>,
        vector_store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        classifier: Arc<dyn SkillClassifier>,
    ) -> Self {
        Self {
            registry,
            sessions,
            tool_store,
            vector_store,
            embedder,
            classifier,
        }
    }

    /// Runs the discovery algorithm against one server: fetch its record and
    /// live session, list its tools, upsert each into both stores, then
    /// submit the whole batch for classification in one call.
    pub async fn discover_tools(&self, server_id: &str) -> Result<DiscoveryOutcome> {
        let started = std::time::Instant::now();
        let record = self
            .registry
            .get(server_id)
            .await
            .ok_or_else(|| AggregatorError::ServerNotFound(server_id.to_string()))?;

        if !self.sessions.is_connected(server_id) {
            return Err(AggregatorError::NoLiveSession(server_id.to_string()));
        }

        let tools = self
            .sessions
            .list_tools(Some(server_id))
            .await
            .map_err(|e| AggregatorError::NoLiveSession(e.to_string()))?;

        let mut persisted_ids = Vec::with_capacity(tools.len());
        let mut classify_inputs = Vec::with_capacity(tools.len());

        for tool in &tools {
            let namespaced = format!("{}.{}", record.name, tool.name);

            let upsert = ToolUpsert {
                namespaced_name: namespaced.clone(),
                original_name: tool.name.clone(),
                description: tool.description.clone(),
                input_schema: tool.input_schema.clone(),
                source_server_id: server_id.to_string(),
                is_external: true,
                tenant: record.tenant.clone(),
            };

            let stored = match self.tool_store.upsert_external_tool(upsert).await {
                Ok(row) => row,
                Err(e) => {
                    warn!("failed to upsert tool {}: {}", namespaced, e);
                    continue;
                }
            };

            let embedding_input = format!("{}: {}", namespaced, tool.description);
            let embedding = match self.embedder.embed(&embedding_input).await {
                Ok(v) => v,
                Err(e) => {
                    warn!(
                        "embedding failed for {}, falling back to zero vector: {}",
                        namespaced, e
                    );
                    vec![0.0; self.embedder.dimension()]
                }
            };

            let payload = VectorPayload {
                server_id: server_id.to_string(),
                server_name: record.name.clone(),
                original_name: tool.name.clone(),
                is_external: true,
                is_classified: stored.is_classified,
                skill_ids: stored.skill_ids.clone(),
                tenant: record.tenant.clone(),
            };

            if let Err(e) = self.vector_store.upsert_tool(&stored.id, embedding, payload).await {
                warn!("failed to index tool {} in vector store: {}", namespaced, e);
                continue;
            }

            classify_inputs.push(ClassifyInput {
                tool_id: stored.id.clone(),
                tool_name: namespaced.clone(),
                description: tool.description.clone(),
            });
            persisted_ids.push(stored.id);
        }

        self.registry
            .update_tool_count(server_id, persisted_ids.len())
            .await
            .map_err(|e| AggregatorError::StoreError(e.to_string()))?;

        if !classify_inputs.is_empty() {
            match self.classifier.classify_tools_batch(classify_inputs).await {
                Ok(assignments) => {
                    for assignment in assignments {
                        if let Err(e) = self
                            .tool_store
                            .update_tool_classification(
                                &assignment.tool_id,
                                assignment.skill_ids,
                                assignment.primary_skill_id,
                            )
                            .await
                        {
                            warn!("failed to apply classification to {}: {}", assignment.tool_id, e);
                        }
                    }
                }
                Err(e) => warn!("batch classification failed for server {}: {}", server_id, e),
            }
        }

        let skipped = tools.len() - persisted_ids.len();
        crate::metrics::record_discovery(server_id, persisted_ids.len(), skipped, started.elapsed());

        Ok(DiscoveryOutcome {
            server_id: server_id.to_string(),
            discovered: tools.len(),
            persisted: persisted_ids.len(),
        })
    }

    /// Walks every `connected` server in the Registry and runs discovery on
    /// each. Per-server failures are logged and skipped, never propagated.
    pub async fn aggregate_tools(&self) -> Vec<DiscoveryOutcome> {
        let servers = self.registry.list(Some(ServerStatus::Connected), None).await;
        let mut outcomes = Vec::with_capacity(servers.len());

        for server in servers {
            match self.discover_tools(&server.id).await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => warn!("discovery failed for server {}: {}", server.id, e),
            }
        }

        outcomes
    }

    pub async fn search_tools(
        &self,
        query: &str,
        server_filter: Option<Vec<String>>,
        limit: Option<usize>,
    ) -> Result<Vec<crate::aggregator::capability::ScoredToolPayload>> {
        let embedding = self
            .embedder
            .embed(query)
            .await
            .unwrap_or_else(|_| vec![0.0; self.embedder.dimension()]);

        let filter = VectorFilter {
            is_external: Some(true),
            source_server_name: server_filter,
        };

        self.vector_store
            .search(embedding, filter, limit.unwrap_or(DEFAULT_SEARCH_LIMIT))
            .await
            .map_err(|e| AggregatorError::StoreError(e.to_string()))
    }

    /// Collects the tool ids for `server_id`, deletes each vector record
    /// best-effort, then deletes the relational rows in a single atomic
    /// statement. Returns the relational delete count.
    pub async fn remove_server_tools(&self, server_id: &str) -> Result<usize> {
        let tool_ids = self
            .tool_store
            .get_tool_ids_by_server(server_id)
            .await
            .map_err(|e| AggregatorError::StoreError(e.to_string()))?;

        for id in &tool_ids {
            if let Err(e) = self.vector_store.delete_tool(id).await {
                warn!("best-effort vector delete failed for tool {}: {}", id, e);
            }
        }

        self.tool_store
            .delete_tools_by_server(server_id)
            .await
            .map_err(|e| AggregatorError::StoreError(e.to_string()))
    }
}
