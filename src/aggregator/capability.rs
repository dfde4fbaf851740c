//! Capability interfaces for the optional collaborators the aggregator can be
//! wired up with: a relational tool repository, a vector store, an embedding
//! client, a skill classifier, and an event sink. Each is a small
//! `async_trait` so the core never inspects concrete types; when a
//! collaborator isn't configured, a null-object implementation stands in and
//! never errors.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::aggregator::registry::TenantScope;
use crate::error::Result;

/// A tool as discovered from a backend, ready to be upserted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolUpsert {
    pub namespaced_name: String,
    pub original_name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
    pub source_server_id: String,
    pub is_external: bool,
    pub tenant: TenantScope,
}

/// A tool row as stored in the relational repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolRecord {
    pub id: String,
    pub name: String,
    pub original_name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
    pub source_server_id: String,
    pub is_external: bool,
    pub is_classified: bool,
    pub skill_ids: Vec<String>,
    pub primary_skill_id: Option<String>,
    pub tenant: TenantScope,
}

/// Classification assignment returned by a `SkillClassifier` for one tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillAssignment {
    pub tool_id: String,
    pub skill_ids: Vec<String>,
    pub primary_skill_id: Option<String>,
}

/// Input to a batch classification call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifyInput {
    pub tool_id: String,
    pub tool_name: String,
    pub description: String,
}

/// The relational tool repository. All async; absence is modelled by
/// [`NullToolStore`].
#[async_trait]
pub trait ToolStore: Send + Sync {
    async fn upsert_external_tool(&self, tool: ToolUpsert) -> Result<ToolRecord>;
    async fn get_tool_by_name(&self, name: &str) -> Result<Option<ToolRecord>>;
    async fn get_tool_ids_by_server(&self, server_id: &str) -> Result<Vec<String>>;
    /// Atomic delete-with-count: `WITH deleted AS (...) SELECT COUNT(*) FROM deleted`.
    async fn delete_tools_by_server(&self, server_id: &str) -> Result<usize>;
    async fn update_tool_classification(
        &self,
        tool_id: &str,
        skill_ids: Vec<String>,
        primary_skill_id: Option<String>,
    ) -> Result<()>;
}

/// Payload carried alongside a tool's embedding in the vector store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorPayload {
    pub server_id: String,
    pub server_name: String,
    pub original_name: String,
    pub is_external: bool,
    pub is_classified: bool,
    pub skill_ids: Vec<String>,
    pub tenant: TenantScope,
}

/// A scored hit returned from [`VectorStore::search`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredToolPayload {
    pub tool_id: String,
    pub score: f32,
    pub payload: VectorPayload,
}

/// Filter conditions passed through to the vector store's search call. The
/// filter DSL itself is opaque to the core — it is whatever the wired store
/// understands.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VectorFilter {
    pub is_external: Option<bool>,
    pub source_server_name: Option<Vec<String>>,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn upsert_tool(
        &self,
        tool_id: &str,
        embedding: Vec<f32>,
        payload: VectorPayload,
    ) -> Result<()>;
    /// Best-effort: a failure here does not roll back the relational delete.
    async fn delete_tool(&self, tool_id: &str) -> Result<()>;
    async fn search(
        &self,
        query_vector: Vec<f32>,
        filter: VectorFilter,
        limit: usize,
    ) -> Result<Vec<ScoredToolPayload>>;
}

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, input: &str) -> Result<Vec<f32>>;
    fn dimension(&self) -> usize;
}

#[async_trait]
pub trait SkillClassifier: Send + Sync {
    async fn classify_tools_batch(&self, tools: Vec<ClassifyInput>) -> Result<Vec<SkillAssignment>>;
}

#[async_trait]
pub trait EventSink: Send + Sync {
    async fn emit(&self, event_name: &str, payload: serde_json::Value);
}

/// Null-object `ToolStore` backed by nothing — discovery still runs but
/// nothing is persisted relationally. Used when the binary has no database
/// wired up (embedded / test mode).
#[derive(Debug, Default)]
pub struct NullToolStore;

#[async_trait]
impl ToolStore for NullToolStore {
    async fn upsert_external_tool(&self, tool: ToolUpsert) -> Result<ToolRecord> {
        Ok(ToolRecord {
            id: tool.namespaced_name.clone(),
            name: tool.namespaced_name,
            original_name: tool.original_name,
            description: tool.description,
            input_schema: tool.input_schema,
            source_server_id: tool.source_server_id,
            is_external: tool.is_external,
            is_classified: false,
            skill_ids: Vec::new(),
            primary_skill_id: None,
            tenant: tool.tenant,
        })
    }

    async fn get_tool_by_name(&self, _name: &str) -> Result<Option<ToolRecord>> {
        Ok(None)
    }

    async fn get_tool_ids_by_server(&self, _server_id: &str) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    async fn delete_tools_by_server(&self, _server_id: &str) -> Result<usize> {
        Ok(0)
    }

    async fn update_tool_classification(
        &self,
        _tool_id: &str,
        _skill_ids: Vec<String>,
        _primary_skill_id: Option<String>,
    ) -> Result<()> {
        Ok(())
    }
}

/// Null-object `VectorStore` — searches always return empty.
#[derive(Debug, Default)]
pub struct NullVectorStore;

#[async_trait]
impl VectorStore for NullVectorStore {
    async fn upsert_tool(
        &self,
        _tool_id: &str,
        _embedding: Vec<f32>,
        _payload: VectorPayload,
    ) -> Result<()> {
        Ok(())
    }

    async fn delete_tool(&self, _tool_id: &str) -> Result<()> {
        Ok(())
    }

    async fn search(
        &self,
        _query_vector: Vec<f32>,
        _filter: VectorFilter,
        _limit: usize,
    ) -> Result<Vec<ScoredToolPayload>> {
        Ok(Vec::new())
    }
}

/// Null-object `Embedder` — produces a fixed-length zero vector so indexing
/// stays consistent even without a real embedding client.
#[derive(Debug)]
pub struct NullEmbedder {
    dimension: usize,
}

impl NullEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

#[async_trait]
impl Embedder for NullEmbedder {
    async fn embed(&self, _input: &str) -> Result<Vec<f32>> {
        Ok(vec![0.0; self.dimension])
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Null-object `SkillClassifier` — tools remain unclassified.
#[derive(Debug, Default)]
pub struct NullSkillClassifier;

#[async_trait]
impl SkillClassifier for NullSkillClassifier {
    async fn classify_tools_batch(
        &self,
        _tools: Vec<ClassifyInput>,
    ) -> Result<Vec<SkillAssignment>> {
        Ok(Vec::new())
    }
}

/// Null-object `EventSink` — events are dropped.
#[derive(Debug, Default)]
pub struct NullEventSink;

#[async_trait]
impl EventSink for NullEventSink {
    async fn emit(&self, _event_name: &str, _payload: serde_json::Value) {}
}
