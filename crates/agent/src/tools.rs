use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::RwLock;

pub const CONSULT_PUBLIC_DOCS: &str = "consult_public_docs";
pub const CONSULT_USER_CONTEXT: &str = "consult_user_context";
pub const CHECK_LIVE_INSTANCE: &str = "check_live_instance";
pub const CHECK_TABLE_SCHEMA: &str = "check_table_schema";
pub const FETCH_RECENT_CHANGES: &str = "fetch_recent_changes";
pub const GET_ERROR_LOGS: &str = "get_error_logs";
pub const SAVE_LEARNED_PREFERENCE: &str = "save_learned_preference";

/// A specialist's request to run a named capability with structured arguments.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolRequest {
    pub tool_name: String,
    #[serde(default)]
    pub arguments: Value,
}

impl ToolRequest {
    pub fn new(tool_name: impl Into<String>, arguments: Value) -> Self {
        Self { tool_name: tool_name.into(), arguments }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ToolError {
    #[error("tool `{0}` is not registered")]
    UnknownTool(String),
    #[error("tool `{tool}` is not available to the {specialist} specialist")]
    NotPermitted { tool: String, specialist: String },
    #[error("tool `{0}` requires the user's permission first")]
    ConsentRequired(String),
    #[error("invalid arguments for `{tool}`: {message}")]
    InvalidArguments { tool: String, message: String },
    #[error("tool `{tool}` timed out after {timeout_secs}s")]
    Timeout { tool: String, timeout_secs: u64 },
    #[error("tool `{tool}` is unavailable: {message}")]
    Unavailable { tool: String, message: String },
    #[error("tool `{tool}` failed: {message}")]
    Execution { tool: String, message: String },
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    /// Sensitive tools touch the user's live system and are consent-gated.
    fn sensitive(&self) -> bool {
        false
    }
    async fn execute(&self, input: Value) -> Result<String, ToolError>;
}

pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    timeout: Duration,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new(Duration::from_secs(20))
    }
}

impl ToolRegistry {
    pub fn new(timeout: Duration) -> Self {
        Self { tools: HashMap::new(), timeout }
    }

    pub fn register<T>(&mut self, tool: T)
    where
        T: Tool + 'static,
    {
        self.tools.insert(tool.name().to_string(), Arc::new(tool));
    }

    pub fn is_sensitive(&self, name: &str) -> bool {
        self.tools.get(name).map(|tool| tool.sensitive()).unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Runs the tool under the registry timeout. A timeout is an ordinary
    /// recoverable `ToolError`.
    pub async fn invoke(&self, request: &ToolRequest) -> Result<String, ToolError> {
        let tool = self
            .tools
            .get(&request.tool_name)
            .ok_or_else(|| ToolError::UnknownTool(request.tool_name.clone()))?;

        match tokio::time::timeout(self.timeout, tool.execute(request.arguments.clone())).await {
            Ok(result) => result,
            Err(_) => Err(ToolError::Timeout {
                tool: request.tool_name.clone(),
                timeout_secs: self.timeout.as_secs(),
            }),
        }
    }
}

/// Stand-in for an external capability whose provider is not wired into this
/// deployment. Always answers with `ToolError::Unavailable`.
#[derive(Clone, Debug)]
pub struct UnconfiguredTool {
    name: &'static str,
    description: &'static str,
    sensitive: bool,
}

impl UnconfiguredTool {
    pub fn new(name: &'static str, description: &'static str, sensitive: bool) -> Self {
        Self { name, description, sensitive }
    }
}

#[async_trait]
impl Tool for UnconfiguredTool {
    fn name(&self) -> &'static str {
        self.name
    }

    fn description(&self) -> &'static str {
        self.description
    }

    fn sensitive(&self) -> bool {
        self.sensitive
    }

    async fn execute(&self, _input: Value) -> Result<String, ToolError> {
        Err(ToolError::Unavailable {
            tool: self.name.to_string(),
            message: "no provider is configured for this capability".to_string(),
        })
    }
}

/// Keeps preferences the user asked the assistant to remember.
#[derive(Clone, Default)]
pub struct PreferenceStore {
    entries: Arc<RwLock<BTreeMap<String, String>>>,
}

impl PreferenceStore {
    pub async fn all(&self) -> BTreeMap<String, String> {
        self.entries.read().await.clone()
    }

    /// Entries whose key or value mentions any word of `query` (three letters
    /// or more). A query without such words returns everything.
    pub async fn search(&self, query: &str) -> Vec<(String, String)> {
        let terms = query
            .split(|ch: char| !ch.is_alphanumeric() && ch != '_')
            .filter(|term| term.chars().count() >= 3)
            .map(str::to_lowercase)
            .collect::<Vec<_>>();

        self.all()
            .await
            .into_iter()
            .filter(|(key, value)| {
                let haystack = format!("{} {}", key.to_lowercase(), value.to_lowercase());
                terms.is_empty() || terms.iter().any(|term| haystack.contains(term.as_str()))
            })
            .collect()
    }
}

#[derive(Clone, Default)]
pub struct SavePreferenceTool {
    store: PreferenceStore,
}

impl SavePreferenceTool {
    pub fn new(store: PreferenceStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for SavePreferenceTool {
    fn name(&self) -> &'static str {
        SAVE_LEARNED_PREFERENCE
    }

    fn description(&self) -> &'static str {
        "Remember a user preference (`key`, `value`) for later turns"
    }

    async fn execute(&self, input: Value) -> Result<String, ToolError> {
        let field = |name: &str| {
            input
                .get(name)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
                .ok_or_else(|| ToolError::InvalidArguments {
                    tool: SAVE_LEARNED_PREFERENCE.to_string(),
                    message: format!("`{name}` must be a non-empty string"),
                })
        };
        let key = field("key")?;
        let value = field("value")?;

        self.store.entries.write().await.insert(key.clone(), value);
        Ok(format!("Saved preference `{key}`."))
    }
}

/// Answers user-context lookups from the preferences saved in earlier turns.
/// The internal knowledge base provider is not wired in, so a lookup with no
/// matching preference is reported as unavailable.
#[derive(Clone, Default)]
pub struct UserContextTool {
    store: PreferenceStore,
}

impl UserContextTool {
    pub fn new(store: PreferenceStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for UserContextTool {
    fn name(&self) -> &'static str {
        CONSULT_USER_CONTEXT
    }

    fn description(&self) -> &'static str {
        "Search the user's saved preferences and internal policies"
    }

    async fn execute(&self, input: Value) -> Result<String, ToolError> {
        let query = input.get("query").and_then(Value::as_str).unwrap_or("");
        let matches = self.store.search(query).await;
        if matches.is_empty() {
            return Err(ToolError::Unavailable {
                tool: CONSULT_USER_CONTEXT.to_string(),
                message: "no saved preference matches and no knowledge base is configured"
                    .to_string(),
            });
        }

        let lines = matches
            .iter()
            .map(|(key, value)| format!("- {key}: {value}"))
            .collect::<Vec<_>>()
            .join("\n");
        Ok(format!("Saved user preferences:\n{lines}"))
    }
}

/// Every capability the specialists know about. External providers are
/// registered as unconfigured until a deployment supplies them.
pub fn default_registry(timeout: Duration, preferences: PreferenceStore) -> ToolRegistry {
    let mut registry = ToolRegistry::new(timeout);
    registry.register(UnconfiguredTool::new(
        CONSULT_PUBLIC_DOCS,
        "Search the vendor's public product documentation",
        false,
    ));
    registry.register(UserContextTool::new(preferences.clone()));
    registry.register(UnconfiguredTool::new(
        CHECK_LIVE_INSTANCE,
        "Query configuration and records on the user's live instance",
        true,
    ));
    registry.register(UnconfiguredTool::new(
        CHECK_TABLE_SCHEMA,
        "Describe the columns and references of a table",
        false,
    ));
    registry.register(UnconfiguredTool::new(
        FETCH_RECENT_CHANGES,
        "List recent configuration changes on the instance",
        false,
    ));
    registry.register(UnconfiguredTool::new(
        GET_ERROR_LOGS,
        "Fetch recent error log entries from the instance",
        false,
    ));
    registry.register(SavePreferenceTool::new(preferences));
    registry
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::{json, Value};

    use super::{
        default_registry, PreferenceStore, SavePreferenceTool, Tool, ToolError, ToolRegistry,
        ToolRequest, CHECK_LIVE_INSTANCE, CONSULT_PUBLIC_DOCS, CONSULT_USER_CONTEXT,
        SAVE_LEARNED_PREFERENCE,
    };

    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &'static str {
            "slow"
        }

        fn description(&self) -> &'static str {
            "never finishes in time"
        }

        async fn execute(&self, _input: Value) -> Result<String, ToolError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("late".to_string())
        }
    }

    #[tokio::test]
    async fn timeout_surfaces_as_tool_error() {
        let mut registry = ToolRegistry::new(Duration::from_millis(20));
        registry.register(SlowTool);

        let error = registry
            .invoke(&ToolRequest::new("slow", Value::Null))
            .await
            .expect_err("should time out");

        assert!(matches!(error, ToolError::Timeout { ref tool, .. } if tool == "slow"));
    }

    #[tokio::test]
    async fn unknown_tool_is_reported() {
        let registry = ToolRegistry::default();
        let error = registry
            .invoke(&ToolRequest::new("missing", Value::Null))
            .await
            .expect_err("not registered");
        assert_eq!(error, ToolError::UnknownTool("missing".to_string()));
    }

    #[tokio::test]
    async fn default_registry_marks_only_live_instance_sensitive() {
        let registry = default_registry(Duration::from_secs(1), PreferenceStore::default());

        assert_eq!(registry.len(), 7);
        assert!(registry.is_sensitive(CHECK_LIVE_INSTANCE));
        assert!(!registry.is_sensitive(CONSULT_PUBLIC_DOCS));
        let error = registry
            .invoke(&ToolRequest::new(CONSULT_PUBLIC_DOCS, json!({ "query": "sla" })))
            .await
            .expect_err("no provider configured");
        assert!(matches!(error, ToolError::Unavailable { .. }));
    }

    #[tokio::test]
    async fn preference_tool_stores_values() {
        let store = PreferenceStore::default();
        let tool = SavePreferenceTool::new(store.clone());

        let output = tool
            .execute(json!({ "key": "answer_style", "value": "bullet points" }))
            .await
            .expect("saved");

        assert_eq!(output, "Saved preference `answer_style`.");
        assert_eq!(store.all().await.get("answer_style").map(String::as_str), Some("bullet points"));
        assert_eq!(tool.name(), SAVE_LEARNED_PREFERENCE);

        let error = tool.execute(json!({ "key": "x" })).await.expect_err("missing value");
        assert!(matches!(error, ToolError::InvalidArguments { .. }));
    }

    #[tokio::test]
    async fn saved_preference_is_returned_by_user_context_lookup() {
        let registry = default_registry(Duration::from_secs(1), PreferenceStore::default());

        let before = registry
            .invoke(&ToolRequest::new(CONSULT_USER_CONTEXT, json!({ "query": "approval policy" })))
            .await
            .expect_err("nothing saved yet");
        assert!(matches!(before, ToolError::Unavailable { .. }));

        registry
            .invoke(&ToolRequest::new(
                SAVE_LEARNED_PREFERENCE,
                json!({ "key": "approval_policy", "value": "two managers sign off on changes" }),
            ))
            .await
            .expect("saved");
        registry
            .invoke(&ToolRequest::new(
                SAVE_LEARNED_PREFERENCE,
                json!({ "key": "answer_style", "value": "bullet points" }),
            ))
            .await
            .expect("saved");

        let found = registry
            .invoke(&ToolRequest::new(CONSULT_USER_CONTEXT, json!({ "query": "Approval rules?" })))
            .await
            .expect("preference matches");
        assert!(found.contains("approval_policy: two managers sign off on changes"));
        assert!(!found.contains("answer_style"));

        let unrelated = registry
            .invoke(&ToolRequest::new(CONSULT_USER_CONTEXT, json!({ "query": "sla breach" })))
            .await;
        assert!(matches!(unrelated, Err(ToolError::Unavailable { .. })));
    }
}
