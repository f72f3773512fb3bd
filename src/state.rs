use std::sync::Arc;

use crate::config::EngineConfig;
use crate::execution::ExecutionManager;
use crate::files::FileStore;
use crate::registry::SessionRegistry;

/// Shared application state passed to all handlers via the axum State
/// extractor. The registries are the only broadly shared mutable state; all
/// mutation goes through their atomic operations.
#[derive(Clone)]
pub struct AppState {
    /// Connection/room/presence registry
    pub registry: Arc<SessionRegistry>,
    /// Active execution sessions, keyed by connection id
    pub executions: Arc<ExecutionManager>,
    /// Narrow interface to the persistence layer's file tree
    pub files: Arc<dyn FileStore>,
    /// Execution engine endpoint and limits
    pub engine: EngineConfig,
}
