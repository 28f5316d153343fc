//! The collaborators the notification pipeline calls out to.

use std::sync::Arc;

use sta_model::{
    DefaultPathParser, EntityFormatter, JsonFormatter, PathParser, PersistenceManager,
    RequestExecutor,
};

/// Handles to path parsing, storage, rendering and request execution.
///
/// Cloning is cheap; every component that needs a collaborator holds its own
/// clone.
#[derive(Clone)]
pub struct Services {
    pub parser: Arc<dyn PathParser>,
    pub persistence: Arc<dyn PersistenceManager>,
    pub formatter: Arc<dyn EntityFormatter>,
    pub executor: Arc<dyn RequestExecutor>,
}

impl Services {
    /// Services with the stock path parser and JSON formatter
    pub fn new(persistence: Arc<dyn PersistenceManager>, executor: Arc<dyn RequestExecutor>) -> Self {
        Self {
            parser: Arc::new(DefaultPathParser::new()),
            persistence,
            formatter: Arc::new(JsonFormatter::new()),
            executor,
        }
    }

    pub fn with_parser(mut self, parser: Arc<dyn PathParser>) -> Self {
        self.parser = parser;
        self
    }

    pub fn with_formatter(mut self, formatter: Arc<dyn EntityFormatter>) -> Self {
        self.formatter = formatter;
        self
    }
}

impl std::fmt::Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Services").finish_non_exhaustive()
    }
}
