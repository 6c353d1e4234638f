//! Shared application state for request handlers.

use std::sync::Arc;

use crate::config::AppConfig;
use crate::validation::RuleSet;

/// Shared application state, cloneable across handlers via Arc-wrapped fields.
///
/// Both fields are immutable after startup, so requests never contend on
/// anything here.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub keyword_rules: Arc<RuleSet>,
}

impl AppState {
    /// Creates a new application state with the keyword route's rule table.
    pub fn new(config: AppConfig) -> Self {
        Self::with_rules(config, RuleSet::keyword_lookup())
    }

    pub fn with_rules(config: AppConfig, keyword_rules: RuleSet) -> Self {
        Self {
            config: Arc::new(config),
            keyword_rules: Arc::new(keyword_rules),
        }
    }
}
