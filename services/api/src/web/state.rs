//! services/api/src/web/state.rs
//!
//! Defines the application's shared state.

use crate::config::Config;
use std::sync::Arc;
use visitor_insight_core::bootstrap::BootstrapService;
use visitor_insight_core::identity::IdentityResolver;
use visitor_insight_core::ingest::EventIngestor;
use visitor_insight_core::ports::VisitorStore;
use visitor_insight_core::scoring::ScoringEngine;
use visitor_insight_core::session::SessionManager;

//=========================================================================================
// AppState (Shared Across All Requests)
//=========================================================================================

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn VisitorStore>,
    pub config: Arc<Config>,
    pub bootstrap: Arc<BootstrapService>,
    pub sessions: Arc<SessionManager>,
    pub ingestor: Arc<EventIngestor>,
    pub scoring: ScoringEngine,
}

impl AppState {
    /// Wires every core service onto one store.
    pub fn new(store: Arc<dyn VisitorStore>, config: Arc<Config>) -> Self {
        let resolver = Arc::new(IdentityResolver::new(store.clone()));
        let sessions = Arc::new(SessionManager::new(store.clone(), config.session_settings()));
        let bootstrap = Arc::new(BootstrapService::new(
            store.clone(),
            resolver,
            sessions.clone(),
        ));
        let ingestor = Arc::new(EventIngestor::new(store.clone(), sessions.clone()));

        Self {
            store,
            config,
            bootstrap,
            sessions,
            ingestor,
            scoring: ScoringEngine::default(),
        }
    }
}
