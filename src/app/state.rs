//! Application state shared across routes

use std::sync::Arc;

use crate::config::Config;
use crate::game::MatchHandle;
use crate::store::HighscoreStore;
use crate::ws::connections::ConnectionRegistry;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub match_handle: MatchHandle,
    pub highscores: Arc<dyn HighscoreStore>,
    pub connections: Arc<ConnectionRegistry>,
}

impl AppState {
    pub fn new(config: Config, match_handle: MatchHandle, highscores: Arc<dyn HighscoreStore>) -> Self {
        Self {
            config: Arc::new(config),
            match_handle,
            highscores,
            connections: Arc::new(ConnectionRegistry::new()),
        }
    }
}
