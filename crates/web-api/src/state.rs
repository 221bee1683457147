use std::sync::Arc;

use application::ChatEngine;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ChatEngine>,
}

impl AppState {
    pub fn new(engine: Arc<ChatEngine>) -> Self {
        Self { engine }
    }
}
