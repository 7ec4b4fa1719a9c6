//! Shared state handed to every API handler

use crate::engine::Engine;

#[derive(Clone)]
pub struct ApiState {
    pub engine: Engine,
}

impl ApiState {
    pub fn new(engine: Engine) -> Self {
        Self { engine }
    }
}
