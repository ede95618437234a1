//! Scripted model service for engine and command tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::client::ModelService;
use super::errors::InferenceError;
use super::types::{ModelReply, ModelRequest};

type Step = Result<ModelReply, InferenceError>;

/// Replays a fixed script of replies, repeating the last one once it runs out.
/// Every request is recorded for later inspection.
pub struct ScriptedModel {
    script: Mutex<VecDeque<Step>>,
    last: Mutex<Option<Step>>,
    requests: Mutex<Vec<ModelRequest>>,
}

impl ScriptedModel {
    pub fn new(script: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            last: Mutex::new(None),
            requests: Mutex::new(Vec::new()),
        })
    }

    /// Number of `complete` calls so far.
    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn request(&self, index: usize) -> ModelRequest {
        self.requests.lock().unwrap()[index].clone()
    }
}

#[async_trait]
impl ModelService for ScriptedModel {
    async fn complete(&self, request: ModelRequest) -> Result<ModelReply, InferenceError> {
        self.requests.lock().unwrap().push(request);
        let next = self.script.lock().unwrap().pop_front();
        let mut last = self.last.lock().unwrap();
        match next {
            Some(step) => {
                *last = Some(step.clone());
                step
            }
            None => last.clone().expect("script is empty"),
        }
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}
