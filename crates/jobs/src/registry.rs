use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::info;

use crate::error::JobError;
use crate::job::JobKind;
use crate::task::ComputeFn;

/// Compute functions by kind, populated at startup.
#[derive(Default)]
pub struct KindRegistry {
    functions: RwLock<HashMap<JobKind, Arc<dyn ComputeFn>>>,
}

impl KindRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, kind: JobKind, compute: Arc<dyn ComputeFn>) -> Result<(), JobError> {
        let mut functions = self.functions.write().unwrap_or_else(PoisonError::into_inner);
        if functions.contains_key(&kind) {
            return Err(JobError::DuplicateKind(kind));
        }
        info!("Registered job kind: {}", kind);
        functions.insert(kind, compute);
        Ok(())
    }

    pub fn get(&self, kind: &JobKind) -> Option<Arc<dyn ComputeFn>> {
        self.functions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(kind)
            .cloned()
    }

    /// Registered kinds, sorted.
    pub fn kinds(&self) -> Vec<JobKind> {
        let mut kinds: Vec<JobKind> = self
            .functions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        kinds.sort();
        kinds
    }
}
