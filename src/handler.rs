use crate::storage::StorageBackend;
use std::sync::Arc;

/// Components shared by every HTTP route
#[derive(Clone)]
pub struct BaseHandler {
    pub storage: Arc<dyn StorageBackend>,
}

impl BaseHandler {
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self { storage }
    }
}
