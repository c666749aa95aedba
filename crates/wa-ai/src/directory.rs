use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::AssistantBinding;

#[derive(Debug, Clone, Default)]
/// Shared tenant to assistant lookup used by the registry and the gateway client.
pub struct AssistantDirectory {
    bindings: Arc<RwLock<HashMap<String, AssistantBinding>>>,
}

impl AssistantDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `tenant_id`, returning the binding it replaced.
    pub fn bind(&self, tenant_id: &str, binding: AssistantBinding) -> Option<AssistantBinding> {
        let mut guard = match self.bindings.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.insert(tenant_id.to_string(), binding)
    }

    pub fn unbind(&self, tenant_id: &str) -> Option<AssistantBinding> {
        let mut guard = match self.bindings.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.remove(tenant_id)
    }

    pub fn get(&self, tenant_id: &str) -> Option<AssistantBinding> {
        let guard = match self.bindings.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.get(tenant_id).cloned()
    }

    pub fn len(&self) -> usize {
        match self.bindings.read() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
