//! Global placement-constraint knobs, cached over the store.

use std::collections::HashMap;

use tokio::sync::RwLock;

use crate::domain::models::ConstraintSpec;
use crate::domain::ports::store::{Store, StoreExt, StoreResult};

use super::keys;

#[derive(Default)]
pub struct ConstraintController {
    constraints: RwLock<HashMap<String, ConstraintSpec>>,
}

impl ConstraintController {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn load(&self, store: &dyn Store) -> StoreResult<()> {
        let keys = match store.keys_by_prefix(&keys::constraint_dir()).await {
            Ok(keys) => keys,
            Err(err) if err.is_missing() => return Ok(()),
            Err(err) => return Err(err),
        };
        let mut loaded = HashMap::new();
        for key in keys {
            let spec: ConstraintSpec = store.get(&key).await?;
            loaded.insert(spec.constraint_type.clone(), spec);
        }
        *self.constraints.write().await = loaded;
        Ok(())
    }

    pub async fn get(&self, constraint_type: &str) -> Option<ConstraintSpec> {
        self.constraints.read().await.get(constraint_type).cloned()
    }

    pub async fn set(&self, mut spec: ConstraintSpec, store: &dyn Store) -> StoreResult<()> {
        spec.updated_at = Some(chrono::Utc::now());
        store.set(&keys::constraint(&spec.constraint_type), &spec, false).await?;
        self.constraints
            .write()
            .await
            .insert(spec.constraint_type.clone(), spec);
        Ok(())
    }

    pub async fn remove(&self, constraint_type: &str, store: &dyn Store) -> StoreResult<()> {
        store.remove(&keys::constraint(constraint_type)).await?;
        self.constraints.write().await.remove(constraint_type);
        Ok(())
    }
}
