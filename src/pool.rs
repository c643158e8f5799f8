//! Parameter pools supply concrete values for query placeholders.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::error::{DriverError, Result};
use crate::query::Query;
use crate::querymix::Workload;

/// File name of the pool inside the resource directory
pub const POOL_FILE: &str = "parameters.json";

/// Source of parameter values for query executions.
///
/// Must be deterministic for a given seed and call sequence so that runs are
/// reproducible.
pub trait ParameterPool: Send {
    /// One value per slot of `query`, in slot order
    fn parameters_for(&mut self, query: &Query) -> Result<Vec<String>>;

    /// Scale factor of the dataset the values were drawn from
    fn scale_factor(&self) -> u64;
}

/// On-disk pool layout
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolFile {
    pub scale_factor: u64,
    /// Candidate values keyed by parameter kind
    pub values: HashMap<String, Vec<String>>,
}

/// Pool drawing uniformly from per-kind value lists with a seeded RNG
#[derive(Debug, Clone)]
pub struct SeededParameterPool {
    values: Arc<HashMap<String, Vec<String>>>,
    scale_factor: u64,
    seed: u64,
    rng: StdRng,
}

impl SeededParameterPool {
    pub fn new(values: HashMap<String, Vec<String>>, scale_factor: u64, seed: u64) -> Self {
        Self {
            values: Arc::new(values),
            scale_factor,
            seed,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Load `parameters.json` from the resource directory
    pub fn load(resource_dir: &Path, seed: u64) -> Result<Self> {
        let path = resource_dir.join(POOL_FILE);
        let text = std::fs::read_to_string(&path)
            .map_err(|e| DriverError::load(&path, e.to_string()))?;
        let file: PoolFile =
            serde_json::from_str(&text).map_err(|e| DriverError::load(&path, e.to_string()))?;

        tracing::debug!(
            path = %path.display(),
            kinds = file.values.len(),
            scale_factor = file.scale_factor,
            "Loaded parameter pool"
        );

        Ok(Self::new(file.values, file.scale_factor, seed))
    }

    /// Independent pool for one client, seeded from the global seed plus the
    /// client index. Value lists are shared read-only.
    pub fn for_client(&self, client_index: usize) -> Self {
        let seed = self.seed.wrapping_add(client_index as u64);
        Self {
            values: self.values.clone(),
            scale_factor: self.scale_factor,
            seed,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Check that every placeholder kind used by the workload can be served
    pub fn validate(&self, workload: &Workload) -> Result<()> {
        for query in workload.queries().iter().flatten() {
            for slot in query.slots() {
                match self.values.get(&slot.kind) {
                    Some(values) if !values.is_empty() => {}
                    Some(_) => {
                        return Err(DriverError::Parameter(format!(
                            "no values left for kind '{}' (query {})",
                            slot.kind,
                            query.nr()
                        )))
                    }
                    None => {
                        return Err(DriverError::Parameter(format!(
                            "unknown parameter kind '{}' (query {})",
                            slot.kind,
                            query.nr()
                        )))
                    }
                }
            }
        }
        Ok(())
    }
}

impl ParameterPool for SeededParameterPool {
    fn parameters_for(&mut self, query: &Query) -> Result<Vec<String>> {
        query
            .slots()
            .iter()
            .map(|slot| {
                let values = self
                    .values
                    .get(&slot.kind)
                    .filter(|values| !values.is_empty())
                    .ok_or_else(|| {
                        DriverError::Parameter(format!(
                            "no values for kind '{}' (query {})",
                            slot.kind,
                            query.nr()
                        ))
                    })?;
                Ok(values[self.rng.gen_range(0..values.len())].clone())
            })
            .collect()
    }

    fn scale_factor(&self) -> u64 {
        self.scale_factor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{ParameterSlot, QueryType, TemplateSyntax};

    fn values() -> HashMap<String, Vec<String>> {
        let mut values = HashMap::new();
        values.insert(
            "Product".to_string(),
            (1..=50).map(|i| format!("<http://ex.org/p{}>", i)).collect(),
        );
        values.insert("Empty".to_string(), Vec::new());
        values
    }

    fn query(kind: &str) -> Query {
        Query::new(1, QueryType::Select, "SELECT %p%", TemplateSyntax::Sparql).with_slots(vec![
            ParameterSlot {
                name: "p".to_string(),
                kind: kind.to_string(),
            },
        ])
    }

    #[test]
    fn test_same_seed_same_sequence() {
        let q = query("Product");
        let mut a = SeededParameterPool::new(values(), 1, 808080);
        let mut b = SeededParameterPool::new(values(), 1, 808080);

        for _ in 0..20 {
            assert_eq!(a.parameters_for(&q).unwrap(), b.parameters_for(&q).unwrap());
        }
    }

    #[test]
    fn test_client_pools_diverge() {
        let q = query("Product");
        let base = SeededParameterPool::new(values(), 1, 7);
        let mut c0 = base.for_client(0);
        let mut c1 = base.for_client(1);
        assert_eq!(c1.seed(), 8);

        let s0: Vec<_> = (0..20).map(|_| c0.parameters_for(&q).unwrap()).collect();
        let s1: Vec<_> = (0..20).map(|_| c1.parameters_for(&q).unwrap()).collect();
        assert_ne!(s0, s1);
    }

    #[test]
    fn test_unknown_kind_fails() {
        let mut pool = SeededParameterPool::new(values(), 1, 1);
        assert!(pool.parameters_for(&query("Missing")).is_err());
        assert!(pool.parameters_for(&query("Empty")).is_err());
    }

    #[test]
    fn test_load_from_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(POOL_FILE),
            r#"{"scale_factor": 284826, "values": {"Product": ["<p1>"]}}"#,
        )
        .unwrap();

        let mut pool = SeededParameterPool::load(dir.path(), 3).unwrap();
        assert_eq!(pool.scale_factor(), 284826);
        assert_eq!(pool.parameters_for(&query("Product")).unwrap(), vec!["<p1>"]);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = SeededParameterPool::load(dir.path(), 3).unwrap_err();
        assert!(err.to_string().contains("parameters.json"));
    }

    #[test]
    fn test_validate_against_workload() {
        let workload = Workload::new(vec![Some(query("Missing"))], vec![1], vec![false]).unwrap();
        let pool = SeededParameterPool::new(values(), 1, 1);
        assert!(pool.validate(&workload).is_err());

        let workload = Workload::new(vec![Some(query("Product"))], vec![1], vec![false]).unwrap();
        assert!(pool.validate(&workload).is_ok());
    }
}
