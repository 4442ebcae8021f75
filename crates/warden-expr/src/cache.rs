use std::sync::Arc;

use dashmap::DashMap;
use uuid::Uuid;

use crate::error::ExprError;
use crate::program::{compile, Program};

/// Compiled programs keyed by policy identity.
///
/// Reads take no global lock. Two concurrent misses on the same identity may
/// both compile; the race is benign since compilation is pure and the last
/// insert wins with an equivalent program.
#[derive(Debug, Default)]
pub struct ProgramCache {
    programs: DashMap<Uuid, Arc<Program>>,
}

impl ProgramCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached program for `id`, compiling and inserting on miss.
    pub fn get_or_compile(&self, id: Uuid, source: &str) -> Result<Arc<Program>, ExprError> {
        if let Some(hit) = self.programs.get(&id) {
            return Ok(Arc::clone(hit.value()));
        }
        let program = Arc::new(compile(source)?);
        self.programs.insert(id, Arc::clone(&program));
        Ok(program)
    }

    /// Drop the cached program for `id`. Idempotent.
    pub fn invalidate(&self, id: Uuid) {
        self.programs.remove(&id);
    }

    pub fn invalidate_many(&self, ids: &[Uuid]) {
        for id in ids {
            self.programs.remove(id);
        }
    }

    pub fn invalidate_all(&self) {
        self.programs.clear();
    }

    pub fn len(&self) -> usize {
        self.programs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bindings() -> serde_json::Map<String, serde_json::Value> {
        match serde_json::json!({
            "subject": {}, "resource": "", "action": "", "metadata": {},
            "protocol": "", "platform": "", "cloud": "",
        }) {
            serde_json::Value::Object(m) => m,
            _ => unreachable!(),
        }
    }

    #[test]
    fn caches_by_identity() {
        let cache = ProgramCache::new();
        let id = Uuid::new_v4();
        cache.get_or_compile(id, "true").unwrap();
        assert_eq!(cache.len(), 1);
        // A hit ignores the source text; only invalidation refreshes it.
        let prog = cache.get_or_compile(id, "false").unwrap();
        assert!(prog.eval_bool(&bindings()).unwrap());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn invalidation_makes_new_source_observable() {
        let cache = ProgramCache::new();
        let id = Uuid::new_v4();
        cache.get_or_compile(id, "true").unwrap();
        cache.invalidate(id);
        let prog = cache.get_or_compile(id, "false").unwrap();
        assert!(!prog.eval_bool(&bindings()).unwrap());
    }

    #[test]
    fn invalidation_is_idempotent() {
        let cache = ProgramCache::new();
        let id = Uuid::new_v4();
        cache.get_or_compile(id, "true").unwrap();
        cache.invalidate(id);
        cache.invalidate(id);
        assert!(cache.is_empty());
    }

    #[test]
    fn invalidate_many_and_all() {
        let cache = ProgramCache::new();
        let ids: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        for id in &ids {
            cache.get_or_compile(*id, "true").unwrap();
        }
        cache.invalidate_many(&ids[..2]);
        assert_eq!(cache.len(), 1);
        cache.invalidate_all();
        assert!(cache.is_empty());
    }

    #[test]
    fn compile_failures_are_not_cached() {
        let cache = ProgramCache::new();
        let id = Uuid::new_v4();
        assert!(cache.get_or_compile(id, "subject.role ==").is_err());
        assert!(cache.is_empty());
    }
}
