//! Local append-only copy of the project registry.
//!
//! The registry synchronizer is the only writer; triage handlers read.
//! Entries are never removed or reordered, so a reader racing an append
//! simply sees a prefix of the registry.

use std::sync::{Arc, PoisonError, RwLock};

use crate::project::Project;

#[derive(Debug, Clone, Default)]
pub struct ProjectCache {
    inner: Arc<RwLock<Vec<Project>>>,
}

impl ProjectCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Append projects at the end, preserving their order.
    pub fn extend(&self, projects: impl IntoIterator<Item = Project>) -> usize {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let before = guard.len();
        guard.extend(projects);
        guard.len() - before
    }

    /// First project whose contact string equals `contact` exactly.
    pub fn find_by_contact(&self, contact: &str) -> Option<Project> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|p| p.contact == contact)
            .cloned()
    }

    #[cfg(test)]
    pub fn snapshot(&self) -> Vec<Project> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project(domain: &str, contact: &str) -> Project {
        Project {
            owner: "0x01".into(),
            contracts: vec![],
            domain: domain.to_string(),
            contact: contact.to_string(),
        }
    }

    #[test]
    fn extend_appends_in_order() {
        let cache = ProjectCache::new();
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.extend(vec![project("a", "c1"), project("b", "c2")]), 2);
        assert_eq!(cache.extend(vec![project("c", "c3")]), 1);

        let domains: Vec<_> = cache.snapshot().into_iter().map(|p| p.domain).collect();
        assert_eq!(domains, vec!["a", "b", "c"]);
    }

    #[test]
    fn clones_share_storage() {
        let cache = ProjectCache::new();
        let reader = cache.clone();
        cache.extend(vec![project("a", "tg:bot/1")]);
        assert_eq!(reader.len(), 1);
    }

    #[test]
    fn find_by_contact_returns_first_match() {
        let cache = ProjectCache::new();
        cache.extend(vec![
            project("first", "tg:bot/1"),
            project("second", "tg:bot/1"),
        ]);
        assert_eq!(cache.find_by_contact("tg:bot/1").unwrap().domain, "first");
        assert!(cache.find_by_contact("tg:bot/2").is_none());
    }
}
