//! In-memory hook registration table.
//!
//! Registrations are rebuilt on every process start; there is no
//! persistence. Mutation and lookup happen on a single logical
//! event-processing path per session, so a plain `RwLock` suffices.

use std::collections::HashMap;
use std::sync::RwLock;

use super::hook::{HookKind, HookRegistration};

/// Table of interceptor registrations keyed by event kind, sorted by
/// ascending priority.
#[derive(Debug, Default)]
pub struct HookRegistry {
    entries: RwLock<HashMap<HookKind, Vec<HookRegistration>>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert by id: a duplicate id replaces the existing entry (content and
    /// priority both updated), wherever it currently lives.
    pub fn register(&self, registration: HookRegistration) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        for list in entries.values_mut() {
            list.retain(|r| r.id != registration.id);
        }
        let list = entries.entry(registration.kind).or_default();
        list.push(registration);
        // Stable: ties keep registration order.
        list.sort_by_key(|r| r.priority);
    }

    /// Remove a registration by id. Returns whether anything was removed.
    pub fn unregister(&self, id: &str) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let mut found = false;
        for list in entries.values_mut() {
            let before = list.len();
            list.retain(|r| r.id != id);
            found |= list.len() != before;
        }
        found
    }

    /// Priority-sorted registrations for an event, filtered by tool name
    /// when one is supplied. Hooks without a matcher always match.
    pub fn matching(&self, kind: HookKind, tool_name: Option<&str>) -> Vec<HookRegistration> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries
            .get(&kind)
            .map(|list| {
                list.iter()
                    .filter(|r| match (&r.matcher, tool_name) {
                        (Some(matcher), Some(name)) => matcher.matches(name),
                        _ => true,
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Empty all registrations. Used for test isolation and process reset.
    pub fn clear(&self) {
        self.entries.write().unwrap_or_else(|e| e.into_inner()).clear();
    }

    /// Total registration count across all events.
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .map(|l| l.len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::hooks::hook::HookHandler;
    use crate::hooks::matcher::ToolMatcher;

    struct Noop;
    impl HookHandler for Noop {}

    fn reg(id: &str, kind: HookKind, priority: i32) -> HookRegistration {
        HookRegistration::new(id, kind, priority, Arc::new(Noop))
    }

    #[test]
    fn register_sorts_by_priority() {
        let registry = HookRegistry::new();
        registry.register(reg("b", HookKind::PreToolUse, 50));
        registry.register(reg("a", HookKind::PreToolUse, 10));
        registry.register(reg("c", HookKind::PreToolUse, 30));

        let ids: Vec<String> = registry
            .matching(HookKind::PreToolUse, None)
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec!["a", "c", "b"]);
    }

    #[test]
    fn duplicate_id_replaces_content_and_priority() {
        let registry = HookRegistry::new();
        registry.register(reg("x", HookKind::PreToolUse, 10));
        registry.register(reg("y", HookKind::PreToolUse, 20));
        registry.register(reg("x", HookKind::PreToolUse, 30));

        let hooks = registry.matching(HookKind::PreToolUse, None);
        assert_eq!(hooks.len(), 2);
        assert_eq!(hooks[0].id, "y");
        assert_eq!(hooks[1].id, "x");
        assert_eq!(hooks[1].priority, 30);
    }

    #[test]
    fn reregister_can_move_between_kinds() {
        let registry = HookRegistry::new();
        registry.register(reg("x", HookKind::PreToolUse, 10));
        registry.register(reg("x", HookKind::PostToolUse, 10));

        assert!(registry.matching(HookKind::PreToolUse, None).is_empty());
        assert_eq!(registry.matching(HookKind::PostToolUse, None).len(), 1);
    }

    #[test]
    fn unregister_reports_found() {
        let registry = HookRegistry::new();
        registry.register(reg("x", HookKind::PostToolUse, 10));
        assert!(registry.unregister("x"));
        assert!(!registry.unregister("x"));
        assert!(registry.is_empty());
    }

    #[test]
    fn matching_filters_by_tool_name() {
        let registry = HookRegistry::new();
        registry.register(
            reg("files-only", HookKind::PreToolUse, 10)
                .with_matcher(ToolMatcher::parse("quill_file")),
        );
        registry.register(reg("all-tools", HookKind::PreToolUse, 20));

        let for_file = registry.matching(HookKind::PreToolUse, Some("quill_file"));
        assert_eq!(for_file.len(), 2);

        let for_todo = registry.matching(HookKind::PreToolUse, Some("quill_todo"));
        assert_eq!(for_todo.len(), 1);
        assert_eq!(for_todo[0].id, "all-tools");

        // No tool name supplied: matchers are not applied
        assert_eq!(registry.matching(HookKind::PreToolUse, None).len(), 2);
    }

    #[test]
    fn clear_empties_everything() {
        let registry = HookRegistry::new();
        registry.register(reg("a", HookKind::PreToolUse, 1));
        registry.register(reg("b", HookKind::PostMemoryExtract, 1));
        registry.clear();
        assert!(registry.is_empty());
    }
}
