//! Per-instance handle ownership.
//!
//! Every reference an instance hands out is recorded here together with its
//! parent. Requests are checked against the table before they are
//! dispatched, so a stale or foreign reference fails with
//! [`Error::InvalidHandle`] instead of reaching the engine.
//!
//! ```text
//!   document#1 ─┬─ page#2 ─┬─ link#4
//!               │          └─ bitmap#5
//!               └─ bookmark#3
//!   font_info#6            (instance-scoped root)
//! ```
//!
//! Releasing a node releases its whole subtree. Revoking the registry (the
//! instance closed or crashed) invalidates everything at once.
//!
//! Each registry has its own lock; registries of different instances never
//! contend.

use std::collections::{BTreeMap, HashSet};

use docgate_protocol::{DocumentRef, HandleKind, InstanceId, Reference};
use parking_lot::Mutex;

use crate::error::{Error, HandleFault, Result};

#[derive(Debug, Clone, Copy)]
struct Entry {
    kind: HandleKind,
    parent: Option<u64>,
}

#[derive(Debug, Default)]
struct State {
    // Ordered by id, which is issue order.
    entries: BTreeMap<u64, Entry>,
    revoked: bool,
}

#[derive(Debug)]
pub struct HandleRegistry {
    instance: InstanceId,
    state: Mutex<State>,
}

impl HandleRegistry {
    pub fn new(instance: InstanceId) -> Self {
        Self {
            instance,
            state: Mutex::new(State::default()),
        }
    }

    pub fn instance(&self) -> InstanceId {
        self.instance
    }

    /// Checks that `reference` is live on this instance.
    pub fn validate(&self, reference: Reference) -> Result<()> {
        if reference.instance != self.instance {
            return Err(Error::invalid_handle(
                reference,
                HandleFault::ForeignInstance {
                    presented_to: self.instance,
                },
            ));
        }
        let state = self.state.lock();
        if state.revoked {
            return Err(Error::invalid_handle(reference, HandleFault::Revoked));
        }
        match state.entries.get(&reference.id) {
            None => Err(Error::invalid_handle(reference, HandleFault::Released)),
            Some(entry) if entry.kind != reference.kind => Err(Error::invalid_handle(
                reference,
                HandleFault::KindMismatch { actual: entry.kind },
            )),
            Some(_) => Ok(()),
        }
    }

    pub fn validate_all(&self, references: &[Reference]) -> Result<()> {
        references.iter().try_for_each(|r| self.validate(*r))
    }

    /// Records a handle the engine just issued. Ignored once revoked.
    pub fn record(&self, reference: Reference, parent: Option<Reference>) {
        let mut state = self.state.lock();
        if state.revoked {
            return;
        }
        let parent = parent
            .filter(|p| p.instance == self.instance)
            .map(|p| p.id);
        state.entries.insert(
            reference.id,
            Entry {
                kind: reference.kind,
                parent,
            },
        );
    }

    /// Drops `reference` and every handle derived from it. Returns how many
    /// entries went away.
    pub fn release(&self, reference: Reference) -> usize {
        if reference.instance != self.instance {
            return 0;
        }
        let mut state = self.state.lock();
        if !state.entries.contains_key(&reference.id) {
            return 0;
        }

        let mut doomed = HashSet::from([reference.id]);
        loop {
            let before = doomed.len();
            for (id, entry) in &state.entries {
                if entry.parent.is_some_and(|p| doomed.contains(&p)) {
                    doomed.insert(*id);
                }
            }
            if doomed.len() == before {
                break;
            }
        }
        state.entries.retain(|id, _| !doomed.contains(id));
        doomed.len()
    }

    /// Open documents in the order they were opened.
    pub fn documents(&self) -> Vec<DocumentRef> {
        let state = self.state.lock();
        state
            .entries
            .iter()
            .filter(|(_, entry)| entry.kind == HandleKind::Document)
            .map(|(id, _)| DocumentRef::new(self.instance, *id))
            .collect()
    }

    /// Invalidates everything this instance ever issued. Terminal.
    pub fn revoke(&self) {
        let mut state = self.state.lock();
        state.revoked = true;
        state.entries.clear();
    }

    pub fn is_revoked(&self) -> bool {
        self.state.lock().revoked
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docgate_protocol::{BitmapRef, PageRef};

    fn registry_with_tree() -> (HandleRegistry, DocumentRef, PageRef, BitmapRef) {
        let instance = InstanceId::new();
        let registry = HandleRegistry::new(instance);
        let document = DocumentRef::new(instance, 1);
        let page = PageRef::new(instance, 2);
        let bitmap = BitmapRef::new(instance, 3);
        registry.record(document.reference(), None);
        registry.record(page.reference(), Some(document.reference()));
        registry.record(bitmap.reference(), Some(page.reference()));
        (registry, document, page, bitmap)
    }

    #[test]
    fn test_closing_document_releases_descendants() {
        let (registry, document, page, bitmap) = registry_with_tree();
        assert_eq!(registry.release(document.reference()), 3);
        assert!(registry.is_empty());
        assert!(matches!(
            registry.validate(bitmap.reference()),
            Err(Error::InvalidHandle {
                fault: HandleFault::Released,
                ..
            })
        ));
        assert!(registry.validate(page.reference()).is_err());
    }

    #[test]
    fn test_closing_page_keeps_document() {
        let (registry, document, page, _) = registry_with_tree();
        assert_eq!(registry.release(page.reference()), 2);
        assert!(registry.validate(document.reference()).is_ok());
        assert_eq!(registry.documents(), vec![document]);
    }

    #[test]
    fn test_foreign_reference_rejected() {
        let (registry, _, _, _) = registry_with_tree();
        let foreign = DocumentRef::new(InstanceId::new(), 1);
        match registry.validate(foreign.reference()) {
            Err(Error::InvalidHandle {
                fault: HandleFault::ForeignInstance { presented_to },
                ..
            }) => assert_eq!(presented_to, registry.instance()),
            other => panic!("expected foreign instance fault, got {:?}", other),
        }
        assert_eq!(registry.release(foreign.reference()), 0);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_kind_mismatch_rejected() {
        let (registry, document, _, _) = registry_with_tree();
        let forged = PageRef::new(registry.instance(), document.id());
        assert!(matches!(
            registry.validate(forged.reference()),
            Err(Error::InvalidHandle {
                fault: HandleFault::KindMismatch {
                    actual: HandleKind::Document
                },
                ..
            })
        ));
    }

    #[test]
    fn test_revoke_is_terminal() {
        let (registry, document, _, _) = registry_with_tree();
        registry.revoke();
        assert!(registry.is_revoked());
        assert!(matches!(
            registry.validate(document.reference()),
            Err(Error::InvalidHandle {
                fault: HandleFault::Revoked,
                ..
            })
        ));
        registry.record(DocumentRef::new(registry.instance(), 9).reference(), None);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_documents_sorted_by_issue_order() {
        let instance = InstanceId::new();
        let registry = HandleRegistry::new(instance);
        for id in [4, 1, 7] {
            registry.record(DocumentRef::new(instance, id).reference(), None);
        }
        let ids: Vec<u64> = registry.documents().iter().map(|d| d.id()).collect();
        assert_eq!(ids, vec![1, 4, 7]);
    }
}
