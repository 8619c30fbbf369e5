//! Engine-side handle table. Every handle the engine gives out is an index
//! into this arena; nothing else ever leaves the engine.

use std::collections::{HashMap, HashSet};

use docgate_protocol::{EngineError, HandleKind, InstanceId, Reference};
use lopdf::{Dictionary, Document, Object, ObjectId};

use super::features::FontInfo;
use super::pages::Bitmap;

pub(crate) struct PdfDocument {
    pub doc: Document,
    /// `P` from the encryption dictionary, all bits set when unencrypted.
    pub permissions: u32,
    /// `R` from the encryption dictionary, -1 when unencrypted.
    pub security_revision: i32,
}

pub(crate) enum Resource {
    Document(Box<PdfDocument>),
    Page { document: u64, object: ObjectId },
    Bookmark { document: u64, object: ObjectId },
    Action { document: u64, dict: Dictionary },
    Destination { document: u64, array: Vec<Object> },
    Link { document: u64, annotation: Dictionary },
    Annotation { document: u64, annotation: Dictionary },
    Signature { document: u64, value: Dictionary },
    Bitmap(Bitmap),
    FontInfo(FontInfo),
}

impl Resource {
    pub fn kind(&self) -> HandleKind {
        match self {
            Resource::Document(_) => HandleKind::Document,
            Resource::Page { .. } => HandleKind::Page,
            Resource::Bookmark { .. } => HandleKind::Bookmark,
            Resource::Action { .. } => HandleKind::Action,
            Resource::Destination { .. } => HandleKind::Destination,
            Resource::Link { .. } => HandleKind::Link,
            Resource::Annotation { .. } => HandleKind::Annotation,
            Resource::Signature { .. } => HandleKind::Signature,
            Resource::Bitmap(_) => HandleKind::Bitmap,
            Resource::FontInfo(_) => HandleKind::FontInfo,
        }
    }
}

struct Slot {
    parent: Option<u64>,
    resource: Resource,
}

pub(crate) struct Arena {
    instance: InstanceId,
    next_id: u64,
    slots: HashMap<u64, Slot>,
}

impl Arena {
    pub fn new(instance: InstanceId) -> Self {
        Self {
            instance,
            next_id: 1,
            slots: HashMap::new(),
        }
    }

    pub fn instance(&self) -> InstanceId {
        self.instance
    }

    pub fn insert(&mut self, parent: Option<u64>, resource: Resource) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.slots.insert(id, Slot { parent, resource });
        id
    }

    pub fn get(&self, reference: Reference) -> Result<&Resource, EngineError> {
        self.check(reference)?;
        match self.slots.get(&reference.id) {
            Some(slot) if slot.resource.kind() == reference.kind => Ok(&slot.resource),
            _ => Err(EngineError::not_found(reference)),
        }
    }

    pub fn get_mut(&mut self, reference: Reference) -> Result<&mut Resource, EngineError> {
        self.check(reference)?;
        match self.slots.get_mut(&reference.id) {
            Some(slot) if slot.resource.kind() == reference.kind => Ok(&mut slot.resource),
            _ => Err(EngineError::not_found(reference)),
        }
    }

    /// Looks up a document by arena id, for resources that point back at one.
    pub fn document(&self, id: u64) -> Result<&PdfDocument, EngineError> {
        match self.slots.get(&id).map(|slot| &slot.resource) {
            Some(Resource::Document(pdf)) => Ok(pdf),
            _ => Err(EngineError::not_found(format!("document #{}", id))),
        }
    }

    pub fn document_mut(&mut self, id: u64) -> Result<&mut PdfDocument, EngineError> {
        match self.slots.get_mut(&id).map(|slot| &mut slot.resource) {
            Some(Resource::Document(pdf)) => Ok(pdf),
            _ => Err(EngineError::not_found(format!("document #{}", id))),
        }
    }

    /// Drops `reference` and everything issued beneath it.
    pub fn release(&mut self, reference: Reference) -> Result<(), EngineError> {
        self.get(reference)?;
        let mut doomed = HashSet::from([reference.id]);
        loop {
            let before = doomed.len();
            for (id, slot) in &self.slots {
                if slot.parent.is_some_and(|p| doomed.contains(&p)) {
                    doomed.insert(*id);
                }
            }
            if doomed.len() == before {
                break;
            }
        }
        self.slots.retain(|id, _| !doomed.contains(id));
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    fn check(&self, reference: Reference) -> Result<(), EngineError> {
        if reference.instance != self.instance {
            return Err(EngineError::invalid_argument(format!(
                "{} was issued by another instance",
                reference
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn font_info() -> Resource {
        Resource::FontInfo(FontInfo::default())
    }

    #[test]
    fn test_release_is_transitive() {
        let instance = InstanceId::new();
        let mut arena = Arena::new(instance);
        let root = arena.insert(None, font_info());
        let child = arena.insert(Some(root), font_info());
        let grandchild = arena.insert(Some(child), font_info());
        let other = arena.insert(None, font_info());

        arena
            .release(Reference::new(instance, root, HandleKind::FontInfo))
            .unwrap();
        assert_eq!(arena.len(), 1);
        let gone = Reference::new(instance, grandchild, HandleKind::FontInfo);
        assert!(arena.get(gone).is_err());
        assert!(arena
            .get(Reference::new(instance, other, HandleKind::FontInfo))
            .is_ok());
    }

    #[test]
    fn test_kind_and_instance_are_checked() {
        let instance = InstanceId::new();
        let mut arena = Arena::new(instance);
        let id = arena.insert(None, font_info());

        let wrong_kind = Reference::new(instance, id, HandleKind::Bitmap);
        assert_eq!(
            arena.get(wrong_kind).err().map(|e| e.code),
            Some(docgate_protocol::ErrorCode::NotFound)
        );

        let foreign = Reference::new(InstanceId::new(), id, HandleKind::FontInfo);
        assert_eq!(
            arena.get(foreign).err().map(|e| e.code),
            Some(docgate_protocol::ErrorCode::InvalidArgument)
        );
    }
}
