//! Opaque, instance-scoped references.
//!
//! Engine resources never leave their instance as raw addresses. Every
//! reference is the pair (instance id, arena id) plus the resource kind, so a
//! reference produced by one instance can be rejected by any other with a
//! table lookup.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity of one engine instance (direct or isolated).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(Uuid);

impl InstanceId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for InstanceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for InstanceId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Kind of engine resource a reference points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandleKind {
    Document,
    Page,
    Bitmap,
    Bookmark,
    Link,
    Action,
    Destination,
    Signature,
    FontInfo,
    XObject,
    Annotation,
}

impl HandleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            HandleKind::Document => "document",
            HandleKind::Page => "page",
            HandleKind::Bitmap => "bitmap",
            HandleKind::Bookmark => "bookmark",
            HandleKind::Link => "link",
            HandleKind::Action => "action",
            HandleKind::Destination => "destination",
            HandleKind::Signature => "signature",
            HandleKind::FontInfo => "font_info",
            HandleKind::XObject => "xobject",
            HandleKind::Annotation => "annotation",
        }
    }

    /// Roots are owned by the instance itself rather than by another handle.
    pub fn is_root(&self) -> bool {
        matches!(self, HandleKind::Document | HandleKind::FontInfo)
    }
}

impl fmt::Display for HandleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Untyped reference. Typed wrappers below are what callers hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Reference {
    pub instance: InstanceId,
    pub id: u64,
    pub kind: HandleKind,
}

impl Reference {
    pub fn new(instance: InstanceId, id: u64, kind: HandleKind) -> Self {
        Self { instance, id, kind }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}@{}", self.kind, self.id, self.instance)
    }
}

/// Anything that carries references (requests, responses, their fields).
pub trait CollectReferences {
    fn collect_references(&self, out: &mut Vec<Reference>);
}

impl<T: CollectReferences> CollectReferences for Option<T> {
    fn collect_references(&self, out: &mut Vec<Reference>) {
        if let Some(value) = self {
            value.collect_references(out);
        }
    }
}

impl<T: CollectReferences> CollectReferences for Vec<T> {
    fn collect_references(&self, out: &mut Vec<Reference>) {
        for value in self {
            value.collect_references(out);
        }
    }
}

impl CollectReferences for Reference {
    fn collect_references(&self, out: &mut Vec<Reference>) {
        out.push(*self);
    }
}

macro_rules! typed_reference {
    ($(#[$meta:meta])* $name:ident => $kind:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Reference);

        impl $name {
            pub const KIND: HandleKind = HandleKind::$kind;

            pub fn new(instance: InstanceId, id: u64) -> Self {
                Self(Reference::new(instance, id, HandleKind::$kind))
            }

            /// Rewraps an untyped reference, `None` if the kind differs.
            pub fn from_reference(reference: Reference) -> Option<Self> {
                (reference.kind == HandleKind::$kind).then_some(Self(reference))
            }

            pub fn reference(&self) -> Reference {
                self.0
            }

            pub fn instance(&self) -> InstanceId {
                self.0.instance
            }

            pub fn id(&self) -> u64 {
                self.0.id
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl From<$name> for Reference {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl CollectReferences for $name {
            fn collect_references(&self, out: &mut Vec<Reference>) {
                out.push(self.0);
            }
        }
    };
}

typed_reference!(
    /// An opened document.
    DocumentRef => Document
);
typed_reference!(
    /// A loaded page, child of a document.
    PageRef => Page
);
typed_reference!(BitmapRef => Bitmap);
typed_reference!(BookmarkRef => Bookmark);
typed_reference!(LinkRef => Link);
typed_reference!(ActionRef => Action);
typed_reference!(DestRef => Destination);
typed_reference!(SignatureRef => Signature);
typed_reference!(
    /// System font information. Scoped to the instance, not to a document.
    FontInfoRef => FontInfo
);
typed_reference!(XObjectRef => XObject);
typed_reference!(
    /// The annotation behind a link, child of the page it sits on.
    AnnotationRef => Annotation
);

/// Addresses a page either by a loaded page handle or by document + index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageSelector {
    Loaded(PageRef),
    ByIndex { document: DocumentRef, index: u32 },
}

impl PageSelector {
    pub fn by_index(document: DocumentRef, index: u32) -> Self {
        PageSelector::ByIndex { document, index }
    }
}

impl From<PageRef> for PageSelector {
    fn from(page: PageRef) -> Self {
        PageSelector::Loaded(page)
    }
}

impl CollectReferences for PageSelector {
    fn collect_references(&self, out: &mut Vec<Reference>) {
        match self {
            PageSelector::Loaded(page) => page.collect_references(out),
            PageSelector::ByIndex { document, .. } => document.collect_references(out),
        }
    }
}

/// Implements [`CollectReferences`] for a struct by listing the fields that
/// may carry references. Structs without such fields use an empty list.
#[macro_export]
macro_rules! references {
    ($($ty:ident { $($field:ident),* $(,)? }),* $(,)?) => {
        $(
            impl $crate::handles::CollectReferences for $ty {
                #[allow(unused_variables)]
                fn collect_references(&self, out: &mut Vec<$crate::handles::Reference>) {
                    $( $crate::handles::CollectReferences::collect_references(&self.$field, out); )*
                }
            }
        )*
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_reference_rejects_wrong_kind() {
        let instance = InstanceId::new();
        let page = PageRef::new(instance, 7);
        assert!(DocumentRef::from_reference(page.reference()).is_none());
        assert_eq!(PageRef::from_reference(page.reference()), Some(page));
    }

    #[test]
    fn test_reference_serializes_with_instance() {
        let instance = InstanceId::new();
        let doc = DocumentRef::new(instance, 3);
        let json = serde_json::to_value(doc).unwrap();
        assert_eq!(json["id"], 3);
        assert_eq!(json["kind"], "document");
        assert_eq!(json["instance"], instance.to_string());
    }

    #[test]
    fn test_page_selector_collects_parent() {
        let instance = InstanceId::new();
        let doc = DocumentRef::new(instance, 1);
        let mut out = Vec::new();
        PageSelector::by_index(doc, 4).collect_references(&mut out);
        assert_eq!(out, vec![doc.reference()]);
    }

    #[test]
    fn test_instance_id_round_trips_through_str() {
        let id = InstanceId::new();
        let parsed: InstanceId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }
}
