//! The operation catalog.
//!
//! ```text
//!   requests::X ──Call::into_request──► Request::X ──► engine ──► Response::X
//!        ▲                                                            │
//!        └───────────── Call::from_response ◄─────────────────────────┘
//! ```
//!
//! `Request` and `Response` are closed enums generated from one list, so the
//! operation set is enumerable and every request has exactly one response
//! type.

use serde::{Deserialize, Serialize};

use crate::handles::{CollectReferences, HandleKind, Reference};
use crate::{requests, responses};

/// A typed request paired with its typed response.
pub trait Call: Sized + Send + 'static {
    type Response: Send + 'static;

    const OPERATION: Operation;

    fn into_request(self) -> Request;

    /// Extracts this operation's response; hands back anything else.
    fn from_response(response: Response) -> Result<Self::Response, Response>;
}

macro_rules! catalog {
    ($($op:ident),* $(,)?) => {
        /// Every operation the gateway can dispatch.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum Operation {
            $($op),*
        }

        impl Operation {
            pub const ALL: &'static [Operation] = &[$(Operation::$op),*];

            pub fn name(&self) -> &'static str {
                match self {
                    $(Operation::$op => stringify!($op)),*
                }
            }

            pub fn from_name(name: &str) -> Option<Self> {
                match name {
                    $(stringify!($op) => Some(Operation::$op),)*
                    _ => None,
                }
            }
        }

        #[derive(Debug, Clone, Serialize, Deserialize)]
        #[serde(tag = "operation", content = "payload")]
        pub enum Request {
            $($op(requests::$op)),*
        }

        #[derive(Debug, Clone, Serialize, Deserialize)]
        #[serde(tag = "operation", content = "payload")]
        pub enum Response {
            $($op(responses::$op)),*
        }

        impl Request {
            pub fn operation(&self) -> Operation {
                match self {
                    $(Request::$op(_) => Operation::$op),*
                }
            }

            /// Handles this request uses, in field order.
            pub fn references(&self) -> Vec<Reference> {
                let mut out = Vec::new();
                match self {
                    $(Request::$op(request) => request.collect_references(&mut out)),*
                }
                out
            }
        }

        impl Response {
            pub fn operation(&self) -> Operation {
                match self {
                    $(Response::$op(_) => Operation::$op),*
                }
            }

            /// Handles this response hands out to the caller.
            pub fn issued(&self) -> Vec<Reference> {
                let mut out = Vec::new();
                match self {
                    $(Response::$op(response) => response.collect_references(&mut out)),*
                }
                out
            }
        }

        $(
            impl Call for requests::$op {
                type Response = responses::$op;

                const OPERATION: Operation = Operation::$op;

                fn into_request(self) -> Request {
                    Request::$op(self)
                }

                fn from_response(response: Response) -> Result<Self::Response, Response> {
                    match response {
                        Response::$op(response) => Ok(response),
                        other => Err(other),
                    }
                }
            }

            impl From<requests::$op> for Request {
                fn from(request: requests::$op) -> Self {
                    Request::$op(request)
                }
            }
        )*
    };
}

catalog! {
    OpenDocument,
    CloseDocument,
    CreateNewDocument,
    GetLastError,
    SetSandboxPolicy,
    LoadPage,
    ClosePage,
    GetPageCount,
    GetPageText,
    GetPageTextStructured,
    GetMetaData,
    GetMetaText,
    GetFileIdentifier,
    GetPageLabel,
    RenderPageInDpi,
    RenderPagesInDpi,
    RenderPageInPixels,
    RenderPagesInPixels,
    RenderToFile,
    GetPageSize,
    GetPageSizeInPixels,
    GetPageWidth,
    GetPageHeight,
    GetPageSizeByIndex,
    GetPageRotation,
    SetPageRotation,
    PageHasTransparency,
    GetFileVersion,
    GetDocPermissions,
    GetSecurityHandlerRevision,
    GetPageMode,
    IsTagged,
    GetBookmarks,
    BookmarkGetFirstChild,
    BookmarkGetNextSibling,
    BookmarkGetTitle,
    BookmarkFind,
    BookmarkGetDest,
    BookmarkGetAction,
    ActionGetType,
    ActionGetDest,
    ActionGetFilePath,
    ActionGetUriPath,
    DestGetPageIndex,
    DestGetView,
    DestGetLocationInPage,
    LinkGetLinkAtPoint,
    LinkEnumerate,
    LinkGetDest,
    LinkGetAction,
    LinkGetAnnotRect,
    LinkCountQuadPoints,
    LinkGetQuadPoints,
    LinkGetLinkZOrderAtPoint,
    LinkGetAnnot,
    GetPageAAction,
    ImportPages,
    ImportPagesByIndex,
    ImportNPagesToOne,
    CopyViewerPreferences,
    NewXObjectFromPage,
    NewFormObjectFromXObject,
    CloseXObject,
    FlattenPage,
    SaveAsCopy,
    GetSignatureCount,
    GetSignatureObject,
    SignatureGetContents,
    SignatureGetByteRange,
    SignatureGetSubFilter,
    SignatureGetReason,
    SignatureGetTime,
    SignatureGetDocMdpPermission,
    GetDefaultTtfMap,
    GetDefaultSystemFontInfo,
    SetSystemFontInfo,
    FreeDefaultSystemFontInfo,
    AddInstalledFont,
    GetDecodedThumbnailData,
    GetRawThumbnailData,
    GetThumbnailAsBitmap,
    GetBitmap,
    DestroyBitmap,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl Request {
    /// The handle a close-style request gives back to the engine.
    pub fn released(&self) -> Option<Reference> {
        match self {
            Request::CloseDocument(r) => Some(r.document.reference()),
            Request::ClosePage(r) => Some(r.page.reference()),
            Request::CloseXObject(r) => Some(r.xobject.reference()),
            Request::FreeDefaultSystemFontInfo(r) => Some(r.font_info.reference()),
            Request::DestroyBitmap(r) => Some(r.bitmap.reference()),
            _ => None,
        }
    }

    /// Parent for a handle of `kind` issued while serving this request.
    pub fn owner_for(&self, kind: HandleKind) -> Option<Reference> {
        if kind.is_root() {
            return None;
        }
        self.derived_owner()
    }

    /// Parent of any non-root handle this request issues: the page it used,
    /// failing that the document, failing that whatever handle it was
    /// derived from.
    pub fn derived_owner(&self) -> Option<Reference> {
        let references = self.references();
        references
            .iter()
            .find(|r| r.kind == HandleKind::Page)
            .or_else(|| references.iter().find(|r| r.kind == HandleKind::Document))
            .or_else(|| references.first())
            .copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handles::{DocumentRef, InstanceId, LinkRef, PageRef, PageSelector};
    use crate::requests::DocumentSource;

    #[test]
    fn test_operation_names_round_trip() {
        for op in Operation::ALL {
            assert_eq!(Operation::from_name(op.name()), Some(*op));
        }
        assert_eq!(Operation::from_name("Nope"), None);
    }

    #[test]
    fn test_request_references_in_field_order() {
        let instance = InstanceId::new();
        let source = DocumentRef::new(instance, 1);
        let destination = DocumentRef::new(instance, 2);
        let request: Request = requests::ImportPagesByIndex {
            source,
            destination,
            page_indices: vec![0],
            index: 0,
        }
        .into();
        assert_eq!(
            request.references(),
            vec![source.reference(), destination.reference()]
        );
        assert_eq!(request.released(), None);
    }

    #[test]
    fn test_close_requests_release_their_handle() {
        let instance = InstanceId::new();
        let page = PageRef::new(instance, 9);
        let request = requests::ClosePage { page }.into_request();
        assert_eq!(request.released(), Some(page.reference()));
    }

    #[test]
    fn test_owner_prefers_page_over_document() {
        let instance = InstanceId::new();
        let page = PageRef::new(instance, 4);
        let request = requests::LinkEnumerate { page }.into_request();
        assert_eq!(request.owner_for(HandleKind::Link), Some(page.reference()));

        let document = DocumentRef::new(instance, 1);
        let link = LinkRef::new(instance, 5);
        let request = requests::LinkGetAnnot { page, link }.into_request();
        assert_eq!(request.references(), vec![page.reference(), link.reference()]);
        assert_eq!(
            request.owner_for(HandleKind::Annotation),
            Some(page.reference())
        );

        let request = requests::LinkGetDest { document, link }.into_request();
        assert_eq!(
            request.owner_for(HandleKind::Destination),
            Some(document.reference())
        );
    }

    #[test]
    fn test_owner_falls_back_to_source_handle() {
        let instance = InstanceId::new();
        let link = LinkRef::new(instance, 5);
        let request = requests::LinkGetAction { link }.into_request();
        assert_eq!(request.owner_for(HandleKind::Action), Some(link.reference()));
    }

    #[test]
    fn test_documents_are_roots() {
        let instance = InstanceId::new();
        let source = DocumentRef::new(instance, 1);
        let request = requests::ImportNPagesToOne {
            source,
            output_width: 612.0,
            output_height: 792.0,
            pages_on_x: 2,
            pages_on_y: 1,
        }
        .into_request();
        assert_eq!(request.owner_for(HandleKind::Document), None);
    }

    #[test]
    fn test_response_issued_handles() {
        let instance = InstanceId::new();
        let page = PageRef::new(instance, 3);
        let response = Response::LoadPage(responses::LoadPage { page, index: 0 });
        assert_eq!(response.issued(), vec![page.reference()]);
        assert_eq!(response.operation(), Operation::LoadPage);
    }

    #[test]
    fn test_from_response_rejects_mismatch() {
        let response = Response::GetPageCount(responses::GetPageCount { page_count: 2 });
        let err = requests::GetPageText::from_response(response).unwrap_err();
        assert_eq!(err.operation(), Operation::GetPageCount);
    }

    #[test]
    fn test_request_serializes_adjacently_tagged() {
        let instance = InstanceId::new();
        let document = DocumentRef::new(instance, 1);
        let request = requests::GetPageText {
            page: PageSelector::by_index(document, 0),
        }
        .into_request();
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["operation"], "GetPageText");
        assert_eq!(json["payload"]["page"]["by_index"]["index"], 0);

        let open = requests::OpenDocument {
            source: DocumentSource::Bytes(b"%PDF".to_vec()),
            password: None,
        }
        .into_request();
        let json = serde_json::to_value(&open).unwrap();
        assert_eq!(json["payload"]["source"]["bytes"], "JVBERg==");
    }
}
