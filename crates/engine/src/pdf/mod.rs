//! Reference engine over `lopdf`.
//!
//! Structural operations (open, pages, metadata, outlines, links, import,
//! save, signatures, thumbnails) are implemented. Anything that needs a
//! rasterizer reports `ErrorCode::Unsupported`.

mod arena;
mod features;
mod navigation;
mod objects;
mod pages;

use std::io::{Read, Seek, SeekFrom};

use chrono::TimeZone;
use docgate_protocol::requests::{self as rq, DocumentSource, FileIdentifierKind, SandboxPolicy};
use docgate_protocol::responses::{self as rs, PageMode};
use docgate_protocol::{
    ActionRef, AnnotationRef, BitmapRef, BookmarkRef, DestRef, DocumentRef, EngineError, ErrorCode,
    FontInfoRef, InstanceId, LinkRef, PageRef, PageSelector, Request, Response, SignatureRef,
};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId};
use tracing::{debug, trace};

use crate::local::{
    LocalRequest, LocalResponse, LocaltimeFunction, TimeFunction, UnsupportedObjectHandler,
};
use crate::{Engine, EngineFactory};
use arena::{Arena, PdfDocument, Resource};
use objects::{catalog, entry, entry_dict, entry_name, entry_text, info, lopdf_error, pdf_date};

/// Info dictionary keys reported by `GetMetaData`.
const META_TAGS: [&str; 8] = [
    "Title",
    "Author",
    "Subject",
    "Keywords",
    "Creator",
    "Producer",
    "CreationDate",
    "ModDate",
];

const ALL_PERMISSIONS: u32 = 0xFFFF_FFFF;

pub struct LopdfEngine {
    arena: Arena,
    last_error: Option<ErrorCode>,
    machine_time_access: bool,
    active_font_info: Option<u64>,
    unsupported_handler: Option<UnsupportedObjectHandler>,
    time_function: Option<TimeFunction>,
    localtime_function: Option<LocaltimeFunction>,
}

/// Trailer key `/Encrypt` is renamed to while loading a protected file.
/// Same length, so cross-reference offsets stay valid.
const DEFERRED_ENCRYPT: &[u8] = b"NoCrypt";

/// Loads every object of an encrypted file still encrypted, with `/Encrypt`
/// restored in the trailer for [`Document::decrypt`].
///
/// lopdf only parses the body of an encrypted file when the empty user
/// password authenticates, and then decrypts it during the load.
fn load_encrypted(bytes: &[u8]) -> Result<Document, EngineError> {
    const KEY: &[u8] = b"/Encrypt";
    let mut hidden = bytes.to_vec();
    let positions: Vec<usize> = bytes
        .windows(KEY.len() + 1)
        .enumerate()
        // `/EncryptMetadata` lives in the encryption dictionary itself.
        .filter(|(_, w)| w.starts_with(KEY) && !w[KEY.len()].is_ascii_alphanumeric())
        .map(|(at, _)| at + 1)
        .collect();
    for at in positions {
        hidden[at..at + DEFERRED_ENCRYPT.len()].copy_from_slice(DEFERRED_ENCRYPT);
    }

    let mut doc = Document::load_mem(&hidden).map_err(lopdf_error)?;
    let encrypt = doc
        .trailer
        .remove(DEFERRED_ENCRYPT)
        .ok_or_else(|| EngineError::format("encryption dictionary is not in the trailer"))?;
    doc.trailer.set("Encrypt", encrypt);
    Ok(doc)
}

impl LopdfEngine {
    pub fn new(instance: InstanceId) -> Self {
        Self {
            arena: Arena::new(instance),
            last_error: None,
            machine_time_access: true,
            active_font_info: None,
            unsupported_handler: None,
            time_function: None,
            localtime_function: None,
        }
    }

    pub fn instance(&self) -> InstanceId {
        self.arena.instance()
    }

    /// Number of live handles, documents included.
    pub fn handle_count(&self) -> usize {
        self.arena.len()
    }

    // ========================================================================
    // Handle lookups
    // ========================================================================

    fn pdf(&self, document: DocumentRef) -> Result<&PdfDocument, EngineError> {
        match self.arena.get(document.reference())? {
            Resource::Document(pdf) => Ok(pdf),
            _ => Err(EngineError::not_found(document)),
        }
    }

    fn pdf_mut(&mut self, document: DocumentRef) -> Result<&mut PdfDocument, EngineError> {
        match self.arena.get_mut(document.reference())? {
            Resource::Document(pdf) => Ok(pdf),
            _ => Err(EngineError::not_found(document)),
        }
    }

    fn page(&self, page: PageRef) -> Result<(u64, ObjectId), EngineError> {
        match self.arena.get(page.reference())? {
            Resource::Page { document, object } => Ok((*document, *object)),
            _ => Err(EngineError::not_found(page)),
        }
    }

    /// Document arena id, page object and page index for a selector.
    fn select(&self, selector: PageSelector) -> Result<(u64, ObjectId, u32), EngineError> {
        match selector {
            PageSelector::Loaded(page) => {
                let (document, object) = self.page(page)?;
                let doc = &self.arena.document(document)?.doc;
                let index = pages::page_index(doc, object)
                    .ok_or_else(|| EngineError::page("page is no longer in its document"))?;
                Ok((document, object, index))
            }
            PageSelector::ByIndex { document, index } => {
                let object = pages::page_id(&self.pdf(document)?.doc, index)?;
                Ok((document.id(), object, index))
            }
        }
    }

    fn bookmark(&self, bookmark: BookmarkRef) -> Result<(u64, ObjectId), EngineError> {
        match self.arena.get(bookmark.reference())? {
            Resource::Bookmark { document, object } => Ok((*document, *object)),
            _ => Err(EngineError::not_found(bookmark)),
        }
    }

    fn action(&self, action: ActionRef) -> Result<(&Document, &Dictionary), EngineError> {
        match self.arena.get(action.reference())? {
            Resource::Action { document, dict } => Ok((&self.arena.document(*document)?.doc, dict)),
            _ => Err(EngineError::not_found(action)),
        }
    }

    fn dest(&self, dest: DestRef) -> Result<(&Document, &[Object]), EngineError> {
        match self.arena.get(dest.reference())? {
            Resource::Destination { document, array } => {
                Ok((&self.arena.document(*document)?.doc, array.as_slice()))
            }
            _ => Err(EngineError::not_found(dest)),
        }
    }

    fn link(&self, link: LinkRef) -> Result<(u64, &Dictionary), EngineError> {
        match self.arena.get(link.reference())? {
            Resource::Link {
                document,
                annotation,
            } => Ok((*document, annotation)),
            _ => Err(EngineError::not_found(link)),
        }
    }

    fn signature(&self, signature: SignatureRef) -> Result<(&Document, &Dictionary), EngineError> {
        match self.arena.get(signature.reference())? {
            Resource::Signature { document, value } => {
                Ok((&self.arena.document(*document)?.doc, value))
            }
            _ => Err(EngineError::not_found(signature)),
        }
    }

    fn font_info_mut(&mut self, font_info: FontInfoRef) -> Result<&mut features::FontInfo, EngineError> {
        match self.arena.get_mut(font_info.reference())? {
            Resource::FontInfo(info) => Ok(info),
            _ => Err(EngineError::not_found(font_info)),
        }
    }

    /// Rejects handles that belong to a different document than the one named.
    fn same_document(document: DocumentRef, owner: u64) -> Result<(), EngineError> {
        if document.id() != owner {
            return Err(EngineError::invalid_argument(format!(
                "handle does not belong to {}",
                document
            )));
        }
        Ok(())
    }

    fn issue_action(&mut self, parent: u64, document: u64, dict: Option<Dictionary>) -> Option<ActionRef> {
        dict.map(|dict| {
            let id = self.arena.insert(Some(parent), Resource::Action { document, dict });
            ActionRef::new(self.instance(), id)
        })
    }

    fn issue_dest(&mut self, parent: u64, document: u64, array: Option<Vec<Object>>) -> Option<DestRef> {
        array.map(|array| {
            let id = self
                .arena
                .insert(Some(parent), Resource::Destination { document, array });
            DestRef::new(self.instance(), id)
        })
    }

    fn issue_bookmark(&mut self, document: u64, object: Option<ObjectId>) -> Option<BookmarkRef> {
        object.map(|object| {
            let id = self
                .arena
                .insert(Some(document), Resource::Bookmark { document, object });
            BookmarkRef::new(self.instance(), id)
        })
    }

    // ========================================================================
    // Open / save
    // ========================================================================

    fn open(&mut self, bytes: &[u8], password: Option<&str>) -> Result<DocumentRef, EngineError> {
        let mut doc = Document::load_mem(bytes).map_err(lopdf_error)?;

        let encryption = doc
            .trailer
            .get(b"Encrypt")
            .ok()
            .and_then(|o| objects::resolve(&doc, o))
            .and_then(|o| o.as_dict().ok())
            .cloned();
        let (permissions, security_revision, foreign_security) = match &encryption {
            Some(encrypt) => (
                entry(&doc, encrypt, b"P")
                    .and_then(|p| p.as_i64().ok())
                    .map(|p| p as i32 as u32)
                    .unwrap_or(ALL_PERMISSIONS),
                entry(&doc, encrypt, b"R")
                    .and_then(|r| r.as_i64().ok())
                    .and_then(|r| i32::try_from(r).ok())
                    .unwrap_or(-1),
                entry_name(&doc, encrypt, b"Filter").is_some_and(|f| f != b"Standard"),
            ),
            None => (ALL_PERMISSIONS, -1, false),
        };

        if encryption.is_some() {
            doc = load_encrypted(bytes)?;
            doc.decrypt(password.unwrap_or("")).map_err(|e| {
                EngineError::new(ErrorCode::Password, format!("cannot decrypt document: {}", e))
            })?;
        }
        if doc.get_pages().is_empty() && catalog(&doc).is_err() {
            return Err(EngineError::format("document has no catalog"));
        }

        let found = features::unsupported_features(&doc, foreign_security);
        if let Some(handler) = &self.unsupported_handler {
            for feature in found {
                handler(feature);
            }
        }

        let id = self.arena.insert(
            None,
            Resource::Document(Box::new(PdfDocument {
                doc,
                permissions,
                security_revision,
            })),
        );
        Ok(DocumentRef::new(self.instance(), id))
    }

    fn open_source(&mut self, request: rq::OpenDocument) -> Result<DocumentRef, EngineError> {
        match request.source {
            DocumentSource::Bytes(bytes) => self.open(&bytes, request.password.as_deref()),
            DocumentSource::FilePath(path) => {
                let bytes = std::fs::read(&path)?;
                self.open(&bytes, request.password.as_deref())
            }
        }
    }

    fn create_new_document(&mut self) -> DocumentRef {
        let mut doc = Document::with_version("1.7");
        let pages_id = doc.add_object(dictionary! {
            "Type" => "Pages",
            "Kids" => Vec::<Object>::new(),
            "Count" => 0,
        });
        let catalog_id = doc.add_object(dictionary! { "Type" => "Catalog", "Pages" => pages_id });
        doc.trailer.set("Root", catalog_id);
        let id = self.arena.insert(
            None,
            Resource::Document(Box::new(PdfDocument {
                doc,
                permissions: ALL_PERMISSIONS,
                security_revision: -1,
            })),
        );
        DocumentRef::new(self.instance(), id)
    }

    /// Current time as seen by the document, honoring the overrides.
    fn now(&self) -> Option<chrono::NaiveDateTime> {
        let seconds = match &self.time_function {
            Some(time) => time(),
            None => chrono::Utc::now().timestamp(),
        };
        match &self.localtime_function {
            Some(localtime) => Some(localtime(seconds)),
            None => chrono::Local
                .timestamp_opt(seconds, 0)
                .single()
                .map(|t| t.naive_local()),
        }
    }

    fn save_as_copy(&mut self, request: rq::SaveAsCopy) -> Result<rs::SaveAsCopy, EngineError> {
        let stamp = if self.machine_time_access { self.now() } else { None };
        let mut copy = self.pdf(request.document)?.doc.clone();
        if let Some(time) = stamp {
            set_info_entry(&mut copy, "ModDate", Object::string_literal(pdf_date(time)))?;
        }
        if let Some(version) = request.file_version {
            if !(10..=20).contains(&version) {
                return Err(EngineError::invalid_argument(format!(
                    "unsupported file version {}",
                    version
                )));
            }
            copy.version = format!("{}.{}", version / 10, version % 10);
        }
        let mut bytes = Vec::new();
        copy.save_to(&mut bytes)
            .map_err(|e| EngineError::new(ErrorCode::Io, e.to_string()))?;

        match request.path {
            Some(path) => {
                std::fs::write(&path, &bytes)?;
                Ok(rs::SaveAsCopy {
                    bytes: None,
                    path: Some(path),
                })
            }
            None => Ok(rs::SaveAsCopy {
                bytes: Some(bytes),
                path: None,
            }),
        }
    }

    // ========================================================================
    // Dispatch
    // ========================================================================

    fn dispatch(&mut self, request: Request) -> Result<Response, EngineError> {
        let instance = self.instance();
        Ok(match request {
            // Instance / document
            Request::OpenDocument(r) => Response::OpenDocument(rs::OpenDocument {
                document: self.open_source(r)?,
            }),
            Request::CloseDocument(r) => {
                self.arena.release(r.document.reference())?;
                Response::CloseDocument(rs::Acknowledged {})
            }
            Request::CreateNewDocument(_) => Response::CreateNewDocument(rs::OpenDocument {
                document: self.create_new_document(),
            }),
            Request::GetLastError(_) => Response::GetLastError(rs::GetLastError {
                error: self.last_error,
            }),
            Request::SetSandboxPolicy(r) => {
                match r.policy {
                    SandboxPolicy::MachineTimeAccess => self.machine_time_access = r.enabled,
                }
                Response::SetSandboxPolicy(rs::Acknowledged {})
            }

            // Pages
            Request::LoadPage(r) => {
                let object = pages::page_id(&self.pdf(r.document)?.doc, r.index)?;
                let id = self.arena.insert(
                    Some(r.document.id()),
                    Resource::Page {
                        document: r.document.id(),
                        object,
                    },
                );
                Response::LoadPage(rs::LoadPage {
                    page: PageRef::new(instance, id),
                    index: r.index,
                })
            }
            Request::ClosePage(r) => {
                self.arena.release(r.page.reference())?;
                Response::ClosePage(rs::Acknowledged {})
            }
            Request::GetPageCount(r) => Response::GetPageCount(rs::GetPageCount {
                page_count: self.pdf(r.document)?.doc.get_pages().len() as u32,
            }),

            // Text
            Request::GetPageText(r) => {
                let (document, _, index) = self.select(r.page)?;
                Response::GetPageText(rs::GetPageText {
                    text: pages::text(&self.arena.document(document)?.doc, index)?,
                })
            }
            Request::GetPageTextStructured(r) => {
                self.select(r.page)?;
                return Err(EngineError::unsupported("structured text extraction"));
            }

            // Metadata
            Request::GetMetaData(r) => {
                let doc = &self.pdf(r.document)?.doc;
                let tags = info(doc)
                    .map(|info| {
                        META_TAGS
                            .iter()
                            .filter_map(|tag| {
                                entry_text(doc, info, tag.as_bytes()).map(|value| rs::MetaDataTag {
                                    tag: tag.to_string(),
                                    value,
                                })
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                Response::GetMetaData(rs::GetMetaData { tags })
            }
            Request::GetMetaText(r) => {
                let doc = &self.pdf(r.document)?.doc;
                let value = info(doc)
                    .and_then(|info| entry_text(doc, info, r.tag.as_bytes()))
                    .unwrap_or_default();
                Response::GetMetaText(rs::GetMetaText { tag: r.tag, value })
            }
            Request::GetFileIdentifier(r) => {
                let doc = &self.pdf(r.document)?.doc;
                let slot = match r.kind {
                    FileIdentifierKind::Permanent => 0,
                    FileIdentifierKind::Changing => 1,
                };
                let identifier = doc
                    .trailer
                    .get(b"ID")
                    .ok()
                    .and_then(|id| objects::resolve(doc, id))
                    .and_then(|id| id.as_array().ok())
                    .and_then(|ids| ids.get(slot))
                    .and_then(|id| match objects::resolve(doc, id) {
                        Some(Object::String(bytes, _)) => Some(bytes.clone()),
                        _ => None,
                    });
                Response::GetFileIdentifier(rs::GetFileIdentifier {
                    kind: r.kind,
                    identifier,
                })
            }
            Request::GetPageLabel(r) => Response::GetPageLabel(rs::GetPageLabel {
                label: pages::label(&self.pdf(r.document)?.doc, r.index)?,
            }),

            // Rendering
            Request::RenderPageInDpi(r) => {
                self.select(r.page)?;
                return Err(EngineError::unsupported("rendering"));
            }
            Request::RenderPageInPixels(r) => {
                self.select(r.page)?;
                return Err(EngineError::unsupported("rendering"));
            }
            Request::RenderPagesInDpi(r) => {
                for page in r.pages {
                    self.select(page.page)?;
                }
                return Err(EngineError::unsupported("rendering"));
            }
            Request::RenderPagesInPixels(r) => {
                for page in r.pages {
                    self.select(page.page)?;
                }
                return Err(EngineError::unsupported("rendering"));
            }
            Request::RenderToFile(_) => return Err(EngineError::unsupported("rendering")),
            Request::GetPageSize(r) => {
                let (document, object, _) = self.select(r.page)?;
                Response::GetPageSize(pages::size(&self.arena.document(document)?.doc, object)?)
            }
            Request::GetPageSizeInPixels(r) => {
                if r.dpi == 0 {
                    return Err(EngineError::invalid_argument("dpi must be positive"));
                }
                let (document, object, _) = self.select(r.page)?;
                let size = pages::size(&self.arena.document(document)?.doc, object)?;
                let ratio = f64::from(r.dpi) / 72.0;
                Response::GetPageSizeInPixels(rs::GetPageSizeInPixels {
                    width: (size.width * ratio).round() as u32,
                    height: (size.height * ratio).round() as u32,
                    points_to_pixel_ratio: ratio,
                })
            }

            // Geometry
            Request::GetPageWidth(r) => {
                let (document, object) = self.page(r.page)?;
                Response::GetPageWidth(rs::GetPageWidth {
                    width: pages::size(&self.arena.document(document)?.doc, object)?.width,
                })
            }
            Request::GetPageHeight(r) => {
                let (document, object) = self.page(r.page)?;
                Response::GetPageHeight(rs::GetPageHeight {
                    height: pages::size(&self.arena.document(document)?.doc, object)?.height,
                })
            }
            Request::GetPageSizeByIndex(r) => {
                let doc = &self.pdf(r.document)?.doc;
                Response::GetPageSizeByIndex(pages::size(doc, pages::page_id(doc, r.index)?)?)
            }
            Request::GetPageRotation(r) => {
                let (document, object) = self.page(r.page)?;
                Response::GetPageRotation(rs::GetPageRotation {
                    rotation: pages::rotation(&self.arena.document(document)?.doc, object),
                })
            }
            Request::SetPageRotation(r) => {
                let (document, object) = self.page(r.page)?;
                pages::set_rotation(&mut self.arena.document_mut(document)?.doc, object, r.rotation)?;
                Response::SetPageRotation(rs::Acknowledged {})
            }
            Request::PageHasTransparency(r) => {
                let (document, object) = self.page(r.page)?;
                Response::PageHasTransparency(rs::PageHasTransparency {
                    transparent: pages::has_transparency(&self.arena.document(document)?.doc, object),
                })
            }

            // Document introspection
            Request::GetFileVersion(r) => Response::GetFileVersion(rs::GetFileVersion {
                file_version: parse_version(&self.pdf(r.document)?.doc.version)?,
            }),
            Request::GetDocPermissions(r) => Response::GetDocPermissions(rs::GetDocPermissions {
                permissions: self.pdf(r.document)?.permissions,
            }),
            Request::GetSecurityHandlerRevision(r) => {
                Response::GetSecurityHandlerRevision(rs::GetSecurityHandlerRevision {
                    revision: self.pdf(r.document)?.security_revision,
                })
            }
            Request::GetPageMode(r) => {
                let doc = &self.pdf(r.document)?.doc;
                let mode = match entry_name(doc, catalog(doc)?, b"PageMode") {
                    None | Some(b"UseNone") => PageMode::UseNone,
                    Some(b"UseOutlines") => PageMode::UseOutlines,
                    Some(b"UseThumbs") => PageMode::UseThumbs,
                    Some(b"FullScreen") => PageMode::FullScreen,
                    Some(b"UseOC") => PageMode::UseOc,
                    Some(b"UseAttachments") => PageMode::UseAttachments,
                    Some(_) => PageMode::Unknown,
                };
                Response::GetPageMode(rs::GetPageMode { mode })
            }
            Request::IsTagged(r) => {
                let doc = &self.pdf(r.document)?.doc;
                let tagged = entry_dict(doc, catalog(doc)?, b"MarkInfo")
                    .and_then(|mark| entry(doc, mark, b"Marked"))
                    .is_some_and(|marked| matches!(marked, Object::Boolean(true)));
                Response::IsTagged(rs::IsTagged { tagged })
            }

            // Bookmarks
            Request::GetBookmarks(r) => Response::GetBookmarks(rs::GetBookmarks {
                bookmarks: navigation::bookmarks(&self.pdf(r.document)?.doc),
            }),
            Request::BookmarkGetFirstChild(r) => {
                let parent = match r.bookmark {
                    Some(bookmark) => {
                        let (owner, object) = self.bookmark(bookmark)?;
                        Self::same_document(r.document, owner)?;
                        Some(object)
                    }
                    None => None,
                };
                let child = navigation::first_child(&self.pdf(r.document)?.doc, parent);
                Response::BookmarkGetFirstChild(rs::BookmarkLookup {
                    bookmark: self.issue_bookmark(r.document.id(), child),
                })
            }
            Request::BookmarkGetNextSibling(r) => {
                let (owner, object) = self.bookmark(r.bookmark)?;
                Self::same_document(r.document, owner)?;
                let next = navigation::next_sibling(&self.pdf(r.document)?.doc, object);
                Response::BookmarkGetNextSibling(rs::BookmarkLookup {
                    bookmark: self.issue_bookmark(r.document.id(), next),
                })
            }
            Request::BookmarkGetTitle(r) => {
                let (document, object) = self.bookmark(r.bookmark)?;
                Response::BookmarkGetTitle(rs::BookmarkGetTitle {
                    title: navigation::title(&self.arena.document(document)?.doc, object)?,
                })
            }
            Request::BookmarkFind(r) => {
                let found = navigation::find(&self.pdf(r.document)?.doc, &r.title);
                Response::BookmarkFind(rs::BookmarkLookup {
                    bookmark: self.issue_bookmark(r.document.id(), found),
                })
            }
            Request::BookmarkGetDest(r) => {
                let (owner, object) = self.bookmark(r.bookmark)?;
                Self::same_document(r.document, owner)?;
                let dest = navigation::bookmark_dest(&self.arena.document(owner)?.doc, object);
                Response::BookmarkGetDest(rs::DestLookup {
                    dest: self.issue_dest(owner, owner, dest),
                })
            }
            Request::BookmarkGetAction(r) => {
                let (document, object) = self.bookmark(r.bookmark)?;
                let action = navigation::bookmark_action(&self.arena.document(document)?.doc, object);
                Response::BookmarkGetAction(rs::ActionLookup {
                    action: self.issue_action(r.bookmark.id(), document, action),
                })
            }

            // Actions and destinations
            Request::ActionGetType(r) => {
                let (doc, action) = self.action(r.action)?;
                Response::ActionGetType(rs::ActionGetType {
                    kind: navigation::action_kind(doc, action),
                })
            }
            Request::ActionGetDest(r) => {
                self.pdf(r.document)?;
                let (doc, action) = self.action(r.action)?;
                let dest = navigation::action_dest(doc, action);
                Response::ActionGetDest(rs::DestLookup {
                    dest: self.issue_dest(r.document.id(), r.document.id(), dest),
                })
            }
            Request::ActionGetFilePath(r) => {
                let (doc, action) = self.action(r.action)?;
                Response::ActionGetFilePath(rs::ActionGetFilePath {
                    path: navigation::action_file_path(doc, action),
                })
            }
            Request::ActionGetUriPath(r) => {
                self.pdf(r.document)?;
                let (doc, action) = self.action(r.action)?;
                Response::ActionGetUriPath(rs::ActionGetUriPath {
                    uri: navigation::action_uri(doc, action),
                })
            }
            Request::DestGetPageIndex(r) => {
                self.pdf(r.document)?;
                let (doc, dest) = self.dest(r.dest)?;
                Response::DestGetPageIndex(rs::DestGetPageIndex {
                    index: navigation::dest_page_index(doc, dest),
                })
            }
            Request::DestGetView(r) => {
                let (doc, dest) = self.dest(r.dest)?;
                let (view, params) = navigation::dest_view(doc, dest);
                Response::DestGetView(rs::DestGetView { view, params })
            }
            Request::DestGetLocationInPage(r) => {
                let (doc, dest) = self.dest(r.dest)?;
                Response::DestGetLocationInPage(navigation::dest_location(doc, dest))
            }

            // Links
            Request::LinkGetLinkAtPoint(r) => {
                let (document, object) = self.page(r.page)?;
                let found =
                    navigation::link_at_point(&self.arena.document(document)?.doc, object, r.x, r.y);
                Response::LinkGetLinkAtPoint(rs::LinkGetLinkAtPoint {
                    link: found.map(|annotation| {
                        let id = self
                            .arena
                            .insert(Some(r.page.id()), Resource::Link { document, annotation });
                        LinkRef::new(instance, id)
                    }),
                })
            }
            Request::LinkEnumerate(r) => {
                let (document, object) = self.page(r.page)?;
                let found = navigation::page_links(&self.arena.document(document)?.doc, object);
                let links = found
                    .into_iter()
                    .map(|annotation| {
                        let id = self
                            .arena
                            .insert(Some(r.page.id()), Resource::Link { document, annotation });
                        LinkRef::new(instance, id)
                    })
                    .collect();
                Response::LinkEnumerate(rs::LinkEnumerate { links })
            }
            Request::LinkGetDest(r) => {
                let (owner, annotation) = self.link(r.link)?;
                Self::same_document(r.document, owner)?;
                let dest = navigation::link_dest(&self.arena.document(owner)?.doc, annotation);
                Response::LinkGetDest(rs::DestLookup {
                    dest: self.issue_dest(owner, owner, dest),
                })
            }
            Request::LinkGetAction(r) => {
                let (document, annotation) = self.link(r.link)?;
                let action = navigation::link_action(&self.arena.document(document)?.doc, annotation);
                Response::LinkGetAction(rs::ActionLookup {
                    action: self.issue_action(r.link.id(), document, action),
                })
            }
            Request::LinkGetAnnotRect(r) => {
                let (document, annotation) = self.link(r.link)?;
                let rect = navigation::link_rect(&self.arena.document(document)?.doc, annotation)
                    .ok_or_else(|| EngineError::format("link annotation has no rectangle"))?;
                Response::LinkGetAnnotRect(rs::LinkGetAnnotRect { rect })
            }
            Request::LinkCountQuadPoints(r) => {
                let (document, annotation) = self.link(r.link)?;
                let quads =
                    navigation::link_quad_points(&self.arena.document(document)?.doc, annotation);
                Response::LinkCountQuadPoints(rs::LinkCountQuadPoints {
                    count: quads.len() as u32,
                })
            }
            Request::LinkGetQuadPoints(r) => {
                let (document, annotation) = self.link(r.link)?;
                let quads =
                    navigation::link_quad_points(&self.arena.document(document)?.doc, annotation);
                let points = quads.get(r.quad_index as usize).copied().ok_or_else(|| {
                    EngineError::invalid_argument(format!(
                        "quad {} out of range, link has {}",
                        r.quad_index,
                        quads.len()
                    ))
                })?;
                Response::LinkGetQuadPoints(rs::LinkGetQuadPoints { points })
            }
            Request::LinkGetLinkZOrderAtPoint(r) => {
                let (document, object) = self.page(r.page)?;
                let z_order = navigation::link_z_order_at_point(
                    &self.arena.document(document)?.doc,
                    object,
                    r.x,
                    r.y,
                );
                Response::LinkGetLinkZOrderAtPoint(rs::LinkGetLinkZOrderAtPoint { z_order })
            }
            Request::LinkGetAnnot(r) => {
                let (document, object) = self.page(r.page)?;
                let (owner, annotation) = self.link(r.link)?;
                let on_page = owner == document
                    && navigation::page_links(&self.arena.document(document)?.doc, object)
                        .contains(annotation);
                if !on_page {
                    return Err(EngineError::invalid_argument(format!(
                        "{} is not on {}",
                        r.link, r.page
                    )));
                }
                let annotation = annotation.clone();
                let id = self
                    .arena
                    .insert(Some(r.page.id()), Resource::Annotation { document, annotation });
                Response::LinkGetAnnot(rs::LinkGetAnnot {
                    annotation: AnnotationRef::new(instance, id),
                })
            }
            Request::GetPageAAction(r) => {
                let (document, object) = self.page(r.page)?;
                let action =
                    navigation::page_action(&self.arena.document(document)?.doc, object, r.event);
                Response::GetPageAAction(rs::ActionLookup {
                    action: self.issue_action(r.page.id(), document, action),
                })
            }

            // Composition
            Request::ImportPages(r) => {
                let source = self.pdf(r.source)?.doc.clone();
                let page_count = source.get_pages().len() as u32;
                let indices = match r.page_range.as_deref() {
                    Some(range) => pages::parse_page_range(range, page_count)?,
                    None => (0..page_count).collect(),
                };
                let destination = &mut self.pdf_mut(r.destination)?.doc;
                let imported = pages::import(&source, destination, &indices, r.index)?;
                Response::ImportPages(rs::PagesImported { imported })
            }
            Request::ImportPagesByIndex(r) => {
                let source = self.pdf(r.source)?.doc.clone();
                let indices = if r.page_indices.is_empty() {
                    (0..source.get_pages().len() as u32).collect()
                } else {
                    r.page_indices
                };
                let destination = &mut self.pdf_mut(r.destination)?.doc;
                let imported = pages::import(&source, destination, &indices, r.index)?;
                Response::ImportPagesByIndex(rs::PagesImported { imported })
            }
            Request::ImportNPagesToOne(r) => {
                self.pdf(r.source)?;
                return Err(EngineError::unsupported("n-up page composition"));
            }
            Request::CopyViewerPreferences(r) => {
                let source = self.pdf(r.source)?.doc.clone();
                let destination = &mut self.pdf_mut(r.destination)?.doc;
                Response::CopyViewerPreferences(rs::CopyViewerPreferences {
                    copied: pages::copy_viewer_preferences(&source, destination)?,
                })
            }
            Request::NewXObjectFromPage(r) => {
                self.pdf(r.source)?;
                self.pdf(r.destination)?;
                return Err(EngineError::unsupported("form xobjects"));
            }
            Request::NewFormObjectFromXObject(_) => {
                return Err(EngineError::unsupported("form objects"));
            }
            Request::CloseXObject(r) => {
                self.arena.release(r.xobject.reference())?;
                Response::CloseXObject(rs::Acknowledged {})
            }
            Request::FlattenPage(r) => {
                let (document, object) = self.page(r.page)?;
                let doc = &self.arena.document(document)?.doc;
                let has_annotations = doc
                    .get_dictionary(object)
                    .ok()
                    .and_then(|page| objects::entry_array(doc, page, b"Annots"))
                    .is_some_and(|annots| !annots.is_empty());
                if has_annotations {
                    return Err(EngineError::unsupported("annotation flattening"));
                }
                Response::FlattenPage(rs::FlattenPage {
                    result: rs::FlattenResult::NothingToDo,
                })
            }

            // Save
            Request::SaveAsCopy(r) => Response::SaveAsCopy(self.save_as_copy(r)?),

            // Signatures
            Request::GetSignatureCount(r) => Response::GetSignatureCount(rs::GetSignatureCount {
                count: features::signatures(&self.pdf(r.document)?.doc).len() as u32,
            }),
            Request::GetSignatureObject(r) => {
                let value = features::signatures(&self.pdf(r.document)?.doc)
                    .into_iter()
                    .nth(r.index as usize)
                    .ok_or_else(|| EngineError::not_found(format!("signature {}", r.index)))?;
                let id = self.arena.insert(
                    Some(r.document.id()),
                    Resource::Signature {
                        document: r.document.id(),
                        value,
                    },
                );
                Response::GetSignatureObject(rs::GetSignatureObject {
                    signature: SignatureRef::new(instance, id),
                })
            }
            Request::SignatureGetContents(r) => {
                let (doc, value) = self.signature(r.signature)?;
                Response::SignatureGetContents(rs::SignatureGetContents {
                    contents: features::signature_contents(doc, value),
                })
            }
            Request::SignatureGetByteRange(r) => {
                let (doc, value) = self.signature(r.signature)?;
                Response::SignatureGetByteRange(rs::SignatureGetByteRange {
                    byte_range: features::signature_byte_range(doc, value),
                })
            }
            Request::SignatureGetSubFilter(r) => {
                let (doc, value) = self.signature(r.signature)?;
                Response::SignatureGetSubFilter(rs::SignatureGetSubFilter {
                    sub_filter: features::signature_sub_filter(doc, value),
                })
            }
            Request::SignatureGetReason(r) => {
                let (doc, value) = self.signature(r.signature)?;
                Response::SignatureGetReason(rs::SignatureGetReason {
                    reason: features::signature_reason(doc, value),
                })
            }
            Request::SignatureGetTime(r) => {
                let (doc, value) = self.signature(r.signature)?;
                Response::SignatureGetTime(rs::SignatureGetTime {
                    time: features::signature_time(doc, value),
                })
            }
            Request::SignatureGetDocMdpPermission(r) => {
                let (doc, value) = self.signature(r.signature)?;
                Response::SignatureGetDocMdpPermission(rs::SignatureGetDocMdpPermission {
                    permission: features::signature_docmdp_permission(doc, value),
                })
            }

            // Fonts
            Request::GetDefaultTtfMap(_) => Response::GetDefaultTtfMap(rs::GetDefaultTtfMap {
                entries: features::default_ttf_map(),
            }),
            Request::GetDefaultSystemFontInfo(_) => {
                let id = self
                    .arena
                    .insert(None, Resource::FontInfo(features::FontInfo::default()));
                Response::GetDefaultSystemFontInfo(rs::GetDefaultSystemFontInfo {
                    font_info: FontInfoRef::new(instance, id),
                })
            }
            Request::SetSystemFontInfo(r) => {
                self.font_info_mut(r.font_info)?;
                self.active_font_info = Some(r.font_info.id());
                Response::SetSystemFontInfo(rs::Acknowledged {})
            }
            Request::FreeDefaultSystemFontInfo(r) => {
                self.arena.release(r.font_info.reference())?;
                if self.active_font_info == Some(r.font_info.id()) {
                    self.active_font_info = None;
                }
                Response::FreeDefaultSystemFontInfo(rs::Acknowledged {})
            }
            Request::AddInstalledFont(r) => {
                self.font_info_mut(r.font_info)?.add(&r.face, r.charset)?;
                Response::AddInstalledFont(rs::Acknowledged {})
            }

            // Thumbnails and bitmaps
            Request::GetDecodedThumbnailData(r) => {
                let (document, object) = self.page(r.page)?;
                let data = match pages::thumbnail(&self.arena.document(document)?.doc, object) {
                    Some(stream) => pages::decode_thumbnail(stream)?,
                    None => Vec::new(),
                };
                Response::GetDecodedThumbnailData(rs::ThumbnailData { data })
            }
            Request::GetRawThumbnailData(r) => {
                let (document, object) = self.page(r.page)?;
                let data = pages::thumbnail(&self.arena.document(document)?.doc, object)
                    .map(|stream| stream.content.clone())
                    .unwrap_or_default();
                Response::GetRawThumbnailData(rs::ThumbnailData { data })
            }
            Request::GetThumbnailAsBitmap(r) => {
                let (document, object) = self.page(r.page)?;
                let bitmap = pages::thumbnail_bitmap(&self.arena.document(document)?.doc, object)?;
                Response::GetThumbnailAsBitmap(rs::GetThumbnailAsBitmap {
                    thumbnail: bitmap.map(|bitmap| {
                        let (width, height, format) = (bitmap.width, bitmap.height, bitmap.format);
                        let id = self.arena.insert(Some(r.page.id()), Resource::Bitmap(bitmap));
                        rs::ThumbnailBitmap {
                            bitmap: BitmapRef::new(instance, id),
                            width,
                            height,
                            format,
                        }
                    }),
                })
            }
            Request::GetBitmap(r) => match self.arena.get(r.bitmap.reference())? {
                Resource::Bitmap(bitmap) => Response::GetBitmap(rs::GetBitmap {
                    width: bitmap.width,
                    height: bitmap.height,
                    format: bitmap.format,
                    data: bitmap.data.clone(),
                }),
                _ => return Err(EngineError::not_found(r.bitmap)),
            },
            Request::DestroyBitmap(r) => {
                self.arena.release(r.bitmap.reference())?;
                Response::DestroyBitmap(rs::Acknowledged {})
            }
        })
    }

    fn dispatch_local(&mut self, request: LocalRequest) -> Result<LocalResponse, EngineError> {
        match request {
            LocalRequest::OpenReader {
                mut reader,
                size,
                password,
            } => {
                let mut bytes = Vec::new();
                reader.seek(SeekFrom::Start(0))?;
                reader.take(size).read_to_end(&mut bytes)?;
                if (bytes.len() as u64) < size {
                    return Err(EngineError::new(
                        ErrorCode::File,
                        format!("reader ended after {} of {} bytes", bytes.len(), size),
                    ));
                }
                Ok(LocalResponse::Opened(self.open(&bytes, password.as_deref())?))
            }
            LocalRequest::SetUnsupportedObjectHandler(handler) => {
                self.unsupported_handler = handler;
                Ok(LocalResponse::Registered)
            }
            LocalRequest::SetTimeFunction(time) => {
                self.time_function = time;
                Ok(LocalResponse::Registered)
            }
            LocalRequest::SetLocaltimeFunction(localtime) => {
                self.localtime_function = localtime;
                Ok(LocalResponse::Registered)
            }
        }
    }
}

impl Engine for LopdfEngine {
    fn execute(&mut self, request: Request) -> Result<Response, EngineError> {
        let operation = request.operation();
        trace!(instance_id = %self.instance(), %operation, "executing");
        let result = self.dispatch(request);
        if operation != docgate_protocol::Operation::GetLastError {
            self.last_error = result.as_ref().err().map(|e| e.code);
        }
        result
    }

    fn execute_local(&mut self, request: LocalRequest) -> Result<LocalResponse, EngineError> {
        trace!(instance_id = %self.instance(), operation = %request.operation(), "executing local");
        let result = self.dispatch_local(request);
        self.last_error = result.as_ref().err().map(|e| e.code);
        result
    }
}

/// `1.7` -> 17
fn parse_version(version: &str) -> Result<u16, EngineError> {
    let invalid = || EngineError::format(format!("invalid header version {:?}", version));
    let (major, minor) = version.trim().split_once('.').ok_or_else(invalid)?;
    let major: u16 = major.parse().map_err(|_| invalid())?;
    let minor: u16 = minor.parse().map_err(|_| invalid())?;
    major
        .checked_mul(10)
        .and_then(|v| v.checked_add(minor))
        .ok_or_else(invalid)
}

/// Sets a key on the trailer's Info dictionary, creating it when absent.
fn set_info_entry(doc: &mut Document, key: &str, value: Object) -> Result<(), EngineError> {
    match doc.trailer.get(b"Info").and_then(Object::as_reference) {
        Ok(id) => {
            doc.get_object_mut(id)
                .and_then(Object::as_dict_mut)
                .map_err(lopdf_error)?
                .set(key, value);
        }
        Err(_) => {
            let mut info = match doc.trailer.get(b"Info") {
                Ok(Object::Dictionary(existing)) => existing.clone(),
                _ => Dictionary::new(),
            };
            info.set(key, value);
            let id = doc.add_object(info);
            doc.trailer.set("Info", id);
        }
    }
    Ok(())
}

#[derive(Debug, Default, Clone)]
pub struct LopdfEngineFactory;

impl LopdfEngineFactory {
    pub fn new() -> Self {
        Self
    }
}

impl EngineFactory for LopdfEngineFactory {
    type Engine = LopdfEngine;

    fn create(&self, instance: InstanceId) -> Result<LopdfEngine, EngineError> {
        debug!(instance_id = %instance, "creating lopdf engine");
        Ok(LopdfEngine::new(instance))
    }

    fn init_library(&self) {
        debug!("engine library initialized");
    }

    fn destroy_library(&self) {
        debug!("engine library destroyed");
    }
}
