//! Response half of the operation catalog.
//!
//! Several operations share a response shape; those are type aliases of one
//! struct so callers can handle them uniformly.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::ErrorCode;
use crate::handles::{
    ActionRef, AnnotationRef, BitmapRef, BookmarkRef, DestRef, DocumentRef, FontInfoRef, LinkRef,
    PageRef, SignatureRef, XObjectRef,
};
use crate::references;
use crate::requests::{FileIdentifierKind, PageRotation};

/// Success with nothing to report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Acknowledged {}

pub type CloseDocument = Acknowledged;
pub type SetSandboxPolicy = Acknowledged;
pub type ClosePage = Acknowledged;
pub type SetPageRotation = Acknowledged;
pub type CloseXObject = Acknowledged;
/// Form objects are not modelled; engines report `Unsupported`.
pub type NewFormObjectFromXObject = Acknowledged;
pub type SetSystemFontInfo = Acknowledged;
pub type FreeDefaultSystemFontInfo = Acknowledged;
pub type AddInstalledFont = Acknowledged;
pub type DestroyBitmap = Acknowledged;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenDocument {
    pub document: DocumentRef,
}

pub type CreateNewDocument = OpenDocument;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetLastError {
    /// `None` when the last call succeeded.
    pub error: Option<ErrorCode>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadPage {
    pub page: PageRef,
    pub index: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetPageCount {
    pub page_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetPageText {
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub left: f64,
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FontInformation {
    pub size: f64,
    pub name: String,
    pub flags: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextSpan {
    pub text: String,
    pub rect: Rect,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font: Option<FontInformation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetPageTextStructured {
    pub spans: Vec<TextSpan>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaDataTag {
    pub tag: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetMetaData {
    pub tags: Vec<MetaDataTag>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetMetaText {
    pub tag: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetFileIdentifier {
    pub kind: FileIdentifierKind,
    #[serde(with = "crate::wire::base64_bytes_opt", default)]
    pub identifier: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetPageLabel {
    pub label: Option<String>,
}

// ============================================================================
// Rendering
// ============================================================================

/// BGRA pixels, row-major, `width * 4` bytes per row.
#[derive(Clone, Serialize, Deserialize)]
pub struct RenderedImage {
    pub width: u32,
    pub height: u32,
    #[serde(with = "crate::wire::base64_bytes")]
    pub bgra: Vec<u8>,
}

impl std::fmt::Debug for RenderedImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderedImage")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.bgra.len())
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderedPage {
    pub index: u32,
    pub x_offset: u32,
    pub y_offset: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderPage {
    pub image: RenderedImage,
    pub page: RenderedPage,
}

pub type RenderPageInDpi = RenderPage;
pub type RenderPageInPixels = RenderPage;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderPages {
    pub image: RenderedImage,
    pub pages: Vec<RenderedPage>,
}

pub type RenderPagesInDpi = RenderPages;
pub type RenderPagesInPixels = RenderPages;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderToFile {
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub pages: Vec<RenderedPage>,
}

/// Size in points (1/72 inch), rotation applied.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PageSize {
    pub width: f64,
    pub height: f64,
}

pub type GetPageSize = PageSize;
pub type GetPageSizeByIndex = PageSize;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetPageSizeInPixels {
    pub width: u32,
    pub height: u32,
    pub points_to_pixel_ratio: f64,
}

// ============================================================================
// Geometry and introspection
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetPageWidth {
    pub width: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetPageHeight {
    pub height: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetPageRotation {
    pub rotation: PageRotation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageHasTransparency {
    pub transparent: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetFileVersion {
    /// `14` for PDF 1.4.
    pub file_version: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetDocPermissions {
    pub permissions: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetSecurityHandlerRevision {
    /// `-1` for unencrypted documents.
    pub revision: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageMode {
    Unknown,
    UseNone,
    UseOutlines,
    UseThumbs,
    FullScreen,
    UseOc,
    UseAttachments,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetPageMode {
    pub mode: PageMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsTagged {
    pub tagged: bool,
}

// ============================================================================
// Bookmarks, actions, destinations, links
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bookmark {
    pub title: String,
    pub page_index: Option<u32>,
    pub children: Vec<Bookmark>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetBookmarks {
    pub bookmarks: Vec<Bookmark>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookmarkLookup {
    pub bookmark: Option<BookmarkRef>,
}

pub type BookmarkGetFirstChild = BookmarkLookup;
pub type BookmarkGetNextSibling = BookmarkLookup;
pub type BookmarkFind = BookmarkLookup;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookmarkGetTitle {
    pub title: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestLookup {
    pub dest: Option<DestRef>,
}

pub type BookmarkGetDest = DestLookup;
pub type ActionGetDest = DestLookup;
pub type LinkGetDest = DestLookup;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionLookup {
    pub action: Option<ActionRef>,
}

pub type BookmarkGetAction = ActionLookup;
pub type LinkGetAction = ActionLookup;
pub type GetPageAAction = ActionLookup;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Unsupported,
    GoTo,
    RemoteGoTo,
    Uri,
    Launch,
    EmbeddedGoTo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionGetType {
    pub kind: ActionKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionGetFilePath {
    pub path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionGetUriPath {
    pub uri: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestGetPageIndex {
    pub index: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DestView {
    Unknown,
    Xyz,
    Fit,
    FitH,
    FitV,
    FitR,
    FitB,
    FitBH,
    FitBV,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestGetView {
    pub view: DestView,
    pub params: Vec<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestGetLocationInPage {
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub zoom: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkGetLinkAtPoint {
    pub link: Option<LinkRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkEnumerate {
    pub links: Vec<LinkRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkGetAnnotRect {
    pub rect: Rect,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkCountQuadPoints {
    pub count: u32,
}

/// One quadrilateral of a link's `QuadPoints`, corners in file order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuadPoints {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
    pub x3: f64,
    pub y3: f64,
    pub x4: f64,
    pub y4: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkGetQuadPoints {
    pub points: QuadPoints,
}

/// Position of the topmost link under the point among the page's links,
/// `None` when there is none.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkGetLinkZOrderAtPoint {
    pub z_order: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkGetAnnot {
    pub annotation: AnnotationRef,
}

// ============================================================================
// Composition and save
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PagesImported {
    pub imported: u32,
}

pub type ImportPages = PagesImported;
pub type ImportPagesByIndex = PagesImported;

pub type ImportNPagesToOne = OpenDocument;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CopyViewerPreferences {
    pub copied: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewXObjectFromPage {
    pub xobject: XObjectRef,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlattenResult {
    Fail,
    Success,
    NothingToDo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlattenPage {
    pub result: FlattenResult,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveAsCopy {
    /// Saved bytes, unset when written to a path.
    #[serde(with = "crate::wire::base64_bytes_opt", default)]
    pub bytes: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

// ============================================================================
// Signatures
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetSignatureCount {
    pub count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetSignatureObject {
    pub signature: SignatureRef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureGetContents {
    #[serde(with = "crate::wire::base64_bytes")]
    pub contents: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureGetByteRange {
    pub byte_range: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureGetSubFilter {
    pub sub_filter: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureGetReason {
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureGetTime {
    /// Raw PDF date string, e.g. `D:20240101120000Z`.
    pub time: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureGetDocMdpPermission {
    /// 1-3 per the DocMDP transform, 0 when absent.
    pub permission: u32,
}

// ============================================================================
// Fonts, thumbnails
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharsetFontMapping {
    pub charset: i32,
    pub font_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetDefaultTtfMap {
    pub entries: Vec<CharsetFontMapping>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetDefaultSystemFontInfo {
    pub font_info: FontInfoRef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThumbnailData {
    /// Empty when the page has no thumbnail.
    #[serde(with = "crate::wire::base64_bytes")]
    pub data: Vec<u8>,
}

pub type GetDecodedThumbnailData = ThumbnailData;
pub type GetRawThumbnailData = ThumbnailData;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BitmapFormat {
    Gray,
    Bgr,
    Bgrx,
    Bgra,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThumbnailBitmap {
    pub bitmap: BitmapRef,
    pub width: u32,
    pub height: u32,
    pub format: BitmapFormat,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetThumbnailAsBitmap {
    pub thumbnail: Option<ThumbnailBitmap>,
}

/// Tightly packed rows in `format`.
#[derive(Clone, Serialize, Deserialize)]
pub struct GetBitmap {
    pub width: u32,
    pub height: u32,
    pub format: BitmapFormat,
    #[serde(with = "crate::wire::base64_bytes")]
    pub data: Vec<u8>,
}

impl std::fmt::Debug for GetBitmap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GetBitmap")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("bytes", &self.data.len())
            .finish()
    }
}

references! {
    Acknowledged {},
    OpenDocument { document },
    GetLastError {},
    LoadPage { page },
    GetPageCount {},
    GetPageText {},
    GetPageTextStructured {},
    GetMetaData {},
    GetMetaText {},
    GetFileIdentifier {},
    GetPageLabel {},
    RenderPage {},
    RenderPages {},
    RenderToFile {},
    PageSize {},
    GetPageSizeInPixels {},
    GetPageWidth {},
    GetPageHeight {},
    GetPageRotation {},
    PageHasTransparency {},
    GetFileVersion {},
    GetDocPermissions {},
    GetSecurityHandlerRevision {},
    GetPageMode {},
    IsTagged {},
    GetBookmarks {},
    BookmarkLookup { bookmark },
    BookmarkGetTitle {},
    DestLookup { dest },
    ActionLookup { action },
    ActionGetType {},
    ActionGetFilePath {},
    ActionGetUriPath {},
    DestGetPageIndex {},
    DestGetView {},
    DestGetLocationInPage {},
    LinkGetLinkAtPoint { link },
    LinkEnumerate { links },
    LinkGetAnnotRect {},
    LinkCountQuadPoints {},
    LinkGetQuadPoints {},
    LinkGetLinkZOrderAtPoint {},
    LinkGetAnnot { annotation },
    PagesImported {},
    CopyViewerPreferences {},
    NewXObjectFromPage { xobject },
    FlattenPage {},
    SaveAsCopy {},
    GetSignatureCount {},
    GetSignatureObject { signature },
    SignatureGetContents {},
    SignatureGetByteRange {},
    SignatureGetSubFilter {},
    SignatureGetReason {},
    SignatureGetTime {},
    SignatureGetDocMdpPermission {},
    GetDefaultTtfMap {},
    GetDefaultSystemFontInfo { font_info },
    ThumbnailData {},
    ThumbnailBitmap { bitmap },
    GetThumbnailAsBitmap { thumbnail },
    GetBitmap {},
}
