//! Request half of the operation catalog.
//!
//! Every request here is transportable: no function values, no streams.
//! Byte payloads are base64 in the JSON encoding.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::handles::{
    ActionRef, BitmapRef, BookmarkRef, CollectReferences, DestRef, DocumentRef, FontInfoRef,
    LinkRef, PageRef, PageSelector, Reference, SignatureRef, XObjectRef,
};
use crate::references;

// ============================================================================
// Document / instance
// ============================================================================

/// Canonical document source. Streaming readers are not representable here;
/// they are either handled in-process or buffered into `Bytes` first.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentSource {
    Bytes(#[serde(with = "crate::wire::base64_bytes")] Vec<u8>),
    FilePath(PathBuf),
}

impl std::fmt::Debug for DocumentSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DocumentSource::Bytes(bytes) => write!(f, "Bytes({} bytes)", bytes.len()),
            DocumentSource::FilePath(path) => f.debug_tuple("FilePath").field(path).finish(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenDocument {
    pub source: DocumentSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloseDocument {
    pub document: DocumentRef,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateNewDocument {}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetLastError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SandboxPolicy {
    MachineTimeAccess,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetSandboxPolicy {
    pub policy: SandboxPolicy,
    pub enabled: bool,
}

// ============================================================================
// Pages
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadPage {
    pub document: DocumentRef,
    pub index: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClosePage {
    pub page: PageRef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetPageCount {
    pub document: DocumentRef,
}

// ============================================================================
// Text
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetPageText {
    pub page: PageSelector,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextStructureMode {
    #[default]
    Rects,
    Chars,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetPageTextStructured {
    pub page: PageSelector,
    #[serde(default)]
    pub mode: TextStructureMode,
    #[serde(default)]
    pub collect_font_information: bool,
}

// ============================================================================
// Metadata
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetMetaData {
    pub document: DocumentRef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetMetaText {
    pub document: DocumentRef,
    /// Info dictionary key, e.g. `Title` or `ModDate`.
    pub tag: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileIdentifierKind {
    Permanent,
    Changing,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetFileIdentifier {
    pub document: DocumentRef,
    pub kind: FileIdentifierKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetPageLabel {
    pub document: DocumentRef,
    pub index: u32,
}

// ============================================================================
// Rendering
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageFormat {
    #[default]
    Png,
    Jpeg,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderPageInDpi {
    pub page: PageSelector,
    pub dpi: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderPagesInDpi {
    pub pages: Vec<RenderPageInDpi>,
    /// Vertical gap in pixels between stacked pages.
    #[serde(default)]
    pub padding: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderPageInPixels {
    pub page: PageSelector,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderPagesInPixels {
    pub pages: Vec<RenderPageInPixels>,
    #[serde(default)]
    pub padding: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderTarget {
    Dpi(Vec<RenderPageInDpi>),
    Pixels(Vec<RenderPageInPixels>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderToFile {
    pub target: RenderTarget,
    #[serde(default)]
    pub format: ImageFormat,
    /// Write to this path; a temporary file is used when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub padding: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetPageSize {
    pub page: PageSelector,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetPageSizeInPixels {
    pub page: PageSelector,
    pub dpi: u32,
}

// ============================================================================
// Page geometry
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetPageWidth {
    pub page: PageRef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetPageHeight {
    pub page: PageRef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetPageSizeByIndex {
    pub document: DocumentRef,
    pub index: u32,
}

/// Clockwise page rotation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageRotation {
    #[default]
    None,
    Quarter,
    Half,
    ThreeQuarters,
}

impl PageRotation {
    pub fn from_degrees(degrees: i64) -> Self {
        match degrees.rem_euclid(360) {
            90 => PageRotation::Quarter,
            180 => PageRotation::Half,
            270 => PageRotation::ThreeQuarters,
            _ => PageRotation::None,
        }
    }

    pub fn degrees(&self) -> i64 {
        match self {
            PageRotation::None => 0,
            PageRotation::Quarter => 90,
            PageRotation::Half => 180,
            PageRotation::ThreeQuarters => 270,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetPageRotation {
    pub page: PageRef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetPageRotation {
    pub page: PageRef,
    pub rotation: PageRotation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageHasTransparency {
    pub page: PageRef,
}

// ============================================================================
// Document introspection
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetFileVersion {
    pub document: DocumentRef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetDocPermissions {
    pub document: DocumentRef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetSecurityHandlerRevision {
    pub document: DocumentRef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetPageMode {
    pub document: DocumentRef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsTagged {
    pub document: DocumentRef,
}

// ============================================================================
// Bookmarks
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetBookmarks {
    pub document: DocumentRef,
}

/// First child of `bookmark`, or the first top-level item when unset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookmarkGetFirstChild {
    pub document: DocumentRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bookmark: Option<BookmarkRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookmarkGetNextSibling {
    pub document: DocumentRef,
    pub bookmark: BookmarkRef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookmarkGetTitle {
    pub bookmark: BookmarkRef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookmarkFind {
    pub document: DocumentRef,
    pub title: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookmarkGetDest {
    pub document: DocumentRef,
    pub bookmark: BookmarkRef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookmarkGetAction {
    pub bookmark: BookmarkRef,
}

// ============================================================================
// Actions, destinations, links
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionGetType {
    pub action: ActionRef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionGetDest {
    pub document: DocumentRef,
    pub action: ActionRef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionGetFilePath {
    pub action: ActionRef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionGetUriPath {
    pub document: DocumentRef,
    pub action: ActionRef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestGetPageIndex {
    pub document: DocumentRef,
    pub dest: DestRef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestGetView {
    pub dest: DestRef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestGetLocationInPage {
    pub dest: DestRef,
}

/// Point in page space.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkGetLinkAtPoint {
    pub page: PageRef,
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkEnumerate {
    pub page: PageRef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkGetDest {
    pub document: DocumentRef,
    pub link: LinkRef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkGetAction {
    pub link: LinkRef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkGetAnnotRect {
    pub link: LinkRef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkCountQuadPoints {
    pub link: LinkRef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkGetQuadPoints {
    pub link: LinkRef,
    pub quad_index: u32,
}

/// Point in page space.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkGetLinkZOrderAtPoint {
    pub page: PageRef,
    pub x: f64,
    pub y: f64,
}

/// `link` must have been found on `page`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkGetAnnot {
    pub page: PageRef,
    pub link: LinkRef,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageActionEvent {
    Open,
    Close,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetPageAAction {
    pub page: PageRef,
    pub event: PageActionEvent,
}

// ============================================================================
// Composition
// ============================================================================

/// Imports pages from `source` into `destination` before `index`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportPages {
    pub source: DocumentRef,
    pub destination: DocumentRef,
    /// One-based ranges like `1,3,5-7`; all pages when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_range: Option<String>,
    pub index: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportPagesByIndex {
    pub source: DocumentRef,
    pub destination: DocumentRef,
    /// Zero-based page indices; all pages when empty.
    #[serde(default)]
    pub page_indices: Vec<u32>,
    pub index: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportNPagesToOne {
    pub source: DocumentRef,
    pub output_width: f32,
    pub output_height: f32,
    pub pages_on_x: u32,
    pub pages_on_y: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CopyViewerPreferences {
    pub source: DocumentRef,
    pub destination: DocumentRef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewXObjectFromPage {
    pub source: DocumentRef,
    pub destination: DocumentRef,
    pub index: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewFormObjectFromXObject {
    pub xobject: XObjectRef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloseXObject {
    pub xobject: XObjectRef,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlattenUsage {
    #[default]
    NormalDisplay,
    Print,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlattenPage {
    pub page: PageRef,
    #[serde(default)]
    pub usage: FlattenUsage,
}

// ============================================================================
// Save
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveAsCopy {
    pub document: DocumentRef,
    /// Header version as an integer (`17` for 1.7); unchanged when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_version: Option<u16>,
    /// Write to this path instead of returning the bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

// ============================================================================
// Signatures
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetSignatureCount {
    pub document: DocumentRef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetSignatureObject {
    pub document: DocumentRef,
    pub index: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureGetContents {
    pub signature: SignatureRef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureGetByteRange {
    pub signature: SignatureRef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureGetSubFilter {
    pub signature: SignatureRef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureGetReason {
    pub signature: SignatureRef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureGetTime {
    pub signature: SignatureRef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureGetDocMdpPermission {
    pub signature: SignatureRef,
}

// ============================================================================
// Fonts
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetDefaultTtfMap {}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetDefaultSystemFontInfo {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetSystemFontInfo {
    pub font_info: FontInfoRef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FreeDefaultSystemFontInfo {
    pub font_info: FontInfoRef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddInstalledFont {
    pub font_info: FontInfoRef,
    pub face: String,
    pub charset: i32,
}

// ============================================================================
// Thumbnails and bitmaps
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetDecodedThumbnailData {
    pub page: PageRef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetRawThumbnailData {
    pub page: PageRef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetThumbnailAsBitmap {
    pub page: PageRef,
}

/// Pixel contents of a bitmap handle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetBitmap {
    pub bitmap: BitmapRef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestroyBitmap {
    pub bitmap: BitmapRef,
}

references! {
    OpenDocument {},
    CloseDocument { document },
    CreateNewDocument {},
    GetLastError {},
    SetSandboxPolicy {},
    LoadPage { document },
    ClosePage { page },
    GetPageCount { document },
    GetPageText { page },
    GetPageTextStructured { page },
    GetMetaData { document },
    GetMetaText { document },
    GetFileIdentifier { document },
    GetPageLabel { document },
    RenderPageInDpi { page },
    RenderPagesInDpi { pages },
    RenderPageInPixels { page },
    RenderPagesInPixels { pages },
    RenderToFile { target },
    GetPageSize { page },
    GetPageSizeInPixels { page },
    GetPageWidth { page },
    GetPageHeight { page },
    GetPageSizeByIndex { document },
    GetPageRotation { page },
    SetPageRotation { page },
    PageHasTransparency { page },
    GetFileVersion { document },
    GetDocPermissions { document },
    GetSecurityHandlerRevision { document },
    GetPageMode { document },
    IsTagged { document },
    GetBookmarks { document },
    BookmarkGetFirstChild { document, bookmark },
    BookmarkGetNextSibling { document, bookmark },
    BookmarkGetTitle { bookmark },
    BookmarkFind { document },
    BookmarkGetDest { document, bookmark },
    BookmarkGetAction { bookmark },
    ActionGetType { action },
    ActionGetDest { document, action },
    ActionGetFilePath { action },
    ActionGetUriPath { document, action },
    DestGetPageIndex { document, dest },
    DestGetView { dest },
    DestGetLocationInPage { dest },
    LinkGetLinkAtPoint { page },
    LinkEnumerate { page },
    LinkGetDest { document, link },
    LinkGetAction { link },
    LinkGetAnnotRect { link },
    LinkCountQuadPoints { link },
    LinkGetQuadPoints { link },
    LinkGetLinkZOrderAtPoint { page },
    LinkGetAnnot { page, link },
    GetPageAAction { page },
    ImportPages { source, destination },
    ImportPagesByIndex { source, destination },
    ImportNPagesToOne { source },
    CopyViewerPreferences { source, destination },
    NewXObjectFromPage { source, destination },
    NewFormObjectFromXObject { xobject },
    CloseXObject { xobject },
    FlattenPage { page },
    SaveAsCopy { document },
    GetSignatureCount { document },
    GetSignatureObject { document },
    SignatureGetContents { signature },
    SignatureGetByteRange { signature },
    SignatureGetSubFilter { signature },
    SignatureGetReason { signature },
    SignatureGetTime { signature },
    SignatureGetDocMdpPermission { signature },
    GetDefaultTtfMap {},
    GetDefaultSystemFontInfo {},
    SetSystemFontInfo { font_info },
    FreeDefaultSystemFontInfo { font_info },
    AddInstalledFont { font_info },
    GetDecodedThumbnailData { page },
    GetRawThumbnailData { page },
    GetThumbnailAsBitmap { page },
    GetBitmap { bitmap },
    DestroyBitmap { bitmap },
}

impl CollectReferences for RenderTarget {
    fn collect_references(&self, out: &mut Vec<Reference>) {
        match self {
            RenderTarget::Dpi(pages) => pages.collect_references(out),
            RenderTarget::Pixels(pages) => pages.collect_references(out),
        }
    }
}
