//! Signature fields, font tables and detection of features the engine
//! loads but cannot honor.

use std::collections::HashSet;

use docgate_protocol::responses::CharsetFontMapping;
use docgate_protocol::EngineError;
use lopdf::{Dictionary, Document, Object};

use super::objects::{catalog, entry, entry_array, entry_dict, entry_name, entry_text, resolve};
use super::pages::page_ids;
use crate::local::UnsupportedFeature;

const MAX_FIELD_DEPTH: usize = 32;

// ============================================================================
// Unsupported features
// ============================================================================

/// Features present in `doc` that the engine will not act on, each
/// reported once in detection order.
pub(crate) fn unsupported_features(doc: &Document, foreign_security: bool) -> Vec<UnsupportedFeature> {
    let mut found = Vec::new();
    let mut report = |feature: UnsupportedFeature| {
        if !found.contains(&feature) {
            found.push(feature);
        }
    };

    if let Ok(root) = catalog(doc) {
        if entry_dict(doc, root, b"AcroForm").is_some_and(|form| form.has(b"XFA")) {
            report(UnsupportedFeature::XfaForm);
        }
        if root.has(b"Collection") {
            report(UnsupportedFeature::PortableCollection);
        }
        if entry_dict(doc, root, b"Names").is_some_and(|names| names.has(b"EmbeddedFiles")) {
            report(UnsupportedFeature::Attachment);
        }
    }
    if foreign_security {
        report(UnsupportedFeature::Security);
    }

    for page in page_ids(doc) {
        let Some(annots) = doc
            .get_dictionary(page)
            .ok()
            .and_then(|dict| entry_array(doc, dict, b"Annots"))
        else {
            continue;
        };
        for annot in annots {
            let Some(Object::Dictionary(annot)) = resolve(doc, annot) else {
                continue;
            };
            let feature = match entry_name(doc, annot, b"Subtype") {
                Some(b"3D") => UnsupportedFeature::Annotation3d,
                Some(b"Movie") => UnsupportedFeature::MovieAnnotation,
                Some(b"Sound") => UnsupportedFeature::SoundAnnotation,
                Some(b"Screen") => UnsupportedFeature::ScreenMedia,
                Some(b"RichMedia") => UnsupportedFeature::RichMedia,
                Some(b"FileAttachment") => UnsupportedFeature::FileAttachmentAnnotation,
                _ => continue,
            };
            report(feature);
        }
    }
    found
}

// ============================================================================
// Signatures
// ============================================================================

/// Signature value dictionaries of signed `Sig` fields, in field order.
pub(crate) fn signatures(doc: &Document) -> Vec<Dictionary> {
    let mut out = Vec::new();
    let Some(fields) = catalog(doc)
        .ok()
        .and_then(|root| entry_dict(doc, root, b"AcroForm"))
        .and_then(|form| entry_array(doc, form, b"Fields"))
    else {
        return out;
    };
    let mut visited = HashSet::new();
    for field in fields {
        collect_signatures(doc, field, false, &mut visited, &mut out, 0);
    }
    out
}

fn collect_signatures(
    doc: &Document,
    field: &Object,
    inherited_sig: bool,
    visited: &mut HashSet<lopdf::ObjectId>,
    out: &mut Vec<Dictionary>,
    depth: usize,
) {
    if depth > MAX_FIELD_DEPTH {
        return;
    }
    if let Object::Reference(id) = field {
        if !visited.insert(*id) {
            return;
        }
    }
    let Some(Object::Dictionary(dict)) = resolve(doc, field) else {
        return;
    };
    let is_sig = match entry_name(doc, dict, b"FT") {
        Some(ft) => ft == b"Sig",
        None => inherited_sig,
    };
    if is_sig {
        if let Some(Object::Dictionary(value)) = entry(doc, dict, b"V") {
            out.push(value.clone());
        }
    }
    if let Some(kids) = entry_array(doc, dict, b"Kids") {
        for kid in kids {
            collect_signatures(doc, kid, is_sig, visited, out, depth + 1);
        }
    }
}

pub(crate) fn signature_contents(doc: &Document, value: &Dictionary) -> Vec<u8> {
    match entry(doc, value, b"Contents") {
        Some(Object::String(bytes, _)) => bytes.clone(),
        _ => Vec::new(),
    }
}

pub(crate) fn signature_byte_range(doc: &Document, value: &Dictionary) -> Vec<i64> {
    entry_array(doc, value, b"ByteRange")
        .map(|range| {
            range
                .iter()
                .filter_map(|o| resolve(doc, o).and_then(|o| o.as_i64().ok()))
                .collect()
        })
        .unwrap_or_default()
}

pub(crate) fn signature_sub_filter(doc: &Document, value: &Dictionary) -> Option<String> {
    entry_name(doc, value, b"SubFilter").map(|n| String::from_utf8_lossy(n).into_owned())
}

pub(crate) fn signature_reason(doc: &Document, value: &Dictionary) -> Option<String> {
    entry_text(doc, value, b"Reason")
}

pub(crate) fn signature_time(doc: &Document, value: &Dictionary) -> Option<String> {
    match entry(doc, value, b"M") {
        Some(Object::String(bytes, _)) => Some(String::from_utf8_lossy(bytes).into_owned()),
        _ => None,
    }
}

/// `P` of the DocMDP transform params: 2 when the transform omits it, 0
/// when the signature carries no DocMDP reference at all.
pub(crate) fn signature_docmdp_permission(doc: &Document, value: &Dictionary) -> u32 {
    let Some(references) = entry_array(doc, value, b"Reference") else {
        return 0;
    };
    references
        .iter()
        .filter_map(|r| match resolve(doc, r) {
            Some(Object::Dictionary(d)) => Some(d),
            _ => None,
        })
        .find(|r| entry_name(doc, r, b"TransformMethod") == Some(b"DocMDP".as_slice()))
        .map(|r| {
            entry_dict(doc, r, b"TransformParams")
                .and_then(|params| entry(doc, params, b"P"))
                .and_then(|p| p.as_i64().ok())
                .and_then(|p| u32::try_from(p).ok())
                .unwrap_or(2)
        })
        .unwrap_or(0)
}

// ============================================================================
// Fonts
// ============================================================================

pub(crate) const CHARSET_ANSI: i32 = 0;
pub(crate) const CHARSET_SHIFTJIS: i32 = 128;
pub(crate) const CHARSET_HANGUL: i32 = 129;
pub(crate) const CHARSET_GB2312: i32 = 134;
pub(crate) const CHARSET_CHINESEBIG5: i32 = 136;
pub(crate) const CHARSET_ARABIC: i32 = 178;
pub(crate) const CHARSET_RUSSIAN: i32 = 204;
pub(crate) const CHARSET_EASTERNEUROPEAN: i32 = 238;

/// Charset to TrueType face used when a document font is not embedded.
pub(crate) fn default_ttf_map() -> Vec<CharsetFontMapping> {
    [
        (CHARSET_ANSI, "Arial"),
        (CHARSET_GB2312, "SimSun"),
        (CHARSET_CHINESEBIG5, "MingLiU"),
        (CHARSET_SHIFTJIS, "MS Gothic"),
        (CHARSET_HANGUL, "Batang"),
        (CHARSET_RUSSIAN, "Arial"),
        (CHARSET_EASTERNEUROPEAN, "Tahoma"),
        (CHARSET_ARABIC, "Arial"),
    ]
    .into_iter()
    .map(|(charset, font_name)| CharsetFontMapping {
        charset,
        font_name: font_name.to_string(),
    })
    .collect()
}

/// Installed faces registered on a font-info handle.
#[derive(Debug, Default, Clone)]
pub(crate) struct FontInfo {
    pub faces: Vec<(String, i32)>,
}

impl FontInfo {
    pub fn add(&mut self, face: &str, charset: i32) -> Result<(), EngineError> {
        if face.trim().is_empty() {
            return Err(EngineError::invalid_argument("font face name is empty"));
        }
        if !self.faces.iter().any(|(f, c)| f == face && *c == charset) {
            self.faces.push((face.to_string(), charset));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::dictionary;

    fn doc_with_fields(fields: Vec<Object>) -> Document {
        let mut doc = Document::with_version("1.7");
        let form = dictionary! { "Fields" => fields };
        let root = doc.add_object(dictionary! { "Type" => "Catalog", "AcroForm" => form });
        doc.trailer.set("Root", root);
        doc
    }

    #[test]
    fn test_signatures_skip_unsigned_fields() {
        let mut doc = doc_with_fields(Vec::new());
        let signed = doc.add_object(dictionary! {
            "FT" => "Sig",
            "V" => dictionary! {
                "SubFilter" => "adbe.pkcs7.detached",
                "Reason" => Object::string_literal("Approved"),
                "M" => Object::string_literal("D:20240101120000Z"),
                "ByteRange" => vec![0.into(), 10.into(), 20.into(), 30.into()],
            },
        });
        let unsigned = doc.add_object(dictionary! { "FT" => "Sig" });
        let text = doc.add_object(dictionary! { "FT" => "Tx", "V" => Object::string_literal("x") });
        let root = doc.trailer.get(b"Root").unwrap().as_reference().unwrap();
        doc.get_object_mut(root)
            .unwrap()
            .as_dict_mut()
            .unwrap()
            .set(
                "AcroForm",
                dictionary! { "Fields" => vec![signed.into(), unsigned.into(), text.into()] },
            );

        let found = signatures(&doc);
        assert_eq!(found.len(), 1);
        let value = &found[0];
        assert_eq!(signature_sub_filter(&doc, value).as_deref(), Some("adbe.pkcs7.detached"));
        assert_eq!(signature_reason(&doc, value).as_deref(), Some("Approved"));
        assert_eq!(signature_time(&doc, value).as_deref(), Some("D:20240101120000Z"));
        assert_eq!(signature_byte_range(&doc, value), vec![0, 10, 20, 30]);
        assert_eq!(signature_docmdp_permission(&doc, value), 0);
    }

    #[test]
    fn test_docmdp_defaults_to_two() {
        let doc = doc_with_fields(Vec::new());
        let value = dictionary! {
            "Reference" => vec![Object::Dictionary(dictionary! { "TransformMethod" => "DocMDP" })],
        };
        assert_eq!(signature_docmdp_permission(&doc, &value), 2);

        let value = dictionary! {
            "Reference" => vec![Object::Dictionary(dictionary! {
                "TransformMethod" => "DocMDP",
                "TransformParams" => dictionary! { "P" => 1 },
            })],
        };
        assert_eq!(signature_docmdp_permission(&doc, &value), 1);
    }

    #[test]
    fn test_unsupported_features_reported_once() {
        let mut doc = Document::with_version("1.7");
        let names = dictionary! { "EmbeddedFiles" => dictionary! {} };
        let form = dictionary! { "XFA" => Object::Null, "Fields" => Vec::<Object>::new() };
        let root = doc.add_object(dictionary! {
            "Type" => "Catalog", "Names" => names, "AcroForm" => form,
        });
        doc.trailer.set("Root", root);

        let found = unsupported_features(&doc, true);
        assert_eq!(
            found,
            vec![
                UnsupportedFeature::XfaForm,
                UnsupportedFeature::Attachment,
                UnsupportedFeature::Security,
            ]
        );
    }

    #[test]
    fn test_default_ttf_map_starts_with_ansi() {
        let map = default_ttf_map();
        assert_eq!(map[0].charset, CHARSET_ANSI);
        assert!(map.iter().any(|m| m.charset == CHARSET_SHIFTJIS && m.font_name == "MS Gothic"));
    }

    #[test]
    fn test_font_info_rejects_empty_face() {
        let mut info = FontInfo::default();
        assert!(info.add(" ", CHARSET_ANSI).is_err());
        info.add("Noto Sans", CHARSET_ANSI).unwrap();
        info.add("Noto Sans", CHARSET_ANSI).unwrap();
        assert_eq!(info.faces.len(), 1);
    }
}
