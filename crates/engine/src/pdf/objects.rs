//! Small accessors over the lopdf object model.

use chrono::NaiveDateTime;
use docgate_protocol::responses::Rect;
use docgate_protocol::{EngineError, ErrorCode};
use lopdf::{Dictionary, Document, Object, ObjectId};

const MAX_REFERENCE_DEPTH: usize = 32;
const MAX_TREE_DEPTH: usize = 64;

pub(crate) fn lopdf_error(e: lopdf::Error) -> EngineError {
    EngineError::new(ErrorCode::Format, e.to_string())
}

/// Follows indirect references until a direct object is reached.
pub(crate) fn resolve<'a>(doc: &'a Document, object: &'a Object) -> Option<&'a Object> {
    let mut current = object;
    for _ in 0..MAX_REFERENCE_DEPTH {
        match current {
            Object::Reference(id) => current = doc.get_object(*id).ok()?,
            other => return Some(other),
        }
    }
    None
}

pub(crate) fn entry<'a>(doc: &'a Document, dict: &'a Dictionary, key: &[u8]) -> Option<&'a Object> {
    resolve(doc, dict.get(key).ok()?)
}

pub(crate) fn entry_dict<'a>(
    doc: &'a Document,
    dict: &'a Dictionary,
    key: &[u8],
) -> Option<&'a Dictionary> {
    match entry(doc, dict, key)? {
        Object::Dictionary(d) => Some(d),
        Object::Stream(s) => Some(&s.dict),
        _ => None,
    }
}

pub(crate) fn entry_array<'a>(
    doc: &'a Document,
    dict: &'a Dictionary,
    key: &[u8],
) -> Option<&'a Vec<Object>> {
    match entry(doc, dict, key)? {
        Object::Array(a) => Some(a),
        _ => None,
    }
}

pub(crate) fn entry_name<'a>(doc: &'a Document, dict: &'a Dictionary, key: &[u8]) -> Option<&'a [u8]> {
    match entry(doc, dict, key)? {
        Object::Name(n) => Some(n.as_slice()),
        _ => None,
    }
}

pub(crate) fn number(object: &Object) -> Option<f64> {
    match object {
        Object::Integer(i) => Some(*i as f64),
        Object::Real(r) => Some(f64::from(*r)),
        _ => None,
    }
}

/// Decodes a PDF text string: UTF-16BE with BOM, UTF-8 with BOM, else
/// PDFDocEncoding (treated as Latin-1).
pub(crate) fn decode_text(bytes: &[u8]) -> String {
    if let Some(rest) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        let units: Vec<u16> = rest
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        return String::from_utf16_lossy(&units);
    }
    if let Some(rest) = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]) {
        return String::from_utf8_lossy(rest).into_owned();
    }
    bytes.iter().map(|&b| char::from(b)).collect()
}

pub(crate) fn entry_text(doc: &Document, dict: &Dictionary, key: &[u8]) -> Option<String> {
    match entry(doc, dict, key)? {
        Object::String(bytes, _) => Some(decode_text(bytes)),
        Object::Name(name) => Some(String::from_utf8_lossy(name).into_owned()),
        _ => None,
    }
}

pub(crate) fn catalog_id(doc: &Document) -> Result<ObjectId, EngineError> {
    doc.trailer
        .get(b"Root")
        .and_then(Object::as_reference)
        .map_err(|_| EngineError::format("document has no catalog"))
}

pub(crate) fn catalog(doc: &Document) -> Result<&Dictionary, EngineError> {
    doc.get_dictionary(catalog_id(doc)?).map_err(lopdf_error)
}

pub(crate) fn info(doc: &Document) -> Option<&Dictionary> {
    match resolve(doc, doc.trailer.get(b"Info").ok()?)? {
        Object::Dictionary(d) => Some(d),
        _ => None,
    }
}

/// Looks up an inheritable page attribute, walking up the page tree.
pub(crate) fn inherited<'a>(doc: &'a Document, page_id: ObjectId, key: &[u8]) -> Option<&'a Object> {
    let mut node = doc.get_dictionary(page_id).ok()?;
    for _ in 0..MAX_TREE_DEPTH {
        if let Some(value) = entry(doc, node, key) {
            return Some(value);
        }
        let parent = node.get(b"Parent").ok()?.as_reference().ok()?;
        node = doc.get_dictionary(parent).ok()?;
    }
    None
}

pub(crate) fn rect(doc: &Document, object: &Object) -> Option<Rect> {
    let values = match resolve(doc, object)? {
        Object::Array(a) if a.len() == 4 => a
            .iter()
            .map(|o| resolve(doc, o).and_then(number))
            .collect::<Option<Vec<f64>>>()?,
        _ => return None,
    };
    Some(Rect {
        left: values[0].min(values[2]),
        bottom: values[1].min(values[3]),
        right: values[0].max(values[2]),
        top: values[1].max(values[3]),
    })
}

/// Walks a name tree (`Names`/`Kids`) for `key`.
pub(crate) fn lookup_name_tree<'a>(
    doc: &'a Document,
    node: &'a Dictionary,
    key: &[u8],
) -> Option<&'a Object> {
    lookup_name_tree_at(doc, node, key, 0)
}

fn lookup_name_tree_at<'a>(
    doc: &'a Document,
    node: &'a Dictionary,
    key: &[u8],
    depth: usize,
) -> Option<&'a Object> {
    if depth > MAX_TREE_DEPTH {
        return None;
    }
    if let Some(names) = entry_array(doc, node, b"Names") {
        for pair in names.chunks_exact(2) {
            if let Some(Object::String(name, _)) = resolve(doc, &pair[0]) {
                if name.as_slice() == key {
                    return resolve(doc, &pair[1]);
                }
            }
        }
    }
    entry_array(doc, node, b"Kids")?.iter().find_map(|kid| match resolve(doc, kid)? {
        Object::Dictionary(child) => lookup_name_tree_at(doc, child, key, depth + 1),
        _ => None,
    })
}

/// Flattens a number tree (`Nums`/`Kids`) into sorted (key, value) pairs.
pub(crate) fn number_tree<'a>(doc: &'a Document, node: &'a Dictionary) -> Vec<(i64, &'a Object)> {
    let mut out = Vec::new();
    collect_number_tree(doc, node, &mut out, 0);
    out.sort_by_key(|(key, _)| *key);
    out
}

fn collect_number_tree<'a>(
    doc: &'a Document,
    node: &'a Dictionary,
    out: &mut Vec<(i64, &'a Object)>,
    depth: usize,
) {
    if depth > MAX_TREE_DEPTH {
        return;
    }
    if let Some(nums) = entry_array(doc, node, b"Nums") {
        for pair in nums.chunks_exact(2) {
            if let (Some(Object::Integer(key)), Some(value)) =
                (resolve(doc, &pair[0]), resolve(doc, &pair[1]))
            {
                out.push((*key, value));
            }
        }
    }
    if let Some(kids) = entry_array(doc, node, b"Kids") {
        for kid in kids {
            if let Some(Object::Dictionary(child)) = resolve(doc, kid) {
                collect_number_tree(doc, child, out, depth + 1);
            }
        }
    }
}

/// `D:YYYYMMDDHHmmSS`
pub(crate) fn pdf_date(time: NaiveDateTime) -> String {
    time.format("D:%Y%m%d%H%M%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::dictionary;

    #[test]
    fn test_decode_text_utf16() {
        let bytes = [0xFE, 0xFF, 0x00, b'H', 0x00, b'i'];
        assert_eq!(decode_text(&bytes), "Hi");
    }

    #[test]
    fn test_decode_text_latin1() {
        assert_eq!(decode_text(b"caf\xe9"), "café");
    }

    #[test]
    fn test_rect_normalizes_corners() {
        let doc = Document::with_version("1.7");
        let object = Object::Array(vec![
            Object::Integer(300),
            Object::Integer(740),
            Object::Integer(72),
            Object::Real(700.0),
        ]);
        let r = rect(&doc, &object).unwrap();
        assert_eq!((r.left, r.bottom, r.right, r.top), (72.0, 700.0, 300.0, 740.0));
    }

    #[test]
    fn test_name_tree_lookup_through_kids() {
        let mut doc = Document::with_version("1.7");
        let leaf = doc.add_object(dictionary! {
            "Names" => vec![Object::string_literal("intro"), Object::Integer(7)],
        });
        let root = dictionary! { "Kids" => vec![Object::Reference(leaf)] };
        let found = lookup_name_tree(&doc, &root, b"intro");
        assert_eq!(found.and_then(|o| o.as_i64().ok()), Some(7));
        assert!(lookup_name_tree(&doc, &root, b"missing").is_none());
    }

    #[test]
    fn test_pdf_date_format() {
        let time = chrono::NaiveDate::from_ymd_opt(2024, 3, 9)
            .unwrap()
            .and_hms_opt(8, 5, 1)
            .unwrap();
        assert_eq!(pdf_date(time), "D:20240309080501");
    }
}
