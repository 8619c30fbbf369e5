//! Page tree: lookup, geometry, labels, thumbnails and page import.

use std::collections::HashMap;

use docgate_protocol::requests::PageRotation;
use docgate_protocol::responses::{BitmapFormat, PageSize};
use docgate_protocol::EngineError;
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};

use super::objects::{
    catalog, catalog_id, entry, entry_dict, entry_name, inherited, lopdf_error, number,
    number_tree, rect, resolve,
};

pub(crate) fn page_ids(doc: &Document) -> Vec<ObjectId> {
    doc.get_pages().into_values().collect()
}

pub(crate) fn page_id(doc: &Document, index: u32) -> Result<ObjectId, EngineError> {
    doc.get_pages().get(&(index + 1)).copied().ok_or_else(|| {
        EngineError::page(format!(
            "page index {} out of range (document has {} pages)",
            index,
            doc.get_pages().len()
        ))
    })
}

pub(crate) fn page_index(doc: &Document, id: ObjectId) -> Option<u32> {
    doc.get_pages()
        .into_iter()
        .find_map(|(number, page)| (page == id).then_some(number - 1))
}

pub(crate) fn rotation(doc: &Document, page: ObjectId) -> PageRotation {
    inherited(doc, page, b"Rotate")
        .and_then(|o| o.as_i64().ok())
        .map(PageRotation::from_degrees)
        .unwrap_or_default()
}

/// Visible size: crop box (or media box) with rotation applied.
pub(crate) fn size(doc: &Document, page: ObjectId) -> Result<PageSize, EngineError> {
    let bounds = inherited(doc, page, b"CropBox")
        .and_then(|o| rect(doc, o))
        .or_else(|| inherited(doc, page, b"MediaBox").and_then(|o| rect(doc, o)))
        .ok_or_else(|| EngineError::page("page has no media box"))?;
    let (width, height) = (bounds.right - bounds.left, bounds.top - bounds.bottom);
    Ok(match rotation(doc, page) {
        PageRotation::Quarter | PageRotation::ThreeQuarters => PageSize {
            width: height,
            height: width,
        },
        _ => PageSize { width, height },
    })
}

pub(crate) fn set_rotation(
    doc: &mut Document,
    page: ObjectId,
    rotation: PageRotation,
) -> Result<(), EngineError> {
    let dict = doc
        .get_object_mut(page)
        .and_then(Object::as_dict_mut)
        .map_err(lopdf_error)?;
    dict.set("Rotate", Object::Integer(rotation.degrees()));
    Ok(())
}

/// Transparency group on the page, or a graphics state / image that blends.
pub(crate) fn has_transparency(doc: &Document, page: ObjectId) -> bool {
    let Ok(dict) = doc.get_dictionary(page) else {
        return false;
    };
    if let Some(group) = entry_dict(doc, dict, b"Group") {
        if entry_name(doc, group, b"S") == Some(b"Transparency".as_slice()) {
            return true;
        }
    }
    let Some(Object::Dictionary(resources)) = inherited(doc, page, b"Resources") else {
        return false;
    };
    let blending_state = entry_dict(doc, resources, b"ExtGState").is_some_and(|states| {
        states.iter().any(|(_, state)| match resolve(doc, state) {
            Some(Object::Dictionary(gs)) => {
                let alpha = |key: &[u8]| entry(doc, gs, key).and_then(number).unwrap_or(1.0);
                alpha(b"CA") < 1.0
                    || alpha(b"ca") < 1.0
                    || entry(doc, gs, b"SMask").is_some_and(|m| !matches!(m, Object::Name(n) if n == b"None"))
                    || entry_name(doc, gs, b"BM")
                        .is_some_and(|bm| bm != b"Normal" && bm != b"Compatible")
            }
            _ => false,
        })
    });
    let masked_image = entry_dict(doc, resources, b"XObject").is_some_and(|xobjects| {
        xobjects.iter().any(|(_, xobject)| match resolve(doc, xobject) {
            Some(Object::Stream(s)) => s.dict.has(b"SMask"),
            _ => false,
        })
    });
    blending_state || masked_image
}

pub(crate) fn text(doc: &Document, index: u32) -> Result<String, EngineError> {
    page_id(doc, index)?;
    doc.extract_text(&[index + 1]).map_err(lopdf_error)
}

// ============================================================================
// Page labels
// ============================================================================

pub(crate) fn label(doc: &Document, index: u32) -> Result<Option<String>, EngineError> {
    page_id(doc, index)?;
    let Some(labels) = entry_dict(doc, catalog(doc)?, b"PageLabels") else {
        return Ok(None);
    };
    let ranges = number_tree(doc, labels);
    let Some((start, Object::Dictionary(style))) = ranges
        .into_iter()
        .filter(|(start, _)| *start <= i64::from(index))
        .last()
    else {
        return Ok(None);
    };

    let prefix = super::objects::entry_text(doc, style, b"P").unwrap_or_default();
    let first = entry(doc, style, b"St").and_then(|o| o.as_i64().ok()).unwrap_or(1);
    let value = first + (i64::from(index) - start);
    let numeric = match entry_name(doc, style, b"S") {
        Some(b"D") => value.to_string(),
        Some(b"R") => roman(value),
        Some(b"r") => roman(value).to_lowercase(),
        Some(b"A") => letters(value),
        Some(b"a") => letters(value).to_lowercase(),
        _ => String::new(),
    };
    Ok(Some(format!("{}{}", prefix, numeric)))
}

fn roman(mut value: i64) -> String {
    const NUMERALS: [(i64, &str); 13] = [
        (1000, "M"),
        (900, "CM"),
        (500, "D"),
        (400, "CD"),
        (100, "C"),
        (90, "XC"),
        (50, "L"),
        (40, "XL"),
        (10, "X"),
        (9, "IX"),
        (5, "V"),
        (4, "IV"),
        (1, "I"),
    ];
    let mut out = String::new();
    for (amount, numeral) in NUMERALS {
        while value >= amount {
            out.push_str(numeral);
            value -= amount;
        }
    }
    out
}

/// A..Z, then AA..ZZ, then AAA..ZZZ.
fn letters(value: i64) -> String {
    if value < 1 {
        return String::new();
    }
    let letter = char::from(b'A' + ((value - 1) % 26) as u8);
    let repeat = ((value - 1) / 26 + 1) as usize;
    std::iter::repeat(letter).take(repeat).collect()
}

// ============================================================================
// Thumbnails
// ============================================================================

pub(crate) struct Bitmap {
    pub width: u32,
    pub height: u32,
    pub format: BitmapFormat,
    pub data: Vec<u8>,
}

pub(crate) fn thumbnail(doc: &Document, page: ObjectId) -> Option<&Stream> {
    let dict = doc.get_dictionary(page).ok()?;
    match entry(doc, dict, b"Thumb")? {
        Object::Stream(stream) => Some(stream),
        _ => None,
    }
}

pub(crate) fn decode_thumbnail(stream: &Stream) -> Result<Vec<u8>, EngineError> {
    if stream.dict.has(b"Filter") {
        stream.decompressed_content().map_err(lopdf_error)
    } else {
        Ok(stream.content.clone())
    }
}

pub(crate) fn thumbnail_bitmap(doc: &Document, page: ObjectId) -> Result<Option<Bitmap>, EngineError> {
    let Some(stream) = thumbnail(doc, page) else {
        return Ok(None);
    };
    let dimension = |key: &[u8]| {
        entry(doc, &stream.dict, key)
            .and_then(|o| o.as_i64().ok())
            .filter(|v| *v > 0)
            .map(|v| v as u32)
            .ok_or_else(|| EngineError::format("thumbnail is missing its dimensions"))
    };
    let (width, height) = (dimension(b"Width")?, dimension(b"Height")?);
    let bits = entry(doc, &stream.dict, b"BitsPerComponent")
        .and_then(|o| o.as_i64().ok())
        .unwrap_or(8);
    if bits != 8 {
        return Err(EngineError::unsupported(format!("{}-bit thumbnails", bits)));
    }
    let data = decode_thumbnail(stream)?;
    let (format, data) = match entry_name(doc, &stream.dict, b"ColorSpace") {
        Some(b"DeviceGray") => (BitmapFormat::Gray, data),
        Some(b"DeviceRGB") => {
            let mut bgr = data;
            for pixel in bgr.chunks_exact_mut(3) {
                pixel.swap(0, 2);
            }
            (BitmapFormat::Bgr, bgr)
        }
        _ => return Err(EngineError::unsupported("thumbnail color space")),
    };
    let channels = if format == BitmapFormat::Gray { 1 } else { 3 };
    if data.len() < width as usize * height as usize * channels {
        return Err(EngineError::format("thumbnail data is truncated"));
    }
    Ok(Some(Bitmap {
        width,
        height,
        format,
        data,
    }))
}

// ============================================================================
// Import
// ============================================================================

/// Parses one-based ranges like `1,3,5-7` into zero-based indices.
pub(crate) fn parse_page_range(range: &str, page_count: u32) -> Result<Vec<u32>, EngineError> {
    let invalid = || EngineError::invalid_argument(format!("invalid page range {:?}", range));
    let mut indices = Vec::new();
    for part in range.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (first, last) = match part.split_once('-') {
            Some((a, b)) => (
                a.trim().parse::<u32>().map_err(|_| invalid())?,
                b.trim().parse::<u32>().map_err(|_| invalid())?,
            ),
            None => {
                let n = part.parse::<u32>().map_err(|_| invalid())?;
                (n, n)
            }
        };
        if first == 0 || first > last || last > page_count {
            return Err(invalid());
        }
        indices.extend((first - 1)..last);
    }
    if indices.is_empty() {
        return Err(invalid());
    }
    Ok(indices)
}

/// Copies `indices` from `source` into `destination` before page `at`
/// (appends when `at` is past the end). Returns the number of pages copied.
pub(crate) fn import(
    source: &Document,
    destination: &mut Document,
    indices: &[u32],
    at: u32,
) -> Result<u32, EngineError> {
    let source_pages = page_ids(source);
    if let Some(bad) = indices.iter().find(|&&i| i as usize >= source_pages.len()) {
        return Err(EngineError::invalid_argument(format!(
            "page index {} out of range (source has {} pages)",
            bad,
            source_pages.len()
        )));
    }
    let (parent, position) = insertion_point(destination, at)?;

    let mut copier = ObjectCopier::new(source, destination);
    let mut imported = Vec::with_capacity(indices.len());
    for &index in indices {
        imported.push(copier.copy_page(source_pages[index as usize], parent)?);
    }

    let kids = destination
        .get_object_mut(parent)
        .and_then(Object::as_dict_mut)
        .and_then(|d| d.get_mut(b"Kids"))
        .and_then(Object::as_array_mut)
        .map_err(lopdf_error)?;
    for (offset, id) in imported.iter().enumerate() {
        kids.insert(position + offset, Object::Reference(*id));
    }

    let added = imported.len() as i64;
    let mut node = Some(parent);
    while let Some(id) = node {
        let dict = destination
            .get_object_mut(id)
            .and_then(Object::as_dict_mut)
            .map_err(lopdf_error)?;
        let count = dict.get(b"Count").and_then(Object::as_i64).unwrap_or(0);
        dict.set("Count", Object::Integer(count + added));
        node = dict.get(b"Parent").and_then(Object::as_reference).ok();
    }
    Ok(imported.len() as u32)
}

fn insertion_point(doc: &Document, at: u32) -> Result<(ObjectId, usize), EngineError> {
    let pages = page_ids(doc);
    let kids_of = |node: ObjectId| -> Result<&Vec<Object>, EngineError> {
        doc.get_dictionary(node)
            .and_then(|d| d.get(b"Kids"))
            .and_then(Object::as_array)
            .map_err(lopdf_error)
    };
    match pages.get(at as usize) {
        Some(&before) => {
            let parent = doc
                .get_dictionary(before)
                .and_then(|d| d.get(b"Parent"))
                .and_then(Object::as_reference)
                .map_err(lopdf_error)?;
            let position = kids_of(parent)?
                .iter()
                .position(|kid| kid.as_reference().ok() == Some(before))
                .ok_or_else(|| EngineError::format("page missing from its parent's kids"))?;
            Ok((parent, position))
        }
        None => {
            let root = catalog(doc)?
                .get(b"Pages")
                .and_then(Object::as_reference)
                .map_err(lopdf_error)?;
            Ok((root, kids_of(root)?.len()))
        }
    }
}

pub(crate) fn copy_viewer_preferences(
    source: &Document,
    destination: &mut Document,
) -> Result<bool, EngineError> {
    let Some(preferences) = entry_dict(source, catalog(source)?, b"ViewerPreferences") else {
        return Ok(false);
    };
    let mut copier = ObjectCopier::new(source, destination);
    let copied = copier.remap(Object::Dictionary(preferences.clone()))?;
    let root = catalog_id(destination)?;
    destination
        .get_object_mut(root)
        .and_then(Object::as_dict_mut)
        .map_err(lopdf_error)?
        .set("ViewerPreferences", copied);
    Ok(true)
}

/// Deep-copies objects between documents, allocating fresh ids and copying
/// each source object once. References back into the source page tree are
/// dropped so a page never drags its siblings along.
struct ObjectCopier<'a> {
    source: &'a Document,
    target: &'a mut Document,
    id_map: HashMap<ObjectId, ObjectId>,
}

impl<'a> ObjectCopier<'a> {
    fn new(source: &'a Document, target: &'a mut Document) -> Self {
        Self {
            source,
            target,
            id_map: HashMap::new(),
        }
    }

    fn copy_page(&mut self, page_id: ObjectId, parent: ObjectId) -> Result<ObjectId, EngineError> {
        let mut page = self
            .source
            .get_dictionary(page_id)
            .map_err(lopdf_error)?
            .clone();
        for key in [b"Resources".as_slice(), b"MediaBox", b"CropBox", b"Rotate"] {
            if !page.has(key) {
                if let Some(value) = inherited(self.source, page_id, key) {
                    page.set(key.to_vec(), value.clone());
                }
            }
        }
        page.remove(b"Parent");

        let new_id = self.target.new_object_id();
        self.id_map.insert(page_id, new_id);
        let mut copied = self.remap(Object::Dictionary(page))?;
        if let Object::Dictionary(dict) = &mut copied {
            dict.set("Parent", Object::Reference(parent));
        }
        self.target.objects.insert(new_id, copied);
        Ok(new_id)
    }

    fn copy_object(&mut self, source_id: ObjectId) -> Result<ObjectId, EngineError> {
        if let Some(target_id) = self.id_map.get(&source_id) {
            return Ok(*target_id);
        }
        // Reserve the id before recursing so cycles terminate.
        let new_id = self.target.new_object_id();
        self.id_map.insert(source_id, new_id);
        let object = self.source.get_object(source_id).map_err(lopdf_error)?.clone();
        let copied = self.remap(object)?;
        self.target.objects.insert(new_id, copied);
        Ok(new_id)
    }

    fn remap(&mut self, object: Object) -> Result<Object, EngineError> {
        match object {
            Object::Reference(id) => {
                if !self.id_map.contains_key(&id) && self.is_page_tree_node(id) {
                    return Ok(Object::Null);
                }
                Ok(Object::Reference(self.copy_object(id)?))
            }
            Object::Array(items) => Ok(Object::Array(
                items
                    .into_iter()
                    .map(|item| self.remap(item))
                    .collect::<Result<Vec<_>, _>>()?,
            )),
            Object::Dictionary(dict) => Ok(Object::Dictionary(self.remap_dict(dict)?)),
            Object::Stream(mut stream) => {
                stream.dict = self.remap_dict(stream.dict)?;
                Ok(Object::Stream(stream))
            }
            other => Ok(other),
        }
    }

    fn remap_dict(&mut self, mut dict: Dictionary) -> Result<Dictionary, EngineError> {
        for (_, value) in dict.iter_mut() {
            *value = self.remap(value.clone())?;
        }
        Ok(dict)
    }

    fn is_page_tree_node(&self, id: ObjectId) -> bool {
        self.source
            .get_dictionary(id)
            .ok()
            .and_then(|d| d.get(b"Type").ok())
            .and_then(|t| t.as_name().ok())
            .is_some_and(|t| t == b"Page" || t == b"Pages")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_page_range() {
        assert_eq!(parse_page_range("1,3,5-7", 8).unwrap(), vec![0, 2, 4, 5, 6]);
        assert_eq!(parse_page_range(" 2 - 3 ", 3).unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_parse_page_range_rejects_out_of_bounds() {
        assert!(parse_page_range("0", 3).is_err());
        assert!(parse_page_range("2-9", 3).is_err());
        assert!(parse_page_range("3-1", 3).is_err());
        assert!(parse_page_range("", 3).is_err());
        assert!(parse_page_range("a", 3).is_err());
    }

    #[test]
    fn test_roman_and_letters() {
        assert_eq!(roman(1994), "MCMXCIV");
        assert_eq!(roman(4), "IV");
        assert_eq!(letters(1), "A");
        assert_eq!(letters(26), "Z");
        assert_eq!(letters(27), "AA");
        assert_eq!(letters(53), "AAA");
    }
}
