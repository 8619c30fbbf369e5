//! Outlines, actions, destinations and link annotations.

use std::collections::HashSet;

use docgate_protocol::requests::PageActionEvent;
use docgate_protocol::responses::{
    ActionKind, Bookmark, DestGetLocationInPage, DestView, QuadPoints, Rect,
};
use docgate_protocol::EngineError;
use lopdf::{Dictionary, Document, Object, ObjectId};

use super::objects::{
    catalog, entry, entry_array, entry_dict, entry_name, entry_text, lookup_name_tree, number,
    rect, resolve,
};
use super::pages::page_index;

const MAX_OUTLINE_ITEMS: usize = 100_000;

// ============================================================================
// Outline
// ============================================================================

fn outline_link(doc: &Document, dict: &Dictionary, key: &[u8]) -> Option<ObjectId> {
    dict.get(key).and_then(Object::as_reference).ok().filter(|id| doc.get_dictionary(*id).is_ok())
}

/// First child of `parent`, or the first top-level item when `parent` is unset.
pub(crate) fn first_child(doc: &Document, parent: Option<ObjectId>) -> Option<ObjectId> {
    let node = match parent {
        Some(id) => doc.get_dictionary(id).ok()?,
        None => entry_dict(doc, catalog(doc).ok()?, b"Outlines")?,
    };
    outline_link(doc, node, b"First")
}

pub(crate) fn next_sibling(doc: &Document, item: ObjectId) -> Option<ObjectId> {
    outline_link(doc, doc.get_dictionary(item).ok()?, b"Next")
}

pub(crate) fn title(doc: &Document, item: ObjectId) -> Result<String, EngineError> {
    let dict = doc
        .get_dictionary(item)
        .map_err(|_| EngineError::not_found("bookmark"))?;
    Ok(entry_text(doc, dict, b"Title").unwrap_or_default())
}

/// Depth-first search for the first item whose title equals `wanted`.
pub(crate) fn find(doc: &Document, wanted: &str) -> Option<ObjectId> {
    let mut visited = HashSet::new();
    let mut stack: Vec<ObjectId> = first_child(doc, None).into_iter().collect();
    while let Some(item) = stack.pop() {
        if !visited.insert(item) || visited.len() > MAX_OUTLINE_ITEMS {
            continue;
        }
        if title(doc, item).is_ok_and(|t| t == wanted) {
            return Some(item);
        }
        // Sibling below child so children are searched first.
        if let Some(next) = next_sibling(doc, item) {
            stack.push(next);
        }
        if let Some(child) = first_child(doc, Some(item)) {
            stack.push(child);
        }
    }
    None
}

/// The whole outline as a tree.
pub(crate) fn bookmarks(doc: &Document) -> Vec<Bookmark> {
    let mut visited = HashSet::new();
    siblings(doc, first_child(doc, None), &mut visited)
}

fn siblings(doc: &Document, mut next: Option<ObjectId>, visited: &mut HashSet<ObjectId>) -> Vec<Bookmark> {
    let mut out = Vec::new();
    while let Some(item) = next {
        if !visited.insert(item) || visited.len() > MAX_OUTLINE_ITEMS {
            break;
        }
        let page_index = bookmark_dest(doc, item)
            .or_else(|| bookmark_action(doc, item).and_then(|a| action_dest(doc, &a)))
            .and_then(|dest| dest_page_index(doc, &dest));
        out.push(Bookmark {
            title: title(doc, item).unwrap_or_default(),
            page_index,
            children: siblings(doc, first_child(doc, Some(item)), visited),
        });
        next = next_sibling(doc, item);
    }
    out
}

pub(crate) fn bookmark_dest(doc: &Document, item: ObjectId) -> Option<Vec<Object>> {
    let dict = doc.get_dictionary(item).ok()?;
    resolve_dest(doc, entry(doc, dict, b"Dest")?)
}

pub(crate) fn bookmark_action(doc: &Document, item: ObjectId) -> Option<Dictionary> {
    let dict = doc.get_dictionary(item).ok()?;
    entry_dict(doc, dict, b"A").cloned()
}

// ============================================================================
// Destinations
// ============================================================================

/// Resolves an explicit array, a `D` dictionary or a named destination.
pub(crate) fn resolve_dest(doc: &Document, dest: &Object) -> Option<Vec<Object>> {
    match resolve(doc, dest)? {
        Object::Array(array) => Some(array.clone()),
        Object::Dictionary(dict) => match entry(doc, dict, b"D")? {
            Object::Array(array) => Some(array.clone()),
            _ => None,
        },
        Object::Name(name) => {
            let dests = entry_dict(doc, catalog(doc).ok()?, b"Dests")?;
            resolve_dest(doc, entry(doc, dests, name)?)
        }
        Object::String(name, _) => {
            let names = entry_dict(doc, catalog(doc).ok()?, b"Names")?;
            let tree = entry_dict(doc, names, b"Dests")?;
            let target = lookup_name_tree(doc, tree, name)?;
            // Guard against a name resolving to another name.
            match target {
                Object::String(..) | Object::Name(_) => None,
                other => resolve_dest(doc, other),
            }
        }
        _ => None,
    }
}

/// Page reference resolves against this document's page tree; a bare
/// integer (remote destinations) is taken as the index.
pub(crate) fn dest_page_index(doc: &Document, dest: &[Object]) -> Option<u32> {
    match dest.first()? {
        Object::Reference(id) => page_index(doc, *id),
        Object::Integer(index) => u32::try_from(*index).ok(),
        _ => None,
    }
}

pub(crate) fn dest_view(doc: &Document, dest: &[Object]) -> (DestView, Vec<f64>) {
    let view = match dest.get(1).and_then(|o| resolve(doc, o)) {
        Some(Object::Name(name)) => match name.as_slice() {
            b"XYZ" => DestView::Xyz,
            b"Fit" => DestView::Fit,
            b"FitH" => DestView::FitH,
            b"FitV" => DestView::FitV,
            b"FitR" => DestView::FitR,
            b"FitB" => DestView::FitB,
            b"FitBH" => DestView::FitBH,
            b"FitBV" => DestView::FitBV,
            _ => DestView::Unknown,
        },
        _ => DestView::Unknown,
    };
    let params = dest
        .iter()
        .skip(2)
        .map(|o| resolve(doc, o).and_then(number).unwrap_or(0.0))
        .collect();
    (view, params)
}

/// Only `XYZ` destinations carry a location; `null` entries stay unset.
pub(crate) fn dest_location(doc: &Document, dest: &[Object]) -> DestGetLocationInPage {
    let (view, _) = dest_view(doc, dest);
    let param = |i: usize| dest.get(i).and_then(|o| resolve(doc, o)).and_then(number);
    if view != DestView::Xyz {
        return DestGetLocationInPage {
            x: None,
            y: None,
            zoom: None,
        };
    }
    DestGetLocationInPage {
        x: param(2),
        y: param(3),
        zoom: param(4),
    }
}

// ============================================================================
// Actions
// ============================================================================

pub(crate) fn action_kind(doc: &Document, action: &Dictionary) -> ActionKind {
    match entry_name(doc, action, b"S") {
        Some(b"GoTo") => ActionKind::GoTo,
        Some(b"GoToR") => ActionKind::RemoteGoTo,
        Some(b"GoToE") => ActionKind::EmbeddedGoTo,
        Some(b"URI") => ActionKind::Uri,
        Some(b"Launch") => ActionKind::Launch,
        _ => ActionKind::Unsupported,
    }
}

pub(crate) fn action_dest(doc: &Document, action: &Dictionary) -> Option<Vec<Object>> {
    match action_kind(doc, action) {
        ActionKind::GoTo | ActionKind::RemoteGoTo | ActionKind::EmbeddedGoTo => {
            resolve_dest(doc, entry(doc, action, b"D")?)
        }
        _ => None,
    }
}

pub(crate) fn action_file_path(doc: &Document, action: &Dictionary) -> Option<String> {
    if !matches!(
        action_kind(doc, action),
        ActionKind::Launch | ActionKind::RemoteGoTo | ActionKind::EmbeddedGoTo
    ) {
        return None;
    }
    match entry(doc, action, b"F")? {
        Object::String(bytes, _) => Some(super::objects::decode_text(bytes)),
        Object::Dictionary(spec) => {
            entry_text(doc, spec, b"UF").or_else(|| entry_text(doc, spec, b"F"))
        }
        _ => None,
    }
}

/// URI of a `URI` action, prefixed with the document's base URI when relative.
pub(crate) fn action_uri(doc: &Document, action: &Dictionary) -> Option<String> {
    if action_kind(doc, action) != ActionKind::Uri {
        return None;
    }
    let uri = match entry(doc, action, b"URI")? {
        Object::String(bytes, _) => String::from_utf8_lossy(bytes).into_owned(),
        _ => return None,
    };
    if uri.contains(':') {
        return Some(uri);
    }
    let base = catalog(doc)
        .ok()
        .and_then(|c| entry_dict(doc, c, b"URI"))
        .and_then(|u| entry_text(doc, u, b"Base"));
    Some(match base {
        Some(base) => format!("{}{}", base, uri),
        None => uri,
    })
}

pub(crate) fn page_action(doc: &Document, page: ObjectId, event: PageActionEvent) -> Option<Dictionary> {
    let dict = doc.get_dictionary(page).ok()?;
    let actions = entry_dict(doc, dict, b"AA")?;
    let key: &[u8] = match event {
        PageActionEvent::Open => b"O",
        PageActionEvent::Close => b"C",
    };
    entry_dict(doc, actions, key).cloned()
}

// ============================================================================
// Links
// ============================================================================

/// Link annotations of a page in drawing order.
pub(crate) fn page_links(doc: &Document, page: ObjectId) -> Vec<Dictionary> {
    let Ok(dict) = doc.get_dictionary(page) else {
        return Vec::new();
    };
    let Some(annots) = entry_array(doc, dict, b"Annots") else {
        return Vec::new();
    };
    annots
        .iter()
        .filter_map(|annot| match resolve(doc, annot)? {
            Object::Dictionary(d) if entry_name(doc, d, b"Subtype") == Some(b"Link".as_slice()) => {
                Some(d.clone())
            }
            _ => None,
        })
        .collect()
}

/// Topmost link whose rectangle contains the point.
pub(crate) fn link_at_point(doc: &Document, page: ObjectId, x: f64, y: f64) -> Option<Dictionary> {
    let z_order = link_z_order_at_point(doc, page, x, y)?;
    page_links(doc, page).into_iter().nth(z_order as usize)
}

/// Index into [`page_links`] of the topmost link containing the point.
pub(crate) fn link_z_order_at_point(doc: &Document, page: ObjectId, x: f64, y: f64) -> Option<u32> {
    let links = page_links(doc, page);
    let index = links.iter().rposition(|link| {
        link_rect(doc, link)
            .is_some_and(|r| x >= r.left && x <= r.right && y >= r.bottom && y <= r.top)
    })?;
    u32::try_from(index).ok()
}

/// Complete quadrilaterals of `QuadPoints`; a trailing partial group is ignored.
pub(crate) fn link_quad_points(doc: &Document, link: &Dictionary) -> Vec<QuadPoints> {
    let Some(values) = entry_array(doc, link, b"QuadPoints") else {
        return Vec::new();
    };
    let numbers: Option<Vec<f64>> = values
        .iter()
        .map(|value| resolve(doc, value).and_then(number))
        .collect();
    numbers
        .unwrap_or_default()
        .chunks_exact(8)
        .map(|q| QuadPoints {
            x1: q[0],
            y1: q[1],
            x2: q[2],
            y2: q[3],
            x3: q[4],
            y3: q[5],
            x4: q[6],
            y4: q[7],
        })
        .collect()
}

pub(crate) fn link_rect(doc: &Document, link: &Dictionary) -> Option<Rect> {
    rect(doc, entry(doc, link, b"Rect")?)
}

pub(crate) fn link_dest(doc: &Document, link: &Dictionary) -> Option<Vec<Object>> {
    match entry(doc, link, b"Dest") {
        Some(dest) => resolve_dest(doc, dest),
        None => action_dest(doc, entry_dict(doc, link, b"A")?),
    }
}

pub(crate) fn link_action(doc: &Document, link: &Dictionary) -> Option<Dictionary> {
    entry_dict(doc, link, b"A").cloned()
}
