//! Small, deterministic PDF documents for tests and smoke checks.
//!
//! Every page shows `Page N` in Helvetica on a US Letter media box. Optional
//! features are switched on through the builder.

use lopdf::content::{Content, Operation};
use lopdf::{
    dictionary, Dictionary, Document, EncryptionState, EncryptionVersion, Object, ObjectId, Permissions, Stream,
    StringFormat,
};

use crate::fault::{CRASH_MARKER, STALL_MARKER};

/// Owner password of every [`SampleDocument::encrypted`] fixture.
pub const OWNER_PASSWORD: &str = "docgate-owner";

#[derive(Debug, Clone, Default)]
pub struct SampleDocument {
    pages: u32,
    title: Option<String>,
    identifier: Option<Vec<u8>>,
    outline: bool,
    links: bool,
    roman_pages: u32,
    tagged: bool,
    attachment: bool,
    thumbnail: bool,
    user_password: Option<String>,
}

impl SampleDocument {
    pub fn new(pages: u32) -> Self {
        Self {
            pages: pages.max(1),
            ..Self::default()
        }
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Sets both halves of the trailer `ID`.
    pub fn identifier(mut self, identifier: &[u8]) -> Self {
        self.identifier = Some(identifier.to_vec());
        self
    }

    /// `Chapter 1` -> page 1 (XYZ), `Chapter 2` -> page 2 (Fit) with child
    /// `Section 2.1` reached through a GoTo action to page 3.
    pub fn with_outline(mut self) -> Self {
        self.outline = true;
        self
    }

    /// Page 1 gets a URI link at (72,700)-(300,720), with one matching quad,
    /// and a link to page 2 at (72,650)-(300,670).
    pub fn with_links(mut self) -> Self {
        self.links = true;
        self
    }

    /// Labels the first `count` pages i, ii, ... and the rest 1, 2, ...
    pub fn roman_front_matter(mut self, count: u32) -> Self {
        self.roman_pages = count;
        self
    }

    pub fn tagged(mut self) -> Self {
        self.tagged = true;
        self
    }

    pub fn with_attachment(mut self) -> Self {
        self.attachment = true;
        self
    }

    /// Page 1 gets a 2x2 RGB thumbnail whose first pixel is red.
    pub fn with_thumbnail(mut self) -> Self {
        self.thumbnail = true;
        self
    }

    /// RC4 128-bit standard security with the given user password. The
    /// owner password is [`OWNER_PASSWORD`].
    pub fn encrypted(mut self, user_password: impl Into<String>) -> Self {
        self.user_password = Some(user_password.into());
        self
    }

    pub fn build(&self) -> lopdf::Result<Vec<u8>> {
        let mut doc = Document::with_version("1.7");
        let pages_id = doc.new_object_id();

        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });

        let mut page_ids = Vec::new();
        for number in 1..=self.pages {
            let content = Content {
                operations: vec![
                    Operation::new("BT", vec![]),
                    Operation::new("Tf", vec!["F1".into(), 24.into()]),
                    Operation::new("Td", vec![72.into(), 720.into()]),
                    Operation::new("Tj", vec![Object::string_literal(format!("Page {}", number))]),
                    Operation::new("ET", vec![]),
                ],
            };
            let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode()?));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
            });
            page_ids.push(page_id);
        }

        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => page_ids.iter().map(|id| Object::Reference(*id)).collect::<Vec<_>>(),
                "Count" => page_ids.len() as i64,
                "Resources" => resources_id,
                "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            }),
        );

        let mut catalog = dictionary! { "Type" => "Catalog", "Pages" => pages_id };

        if self.outline {
            let outlines = self.add_outline(&mut doc, &page_ids);
            catalog.set("Outlines", outlines);
        }
        if self.links {
            self.add_links(&mut doc, &page_ids)?;
        }
        if self.roman_pages > 0 {
            let mut nums = vec![
                Object::Integer(0),
                Object::Dictionary(dictionary! { "S" => "r" }),
            ];
            if self.roman_pages < self.pages {
                nums.push(Object::Integer(i64::from(self.roman_pages)));
                nums.push(Object::Dictionary(dictionary! { "S" => "D" }));
            }
            catalog.set("PageLabels", dictionary! { "Nums" => nums });
        }
        if self.tagged {
            catalog.set("MarkInfo", dictionary! { "Marked" => true });
        }
        if self.attachment {
            let file = doc.add_object(Stream::new(dictionary! { "Type" => "EmbeddedFile" }, b"hello".to_vec()));
            let spec = doc.add_object(dictionary! {
                "Type" => "Filespec",
                "F" => Object::string_literal("hello.txt"),
                "EF" => dictionary! { "F" => file },
            });
            catalog.set(
                "Names",
                dictionary! {
                    "EmbeddedFiles" => dictionary! {
                        "Names" => vec![Object::string_literal("hello.txt"), Object::Reference(spec)],
                    },
                },
            );
        }
        if self.thumbnail {
            let thumb = doc.add_object(Stream::new(
                dictionary! {
                    "Width" => 2,
                    "Height" => 2,
                    "ColorSpace" => "DeviceRGB",
                    "BitsPerComponent" => 8,
                },
                vec![255, 0, 0, 0, 255, 0, 0, 0, 255, 255, 255, 255],
            ));
            page_dict(&mut doc, page_ids[0])?.set("Thumb", thumb);
        }

        let catalog_id = doc.add_object(catalog);
        doc.trailer.set("Root", catalog_id);

        if let Some(title) = &self.title {
            let info_id = doc.add_object(dictionary! {
                "Title" => Object::string_literal(title.as_str()),
                "Producer" => Object::string_literal("docgate fixtures"),
            });
            doc.trailer.set("Info", info_id);
        }
        if let Some(identifier) = &self.identifier {
            let id = Object::String(identifier.clone(), StringFormat::Hexadecimal);
            doc.trailer.set("ID", vec![id.clone(), id]);
        }

        if let Some(user_password) = &self.user_password {
            // The file key is derived from the first half of `ID`.
            if !doc.trailer.has(b"ID") {
                let id = Object::String(b"docgate-fixture!".to_vec(), StringFormat::Hexadecimal);
                doc.trailer.set("ID", vec![id.clone(), id]);
            }
            let state = EncryptionState::try_from(EncryptionVersion::V2 {
                document: &doc,
                owner_password: OWNER_PASSWORD,
                user_password: user_password.as_str(),
                key_length: 128,
                permissions: Permissions::all(),
            })?;
            doc.encrypt(&state)?;
        }

        let mut bytes = Vec::new();
        doc.save_to(&mut bytes)?;
        Ok(bytes)
    }

    fn add_outline(&self, doc: &mut Document, pages: &[ObjectId]) -> ObjectId {
        let page = |index: usize| pages[index.min(pages.len() - 1)];
        let outlines_id = doc.new_object_id();
        let chapter1 = doc.new_object_id();
        let chapter2 = doc.new_object_id();
        let section = doc.new_object_id();

        let title = |text: &str| Object::String(text.as_bytes().to_vec(), StringFormat::Literal);
        doc.objects.insert(
            chapter1,
            Object::Dictionary(dictionary! {
                "Title" => title("Chapter 1"),
                "Parent" => outlines_id,
                "Next" => chapter2,
                "Dest" => vec![page(0).into(), "XYZ".into(), 72.into(), 720.into(), Object::Null],
            }),
        );
        doc.objects.insert(
            chapter2,
            Object::Dictionary(dictionary! {
                "Title" => title("Chapter 2"),
                "Parent" => outlines_id,
                "Prev" => chapter1,
                "First" => section,
                "Last" => section,
                "Count" => 1,
                "Dest" => vec![page(1).into(), "Fit".into()],
            }),
        );
        doc.objects.insert(
            section,
            Object::Dictionary(dictionary! {
                "Title" => title("Section 2.1"),
                "Parent" => chapter2,
                "A" => dictionary! {
                    "S" => "GoTo",
                    "D" => vec![page(2).into(), "Fit".into()],
                },
            }),
        );
        doc.objects.insert(
            outlines_id,
            Object::Dictionary(dictionary! {
                "Type" => "Outlines",
                "First" => chapter1,
                "Last" => chapter2,
                "Count" => 3,
            }),
        );
        outlines_id
    }

    fn add_links(&self, doc: &mut Document, pages: &[ObjectId]) -> lopdf::Result<()> {
        let target = pages[1.min(pages.len() - 1)];
        let uri_link = doc.add_object(dictionary! {
            "Type" => "Annot",
            "Subtype" => "Link",
            "Rect" => vec![72.into(), 700.into(), 300.into(), 720.into()],
            "QuadPoints" => [72, 700, 300, 700, 300, 720, 72, 720]
                .into_iter()
                .map(Object::Integer)
                .collect::<Vec<_>>(),
            "Border" => vec![0.into(), 0.into(), 0.into()],
            "A" => dictionary! {
                "S" => "URI",
                "URI" => Object::string_literal("https://example.com/docs"),
            },
        });
        let goto_link = doc.add_object(dictionary! {
            "Type" => "Annot",
            "Subtype" => "Link",
            "Rect" => vec![72.into(), 650.into(), 300.into(), 670.into()],
            "Border" => vec![0.into(), 0.into(), 0.into()],
            "Dest" => vec![target.into(), "Fit".into()],
        });
        page_dict(doc, pages[0])?.set(
            "Annots",
            vec![Object::Reference(uri_link), Object::Reference(goto_link)],
        );
        Ok(())
    }
}

fn page_dict(doc: &mut Document, page: ObjectId) -> lopdf::Result<&mut Dictionary> {
    doc.get_object_mut(page).and_then(Object::as_dict_mut)
}

/// A valid one-page document that crashes a fault-injecting engine on open.
pub fn crash_document() -> lopdf::Result<Vec<u8>> {
    with_marker(CRASH_MARKER)
}

/// A valid one-page document that never finishes opening in a
/// fault-injecting engine.
pub fn stall_document() -> lopdf::Result<Vec<u8>> {
    with_marker(STALL_MARKER)
}

fn with_marker(marker: &[u8]) -> lopdf::Result<Vec<u8>> {
    let mut bytes = SampleDocument::new(1).build()?;
    bytes.push(b'\n');
    bytes.extend_from_slice(marker);
    bytes.push(b'\n');
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_document_loads() {
        let bytes = SampleDocument::new(3).title("Fixture").build().unwrap();
        let doc = Document::load_mem(&bytes).unwrap();
        assert_eq!(doc.get_pages().len(), 3);
    }

    #[test]
    fn test_encrypted_sample_needs_its_password() {
        let bytes = SampleDocument::new(2).title("Locked").encrypted("secret").build().unwrap();
        let doc = Document::load_mem(&bytes).unwrap();
        assert!(doc.is_encrypted());
        assert!(doc.authenticate_password("wrong").is_err());
        assert!(doc.authenticate_password("secret").is_ok());
        assert!(doc.authenticate_password(OWNER_PASSWORD).is_ok());
    }

    #[test]
    fn test_marker_documents_still_parse() {
        let bytes = crash_document().unwrap();
        assert!(bytes.windows(CRASH_MARKER.len()).any(|w| w == CRASH_MARKER));
        let doc = Document::load_mem(&bytes).unwrap();
        assert_eq!(doc.get_pages().len(), 1);
    }
}
