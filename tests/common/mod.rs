#![allow(dead_code)]

use anyhow::{Result, anyhow, bail};
use lopdf::{
    Dictionary, Document, EncryptionState, EncryptionVersion, Object, Permissions, Stream,
    StringFormat, dictionary,
};
use question_splitter::engine::{
    BBox, DocumentInfo, Engine, PageCompositor, PageGeometry, PageSpan, PageTextReader,
};
use question_splitter::segment_plan::Segment;
use std::path::Path;

#[derive(Debug, Clone)]
pub struct FakePage {
    pub height: f64,
    /// (top y, text)
    pub spans: Vec<(f64, String)>,
}

pub fn page(height: f64, spans: &[(f64, &str)]) -> FakePage {
    FakePage {
        height,
        spans: spans.iter().map(|(y, t)| (*y, t.to_string())).collect(),
    }
}

#[derive(Debug, Clone, Default)]
pub struct FakeDoc {
    pub pages: Vec<FakePage>,
    pub info: DocumentInfo,
    /// Questions whose first segment sits on this page fail to compose.
    pub fail_head_on_page: Option<usize>,
}

impl PageTextReader for FakeDoc {
    fn page_count(&self) -> usize {
        self.pages.len()
    }

    fn page_geometry(&self, page: usize) -> Result<PageGeometry> {
        let p = self.pages.get(page).ok_or_else(|| anyhow!("no page {page}"))?;
        Ok(PageGeometry {
            width: 612.0,
            height: p.height,
        })
    }

    fn page_spans(&self, page: usize) -> Result<Vec<PageSpan>> {
        let p = self.pages.get(page).ok_or_else(|| anyhow!("no page {page}"))?;
        Ok(p.spans
            .iter()
            .map(|(y, text)| PageSpan {
                page,
                bbox: BBox::new(72.0, *y, 200.0, y + 12.0),
                text: text.clone(),
            })
            .collect())
    }

    fn page_text(&self, page: usize) -> Result<String> {
        let p = self.pages.get(page).ok_or_else(|| anyhow!("no page {page}"))?;
        Ok(p.spans
            .iter()
            .map(|(_, t)| t.as_str())
            .collect::<Vec<_>>()
            .join("\n"))
    }

    fn document_info(&self) -> DocumentInfo {
        self.info.clone()
    }
}

impl PageCompositor for FakeDoc {
    fn compose(&self, segments: &[Segment]) -> Result<Vec<u8>> {
        if segments.first().map(|s| s.page) == self.fail_head_on_page {
            bail!("forced compose failure");
        }
        Ok(format!("%PDF-fake {} segments", segments.len()).into_bytes())
    }
}

pub struct FakeEngine(pub FakeDoc);

impl Engine for FakeEngine {
    type Document = FakeDoc;

    fn open(&self, _input: &Path) -> Result<FakeDoc> {
        Ok(self.0.clone())
    }
}

/// Build a real PDF where every marker's top edge lands at the given y
/// (top-left origin) with a 12pt Helvetica font.
pub fn build_pdf(pages: &[FakePage], title: Option<&str>) -> Vec<u8> {
    save(build_doc(pages, title, None))
}

pub fn build_doc(pages: &[FakePage], title: Option<&str>, font_encoding: Option<&str>) -> Document {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let mut font = dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    };
    if let Some(encoding) = font_encoding {
        font.set("Encoding", Object::Name(encoding.as_bytes().to_vec()));
    }
    let font_id = doc.add_object(font);

    let mut kids = Vec::new();
    for p in pages {
        let mut body = String::new();
        for (y, text) in &p.spans {
            let baseline = p.height - y - 12.0;
            body.push_str(&format!("BT /F1 12 Tf 72 {} Td ({}) Tj ET\n", baseline, text));
        }
        // Some vector content so the composed pages have more than text.
        body.push_str("0.5 w 36 36 m 540 36 l S\n");
        let content_id = doc.add_object(Stream::new(Dictionary::new(), body.into_bytes()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), Object::Real(p.height as _)],
            "Contents" => content_id,
            "Resources" => dictionary! {
                "Font" => dictionary! { "F1" => font_id },
            },
        });
        kids.push(Object::from(page_id));
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    if let Some(title) = title {
        let info_id = doc.add_object(dictionary! {
            "Title" => Object::string_literal(title),
            "Author" => Object::string_literal("Exams Office"),
        });
        doc.trailer.set("Info", info_id);
    }
    doc
}

/// RC4 128-bit encryption with the given passwords.
pub fn encrypt(doc: &mut Document, owner_password: &str, user_password: &str) {
    doc.trailer.set(
        "ID",
        Object::Array(vec![
            Object::String(vec![7u8; 16], StringFormat::Literal),
            Object::String(vec![9u8; 16], StringFormat::Literal),
        ]),
    );
    let version = EncryptionVersion::V2 {
        document: &*doc,
        owner_password,
        user_password,
        key_length: 128,
        permissions: Permissions::all(),
    };
    let state = EncryptionState::try_from(version).expect("encryption state");
    doc.encrypt(&state).expect("encrypt test PDF");
}

pub fn save(mut doc: Document) -> Vec<u8> {
    let mut buf = Vec::new();
    doc.save_to(&mut buf).expect("save test PDF");
    buf
}
