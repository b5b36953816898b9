use super::text::{SpanCollector, number, resolve, resolve_dict, spans_to_text};
use super::types::{BBox, DocumentInfo, PageGeometry, PageSpan};
use super::{Engine, PageCompositor, PageTextReader};
use crate::segment_plan::Segment;
use anyhow::{Context, Result, anyhow, bail};
use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream, decode_text_string, dictionary};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

const SEGMENT_XOBJECT: &[u8] = b"Seg";

#[derive(Debug, Default, Clone, Copy)]
pub struct LopdfEngine;

impl Engine for LopdfEngine {
    type Document = LopdfDocument;

    fn open(&self, input: &Path) -> Result<LopdfDocument> {
        let inner = Document::load(input)
            .with_context(|| format!("opening PDF {}", input.display()))?;
        LopdfDocument::new(inner)
    }
}

pub struct LopdfDocument {
    inner: Document,
    // 0-based page index -> page object
    page_ids: Vec<ObjectId>,
}

impl std::fmt::Debug for LopdfDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LopdfDocument")
            .field("page_count", &self.page_ids.len())
            .finish_non_exhaustive()
    }
}

impl LopdfDocument {
    pub fn new(mut inner: Document) -> Result<Self> {
        unlock(&mut inner)?;
        let page_ids = inner.get_pages().values().copied().collect();
        Ok(Self { inner, page_ids })
    }

    pub fn load_mem(bytes: &[u8]) -> Result<Self> {
        let inner = Document::load_mem(bytes).with_context(|| "parsing PDF from memory")?;
        Self::new(inner)
    }

    fn page_id(&self, page: usize) -> Result<ObjectId> {
        self.page_ids
            .get(page)
            .copied()
            .ok_or_else(|| anyhow!("page {} out of range (page_count={})", page, self.page_ids.len()))
    }

    // CropBox if set, else MediaBox; PDF user space.
    fn page_box(&self, page: usize) -> Result<BBox> {
        let id = self.page_id(page)?;
        let obj = resolve_inherited(&self.inner, id, b"CropBox")
            .or_else(|| resolve_inherited(&self.inner, id, b"MediaBox"))
            .ok_or_else(|| anyhow!("page {} has no MediaBox", page))?;
        let arr = match resolve(&self.inner, obj) {
            Some(Object::Array(arr)) => arr,
            _ => bail!("page {} box is not an array", page),
        };
        let v: Vec<f64> = arr.iter().filter_map(number).collect();
        if v.len() != 4 {
            bail!("page {} box has {} numeric entries, expected 4", page, v.len());
        }
        Ok(BBox::new(
            v[0].min(v[2]),
            v[1].min(v[3]),
            v[0].max(v[2]),
            v[1].max(v[3]),
        ))
    }

    fn page_resources(&self, page_id: ObjectId) -> Option<&Dictionary> {
        resolve_inherited(&self.inner, page_id, b"Resources")
            .and_then(|r| resolve_dict(&self.inner, r))
    }
}

// The loader decrypts with the empty user password when it authenticates and
// leaves /Encrypt in the trailer. Anything still locked needs a real password.
fn unlock(inner: &mut Document) -> Result<()> {
    if !inner.is_encrypted() {
        return Ok(());
    }
    if inner.encryption_state.is_none() {
        inner
            .decrypt("")
            .with_context(|| "decrypting PDF with empty user password")?;
    } else if let Some(Ok(id)) = inner.trailer.remove(b"Encrypt").map(|o| o.as_reference()) {
        inner.objects.remove(&id);
    }
    info!("opened encrypted PDF with empty user password");
    Ok(())
}

fn resolve_inherited<'a>(doc: &'a Document, page_id: ObjectId, key: &[u8]) -> Option<&'a Object> {
    let mut current = page_id;
    // Bounded walk; malformed trees can loop.
    for _ in 0..64 {
        let dict = doc.get_object(current).ok()?.as_dict().ok()?;
        if let Ok(value) = dict.get(key) {
            return Some(value);
        }
        current = dict.get(b"Parent").ok()?.as_reference().ok()?;
    }
    None
}

fn info_string(doc: &Document, info: &Dictionary, key: &[u8]) -> String {
    info.get(key)
        .ok()
        .and_then(|o| resolve(doc, o))
        .and_then(|o| decode_text_string(o).ok())
        .unwrap_or_default()
}

fn real(v: f64) -> Object {
    Object::Real(v as _)
}

// Copies objects out of the source document on demand, renumbering
// references. Page tree nodes are never followed.
struct Importer<'a> {
    src: &'a Document,
    ids: HashMap<ObjectId, ObjectId>,
    pending: Vec<(ObjectId, ObjectId)>,
}

impl<'a> Importer<'a> {
    fn new(src: &'a Document) -> Self {
        Self {
            src,
            ids: HashMap::new(),
            pending: Vec::new(),
        }
    }

    fn reference(&mut self, out: &mut Document, id: ObjectId) -> ObjectId {
        if let Some(&mapped) = self.ids.get(&id) {
            return mapped;
        }
        let mapped = out.new_object_id();
        self.ids.insert(id, mapped);
        self.pending.push((id, mapped));
        mapped
    }

    fn object(&mut self, out: &mut Document, obj: &Object) -> Object {
        match obj {
            Object::Reference(id) => Object::Reference(self.reference(out, *id)),
            Object::Array(items) => {
                Object::Array(items.iter().map(|o| self.object(out, o)).collect())
            }
            Object::Dictionary(dict) => Object::Dictionary(self.dict(out, dict)),
            Object::Stream(stream) => {
                let mut copy = stream.clone();
                copy.dict = self.dict(out, &stream.dict);
                Object::Stream(copy)
            }
            other => other.clone(),
        }
    }

    fn dict(&mut self, out: &mut Document, dict: &Dictionary) -> Dictionary {
        let mut copy = Dictionary::new();
        for (key, value) in dict.iter() {
            copy.set(key.clone(), self.object(out, value));
        }
        copy
    }

    fn finish(mut self, out: &mut Document) -> usize {
        let src = self.src;
        while let Some((old, new)) = self.pending.pop() {
            let obj = match src.get_object(old) {
                Ok(Object::Dictionary(d)) if d.has_type(b"Page") || d.has_type(b"Pages") => {
                    Object::Null
                }
                Ok(o) => self.object(out, o),
                Err(_) => Object::Null,
            };
            out.objects.insert(new, obj);
        }
        self.ids.len()
    }
}

impl PageTextReader for LopdfDocument {
    fn page_count(&self) -> usize {
        self.page_ids.len()
    }

    fn page_geometry(&self, page: usize) -> Result<PageGeometry> {
        let b = self.page_box(page)?;
        Ok(PageGeometry {
            width: b.width(),
            height: b.height(),
        })
    }

    fn page_spans(&self, page: usize) -> Result<Vec<PageSpan>> {
        let id = self.page_id(page)?;
        let area = self.page_box(page)?;
        let content = self
            .inner
            .get_page_content(id)
            .with_context(|| format!("reading content of page {}", page))?;
        let mut collector = SpanCollector::new(&self.inner, page, area);
        collector.walk(&content, self.page_resources(id));
        let spans = collector.finish();
        debug!("page {} spans={}", page, spans.len());
        Ok(spans)
    }

    fn page_text(&self, page: usize) -> Result<String> {
        Ok(spans_to_text(&self.page_spans(page)?))
    }

    fn document_info(&self) -> DocumentInfo {
        let doc = &self.inner;
        let Some(info) = doc
            .trailer
            .get(b"Info")
            .ok()
            .and_then(|o| resolve_dict(doc, o))
        else {
            return DocumentInfo::default();
        };
        DocumentInfo {
            title: info_string(doc, info, b"Title"),
            author: info_string(doc, info, b"Author"),
            subject: info_string(doc, info, b"Subject"),
            creator: info_string(doc, info, b"Creator"),
        }
    }
}

impl PageCompositor for LopdfDocument {
    fn compose(&self, segments: &[Segment]) -> Result<Vec<u8>> {
        if segments.is_empty() {
            bail!("no segments to compose");
        }

        let mut out = Document::with_version(self.inner.version.clone());
        let mut importer = Importer::new(&self.inner);
        let pages_id = out.new_object_id();
        let mut kids: Vec<Object> = Vec::with_capacity(segments.len());

        for seg in segments {
            let page_id = self.page_id(seg.page)?;
            let area = self.page_box(seg.page)?;
            let crop = Segment {
                y_end: seg.y_end.min(area.height()),
                ..*seg
            };
            let width = area.width();
            let height = crop.height();
            if !(height > 0.0 && width > 0.0) {
                bail!(
                    "empty crop on page {}: y {:.2}..{:.2} (width {:.2})",
                    seg.page,
                    crop.y_start,
                    crop.y_end,
                    width
                );
            }

            let content = self
                .inner
                .get_page_content(page_id)
                .with_context(|| format!("reading content of page {}", seg.page))?;
            let resources = match resolve_inherited(&self.inner, page_id, b"Resources") {
                Some(r) => importer.object(&mut out, r),
                None => Object::Dictionary(Dictionary::new()),
            };

            // Crop rectangle in the source page's bottom-left space.
            let bottom = area.y1 - crop.y_end;
            let top = area.y1 - crop.y_start;

            let form = Stream::new(
                dictionary! {
                    "Type" => "XObject",
                    "Subtype" => "Form",
                    "BBox" => vec![real(area.x0), real(bottom), real(area.x1), real(top)],
                    "Resources" => resources,
                },
                content,
            );
            let form_id = out.add_object(form);

            let draw = Content {
                operations: vec![
                    Operation::new("q", vec![]),
                    Operation::new(
                        "cm",
                        vec![
                            1.into(),
                            0.into(),
                            0.into(),
                            1.into(),
                            real(-area.x0),
                            real(-bottom),
                        ],
                    ),
                    Operation::new("Do", vec![Object::Name(SEGMENT_XOBJECT.to_vec())]),
                    Operation::new("Q", vec![]),
                ],
            };
            let draw_bytes = draw.encode().with_context(|| "encoding segment content")?;
            let content_id = out.add_object(Stream::new(Dictionary::new(), draw_bytes));

            let new_page = out.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "MediaBox" => vec![0.into(), 0.into(), real(width), real(height)],
                "Contents" => content_id,
                "Resources" => dictionary! {
                    "XObject" => dictionary! {
                        "Seg" => form_id,
                    },
                },
            });
            kids.push(new_page.into());

            debug!(
                "segment page={} y={:.2}..{:.2} -> {:.2}x{:.2}",
                seg.page, crop.y_start, crop.y_end, width, height
            );
        }

        if let Ok(info) = self.inner.trailer.get(b"Info") {
            let info = importer.object(&mut out, info);
            out.trailer.set("Info", info);
        }
        let imported = importer.finish(&mut out);
        debug!("imported {} source objects", imported);

        let count = kids.len() as i64;
        out.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
            }),
        );
        let catalog_id = out.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        out.trailer.set("Root", catalog_id);
        out.compress();

        let mut buf = Vec::new();
        out.save_to(&mut buf).with_context(|| "serializing composed PDF")?;
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn save(mut doc: Document) -> Vec<u8> {
        let mut buf = Vec::new();
        doc.save_to(&mut buf).expect("save test PDF");
        buf
    }

    fn two_page_pdf() -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });
        let mut kids = Vec::new();
        for body in [
            &b"BT /F1 12 Tf 72 700 Td (1. Alpha) Tj ET"[..],
            &b"BT /F1 12 Tf 72 400 Td (2. Beta) Tj ET"[..],
        ] {
            let content_id = doc.add_object(Stream::new(Dictionary::new(), body.to_vec()));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
            });
            kids.push(Object::from(page_id));
        }
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => 2i64,
                "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
                "Resources" => resources_id,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        save(doc)
    }

    // One page with a text marker, a stroked path and a 2x2 gray image.
    fn mixed_content_pdf() -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
        });
        let image_id = doc.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => 2,
                "Height" => 2,
                "ColorSpace" => "DeviceGray",
                "BitsPerComponent" => 8,
            },
            vec![0x00, 0x80, 0x80, 0xFF],
        ));
        let body = b"BT /F1 12 Tf 72 700 Td (1. Sketch the graph) Tj ET\n\
            1 w 72 650 m 540 650 l S\n\
            q 100 0 0 100 72 500 cm /Im1 Do Q";
        let content_id = doc.add_object(Stream::new(Dictionary::new(), body.to_vec()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            "Contents" => content_id,
            "Resources" => dictionary! {
                "Font" => dictionary! { "F1" => font_id },
                "XObject" => dictionary! { "Im1" => image_id },
            },
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![Object::from(page_id)],
                "Count" => 1i64,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        save(doc)
    }

    fn segment_form(doc: &Document) -> &Stream {
        let page_id = *doc.get_pages().values().next().unwrap();
        let page = doc.get_dictionary(page_id).unwrap();
        let xobjects = page
            .get(b"Resources")
            .and_then(Object::as_dict)
            .and_then(|r| r.get(b"XObject"))
            .and_then(Object::as_dict)
            .unwrap();
        let form_id = xobjects.get(b"Seg").and_then(Object::as_reference).unwrap();
        doc.get_object(form_id).and_then(Object::as_stream).unwrap()
    }

    #[test]
    fn inherited_box_and_resources() {
        let doc = LopdfDocument::load_mem(&two_page_pdf()).unwrap();
        assert_eq!(doc.page_count(), 2);
        let g = doc.page_geometry(1).unwrap();
        assert_eq!(g.height, 792.0);
        let spans = doc.page_spans(1).unwrap();
        assert_eq!(spans[0].text, "2. Beta");
        assert!((spans[0].bbox.y0 - 380.0).abs() < 1e-6);
    }

    #[test]
    fn compose_sizes_pages_to_segments() {
        let doc = LopdfDocument::load_mem(&two_page_pdf()).unwrap();
        let bytes = doc
            .compose(&[
                Segment { page: 0, y_start: 75.0, y_end: 792.0 },
                Segment { page: 1, y_start: 0.0, y_end: 378.0 },
            ])
            .unwrap();
        let out = LopdfDocument::load_mem(&bytes).unwrap();
        assert_eq!(out.page_count(), 2);
        assert!((out.page_geometry(0).unwrap().height - 717.0).abs() < 1e-3);
        assert!((out.page_geometry(1).unwrap().height - 378.0).abs() < 1e-3);
        // The marker is drawn through the form, so it is still extractable.
        let spans = out.page_spans(0).unwrap();
        assert_eq!(spans[0].text, "1. Alpha");
    }

    #[test]
    fn compose_keeps_paths_and_images() {
        let doc = LopdfDocument::load_mem(&mixed_content_pdf()).unwrap();
        let bytes = doc
            .compose(&[Segment { page: 0, y_start: 75.0, y_end: 400.0 }])
            .unwrap();
        let out = Document::load_mem(&bytes).unwrap();
        let form = segment_form(&out);

        let bbox: Vec<f64> = form
            .dict
            .get(b"BBox")
            .and_then(Object::as_array)
            .unwrap()
            .iter()
            .filter_map(number)
            .collect();
        assert_eq!(bbox, vec![0.0, 392.0, 612.0, 717.0]);

        let ops = Content::decode(&form.get_plain_content().unwrap()).unwrap().operations;
        assert!(ops.iter().any(|op| op.operator == "S"));
        assert!(ops.iter().any(|op| op.operator == "Do"));

        let images = out
            .objects
            .values()
            .filter_map(|o| o.as_stream().ok())
            .filter(|s| s.dict.has_type(b"XObject") && s.dict.get(b"Subtype").and_then(Object::as_name).ok() == Some(&b"Image"[..]))
            .count();
        assert_eq!(images, 1);
    }

    #[test]
    fn compose_copies_only_reachable_objects() {
        let doc = LopdfDocument::load_mem(&two_page_pdf()).unwrap();
        let bytes = doc
            .compose(&[Segment { page: 1, y_start: 0.0, y_end: 378.0 }])
            .unwrap();
        let out = Document::load_mem(&bytes).unwrap();
        assert_eq!(out.get_pages().len(), 1);
        // No page from the source tree comes along with the resources.
        let source_pages = out
            .objects
            .values()
            .filter_map(|o| o.as_dict().ok())
            .filter(|d| d.has_type(b"Page"))
            .count();
        assert_eq!(source_pages, 1);
    }

    #[test]
    fn compose_rejects_empty_crop() {
        let doc = LopdfDocument::load_mem(&two_page_pdf()).unwrap();
        let err = doc
            .compose(&[Segment { page: 0, y_start: 300.0, y_end: 298.0 }])
            .unwrap_err();
        assert!(err.to_string().contains("empty crop"));
    }
}
