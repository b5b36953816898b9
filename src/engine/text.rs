// Glyph widths are not consulted; span width is estimated from the font size.

use super::types::{BBox, PageSpan};
use lopdf::content::Content;
use lopdf::{Dictionary, Document, Encoding, Object};
use std::collections::HashMap;
use tracing::debug;

type Matrix = [f64; 6];

const IDENTITY: Matrix = [1.0, 0.0, 0.0, 1.0, 0.0, 0.0];
const MAX_FORM_DEPTH: usize = 8;
// Average glyph advance as a fraction of the font size.
const AVG_ADVANCE: f64 = 0.5;
// TJ adjustments at or below this (thousandths of an em) read as a word gap.
const TJ_SPACE_THRESHOLD: f64 = -250.0;

fn mul(m: &Matrix, n: &Matrix) -> Matrix {
    [
        m[0] * n[0] + m[1] * n[2],
        m[0] * n[1] + m[1] * n[3],
        m[2] * n[0] + m[3] * n[2],
        m[2] * n[1] + m[3] * n[3],
        m[4] * n[0] + m[5] * n[2] + n[4],
        m[4] * n[1] + m[5] * n[3] + n[5],
    ]
}

fn translate(tx: f64, ty: f64) -> Matrix {
    [1.0, 0.0, 0.0, 1.0, tx, ty]
}

pub(crate) fn number(obj: &Object) -> Option<f64> {
    match obj {
        Object::Integer(i) => Some(*i as f64),
        Object::Real(r) => Some(*r as f64),
        _ => None,
    }
}

pub(crate) fn resolve<'a>(doc: &'a Document, obj: &'a Object) -> Option<&'a Object> {
    match obj {
        Object::Reference(id) => doc.get_object(*id).ok(),
        other => Some(other),
    }
}

pub(crate) fn resolve_dict<'a>(doc: &'a Document, obj: &'a Object) -> Option<&'a Dictionary> {
    match resolve(doc, obj)? {
        Object::Dictionary(d) => Some(d),
        Object::Stream(s) => Some(&s.dict),
        _ => None,
    }
}

// Used when the font has no usable encoding or lopdf cannot decode the bytes.
fn fallback_text(bytes: &[u8]) -> String {
    if bytes.len() >= 2 && bytes[0] == 0xFE && bytes[1] == 0xFF {
        let units: Vec<u16> = bytes[2..]
            .chunks_exact(2)
            .map(|c| u16::from_be_bytes([c[0], c[1]]))
            .collect();
        return String::from_utf16_lossy(&units);
    }
    bytes.iter().map(|&b| b as char).collect()
}

#[derive(Debug, Clone)]
struct GraphicsState {
    ctm: Matrix,
    font: Vec<u8>,
    font_size: f64,
    leading: f64,
}

#[derive(Debug)]
struct PendingSpan {
    text: String,
    font: Vec<u8>,
    font_size: f64,
    baseline: f64,
    x0: f64,
    x1: f64,
    height: f64,
}

pub(crate) struct SpanCollector<'a> {
    doc: &'a Document,
    page: usize,
    // PDF user-space media box, bottom-left origin.
    media: BBox,
    fonts: HashMap<Vec<u8>, Encoding<'a>>,
    spans: Vec<PageSpan>,
    pending: Option<PendingSpan>,
}

impl<'a> SpanCollector<'a> {
    pub(crate) fn new(doc: &'a Document, page: usize, media: BBox) -> Self {
        Self {
            doc,
            page,
            media,
            fonts: HashMap::new(),
            spans: Vec::new(),
            pending: None,
        }
    }

    pub(crate) fn finish(mut self) -> Vec<PageSpan> {
        self.flush();
        self.spans
    }

    pub(crate) fn walk(&mut self, content: &[u8], resources: Option<&'a Dictionary>) {
        self.walk_at(content, resources, IDENTITY, 0);
    }

    fn walk_at(
        &mut self,
        content: &[u8],
        resources: Option<&'a Dictionary>,
        base: Matrix,
        depth: usize,
    ) {
        let content = match Content::decode(content) {
            Ok(c) => c,
            Err(e) => {
                debug!("page {} content decode failed: {}", self.page, e);
                return;
            }
        };

        // Font resources are resolved per content stream; names are local to it.
        let saved_fonts = std::mem::take(&mut self.fonts);
        self.load_fonts(resources);

        let mut gs = GraphicsState {
            ctm: base,
            font: Vec::new(),
            font_size: 12.0,
            leading: 0.0,
        };
        let mut stack: Vec<GraphicsState> = Vec::new();
        let mut tm = IDENTITY;
        let mut tlm = IDENTITY;

        for op in &content.operations {
            let nums: Vec<f64> = op.operands.iter().filter_map(number).collect();
            match op.operator.as_str() {
                "q" => stack.push(gs.clone()),
                "Q" => {
                    if let Some(prev) = stack.pop() {
                        gs = prev;
                    }
                }
                "cm" if nums.len() >= 6 => {
                    let m = [nums[0], nums[1], nums[2], nums[3], nums[4], nums[5]];
                    gs.ctm = mul(&m, &gs.ctm);
                }
                "BT" => {
                    tm = IDENTITY;
                    tlm = IDENTITY;
                }
                "ET" => self.flush(),
                "Tf" if op.operands.len() >= 2 => {
                    if let Object::Name(name) = &op.operands[0] {
                        gs.font = name.clone();
                    }
                    if let Some(size) = number(&op.operands[1]) {
                        gs.font_size = size;
                    }
                }
                "TL" if !nums.is_empty() => gs.leading = nums[0],
                "Td" if nums.len() >= 2 => {
                    tlm = mul(&translate(nums[0], nums[1]), &tlm);
                    tm = tlm;
                }
                "TD" if nums.len() >= 2 => {
                    gs.leading = -nums[1];
                    tlm = mul(&translate(nums[0], nums[1]), &tlm);
                    tm = tlm;
                }
                "Tm" if nums.len() >= 6 => {
                    tlm = [nums[0], nums[1], nums[2], nums[3], nums[4], nums[5]];
                    tm = tlm;
                }
                "T*" => {
                    tlm = mul(&translate(0.0, -gs.leading), &tlm);
                    tm = tlm;
                }
                "Tj" => {
                    if let Some(Object::String(bytes, _)) = op.operands.first() {
                        let text = self.decode(&gs.font, bytes);
                        self.show(&gs, &mut tm, &text);
                    }
                }
                "'" | "\"" => {
                    tlm = mul(&translate(0.0, -gs.leading), &tlm);
                    tm = tlm;
                    if let Some(Object::String(bytes, _)) = op.operands.last() {
                        let text = self.decode(&gs.font, bytes);
                        self.show(&gs, &mut tm, &text);
                    }
                }
                "TJ" => {
                    if let Some(Object::Array(items)) = op.operands.first() {
                        let mut text = String::new();
                        for item in items {
                            match item {
                                Object::String(bytes, _) => {
                                    text.push_str(&self.decode(&gs.font, bytes))
                                }
                                other => {
                                    if number(other).is_some_and(|n| n <= TJ_SPACE_THRESHOLD)
                                        && !text.ends_with(' ')
                                    {
                                        text.push(' ');
                                    }
                                }
                            }
                        }
                        self.show(&gs, &mut tm, &text);
                    }
                }
                "Do" if depth < MAX_FORM_DEPTH => {
                    if let Some(Object::Name(name)) = op.operands.first() {
                        self.flush();
                        self.walk_form(name, resources, &gs.ctm, depth);
                    }
                }
                _ => {}
            }
        }

        self.fonts = saved_fonts;
    }

    fn walk_form(
        &mut self,
        name: &[u8],
        resources: Option<&'a Dictionary>,
        ctm: &Matrix,
        depth: usize,
    ) {
        let doc = self.doc;
        let stream = resources
            .and_then(|r| r.get(b"XObject").ok())
            .and_then(|x| resolve_dict(doc, x))
            .and_then(|x| x.get(name).ok())
            .and_then(|o| resolve(doc, o))
            .and_then(|o| o.as_stream().ok());
        let Some(stream) = stream else { return };
        if !matches!(stream.dict.get(b"Subtype"), Ok(Object::Name(n)) if n.as_slice() == b"Form") {
            return;
        }
        let Ok(bytes) = stream.get_plain_content() else {
            return;
        };

        let matrix = match stream.dict.get(b"Matrix") {
            Ok(Object::Array(arr)) if arr.len() == 6 => {
                let v: Vec<f64> = arr.iter().filter_map(number).collect();
                if v.len() == 6 {
                    [v[0], v[1], v[2], v[3], v[4], v[5]]
                } else {
                    IDENTITY
                }
            }
            _ => IDENTITY,
        };
        let form_resources = stream
            .dict
            .get(b"Resources")
            .ok()
            .and_then(|r| resolve_dict(doc, r))
            .or(resources);

        self.walk_at(&bytes, form_resources, mul(&matrix, ctm), depth + 1);
    }

    fn load_fonts(&mut self, resources: Option<&'a Dictionary>) {
        let doc = self.doc;
        let Some(fonts) = resources
            .and_then(|r| r.get(b"Font").ok())
            .and_then(|f| resolve_dict(doc, f))
        else {
            return;
        };
        for (name, obj) in fonts.iter() {
            let Some(font) = resolve_dict(doc, obj) else {
                continue;
            };
            match font.get_font_encoding(doc) {
                Ok(encoding) => {
                    self.fonts.insert(name.clone(), encoding);
                }
                Err(e) => debug!(
                    "font {} has no usable encoding: {}",
                    String::from_utf8_lossy(name),
                    e
                ),
            }
        }
    }

    fn decode(&self, font: &[u8], bytes: &[u8]) -> String {
        self.fonts
            .get(font)
            .and_then(|encoding| Document::decode_text(encoding, bytes).ok())
            .unwrap_or_else(|| fallback_text(bytes))
    }

    fn show(&mut self, gs: &GraphicsState, tm: &mut Matrix, text: &str) {
        let trm = mul(tm, &gs.ctm);
        let scale = (trm[2] * trm[2] + trm[3] * trm[3]).sqrt();
        let height = gs.font_size.abs() * if scale > 0.0 { scale } else { 1.0 };
        let advance_text = gs.font_size * AVG_ADVANCE * text.chars().count() as f64;
        let x0 = trm[4];
        let baseline = trm[5];
        let x1 = x0 + advance_text * (trm[0] * trm[0] + trm[1] * trm[1]).sqrt();

        // Advance the text matrix so later shows on the same line land further right.
        *tm = mul(&translate(advance_text, 0.0), tm);

        if text.is_empty() {
            return;
        }

        if let Some(p) = &mut self.pending {
            if p.font == gs.font
                && (p.font_size - gs.font_size).abs() < f64::EPSILON
                && (p.baseline - baseline).abs() < 0.5
            {
                p.text.push_str(text);
                p.x1 = p.x1.max(x1);
                return;
            }
        }
        self.flush();
        self.pending = Some(PendingSpan {
            text: text.to_string(),
            font: gs.font.clone(),
            font_size: gs.font_size,
            baseline,
            x0,
            x1,
            height,
        });
    }

    fn flush(&mut self) {
        let Some(p) = self.pending.take() else { return };
        if p.text.trim().is_empty() {
            return;
        }
        // Flip to a top-left origin relative to the media box.
        let top = self.media.y1 - (p.baseline + p.height);
        let bottom = self.media.y1 - p.baseline + p.height * 0.2;
        self.spans.push(PageSpan {
            page: self.page,
            bbox: BBox::new(p.x0 - self.media.x0, top, p.x1 - self.media.x0, bottom),
            text: p.text,
        });
    }
}

// Spans sharing a top edge join with a space.
pub(crate) fn spans_to_text(spans: &[PageSpan]) -> String {
    let mut out = String::new();
    let mut last_top: Option<f64> = None;
    for span in spans {
        match last_top {
            Some(top) if (top - span.bbox.y0).abs() < 1.0 => out.push(' '),
            Some(_) => out.push('\n'),
            None => {}
        }
        out.push_str(span.text.trim());
        last_top = Some(span.bbox.y0);
    }
    out
}
