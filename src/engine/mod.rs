pub mod lopdf_backend;
mod text;
pub mod types;

use anyhow::Result;
use std::path::Path;

pub use types::{BBox, DocumentInfo, PageGeometry, PageSpan};

pub trait PageTextReader {
    fn page_count(&self) -> usize;
    fn page_geometry(&self, page: usize) -> Result<PageGeometry>;
    fn page_spans(&self, page: usize) -> Result<Vec<PageSpan>>;
    fn page_text(&self, page: usize) -> Result<String>;
    fn document_info(&self) -> DocumentInfo;
}

pub trait PageCompositor {
    fn compose(&self, segments: &[crate::segment_plan::Segment]) -> Result<Vec<u8>>;
}

pub trait Engine {
    type Document: PageTextReader + PageCompositor;

    fn open(&self, input: &Path) -> Result<Self::Document>;
}
