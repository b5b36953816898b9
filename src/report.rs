use crate::{
    metadata::DocumentMetadata,
    patterns::QuestionMatch,
    segment_plan::{NumberSource, Segment},
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub matches: Vec<QuestionMatch>,
    pub output_files: Vec<PathBuf>,
    pub metadata: DocumentMetadata,
    pub questions: Vec<QuestionReport>,
    pub output_dir: Option<PathBuf>,
    pub input_sha256: String,
}

impl ExtractionResult {
    pub fn failed_count(&self) -> usize {
        self.questions
            .iter()
            .filter(|q| matches!(q.status, QuestionStatus::Failed { .. }))
            .count()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionReport {
    pub question_number: u32,
    pub number_source: NumberSource,
    pub starter: String,
    pub pattern_used: String,
    pub total_pages: usize,
    pub segments: Vec<Segment>,
    pub status: QuestionStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum QuestionStatus {
    Written { path: PathBuf, bytes: u64 },
    Failed { error: String },
}
