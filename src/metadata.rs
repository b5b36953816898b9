use crate::{config::Config, engine::PageTextReader};
use anyhow::{Context, Result};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub page_count: usize,
    pub title: String,
    pub author: String,
    pub subject: String,
    pub creator: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extracted_course: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CoursePatterns(Vec<Regex>);

impl CoursePatterns {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let compiled = patterns
            .iter()
            .map(|p| {
                RegexBuilder::new(p.as_ref())
                    .case_insensitive(true)
                    .build()
                    .with_context(|| format!("compiling course pattern {:?}", p.as_ref()))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self(compiled))
    }

    pub fn from_config(cfg: &Config) -> Result<Self> {
        Self::new(&cfg.metadata.course_patterns)
    }

    pub fn find(&self, text: &str) -> Option<String> {
        self.0.iter().find_map(|re| {
            let caps = re.captures(text)?;
            let value = caps.get(1)?.as_str().trim();
            (!value.is_empty()).then(|| value.to_string())
        })
    }
}

pub fn extract_metadata<D: PageTextReader + ?Sized>(
    doc: &D,
    courses: &CoursePatterns,
) -> DocumentMetadata {
    let info = doc.document_info();
    let page_count = doc.page_count();

    let extracted_course = if page_count > 0 {
        match doc.page_text(0) {
            Ok(text) => courses.find(&text),
            Err(err) => {
                warn!("first page text unavailable for metadata: {err:#}");
                None
            }
        }
    } else {
        None
    };
    debug!(?extracted_course, "metadata course hint");

    DocumentMetadata {
        page_count,
        title: info.title,
        author: info.author,
        subject: info.subject,
        creator: info.creator,
        extracted_course,
    }
}
