use crate::{config::Config, patterns::QuestionMatch};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub page: usize,
    pub y_start: f64,
    pub y_end: f64,
}

impl Segment {
    pub fn height(&self) -> f64 {
        self.y_end - self.y_start
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NumberSource {
    Parsed,
    Ordinal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub question_number: u32,
    pub number_source: NumberSource,
    pub starter: String,
    pub segments: Vec<Segment>,
    pub total_pages: usize,
    pub pattern_used: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Margins {
    pub top_margin: f64,
    pub bottom_gap: f64,
}

impl Default for Margins {
    fn default() -> Self {
        Self {
            top_margin: 5.0,
            bottom_gap: 2.0,
        }
    }
}

impl Margins {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            top_margin: cfg.segmenting.top_margin,
            bottom_gap: cfg.segmenting.bottom_gap,
        }
    }
}

/// Turn position-sorted matches into questions.
///
/// `page_heights[p]` is the height of page `p`; its length is the page count.
/// Each question runs from its marker to just above the next marker, or to
/// the end of the document for the last one.
pub fn plan_segments(
    matches: &[QuestionMatch],
    page_heights: &[f64],
    margins: Margins,
) -> Vec<Question> {
    let height_of = |page: usize| page_heights.get(page).copied().unwrap_or(0.0);
    let mut questions = Vec::with_capacity(matches.len());

    for (i, current) in matches.iter().enumerate() {
        let y_start = (current.y_pos - margins.top_margin).max(0.0);
        let mut segments = Vec::new();

        match matches.get(i + 1) {
            Some(next) if next.page == current.page => {
                segments.push(Segment {
                    page: current.page,
                    y_start,
                    y_end: next.y_pos - margins.bottom_gap,
                });
            }
            Some(next) => {
                segments.push(Segment {
                    page: current.page,
                    y_start,
                    y_end: current.page_height,
                });
                for page in current.page + 1..next.page {
                    segments.push(Segment {
                        page,
                        y_start: 0.0,
                        y_end: height_of(page),
                    });
                }
                // A marker flush with the page top leaves nothing above it.
                let tail_end = next.y_pos - margins.bottom_gap;
                if tail_end > 0.0 {
                    segments.push(Segment {
                        page: next.page,
                        y_start: 0.0,
                        y_end: tail_end,
                    });
                }
            }
            None => {
                segments.push(Segment {
                    page: current.page,
                    y_start,
                    y_end: current.page_height,
                });
                for page in current.page + 1..page_heights.len() {
                    segments.push(Segment {
                        page,
                        y_start: 0.0,
                        y_end: height_of(page),
                    });
                }
            }
        }

        let (question_number, number_source) = if current.question_number != 0 {
            (current.question_number, NumberSource::Parsed)
        } else {
            ((i + 1) as u32, NumberSource::Ordinal)
        };

        questions.push(Question {
            question_number,
            number_source,
            starter: current.text.clone(),
            total_pages: segments.len(),
            segments,
            pattern_used: current.pattern_used.clone(),
        });
    }

    questions
}
