use crate::{
    config::Config,
    engine::{PageSpan, PageTextReader},
};
use anyhow::{Context, Result};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tracing::{debug, info, warn};
use unicode_normalization::UnicodeNormalization;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionMatch {
    pub page: usize,
    pub y_pos: f64,
    pub text: String,
    pub pattern_used: String,
    pub page_height: f64,
    pub question_number: u32,
}

#[derive(Debug, Clone)]
pub struct PatternSet {
    patterns: Vec<(Regex, String)>,
    normalize_unicode: bool,
}

impl PatternSet {
    pub fn new<S: AsRef<str>>(
        patterns: &[S],
        case_insensitive: bool,
        normalize_unicode: bool,
    ) -> Result<Self> {
        let patterns = patterns
            .iter()
            .map(|p| {
                let src = p.as_ref();
                RegexBuilder::new(src)
                    .case_insensitive(case_insensitive)
                    .build()
                    .with_context(|| format!("compiling boundary pattern {src:?}"))
                    .map(|re| (re, src.to_string()))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            patterns,
            normalize_unicode,
        })
    }

    pub fn from_config(cfg: &Config) -> Result<Self> {
        Self::new(
            &cfg.matching.patterns,
            cfg.matching.case_insensitive,
            cfg.matching.normalize_unicode,
        )
    }

    pub fn match_text(&self, text: &str) -> Option<(&str, u32)> {
        let normalized;
        let text = if self.normalize_unicode {
            normalized = text.nfkc().collect::<String>();
            normalized.trim()
        } else {
            text.trim()
        };

        self.patterns.iter().find_map(|(re, src)| {
            let caps = re.captures(text)?;
            let number = caps
                .get(1)
                .and_then(|m| m.as_str().parse::<u32>().ok())
                .unwrap_or(0);
            Some((src.as_str(), number))
        })
    }

    pub fn match_span(&self, span: &PageSpan, page_height: f64) -> Option<QuestionMatch> {
        let (pattern, number) = self.match_text(&span.text)?;
        Some(QuestionMatch {
            page: span.page,
            y_pos: span.bbox.y0,
            text: span.text.trim().to_string(),
            pattern_used: pattern.to_string(),
            page_height,
            question_number: number,
        })
    }
}

pub fn find_matches<D: PageTextReader + ?Sized>(
    doc: &D,
    patterns: &PatternSet,
) -> Vec<QuestionMatch> {
    let mut all = Vec::new();

    for page in 0..doc.page_count() {
        let spans = doc.page_spans(page).and_then(|spans| {
            doc.page_geometry(page).map(|g| (spans, g.height))
        });
        let (spans, height) = match spans {
            Ok(v) => v,
            Err(err) => {
                warn!("skipping page {} during marker scan: {:#}", page, err);
                continue;
            }
        };
        for span in &spans {
            if let Some(m) = patterns.match_span(span, height) {
                debug!(
                    "match page={} y={:.2} pattern={} text={:?}",
                    m.page, m.y_pos, m.pattern_used, m.text
                );
                all.push(m);
            }
        }
    }

    sort_matches(&mut all);
    info!("found {} question markers", all.len());
    all
}

pub fn sort_matches(matches: &mut [QuestionMatch]) {
    matches.sort_by(|a, b| {
        a.page
            .cmp(&b.page)
            .then(a.y_pos.partial_cmp(&b.y_pos).unwrap_or(Ordering::Equal))
    });
}
