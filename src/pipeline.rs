use crate::{
    config::Config,
    engine::{Engine, PageCompositor, PageTextReader, lopdf_backend::LopdfEngine},
    metadata::{CoursePatterns, DocumentMetadata, extract_metadata},
    patterns::{PatternSet, QuestionMatch, find_matches},
    report::{ExtractionResult, QuestionReport, QuestionStatus},
    segment_plan::{Margins, Question, plan_segments},
    util::{batch_timestamp, create_unique_dir, hash_file, sanitize_name},
};
use anyhow::{Context, Result, anyhow};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, error, info, warn};

pub struct Pipeline<E: Engine> {
    cfg: Config,
    engine: E,
    patterns: PatternSet,
    courses: CoursePatterns,
    margins: Margins,
}

impl<E: Engine> Pipeline<E> {
    pub fn new(cfg: &Config, engine: E) -> Result<Self> {
        Ok(Self {
            cfg: cfg.clone(),
            engine,
            patterns: PatternSet::from_config(cfg)?,
            courses: CoursePatterns::from_config(cfg)?,
            margins: Margins::from_config(cfg),
        })
    }

    pub fn scan(&self, input: &Path) -> Result<Vec<QuestionMatch>> {
        let doc = self.open(input)?;
        Ok(find_matches(&doc, &self.patterns))
    }

    pub fn plan(&self, input: &Path) -> Result<Vec<Question>> {
        let doc = self.open(input)?;
        let matches = find_matches(&doc, &self.patterns);
        Ok(plan_segments(&matches, &page_heights(&doc), self.margins))
    }

    pub fn metadata(&self, input: &Path) -> Result<DocumentMetadata> {
        let doc = self.open(input)?;
        Ok(extract_metadata(&doc, &self.courses))
    }

    pub fn run(&self, input: &Path, out_base: &Path) -> Result<ExtractionResult> {
        let started = Instant::now();
        // Size and page limits are enforced before the input is hashed.
        let doc = self.open(input)?;
        let input_sha256 =
            hash_file(input).with_context(|| format!("hashing input: {}", input.display()))?;
        let metadata = extract_metadata(&doc, &self.courses);

        let matches = find_matches(&doc, &self.patterns);
        if matches.is_empty() {
            warn!("no question markers found in {}", input.display());
            drop(doc);
            return Ok(ExtractionResult {
                matches,
                output_files: Vec::new(),
                metadata,
                questions: Vec::new(),
                output_dir: None,
                input_sha256,
            });
        }

        let questions = plan_segments(&matches, &page_heights(&doc), self.margins);
        info!(
            "planned {} questions from {} markers",
            questions.len(),
            matches.len()
        );

        let out_dir = self.create_output_dir(input, out_base)?;
        info!("output directory {}", out_dir.display());

        let names = file_names(&self.cfg.output.file_prefix, &questions);
        let mut reports = Vec::with_capacity(questions.len());
        let mut output_files = Vec::new();

        for (question, name) in questions.iter().zip(names) {
            let path = out_dir.join(name);
            info!(
                "question {} spans {} page(s) starter={:?} pattern={}",
                question.question_number,
                question.total_pages,
                question.starter,
                question.pattern_used
            );

            let status = match compose_and_write(&doc, question, &path) {
                Ok(bytes) => {
                    debug!("wrote {} ({} bytes)", path.display(), bytes);
                    output_files.push(path.clone());
                    QuestionStatus::Written { path, bytes }
                }
                Err(err) => {
                    error!(
                        "question {} failed: {:#}",
                        question.question_number, err
                    );
                    QuestionStatus::Failed {
                        error: format!("{:#}", err),
                    }
                }
            };

            reports.push(QuestionReport {
                question_number: question.question_number,
                number_source: question.number_source,
                starter: question.starter.clone(),
                pattern_used: question.pattern_used.clone(),
                total_pages: question.total_pages,
                segments: question.segments.clone(),
                status,
            });
        }

        drop(doc);

        let result = ExtractionResult {
            matches,
            output_files,
            metadata,
            questions: reports,
            output_dir: Some(out_dir.clone()),
            input_sha256,
        };

        if self.cfg.output.write_report_json {
            let report_path = out_dir.join(&self.cfg.output.report_filename);
            if let Err(err) = write_report(&result, &report_path) {
                warn!("report not written: {:#}", err);
            }
        }

        info!(
            "extracted {}/{} questions from {} in {:.2}s",
            result.output_files.len(),
            result.questions.len(),
            input.display(),
            started.elapsed().as_secs_f64()
        );
        Ok(result)
    }

    fn open(&self, input: &Path) -> Result<E::Document> {
        let meta = std::fs::metadata(input)
            .with_context(|| format!("stat input: {}", input.display()))?;
        if meta.len() > self.cfg.limits.max_input_file_bytes {
            return Err(anyhow!("input exceeds max_input_file_bytes: {}", meta.len()));
        }

        let doc = self.engine.open(input)?;
        let pages = doc.page_count();
        if pages > self.cfg.limits.max_input_pages as usize {
            return Err(anyhow!("input exceeds max_input_pages: {}", pages));
        }
        debug!("opened {} pages={}", input.display(), pages);
        Ok(doc)
    }

    fn create_output_dir(&self, input: &Path, out_base: &Path) -> Result<PathBuf> {
        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document".to_string());
        let name = format!(
            "{}_{}_{}",
            self.cfg.output.dir_prefix,
            sanitize_name(&stem, self.cfg.output.max_name_len),
            batch_timestamp()
        );
        create_unique_dir(out_base, &name)
            .with_context(|| format!("creating output directory under {}", out_base.display()))
    }
}

fn page_heights<D: PageTextReader>(doc: &D) -> Vec<f64> {
    (0..doc.page_count())
        .map(|p| match doc.page_geometry(p) {
            Ok(g) => g.height,
            Err(err) => {
                warn!("page {} geometry unavailable: {:#}", p, err);
                0.0
            }
        })
        .collect()
}

pub fn file_names(prefix: &str, questions: &[Question]) -> Vec<String> {
    let mut seen: HashMap<u32, usize> = HashMap::new();
    questions
        .iter()
        .map(|q| {
            let n = seen.entry(q.question_number).or_insert(0);
            *n += 1;
            if *n == 1 {
                format!("{}_{:02}.pdf", prefix, q.question_number)
            } else {
                format!("{}_{:02}_{}.pdf", prefix, q.question_number, n)
            }
        })
        .collect()
}

fn compose_and_write<D: PageCompositor>(doc: &D, question: &Question, path: &Path) -> Result<u64> {
    let bytes = doc
        .compose(&question.segments)
        .with_context(|| format!("composing question {}", question.question_number))?;
    write_question(&bytes, path)
}

pub fn write_question(bytes: &[u8], path: &Path) -> Result<u64> {
    std::fs::write(path, bytes).with_context(|| format!("writing {}", path.display()))?;
    let written = std::fs::metadata(path)
        .with_context(|| format!("stat {}", path.display()))?
        .len();
    if written == 0 {
        return Err(anyhow!("empty output file {}", path.display()));
    }
    Ok(written)
}

fn write_report(result: &ExtractionResult, path: &Path) -> Result<()> {
    std::fs::write(path, serde_json::to_string_pretty(result)?)
        .with_context(|| format!("writing {}", path.display()))
}

/// Default configuration, lopdf backend.
///
/// Returns the sorted markers, the written question files, and the document metadata.
pub fn extract_questions_from_pdf(
    pdf_path: &Path,
    output_dir: &Path,
) -> Result<(Vec<QuestionMatch>, Vec<PathBuf>, DocumentMetadata)> {
    let pipeline = Pipeline::new(&Config::default(), LopdfEngine)?;
    let result = pipeline.run(pdf_path, output_dir)?;
    Ok((result.matches, result.output_files, result.metadata))
}
