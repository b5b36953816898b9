use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub paths: Paths,
    #[serde(default)]
    pub limits: Limits,
    #[serde(default)]
    pub matching: Matching,
    #[serde(default)]
    pub segmenting: Segmenting,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub output: Output,
    #[serde(default)]
    pub logging: Logging,
    #[serde(default)]
    pub debug: Debug,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config: {}", path.display()))?;
        let cfg: Config = toml::from_str(&raw).with_context(|| "parsing TOML")?;
        Ok(cfg)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Paths {
    pub out_dir: String,
}
impl Default for Paths {
    fn default() -> Self {
        Self {
            out_dir: "out".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Limits {
    pub max_input_file_bytes: u64,
    pub max_input_pages: u32,
}
impl Default for Limits {
    fn default() -> Self {
        Self {
            max_input_file_bytes: 512 * 1024 * 1024,
            max_input_pages: 2000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Matching {
    pub patterns: Vec<String>,
    pub case_insensitive: bool,
    pub normalize_unicode: bool,
}
impl Default for Matching {
    fn default() -> Self {
        Self {
            patterns: vec![
                r"^(\d+)[\.\)]\s*".into(),
                r"^Q\.?\s*(\d+)[\.\):]?\s*".into(),
                r"^Question\s*(\d+)[\.\):]?\s*".into(),
                r"^Problem\s*(\d+)[\.\):]?\s*".into(),
                r"^\[(\d+)\]".into(),
                r"^Part\s*([A-Z]|\d+)[\.\):]?\s*".into(),
            ],
            case_insensitive: true,
            normalize_unicode: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segmenting {
    pub top_margin: f64,
    pub bottom_gap: f64,
}
impl Default for Segmenting {
    fn default() -> Self {
        Self {
            top_margin: 5.0,
            bottom_gap: 2.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    pub course_patterns: Vec<String>,
}
impl Default for Metadata {
    fn default() -> Self {
        Self {
            course_patterns: vec![
                r"Course[:\s]+(.+)".into(),
                r"Subject[:\s]+(.+)".into(),
                r"Paper[:\s]+(.+)".into(),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Output {
    pub dir_prefix: String,
    pub file_prefix: String,
    pub max_name_len: usize,
    pub write_report_json: bool,
    pub report_filename: String,
}
impl Default for Output {
    fn default() -> Self {
        Self {
            dir_prefix: "questions".into(),
            file_prefix: "question".into(),
            max_name_len: 50,
            write_report_json: true,
            report_filename: "report.json".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Logging {
    pub level: String,
    pub json: bool,
    pub write_to_file: bool,
    pub file_path: String,
}
impl Default for Logging {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
            write_to_file: false,
            file_path: "".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Debug {
    pub dump_effective_config: bool,
}
impl Default for Debug {
    fn default() -> Self {
        Self {
            dump_effective_config: false,
        }
    }
}
