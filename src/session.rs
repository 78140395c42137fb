//! Per-source view context persisted by the host: splitter sizes, search
//! toggles and marked lines.
//!
//! Two wire shapes are accepted on read: the JSON record written by
//! current versions, and the legacy colon-separated form
//! `S<top>:<bottom>:IC<0|1>:AR<0|1>:FF<0|1>`. Writes always produce JSON.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::{Config, RegexpType};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewContext {
    pub sizes: Vec<i64>,
    pub ignore_case: bool,
    pub auto_refresh: bool,
    pub follow_file: bool,
    pub use_regex: bool,
    pub inverse_regex: bool,
    pub use_boolean_combination: bool,
    pub marks: Vec<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
struct RawContext {
    #[serde(rename = "S", default)]
    sizes: Vec<i64>,
    #[serde(rename = "IC", default)]
    ignore_case: bool,
    #[serde(rename = "AR", default)]
    auto_refresh: bool,
    #[serde(rename = "FF", default)]
    follow_file: bool,
    #[serde(rename = "RE", default, skip_serializing_if = "Option::is_none")]
    use_regex: Option<bool>,
    #[serde(rename = "IR", default, skip_serializing_if = "Option::is_none")]
    inverse_regex: Option<bool>,
    #[serde(rename = "BC", default, skip_serializing_if = "Option::is_none")]
    use_boolean_combination: Option<bool>,
    #[serde(rename = "M", default)]
    marks: Vec<u64>,
}

static LEGACY_SIZES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"S(\d+):(\d+)").unwrap());
static LEGACY_CASE_REFRESH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"IC(\d+):AR(\d+)").unwrap());
static LEGACY_FOLLOW: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"AR(\d+):FF(\d+)").unwrap());

impl ViewContext {
    /// Context for a view that has never been persisted.
    pub fn with_defaults(config: &Config) -> Self {
        Self {
            sizes: vec![400, 100],
            ignore_case: false,
            auto_refresh: false,
            follow_file: false,
            use_regex: config.main_regexp_type == RegexpType::ExtendedRegexp,
            inverse_regex: false,
            use_boolean_combination: false,
            marks: Vec::new(),
        }
    }

    /// Parse either wire shape. Unparseable input degrades field by field
    /// to the defaults, never fails.
    pub fn decode(input: &str, config: &Config) -> Self {
        if input.trim_start().starts_with('{') {
            Self::from_json(input, config)
        } else {
            Self::from_legacy(input, config)
        }
    }

    /// Serialize to the compact JSON record.
    pub fn encode(&self) -> String {
        let raw = RawContext {
            sizes: self.sizes.clone(),
            ignore_case: self.ignore_case,
            auto_refresh: self.auto_refresh,
            follow_file: self.follow_file,
            use_regex: Some(self.use_regex),
            inverse_regex: Some(self.inverse_regex),
            use_boolean_combination: Some(self.use_boolean_combination),
            marks: self.marks.clone(),
        };
        serde_json::to_string(&raw).expect("view context serializes")
    }

    fn from_json(input: &str, config: &Config) -> Self {
        let raw: RawContext = match serde_json::from_str(input) {
            Ok(raw) => raw,
            Err(err) => {
                tracing::warn!("unparseable view context: {err}");
                return Self::with_defaults(config);
            }
        };
        let defaults = Self::with_defaults(config);
        Self {
            sizes: if raw.sizes.is_empty() {
                defaults.sizes
            } else {
                raw.sizes
            },
            ignore_case: raw.ignore_case,
            auto_refresh: raw.auto_refresh,
            follow_file: raw.follow_file,
            use_regex: raw.use_regex.unwrap_or(defaults.use_regex),
            inverse_regex: raw.inverse_regex.unwrap_or(false),
            use_boolean_combination: raw.use_boolean_combination.unwrap_or(false),
            marks: raw.marks,
        }
    }

    fn from_legacy(input: &str, config: &Config) -> Self {
        let mut context = Self::with_defaults(config);

        match LEGACY_SIZES.captures(input) {
            Some(captures) => {
                context.sizes = vec![
                    captures[1].parse().unwrap_or(400),
                    captures[2].parse().unwrap_or(100),
                ];
            }
            None => tracing::warn!("unrecognised view sizes: {input}"),
        }

        match LEGACY_CASE_REFRESH.captures(input) {
            Some(captures) => {
                context.ignore_case = &captures[1] == "1";
                context.auto_refresh = &captures[2] == "1";
            }
            None => tracing::warn!("unrecognised case/refresh flags: {input}"),
        }

        match LEGACY_FOLLOW.captures(input) {
            Some(captures) => context.follow_file = &captures[2] == "1",
            None => tracing::warn!("unrecognised follow flag: {input}"),
        }

        context
    }
}
