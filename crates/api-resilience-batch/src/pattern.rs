use regex::Regex;

/// A batchable endpoint: an exact path or a glob where `*` matches any run
/// of characters (including `/`).
#[derive(Debug, Clone)]
pub struct EndpointPattern {
    raw: String,
    regex: Regex,
}

impl EndpointPattern {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        let body = pattern
            .split('*')
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join(".*");
        Ok(Self {
            raw: pattern.to_string(),
            regex: Regex::new(&format!("^{body}$"))?,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn matches(&self, endpoint: &str) -> bool {
        self.regex.is_match(endpoint)
    }
}

/// Compiles a list of patterns, reporting the first invalid one.
pub(crate) fn compile_all(patterns: &[String]) -> Result<Vec<EndpointPattern>, (String, regex::Error)> {
    patterns
        .iter()
        .map(|p| EndpointPattern::new(p).map_err(|e| (p.clone(), e)))
        .collect()
}
