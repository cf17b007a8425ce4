// Advisory screening of submitted sources before they reach a container.
//
// This is a UX pre-check, not a security boundary; isolation is the
// container runtime's job. The policy is pluggable so deployments can tune
// or disable the rules.

use regex::Regex;

use crate::error::EngineError;

pub trait SourcePolicy: Send + Sync {
    /// Reject a file outright. The default accepts everything.
    fn inspect(&self, _file: &str, _source: &str) -> Result<(), EngineError> {
        Ok(())
    }

    /// Opportunity to rewrite a file before it is written to disk.
    fn rewrite(&self, _file: &str, source: String) -> String {
        source
    }
}

/// Accepts every file unchanged.
pub struct PermissivePolicy;

impl SourcePolicy for PermissivePolicy {}

/// Rejects sources matching any of a fixed set of deny patterns.
pub struct RegexDenyPolicy {
    rules: Vec<(Regex, &'static str)>,
}

impl RegexDenyPolicy {
    /// Patterns for the obvious host-escape attempts students stumble into.
    pub fn standard() -> Self {
        let rules = [
            (r"(?m)^\s*(?:import|from)\s+subprocess\b", "spawning subprocesses is not allowed"),
            (r"Runtime\.getRuntime\(\)\s*\.\s*exec", "spawning subprocesses is not allowed"),
            (r"\bsystem\s*\(", "spawning subprocesses is not allowed"),
            (r"/proc/self", "direct /proc access is not allowed"),
            (r":\(\)\s*\{\s*:\|:&\s*\}\s*;:", "fork bombs are not allowed"),
        ];
        Self {
            rules: rules
                .into_iter()
                .map(|(pattern, reason)| {
                    (Regex::new(pattern).expect("deny pattern is valid"), reason)
                })
                .collect(),
        }
    }
}

impl SourcePolicy for RegexDenyPolicy {
    fn inspect(&self, file: &str, source: &str) -> Result<(), EngineError> {
        for (pattern, reason) in &self.rules {
            if pattern.is_match(source) {
                return Err(EngineError::UnsafeSource {
                    file: file.to_string(),
                    reason: (*reason).to_string(),
                });
            }
        }
        Ok(())
    }
}
