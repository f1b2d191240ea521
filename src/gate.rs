//! Credit gate: whether Z.AI-family tools and clients may be built.
//!
//! Decided once per process from the first readable config document.
//! Anything unexpected (missing file, unreadable file, bad YAML, a
//! non-boolean flag) means "disabled".

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use serde_yaml::Value;
use tracing::{debug, info};

use crate::error::Error;
use crate::Result;

/// Config key admitting the Z.AI web tools.
pub const SEARCH_KEY: &str = "tools.enable_zai_search";
/// Config key admitting the Z.AI chat client.
pub const LLM_KEY: &str = "tools.enable_zai_llm";

static DECISION: OnceLock<CreditGate> = OnceLock::new();

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CreditGate {
    zai_search: bool,
    zai_llm: bool,
}

impl CreditGate {
    pub fn new(zai_search: bool, zai_llm: bool) -> Self {
        Self { zai_search, zai_llm }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    /// Read the first candidate that can be read at all.
    pub fn resolve(candidates: &[PathBuf]) -> Self {
        for path in candidates {
            match std::fs::read_to_string(path) {
                Ok(content) => {
                    let gate = Self::from_document(&content);
                    debug!(path = %path.display(), ?gate, "credit gate resolved");
                    return gate;
                }
                Err(e) => debug!(path = %path.display(), error = %e, "credit gate: skipping config"),
            }
        }
        Self::disabled()
    }

    /// Decide from a YAML (or JSON) document. Accepts `tools.enable_*`
    /// or the same flags at the top level.
    pub fn from_document(content: &str) -> Self {
        let Ok(doc) = serde_yaml::from_str::<Value>(content) else {
            return Self::disabled();
        };
        Self {
            zai_search: flag(&doc, "enable_zai_search"),
            zai_llm: flag(&doc, "enable_zai_llm"),
        }
    }

    /// Any Z.AI-family endpoint permitted.
    pub fn zai_permitted(&self) -> bool {
        self.zai_search || self.zai_llm
    }

    pub fn search_enabled(&self) -> bool {
        self.zai_search
    }

    pub fn llm_enabled(&self) -> bool {
        self.zai_llm
    }

    pub fn require_search(&self) -> Result<()> {
        if self.zai_search {
            Ok(())
        } else {
            Err(Error::CreditGate { key: SEARCH_KEY })
        }
    }

    pub fn require_llm(&self) -> Result<()> {
        if self.zai_llm {
            Ok(())
        } else {
            Err(Error::CreditGate { key: LLM_KEY })
        }
    }
}

fn flag(doc: &Value, name: &str) -> bool {
    let nested = doc.get("tools").and_then(|tools| tools.get(name));
    let top = doc.get(name);
    matches!(nested.or(top), Some(Value::Bool(true)))
}

/// Fix the process-wide decision. Later calls keep the first value.
pub fn init(gate: CreditGate) -> CreditGate {
    let decided = *DECISION.get_or_init(|| gate);
    if decided.zai_permitted() {
        info!(search = decided.zai_search, llm = decided.zai_llm, "Z.AI endpoints permitted");
    }
    decided
}

/// Resolve from config candidates and fix the decision.
pub fn init_from(candidates: &[PathBuf]) -> CreditGate {
    init(CreditGate::resolve(candidates))
}

/// The process-wide decision; disabled until [`init`] runs.
pub fn current() -> CreditGate {
    DECISION.get().copied().unwrap_or_default()
}

/// Convenience for a single explicit file.
pub fn resolve_file(path: &Path) -> CreditGate {
    CreditGate::resolve(&[path.to_path_buf()])
}
