//! Repository overview shared with every agent of a run.

use std::fs;
use std::path::Path;

use tracing::debug;

use crate::tools::fs::ls;

/// Documentation files quoted into the overview, with their headings.
const CONTEXT_FILES: &[(&str, &str)] = &[
    ("README.md", "README.md"),
    ("CLAUDE.md", "CLAUDE.md (Project Instructions)"),
    ("AGENTS.md", "AGENTS.md (Project Instructions)"),
];

/// Top-level listing plus any README/instruction files found at `root`.
///
/// Unreadable parts are skipped; the result may be empty.
pub fn gather_repo_context(root: &Path) -> String {
    let mut parts = Vec::new();

    match ls(root, "*") {
        Ok(listing) => parts.push(format!(
            "## Repository Structure (top-level)\n```\n{listing}\n```"
        )),
        Err(err) => debug!(error = %err, "skipping top-level listing"),
    }

    for (file, heading) in CONTEXT_FILES {
        let path = root.join(file);
        let Ok(contents) = fs::read_to_string(&path) else {
            continue;
        };
        debug!(path = %path.display(), "including context file");
        parts.push(format!(
            "## {heading}\n```markdown\n{}\n```",
            contents.trim_end()
        ));
    }

    parts.join("\n\n")
}
