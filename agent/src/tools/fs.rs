//! Read-only workspace tools: `ls`, `read_file` and `grep`.
//!
//! Every handler is rooted at a workspace directory and never resolves a path
//! outside it, including through symlinks. All three are concurrency-safe.
//! Traversal skips a fixed list of build and VCS directories; `.gitignore`
//! files are not consulted.

use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use serde_json::{Value, json};
use walkdir::WalkDir;

use crate::tools::registry::{ToolHandler, ToolSpec};

/// Maximum entries returned by `ls` and matches returned by `grep`.
pub const RESULT_LIMIT: usize = 100;

const IGNORED_NAMES: &[&str] = &[
    ".git",
    "target",
    "node_modules",
    "__pycache__",
    ".venv",
    "venv",
    ".pytest_cache",
    ".mypy_cache",
    ".DS_Store",
];

/// Build the three workspace tool specs rooted at `root`.
pub fn workspace_tools(root: impl Into<PathBuf>) -> Result<Vec<ToolSpec>> {
    let root = Arc::new(root.into());
    Ok(vec![
        ToolSpec::new(
            "ls",
            "List paths in the workspace matching a glob. `*` and `?` stay within one path \
             segment, `**/` spans directories, `[abc]` and `[!abc]` match one character. \
             Examples: `*`, `.*`, `**/*`, `src/**/*.rs`, `[A-Z]*.md`.",
            json!({
                "type": "object",
                "required": ["glob"],
                "properties": {
                    "glob": {"type": "string", "description": "Glob relative to the workspace root"}
                }
            }),
            Arc::new(LsTool { root: root.clone() }),
        )?
        .concurrency_safe(),
        ToolSpec::new(
            "read_file",
            "Read a file relative to the workspace root. Lines are numbered; pass from_line \
             and to_line (1-indexed, inclusive) to read a range.",
            json!({
                "type": "object",
                "required": ["path"],
                "properties": {
                    "path": {"type": "string"},
                    "from_line": {"type": "integer", "minimum": 1},
                    "to_line": {"type": "integer", "minimum": 1}
                }
            }),
            Arc::new(ReadFileTool { root: root.clone() }),
        )?
        .concurrency_safe(),
        ToolSpec::new(
            "grep",
            "Search file contents with a regular expression. Prints `path:line:text` for each \
             match. Optionally restrict to a sub-path and a file-name glob.",
            json!({
                "type": "object",
                "required": ["pattern"],
                "properties": {
                    "pattern": {"type": "string"},
                    "path": {"type": "string", "default": "."},
                    "file_pattern": {"type": "string", "default": "*"}
                }
            }),
            Arc::new(GrepTool { root }),
        )?
        .concurrency_safe(),
    ])
}

#[derive(Debug, Deserialize)]
struct LsArgs {
    glob: String,
}

#[derive(Debug, Deserialize)]
struct ReadFileArgs {
    path: String,
    from_line: Option<usize>,
    to_line: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct GrepArgs {
    pattern: String,
    #[serde(default = "default_grep_path")]
    path: String,
    #[serde(default = "default_file_pattern")]
    file_pattern: String,
}

fn default_grep_path() -> String {
    ".".to_string()
}

fn default_file_pattern() -> String {
    "*".to_string()
}

struct LsTool {
    root: Arc<PathBuf>,
}

#[async_trait]
impl ToolHandler for LsTool {
    async fn invoke(&self, arguments: Value) -> Result<String> {
        let args: LsArgs = serde_json::from_value(arguments).context("decode ls arguments")?;
        let root = self.root.clone();
        blocking(move || ls(&root, &args.glob)).await
    }
}

struct ReadFileTool {
    root: Arc<PathBuf>,
}

#[async_trait]
impl ToolHandler for ReadFileTool {
    async fn invoke(&self, arguments: Value) -> Result<String> {
        let args: ReadFileArgs =
            serde_json::from_value(arguments).context("decode read_file arguments")?;
        let root = self.root.clone();
        blocking(move || read_file(&root, &args.path, args.from_line, args.to_line)).await
    }
}

struct GrepTool {
    root: Arc<PathBuf>,
}

#[async_trait]
impl ToolHandler for GrepTool {
    async fn invoke(&self, arguments: Value) -> Result<String> {
        let args: GrepArgs = serde_json::from_value(arguments).context("decode grep arguments")?;
        let root = self.root.clone();
        blocking(move || grep(&root, &args.pattern, &args.path, &args.file_pattern)).await
    }
}

async fn blocking<F>(work: F) -> Result<String>
where
    F: FnOnce() -> Result<String> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .context("workspace tool task failed")?
}

/// List workspace paths matching `glob`, sorted, capped at [`RESULT_LIMIT`].
pub fn ls(root: &Path, glob: &str) -> Result<String> {
    let matcher = glob_to_regex(glob.trim_start_matches("./"))?;
    let mut matches: Vec<String> = walk(root)
        .filter_map(|entry| relative_display(root, entry.path()))
        .filter(|rel| matcher.is_match(rel))
        .collect();
    matches.sort();

    if matches.is_empty() {
        return Ok(format!("No paths matched '{glob}'"));
    }
    if matches.len() > RESULT_LIMIT {
        return Ok(format!(
            "found {} results. Showing first {RESULT_LIMIT}:\n{}",
            matches.len(),
            matches[..RESULT_LIMIT].join("\n")
        ));
    }
    Ok(matches.join("\n"))
}

/// Read a workspace file with `NNNN→` line numbers, optionally a 1-indexed
/// inclusive line range.
pub fn read_file(
    root: &Path,
    path: &str,
    from_line: Option<usize>,
    to_line: Option<usize>,
) -> Result<String> {
    let full = resolve(root, path)?;
    let contents =
        fs::read_to_string(&full).with_context(|| format!("read {}", full.display()))?;
    let lines: Vec<&str> = contents.lines().collect();

    let start = from_line.unwrap_or(1).max(1);
    let end = to_line.unwrap_or(lines.len()).min(lines.len());
    if lines.is_empty() {
        return Ok(String::new());
    }
    if start > lines.len() {
        bail!(
            "from_line {start} is past the end of {path} ({} lines)",
            lines.len()
        );
    }
    if end < start {
        bail!("to_line {end} is before from_line {start}");
    }

    Ok(lines[start - 1..end]
        .iter()
        .enumerate()
        .map(|(offset, line)| format!("{:4}→{}", start + offset, line.trim_end()))
        .collect::<Vec<_>>()
        .join("\n"))
}

/// Regex search over workspace files, printing `path:line:text`.
pub fn grep(root: &Path, pattern: &str, path: &str, file_pattern: &str) -> Result<String> {
    let regex = Regex::new(pattern).with_context(|| format!("invalid pattern '{pattern}'"))?;
    let name_matcher = glob_to_regex(file_pattern)?;
    let base = resolve(root, path)?;

    let files: Vec<PathBuf> = if base.is_file() {
        vec![base]
    } else {
        // Symlinked files are skipped along with symlinked directories.
        walk(&base)
            .filter(|entry| entry.file_type().is_file())
            .map(walkdir::DirEntry::into_path)
            .collect()
    };

    let mut hits = Vec::new();
    for file in files {
        let name_matches = file
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name_matcher.is_match(name));
        if !name_matches {
            continue;
        }
        // Binary and non-UTF-8 files are skipped.
        let Ok(contents) = fs::read_to_string(&file) else {
            continue;
        };
        let Some(rel) = relative_display(root, &file) else {
            continue;
        };
        for (index, line) in contents.lines().enumerate() {
            if regex.is_match(line) {
                hits.push(format!("{rel}:{}:{}", index + 1, line.trim_end()));
            }
        }
    }

    if hits.is_empty() {
        return Ok(format!("No matches found for pattern '{pattern}'"));
    }
    if hits.len() > RESULT_LIMIT {
        return Ok(format!(
            "Found {} matches (showing first {RESULT_LIMIT}):\n{}",
            hits.len(),
            hits[..RESULT_LIMIT].join("\n")
        ));
    }
    Ok(hits.join("\n"))
}

/// Join `path` onto `root`, rejecting absolute paths, `..` segments and
/// symlinks whose target lies outside the workspace.
fn resolve(root: &Path, path: &str) -> Result<PathBuf> {
    let candidate = Path::new(path);
    for component in candidate.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                bail!("path '{path}' escapes the workspace");
            }
        }
    }
    let joined = root.join(candidate);
    let real_root = root
        .canonicalize()
        .with_context(|| format!("resolve workspace {}", root.display()))?;
    let real = joined
        .canonicalize()
        .with_context(|| format!("resolve '{path}'"))?;
    if !real.starts_with(&real_root) {
        bail!("path '{path}' escapes the workspace");
    }
    Ok(joined)
}

/// Entries below `base`, sorted per directory. Symlinks are reported but
/// never followed.
fn walk(base: &Path) -> impl Iterator<Item = walkdir::DirEntry> {
    WalkDir::new(base)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            entry
                .file_name()
                .to_str()
                .is_none_or(|name| !IGNORED_NAMES.contains(&name) && !name.ends_with(".pyc"))
        })
        .filter_map(|entry| entry.ok())
}

fn relative_display(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Option<Vec<&str>> = rel.components().map(|c| c.as_os_str().to_str()).collect();
    Some(parts?.join("/"))
}

/// Translate a glob into an anchored regex over `/`-separated relative paths.
///
/// Wildcards at the start of a segment do not match a leading dot.
fn glob_to_regex(glob: &str) -> Result<Regex> {
    const SEGMENT: &str = "[^/.][^/]*";

    let chars: Vec<char> = glob.chars().collect();
    let mut pattern = String::from("^");
    let mut segment_start = true;
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            '*' if chars.get(i + 1) == Some(&'*') => {
                if chars.get(i + 2) == Some(&'/') {
                    pattern.push_str(&format!("(?:{SEGMENT}/)*"));
                    i += 3;
                    continue;
                }
                pattern.push_str(&format!("(?:{SEGMENT}(?:/{SEGMENT})*)?"));
                i += 2;
                segment_start = false;
                continue;
            }
            '*' if segment_start => pattern.push_str(&format!("(?:{SEGMENT})?")),
            '*' => pattern.push_str("[^/]*"),
            '[' => {
                if let Some(close) = class_end(&chars, i) {
                    pattern.push_str(&class_to_regex(&chars[i + 1..close]));
                    segment_start = false;
                    i = close + 1;
                    continue;
                }
                pattern.push_str(r"\[");
            }
            '?' if segment_start => pattern.push_str("[^/.]"),
            '?' => pattern.push_str("[^/]"),
            other => pattern.push_str(&regex::escape(&other.to_string())),
        }
        segment_start = c == '/';
        i += 1;
    }
    pattern.push('$');
    Regex::new(&pattern).with_context(|| format!("invalid glob '{glob}'"))
}

/// Index of the `]` closing a non-empty class opened at `open`.
fn class_end(chars: &[char], open: usize) -> Option<usize> {
    chars[open + 1..]
        .iter()
        .position(|&c| c == ']')
        .map(|offset| open + 1 + offset)
        .filter(|&close| close > open + 1)
}

/// `[abc]`, `[a-z]` and negated `[!abc]` classes. Negated classes never match `/`.
fn class_to_regex(body: &[char]) -> String {
    let (negated, body) = match body.first() {
        Some('!' | '^') => (true, &body[1..]),
        _ => (false, body),
    };
    let mut class = String::from(if negated { "[^/" } else { "[" });
    for &c in body {
        if matches!(c, '\\' | '[' | ']' | '^' | '&' | '~') {
            class.push('\\');
        }
        class.push(c);
    }
    class.push(']');
    class
}
