//! Retrieval reference catalog.
//!
//! Besides the chunk store, conversations can draw on additional named
//! references: cloned code repositories, scanned API surfaces, and whatever
//! else the YAML declaration file lists. The catalog is assembled once at
//! startup and is immutable for the process lifetime; assembly is
//! best-effort, so an unreachable repository degrades to a warning and the
//! remaining references still load (offline operation stays possible).

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::config::Config;
use crate::identity::GuideUser;
use crate::store::ChunkingStore;

/// A named, queryable knowledge source made available to conversations
/// and exported as a tool.
#[async_trait]
pub trait LlmReference: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// Answer a retrieval query with reference material (may be empty).
    async fn retrieve(&self, query: &str) -> Result<String>;
}

/// A non-fatal problem encountered while assembling the catalog.
#[derive(Debug, Clone)]
pub struct InitWarning {
    pub source: String,
    pub message: String,
}

// ============ Declaration file ============

#[derive(Debug, Deserialize)]
struct ReferencesFile {
    #[serde(default)]
    references: Vec<ReferenceDecl>,
}

#[derive(Debug, Deserialize)]
struct ReferenceDecl {
    name: String,
    description: String,
    #[serde(default)]
    repository: Option<RepositoryDecl>,
    #[serde(default)]
    api: Option<ApiDecl>,
}

#[derive(Debug, Deserialize)]
struct RepositoryDecl {
    url: String,
    #[serde(default)]
    branch: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiDecl {
    roots: Vec<PathBuf>,
}

// ============ Catalog ============

pub struct ReferenceCatalog {
    references: Vec<Arc<dyn LlmReference>>,
}

impl ReferenceCatalog {
    /// Build the catalog from the declaration file plus the chunk store.
    /// Per-reference failures become warnings, never errors.
    pub fn assemble(
        config: &Config,
        store: &ChunkingStore,
    ) -> (Self, Vec<InitWarning>) {
        let mut references: Vec<Arc<dyn LlmReference>> = Vec::new();
        let mut warnings = Vec::new();

        // The chunk store itself is always the first reference.
        references.push(Arc::new(StoreReference::new(
            store.clone(),
            config.retrieval.top_k,
        )));

        if let Some(path) = &config.content.references_file {
            match load_declarations(path) {
                Ok(decls) => {
                    let cache_root = repo_cache_root(&config.store.path);
                    for decl in decls {
                        match build_reference(&decl, &cache_root) {
                            Ok(reference) => references.push(reference),
                            Err(e) => {
                                warn!(reference = %decl.name, error = %e, "reference unavailable, skipping");
                                warnings.push(InitWarning {
                                    source: decl.name.clone(),
                                    message: e.to_string(),
                                });
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!(file = %path.display(), error = %e, "references file not loaded");
                    warnings.push(InitWarning {
                        source: path.display().to_string(),
                        message: e.to_string(),
                    });
                }
            }
        }

        info!(
            references = references.len(),
            warnings = warnings.len(),
            "reference catalog assembled"
        );
        (Self { references }, warnings)
    }

    pub fn references(&self) -> &[Arc<dyn LlmReference>] {
        &self.references
    }

    /// Extension seam for per-user scoping; currently every user sees the
    /// full set.
    pub fn references_for_user(&self, _user: Option<&GuideUser>) -> &[Arc<dyn LlmReference>] {
        &self.references
    }
}

fn load_declarations(path: &Path) -> Result<Vec<ReferenceDecl>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read references file: {}", path.display()))?;
    let file: ReferencesFile =
        serde_yaml::from_str(&raw).with_context(|| "Failed to parse references file")?;
    Ok(file.references)
}

fn build_reference(decl: &ReferenceDecl, cache_root: &Path) -> Result<Arc<dyn LlmReference>> {
    if let Some(repo) = &decl.repository {
        let local = clone_repository(&repo.url, repo.branch.as_deref(), cache_root)?;
        return Ok(Arc::new(RepositoryReference {
            name: decl.name.clone(),
            description: decl.description.clone(),
            local_path: local,
        }));
    }
    if let Some(api) = &decl.api {
        let index = scan_api_surface(&api.roots)?;
        return Ok(Arc::new(ApiSurfaceReference {
            name: decl.name.clone(),
            description: decl.description.clone(),
            index,
        }));
    }
    bail!("reference '{}' declares neither repository nor api", decl.name)
}

fn repo_cache_root(store_path: &Path) -> PathBuf {
    store_path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(".repo-cache")
}

// ============ Store-backed reference ============

/// Wraps the chunk store as a retrieval reference named `docs`.
pub struct StoreReference {
    store: ChunkingStore,
    top_k: usize,
}

impl StoreReference {
    pub fn new(store: ChunkingStore, top_k: usize) -> Self {
        Self { store, top_k }
    }
}

#[async_trait]
impl LlmReference for StoreReference {
    fn name(&self) -> &str {
        "docs"
    }

    fn description(&self) -> &str {
        "Ingested reference documentation"
    }

    async fn retrieve(&self, query: &str) -> Result<String> {
        let hits = self.store.search(query, self.top_k).await?;
        let mut out = String::new();
        for hit in hits {
            out.push_str(&format!("[{}] {}\n", hit.document_title, hit.text));
        }
        Ok(out)
    }
}

// ============ Cloned repository reference ============

struct RepositoryReference {
    name: String,
    description: String,
    local_path: PathBuf,
}

#[async_trait]
impl LlmReference for RepositoryReference {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn retrieve(&self, query: &str) -> Result<String> {
        Ok(grep_tree(&self.local_path, query, 40))
    }
}

fn clone_repository(url: &str, branch: Option<&str>, cache_root: &Path) -> Result<PathBuf> {
    let dest = cache_root.join(short_hash(url));
    if dest.join(".git").exists() {
        return Ok(dest);
    }

    std::fs::create_dir_all(cache_root)
        .with_context(|| format!("Failed to create cache directory: {}", cache_root.display()))?;

    let mut cmd = Command::new("git");
    cmd.args(["clone", "--depth", "1", "--single-branch"]);
    if let Some(branch) = branch {
        cmd.args(["--branch", branch]);
    }
    cmd.arg(url);
    cmd.arg(&dest);

    let output = cmd
        .output()
        .with_context(|| "Failed to execute 'git clone'. Is git installed?")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("git clone of {} failed: {}", url, stderr.trim());
    }

    Ok(dest)
}

fn short_hash(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())[..12].to_string()
}

/// Collect lines matching the query's terms across a file tree.
fn grep_tree(root: &Path, query: &str, max_lines: usize) -> String {
    let terms: Vec<String> = query
        .split_whitespace()
        .map(|t| t.to_lowercase())
        .collect();
    if terms.is_empty() {
        return String::new();
    }

    let mut out = String::new();
    let mut emitted = 0usize;

    for entry in WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
        if emitted >= max_lines {
            break;
        }
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if path.components().any(|c| c.as_os_str() == ".git") {
            continue;
        }
        let Ok(contents) = std::fs::read_to_string(path) else {
            continue;
        };
        let relative = path.strip_prefix(root).unwrap_or(path);
        for (line_no, line) in contents.lines().enumerate() {
            let lower = line.to_lowercase();
            if terms.iter().any(|t| lower.contains(t)) {
                out.push_str(&format!(
                    "{}:{}: {}\n",
                    relative.display(),
                    line_no + 1,
                    line.trim()
                ));
                emitted += 1;
                if emitted >= max_lines {
                    break;
                }
            }
        }
    }

    out
}

// ============ API surface reference ============

struct ApiSurfaceReference {
    name: String,
    description: String,
    /// Public item signatures, one per line, prefixed with their file.
    index: Vec<String>,
}

#[async_trait]
impl LlmReference for ApiSurfaceReference {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn retrieve(&self, query: &str) -> Result<String> {
        let terms: Vec<String> = query
            .split_whitespace()
            .map(|t| t.to_lowercase())
            .collect();
        let matching: Vec<&String> = self
            .index
            .iter()
            .filter(|line| {
                let lower = line.to_lowercase();
                terms.iter().any(|t| lower.contains(t))
            })
            .take(60)
            .collect();

        Ok(matching
            .iter()
            .map(|s| s.as_str())
            .collect::<Vec<_>>()
            .join("\n"))
    }
}

/// Scan source roots for public item signatures.
fn scan_api_surface(roots: &[PathBuf]) -> Result<Vec<String>> {
    const PUBLIC_MARKERS: [&str; 6] = [
        "pub fn ",
        "pub async fn ",
        "pub struct ",
        "pub enum ",
        "pub trait ",
        "pub type ",
    ];

    let mut index = Vec::new();
    let mut any_root = false;

    for root in roots {
        if !root.is_dir() {
            continue;
        }
        any_root = true;
        for entry in WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
            let path = entry.path();
            if !entry.file_type().is_file()
                || path.extension().and_then(|e| e.to_str()) != Some("rs")
            {
                continue;
            }
            let Ok(contents) = std::fs::read_to_string(path) else {
                continue;
            };
            let relative = path.strip_prefix(root).unwrap_or(path);
            for line in contents.lines() {
                let trimmed = line.trim_start();
                if PUBLIC_MARKERS.iter().any(|m| trimmed.starts_with(m)) {
                    index.push(format!(
                        "{}: {}",
                        relative.display(),
                        trimmed.trim_end_matches('{').trim_end()
                    ));
                }
            }
        }
    }

    if !any_root {
        bail!("no API surface roots exist");
    }

    Ok(index)
}
