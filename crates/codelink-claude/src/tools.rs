//! Sandboxed tool execution scoped to a project root.
//!
//! Every operation returns `Result<String, String>` at the public boundary:
//! a textual result for the model, or a textual error that the relay records
//! on the ToolCall and feeds back as tool output. Nothing here panics or
//! propagates past [`ToolExecutor::execute`].

use anyhow::{anyhow, bail, Context, Result};
use regex::Regex;
use serde_json::Value;
use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::client::ToolDefinition;

/// Upper bound on entries returned by `list_files`
const MAX_LIST_ENTRIES: usize = 200;
/// Upper bound on matches returned by `search_files`
const MAX_SEARCH_MATCHES: usize = 100;

/// Shell patterns that are rejected before a process is ever spawned
const BLOCKED_COMMAND_PATTERNS: &[&str] = &[
    r"rm\s+-[a-zA-Z]*[rf]",
    r"\bsudo\b",
    r"\bsu\s",
    r"\bchmod\b",
    r"\bchown\b",
    r"\bmkfs",
    r">\s*/dev/",
    r"\bdd\b.*\bof=/dev/",
];

/// Limits and allow-lists for tool execution
#[derive(Debug, Clone)]
pub struct ToolConfig {
    /// Extensions (without the dot) that `write_file` may create or modify
    pub allowed_extensions: Vec<String>,
    /// Ceiling on file size for `read_file` and `search_files`, in bytes
    pub max_file_size: u64,
    /// Wall-clock limit for `execute_command`
    pub command_timeout: Duration,
    /// Cap on combined stdout/stderr captured from a command
    pub max_output_bytes: usize,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            allowed_extensions: [
                "rs", "toml", "md", "txt", "json", "yaml", "yml", "js", "jsx", "ts", "tsx",
                "css", "html", "sh", "py", "sql", "env", "gitignore", "lock",
            ]
            .iter()
            .map(|ext| ext.to_string())
            .collect(),
            max_file_size: 10 * 1024 * 1024,
            command_timeout: Duration::from_secs(30),
            max_output_bytes: 1024 * 1024,
        }
    }
}

/// Executes model-requested tools inside a project root
pub struct ToolExecutor {
    config: ToolConfig,
    blocked: Vec<Regex>,
}

impl Default for ToolExecutor {
    fn default() -> Self {
        Self::new(ToolConfig::default())
    }
}

impl ToolExecutor {
    pub fn new(config: ToolConfig) -> Self {
        let blocked = BLOCKED_COMMAND_PATTERNS
            .iter()
            .map(|pattern| Regex::new(pattern).expect("Invalid blocked-command pattern"))
            .collect();
        Self { config, blocked }
    }

    /// Run one tool. Failures come back as the `Err` string, never as a
    /// panic or a propagated error.
    pub async fn execute(
        &self,
        name: &str,
        input: &Value,
        project_root: &Path,
    ) -> std::result::Result<String, String> {
        debug!(tool = name, "Executing tool");
        let outcome = match name {
            "read_file" => self.read_file(input, project_root).await,
            "write_file" => self.write_file(input, project_root).await,
            "list_files" => self.list_files(input, project_root),
            "search_files" => self.search_files(input, project_root),
            "execute_command" => self.execute_command(input, project_root).await,
            "git_status" => self.git(project_root, &["status", "--porcelain=v1", "-b"]).await,
            "git_diff" => self.git_diff(input, project_root).await,
            "git_add" => self.git_add(input, project_root).await,
            "git_commit" => self.git_commit(input, project_root).await,
            "git_log" => self.git_log(input, project_root).await,
            other => Err(anyhow!("Unknown tool: {}", other)),
        };

        outcome.map_err(|e| {
            let error = format!("{:#}", e);
            warn!(tool = name, error = %error, "Tool execution failed");
            error
        })
    }

    async fn read_file(&self, input: &Value, root: &Path) -> Result<String> {
        let path = self.resolve_path(root, str_arg(input, "path")?)?;
        let metadata = tokio::fs::metadata(&path)
            .await
            .with_context(|| format!("Cannot access {}", path.display()))?;
        if metadata.len() > self.config.max_file_size {
            bail!(
                "File is {} bytes, larger than the {} byte limit",
                metadata.len(),
                self.config.max_file_size
            );
        }
        tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Cannot read {}", path.display()))
    }

    async fn write_file(&self, input: &Value, root: &Path) -> Result<String> {
        let relative = str_arg(input, "path")?;
        let content = str_arg(input, "content")?;
        let path = self.resolve_path(root, relative)?;

        // Dotfiles like `.gitignore` have no extension; the name without
        // its leading dot is matched against the allow-list instead.
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
            .or_else(|| {
                path.file_name()
                    .and_then(|name| name.to_str())
                    .and_then(|name| name.strip_prefix('.'))
                    .map(|name| name.to_ascii_lowercase())
            })
            .unwrap_or_default();
        if !self.config.allowed_extensions.iter().any(|allowed| *allowed == extension) {
            bail!("File extension '{}' is not allowed for writes", extension);
        }

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Cannot create {}", parent.display()))?;
        }
        tokio::fs::write(&path, content)
            .await
            .with_context(|| format!("Cannot write {}", path.display()))?;
        Ok(format!("Wrote {} bytes to {}", content.len(), relative))
    }

    fn list_files(&self, input: &Value, root: &Path) -> Result<String> {
        let base = self.resolve_path(root, opt_str_arg(input, "path").unwrap_or("."))?;
        let pattern = checked_pattern(input, "pattern", "*")?;
        let full_pattern = base.join(pattern);
        let full_pattern = full_pattern
            .to_str()
            .ok_or_else(|| anyhow!("Non-UTF-8 path"))?;

        let mut entries = Vec::new();
        let mut truncated = false;
        for entry in glob::glob(full_pattern).context("Invalid glob pattern")? {
            let path = entry.context("Cannot read directory entry")?;
            let relative = path.strip_prefix(root).unwrap_or(&path);
            let mut display = relative.display().to_string();
            if path.is_dir() {
                display.push('/');
            }
            entries.push(display);
            if entries.len() >= MAX_LIST_ENTRIES {
                truncated = true;
                break;
            }
        }

        if entries.is_empty() {
            Ok("No files matched".to_string())
        } else {
            entries.sort();
            if truncated {
                entries.push(format!("... truncated at {} entries", MAX_LIST_ENTRIES));
            }
            Ok(entries.join("\n"))
        }
    }

    fn search_files(&self, input: &Value, root: &Path) -> Result<String> {
        let pattern = str_arg(input, "pattern")?;
        let regex = Regex::new(pattern).context("Invalid search pattern")?;
        let base = self.resolve_path(root, opt_str_arg(input, "path").unwrap_or("."))?;
        let file_pattern = base.join(checked_pattern(input, "file_pattern", "**/*")?);
        let file_pattern = file_pattern
            .to_str()
            .ok_or_else(|| anyhow!("Non-UTF-8 path"))?;

        let mut matches = Vec::new();
        'files: for entry in glob::glob(file_pattern).context("Invalid file pattern")? {
            let path = match entry {
                Ok(path) => path,
                Err(_) => continue,
            };
            if !path.is_file() || path.components().any(|c| c.as_os_str() == ".git") {
                continue;
            }
            if path
                .metadata()
                .map(|m| m.len() > self.config.max_file_size)
                .unwrap_or(true)
            {
                continue;
            }
            // Binary files fail UTF-8 decoding and are skipped
            let Ok(content) = std::fs::read_to_string(&path) else {
                continue;
            };
            let relative = path.strip_prefix(root).unwrap_or(&path).display().to_string();
            for (line_number, line) in content.lines().enumerate() {
                if regex.is_match(line) {
                    matches.push(format!("{}:{}: {}", relative, line_number + 1, line.trim()));
                    if matches.len() >= MAX_SEARCH_MATCHES {
                        matches.push(format!("... truncated at {} matches", MAX_SEARCH_MATCHES));
                        break 'files;
                    }
                }
            }
        }

        if matches.is_empty() {
            Ok(format!("No matches for '{}'", pattern))
        } else {
            Ok(matches.join("\n"))
        }
    }

    async fn execute_command(&self, input: &Value, root: &Path) -> Result<String> {
        let command = str_arg(input, "command")?;
        for pattern in &self.blocked {
            if pattern.is_match(command) {
                bail!("Command blocked by safety policy: matches '{}'", pattern.as_str());
            }
        }

        let mut child = Command::new("bash")
            .arg("-c")
            .arg(command)
            .current_dir(root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .context("Cannot spawn command")?;

        let mut stdout_pipe = child.stdout.take().context("Cannot capture stdout")?;
        let mut stderr_pipe = child.stderr.take().context("Cannot capture stderr")?;
        let cap = self.config.max_output_bytes;

        // Pipes are drained incrementally; a child that floods its output is
        // killed as soon as the cap is crossed, not after it exits.
        let (status, stdout, stderr) =
            tokio::time::timeout(self.config.command_timeout, async {
                let (stdout, stderr) = tokio::try_join!(
                    read_capped(&mut stdout_pipe, cap),
                    read_capped(&mut stderr_pipe, cap)
                )?;
                if stdout.len() + stderr.len() > cap {
                    bail!("Command output exceeded the {} byte limit", cap);
                }
                let status = child.wait().await.context("Command failed to complete")?;
                anyhow::Ok((status, stdout, stderr))
            })
            .await
            .map_err(|_| {
                anyhow!(
                    "Command timed out after {} seconds",
                    self.config.command_timeout.as_secs()
                )
            })??;

        let stdout = String::from_utf8_lossy(&stdout);
        let stderr = String::from_utf8_lossy(&stderr);

        if !status.success() {
            bail!(
                "Command exited with {}: {}",
                status.code().map_or("signal".to_string(), |c| c.to_string()),
                if stderr.trim().is_empty() { stdout.trim() } else { stderr.trim() }
            );
        }

        let mut combined = stdout.into_owned();
        if !stderr.trim().is_empty() {
            combined.push_str("\n[stderr]\n");
            combined.push_str(&stderr);
        }
        if combined.trim().is_empty() {
            combined = "(no output)".to_string();
        }
        Ok(combined)
    }

    async fn git_diff(&self, input: &Value, root: &Path) -> Result<String> {
        let mut args = vec!["diff"];
        if input.get("staged").and_then(Value::as_bool).unwrap_or(false) {
            args.push("--cached");
        }
        if let Some(file) = opt_str_arg(input, "file") {
            args.push("--");
            args.push(file);
        }
        let diff = self.git(root, &args).await?;
        if diff.trim().is_empty() {
            Ok("No changes".to_string())
        } else {
            Ok(diff)
        }
    }

    async fn git_add(&self, input: &Value, root: &Path) -> Result<String> {
        let files: Vec<&str> = match input.get("files") {
            Some(Value::Array(files)) => files
                .iter()
                .map(|f| f.as_str().ok_or_else(|| anyhow!("'files' entries must be strings")))
                .collect::<Result<_>>()?,
            Some(Value::String(file)) => vec![file.as_str()],
            None => vec!["."],
            Some(_) => bail!("'files' must be a string or an array of strings"),
        };
        let mut args = vec!["add", "--"];
        args.extend(files.iter().copied());
        self.git(root, &args).await?;
        Ok(format!("Staged: {}", files.join(", ")))
    }

    async fn git_commit(&self, input: &Value, root: &Path) -> Result<String> {
        let message = str_arg(input, "message")?;
        self.git(root, &["commit", "-m", message]).await
    }

    async fn git_log(&self, input: &Value, root: &Path) -> Result<String> {
        let count = input.get("count").and_then(Value::as_u64).unwrap_or(10);
        let count = count.min(100).to_string();
        self.git(
            root,
            &[
                "log",
                "-n",
                &count,
                "--pretty=format:%h %ad %an %s",
                "--date=short",
            ],
        )
        .await
    }

    async fn git(&self, root: &Path, args: &[&str]) -> Result<String> {
        let output = Command::new("git")
            .args(args)
            .current_dir(root)
            .stdin(Stdio::null())
            .output()
            .await
            .context("Cannot run git")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("git {} failed: {}", args[0], stderr.trim());
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Resolve a path argument against the project root without touching the
    /// filesystem. `..` segments are normalized lexically; anything that
    /// would land outside the root is rejected before any I/O happens.
    fn resolve_path(&self, root: &Path, relative: &str) -> Result<PathBuf> {
        let mut resolved = root.to_path_buf();
        for component in Path::new(relative).components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                Component::ParentDir => {
                    if resolved == root || !resolved.pop() {
                        bail!("Path escapes the project root: {}", relative);
                    }
                }
                Component::RootDir | Component::Prefix(_) => {
                    bail!("Absolute paths are not allowed: {}", relative);
                }
            }
        }
        if !resolved.starts_with(root) {
            bail!("Path escapes the project root: {}", relative);
        }
        Ok(resolved)
    }
}

/// Read a pipe to EOF, failing as soon as more than `cap` bytes arrive
async fn read_capped(reader: &mut (impl AsyncRead + Unpin), cap: usize) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader
            .read(&mut chunk)
            .await
            .context("Cannot read command output")?;
        if n == 0 {
            return Ok(buffer);
        }
        if buffer.len() + n > cap {
            bail!("Command output exceeded the {} byte limit", cap);
        }
        buffer.extend_from_slice(&chunk[..n]);
    }
}

/// Glob patterns are applied under an already-resolved base, but a pattern
/// carrying `..` or absolute components could still walk out of the root,
/// so only plain relative components are accepted.
fn checked_pattern<'a>(input: &'a Value, key: &str, default: &'a str) -> Result<&'a str> {
    let pattern = opt_str_arg(input, key).unwrap_or(default);
    for component in Path::new(pattern).components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            _ => bail!("Pattern escapes the project root: {}", pattern),
        }
    }
    Ok(pattern)
}

fn str_arg<'a>(input: &'a Value, key: &str) -> Result<&'a str> {
    input
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("Missing required argument '{}'", key))
}

fn opt_str_arg<'a>(input: &'a Value, key: &str) -> Option<&'a str> {
    input.get(key).and_then(Value::as_str)
}

/// Definitions for every tool the executor understands, advertised to the
/// model on each turn.
pub fn tool_definitions() -> Vec<ToolDefinition> {
    fn tool(name: &str, description: &str, input_schema: Value) -> ToolDefinition {
        ToolDefinition {
            name: name.to_string(),
            description: description.to_string(),
            input_schema,
        }
    }

    vec![
        tool(
            "read_file",
            "Read a file relative to the project root",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "File path relative to the project root" }
                },
                "required": ["path"]
            }),
        ),
        tool(
            "write_file",
            "Write content to a file relative to the project root",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "File path relative to the project root" },
                    "content": { "type": "string", "description": "Full file content" }
                },
                "required": ["path", "content"]
            }),
        ),
        tool(
            "list_files",
            "List files in a directory, optionally filtered by a glob pattern",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "Directory relative to the project root, defaults to '.'" },
                    "pattern": { "type": "string", "description": "Glob pattern, defaults to '*'" }
                }
            }),
        ),
        tool(
            "search_files",
            "Search file contents with a regular expression",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "pattern": { "type": "string", "description": "Regular expression to match against lines" },
                    "path": { "type": "string", "description": "Directory relative to the project root, defaults to '.'" },
                    "file_pattern": { "type": "string", "description": "Glob filter for files, defaults to '**/*'" }
                },
                "required": ["pattern"]
            }),
        ),
        tool(
            "execute_command",
            "Run a shell command in the project root",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "command": { "type": "string", "description": "Shell command to run" }
                },
                "required": ["command"]
            }),
        ),
        tool(
            "git_status",
            "Show the working tree status",
            serde_json::json!({ "type": "object", "properties": {} }),
        ),
        tool(
            "git_diff",
            "Show unstaged or staged changes",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "staged": { "type": "boolean", "description": "Show staged changes instead of unstaged" },
                    "file": { "type": "string", "description": "Limit the diff to one file" }
                }
            }),
        ),
        tool(
            "git_add",
            "Stage files for commit",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "files": {
                        "type": "array",
                        "items": { "type": "string" },
                        "description": "Files to stage, defaults to everything"
                    }
                }
            }),
        ),
        tool(
            "git_commit",
            "Create a commit from staged changes",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "message": { "type": "string", "description": "Commit message" }
                },
                "required": ["message"]
            }),
        ),
        tool(
            "git_log",
            "Show recent commits",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "count": { "type": "integer", "description": "Number of commits, defaults to 10" }
                }
            }),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn executor() -> ToolExecutor {
        ToolExecutor::default()
    }

    #[test]
    fn test_resolve_path_rejects_escape() {
        let root = Path::new("/projects/demo");
        let executor = executor();

        assert!(executor.resolve_path(root, "../outside").is_err());
        assert!(executor.resolve_path(root, "src/../../outside").is_err());
        assert!(executor.resolve_path(root, "/etc/passwd").is_err());

        let inside = executor.resolve_path(root, "src/./lib.rs").unwrap();
        assert_eq!(inside, Path::new("/projects/demo/src/lib.rs"));
        let dotted = executor.resolve_path(root, "src/../README.md").unwrap();
        assert_eq!(dotted, Path::new("/projects/demo/README.md"));
    }

    #[tokio::test]
    async fn test_traversal_is_rejected_without_io() {
        let dir = TempDir::new().unwrap();
        let result = executor()
            .execute("read_file", &json!({"path": "../secrets.txt"}), dir.path())
            .await;
        assert!(result.unwrap_err().contains("escapes the project root"));
    }

    #[tokio::test]
    async fn test_glob_patterns_cannot_escape_root() {
        let outer = TempDir::new().unwrap();
        let root = outer.path().join("project");
        std::fs::create_dir(&root).unwrap();
        std::fs::write(outer.path().join("secret.txt"), "API_KEY=hunter2").unwrap();
        let executor = executor();

        let listed = executor
            .execute("list_files", &json!({"pattern": "../*"}), &root)
            .await;
        assert!(listed.unwrap_err().contains("escapes the project root"));

        let searched = executor
            .execute(
                "search_files",
                &json!({"pattern": "API_KEY", "file_pattern": "../*"}),
                &root,
            )
            .await;
        assert!(searched.unwrap_err().contains("escapes the project root"));

        let absolute = executor
            .execute("list_files", &json!({"pattern": "/etc/*"}), &root)
            .await;
        assert!(absolute.unwrap_err().contains("escapes the project root"));

        let nested = executor
            .execute("list_files", &json!({"pattern": "src/../../*"}), &root)
            .await;
        assert!(nested.unwrap_err().contains("escapes the project root"));
    }

    #[tokio::test]
    async fn test_read_and_write_roundtrip() {
        let dir = TempDir::new().unwrap();
        let executor = executor();

        let written = executor
            .execute(
                "write_file",
                &json!({"path": "notes/plan.md", "content": "# Plan\n"}),
                dir.path(),
            )
            .await
            .unwrap();
        assert!(written.contains("notes/plan.md"));

        let content = executor
            .execute("read_file", &json!({"path": "notes/plan.md"}), dir.path())
            .await
            .unwrap();
        assert_eq!(content, "# Plan\n");
    }

    #[tokio::test]
    async fn test_write_rejects_disallowed_extension() {
        let dir = TempDir::new().unwrap();
        let result = executor()
            .execute(
                "write_file",
                &json!({"path": "payload.exe", "content": "x"}),
                dir.path(),
            )
            .await;
        assert!(result.unwrap_err().contains("not allowed"));
        assert!(!dir.path().join("payload.exe").exists());
    }

    #[tokio::test]
    async fn test_write_allows_dotfiles_on_the_allow_list() {
        let dir = TempDir::new().unwrap();
        let executor = executor();

        executor
            .execute(
                "write_file",
                &json!({"path": ".gitignore", "content": "target/\n"}),
                dir.path(),
            )
            .await
            .unwrap();
        assert_eq!(
            std::fs::read_to_string(dir.path().join(".gitignore")).unwrap(),
            "target/\n"
        );

        let rejected = executor
            .execute(
                "write_file",
                &json!({"path": "Makefile", "content": "all:\n"}),
                dir.path(),
            )
            .await;
        assert!(rejected.unwrap_err().contains("not allowed"));
    }

    #[tokio::test]
    async fn test_read_rejects_oversized_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("big.txt"), "abcdef").unwrap();

        let executor = ToolExecutor::new(ToolConfig {
            max_file_size: 3,
            ..ToolConfig::default()
        });
        let result = executor
            .execute("read_file", &json!({"path": "big.txt"}), dir.path())
            .await;
        assert!(result.unwrap_err().contains("larger than"));
    }

    #[tokio::test]
    async fn test_list_files() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.rs"), "").unwrap();
        std::fs::write(dir.path().join("b.rs"), "").unwrap();
        std::fs::write(dir.path().join("c.txt"), "").unwrap();

        let listing = executor()
            .execute("list_files", &json!({"pattern": "*.rs"}), dir.path())
            .await
            .unwrap();
        assert_eq!(listing, "a.rs\nb.rs");
    }

    #[tokio::test]
    async fn test_search_files() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("main.rs"), "fn main() {\n    run();\n}\n").unwrap();

        let matches = executor()
            .execute("search_files", &json!({"pattern": r"fn \w+"}), dir.path())
            .await
            .unwrap();
        assert!(matches.contains("main.rs:1: fn main() {"));

        let none = executor()
            .execute("search_files", &json!({"pattern": "nothing_here"}), dir.path())
            .await
            .unwrap();
        assert!(none.contains("No matches"));
    }

    #[tokio::test]
    async fn test_blocked_commands_never_spawn() {
        let dir = TempDir::new().unwrap();
        let executor = executor();

        for command in ["rm -rf /", "sudo reboot", "chmod 777 .", "echo x > /dev/sda"] {
            let result = executor
                .execute("execute_command", &json!({"command": command}), dir.path())
                .await;
            assert!(
                result.unwrap_err().contains("blocked by safety policy"),
                "expected '{}' to be blocked",
                command
            );
        }
    }

    #[tokio::test]
    async fn test_execute_command_captures_output() {
        let dir = TempDir::new().unwrap();
        let output = executor()
            .execute("execute_command", &json!({"command": "echo hello"}), dir.path())
            .await
            .unwrap();
        assert_eq!(output.trim(), "hello");
    }

    #[tokio::test]
    async fn test_execute_command_reports_failure_as_error() {
        let dir = TempDir::new().unwrap();
        let result = executor()
            .execute("execute_command", &json!({"command": "exit 3"}), dir.path())
            .await;
        assert!(result.unwrap_err().contains("exited with 3"));
    }

    #[tokio::test]
    async fn test_flooding_command_is_cut_off_at_output_cap() {
        let dir = TempDir::new().unwrap();
        let executor = ToolExecutor::new(ToolConfig {
            max_output_bytes: 4096,
            ..ToolConfig::default()
        });

        // `yes` would run until the 30 s timeout; crossing the cap must kill
        // it long before that
        let started = std::time::Instant::now();
        let result = executor
            .execute("execute_command", &json!({"command": "yes"}), dir.path())
            .await;
        assert!(result.unwrap_err().contains("exceeded the 4096 byte limit"));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_command_timeout() {
        let dir = TempDir::new().unwrap();
        let executor = ToolExecutor::new(ToolConfig {
            command_timeout: Duration::from_millis(100),
            ..ToolConfig::default()
        });
        let result = executor
            .execute("execute_command", &json!({"command": "sleep 5"}), dir.path())
            .await;
        assert!(result.unwrap_err().contains("timed out"));
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let dir = TempDir::new().unwrap();
        let result = executor().execute("format_disk", &json!({}), dir.path()).await;
        assert!(result.unwrap_err().contains("Unknown tool"));
    }

    #[test]
    fn test_tool_definitions_cover_all_operations() {
        let names: Vec<String> = tool_definitions().into_iter().map(|t| t.name).collect();
        assert_eq!(names.len(), 10);
        for expected in [
            "read_file",
            "write_file",
            "list_files",
            "search_files",
            "execute_command",
            "git_status",
            "git_diff",
            "git_add",
            "git_commit",
            "git_log",
        ] {
            assert!(names.iter().any(|n| n == expected), "missing {}", expected);
        }
    }
}
