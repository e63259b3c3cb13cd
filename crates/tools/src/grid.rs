//! Grid expansion: base config x parameter axes -> configs + launch script.
//!
//! A grid spec names a base run config, two axis groups, and abbreviation
//! rules. `model_var` axes pick the output directory (one per combination);
//! `run_var` axes vary within a directory and become file-name suffixes.
//! Every combination gets its own JSON config with the axis values assigned
//! at their dotted paths, plus one launch command appended to the script.

use crate::config::ToolConfig;
use clap::ValueEnum;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Shell {
    Bash,
    #[value(name = "powershell")]
    PowerShell,
}

impl Shell {
    pub fn script_extension(&self) -> &'static str {
        match self {
            Shell::Bash => "sh",
            Shell::PowerShell => "ps1",
        }
    }

    fn background_suffix(&self) -> &'static str {
        match self {
            Shell::Bash => " &",
            Shell::PowerShell => "",
        }
    }

    fn sleep_line(&self, secs: f32) -> String {
        match self {
            Shell::Bash => format!("sleep {secs}s"),
            Shell::PowerShell => format!("Start-Sleep -Seconds {secs}"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GridSpec {
    /// Base run config every combination starts from.
    pub base: PathBuf,
    /// Axes that choose the output directory, dotted path -> candidate values.
    #[serde(default)]
    pub model_var: BTreeMap<String, Vec<Value>>,
    /// Axes that vary within a directory and suffix the file name.
    #[serde(default)]
    pub run_var: BTreeMap<String, Vec<Value>>,
    /// Substring abbreviations applied to generated names (word -> short form).
    #[serde(default)]
    pub abbreviations: BTreeMap<String, String>,
}

impl GridSpec {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let bytes = fs::read(path)
            .map_err(|e| anyhow::anyhow!("failed to read grid spec {}: {e}", path.display()))?;
        let spec: GridSpec = serde_json::from_slice(&bytes)
            .map_err(|e| anyhow::anyhow!("invalid grid spec {}: {e}", path.display()))?;
        for (key, values) in spec.model_var.iter().chain(spec.run_var.iter()) {
            if values.is_empty() {
                anyhow::bail!("axis '{key}' has no candidate values");
            }
        }
        Ok(spec)
    }
}

#[derive(Debug)]
pub struct GridSummary {
    pub configs: Vec<PathBuf>,
    pub script: PathBuf,
}

/// Expand the spec under `out_dir` and append launch commands to the script.
pub fn expand_grid(
    spec: &GridSpec,
    tool_cfg: &ToolConfig,
    shell: Shell,
    out_dir: &Path,
) -> anyhow::Result<GridSummary> {
    let base_bytes = fs::read(&spec.base).map_err(|e| {
        anyhow::anyhow!("failed to read base config {}: {e}", spec.base.display())
    })?;
    let base: Value = serde_json::from_slice(&base_bytes).map_err(|e| {
        anyhow::anyhow!("base config {} is not valid JSON: {e}", spec.base.display())
    })?;
    let base_prefix = spec
        .base
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("config")
        .to_string();

    fs::create_dir_all(out_dir)?;
    let script_path = out_dir.join(format!("{base_prefix}_grid.{}", shell.script_extension()));
    let mut script = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&script_path)
        .map_err(|e| anyhow::anyhow!("failed to open {}: {e}", script_path.display()))?;

    let model_combos = combinations(&spec.model_var);
    let run_combos = combinations(&spec.run_var);
    let mut configs = Vec::with_capacity(model_combos.len() * run_combos.len());

    for model_combo in &model_combos {
        let mut cfg = base.clone();
        let mut dir = out_dir.to_path_buf();
        let mut comment_parts = Vec::new();
        for (key, value) in model_combo {
            set_path(&mut cfg, key, value)?;
            let tag = sanitize(&format!("{}{}", last_segment(key), value_token(value)));
            comment_parts.push(tag.clone());
            dir = dir.join(tag);
        }
        fs::create_dir_all(&dir)?;
        if !comment_parts.is_empty() {
            writeln!(script, "# {}", comment_parts.join(" "))?;
        }

        for run_combo in &run_combos {
            let mut cfg_n = cfg.clone();
            let mut suffix = String::new();
            for (key, value) in run_combo {
                set_path(&mut cfg_n, key, value)?;
                suffix.push('_');
                suffix.push_str(last_segment(key));
                suffix.push_str(&value_token(value));
            }
            let name = abbreviate(&sanitize(&suffix), &spec.abbreviations);
            let config_path = dir.join(format!("{base_prefix}{name}.json"));
            fs::write(&config_path, serde_json::to_vec_pretty(&cfg_n)?)?;

            let config_str = config_path.display().to_string();
            let command = render_template(
                &tool_cfg.train_template,
                &[
                    ("CONFIG", config_str.as_str()),
                    ("EXTRA_ARGS", tool_cfg.extra_args.as_str()),
                ],
            );
            writeln!(script, "{}{}", command.trim(), shell.background_suffix())?;
            writeln!(script, "{}", shell.sleep_line(tool_cfg.launch_stagger_secs))?;
            configs.push(config_path);
        }
        writeln!(script)?;
    }

    Ok(GridSummary {
        configs,
        script: script_path,
    })
}

/// Assign `value` at a dotted path. Intermediate segments must already exist
/// in the base config (a typo should fail loudly, not invent new sections);
/// the final segment may be new.
fn set_path(root: &mut Value, dotted: &str, value: &Value) -> anyhow::Result<()> {
    let segments: Vec<&str> = dotted.split('.').collect();
    let mut cursor = root;
    for seg in &segments[..segments.len() - 1] {
        cursor = cursor
            .as_object_mut()
            .and_then(|obj| obj.get_mut(*seg))
            .ok_or_else(|| {
                anyhow::anyhow!("path '{dotted}': segment '{seg}' missing from base config")
            })?;
    }
    let last = segments[segments.len() - 1];
    let obj = cursor
        .as_object_mut()
        .ok_or_else(|| anyhow::anyhow!("path '{dotted}': parent of '{last}' is not an object"))?;
    obj.insert(last.to_string(), value.clone());
    Ok(())
}

/// Cartesian product over the axes; no axes yields the single empty combo.
fn combinations(axes: &BTreeMap<String, Vec<Value>>) -> Vec<Vec<(&str, &Value)>> {
    let mut out: Vec<Vec<(&str, &Value)>> = vec![Vec::new()];
    for (key, values) in axes {
        let mut next = Vec::with_capacity(out.len() * values.len());
        for combo in &out {
            for value in values {
                let mut extended = combo.clone();
                extended.push((key.as_str(), value));
                next.push(extended);
            }
        }
        out = next;
    }
    out
}

fn last_segment(dotted: &str) -> &str {
    dotted.rsplit('.').next().unwrap_or(dotted)
}

fn value_token(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// File-system-safe form: dots become underscores (so `0.2` reads `0_2`),
/// separators collapse.
fn sanitize(raw: &str) -> String {
    raw.replace(['.', '/', '\\', ' '], "_")
}

fn abbreviate(name: &str, abbreviations: &BTreeMap<String, String>) -> String {
    let mut out = name.to_string();
    for (word, abb) in abbreviations {
        out = out.replace(word.as_str(), abb.as_str());
    }
    out
}

fn render_template(template: &str, substitutions: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (key, value) in substitutions {
        out = out.replace(&format!("${{{key}}}"), value);
    }
    out
}
