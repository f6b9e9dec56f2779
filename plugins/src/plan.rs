//! Planner: turns a TOML plan file plus command-line parameters into the task
//! definitions and run parameters handed to the engine.
use std::collections::BTreeSet;
use std::path::Path;

use serde::Deserialize;

use taskmesh_core::api::{RunParameters, TaskDefinition};

/// Plan file layout.
///
/// ```toml
/// [params]
/// project = "alpha"
///
/// [[task]]
/// name = "fetch"
/// instructions = "Download the sources"
///
/// [[task]]
/// name = "summarize"
/// depends_on = ["fetch"]
/// dynamic = true
/// ```
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PlanFile {
    #[serde(default)]
    params: RunParameters,

    #[serde(default, rename = "task")]
    tasks: Vec<PlanTask>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PlanTask {
    name: String,
    #[serde(default, alias = "dependencies")]
    depends_on: Vec<String>,
    #[serde(default)]
    priority: i32,
    #[serde(default = "default_parallelizable")]
    parallelizable: bool,
    #[serde(default)]
    dynamic: bool,
    #[serde(default)]
    instructions: String,
    #[serde(default)]
    working_context: Option<String>,
    #[serde(default)]
    fallback_instructions: Option<String>,
}

fn default_parallelizable() -> bool {
    true
}

impl From<PlanTask> for TaskDefinition {
    fn from(t: PlanTask) -> Self {
        let mut def = TaskDefinition::new(t.name)
            .with_dependencies(t.depends_on)
            .with_priority(t.priority)
            .with_instructions(t.instructions);
        def.parallelizable = t.parallelizable;
        def.dynamic = t.dynamic;
        def.working_context = t.working_context.filter(|s| !s.trim().is_empty());
        def.fallback_instructions = t.fallback_instructions;
        def
    }
}

/// Everything needed to start one run.
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub definitions: Vec<TaskDefinition>,
    pub params: RunParameters,
}

impl RunPlan {
    pub fn task_names(&self) -> Vec<&str> {
        self.definitions.iter().map(|d| d.name.as_str()).collect()
    }

    /// Dependency names that match no definition. They are treated as
    /// satisfied by the engine, which is usually a typo in the plan.
    pub fn unknown_dependencies(&self) -> Vec<(String, String)> {
        let names: BTreeSet<&str> = self.definitions.iter().map(|d| d.name.as_str()).collect();
        self.definitions
            .iter()
            .flat_map(|d| {
                d.dependencies
                    .iter()
                    .filter(|dep| !names.contains(dep.as_str()))
                    .map(move |dep| (d.name.clone(), dep.clone()))
            })
            .collect()
    }

    /// Overlay `KEY=VALUE` pairs from the command line.
    pub fn with_param_overrides<I, S>(mut self, pairs: I) -> anyhow::Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for pair in pairs {
            let (k, v) = parse_param(pair.as_ref())?;
            self.params.insert(k, v);
        }
        Ok(self)
    }
}

pub fn parse_plan(content: &str) -> anyhow::Result<RunPlan> {
    let file: PlanFile =
        toml::from_str(content).map_err(|e| anyhow::anyhow!("invalid plan file: {}", e))?;
    Ok(RunPlan {
        definitions: file.tasks.into_iter().map(TaskDefinition::from).collect(),
        params: file.params,
    })
}

pub fn load_plan(path: &Path) -> anyhow::Result<RunPlan> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read plan file {}: {}", path.display(), e))?;
    parse_plan(&content)
}

/// Parse one `KEY=VALUE` parameter. Quoted values are unescaped.
pub fn parse_param(raw: &str) -> anyhow::Result<(String, String)> {
    let (k, v) = raw
        .split_once('=')
        .ok_or_else(|| anyhow::anyhow!("invalid parameter '{}' (expected KEY=VALUE)", raw))?;
    let key = k.trim();
    if key.is_empty() {
        anyhow::bail!("invalid parameter '{}' (empty key)", raw);
    }
    Ok((key.to_string(), parse_param_value(v.trim())?))
}

fn parse_param_value(value: &str) -> anyhow::Result<String> {
    let mut chars = value.chars();
    if let (Some(first), Some(last)) = (chars.next(), chars.next_back()) {
        if (first == '"' && last == '"') || (first == '\'' && last == '\'') {
            return unescape(&value[1..value.len() - 1]);
        }
    }
    Ok(value.to_string())
}

fn unescape(value: &str) -> anyhow::Result<String> {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        let Some(next) = chars.next() else {
            anyhow::bail!("invalid escape in '{}' (trailing backslash)", value);
        };
        match next {
            'n' => out.push('\n'),
            't' => out.push('\t'),
            other => out.push(other),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const PLAN: &str = r#"
[params]
project = "alpha"

[[task]]
name = "fetch"
instructions = "Download the sources"
priority = 2

[[task]]
name = "summarize"
depends_on = ["fetch", "lint"]
dynamic = true
parallelizable = false
fallback_instructions = "Summarize everything at once"
working_context = "/srv/repo"
"#;

    #[test]
    fn parses_tasks_and_params() {
        let plan = parse_plan(PLAN).unwrap();
        assert_eq!(plan.task_names(), vec!["fetch", "summarize"]);
        assert_eq!(plan.params["project"], "alpha");

        let fetch = &plan.definitions[0];
        assert_eq!(fetch.priority, 2);
        assert!(fetch.parallelizable);
        assert!(!fetch.dynamic);

        let summarize = &plan.definitions[1];
        assert_eq!(summarize.dependencies, vec!["fetch", "lint"]);
        assert!(summarize.dynamic);
        assert!(!summarize.parallelizable);
        assert_eq!(summarize.working_context.as_deref(), Some("/srv/repo"));
        assert_eq!(
            summarize.fallback_instructions.as_deref(),
            Some("Summarize everything at once")
        );
    }

    #[test]
    fn reports_unknown_dependencies() {
        let plan = parse_plan(PLAN).unwrap();
        assert_eq!(
            plan.unknown_dependencies(),
            vec![("summarize".to_string(), "lint".to_string())]
        );
    }

    #[test]
    fn rejects_unknown_keys() {
        let err = parse_plan("[[task]]\nname = \"a\"\nretries = 3\n").unwrap_err();
        assert!(err.to_string().contains("invalid plan file"));
    }

    #[test]
    fn overrides_params() {
        let plan = parse_plan(PLAN)
            .unwrap()
            .with_param_overrides(["project=beta", "note=\"two\\nlines\""])
            .unwrap();
        assert_eq!(plan.params["project"], "beta");
        assert_eq!(plan.params["note"], "two\nlines");

        assert!(parse_param("novalue").is_err());
        assert!(parse_param("=x").is_err());
        assert_eq!(parse_param("k = v").unwrap(), ("k".to_string(), "v".to_string()));
    }

    #[test]
    fn loads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plan.toml");
        std::fs::write(&path, PLAN).unwrap();
        assert_eq!(load_plan(&path).unwrap().definitions.len(), 2);
        assert!(load_plan(&dir.path().join("missing.toml")).is_err());
    }
}
