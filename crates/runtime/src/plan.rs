//! Declarative multi-tool-call plans.
//!
//! A plan is validated, its `$ref` references are turned into a
//! dependency graph, the graph is layered into waves (Kahn), and waves
//! run in order. Steps inside a wave run concurrently, and a failed
//! step never cancels its wave peers. Only dependents of a failed step
//! are short-circuited.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::OnceLock;
use std::time::Instant;

use futures_util::future::join_all;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use casc_domain::error::{Error, Result};
use casc_domain::tool::ToolCall;

use crate::registry::{Tool, ToolRegistry, WeakRegistry};

/// Name reserved for the plan tool itself. Plan steps may never call
/// it: nested plans are rejected at validation.
pub const PLAN_TOOL_NAME: &str = "run_tool_plan";

fn ref_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\$ref:([A-Za-z0-9_-]+)((?:\.[A-Za-z0-9_-]+)*)").expect("static pattern")
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Plan model
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStep {
    pub id: String,
    pub tool: String,
    /// Arguments for the tool; `$ref:step[.path]` tokens inside string
    /// values are resolved before execution.
    #[serde(default)]
    pub arguments: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolPlan {
    pub steps: Vec<PlanStep>,
    /// Step ids whose outputs form the plan result. Empty = all steps.
    #[serde(default)]
    pub output_steps: Vec<String>,
}

/// Result of one executed (or skipped) step.
#[derive(Debug, Clone, Serialize)]
pub struct StepResult {
    pub step_id: String,
    pub tool: String,
    pub call_id: String,
    pub output: String,
    pub success: bool,
    pub duration_ms: u64,
}

/// Result of a whole plan run.
#[derive(Debug, Clone, Serialize)]
pub struct PlanOutcome {
    /// Every step, in execution (wave) order.
    pub results: Vec<StepResult>,
    /// Only the `output_steps` view (all steps when none requested).
    pub output_results: Vec<StepResult>,
    /// step_id → failure or skip message.
    pub errors: BTreeMap<String, String>,
}

impl PlanOutcome {
    /// Serialize the output-step set as one JSON object. Values that
    /// already look like JSON (`{` or `[` prefix) are inlined; the
    /// rest are quoted.
    pub fn format_outputs(&self) -> String {
        let mut obj = serde_json::Map::new();
        for result in &self.output_results {
            let trimmed = result.output.trim();
            let value = if trimmed.starts_with('{') || trimmed.starts_with('[') {
                serde_json::from_str(trimmed)
                    .unwrap_or_else(|_| Value::String(result.output.clone()))
            } else {
                Value::String(result.output.clone())
            };
            obj.insert(result.step_id.clone(), value);
        }
        Value::Object(obj).to_string()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Executor
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Executes plans against a shared tool registry.
#[derive(Clone)]
pub struct PlanExecutor {
    registry: ToolRegistry,
}

impl PlanExecutor {
    pub fn new(registry: ToolRegistry) -> Self {
        Self { registry }
    }

    /// Validate and run a plan. One plan = one execution; nothing is
    /// cached between runs.
    pub async fn execute(&self, plan: &ToolPlan) -> Result<PlanOutcome> {
        self.validate(plan)?;
        let deps = dependency_graph(plan);
        let waves = topological_waves(plan, &deps)?;

        let step_by_id: HashMap<&str, &PlanStep> = plan
            .steps
            .iter()
            .map(|s| (s.id.as_str(), s))
            .collect();

        let mut outputs: HashMap<String, String> = HashMap::new();
        let mut failed: HashSet<String> = HashSet::new();
        let mut results: Vec<StepResult> = Vec::with_capacity(plan.steps.len());

        for wave in waves {
            let wave_results = if wave.len() == 1 {
                vec![
                    self.run_step(step_by_id[wave[0].as_str()], &deps, &outputs, &failed)
                        .await,
                ]
            } else {
                // Peers run concurrently; a failure does not cancel
                // the rest of the wave.
                join_all(wave.iter().map(|id| {
                    self.run_step(step_by_id[id.as_str()], &deps, &outputs, &failed)
                }))
                .await
            };

            for result in wave_results {
                if result.success {
                    outputs.insert(result.step_id.clone(), result.output.clone());
                } else {
                    failed.insert(result.step_id.clone());
                }
                results.push(result);
            }
        }

        let errors: BTreeMap<String, String> = results
            .iter()
            .filter(|r| !r.success)
            .map(|r| (r.step_id.clone(), r.output.clone()))
            .collect();

        let output_results = if plan.output_steps.is_empty() {
            results.clone()
        } else {
            results
                .iter()
                .filter(|r| plan.output_steps.contains(&r.step_id))
                .cloned()
                .collect()
        };

        Ok(PlanOutcome {
            results,
            output_results,
            errors,
        })
    }

    fn validate(&self, plan: &ToolPlan) -> Result<()> {
        if plan.steps.is_empty() {
            return Err(plan_error(None, "plan has no steps"));
        }
        let mut seen = HashSet::new();
        for step in &plan.steps {
            if step.id.trim().is_empty() {
                return Err(plan_error(None, "step id must not be blank"));
            }
            if step.tool.trim().is_empty() {
                return Err(plan_error(Some(&step.id), "step tool must not be blank"));
            }
            if !seen.insert(step.id.as_str()) {
                return Err(plan_error(
                    Some(&step.id),
                    format!("duplicate step id '{}'", step.id),
                ));
            }
            if step.tool == PLAN_TOOL_NAME {
                return Err(plan_error(
                    Some(&step.id),
                    "a plan step may not invoke the plan tool itself",
                ));
            }
            if !self.registry.contains(&step.tool) {
                return Err(plan_error(
                    Some(&step.id),
                    format!("unknown tool '{}'", step.tool),
                ));
            }
        }
        Ok(())
    }

    async fn run_step(
        &self,
        step: &PlanStep,
        deps: &HashMap<String, HashSet<String>>,
        outputs: &HashMap<String, String>,
        failed: &HashSet<String>,
    ) -> StepResult {
        let call_id = format!("plan_{}_{}", step.id, uuid::Uuid::new_v4().simple());

        // Short-circuit when any dependency failed earlier.
        if let Some(my_deps) = deps.get(&step.id) {
            if let Some(bad) = my_deps.iter().find(|d| failed.contains(*d)) {
                return StepResult {
                    step_id: step.id.clone(),
                    tool: step.tool.clone(),
                    call_id,
                    output: format!("Skipped because dependency {bad} failed"),
                    success: false,
                    duration_ms: 0,
                };
            }
        }

        let arguments = resolve_refs(&step.arguments, outputs);
        let call = ToolCall {
            call_id: call_id.clone(),
            name: step.tool.clone(),
            arguments: arguments.to_string(),
        };

        let started = Instant::now();
        match self.registry.execute(&call).await {
            Ok(output) => StepResult {
                step_id: step.id.clone(),
                tool: step.tool.clone(),
                call_id,
                output: output.output,
                success: true,
                duration_ms: started.elapsed().as_millis() as u64,
            },
            Err(e) => {
                tracing::warn!(step_id = %step.id, tool = %step.tool, error = %e, "plan step failed");
                StepResult {
                    step_id: step.id.clone(),
                    tool: step.tool.clone(),
                    call_id,
                    output: e.to_string(),
                    success: false,
                    duration_ms: started.elapsed().as_millis() as u64,
                }
            }
        }
    }
}

fn plan_error(step_id: Option<&str>, message: impl Into<String>) -> Error {
    Error::ToolPlan {
        step_id: step_id.map(str::to_owned),
        message: message.into(),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Dependency graph & waves
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Scan each step's arguments for `$ref:ID` tokens; only ids that name
/// sibling steps count as dependencies.
fn dependency_graph(plan: &ToolPlan) -> HashMap<String, HashSet<String>> {
    let ids: HashSet<&str> = plan.steps.iter().map(|s| s.id.as_str()).collect();
    let mut deps: HashMap<String, HashSet<String>> = HashMap::new();
    for step in &plan.steps {
        let text = step.arguments.to_string();
        let mut step_deps = HashSet::new();
        for captures in ref_pattern().captures_iter(&text) {
            let target = &captures[1];
            if target != step.id && ids.contains(target) {
                step_deps.insert(target.to_string());
            }
        }
        deps.insert(step.id.clone(), step_deps);
    }
    deps
}

/// Layer the graph into waves with Kahn's algorithm. Steps with no
/// unresolved dependencies form a wave; a leftover means a cycle.
fn topological_waves(
    plan: &ToolPlan,
    deps: &HashMap<String, HashSet<String>>,
) -> Result<Vec<Vec<String>>> {
    let mut indegree: HashMap<&str, usize> = plan
        .steps
        .iter()
        .map(|s| (s.id.as_str(), deps[&s.id].len()))
        .collect();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    for (id, step_deps) in deps {
        for dep in step_deps {
            dependents
                .entry(dep.as_str())
                .or_default()
                .push(id.as_str());
        }
    }

    let mut waves = Vec::new();
    let mut processed = 0usize;
    // Plan order keeps waves deterministic.
    let mut ready: VecDeque<&str> = plan
        .steps
        .iter()
        .map(|s| s.id.as_str())
        .filter(|id| indegree[id] == 0)
        .collect();

    while !ready.is_empty() {
        let wave: Vec<String> = ready.drain(..).map(str::to_owned).collect();
        processed += wave.len();
        let mut next_ready: Vec<&str> = Vec::new();
        for id in &wave {
            if let Some(children) = dependents.get(id.as_str()) {
                for child in children {
                    let count = indegree.get_mut(child).expect("known step");
                    *count -= 1;
                    if *count == 0 {
                        next_ready.push(child);
                    }
                }
            }
        }
        // Keep plan order inside the next wave too.
        next_ready.sort_by_key(|id| plan.steps.iter().position(|s| s.id == *id));
        ready.extend(next_ready);
        waves.push(wave);
    }

    if processed < plan.steps.len() {
        return Err(plan_error(None, "Cycle detected in tool plan dependencies"));
    }
    Ok(waves)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Reference resolution
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Substitute `$ref:ID[.path]` occurrences with step outputs.
///
/// A string value that is exactly one reference is substituted raw: if
/// the referenced output parses as JSON, the parsed value flows in
/// (so an object output becomes a nested object). References embedded
/// in longer text are spliced as plain text, preserving the JSON
/// string quoting around them. Dotted paths walk the output as JSON;
/// a missing key resolves to the empty string. These are literal
/// whole-string substitution rules: references inside nested quoted
/// strings are not re-escaped.
fn resolve_refs(arguments: &Value, outputs: &HashMap<String, String>) -> Value {
    match arguments {
        Value::String(text) => resolve_string(text, outputs),
        Value::Array(items) => {
            Value::Array(items.iter().map(|v| resolve_refs(v, outputs)).collect())
        }
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), resolve_refs(v, outputs)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn resolve_string(text: &str, outputs: &HashMap<String, String>) -> Value {
    let pattern = ref_pattern();

    // Whole-string reference: substitute raw.
    if let Some(captures) = pattern.captures(text) {
        if captures.get(0).map(|m| m.as_str()) == Some(text.trim()) {
            let resolved = lookup_ref(&captures[1], &captures[2], outputs);
            return match serde_json::from_str::<Value>(&resolved) {
                Ok(value) => value,
                Err(_) => Value::String(resolved),
            };
        }
    }

    // Embedded references: textual splice.
    let replaced = pattern.replace_all(text, |captures: &regex::Captures<'_>| {
        lookup_ref(&captures[1], &captures[2], outputs)
    });
    Value::String(replaced.into_owned())
}

fn lookup_ref(id: &str, dotted: &str, outputs: &HashMap<String, String>) -> String {
    let Some(output) = outputs.get(id) else {
        return String::new();
    };
    if dotted.is_empty() {
        return output.clone();
    }

    // Walk the dotted path through the output as JSON.
    let Ok(mut current) = serde_json::from_str::<Value>(output) else {
        return String::new();
    };
    for segment in dotted.split('.').filter(|s| !s.is_empty()) {
        current = match &current {
            Value::Object(map) => match map.get(segment) {
                Some(v) => v.clone(),
                None => return String::new(),
            },
            Value::Array(items) => match segment.parse::<usize>().ok().and_then(|i| items.get(i))
            {
                Some(v) => v.clone(),
                None => return String::new(),
            },
            _ => return String::new(),
        };
    }
    match current {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Plan tool
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Build the registrable `run_tool_plan` tool over a registry.
///
/// The tool holds a weak registry handle so registering it into the
/// same registry does not create a reference cycle.
pub fn plan_tool(registry: &ToolRegistry) -> Tool {
    let weak: WeakRegistry = registry.downgrade();
    Tool::new(
        PLAN_TOOL_NAME,
        "Execute a multi-step tool plan with $ref dependencies between steps. \
         Steps without dependencies run in parallel.",
        serde_json::json!({
            "type": "object",
            "properties": {
                "steps": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "id": {"type": "string"},
                            "tool": {"type": "string"},
                            "arguments": {"type": "object"}
                        },
                        "required": ["id", "tool"]
                    }
                },
                "output_steps": {
                    "type": "array",
                    "items": {"type": "string"}
                }
            },
            "required": ["steps"]
        }),
        move |args| {
            let weak = weak.clone();
            async move {
                let registry = weak.upgrade().ok_or_else(|| {
                    Error::ToolPlan {
                        step_id: None,
                        message: "tool registry is gone".into(),
                    }
                })?;
                let plan: ToolPlan = serde_json::from_value(args)?;
                let outcome = PlanExecutor::new(registry).execute(&plan).await?;
                Ok(outcome.format_outputs())
            }
        },
    )
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn registry_with_weather() -> ToolRegistry {
        let registry = ToolRegistry::new();
        registry
            .register(Tool::new(
                "weather",
                "weather by city",
                serde_json::json!({
                    "type": "object",
                    "properties": {"city": {"type": "string"}},
                    "required": ["city"]
                }),
                |args| async move {
                    Ok(format!(
                        "sunny in {}",
                        args["city"].as_str().unwrap_or("nowhere")
                    ))
                },
            ))
            .unwrap();
        registry
            .register(Tool::new(
                "compare_data",
                "compare two inputs",
                serde_json::json!({
                    "type": "object",
                    "properties": {"a": {"type": "string"}, "b": {"type": "string"}}
                }),
                |args| async move {
                    Ok(format!(
                        "{} vs {}",
                        args["a"].as_str().unwrap_or(""),
                        args["b"].as_str().unwrap_or("")
                    ))
                },
            ))
            .unwrap();
        registry
    }

    fn step(id: &str, tool: &str, arguments: Value) -> PlanStep {
        PlanStep {
            id: id.into(),
            tool: tool.into(),
            arguments,
        }
    }

    #[tokio::test]
    async fn parallel_fetch_then_compare() {
        let registry = registry_with_weather();
        let plan = ToolPlan {
            steps: vec![
                step("s1", "weather", serde_json::json!({"city": "Tokyo"})),
                step("s2", "weather", serde_json::json!({"city": "London"})),
                step(
                    "s3",
                    "compare_data",
                    serde_json::json!({"a": "$ref:s1", "b": "$ref:s2"}),
                ),
            ],
            output_steps: vec!["s3".into()],
        };
        let outcome = PlanExecutor::new(registry).execute(&plan).await.unwrap();

        assert_eq!(outcome.results.len(), 3);
        assert_eq!(outcome.output_results.len(), 1);
        assert_eq!(
            outcome.output_results[0].output,
            "sunny in Tokyo vs sunny in London"
        );
        assert!(outcome.errors.is_empty());
        // s3 runs after both fetches.
        assert_eq!(outcome.results[2].step_id, "s3");
    }

    #[tokio::test]
    async fn cycle_detected_before_any_tool_runs() {
        let registry = ToolRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        registry
            .register(Tool::new(
                "f",
                "f",
                serde_json::json!({"type": "object", "properties": {"x": {"type": "string"}}}),
                move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    async { Ok("out".into()) }
                },
            ))
            .unwrap();
        let plan = ToolPlan {
            steps: vec![
                step("s1", "f", serde_json::json!({"x": "$ref:s2"})),
                step("s2", "f", serde_json::json!({"x": "$ref:s1"})),
            ],
            output_steps: vec![],
        };
        let err = PlanExecutor::new(registry).execute(&plan).await.unwrap_err();
        assert!(err
            .to_string()
            .contains("Cycle detected in tool plan dependencies"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failed_dependency_skips_dependents() {
        let registry = ToolRegistry::new();
        registry
            .register(Tool::new(
                "flaky",
                "always fails",
                serde_json::json!({"type": "object", "properties": {}}),
                |_| async { Err(Error::Configuration("down".into())) },
            ))
            .unwrap();
        registry
            .register(Tool::new(
                "echo",
                "echo",
                serde_json::json!({"type": "object", "properties": {"v": {"type": "string"}}}),
                |args| async move { Ok(args["v"].as_str().unwrap_or("").to_string()) },
            ))
            .unwrap();

        let plan = ToolPlan {
            steps: vec![
                step("a", "flaky", serde_json::json!({})),
                step("b", "echo", serde_json::json!({"v": "$ref:a"})),
                step("c", "echo", serde_json::json!({"v": "independent"})),
            ],
            output_steps: vec![],
        };
        let outcome = PlanExecutor::new(registry).execute(&plan).await.unwrap();

        let b = outcome.results.iter().find(|r| r.step_id == "b").unwrap();
        assert!(!b.success);
        assert!(b.output.starts_with("Skipped because dependency"));
        assert!(b.output.contains('a'));

        // Fail-forward: the independent step still ran.
        let c = outcome.results.iter().find(|r| r.step_id == "c").unwrap();
        assert!(c.success);
        assert_eq!(c.output, "independent");

        assert_eq!(outcome.errors.len(), 2);
        assert!(outcome.errors.contains_key("a"));
        assert!(outcome.errors.contains_key("b"));
    }

    #[tokio::test]
    async fn validation_rejects_unknown_tool_and_duplicates() {
        let registry = registry_with_weather();
        let executor = PlanExecutor::new(registry);

        let unknown = ToolPlan {
            steps: vec![step("s1", "ghost", serde_json::json!({}))],
            output_steps: vec![],
        };
        let err = executor.execute(&unknown).await.unwrap_err();
        assert!(err.to_string().contains("unknown tool 'ghost'"));

        let duplicate = ToolPlan {
            steps: vec![
                step("s1", "weather", serde_json::json!({"city": "a"})),
                step("s1", "weather", serde_json::json!({"city": "b"})),
            ],
            output_steps: vec![],
        };
        let err = executor.execute(&duplicate).await.unwrap_err();
        assert!(err.to_string().contains("duplicate step id"));
    }

    #[tokio::test]
    async fn nested_plan_rejected() {
        let registry = registry_with_weather();
        let plan = ToolPlan {
            steps: vec![step("s1", PLAN_TOOL_NAME, serde_json::json!({}))],
            output_steps: vec![],
        };
        let err = PlanExecutor::new(registry).execute(&plan).await.unwrap_err();
        assert!(err.to_string().contains("plan tool itself"));
    }

    #[tokio::test]
    async fn dotted_path_resolution() {
        let registry = ToolRegistry::new();
        registry
            .register(Tool::new(
                "json_source",
                "emits json",
                serde_json::json!({"type": "object", "properties": {}}),
                |_| async { Ok(r#"{"user": {"name": "Ada", "langs": ["en", "fr"]}}"#.into()) },
            ))
            .unwrap();
        registry
            .register(Tool::new(
                "echo",
                "echo",
                serde_json::json!({"type": "object", "properties": {"v": {"type": "string"}}}),
                |args| async move { Ok(args["v"].as_str().unwrap_or("").to_string()) },
            ))
            .unwrap();

        let plan = ToolPlan {
            steps: vec![
                step("src", "json_source", serde_json::json!({})),
                step(
                    "use",
                    "echo",
                    serde_json::json!({"v": "name=$ref:src.user.name lang=$ref:src.user.langs.1 missing=[$ref:src.user.ghost]"}),
                ),
            ],
            output_steps: vec!["use".into()],
        };
        let outcome = PlanExecutor::new(registry).execute(&plan).await.unwrap();
        assert_eq!(
            outcome.output_results[0].output,
            "name=Ada lang=fr missing=[]"
        );
    }

    #[tokio::test]
    async fn whole_string_ref_to_json_flows_as_value() {
        let registry = ToolRegistry::new();
        registry
            .register(Tool::new(
                "obj_source",
                "emits object",
                serde_json::json!({"type": "object", "properties": {}}),
                |_| async { Ok(r#"{"k": 1}"#.into()) },
            ))
            .unwrap();
        let captured = Arc::new(parking_lot::Mutex::new(Value::Null));
        let sink = captured.clone();
        registry
            .register(Tool::new(
                "capture",
                "captures arguments",
                serde_json::json!({"type": "object", "properties": {"payload": {}}}),
                move |args| {
                    *sink.lock() = args.clone();
                    async { Ok("done".into()) }
                },
            ))
            .unwrap();

        let plan = ToolPlan {
            steps: vec![
                step("src", "obj_source", serde_json::json!({})),
                step("use", "capture", serde_json::json!({"payload": "$ref:src"})),
            ],
            output_steps: vec![],
        };
        PlanExecutor::new(registry).execute(&plan).await.unwrap();
        // The object output flowed in as a nested object, not a string.
        assert_eq!(captured.lock()["payload"]["k"], 1);
    }

    #[tokio::test]
    async fn format_outputs_inlines_json_and_quotes_text() {
        let registry = ToolRegistry::new();
        registry
            .register(Tool::new(
                "json_out",
                "json",
                serde_json::json!({"type": "object", "properties": {}}),
                |_| async { Ok(r#"{"a": 1}"#.into()) },
            ))
            .unwrap();
        registry
            .register(Tool::new(
                "text_out",
                "text",
                serde_json::json!({"type": "object", "properties": {}}),
                |_| async { Ok("plain words".into()) },
            ))
            .unwrap();

        let plan = ToolPlan {
            steps: vec![
                step("j", "json_out", serde_json::json!({})),
                step("t", "text_out", serde_json::json!({})),
            ],
            output_steps: vec![],
        };
        let outcome = PlanExecutor::new(registry).execute(&plan).await.unwrap();
        let formatted: Value = serde_json::from_str(&outcome.format_outputs()).unwrap();
        assert_eq!(formatted["j"]["a"], 1);
        assert_eq!(formatted["t"], "plain words");
    }

    #[tokio::test]
    async fn plan_tool_executes_through_registry() {
        let registry = registry_with_weather();
        registry.register(plan_tool(&registry)).unwrap();

        let call = ToolCall {
            call_id: "c1".into(),
            name: PLAN_TOOL_NAME.into(),
            arguments: serde_json::json!({
                "steps": [
                    {"id": "s1", "tool": "weather", "arguments": {"city": "Oslo"}}
                ]
            })
            .to_string(),
        };
        let output = registry.execute(&call).await.unwrap();
        let value: Value = serde_json::from_str(&output.output).unwrap();
        assert_eq!(value["s1"], "sunny in Oslo");
    }

    #[test]
    fn waves_follow_plan_order() {
        let plan = ToolPlan {
            steps: vec![
                step("b", "t", serde_json::json!({})),
                step("a", "t", serde_json::json!({})),
                step("c", "t", serde_json::json!({"x": "$ref:a"})),
            ],
            output_steps: vec![],
        };
        let deps = dependency_graph(&plan);
        let waves = topological_waves(&plan, &deps).unwrap();
        assert_eq!(waves, vec![vec!["b".to_string(), "a".into()], vec!["c".into()]]);
    }

    #[test]
    fn self_reference_is_not_a_dependency() {
        let plan = ToolPlan {
            steps: vec![step("s1", "t", serde_json::json!({"x": "$ref:s1"}))],
            output_steps: vec![],
        };
        let deps = dependency_graph(&plan);
        assert!(deps["s1"].is_empty());
    }
}
