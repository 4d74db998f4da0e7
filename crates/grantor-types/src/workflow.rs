//! Workflow document model.
//!
//! A workflow document is the immutable input to the runtime: `document`
//! metadata, `use` definitions (named functions and error templates) and
//! `do`, the ordered task list forming the main graph. Documents are written
//! in YAML; parsing runs structural validation so a loaded document is
//! guaranteed well-formed.
//!
//! Tasks are an untagged enum discriminated by their defining key (`call`,
//! `set`, `switch`, `for`, `fork`, `try`, `raise`, `emit`, `wait`, `listen`,
//! `run`, `do`); every variant shares the optional [`TaskBase`] fields.

use std::collections::BTreeMap;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ErrorKind;

// ---------------------------------------------------------------------------
// Document
// ---------------------------------------------------------------------------

/// A named workflow as registered with the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Identity provider used to authenticate the requesting user.
    #[serde(default = "default_authentication")]
    pub authentication: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow: Option<WorkflowDocument>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_authentication() -> String {
    "default".to_string()
}

fn default_enabled() -> bool {
    true
}

/// The declarative task-graph document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDocument {
    pub document: DocumentMeta,
    #[serde(rename = "use", default, skip_serializing_if = "UseDefinitions::is_empty")]
    pub use_: UseDefinitions,
    #[serde(rename = "do")]
    pub do_: TaskList,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentMeta {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
}

/// `use` block: named function definitions (opaque to the type layer; the
/// call dispatcher resolves them) and reusable error templates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UseDefinitions {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub functions: BTreeMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub errors: BTreeMap<String, ErrorDefinition>,
}

impl UseDefinitions {
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty() && self.errors.is_empty()
    }
}

/// An error template for `raise` tasks. `title` and `detail` are runtime
/// expressions evaluated in the raising task's scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDefinition {
    #[serde(rename = "type")]
    pub kind: ErrorKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    pub title: String,
    #[serde(default)]
    pub detail: String,
}

// ---------------------------------------------------------------------------
// Task list
// ---------------------------------------------------------------------------

/// Ordered `(key, task)` pairs. Serialized as a YAML sequence of single-key
/// maps, preserving declaration order:
///
/// ```yaml
/// do:
///   - validate: { call: grantor.validate }
///   - grant:    { call: grantor.authorize, with: { revocation: revoke } }
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskList(pub Vec<TaskItem>);

#[derive(Debug, Clone, PartialEq)]
pub struct TaskItem {
    pub key: String,
    pub task: Task,
}

impl TaskList {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TaskItem> {
        self.0.iter()
    }

    /// Position and item for a task key.
    pub fn find(&self, key: &str) -> Option<(usize, &TaskItem)> {
        self.0.iter().enumerate().find(|(_, item)| item.key == key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|item| item.key.as_str())
    }
}

impl Serialize for TaskList {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeSeq;
        let mut seq = serializer.serialize_seq(Some(self.0.len()))?;
        for item in &self.0 {
            let mut map = BTreeMap::new();
            map.insert(&item.key, &item.task);
            seq.serialize_element(&map)?;
        }
        seq.end()
    }
}

impl<'de> Deserialize<'de> for TaskList {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let entries: Vec<BTreeMap<String, Task>> = Vec::deserialize(deserializer)?;
        let mut items = Vec::with_capacity(entries.len());
        for entry in entries {
            if entry.len() != 1 {
                return Err(D::Error::custom(
                    "each task list entry must be a single-key map",
                ));
            }
            for (key, task) in entry {
                items.push(TaskItem { key, task });
            }
        }
        Ok(TaskList(items))
    }
}

// ---------------------------------------------------------------------------
// Flow directives
// ---------------------------------------------------------------------------

/// Where execution goes after a task: the next task, out of the current
/// list, out of the whole workflow, or a named jump within the list.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum FlowDirective {
    #[default]
    Continue,
    Exit,
    End,
    Task(String),
}

impl FlowDirective {
    pub fn as_str(&self) -> &str {
        match self {
            FlowDirective::Continue => "continue",
            FlowDirective::Exit => "exit",
            FlowDirective::End => "end",
            FlowDirective::Task(name) => name,
        }
    }
}

impl From<&str> for FlowDirective {
    fn from(s: &str) -> Self {
        match s {
            "continue" => FlowDirective::Continue,
            "exit" => FlowDirective::Exit,
            "end" => FlowDirective::End,
            other => FlowDirective::Task(other.to_string()),
        }
    }
}

impl Serialize for FlowDirective {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for FlowDirective {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(FlowDirective::from(s.as_str()))
    }
}

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

/// Fields every task variant carries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskBase {
    /// Guard expression; a falsy result skips the task.
    #[serde(rename = "if", default, skip_serializing_if = "Option::is_none")]
    pub if_: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<InputSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<OutputSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub export: Option<ExportSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub then: Option<FlowDirective>,
    /// Task-level timeout (duration string).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,
}

/// `input`: optional schema plus a `from` transform-expression.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InputSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<serde_json::Value>,
}

/// `output`: optional schema plus an `as` transform-expression.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutputSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<serde_json::Value>,
    #[serde(rename = "as", default, skip_serializing_if = "Option::is_none")]
    pub as_: Option<serde_json::Value>,
}

/// `export`: like `output`, but the result is merged into workflow context.
pub type ExportSpec = OutputSpec;

/// Retry policy: exponential backoff with attempt and delay caps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_jitter")]
    pub jitter: bool,
    /// Error kinds eligible for retry; transient kinds when empty.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub retry_on: Vec<ErrorKind>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
            jitter: default_jitter(),
            retry_on: Vec::new(),
        }
    }
}

impl RetryPolicy {
    /// Whether a problem of this kind is eligible under the policy.
    pub fn retries(&self, kind: ErrorKind) -> bool {
        if self.retry_on.is_empty() {
            kind.is_retryable()
        } else {
            self.retry_on.contains(&kind)
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}
fn default_initial_delay_ms() -> u64 {
    500
}
fn default_max_delay_ms() -> u64 {
    30_000
}
fn default_multiplier() -> f64 {
    2.0
}
fn default_jitter() -> bool {
    true
}

/// The task vocabulary. Untagged: each variant is recognized by its
/// defining key. `For` precedes `Do` because a for task also carries `do`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Task {
    For(ForTask),
    Call(CallTask),
    Set(SetTask),
    Switch(SwitchTask),
    Fork(ForkTask),
    Try(TryTask),
    Raise(RaiseTask),
    Emit(EmitTask),
    Wait(WaitTask),
    Listen(ListenTask),
    Run(RunTask),
    Do(DoTask),
}

impl Task {
    pub fn base(&self) -> &TaskBase {
        match self {
            Task::For(t) => &t.base,
            Task::Call(t) => &t.base,
            Task::Set(t) => &t.base,
            Task::Switch(t) => &t.base,
            Task::Fork(t) => &t.base,
            Task::Try(t) => &t.base,
            Task::Raise(t) => &t.base,
            Task::Emit(t) => &t.base,
            Task::Wait(t) => &t.base,
            Task::Listen(t) => &t.base,
            Task::Run(t) => &t.base,
            Task::Do(t) => &t.base,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Task::For(_) => "for",
            Task::Call(_) => "call",
            Task::Set(_) => "set",
            Task::Switch(_) => "switch",
            Task::Fork(_) => "fork",
            Task::Try(_) => "try",
            Task::Raise(_) => "raise",
            Task::Emit(_) => "emit",
            Task::Wait(_) => "wait",
            Task::Listen(_) => "listen",
            Task::Run(_) => "run",
            Task::Do(_) => "do",
        }
    }
}

/// `call`: a built-in transport (`http`, `grpc`, `openapi`, `asyncapi`) or a
/// registered named function, with `with` arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallTask {
    pub call: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub with: Option<serde_json::Value>,
    #[serde(flatten)]
    pub base: TaskBase,
}

/// `set`: merge a literal/evaluated map into the current output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetTask {
    pub set: serde_json::Value,
    #[serde(flatten)]
    pub base: TaskBase,
}

/// `switch`: ordered cases, first truthy `when` wins; a case with no `when`
/// is the default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwitchTask {
    pub switch: Vec<SwitchCase>,
    #[serde(flatten)]
    pub base: TaskBase,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwitchCase {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<String>,
    pub then: FlowDirective,
}

/// `for`: iterate an evaluated iterable, binding `each`/`at` variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForTask {
    #[serde(rename = "for")]
    pub for_: ForSpec,
    #[serde(rename = "while", default, skip_serializing_if = "Option::is_none")]
    pub while_: Option<String>,
    #[serde(rename = "do")]
    pub do_: TaskList,
    #[serde(flatten)]
    pub base: TaskBase,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForSpec {
    /// Iteration variable name (default `$item`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub each: Option<String>,
    /// Index variable name (default `$index`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub at: Option<String>,
    /// Expression producing the iterable.
    #[serde(rename = "in")]
    pub in_: String,
}

/// `fork`: execute branches concurrently; `compete` keeps only the winner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForkTask {
    pub fork: ForkSpec,
    #[serde(flatten)]
    pub base: TaskBase,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForkSpec {
    pub branches: TaskList,
    #[serde(default)]
    pub compete: bool,
}

/// `try`: run a block, recover via `catch` on a matching error, optionally
/// retrying with backoff first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TryTask {
    #[serde(rename = "try")]
    pub try_: TaskList,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catch: Option<CatchSpec>,
    #[serde(flatten)]
    pub base: TaskBase,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CatchSpec {
    /// Structural error filter matched against the problem payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<ErrorFilter>,
    /// Expression filter evaluated with the error bound.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<String>,
    /// Variable name the caught error is bound to (default `error`).
    #[serde(rename = "as", default, skip_serializing_if = "Option::is_none")]
    pub as_: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,
    #[serde(rename = "do", default, skip_serializing_if = "Option::is_none")]
    pub do_: Option<TaskList>,
}

/// Structural filter: every listed field must equal the problem's field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorFilter {
    #[serde(default)]
    pub with: BTreeMap<String, serde_json::Value>,
}

/// `raise`: construct and throw a problem from a template or inline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaiseTask {
    pub raise: RaiseSpec,
    #[serde(flatten)]
    pub base: TaskBase,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaiseSpec {
    pub error: RaiseError,
}

/// Either a reference into `use.errors` or an inline definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RaiseError {
    Reference(String),
    Definition(ErrorDefinition),
}

/// `emit`: publish a CloudEvent built from `with` attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmitTask {
    pub emit: EmitSpec,
    #[serde(flatten)]
    pub base: TaskBase,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmitSpec {
    pub event: EventSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventSpec {
    #[serde(default)]
    pub with: BTreeMap<String, serde_json::Value>,
}

/// `wait`: pause for a duration (string form, e.g. `30s`, `PT5M`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaitTask {
    pub wait: String,
    #[serde(flatten)]
    pub base: TaskBase,
}

/// `listen`: suspend until a matching event signal arrives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListenTask {
    pub listen: ListenSpec,
    #[serde(flatten)]
    pub base: TaskBase,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListenSpec {
    /// Event filter, matched against incoming CloudEvent attributes.
    pub to: serde_json::Value,
}

/// `run`: execute a shell command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunTask {
    pub run: RunSpec,
    #[serde(flatten)]
    pub base: TaskBase,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSpec {
    pub shell: ShellSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShellSpec {
    pub command: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub arguments: Vec<String>,
}

/// `do`: a nested task list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DoTask {
    #[serde(rename = "do")]
    pub do_: TaskList,
    #[serde(flatten)]
    pub base: TaskBase,
}

// ---------------------------------------------------------------------------
// Parsing & validation
// ---------------------------------------------------------------------------

/// Errors from document parsing and structural validation.
#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("parse error: {0}")]
    Parse(String),

    #[error("validation error: {0}")]
    Validation(String),
}

/// Parse a YAML workflow document and validate it structurally.
pub fn parse_document(yaml: &str) -> Result<WorkflowDocument, DocumentError> {
    let doc: WorkflowDocument =
        serde_yaml_ng::from_str(yaml).map_err(|e| DocumentError::Parse(e.to_string()))?;
    validate_document(&doc)?;
    Ok(doc)
}

/// Validate structural constraints:
/// - the main list is non-empty with unique keys,
/// - every flow directive names a task in its list or is reserved,
/// - `set` bodies are maps (possibly empty, never null or scalar).
pub fn validate_document(doc: &WorkflowDocument) -> Result<(), DocumentError> {
    if doc.document.name.is_empty() {
        return Err(DocumentError::Validation(
            "document name must not be empty".to_string(),
        ));
    }
    if doc.do_.is_empty() {
        return Err(DocumentError::Validation(
            "workflow must have at least one task".to_string(),
        ));
    }
    validate_task_list(&doc.do_, "do")
}

fn validate_task_list(list: &TaskList, path: &str) -> Result<(), DocumentError> {
    let mut seen = std::collections::HashSet::new();
    for item in list.iter() {
        if !seen.insert(item.key.as_str()) {
            return Err(DocumentError::Validation(format!(
                "duplicate task key '{}' in '{}'",
                item.key, path
            )));
        }
    }

    for item in list.iter() {
        let task_path = format!("{}:{}", path, item.key);

        if let Some(FlowDirective::Task(target)) = &item.task.base().then {
            if list.find(target).is_none() {
                return Err(DocumentError::Validation(format!(
                    "task '{}' jumps to unknown task '{}'",
                    task_path, target
                )));
            }
        }

        match &item.task {
            Task::Set(set) => {
                if !set.set.is_object() {
                    return Err(DocumentError::Validation(format!(
                        "task '{}': set body must be a map",
                        task_path
                    )));
                }
            }
            Task::Switch(switch) => {
                if switch.switch.is_empty() {
                    return Err(DocumentError::Validation(format!(
                        "task '{}': switch needs at least one case",
                        task_path
                    )));
                }
                for case in &switch.switch {
                    if let FlowDirective::Task(target) = &case.then {
                        if list.find(target).is_none() {
                            return Err(DocumentError::Validation(format!(
                                "task '{}' switch case jumps to unknown task '{}'",
                                task_path, target
                            )));
                        }
                    }
                }
            }
            Task::For(for_task) => {
                validate_task_list(&for_task.do_, &task_path)?;
            }
            Task::Fork(fork) => {
                validate_task_list(&fork.fork.branches, &task_path)?;
            }
            Task::Try(try_task) => {
                validate_task_list(&try_task.try_, &task_path)?;
                if let Some(catch) = &try_task.catch {
                    if let Some(do_) = &catch.do_ {
                        validate_task_list(do_, &task_path)?;
                    }
                }
            }
            Task::Do(do_task) => {
                validate_task_list(&do_task.do_, &task_path)?;
            }
            _ => {}
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const ELEVATION_WORKFLOW: &str = r##"
document:
  name: slack_approval
  version: 0.1.0
use:
  errors:
    denied:
      type: authorization
      status: 403
      title: Access denied
      detail: ${ "Denied for \( $context.user.email )" }
do:
  - validate:
      call: grantor.validate
      with: { validator: static }
  - notify:
      call: grantor.notify
      with:
        provider: slack
        to: "#access"
        approvals: true
  - approve:
      call: grantor.approvals
      with: { provider: slack }
  - grant:
      call: grantor.authorize
      with: { revocation: revoke }
  - revoke:
      call: grantor.revoke
"##;

    #[test]
    fn parses_canonical_elevation_workflow() {
        let doc = parse_document(ELEVATION_WORKFLOW).unwrap();
        assert_eq!(doc.document.name, "slack_approval");
        assert_eq!(doc.do_.len(), 5);
        assert_eq!(
            doc.do_.keys().collect::<Vec<_>>(),
            vec!["validate", "notify", "approve", "grant", "revoke"]
        );
        match &doc.do_.0[3].task {
            Task::Call(call) => {
                assert_eq!(call.call, "grantor.authorize");
                assert_eq!(call.with.as_ref().unwrap()["revocation"], "revoke");
            }
            other => panic!("expected call task, got {}", other.kind_name()),
        }
        assert!(doc.use_.errors.contains_key("denied"));
    }

    #[test]
    fn task_list_preserves_declaration_order() {
        let yaml = r#"
- first: { set: { a: 1 } }
- second: { set: { b: 2 } }
- third: { set: { c: 3 } }
"#;
        let list: TaskList = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(list.keys().collect::<Vec<_>>(), vec!["first", "second", "third"]);
        let (idx, _) = list.find("second").unwrap();
        assert_eq!(idx, 1);
    }

    #[test]
    fn flow_directive_reserved_and_named() {
        assert_eq!(FlowDirective::from("continue"), FlowDirective::Continue);
        assert_eq!(FlowDirective::from("exit"), FlowDirective::Exit);
        assert_eq!(FlowDirective::from("end"), FlowDirective::End);
        assert_eq!(
            FlowDirective::from("revoke"),
            FlowDirective::Task("revoke".to_string())
        );
    }

    #[test]
    fn unknown_jump_target_rejected() {
        let yaml = r#"
document: { name: bad }
do:
  - only: { set: { a: 1 }, then: missing }
"#;
        let err = parse_document(yaml).unwrap_err();
        assert!(err.to_string().contains("unknown task 'missing'"));
    }

    #[test]
    fn null_set_body_rejected() {
        let yaml = r#"
document: { name: bad }
do:
  - broken: { set: ~ }
"#;
        // A null set body fails either at deserialization or validation;
        // both surface as a DocumentError.
        assert!(parse_document(yaml).is_err());
    }

    #[test]
    fn empty_set_body_is_legal() {
        let yaml = r#"
document: { name: ok }
do:
  - noop: { set: {} }
"#;
        parse_document(yaml).unwrap();
    }

    #[test]
    fn for_task_parses_before_do() {
        let yaml = r#"
document: { name: loops }
do:
  - each_provider:
      for: { in: "${ $context.providers }" }
      do:
        - grant_one: { set: { granted: true } }
"#;
        let doc = parse_document(yaml).unwrap();
        match &doc.do_.0[0].task {
            Task::For(for_task) => {
                assert_eq!(for_task.for_.in_, "${ $context.providers }");
                assert!(for_task.for_.each.is_none());
                assert_eq!(for_task.do_.len(), 1);
            }
            other => panic!("expected for task, got {}", other.kind_name()),
        }
    }

    #[test]
    fn fork_defaults_to_parallel() {
        let yaml = r#"
document: { name: forked }
do:
  - race:
      fork:
        branches:
          - a: { set: { a: 1 } }
          - b: { set: { b: 2 } }
"#;
        let doc = parse_document(yaml).unwrap();
        match &doc.do_.0[0].task {
            Task::Fork(fork) => {
                assert!(!fork.fork.compete);
                assert_eq!(fork.fork.branches.len(), 2);
            }
            other => panic!("expected fork task, got {}", other.kind_name()),
        }
    }

    #[test]
    fn raise_accepts_reference_and_inline() {
        let yaml = r#"
document: { name: raises }
use:
  errors:
    denied: { type: authorization, title: Denied }
do:
  - by_ref:
      raise: { error: denied }
      then: end
  - inline:
      raise:
        error: { type: validation, status: 400, title: Nope, detail: bad input }
"#;
        let doc = parse_document(yaml).unwrap();
        match &doc.do_.0[0].task {
            Task::Raise(raise) => {
                assert_eq!(raise.raise.error, RaiseError::Reference("denied".into()));
            }
            other => panic!("expected raise, got {}", other.kind_name()),
        }
        match &doc.do_.0[1].task {
            Task::Raise(raise) => match &raise.raise.error {
                RaiseError::Definition(def) => {
                    assert_eq!(def.kind, ErrorKind::Validation);
                    assert_eq!(def.status, Some(400));
                }
                other => panic!("expected inline definition, got {:?}", other),
            },
            other => panic!("expected raise, got {}", other.kind_name()),
        }
    }

    #[test]
    fn retry_policy_defaults() {
        let policy: RetryPolicy = serde_yaml_ng::from_str("{}").unwrap();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.initial_delay_ms, 500);
        assert!(policy.jitter);
        assert!(policy.retries(ErrorKind::Communication));
        assert!(!policy.retries(ErrorKind::Validation));
    }

    #[test]
    fn retry_policy_explicit_kinds_override_default() {
        let policy: RetryPolicy =
            serde_yaml_ng::from_str("retry_on: [runtime]").unwrap();
        assert!(policy.retries(ErrorKind::Runtime));
        assert!(!policy.retries(ErrorKind::Communication));
    }

    #[test]
    fn document_roundtrips_through_yaml() {
        let doc = parse_document(ELEVATION_WORKFLOW).unwrap();
        let yaml = serde_yaml_ng::to_string(&doc).unwrap();
        let back: WorkflowDocument = serde_yaml_ng::from_str(&yaml).unwrap();
        assert_eq!(back, doc);
    }
}
