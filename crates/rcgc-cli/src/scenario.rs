//! Line-oriented host scenarios.
//!
//! Each non-empty line is one command; `#` starts a comment. Values and
//! contexts are bound to names. Commands that observe state print one line.
//!
//! ```text
//! ctx c                 new context
//! object o [c]          new object (class prototype of c, or no prototype)
//! array a [c]           new array
//! string s text...      new string
//! set o key v           store a new reference to v under o.key
//! get v o key           bind v to a new reference to o.key
//! dup v | free v        ordinary count operations
//! adopt v | release v   host-side count operations; release prints the count
//! retain c v            register v on c's retained-value list
//! inspect v | live v    print count or liveness
//! gc                    run the cycle collector and print the freed count
//! ctx-dup c | ctx-free c
//! shutdown              shut the runtime down and print the report
//! ```

use rcgc::context::{ContextConfig, ContextId};
use rcgc::external::ExternalOwnership;
use rcgc::jsvalue::{JS_NULL, JSValue};
use rcgc::runtime::{JSRuntime, RuntimeError};
use rcgc::teardown::{ShutdownReport, TeardownDecision};
use std::collections::{HashMap, HashSet};
use std::io::Write;

#[derive(Debug)]
pub struct ScenarioError {
    pub line: usize,
    pub kind: ScenarioErrorKind,
}

#[derive(Debug)]
pub enum ScenarioErrorKind {
    UnknownCommand(String),
    MissingArgument(&'static str),
    UnknownValue(String),
    UnknownContext(String),
    Dangling(String),
    Runtime(RuntimeError),
    Io(String),
}

impl std::fmt::Display for ScenarioError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {}: ", self.line)?;
        match &self.kind {
            ScenarioErrorKind::UnknownCommand(cmd) => write!(f, "unknown command '{cmd}'"),
            ScenarioErrorKind::MissingArgument(what) => write!(f, "missing {what}"),
            ScenarioErrorKind::UnknownValue(name) => write!(f, "unknown value '{name}'"),
            ScenarioErrorKind::UnknownContext(name) => write!(f, "unknown context '{name}'"),
            ScenarioErrorKind::Dangling(name) => write!(f, "'{name}' was freed"),
            ScenarioErrorKind::Runtime(err) => write!(f, "{err}"),
            ScenarioErrorKind::Io(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for ScenarioError {}

impl From<RuntimeError> for ScenarioErrorKind {
    fn from(err: RuntimeError) -> Self {
        ScenarioErrorKind::Runtime(err)
    }
}

impl From<std::io::Error> for ScenarioErrorKind {
    fn from(err: std::io::Error) -> Self {
        ScenarioErrorKind::Io(err.to_string())
    }
}

/// Name bindings. A name whose object was freed moves to `freed` before the
/// next command runs, so it can never alias an object allocated later at the
/// same address.
#[derive(Default)]
struct Bindings {
    values: HashMap<String, JSValue>,
    freed: HashSet<String>,
    contexts: HashMap<String, ContextId>,
}

impl Bindings {
    fn value(&self, name: Option<&str>) -> Result<JSValue, ScenarioErrorKind> {
        let name = name.ok_or(ScenarioErrorKind::MissingArgument("value name"))?;
        if self.freed.contains(name) {
            return Err(ScenarioErrorKind::Dangling(name.to_string()));
        }
        self.values
            .get(name)
            .copied()
            .ok_or_else(|| ScenarioErrorKind::UnknownValue(name.to_string()))
    }

    /// Binds a value the runtime just allocated. Other names holding the same
    /// bits refer to an object freed while the allocation ran.
    fn bind_new(&mut self, name: &str, val: JSValue) {
        if val.is_ptr() {
            let stale: Vec<String> = self
                .values
                .iter()
                .filter(|(_, bound)| **bound == val)
                .map(|(other, _)| other.clone())
                .collect();
            for other in stale {
                self.values.remove(&other);
                self.freed.insert(other);
            }
        }
        self.bind(name, val);
    }

    fn bind(&mut self, name: &str, val: JSValue) {
        self.freed.remove(name);
        self.values.insert(name.to_string(), val);
    }

    /// Retires every name whose object is neither live nor parked.
    fn retire_freed(&mut self, rt: &JSRuntime) {
        let gone: Vec<String> = self
            .values
            .iter()
            .filter(|(_, val)| {
                val.is_ptr() && !rt.is_live_object(**val) && !rt.is_parked_object(**val)
            })
            .map(|(name, _)| name.clone())
            .collect();
        for name in gone {
            self.values.remove(&name);
            self.freed.insert(name);
        }
    }

    fn context(&self, name: Option<&str>) -> Result<ContextId, ScenarioErrorKind> {
        let name = name.ok_or(ScenarioErrorKind::MissingArgument("context name"))?;
        self.contexts
            .get(name)
            .copied()
            .ok_or_else(|| ScenarioErrorKind::UnknownContext(name.to_string()))
    }
}

/// Runs `source` against `rt`, writing observations to `out`. The runtime is
/// shut down at the end unless the scenario already did it.
pub fn run(rt: &mut JSRuntime, source: &str, out: &mut impl Write) -> Result<(), ScenarioError> {
    let mut bindings = Bindings::default();
    let mut last_line = 0;
    for (idx, raw) in source.lines().enumerate() {
        last_line = idx + 1;
        let line = raw.split('#').next().unwrap_or_default().trim();
        if line.is_empty() {
            continue;
        }
        tracing::debug!(line = last_line, command = line, "scenario step");
        let result = step(rt, &mut bindings, line, out);
        bindings.retire_freed(rt);
        result.map_err(|kind| ScenarioError {
            line: last_line,
            kind,
        })?;
    }
    if !rt.is_shut_down() {
        let report = rt.shutdown();
        print_report(&report, out).map_err(|err| ScenarioError {
            line: last_line,
            kind: err.into(),
        })?;
    }
    Ok(())
}

fn step(
    rt: &mut JSRuntime,
    bindings: &mut Bindings,
    line: &str,
    out: &mut impl Write,
) -> Result<(), ScenarioErrorKind> {
    let mut words = line.split_whitespace();
    let Some(cmd) = words.next() else {
        return Ok(());
    };
    match cmd {
        "ctx" => {
            let name = words.next().ok_or(ScenarioErrorKind::MissingArgument("context name"))?;
            let ctx = rt.new_context(ContextConfig::default())?;
            bindings.contexts.insert(name.to_string(), ctx);
        }
        "ctx-dup" => rt.dup_context(bindings.context(words.next())?),
        "ctx-free" => {
            let decision = rt.free_context(bindings.context(words.next())?);
            writeln!(out, "{}", describe_decision(&decision))?;
        }
        "object" | "array" => {
            let name = words.next().ok_or(ScenarioErrorKind::MissingArgument("value name"))?;
            let val = match (cmd, words.next()) {
                ("object", Some(ctx)) => rt.new_object(bindings.context(Some(ctx))?)?,
                ("object", None) => rt.new_plain_object(JS_NULL)?,
                (_, Some(ctx)) => rt.new_array(bindings.context(Some(ctx))?)?,
                (_, None) => rt.new_array_from(JS_NULL, Vec::new())?,
            };
            bindings.bind_new(name, val);
        }
        "string" => {
            let name = words.next().ok_or(ScenarioErrorKind::MissingArgument("value name"))?;
            let text = words.collect::<Vec<_>>().join(" ");
            let val = rt.new_string(&text)?;
            bindings.bind_new(name, val);
        }
        "set" => {
            let obj = bindings.value(words.next())?;
            let key = words.next().ok_or(ScenarioErrorKind::MissingArgument("property key"))?;
            let val = bindings.value(words.next())?;
            rt.set_property(obj, key, rt.dup_value(val))?;
        }
        "get" => {
            let name = words.next().ok_or(ScenarioErrorKind::MissingArgument("value name"))?;
            let obj = bindings.value(words.next())?;
            let key = words.next().ok_or(ScenarioErrorKind::MissingArgument("property key"))?;
            let val = rt.get_property(obj, key);
            bindings.bind(name, val);
        }
        "dup" => {
            rt.dup_value(bindings.value(words.next())?);
        }
        "free" => rt.free_value(bindings.value(words.next())?),
        "adopt" => rt.adopt_extra_reference(bindings.value(words.next())?),
        "release" => {
            let count = rt.release_external_reference(bindings.value(words.next())?);
            writeln!(out, "{count}")?;
        }
        "retain" => {
            let ctx = bindings.context(words.next())?;
            let val = bindings.value(words.next())?;
            rt.retain_active(ctx, val)?;
        }
        "inspect" => {
            let count = rt.inspect(bindings.value(words.next())?);
            writeln!(out, "{count}")?;
        }
        "live" => {
            let live = rt.is_live_object(bindings.value(words.next())?);
            writeln!(out, "{live}")?;
        }
        "gc" => {
            let freed = rt.run_gc();
            writeln!(out, "{freed}")?;
        }
        "shutdown" => {
            let report = rt.shutdown();
            print_report(&report, out)?;
        }
        other => return Err(ScenarioErrorKind::UnknownCommand(other.to_string())),
    }
    Ok(())
}

fn describe_decision(decision: &TeardownDecision) -> String {
    match decision {
        TeardownDecision::Proceed => "proceed".to_string(),
        TeardownDecision::Defer => "defer".to_string(),
        TeardownDecision::TolerateAndLog(diag) => format!("tolerate: {diag}"),
    }
}

fn print_report(report: &ShutdownReport, out: &mut impl Write) -> std::io::Result<()> {
    writeln!(
        out,
        "shutdown: {} contexts closed, {} collected, {} residual, {} parked reclaimed",
        report.contexts_closed,
        report.cycles_collected,
        report.residual.len(),
        report.zombies_reclaimed
    )?;
    for diag in &report.diagnostics {
        writeln!(out, "  {:?}: {diag}", diag.cause)?;
    }
    Ok(())
}
