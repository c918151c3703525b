//! Reporting: streaming path dump, plain-text call-graph dump, and the
//! SARIF results for discovered entry points.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use serde_sarif::sarif::{Location, LogicalLocation, Message, Result as SarifResult};

use crate::callgraph::CallGraph;
use crate::model::{MethodRef, ProgramModel};
use crate::paths::TraceSink;

/// Streams completed traces to the paths file and prints a short
/// console summary per trace. A file that cannot be opened degrades to
/// console-only output; the analysis itself keeps going.
pub(crate) struct PathWriter {
    writer: Option<BufWriter<File>>,
    quiet: bool,
    emitted: usize,
}

impl PathWriter {
    pub(crate) fn create(path: &Path, quiet: bool) -> Self {
        let writer = match File::create(path) {
            Ok(file) => Some(BufWriter::new(file)),
            Err(error) => {
                if !quiet {
                    eprintln!(
                        "failed to open {} for writing: {error}; traces go to console only",
                        path.display()
                    );
                }
                None
            }
        };
        Self {
            writer,
            quiet,
            emitted: 0,
        }
    }

    pub(crate) fn emitted(&self) -> usize {
        self.emitted
    }

    pub(crate) fn finish(&mut self) -> Result<()> {
        if let Some(writer) = &mut self.writer {
            writer.flush().context("failed to flush path dump")?;
        }
        Ok(())
    }

    fn write_trace(&mut self, terminus: &str, trace: &[String]) -> std::io::Result<()> {
        let Some(writer) = &mut self.writer else {
            return Ok(());
        };
        writeln!(writer, "=== Core Path for {terminus} ===")?;
        for line in trace {
            writeln!(writer, "  {line}")?;
        }
        writeln!(writer)?;
        writer.flush()
    }
}

impl TraceSink for PathWriter {
    fn emit(&mut self, terminus: &str, trace: &[String]) {
        self.emitted += 1;
        if !self.quiet {
            eprintln!("--- Core Path Found for {} ---", short_name(terminus));
            if trace.len() > 5 {
                eprintln!("{}", trace[0]);
                eprintln!("... ({} steps) ...", trace.len() - 2);
                eprintln!("{}", trace[trace.len() - 1]);
            } else {
                for line in trace {
                    eprintln!("{line}");
                }
            }
        }
        if let Err(error) = self.write_trace(terminus, trace) {
            if !self.quiet {
                eprintln!("failed writing path dump: {error}; traces go to console only");
            }
            self.writer = None;
        }
    }
}

/// `com/a/Svc.doWork(I)I` -> `doWork`.
fn short_name(signature: &str) -> &str {
    let end = signature.find('(').unwrap_or(signature.len());
    let start = signature[..end].rfind('.').map(|dot| dot + 1).unwrap_or(0);
    &signature[start..end]
}

/// Plain-text adjacency dump restricted to application-to-application
/// edges, deterministically ordered.
pub(crate) fn write_call_graph(
    model: &ProgramModel,
    graph: &CallGraph,
    path: &Path,
) -> Result<()> {
    let mut adjacency: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for (caller, _, target) in graph.edges() {
        if !model.class(caller.class).is_application || !model.class(target.class).is_application
        {
            continue;
        }
        adjacency
            .entry(model.signature(caller))
            .or_default()
            .insert(model.signature(target));
    }

    let file = File::create(path)
        .with_context(|| format!("failed to open {} for writing", path.display()))?;
    let mut writer = BufWriter::new(file);
    for (caller, callees) in &adjacency {
        writeln!(writer, "CALLER: {caller}")
            .with_context(|| format!("failed writing {}", path.display()))?;
        for callee in callees {
            writeln!(writer, "    -> {callee}")
                .with_context(|| format!("failed writing {}", path.display()))?;
        }
        writeln!(writer).with_context(|| format!("failed writing {}", path.display()))?;
    }
    writer
        .flush()
        .with_context(|| format!("failed writing {}", path.display()))
}

/// One SARIF result per discovered entry point.
pub(crate) fn entry_point_results(
    model: &ProgramModel,
    entries: &BTreeSet<MethodRef>,
) -> Vec<SarifResult> {
    entries
        .iter()
        .map(|&entry| {
            let class = &model.class(entry.class).name;
            let method = model.method(entry);
            SarifResult::builder()
                .rule_id("ENTRY_POINT")
                .message(result_message(format!(
                    "Externally reachable entry point: {}",
                    model.signature(entry)
                )))
                .locations(vec![method_location(class, &method.name, &method.descriptor)])
                .build()
        })
        .collect()
}

pub(crate) fn method_location(class_name: &str, method_name: &str, descriptor: &str) -> Location {
    let logical = method_logical_location(class_name, method_name, descriptor);
    Location::builder().logical_locations(vec![logical]).build()
}

fn method_logical_location(
    class_name: &str,
    method_name: &str,
    descriptor: &str,
) -> LogicalLocation {
    LogicalLocation::builder()
        .name(format!("{class_name}.{method_name}{descriptor}"))
        .kind("function")
        .build()
}

pub(crate) fn result_message(text: impl Into<String>) -> Message {
    Message::builder().text(text.into()).build()
}
