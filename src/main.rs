mod callgraph;
mod dataflow;
mod descriptor;
mod entrypoints;
mod ir;
mod model;
mod opcodes;
mod paths;
mod report;
mod scan;

use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::json;
use serde_sarif::sarif::{Invocation, Run, Sarif, Tool, ToolComponent, SCHEMA_URL};

use crate::callgraph::{CallGraphProvider, ClassHierarchyProvider};
use crate::entrypoints::{identify_entry_points, StderrDiagnostics};
use crate::model::ProgramModel;
use crate::paths::extract_paths;
use crate::report::{entry_point_results, write_call_graph, PathWriter};
use crate::scan::scan_inputs;

/// CLI arguments for bindersight execution.
#[derive(Parser, Debug)]
#[command(
    name = "bindersight",
    about = "Attack-surface mapper for framework services: entry-point discovery and call-path extraction over JVM bytecode.",
    version
)]
struct Cli {
    /// Framework services artifact: a JAR, a directory, or a class file.
    #[arg(long, value_name = "PATH")]
    input: PathBuf,
    /// Platform stub artifacts used for type resolution.
    #[arg(long, value_name = "PATH")]
    classpath: Vec<PathBuf>,
    /// SARIF entry-point report destination; stdout when omitted.
    #[arg(long, value_name = "PATH")]
    output: Option<PathBuf>,
    /// Call-path dump destination.
    #[arg(long, value_name = "PATH", default_value = "core_paths.txt")]
    paths_output: PathBuf,
    /// Call-graph dump destination.
    #[arg(long, value_name = "PATH", default_value = "callgraph.txt")]
    graph_output: PathBuf,
    #[arg(long)]
    quiet: bool,
    #[arg(long)]
    timing: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    run(cli)
}

fn run(cli: Cli) -> Result<()> {
    if !cli.input.exists() {
        anyhow::bail!("input not found: {}", cli.input.display());
    }
    for entry in &cli.classpath {
        if !entry.exists() {
            anyhow::bail!("classpath entry not found: {}", entry.display());
        }
    }

    let started_at = Instant::now();
    let scan = scan_inputs(&cli.input, &cli.classpath)?;
    let class_count = scan.class_count;
    let model = ProgramModel::from_classes(scan.classes);

    let mut diagnostics = StderrDiagnostics { quiet: cli.quiet };
    let entries = identify_entry_points(&model, &mut diagnostics)
        .context("entry-point identification failed")?;
    if !cli.quiet {
        eprintln!("building call graph for {} entry points", entries.len());
    }
    let graph = ClassHierarchyProvider.build(&model, &entries);

    let mut path_writer = PathWriter::create(&cli.paths_output, cli.quiet);
    for &entry in &entries {
        extract_paths(&model, &graph, entry, &mut path_writer);
    }
    path_writer.finish()?;
    write_call_graph(&model, &graph, &cli.graph_output)?;

    let invocation = build_invocation();
    let sarif = build_sarif(entry_point_results(&model, &entries), invocation);
    let mut writer = output_writer(cli.output.as_deref())?;
    serde_json::to_writer_pretty(&mut writer, &sarif)
        .context("failed to serialize SARIF output")?;
    writer
        .write_all(b"\n")
        .context("failed to write SARIF output")?;

    if cli.timing && !cli.quiet {
        eprintln!(
            "timing: total_ms={} classes={} entry_points={} edges={} traces={}",
            started_at.elapsed().as_millis(),
            class_count,
            entries.len(),
            graph.edge_count(),
            path_writer.emitted()
        );
    }

    Ok(())
}

fn output_writer(output: Option<&Path>) -> Result<Box<dyn Write>> {
    match output {
        Some(path) if path == Path::new("-") => Ok(Box::new(io::stdout())),
        Some(path) => Ok(Box::new(
            File::create(path).with_context(|| format!("failed to open {}", path.display()))?,
        )),
        None => Ok(Box::new(io::stdout())),
    }
}

fn build_invocation() -> Invocation {
    let arguments: Vec<String> = std::env::args().collect();
    let command_line = arguments.join(" ");

    Invocation::builder()
        .execution_successful(true)
        .arguments(arguments)
        .command_line(command_line)
        .build()
}

fn build_sarif(results: Vec<serde_sarif::sarif::Result>, invocation: Invocation) -> Sarif {
    let driver = ToolComponent::builder()
        .name("bindersight")
        .information_uri("https://github.com/kkoiso/bindersight")
        .build();
    let tool = Tool {
        driver,
        extensions: None,
        properties: None,
    };
    let run = Run::builder()
        .tool(tool)
        .invocations(vec![invocation])
        .results(results)
        .build();

    Sarif::builder()
        .schema(SCHEMA_URL)
        .runs(vec![run])
        .version(json!("2.1.0"))
        .build()
}
