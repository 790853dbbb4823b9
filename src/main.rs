use std::fs;
use std::time::Instant;

use camino::Utf8PathBuf;
use clap::Parser;
use console::style;
use svflow::{DryRun, LocalExecutor, RunConfig, Workflow, as_overhead, init_logging};

/// Plan and run the structural variant calling workflow.
#[derive(Parser, Debug, Clone)]
#[command(version, about)]
struct Args {
    /// Run configuration file (JSON).
    #[arg(short, long)]
    config: Utf8PathBuf,

    /// Overrides the run directory of the configuration.
    #[arg(long)]
    run_dir: Option<Utf8PathBuf>,

    /// Maximum number of tasks running at once, 0 for one per core.
    #[arg(short, long, default_value_t = 0)]
    jobs: usize,

    /// Memory budget shared by the running tasks, in MiB.
    #[arg(long)]
    memory_mb: Option<u64>,

    /// Keep staging directories after their contents have been merged.
    #[arg(long)]
    retain_temp_files: bool,

    /// Log the planned tasks without running them.
    #[arg(long)]
    dry_run: bool,

    /// Write the planned task graph as JSON.
    #[arg(long)]
    emit_plan: Option<Utf8PathBuf>,

    /// Write the task graph as a Mermaid chart, colored by duration after a run.
    #[arg(long)]
    mermaid: Option<Utf8PathBuf>,

    /// More detailed logs, repeat for even more.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.verbose)?;

    let mut config = RunConfig::load(&args.config)?;
    if let Some(run_dir) = args.run_dir {
        config.run_dir = run_dir;
    }
    config.retain_temp_files |= args.retain_temp_files;
    if config.command_line.is_empty() {
        config.command_line = std::env::args().collect();
    }

    let workflow = Workflow::plan(&config)?;
    let plan = workflow.blueprint();

    eprintln!(
        "{} {} tasks for a {} run in {}",
        style("Planned").green().bold(),
        plan.len(),
        workflow.features().mode,
        style(workflow.layout().run_dir()).cyan(),
    );

    if let Some(path) = &args.emit_plan {
        fs::write(path, plan.to_json()?)?;
    }

    if args.dry_run {
        if let Some(path) = &args.mermaid {
            fs::write(path, plan.to_string())?;
        }
        workflow.run(&DryRun)?;
        return Ok(());
    }

    let mut executor = LocalExecutor::new(args.jobs);
    if let Some(memory_mb) = args.memory_mb {
        executor = executor.with_memory_mb(memory_mb);
    }

    let s = Instant::now();
    let diagnostics = workflow.run(&executor)?;

    if let Some(path) = &args.mermaid {
        fs::write(path, diagnostics.render_mermaid(plan))?;
    }

    for (name, duration) in diagnostics.slowest(plan, 3) {
        eprintln!("  {} {name} {duration:.2?}", style("slow").yellow());
    }

    eprintln!(
        "{} {} tasks {}",
        style("Finished").green().bold(),
        diagnostics.executed(),
        as_overhead(s)
    );

    Ok(())
}
