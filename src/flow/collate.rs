//! Fan-in: manifests, merges and the variant finalization pipeline.

use camino::{Utf8Path, Utf8PathBuf};

use crate::blueprint::{Blueprint, TaskDef};
use crate::engine::{Action, Dependencies, Frontier, Invocation, Pipeline, TaskId};
use crate::error::PlanError;
use crate::flow::{FlowContext, pre_join};
use crate::paths::VariantKind;

/// The files produced by a fan-out stage, to be listed in a manifest.
pub(crate) struct InputList {
    pub name: String,
    pub path: Utf8PathBuf,
    pub inputs: Vec<Utf8PathBuf>,
}

impl InputList {
    /// Emits the manifest task, waiting for `producers`, and starts the merge
    /// task reading it. The caller finishes the returned builder with the
    /// merge command.
    pub fn merge<'p>(
        self,
        plan: &'p mut Blueprint,
        producers: impl Dependencies,
        merge_name: String,
    ) -> Result<TaskDef<'p>, PlanError> {
        let list = plan
            .task(self.name)
            .depends_on(producers)
            .force_local()
            .run(Action::WriteManifest {
                path: self.path.clone(),
                entries: self.inputs.clone(),
            })?;

        Ok(plan
            .task(merge_name)
            .depends_on(list)
            .reads(&self.inputs)
            .reads([&self.path]))
    }
}

/// The last two tasks of a finalized variant family.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Finalized {
    pub sort: TaskId,
    pub tabix: TaskId,
}

/// Header fix of the first file, manifest, sort, compress and index.
///
/// Nothing is emitted for an empty family.
pub(crate) fn finalize_variants(
    ctx: &FlowContext,
    plan: &mut Blueprint,
    prefix: &str,
    kind: VariantKind,
    inputs: Vec<Utf8PathBuf>,
    dependencies: &Frontier,
) -> Result<Option<Finalized>, PlanError> {
    let Some(first) = inputs.first().cloned() else {
        return Ok(None);
    };

    let programs = &ctx.config.programs;
    let label = kind.label();

    let temp = Utf8PathBuf::from(format!("{first}.reheader.tmp"));
    let header_fix = plan
        .task(pre_join(prefix, format_args!("fixVcfHeader_{label}")))
        .depends_on(dependencies)
        .force_local()
        .run(Action::Sequence(vec![
            Pipeline::new(
                Invocation::new(&programs.vcf_header_fix).arg(ctx.config.command_line.join(" ")),
            )
            .stdin(&first)
            .stdout(&temp)
            .into(),
            Action::Rename {
                from: temp,
                to: first,
            },
        ]))?;

    let list = ctx.layout.variant_list(kind);
    let output = ctx.layout.sorted_output(kind);

    let sort = InputList {
        name: pre_join(prefix, format_args!("{label}InputList")),
        path: list.clone(),
        inputs,
    }
    .merge(plan, header_fix, pre_join(prefix, format_args!("sort_{label}")))?
    .run(sort_action(ctx, kind, &list, &output))?;

    let tabix = tabix(
        ctx,
        plan,
        pre_join(prefix, format_args!("tabix_{label}")),
        &output,
        sort,
    )?;

    Ok(Some(Finalized { sort, tabix }))
}

fn sort_action(ctx: &FlowContext, kind: VariantKind, list: &Utf8Path, output: &Utf8Path) -> Action {
    let programs = &ctx.config.programs;
    let sort = Invocation::new(&programs.sort_vcf).arg("-u").opt("-f", list);
    let compress = Invocation::new(&programs.bgzip).arg("-c");

    if kind != VariantKind::Diploid {
        return Pipeline::new(sort).pipe(compress).stdout(output).into();
    }

    // diploid calls pass the ploidy filter through an uncompressed temp file
    let temp = ctx.layout.diploid_temp();
    Action::Sequence(vec![
        Pipeline::new(sort).stdout(&temp).into(),
        Pipeline::new(Invocation::new(&programs.ploidy_filter).arg(&temp))
            .pipe(compress)
            .stdout(output)
            .into(),
        Action::RemoveFile(temp),
    ])
}

pub(crate) fn tabix(
    ctx: &FlowContext,
    plan: &mut Blueprint,
    name: String,
    vcf: &Utf8Path,
    dependencies: impl Dependencies,
) -> Result<TaskId, PlanError> {
    plan.task(name)
        .depends_on(dependencies)
        .force_local()
        .reads([vcf])
        .writes([format!("{vcf}.tbi")])
        .run(
            Invocation::new(&ctx.config.programs.tabix)
                .arg("-f")
                .opt("-p", "vcf")
                .arg(vcf),
        )
}

/// Pulls the candidates below the scored size out of the sorted candidate
/// file. Returns the index task, or nothing when the threshold leaves no
/// size range to extract.
pub(crate) fn extract_small_indels(
    ctx: &FlowContext,
    plan: &mut Blueprint,
    prefix: &str,
    candidates: Finalized,
) -> Result<Option<TaskId>, PlanError> {
    let max_size = i64::from(ctx.config.thresholds.min_scored_variant_size) - 1;
    if max_size < 1 {
        return Ok(None);
    }

    let programs = &ctx.config.programs;
    let input = ctx.layout.sorted_output(VariantKind::Candidate);
    let output = ctx.layout.small_indels();
    let name = pre_join(prefix, "extractSmallIndels");

    let small = plan
        .task(&name)
        .depends_on(candidates.sort)
        .force_local()
        .reads([&input])
        .run(
            Pipeline::new(Invocation::new(&programs.bgzip).arg("-dc").arg(&input))
                .pipe(Invocation::new(&programs.extract_small_indels).opt("--maxSize", max_size))
                .pipe(Invocation::new(&programs.bgzip).arg("-c"))
                .stdout(&output),
        )?;

    tabix(ctx, plan, format!("{name}_tabix"), &output, small).map(Some)
}
