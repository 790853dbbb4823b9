use camino::Utf8PathBuf;

use crate::Blueprint;
use crate::engine::{Action, Dependencies, TaskId};
use crate::error::PlanError;
use crate::flow::{FlowContext, pre_join};

/// A temporary directory owned by one stage.
///
/// Created by a local mkdir task; removed by [`Staging::schedule_cleanup`]
/// once every task using it has finished, unless the run keeps its
/// temporary files.
pub(crate) struct Staging {
    prefix: String,
    dir: Utf8PathBuf,
    task: TaskId,
}

impl Staging {
    pub fn create(
        plan: &mut Blueprint,
        prefix: &str,
        label: &str,
        dir: Utf8PathBuf,
        dependencies: impl Dependencies,
    ) -> Result<Self, PlanError> {
        let task = plan
            .task(pre_join(prefix, label))
            .depends_on(dependencies)
            .force_local()
            .run(Action::MakeDir(dir.clone()))?;

        Ok(Self {
            prefix: prefix.to_string(),
            dir,
            task,
        })
    }

    /// The mkdir task; everything writing into the directory waits for it.
    pub fn task(&self) -> TaskId {
        self.task
    }

    /// `readers` must cover every task that reads or writes inside the
    /// directory, directly or through their own dependencies.
    pub fn schedule_cleanup(
        self,
        ctx: &FlowContext,
        plan: &mut Blueprint,
        label: &str,
        readers: impl Dependencies,
    ) -> Result<Option<TaskId>, PlanError> {
        if ctx.config.retain_temp_files {
            return Ok(None);
        }

        plan.task(pre_join(&self.prefix, label))
            .depends_on((self.task, readers))
            .force_local()
            .run(Action::RemoveDir(self.dir))
            .map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RunConfig;
    use crate::engine::Invocation;
    use crate::genome::GenomeIndex;
    use crate::mode::Features;
    use crate::paths::RunLayout;

    fn with_context<T>(retain: bool, f: impl FnOnce(&FlowContext) -> T) -> T {
        let mut config = RunConfig::new("/run", "/ref.fa");
        config.normal_alignments.push("n.bam".into());
        config.retain_temp_files = retain;

        let genome = GenomeIndex::from_chromosomes([("chr1", 1000)]);
        let layout = RunLayout::new(&config);
        let ctx = FlowContext {
            config: &config,
            genome: &genome,
            layout: &layout,
            features: Features::resolve(&config),
        };

        f(&ctx)
    }

    #[test]
    fn test_cleanup_waits_for_readers() {
        with_context(false, |ctx| {
            let mut plan = Blueprint::new();
            let staging = Staging::create(&mut plan, "stage", "makeTmpDir", "/run/tmp".into(), ())
                .unwrap();

            let reader = plan
                .task("reader")
                .depends_on(staging.task())
                .reads(["/run/tmp/a"])
                .run(Invocation::new("true"))
                .unwrap();

            let cleanup = staging
                .schedule_cleanup(ctx, &mut plan, "rmTmpDir", reader)
                .unwrap()
                .unwrap();

            assert_eq!(plan.get(cleanup).name(), "stage_rmTmpDir");
            assert!(plan.get(cleanup).is_local());
            assert!(plan.ancestors(cleanup).contains(&reader));
            assert!(plan.check_cleanup_order().is_ok());
        });
    }

    #[test]
    fn test_retention_skips_cleanup() {
        with_context(true, |ctx| {
            let mut plan = Blueprint::new();
            let staging = Staging::create(&mut plan, "", "makeTmpDir", "/run/tmp".into(), ())
                .unwrap();

            let cleanup = staging
                .schedule_cleanup(ctx, &mut plan, "rmTmpDir", ())
                .unwrap();
            assert!(cleanup.is_none());
            assert_eq!(plan.len(), 1);
            assert_eq!(plan.get(plan.ids().next().unwrap()).name(), "makeTmpDir");
        });
    }
}
