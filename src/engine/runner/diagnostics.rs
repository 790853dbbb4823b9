use std::collections::HashMap;
use std::fmt::Write;
use std::time::Duration;

use crate::Blueprint;
use crate::engine::{TaskExecution, TaskId};

/// Run diagnostics and performance metrics.
///
/// This struct is returned by [`Executor::execute`](crate::Executor::execute)
/// and records when each task that ran started and how long it took.
#[derive(Debug, Default)]
pub struct Diagnostics {
    /// A map of tasks to their execution metrics.
    pub execution_times: HashMap<TaskId, TaskExecution>,
}

impl Diagnostics {
    /// Number of tasks that ran, successfully or not.
    pub fn executed(&self) -> usize {
        self.execution_times.len()
    }

    /// The `n` longest running tasks, longest first.
    pub fn slowest<'a>(&self, plan: &'a Blueprint, n: usize) -> Vec<(&'a str, Duration)> {
        let mut times: Vec<_> = self
            .execution_times
            .iter()
            .map(|(id, exec)| (plan.get(*id).name(), exec.duration))
            .collect();

        times.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        times.truncate(n);
        times
    }

    /// Renders the task graph as a Mermaid diagram, color-coded by execution duration.
    ///
    /// * **Green**: Fast
    /// * **Yellow**: Moderate
    /// * **Red**: Slow
    /// * **Grey**: Never started
    pub fn render_mermaid(&self, plan: &Blueprint) -> String {
        let mut f = String::new();
        let _ = writeln!(f, "graph LR");

        let times = &self.execution_times;
        let mut min_time = f64::MAX;
        let mut max_time = f64::MIN;

        for t in times.values() {
            let secs = t.duration.as_secs_f64();
            min_time = min_time.min(secs);
            max_time = max_time.max(secs);
        }

        if min_time > max_time {
            min_time = 0.0;
            max_time = 0.0;
        }

        // all tasks took the same time
        if (max_time - min_time).abs() < f64::EPSILON {
            max_time = min_time + 1.0;
        }

        for id in plan.ids() {
            let name = plan.get(id).name().replace('"', "#quot;");

            let (label_extra, color_code) = match times.get(&id) {
                Some(exec) => {
                    let t = (exec.duration.as_secs_f64() - min_time) / (max_time - min_time);
                    (format!("{:.2?}", exec.duration), heat(t))
                }
                None => ("Not run".to_string(), "#D3D3D3".to_string()),
            };

            let _ = writeln!(f, "    {}[\"{}\\n{}\"]", id.index(), name, label_extra);
            let _ = writeln!(f, "    style {} fill:{}", id.index(), color_code);
        }

        for (source, target) in plan.edges() {
            let _ = writeln!(f, "    {} --> {}", source.index(), target.index());
        }

        f
    }
}

/// Green at 0.0, yellow at 0.5, red at 1.0.
fn heat(t: f64) -> String {
    let (r, g) = if t < 0.5 {
        ((255.0 * t * 2.0) as u8, 255)
    } else {
        (255, (255.0 * (1.0 - (t - 0.5) * 2.0)) as u8)
    };

    format!("#{:02X}{:02X}00", r, g)
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;
    use crate::engine::Invocation;

    #[test]
    fn test_heat_scale() {
        assert_eq!(heat(0.0), "#00FF00");
        assert_eq!(heat(0.5), "#FFFF00");
        assert_eq!(heat(1.0), "#FF0000");
    }

    #[test]
    fn test_render_and_rank() {
        let mut plan = Blueprint::new();
        let a = plan.task("fast").run(Invocation::new("true")).unwrap();
        let b = plan.task("slow").depends_on(a).run(Invocation::new("true")).unwrap();
        plan.task("skipped").depends_on(b).run(Invocation::new("true")).unwrap();

        let start = Instant::now();
        let mut diagnostics = Diagnostics::default();
        diagnostics.execution_times.insert(
            a,
            TaskExecution {
                start,
                duration: Duration::from_millis(5),
            },
        );
        diagnostics.execution_times.insert(
            b,
            TaskExecution {
                start,
                duration: Duration::from_millis(50),
            },
        );

        let chart = diagnostics.render_mermaid(&plan);
        assert!(chart.contains("style 0 fill:#00FF00"));
        assert!(chart.contains("style 1 fill:#FF0000"));
        assert!(chart.contains("style 2 fill:#D3D3D3"));
        assert!(chart.contains("    1 --> 2"));

        assert_eq!(diagnostics.executed(), 2);
        assert_eq!(
            diagnostics.slowest(&plan, 1),
            vec![("slow", Duration::from_millis(50))]
        );
    }

    #[test]
    fn test_quoted_names() {
        let mut plan = Blueprint::new();
        plan.task(r#"say "hi""#).run(Invocation::new("true")).unwrap();

        let chart = Diagnostics::default().render_mermaid(&plan);
        assert!(chart.contains("    0[\"say #quot;hi#quot;\\nNot run\"]"));
    }
}
