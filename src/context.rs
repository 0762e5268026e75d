use std::fmt::{Display, Formatter};
use std::time::Duration;

/// Counters collected over one placement and routing run.
///
/// A context is created per run and threaded through both engines;
/// [`RunContext::reset`] returns it to its initial state.
#[derive(Debug, Default, Clone, Eq, PartialEq)]
pub struct RunContext {
    pub stages_solved: usize,
    pub stages_from_warm_start: usize,
    pub solve_time: Duration,
    pub nets_routed: usize,
    pub nets_failed: usize,
    pub nets_skipped: usize,
    pub search_expansions: usize,
}

impl RunContext {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

impl Display for RunContext {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "---- Run Summary ----")?;
        writeln!(
            f,
            "placement stages: {} ({} from warm start), {:.3}s in solver",
            self.stages_solved,
            self.stages_from_warm_start,
            self.solve_time.as_secs_f64()
        )?;
        writeln!(
            f,
            "nets: {} routed, {} failed, {} skipped",
            self.nets_routed, self.nets_failed, self.nets_skipped
        )?;
        writeln!(f, "search expansions: {}", self.search_expansions)?;
        writeln!(f, "---------------------")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_clears_counters() {
        let mut ctx = RunContext::new();
        ctx.nets_routed = 3;
        ctx.search_expansions = 100;
        ctx.reset();
        assert_eq!(ctx, RunContext::new());
    }
}
