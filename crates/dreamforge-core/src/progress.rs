//! Progress aggregation (§4.9 C9): a pure function over persisted state, not
//! an in-memory counter — so it agrees with whatever `GET /jobs/{id}` and the
//! SSE stream happen to read, even across a server restart.

use crate::model::Status;

/// One step's contribution to job progress: how many items it expects to
/// produce, and how many [`crate::model::Artifact`] rows exist for it so far.
#[derive(Clone, Copy, Debug)]
pub struct StepProgress {
    pub status: Status,
    pub expected_items: u32,
    pub produced_items: u32,
}

/// Fraction of a single step's work done, in `[0.0, 1.0]`.
///
/// A running step with zero expected items (shouldn't happen once §4.4
/// validation has run, but the formula stays total) reports `0.0` rather
/// than dividing by zero.
fn step_fraction(step: StepProgress) -> f64 {
    match step.status {
        Status::Queued => 0.0,
        Status::Succeeded => 1.0,
        Status::Running | Status::Failed => {
            if step.expected_items == 0 {
                0.0
            } else {
                (step.produced_items as f64 / step.expected_items as f64).min(1.0)
            }
        }
    }
}

/// Overall job progress: steps are weighted equally and averaged.
///
/// A `generate`-only job is one step at full weight; a `generate` +
/// `upscale` job is two steps at half weight each, so a job that has
/// finished generating but not yet started upscaling reports `0.5`
/// regardless of how many items either step produces.
///
/// A failed job's progress is frozen at whatever the last-observed step
/// fractions were (the failed step's own fraction reflects partial output
/// already written, per §4.9's note that a step can fail after writing some
/// artifacts) rather than snapping to `0.0` or `1.0` — this was an open
/// question in the distilled spec, resolved here to match the completed
/// work actually visible to a client.
pub fn progress_for_job(steps: &[StepProgress]) -> f64 {
    if steps.is_empty() {
        return 0.0;
    }
    let weight = 1.0 / steps.len() as f64;
    steps
        .iter()
        .map(|s| step_fraction(*s) * weight)
        .sum::<f64>()
        .clamp(0.0, 1.0)
}

/// Advisory UI stage weights (§4.9): single-step jobs get a static
/// three-phase breakdown, chained jobs get one phase per step.
pub fn stages_for_chain(has_upscale: bool) -> Vec<(&'static str, f64)> {
    if has_upscale {
        vec![("generate", 0.5), ("upscale", 0.5)]
    } else {
        vec![
            ("queued_to_start", 0.1),
            ("sampling", 0.8),
            ("finalize", 0.1),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_queued_step_is_zero() {
        let steps = [StepProgress {
            status: Status::Queued,
            expected_items: 4,
            produced_items: 0,
        }];
        assert_eq!(progress_for_job(&steps), 0.0);
    }

    #[test]
    fn single_step_partial_progress() {
        let steps = [StepProgress {
            status: Status::Running,
            expected_items: 4,
            produced_items: 1,
        }];
        assert_eq!(progress_for_job(&steps), 0.25);
    }

    #[test]
    fn two_step_pipeline_halfway_after_generate_succeeds() {
        let steps = [
            StepProgress {
                status: Status::Succeeded,
                expected_items: 4,
                produced_items: 4,
            },
            StepProgress {
                status: Status::Queued,
                expected_items: 4,
                produced_items: 0,
            },
        ];
        assert_eq!(progress_for_job(&steps), 0.5);
    }

    #[test]
    fn failed_step_reflects_partial_output() {
        let steps = [
            StepProgress {
                status: Status::Succeeded,
                expected_items: 4,
                produced_items: 4,
            },
            StepProgress {
                status: Status::Failed,
                expected_items: 4,
                produced_items: 2,
            },
        ];
        assert_eq!(progress_for_job(&steps), 0.75);
    }

    #[test]
    fn succeeded_job_is_complete() {
        let steps = [
            StepProgress {
                status: Status::Succeeded,
                expected_items: 4,
                produced_items: 4,
            },
            StepProgress {
                status: Status::Succeeded,
                expected_items: 1,
                produced_items: 1,
            },
        ];
        assert_eq!(progress_for_job(&steps), 1.0);
    }
}
