//! Step trail: human-readable markers recorded while a spec runs.

use std::cell::RefCell;

thread_local! {
    static TRAIL: RefCell<Option<Vec<String>>> = const { RefCell::new(None) };
}

/// Records a step on the running spec's trail.
///
/// Outside a spec the step is only logged.
pub fn step(description: impl Into<String>) {
    let description = description.into();
    tracing::info!(step = %description, "STEP");
    TRAIL.with(|trail| {
        if let Some(steps) = trail.borrow_mut().as_mut() {
            steps.push(description);
        }
    });
}

/// Starts a fresh trail on this thread, discarding any previous one.
pub(crate) fn begin() {
    TRAIL.with(|trail| {
        let _ = trail.replace(Some(Vec::new()));
    });
}

/// Ends the trail on this thread and returns the recorded steps.
pub(crate) fn finish() -> Vec<String> {
    TRAIL.with(|trail| trail.replace(None).unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steps_are_recorded_between_begin_and_finish() {
        begin();
        step("create sandbox");
        step("stop sandbox");
        assert_eq!(finish(), vec!["create sandbox", "stop sandbox"]);
    }

    #[test]
    fn steps_outside_a_trail_are_dropped() {
        step("orphan");
        assert!(finish().is_empty());
    }
}
