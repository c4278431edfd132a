//! Acceptance tests for rteval on the host it runs on.
//!
//! The topology checks run everywhere. The full runs are ignored by
//! default and require:
//! - Root privileges
//! - PREEMPT_RT kernel (recommended)
//! - hackbench and cyclictest (rt-tests package)
//! - stress-ng (for the stressor run)

mod acceptance;
