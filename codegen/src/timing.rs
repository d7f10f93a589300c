//! Pass timing.
//!
//! This modules provides facilities for timing the execution of individual compilation passes.
//! Its public interface consists of the `TimingToken` type and a function per pass. A stack of
//! currently active passes is maintained per thread, and nested passes are handled correctly:
//! time spent in an inner pass is not also attributed to the enclosing pass.

use core::fmt;
use std::cell::RefCell;
use std::time::{Duration, Instant};

// Each pass has a single-word name and a plain-text description used when printing out the
// timing report. The macro defines the `Pass` enum, a constructor function per pass, and the
// descriptions.
macro_rules! define_passes {
    ($($stem:ident: $desc:expr,)+) => {
        /// A single compilation pass for the purpose of timing.
        #[derive(Clone, Copy, Debug, PartialEq, Eq)]
        #[allow(missing_docs, non_camel_case_types)]
        pub enum Pass {
            $($stem,)+
            /// No active pass.
            None,
        }

        const NUM_PASSES: usize = Pass::None as usize;

        const DESCRIPTIONS: [&str; NUM_PASSES] = [$($desc,)+];

        impl Pass {
            fn description(self) -> &'static str {
                match self {
                    $(Self::$stem => $desc,)+
                    Self::None => "<no pass>",
                }
            }
        }

        $(
            /// Start timing this pass; the returned token stops the clock when dropped.
            #[must_use]
            pub fn $stem() -> TimingToken {
                start_pass(Pass::$stem)
            }
        )+
    };
}

define_passes! {
    construction: "Graph construction",
    localopt: "Local optimization",
    out_edges: "Out-edge computation",
    domtree: "Dominator tree",
    postdomtree: "Post-dominator tree",
    loop_tree: "Loop tree",
    liveness: "Liveness analysis",
    loop_closed_ssa: "Loop-closed SSA construction",
    dead_node_elim: "Dead node elimination",
    inlining: "Function inlining",
    unroll: "Loop unrolling",
    verifier: "Graph verifier",
    lower: "Target lowering",
    select: "Instruction selection",
    schedule: "Instruction scheduling",
    regalloc: "Register allocation",
    spill_slots: "Spill slot coalescing",
    frame: "Stack frame construction",
    peephole: "Peephole optimization",
    emit: "Assembly emission",
}

impl fmt::Display for Pass {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// A timing token is responsible for timing the currently running pass. Timing starts when it
/// is created and ends when it is dropped.
pub struct TimingToken {
    /// Start time for this pass, including time spent in any nested sub-passes.
    start: Instant,

    // Pass being timed by this token.
    pass: Pass,

    // The previously active pass which will be restored when this token is dropped.
    prev: Pass,
}

/// Accumulated timing information for a single pass.
#[derive(Default, Clone, Copy)]
struct PassTime {
    /// Total time spent running this pass, including nested passes.
    total: Duration,

    /// Time spent directly in nested passes.
    child: Duration,
}

/// Accumulated timing for all passes.
#[derive(Default, Clone)]
pub struct PassTimes {
    pass: [PassTime; NUM_PASSES],
}

impl fmt::Display for PassTimes {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "======== ========  ==================================")?;
        writeln!(f, "   Total     Self  Pass")?;
        writeln!(f, "-------- --------  ----------------------------------")?;
        for (idx, time) in self.pass.iter().enumerate() {
            if time.total == Duration::default() {
                continue;
            }
            writeln!(
                f,
                "{:8.4} {:8.4}  {}",
                time.total.as_secs_f64(),
                (time.total - time.child).as_secs_f64(),
                DESCRIPTIONS[idx],
            )?;
        }
        writeln!(f, "======== ========  ==================================")
    }
}

thread_local! {
    static CURRENT_PASS: RefCell<Pass> = const { RefCell::new(Pass::None) };
    static PASS_TIME: RefCell<PassTimes> = RefCell::new(Default::default());
}

/// Start timing `pass` as a child of the currently running pass, if any.
fn start_pass(pass: Pass) -> TimingToken {
    let prev = CURRENT_PASS.with(|p| p.replace(pass));
    log::debug!("timing: Starting {:?}, (during {:?})", pass, prev);
    TimingToken {
        start: Instant::now(),
        pass,
        prev,
    }
}

/// Dropping a timing token indicates the end of the pass.
impl Drop for TimingToken {
    fn drop(&mut self) {
        let duration = self.start.elapsed();
        log::debug!("timing: Ending {:?}", self.pass);
        let old_cur = CURRENT_PASS.with(|p| p.replace(self.prev));
        debug_assert_eq!(self.pass, old_cur, "timing tokens dropped out of order");
        PASS_TIME.with(|rc| {
            let mut table = rc.borrow_mut();
            table.pass[self.pass as usize].total += duration;
            if self.prev != Pass::None {
                table.pass[self.prev as usize].child += duration;
            }
        })
    }
}

/// Take the current accumulated pass timings and reset the timings for the current thread.
pub fn take_current() -> PassTimes {
    PASS_TIME.with(|rc| rc.replace(Default::default()))
}
