//! Tunables for a [`crate::debugger::Debugger`], gathered in one struct so
//! an embedder configures it once at construction rather than threading
//! options through every call.

use std::time::Duration;

/// Configuration for a [`crate::debugger::Debugger`].
#[derive(Debug, Clone)]
pub struct DebuggerConfig {
    /// How long `wait_for_debug_event` blocks before the loop checks for a
    /// pending detach request. `None` waits forever, matching
    /// `WaitForDebugEvent`'s own default.
    pub poll_timeout: Option<Duration>,
    /// Whether `stop()` closes the process and thread handles it holds.
    /// An embedder that wants to keep the target alive and take over its
    /// handles should set this to `false`.
    pub close_handles_on_exit: bool,
    /// Extra process-creation flags OR'd in on top of
    /// `DEBUG_ONLY_THIS_PROCESS | CREATE_NEW_CONSOLE`.
    pub create_flags_extra: u32,
    /// Whether a newly created thread automatically gets every
    /// currently-armed hardware breakpoint programmed into its debug
    /// registers. See the design note on hardware breakpoint propagation.
    pub replay_hardware_breakpoints_on_new_thread: bool,
}

impl Default for DebuggerConfig {
    fn default() -> Self {
        Self {
            poll_timeout: None,
            close_handles_on_exit: true,
            create_flags_extra: 0,
            replay_hardware_breakpoints_on_new_thread: true,
        }
    }
}

impl DebuggerConfig {
    pub fn with_poll_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.poll_timeout = timeout;
        self
    }

    pub fn with_close_handles_on_exit(mut self, close: bool) -> Self {
        self.close_handles_on_exit = close;
        self
    }

    pub fn with_create_flags_extra(mut self, flags: u32) -> Self {
        self.create_flags_extra = flags;
        self
    }

    pub fn with_replay_hardware_breakpoints_on_new_thread(mut self, replay: bool) -> Self {
        self.replay_hardware_breakpoints_on_new_thread = replay;
        self
    }
}
