//! GDB remote-serial-protocol stop signals returned by this core.

/// A POSIX-style signal number as used by the GDB remote-serial protocol to
/// report why the target stopped.
///
/// Only the subset this core ever returns is modeled; the RSP layer is
/// responsible for encoding these into `S`/`T` stop-reply packets.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum Signal {
    /// No connection / the session is being torn down.
    Hup = 1,
    /// User interrupt (GDB's Ctrl-C, delivered out of band).
    Int = 2,
    /// Illegal instruction: a stray `BREAK` opcode was found in the program.
    Ill = 4,
    /// Trace trap: stopped after a breakpoint or a single step.
    Trap = 5,
    /// Aborted: a breakpoint policy could not be satisfied.
    Abort = 6,
    /// Bus error: used here to report a stack-pointer plausibility failure.
    Bus = 10,
}

impl Signal {
    /// Returns the numeric value GDB expects on the wire.
    #[must_use]
    pub const fn code(self) -> u8 {
        self as u8
    }
}

impl From<Signal> for u8 {
    fn from(sig: Signal) -> Self {
        sig.code()
    }
}
