//! Packed timing instructions and the instruction stream they form.
//!
//! ## Main structures:
//!
//! - [`Instruction`]: a single 32-bit sequencer word. The low 16 bits carry a
//!   duration in ticks (1 to [`T_MAX`] inclusive), the high 16 bits carry the
//!   channel-state mask for that interval: bit `16 + i` is set iff channel `i`
//!   is driven high for the whole interval.
//!
//! - [`InstructionStream`]: an ordered list of instructions. The cumulative
//!   duration of a stream compiled from a [`Sequence`] equals the summed block
//!   durations times the repetition count.
//!
//! ## Utilities:
//!
//! - [`total_ticks`] sums durations over a stream.
//! - [`edge_set`] decompiles a stream back into per-channel edge timestamps.
//!   This is the inverse of compilation and is what the round-trip tests use.
//! - [`unroll`] materialises the per-tick channel matrix of a stream for
//!   debugging. The compiler itself never builds this matrix; it exists only
//!   because staring at bitmasks is a poor way to review a pulse program.
//!
//! [`Sequence`]: crate::block::Sequence

use std::fmt;

use ndarray::Array2;

/// Number of output channels the sequencer drives.
pub const N_CH: usize = 16;

/// Longest duration a single instruction can encode, in ticks.
pub const T_MAX: u64 = u16::MAX as u64;

/// A single packed sequencer word: duration in the low half, channel mask in
/// the high half.
///
/// # Examples
///
/// ```
/// use t1compiler_backend::instruction::Instruction;
///
/// let instr = Instruction::new(10, 1 << 3);
/// assert_eq!(instr.duration(), 10);
/// assert!(instr.channel_on(3));
/// assert!(!instr.channel_on(2));
/// assert_eq!(instr.word(), (1u32 << 19) | 10);
/// ```
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Instruction(u32);

impl Instruction {
    /// Packs a duration and a channel mask into one word.
    ///
    /// # Panics
    ///
    /// Panics if `duration` is zero or exceeds [`T_MAX`]. Zero-duration and
    /// over-long intervals are handled by the compiler (dropped and split
    /// respectively) before instructions are formed, so reaching this panic
    /// indicates a compiler bug rather than bad user input.
    pub fn new(duration: u64, mask: u16) -> Self {
        assert!(
            (1..=T_MAX).contains(&duration),
            "Instruction duration {} outside [1, {}]",
            duration,
            T_MAX
        );
        Self(((mask as u32) << 16) | (duration as u32))
    }

    /// Duration of this interval in ticks. Always in `[1, T_MAX]`.
    pub fn duration(&self) -> u64 {
        (self.0 & 0xFFFF) as u64
    }

    /// Channel-state mask: bit `i` is the state of channel `i`.
    pub fn mask(&self) -> u16 {
        (self.0 >> 16) as u16
    }

    /// State of channel `ch` during this interval.
    pub fn channel_on(&self, ch: usize) -> bool {
        assert!(ch < N_CH, "Channel index {} out of range 0..{}", ch, N_CH);
        self.mask() & (1 << ch) != 0
    }

    /// The raw 32-bit word handed to the sequencer.
    pub fn word(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[{} ticks, mask {:#06x}]", self.duration(), self.mask())
    }
}

impl fmt::Debug for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Ordered list of instructions as consumed by the sequencer.
pub type InstructionStream = Vec<Instruction>;

/// Sums instruction durations over a stream.
pub fn total_ticks(stream: &[Instruction]) -> u64 {
    stream.iter().map(|instr| instr.duration()).sum()
}

/// Decompiles a stream into per-channel edge timestamps (in ticks).
///
/// Walks the stream, and whenever channel `i` changes state between
/// consecutive intervals (or against the all-off state at tick 0), records
/// the tick of that transition. The result is one sorted edge list per
/// channel; a well-formed compiled stream always yields even lengths because
/// every pulse that rises also falls.
pub fn edge_set(stream: &[Instruction]) -> Vec<Vec<u64>> {
    let mut edges: Vec<Vec<u64>> = vec![Vec::new(); N_CH];
    let mut state: u16 = 0;
    let mut t: u64 = 0;
    for instr in stream {
        let changed = state ^ instr.mask();
        for (ch, chan_edges) in edges.iter_mut().enumerate() {
            if changed & (1 << ch) != 0 {
                chan_edges.push(t);
            }
        }
        state = instr.mask();
        t += instr.duration();
    }
    // Closing edges for channels still high at the end of the stream
    for (ch, chan_edges) in edges.iter_mut().enumerate() {
        if state & (1 << ch) != 0 {
            chan_edges.push(t);
        }
    }
    edges
}

/// Materialises the full `(N_CH, total_ticks)` per-tick state matrix.
///
/// Debug aid only: linear in total tick count, never used on the compile
/// path.
pub fn unroll(stream: &[Instruction]) -> Array2<u8> {
    let n_ticks = total_ticks(stream) as usize;
    let mut out = Array2::zeros((N_CH, n_ticks));
    let mut t = 0usize;
    for instr in stream {
        let d = instr.duration() as usize;
        for ch in 0..N_CH {
            if instr.channel_on(ch) {
                out.slice_mut(ndarray::s![ch, t..t + d]).fill(1);
            }
        }
        t += d;
    }
    out
}
