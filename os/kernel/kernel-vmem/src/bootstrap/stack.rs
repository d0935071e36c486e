//! # Frame-Chain Relocation
//!
//! Right after activation the CPU still runs at physical addresses: the
//! instruction pointer, the stack pointer, every saved frame pointer and every
//! pending return address refer to the identity view of the kernel image. The
//! trampoline moves all of them into the high view by adding the image offset.
//!
//! The stack frames are linked through the saved frame pointers (the kernel is
//! built with frame pointers forced on):
//!
//! ```text
//!            stack_top ─►  ┌────────────────────┐
//!                          │ 0 (terminator)     │ ◄── outermost frame
//!                          │ ...                │
//!                          ├────────────────────┤
//!                          │ return address     │  fp₁ + 8
//!                   fp₁ ─► │ saved fp = fp₂     │ ──┐
//!                          │ locals             │   │
//!                          ├────────────────────┤   │
//!                          │ return address     │   │  fp₀ + 8
//!                   fp₀ ─► │ saved fp = fp₁     │ ◄─┘
//!                          └────────────────────┘
//! ```
//!
//! [`relocate_frame_chain`] walks this list from the innermost frame outwards
//! and rewrites each frame in place. The caller then adds the offset to its
//! own stack and frame pointer and returns; from there on every `ret` lands in
//! the high view.

/// Rewrite every frame of the chain starting at `fp` by `delta`.
///
/// For each frame at `fp`:
/// - a non-zero return address at `fp + 8` is advanced by `delta`;
/// - the saved frame pointer at `fp` is advanced by `delta` and followed,
///   unless it is zero, does not point further up the stack, or lies at or
///   beyond `stack_top`. Such a frame ends the walk and keeps its saved
///   pointer.
///
/// Returns the number of frames visited. Walking stops immediately (returning
/// `0` for the first frame) if `fp` is misaligned or outside the stack.
///
/// # Safety
/// - `fp` must be the frame pointer of a live frame on the stack ending at
///   `stack_top`, and every frame up to the terminator must be laid out as
///   `[saved fp, return address]`.
/// - The memory at the old addresses must stay reachable until the caller
///   has switched its own stack and frame pointers.
/// - Must run with interrupts disabled. Nothing may push a frame onto the
///   rewritten part of the stack before the caller switches.
/// - Return addresses outside the kernel image (there are none on the boot
///   stack) would be corrupted.
pub unsafe fn relocate_frame_chain(mut fp: usize, stack_top: usize, delta: usize) -> usize {
    const WORD: usize = size_of::<usize>();

    let mut frames = 0;
    while fp.is_multiple_of(WORD) && fp != 0 && fp.saturating_add(2 * WORD) <= stack_top {
        frames += 1;
        let saved_fp = core::ptr::with_exposed_provenance_mut::<usize>(fp);
        let return_address = core::ptr::with_exposed_provenance_mut::<usize>(fp + WORD);

        // SAFETY: both words lie within the caller's stack per the contract.
        unsafe {
            let ret = return_address.read();
            if ret != 0 {
                return_address.write(ret.wrapping_add(delta));
            }

            let next = saved_fp.read();
            if next == 0 || next <= fp || next >= stack_top {
                break;
            }
            saved_fp.write(next.wrapping_add(delta));
            fp = next;
        }
    }
    frames
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrites_every_frame_up_to_the_terminator() {
        let mut stack = [0usize; 16];
        let base = stack.as_mut_ptr().expose_provenance();
        let at = |i: usize| base + i * size_of::<usize>();
        let top = at(stack.len());

        stack[2] = at(6);
        stack[3] = 0x1111;
        stack[6] = at(10);
        stack[7] = 0x2222;
        stack[10] = 0;
        stack[11] = 0;

        let frames = unsafe { relocate_frame_chain(at(2), top, 0x1000) };

        assert_eq!(frames, 3);
        assert_eq!(stack[2], at(6) + 0x1000);
        assert_eq!(stack[3], 0x1111 + 0x1000);
        assert_eq!(stack[6], at(10) + 0x1000);
        assert_eq!(stack[7], 0x2222 + 0x1000);
        assert_eq!(stack[10], 0);
        assert_eq!(stack[11], 0);
    }

    #[test]
    fn stops_at_frames_pointing_outside_the_stack() {
        let mut stack = [0usize; 8];
        let base = stack.as_mut_ptr().expose_provenance();
        let at = |i: usize| base + i * size_of::<usize>();
        let top = at(stack.len());

        stack[0] = at(4);
        stack[1] = 0xaaaa;
        // Saved pointer beyond the top of the stack.
        stack[4] = top + 64;
        stack[5] = 0xbbbb;

        let frames = unsafe { relocate_frame_chain(at(0), top, 0x10) };

        assert_eq!(frames, 2);
        assert_eq!(stack[1], 0xaaaa + 0x10);
        assert_eq!(stack[5], 0xbbbb + 0x10);
        assert_eq!(stack[4], top + 64, "terminal frame keeps its saved pointer");
    }

    #[test]
    fn refuses_a_downward_chain() {
        let mut stack = [0usize; 8];
        let base = stack.as_mut_ptr().expose_provenance();
        let at = |i: usize| base + i * size_of::<usize>();
        let top = at(stack.len());

        stack[4] = at(0);
        stack[5] = 0x42;

        let frames = unsafe { relocate_frame_chain(at(4), top, 0x10) };

        assert_eq!(frames, 1);
        assert_eq!(stack[4], at(0));
        assert_eq!(stack[5], 0x52);
    }

    #[test]
    fn ignores_misaligned_start() {
        let mut stack = [7usize; 4];
        let base = stack.as_mut_ptr().expose_provenance();
        let top = base + 4 * size_of::<usize>();

        let frames = unsafe { relocate_frame_chain(base + 1, top, 0x10) };

        assert_eq!(frames, 0);
        assert_eq!(stack, [7; 4]);
    }
}
