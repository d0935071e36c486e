use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};

/// The hardware translation unit.
///
/// Implemented over the control registers by the kernel and by a recording
/// fake in tests.
pub trait TranslationControl {
    /// Whether translation is currently switched on.
    fn is_enabled(&self) -> bool;

    /// Make the table at `root` the active translation root.
    ///
    /// # Safety
    /// The tree must map everything the CPU touches after the switch.
    unsafe fn load_root(&mut self, root: PhysicalAddress);

    /// Switch translation on, with write protection and global pages.
    ///
    /// # Safety
    /// A valid root must be loaded.
    unsafe fn enable(&mut self);

    /// Drop every cached translation, global ones included.
    ///
    /// # Safety
    /// The active root must stay valid.
    unsafe fn flush(&mut self);

    /// Drop the cached translation of the page containing `va`, even if it
    /// is global.
    ///
    /// # Safety
    /// The active root must stay valid.
    unsafe fn invalidate(&mut self, va: VirtualAddress);
}

impl<C: TranslationControl> TranslationControl for &mut C {
    #[inline]
    fn is_enabled(&self) -> bool {
        (**self).is_enabled()
    }

    #[inline]
    unsafe fn load_root(&mut self, root: PhysicalAddress) {
        unsafe { (**self).load_root(root) }
    }

    #[inline]
    unsafe fn enable(&mut self) {
        unsafe { (**self).enable() }
    }

    #[inline]
    unsafe fn flush(&mut self) {
        unsafe { (**self).flush() }
    }

    #[inline]
    unsafe fn invalidate(&mut self, va: VirtualAddress) {
        unsafe { (**self).invalidate(va) }
    }
}
