//! Read-only traversal of the tree.

use crate::PhysMapper;
use crate::address_space::{AddressSpace, table_at};
use crate::entry::{EntryFlags, PageTableEntry};
use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};
use log::debug;

/// One present leaf or large-page entry.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Mapping {
    pub virt: VirtualAddress,
    pub phys: PhysicalAddress,
    pub size: u64,
    pub level: usize,
    pub entry: PageTableEntry,
}

impl Mapping {
    #[inline]
    #[must_use]
    pub const fn contains_phys(&self, pa: PhysicalAddress) -> bool {
        pa.as_u64() >= self.phys.as_u64() && pa.as_u64() - self.phys.as_u64() < self.size
    }
}

impl<M: PhysMapper> AddressSpace<M> {
    /// Visit every mapping in ascending virtual order.
    pub fn for_each_mapping<F: FnMut(&Mapping)>(&self, mut f: F) {
        self.visit_mappings(self.root, 0, 0, &mut f);
    }

    fn visit_mappings<F: FnMut(&Mapping)>(&self, table_pa: PhysicalAddress, level: usize, prefix: u64, f: &mut F) {
        let layout = self.layout;
        let leaf = level == layout.leaf_level();
        let shift = layout.shift(level);
        // SAFETY: `table_pa` is the root or a table installed in the tree.
        let table = unsafe { table_at(&self.mapper, table_pa) };
        for (index, entry) in table.iter(layout.entries(level)) {
            if !entry.present() {
                continue;
            }
            let raw = prefix | ((index as u64) << shift);
            if leaf || entry.large_page() {
                f(&Mapping {
                    virt: layout.canonicalize(raw),
                    phys: entry.address(),
                    size: layout.span(level),
                    level,
                    entry,
                });
            } else {
                self.visit_mappings(entry.address(), level + 1, raw, f);
            }
        }
    }

    /// Visit the root and every intermediate table, with its level.
    pub fn for_each_table<F: FnMut(PhysicalAddress, usize)>(&self, mut f: F) {
        self.visit_tables(self.root, 0, &mut f);
    }

    fn visit_tables<F: FnMut(PhysicalAddress, usize)>(&self, table_pa: PhysicalAddress, level: usize, f: &mut F) {
        f(table_pa, level);
        if level == self.layout.leaf_level() {
            return;
        }
        // SAFETY: `table_pa` is the root or a table installed in the tree.
        let table = unsafe { table_at(&self.mapper, table_pa) };
        for (_, entry) in table.iter(self.layout.entries(level)) {
            if entry.present() && !entry.large_page() {
                self.visit_tables(entry.address(), level + 1, f);
            }
        }
    }

    /// Find a virtual address translating to `pa`.
    ///
    /// When several mappings cover `pa`, the one with the highest virtual
    /// address wins, so the direct map and the kernel image take precedence
    /// over the identity map.
    #[must_use]
    pub fn virtual_address(&self, pa: PhysicalAddress) -> Option<VirtualAddress> {
        let mut found = None;
        self.for_each_mapping(|m| {
            if m.contains_phys(pa) {
                found = Some(m.virt + (pa - m.phys));
            }
        });
        found
    }

    /// Log the tree as coalesced runs of contiguous mappings.
    pub fn dump(&self) {
        let mut run: Option<(Mapping, u64)> = None;
        let flush = |m: &Mapping, len: u64| {
            debug!(
                "{}..{} -> {} [{}]",
                m.virt,
                m.virt.wrapping_add(len),
                m.phys,
                EntryFlags(m.entry)
            );
        };
        self.for_each_mapping(|m| {
            if let Some((start, len)) = run.as_mut() {
                let continues = start.virt.wrapping_add(*len) == m.virt
                    && start.phys + *len == m.phys
                    && start.entry.attributes() == m.entry.attributes()
                    && start.entry.global() == m.entry.global();
                if continues {
                    *len += m.size;
                    return;
                }
                flush(start, *len);
            }
            run = Some((*m, m.size));
        });
        if let Some((start, len)) = run {
            flush(&start, len);
        }
    }
}
