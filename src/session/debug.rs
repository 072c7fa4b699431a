use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::nes::cpu::CpuRegisters;

#[derive(Default)]
struct Shared {
    breakpoints: Mutex<BTreeSet<u16>>,
    generation: AtomicU64,
    registers: Mutex<Option<CpuRegisters>>,
}

/// Debugger-side handle onto a running clock: a breakpoint list keyed by PC
/// and the most recently published CPU registers.
#[derive(Clone, Default)]
pub struct DebugHandle {
    shared: Arc<Shared>,
}

impl DebugHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_breakpoint(&self, pc: u16) {
        if let Ok(mut set) = self.shared.breakpoints.lock() {
            if set.insert(pc) {
                self.shared.generation.fetch_add(1, Ordering::Release);
            }
        }
    }

    pub fn remove_breakpoint(&self, pc: u16) {
        if let Ok(mut set) = self.shared.breakpoints.lock() {
            if set.remove(&pc) {
                self.shared.generation.fetch_add(1, Ordering::Release);
            }
        }
    }

    pub fn clear_breakpoints(&self) {
        if let Ok(mut set) = self.shared.breakpoints.lock() {
            set.clear();
            self.shared.generation.fetch_add(1, Ordering::Release);
        }
    }

    pub fn breakpoints(&self) -> Vec<u16> {
        self.shared
            .breakpoints
            .lock()
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn registers(&self) -> Option<CpuRegisters> {
        self.shared.registers.lock().ok().and_then(|regs| *regs)
    }

    pub(crate) fn publish(&self, registers: CpuRegisters) {
        if let Ok(mut slot) = self.shared.registers.lock() {
            *slot = Some(registers);
        }
    }

    /// Copies the breakpoint list into `local` if it changed since `seen`.
    pub(crate) fn sync(&self, seen: &mut u64, local: &mut BTreeSet<u16>) {
        let current = self.shared.generation.load(Ordering::Acquire);
        if current == *seen {
            return;
        }
        if let Ok(set) = self.shared.breakpoints.lock() {
            local.clone_from(&set);
            *seen = current;
        }
    }
}

impl std::fmt::Debug for DebugHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DebugHandle")
            .field("breakpoints", &self.breakpoints())
            .finish()
    }
}
