//! Memory budget for the cache window
//!
//! The cache may occupy `budget_percent` of the memory the process is
//! allowed to use. The percentage only ever goes down: every out-of-memory
//! failure during a fill ratchets it one point lower for the rest of the
//! process lifetime.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Fallback when the platform cannot report its memory size: 256 MiB
pub const DEFAULT_MEMORY_BYTES: u64 = 256 * 1024 * 1024;

/// Reports how many bytes the process may use in total.
///
/// Queried once per cache window computation, so implementations must be
/// cheap: a platform query, never an allocation probe.
pub trait MemoryProbe: Send + Sync + fmt::Debug {
    fn available_budget_bytes(&self) -> u64;
}

/// A fixed memory figure, for configuration overrides and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedMemory {
    bytes: u64,
}

impl FixedMemory {
    pub fn new(bytes: u64) -> Self {
        Self { bytes }
    }

    /// Create a fixed probe from a size in megabytes
    pub fn from_mb(mb: u64) -> Self {
        Self::new(mb * 1024 * 1024)
    }
}

impl MemoryProbe for FixedMemory {
    fn available_budget_bytes(&self) -> u64 {
        self.bytes
    }
}

/// Physical memory as reported by the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemMemory;

impl MemoryProbe for SystemMemory {
    fn available_budget_bytes(&self) -> u64 {
        physical_ram_bytes().unwrap_or(DEFAULT_MEMORY_BYTES)
    }
}

#[cfg(target_os = "linux")]
fn physical_ram_bytes() -> Option<u64> {
    let mut info = std::mem::MaybeUninit::<libc::sysinfo>::uninit();
    let rc = unsafe { libc::sysinfo(info.as_mut_ptr()) };
    if rc != 0 {
        return None;
    }
    let info = unsafe { info.assume_init() };
    Some((info.totalram as u64).saturating_mul(u64::from(info.mem_unit)))
}

#[cfg(target_os = "macos")]
fn physical_ram_bytes() -> Option<u64> {
    use std::ffi::CString;
    use std::mem::size_of;
    use std::ptr;

    let key = CString::new("hw.memsize").ok()?;
    let mut value: u64 = 0;
    let mut len = size_of::<u64>();
    let rc = unsafe {
        libc::sysctlbyname(
            key.as_ptr(),
            &mut value as *mut u64 as *mut libc::c_void,
            &mut len,
            ptr::null_mut(),
            0,
        )
    };
    if rc == 0 && len == size_of::<u64>() {
        Some(value)
    } else {
        None
    }
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
fn physical_ram_bytes() -> Option<u64> {
    None
}

/// One-way ratchet over the cache budget percentage.
///
/// # Example
///
/// ```
/// use vastview_cache::memory_budget::BudgetPercent;
///
/// let budget = BudgetPercent::new(10);
/// assert_eq!(budget.budget_bytes(1000), 100);
///
/// // An out-of-memory failure shrinks every future window
/// assert_eq!(budget.degrade(), 9);
/// assert_eq!(budget.budget_bytes(1000), 90);
/// ```
#[derive(Debug)]
pub struct BudgetPercent {
    percent: AtomicU8,
}

impl BudgetPercent {
    /// Create a ratchet starting at `percent`, clamped to 100
    pub fn new(percent: u8) -> Self {
        Self {
            percent: AtomicU8::new(percent.min(100)),
        }
    }

    /// Current percentage
    pub fn get(&self) -> u8 {
        self.percent.load(Ordering::Acquire)
    }

    /// Byte budget for a process allowed `total_bytes`
    pub fn budget_bytes(&self, total_bytes: u64) -> u64 {
        let budget = u128::from(total_bytes) * u128::from(self.get()) / 100;
        u64::try_from(budget).unwrap_or(u64::MAX)
    }

    /// Drop the percentage by one point, never below zero.
    ///
    /// Returns the new percentage.
    pub fn degrade(&self) -> u8 {
        let previous = self
            .percent
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |p| Some(p.saturating_sub(1)))
            .unwrap_or(0);
        previous.saturating_sub(1)
    }
}
