//! L4: Cortex-M core halt/run control and core-register access via the
//! System Control Space (DHCSR/DEMCR/DCRSR/DCRDR), layered over [`MemApSession`].

use jig_hal::hal::PinDriver;

use crate::error::SwdError;
use crate::memap::MemApSession;

pub(crate) const DHCSR: u32 = 0xE000_EDF0;
const DCRSR: u32 = 0xE000_EDF4;
const DCRDR: u32 = 0xE000_EDF8;
const DEMCR: u32 = 0xE000_EDFC;

pub(crate) const DHCSR_DBGKEY: u32 = 0xA05F_0000;
pub(crate) const DHCSR_C_DEBUGEN: u32 = 1 << 0;
pub(crate) const DHCSR_C_HALT: u32 = 1 << 1;
const DHCSR_S_REGRDY: u32 = 1 << 16;
const DHCSR_S_HALT: u32 = 1 << 17;

const DCRSR_REGWNR_WRITE: u32 = 1 << 16;

const DEMCR_VC_CORERESET: u32 = 1 << 0;

const HALT_POLL_ATTEMPTS: u32 = 50;
const REGRDY_POLL_ATTEMPTS: u32 = 50;

/// Cortex-M debug-halt and core-register control, borrowing the session
/// beneath it rather than owning it: [`crate::programmer::Programmer`] needs
/// to hand the same [`MemApSession`] to both this and [`crate::flash::FlashCtl`]
/// over the lifetime of one run.
pub struct CoreCtl<'m, P: PinDriver> {
    mem: &'m mut MemApSession<P>,
}

impl<'m, P: PinDriver> CoreCtl<'m, P> {
    pub fn new(mem: &'m mut MemApSession<P>) -> Self {
        CoreCtl { mem }
    }

    pub fn mem(&mut self) -> &mut MemApSession<P> {
        &mut *self.mem
    }

    /// Write DHCSR with `DBGKEY | C_DEBUGEN | C_HALT`, then poll `S_HALT`.
    pub fn halt(&mut self) -> Result<(), SwdError> {
        self.mem
            .write32(DHCSR, DHCSR_DBGKEY | DHCSR_C_DEBUGEN | DHCSR_C_HALT)?;
        for _ in 0..HALT_POLL_ATTEMPTS {
            let status = self.mem.read32(DHCSR)?;
            if status & DHCSR_S_HALT != 0 {
                return Ok(());
            }
            self.mem.dp().phy().pin_driver().delay_ms(1);
        }
        Err(SwdError::AckWait)
    }

    /// Poll DHCSR.S_HALT without writing it, for use after a caller (e.g.
    /// connect-under-reset's critical window) has already written the halt
    /// key directly. Returns `Ok(false)` rather than an error on timeout, so
    /// the caller can decide how to fail.
    pub fn wait_halted(&mut self) -> Result<bool, SwdError> {
        for _ in 0..HALT_POLL_ATTEMPTS {
            let status = self.mem.read32(DHCSR)?;
            if status & DHCSR_S_HALT != 0 {
                return Ok(true);
            }
            self.mem.dp().phy().pin_driver().delay_ms(1);
        }
        Ok(false)
    }

    /// Clear DEMCR.VC_CORERESET (so the next reset does not trap) and
    /// write DHCSR with `DBGKEY | C_DEBUGEN` (no C_HALT) to resume.
    pub fn run(&mut self) -> Result<(), SwdError> {
        let demcr = self.mem.read32(DEMCR)?;
        self.mem.write32(DEMCR, demcr & !DEMCR_VC_CORERESET)?;
        self.mem.write32(DHCSR, DHCSR_DBGKEY | DHCSR_C_DEBUGEN)
    }

    /// Set DEMCR.VC_CORERESET so the core halts as soon as it comes out of
    /// reset; used by connect-under-reset before NRST is released.
    pub fn arm_vector_catch_on_reset(&mut self) -> Result<(), SwdError> {
        self.mem.write32(DEMCR, DEMCR_VC_CORERESET)
    }

    /// Read a core register (e.g. R15/PC) via DCRSR/DCRDR.
    pub fn read_core_register(&mut self, reg_num: u32) -> Result<u32, SwdError> {
        self.mem.write32(DCRSR, reg_num & 0x1F)?;
        self.wait_regrdy()?;
        self.mem.read32(DCRDR)
    }

    /// Write a core register via DCRDR/DCRSR.
    pub fn write_core_register(&mut self, reg_num: u32, value: u32) -> Result<(), SwdError> {
        self.mem.write32(DCRDR, value)?;
        self.mem
            .write32(DCRSR, (reg_num & 0x1F) | DCRSR_REGWNR_WRITE)?;
        self.wait_regrdy()
    }

    fn wait_regrdy(&mut self) -> Result<(), SwdError> {
        for _ in 0..REGRDY_POLL_ATTEMPTS {
            let status = self.mem.read32(DHCSR)?;
            if status & DHCSR_S_REGRDY != 0 {
                return Ok(());
            }
            self.mem.dp().phy().pin_driver().delay_ms(1);
        }
        Err(SwdError::AckWait)
    }
}
