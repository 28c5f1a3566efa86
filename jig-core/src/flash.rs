//! L5: STM32G0 flash controller driver (RM0444) — unlock, mass erase,
//! doubleword programming and status polling over [`MemApSession`].

use jig_hal::hal::PinDriver;

use crate::error::FlashError;
use crate::memap::MemApSession;

const FLASH_REG_BASE: u32 = 0x4002_2000;
const FLASH_KEYR: u32 = FLASH_REG_BASE + 0x08;
const FLASH_SR: u32 = FLASH_REG_BASE + 0x10;
const FLASH_CR: u32 = FLASH_REG_BASE + 0x14;

const FLASH_KEY1: u32 = 0x4567_0123;
const FLASH_KEY2: u32 = 0xCDEF_89AB;

const FLASH_SR_BSY: u32 = 1 << 16;
const FLASH_SR_EOP: u32 = 1 << 0;
const FLASH_SR_OPERR: u32 = 1 << 1;
const FLASH_SR_PROGERR: u32 = 1 << 3;
const FLASH_SR_WRPERR: u32 = 1 << 4;
const FLASH_SR_PGAERR: u32 = 1 << 5;
const FLASH_SR_SIZERR: u32 = 1 << 6;
const FLASH_SR_PGSERR: u32 = 1 << 7;
const FLASH_SR_MISERR: u32 = 1 << 8;
const FLASH_SR_FASTERR: u32 = 1 << 9;
const FLASH_SR_RDERR: u32 = 1 << 14;
const FLASH_SR_OPTVERR: u32 = 1 << 15;
const FLASH_SR_ALL_ERRORS: u32 = FLASH_SR_OPERR
    | FLASH_SR_PROGERR
    | FLASH_SR_WRPERR
    | FLASH_SR_PGAERR
    | FLASH_SR_SIZERR
    | FLASH_SR_PGSERR
    | FLASH_SR_MISERR
    | FLASH_SR_FASTERR
    | FLASH_SR_RDERR
    | FLASH_SR_OPTVERR;
const FLASH_SR_CLEAR_MASK: u32 = FLASH_SR_EOP | FLASH_SR_ALL_ERRORS;

const FLASH_CR_PG: u32 = 1 << 0;
const FLASH_CR_PER: u32 = 1 << 1;
const FLASH_CR_MER1: u32 = 1 << 2;
const FLASH_CR_STRT: u32 = 1 << 16;
const FLASH_CR_LOCK: u32 = 1 << 31;

/// STM32G031-class target geometry.
pub const FLASH_BASE: u32 = 0x0800_0000;
pub const FLASH_SIZE_BYTES: u32 = 0x1_0000;
pub const FLASH_PAGE_SIZE_BYTES: u32 = 2048;

const BUSY_POLL_SHORT_US: u32 = 50;
const BUSY_POLL_LONG_MS: u32 = 1;
const MASS_ERASE_TIMEOUT_MS: u32 = 30_000;
const PROGRAM_WORD_TIMEOUT_MS: u32 = 10;

/// Whether mass erase completed without the controller setting EOP. The
/// source treats this as non-fatal, relying on a subsequent verify pass
/// (spec §9 open question, preserved as-is).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EraseOutcome {
    Clean,
    MissingEop,
}

/// Borrows the session beneath it rather than owning it, for the same
/// reason [`crate::corectl::CoreCtl`] does: [`crate::programmer::Programmer`]
/// hands the one [`MemApSession`] to both over a run.
pub struct FlashCtl<'m, P: PinDriver> {
    mem: &'m mut MemApSession<P>,
}

impl<'m, P: PinDriver> FlashCtl<'m, P> {
    pub fn new(mem: &'m mut MemApSession<P>) -> Self {
        FlashCtl { mem }
    }

    pub fn mem(&mut self) -> &mut MemApSession<P> {
        &mut *self.mem
    }

    fn wait_bsy_clear(&mut self, deadline_ms: u32, fine_grained: bool) -> Result<(), FlashError> {
        let start = self.mem.dp().phy().pin_driver().millis();
        loop {
            let sr = self.mem.read32(FLASH_SR)?;
            if sr & FLASH_SR_BSY == 0 {
                return Ok(());
            }
            if self
                .mem
                .dp()
                .phy()
                .pin_driver()
                .millis()
                .wrapping_sub(start)
                >= deadline_ms
            {
                return Err(FlashError::Busy);
            }
            if fine_grained {
                self.mem.dp().phy().pin_driver().delay_us(BUSY_POLL_SHORT_US);
            } else {
                self.mem.dp().phy().pin_driver().delay_ms(BUSY_POLL_LONG_MS);
            }
        }
    }

    fn clear_sr_flags(&mut self, mask: u32) -> Result<(), FlashError> {
        let bits = mask & FLASH_SR_CLEAR_MASK;
        if bits == 0 {
            return Ok(());
        }
        self.mem.write32(FLASH_SR, bits)?;
        Ok(())
    }

    fn clear_cr_bits(&mut self, mask: u32) -> Result<(), FlashError> {
        let cr = self.mem.read32(FLASH_CR)?;
        self.mem.write32(FLASH_CR, cr & !mask)?;
        Ok(())
    }

    /// Unlock `FLASH_CR` if `LOCK` is set; no-op otherwise.
    pub fn unlock(&mut self) -> Result<(), FlashError> {
        let cr = self.mem.read32(FLASH_CR)?;
        if cr & FLASH_CR_LOCK == 0 {
            return Ok(());
        }
        self.mem.write32(FLASH_KEYR, FLASH_KEY1)?;
        self.mem.write32(FLASH_KEYR, FLASH_KEY2)?;
        let cr = self.mem.read32(FLASH_CR)?;
        if cr & FLASH_CR_LOCK != 0 {
            return Err(FlashError::UnlockFailed);
        }
        Ok(())
    }

    fn lock(&mut self) -> Result<(), FlashError> {
        let cr = self.mem.read32(FLASH_CR)?;
        self.mem.write32(FLASH_CR, cr | FLASH_CR_LOCK)?;
        Ok(())
    }

    /// Erase the entire user flash bank (spec §4.4).
    pub fn mass_erase(&mut self) -> Result<EraseOutcome, FlashError> {
        self.wait_bsy_clear(5_000, false)?;
        self.clear_sr_flags(FLASH_SR_CLEAR_MASK)?;
        self.unlock()?;
        self.clear_cr_bits(FLASH_CR_PG | FLASH_CR_PER)?;

        self.mem.write32(FLASH_CR, FLASH_CR_MER1)?;
        self.mem.write32(FLASH_CR, FLASH_CR_MER1 | FLASH_CR_STRT)?;
        self.wait_bsy_clear(MASS_ERASE_TIMEOUT_MS, false)?;

        let sr = self.mem.read32(FLASH_SR)?;
        if sr & FLASH_SR_ALL_ERRORS != 0 {
            return Err(FlashError::Error(sr));
        }
        let outcome = if sr & FLASH_SR_EOP != 0 {
            EraseOutcome::Clean
        } else {
            EraseOutcome::MissingEop
        };

        self.clear_sr_flags(FLASH_SR_CLEAR_MASK)?;
        self.clear_cr_bits(FLASH_CR_MER1 | FLASH_CR_STRT)?;
        self.lock()?;
        Ok(outcome)
    }

    /// Program `data` starting at `addr` in 8-byte doublewords. `data.len()`
    /// must be a multiple of 8; callers pad the tail with `0xFF` (spec §4.4).
    pub fn program(&mut self, addr: u32, data: &[u8]) -> Result<(), FlashError> {
        if data.len() % 8 != 0 {
            return Err(FlashError::UnalignedProgram);
        }

        self.wait_bsy_clear(5_000, false)?;
        self.unlock()?;
        self.clear_sr_flags(FLASH_SR_CLEAR_MASK)?;
        let cr = self.mem.read32(FLASH_CR)?;
        self.mem.write32(FLASH_CR, cr | FLASH_CR_PG)?;

        for (i, chunk) in data.chunks_exact(8).enumerate() {
            let word_addr = addr.wrapping_add((i as u32) * 8);
            let low = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            let high = u32::from_le_bytes([chunk[4], chunk[5], chunk[6], chunk[7]]);
            self.mem.write32(word_addr, low)?;
            self.mem.write32(word_addr.wrapping_add(4), high)?;
            self.wait_bsy_clear(PROGRAM_WORD_TIMEOUT_MS, true)?;

            let sr = self.mem.read32(FLASH_SR)?;
            if sr & FLASH_SR_ALL_ERRORS != 0 {
                let _ = self.clear_cr_bits(FLASH_CR_PG);
                let _ = self.lock();
                return Err(FlashError::Error(sr));
            }
        }

        self.clear_cr_bits(FLASH_CR_PG)?;
        self.lock()?;
        self.clear_sr_flags(FLASH_SR_CLEAR_MASK)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dp::Dp;
    use jig_hal::swd_phy::{PhyConfig, Pins, SwdPhy};

    /// Scripted bit stream, consumed in the exact order the PHY reads
    /// SWDIO; panics-to-`true` past the end rather than failing silently
    /// wrong, which is acceptable here since every test below drains its
    /// script exactly.
    struct MockPins {
        levels: std::collections::HashMap<u32, bool>,
        clock_ms: u32,
        script: std::collections::VecDeque<bool>,
    }
    impl MockPins {
        fn new(script: Vec<bool>) -> Self {
            MockPins {
                levels: std::collections::HashMap::new(),
                clock_ms: 0,
                script: script.into(),
            }
        }
    }
    impl jig_hal::hal::Clock for MockPins {
        fn millis(&self) -> u32 {
            self.clock_ms
        }
    }
    impl PinDriver for MockPins {
        fn pin_mode(&mut self, _pin: u32, _mode: jig_hal::hal::PinMode) {}
        fn digital_write(&mut self, pin: u32, level: bool) {
            self.levels.insert(pin, level);
        }
        fn digital_read(&mut self, pin: u32) -> bool {
            if pin == 1 {
                self.script.pop_front().unwrap_or(true)
            } else {
                *self.levels.get(&pin).unwrap_or(&true)
            }
        }
        fn delay_us(&mut self, _us: u32) {}
        fn delay_ms(&mut self, ms: u32) {
            self.clock_ms = self.clock_ms.wrapping_add(ms);
        }
    }

    fn pins() -> Pins {
        Pins {
            swclk: 0,
            swdio: 1,
            nrst: 2,
        }
    }

    fn ok_write_ack() -> Vec<bool> {
        vec![true, false, false]
    }

    fn ok_read_of(value: u32) -> Vec<bool> {
        let mut bits = vec![true, false, false];
        for i in 0..32 {
            bits.push((value >> i) & 1 != 0);
        }
        bits.push(value.count_ones() % 2 != 0);
        bits
    }

    fn new_session(script: Vec<bool>) -> MemApSession<MockPins> {
        let mock = MockPins::new(script);
        let phy = SwdPhy::new(mock, pins(), PhyConfig::default());
        let dp = Dp::new(phy);
        MemApSession::new(dp)
    }

    #[test]
    fn unlock_is_noop_when_lock_already_clear() {
        // read32(FLASH_CR): SELECT write, CSW write, TAR write, raw AP read
        // (discarded), RDBUFF read yielding CR=0 (LOCK clear).
        let mut bits = Vec::new();
        bits.extend(ok_write_ack()); // SELECT
        bits.extend(ok_write_ack()); // CSW
        bits.extend(ok_write_ack()); // TAR(FLASH_CR)
        bits.extend(ok_read_of(0)); // raw AP read (discarded)
        bits.extend(ok_read_of(0)); // RDBUFF: CR=0
        let mut mem = new_session(bits);
        let mut flash = FlashCtl::new(&mut mem);
        flash.unlock().unwrap();
    }

    #[test]
    fn unlock_fails_when_lock_bit_survives_key_sequence() {
        let mut bits = Vec::new();
        bits.extend(ok_write_ack()); // SELECT
        bits.extend(ok_write_ack()); // CSW
        bits.extend(ok_write_ack()); // TAR(FLASH_CR)
        bits.extend(ok_read_of(FLASH_CR_LOCK)); // raw AP read (discarded)
        bits.extend(ok_read_of(FLASH_CR_LOCK)); // RDBUFF: CR, LOCK set
        bits.extend(ok_write_ack()); // TAR(FLASH_KEYR)
        bits.extend(ok_write_ack()); // write KEY1
        bits.extend(ok_write_ack()); // TAR(FLASH_KEYR) re-issued (same addr, cache points past it)
        bits.extend(ok_write_ack()); // write KEY2
        bits.extend(ok_write_ack()); // TAR(FLASH_CR) re-read
        bits.extend(ok_read_of(FLASH_CR_LOCK)); // raw AP read (discarded)
        bits.extend(ok_read_of(FLASH_CR_LOCK)); // RDBUFF: CR, LOCK still set
        let mut mem = new_session(bits);
        let mut flash = FlashCtl::new(&mut mem);
        let err = flash.unlock().unwrap_err();
        assert_eq!(err, FlashError::UnlockFailed);
    }

    #[test]
    fn program_rejects_unaligned_payload() {
        let mut mem = new_session(Vec::new());
        let mut flash = FlashCtl::new(&mut mem);
        let err = flash.program(FLASH_BASE, &[0u8; 5]).unwrap_err();
        assert_eq!(err, FlashError::UnalignedProgram);
    }
}
