//! L3: 32-bit AHB memory access via the AHB-AP's CSW/TAR/DRW registers,
//! with a TAR-caching session and a validated pipelined sequential reader.

use jig_hal::hal::PinDriver;

use crate::dp::{ApRegister, Dp};
use crate::error::SwdError;

/// CSW value used throughout: 32-bit transfer size, auto-increment-single,
/// plus the upper bits some probes set for robust transfers (spec §4.3).
const CSW_32BIT_AUTOINC: u32 = 0x2300_0012;

const AP0_BANK0: (u8, u8) = (0, 0);

/// Caches TAR/CSW setup across consecutive same-AP accesses so a run of
/// sequential reads/writes doesn't re-issue SELECT/CSW/TAR every time.
/// Spec §3: invalidated whenever a non-session caller may have touched
/// DP.SELECT, AP.CSW or AP.TAR.
pub struct MemApSession<P: PinDriver> {
    dp: Dp<P>,
    tar_cached: Option<u32>,
    csw_configured: bool,
}

impl<P: PinDriver> MemApSession<P> {
    pub fn new(dp: Dp<P>) -> Self {
        MemApSession {
            dp,
            tar_cached: None,
            csw_configured: false,
        }
    }

    pub fn dp(&mut self) -> &mut Dp<P> {
        &mut self.dp
    }

    pub fn into_dp(self) -> Dp<P> {
        self.dp
    }

    pub fn invalidate(&mut self) {
        self.tar_cached = None;
        self.csw_configured = false;
    }

    fn ensure_csw(&mut self) -> Result<(), SwdError> {
        if !self.csw_configured {
            self.dp.ap_select(AP0_BANK0.0, AP0_BANK0.1)?;
            self.dp.write_ap(ApRegister::Csw, CSW_32BIT_AUTOINC)?;
            self.csw_configured = true;
        }
        Ok(())
    }

    fn ensure_tar(&mut self, addr: u32) -> Result<(), SwdError> {
        self.ensure_csw()?;
        if self.tar_cached != Some(addr) {
            self.dp.write_ap(ApRegister::Tar, addr)?;
            self.tar_cached = Some(addr);
        }
        Ok(())
    }

    /// Issue SELECT/CSW/TAR for `addr` without any DRW transaction. Used by
    /// connect-under-reset to pre-stage the AP before NRST is released, so
    /// the critical window's only transaction is the DHCSR write itself.
    pub(crate) fn prestage(&mut self, addr: u32) -> Result<(), SwdError> {
        self.ensure_tar(addr)
    }

    pub fn write32(&mut self, addr: u32, value: u32) -> Result<(), SwdError> {
        self.ensure_tar(addr)?;
        self.dp.write_ap(ApRegister::Drw, value)?;
        // auto-increment-single advances TAR by 4 on the target.
        self.tar_cached = Some(addr.wrapping_add(4));
        Ok(())
    }

    pub fn read32(&mut self, addr: u32) -> Result<u32, SwdError> {
        self.ensure_tar(addr)?;
        let value = self.dp.read_ap(ApRegister::Drw)?;
        self.tar_cached = Some(addr.wrapping_add(4));
        Ok(value)
    }

    /// Read `out.len()` consecutive 32-bit words starting at `addr`. Issues
    /// `N` raw AP.DRW reads (each transaction's data phase carries the
    /// *previous* read's value, per the posted-read protocol) plus one
    /// trailing DP.RDBUFF fetch for the final word, amortizing the
    /// request/ACK/turnaround overhead across the whole run (spec §4.3).
    /// The first and last words are then re-read non-pipelined and
    /// compared; any mismatch falls back to plain sequential `read32` for
    /// the whole chunk.
    pub fn read_sequential(&mut self, addr: u32, out: &mut [u32]) -> Result<(), SwdError> {
        if out.is_empty() {
            return Ok(());
        }
        if out.len() == 1 {
            out[0] = self.read32(addr)?;
            return Ok(());
        }

        self.ensure_tar(addr)?;
        let n = out.len();

        // Primes the pipeline: this read's data phase carries whatever was
        // posted before the session touched TAR, and is discarded.
        let _ = self.dp.read_ap_raw(ApRegister::Drw)?;
        for slot in out.iter_mut().take(n - 1) {
            *slot = self.dp.read_ap_raw(ApRegister::Drw)?;
        }
        out[n - 1] = self.dp.read_dp(crate::dp::DpRegister::RdBuff)?;
        self.tar_cached = Some(addr.wrapping_add((n as u32) * 4));

        let first_check = self.read32(addr)?;
        let last_check = self.read32(addr.wrapping_add(((n - 1) as u32) * 4))?;
        if first_check != out[0] || last_check != out[n - 1] {
            return self.read_sequential_unpipelined(addr, out);
        }
        Ok(())
    }

    fn read_sequential_unpipelined(&mut self, addr: u32, out: &mut [u32]) -> Result<(), SwdError> {
        for (i, slot) in out.iter_mut().enumerate() {
            *slot = self.read32(addr.wrapping_add((i as u32) * 4))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jig_hal::swd_phy::{PhyConfig, Pins, SwdPhy};

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

    fn ok_read_of(value: u32) -> Vec<bool> {
        let mut bits = vec![true, false, false];
        for i in 0..32 {
            bits.push((value >> i) & 1 != 0);
        }
        bits.push(value.count_ones() % 2 != 0);
        bits
    }

    #[test]
    fn read32_skips_redundant_tar_on_sequential_same_session_access() {
        // SELECT write, CSW write, TAR write (each 3-bit ACK-only), then
        // the posted AP.DRW read (discarded) and the RDBUFF fetch.
        let mut bits = vec![true, false, false]; // SELECT write ACK
        bits.extend(vec![true, false, false]); // CSW write ACK
        bits.extend(vec![true, false, false]); // TAR write ACK
        bits.extend(vec![true, false, false]); // AP.DRW read ACK
        bits.extend(vec![false; 33]); // posted garbage data+parity, discarded by caller semantics
        bits.extend(ok_read_of(0x1234_5678)); // RDBUFF read
        let mock = MockPins::new(bits);
        let phy = SwdPhy::new(mock, pins(), PhyConfig::default());
        let dp = Dp::new(phy);
        let mut session = MemApSession::new(dp);
        let value = session.read32(0x2000_0000).unwrap();
        assert_eq!(value, 0x1234_5678);
        assert_eq!(session.tar_cached, Some(0x2000_0004));
    }

    #[test]
    fn invalidate_clears_cached_tar_and_csw() {
        let mock = MockPins::new(vec![]);
        let phy = SwdPhy::new(mock, pins(), PhyConfig::default());
        let dp = Dp::new(phy);
        let mut session = MemApSession::new(dp);
        session.tar_cached = Some(0x2000_0000);
        session.csw_configured = true;
        session.invalidate();
        assert_eq!(session.tar_cached, None);
        assert!(!session.csw_configured);
    }
}
