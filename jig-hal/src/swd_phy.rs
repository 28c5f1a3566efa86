//! L1: bit-exact SWD waveform generation and sampling.
//!
//! SWCLK is idle-low. One bit period is low -> high -> low: the host
//! updates SWDIO while the clock is low (the falling edge of the *previous*
//! bit) and the target samples on the rising edge; when the target drives,
//! the host samples on the falling edge. Every primitive here ends with the
//! clock low so the next primitive may change drive immediately.

use crate::hal::PinDriver;

/// Host-side GPIO identifiers for the three jig pins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pins {
    pub swclk: u32,
    pub swdio: u32,
    pub nrst: u32,
}

/// Who is currently driving SWDIO.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrivenBy {
    Host { level: bool },
    Target,
    HiZ,
}

/// Tunables for the bit-bang timing. Defaults match spec §4.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhyConfig {
    pub half_period_us: u32,
    pub post_txn_idle_cycles: u8,
    pub request_prefix_idle_bits: u8,
}

impl Default for PhyConfig {
    fn default() -> Self {
        PhyConfig {
            half_period_us: 1,
            post_txn_idle_cycles: 8,
            request_prefix_idle_bits: 2,
        }
    }
}

/// Bit-bang SWD physical layer, owning the pin driver it bangs bits over.
///
/// Owning `P` by value (rather than borrowing it, as the teacher's `SWD<'a>`
/// borrows its shared `SPI`) keeps the DP/AP/MemAP/CoreCtl/Programmer tower
/// built on top a straightforward ownership chain: each layer owns the one
/// below it, so there is exactly one path to the hardware and the borrow
/// checker never has to referee two layers touching the pins at once.
pub struct SwdPhy<P: PinDriver> {
    pin_driver: P,
    pins: Pins,
    config: PhyConfig,
    clk_high: bool,
    drive: DrivenBy,
}

impl<P: PinDriver> SwdPhy<P> {
    pub fn new(mut pin_driver: P, pins: Pins, config: PhyConfig) -> Self {
        pin_driver.pin_mode(pins.swclk, crate::hal::PinMode::Output);
        pin_driver.digital_write(pins.swclk, false);
        pin_driver.pin_mode(pins.nrst, crate::hal::PinMode::Output);
        pin_driver.digital_write(pins.nrst, true);
        SwdPhy {
            pin_driver,
            pins,
            config,
            clk_high: false,
            drive: DrivenBy::HiZ,
        }
    }

    pub fn pins(&self) -> Pins {
        self.pins
    }

    pub fn driven_by(&self) -> DrivenBy {
        self.drive
    }

    pub fn pin_driver(&mut self) -> &mut P {
        &mut self.pin_driver
    }

    pub fn into_pin_driver(self) -> P {
        self.pin_driver
    }

    fn half_clock(&mut self) {
        self.pin_driver.delay_us(self.config.half_period_us);
    }

    fn set_clk(&mut self, high: bool) {
        self.pin_driver.digital_write(self.pins.swclk, high);
        self.clk_high = high;
    }

    fn drive_swdio(&mut self, level: bool) {
        if !matches!(self.drive, DrivenBy::Host { .. }) {
            self.pin_driver
                .pin_mode(self.pins.swdio, crate::hal::PinMode::Output);
        }
        self.pin_driver.digital_write(self.pins.swdio, level);
        self.drive = DrivenBy::Host { level };
    }

    /// Release SWDIO to high-impedance with a weak pull-down, so a
    /// genuinely-undriven line reads low instead of floating to whatever the
    /// target's pull-up would otherwise suggest.
    fn release_swdio(&mut self) {
        self.pin_driver
            .pin_mode(self.pins.swdio, crate::hal::PinMode::InputPullDown);
        self.drive = DrivenBy::HiZ;
    }

    fn sample_swdio(&mut self) -> bool {
        self.drive = DrivenBy::Target;
        self.pin_driver.digital_read(self.pins.swdio)
    }

    /// One full clock cycle. If `drive` is `Some`, SWDIO is set to that
    /// level before the rising edge (host drives); otherwise SWDIO is
    /// sampled on the falling edge (target drives). Assumes the clock is
    /// already low on entry and leaves it low on exit.
    fn clock_cycle(&mut self, drive: Option<bool>) -> bool {
        if let Some(level) = drive {
            self.drive_swdio(level);
        }
        self.set_clk(true);
        self.half_clock();
        self.set_clk(false);
        let sample = if drive.is_none() {
            self.sample_swdio()
        } else {
            false
        };
        self.half_clock();
        sample
    }

    pub fn write_bit(&mut self, bit: bool) {
        self.clock_cycle(Some(bit));
    }

    pub fn read_bit(&mut self) -> bool {
        self.clock_cycle(None)
    }

    /// Release SWDIO to high-impedance without clocking. Used at the
    /// request->ACK handover: the target samples the request's last bit on
    /// the falling edge that already happened, and the first ACK bit is
    /// sampled on the very next rising edge, so inserting a clock here would
    /// delay ACK (and all following data) sampling by a full bit period.
    pub fn release(&mut self) {
        self.release_swdio();
    }

    /// 1.5 cycles of high-impedance drive handover.
    pub fn turnaround(&mut self) {
        self.release_swdio();
        debug_assert!(!self.clk_high);
        self.set_clk(true);
        self.half_clock();
        self.set_clk(false);
        self.half_clock();
        self.set_clk(true);
        self.half_clock();
        self.set_clk(false);
        self.half_clock();
    }

    /// Drive SWDIO to `level` for `n` clock cycles.
    pub fn line_idle(&mut self, n: u32, level: bool) {
        for _ in 0..n {
            self.write_bit(level);
        }
    }

    /// >= 50 cycles of SWDIO=1; this implementation uses 80.
    pub fn line_reset(&mut self) {
        self.line_idle(80, true);
    }

    /// Transmit the fixed 16-bit JTAG-to-SWD pattern 0xE79E, LSB-first.
    pub fn jtag_to_swd_sequence(&mut self) {
        self.tx_u16(0xE79E);
    }

    pub fn tx_u8(&mut self, byte: u8) {
        for i in 0..8 {
            self.write_bit((byte >> i) & 1 != 0);
        }
    }

    pub fn tx_u16(&mut self, word: u16) {
        for i in 0..16 {
            self.write_bit((word >> i) & 1 != 0);
        }
    }

    pub fn rx_u32(&mut self) -> u32 {
        let mut value = 0u32;
        for i in 0..32 {
            if self.read_bit() {
                value |= 1 << i;
            }
        }
        value
    }

    pub fn tx_u32(&mut self, value: u32) {
        for i in 0..32 {
            self.write_bit((value >> i) & 1 != 0);
        }
    }

    pub fn post_txn_idle(&mut self) {
        self.drive_swdio(false);
        self.line_idle(self.config.post_txn_idle_cycles as u32, false);
    }

    pub fn request_prefix_idle(&mut self) {
        self.drive_swdio(false);
        self.line_idle(self.config.request_prefix_idle_bits as u32, false);
    }

    pub fn set_nrst(&mut self, asserted: bool) {
        // NRST is active-low.
        self.pin_driver.digital_write(self.pins.nrst, !asserted);
    }

    pub fn nrst_is_asserted(&mut self) -> bool {
        !self.pin_driver.digital_read(self.pins.nrst)
    }

    /// Assert NRST, wait >= 20ms, then line-reset + JTAG-to-SWD + line-reset
    /// + 16 idle cycles, all with NRST held low.
    pub fn attach(&mut self) {
        self.set_nrst(true);
        self.pin_driver.delay_ms(20);
        self.drive_swdio(true);
        self.line_reset();
        self.jtag_to_swd_sequence();
        self.line_reset();
        self.line_idle(16, true);
    }

    /// SWD line reset without touching NRST: used to re-establish the link
    /// after NRST release, since a system reset clears DP/AP state.
    pub fn swd_line_reset_only(&mut self) {
        self.line_reset();
        self.line_idle(16, true);
    }
}
