#![cfg_attr(not(test), no_std)]

//! Hardware-adjacent layer: external-collaborator traits and the SWD
//! physical layer (L0/L1) that sits directly on top of them.
//!
//! This crate plays the role `hs-probe-bsp` plays for the teacher firmware:
//! it never knows about DP/AP semantics, flash controllers, or RS-485
//! framing, only about wiggling pins and bytes at the correct times.

pub mod crc32;
pub mod hal;
pub mod swd_phy;

pub use hal::{Clock, PinDriver, PinMode, Reader, UartPort};
pub use swd_phy::{DrivenBy, Pins, PhyConfig, SwdPhy};
