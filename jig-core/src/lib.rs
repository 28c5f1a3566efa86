#![cfg_attr(not(test), no_std)]

//! Protocol/orchestration layer: ARM ADIv5 DP/AP, the STM32G0 flash
//! controller driver, the programming state machine, and the RS-485 framed
//! transport. Plays the role `firmware` plays over `hs-probe-bsp` in the
//! teacher workspace, but here layered over [`jig_hal`] instead.

pub mod corectl;
pub mod dp;
pub mod error;
pub mod flash;
pub mod memap;
pub mod programmer;
pub mod reader;
pub mod rs485;

pub use error::{FlashError, ProgrammerError, Rs485Error, SwdError};
pub use programmer::{Programmer, ProgrammerConfig, ProgrammerState};
