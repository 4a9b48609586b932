//! Interrupt-driven button to LED toggler
//!
//! An input pin is watched through edge-triggered interrupts and every edge
//! inverts an output pin. The pins and the interrupt binding are acquired in
//! the order outputs, inputs, binding and released in exactly the reverse
//! order, so the handler never runs against a pin that is not owned.
//!
//! The core is platform independent. A platform provides [`gpio::PinAccess`]
//! and [`exti::InterruptController`]; the `stm32l0x2` feature enables an
//! implementation for STM32L0x2 parts and the `mock` feature a fake one for
//! host-side tests.
#![cfg_attr(not(test), no_std)]

use embedded_hal as hal;

#[cfg(feature = "stm32l0x2")]
pub use ::stm32l0::stm32l0x2 as pac;

// This mod MUST go first, so that the others see its macros.
mod fmt;

pub mod exti;
pub mod gpio;
pub mod handler;
pub mod manager;
pub mod prelude;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

#[cfg(feature = "stm32l0x2")]
pub mod stm32l0;
