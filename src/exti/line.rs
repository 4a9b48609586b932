//! Types for representing the external interrupt lines.

use core::fmt;

/// An interrupt line sourced by a GPIO.
///
/// Pin `n` of any port is routed to line `n % 16`, so two pins with the same
/// number can not both be bound at once.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct IrqLine(u8);

impl IrqLine {
    /// Number of GPIO-sourced lines
    pub const COUNT: usize = 16;

    /// Returns the line object corresponding to a raw line number.
    ///
    /// If `raw` is not a GPIO line, `None` is returned.
    pub fn from_raw_line(raw: u8) -> Option<Self> {
        match raw {
            0..=15 => Some(IrqLine(raw)),
            _ => None,
        }
    }

    /// Returns the raw line number corresponding to `self`.
    pub fn raw_line(&self) -> u8 {
        self.0
    }

    /// Returns the vector `self` is dispatched through.
    pub fn vector(&self) -> Vector {
        match self.0 {
            0..=1 => Vector::Exti0_1,
            2..=3 => Vector::Exti2_3,
            _ => Vector::Exti4_15,
        }
    }

    pub(crate) fn mask(&self) -> u32 {
        0b1 << self.0
    }
}

impl fmt::Display for IrqLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EXTI{}", self.0)
    }
}

/// A shared interrupt entry. Every handler bound to a line of the vector is
/// called when any of its lines fires, with the identifier of that line.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Vector {
    Exti0_1,
    Exti2_3,
    Exti4_15,
}

#[cfg(feature = "stm32l0x2")]
impl Vector {
    /// Returns the NVIC interrupt corresponding to `self`.
    pub fn interrupt(&self) -> crate::pac::Interrupt {
        use crate::pac::Interrupt::*;
        match self {
            Vector::Exti0_1 => EXTI0_1,
            Vector::Exti2_3 => EXTI2_3,
            Vector::Exti4_15 => EXTI4_15,
        }
    }
}
