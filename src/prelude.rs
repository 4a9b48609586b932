pub use embedded_hal::digital::v2::*;

pub use crate::exti::InterruptController as _;
pub use crate::exti::IrqHandler as _;
pub use crate::gpio::PinAccess as _;
