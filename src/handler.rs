//! Edge handler
//!
//! The interrupt callback that toggles the output pin. It is the only code that
//! changes the output level while a binding is live.

use crate::exti::{IrqHandler, IrqLine, IrqReturn};
use crate::gpio::{PinAccess, PinHandle};

/// Toggles `output` on every interrupt of `irq`
///
/// `P` is how the handler reaches the pins from interrupt context: a shared
/// reference on the host, a zero-sized register accessor on hardware.
pub struct EdgeHandler<P> {
    irq: IrqLine,
    output: PinHandle,
    pins: P,
}

impl<P: PinAccess> EdgeHandler<P> {
    pub fn new(irq: IrqLine, output: PinHandle, pins: P) -> Self {
        EdgeHandler { irq, output, pins }
    }

    pub fn irq(&self) -> IrqLine {
        self.irq
    }

    pub fn output(&self) -> PinHandle {
        self.output
    }
}

impl<P: PinAccess> IrqHandler for EdgeHandler<P> {
    #[inline]
    fn handle(&self, irq: IrqLine) -> IrqReturn {
        // Shared vector: another line fired.
        if irq != self.irq {
            return IrqReturn::None;
        }

        let level = self.pins.read(&self.output);
        self.pins.write(&self.output, !level);

        IrqReturn::Handled
    }
}
