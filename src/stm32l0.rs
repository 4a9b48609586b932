//! STM32L0x2 platform
//!
//! Implements the pin and interrupt primitives on the GPIO, SYSCFG and EXTI
//! peripherals. Pin `id` is pin `id % 16` of port `id / 16` (PA = 0, PB = 1,
//! ..., PE = 4, PH = 5), so line 24 is PB8 and line 4 is PA4.
//!
//! Both types are meant to live in statics. The controller has to sit behind a
//! `cortex_m::interrupt::Mutex` and be reached from the EXTI vectors through
//! [`ExtiController::dispatch`].

use core::cell::Cell;

use cortex_m::interrupt::{self, Mutex};
use cortex_m::peripheral::NVIC;

use crate::exti::{
    dispatch_pending, BindingError, BindingHandle, InterruptController, IrqHandler, IrqLine,
    TriggerEdge, Vector,
};
use crate::gpio::{Direction, Level, PinAccess, PinError, PinHandle, PinId};
use crate::pac;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Port {
    PA,
    PB,
    PC,
    PD,
    PE,
    PH,
}

impl Port {
    /// Splits a line number into port and pin number.
    pub fn split(id: PinId) -> Option<(Port, u8)> {
        let port = match id / 16 {
            0 => Port::PA,
            1 => Port::PB,
            2 => Port::PC,
            3 => Port::PD,
            4 => Port::PE,
            5 => Port::PH,
            _ => return None,
        };
        Some((port, id % 16))
    }

    /// Bit of the port in RCC_IOPENR
    fn enable_bit(self) -> u32 {
        match self {
            Port::PA => 0,
            Port::PB => 1,
            Port::PC => 2,
            Port::PD => 3,
            Port::PE => 4,
            Port::PH => 7,
        }
    }

    /// Value selecting the port in SYSCFG_EXTICRx
    fn exti_source(self) -> u32 {
        match self {
            Port::PA => 0,
            Port::PB => 1,
            Port::PC => 2,
            Port::PD => 3,
            Port::PE => 4,
            Port::PH => 5,
        }
    }
}

// The register blocks of GPIOA and the other ports have distinct types, so the
// body is expanded once per port.
macro_rules! with_port {
    ($port:expr, |$rb:ident| $body:expr) => {
        match $port {
            Port::PA => {
                let $rb = unsafe { &*pac::GPIOA::ptr() };
                $body
            }
            Port::PB => {
                let $rb = unsafe { &*pac::GPIOB::ptr() };
                $body
            }
            Port::PC => {
                let $rb = unsafe { &*pac::GPIOC::ptr() };
                $body
            }
            Port::PD => {
                let $rb = unsafe { &*pac::GPIOD::ptr() };
                $body
            }
            Port::PE => {
                let $rb = unsafe { &*pac::GPIOE::ptr() };
                $body
            }
            Port::PH => {
                let $rb = unsafe { &*pac::GPIOH::ptr() };
                $body
            }
        }
    };
}

const MODER_INPUT: u32 = 0b00;
const MODER_OUTPUT: u32 = 0b01;

/// GPIO pin bank
///
/// Ownership of the lines is a bitmap guarded by a critical section.
pub struct Stm32Pins {
    taken: Mutex<Cell<u128>>,
}

impl Stm32Pins {
    pub const fn new() -> Self {
        Stm32Pins {
            taken: Mutex::new(Cell::new(0)),
        }
    }
}

impl PinAccess for Stm32Pins {
    fn request(
        &self,
        id: PinId,
        direction: Direction,
        initial: Level,
    ) -> Result<PinHandle, PinError> {
        let (port, i) = Port::split(id).ok_or(PinError::InvalidLine)?;
        let bit = 1u128 << id;

        interrupt::free(|cs| {
            let taken = self.taken.borrow(cs);
            if taken.get() & bit != 0 {
                return Err(PinError::Busy);
            }
            taken.set(taken.get() | bit);

            // NOTE(unsafe) read-modify-write inside a critical section
            let rcc = unsafe { &*pac::RCC::ptr() };
            rcc.iopenr
                .modify(|r, w| unsafe { w.bits(r.bits() | (1 << port.enable_bit())) });

            let offset = 2 * u32::from(i);
            with_port!(port, |gpio| {
                let moder = match direction {
                    Direction::Input => {
                        gpio.pupdr
                            .modify(|r, w| unsafe { w.bits(r.bits() & !(0b11 << offset)) });
                        MODER_INPUT
                    }
                    Direction::Output => {
                        // Latch the initial level before the driver is enabled.
                        let bsrr = match initial {
                            Level::High => 1 << i,
                            Level::Low => 1 << (i + 16),
                        };
                        gpio.bsrr.write(|w| unsafe { w.bits(bsrr) });
                        gpio.otyper
                            .modify(|r, w| unsafe { w.bits(r.bits() & !(0b1 << i)) });
                        MODER_OUTPUT
                    }
                };
                gpio.moder.modify(|r, w| unsafe {
                    w.bits((r.bits() & !(0b11 << offset)) | (moder << offset))
                });
            });

            Ok(PinHandle::new(id, direction))
        })
    }

    fn release(&self, pin: PinHandle) {
        let bit = 1u128 << pin.id();
        interrupt::free(|cs| {
            let taken = self.taken.borrow(cs);
            taken.set(taken.get() & !bit);
        });
    }

    fn read(&self, pin: &PinHandle) -> Level {
        let (port, i) = match Port::split(pin.id()) {
            Some(split) => split,
            None => return Level::Low,
        };

        // NOTE(unsafe) atomic read with no side effects
        let bits = with_port!(port, |gpio| match pin.direction() {
            Direction::Output => gpio.odr.read().bits(),
            Direction::Input => gpio.idr.read().bits(),
        });
        Level::from(bits & (1 << i) != 0)
    }

    fn write(&self, pin: &PinHandle, level: Level) {
        if let Some((port, i)) = Port::split(pin.id()) {
            let bsrr = match level {
                Level::High => 1 << i,
                Level::Low => 1 << (i + 16),
            };
            // NOTE(unsafe) atomic write to a stateless register
            with_port!(port, |gpio| gpio.bsrr.write(|w| unsafe { w.bits(bsrr) }));
        }
    }
}

struct Slot<H> {
    edge: TriggerEdge,
    name: &'static str,
    id: u8,
    handler: H,
}

/// EXTI controller holding one handler per GPIO line
pub struct ExtiController<H> {
    slots: [Option<Slot<H>>; IrqLine::COUNT],
    routes: [Option<Port>; IrqLine::COUNT],
    next_id: u8,
}

impl<H: IrqHandler> Default for ExtiController<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: IrqHandler> ExtiController<H> {
    pub fn new() -> Self {
        ExtiController {
            slots: Default::default(),
            routes: [None; IrqLine::COUNT],
            next_id: 0,
        }
    }

    /// Runs the handlers of every pending line of `vector`.
    ///
    /// Call this from the vector's interrupt handler. Every handler on the
    /// vector sees the identifier of each pending line, and the line is cleared
    /// before they run.
    pub fn dispatch(&self, vector: Vector) {
        // NOTE(unsafe) atomic read with no side effects
        let pending = unsafe { (*pac::EXTI::ptr()).pr.read().bits() };

        let handlers = self.slots.iter().enumerate().filter_map(|(raw, slot)| {
            let slot = slot.as_ref()?;
            Some((IrqLine::from_raw_line(raw as u8)?, &slot.handler))
        });
        dispatch_pending(vector, pending, handlers, |line| self.acknowledge(line));
    }

    /// Name the handler on `line` was registered with.
    pub fn name(&self, line: IrqLine) -> Option<&'static str> {
        self.slots[usize::from(line.raw_line())]
            .as_ref()
            .map(|slot| slot.name)
    }

    /// Edges `line` listens for.
    pub fn edge(&self, line: IrqLine) -> Option<TriggerEdge> {
        self.slots[usize::from(line.raw_line())]
            .as_ref()
            .map(|slot| slot.edge)
    }

    fn vector_in_use(&self, vector: Vector) -> bool {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_some())
            .filter_map(|(raw, _)| IrqLine::from_raw_line(raw as u8))
            .any(|line| line.vector() == vector)
    }
}

impl<H: IrqHandler> InterruptController for ExtiController<H> {
    type Handler = H;

    fn resolve_interrupt(&mut self, pin: &PinHandle) -> Result<IrqLine, BindingError> {
        let id = pin.id();
        let (port, i) = Port::split(id).ok_or(BindingError::NoInterruptCapability(id))?;

        if pin.direction() != Direction::Input {
            return Err(BindingError::NoInterruptCapability(id));
        }
        // Only PH0, PH1, PH9 and PH10 are wired to the EXTI multiplexer.
        if port == Port::PH && !matches!(i, 0 | 1 | 9 | 10) {
            return Err(BindingError::NoInterruptCapability(id));
        }

        let line = IrqLine::from_raw_line(i).ok_or(BindingError::NoInterruptCapability(id))?;
        self.routes[usize::from(i)] = Some(port);
        Ok(line)
    }

    fn register(
        &mut self,
        line: IrqLine,
        edge: TriggerEdge,
        name: &'static str,
        handler: H,
    ) -> Result<BindingHandle, BindingError> {
        let index = usize::from(line.raw_line());
        if self.slots[index].is_some() {
            return Err(BindingError::RegistrationFailed(line));
        }
        let port = self.routes[index]
            .take()
            .ok_or(BindingError::RegistrationFailed(line))?;

        let bm = line.mask();
        let raw = u32::from(line.raw_line());
        let shift = 4 * (raw % 4);
        let source = port.exti_source() << shift;

        interrupt::free(|_| unsafe {
            let rcc = &*pac::RCC::ptr();
            // SYSCFG routes the port to the line
            rcc.apb2enr.modify(|r, w| w.bits(r.bits() | 0b1));

            let syscfg = &*pac::SYSCFG::ptr();
            match raw / 4 {
                0 => syscfg
                    .exticr1
                    .modify(|r, w| w.bits((r.bits() & !(0b1111 << shift)) | source)),
                1 => syscfg
                    .exticr2
                    .modify(|r, w| w.bits((r.bits() & !(0b1111 << shift)) | source)),
                2 => syscfg
                    .exticr3
                    .modify(|r, w| w.bits((r.bits() & !(0b1111 << shift)) | source)),
                _ => syscfg
                    .exticr4
                    .modify(|r, w| w.bits((r.bits() & !(0b1111 << shift)) | source)),
            }

            let exti = &*pac::EXTI::ptr();
            match edge {
                TriggerEdge::Rising => {
                    exti.rtsr.modify(|r, w| w.bits(r.bits() | bm));
                    exti.ftsr.modify(|r, w| w.bits(r.bits() & !bm));
                }
                TriggerEdge::Falling => {
                    exti.rtsr.modify(|r, w| w.bits(r.bits() & !bm));
                    exti.ftsr.modify(|r, w| w.bits(r.bits() | bm));
                }
                TriggerEdge::All => {
                    exti.rtsr.modify(|r, w| w.bits(r.bits() | bm));
                    exti.ftsr.modify(|r, w| w.bits(r.bits() | bm));
                }
            }

            // Drop an edge that was latched before we were listening.
            exti.pr.write(|w| w.bits(bm));
            exti.imr.modify(|r, w| w.bits(r.bits() | bm));
        });

        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        self.slots[index] = Some(Slot {
            edge,
            name,
            id,
            handler,
        });

        // NOTE(unsafe) the handler for this vector is in place
        unsafe { NVIC::unmask(line.vector().interrupt()) };

        Ok(BindingHandle::new(line, id))
    }

    fn unregister(&mut self, binding: BindingHandle) -> Option<H> {
        let line = binding.line();
        let index = usize::from(line.raw_line());
        match &self.slots[index] {
            Some(slot) if slot.id == binding.slot() => {}
            _ => return None,
        }

        let bm = line.mask();
        interrupt::free(|_| unsafe {
            let exti = &*pac::EXTI::ptr();
            exti.imr.modify(|r, w| w.bits(r.bits() & !bm));
            exti.rtsr.modify(|r, w| w.bits(r.bits() & !bm));
            exti.ftsr.modify(|r, w| w.bits(r.bits() & !bm));
            exti.pr.write(|w| w.bits(bm));
        });

        let slot = self.slots[index].take()?;
        if !self.vector_in_use(line.vector()) {
            NVIC::mask(line.vector().interrupt());
        }

        debug!("released {} ({})", line.raw_line(), slot.name);
        Some(slot.handler)
    }

    fn acknowledge(&self, line: IrqLine) {
        // NOTE(unsafe) write-1-to-clear, other lines are unaffected
        unsafe { (*pac::EXTI::ptr()).pr.write(|w| w.bits(line.mask())) };
    }
}
