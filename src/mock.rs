//! Fake platform for host-side testing
//!
//! `MockPins` and `MockInterrupts` implement the platform primitives in plain
//! memory and expose what they saw, so the lifecycle can be checked without an
//! interrupt controller.

use core::cell::{Cell, RefCell};

use heapless::Vec;

use crate::exti::{
    dispatch_pending, BindingError, BindingHandle, Edge, InterruptController, IrqHandler, IrqLine,
    TriggerEdge,
};
use crate::gpio::{Direction, Level, PinAccess, PinError, PinHandle, PinId};

/// Number of lines the fake pin bank has
pub const LINES: usize = 64;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Owner {
    Free,
    Us,
    External,
}

#[derive(Debug, Copy, Clone)]
struct LineState {
    owner: Owner,
    direction: Direction,
    level: Level,
}

impl LineState {
    const FREE: LineState = LineState {
        owner: Owner::Free,
        direction: Direction::Input,
        level: Level::Low,
    };
}

/// Fake pin bank
pub struct MockPins {
    lines: RefCell<[LineState; LINES]>,
    released: RefCell<Vec<PinId, LINES>>,
    writes: Cell<u32>,
    violations: Cell<u32>,
}

impl Default for MockPins {
    fn default() -> Self {
        Self::new()
    }
}

impl MockPins {
    pub fn new() -> Self {
        MockPins {
            lines: RefCell::new([LineState::FREE; LINES]),
            released: RefCell::new(Vec::new()),
            writes: Cell::new(0),
            violations: Cell::new(0),
        }
    }

    /// Marks `id` as owned by some other consumer.
    pub fn claim_external(&self, id: PinId) {
        self.lines.borrow_mut()[usize::from(id)].owner = Owner::External;
    }

    /// Sets the electrical level of a line, as a button would.
    pub fn set_input(&self, id: PinId, level: Level) {
        self.lines.borrow_mut()[usize::from(id)].level = level;
    }

    /// Current level of a line, owned or not.
    pub fn level(&self, id: PinId) -> Level {
        self.lines.borrow()[usize::from(id)].level
    }

    pub fn is_owned(&self, id: PinId) -> bool {
        self.lines
            .borrow()
            .get(usize::from(id))
            .map_or(false, |line| line.owner == Owner::Us)
    }

    /// Lines given back so far, in release order.
    pub fn released(&self) -> Vec<PinId, LINES> {
        self.released.borrow().clone()
    }

    /// Number of `write` calls.
    pub fn writes(&self) -> u32 {
        self.writes.get()
    }

    /// Number of reads or writes through a handle whose line is not owned.
    pub fn violations(&self) -> u32 {
        self.violations.get()
    }

    fn check_owned(&self, pin: &PinHandle) {
        if !self.is_owned(pin.id()) {
            self.violations.set(self.violations.get() + 1);
        }
    }
}

impl PinAccess for MockPins {
    fn request(
        &self,
        id: PinId,
        direction: Direction,
        initial: Level,
    ) -> Result<PinHandle, PinError> {
        let mut lines = self.lines.borrow_mut();
        let line = lines
            .get_mut(usize::from(id))
            .ok_or(PinError::InvalidLine)?;

        if line.owner != Owner::Free {
            return Err(PinError::Busy);
        }

        line.owner = Owner::Us;
        line.direction = direction;
        if direction == Direction::Output {
            line.level = initial;
        }

        Ok(PinHandle::new(id, direction))
    }

    fn release(&self, pin: PinHandle) {
        self.check_owned(&pin);
        self.lines.borrow_mut()[usize::from(pin.id())].owner = Owner::Free;
        // The log is as long as the bank, so it only fills up on double releases.
        let _ = self.released.borrow_mut().push(pin.id());
    }

    fn read(&self, pin: &PinHandle) -> Level {
        self.check_owned(pin);
        self.level(pin.id())
    }

    fn write(&self, pin: &PinHandle, level: Level) {
        self.check_owned(pin);
        self.writes.set(self.writes.get() + 1);

        let mut lines = self.lines.borrow_mut();
        let line = &mut lines[usize::from(pin.id())];
        if line.direction == Direction::Output {
            line.level = level;
        }
    }
}

struct Slot<H> {
    line: IrqLine,
    edge: TriggerEdge,
    name: &'static str,
    id: u8,
    handler: H,
}

/// Fake interrupt controller with shared vectors
///
/// [`trigger`](MockInterrupts::trigger) plays the part of the hardware: it pends
/// a line if the edge matches its configuration, acknowledges it and runs every
/// handler on the line's vector.
pub struct MockInterrupts<H> {
    slots: Vec<Slot<H>, { IrqLine::COUNT }>,
    incapable: u64,
    rejected: u16,
    next_id: u8,
    acks: Cell<u32>,
}

impl<H: IrqHandler> Default for MockInterrupts<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: IrqHandler> MockInterrupts<H> {
    pub fn new() -> Self {
        MockInterrupts {
            slots: Vec::new(),
            incapable: 0,
            rejected: 0,
            next_id: 0,
            acks: Cell::new(0),
        }
    }

    /// Makes pin `id` unable to generate interrupts.
    pub fn remove_capability(&mut self, id: PinId) {
        self.incapable |= 1 << (u32::from(id) % 64);
    }

    /// Makes the controller refuse registrations on `line`.
    pub fn reject(&mut self, line: IrqLine) {
        self.rejected |= line.mask() as u16;
    }

    /// Simulates `edge` arriving on `line` and returns how many handlers
    /// claimed it.
    pub fn trigger(&self, line: IrqLine, edge: Edge) -> usize {
        let pended = self
            .slots
            .iter()
            .any(|slot| slot.line == line && slot.edge.matches(edge));
        if !pended {
            return 0;
        }

        dispatch_pending(
            line.vector(),
            line.mask(),
            self.slots.iter().map(|slot| (slot.line, &slot.handler)),
            |line| self.acknowledge(line),
        )
    }

    pub fn is_armed(&self, line: IrqLine) -> bool {
        self.slots.iter().any(|slot| slot.line == line)
    }

    /// Name the handler on `line` was registered with.
    pub fn name(&self, line: IrqLine) -> Option<&'static str> {
        self.slots.iter().find(|slot| slot.line == line).map(|slot| slot.name)
    }

    /// Number of live registrations.
    pub fn registered(&self) -> usize {
        self.slots.len()
    }

    /// Number of acknowledged interrupts.
    pub fn acks(&self) -> u32 {
        self.acks.get()
    }
}

impl<H: IrqHandler> InterruptController for MockInterrupts<H> {
    type Handler = H;

    fn resolve_interrupt(&mut self, pin: &PinHandle) -> Result<IrqLine, BindingError> {
        let id = pin.id();
        if pin.direction() != Direction::Input || self.incapable & (1 << (u32::from(id) % 64)) != 0
        {
            return Err(BindingError::NoInterruptCapability(id));
        }

        IrqLine::from_raw_line(id % IrqLine::COUNT as u8)
            .ok_or(BindingError::NoInterruptCapability(id))
    }

    fn register(
        &mut self,
        line: IrqLine,
        edge: TriggerEdge,
        name: &'static str,
        handler: H,
    ) -> Result<BindingHandle, BindingError> {
        if self.is_armed(line) || self.rejected & line.mask() as u16 != 0 {
            return Err(BindingError::RegistrationFailed(line));
        }

        let id = self.next_id;
        self.slots
            .push(Slot {
                line,
                edge,
                name,
                id,
                handler,
            })
            .map_err(|_| BindingError::RegistrationFailed(line))?;
        self.next_id = self.next_id.wrapping_add(1);

        Ok(BindingHandle::new(line, id))
    }

    fn unregister(&mut self, binding: BindingHandle) -> Option<H> {
        let index = self
            .slots
            .iter()
            .position(|slot| slot.id == binding.slot() && slot.line == binding.line())?;
        Some(self.slots.swap_remove(index).handler)
    }

    fn acknowledge(&self, _line: IrqLine) {
        self.acks.set(self.acks.get() + 1);
    }
}
