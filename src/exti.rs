//! External interrupt controller
//!
//! The interrupt primitive a platform provides and the binding of an input
//! pin's interrupt line to a handler.
mod line;

use core::fmt;

use crate::gpio::{AcquiredPin, PinHandle, PinId};

pub use line::{IrqLine, Vector};

/// Edges a line listens for
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TriggerEdge {
    Rising,
    Falling,
    All,
}

impl TriggerEdge {
    /// Returns whether an observed `edge` pends a line configured with `self`.
    pub fn matches(self, edge: Edge) -> bool {
        match (self, edge) {
            (TriggerEdge::All, _) => true,
            (TriggerEdge::Rising, Edge::Rising) => true,
            (TriggerEdge::Falling, Edge::Falling) => true,
            _ => false,
        }
    }
}

/// A single observed transition of an input level
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Edge {
    Rising,
    Falling,
}

/// What a handler did with an interrupt
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum IrqReturn {
    /// The identifier belonged to another source
    None,
    Handled,
}

/// Callback run in interrupt context
///
/// Implementations must not block, allocate or log.
pub trait IrqHandler {
    fn handle(&self, irq: IrqLine) -> IrqReturn;
}

/// Identifies a live registration inside an [`InterruptController`]
#[derive(Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BindingHandle {
    line: IrqLine,
    slot: u8,
}

impl BindingHandle {
    /// Only meant to be called by [`InterruptController::register`]
    /// implementations.
    pub fn new(line: IrqLine, slot: u8) -> Self {
        BindingHandle { line, slot }
    }

    pub fn line(&self) -> IrqLine {
        self.line
    }

    pub fn slot(&self) -> u8 {
        self.slot
    }
}

/// Errors while wiring an input pin to an interrupt
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BindingError {
    /// The pin's line can not generate interrupts
    NoInterruptCapability(PinId),
    /// The controller refused the registration
    RegistrationFailed(IrqLine),
    /// The pin to bind is not acquired
    NotAcquired,
    /// An interrupt is already bound
    AlreadyBound,
}

impl fmt::Display for BindingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindingError::NoInterruptCapability(id) => {
                write!(f, "pin {} can not generate interrupts", id)
            }
            BindingError::RegistrationFailed(line) => {
                write!(f, "interrupt controller rejected {}", line)
            }
            BindingError::NotAcquired => f.write_str("input pin is not acquired"),
            BindingError::AlreadyBound => f.write_str("interrupt is already bound"),
        }
    }
}

/// Interrupt primitive implemented by a platform
///
/// The controller owns each registered handler until it is unregistered.
/// Implementations acknowledge a pending line once per dispatch, whatever its
/// handlers return, and `unregister` must not return while the handler is
/// running. [`dispatch_pending`] does the dispatch part.
pub trait InterruptController {
    type Handler: IrqHandler;

    /// Maps an acquired input pin to its interrupt line.
    fn resolve_interrupt(&mut self, pin: &PinHandle) -> Result<IrqLine, BindingError>;

    /// Arms `line` for `edge` and stores `handler` for it.
    fn register(
        &mut self,
        line: IrqLine,
        edge: TriggerEdge,
        name: &'static str,
        handler: Self::Handler,
    ) -> Result<BindingHandle, BindingError>;

    /// Disarms the line and hands the handler back.
    fn unregister(&mut self, binding: BindingHandle) -> Option<Self::Handler>;

    /// Clears the pending flag so the line fires again on the next edge.
    fn acknowledge(&self, line: IrqLine);
}

/// A live registration of a handler against an input pin's line
///
/// Not `Clone`: unbinding consumes it.
#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct InterruptBinding {
    pin: PinId,
    line: IrqLine,
    edge: TriggerEdge,
    handle: BindingHandle,
}

impl InterruptBinding {
    pub fn pin(&self) -> PinId {
        self.pin
    }

    pub fn line(&self) -> IrqLine {
        self.line
    }

    pub fn edge(&self) -> TriggerEdge {
        self.edge
    }

    /// Detaches the handler. Once this returns the handler no longer runs.
    pub fn unbind<C: InterruptController>(self, irqs: &mut C) -> Option<C::Handler> {
        debug!("unbinding {} from pin {}", self.line.raw_line(), self.pin);
        irqs.unregister(self.handle)
    }
}

/// Resolves `input` to its interrupt line and registers the handler built by
/// `make_handler` for it.
///
/// On failure nothing stays registered. The pin itself is left acquired; giving
/// it back is up to the caller.
pub fn bind_interrupt<C, F>(
    irqs: &mut C,
    input: &AcquiredPin,
    edge: TriggerEdge,
    name: &'static str,
    make_handler: F,
) -> Result<InterruptBinding, BindingError>
where
    C: InterruptController,
    F: FnOnce(IrqLine) -> C::Handler,
{
    let line = irqs.resolve_interrupt(&input.handle)?;
    let handle = irqs.register(line, edge, name, make_handler(line))?;

    Ok(InterruptBinding {
        pin: input.id(),
        line,
        edge,
        handle,
    })
}

/// Runs the handlers sharing `vector` for every line of it set in `pending`.
///
/// `handlers` yields each registered handler with the line it is bound to.
/// Each pending line is cleared through `clear` before its handlers run, so an
/// edge arriving meanwhile pends the line again. Returns how many handler
/// calls reported [`IrqReturn::Handled`].
pub fn dispatch_pending<'h, H, I, F>(
    vector: Vector,
    pending: u32,
    handlers: I,
    mut clear: F,
) -> usize
where
    H: IrqHandler + 'h,
    I: Iterator<Item = (IrqLine, &'h H)> + Clone,
    F: FnMut(IrqLine),
{
    let mut handled = 0;

    for raw in 0..IrqLine::COUNT as u8 {
        let line = match IrqLine::from_raw_line(raw) {
            Some(line) => line,
            None => continue,
        };
        if line.vector() != vector || pending & line.mask() == 0 {
            continue;
        }

        clear(line);
        for (owner, handler) in handlers.clone() {
            if owner.vector() == vector && handler.handle(line) == IrqReturn::Handled {
                handled += 1;
            }
        }
    }

    handled
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpio::{acquire_inputs, Level, PinConfig};
    use crate::mock::{MockInterrupts, MockPins};

    struct Count<'a>(&'a core::cell::Cell<u32>);

    impl<'a> IrqHandler for Count<'a> {
        fn handle(&self, _irq: IrqLine) -> IrqReturn {
            self.0.set(self.0.get() + 1);
            IrqReturn::Handled
        }
    }

    const BUTTONS: [PinConfig; 1] = [PinConfig::input(4, "PPM 1")];

    #[test]
    fn trigger_masks() {
        assert!(TriggerEdge::All.matches(Edge::Falling));
        assert!(TriggerEdge::Rising.matches(Edge::Rising));
        assert!(!TriggerEdge::Rising.matches(Edge::Falling));
        assert!(!TriggerEdge::Falling.matches(Edge::Rising));
    }

    /// Stands in for the pending register: records its calls and raises the
    /// line again from inside the handler, as a fast second edge would.
    struct Bouncy<'a> {
        pending: &'a core::cell::Cell<u32>,
        calls: &'a core::cell::Cell<u32>,
    }

    impl<'a> IrqHandler for Bouncy<'a> {
        fn handle(&self, irq: IrqLine) -> IrqReturn {
            self.calls.set(self.calls.get() + 1);
            self.pending.set(self.pending.get() | irq.mask());
            IrqReturn::Handled
        }
    }

    #[test]
    fn edge_during_handler_stays_pending() {
        let pending = core::cell::Cell::new(0);
        let calls = core::cell::Cell::new(0);
        let line = IrqLine::from_raw_line(4).unwrap();
        let handler = Bouncy {
            pending: &pending,
            calls: &calls,
        };
        pending.set(line.mask());

        let handled = dispatch_pending(
            Vector::Exti4_15,
            pending.get(),
            core::iter::once((line, &handler)),
            |l| pending.set(pending.get() & !l.mask()),
        );

        assert_eq!(handled, 1);
        assert_eq!(calls.get(), 1);
        assert_eq!(pending.get(), line.mask());
    }

    #[test]
    fn every_handler_on_the_vector_sees_the_line() {
        let calls = core::cell::Cell::new(0);
        let cleared = core::cell::Cell::new(0);
        let a = Count(&calls);
        let b = Count(&calls);
        let other = Count(&calls);
        let handlers = [
            (IrqLine::from_raw_line(4).unwrap(), &a),
            (IrqLine::from_raw_line(9).unwrap(), &b),
            (IrqLine::from_raw_line(1).unwrap(), &other),
        ];

        let handled = dispatch_pending(
            Vector::Exti4_15,
            1 << 9,
            handlers.iter().copied(),
            |_| cleared.set(cleared.get() + 1),
        );

        assert_eq!(handled, 2);
        assert_eq!(calls.get(), 2);
        assert_eq!(cleared.get(), 1);
    }

    #[test]
    fn bound_handler_runs_until_unbound() {
        let pins = MockPins::new();
        let calls = core::cell::Cell::new(0);
        let mut irqs = MockInterrupts::new();
        let inputs = acquire_inputs(&pins, &BUTTONS).unwrap();

        let binding = bind_interrupt(
            &mut irqs,
            inputs.get(0).unwrap(),
            TriggerEdge::Rising,
            "test",
            |_| Count(&calls),
        )
        .unwrap();
        assert_eq!(binding.pin(), 4);
        assert_eq!(binding.line().raw_line(), 4);

        irqs.trigger(binding.line(), Edge::Rising);
        irqs.trigger(binding.line(), Edge::Falling);
        assert_eq!(calls.get(), 1);

        let line = binding.line();
        assert!(binding.unbind(&mut irqs).is_some());
        irqs.trigger(line, Edge::Rising);
        assert_eq!(calls.get(), 1);
        assert!(!irqs.is_armed(line));
    }

    #[test]
    fn pin_without_capability_is_refused() {
        let pins = MockPins::new();
        let calls = core::cell::Cell::new(0);
        let mut irqs = MockInterrupts::new();
        irqs.remove_capability(4);
        let inputs = acquire_inputs(&pins, &BUTTONS).unwrap();

        let err = bind_interrupt(&mut irqs, inputs.get(0).unwrap(), TriggerEdge::All, "test", |_| {
            Count(&calls)
        })
        .unwrap_err();

        assert_eq!(err, BindingError::NoInterruptCapability(4));
        assert!(pins.is_owned(4));
        assert_eq!(pins.level(4), Level::Low);
    }

    #[test]
    fn claimed_line_fails_registration() {
        let pins = MockPins::new();
        let calls = core::cell::Cell::new(0);
        let mut irqs = MockInterrupts::new();
        let inputs = acquire_inputs(&pins, &BUTTONS).unwrap();
        let input = inputs.get(0).unwrap();

        let _first = bind_interrupt(&mut irqs, input, TriggerEdge::All, "a", |_| Count(&calls)).unwrap();
        let err = bind_interrupt(&mut irqs, input, TriggerEdge::All, "b", |_| Count(&calls))
            .unwrap_err();

        assert_eq!(err, BindingError::RegistrationFailed(IrqLine::from_raw_line(4).unwrap()));
        assert_eq!(irqs.registered(), 1);
    }
}
