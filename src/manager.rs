//! Pin resource manager
//!
//! Brings the pins and the interrupt binding up in the order outputs, inputs,
//! binding, and takes them down in exactly the reverse order.

use core::fmt;

use crate::exti::{self, BindingError, InterruptBinding, InterruptController, TriggerEdge};
use crate::gpio::{
    self, AcquisitionError, Level, PinAccess, PinConfig, PinGroup, OFF_LEVEL,
};
use crate::handler::EdgeHandler;

/// Output pins of the default configuration
pub const LEDS: [PinConfig; 1] = [PinConfig::output(24, Level::Low, "PIN 24")];

/// Input pins of the default configuration
pub const BUTTONS: [PinConfig; 1] = [PinConfig::input(4, "PPM 1")];

/// Static pin and interrupt configuration
#[derive(Debug, Copy, Clone)]
pub struct Config {
    pub outputs: &'static [PinConfig],
    pub inputs: &'static [PinConfig],
    /// Edges that toggle the output
    pub trigger: TriggerEdge,
    /// Index into `inputs` of the pin whose interrupt is bound
    pub irq_input: usize,
    /// Index into `outputs` of the pin the handler toggles
    pub irq_output: usize,
    /// Name the interrupt is registered under
    pub irq_name: &'static str,
}

impl Config {
    pub const fn new(outputs: &'static [PinConfig], inputs: &'static [PinConfig]) -> Self {
        Config {
            outputs,
            inputs,
            trigger: TriggerEdge::All,
            irq_input: 0,
            irq_output: 0,
            irq_name: "gpiomod#button1",
        }
    }

    pub const fn trigger(mut self, edge: TriggerEdge) -> Self {
        self.trigger = edge;
        self
    }

    pub const fn irq_input(mut self, index: usize) -> Self {
        self.irq_input = index;
        self
    }

    pub const fn irq_output(mut self, index: usize) -> Self {
        self.irq_output = index;
        self
    }

    pub const fn irq_name(mut self, name: &'static str) -> Self {
        self.irq_name = name;
        self
    }
}

impl Default for Config {
    /// One LED on line 24 starting low, one button on line 4, both edges.
    fn default() -> Config {
        Config::new(&LEDS, &BUTTONS)
    }
}

/// Startup failure
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    Acquisition(AcquisitionError),
    Binding(BindingError),
}

impl From<AcquisitionError> for Error {
    fn from(e: AcquisitionError) -> Self {
        Error::Acquisition(e)
    }
}

impl From<BindingError> for Error {
    fn from(e: BindingError) -> Self {
        Error::Binding(e)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Acquisition(e) => write!(f, "pin acquisition failed: {}", e),
            Error::Binding(e) => write!(f, "interrupt binding failed: {}", e),
        }
    }
}

/// Owned bundle of everything acquired for one toggler
///
/// Each stage is held until [`teardown`](Toggler::teardown) takes it, so the
/// bundle doubles as the undo record of a partial startup.
#[derive(Debug, Default)]
pub struct Toggler {
    outputs: Option<PinGroup>,
    inputs: Option<PinGroup>,
    binding: Option<InterruptBinding>,
}

impl Toggler {
    /// An empty bundle. Stages are added with the `acquire_*` and
    /// `bind_interrupt` methods.
    pub fn new() -> Self {
        Toggler::default()
    }

    /// Acquires the configured pins and binds the edge handler.
    ///
    /// On failure everything acquired so far is released again before the
    /// error is returned.
    pub fn start<P, C>(config: &Config, pins: P, irqs: &mut C) -> Result<Self, Error>
    where
        P: PinAccess + Copy,
        C: InterruptController<Handler = EdgeHandler<P>>,
    {
        info!("starting toggler");

        let mut toggler = Toggler::new();
        match toggler.bring_up(config, pins, irqs) {
            Ok(()) => Ok(toggler),
            Err(e) => {
                toggler.teardown(&pins, irqs);
                Err(e)
            }
        }
    }

    fn bring_up<P, C>(&mut self, config: &Config, pins: P, irqs: &mut C) -> Result<(), Error>
    where
        P: PinAccess + Copy,
        C: InterruptController<Handler = EdgeHandler<P>>,
    {
        self.acquire_outputs(&pins, config.outputs).map_err(|e| {
            error!("Unable to request GPIOs for outputs: {}", e);
            e
        })?;

        self.acquire_inputs(&pins, config.inputs).map_err(|e| {
            error!("Unable to request GPIOs for inputs: {}", e);
            e
        })?;

        if let Some(input) = self.inputs.as_ref().and_then(|g| g.get(config.irq_input)) {
            info!(
                "Current value of pin {}: {:?}",
                input.id(),
                pins.read(&input.handle)
            );
        }

        self.bind_interrupt(
            pins,
            irqs,
            config.irq_input,
            config.irq_output,
            config.trigger,
            config.irq_name,
        )
        .map_err(|e| {
            error!("Unable to request IRQ: {}", e);
            e
        })?;

        Ok(())
    }

    /// Acquires the output pins. See [`gpio::acquire_outputs`].
    pub fn acquire_outputs<P: PinAccess + ?Sized>(
        &mut self,
        pins: &P,
        configs: &[PinConfig],
    ) -> Result<(), AcquisitionError> {
        if self.outputs.is_some() {
            return Err(AcquisitionError::AlreadyAcquired);
        }

        self.outputs = Some(gpio::acquire_outputs(pins, configs)?);
        Ok(())
    }

    /// Acquires the input pins. Outputs have to be acquired first.
    pub fn acquire_inputs<P: PinAccess + ?Sized>(
        &mut self,
        pins: &P,
        configs: &[PinConfig],
    ) -> Result<(), AcquisitionError> {
        if self.outputs.is_none() {
            return Err(AcquisitionError::OutOfOrder);
        }
        if self.inputs.is_some() {
            return Err(AcquisitionError::AlreadyAcquired);
        }

        self.inputs = Some(gpio::acquire_inputs(pins, configs)?);
        Ok(())
    }

    /// Binds an [`EdgeHandler`] toggling output `output` to the interrupt of
    /// input `input`.
    ///
    /// A failure leaves both pin groups acquired.
    pub fn bind_interrupt<P, C>(
        &mut self,
        pins: P,
        irqs: &mut C,
        input: usize,
        output: usize,
        edge: TriggerEdge,
        name: &'static str,
    ) -> Result<(), BindingError>
    where
        P: PinAccess,
        C: InterruptController<Handler = EdgeHandler<P>>,
    {
        if self.binding.is_some() {
            return Err(BindingError::AlreadyBound);
        }

        let input = self
            .inputs
            .as_ref()
            .and_then(|g| g.get(input))
            .ok_or(BindingError::NotAcquired)?;
        let output = self
            .outputs
            .as_ref()
            .and_then(|g| g.get(output))
            .map(|pin| pin.handle)
            .ok_or(BindingError::NotAcquired)?;

        let binding = exti::bind_interrupt(irqs, input, edge, name, |irq| {
            EdgeHandler::new(irq, output, pins)
        })?;
        info!(
            "Successfully requested pin {} IRQ # {}",
            binding.pin(),
            binding.line().raw_line()
        );

        self.binding = Some(binding);
        Ok(())
    }

    /// Unbinds the interrupt, releases the inputs, drives the outputs to
    /// [`OFF_LEVEL`] and releases them.
    ///
    /// Only stages that were reached are undone. Calling it again does nothing.
    pub fn teardown<P, C>(&mut self, pins: &P, irqs: &mut C)
    where
        P: PinAccess + ?Sized,
        C: InterruptController,
    {
        if let Some(binding) = self.binding.take() {
            binding.unbind(irqs);
        }

        if let Some(inputs) = self.inputs.take() {
            inputs.release(pins);
        }

        if let Some(outputs) = self.outputs.take() {
            outputs.drive(pins, OFF_LEVEL);
            outputs.release(pins);
        }
    }

    /// Tears everything down and consumes the bundle.
    pub fn shutdown<P, C>(mut self, pins: &P, irqs: &mut C)
    where
        P: PinAccess + ?Sized,
        C: InterruptController,
    {
        info!("stopping toggler");
        self.teardown(pins, irqs);
    }

    pub fn outputs(&self) -> Option<&PinGroup> {
        self.outputs.as_ref()
    }

    pub fn inputs(&self) -> Option<&PinGroup> {
        self.inputs.as_ref()
    }

    pub fn binding(&self) -> Option<&InterruptBinding> {
        self.binding.as_ref()
    }

    pub fn is_bound(&self) -> bool {
        self.binding.is_some()
    }

    /// Nothing is acquired.
    pub fn is_idle(&self) -> bool {
        self.outputs.is_none() && self.inputs.is_none() && self.binding.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::RefCell;

    use crate::exti::{BindingHandle, Edge, IrqLine};
    use crate::gpio::{Direction, PinError, PinHandle, PinId};
    use crate::mock::{MockInterrupts, MockPins};

    type Irqs<'p> = MockInterrupts<EdgeHandler<&'p MockPins>>;

    fn line(id: PinId) -> IrqLine {
        IrqLine::from_raw_line(id % 16).unwrap()
    }

    /// Flips the button level and lets the controller see the edge.
    fn press(pins: &MockPins, irqs: &Irqs<'_>, id: PinId) {
        let level = !pins.level(id);
        pins.set_input(id, level);
        let edge = if level.is_high() { Edge::Rising } else { Edge::Falling };
        irqs.trigger(line(id), edge);
    }

    #[derive(Debug, PartialEq)]
    enum Event {
        Unbind(u8),
        Write(PinId, Level),
        Release(PinId),
    }

    /// Pin bank that journals writes and releases next to the unbinds seen
    /// by [`JournaledIrqs`].
    struct Journal<'a> {
        pins: &'a MockPins,
        events: RefCell<Vec<Event>>,
    }

    impl<'a> PinAccess for Journal<'a> {
        fn request(
            &self,
            id: PinId,
            direction: Direction,
            initial: Level,
        ) -> Result<PinHandle, PinError> {
            self.pins.request(id, direction, initial)
        }

        fn release(&self, pin: PinHandle) {
            self.events.borrow_mut().push(Event::Release(pin.id()));
            self.pins.release(pin);
        }

        fn read(&self, pin: &PinHandle) -> Level {
            self.pins.read(pin)
        }

        fn write(&self, pin: &PinHandle, level: Level) {
            self.events.borrow_mut().push(Event::Write(pin.id(), level));
            self.pins.write(pin, level);
        }
    }

    struct JournaledIrqs<'a> {
        inner: MockInterrupts<EdgeHandler<&'a Journal<'a>>>,
        journal: &'a Journal<'a>,
    }

    impl<'a> InterruptController for JournaledIrqs<'a> {
        type Handler = EdgeHandler<&'a Journal<'a>>;

        fn resolve_interrupt(&mut self, pin: &PinHandle) -> Result<IrqLine, BindingError> {
            self.inner.resolve_interrupt(pin)
        }

        fn register(
            &mut self,
            line: IrqLine,
            edge: TriggerEdge,
            name: &'static str,
            handler: Self::Handler,
        ) -> Result<BindingHandle, BindingError> {
            self.inner.register(line, edge, name, handler)
        }

        fn unregister(&mut self, binding: BindingHandle) -> Option<Self::Handler> {
            let line = binding.line().raw_line();
            self.journal.events.borrow_mut().push(Event::Unbind(line));
            self.inner.unregister(binding)
        }

        fn acknowledge(&self, line: IrqLine) {
            self.inner.acknowledge(line)
        }
    }

    #[test]
    fn teardown_undoes_startup_in_reverse() {
        let pins = MockPins::new();
        let journal = Journal {
            pins: &pins,
            events: RefCell::new(Vec::new()),
        };
        let mut irqs = JournaledIrqs {
            inner: MockInterrupts::new(),
            journal: &journal,
        };

        let toggler = Toggler::start(&Config::default(), &journal, &mut irqs).unwrap();
        assert!(journal.events.borrow().is_empty());

        toggler.shutdown(&journal, &mut irqs);

        assert_eq!(
            *journal.events.borrow(),
            [
                Event::Unbind(4),
                Event::Release(4),
                Event::Write(24, OFF_LEVEL),
                Event::Release(24),
            ]
        );
        assert_eq!(pins.violations(), 0);
    }

    #[test]
    fn default_configuration_scenario() {
        let pins = MockPins::new();
        let mut irqs: Irqs<'_> = MockInterrupts::new();
        let mut toggler = Toggler::start(&Config::default(), &pins, &mut irqs).unwrap();

        assert_eq!(pins.level(24), Level::Low);
        assert_eq!(irqs.name(line(4)), Some("gpiomod#button1"));

        press(&pins, &irqs, 4);
        assert_eq!(pins.level(24), Level::High);
        press(&pins, &irqs, 4);
        assert_eq!(pins.level(24), Level::Low);
        press(&pins, &irqs, 4);
        assert_eq!(pins.level(24), Level::High);

        toggler.teardown(&pins, &mut irqs);
        assert_eq!(pins.level(24), Level::Low);

        press(&pins, &irqs, 4);
        press(&pins, &irqs, 4);
        assert_eq!(pins.level(24), Level::Low);
        assert!(!pins.is_owned(24) && !pins.is_owned(4));
        assert_eq!(irqs.registered(), 0);
        assert_eq!(pins.violations(), 0);
    }

    #[test]
    fn output_is_initial_xor_edge_parity() {
        static HIGH_LED: [PinConfig; 1] = [PinConfig::output(24, Level::High, "PIN 24")];

        let pins = MockPins::new();
        let mut irqs: Irqs<'_> = MockInterrupts::new();
        let config = Config::new(&HIGH_LED, &BUTTONS);
        let toggler = Toggler::start(&config, &pins, &mut irqs).unwrap();

        for n in 1..=10u32 {
            press(&pins, &irqs, 4);
            assert_eq!(pins.level(24), Level::from(n % 2 == 0), "after {} edges", n);
        }
        assert_eq!(irqs.acks(), 10);

        toggler.shutdown(&pins, &mut irqs);
    }

    #[test]
    fn rising_only_ignores_releases() {
        let pins = MockPins::new();
        let mut irqs: Irqs<'_> = MockInterrupts::new();
        let config = Config::default().trigger(TriggerEdge::Rising);
        let toggler = Toggler::start(&config, &pins, &mut irqs).unwrap();

        press(&pins, &irqs, 4);
        press(&pins, &irqs, 4);
        assert_eq!(pins.level(24), Level::High);

        toggler.shutdown(&pins, &mut irqs);
    }

    #[test]
    fn shared_vector_identifiers_are_not_mine() {
        static LED_B: [PinConfig; 1] = [PinConfig::output(25, Level::Low, "PIN 25")];
        static BUTTON_B: [PinConfig; 1] = [PinConfig::input(5, "PPM 2")];

        let pins = MockPins::new();
        let mut irqs: Irqs<'_> = MockInterrupts::new();
        let a = Toggler::start(&Config::default(), &pins, &mut irqs).unwrap();
        let b = Toggler::start(
            &Config::new(&LED_B, &BUTTON_B).irq_name("gpiomod#button2"),
            &pins,
            &mut irqs,
        )
        .unwrap();

        press(&pins, &irqs, 5);

        assert_eq!(pins.level(25), Level::High);
        assert_eq!(pins.level(24), Level::Low);
        assert_eq!(irqs.acks(), 1);

        b.shutdown(&pins, &mut irqs);
        a.shutdown(&pins, &mut irqs);
    }

    #[test]
    fn teardown_after_outputs_only_is_idempotent() {
        let pins = MockPins::new();
        let mut irqs: Irqs<'_> = MockInterrupts::new();
        let mut toggler = Toggler::new();

        toggler.acquire_outputs(&pins, &LEDS).unwrap();
        toggler.teardown(&pins, &mut irqs);

        assert!(toggler.is_idle());
        assert!(!pins.is_owned(24));
        assert_eq!(&pins.released()[..], &[24]);

        toggler.teardown(&pins, &mut irqs);
        assert_eq!(&pins.released()[..], &[24]);
        assert_eq!(pins.violations(), 0);
    }

    #[test]
    fn input_failure_leaves_no_output_acquired() {
        let pins = MockPins::new();
        let mut irqs: Irqs<'_> = MockInterrupts::new();
        pins.claim_external(4);

        let err = Toggler::start(&Config::default(), &pins, &mut irqs).unwrap_err();

        assert_eq!(err, Error::Acquisition(AcquisitionError::Busy(4)));
        assert!(!pins.is_owned(24));
        assert_eq!(pins.level(24), Level::Low);
        assert_eq!(irqs.registered(), 0);
    }

    #[test]
    fn binding_failure_keeps_pins_for_the_caller() {
        let pins = MockPins::new();
        let mut irqs: Irqs<'_> = MockInterrupts::new();
        irqs.remove_capability(4);
        let mut toggler = Toggler::new();

        toggler.acquire_outputs(&pins, &LEDS).unwrap();
        toggler.acquire_inputs(&pins, &BUTTONS).unwrap();
        let err = toggler
            .bind_interrupt(&pins, &mut irqs, 0, 0, TriggerEdge::All, "btn")
            .unwrap_err();

        assert_eq!(err, BindingError::NoInterruptCapability(4));
        assert!(pins.is_owned(24) && pins.is_owned(4));
        assert!(pins.released().is_empty());

        toggler.teardown(&pins, &mut irqs);
        assert_eq!(&pins.released()[..], &[4, 24]);
    }

    #[test]
    fn startup_rolls_back_after_rejected_registration() {
        let pins = MockPins::new();
        let mut irqs: Irqs<'_> = MockInterrupts::new();
        irqs.reject(line(4));

        let err = Toggler::start(&Config::default(), &pins, &mut irqs).unwrap_err();

        assert_eq!(err, Error::Binding(BindingError::RegistrationFailed(line(4))));
        assert!(!pins.is_owned(24) && !pins.is_owned(4));
        assert_eq!(&pins.released()[..], &[4, 24]);
    }

    #[test]
    fn stages_must_come_in_order() {
        let pins = MockPins::new();
        let mut irqs: Irqs<'_> = MockInterrupts::new();
        let mut toggler = Toggler::new();

        assert_eq!(
            toggler.acquire_inputs(&pins, &BUTTONS),
            Err(AcquisitionError::OutOfOrder)
        );
        toggler.acquire_outputs(&pins, &LEDS).unwrap();
        assert_eq!(
            toggler.acquire_outputs(&pins, &LEDS),
            Err(AcquisitionError::AlreadyAcquired)
        );
        assert_eq!(
            toggler.bind_interrupt(&pins, &mut irqs, 0, 0, TriggerEdge::All, "btn"),
            Err(BindingError::NotAcquired)
        );

        toggler.acquire_inputs(&pins, &BUTTONS).unwrap();
        assert_eq!(
            toggler.bind_interrupt(&pins, &mut irqs, 1, 0, TriggerEdge::All, "btn"),
            Err(BindingError::NotAcquired)
        );
        toggler
            .bind_interrupt(&pins, &mut irqs, 0, 0, TriggerEdge::All, "btn")
            .unwrap();
        assert_eq!(
            toggler.bind_interrupt(&pins, &mut irqs, 0, 0, TriggerEdge::All, "btn"),
            Err(BindingError::AlreadyBound)
        );

        toggler.shutdown(&pins, &mut irqs);
        assert!(!pins.is_owned(24) && !pins.is_owned(4));
    }
}
