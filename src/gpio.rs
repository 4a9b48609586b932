//! General Purpose Input / Output
//!
//! Statically declared pins, the platform pin primitive and the all-or-nothing
//! acquisition of pin groups.

use core::fmt;
use core::ops::Not;

use heapless::Vec;

use crate::hal::digital::v2::{toggleable, InputPin, OutputPin, StatefulOutputPin};

/// Line number of a digital I/O pin
pub type PinId = u8;

/// Maximum number of pins in a single [`PinGroup`]
pub const MAX_PINS: usize = 8;

/// Level every output is driven to before it is released
pub const OFF_LEVEL: Level = Level::Low;

/// Pin direction
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Direction {
    Input,
    Output,
}

/// Logic level of a pin
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Level {
    Low,
    High,
}

impl Level {
    pub fn is_high(self) -> bool {
        self == Level::High
    }

    pub fn is_low(self) -> bool {
        self == Level::Low
    }
}

impl Not for Level {
    type Output = Level;

    fn not(self) -> Level {
        match self {
            Level::Low => Level::High,
            Level::High => Level::Low,
        }
    }
}

impl From<bool> for Level {
    fn from(high: bool) -> Level {
        if high {
            Level::High
        } else {
            Level::Low
        }
    }
}

/// Static declaration of a pin
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PinConfig {
    pub id: PinId,
    pub direction: Direction,
    /// Level an output is driven to when it is acquired. Ignored for inputs.
    pub initial: Level,
    pub label: &'static str,
}

impl PinConfig {
    pub const fn output(id: PinId, initial: Level, label: &'static str) -> Self {
        PinConfig {
            id,
            direction: Direction::Output,
            initial,
            label,
        }
    }

    pub const fn input(id: PinId, label: &'static str) -> Self {
        PinConfig {
            id,
            direction: Direction::Input,
            initial: Level::Low,
            label,
        }
    }
}

/// Token for a line that a [`PinAccess`] implementation handed out
///
/// Ownership of the line is tracked by the [`PinGroup`] holding the handle, not
/// by the handle itself.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PinHandle {
    id: PinId,
    direction: Direction,
}

impl PinHandle {
    /// Only meant to be called by [`PinAccess::request`] implementations.
    pub fn new(id: PinId, direction: Direction) -> Self {
        PinHandle { id, direction }
    }

    pub fn id(&self) -> PinId {
        self.id
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }
}

/// Errors a platform reports when a line is requested
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PinError {
    /// The line is owned by another consumer
    Busy,
    /// The line does not exist on this platform
    InvalidLine,
}

impl fmt::Display for PinError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PinError::Busy => f.write_str("line is owned by another consumer"),
            PinError::InvalidLine => f.write_str("no such line"),
        }
    }
}

/// Pin access primitive implemented by a platform
///
/// All methods take `&self`. `read` and `write` are called from interrupt
/// context and must not block.
pub trait PinAccess {
    /// Takes exclusive ownership of line `id`, configures its direction and,
    /// for outputs, drives it to `initial`.
    fn request(&self, id: PinId, direction: Direction, initial: Level)
        -> Result<PinHandle, PinError>;

    /// Gives the line back. The pin keeps its last level.
    fn release(&self, pin: PinHandle);

    /// Outputs report the driven level, inputs the sampled one.
    fn read(&self, pin: &PinHandle) -> Level;

    fn write(&self, pin: &PinHandle, level: Level);
}

impl<T: PinAccess + ?Sized> PinAccess for &T {
    fn request(
        &self,
        id: PinId,
        direction: Direction,
        initial: Level,
    ) -> Result<PinHandle, PinError> {
        (**self).request(id, direction, initial)
    }

    fn release(&self, pin: PinHandle) {
        (**self).release(pin)
    }

    fn read(&self, pin: &PinHandle) -> Level {
        (**self).read(pin)
    }

    fn write(&self, pin: &PinHandle, level: Level) {
        (**self).write(pin, level)
    }
}

/// Errors while acquiring a group of pins
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AcquisitionError {
    /// The line is owned by another consumer
    Busy(PinId),
    /// The line does not exist on this platform
    InvalidLine(PinId),
    /// The pin was declared with the other direction
    WrongDirection(PinId),
    /// More than [`MAX_PINS`] pins in one group
    TooManyPins,
    /// This group was already acquired
    AlreadyAcquired,
    /// Inputs were requested before outputs
    OutOfOrder,
}

impl AcquisitionError {
    fn from_pin(id: PinId, error: PinError) -> Self {
        match error {
            PinError::Busy => AcquisitionError::Busy(id),
            PinError::InvalidLine => AcquisitionError::InvalidLine(id),
        }
    }
}

impl fmt::Display for AcquisitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AcquisitionError::Busy(id) => write!(f, "pin {} is owned by another consumer", id),
            AcquisitionError::InvalidLine(id) => write!(f, "pin {} does not exist", id),
            AcquisitionError::WrongDirection(id) => {
                write!(f, "pin {} is declared with the wrong direction", id)
            }
            AcquisitionError::TooManyPins => write!(f, "more than {} pins in one group", MAX_PINS),
            AcquisitionError::AlreadyAcquired => f.write_str("pins already acquired"),
            AcquisitionError::OutOfOrder => f.write_str("inputs requested before outputs"),
        }
    }
}

/// A pin together with the handle the platform returned for it
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AcquiredPin {
    pub config: PinConfig,
    pub handle: PinHandle,
}

impl AcquiredPin {
    pub fn id(&self) -> PinId {
        self.config.id
    }

    /// Borrows the pin as an `embedded-hal` digital pin.
    pub fn line<'p, P: PinAccess + ?Sized>(&'p self, pins: &'p P) -> Line<'p, P> {
        Line {
            pins,
            handle: &self.handle,
        }
    }
}

/// Owned set of acquired pins of one direction
///
/// Releasing consumes the group, so a line cannot be given back twice.
#[derive(Debug, Default)]
pub struct PinGroup {
    pins: Vec<AcquiredPin, MAX_PINS>,
}

impl PinGroup {
    fn new() -> Self {
        PinGroup { pins: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.pins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pins.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&AcquiredPin> {
        self.pins.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &AcquiredPin> {
        self.pins.iter()
    }

    /// Drives every pin of the group to `level`.
    pub fn drive<P: PinAccess + ?Sized>(&self, pins: &P, level: Level) {
        for pin in self.pins.iter() {
            pins.write(&pin.handle, level);
        }
    }

    /// Releases all lines, most recently acquired first.
    pub fn release<P: PinAccess + ?Sized>(mut self, pins: &P) {
        release_all(&mut self.pins, pins);
    }
}

fn release_all<P: PinAccess + ?Sized>(group: &mut Vec<AcquiredPin, MAX_PINS>, pins: &P) {
    while let Some(pin) = group.pop() {
        debug!("releasing pin {}", pin.config.id);
        pins.release(pin.handle);
    }
}

/// Releases whatever it still holds when dropped.
struct Rollback<'p, P: PinAccess + ?Sized> {
    pins: &'p P,
    group: PinGroup,
}

impl<'p, P: PinAccess + ?Sized> Rollback<'p, P> {
    fn commit(mut self) -> PinGroup {
        core::mem::take(&mut self.group)
    }
}

impl<'p, P: PinAccess + ?Sized> Drop for Rollback<'p, P> {
    fn drop(&mut self) {
        for pin in self.group.iter() {
            if pin.handle.direction() == Direction::Output {
                self.pins.write(&pin.handle, OFF_LEVEL);
            }
        }
        release_all(&mut self.group.pins, self.pins);
    }
}

/// Requests every output pin in `configs`, driving each to its initial level.
///
/// Either all pins are acquired or none is: lines taken before a failure are
/// driven to [`OFF_LEVEL`] and released again before the error is returned.
/// Oversized tables and direction mismatches are refused before any line is
/// requested.
pub fn acquire_outputs<P: PinAccess + ?Sized>(
    pins: &P,
    configs: &[PinConfig],
) -> Result<PinGroup, AcquisitionError> {
    acquire(pins, configs, Direction::Output)
}

/// Requests every input pin in `configs`. Same contract as [`acquire_outputs`].
pub fn acquire_inputs<P: PinAccess + ?Sized>(
    pins: &P,
    configs: &[PinConfig],
) -> Result<PinGroup, AcquisitionError> {
    acquire(pins, configs, Direction::Input)
}

fn acquire<P: PinAccess + ?Sized>(
    pins: &P,
    configs: &[PinConfig],
    direction: Direction,
) -> Result<PinGroup, AcquisitionError> {
    if configs.len() > MAX_PINS {
        return Err(AcquisitionError::TooManyPins);
    }
    if let Some(config) = configs.iter().find(|c| c.direction != direction) {
        return Err(AcquisitionError::WrongDirection(config.id));
    }

    let mut guard = Rollback {
        pins,
        group: PinGroup::new(),
    };

    for config in configs {

        let handle = pins
            .request(config.id, direction, config.initial)
            .map_err(|e| AcquisitionError::from_pin(config.id, e))?;
        debug!("acquired pin {} ({})", config.id, config.label);

        if let Err(pin) = guard.group.pins.push(AcquiredPin {
            config: *config,
            handle,
        }) {
            pins.release(pin.handle);
            return Err(AcquisitionError::TooManyPins);
        }
    }

    Ok(guard.commit())
}

/// An acquired pin viewed through the `embedded-hal` digital traits
pub struct Line<'p, P: PinAccess + ?Sized> {
    pins: &'p P,
    handle: &'p PinHandle,
}

impl<'p, P: PinAccess + ?Sized> InputPin for Line<'p, P> {
    type Error = void::Void;

    fn is_high(&self) -> Result<bool, Self::Error> {
        Ok(self.pins.read(self.handle).is_high())
    }

    fn is_low(&self) -> Result<bool, Self::Error> {
        Ok(self.pins.read(self.handle).is_low())
    }
}

impl<'p, P: PinAccess + ?Sized> OutputPin for Line<'p, P> {
    type Error = void::Void;

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.pins.write(self.handle, Level::High);
        Ok(())
    }

    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.pins.write(self.handle, Level::Low);
        Ok(())
    }
}

impl<'p, P: PinAccess + ?Sized> StatefulOutputPin for Line<'p, P> {
    fn is_set_high(&self) -> Result<bool, Self::Error> {
        Ok(self.pins.read(self.handle).is_high())
    }

    fn is_set_low(&self) -> Result<bool, Self::Error> {
        Ok(self.pins.read(self.handle).is_low())
    }
}

impl<'p, P: PinAccess + ?Sized> toggleable::Default for Line<'p, P> {}
