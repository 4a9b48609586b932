//! Toggles PB8 on every edge of PA4.
//!
//! Wire a button between PA4 and 3V3 (with an external pull-down) and an LED
//! to PB8.
#![no_main]
#![no_std]

extern crate panic_halt;

use core::cell::RefCell;

use cortex_m::asm;
use cortex_m::interrupt::Mutex;
use cortex_m_rt::entry;
use edge_toggle::{
    exti::Vector,
    handler::EdgeHandler,
    manager::{Config, Toggler},
    pac::interrupt,
    stm32l0::{ExtiController, Stm32Pins},
};

type Controller = ExtiController<EdgeHandler<&'static Stm32Pins>>;

static PINS: Stm32Pins = Stm32Pins::new();
static CONTROLLER: Mutex<RefCell<Option<Controller>>> = Mutex::new(RefCell::new(None));

#[entry]
fn main() -> ! {
    // Start with the controller already in place, so an edge that arrives
    // while we are still setting up finds its handler.
    let started = cortex_m::interrupt::free(|cs| {
        let mut controller = CONTROLLER.borrow(cs).borrow_mut();
        let controller = controller.insert(ExtiController::new());

        Toggler::start(&Config::default(), &PINS, controller)
    });

    // Never shut down.
    let _toggler = match started {
        Ok(toggler) => toggler,
        Err(_) => {
            // Nothing is acquired and no interrupt is armed. Stop for the
            // debugger.
            asm::bkpt();
            loop {
                asm::wfi();
            }
        }
    };

    loop {
        asm::wfi();
    }
}

#[interrupt]
fn EXTI4_15() {
    cortex_m::interrupt::free(|cs| {
        if let Some(controller) = CONTROLLER.borrow(cs).borrow().as_ref() {
            controller.dispatch(Vector::Exti4_15);
        }
    });
}
