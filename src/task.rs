//! Implements task handling support, including dual core support.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use cortex_m::peripheral::SCB;
#[allow(unused_imports)]
use defmt::{debug, error, info, trace, warn};
use embassy_executor::{Executor, Spawner};
use embassy_rp::multicore::{Stack, spawn_core1 as rp_spawn_core1};
use embassy_rp::peripherals::CORE1;
use static_cell::{ConstStaticCell, StaticCell};

use crate::constants::CORE1_STACK_SIZE;
use crate::protocol::protocol_handler_task;

// Threading and tasks model
//
// On the Pico we have 2 cores available - 0 and 1.
//
// Core 0 is the main core, and is where the main() function runs.  We use it
// for all of the non-GPIB tasks:
// - the embassy USB stack, and the CDC-ACM receive and transmit tasks
// - the status display task (which handles the status LED)
// - the flash task, which saves the configuration.
//
// Core 1 runs only the GPIB protocol handler.  Its bus handshakes are
// busy-waits, so giving it a core to itself keeps them from starving USB.
//
// Core 0 tasks are spawned using the Spawner passed into main().  Core 1
// tasks must be spawned via an Executor, which is stored in a non-public
// static, and hence can only be accessed via this module.

//
// Statics
//

// A stack for core 1.  We will take it and use it mutably in core1_spawn.
static CORE1_STACK: ConstStaticCell<Stack<CORE1_STACK_SIZE>> = ConstStaticCell::new(Stack::new());

// An executor for core 1.
static EXECUTOR1: StaticCell<Executor> = StaticCell::new();

/// Start core 1, and the protocol handler on it.
pub fn core1_spawn(p_core1: CORE1) {
    rp_spawn_core1(p_core1, CORE1_STACK.take(), move || {
        let executor1 = EXECUTOR1.init(Executor::new());
        executor1.run(|spawner| {
            spawn_or_reboot(spawner.spawn(core1_main()), "Core 1");
        })
    });
}

// Initial function for core 1.  This gets run using the executor on core 1,
// and spawns core 1's tasks.
#[embassy_executor::task]
async fn core1_main() {
    let core: u32 = embassy_rp::pac::SIO.cpuid().read();
    info!("Core{}: Core 1 main started", core);

    let spawner = Spawner::for_current_executor().await;
    spawn_or_reboot(spawner.spawn(protocol_handler_task()), "Protocol Handler");
}

/// Method to spawn tasks.  Can be called on either core.
///
/// Spawning can fail if too many instances of that task are already
/// running.  By default only 1 is allowed at once.  We handle that by
/// rebooting - but it shouldn't happen as tasks are only spawned at start of
/// day.
///
/// Example:
/// ```ignore
/// spawn_or_reboot(spawner.spawn(my_task()), "my_task");
/// ```
pub fn spawn_or_reboot<T, E: defmt::Format>(spawn_result: Result<T, E>, task_name: &str) {
    match spawn_result {
        Ok(_) => {
            let core: u32 = embassy_rp::pac::SIO.cpuid().read();
            debug!("Core{}: Spawned task {}", core, task_name);
        }
        Err(e) => {
            error!("Failed to spawn task: {}, error: {}", task_name, e);
            SCB::sys_reset();
        }
    }
}
