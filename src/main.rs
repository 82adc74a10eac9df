#![cfg_attr(target_os = "none", no_std)]
#![cfg_attr(target_os = "none", no_main)]

#[cfg(target_os = "none")]
extern crate rlibc;

#[cfg(target_os = "none")]
mod boot {
    use bootloader_api::{entry_point, BootInfo};
    use core::panic::PanicInfo;

    use nexus_kernel::drivers::{pit, ps2_keyboard};
    use nexus_kernel::{arch, executor, init_kernel, kernel, logger, memory, serial, serial_println, KernelConfig};

    entry_point!(kernel_main);

    pub fn kernel_main(boot_info: &'static mut BootInfo) -> ! {
        let config = KernelConfig::default();

        serial::init();
        logger::init(config.log_level);
        serial_println!("nexus-kernel booting");

        if let Err(e) = init_kernel(&config, &boot_info.memory_regions) {
            serial_println!("Kernel initialization failed: {}", e);
            kernel::status::log_summary();
            halt_loop();
        }

        log::info!(
            "memory: total {} KiB, free {} KiB, used {} KiB",
            memory::total() / 1024,
            memory::free() / 1024,
            memory::used() / 1024
        );

        for (name, entry) in [("heartbeat", heartbeat as extern "C" fn()), ("echo", echo)] {
            if let Err(e) = executor::create(name, entry) {
                log::error!("could not start '{}': {}", name, e);
            }
        }
        executor::dump_tasks();

        // idle: the bootstrap task runs whenever nothing else is ready
        loop {
            executor::yield_now();
            executor::reap();
            arch::enable_and_halt();
        }
    }

    extern "C" fn heartbeat() {
        for beat in 1..=5 {
            pit::sleep(1000);
            log::info!("heartbeat {} (uptime {} ms)", beat, pit::uptime_ms());
        }
    }

    extern "C" fn echo() {
        loop {
            let ch = ps2_keyboard::read_char();
            serial::_print(format_args!("{}", ch));
        }
    }

    fn halt_loop() -> ! {
        loop {
            arch::halt();
        }
    }

    #[panic_handler]
    fn panic(info: &PanicInfo) -> ! {
        arch::without_interrupts(|| {
            serial_println!("PANIC : {} | {:?}", info.message(), info.location());
        });
        halt_loop()
    }
}

#[cfg(not(target_os = "none"))]
fn main() {
    eprintln!("nexus-kernel only runs on bare-metal x86_64 (target_os = \"none\")");
}
