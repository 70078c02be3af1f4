//! aie-events: event notification and interrupt driver for AI Engine arrays

use std::env;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use aie_events::config::{self, Config};
use aie_events::device::{default_arch, ArchConfig, CustomArch, Location, ModuleType, RegisterLayout, SimRegisters, TileMap};
use aie_events::events::irq_map;
use aie_events::events::{Callback, EventDriver, EventNotification, HandleStatus};

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args: Vec<String> = env::args().collect();

    let mut show_irq_map = false;
    let mut demo = false;
    let mut layout_path = None;

    let mut iter = args.iter().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--irq-map" => show_irq_map = true,
            "--demo" => demo = true,
            "--sample-config" => {
                print!("{}", Config::sample_config());
                return Ok(());
            }
            "--layout" => {
                let path = iter.next().ok_or_else(|| anyhow::anyhow!("--layout needs a file"))?;
                layout_path = Some(path.as_str());
            }
            "-h" | "--help" => {
                print_usage();
                return Ok(());
            }
            other => anyhow::bail!("unknown argument: {}", other),
        }
    }

    if !show_irq_map && !demo {
        print_usage();
        return Ok(());
    }

    let cfg = Config::get();
    let layout = match layout_path {
        Some(path) => config::load_layout_file(Path::new(path))?,
        None => cfg.load_layout()?,
    };

    if show_irq_map {
        print_irq_map(default_arch().as_ref());
    }
    if demo {
        run_demo(layout, cfg)?;
    }

    Ok(())
}

fn print_usage() {
    println!("Usage: aie-events [--irq-map] [--demo] [--layout <file>] [--sample-config]");
    println!();
    println!("  --irq-map         Print the 1st-level IRQ line and route of every column");
    println!("  --demo            Run a register/raise/dispatch cycle on simulated registers");
    println!("  --layout <file>   Use a TOML register layout table");
    println!("  --sample-config   Print a sample configuration file");
}

/// Print the IRQ routing of every column
fn print_irq_map(arch: &dyn ArchConfig) {
    println!("1st-level IRQ routing ({})", arch.name());
    println!("==========================");
    for route in irq_map::routing_table(arch) {
        match route.route {
            Some((noc, bit)) => println!(
                "  col {:2} switch {:?}: line {} -> NoC col {:2} L2 bit {}",
                route.col, route.switch, route.line, noc, bit
            ),
            None => println!("  col {:2} switch {:?}: line {} (unrouted)", route.col, route.switch, route.line),
        }
    }
}

/// Register a Core event, raise it in the simulated array and dispatch it
fn run_demo(layout: RegisterLayout, cfg: &Config) -> anyhow::Result<()> {
    let layout = Arc::new(layout);
    let arch: Arc<dyn ArchConfig> = Arc::new(CustomArch::new(4, 2, vec![2, 3]));
    let map = TileMap::new(Arc::clone(&arch), &layout.address);
    map.print_summary();

    let sim = Arc::new(SimRegisters::for_array(&map, &layout));
    sim.set_all_clocked(&map, &layout);

    let driver = EventDriver::new(arch, sim.clone(), Arc::clone(&layout), cfg.driver_config());
    driver.setup_default_error_handlers();
    driver.initialize_error_broadcast_network()?;
    driver.enable_interrupts();

    let hits = Arc::new(AtomicUsize::new(0));
    let sink = Arc::clone(&hits);
    let callback: Callback = Arc::new(move |n: &EventNotification| {
        println!("  {} event {} at {} (arg {})", n.module, n.event, n.location, n.arg);
        sink.fetch_add(1, Ordering::SeqCst);
        HandleStatus::Handled
    });

    let loc = Location::new(1, 2);
    let event = 70;
    driver.register_event_notification(loc, ModuleType::Core, event, callback, 0xC0FFEE)?;

    let regs = driver.module_regs(loc, ModuleType::Core)?;
    let channel = (1..16u8)
        .find(|&c| matches!(regs.event_broadcast(c), Ok(e) if e == event))
        .ok_or_else(|| anyhow::anyhow!("event {} has no broadcast channel at {}", event, loc))?;
    println!("Core event {} at {} routed on broadcast channel {}", event, loc, channel);

    let routed = driver.with_tiles(|map| sim.inject_event(map, &layout, loc, ModuleType::Core, event, channel));
    anyhow::ensure!(routed, "column {} has no interrupt route", loc.col);

    println!("Dispatching:");
    driver.dispatch_interrupt();
    driver.wait_for_pending_events_timeout(cfg.driver_config().poll_timeout_us)?;
    println!("{} callback(s) ran", hits.load(Ordering::SeqCst));

    Ok(())
}
