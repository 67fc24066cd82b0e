//! hotkeyd - Event-driven keyboard shortcut daemon
//!
//! Single-threaded, blocking main loop: wait for the next key event,
//! run the full match/execute sequence, wait again. SIGHUP and
//! SIGTERM/SIGINT are delivered as atomic flags observed between loop
//! iterations. The handlers also write into a self-pipe the device
//! polls on, so a signal ends the blocking wait immediately instead of
//! lingering until the next keystroke; no work happens in handler
//! context.

#[cfg(target_os = "linux")]
fn main() -> anyhow::Result<()> {
    use std::os::fd::AsRawFd;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use anyhow::Context;
    use clap::Parser;
    use log::{debug, error, info};
    use signal_hook::consts::{SIGHUP, SIGINT, SIGTERM};

    use hotkeyd::device::{Device, DeviceError, EvdevDevice};
    use hotkeyd::engine::{Engine, EngineOptions};
    use hotkeyd::exec::ShellExecutor;
    use hotkeyd::rules::RuleSet;
    use hotkeyd::Settings;

    let settings = Settings::parse();

    env_logger::Builder::new()
        .filter_level(settings.level_filter())
        .format_timestamp(None)
        .format_target(false)
        .init();

    let mut device = match &settings.device {
        Some(path) => EvdevDevice::open(path.clone()),
        None => EvdevDevice::auto_detect(),
    }
    .context("cannot open keyboard device")?;
    let max_key = device.max_key();

    let rules = RuleSet::load(&settings.config, max_key)
        .with_context(|| format!("cannot read configuration {}", settings.config.display()))?;
    debug!(
        "using configuration {} ({} rules)",
        settings.config.display(),
        rules.len()
    );

    let reconfigure = Arc::new(AtomicBool::new(false));
    let terminate = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(SIGHUP, Arc::clone(&reconfigure))?;
    signal_hook::flag::register(SIGTERM, Arc::clone(&terminate))?;
    signal_hook::flag::register(SIGINT, Arc::clone(&terminate))?;

    // The flags say which signal arrived; the pipe ends the blocking
    // device wait so they are seen without waiting for a keystroke
    let (wake_read, wake_write) = nix::unistd::pipe().context("cannot create wake pipe")?;
    nix::fcntl::fcntl(
        wake_write.as_raw_fd(),
        nix::fcntl::FcntlArg::F_SETFL(nix::fcntl::OFlag::O_NONBLOCK),
    )
    .context("cannot configure wake pipe")?;
    for signal in [SIGHUP, SIGTERM, SIGINT] {
        signal_hook::low_level::pipe::register_raw(signal, wake_write.as_raw_fd())?;
    }
    device.set_wake(wake_read);

    let options = EngineOptions {
        show_keys: settings.effective_showkey(),
    };
    let mut engine = Engine::new(device, ShellExecutor::new(settings.noexec), rules, options);

    info!("hotkeyd listening on {}", engine.device().path().display());

    loop {
        if terminate.load(Ordering::Relaxed) {
            info!("termination requested");
            break;
        }
        if reconfigure.swap(false, Ordering::Relaxed) {
            info!("reconfiguration requested");
            match RuleSet::load(&settings.config, max_key) {
                Ok(rules) => {
                    engine.reconfigure(rules);
                    debug!("reconfiguration complete");
                }
                // Never degrade to an empty rule set behind the
                // operator's back: the previous rules stay in force
                Err(e) => error!(
                    "keeping previous rules, cannot reload {}: {}",
                    settings.config.display(),
                    e
                ),
            }
        }

        match engine.next_event() {
            Ok(ev) => engine.handle_event(ev),
            Err(DeviceError::Interrupted) => continue,
            Err(e) => {
                error!("device read failed: {}", e);
                break;
            }
        }
    }

    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn main() {
    eprintln!("hotkeyd only supports Linux evdev devices");
    std::process::exit(1);
}
