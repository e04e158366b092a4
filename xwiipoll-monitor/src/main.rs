use anyhow::{Context, bail};
use clap::Parser;
use serde_json::json;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use xwiipoll::transport::DEFAULT_LIBRARY;
use xwiipoll::{
    Key, KeyEvent, PollOutcome, SessionHandle, SessionManager, Transport, VirtualTransport,
    XwiimoteTransport,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// 1-based index of the device to open
    #[arg(short, long, default_value = "1")]
    device: usize,

    /// Replay a JSON Lines script instead of talking to real hardware
    #[arg(short, long)]
    replay: Option<PathBuf>,

    /// Shared library implementing the xwiimote API
    #[arg(long, env = "XWIIPOLL_LIBRARY", default_value = DEFAULT_LIBRARY)]
    library: PathBuf,

    /// Pause between drain rounds
    #[arg(long, default_value = "10")]
    interval_ms: u64,

    /// Stop after this many rounds (0 runs until the device goes away)
    #[arg(short, long, default_value = "0")]
    count: u64,

    /// Print events as JSON lines
    #[arg(long)]
    json: bool,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match &args.replay {
        Some(script) => {
            tracing::info!("Replaying {}", script.display());
            let transport = VirtualTransport::load_script(script)
                .with_context(|| format!("cannot load replay script {}", script.display()))?;
            run(transport, &args)
        }
        None => {
            tracing::info!("Loading {}", args.library.display());
            let transport = XwiimoteTransport::load_from(&args.library)
                .with_context(|| format!("cannot load {}", args.library.display()))?;
            run(transport, &args)
        }
    }
}

fn run<T: Transport>(transport: T, args: &Args) -> anyhow::Result<()> {
    let mut manager = SessionManager::new(transport);

    let devices = manager.list();
    for (idx, id) in devices.iter().enumerate() {
        if args.json {
            println!("{}", json!({ "device": idx + 1, "path": id.as_str() }));
        } else {
            println!("#{} {}", idx + 1, id);
        }
    }
    if devices.is_empty() {
        bail!("no devices found");
    }

    let handle = manager
        .open(args.device)
        .with_context(|| format!("cannot open device #{}", args.device))?;
    tracing::info!(
        "Monitoring #{} with {:?}",
        handle,
        manager.capabilities(handle)
    );

    let interval = Duration::from_millis(args.interval_ms);
    let mut round = 0u64;
    loop {
        round += 1;
        let gone = drain_round(&mut manager, handle, args.json);
        if gone {
            tracing::info!("Device #{} went away", handle);
            break;
        }
        if args.count != 0 && round >= args.count {
            break;
        }
        thread::sleep(interval);
    }

    Ok(())
}

/// Poll until the queue is empty, printing keys as they arrive and the
/// motion snapshot at the end. Returns true when the device is gone.
fn drain_round<T: Transport>(
    manager: &mut SessionManager<T>,
    handle: SessionHandle,
    as_json: bool,
) -> bool {
    loop {
        match manager.poll(handle) {
            PollOutcome::Key(key) => print_key(&key, as_json),
            PollOutcome::Gone => return true,
            PollOutcome::NoEvent => break,
        }
    }
    print_motion(manager, handle, as_json);
    false
}

fn print_key(key: &KeyEvent, as_json: bool) {
    if as_json {
        match serde_json::to_string(key) {
            Ok(line) => println!("{}", line),
            Err(e) => tracing::warn!("Cannot encode key event: {}", e),
        }
        return;
    }

    let name = key.key().map(Key::name).unwrap_or("unknown");
    println!("{:?} {} ({}) {:?}", key.source, name, key.code, key.state);
}

fn print_motion<T: Transport>(manager: &SessionManager<T>, handle: SessionHandle, as_json: bool) {
    let snapshot = json!({
        "accel": manager.accel(handle),
        "ir": manager.ir(handle),
        "motion_plus": manager.motion_plus(handle),
        "nunchuk_accel": manager.nunchuk_accel(handle),
        "nunchuk_stick": manager.nunchuk_stick(handle),
        "sticks": manager.pro_sticks(handle),
        "board": manager.balance_board(handle),
    });

    if as_json {
        println!("{}", json!({ "motion": snapshot }));
    } else {
        tracing::debug!("Motion of #{}: {}", handle, snapshot);
    }
}
