use anyhow::Result;
use clap::Parser;
use loopmq::bridge::SocketAdapter;
use loopmq::event_loop::EventLoop;
use loopmq::message::Message;
use loopmq::transport::{MemSocket, SocketKind, TransportSocket};
use loopmq::utils::LoggerConfig;
use std::cell::RefCell;
use std::rc::Rc;
use std::thread;
use std::time::Instant;
use tracing::{error, info};

/// Push/pull throughput of the in-process bridge: a raw sender thread blasts
/// messages while an event-loop adapter drains them on this thread.
#[derive(Parser, Debug)]
#[command(name = "inproc_thr")]
struct Args {
    /// Message size in bytes.
    size: usize,
    /// Number of messages to push through.
    count: usize,
    /// Queue capacity per direction.
    #[arg(long, default_value_t = 4096)]
    capacity: usize,
}

fn main() -> Result<()> {
    let _guard = LoggerConfig::from_env().init()?;
    let args = Args::parse();
    info!(size = args.size, count = args.count, "starting throughput run");

    let (push, pull) =
        MemSocket::pair_with_capacity(SocketKind::Push, SocketKind::Pull, args.capacity)?;

    let size = args.size;
    let count = args.count;
    let sender = thread::spawn(move || {
        let mut push = push;
        let payload = Message::with_size(size);
        let mut sent = 0usize;
        while sent < count {
            match push.send(&payload) {
                Ok(()) => sent += 1,
                Err(err) if err.is_would_block() => thread::yield_now(),
                Err(err) => {
                    error!(%err, "sender stopped early");
                    break;
                }
            }
        }
    });

    let mut el = EventLoop::new()?;
    let handle = el.handle();
    let adapter = SocketAdapter::create(pull, &handle)?;

    let seen = Rc::new(RefCell::new(0usize));
    let started = Rc::new(RefCell::new(None::<Instant>));
    {
        let seen = seen.clone();
        let started = started.clone();
        let quit = handle.clone();
        adapter.on_message(move |m| {
            let mut n = seen.borrow_mut();
            if *n == 0 {
                *started.borrow_mut() = Some(Instant::now());
            }
            if m.len() != size {
                error!(got = m.len(), want = size, "message of incorrect size");
                quit.quit();
                return;
            }
            *n += 1;
            if *n == count {
                quit.quit();
            }
        });
    }

    el.run()?;
    if sender.join().is_err() {
        error!("sender thread panicked");
    }

    let received = *seen.borrow();
    let elapsed = started
        .borrow()
        .map(|t| t.elapsed())
        .unwrap_or_default();
    let secs = elapsed.as_secs_f64().max(1e-9);
    let throughput = received as f64 / secs;
    let megabits = throughput * args.size as f64 * 8.0 / 1_000_000.0;

    info!(received, elapsed_ms = elapsed.as_millis() as u64, "run finished");
    info!("mean throughput: {:.0} msg/s", throughput);
    info!("mean throughput: {:.3} Mb/s", megabits);
    Ok(())
}
