use anyhow::Result;
use clap::Parser;
use loopmq::bridge::SocketAdapter;
use loopmq::event_loop::EventLoop;
use loopmq::message::Message;
use loopmq::transport::{MemSocket, SocketKind};
use loopmq::utils::LoggerConfig;
use std::cell::RefCell;
use std::rc::Rc;
use std::thread;
use std::time::Instant;
use tracing::{error, info};

/// Roundtrip latency between two event loops on two threads, one adapter on
/// each end of an in-process pair.
#[derive(Parser, Debug)]
#[command(name = "inproc_lat")]
struct Args {
    /// Message size in bytes.
    size: usize,
    /// Number of roundtrips.
    roundtrips: usize,
}

fn main() -> Result<()> {
    let _guard = LoggerConfig::from_env().init()?;
    let args = Args::parse();
    info!(
        size = args.size,
        roundtrips = args.roundtrips,
        "starting latency run"
    );

    let (local, remote) = MemSocket::pair(SocketKind::Pair, SocketKind::Pair)?;
    let roundtrips = args.roundtrips;

    let echo = thread::spawn(move || -> Result<()> {
        let mut el = EventLoop::new()?;
        let handle = el.handle();
        let adapter = Rc::new(SocketAdapter::create(remote, &handle)?);
        let weak = Rc::downgrade(&adapter);
        let quit = handle.clone();
        let bounced = Rc::new(RefCell::new(0usize));
        adapter.on_message(move |m| {
            if let Some(ad) = weak.upgrade() {
                if let Err(err) = ad.send(&m) {
                    error!(%err, "echo send failed");
                    quit.quit();
                    return;
                }
            }
            let mut n = bounced.borrow_mut();
            *n += 1;
            if *n == roundtrips {
                quit.quit();
            }
        });
        el.run()
    });

    let mut el = EventLoop::new()?;
    let handle = el.handle();
    let adapter = Rc::new(SocketAdapter::create(local, &handle)?);
    let weak = Rc::downgrade(&adapter);
    let done = Rc::new(RefCell::new(0usize));
    {
        let done = done.clone();
        let quit = handle.clone();
        adapter.on_message(move |m| {
            let mut n = done.borrow_mut();
            *n += 1;
            if *n == roundtrips {
                quit.quit();
                return;
            }
            if let Some(ad) = weak.upgrade() {
                if let Err(err) = ad.send(&m) {
                    error!(%err, "ping send failed");
                    quit.quit();
                }
            }
        });
    }

    let start = Instant::now();
    adapter.send(&Message::with_size(args.size))?;
    el.run()?;
    let elapsed = start.elapsed();

    match echo.join() {
        Ok(result) => result?,
        Err(_) => error!("echo thread panicked"),
    }

    let completed = *done.borrow();
    let latency_us = elapsed.as_secs_f64() * 1_000_000.0 / (completed.max(1) as f64 * 2.0);
    info!(completed, elapsed_ms = elapsed.as_millis() as u64, "run finished");
    info!("mean latency: {:.3} us", latency_us);
    Ok(())
}
