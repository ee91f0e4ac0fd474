// Stress demo: three pinned workers pulling from parallel, atomic, and
// ordered queues plus a channel-fed packet input, with a live progress bar
// and a final stats dump.

use crossbeam_channel::unbounded;
use indicatif::{ProgressBar, ProgressStyle};
use std::env;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use evsched::threading::{set_thread_core, set_thread_priority};
use evsched::{ChannelInput, Event, QueueParam, Scheduler, SyncMode, ThreadKind, Wait};

const WORKERS: usize = 3;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let events_per_source: usize = env::args()
        .nth(1)
        .and_then(|arg| arg.parse().ok())
        .unwrap_or(100_000);
    let total = events_per_source * 3;

    let sched = Scheduler::new();
    let rx_queue = sched
        .queue_create(
            "rx",
            QueueParam {
                prio: 0,
                ..QueueParam::default()
            },
        )
        .unwrap();
    let atomic_queue = sched
        .queue_create(
            "flows",
            QueueParam {
                prio: 2,
                sync: SyncMode::Atomic,
                ..QueueParam::default()
            },
        )
        .unwrap();
    let ordered_queue = sched
        .queue_create(
            "tx-order",
            QueueParam {
                prio: 1,
                sync: SyncMode::Ordered,
                lock_count: 1,
                ..QueueParam::default()
            },
        )
        .unwrap();

    // Packet input: a feeder thread stages packets into a channel and the
    // workers drain it through the polled interface.
    let (feed_tx, feed_rx) = unbounded();
    sched
        .pktio_start(
            Box::new(ChannelInput::new(&sched, feed_rx, rx_queue.clone(), 32)),
            0,
        )
        .unwrap();
    let feeder = thread::spawn(move || {
        for i in 0..events_per_source {
            let _ = feed_tx.send(Event::new(&(i as u32).to_le_bytes()));
        }
        // Dropping the sender stops the interface once drained.
    });

    let processed = Arc::new(AtomicUsize::new(0));
    let done = Arc::new(AtomicBool::new(false));
    let mut workers = Vec::new();
    for core in 0..WORKERS {
        let mut ctx = sched.thread_local(ThreadKind::Worker).unwrap();
        let processed = processed.clone();
        let done = done.clone();
        workers.push(thread::spawn(move || {
            set_thread_priority(1);
            set_thread_core(core);
            while !done.load(Ordering::Relaxed) {
                if let Some((src, ev)) = ctx.schedule(Wait::Timeout(Duration::from_millis(1))) {
                    if src.sync_mode() == SyncMode::Ordered {
                        ctx.order_lock(0);
                        std::hint::black_box(ev.payload());
                        ctx.order_unlock(0);
                    } else {
                        std::hint::black_box(ev.payload());
                    }
                    processed.fetch_add(1, Ordering::Relaxed);
                }
            }
            while ctx.schedule(Wait::NoWait).is_some() {
                processed.fetch_add(1, Ordering::Relaxed);
            }
            ctx.finish().ok().expect("worker context should be drained");
        }));
    }

    // Direct producers for the atomic and ordered queues.
    for i in 0..events_per_source {
        let payload = (i as u32).to_le_bytes();
        sched.enqueue(&atomic_queue, Event::new(&payload)).unwrap();
        sched.enqueue(&ordered_queue, Event::new(&payload)).unwrap();
    }

    let bar = ProgressBar::new(total as u64);
    bar.set_style(
        ProgressStyle::with_template("{bar:40} {pos}/{len} events ({per_sec})").unwrap(),
    );
    let start = Instant::now();
    loop {
        let count = processed.load(Ordering::Relaxed);
        bar.set_position(count as u64);
        if count >= total {
            break;
        }
        thread::sleep(Duration::from_millis(20));
    }
    bar.finish();
    done.store(true, Ordering::Relaxed);

    feeder.join().unwrap();
    for worker in workers {
        worker.join().unwrap();
    }

    let elapsed = start.elapsed();
    let stats = sched.stats();
    println!(
        "processed {} events in {:.2?} ({:.0} events/s)",
        stats.total_dispatched(),
        elapsed,
        stats.total_dispatched() as f64 / elapsed.as_secs_f64(),
    );
    println!(
        "per-priority dispatch counts: {:?}, empty rounds: {}, pktin polls: {}",
        stats.dispatched, stats.empty_rounds, stats.pktin_polls
    );
    sched.shutdown();
}
