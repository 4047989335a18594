//! End-to-end runs with real worker, timer, socket and monitor threads.

use dmxp_actor::Core::coroutine::{CoEnv, CoWaker};
use dmxp_actor::MPMC::Structs::message::{PTYPE_RESPONSE, PTYPE_SYSTEM, PTYPE_TEXT};
use dmxp_actor::Runtime::{Config, Runtime};
use dmxp_actor::{Address, Context, DispatchMode, Flow, Message, Module, Service};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Run `rt` on a background thread. Returns false (after aborting it)
/// if it did not stop on its own within `limit`.
fn run_until_idle(rt: &Runtime, limit: Duration) -> bool {
    let handle = {
        let rt = rt.clone();
        thread::spawn(move || rt.start())
    };
    let deadline = Instant::now() + limit;
    while !handle.is_finished() {
        if Instant::now() > deadline {
            rt.abort();
            let _ = handle.join();
            return false;
        }
        thread::sleep(Duration::from_millis(5));
    }
    handle.join().unwrap().unwrap();
    true
}

fn config(threads: usize) -> Config {
    Config::new()
        .with_threads(threads)
        .with_timer_tick(Duration::from_millis(1))
}

#[test]
fn echo_round_trip() {
    let rt = Runtime::new(config(4)).unwrap();
    let replies: Arc<Mutex<Vec<Message>>> = Arc::new(Mutex::new(Vec::new()));

    rt.register_module(Module::from_init("echo", |ctx, _| {
        ctx.set_handler(
            |ctx: &Arc<Context>, _env: &CoEnv, msg: Message| {
                ctx.send(msg.source, msg.session, msg.ptype, msg.data).unwrap();
                Flow::Exit
            },
            DispatchMode::Coroutine,
        );
        ctx.register_name("echo")
    }))
    .unwrap();

    let sink = replies.clone();
    rt.register_module(Module::from_init("client", move |ctx, _| {
        let sink = sink.clone();
        ctx.set_handler(
            move |_ctx: &Arc<Context>, _env: &CoEnv, msg: Message| {
                sink.lock().push(msg);
                Flow::Exit
            },
            DispatchMode::Coroutine,
        );
        ctx.send_name("echo", 7, PTYPE_TEXT, Some(b"hi".to_vec()))
    }))
    .unwrap();

    let echo = rt.launch("echo", "").unwrap();
    rt.launch("client", "").unwrap();
    assert_eq!(rt.total(), 2);

    assert!(run_until_idle(&rt, Duration::from_secs(10)));
    assert_eq!(rt.total(), 0);
    let replies = replies.lock();
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].source, echo);
    assert_eq!(replies[0].session, 7);
    assert_eq!(replies[0].ptype, PTYPE_TEXT);
    assert_eq!(replies[0].payload(), b"hi");
}

#[test]
fn per_producer_order_is_kept() {
    const PRODUCERS: u32 = 2;
    const PER_PRODUCER: u32 = 500;

    let rt = Runtime::new(config(4)).unwrap();
    let received: Arc<Mutex<Vec<(u32, u32)>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();
    rt.register_module(Module::from_init("sink", move |ctx, _| {
        let sink = sink.clone();
        ctx.set_handler(
            move |_ctx: &Arc<Context>, _env: &CoEnv, msg: Message| {
                let bytes = msg.payload();
                let producer = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
                let seq = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
                let mut seen = sink.lock();
                seen.push((producer, seq));
                if seen.len() == (PRODUCERS * PER_PRODUCER) as usize {
                    Flow::Exit
                } else {
                    Flow::Continue
                }
            },
            DispatchMode::Coroutine,
        );
        Ok(())
    }))
    .unwrap();
    let sink_addr = rt.launch("sink", "").unwrap();

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|p| {
            let rt = rt.clone();
            thread::spawn(move || {
                for seq in 0..PER_PRODUCER {
                    let mut payload = p.to_le_bytes().to_vec();
                    payload.extend_from_slice(&seq.to_le_bytes());
                    rt.send(Address(p + 1), sink_addr, 0, PTYPE_TEXT, Some(payload))
                        .unwrap();
                    if fastrand::u8(..) < 8 {
                        thread::yield_now();
                    }
                }
            })
        })
        .collect();

    let runner = {
        let rt = rt.clone();
        thread::spawn(move || run_until_idle(&rt, Duration::from_secs(20)))
    };
    for p in producers {
        p.join().unwrap();
    }
    assert!(runner.join().unwrap());

    let received = received.lock();
    assert_eq!(received.len(), (PRODUCERS * PER_PRODUCER) as usize);
    for p in 0..PRODUCERS {
        let seqs: Vec<u32> = received.iter().filter(|(q, _)| *q == p).map(|(_, s)| *s).collect();
        let expected: Vec<u32> = (0..PER_PRODUCER).collect();
        assert_eq!(seqs, expected, "producer {p} out of order");
    }
}

#[test]
fn single_worker_bootstrap_exits_at_once() {
    let rt = Runtime::new(config(1).with_bootstrap("once", "")).unwrap();
    rt.register_module(Module::from_init("once", |ctx, _| {
        ctx.set_handler(
            |_ctx: &Arc<Context>, _env: &CoEnv, _msg: Message| Flow::Exit,
            DispatchMode::Direct,
        );
        ctx.send(ctx.address(), 0, PTYPE_TEXT, None)
    }))
    .unwrap();

    let started = Instant::now();
    assert!(run_until_idle(&rt, Duration::from_secs(5)));
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(rt.total(), 0);
    // The logger is retired during cleanup.
    assert_eq!(rt.find_by_name("logger"), None);
    assert!(matches!(rt.start(), Err(dmxp_actor::Error::AlreadyStarted)));
}

#[test]
fn bootstrap_failure_is_reported() {
    let rt = Runtime::new(config(1).with_bootstrap("absent", "")).unwrap();
    assert!(rt.start().is_err());
    assert_eq!(rt.total(), 0);
}

#[test]
fn stuck_handler_is_flagged() {
    let rt = Runtime::new(config(2).with_monitor_interval(Duration::from_millis(100))).unwrap();
    let flagged = Arc::new(AtomicBool::new(false));
    let seen = flagged.clone();
    rt.register_module(Module::from_init("slow", move |ctx, _| {
        let seen = seen.clone();
        ctx.set_handler(
            move |ctx: &Arc<Context>, _env: &CoEnv, _msg: Message| {
                assert!(!ctx.is_endless());
                thread::sleep(Duration::from_millis(600));
                seen.store(ctx.is_endless(), Ordering::SeqCst);
                Flow::Exit
            },
            DispatchMode::Direct,
        );
        ctx.send(ctx.address(), 0, PTYPE_TEXT, None)
    }))
    .unwrap();
    rt.launch("slow", "").unwrap();

    assert!(run_until_idle(&rt, Duration::from_secs(10)));
    assert!(flagged.load(Ordering::SeqCst));
}

struct Counted {
    released: Arc<AtomicUsize>,
}

impl Service for Counted {
    fn init(&self, ctx: &Arc<Context>, params: &str) -> dmxp_actor::Result<()> {
        let exit = params == "exit";
        ctx.set_handler(
            move |_ctx: &Arc<Context>, _env: &CoEnv, _msg: Message| {
                if exit {
                    Flow::Exit
                } else {
                    Flow::Continue
                }
            },
            DispatchMode::Coroutine,
        );
        ctx.send(ctx.address(), 0, PTYPE_TEXT, None)
    }

    fn release(&self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

fn counted_module(released: &Arc<AtomicUsize>) -> Module {
    let released = released.clone();
    Module::new("counted", move || {
        Box::new(Counted {
            released: released.clone(),
        }) as Box<dyn Service>
    })
}

#[test]
fn every_service_is_released_once() {
    let rt = Runtime::new(config(3)).unwrap();
    let released = Arc::new(AtomicUsize::new(0));
    rt.register_module(counted_module(&released)).unwrap();
    for _ in 0..8 {
        rt.launch("counted", "exit").unwrap();
    }
    assert!(run_until_idle(&rt, Duration::from_secs(10)));
    assert_eq!(released.load(Ordering::SeqCst), 8);
}

#[test]
fn abort_ends_a_busy_runtime() {
    let rt = Runtime::new(config(2)).unwrap();
    let released = Arc::new(AtomicUsize::new(0));
    rt.register_module(counted_module(&released)).unwrap();
    for _ in 0..4 {
        rt.launch("counted", "stay").unwrap();
    }

    let runner = {
        let rt = rt.clone();
        thread::spawn(move || rt.start())
    };
    while rt.find_by_name("logger").is_none() {
        thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(rt.total(), 4);
    assert_eq!(rt.abort(), 5); // four services and the logger
    runner.join().unwrap().unwrap();
    assert_eq!(released.load(Ordering::SeqCst), 4);
    assert_eq!(rt.total(), 0);
}

type Pending = Arc<Mutex<HashMap<i32, CoWaker>>>;
type Replies = Arc<Mutex<HashMap<i32, Vec<u8>>>>;

#[test]
fn request_parks_until_response() {
    let rt = Runtime::new(config(2)).unwrap();
    let outcome: Arc<Mutex<Option<(bool, usize, Vec<u8>)>>> = Arc::new(Mutex::new(None));

    rt.register_module(Module::from_init("responder", |ctx, _| {
        ctx.set_handler(
            |ctx: &Arc<Context>, _env: &CoEnv, msg: Message| {
                assert_eq!(msg.payload(), b"ping");
                ctx.reply(&msg, Some(b"pong".to_vec())).unwrap();
                Flow::Exit
            },
            DispatchMode::Coroutine,
        );
        ctx.register_name("responder")
    }))
    .unwrap();

    let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
    let replies: Replies = Arc::new(Mutex::new(HashMap::new()));
    let result = outcome.clone();
    rt.register_module(Module::from_init("requester", move |ctx, _| {
        let (pending, replies, result) = (pending.clone(), replies.clone(), result.clone());
        ctx.set_handler(
            move |ctx: &Arc<Context>, env: &CoEnv, msg: Message| {
                if msg.ptype == PTYPE_RESPONSE {
                    replies.lock().insert(msg.session, msg.data.unwrap_or_default());
                    if let Some(waker) = pending.lock().remove(&msg.session) {
                        waker.wake();
                    }
                    return Flow::Continue;
                }

                let session = ctx.new_session();
                let id = env.current();
                pending.lock().insert(session, env.waker().unwrap());
                ctx.send_name("responder", session, PTYPE_TEXT, Some(b"ping".to_vec()))
                    .unwrap();
                assert!(env.yield_now());

                let reply = replies.lock().remove(&session).unwrap_or_default();
                *result.lock() = Some((env.current() == id, env.live(), reply));
                Flow::Exit
            },
            DispatchMode::Coroutine,
        );
        ctx.send(ctx.address(), 0, PTYPE_TEXT, Some(b"go".to_vec()))
    }))
    .unwrap();

    rt.launch("responder", "").unwrap();
    rt.launch("requester", "").unwrap();
    assert!(run_until_idle(&rt, Duration::from_secs(10)));

    let (same_coroutine, live, reply) = outcome.lock().take().unwrap();
    assert!(same_coroutine);
    assert_eq!(live, 1);
    assert_eq!(reply, b"pong");
}

#[test]
fn daemon_pidfile_lives_while_running() {
    let pidfile = std::env::temp_dir().join(format!("dmxp-runtime-{}.pid", std::process::id()));
    let _ = std::fs::remove_file(&pidfile);

    let rt = Runtime::new(config(1).with_daemon(&pidfile).with_bootstrap("pidcheck", "")).unwrap();
    let present = Arc::new(AtomicBool::new(false));
    let (flag, path) = (present.clone(), pidfile.clone());
    rt.register_module(Module::from_init("pidcheck", move |ctx, _| {
        let pid = std::fs::read_to_string(&path).unwrap_or_default();
        flag.store(pid.trim() == std::process::id().to_string(), Ordering::SeqCst);
        ctx.set_handler(
            |_ctx: &Arc<Context>, _env: &CoEnv, _msg: Message| Flow::Exit,
            DispatchMode::Direct,
        );
        ctx.send(ctx.address(), 0, PTYPE_TEXT, None)
    }))
    .unwrap();

    assert!(run_until_idle(&rt, Duration::from_secs(5)));
    assert!(present.load(Ordering::SeqCst));
    assert!(!pidfile.exists());
}

#[test]
fn profile_counts_messages_and_time() {
    let rt = Runtime::new(config(1).with_profile(true)).unwrap();
    let stats = Arc::new(Mutex::new(None));
    let out = stats.clone();
    rt.register_module(Module::from_init("busy", move |ctx, _| {
        let out = out.clone();
        ctx.set_handler(
            move |ctx: &Arc<Context>, _env: &CoEnv, msg: Message| {
                thread::sleep(Duration::from_millis(5));
                if msg.session == 3 {
                    // The current message is counted before the handler runs.
                    *out.lock() = Some((ctx.message_count(), ctx.cpu_cost()));
                    Flow::Exit
                } else {
                    Flow::Continue
                }
            },
            DispatchMode::Direct,
        );
        for session in 1..=3 {
            ctx.send(ctx.address(), session, PTYPE_TEXT, None)?;
        }
        Ok(())
    }))
    .unwrap();
    rt.launch("busy", "").unwrap();
    assert!(run_until_idle(&rt, Duration::from_secs(5)));

    let (count, cost) = stats.lock().take().unwrap();
    assert_eq!(count, 3);
    assert!(cost >= Duration::from_millis(10));
}

/// Poll `ready` until it holds or `limit` passes.
fn wait_for(limit: Duration, ready: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + limit;
    while !ready() {
        if Instant::now() > deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(2));
    }
    true
}

/// Parks its handler forever on the first message.
struct Stuck {
    parked: Arc<AtomicBool>,
    released: Arc<AtomicUsize>,
}

impl Service for Stuck {
    fn init(&self, ctx: &Arc<Context>, _params: &str) -> dmxp_actor::Result<()> {
        let parked = self.parked.clone();
        ctx.set_handler(
            move |_ctx: &Arc<Context>, env: &CoEnv, _msg: Message| {
                parked.store(true, Ordering::SeqCst);
                // The waker is dropped, so nothing ever resumes this.
                env.yield_now();
                Flow::Continue
            },
            DispatchMode::Coroutine,
        );
        ctx.send(ctx.address(), 0, PTYPE_TEXT, None)
    }

    fn release(&self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

fn stuck_runtime() -> (Runtime, Address, Arc<AtomicBool>, Arc<AtomicUsize>) {
    let rt = Runtime::new(config(1)).unwrap();
    let parked = Arc::new(AtomicBool::new(false));
    let released = Arc::new(AtomicUsize::new(0));
    let (flag, counter) = (parked.clone(), released.clone());
    rt.register_module(Module::new("stuck", move || {
        Box::new(Stuck {
            parked: flag.clone(),
            released: counter.clone(),
        }) as Box<dyn Service>
    }))
    .unwrap();
    let a = rt.launch("stuck", "").unwrap();
    (rt, a, parked, released)
}

#[test]
fn killing_a_parked_service_lets_the_runtime_stop() {
    let (rt, a, parked, released) = stuck_runtime();
    let runner = {
        let rt = rt.clone();
        thread::spawn(move || run_until_idle(&rt, Duration::from_secs(10)))
    };
    assert!(wait_for(Duration::from_secs(5), || parked.load(Ordering::SeqCst)));
    rt.kill(a).unwrap();
    assert_eq!(rt.total(), 0);
    assert!(runner.join().unwrap());
    assert_eq!(released.load(Ordering::SeqCst), 1);
}

#[test]
fn abort_with_a_parked_service_stops() {
    let (rt, _a, parked, released) = stuck_runtime();
    let runner = {
        let rt = rt.clone();
        thread::spawn(move || rt.start())
    };
    assert!(wait_for(Duration::from_secs(5), || parked.load(Ordering::SeqCst)));
    assert_eq!(rt.abort(), 2); // the stuck service and the logger
    runner.join().unwrap().unwrap();
    assert_eq!(rt.total(), 0);
    assert_eq!(released.load(Ordering::SeqCst), 1);
}

#[test]
fn idle_worker_wakes_within_a_tick() {
    let tick = Duration::from_millis(10);
    let rt = Runtime::new(config(2).with_timer_tick(tick)).unwrap();
    let handled: Arc<Mutex<Option<Instant>>> = Arc::new(Mutex::new(None));
    let stamp = handled.clone();
    rt.register_module(Module::from_init("waiter", move |ctx, _| {
        let stamp = stamp.clone();
        ctx.set_handler(
            move |_ctx: &Arc<Context>, _env: &CoEnv, _msg: Message| {
                *stamp.lock() = Some(Instant::now());
                Flow::Exit
            },
            DispatchMode::Direct,
        );
        Ok(())
    }))
    .unwrap();
    let a = rt.launch("waiter", "").unwrap();

    let runner = {
        let rt = rt.clone();
        thread::spawn(move || run_until_idle(&rt, Duration::from_secs(10)))
    };
    assert!(wait_for(Duration::from_secs(5), || rt.idle_workers() == 2));

    let sent = Instant::now();
    rt.send(Address::NONE, a, 0, PTYPE_TEXT, Some(b"wake".to_vec())).unwrap();
    assert!(runner.join().unwrap());

    let handled = handled.lock().take().unwrap();
    let gap = handled.duration_since(sent);
    assert!(gap < tick + Duration::from_millis(100), "woken after {gap:?}");
}

#[test]
fn log_and_hup_reach_the_configured_logservice() {
    let rt = Runtime::new(config(1).with_logservice(Some("mylog".into()))).unwrap();
    let records: Arc<Mutex<Vec<(u8, Vec<u8>)>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = records.clone();
    rt.register_module(Module::from_init("mylog", move |ctx, _| {
        let sink = sink.clone();
        ctx.set_handler(
            move |_ctx: &Arc<Context>, _env: &CoEnv, msg: Message| {
                sink.lock().push((msg.ptype, msg.data.unwrap_or_default()));
                Flow::Continue
            },
            DispatchMode::Direct,
        );
        Ok(())
    }))
    .unwrap();
    rt.register_module(Module::from_init("keeper", |ctx, _| {
        ctx.set_handler(
            |_ctx: &Arc<Context>, _env: &CoEnv, _msg: Message| Flow::Continue,
            DispatchMode::Direct,
        );
        Ok(())
    }))
    .unwrap();
    let keeper = rt.launch("keeper", "").unwrap();
    assert_eq!(rt.logger_address(), None);

    let runner = {
        let rt = rt.clone();
        thread::spawn(move || run_until_idle(&rt, Duration::from_secs(10)))
    };
    assert!(wait_for(Duration::from_secs(5), || rt.logger_address().is_some()));
    // Not bound under the default logger name.
    assert_eq!(rt.find_by_name("logger"), None);

    rt.log(keeper, "hello");
    rt.signal_hup();
    assert!(wait_for(Duration::from_secs(5), || records.lock().len() == 2));

    rt.kill(keeper).unwrap();
    assert!(runner.join().unwrap());
    let records = records.lock();
    assert!(records.contains(&(PTYPE_TEXT, b"hello".to_vec())));
    assert!(records.contains(&(PTYPE_SYSTEM, Vec::new())));
}
