// In demos/echo.rs
//! Ping-pong between a pinger and an echo service.
//!
//! Usage: echo <rounds> [threads]
use dmxp_actor::Core::coroutine::CoEnv;
use dmxp_actor::Core::signal;
use dmxp_actor::MPMC::Structs::message::PTYPE_TEXT;
use dmxp_actor::Runtime::{Config, Runtime};
use dmxp_actor::{Context, DispatchMode, Flow, Message, Module};
use std::env;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn main() -> dmxp_actor::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_thread_names(true)
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: {} <rounds> [threads]", args[0]);
        std::process::exit(1);
    }
    let rounds: usize = args[1].parse().expect("Invalid number of rounds");
    let threads: usize = args.get(2).map(|s| s.parse().expect("Invalid thread count")).unwrap_or(4);

    let config = Config::new()
        .with_threads(threads)
        .with_bootstrap("pinger", rounds.to_string())
        .with_hup(true);
    let rt = Runtime::new(config)?;

    rt.register_module(Module::from_init("echo", |ctx, _| {
        ctx.set_handler(
            |ctx: &Arc<Context>, _env: &CoEnv, msg: Message| {
                if msg.payload() == b"stop" {
                    return Flow::Exit;
                }
                if let Err(err) = ctx.reply(&msg, msg.data.clone()) {
                    ctx.log(format!("reply failed: {err}"));
                }
                Flow::Continue
            },
            DispatchMode::Direct,
        );
        ctx.register_name("echo")
    }))?;

    rt.register_module(Module::from_init("pinger", |ctx, params| {
        let rounds: usize = params.parse().unwrap_or(1);
        let done = Arc::new(AtomicUsize::new(0));
        let started = std::time::Instant::now();
        if let Some(rt) = ctx.runtime() {
            rt.launch("echo", "")?;
        }

        ctx.set_handler(
            move |ctx: &Arc<Context>, _env: &CoEnv, msg: Message| {
                let n = done.fetch_add(1, Ordering::Relaxed) + 1;
                if n < rounds {
                    let _ = ctx.send_name("echo", ctx.new_session(), PTYPE_TEXT, msg.data);
                    return Flow::Continue;
                }
                ctx.log(format!(
                    "{} round trips in {:.2?} ({} messages handled)",
                    n,
                    started.elapsed(),
                    ctx.message_count()
                ));
                let _ = ctx.send_name("echo", 0, PTYPE_TEXT, Some(b"stop".to_vec()));
                Flow::Exit
            },
            DispatchMode::Coroutine,
        );
        ctx.send_name("echo", ctx.new_session(), PTYPE_TEXT, Some(b"ping".to_vec()))
    }))?;

    // Ctrl+C retires every service, which ends `start`.
    signal::install_interrupt_handler(rt.clone())?;
    rt.start()
}
