use crate::bridge::dummy::DummyBridge;
use crate::bridge::Bridge;
use crate::config::{load_domain_config, try_read_daemon_config, DaemonConfig, DomainConfig};
use crate::core::Controller;
use crate::logging::{init_logging, reload_log_level, LoggingHandle, ReloadLogLevelError};
use log::{debug, error, info};
use std::panic;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;
use tokio::signal::unix::SignalKind;
use tokio::sync::mpsc::{Receiver, Sender};
use tokio::sync::Mutex;
use tracing::Subscriber;
use tracing_log::LogTracer;
use tracing_subscriber::EnvFilter;

mod alerts;
mod boiler;
mod bridge;
mod config;
mod core;
mod cycling;
mod error;
mod http;
mod load_calc;
mod load_sharing;
mod logging;
mod overrides;
mod persistence;
mod ramp;
mod room;
mod schedule;
mod sensors;
mod status;
mod telemetry;
mod time_util;
mod valve;

fn check_config() {
    let daemon = try_read_daemon_config();
    load_domain_config(&daemon).expect("Domain config (rooms.yaml/schedules.yaml/boiler.yaml) failed to load");
}

fn main() {
    LogTracer::init().expect("Should be able to make tokio subscribers listen to the log crate!");
    let logging_handle = init_logging().expect("Failed to initialize logger");

    info!("Starting heating_core");

    let args: Vec<String> = std::env::args().collect();
    if args.len() > 1 && args[1] == "check-config" {
        check_config();
        info!("Config OK!");
        return;
    }

    let daemon = try_read_daemon_config();
    let domain = load_domain_config(&daemon).expect("Failed to load domain config on startup");

    let default_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic| {
        error!("PANICKED: {:?}: boiler and valve state may now be unknown", panic);
        default_hook(panic);
    }));

    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(3)
        .enable_all()
        .build()
        .expect("Expected to be able to build runtime");

    main_loop(rt, daemon, domain, logging_handle);
}

fn main_loop(
    rt: Runtime,
    daemon: DaemonConfig,
    domain: DomainConfig,
    logging_handle: LoggingHandle<EnvFilter, impl Subscriber>,
) {
    let bridge: Arc<dyn Bridge> = Arc::new(DummyBridge::new());
    let controller = rt.block_on(async {
        let mut controller = Controller::new(bridge, daemon.clone(), domain);
        controller.bootstrap().await;
        controller
    });
    let controller = Arc::new(Mutex::new(controller));

    let http_addr = format!("{}:{}", daemon.http.bind_address, daemon.http.port);
    let router = http::router(controller.clone());
    let http_handle = rt.spawn(async move {
        match tokio::net::TcpListener::bind(&http_addr).await {
            Ok(listener) => {
                info!("HTTP surface listening on {http_addr}");
                if let Err(e) = axum::serve(listener, router).await {
                    error!("HTTP server exited: {e}");
                }
            }
            Err(e) => error!("Failed to bind HTTP surface on {http_addr}: {e}"),
        }
    });

    let (signal_send, mut signal_recv) = tokio::sync::mpsc::channel(5);

    #[cfg(target_family = "unix")]
    {
        debug!("Subscribing to signals.");
        subscribe_signal(&rt, SignalKind::interrupt(), signal_send.clone(), Signal::Stop);
        subscribe_signal(&rt, SignalKind::terminate(), signal_send.clone(), Signal::Stop);
        subscribe_signal(&rt, SignalKind::user_defined1(), signal_send.clone(), Signal::Reload);
    }
    #[cfg(not(target_family = "unix"))]
    {
        let signal_send = signal_send.clone();
        ctrlc::set_handler(move || {
            info!("Received termination signal.");
            signal_send.blocking_send(Signal::Stop).unwrap();
        })
        .expect("Failed to attach kill handler.");
    }

    info!("Beginning main loop.");
    let mut i = 0u64;
    loop {
        i += 1;
        if i % 60 == 0 {
            info!("Still alive...");
        }

        // spec §5: an unconditional recompute every 60s, on top of whatever
        // event-driven recomputes the HTTP surface and bridge trigger.
        let signal = rt.block_on(wait_for_signal_or_tick(&mut signal_recv));
        match signal {
            Some(Signal::Stop) => {
                info!("Stopping safely...");
                http_handle.abort();
                rt.shutdown_timeout(Duration::from_millis(500));
                info!("Stopped safely.");
                return;
            }
            Some(Signal::Reload) => {
                info!("Reloading");
                match reload_log_level(&logging_handle) {
                    Ok(new_filter) => info!("Applied new logging filter: {new_filter}"),
                    Err(ReloadLogLevelError::ReloadFailed(e)) => error!("Failed to apply new logging filter: {e}"),
                    Err(ReloadLogLevelError::InvalidFilter(e)) => {
                        error!("Failed to parse new filter: {e}, keeping the previous filter");
                    }
                }
                let controller = controller.clone();
                rt.block_on(async move {
                    let mut controller = controller.lock().await;
                    if let Err(e) = controller.reload_config() {
                        error!("Failed to reload domain config: {e}");
                    } else {
                        info!("Reloaded domain config");
                    }
                });
            }
            None => {
                let controller = controller.clone();
                rt.block_on(async move {
                    let now = chrono::Utc::now();
                    let mut controller = controller.lock().await;
                    controller.trigger_recompute("60s tick", now).await;
                });
            }
        }
    }
}

fn subscribe_signal(rt: &Runtime, kind: SignalKind, sender: Sender<Signal>, signal: Signal) {
    rt.spawn(async move {
        let mut recv = tokio::signal::unix::signal(kind).expect("Failed to get signal handler");
        while let Some(()) = recv.recv().await {
            sender.send(signal.clone()).await.unwrap();
        }
    });
}

#[derive(Debug, Clone)]
enum Signal {
    Stop,
    Reload,
}

/// Blocks for up to 60s waiting for a signal; `None` means the tick elapsed
/// with nothing pending, i.e. time for the unconditional recompute.
async fn wait_for_signal_or_tick(recv: &mut Receiver<Signal>) -> Option<Signal> {
    match tokio::time::timeout(Duration::from_secs(60), recv.recv()).await {
        Ok(None) => None,
        Ok(Some(signal)) => Some(signal),
        Err(_) => None,
    }
}
