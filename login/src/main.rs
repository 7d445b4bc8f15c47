//! Login gateway process: accepts client connections on the reactor,
//! accepts control-channel connections from every configured channel, and
//! wires the two together through [`handler::Shared`].

mod account;
mod codec;
mod config;
mod control;
mod db;
mod handler;
mod reply;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{error, info};
use reactor::listener::{Listener, WorkerHandle};
use reactor::room::GlobalTopology;
use reactor::worker::{Worker, WorkerCommand};

use crate::config::Config;
use crate::control::ControlRegistry;
use crate::handler::{LoginHandler, Shared};

/// Protocol version advertised in every handshake this process sends.
const PROTOCOL_VERSION: u16 = 62;

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

extern "C" fn request_shutdown(_signum: libc::c_int) {
    SHUTDOWN.store(true, Ordering::SeqCst);
}

fn install_signal_handler() {
    unsafe {
        libc::signal(libc::SIGINT, request_shutdown as usize);
    }
}

fn main() {
    env_logger::init();

    let config_path = std::env::args().nth(1).unwrap_or_else(|| "login.json".to_string());
    let config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(err) => {
            error!("failed to load config from {}: {}", config_path, err);
            std::process::exit(1);
        }
    };

    if let Err(err) = run(config) {
        error!("login exited with error: {}", err);
        std::process::exit(1);
    }
}

fn run(config: Config) -> anyhow::Result<()> {
    install_signal_handler();

    let control_registry = ControlRegistry::from_config(&config);
    {
        let registry = control_registry.clone();
        let bind = config.control_bind;
        std::thread::spawn(move || {
            if let Err(err) = registry.run(bind) {
                error!("control channel listener stopped: {}", err);
            }
        });
    }

    let worker_count = config
        .worker_threads
        .unwrap_or_else(|| std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4));

    let shared = Arc::new(Shared {
        db: db::Database::new(),
        control: control_registry,
        pins: account::PinTable::new(),
        config: config.clone(),
    });
    let topology = Arc::new(GlobalTopology::new());

    let mut mailbox_txs = Vec::with_capacity(worker_count);
    let mut mailbox_rxs = Vec::with_capacity(worker_count);
    for _ in 0..worker_count {
        let (tx, rx) = crossbeam_channel::unbounded();
        mailbox_txs.push(tx);
        mailbox_rxs.push(rx);
    }

    let mut worker_handles = Vec::with_capacity(worker_count);
    let mut wakers = Vec::with_capacity(worker_count);
    let mut join_handles = Vec::with_capacity(worker_count);

    for (index, rx) in mailbox_rxs.into_iter().enumerate() {
        let session_count = Arc::new(AtomicUsize::new(0));
        let handler = LoginHandler::new(shared.clone());
        let mut worker = Worker::new(
            index,
            PROTOCOL_VERSION,
            rx,
            mailbox_txs.clone(),
            topology.clone(),
            session_count.clone(),
            handler,
        )?;
        let waker = worker.waker();
        worker_handles.push(WorkerHandle::new(mailbox_txs[index].clone(), waker.clone(), session_count));
        wakers.push(waker);
        join_handles.push(std::thread::spawn(move || {
            if let Err(err) = worker.run() {
                error!("worker {} exited with error: {}", index, err);
            }
        }));
    }

    let tcp_listener = mio::net::TcpListener::bind(config.client_bind)?;
    let mut listener = Listener::new(tcp_listener, worker_handles)?;
    info!("login listening on {}", config.client_bind);

    std::thread::spawn(move || {
        if let Err(err) = listener.run() {
            error!("listener exited with error: {}", err);
        }
    });

    while !SHUTDOWN.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(200));
    }

    info!("shutdown requested, stopping workers");
    for (tx, waker) in mailbox_txs.iter().zip(wakers.iter()) {
        let _ = tx.send(WorkerCommand::Shutdown);
        let _ = waker.wake();
    }
    for handle in join_handles {
        let _ = handle.join();
    }

    Ok(())
}
