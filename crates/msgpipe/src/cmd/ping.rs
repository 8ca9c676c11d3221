use std::cell::RefCell;
use std::rc::Rc;
use std::sync::mpsc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use msgpipe_bindings::{
    ConnectionError, DispatchError, Executor, ExecutorRegistry, MessageReceiverWithResponder,
    Responder, Router, RouterConfig,
};
use msgpipe_system::{create_message_pipe, MessagePipeHandle, RunLoop, RunLoopHandle, SystemError};
use msgpipe_wire::{Message, MessageHeader, ServiceMessage};
use serde::Serialize;
use tracing::{debug, info};

use crate::cmd::blob::{Blob, ECHO};
use crate::cmd::{parse_timeout, PingArgs};
use crate::exit::{
    connection_error, io_error, serialization_error, system_error, CliError, CliResult,
    DATA_INVALID, FAILURE, INTERNAL, SUCCESS, TIMEOUT, USAGE,
};
use crate::output::{micros, print_json, print_pretty, print_table, OutputFormat};

#[derive(Serialize)]
struct PingReport {
    round_trips: usize,
    payload_size: usize,
    min_us: f64,
    avg_us: f64,
    p50_us: f64,
    max_us: f64,
}

/// Answers every `ECHO` request with its own payload.
struct EchoService {
    served: usize,
}

impl MessageReceiverWithResponder for EchoService {
    fn accept(&mut self, message: ServiceMessage) -> Result<bool, DispatchError> {
        debug!(message_type = message.message_type(), "ignoring one-way message");
        Ok(false)
    }

    fn accept_with_responder(
        &mut self,
        message: ServiceMessage,
        responder: Responder,
    ) -> Result<bool, DispatchError> {
        let blob: Blob = message.decode_as(ECHO)?;
        let response = Message::build(MessageHeader::response(ECHO, 0), blob)
            .map_err(|err| DispatchError::failed(err.to_string()))?;
        self.served += 1;
        Ok(responder.accept(response))
    }

    fn on_close(&mut self) {
        info!(served = self.served, "echo service closed");
    }
}

struct Server {
    thread: JoinHandle<()>,
    id: ThreadId,
    run_loop: RunLoopHandle,
}

pub fn run(args: PingArgs, config: RouterConfig, format: OutputFormat) -> CliResult<i32> {
    if args.count == 0 {
        return Err(CliError::new(USAGE, "count must be greater than zero"));
    }
    let timeout = parse_timeout(&args.timeout)?;

    let registry = ExecutorRegistry::new();
    let (near, far) = create_message_pipe();
    let server = spawn_server(far, config.clone(), registry.clone())?;

    let result = ping(near, config, &args, timeout);

    let stop = server.run_loop.clone();
    if !registry.execute_on(server.id, move || stop.quit()) {
        // The server already stopped on peer closure.
        server.run_loop.quit();
    }
    if server.thread.join().is_err() {
        return Err(CliError::new(INTERNAL, "server thread panicked"));
    }

    let samples = result?;
    let report = summarize(&samples, args.payload_size);
    print_report(&report, format);
    Ok(SUCCESS)
}

fn spawn_server(
    end: MessagePipeHandle,
    config: RouterConfig,
    registry: ExecutorRegistry,
) -> CliResult<Server> {
    let (ready_tx, ready_rx) = mpsc::channel::<Result<RunLoopHandle, SystemError>>();

    let thread = thread::Builder::new()
        .name("msgpipe-server".to_string())
        .spawn(move || {
            let run_loop = RunLoop::new();
            let executor = match Executor::new(&run_loop) {
                Ok(executor) => executor,
                Err(err) => {
                    let _ = ready_tx.send(Err(err));
                    return;
                }
            };
            registry.register_current(executor.handle());

            let router = Router::with_config(end, &run_loop, config);
            router.set_incoming_message_receiver(EchoService { served: 0 });
            let quit = run_loop.clone();
            router.set_error_handler(move |err| {
                debug!(error = %err, "server connection closed");
                quit.quit();
            });
            router.start();

            let _ = ready_tx.send(Ok(run_loop.handle()));
            run_loop.run();

            registry.unregister(thread::current().id());
            router.close();
        })
        .map_err(|err| io_error("cannot spawn server thread", err))?;

    let id = thread.thread().id();
    match ready_rx.recv_timeout(Duration::from_secs(5)) {
        Ok(Ok(run_loop)) => Ok(Server {
            thread,
            id,
            run_loop,
        }),
        Ok(Err(err)) => Err(system_error("server setup failed", err)),
        Err(_) => Err(CliError::new(INTERNAL, "server thread did not start")),
    }
}

fn ping(
    end: MessagePipeHandle,
    config: RouterConfig,
    args: &PingArgs,
    timeout: Duration,
) -> CliResult<Vec<Duration>> {
    let run_loop = RunLoop::new();
    let client = Router::with_config(end, &run_loop, config);
    let failure: Rc<RefCell<Option<ConnectionError>>> = Rc::new(RefCell::new(None));
    let sink = failure.clone();
    client.set_error_handler(move |err| *sink.borrow_mut() = Some(err));
    client.start();

    let mut samples = Vec::with_capacity(args.count);
    for round in 0..args.count {
        let blob = Blob::patterned(args.payload_size);
        let message = Message::build(MessageHeader::request(ECHO), blob.clone())
            .map_err(|err| serialization_error("cannot encode ping", err))?;

        let reply: Rc<RefCell<Option<Blob>>> = Rc::new(RefCell::new(None));
        let slot = reply.clone();
        let started = Instant::now();
        let sent = client.accept_with_responder(
            message,
            move |response: ServiceMessage| -> Result<(), DispatchError> {
                *slot.borrow_mut() = Some(response.decode_as(ECHO)?);
                Ok(())
            },
        );
        if !sent {
            return Err(closed(&failure));
        }

        let answered = run_loop.run_until(timeout, || {
            reply.borrow().is_some() || client.is_closed()
        });
        let elapsed = started.elapsed();

        let Some(echoed) = reply.borrow_mut().take() else {
            if !answered {
                return Err(CliError::new(
                    TIMEOUT,
                    format!("no response to round trip {round} after {timeout:?}"),
                ));
            }
            return Err(closed(&failure));
        };
        if echoed != blob {
            return Err(CliError::new(
                DATA_INVALID,
                format!("round trip {round} returned a different payload"),
            ));
        }
        debug!(round, elapsed_us = micros(elapsed), "round trip");
        samples.push(elapsed);
    }

    client.close();
    Ok(samples)
}

fn closed(failure: &Rc<RefCell<Option<ConnectionError>>>) -> CliError {
    match failure.borrow_mut().take() {
        Some(err) => connection_error("ping failed", err),
        None => CliError::new(FAILURE, "ping failed: connection closed"),
    }
}

fn summarize(samples: &[Duration], payload_size: usize) -> PingReport {
    let mut sorted = samples.to_vec();
    sorted.sort_unstable();
    let total: Duration = sorted.iter().sum();

    PingReport {
        round_trips: sorted.len(),
        payload_size,
        min_us: sorted.first().copied().map(micros).unwrap_or(0.0),
        avg_us: micros(mean(total, sorted.len())),
        p50_us: sorted.get(sorted.len() / 2).copied().map(micros).unwrap_or(0.0),
        max_us: sorted.last().copied().map(micros).unwrap_or(0.0),
    }
}

/// `total / count` without narrowing `count`; zero for no samples.
fn mean(total: Duration, count: usize) -> Duration {
    if count == 0 {
        return Duration::ZERO;
    }
    total.div_f64(count as f64)
}

fn print_report(report: &PingReport, format: OutputFormat) {
    let rows = [
        ("round trips", report.round_trips.to_string()),
        ("payload", format!("{} bytes", report.payload_size)),
        ("min", format!("{:.2}us", report.min_us)),
        ("avg", format!("{:.2}us", report.avg_us)),
        ("p50", format!("{:.2}us", report.p50_us)),
        ("max", format!("{:.2}us", report.max_us)),
    ];
    match format {
        OutputFormat::Json => print_json(report),
        OutputFormat::Table => print_table(["METRIC", "VALUE"], &rows),
        OutputFormat::Pretty => print_pretty("Ping", &rows),
    }
}
