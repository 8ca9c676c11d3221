use std::cell::{Cell, RefCell};
use std::rc::Rc;

use msgpipe_bindings::{
    DispatchError, MessageReceiverWithResponder, Responder, Router, RouterConfig,
};
use msgpipe_system::{create_message_pipe, RunLoop};
use msgpipe_wire::{Message, MessageHeader, ServiceMessage};
use serde::Serialize;
use tracing::{debug, info};

use crate::cmd::blob::{Blob, PROBE};
use crate::cmd::{parse_timeout, NegotiateArgs};
use crate::exit::{serialization_error, CliError, CliResult, FAILURE, SUCCESS, TIMEOUT};
use crate::output::{print_json, print_pretty, print_table, OutputFormat};

#[derive(Serialize)]
struct NegotiateReport {
    server_version: u32,
    reported_version: u32,
    required_version: u32,
    accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    server_error: Option<String>,
}

/// Counts `PROBE` messages; the probe service has no requests.
struct ProbeCounter {
    probes: Rc<Cell<usize>>,
}

impl MessageReceiverWithResponder for ProbeCounter {
    fn accept(&mut self, message: ServiceMessage) -> Result<bool, DispatchError> {
        let _: Blob = message.decode_as(PROBE)?;
        self.probes.set(self.probes.get() + 1);
        Ok(true)
    }

    fn accept_with_responder(
        &mut self,
        message: ServiceMessage,
        _responder: Responder,
    ) -> Result<bool, DispatchError> {
        Err(DispatchError::failed(format!(
            "unexpected request type {}",
            message.message_type()
        )))
    }
}

pub fn run(args: NegotiateArgs, mut config: RouterConfig, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_timeout(&args.timeout)?;
    if let Some(version) = args.server_version {
        config.interface_version = version;
    }

    let run_loop = RunLoop::new();
    let (near, far) = create_message_pipe();
    let client = Router::with_config(
        near,
        &run_loop,
        RouterConfig::default().with_connector(config.connector.clone()),
    );
    let server = Router::with_config(far, &run_loop, config.clone());

    let probes = Rc::new(Cell::new(0usize));
    server.set_incoming_message_receiver(ProbeCounter {
        probes: probes.clone(),
    });
    let server_error: Rc<RefCell<Option<String>>> = Rc::new(RefCell::new(None));
    let sink = server_error.clone();
    server.set_error_handler(move |err| *sink.borrow_mut() = Some(err.to_string()));
    client.set_error_handler(|err| debug!(error = %err, "client connection closed"));
    server.start();
    client.start();

    let reported = Rc::new(Cell::new(None));
    let slot = reported.clone();
    client.query_version(move |version| slot.set(Some(version)));
    if !run_loop.run_until(timeout, || reported.get().is_some()) {
        return Err(CliError::new(TIMEOUT, format!("no version reply after {timeout:?}")));
    }
    let reported_version = reported.get().unwrap_or_default();
    info!(reported_version, "server reported interface version");

    if let Some(version) = args.require {
        client.require_version(version);
    }
    let probe = Message::build(MessageHeader::one_way(PROBE), Blob::patterned(8))
        .map_err(|err| serialization_error("cannot encode probe", err))?;
    client.accept(probe);
    run_loop.run_until_idle();

    let report = NegotiateReport {
        server_version: config.interface_version,
        reported_version,
        required_version: client.required_version(),
        accepted: !server.is_closed() && probes.get() == 1,
        server_error: server_error.borrow_mut().take(),
    };
    print_report(&report, format);

    Ok(if report.accepted { SUCCESS } else { FAILURE })
}

fn print_report(report: &NegotiateReport, format: OutputFormat) {
    let mut rows = vec![
        ("server version", report.server_version.to_string()),
        ("reported version", report.reported_version.to_string()),
        ("required version", report.required_version.to_string()),
        ("accepted", report.accepted.to_string()),
    ];
    if let Some(err) = &report.server_error {
        rows.push(("server error", err.clone()));
    }
    match format {
        OutputFormat::Json => print_json(report),
        OutputFormat::Table => print_table(["FIELD", "VALUE"], &rows),
        OutputFormat::Pretty => print_pretty("Negotiate", &rows),
    }
}
