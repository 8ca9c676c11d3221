use std::cell::{Cell, RefCell};
use std::rc::Rc;

use msgpipe_bindings::{
    ConnectionError, Connector, ConnectorConfig, DispatchError, FaultDisposition, MessageReceiver,
    ProtocolError,
};
use msgpipe_system::{create_message_pipe, MessagePipeHandle, RunLoop};
use msgpipe_wire::{Message, ValidationError};

/// Counts messages and close notifications.
#[derive(Clone, Default)]
struct Counter {
    messages: Rc<RefCell<Vec<Vec<u8>>>>,
    closed: Rc<Cell<usize>>,
}

impl MessageReceiver for Counter {
    fn accept(&mut self, message: Message) -> Result<bool, DispatchError> {
        self.messages.borrow_mut().push(message.data().to_vec());
        Ok(true)
    }

    fn on_close(&mut self) {
        self.closed.set(self.closed.get() + 1);
    }
}

fn started(run_loop: &RunLoop) -> (MessagePipeHandle, Connector, Counter) {
    let (peer, end) = create_message_pipe();
    let connector = Connector::new(end, run_loop);
    let counter = Counter::default();
    connector.set_incoming_message_receiver(counter.clone());
    connector.start();
    (peer, connector, counter)
}

fn errors(connector: &Connector) -> Rc<RefCell<Vec<ConnectionError>>> {
    let errors = Rc::new(RefCell::new(Vec::new()));
    let sink = errors.clone();
    connector.set_error_handler(move |err| sink.borrow_mut().push(err));
    errors
}

#[test]
fn drains_everything_queued() {
    let run_loop = RunLoop::new();
    let (peer, end) = create_message_pipe();
    for i in 0..5u8 {
        peer.write_message(&[i], Vec::new()).unwrap();
    }

    let connector = Connector::new(end, &run_loop);
    let counter = Counter::default();
    connector.set_incoming_message_receiver(counter.clone());
    connector.start();
    run_loop.run_until_idle();

    let expected: Vec<Vec<u8>> = (0..5u8).map(|i| vec![i]).collect();
    assert_eq!(*counter.messages.borrow(), expected);
}

#[test]
fn writes_reach_the_peer() {
    let run_loop = RunLoop::new();
    let (peer, connector, _counter) = started(&run_loop);

    assert!(connector.accept(Message::new(b"out"[..].into(), Vec::new())));
    assert_eq!(peer.read_message().unwrap().bytes.as_ref(), b"out");
}

#[test]
fn peer_closure_reports_once() {
    let run_loop = RunLoop::new();
    let (peer, connector, counter) = started(&run_loop);
    let errors = errors(&connector);

    drop(peer);
    run_loop.run_until_idle();
    connector.raise_error(ConnectionError::PeerClosed);

    assert!(connector.is_closed());
    assert!(connector.encountered_error());
    assert_eq!(errors.borrow().len(), 1);
    assert!(matches!(errors.borrow()[0], ConnectionError::PeerClosed));
    assert_eq!(counter.closed.get(), 1);
}

#[test]
fn queued_messages_arrive_before_peer_closure() {
    let run_loop = RunLoop::new();
    let (peer, connector, counter) = started(&run_loop);
    let errors = errors(&connector);

    peer.write_message(b"last words", Vec::new()).unwrap();
    drop(peer);
    run_loop.run_until_idle();

    assert_eq!(counter.messages.borrow().len(), 1);
    assert!(connector.is_closed());
    assert_eq!(errors.borrow().len(), 1);
}

#[test]
fn error_handler_panic_is_contained() {
    let run_loop = RunLoop::new();
    let (peer, connector, _counter) = started(&run_loop);
    connector.set_error_handler(|_| panic!("handler failure"));

    drop(peer);
    run_loop.run_until_idle();
    assert!(connector.is_closed());
}

#[test]
fn receiver_fault_closes_by_default() {
    let run_loop = RunLoop::new();
    let (peer, end) = create_message_pipe();
    let connector = Connector::new(end, &run_loop);
    let errors = errors(&connector);
    connector.set_incoming_message_receiver(|_: Message| -> Result<bool, DispatchError> {
        Err(DispatchError::failed("cannot handle"))
    });
    connector.start();

    peer.write_message(b"x", Vec::new()).unwrap();
    run_loop.run_until_idle();

    assert!(connector.is_closed());
    assert!(matches!(
        errors.borrow()[0],
        ConnectionError::Receiver(DispatchError::Failed(_))
    ));
}

#[test]
fn fault_handler_can_keep_the_connection() {
    let run_loop = RunLoop::new();
    let (peer, end) = create_message_pipe();
    let connector = Connector::new(end, &run_loop);
    let delivered = Rc::new(Cell::new(0));
    let faults = Rc::new(Cell::new(0));

    let seen = delivered.clone();
    connector.set_incoming_message_receiver(move |message: Message| -> Result<bool, DispatchError> {
        seen.set(seen.get() + 1);
        if message.data() == b"bad" {
            return Err(DispatchError::failed("bad input"));
        }
        Ok(true)
    });
    let counted = faults.clone();
    connector.set_fault_handler(move |_| {
        counted.set(counted.get() + 1);
        FaultDisposition::Continue
    });
    connector.start();

    let inputs: [&[u8]; 4] = [b"bad", b"good", b"bad", b"good"];
    for data in inputs {
        peer.write_message(data, Vec::new()).unwrap();
    }
    run_loop.run_until_idle();

    assert_eq!(delivered.get(), 4);
    assert_eq!(faults.get(), 2);
    assert!(!connector.is_closed());
}

#[test]
fn protocol_violations_skip_the_fault_handler() {
    let run_loop = RunLoop::new();
    let (peer, end) = create_message_pipe();
    let connector = Connector::new(end, &run_loop);
    let errors = errors(&connector);
    connector.set_incoming_message_receiver(|_: Message| -> Result<bool, DispatchError> {
        Err(ProtocolError::MissingRequestId(1).into())
    });
    connector.set_fault_handler(|_| FaultDisposition::Continue);
    connector.start();

    peer.write_message(b"x", Vec::new()).unwrap();
    run_loop.run_until_idle();

    assert!(connector.is_closed());
    assert!(matches!(errors.borrow()[0], ConnectionError::Protocol(_)));
}

#[test]
fn oversized_incoming_message_is_malformed() {
    let run_loop = RunLoop::new();
    let (peer, end) = create_message_pipe();
    let connector = Connector::with_config(
        end,
        &run_loop,
        ConnectorConfig::default().with_max_message_size(16),
    );
    let errors = errors(&connector);
    connector.start();

    peer.write_message(&[0u8; 32], Vec::new()).unwrap();
    run_loop.run_until_idle();

    assert!(connector.is_closed());
    assert!(matches!(
        errors.borrow()[0],
        ConnectionError::Malformed(ValidationError::MessageTooLarge { size: 32, max: 16 })
    ));
}

#[test]
fn pause_holds_messages_until_resume() {
    let run_loop = RunLoop::new();
    let (peer, connector, counter) = started(&run_loop);

    connector.pause_incoming_method_call_processing();
    assert!(connector.is_paused());
    peer.write_message(b"one", Vec::new()).unwrap();
    peer.write_message(b"two", Vec::new()).unwrap();
    run_loop.run_until_idle();
    assert!(counter.messages.borrow().is_empty());

    connector.resume_incoming_method_call_processing();
    run_loop.run_until_idle();
    assert_eq!(counter.messages.borrow().len(), 2);

    peer.write_message(b"three", Vec::new()).unwrap();
    run_loop.run_until_idle();
    assert_eq!(counter.messages.borrow().len(), 3);
}

#[test]
fn pause_from_inside_the_receiver_stops_the_drain() {
    let run_loop = RunLoop::new();
    let (peer, end) = create_message_pipe();
    let connector = Connector::new(end, &run_loop);
    let delivered = Rc::new(Cell::new(0));

    let handle = connector.clone();
    let seen = delivered.clone();
    connector.set_incoming_message_receiver(move |_: Message| -> Result<bool, DispatchError> {
        seen.set(seen.get() + 1);
        handle.pause_incoming_method_call_processing();
        Ok(true)
    });
    connector.start();

    for _ in 0..3 {
        peer.write_message(b"m", Vec::new()).unwrap();
    }
    run_loop.run_until_idle();
    assert_eq!(delivered.get(), 1);

    connector.resume_incoming_method_call_processing();
    run_loop.run_until_idle();
    assert_eq!(delivered.get(), 2);
    connector.close();
}

#[test]
fn close_from_inside_the_receiver() {
    struct Closing {
        connector: Connector,
        delivered: Rc<Cell<usize>>,
        closed: Rc<Cell<usize>>,
    }

    impl MessageReceiver for Closing {
        fn accept(&mut self, _: Message) -> Result<bool, DispatchError> {
            self.delivered.set(self.delivered.get() + 1);
            self.connector.close();
            Ok(true)
        }

        fn on_close(&mut self) {
            self.closed.set(self.closed.get() + 1);
        }
    }

    let run_loop = RunLoop::new();
    let (peer, end) = create_message_pipe();
    let connector = Connector::new(end, &run_loop);
    let delivered = Rc::new(Cell::new(0));
    let closed = Rc::new(Cell::new(0));
    connector.set_incoming_message_receiver(Closing {
        connector: connector.clone(),
        delivered: delivered.clone(),
        closed: closed.clone(),
    });
    connector.start();

    peer.write_message(b"a", Vec::new()).unwrap();
    peer.write_message(b"b", Vec::new()).unwrap();
    run_loop.run_until_idle();

    assert!(connector.is_closed());
    assert!(!connector.encountered_error());
    assert_eq!(delivered.get(), 1);
    assert_eq!(closed.get(), 1);
}

#[test]
fn pass_handle_hands_over_a_live_endpoint() {
    let run_loop = RunLoop::new();
    let (peer, connector, counter) = started(&run_loop);

    let id = connector.pipe_id().unwrap();
    let end = connector.pass_handle().unwrap();
    assert!(connector.is_closed());
    assert_eq!(connector.pipe_id(), None);
    assert_eq!(end.pipe_id(), id);
    assert_eq!(counter.closed.get(), 0);

    peer.write_message(b"after", Vec::new()).unwrap();
    run_loop.run_until_idle();
    assert!(counter.messages.borrow().is_empty());
    assert_eq!(end.read_message().unwrap().bytes.as_ref(), b"after");
}
