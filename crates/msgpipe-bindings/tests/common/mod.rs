#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;

use msgpipe_bindings::{DispatchError, MessageReceiverWithResponder, Responder};
use msgpipe_wire::{
    Decoder, Encoder, Message, MessageHeader, Result, SerializationError, ServiceMessage, Struct,
};

/// `struct Pair { int32 a; int32 b; };`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pair {
    pub a: i32,
    pub b: i32,
}

impl Struct for Pair {
    const DATA_SIZE: usize = 8;

    fn encode_fields(
        self,
        encoder: &mut Encoder,
        base: usize,
    ) -> std::result::Result<(), SerializationError> {
        encoder.put_i32(base, self.a);
        encoder.put_i32(base + 4, self.b);
        Ok(())
    }

    fn decode_fields(decoder: &mut Decoder<'_>, base: usize) -> Result<Self> {
        Ok(Pair {
            a: decoder.i32(base)?,
            b: decoder.i32(base + 4)?,
        })
    }
}

pub const ADD: u32 = 7;
pub const NOTIFY: u32 = 9;

pub fn request(message_type: u32, pair: Pair) -> Message {
    Message::build(MessageHeader::request(message_type), pair).unwrap()
}

pub fn one_way(message_type: u32, pair: Pair) -> Message {
    Message::build(MessageHeader::one_way(message_type), pair).unwrap()
}

/// Everything a [`Service`] saw.
#[derive(Debug, Default)]
pub struct Seen {
    pub one_way: Vec<(u32, Pair)>,
    pub requests: Vec<(u64, Pair)>,
    pub closed: usize,
}

/// Test service: answers `ADD` with the sum in `a`, records one-way
/// messages, and drops the responder for anything else.
pub struct Service {
    pub seen: Rc<RefCell<Seen>>,
}

impl Service {
    pub fn new() -> (Self, Rc<RefCell<Seen>>) {
        let seen = Rc::new(RefCell::new(Seen::default()));
        (Self { seen: seen.clone() }, seen)
    }
}

impl MessageReceiverWithResponder for Service {
    fn accept(&mut self, message: ServiceMessage) -> std::result::Result<bool, DispatchError> {
        let message_type = message.message_type();
        let pair: Pair = message.decode_payload()?;
        self.seen.borrow_mut().one_way.push((message_type, pair));
        Ok(true)
    }

    fn accept_with_responder(
        &mut self,
        message: ServiceMessage,
        responder: Responder,
    ) -> std::result::Result<bool, DispatchError> {
        let request_id = message.request_id();
        let message_type = message.message_type();
        let pair: Pair = message.decode_payload()?;
        self.seen.borrow_mut().requests.push((request_id, pair));

        if message_type != ADD {
            drop(responder);
            return Ok(false);
        }
        let sum = Pair {
            a: pair.a + pair.b,
            b: 0,
        };
        let response = Message::build(MessageHeader::response(ADD, 0), sum)
            .map_err(|err| DispatchError::failed(err.to_string()))?;
        Ok(responder.accept(response))
    }

    fn on_close(&mut self) {
        self.seen.borrow_mut().closed += 1;
    }
}
