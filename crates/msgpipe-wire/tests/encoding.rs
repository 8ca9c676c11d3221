mod common;

use common::{HandleBox, Pair, Record, Shape};
use msgpipe_system::{create_message_pipe, UntypedHandle};
use msgpipe_wire::{
    deserialize_from_bytes, serialize_to_bytes, Encoder, Message, MessageHeader,
    SerializationError, ValidationError,
};

#[test]
fn pair_round_trips_through_bytes() {
    let bytes = serialize_to_bytes(Pair { a: 1, b: 2 }).unwrap();
    assert_eq!(bytes.len(), 16);
    assert_eq!(&bytes[0..4], &16u32.to_le_bytes());
    assert_eq!(&bytes[8..12], &1i32.to_le_bytes());
    assert_eq!(&bytes[12..16], &2i32.to_le_bytes());

    let decoded: Pair = deserialize_from_bytes(&bytes).unwrap();
    assert_eq!(decoded, Pair { a: 1, b: 2 });
}

#[test]
fn pair_round_trips_through_message() {
    let message = Message::build(MessageHeader::one_way(9), Pair { a: 1, b: 2 }).unwrap();
    let decoded: Pair = message
        .into_service_message()
        .unwrap()
        .decode_as(9)
        .unwrap();
    assert_eq!(decoded, Pair { a: 1, b: 2 });
}

#[test]
fn record_round_trips() {
    let bytes = serialize_to_bytes(Record::complete()).unwrap();
    let decoded: Record = deserialize_from_bytes(&bytes).unwrap();
    assert_eq!(decoded, Record::complete());
}

#[test]
fn scalar_union_round_trips() {
    let record = Record {
        shape: Some(Shape::Radius(5)),
        ..Record::complete()
    };
    let bytes = serialize_to_bytes(record.clone()).unwrap();
    assert_eq!(deserialize_from_bytes::<Record>(&bytes).unwrap(), record);
}

#[test]
fn nullable_fields_accept_null() {
    let record = Record {
        maybe_inner: None,
        nickname: None,
        tags: None,
        ..Record::complete()
    };
    let bytes = serialize_to_bytes(record.clone()).unwrap();
    assert_eq!(deserialize_from_bytes::<Record>(&bytes).unwrap(), record);
}

#[test]
fn required_struct_must_be_set() {
    let record = Record {
        inner: None,
        ..Record::complete()
    };
    assert_eq!(
        serialize_to_bytes(record).unwrap_err(),
        SerializationError::MissingField("inner")
    );
}

#[test]
fn required_array_must_be_set() {
    let record = Record {
        values: None,
        ..Record::complete()
    };
    assert_eq!(
        serialize_to_bytes(record).unwrap_err(),
        SerializationError::MissingField("values")
    );
}

#[test]
fn required_string_must_be_set() {
    let record = Record {
        name: None,
        ..Record::complete()
    };
    assert_eq!(
        serialize_to_bytes(record).unwrap_err(),
        SerializationError::MissingField("name")
    );
}

#[test]
fn required_union_must_be_set() {
    let record = Record {
        shape: None,
        ..Record::complete()
    };
    assert_eq!(
        serialize_to_bytes(record).unwrap_err(),
        SerializationError::MissingField("shape")
    );
}

#[test]
fn fixed_array_length_is_enforced() {
    for triple in [vec![1u8, 2], vec![1, 2, 3, 4]] {
        let actual = triple.len();
        let record = Record {
            triple: Some(triple),
            ..Record::complete()
        };
        assert_eq!(
            serialize_to_bytes(record).unwrap_err(),
            SerializationError::FixedArrayLength {
                field: "triple",
                expected: 3,
                actual,
            }
        );
    }
}

#[test]
fn required_handle_must_be_valid() {
    let result = Message::build(MessageHeader::one_way(1), HandleBox::default());
    assert_eq!(result.unwrap_err(), SerializationError::InvalidHandle("h"));
}

#[test]
fn nullable_handle_may_be_invalid() {
    let (a, _b) = create_message_pipe();
    let message = Message::build(
        MessageHeader::one_way(1),
        HandleBox {
            h: a.into(),
            maybe: UntypedHandle::Invalid,
        },
    )
    .unwrap();
    assert_eq!(message.handles().len(), 1);

    let decoded: HandleBox = message
        .into_service_message()
        .unwrap()
        .decode_payload()
        .unwrap();
    assert!(decoded.h.is_valid());
    assert!(!decoded.maybe.is_valid());
}

#[test]
fn handle_structs_need_a_message() {
    assert_eq!(
        serialize_to_bytes(HandleBox::default()).unwrap_err(),
        SerializationError::HandlesNotSupported
    );
}

#[test]
fn handles_survive_a_pipe_hop() {
    let (sender, receiver) = create_message_pipe();
    let (near, far) = create_message_pipe();

    let message = Message::build(
        MessageHeader::one_way(2),
        HandleBox {
            h: far.into(),
            maybe: UntypedHandle::Invalid,
        },
    )
    .unwrap();
    let (data, handles) = message.into_parts();
    sender.write_message(&data, handles).unwrap();

    let received = Message::from_raw(receiver.read_message().unwrap());
    let decoded: HandleBox = received
        .into_service_message()
        .unwrap()
        .decode_payload()
        .unwrap();
    let far = decoded.h.into_message_pipe().unwrap();

    near.write_message(b"over", Vec::new()).unwrap();
    assert_eq!(far.read_message().unwrap().bytes.as_ref(), b"over");
}

#[test]
fn out_of_order_handle_indices_rejected() {
    let (a, _b) = create_message_pipe();
    let (c, _d) = create_message_pipe();

    let mut encoder = Encoder::for_message(&MessageHeader::one_way(1));
    encoder
        .encode_struct(HandleBox {
            h: a.into(),
            maybe: c.into(),
        })
        .unwrap();
    let (mut data, handles) = encoder.into_message().into_parts();

    // Header block is 16 bytes, struct header 8: fields start at 24.
    data[24..28].copy_from_slice(&1u32.to_le_bytes());
    data[28..32].copy_from_slice(&0u32.to_le_bytes());

    let result = Message::new(data, handles)
        .into_service_message()
        .unwrap()
        .decode_payload::<HandleBox>();
    assert_eq!(result.unwrap_err(), ValidationError::IllegalHandle(0));
}

fn corrupt(offset: usize, bytes: &[u8]) -> Vec<u8> {
    let mut data = serialize_to_bytes(Record::complete()).unwrap().to_vec();
    data[offset..offset + bytes.len()].copy_from_slice(bytes);
    data
}

// Record block: header at 0, fields at 8; `inner` points to offset 80.
const INNER_POINTER: usize = 8;
const INNER_BLOCK: usize = 80;

#[test]
fn null_required_pointer_rejected() {
    let data = corrupt(INNER_POINTER, &0u64.to_le_bytes());
    assert_eq!(
        deserialize_from_bytes::<Record>(&data).unwrap_err(),
        ValidationError::UnexpectedNull("inner")
    );
}

#[test]
fn misaligned_pointer_rejected() {
    let data = corrupt(INNER_POINTER, &76u64.to_le_bytes());
    assert_eq!(
        deserialize_from_bytes::<Record>(&data).unwrap_err(),
        ValidationError::MisalignedObject(84)
    );
}

#[test]
fn out_of_range_pointer_rejected() {
    let data = corrupt(INNER_POINTER, &(1u64 << 20).to_le_bytes());
    assert!(matches!(
        deserialize_from_bytes::<Record>(&data).unwrap_err(),
        ValidationError::OutOfRange { .. }
    ));
}

#[test]
fn backward_pointer_rejected() {
    // Offsets are unsigned; a wrapping offset is the only way to reach back.
    let data = corrupt(INNER_POINTER, &(u64::MAX - 7).to_le_bytes());
    assert!(matches!(
        deserialize_from_bytes::<Record>(&data).unwrap_err(),
        ValidationError::IllegalPointer(_)
    ));
}

#[test]
fn short_struct_header_rejected() {
    let data = corrupt(INNER_BLOCK, &8u32.to_le_bytes());
    assert_eq!(
        deserialize_from_bytes::<Record>(&data).unwrap_err(),
        ValidationError::UnexpectedStructHeader {
            num_bytes: 8,
            expected: 16
        }
    );
}

#[test]
fn truncated_buffer_rejected() {
    let data = serialize_to_bytes(Record::complete()).unwrap();
    assert!(deserialize_from_bytes::<Record>(&data[..data.len() - 8]).is_err());
}
