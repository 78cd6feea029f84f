//! Property-based tests for instruction framing.
//!
//! - Encode then parse yields the same instruction
//! - The codec reassembles instructions split at any byte offset
//! - Parsing arbitrary bytes never panics

#![cfg(test)]

use bytes::BytesMut;
use proptest::prelude::*;
use tokio_util::codec::Decoder;

use crate::codec::InstructionCodec;
use crate::instruction::{frame_length, Instruction};

fn arb_element() -> impl Strategy<Value = String> {
    prop_oneof![
        "[a-z\\-]{0,12}",
        "[0-9.,;]{0,16}",
        any::<String>().prop_map(|s| s.chars().take(24).collect()),
    ]
}

prop_compose! {
    fn arb_instruction()(
        opcode in arb_element(),
        args in prop::collection::vec(arb_element(), 0..8),
    ) -> Instruction {
        Instruction { opcode, args }
    }
}

proptest! {
    #[test]
    fn prop_encode_parse_roundtrip(ins in arb_instruction()) {
        let wire = ins.encode();
        prop_assert_eq!(wire.len(), ins.encoded_len());
        prop_assert_eq!(frame_length(wire.as_bytes()).unwrap(), Some(wire.len()));
        prop_assert_eq!(Instruction::parse(wire.as_bytes()).unwrap(), ins);
    }

    #[test]
    fn prop_codec_split_anywhere(
        first in arb_instruction(),
        second in arb_instruction(),
        split in 0usize..512,
    ) {
        let mut wire = BytesMut::new();
        first.encode_into(&mut wire);
        second.encode_into(&mut wire);
        let split = split.min(wire.len());

        let mut codec = InstructionCodec::with_max_size(usize::MAX);
        let mut buf = BytesMut::from(&wire[..split]);
        let mut decoded = Vec::new();
        while let Some(ins) = codec.decode(&mut buf).unwrap() {
            decoded.push(ins);
        }
        buf.extend_from_slice(&wire[split..]);
        while let Some(ins) = codec.decode(&mut buf).unwrap() {
            decoded.push(ins);
        }

        prop_assert_eq!(decoded, vec![first, second]);
        prop_assert!(buf.is_empty());
    }

    #[test]
    fn prop_parse_never_panics(data in prop::collection::vec(any::<u8>(), 0..256)) {
        let _ = Instruction::parse(&data);
        let _ = frame_length(&data);
    }
}
