//! Property-based tests for the framing engines.
//!
//! - Any APDU that fits the destination survives fragmentation and
//!   reassembly byte for byte
//! - A first chunk declaring more than the destination holds is refused no
//!   matter what it carries
//! - Reports whose sequence number is not the expected one never reach the
//!   destination buffer

use proptest::prelude::*;

use crate::chunk::{Chunk, Tag};
use crate::link::NullWriter;
use crate::receive::ReceiveOutcome;
use crate::send::SendOutcome;
use crate::testing::framer;

const CAPACITY: usize = 600;

fn fragment<const N: usize>(apdu: &[u8], channel: u16) -> Vec<[u8; N]> {
    let mut sender = framer::<N>();
    sender.session_mut().set_channel_id(channel);
    let mut link = Vec::new();
    sender.begin_send(&mut link, apdu).unwrap();
    while sender.continue_send(&mut link, apdu) == SendOutcome::ChunkEmitted {}
    assert!(sender.session().is_idle());
    link
}

fn reassemble<const N: usize>(chunks: &[[u8; N]], buffer: &mut [u8]) -> Vec<ReceiveOutcome> {
    let mut receiver = framer::<N>();
    chunks
        .iter()
        .map(|chunk| receiver.receive(&mut NullWriter, chunk, &mut *buffer))
        .collect()
}

fn check_round_trip<const N: usize>(apdu: &[u8], channel: u16) -> Result<(), TestCaseError> {
    let chunks = fragment::<N>(apdu, channel);
    let mut buffer = [0u8; CAPACITY];
    let outcomes = reassemble::<N>(&chunks, &mut buffer);

    let (last, rest) = outcomes.split_last().unwrap();
    prop_assert_eq!(*last, ReceiveOutcome::Completed(apdu.len()));
    prop_assert!(rest.iter().all(|o| *o == ReceiveOutcome::MoreDataExpected));
    prop_assert_eq!(&buffer[..apdu.len()], apdu);
    for chunk in &chunks {
        prop_assert_eq!(Chunk::<N>::from_slice(chunk).channel_id(), channel);
    }
    Ok(())
}

proptest! {
    #[test]
    fn round_trip_64_byte_reports(
        apdu in prop::collection::vec(any::<u8>(), 1..=CAPACITY),
        channel in any::<u16>(),
    ) {
        check_round_trip::<64>(&apdu, channel)?;
    }

    #[test]
    fn round_trip_small_reports(
        apdu in prop::collection::vec(any::<u8>(), 1..=CAPACITY),
        channel in any::<u16>(),
    ) {
        check_round_trip::<8>(&apdu, channel)?;
        check_round_trip::<32>(&apdu, channel)?;
    }

    #[test]
    fn oversized_declaration_is_refused(
        declared in (CAPACITY as u16 + 1)..=u16::MAX,
        payload in prop::collection::vec(any::<u8>(), 57),
    ) {
        let mut chunk = Chunk::<64>::zeroed();
        chunk.set_header(1, Tag::Data);
        chunk.set_total_length(declared);
        chunk.payload_mut().copy_from_slice(&payload);

        let mut receiver = framer::<64>();
        let mut buffer = [0u8; CAPACITY];
        let outcome = receiver.receive(&mut NullWriter, chunk.as_bytes(), &mut buffer);
        prop_assert_eq!(outcome, ReceiveOutcome::Reset);
        prop_assert_eq!(receiver.session().remaining_length(), 0);
        prop_assert!(buffer.iter().all(|b| *b == 0));
    }

    #[test]
    fn unexpected_sequence_never_writes(sequence in 1..=u16::MAX, fill in 1..=u8::MAX) {
        let mut chunk = Chunk::<64>::zeroed();
        chunk.set_header(1, Tag::Data);
        chunk.set_sequence(sequence);
        chunk.payload_mut().fill(fill);

        let mut receiver = framer::<64>();
        let mut buffer = [0u8; CAPACITY];
        let outcome = receiver.receive(&mut NullWriter, chunk.as_bytes(), &mut buffer);
        prop_assert_eq!(outcome, ReceiveOutcome::Reset);
        prop_assert!(buffer.iter().all(|b| *b == 0));
    }
}
