//! Transfer protocol round trips across allocator boundaries.

use hearth_core::{Envelope, ScratchAllocator, StackAllocator, Strategy};

#[test]
fn payload_survives_a_scratch_to_scratch_handoff() {
    let mut producer = ScratchAllocator::create(128, 8).expect("producer");
    let payload = [0xDEu8, 0xAD, 0xBE, 0xEF];
    let src = producer.copy_in(&payload).expect("stage the payload");
    // SAFETY: src holds the 4 staged bytes.
    let staged = unsafe { std::slice::from_raw_parts(src.as_ptr(), 4) }.to_vec();

    let envelope = producer.transfer(&staged, 4);

    let mut consumer = ScratchAllocator::create(256, 8).expect("consumer");
    let dest = consumer.absorb(envelope).expect("absorb");
    assert_eq!(dest.as_ptr() as usize % 4, 0);
    // SAFETY: dest holds the 4 absorbed bytes.
    let absorbed = unsafe { std::slice::from_raw_parts(dest.as_ptr(), 4) };
    assert_eq!(absorbed, &payload);
}

#[test]
fn stack_allocators_speak_the_same_protocol() {
    let mut producer = StackAllocator::create(512, 8, Strategy::Eager).expect("producer");
    let payload: Vec<u8> = (0..200u8).collect();
    assert!(producer.copy_in(&payload).is_some());

    let envelope = producer.transfer(&payload, 16);

    let mut consumer = StackAllocator::create(1024, 8, Strategy::Lazy).expect("consumer");
    let dest = consumer.absorb(envelope).expect("absorb");
    assert_eq!(dest.as_ptr() as usize % 16, 0);
    // SAFETY: dest holds payload.len() absorbed bytes.
    let absorbed = unsafe { std::slice::from_raw_parts(dest.as_ptr(), payload.len()) };
    assert_eq!(absorbed, &payload[..]);
}

#[test]
fn payload_larger_than_the_consumer_fails_but_frees_the_envelope() {
    let producer = ScratchAllocator::create(512, 8).expect("producer");
    let payload = vec![0x42u8; 400];
    let envelope = producer.transfer(&payload, 8);

    let mut consumer = ScratchAllocator::create(64, 8).expect("too small");
    assert!(consumer.absorb(envelope).is_none());
    // The envelope is gone either way; the consumer still works.
    assert!(consumer.alloc(64, 1).is_some());
}

#[test]
fn absorbing_a_non_envelope_mapping_returns_none() {
    let scratch = ScratchAllocator::create(128, 8).expect("create");
    let raw = scratch.into_raw();
    // SAFETY: raw is a live mapping with no other owner; it never entered
    // envelope state, so its first word is not the magic.
    let bogus = unsafe { Envelope::from_raw(raw) }.expect("non-null");
    assert_eq!(bogus.payload_size(), None);

    let mut consumer = ScratchAllocator::create(128, 8).expect("consumer");
    assert!(consumer.absorb(bogus).is_none());
}

#[test]
fn defensive_destroy_after_transfer_is_a_no_op() {
    let producer = ScratchAllocator::create(128, 8).expect("producer");
    let envelope = producer.transfer(&[1u8, 2, 3], 1);

    // A raw handle to the sealed mapping, as a scripting host would hold.
    let raw = envelope.into_raw();
    // SAFETY: raw is the sealed mapping's user pointer.
    let ghost = unsafe { ScratchAllocator::from_raw(raw) }.expect("non-null");
    ghost.destroy().expect("destroy on an envelope is success");

    // The mapping is still alive: absorb it now and release it for real.
    // SAFETY: raw still points at the live sealed mapping.
    let envelope = unsafe { Envelope::from_raw(raw) }.expect("non-null");
    let mut consumer = ScratchAllocator::create(64, 8).expect("consumer");
    let dest = consumer.absorb(envelope).expect("absorb");
    // SAFETY: dest holds the 3 absorbed bytes.
    let absorbed = unsafe { std::slice::from_raw_parts(dest.as_ptr(), 3) };
    assert_eq!(absorbed, &[1, 2, 3]);
}

#[test]
fn absorbed_payload_lands_at_the_recorded_alignment() {
    for alignment in [1usize, 2, 8, 64, 512] {
        let producer = ScratchAllocator::create(256, 8).expect("producer");
        let payload = vec![7u8; 33];
        let envelope = producer.transfer(&payload, alignment);

        let mut consumer = ScratchAllocator::create(1024, 8).expect("consumer");
        // Skew the consumer cursor so alignment actually matters.
        assert!(consumer.alloc(1, 1).is_some());

        let dest = consumer.absorb(envelope).expect("absorb");
        assert_eq!(dest.as_ptr() as usize % alignment, 0, "alignment {alignment}");
    }
}
