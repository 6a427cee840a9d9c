//! Pool allocator behavior: slot layout, exhaustion, reuse, reset.

use std::collections::HashSet;
use std::ptr::NonNull;

use hearth_core::PoolAllocator;

#[test]
fn four_slots_come_out_at_fixed_offsets() {
    let mut pool = PoolAllocator::create(32, 4, 8).expect("create");

    let slots: Vec<NonNull<u8>> = (0..4).map(|_| pool.acquire().expect("free slot")).collect();
    let base = slots[0].as_ptr() as usize;
    let offsets: Vec<usize> = slots.iter().map(|s| s.as_ptr() as usize - base).collect();
    assert_eq!(offsets, [0, 32, 64, 96]);

    assert!(pool.acquire().is_none(), "fifth acquire on a 4-slot pool");

    pool.release(slots[1]).expect("release the second slot");
    assert_eq!(pool.acquire(), Some(slots[1]), "released slot is reissued");
}

#[test]
fn no_address_is_issued_twice_while_in_flight() {
    let mut pool = PoolAllocator::create(16, 64, 8).expect("create");
    let mut live = HashSet::new();
    for _ in 0..64 {
        let slot = pool.acquire().expect("free slot");
        assert!(live.insert(slot.as_ptr() as usize), "duplicate in-flight address");
    }
    assert!(pool.acquire().is_none());
}

#[test]
fn every_slot_is_inside_the_region_and_slot_aligned() {
    let object_size = 48usize;
    let mut pool = PoolAllocator::create(object_size, 10, 16).expect("create");
    let first = pool.acquire().expect("slot 0");
    let base = first.as_ptr() as usize;
    assert_eq!(base % 16, 0, "region honors the requested alignment");

    let mut addr = base;
    while let Some(slot) = pool.acquire() {
        addr = slot.as_ptr() as usize;
        assert!(addr >= base && addr < base + object_size * 10);
        assert_eq!((addr - base) % object_size, 0);
    }
    assert_eq!(addr, base + object_size * 9, "last slot sits at the region end");
}

#[test]
fn exhaustion_is_soft_and_release_restores_service() {
    let mut pool = PoolAllocator::create(64, 8, 8).expect("create");
    let slots: Vec<NonNull<u8>> = (0..8).map(|_| pool.acquire().expect("free slot")).collect();
    assert_eq!(pool.free_slots(), 0);
    assert!(pool.acquire().is_none());

    for slot in &slots {
        pool.release(*slot).expect("release");
    }
    assert_eq!(pool.free_slots(), 8);

    // Released in order, reissued in the same order.
    for expected in &slots {
        assert_eq!(pool.acquire(), Some(*expected));
    }
}

#[test]
fn slots_are_usable_storage() {
    let mut pool = PoolAllocator::create(128, 4, 64).expect("create");
    let a = pool.acquire().expect("slot a");
    let b = pool.acquire().expect("slot b");

    // SAFETY: both slots are live, distinct, and 128 bytes wide.
    unsafe {
        std::ptr::write_bytes(a.as_ptr(), 0x11, 128);
        std::ptr::write_bytes(b.as_ptr(), 0x22, 128);
        assert_eq!(a.as_ptr().add(127).read(), 0x11, "neighbor write must not bleed");
        assert_eq!(b.as_ptr().read(), 0x22);
    }
}

#[test]
fn reset_makes_every_slot_free_again() {
    let mut pool = PoolAllocator::create(32, 6, 8).expect("create");
    for _ in 0..6 {
        let _ = pool.acquire().expect("free slot");
    }
    assert_eq!(pool.free_slots(), 0);

    pool.reset().expect("reset");
    assert_eq!(pool.free_slots(), 6);
    for _ in 0..6 {
        assert!(pool.acquire().is_some());
    }
}

#[test]
fn interleaved_acquire_release_cycles_stay_consistent() {
    let mut pool = PoolAllocator::create(24, 5, 8).expect("create");
    let mut held: Vec<NonNull<u8>> = Vec::new();

    for round in 0..50usize {
        if round % 3 == 0 && !held.is_empty() {
            let slot = held.swap_remove(round % held.len());
            pool.release(slot).expect("release");
        } else if let Some(slot) = pool.acquire() {
            held.push(slot);
        }
        assert_eq!(pool.free_slots() + held.len(), 5);
    }
}

#[test]
fn destroy_reports_success() {
    let pool = PoolAllocator::create(32, 4, 8).expect("create");
    pool.destroy().expect("destroy");
}
