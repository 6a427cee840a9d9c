//! Stack allocator behavior: checkpoints, unwinding, lazy commit coupling.

use hearth_core::{AllocError, StackAllocator, Strategy, store};

#[test]
fn nested_record_unwind_restores_each_level() {
    let mut stack = StackAllocator::create(256, 8, Strategy::Eager).expect("create");

    stack.record().expect("record at 0");
    assert!(stack.alloc(100, 8).is_some());
    assert_eq!(stack.allocated(), 100);

    stack.record().expect("record at 100");
    assert!(stack.alloc(80, 8).is_some());
    assert_eq!(stack.allocated(), 180);

    stack.unwind().expect("unwind to 100");
    assert_eq!(stack.allocated(), 100);
    assert!(stack.alloc(50, 8).is_some());
    assert_eq!(stack.allocated(), 150);

    stack.unwind().expect("unwind to 0");
    assert_eq!(stack.allocated(), 0);
}

#[test]
fn matched_pairs_always_return_to_the_outer_cursor() {
    let mut stack = StackAllocator::create(4096, 8, Strategy::Eager).expect("create");
    assert!(stack.alloc(123, 1).is_some());
    let outer = stack.allocated();

    for depth in 1..8usize {
        for _ in 0..depth {
            stack.record().expect("record");
            assert!(stack.alloc(64, 8).is_some());
        }
        for _ in 0..depth {
            stack.unwind().expect("unwind");
        }
        assert_eq!(stack.allocated(), outer, "depth {depth}");
    }
}

#[test]
fn records_past_the_depth_limit_return_stack_overflow() {
    let mut stack = StackAllocator::create(256, 8, Strategy::Eager).expect("create");
    let mut accepted = 0usize;
    let mut refused = 0usize;
    for _ in 0..65 {
        match stack.record() {
            Ok(()) => accepted += 1,
            Err(err) => {
                assert_eq!(err, AllocError::StackOverflow);
                refused += 1;
            }
        }
    }
    assert_eq!(accepted + refused, 65);
    assert!(refused >= 1, "the 65th record must be refused");
    // Refusal is recoverable: the allocator still works.
    assert!(stack.alloc(16, 8).is_some());
    for _ in 0..accepted {
        stack.unwind().expect("drain checkpoints");
    }
}

#[test]
#[should_panic(expected = "empty checkpoint stack")]
fn unmatched_unwind_is_a_caller_bug() {
    let mut stack = StackAllocator::create(64, 8, Strategy::Eager).expect("create");
    stack.record().expect("record");
    stack.unwind().expect("matched unwind");
    let _ = stack.unwind();
}

#[test]
fn reset_discards_all_checkpoints() {
    let mut stack = StackAllocator::create(256, 8, Strategy::Eager).expect("create");
    stack.record().expect("record");
    assert!(stack.alloc(32, 8).is_some());
    stack.record().expect("record");
    stack.reset().expect("reset");
    assert_eq!(stack.depth(), 0);
    assert_eq!(stack.allocated(), 0);
    assert!(stack.alloc(256, 1).is_some(), "full capacity after reset");
}

#[test]
fn lazy_stack_commits_one_page_for_the_first_byte() {
    let page = store::page_size();
    let mut stack = StackAllocator::create(1 << 20, 1, Strategy::Lazy).expect("create");
    assert_eq!(stack.committed_bytes(), page, "only the metadata page at rest");

    assert!(stack.alloc(1, 1).is_some());
    assert_eq!(stack.committed_bytes(), 2 * page, "first alloc commits one page");

    assert!(stack.alloc(page, 1).is_some());
    assert_eq!(
        stack.committed_bytes(),
        3 * page,
        "page-sized alloc commits one more page"
    );
    assert_eq!(stack.committed_pages(), 3);
}

#[test]
fn lazy_alloc_fails_cleanly_when_the_reservation_is_spent() {
    let page = store::page_size();
    // Tiny capacity: the reservation holds very few pages, and every alloc
    // commits at least one, so commits run dry before the cursor does.
    let mut stack = StackAllocator::create(4 * page, 1, Strategy::Lazy).expect("create");

    let mut served = 0usize;
    loop {
        let before = stack.allocated();
        match stack.alloc(16, 1) {
            Some(_) => {
                served += 1;
                assert!(served < 10_000, "allocator must run out eventually");
            }
            None => {
                // The refused alloc must not move the cursor.
                assert_eq!(stack.allocated(), before);
                break;
            }
        }
    }
    assert!(served > 0, "some allocations must have landed first");
}

#[test]
fn unwound_space_can_be_reallocated() {
    let mut stack = StackAllocator::create(128, 8, Strategy::Eager).expect("create");
    stack.record().expect("record");
    let first = stack.alloc(96, 8).expect("first alloc");
    stack.unwind().expect("unwind");
    let second = stack.alloc(96, 8).expect("realloc of unwound space");
    assert_eq!(first, second, "the unwound span is reissued from the same address");
}

#[test]
fn copy_in_and_move_in_mirror_the_scratch_semantics() {
    let mut stack = StackAllocator::create(512, 8, Strategy::Eager).expect("create");

    let payload: Vec<u8> = (0..100u8).collect();
    let dest = stack.copy_in(&payload).expect("copy");
    // SAFETY: dest holds payload.len() initialized bytes.
    let copied = unsafe { std::slice::from_raw_parts(dest.as_ptr(), payload.len()) };
    assert_eq!(copied, &payload[..]);

    let moved = stack.move_in(payload).expect("move fits");
    // SAFETY: moved holds 100 initialized bytes.
    let bytes = unsafe { std::slice::from_raw_parts(moved.as_ptr(), 100) };
    assert_eq!(bytes[99], 99);

    let big = vec![0u8; 4096];
    let returned = stack.move_in(big).expect_err("cannot fit");
    assert_eq!(returned.len(), 4096);
}

#[test]
fn destroy_reports_success() {
    let stack = StackAllocator::create(128, 8, Strategy::Lazy).expect("create");
    stack.destroy().expect("destroy");
}
